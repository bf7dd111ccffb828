//! In-memory spreadsheet session
//!
//! Implements [`CalcSession`] over a plain in-process workbook model. Used by
//! tests and dry runs; failures can be injected per query or per cell.

use async_trait::async_trait;
use calcpilot_core::{CalcError, CellRef, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::protocol::{CellContent, DocumentInfo, SheetOp};
use crate::session::CalcSession;

/// Queries that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    Ping,
    CurrentDocument,
    ActiveSheet,
    SheetNames,
    SheetCount,
    OpenDocuments,
    Apply,
}

#[derive(Debug, Clone)]
enum Cell {
    Text(String),
    Number(f64),
    Formula(String),
}

impl Cell {
    fn content(&self) -> CellContent {
        match self {
            Cell::Text(text) => CellContent {
                text: text.clone(),
                value: None,
                formula: text.clone(),
            },
            Cell::Number(value) => CellContent {
                text: value.to_string(),
                value: Some(*value),
                formula: value.to_string(),
            },
            // Formulas are not evaluated here
            Cell::Formula(formula) => CellContent {
                text: String::new(),
                value: None,
                formula: formula.clone(),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct Sheet {
    name: String,
    cells: BTreeMap<String, Cell>,
}

impl Sheet {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct Document {
    title: String,
    is_spreadsheet: bool,
    sheets: Vec<Sheet>,
    active: usize,
}

#[derive(Debug)]
struct State {
    documents: Vec<Document>,
    current: usize,
    applied: Vec<SheetOp>,
    failures: HashMap<FailurePoint, String>,
    cell_failures: HashMap<String, String>,
}

impl State {
    fn fail(&self, point: FailurePoint) -> Result<()> {
        match self.failures.get(&point) {
            Some(message) => Err(CalcError::Session(message.clone())),
            None => Ok(()),
        }
    }

    fn spreadsheet(&self) -> Result<&Document> {
        let document = &self.documents[self.current];
        if !document.is_spreadsheet {
            return Err(CalcError::Session(format!(
                "'{}' is not a spreadsheet document",
                document.title
            )));
        }
        Ok(document)
    }

    fn spreadsheet_mut(&mut self) -> Result<&mut Document> {
        self.spreadsheet()?;
        Ok(&mut self.documents[self.current])
    }

    fn sheet_mut(&mut self, cell: &CellRef) -> Result<&mut Sheet> {
        let document = self.spreadsheet_mut()?;
        match &cell.sheet {
            Some(name) => document
                .sheets
                .iter_mut()
                .find(|s| &s.name == name)
                .ok_or_else(|| CalcError::Session(format!("no sheet named {}", name))),
            None => Ok(&mut document.sheets[document.active]),
        }
    }

    fn sheet_index(document: &Document, name: &str) -> Result<usize> {
        document
            .sheets
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| CalcError::Session(format!("no sheet named {}", name)))
    }

    fn apply(&mut self, op: &SheetOp) -> Result<()> {
        match op {
            SheetOp::SetText { cell, text } => {
                let cell: CellRef = cell.parse()?;
                self.sheet_mut(&cell)?
                    .cells
                    .insert(cell.cell.clone(), Cell::Text(text.clone()));
            }
            SheetOp::SetNumber { cell, value } => {
                let cell: CellRef = cell.parse()?;
                self.sheet_mut(&cell)?
                    .cells
                    .insert(cell.cell.clone(), Cell::Number(*value));
            }
            SheetOp::SetFormula { cell, formula } => {
                if !formula.starts_with('=') {
                    return Err(CalcError::OperationRejected(format!(
                        "formula must start with '=': {}",
                        formula
                    )));
                }
                let cell: CellRef = cell.parse()?;
                self.sheet_mut(&cell)?
                    .cells
                    .insert(cell.cell.clone(), Cell::Formula(formula.clone()));
            }
            SheetOp::Clear { cell } => {
                let cell: CellRef = cell.parse()?;
                self.sheet_mut(&cell)?.cells.remove(&cell.cell);
            }
            SheetOp::InsertSheet { name, position } => {
                let document = self.spreadsheet_mut()?;
                if document.sheets.iter().any(|s| &s.name == name) {
                    return Err(CalcError::OperationRejected(format!(
                        "sheet {} already exists",
                        name
                    )));
                }
                let index = position
                    .unwrap_or(document.sheets.len())
                    .min(document.sheets.len());
                document.sheets.insert(index, Sheet::new(name.clone()));
                if index <= document.active && document.sheets.len() > 1 {
                    document.active += 1;
                }
            }
            SheetOp::RemoveSheet { name } => {
                let document = self.spreadsheet_mut()?;
                let index = Self::sheet_index(document, name)?;
                if document.sheets.len() == 1 {
                    return Err(CalcError::OperationRejected(
                        "cannot remove the last sheet".to_string(),
                    ));
                }
                document.sheets.remove(index);
                if document.active > index || document.active >= document.sheets.len() {
                    document.active = document.active.saturating_sub(1);
                }
            }
            SheetOp::RenameSheet { from, to } => {
                let document = self.spreadsheet_mut()?;
                if document.sheets.iter().any(|s| &s.name == to) {
                    return Err(CalcError::OperationRejected(format!(
                        "sheet {} already exists",
                        to
                    )));
                }
                let index = Self::sheet_index(document, from)?;
                document.sheets[index].name = to.clone();
            }
            SheetOp::ActivateSheet { name } => {
                let document = self.spreadsheet_mut()?;
                document.active = Self::sheet_index(document, name)?;
            }
        }
        Ok(())
    }
}

/// In-memory session holding one or more documents
pub struct MemorySession {
    endpoint: String,
    state: Mutex<State>,
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySession {
    /// One spreadsheet document with a single `Sheet1`
    pub fn new() -> Self {
        Self {
            endpoint: "memory".to_string(),
            state: Mutex::new(State {
                documents: vec![Document {
                    title: "Untitled 1".to_string(),
                    is_spreadsheet: true,
                    sheets: vec![Sheet::new("Sheet1")],
                    active: 0,
                }],
                current: 0,
                applied: Vec::new(),
                failures: HashMap::new(),
                cell_failures: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a sheet to the current document
    pub fn with_sheet(self, name: &str) -> Self {
        {
            let mut state = self.state();
            let current = state.current;
            state.documents[current].sheets.push(Sheet::new(name));
        }
        self
    }

    /// Preload a text cell (`A1` or `Sheet1.A1`)
    pub fn with_text(self, cell: &str, text: &str) -> Self {
        self.preload(SheetOp::SetText {
            cell: cell.to_string(),
            text: text.to_string(),
        })
    }

    /// Preload a numeric cell
    pub fn with_number(self, cell: &str, value: f64) -> Self {
        self.preload(SheetOp::SetNumber {
            cell: cell.to_string(),
            value,
        })
    }

    /// Preload a formula cell
    pub fn with_formula(self, cell: &str, formula: &str) -> Self {
        self.preload(SheetOp::SetFormula {
            cell: cell.to_string(),
            formula: formula.to_string(),
        })
    }

    fn preload(self, op: SheetOp) -> Self {
        if let Err(e) = self.state().apply(&op) {
            tracing::warn!("Ignoring preload {}: {}", op.describe(), e);
        }
        self
    }

    /// Open another document and focus it
    pub fn with_focused_document(self, title: &str, is_spreadsheet: bool) -> Self {
        {
            let mut state = self.state();
            state.documents.push(Document {
                title: title.to_string(),
                is_spreadsheet,
                sheets: if is_spreadsheet {
                    vec![Sheet::new("Sheet1")]
                } else {
                    Vec::new()
                },
                active: 0,
            });
            state.current = state.documents.len() - 1;
        }
        self
    }

    /// Make a query fail with `message`
    pub fn failing(self, point: FailurePoint, message: &str) -> Self {
        self.state().failures.insert(point, message.to_string());
        self
    }

    /// Make reads of one cell fail with `message`
    pub fn failing_cell(self, cell: &str, message: &str) -> Self {
        self.state()
            .cell_failures
            .insert(cell.to_string(), message.to_string());
        self
    }

    /// Operations applied so far, preloads excluded
    pub fn applied_ops(&self) -> Vec<SheetOp> {
        self.state().applied.clone()
    }

    /// Display value of a cell, `None` when the cell or sheet is missing
    pub fn cell_value(&self, cell: &str) -> Option<String> {
        let cell: CellRef = cell.parse().ok()?;
        let state = self.state();
        let document = state.spreadsheet().ok()?;
        let sheet = match &cell.sheet {
            Some(name) => document.sheets.iter().find(|s| &s.name == name)?,
            None => &document.sheets[document.active],
        };
        sheet
            .cells
            .get(&cell.cell)
            .map(|c| c.content().display_value())
    }
}

#[async_trait]
impl CalcSession for MemorySession {
    async fn ping(&self) -> Result<()> {
        self.state()
            .fail(FailurePoint::Ping)
            .map_err(|e| CalcError::SessionUnavailable(e.to_string()))
    }

    async fn current_document(&self) -> Result<DocumentInfo> {
        let state = self.state();
        state.fail(FailurePoint::CurrentDocument)?;
        let document = &state.documents[state.current];
        Ok(DocumentInfo {
            title: document.title.clone(),
            is_spreadsheet: document.is_spreadsheet,
        })
    }

    async fn active_sheet(&self) -> Result<String> {
        let state = self.state();
        state.fail(FailurePoint::ActiveSheet)?;
        let document = state.spreadsheet()?;
        Ok(document.sheets[document.active].name.clone())
    }

    async fn sheet_names(&self) -> Result<Vec<String>> {
        let state = self.state();
        state.fail(FailurePoint::SheetNames)?;
        Ok(state
            .spreadsheet()?
            .sheets
            .iter()
            .map(|s| s.name.clone())
            .collect())
    }

    async fn sheet_count(&self) -> Result<usize> {
        let state = self.state();
        state.fail(FailurePoint::SheetCount)?;
        Ok(state.spreadsheet()?.sheets.len())
    }

    async fn open_documents(&self) -> Result<Vec<DocumentInfo>> {
        let state = self.state();
        state.fail(FailurePoint::OpenDocuments)?;
        Ok(state
            .documents
            .iter()
            .map(|d| DocumentInfo {
                title: d.title.clone(),
                is_spreadsheet: d.is_spreadsheet,
            })
            .collect())
    }

    async fn read_cell(&self, cell: &CellRef) -> Result<CellContent> {
        let state = self.state();
        if let Some(message) = state.cell_failures.get(&cell.to_string()) {
            return Err(CalcError::Session(message.clone()));
        }
        let document = state.spreadsheet()?;
        let sheet = match &cell.sheet {
            Some(name) => &document.sheets[State::sheet_index(document, name)?],
            None => &document.sheets[document.active],
        };
        Ok(sheet
            .cells
            .get(&cell.cell)
            .map(Cell::content)
            .unwrap_or_default())
    }

    async fn apply(&self, op: &SheetOp) -> Result<()> {
        let mut state = self.state();
        state.fail(FailurePoint::Apply)?;
        state.apply(op)?;
        state.applied.push(op.clone());
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
