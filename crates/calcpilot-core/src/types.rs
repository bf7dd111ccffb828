//! Core type definitions for calcpilot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LoopDefaults;
use crate::CalcError;

/// A spreadsheet cell reference, optionally qualified with a sheet name
///
/// Textual form is `A1` or `Sheet1.A1`. The sheet part is everything before
/// the first `.`, so sheet names may contain spaces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellRef {
    /// Sheet name, or `None` for the active sheet
    pub sheet: Option<String>,
    /// Cell address within the sheet (`B12`)
    pub cell: String,
}

impl CellRef {
    /// Reference a cell on the active sheet
    pub fn active(cell: impl Into<String>) -> Self {
        Self {
            sheet: None,
            cell: cell.into(),
        }
    }

    /// Reference a cell on a named sheet
    pub fn on_sheet(sheet: impl Into<String>, cell: impl Into<String>) -> Self {
        Self {
            sheet: Some(sheet.into()),
            cell: cell.into(),
        }
    }

    /// Zero-based (row, column) of the cell address
    pub fn position(&self) -> (usize, usize) {
        let split = self
            .cell
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(self.cell.len());
        let (letters, digits) = self.cell.split_at(split);

        let col = letters
            .bytes()
            .filter(u8::is_ascii_alphabetic)
            .map(|b| b.to_ascii_uppercase())
            .fold(0usize, |acc, b| acc * 26 + (b - b'A' + 1) as usize);
        let row: usize = digits.parse().unwrap_or(1);

        (row.saturating_sub(1), col.saturating_sub(1))
    }
}

impl std::fmt::Display for CellRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sheet {
            Some(sheet) => write!(f, "{}.{}", sheet, self.cell),
            None => write!(f, "{}", self.cell),
        }
    }
}

impl std::str::FromStr for CellRef {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (sheet, cell) = match s.split_once('.') {
            Some((sheet, cell)) => {
                if sheet.trim().is_empty() {
                    return Err(CalcError::InvalidCellRef(format!("empty sheet name in '{}'", s)));
                }
                (Some(sheet.to_string()), cell)
            }
            None => (None, s),
        };

        let cell = cell.trim().to_ascii_uppercase();
        let letters = cell.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        let digits = cell[letters..].chars().all(|c| c.is_ascii_digit());

        if letters == 0 || letters == cell.len() || !digits || letters > 3 {
            return Err(CalcError::InvalidCellRef(s.to_string()));
        }
        if cell[letters..].trim_start_matches('0').is_empty() {
            return Err(CalcError::InvalidCellRef(format!("row 0 in '{}'", s)));
        }

        Ok(Self { sheet, cell })
    }
}

/// Observations to collect from the live session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRequest {
    /// Cells whose values are reported
    pub cell_values: Vec<CellRef>,
    /// Report the active sheet name
    pub active_sheet_name: bool,
    /// Report the number of sheets in the current document
    pub sheet_count: bool,
    /// Report every sheet name in the current document
    pub sheet_names: bool,
    /// Report how many spreadsheet documents are open
    pub document_count: bool,
}

impl SnapshotRequest {
    /// Standard request used by the loop: cells plus sheet and document counts
    pub fn for_cells(cells: Vec<CellRef>) -> Self {
        Self {
            cell_values: cells,
            active_sheet_name: true,
            sheet_count: true,
            sheet_names: false,
            document_count: true,
        }
    }

    /// Also report every sheet name
    pub fn with_sheet_names(mut self, enabled: bool) -> Self {
        self.sheet_names = enabled;
        self
    }
}

/// One observed fact in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub description: String,
}

/// Point-in-time, best-effort collection of observed spreadsheet facts
///
/// Entries keep the order in which they were collected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    /// Key used when the whole snapshot could not be collected
    pub const ERROR_KEY: &'static str = "error";

    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot holding a single error entry
    pub fn failed(description: impl Into<String>) -> Self {
        let mut snapshot = Self::new();
        snapshot.record(Self::ERROR_KEY, description);
        snapshot
    }

    /// Record an observation, replacing an earlier one with the same key
    pub fn record(&mut self, key: impl Into<String>, description: impl Into<String>) {
        let key = key.into();
        let description = description.into();
        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(entry) => entry.description = description,
            None => self.entries.push(SnapshotEntry { key, description }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.description.as_str())
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as `key: description` lines
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}: {}", e.key, e.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Configuration for the loop engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Iteration budget before asking for an extension
    pub max_iterations: usize,
    /// How many iterations one accepted extension adds
    pub extension_step: usize,
    /// Cell tracked when the instruction names none
    pub default_cell: String,
    /// Upper bound on feedback history characters embedded in a prompt
    pub history_window_chars: usize,
    /// Include every sheet name in snapshots
    pub observe_sheet_names: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        LoopConfig::from(&LoopDefaults::default())
    }
}

impl From<&LoopDefaults> for LoopConfig {
    fn from(defaults: &LoopDefaults) -> Self {
        Self {
            max_iterations: defaults.max_iterations,
            extension_step: defaults.extension_step,
            default_cell: defaults.default_cell.clone(),
            history_window_chars: defaults.history_window_chars,
            observe_sheet_names: defaults.observe_sheet_names,
        }
    }
}

/// One generate/execute/evaluate iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// Iteration number (1-based)
    pub iteration: usize,
    /// Operation script extracted from the generator response
    pub code: String,
    /// Error reported while applying the operations
    pub execution_error: Option<String>,
    /// State before the operations were applied
    pub pre_snapshot: Snapshot,
    /// State after the operations were applied
    pub post_snapshot: Snapshot,
    /// Evaluator response, if one was returned
    pub evaluation: Option<String>,
    /// Whether the evaluator judged the attempt successful
    pub success: bool,
    /// Whether revert operations were applied after a failure
    pub reverted: bool,
    /// When the attempt started
    pub started_at: DateTime<Utc>,
}

/// Why the loop stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// An attempt was judged successful
    Succeeded,
    /// Instruction was empty
    EmptyInstruction,
    /// Session could not be reached before the first attempt
    SessionUnreachable(String),
    /// The generator returned nothing
    GenerationFailed(String),
    /// Revert operations failed; session state may be inconsistent
    RevertFailed(String),
    /// Iteration budget used up (or extension declined)
    BudgetExhausted,
    /// Interrupted by the user
    Interrupted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::EmptyInstruction => write!(f, "no instruction given"),
            Self::SessionUnreachable(e) => write!(f, "session unreachable: {}", e),
            Self::GenerationFailed(e) => write!(f, "generation failed: {}", e),
            Self::RevertFailed(e) => write!(f, "revert failed: {}", e),
            Self::BudgetExhausted => write!(f, "iteration budget exhausted"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Result from running a complete loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopResult {
    /// Iterations started (including ones that produced no attempt)
    pub iterations: usize,
    /// Whether an attempt was judged successful
    pub success: bool,
    /// Operations of the first successful attempt
    pub final_code: Option<String>,
    /// Every executed attempt, in order
    pub attempts: Vec<Attempt>,
    /// Reason for stopping
    pub stop_reason: StopReason,
}

impl LoopResult {
    /// A result for a run that stopped before any iteration
    pub fn stopped(stop_reason: StopReason) -> Self {
        Self {
            iterations: 0,
            success: false,
            final_code: None,
            attempts: Vec::new(),
            stop_reason,
        }
    }
}
