//! Spreadsheet session capability

use async_trait::async_trait;
use calcpilot_core::{CellRef, Result};
use std::sync::Arc;

use crate::protocol::{CellContent, DocumentInfo, SheetOp};

/// Trait for talking to a live spreadsheet (allows in-memory sessions in tests)
///
/// Every call is a blocking round trip; callers issue them one at a time.
#[async_trait]
pub trait CalcSession: Send + Sync {
    /// Check that the session answers
    async fn ping(&self) -> Result<()>;

    /// Document currently focused in the application
    async fn current_document(&self) -> Result<DocumentInfo>;

    /// Name of the active sheet in the current document
    async fn active_sheet(&self) -> Result<String>;

    /// All sheet names in the current document, in tab order
    async fn sheet_names(&self) -> Result<Vec<String>>;

    /// Number of sheets in the current document
    async fn sheet_count(&self) -> Result<usize> {
        Ok(self.sheet_names().await?.len())
    }

    /// Every open document, spreadsheet or not
    async fn open_documents(&self) -> Result<Vec<DocumentInfo>>;

    /// Read a cell; `cell.sheet == None` means the active sheet
    async fn read_cell(&self, cell: &CellRef) -> Result<CellContent>;

    /// Apply one operation
    async fn apply(&self, op: &SheetOp) -> Result<()>;

    /// Endpoint description for messages
    fn endpoint(&self) -> &str;
}

#[async_trait]
impl<T: CalcSession + ?Sized> CalcSession for Arc<T> {
    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }

    async fn current_document(&self) -> Result<DocumentInfo> {
        (**self).current_document().await
    }

    async fn active_sheet(&self) -> Result<String> {
        (**self).active_sheet().await
    }

    async fn sheet_names(&self) -> Result<Vec<String>> {
        (**self).sheet_names().await
    }

    async fn sheet_count(&self) -> Result<usize> {
        (**self).sheet_count().await
    }

    async fn open_documents(&self) -> Result<Vec<DocumentInfo>> {
        (**self).open_documents().await
    }

    async fn read_cell(&self, cell: &CellRef) -> Result<CellContent> {
        (**self).read_cell(cell).await
    }

    async fn apply(&self, op: &SheetOp) -> Result<()> {
        (**self).apply(op).await
    }

    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }
}

#[async_trait]
impl<T: CalcSession + ?Sized> CalcSession for Box<T> {
    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }

    async fn current_document(&self) -> Result<DocumentInfo> {
        (**self).current_document().await
    }

    async fn active_sheet(&self) -> Result<String> {
        (**self).active_sheet().await
    }

    async fn sheet_names(&self) -> Result<Vec<String>> {
        (**self).sheet_names().await
    }

    async fn sheet_count(&self) -> Result<usize> {
        (**self).sheet_count().await
    }

    async fn open_documents(&self) -> Result<Vec<DocumentInfo>> {
        (**self).open_documents().await
    }

    async fn read_cell(&self, cell: &CellRef) -> Result<CellContent> {
        (**self).read_cell(cell).await
    }

    async fn apply(&self, op: &SheetOp) -> Result<()> {
        (**self).apply(op).await
    }

    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }
}
