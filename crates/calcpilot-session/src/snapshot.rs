//! Best-effort state snapshots
//!
//! Each requested observation is queried on its own; a failing query becomes
//! an error description under its key and never aborts the rest.

use calcpilot_core::{Snapshot, SnapshotRequest};
use tracing::debug;

use crate::session::CalcSession;

/// Collect the requested observations from the session
pub async fn collect_snapshot<S: CalcSession + ?Sized>(
    session: &S,
    request: &SnapshotRequest,
) -> Snapshot {
    match session.current_document().await {
        Ok(document) if !document.is_spreadsheet => {
            return Snapshot::failed(format!(
                "The current document '{}' is not a spreadsheet",
                document.title
            ));
        }
        Ok(_) => {}
        Err(e) => {
            return Snapshot::failed(format!("Failed to query the spreadsheet session: {}", e));
        }
    }

    let mut snapshot = Snapshot::new();

    for cell in &request.cell_values {
        let key = format!("cell_value_{}", cell);
        match session.read_cell(cell).await {
            Ok(content) => snapshot.record(
                key,
                format!("Cell {} value: {}", cell, content.display_value()),
            ),
            Err(e) => snapshot.record(key, format!("Failed to read cell {}: {}", cell, e)),
        }
    }

    if request.active_sheet_name {
        match session.active_sheet().await {
            Ok(name) => snapshot.record("active_sheet_name", format!("Active sheet: {}", name)),
            Err(e) => snapshot.record(
                "active_sheet_name",
                format!("Failed to get the active sheet name: {}", e),
            ),
        }
    }

    if request.sheet_count {
        match session.sheet_count().await {
            Ok(count) => snapshot.record("sheet_count", format!("Sheet count: {}", count)),
            Err(e) => snapshot.record("sheet_count", format!("Failed to count sheets: {}", e)),
        }
    }

    if request.sheet_names {
        match session.sheet_names().await {
            Ok(names) => snapshot.record("sheet_names", format!("Sheet names: {:?}", names)),
            Err(e) => snapshot.record("sheet_names", format!("Failed to list sheet names: {}", e)),
        }
    }

    if request.document_count {
        // Only spreadsheet documents count
        match session.open_documents().await {
            Ok(documents) => {
                let count = documents.iter().filter(|d| d.is_spreadsheet).count();
                snapshot.record(
                    "document_count",
                    format!("Open spreadsheet documents: {}", count),
                )
            }
            Err(e) => snapshot.record(
                "document_count",
                format!("Failed to count documents: {}", e),
            ),
        }
    }

    debug!("Collected snapshot with {} entries", snapshot.len());
    snapshot
}
