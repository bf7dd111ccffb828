//! Operation executor - parses and applies generated spreadsheet operations
//!
//! The model answers with a JSON array of operations inside a ```json fence:
//!
//! ```text
//! [{"op": "set_text", "cell": "A1", "text": "Hello"}]
//! ```
//!
//! Only the operations enumerated in [`SheetOp`] can be expressed; there is no
//! free-form code path.

use calcpilot_core::{CalcError, CellRef, Result};
use tracing::{debug, info, warn};

use crate::protocol::SheetOp;
use crate::session::CalcSession;

/// Script that changes nothing. Used as the "nothing to revert" marker.
pub const NOOP_SCRIPT: &str = "[]";

/// Result of applying an operation script
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    /// Operations applied successfully
    pub applied: usize,
    /// Operations in the script
    pub total: usize,
    /// First error encountered, if any
    pub error: Option<String>,
}

impl ExecutionResult {
    fn failed(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Generate a summary string
    pub fn summary(&self) -> String {
        match &self.error {
            None if self.total == 0 => "no operations".to_string(),
            None => format!("{} operations applied", self.applied),
            Some(e) => format!("{}/{} operations applied, then: {}", self.applied, self.total, e),
        }
    }
}

/// Whether a script is the no-op marker (blank counts too)
pub fn is_noop(script: &str) -> bool {
    let compact: String = script.chars().filter(|c| !c.is_whitespace()).collect();
    compact.is_empty() || compact == NOOP_SCRIPT
}

/// Parse an operation script, validating every cell reference
pub fn parse_ops(script: &str) -> Result<Vec<SheetOp>> {
    if script.trim().is_empty() {
        return Ok(Vec::new());
    }

    let ops: Vec<SheetOp> = serde_json::from_str(script.trim()).map_err(|e| {
        CalcError::OperationRejected(format!("operations are not a valid JSON array: {}", e))
    })?;

    for (index, op) in ops.iter().enumerate() {
        if let Some(cell) = op.cell() {
            cell.parse::<CellRef>().map_err(|e| {
                CalcError::OperationRejected(format!("operation {} ({}): {}", index + 1, op.name(), e))
            })?;
        }
        if let SheetOp::SetFormula { formula, .. } = op {
            if !formula.starts_with('=') {
                return Err(CalcError::OperationRejected(format!(
                    "operation {} (set_formula): formula must start with '='",
                    index + 1
                )));
            }
        }
    }

    Ok(ops)
}

/// Parse and apply an operation script against the session
///
/// Operations run in order and stop at the first failure; operations applied
/// before it are not rolled back.
pub async fn execute_ops<S: CalcSession + ?Sized>(session: &S, script: &str) -> ExecutionResult {
    let ops = match parse_ops(script) {
        Ok(ops) => ops,
        Err(e) => {
            warn!("Rejected operation script: {}", e);
            return ExecutionResult::failed(e.to_string());
        }
    };

    let mut result = ExecutionResult {
        total: ops.len(),
        ..ExecutionResult::default()
    };

    for op in &ops {
        debug!("Applying {}", op.describe());
        if let Err(e) = session.apply(op).await {
            warn!("Failed to apply {}: {}", op.describe(), e);
            result.error = Some(format!("{} failed: {}", op.describe(), e));
            return result;
        }
        result.applied += 1;
    }

    info!("Applied {} operations", result.applied);
    result
}

/// Instructions for the model on how to express operations
pub fn operation_instructions() -> &'static str {
    r#"## OPERATIONS

Express every change as a JSON array of operations in a single ```json block.
Cells are written as `A1` (active sheet) or `SheetName.A1`.

Permitted operations:

- {"op": "set_text", "cell": "A1", "text": "Hello"}
- {"op": "set_number", "cell": "B2", "value": 42.5}
- {"op": "set_formula", "cell": "C3", "formula": "=SUM(A1:A10)"}
- {"op": "clear", "cell": "D4"}
- {"op": "insert_sheet", "name": "Summary", "position": 0}
- {"op": "remove_sheet", "name": "Old"}
- {"op": "rename_sheet", "from": "Sheet1", "to": "Data"}
- {"op": "activate_sheet", "name": "Data"}

IMPORTANT:
- Operations are applied in order
- `position` is optional; sheets are appended by default
- Formulas must start with `=`
- Use `[]` when nothing needs to change

Example - writing a header and a total:

```json
[
  {"op": "set_text", "cell": "A1", "text": "Total"},
  {"op": "set_formula", "cell": "B1", "formula": "=SUM(B2:B20)"}
]
```
"#
}
