//! Spreadsheet bridge protocol, v1 wire format
//!
//! The wire format is JSONL (newline-delimited JSON) over TCP localhost.
//! Every request carries a numeric `id` that the bridge echoes in its reply.
//!
//! ```text
//! -> {"id":1,"type":"read_cell","sheet":"Sheet1","cell":"A1"}
//! <- {"id":1,"type":"cell","text":"Hello","value":null,"formula":"Hello"}
//! ```

use serde::{Deserialize, Serialize};

/// Current protocol version. Increment for breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Client name sent in the hello handshake
pub const CLIENT_NAME: &str = "calcpilot";

// =============================================================================
// Operations
// =============================================================================

/// A single permitted operation against the live spreadsheet.
///
/// Cells are written as `A1` (active sheet) or `Sheet1.A1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SheetOp {
    SetText {
        cell: String,
        text: String,
    },
    SetNumber {
        cell: String,
        value: f64,
    },
    SetFormula {
        cell: String,
        formula: String,
    },
    Clear {
        cell: String,
    },
    InsertSheet {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    RemoveSheet {
        name: String,
    },
    RenameSheet {
        from: String,
        to: String,
    },
    ActivateSheet {
        name: String,
    },
}

impl SheetOp {
    /// Operation name as written on the wire
    pub fn name(&self) -> &'static str {
        match self {
            SheetOp::SetText { .. } => "set_text",
            SheetOp::SetNumber { .. } => "set_number",
            SheetOp::SetFormula { .. } => "set_formula",
            SheetOp::Clear { .. } => "clear",
            SheetOp::InsertSheet { .. } => "insert_sheet",
            SheetOp::RemoveSheet { .. } => "remove_sheet",
            SheetOp::RenameSheet { .. } => "rename_sheet",
            SheetOp::ActivateSheet { .. } => "activate_sheet",
        }
    }

    /// Cell targeted by the operation, if any
    pub fn cell(&self) -> Option<&str> {
        match self {
            SheetOp::SetText { cell, .. }
            | SheetOp::SetNumber { cell, .. }
            | SheetOp::SetFormula { cell, .. }
            | SheetOp::Clear { cell } => Some(cell),
            _ => None,
        }
    }

    /// Short human-readable form for logs and error messages
    pub fn describe(&self) -> String {
        match self {
            SheetOp::InsertSheet { name, .. }
            | SheetOp::RemoveSheet { name }
            | SheetOp::ActivateSheet { name } => format!("{} {}", self.name(), name),
            SheetOp::RenameSheet { from, to } => format!("{} {} -> {}", self.name(), from, to),
            _ => format!("{} {}", self.name(), self.cell().unwrap_or_default()),
        }
    }
}

// =============================================================================
// Client -> Bridge
// =============================================================================

/// Request envelope: `id` plus the tagged request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub request: BridgeRequest,
}

/// Requests sent from calcpilot to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeRequest {
    Hello {
        client: String,
        protocol_version: u32,
    },
    Ping,
    CurrentDocument,
    ActiveSheet,
    SheetNames,
    SheetCount,
    OpenDocuments,
    ReadCell {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sheet: Option<String>,
        cell: String,
    },
    Apply {
        op: SheetOp,
    },
}

// =============================================================================
// Bridge -> Client
// =============================================================================

/// Reply envelope: echoed `id` plus the tagged reply body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub reply: BridgeReply,
}

/// Replies sent from the bridge to calcpilot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeReply {
    Welcome(SessionInfo),
    Pong,
    Document(DocumentInfo),
    ActiveSheet { name: String },
    SheetNames { names: Vec<String> },
    SheetCount { count: usize },
    Documents { documents: Vec<DocumentInfo> },
    Cell(CellContent),
    Applied,
    Error { code: String, message: String },
}

/// Handshake result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Spreadsheet application behind the bridge
    pub application: String,
    pub protocol_version: u32,
}

/// An open document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub title: String,
    /// Whether the document exposes sheets
    pub is_spreadsheet: bool,
}

/// The three views of a cell the bridge can report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellContent {
    /// Displayed string; empty for blank and unevaluated cells
    #[serde(default)]
    pub text: String,
    /// Numeric value, when the cell has one
    #[serde(default)]
    pub value: Option<f64>,
    /// Formula text (or the literal input for non-formula cells)
    #[serde(default)]
    pub formula: String,
}

impl CellContent {
    /// Best human-readable value: string first, then number, then formula
    ///
    /// A blank cell carries no value (the bridge does not report the `0`
    /// that a numeric read of an empty cell would give), so it renders as an
    /// empty string and stays distinct from a cell holding `0`.
    pub fn display_value(&self) -> String {
        if !self.text.is_empty() {
            return self.text.clone();
        }
        match self.value {
            Some(value) => value.to_string(),
            None => self.formula.clone(),
        }
    }
}
