//! # calcpilot-session
//!
//! Live spreadsheet session layer for calcpilot.
//!
//! This crate provides:
//! - The `CalcSession` capability trait (allows in-memory sessions in tests)
//! - A JSONL-over-TCP client for the spreadsheet bridge
//! - Best-effort state snapshots
//! - The enumerated operation executor that replaces free-form code execution

mod bridge;
mod lifecycle;
mod memory;
mod ops;
pub mod protocol;
mod session;
mod snapshot;

pub use bridge::BridgeSession;
pub use lifecycle::{check_connection, manual_start_hint, release_session};
pub use memory::{FailurePoint, MemorySession};
pub use ops::{execute_ops, is_noop, operation_instructions, parse_ops, ExecutionResult, NOOP_SCRIPT};
pub use protocol::{CellContent, DocumentInfo, SessionInfo, SheetOp, PROTOCOL_VERSION};
pub use session::CalcSession;
pub use snapshot::collect_snapshot;
