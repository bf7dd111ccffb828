//! # calcpilot-core
//!
//! Core types for calcpilot, a generate/execute/evaluate loop that drives a
//! live spreadsheet session with a language model.
//!
//! ## Core Paradigm
//!
//! - An instruction is fixed for the whole run
//! - Every attempt is judged against before/after snapshots of the session
//! - Failures feed back into the next attempt as plain text
//! - Nothing outlives the process except the spreadsheet itself

pub mod config;
mod error;
mod types;

pub use config::{
    CalcPilotConfig, GenerationSettings, LoopDefaults, ModelSettings, Provider, SessionSettings,
};
pub use error::{CalcError, Result};
pub use types::*;
