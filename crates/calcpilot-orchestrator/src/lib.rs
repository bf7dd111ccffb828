//! # calcpilot-orchestrator
//!
//! The self-correcting loop: generate operations from an instruction, apply
//! them to the live spreadsheet, observe the result, ask the model to judge
//! it, and retry with accumulated feedback.

mod history;
mod loop_engine;
mod prompt;

pub use history::{FeedbackHistory, EMPTY_HISTORY};
pub use loop_engine::{ExtensionPrompt, LoopEngine};
pub use prompt::{build_evaluator_prompt, build_generator_prompt, REVERT_LABEL};
