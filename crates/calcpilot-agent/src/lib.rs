//! # calcpilot-agent
//!
//! Model-facing side of calcpilot.
//!
//! This crate provides:
//! - The `ModelBackend` trait with Gemini and Ollama clients
//! - Circuit breaker and rate limit backoff for model requests
//! - Extraction of operation blocks and cell references from text
//! - Verdict parsing for evaluator responses
//!
//! Every model call is stateless: the full context travels in the prompt.

mod auth;
mod backend;
mod circuit_breaker;
mod extract;
mod gemini;
mod ollama;
mod types;
mod verdict;

pub use auth::resolve_api_key;
pub use backend::{build_backend, ModelBackend, RetryPolicy};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use extract::{extract_cell_references, extract_code_block, CODE_FENCE};
pub use gemini::{GeminiClient, GEMINI_BASE_URL};
pub use ollama::{OllamaClient, OLLAMA_BASE_URL};
pub use verdict::{is_successful, Verdict, STATUS_LABEL};
