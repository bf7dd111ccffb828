//! Verdict parsing for evaluator responses
//!
//! The evaluator is asked to answer with a status line:
//!
//! ```text
//! - Status: SUCCESS
//! - Status: [FAILURE]
//! ```
//!
//! Only the first status line that carries a verdict counts.

use serde::{Deserialize, Serialize};

/// Label that starts a status line
pub const STATUS_LABEL: &str = "- Status:";

/// Evaluator verdict on one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Success,
    Failure,
}

impl Verdict {
    /// Classify an evaluation; no recognizable status line means failure
    pub fn classify(evaluation: &str) -> Self {
        evaluation
            .lines()
            .find_map(parse_status_line)
            .unwrap_or(Verdict::Failure)
    }

    pub fn is_success(self) -> bool {
        self == Verdict::Success
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Success => write!(f, "SUCCESS"),
            Verdict::Failure => write!(f, "FAILURE"),
        }
    }
}

fn parse_status_line(line: &str) -> Option<Verdict> {
    let rest = line.trim().strip_prefix(STATUS_LABEL)?.trim_start();
    let rest = rest.strip_prefix('[').unwrap_or(rest);

    if rest.starts_with("SUCCESS") {
        Some(Verdict::Success)
    } else if rest.starts_with("FAILURE") {
        Some(Verdict::Failure)
    } else {
        None
    }
}

/// Whether the evaluation reports success
pub fn is_successful(evaluation: &str) -> bool {
    Verdict::classify(evaluation).is_success()
}
