//! Feedback history carried between iterations
//!
//! The stored text only grows. Prompts embed a bounded tail of it.

use std::borrow::Cow;

/// Initial history text before any attempt
pub const EMPTY_HISTORY: &str = "None";

/// Append-only log of previous attempts and failures
#[derive(Debug, Clone)]
pub struct FeedbackHistory {
    text: String,
}

impl Default for FeedbackHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedbackHistory {
    pub fn new() -> Self {
        Self {
            text: EMPTY_HISTORY.to_string(),
        }
    }

    fn push(&mut self, entry: &str) {
        self.text.push('\n');
        self.text.push_str(entry);
        self.text.push('\n');
    }

    /// The generator answered without an operation block
    pub fn note_missing_block(&mut self, iteration: usize) {
        self.push(&format!(
            "Attempt {}: no ```json operation block was produced.",
            iteration
        ));
    }

    /// The evaluator returned nothing for this attempt
    pub fn note_missing_evaluation(&mut self, iteration: usize) {
        self.push(&format!(
            "Attempt {}: the evaluation could not be obtained.",
            iteration
        ));
    }

    /// Full record of an evaluated attempt
    pub fn record_attempt(
        &mut self,
        iteration: usize,
        pre_state: &str,
        operations: &str,
        post_state: &str,
        execution_error: Option<&str>,
        evaluation: &str,
    ) {
        let mut entry = format!(
            "# Attempt {}:\nState before:\n{}\nOperations:\n{}\nState after:\n{}\n",
            iteration, pre_state, operations, post_state
        );
        if let Some(error) = execution_error {
            entry.push_str(&format!("Execution error: {}\n", error));
        }
        entry.push_str(&format!("Evaluation:\n{}", evaluation));
        self.push(&entry);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in characters
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text == EMPTY_HISTORY
    }

    /// Last `window` characters, with a marker for what was left out.
    /// A window of 0 means no bound.
    pub fn render(&self, window: usize) -> Cow<'_, str> {
        if window == 0 {
            return Cow::Borrowed(&self.text);
        }

        match self.text.char_indices().rev().nth(window - 1) {
            Some((start, _)) if start > 0 => {
                let omitted = self.text[..start].chars().count();
                Cow::Owned(format!(
                    "[... {} earlier characters omitted ...]\n{}",
                    omitted,
                    &self.text[start..]
                ))
            }
            _ => Cow::Borrowed(&self.text),
        }
    }
}
