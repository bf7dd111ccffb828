//! Loop Engine - generate, execute, observe, evaluate, retry
//!
//! Each iteration:
//! 1. Snapshots the tracked state
//! 2. Asks the model for operations, with the feedback history in the prompt
//! 3. Applies the operations to the live session
//! 4. Snapshots the state again
//! 5. Asks the model to judge the change
//! 6. Records the attempt, and on failure applies the suggested revert
//!
//! Model calls are stateless; all context travels in the prompts.

use async_trait::async_trait;
use calcpilot_agent::{extract_cell_references, extract_code_block, ModelBackend, Verdict};
use calcpilot_core::{Attempt, CellRef, LoopConfig, LoopResult, SnapshotRequest, StopReason};
use calcpilot_session::{
    check_connection, collect_snapshot, execute_ops, is_noop, release_session, CalcSession,
};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::history::FeedbackHistory;
use crate::prompt::{build_evaluator_prompt, build_generator_prompt, REVERT_LABEL};

/// Asks whether to keep going once the iteration budget is spent
///
/// The answer is awaited, so a caller racing the run against an interrupt
/// can cancel while the question is pending.
#[async_trait]
pub trait ExtensionPrompt: Send {
    /// `true` to add `step` iterations to `current_max`
    async fn confirm_extension(&mut self, current_max: usize, step: usize) -> bool;
}

/// Loop engine over a model backend and a spreadsheet session
pub struct LoopEngine<M: ModelBackend, S: CalcSession> {
    model: M,
    session: S,
    config: LoopConfig,
    extension: Option<Box<dyn ExtensionPrompt>>,
}

impl<M: ModelBackend, S: CalcSession> LoopEngine<M, S> {
    pub fn new(model: M, session: S, config: LoopConfig) -> Self {
        Self {
            model,
            session,
            config,
            extension: None,
        }
    }

    /// Offer budget extensions through `prompt` (interactive runs only)
    pub fn with_extension_prompt(mut self, prompt: Box<dyn ExtensionPrompt>) -> Self {
        self.extension = Some(prompt);
        self
    }

    /// End-of-run hook; the session itself stays up
    pub fn release(&self) {
        release_session(&self.session);
    }

    /// Run the loop for one instruction. The release hook runs on every path.
    pub async fn run(&mut self, instruction: &str) -> LoopResult {
        let result = self.run_iterations(instruction).await;
        self.release();

        info!(
            "Loop finished after {} iterations: {}",
            result.iterations, result.stop_reason
        );
        result
    }

    fn target_cells(&self, instruction: &str) -> Vec<CellRef> {
        let cells = extract_cell_references(instruction);
        if !cells.is_empty() {
            return cells;
        }

        let fallback = self
            .config
            .default_cell
            .parse::<CellRef>()
            .unwrap_or_else(|_| CellRef::active("A1"));
        info!(
            "No cell named in the instruction, tracking {} by default",
            fallback
        );
        vec![fallback]
    }

    /// Add iterations once the budget is spent, if the prompt agrees
    async fn extend_budget(&mut self, iteration: usize, max_iterations: &mut usize) -> bool {
        if iteration < *max_iterations {
            return true;
        }

        warn!("Reached the iteration limit ({})", max_iterations);
        let step = self.config.extension_step;
        match self.extension.as_mut() {
            Some(prompt) if step > 0 => {
                if prompt.confirm_extension(*max_iterations, step).await {
                    *max_iterations += step;
                    info!("Budget extended to {} iterations", max_iterations);
                    true
                } else {
                    info!("Extension declined, stopping");
                    false
                }
            }
            Some(_) => {
                info!("Extensions disabled, stopping");
                false
            }
            None => {
                info!("Not interactive, stopping");
                false
            }
        }
    }

    async fn run_iterations(&mut self, instruction: &str) -> LoopResult {
        if instruction.trim().is_empty() {
            warn!("No instruction given, nothing to do");
            return LoopResult::stopped(StopReason::EmptyInstruction);
        }

        let targets = self.target_cells(instruction);
        let request = SnapshotRequest::for_cells(targets.clone())
            .with_sheet_names(self.config.observe_sheet_names);

        info!("Instruction: {}", instruction.trim());

        if let Err(e) = check_connection(&self.session).await {
            error!("Spreadsheet session unreachable: {}", e);
            return LoopResult::stopped(StopReason::SessionUnreachable(e.to_string()));
        }

        let mut history = FeedbackHistory::new();
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut final_code = None;
        let mut max_iterations = self.config.max_iterations;
        let mut iteration = 0;

        let stop_reason = loop {
            if iteration >= max_iterations {
                break StopReason::BudgetExhausted;
            }
            iteration += 1;
            info!("=== Iteration {} of {} ===", iteration, max_iterations);

            let started_at = Utc::now();
            let pre_snapshot = collect_snapshot(&self.session, &request).await;
            debug!("State before:\n{}", pre_snapshot);

            // Generate
            let prompt = build_generator_prompt(
                instruction,
                &history.render(self.config.history_window_chars),
            );
            debug!("Generator prompt length: {} chars", prompt.len());

            let generated = match self.model.generate(&prompt).await {
                Ok(text) if !text.trim().is_empty() => text,
                Ok(_) => {
                    error!("Generation returned nothing, aborting");
                    break StopReason::GenerationFailed("model returned an empty response".into());
                }
                Err(e) => {
                    error!("Generation failed, aborting: {}", e);
                    break StopReason::GenerationFailed(e.to_string());
                }
            };

            let code = extract_code_block(&generated, None);
            if code.is_empty() {
                warn!("No operation block in the response to iteration {}", iteration);
                history.note_missing_block(iteration);
                if !self.extend_budget(iteration, &mut max_iterations).await {
                    break StopReason::BudgetExhausted;
                }
                continue;
            }
            debug!("Generated operations:\n{}", code);

            // Execute and observe
            let execution = execute_ops(&self.session, &code).await;
            info!("Operations: {}", execution.summary());

            let post_snapshot = collect_snapshot(&self.session, &request).await;
            debug!("State after:\n{}", post_snapshot);

            // Evaluate
            let eval_prompt = build_evaluator_prompt(
                instruction,
                &pre_snapshot,
                &code,
                &post_snapshot,
                execution.error.as_deref(),
                &targets,
            );
            debug!("Evaluator prompt length: {} chars", eval_prompt.len());

            let evaluation = match self.model.generate(&eval_prompt).await {
                Ok(text) if !text.trim().is_empty() => Some(text),
                Ok(_) => {
                    warn!("Evaluation for iteration {} was empty", iteration);
                    None
                }
                Err(e) => {
                    warn!("Evaluation for iteration {} failed: {}", iteration, e);
                    None
                }
            };

            let mut attempt = Attempt {
                iteration,
                code: code.clone(),
                execution_error: execution.error.clone(),
                pre_snapshot,
                post_snapshot,
                evaluation: evaluation.clone(),
                success: false,
                reverted: false,
                started_at,
            };

            let Some(evaluation) = evaluation else {
                history.note_missing_evaluation(iteration);
                attempts.push(attempt);
                if !self.extend_budget(iteration, &mut max_iterations).await {
                    break StopReason::BudgetExhausted;
                }
                continue;
            };
            debug!("Evaluation:\n{}", evaluation);

            // Decide
            let verdict = Verdict::classify(&evaluation);
            history.record_attempt(
                iteration,
                &attempt.pre_snapshot.render(),
                &code,
                &attempt.post_snapshot.render(),
                execution.error.as_deref(),
                &evaluation,
            );

            if verdict.is_success() {
                info!("Iteration {} succeeded", iteration);
                attempt.success = true;
                attempts.push(attempt);
                final_code = Some(code);
                break StopReason::Succeeded;
            }

            info!("Iteration {} failed", iteration);
            let revert = extract_code_block(&evaluation, Some(REVERT_LABEL));
            if is_noop(&revert) {
                debug!("No revert needed");
            } else {
                info!("Reverting iteration {}", iteration);
                let reverted = execute_ops(&self.session, &revert).await;
                if let Some(e) = reverted.error {
                    error!("Revert failed, session state may be inconsistent: {}", e);
                    attempts.push(attempt);
                    break StopReason::RevertFailed(e);
                }
                attempt.reverted = true;
            }
            attempts.push(attempt);

            if !self.extend_budget(iteration, &mut max_iterations).await {
                break StopReason::BudgetExhausted;
            }
        };

        LoopResult {
            iterations: iteration,
            success: stop_reason == StopReason::Succeeded,
            final_code,
            attempts,
            stop_reason,
        }
    }
}
