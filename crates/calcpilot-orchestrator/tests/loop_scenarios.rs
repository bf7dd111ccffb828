//! End-to-end loop scenarios against an in-memory session and a scripted model

use async_trait::async_trait;
use calcpilot_agent::ModelBackend;
use calcpilot_core::{CalcError, LoopConfig, Result, Snapshot, StopReason};
use calcpilot_orchestrator::{ExtensionPrompt, LoopEngine};
use calcpilot_session::{FailurePoint, MemorySession};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SET_HELLO: &str = r#"[{"op": "set_text", "cell": "A1", "text": "Hello"}]"#;

/// Model that replays canned responses and records every prompt
#[derive(Clone, Default)]
struct ScriptedModel {
    responses: Arc<Mutex<VecDeque<Result<String>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedModel {
    fn new(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            prompts: Arc::default(),
        }
    }

    fn replying(responses: &[&str]) -> Self {
        Self::new(responses.iter().map(|r| Ok(r.to_string())).collect())
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ModelBackend for ScriptedModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CalcError::Api("script exhausted".to_string())))
    }

    fn name(&self) -> String {
        "scripted/test".to_string()
    }
}

/// Extension prompt answering from a fixed list
struct ScriptedPrompt {
    answers: VecDeque<bool>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ExtensionPrompt for ScriptedPrompt {
    async fn confirm_extension(&mut self, _current_max: usize, _step: usize) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers.pop_front().unwrap_or(false)
    }
}

fn ops_block(ops: &str) -> String {
    format!("Here are the operations:\n```json\n{}\n```\n", ops)
}

fn success_evaluation() -> String {
    "- Status: SUCCESS\n- Reason: A1 now holds Hello\n- Suggestion: none\n- Revert ops:\n```json\n[]\n```"
        .to_string()
}

fn failure_evaluation(revert: &str) -> String {
    format!(
        "- Status: FAILURE\n- Reason: wrong text\n- Suggestion: spell it right\n- Revert ops:\n```json\n{}\n```",
        revert
    )
}

fn config(max_iterations: usize) -> LoopConfig {
    LoopConfig {
        max_iterations,
        ..LoopConfig::default()
    }
}

#[tokio::test]
async fn single_attempt_success() {
    let session = Arc::new(MemorySession::new());
    let model = ScriptedModel::replying(&[&ops_block(SET_HELLO), &success_evaluation()]);

    let mut engine = LoopEngine::new(model.clone(), session.clone(), config(3));
    let result = engine.run("Put 'Hello' in A1").await;

    assert!(result.success);
    assert_eq!(result.stop_reason, StopReason::Succeeded);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.final_code.as_deref(), Some(SET_HELLO));
    assert_eq!(model.calls(), 2);
    assert_eq!(session.applied_ops().len(), 1);
    assert_eq!(session.cell_value("A1"), Some("Hello".to_string()));

    assert_eq!(result.attempts.len(), 1);
    let attempt = &result.attempts[0];
    assert!(attempt.success);
    assert!(!attempt.reverted);
    assert!(attempt.execution_error.is_none());
    assert_eq!(
        attempt.pre_snapshot.get("cell_value_A1"),
        Some("Cell A1 value: ")
    );
    assert_eq!(
        attempt.post_snapshot.get("cell_value_A1"),
        Some("Cell A1 value: Hello")
    );

    // The evaluator sees both states and the applied operations
    let evaluator_prompt = model.prompt(1);
    assert!(evaluator_prompt.contains("# State before\ncell_value_A1: Cell A1 value: \n"));
    assert!(evaluator_prompt.contains("# State after\ncell_value_A1: Cell A1 value: Hello"));
    assert!(evaluator_prompt.contains(SET_HELLO));
}

#[tokio::test]
async fn three_failures_without_prompt_stop_at_budget() {
    let session = Arc::new(MemorySession::new());
    let wrong = r#"[{"op": "set_text", "cell": "A1", "text": "Helo"}]"#;
    let revert = r#"[{"op": "clear", "cell": "A1"}]"#;
    let generation = ops_block(wrong);
    let evaluation = failure_evaluation(revert);
    let model = ScriptedModel::replying(&[
        &generation,
        &evaluation,
        &generation,
        &evaluation,
        &generation,
        &evaluation,
    ]);

    let mut engine = LoopEngine::new(model.clone(), session.clone(), config(3));
    let result = engine.run("Put 'Hello' in A1").await;

    assert!(!result.success);
    assert_eq!(result.stop_reason, StopReason::BudgetExhausted);
    assert_eq!(result.iterations, 3);
    assert_eq!(result.attempts.len(), 3);
    assert!(result.final_code.is_none());
    assert!(result.attempts.iter().all(|a| a.reverted && !a.success));
    assert_eq!(model.calls(), 6);
    assert_eq!(session.applied_ops().len(), 6);
    assert_eq!(session.cell_value("A1"), None);

    // Feedback accumulates across attempts
    let third_generation = model.prompt(4);
    assert!(third_generation.contains("# Attempt 1:"));
    assert!(third_generation.contains("# Attempt 2:"));
    assert!(!third_generation.contains("# Attempt 3:"));
}

#[tokio::test]
async fn declined_extension_is_asked_once() {
    let session = Arc::new(MemorySession::new());
    let generation = ops_block(SET_HELLO);
    let evaluation = failure_evaluation("[]");
    let model = ScriptedModel::replying(&[&generation, &evaluation, &generation, &evaluation]);

    let calls = Arc::new(AtomicUsize::new(0));
    let prompt = ScriptedPrompt {
        answers: VecDeque::from(vec![false]),
        calls: calls.clone(),
    };

    let mut engine = LoopEngine::new(model.clone(), session.clone(), config(2))
        .with_extension_prompt(Box::new(prompt));
    let result = engine.run("Put 'Hello' in A1").await;

    assert_eq!(result.stop_reason, StopReason::BudgetExhausted);
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // Nothing to revert
    assert!(result.attempts.iter().all(|a| !a.reverted));
}

#[tokio::test]
async fn accepted_extension_adds_iterations() {
    let session = Arc::new(MemorySession::new());
    let generation = ops_block(SET_HELLO);
    let failure = failure_evaluation("[]");
    let success = success_evaluation();
    let model = ScriptedModel::replying(&[&generation, &failure, &generation, &success]);

    let calls = Arc::new(AtomicUsize::new(0));
    let prompt = ScriptedPrompt {
        answers: VecDeque::from(vec![true]),
        calls: calls.clone(),
    };

    let config = LoopConfig {
        max_iterations: 1,
        extension_step: 3,
        ..LoopConfig::default()
    };
    let mut engine =
        LoopEngine::new(model.clone(), session, config).with_extension_prompt(Box::new(prompt));
    let result = engine.run("Put 'Hello' in A1").await;

    assert!(result.success);
    assert_eq!(result.iterations, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_instruction_does_nothing() {
    let session = Arc::new(MemorySession::new());
    let model = ScriptedModel::default();

    let mut engine = LoopEngine::new(model.clone(), session.clone(), config(3));
    let result = engine.run("   \n").await;

    assert_eq!(result.stop_reason, StopReason::EmptyInstruction);
    assert_eq!(result.iterations, 0);
    assert_eq!(model.calls(), 0);
    assert!(session.applied_ops().is_empty());
}

#[tokio::test]
async fn unreachable_session_stops_before_first_attempt() {
    let session = Arc::new(MemorySession::new().failing(FailurePoint::Ping, "connection refused"));
    let model = ScriptedModel::default();

    let mut engine = LoopEngine::new(model.clone(), session, config(3));
    let result = engine.run("Put 'Hello' in A1").await;

    assert!(matches!(
        result.stop_reason,
        StopReason::SessionUnreachable(ref e) if e.contains("connection refused")
    ));
    assert!(result.attempts.is_empty());
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn empty_generation_is_fatal() {
    let session = Arc::new(MemorySession::new());
    let model = ScriptedModel::replying(&["   "]);

    let mut engine = LoopEngine::new(model.clone(), session.clone(), config(3));
    let result = engine.run("Put 'Hello' in A1").await;

    assert!(matches!(result.stop_reason, StopReason::GenerationFailed(_)));
    assert_eq!(result.iterations, 1);
    assert!(result.attempts.is_empty());
    assert_eq!(model.calls(), 1);
    assert!(session.applied_ops().is_empty());
}

#[tokio::test]
async fn model_error_is_fatal() {
    let session = Arc::new(MemorySession::new());
    let model = ScriptedModel::new(vec![Err(CalcError::Auth(
        "No API key found".to_string(),
    ))]);

    let mut engine = LoopEngine::new(model.clone(), session, config(3));
    let result = engine.run("Put 'Hello' in A1").await;

    assert!(matches!(
        result.stop_reason,
        StopReason::GenerationFailed(ref e) if e.contains("No API key found")
    ));
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn missing_block_is_noted_and_retried() {
    let session = Arc::new(MemorySession::new());
    let model = ScriptedModel::replying(&[
        "I would put Hello in A1.",
        &ops_block(SET_HELLO),
        &success_evaluation(),
    ]);

    let mut engine = LoopEngine::new(model.clone(), session, config(3));
    let result = engine.run("Put 'Hello' in A1").await;

    assert!(result.success);
    assert_eq!(result.iterations, 2);
    assert_eq!(result.attempts.len(), 1);
    assert_eq!(result.attempts[0].iteration, 2);
    assert!(model
        .prompt(1)
        .contains("Attempt 1: no ```json operation block was produced."));
}

#[tokio::test]
async fn missing_evaluation_is_soft() {
    let session = Arc::new(MemorySession::new());
    let generation = ops_block(SET_HELLO);
    let model = ScriptedModel::new(vec![
        Ok(generation.clone()),
        Err(CalcError::Api("evaluator timed out".to_string())),
        Ok(generation),
        Ok(success_evaluation()),
    ]);

    let mut engine = LoopEngine::new(model.clone(), session, config(3));
    let result = engine.run("Put 'Hello' in A1").await;

    assert!(result.success);
    assert_eq!(result.attempts.len(), 2);
    assert!(result.attempts[0].evaluation.is_none());
    assert!(!result.attempts[0].success);
    assert!(model
        .prompt(2)
        .contains("Attempt 1: the evaluation could not be obtained."));
}

#[tokio::test]
async fn execution_error_reaches_the_evaluator() {
    let session = Arc::new(MemorySession::new());
    let bad = r#"[{"op": "set_text", "cell": "Missing.A1", "text": "Hello"}]"#;
    let model = ScriptedModel::replying(&[&ops_block(bad), &failure_evaluation("[]")]);

    let mut engine = LoopEngine::new(model.clone(), session, config(1));
    let result = engine.run("Put 'Hello' in A1").await;

    assert_eq!(result.stop_reason, StopReason::BudgetExhausted);
    let attempt = &result.attempts[0];
    assert!(attempt
        .execution_error
        .as_deref()
        .is_some_and(|e| e.contains("no sheet named Missing")));
    assert!(!attempt.reverted);
    assert!(model.prompt(1).contains("Execution error: set_text Missing.A1 failed"));
}

#[tokio::test]
async fn revert_failure_is_fatal() {
    let session = Arc::new(MemorySession::new());
    let bad_revert = r#"[{"op": "remove_sheet", "name": "Nope"}]"#;
    let model = ScriptedModel::replying(&[&ops_block(SET_HELLO), &failure_evaluation(bad_revert)]);

    let mut engine = LoopEngine::new(model.clone(), session, config(3));
    let result = engine.run("Put 'Hello' in A1").await;

    assert!(matches!(result.stop_reason, StopReason::RevertFailed(_)));
    assert_eq!(result.iterations, 1);
    assert_eq!(result.attempts.len(), 1);
    assert!(!result.attempts[0].reverted);
    assert_eq!(model.calls(), 2);
}

fn cell_keys(snapshot: &Snapshot) -> Vec<&str> {
    snapshot
        .entries()
        .iter()
        .map(|e| e.key.as_str())
        .filter(|key| key.starts_with("cell_value_"))
        .collect()
}

#[tokio::test]
async fn default_cell_is_tracked_when_none_named() {
    let session = Arc::new(MemorySession::new().with_text("A1", "old"));
    let model = ScriptedModel::replying(&[&ops_block(SET_HELLO), &success_evaluation()]);

    let mut engine = LoopEngine::new(model, session, config(3));
    let result = engine.run("Write a greeting").await;

    let pre: &Snapshot = &result.attempts[0].pre_snapshot;
    assert_eq!(cell_keys(pre), vec!["cell_value_A1"]);
    assert_eq!(pre.get("cell_value_A1"), Some("Cell A1 value: old"));
    assert_eq!(pre.get("sheet_count"), Some("Sheet count: 1"));
    assert_eq!(pre.get("document_count"), Some("Open spreadsheet documents: 1"));
    assert_eq!(cell_keys(&result.attempts[0].post_snapshot), vec!["cell_value_A1"]);
}

#[tokio::test]
async fn configured_default_cell_replaces_a1() {
    let session = Arc::new(
        MemorySession::new()
            .with_sheet("Data")
            .with_number("Data.B2", 5.0)
            .with_text("A1", "untracked"),
    );
    let model = ScriptedModel::replying(&[&ops_block(SET_HELLO), &success_evaluation()]);

    let config = LoopConfig {
        default_cell: "Data.B2".to_string(),
        ..LoopConfig::default()
    };
    let mut engine = LoopEngine::new(model.clone(), session, config);
    let result = engine.run("Double the total").await;

    let pre = &result.attempts[0].pre_snapshot;
    assert_eq!(cell_keys(pre), vec!["cell_value_Data.B2"]);
    assert_eq!(pre.get("cell_value_Data.B2"), Some("Cell Data.B2 value: 5"));
    assert!(model.prompt(1).contains("# Target cells\nData.B2\n"));
}

#[tokio::test]
async fn zero_extension_step_never_asks() {
    let session = Arc::new(MemorySession::new());
    let model = ScriptedModel::replying(&[&ops_block(SET_HELLO), &failure_evaluation("[]")]);

    let calls = Arc::new(AtomicUsize::new(0));
    let prompt = ScriptedPrompt {
        answers: VecDeque::from(vec![true]),
        calls: calls.clone(),
    };
    let config = LoopConfig {
        max_iterations: 1,
        extension_step: 0,
        ..LoopConfig::default()
    };
    let mut engine = LoopEngine::new(model, session, config).with_extension_prompt(Box::new(prompt));
    let result = engine.run("Put 'Hello' in A1").await;

    assert_eq!(result.stop_reason, StopReason::BudgetExhausted);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Extension prompt whose answer never comes
struct UnansweredPrompt {
    asked: Arc<AtomicUsize>,
}

#[async_trait]
impl ExtensionPrompt for UnansweredPrompt {
    async fn confirm_extension(&mut self, _current_max: usize, _step: usize) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<bool>().await
    }
}

#[tokio::test]
async fn open_extension_prompt_yields_to_interrupt() {
    let session = Arc::new(MemorySession::new());
    let model = ScriptedModel::replying(&[&ops_block(SET_HELLO), &failure_evaluation("[]")]);

    let asked = Arc::new(AtomicUsize::new(0));
    let prompt = UnansweredPrompt {
        asked: asked.clone(),
    };
    let mut engine = LoopEngine::new(model.clone(), session.clone(), config(1))
        .with_extension_prompt(Box::new(prompt));

    let outcome = tokio::select! {
        result = engine.run("Put 'Hello' in A1") => Some(result),
        _ = tokio::time::sleep(Duration::from_millis(200)) => None,
    };

    assert!(outcome.is_none());
    assert_eq!(asked.load(Ordering::SeqCst), 1);
    assert_eq!(model.calls(), 2);
    engine.release();
    assert_eq!(session.cell_value("A1"), Some("Hello".to_string()));
}
