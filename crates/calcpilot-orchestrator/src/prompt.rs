//! Prompt builders for the generator and the evaluator
//!
//! Both prompts are self-contained: the model sees no conversation history
//! besides what is embedded here.

use calcpilot_agent::STATUS_LABEL;
use calcpilot_core::{CellRef, Snapshot};
use calcpilot_session::operation_instructions;

/// Label in front of the evaluator's revert block
pub const REVERT_LABEL: &str = "- Revert ops:";

/// Build the operation generation prompt
pub fn build_generator_prompt(instruction: &str, feedback_history: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You translate a user's instruction into operations on the spreadsheet \
         that is currently open in a running spreadsheet application.\n\n",
    );

    prompt.push_str("## STRICT RULES\n\n");
    prompt.push_str("- NEVER create or open another document.\n");
    prompt.push_str("- Work on the document that is already open.\n");
    prompt.push_str("- Cells without a sheet name refer to the active sheet.\n");
    prompt.push_str("- Change nothing the instruction does not ask for.\n\n");

    prompt.push_str(operation_instructions());
    prompt.push('\n');

    prompt.push_str("## INSTRUCTION\n\n");
    prompt.push_str(instruction.trim());
    prompt.push_str("\n\n");

    prompt.push_str("## PREVIOUS ATTEMPTS AND EVALUATIONS\n\n");
    prompt.push_str(feedback_history);
    prompt.push_str("\n\n");

    prompt.push_str("## OPERATIONS TO APPLY\n\n");
    prompt
}

/// Build the evaluation prompt for one attempt
pub fn build_evaluator_prompt(
    instruction: &str,
    pre_state: &Snapshot,
    operations: &str,
    post_state: &Snapshot,
    execution_error: Option<&str>,
    target_cells: &[CellRef],
) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are a very strict reviewer of spreadsheet changes. Compare the \
         instruction, the state before, the operations applied and the state \
         after, and decide whether the instruction was carried out.\n\n",
    );
    prompt.push_str(
        "Above all, look for side effects the instruction did not ask for: \
         extra documents or sheets, or cells that changed unexpectedly.\n\n",
    );

    prompt.push_str("Answer concisely in exactly this format:\n");
    prompt.push_str(&format!("{} [SUCCESS or FAILURE]\n", STATUS_LABEL));
    prompt.push_str(
        "- Reason: [why it succeeded or failed, citing the state change and any side effects]\n",
    );
    prompt.push_str("- Suggestion: [on failure, how the operations should change]\n");
    prompt.push_str(&format!(
        "{} [on failure, the operations that restore the state before, as a JSON \
         array in a ```json block. If nothing needs restoring, a ```json block \
         containing only []]\n\n",
        REVERT_LABEL
    ));

    prompt.push_str("# Instruction\n");
    prompt.push_str(instruction.trim());
    prompt.push_str("\n\n");

    if !target_cells.is_empty() {
        let cells: Vec<String> = target_cells.iter().map(|c| c.to_string()).collect();
        prompt.push_str("# Target cells\n");
        prompt.push_str(&cells.join(", "));
        prompt.push_str("\n\n");
    }

    prompt.push_str("# State before\n");
    prompt.push_str(&pre_state.render());
    prompt.push_str("\n\n");

    prompt.push_str("# Operations applied\n```json\n");
    prompt.push_str(operations);
    prompt.push_str("\n```\n\n");

    prompt.push_str("# State after\n");
    prompt.push_str(&post_state.render());
    if let Some(error) = execution_error {
        prompt.push_str(&format!("\nExecution error: {}", error));
    }
    prompt.push_str("\n\n");

    prompt.push_str("# Your evaluation\n");
    prompt
}
