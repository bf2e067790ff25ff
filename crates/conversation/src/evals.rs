//! Post-dialog evaluation
//!
//! Behavioral questions run two-step (relevancy then verdict), tool-call
//! questions run single-step with the observed calls as context, and three
//! focused bundles cover quality, sentiment, and safety. The scenario
//! passes iff every relevant eval passed.

use voiceci_core::{ConversationScenario, EvalResult, ObservedToolCall, Turn};
use voiceci_llm::{Judge, LlmError};

pub struct JudgedOutcome {
    pub eval_results: Vec<EvalResult>,
    pub tool_call_eval_results: Option<Vec<EvalResult>>,
    pub passed: bool,
}

pub async fn judge_scenario(
    judge: &Judge,
    scenario: &ConversationScenario,
    transcript: &[Turn],
    observed_calls: &[ObservedToolCall],
) -> Result<JudgedOutcome, LlmError> {
    let mut eval_results = Vec::new();

    for question in &scenario.behavioral_evals {
        eval_results.push(judge.evaluate_behavioral(question, transcript).await?);
    }

    let tool_call_eval_results = if scenario.tool_call_evals.is_empty() {
        None
    } else {
        let mut results = Vec::new();
        for question in &scenario.tool_call_evals {
            results.push(
                judge
                    .evaluate_tool_call(question, transcript, observed_calls)
                    .await?,
            );
        }
        Some(results)
    };

    // Focused bundles run regardless of client-supplied questions.
    let focused = judge.focused_evals(transcript).await?;
    eval_results.extend(focused);

    let passed = eval_results.iter().all(|e| !e.failed())
        && tool_call_eval_results
            .as_ref()
            .map(|results| results.iter().all(|e| !e.failed()))
            .unwrap_or(true);

    Ok(JudgedOutcome {
        eval_results,
        tool_call_eval_results,
        passed,
    })
}
