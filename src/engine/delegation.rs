//! Coordinated generation: structured action requests and subordinate fan-out.
//!
//! A coordinating role's Generate phase asks the model for a tagged JSON
//! action instead of free text. The model either answers directly or names a
//! set of specializations to consult; subordinates run their own full
//! refinement loops concurrently, and the coordinator synthesizes their
//! terminal artifacts into its own artifact within the same iteration.

use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::domain::errors::ProviderError;
use crate::domain::models::engine::{DelegationRecord, DelegationRequest, EngineResult, GenerateAction};
use crate::domain::models::role::Problem;
use crate::domain::ports::provider::{CompletionRequest, TokenUsage};
use crate::engine::convergence::ConvergenceEngine;
use crate::engine::prompts;

/// Fresh completions to request when the model's action reply does not
/// match the expected shape.
const ACTION_ATTEMPTS: u32 = 3;

/// One Generate phase for a coordinating role.
///
/// Appends any subordinate consultations to `delegations` in the order the
/// model requested them, and returns the coordinator's artifact text.
pub(crate) async fn coordinated_generate(
    engine: &ConvergenceEngine,
    problem: &Problem,
    prompt: &str,
    delegations: &mut Vec<DelegationRecord>,
    usage: &mut TokenUsage,
) -> Result<String, ProviderError> {
    let mut last_error = String::new();

    for attempt in 1..=ACTION_ATTEMPTS {
        let completion = engine
            .provider
            .complete_json(CompletionRequest {
                system: prompts::coordinator_instructions(),
                prompt: prompt.to_string(),
                model: engine.role.model.clone(),
                max_tokens: engine.role.max_tokens,
                temperature: f64::from(engine.role.temperature),
            })
            .await?;
        usage.add(completion.usage);

        match serde_json::from_value::<GenerateAction>(completion.value) {
            Ok(GenerateAction::Artifact { text }) => return Ok(text),
            Ok(GenerateAction::Delegate { subordinates }) => {
                let valid: Vec<DelegationRequest> = subordinates
                    .into_iter()
                    .filter(|request| {
                        if request.is_valid() {
                            true
                        } else {
                            warn!(
                                specialization = %request.specialization,
                                "dropping delegation request with blank fields"
                            );
                            false
                        }
                    })
                    .collect();
                if valid.is_empty() {
                    last_error = "delegate action named no usable subordinates".to_string();
                    warn!(attempt, "coordinator delegated to an empty roster");
                    continue;
                }

                let start = delegations.len();
                delegations.extend(run_subordinates(engine, problem, valid).await);
                let round = &delegations[start..];

                // Synthesis is the coordinator's own generation for this
                // iteration, so it runs under the role's instructions.
                let synthesis = engine
                    .complete_text(
                        engine.role.instructions.clone(),
                        prompts::synthesis_prompt(problem, round),
                        f64::from(engine.role.temperature),
                    )
                    .await?;
                usage.add(synthesis.usage);
                return Ok(synthesis.text);
            }
            Err(err) => {
                warn!(attempt, error = %err, "action reply did not match the expected shape");
                last_error = err.to_string();
            }
        }
    }

    Err(ProviderError::MalformedOutput(format!(
        "no usable action after {ACTION_ATTEMPTS} attempts: {last_error}"
    )))
}

/// Run one round of subordinate engines concurrently.
///
/// Results come back in the order the coordinator requested them, regardless
/// of completion order. Each subordinate shares the parent's cancellation
/// flag, so cancelling the job stops the whole tree at the next iteration
/// boundary of every engine.
async fn run_subordinates(
    engine: &ConvergenceEngine,
    problem: &Problem,
    requests: Vec<DelegationRequest>,
) -> Vec<DelegationRecord> {
    let mut set: JoinSet<(usize, DelegationRequest, EngineResult)> = JoinSet::new();

    for (index, request) in requests.into_iter().enumerate() {
        let role = engine.role.subordinate(
            &request.specialization,
            prompts::specialist_instructions(&request.specialization),
        );
        debug!(
            specialization = %request.specialization,
            coordinator = role.coordinator,
            "spawning subordinate"
        );

        let mut subtask = Problem::new(request.subtask.clone());
        subtask.context = request.context.clone().or_else(|| problem.context.clone());

        let child = ConvergenceEngine::child(
            role,
            engine.provider.clone(),
            engine.cancel.clone(),
            engine.events.clone(),
        );
        set.spawn(async move { (index, request, child.run(subtask).await) });
    }

    let mut finished = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(entry) => finished.push(entry),
            Err(err) => error!(error = %err, "subordinate task aborted"),
        }
    }
    finished.sort_by_key(|(index, _, _)| *index);

    finished
        .into_iter()
        .map(|(_, request, result)| DelegationRecord {
            specialization: request.specialization,
            subtask: request.subtask,
            result,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::adapters::mock::{MockProvider, MockReply};
    use crate::domain::models::engine::StopReason;
    use crate::domain::models::role::RoleConfig;

    fn coordinator_role() -> RoleConfig {
        let mut role = RoleConfig::coordinator(
            "coordinator",
            prompts::solver_instructions(),
            "test-model".to_string(),
        );
        role.max_iterations = 1;
        role.subordinate_max_iterations = 1;
        role
    }

    #[tokio::test]
    async fn delegation_round_preserves_request_order() {
        let action = r#"{"action":"delegate","subordinates":[
            {"specialization":"algebra expert","subtask":"expand the polynomial"},
            {"specialization":"geometry expert","subtask":"compute the area"}
        ]}"#;
        let provider = MockProvider::new()
            .with_rule("coordinator", vec![MockReply::text(action)])
            .with_rule("algebra expert", vec![MockReply::text("x^2 + 2x + 1")])
            .with_rule("geometry expert", vec![MockReply::text("area = 12")])
            .with_rule(
                "strict evaluator",
                vec![MockReply::text("Complete and correct.\n<stop>")],
            )
            .with_default("combined answer");

        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = ConvergenceEngine::new(
            coordinator_role(),
            Arc::new(provider),
            Arc::new(AtomicBool::new(false)),
            tx,
        );
        let result = engine.run(Problem::new("solve both parts")).await;

        assert_eq!(result.delegations.len(), 2);
        assert_eq!(result.delegations[0].specialization, "algebra expert");
        assert_eq!(result.delegations[1].specialization, "geometry expert");
        for record in &result.delegations {
            assert!(record.result.stop_reason == StopReason::EvaluatorStop
                || record.result.stop_reason == StopReason::MaxIterations);
        }
        assert!(result.converged);
    }

    #[tokio::test]
    async fn direct_artifact_action_skips_delegation() {
        let provider = MockProvider::new()
            .with_rule(
                "coordinator",
                vec![MockReply::text(r#"{"action":"artifact","text":"42"}"#)],
            )
            .with_rule(
                "strict evaluator",
                vec![MockReply::text("Complete and correct.\n<stop>")],
            )
            .with_default("unused");

        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = ConvergenceEngine::new(
            coordinator_role(),
            Arc::new(provider),
            Arc::new(AtomicBool::new(false)),
            tx,
        );
        let result = engine.run(Problem::new("what is the answer?")).await;

        assert!(result.delegations.is_empty());
        assert_eq!(result.artifact, "42");
    }

    #[tokio::test]
    async fn persistent_shape_failure_errors_the_run() {
        // Valid JSON, wrong shape, every time: the fresh-completion retries
        // exhaust and the engine terminates with an error.
        let provider = MockProvider::new()
            .with_rule(
                "coordinator",
                vec![MockReply::text(r#"{"verdict":"sure"}"#)],
            )
            .with_default("unused");

        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = ConvergenceEngine::new(
            coordinator_role(),
            Arc::new(provider),
            Arc::new(AtomicBool::new(false)),
            tx,
        );
        let result = engine.run(Problem::new("anything")).await;

        assert_eq!(result.stop_reason, StopReason::Error);
        assert!(result
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("Malformed"));
    }

    #[tokio::test]
    async fn blank_subordinate_requests_are_dropped() {
        let action = r#"{"action":"delegate","subordinates":[
            {"specialization":"  ","subtask":"void"},
            {"specialization":"number theory expert","subtask":"factor 91"}
        ]}"#;
        let provider = MockProvider::new()
            .with_rule("coordinator", vec![MockReply::text(action)])
            .with_rule("number theory expert", vec![MockReply::text("7 x 13")])
            .with_rule(
                "strict evaluator",
                vec![MockReply::text("Complete and correct.\n<stop>")],
            )
            .with_default("synthesis");

        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = ConvergenceEngine::new(
            coordinator_role(),
            Arc::new(provider),
            Arc::new(AtomicBool::new(false)),
            tx,
        );
        let result = engine.run(Problem::new("factor it")).await;

        assert_eq!(result.delegations.len(), 1);
        assert_eq!(result.delegations[0].specialization, "number theory expert");
    }
}
