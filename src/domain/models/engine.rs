//! Engine results, stop reasons, and the structured Generate action.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::iteration::EvolutionHistory;
use crate::domain::ports::provider::TokenUsage;

/// Why a convergence engine run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The evaluator issued a genuine stop signal.
    EvaluatorStop,
    /// The iteration cap was reached without a stop signal. This is a
    /// normal terminal state, not an error.
    MaxIterations,
    /// Cooperative cancellation was observed at an iteration boundary.
    Cancelled,
    /// A provider error survived all retries.
    Error,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EvaluatorStop => "evaluator_stop",
            Self::MaxIterations => "max_iterations",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

/// Structured action returned by a coordinating role's Generate phase.
///
/// The orchestrator pattern-matches on this variant rather than inspecting
/// free text. The model chooses the fan-out per call; it is not fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GenerateAction {
    /// Answer directly with an artifact.
    Artifact { text: String },
    /// Consult a dynamically-sized set of subordinate roles first.
    Delegate { subordinates: Vec<DelegationRequest> },
}

/// One requested subordinate consultation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DelegationRequest {
    /// The area of specialization needed (e.g. "number theory expert").
    pub specialization: String,

    /// The specific subtask for the subordinate to refine.
    pub subtask: String,

    /// Relevant context the subordinate needs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl DelegationRequest {
    /// A request is usable only when both specialization and subtask carry
    /// actual content.
    pub fn is_valid(&self) -> bool {
        !self.specialization.trim().is_empty() && !self.subtask.trim().is_empty()
    }
}

/// Record of one subordinate consultation, held by the parent by reference.
/// The parent never mutates the child's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DelegationRecord {
    /// Subordinate role name (the requested specialization).
    pub specialization: String,

    /// The subproblem text handed to the subordinate.
    pub subtask: String,

    /// The subordinate's terminal engine result.
    pub result: EngineResult,
}

/// Terminal output of one convergence engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineResult {
    /// Identifier of the engine node in the delegation tree.
    pub node_id: Uuid,

    /// Role name this engine ran as.
    pub role: String,

    /// Final artifact text (last generated artifact).
    pub artifact: String,

    /// Whether the run genuinely converged. Always equal to
    /// `stop_reason == EvaluatorStop`; set only by [`EngineResult::new`].
    pub converged: bool,

    /// Why the run terminated.
    pub stop_reason: StopReason,

    /// Total completed iterations.
    pub iterations: u32,

    /// Token usage across all phases, subordinates excluded (each
    /// subordinate tallies its own usage in its result).
    pub usage: TokenUsage,

    /// Append-only history of all iterations.
    pub history: EvolutionHistory,

    /// Subordinate consultations made by this role, in completion order.
    pub delegations: Vec<DelegationRecord>,

    /// Underlying error text when `stop_reason == Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EngineResult {
    /// Build a terminal result. `converged` is derived from `stop_reason`,
    /// which keeps the central invariant true by construction.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: Uuid,
        role: String,
        artifact: String,
        stop_reason: StopReason,
        usage: TokenUsage,
        history: EvolutionHistory,
        delegations: Vec<DelegationRecord>,
        error: Option<String>,
    ) -> Self {
        Self {
            node_id,
            role,
            artifact,
            converged: stop_reason == StopReason::EvaluatorStop,
            stop_reason,
            iterations: u32::try_from(history.len()).unwrap_or(u32::MAX),
            usage,
            history,
            delegations,
            error,
        }
    }

    /// Token usage including all transitive subordinate runs.
    pub fn total_usage(&self) -> TokenUsage {
        let mut total = self.usage;
        for delegation in &self.delegations {
            total.add(delegation.result.total_usage());
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(stop_reason: StopReason) -> EngineResult {
        EngineResult::new(
            Uuid::new_v4(),
            "solver".into(),
            "answer".into(),
            stop_reason,
            TokenUsage::default(),
            EvolutionHistory::new(),
            vec![],
            None,
        )
    }

    #[test]
    fn converged_iff_evaluator_stop() {
        assert!(result_with(StopReason::EvaluatorStop).converged);
        assert!(!result_with(StopReason::MaxIterations).converged);
        assert!(!result_with(StopReason::Cancelled).converged);
        assert!(!result_with(StopReason::Error).converged);
    }

    #[test]
    fn generate_action_parses_tagged_json() {
        let direct: GenerateAction =
            serde_json::from_str(r#"{"action":"artifact","text":"42"}"#).unwrap();
        assert!(matches!(direct, GenerateAction::Artifact { text } if text == "42"));

        let delegate: GenerateAction = serde_json::from_str(
            r#"{"action":"delegate","subordinates":[
                {"specialization":"integration expert","subtask":"solve the integral"},
                {"specialization":"verification expert","subtask":"check the bounds"}
            ]}"#,
        )
        .unwrap();
        match delegate {
            GenerateAction::Delegate { subordinates } => {
                assert_eq!(subordinates.len(), 2);
                assert!(subordinates.iter().all(DelegationRequest::is_valid));
            }
            GenerateAction::Artifact { .. } => panic!("expected delegate"),
        }
    }

    #[test]
    fn blank_delegation_request_is_invalid() {
        let request = DelegationRequest {
            specialization: "  ".into(),
            subtask: "do it".into(),
            context: None,
        };
        assert!(!request.is_valid());
    }

    #[test]
    fn total_usage_sums_subordinates() {
        let mut child = result_with(StopReason::EvaluatorStop);
        child.usage = TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        };
        let mut parent = result_with(StopReason::MaxIterations);
        parent.usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
        };
        parent.delegations.push(DelegationRecord {
            specialization: "expert".into(),
            subtask: "sub".into(),
            result: child,
        });

        let total = parent.total_usage();
        assert_eq!(total.input_tokens, 110);
        assert_eq!(total.output_tokens, 55);
    }
}
