//! Job records: the persisted, pollable state of one orchestration run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::engine::EngineResult;
use super::iteration::EvolutionHistory;
use super::role::{ExecutionMode, Problem};
use crate::domain::ports::provider::TokenUsage;

/// Status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Record created, orchestration not yet started.
    #[default]
    Pending,
    /// Orchestration in progress.
    Running,
    /// Terminal: finished with a result (converged or cap reached).
    Completed,
    /// Terminal: a provider error survived retries.
    Failed,
    /// Terminal: cancellation was requested and observed.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> Vec<JobStatus> {
        match self {
            Self::Pending => vec![Self::Running, Self::Cancelled],
            Self::Running => vec![Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => vec![],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Live, in-progress snapshot of a job's engine result, exposed to pollers
/// before the job reaches a terminal state. Updated after every completed
/// iteration of every active engine in the tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PartialResult {
    /// Latest artifact from the root engine.
    pub artifact: String,

    /// Completed iterations of the root engine.
    pub iterations: u32,

    /// Aggregate token usage across all engines so far.
    pub usage: TokenUsage,

    /// Root engine history so far.
    pub history: EvolutionHistory,

    /// Engines started in the delegation tree (root included).
    pub engines_started: u32,

    /// Engines that reached a terminal state.
    pub engines_finished: u32,
}

/// Persisted state of one asynchronously tracked orchestration run.
///
/// Mutated only by the orchestration task driving the job and by the
/// cancellation path; deleted only by explicit purge or store expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobRecord {
    pub id: Uuid,
    pub status: JobStatus,

    /// Monotonically non-decreasing progress estimate in [0, 1].
    /// Reaches 1.0 only on the completed terminal transition.
    pub progress: f64,

    /// Human-readable label of the current phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,

    pub mode: ExecutionMode,
    pub problem: Problem,

    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// In-progress snapshot; cleared once the final result is written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<PartialResult>,

    /// Final engine result, written exactly once on a terminal transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<EngineResult>,

    /// Error text when `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Selects which heavyweight fields a status query includes, to bound
/// response size.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusOptions {
    /// Include full evolution histories (root and delegation records).
    pub include_history: bool,
    /// Include the in-progress partial result snapshot.
    pub include_partial: bool,
}

impl JobRecord {
    pub fn new(id: Uuid, mode: ExecutionMode, problem: Problem) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            progress: 0.0,
            current_phase: None,
            mode,
            problem,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            partial: None,
            result: None,
            error: None,
        }
    }

    /// A copy with heavyweight fields stripped per the given options.
    pub fn redacted(&self, options: StatusOptions) -> Self {
        let mut record = self.clone();
        if !options.include_partial {
            record.partial = None;
        }
        if !options.include_history {
            if let Some(partial) = &mut record.partial {
                partial.history.clear();
            }
            if let Some(result) = &mut record.result {
                strip_histories(result);
            }
        }
        record
    }
}

fn strip_histories(result: &mut EngineResult) {
    result.history.clear();
    for delegation in &mut result.delegations {
        strip_histories(&mut delegation.result);
    }
}
