//! Progress aggregation for one job.
//!
//! Engines throughout the delegation tree emit events into an unbounded
//! channel; a single aggregator task per job folds them into the persisted
//! `JobRecord`. The aggregator is the only writer for a live job's record,
//! so pollers never observe torn updates and progress never goes backwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::domain::models::engine::{EngineResult, StopReason};
use crate::domain::models::iteration::IterationRecord;
use crate::domain::models::job::{JobRecord, JobStatus};
use crate::domain::ports::job_store::JobStore;
use crate::domain::ports::provider::TokenUsage;

/// Progress cannot report completion before the terminal transition.
const PRE_TERMINAL_PROGRESS_CAP: f64 = 0.99;

/// Events flowing from engines (and the job driver) to the aggregator.
#[derive(Debug)]
pub enum ProgressEvent {
    /// An engine in the tree began its loop.
    EngineStarted {
        node_id: Uuid,
        role: String,
        max_iterations: u32,
        root: bool,
    },
    /// An engine completed one iteration. `usage` is that engine's running
    /// total, not a delta.
    Iteration {
        node_id: Uuid,
        root: bool,
        record: IterationRecord,
        usage: TokenUsage,
        artifact: String,
    },
    /// An engine reached a terminal state.
    EngineFinished {
        node_id: Uuid,
        stop_reason: StopReason,
    },
    /// The root engine returned; the job is terminal.
    Finished { result: EngineResult },
    /// Cooperative cancellation was requested.
    CancelRequested,
    /// The job is being purged; stop persisting.
    PurgeRequested,
}

struct NodeProgress {
    role: String,
    done: u32,
    cap: u32,
    finished: bool,
}

/// Folds one job's event stream into its persisted record.
pub struct ProgressAggregator {
    store: Arc<dyn JobStore>,
    ttl: Duration,
    record: JobRecord,
    nodes: HashMap<Uuid, NodeProgress>,
    node_usage: HashMap<Uuid, TokenUsage>,
    purged: bool,
}

impl ProgressAggregator {
    pub fn new(store: Arc<dyn JobStore>, ttl: Duration, record: JobRecord) -> Self {
        Self {
            store,
            ttl,
            record,
            nodes: HashMap::new(),
            node_usage: HashMap::new(),
            purged: false,
        }
    }

    /// Consume events until the stream ends or the job is purged.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ProgressEvent>) {
        while let Some(event) = events.recv().await {
            if self.apply(event) {
                break;
            }
            self.persist().await;
        }

        // A closed channel without a terminal transition means the driver
        // died; surface that rather than leaving the job running forever.
        if !self.purged && !self.record.status.is_terminal() {
            self.record.status = JobStatus::Failed;
            self.record.completed_at = Some(chrono::Utc::now());
            self.record.error = Some("orchestration task ended unexpectedly".to_string());
            self.record.partial = None;
            self.persist().await;
        }
    }

    /// Apply one event to the in-memory record. Returns true when the
    /// aggregator should stop consuming.
    fn apply(&mut self, event: ProgressEvent) -> bool {
        match event {
            ProgressEvent::EngineStarted {
                node_id,
                role,
                max_iterations,
                root,
            } => {
                self.nodes.insert(
                    node_id,
                    NodeProgress {
                        role,
                        done: 0,
                        cap: max_iterations,
                        finished: false,
                    },
                );
                if root && self.record.status == JobStatus::Pending {
                    self.record.status = JobStatus::Running;
                    self.record.started_at = Some(chrono::Utc::now());
                }
                self.refresh_partial(None);
            }
            ProgressEvent::Iteration {
                node_id,
                root,
                record,
                usage,
                artifact,
            } => {
                if let Some(node) = self.nodes.get_mut(&node_id) {
                    node.done = record.sequence;
                    self.record.current_phase =
                        Some(format!("{} iteration {}", node.role, record.sequence));
                }
                self.node_usage.insert(node_id, usage);
                if root {
                    self.refresh_partial(Some((record, artifact)));
                } else {
                    self.refresh_partial(None);
                }
            }
            ProgressEvent::EngineFinished { node_id, .. } => {
                if let Some(node) = self.nodes.get_mut(&node_id) {
                    node.finished = true;
                }
                self.refresh_partial(None);
            }
            ProgressEvent::Finished { result } => {
                self.finish(result);
            }
            ProgressEvent::CancelRequested => {
                if !self.record.status.is_terminal() {
                    debug!(job_id = %self.record.id, "cancellation observed");
                    self.record.status = JobStatus::Cancelled;
                    self.record.completed_at = Some(chrono::Utc::now());
                    self.record.current_phase = None;
                }
            }
            ProgressEvent::PurgeRequested => {
                self.purged = true;
                return true;
            }
        }
        false
    }

    fn finish(&mut self, result: EngineResult) {
        // Cancellation may already have made the record terminal; the status
        // stands, but the engine's result is still attached exactly once.
        if !self.record.status.is_terminal() {
            self.record.status = match result.stop_reason {
                StopReason::EvaluatorStop | StopReason::MaxIterations => JobStatus::Completed,
                StopReason::Cancelled => JobStatus::Cancelled,
                StopReason::Error => JobStatus::Failed,
            };
            self.record.completed_at = Some(chrono::Utc::now());
        }
        if self.record.status == JobStatus::Completed {
            self.record.progress = 1.0;
        }
        if self.record.status == JobStatus::Failed {
            self.record.error = result.error.clone();
        }
        self.record.current_phase = None;
        self.record.partial = None;
        self.record.result = Some(result);
    }

    fn refresh_partial(&mut self, root_iteration: Option<(IterationRecord, String)>) {
        if self.record.status.is_terminal() {
            return;
        }

        let mut partial = self.record.partial.take().unwrap_or_default();
        if let Some((record, artifact)) = root_iteration {
            partial.iterations = record.sequence;
            partial.artifact = artifact;
            partial.history.push(record);
        }
        let mut usage = TokenUsage::default();
        for node in self.node_usage.values() {
            usage.add(*node);
        }
        partial.usage = usage;
        partial.engines_started = u32::try_from(self.nodes.len()).unwrap_or(u32::MAX);
        partial.engines_finished =
            u32::try_from(self.nodes.values().filter(|n| n.finished).count()).unwrap_or(u32::MAX);
        self.record.partial = Some(partial);

        self.record.progress = self.estimate_progress();
    }

    /// Weighted completion over every engine seen so far, clamped so it
    /// never decreases when new engines join the tree and never reports
    /// done before the terminal transition.
    fn estimate_progress(&self) -> f64 {
        let total_cap: u32 = self.nodes.values().map(|n| n.cap.max(1)).sum();
        if total_cap == 0 {
            return self.record.progress;
        }
        let total_done: u32 = self
            .nodes
            .values()
            .map(|n| if n.finished { n.cap.max(1) } else { n.done.min(n.cap) })
            .sum();
        let raw = f64::from(total_done) / f64::from(total_cap);
        let capped = raw.min(PRE_TERMINAL_PROGRESS_CAP);
        if capped > self.record.progress {
            capped
        } else {
            self.record.progress
        }
    }

    async fn persist(&self) {
        if self.purged {
            return;
        }
        if let Err(err) = self.store.put(&self.record, self.ttl).await {
            error!(job_id = %self.record.id, error = %err, "failed to persist job progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::iteration::EvolutionHistory;
    use crate::domain::models::role::{ExecutionMode, Problem};

    fn record(sequence: u32) -> IterationRecord {
        IterationRecord {
            sequence,
            prompt: "p".into(),
            artifact: "a".into(),
            feedback: "f".into(),
            should_stop: false,
            refined_prompt: None,
        }
    }

    struct NullStore;

    #[async_trait::async_trait]
    impl JobStore for NullStore {
        async fn put(&self, _: &JobRecord, _: Duration) -> crate::domain::errors::JobResult<()> {
            Ok(())
        }
        async fn get(&self, _: Uuid) -> crate::domain::errors::JobResult<Option<JobRecord>> {
            Ok(None)
        }
        async fn delete(&self, _: Uuid) -> crate::domain::errors::JobResult<bool> {
            Ok(false)
        }
        async fn touch_expiry(&self, _: Uuid, _: Duration) -> crate::domain::errors::JobResult<()> {
            Ok(())
        }
        async fn list(&self) -> crate::domain::errors::JobResult<Vec<JobRecord>> {
            Ok(vec![])
        }
    }

    fn aggregator() -> ProgressAggregator {
        let job = JobRecord::new(Uuid::new_v4(), ExecutionMode::Single, Problem::new("q"));
        ProgressAggregator::new(Arc::new(NullStore), Duration::from_secs(3600), job)
    }

    fn engine_result(stop_reason: StopReason) -> EngineResult {
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

    #[tokio::test]
    async fn progress_is_monotonic_and_capped_before_terminal() {
        let mut agg = aggregator();
        let root = Uuid::new_v4();

        agg.apply(ProgressEvent::EngineStarted {
            node_id: root,
            role: "solver".into(),
            max_iterations: 2,
            root: true,
        });
        assert_eq!(agg.record.status, JobStatus::Running);

        agg.apply(ProgressEvent::Iteration {
            node_id: root,
            root: true,
            record: record(1),
            usage: TokenUsage::new(10, 5),
            artifact: "a".into(),
        });
        let after_one = agg.record.progress;
        assert!(after_one > 0.0 && after_one <= PRE_TERMINAL_PROGRESS_CAP);

        // A late-joining subordinate grows the denominator; progress holds.
        agg.apply(ProgressEvent::EngineStarted {
            node_id: Uuid::new_v4(),
            role: "expert".into(),
            max_iterations: 5,
            root: false,
        });
        assert!(agg.record.progress >= after_one);

        agg.apply(ProgressEvent::Iteration {
            node_id: root,
            root: true,
            record: record(2),
            usage: TokenUsage::new(20, 10),
            artifact: "b".into(),
        });
        agg.apply(ProgressEvent::EngineFinished {
            node_id: root,
            stop_reason: StopReason::MaxIterations,
        });
        assert!(agg.record.progress <= PRE_TERMINAL_PROGRESS_CAP);
    }

    #[tokio::test]
    async fn finished_sets_terminal_status_and_clears_partial() {
        let mut agg = aggregator();
        let root = Uuid::new_v4();
        agg.apply(ProgressEvent::EngineStarted {
            node_id: root,
            role: "solver".into(),
            max_iterations: 3,
            root: true,
        });
        agg.apply(ProgressEvent::Iteration {
            node_id: root,
            root: true,
            record: record(1),
            usage: TokenUsage::new(10, 5),
            artifact: "a".into(),
        });
        assert!(agg.record.partial.is_some());

        agg.apply(ProgressEvent::Finished {
            result: engine_result(StopReason::EvaluatorStop),
        });
        assert_eq!(agg.record.status, JobStatus::Completed);
        assert!((agg.record.progress - 1.0).abs() < f64::EPSILON);
        assert!(agg.record.partial.is_none());
        assert!(agg.record.result.is_some());
        assert!(agg.record.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancellation_sticks_even_if_the_engine_completes() {
        let mut agg = aggregator();
        agg.apply(ProgressEvent::EngineStarted {
            node_id: Uuid::new_v4(),
            role: "solver".into(),
            max_iterations: 3,
            root: true,
        });
        agg.apply(ProgressEvent::CancelRequested);
        assert_eq!(agg.record.status, JobStatus::Cancelled);

        agg.apply(ProgressEvent::Finished {
            result: engine_result(StopReason::EvaluatorStop),
        });
        assert_eq!(agg.record.status, JobStatus::Cancelled);
        assert!(agg.record.progress < 1.0);
        // The result is still attached for inspection.
        assert!(agg.record.result.is_some());
    }

    #[tokio::test]
    async fn failed_engine_maps_to_failed_job() {
        let mut agg = aggregator();
        agg.apply(ProgressEvent::EngineStarted {
            node_id: Uuid::new_v4(),
            role: "solver".into(),
            max_iterations: 3,
            root: true,
        });
        let mut result = engine_result(StopReason::Error);
        result.error = Some("rate limit exhausted".into());
        agg.apply(ProgressEvent::Finished { result });

        assert_eq!(agg.record.status, JobStatus::Failed);
        assert_eq!(agg.record.error.as_deref(), Some("rate limit exhausted"));
        assert!(agg.record.progress < 1.0);
    }

    #[tokio::test]
    async fn purge_stops_the_aggregator() {
        let mut agg = aggregator();
        assert!(agg.apply(ProgressEvent::PurgeRequested));
        assert!(agg.purged);
    }
}
