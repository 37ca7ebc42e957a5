//! Asynchronous job lifecycle: submit, poll, cancel, purge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::domain::errors::{JobError, JobResult};
use crate::domain::models::config::{Config, EngineConfig};
use crate::domain::models::job::{JobRecord, JobStatus, StatusOptions};
use crate::domain::models::role::{ExecutionMode, Problem, RoleConfig};
use crate::domain::ports::job_store::JobStore;
use crate::domain::ports::provider::CompletionProvider;
use crate::engine::{prompts, ConvergenceEngine};
use crate::jobs::progress::{ProgressAggregator, ProgressEvent};

/// Poll interval for [`JobManager::wait_terminal`].
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Per-submission overrides. Anything left `None` falls back to the
/// configured engine defaults.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub mode: ExecutionMode,
    pub max_iterations: Option<u32>,
    pub subordinate_max_iterations: Option<u32>,
    pub delegation_depth: Option<u32>,
    pub model: Option<String>,
    pub stop_marker: Option<String>,
}

struct RunningJob {
    cancel: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ProgressEvent>,
}

/// Owns the lifecycle of every submitted job.
///
/// Each submission gets a driver task running the engine tree and an
/// aggregator task that is the sole writer of the job's persisted record.
pub struct JobManager {
    store: Arc<dyn JobStore>,
    provider: Arc<dyn CompletionProvider>,
    engine_defaults: EngineConfig,
    default_model: String,
    ttl: Duration,
    running: Arc<RwLock<HashMap<Uuid, RunningJob>>>,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        provider: Arc<dyn CompletionProvider>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            provider,
            engine_defaults: config.engine.clone(),
            default_model: config.provider.model.clone(),
            ttl: Duration::from_secs(config.jobs.ttl_secs),
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Submit a problem and return immediately with the job id.
    pub async fn submit(&self, problem: Problem, options: SubmitOptions) -> JobResult<Uuid> {
        let id = Uuid::new_v4();
        let record = JobRecord::new(id, options.mode, problem.clone());
        self.store.put(&record, self.ttl).await?;

        let (events, receiver) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));

        let aggregator = ProgressAggregator::new(self.store.clone(), self.ttl, record);
        tokio::spawn(aggregator.run(receiver));

        let role = self.build_role(&options);
        let engine =
            ConvergenceEngine::new(role, self.provider.clone(), cancel.clone(), events.clone());

        self.running.write().await.insert(
            id,
            RunningJob {
                cancel,
                events: events.clone(),
            },
        );

        let running = self.running.clone();
        tokio::spawn(async move {
            let result = engine.run(problem).await;
            let _ = events.send(ProgressEvent::Finished { result });
            running.write().await.remove(&id);
        });

        info!(job_id = %id, mode = options.mode.as_str(), "job submitted");
        Ok(id)
    }

    /// Current state of a job, with heavyweight fields stripped per options.
    pub async fn status(&self, id: Uuid, options: StatusOptions) -> JobResult<JobRecord> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or(JobError::NotFound(id))?;
        Ok(record.redacted(options))
    }

    /// All live job records, newest first, without heavyweight fields.
    pub async fn list(&self) -> JobResult<Vec<JobRecord>> {
        let records = self.store.list().await?;
        Ok(records
            .iter()
            .map(|r| r.redacted(StatusOptions::default()))
            .collect())
    }

    /// Request cooperative cancellation.
    ///
    /// Cancelling a terminal job is a no-op that reports the existing state.
    /// The engine tree observes the flag at its next iteration boundary.
    pub async fn cancel(&self, id: Uuid) -> JobResult<JobRecord> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or(JobError::NotFound(id))?;
        if record.status.is_terminal() {
            return Ok(record);
        }

        if let Some(job) = self.running.read().await.get(&id) {
            job.cancel.store(true, Ordering::SeqCst);
            let _ = job.events.send(ProgressEvent::CancelRequested);
            info!(job_id = %id, "cancellation requested");
            // The aggregator is the record's only writer; pollers observe
            // the transition once it lands.
            return Ok(record);
        }

        // No live driver owns this record. The job may have finished between
        // the read above and the map lookup, so re-read before writing the
        // transition directly; a terminal record is never overwritten.
        let mut current = self
            .store
            .get(id)
            .await?
            .ok_or(JobError::NotFound(id))?;
        if current.status.is_terminal() {
            return Ok(current);
        }
        current.status = JobStatus::Cancelled;
        current.completed_at = Some(chrono::Utc::now());
        self.store.put(&current, self.ttl).await?;
        info!(job_id = %id, "job cancelled");
        Ok(current)
    }

    /// Remove a job's record entirely. A purged id subsequently reads as
    /// not found, unlike a pending job which still reports its status.
    pub async fn purge(&self, id: Uuid) -> JobResult<()> {
        let live = self.running.write().await.remove(&id);
        let was_running = live.is_some();
        if let Some(job) = live {
            job.cancel.store(true, Ordering::SeqCst);
            let _ = job.events.send(ProgressEvent::PurgeRequested);
        }

        let deleted = self.store.delete(id).await?;
        if !deleted && !was_running {
            return Err(JobError::NotFound(id));
        }
        info!(job_id = %id, "job purged");
        Ok(())
    }

    /// Poll until the job reaches a terminal state or the timeout elapses,
    /// returning the last observed record either way.
    pub async fn wait_terminal(&self, id: Uuid, timeout: Duration) -> JobResult<JobRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let record = self.status(id, StatusOptions::default()).await?;
            if record.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(record);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    fn build_role(&self, options: &SubmitOptions) -> RoleConfig {
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let mut role = match options.mode {
            ExecutionMode::Single => {
                RoleConfig::solver("solver", prompts::solver_instructions(), model)
            }
            ExecutionMode::Coordinated => {
                RoleConfig::coordinator("coordinator", prompts::solver_instructions(), model)
            }
        };
        role.max_iterations = options
            .max_iterations
            .unwrap_or(self.engine_defaults.max_iterations)
            .max(1);
        role.subordinate_max_iterations = options
            .subordinate_max_iterations
            .unwrap_or(self.engine_defaults.subordinate_max_iterations)
            .max(1);
        if role.coordinator {
            role.delegation_depth = options
                .delegation_depth
                .unwrap_or(self.engine_defaults.delegation_depth)
                .max(1);
        }
        role.stop_marker = options
            .stop_marker
            .clone()
            .unwrap_or_else(|| self.engine_defaults.stop_marker.clone());
        role
    }
}
