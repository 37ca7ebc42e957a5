//! The generate → evaluate → refine loop.
//!
//! One `ConvergenceEngine` drives one role. Coordinating roles may fan out
//! to subordinate engines (see `delegation`); every engine, root or
//! subordinate, runs this same loop and reports through the shared event
//! channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::models::engine::{DelegationRecord, EngineResult, StopReason};
use crate::domain::models::iteration::{EvolutionHistory, IterationRecord};
use crate::domain::models::role::{Problem, RoleConfig};
use crate::domain::ports::provider::{Completion, CompletionProvider, CompletionRequest, TokenUsage};
use crate::domain::errors::ProviderError;
use crate::engine::{delegation, prompts, stop_signal::StopSignalDetector};
use crate::jobs::progress::ProgressEvent;

pub struct ConvergenceEngine {
    pub(crate) node_id: Uuid,
    pub(crate) role: RoleConfig,
    pub(crate) provider: Arc<dyn CompletionProvider>,
    pub(crate) cancel: Arc<AtomicBool>,
    pub(crate) events: mpsc::UnboundedSender<ProgressEvent>,
    root: bool,
}

impl ConvergenceEngine {
    /// Engine for the root role of a job.
    pub fn new(
        role: RoleConfig,
        provider: Arc<dyn CompletionProvider>,
        cancel: Arc<AtomicBool>,
        events: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Self {
        Self {
            node_id: Uuid::new_v4(),
            role,
            provider,
            cancel,
            events,
            root: true,
        }
    }

    /// Engine for a subordinate role. Shares the parent's cancellation flag
    /// and event channel.
    pub(crate) fn child(
        role: RoleConfig,
        provider: Arc<dyn CompletionProvider>,
        cancel: Arc<AtomicBool>,
        events: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Self {
        Self {
            node_id: Uuid::new_v4(),
            role,
            provider,
            cancel,
            events,
            root: false,
        }
    }

    /// Run the loop to a terminal result.
    ///
    /// Boxed because coordinating engines recurse through subordinate runs.
    /// The engine is infallible at this boundary: provider errors that
    /// survive retries terminate the run with `StopReason::Error`.
    pub fn run(self, problem: Problem) -> BoxFuture<'static, EngineResult> {
        Box::pin(self.run_inner(problem))
    }

    async fn run_inner(self, problem: Problem) -> EngineResult {
        let _ = self.events.send(ProgressEvent::EngineStarted {
            node_id: self.node_id,
            role: self.role.name.clone(),
            max_iterations: self.role.max_iterations.max(1),
            root: self.root,
        });
        info!(
            node_id = %self.node_id,
            role = %self.role.name,
            coordinator = self.role.coordinator,
            max_iterations = self.role.max_iterations,
            "engine started"
        );

        let detector = match StopSignalDetector::new(&self.role.stop_marker) {
            Ok(detector) => detector,
            Err(err) => {
                return self.finish(
                    String::new(),
                    StopReason::Error,
                    TokenUsage::default(),
                    EvolutionHistory::new(),
                    Vec::new(),
                    Some(err.to_string()),
                );
            }
        };

        let cap = self.role.max_iterations.max(1);
        let mut usage = TokenUsage::default();
        let mut history = EvolutionHistory::new();
        let mut delegations: Vec<DelegationRecord> = Vec::new();
        let mut prompt = problem.initial_prompt();
        let mut artifact = String::new();
        let mut stop_reason = StopReason::MaxIterations;
        let mut error: Option<String> = None;

        for sequence in 1..=cap {
            if self.cancelled() {
                stop_reason = StopReason::Cancelled;
                break;
            }

            // Generate.
            let generated = if self.role.coordinator {
                delegation::coordinated_generate(
                    &self,
                    &problem,
                    &prompt,
                    &mut delegations,
                    &mut usage,
                )
                .await
            } else {
                self.complete_text(
                    self.role.instructions.clone(),
                    prompt.clone(),
                    f64::from(self.role.temperature),
                )
                .await
                .map(|completion| {
                    usage.add(completion.usage);
                    completion.text
                })
            };
            artifact = match generated {
                Ok(text) => text,
                Err(err) => {
                    warn!(node_id = %self.node_id, sequence, error = %err, "generate failed");
                    error = Some(err.to_string());
                    stop_reason = StopReason::Error;
                    break;
                }
            };

            if self.cancelled() {
                stop_reason = StopReason::Cancelled;
                break;
            }

            // Evaluate. Always temperature zero.
            let feedback = match self
                .complete_text(
                    prompts::evaluator_instructions(detector.marker()),
                    prompts::evaluation_prompt(&problem, &artifact),
                    0.0,
                )
                .await
            {
                Ok(completion) => {
                    usage.add(completion.usage);
                    completion.text
                }
                Err(err) => {
                    warn!(node_id = %self.node_id, sequence, error = %err, "evaluate failed");
                    error = Some(err.to_string());
                    stop_reason = StopReason::Error;
                    break;
                }
            };

            let should_stop = detector.should_stop(&feedback);
            let mut record = IterationRecord {
                sequence,
                prompt: prompt.clone(),
                artifact: artifact.clone(),
                feedback,
                should_stop,
                refined_prompt: None,
            };

            if should_stop {
                self.record_iteration(&mut history, record, usage, &artifact);
                stop_reason = StopReason::EvaluatorStop;
                break;
            }
            if sequence == cap {
                self.record_iteration(&mut history, record, usage, &artifact);
                stop_reason = StopReason::MaxIterations;
                break;
            }
            if self.cancelled() {
                self.record_iteration(&mut history, record, usage, &artifact);
                stop_reason = StopReason::Cancelled;
                break;
            }

            // Refine the prompt for the next pass.
            match self
                .complete_text(
                    prompts::refiner_instructions(),
                    prompts::refine_prompt(&problem, &artifact, &record.feedback),
                    f64::from(self.role.temperature),
                )
                .await
            {
                Ok(completion) => {
                    usage.add(completion.usage);
                    record.refined_prompt = Some(completion.text.clone());
                    self.record_iteration(&mut history, record, usage, &artifact);
                    prompt = completion.text;
                }
                Err(err) => {
                    warn!(node_id = %self.node_id, sequence, error = %err, "refine failed");
                    self.record_iteration(&mut history, record, usage, &artifact);
                    error = Some(err.to_string());
                    stop_reason = StopReason::Error;
                    break;
                }
            }
        }

        self.finish(artifact, stop_reason, usage, history, delegations, error)
    }

    fn record_iteration(
        &self,
        history: &mut EvolutionHistory,
        record: IterationRecord,
        usage: TokenUsage,
        artifact: &str,
    ) {
        history.push(record.clone());
        let _ = self.events.send(ProgressEvent::Iteration {
            node_id: self.node_id,
            root: self.root,
            record,
            usage,
            artifact: artifact.to_string(),
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        artifact: String,
        stop_reason: StopReason,
        usage: TokenUsage,
        history: EvolutionHistory,
        delegations: Vec<DelegationRecord>,
        error: Option<String>,
    ) -> EngineResult {
        let result = EngineResult::new(
            self.node_id,
            self.role.name.clone(),
            artifact,
            stop_reason,
            usage,
            history,
            delegations,
            error,
        );
        info!(
            node_id = %self.node_id,
            role = %self.role.name,
            stop_reason = stop_reason.as_str(),
            iterations = result.iterations,
            converged = result.converged,
            "engine finished"
        );
        let _ = self.events.send(ProgressEvent::EngineFinished {
            node_id: self.node_id,
            stop_reason,
        });
        result
    }

    pub(crate) async fn complete_text(
        &self,
        system: String,
        prompt: String,
        temperature: f64,
    ) -> Result<Completion, ProviderError> {
        self.provider
            .complete(CompletionRequest {
                system,
                prompt,
                model: self.role.model.clone(),
                max_tokens: self.role.max_tokens,
                temperature,
            })
            .await
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}
