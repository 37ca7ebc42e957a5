pub mod config;
pub mod engine;
pub mod iteration;
pub mod job;
pub mod role;

pub use config::Config;
pub use engine::{DelegationRecord, DelegationRequest, EngineResult, GenerateAction, StopReason};
pub use iteration::{EvolutionHistory, IterationRecord};
pub use job::{JobRecord, JobStatus, PartialResult, StatusOptions};
pub use role::{ExecutionMode, Problem, RoleConfig, DEFAULT_STOP_MARKER};
