//! Crucible: an iterative refinement engine with recursive delegation and
//! asynchronously tracked jobs.
//!
//! A submitted problem runs through a generate → evaluate → refine loop
//! until the evaluator signals genuine convergence or the iteration cap is
//! reached. Coordinating roles may decompose the problem and delegate
//! subtasks to subordinate engines running the same loop. Every run is
//! tracked as a pollable job with monotonic progress, cooperative
//! cancellation, and a TTL-bounded persisted record.

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod engine;
pub mod infrastructure;
pub mod jobs;

pub use domain::models::Config;
pub use engine::ConvergenceEngine;
pub use jobs::{JobManager, SubmitOptions};
