pub mod convergence;
pub mod delegation;
pub mod prompts;
pub mod stop_signal;

pub use convergence::ConvergenceEngine;
pub use stop_signal::StopSignalDetector;
