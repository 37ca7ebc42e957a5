pub mod manager;
pub mod progress;

pub use manager::{JobManager, SubmitOptions};
pub use progress::{ProgressAggregator, ProgressEvent};
