pub mod connection;
pub mod job_repository;

pub use connection::{create_pool, create_test_pool};
pub use job_repository::SqliteJobStore;
