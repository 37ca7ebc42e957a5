//! Port for durable job state.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::JobResult;
use crate::domain::models::job::JobRecord;

/// Durable store for job records with per-record expiry.
///
/// Every `put` refreshes the record's expiry window; expired records behave
/// as if they were never written.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a record, resetting its expiry to `ttl` from now.
    async fn put(&self, record: &JobRecord, ttl: Duration) -> JobResult<()>;

    /// Fetch a record by id. Expired records read as `None`.
    async fn get(&self, id: Uuid) -> JobResult<Option<JobRecord>>;

    /// Remove a record. Returns whether a live record existed.
    async fn delete(&self, id: Uuid) -> JobResult<bool>;

    /// Reset a record's expiry without rewriting its payload.
    async fn touch_expiry(&self, id: Uuid, ttl: Duration) -> JobResult<()>;

    /// All non-expired records, newest first.
    async fn list(&self) -> JobResult<Vec<JobRecord>>;
}
