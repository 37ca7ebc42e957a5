//! SQLite-backed job store.
//!
//! Records are persisted as a JSON document alongside a few indexed columns.
//! Expiry is enforced on read: a row past its `expires_at` behaves as if it
//! were never written, and is deleted opportunistically when touched.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::errors::{JobError, JobResult};
use crate::domain::models::job::JobRecord;
use crate::domain::ports::job_store::JobStore;

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn expiry_from(ttl: Duration) -> JobResult<String> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| JobError::Store(format!("ttl out of range: {e}")))?;
        Ok((Utc::now() + ttl).to_rfc3339())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn put(&self, record: &JobRecord, ttl: Duration) -> JobResult<()> {
        let payload = serde_json::to_string(record)?;
        sqlx::query(
            r"
            INSERT OR REPLACE INTO jobs (id, status, progress, record, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(record.id.to_string())
        .bind(record.status.as_str())
        .bind(record.progress)
        .bind(payload)
        .bind(record.created_at.to_rfc3339())
        .bind(Self::expiry_from(ttl)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> JobResult<Option<JobRecord>> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("DELETE FROM jobs WHERE id = ?1 AND expires_at <= ?2")
            .bind(id.to_string())
            .bind(&now)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query("SELECT record FROM jobs WHERE id = ?1 AND expires_at > ?2")
            .bind(id.to_string())
            .bind(&now)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let payload: String = row.try_get("record").map_err(JobError::from)?;
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, id: Uuid) -> JobResult<bool> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("DELETE FROM jobs WHERE id = ?1 AND expires_at <= ?2")
            .bind(id.to_string())
            .bind(&now)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_expiry(&self, id: Uuid, ttl: Duration) -> JobResult<()> {
        sqlx::query("UPDATE jobs SET expires_at = ?1 WHERE id = ?2")
            .bind(Self::expiry_from(ttl)?)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> JobResult<Vec<JobRecord>> {
        let now = Utc::now().to_rfc3339();
        let rows = sqlx::query("SELECT record FROM jobs WHERE expires_at > ?1 ORDER BY created_at DESC")
            .bind(&now)
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.try_get("record").map_err(JobError::from)?;
            records.push(serde_json::from_str(&payload)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;
    use crate::domain::models::job::JobStatus;
    use crate::domain::models::role::{ExecutionMode, Problem};

    const HOUR: Duration = Duration::from_secs(3600);

    async fn store() -> SqliteJobStore {
        SqliteJobStore::new(create_test_pool().await.unwrap())
    }

    fn job() -> JobRecord {
        JobRecord::new(Uuid::new_v4(), ExecutionMode::Single, Problem::new("q"))
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = store().await;
        let mut record = job();
        record.status = JobStatus::Running;
        record.progress = 0.5;
        store.put(&record, HOUR).await.unwrap();

        let fetched = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, record.id);
        assert_eq!(fetched.status, JobStatus::Running);
        assert!((fetched.progress - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn expired_record_reads_as_absent() {
        let store = store().await;
        let record = job();
        store.put(&record, Duration::ZERO).await.unwrap();
        assert!(store.get(record.id).await.unwrap().is_none());
        // And cannot be deleted either: it was never there.
        assert!(!store.delete(record.id).await.unwrap());
    }

    #[tokio::test]
    async fn touch_extends_a_short_ttl() {
        let store = store().await;
        let record = job();
        store.put(&record, Duration::from_millis(50)).await.unwrap();
        store.touch_expiry(record.id, HOUR).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.get(record.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_reports_whether_a_record_existed() {
        let store = store().await;
        let record = job();
        store.put(&record, HOUR).await.unwrap();

        assert!(store.delete(record.id).await.unwrap());
        assert!(!store.delete(record.id).await.unwrap());
        assert!(store.get(record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_skips_expired_records() {
        let store = store().await;
        let live = job();
        let dead = job();
        store.put(&live, HOUR).await.unwrap();
        store.put(&dead, Duration::ZERO).await.unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, live.id);
    }
}
