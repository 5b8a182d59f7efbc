//! Durable job queue queries
//!
//! The claim is a single UPDATE over a `FOR UPDATE SKIP LOCKED` candidate
//! select, so two workers polling at the same instant can never take the
//! same row.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use vocalbridge_core::{
    Error, Result,
    store::{JobStore, NewJob},
    types::{Job, TenantId},
};

use super::{PgStore, db_err, is_unique_violation, job_type_str, map_job};

#[async_trait]
impl JobStore for PgStore {
    async fn enqueue_job(&self, new: NewJob) -> Result<Job> {
        let insert = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, tenant_id, job_type, idempotency_key, input, status,
                callback_url, max_attempts
            )
            VALUES ($1, $2, $3, $4, $5, 'PENDING', $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.tenant_id.as_uuid())
        .bind(job_type_str(new.job_type))
        .bind(&new.idempotency_key)
        .bind(&new.input)
        .bind(&new.callback_url)
        .bind(new.max_attempts)
        .fetch_one(self.pool())
        .await;

        match insert {
            Ok(row) => map_job(&row),
            Err(e) if is_unique_violation(&e) => {
                // Duplicate submission: hand back the existing job.
                let key = new
                    .idempotency_key
                    .as_deref()
                    .ok_or_else(|| Error::Database("unique violation without key".to_string()))?;
                let row = sqlx::query(
                    "SELECT * FROM jobs WHERE tenant_id = $1 AND idempotency_key = $2",
                )
                .bind(new.tenant_id.as_uuid())
                .bind(key)
                .fetch_one(self.pool())
                .await
                .map_err(db_err("Failed to fetch existing job"))?;
                map_job(&row)
            }
            Err(e) => Err(Error::Database(format!("Failed to enqueue job: {}", e))),
        }
    }

    async fn get_job(&self, tenant_id: TenantId, id: Uuid) -> Result<Job> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id.as_uuid())
            .fetch_optional(self.pool())
            .await
            .map_err(db_err("Failed to fetch job"))?
            .ok_or_else(|| Error::NotFound("job".to_string()))?;
        map_job(&row)
    }

    async fn list_jobs(&self, tenant_id: TenantId, limit: i64, offset: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await
        .map_err(db_err("Failed to list jobs"))?;
        rows.iter().map(map_job).collect()
    }

    async fn claim_job(&self, worker_id: &str, lease: Duration) -> Result<Option<Job>> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            WITH candidate AS (
                SELECT id FROM jobs
                WHERE status IN ('PENDING', 'PROCESSING')
                  AND (locked_at IS NULL OR lock_expires_at < $3)
                  AND attempts < max_attempts
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs j SET
                status = 'PROCESSING',
                locked_at = $3,
                locked_by = $1,
                lock_expires_at = $2,
                attempts = attempts + 1,
                started_at = COALESCE(started_at, $3)
            FROM candidate
            WHERE j.id = candidate.id
            RETURNING j.*
            "#,
        )
        .bind(worker_id)
        .bind(now + lease)
        .bind(now)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err("Failed to claim job"))?;
        row.as_ref().map(map_job).transpose()
    }

    async fn complete_job(&self, id: Uuid, output: serde_json::Value) -> Result<Job> {
        let row = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'COMPLETED', progress = 100, output = $2,
                completed_at = NOW(), locked_at = NULL, locked_by = NULL,
                lock_expires_at = NULL
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&output)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err("Failed to complete job"))?
        .ok_or_else(|| Error::NotFound("job".to_string()))?;
        map_job(&row)
    }

    async fn fail_job_attempt(&self, id: Uuid, error: &str) -> Result<Job> {
        // Attempts were pre-incremented at claim time; remaining budget
        // decides between requeue and terminal failure.
        let row = sqlx::query(
            r#"
            UPDATE jobs SET
                last_error = $2,
                status = CASE WHEN attempts < max_attempts THEN 'PENDING' ELSE 'FAILED' END,
                error_message = CASE WHEN attempts < max_attempts THEN error_message ELSE $2 END,
                completed_at = CASE WHEN attempts < max_attempts THEN completed_at ELSE NOW() END,
                locked_at = NULL, locked_by = NULL, lock_expires_at = NULL
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err("Failed to record job failure"))?
        .ok_or_else(|| Error::NotFound("job".to_string()))?;
        map_job(&row)
    }

    async fn set_job_progress(&self, id: Uuid, progress: i16) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET progress = $2 WHERE id = $1")
            .bind(id)
            .bind(progress.clamp(0, 100))
            .execute(self.pool())
            .await
            .map_err(db_err("Failed to update job progress"))?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("job".to_string()));
        }
        Ok(())
    }

    async fn mark_callback_sent(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE jobs SET callback_sent = TRUE WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(db_err("Failed to mark callback sent"))?;
        Ok(())
    }

    async fn recover_expired_jobs(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'PENDING', locked_at = NULL, locked_by = NULL,
                lock_expires_at = NULL
            WHERE status = 'PROCESSING' AND lock_expires_at < NOW()
            "#,
        )
        .execute(self.pool())
        .await
        .map_err(db_err("Failed to recover expired jobs"))?;
        Ok(result.rows_affected())
    }
}
