use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use hackaplan_core::error::{AppError, ErrorCode};
use hackaplan_core::events::{EventPayload, ProgressEvent};
use hackaplan_core::job::{JobError, JobOutcome, JobStatus, LookupJob};
use hackaplan_core::models::LookupResult;
use hackaplan_core::traits::LookupStore;
use hackaplan_core::util::{format_timestamp, parse_timestamp};

/// SQLite-backed [`LookupStore`].
///
/// Status changes are guarded in SQL and share a transaction with the
/// event that describes them.
#[derive(Clone)]
pub struct LookupRepository {
    pool: SqlitePool,
}

impl LookupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Explain why a guarded write matched no row.
    async fn guard_failure(&self, job_id: Uuid, next: &str) -> AppError {
        match self.get_job(job_id).await {
            Ok(Some(job)) => AppError::InvalidTransition(format!(
                "job {job_id} cannot move from {} to {next}",
                job.status
            )),
            Ok(None) => AppError::JobNotFound(job_id.to_string()),
            Err(err) => err,
        }
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct LookupJobRow {
    id: String,
    url: String,
    status: String,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
}

impl TryFrom<LookupJobRow> for LookupJob {
    type Error = AppError;

    fn try_from(row: LookupJobRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| AppError::DatabaseError(format!("Bad job id '{}': {e}", row.id)))?;
        let status = row.status.parse::<JobStatus>().map_err(AppError::DatabaseError)?;
        let error = match row.error_code {
            Some(code) => Some(JobError::new(
                code.parse().unwrap_or(ErrorCode::InternalError),
                row.error_message.unwrap_or_default(),
            )),
            None => None,
        };

        Ok(LookupJob {
            id,
            hackathon_url: row.url,
            status,
            created_at: parse_timestamp(&row.created_at)?,
            started_at: row.started_at.as_deref().map(parse_timestamp).transpose()?,
            finished_at: row.finished_at.as_deref().map(parse_timestamp).transpose()?,
            error,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    seq: i64,
    event_type: String,
    timestamp: String,
    payload: String,
}

impl TryFrom<EventRow> for ProgressEvent {
    type Error = AppError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let payload = serde_json::from_str(&row.payload)?;
        Ok(ProgressEvent {
            seq: row.seq as u64,
            timestamp: parse_timestamp(&row.timestamp)?,
            payload: EventPayload::from_parts(&row.event_type, payload)?,
        })
    }
}

const JOB_COLUMNS: &str =
    "id, url, status, created_at, started_at, finished_at, error_code, error_message";

/// Append an event at the next per-job `seq`, but only while the job is in
/// one of `statuses`. Returns `None` when the guard matched nothing.
async fn insert_event(
    tx: &mut Transaction<'_, Sqlite>,
    job_id: Uuid,
    statuses: &[JobStatus],
    timestamp: DateTime<Utc>,
    payload: &EventPayload,
) -> Result<Option<ProgressEvent>, AppError> {
    let (event_type, body) = payload.to_parts()?;
    let allowed: Vec<&str> = statuses.iter().map(JobStatus::as_str).collect();
    let allowed = serde_json::to_string(&allowed)?;

    let seq: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO lookup_progress_events (job_id, seq, event_type, timestamp, payload)
        SELECT j.id,
               (SELECT COALESCE(MAX(e.seq), 0) + 1 FROM lookup_progress_events e WHERE e.job_id = j.id),
               ?2, ?3, ?4
        FROM lookup_jobs j
        WHERE j.id = ?1 AND j.status IN (SELECT value FROM json_each(?5))
        RETURNING seq
        "#,
    )
    .bind(job_id.to_string())
    .bind(event_type)
    .bind(format_timestamp(&timestamp))
    .bind(body.to_string())
    .bind(allowed)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(e.to_string()))?;

    Ok(seq.map(|seq| ProgressEvent {
        seq: seq as u64,
        timestamp,
        payload: payload.clone(),
    }))
}

async fn rollback(tx: Transaction<'_, Sqlite>) -> Result<(), AppError> {
    tx.rollback()
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))
}

async fn commit(tx: Transaction<'_, Sqlite>) -> Result<(), AppError> {
    tx.commit()
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))
}

impl LookupStore for LookupRepository {
    async fn insert_job(
        &self,
        job: &LookupJob,
        timestamp: DateTime<Utc>,
        payload: &EventPayload,
    ) -> Result<ProgressEvent, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO lookup_jobs (id, url, status, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.hackathon_url)
        .bind(job.status.as_str())
        .bind(format_timestamp(&job.created_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let event = insert_event(&mut tx, job.id, &[job.status], timestamp, payload)
            .await?
            .ok_or_else(|| AppError::Internal(format!("job {} vanished on insert", job.id)))?;
        commit(tx).await?;
        Ok(event)
    }

    async fn mark_started(
        &self,
        job_id: Uuid,
        timestamp: DateTime<Utc>,
        payload: &EventPayload,
    ) -> Result<ProgressEvent, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let updated = sqlx::query(
            r#"
            UPDATE lookup_jobs
            SET status = 'started', started_at = ?2
            WHERE id = ?1 AND status = 'queued'
            "#,
        )
        .bind(job_id.to_string())
        .bind(format_timestamp(&timestamp))
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if updated.rows_affected() == 0 {
            rollback(tx).await?;
            return Err(self.guard_failure(job_id, "started").await);
        }

        let event = insert_event(&mut tx, job_id, &[JobStatus::Started], timestamp, payload)
            .await?
            .ok_or_else(|| AppError::Internal(format!("job {job_id} lost its started state")))?;
        commit(tx).await?;
        Ok(event)
    }

    async fn mark_finished(
        &self,
        job_id: Uuid,
        outcome: &JobOutcome,
        timestamp: DateTime<Utc>,
        payload: &EventPayload,
    ) -> Result<ProgressEvent, AppError> {
        let next = outcome.status();
        let (error_code, error_message) = match outcome {
            JobOutcome::Failed(error) => (Some(error.code.as_str()), Some(error.message.as_str())),
            JobOutcome::Completed(_) => (None, None),
        };
        let finished_at = format_timestamp(&timestamp);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        // The event goes in first, while the job still reads as started.
        let event = insert_event(&mut tx, job_id, &[JobStatus::Started], timestamp, payload).await?;
        let Some(event) = event else {
            rollback(tx).await?;
            return Err(self.guard_failure(job_id, next.as_str()).await);
        };

        let updated = sqlx::query(
            r#"
            UPDATE lookup_jobs
            SET status = ?2, finished_at = ?3, error_code = ?4, error_message = ?5
            WHERE id = ?1 AND status = 'started'
            "#,
        )
        .bind(job_id.to_string())
        .bind(next.as_str())
        .bind(&finished_at)
        .bind(error_code)
        .bind(error_message)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if updated.rows_affected() == 0 {
            rollback(tx).await?;
            return Err(self.guard_failure(job_id, next.as_str()).await);
        }

        if let JobOutcome::Completed(result) = outcome {
            sqlx::query(
                r#"
                INSERT INTO lookup_results (job_id, result_json, generated_at)
                VALUES (?1, ?2, ?3)
                "#,
            )
            .bind(job_id.to_string())
            .bind(serde_json::to_string(result)?)
            .bind(format_timestamp(&result.generated_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        }

        commit(tx).await?;
        tracing::debug!(%job_id, status = %next, "Job finished in store");
        Ok(event)
    }

    async fn append_event(
        &self,
        job_id: Uuid,
        timestamp: DateTime<Utc>,
        payload: &EventPayload,
    ) -> Result<ProgressEvent, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let event = insert_event(
            &mut tx,
            job_id,
            &[JobStatus::Queued, JobStatus::Started],
            timestamp,
            payload,
        )
        .await?;
        let Some(event) = event else {
            rollback(tx).await?;
            return Err(match self.get_job(job_id).await? {
                Some(job) => AppError::InvalidTransition(format!(
                    "job {job_id} is {} and accepts no more events",
                    job.status
                )),
                None => AppError::JobNotFound(job_id.to_string()),
            });
        };
        commit(tx).await?;
        Ok(event)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<LookupJob>, AppError> {
        let row = sqlx::query_as::<_, LookupJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM lookup_jobs WHERE id = ?1"
        ))
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(LookupJob::try_from).transpose()
    }

    async fn list_events(&self, job_id: Uuid) -> Result<Vec<ProgressEvent>, AppError> {
        self.list_events_after(job_id, 0).await
    }

    async fn list_events_after(
        &self,
        job_id: Uuid,
        after_seq: u64,
    ) -> Result<Vec<ProgressEvent>, AppError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT seq, event_type, timestamp, payload
            FROM lookup_progress_events
            WHERE job_id = ?1 AND seq > ?2
            ORDER BY seq ASC
            "#,
        )
        .bind(job_id.to_string())
        .bind(after_seq as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(ProgressEvent::try_from).collect()
    }

    async fn get_result(&self, job_id: Uuid) -> Result<Option<LookupResult>, AppError> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT result_json FROM lookup_results WHERE job_id = ?1")
                .bind(job_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    async fn find_active_job(&self, hackathon_url: &str) -> Result<Option<LookupJob>, AppError> {
        let row = sqlx::query_as::<_, LookupJobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM lookup_jobs
            WHERE url = ?1 AND status IN ('queued', 'started')
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#
        ))
        .bind(hackathon_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(LookupJob::try_from).transpose()
    }

    async fn find_completed_since(
        &self,
        hackathon_url: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<LookupJob>, AppError> {
        let row = sqlx::query_as::<_, LookupJobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM lookup_jobs
            WHERE url = ?1 AND status = 'completed' AND finished_at >= ?2
            ORDER BY finished_at DESC
            LIMIT 1
            "#
        ))
        .bind(hackathon_url)
        .bind(format_timestamp(&since))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(LookupJob::try_from).transpose()
    }

    async fn list_jobs_with_status(&self, status: JobStatus) -> Result<Vec<LookupJob>, AppError> {
        let rows = sqlx::query_as::<_, LookupJobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM lookup_jobs
            WHERE status = ?1
            ORDER BY created_at ASC, rowid ASC
            "#
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(LookupJob::try_from).collect()
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}
