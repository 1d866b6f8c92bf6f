use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use sqlx::SqlitePool;

use hackaplan_core::error::AppError;
use hackaplan_core::traits::AdmissionLedger;
use hackaplan_core::util::{format_timestamp, parse_timestamp};

/// Audit counters for admitted lookups, bucketed per identity and hour.
///
/// Admission itself is decided in memory; this table only records it.
#[derive(Clone)]
pub struct RateLimitRepository {
    pool: SqlitePool,
}

const BUCKET: TimeDelta = TimeDelta::hours(1);

fn hour_bucket(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(BUCKET).unwrap_or(at)
}

impl RateLimitRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Count one admitted request for `identity_hash` in the hour containing `at`.
    pub async fn record(&self, identity_hash: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO rate_limit_events (identity_hash, window_start, count)
            VALUES (?1, ?2, 1)
            ON CONFLICT (identity_hash, window_start) DO UPDATE SET count = count + 1
            "#,
        )
        .bind(identity_hash)
        .bind(format_timestamp(&hour_bucket(at)))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Requests recorded for `identity_hash` in buckets starting at or after
    /// the bucket containing `since`.
    pub async fn count_since(
        &self,
        identity_hash: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(count), 0) FROM rate_limit_events
            WHERE identity_hash = ?1 AND window_start >= ?2
            "#,
        )
        .bind(identity_hash)
        .bind(format_timestamp(&hour_bucket(since)))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(total as u64)
    }

    /// Delete buckets that started before `cutoff`. Returns rows removed.
    pub async fn prune(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM rate_limit_events WHERE window_start < ?1")
            .bind(format_timestamp(&cutoff))
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

impl AdmissionLedger for RateLimitRepository {
    async fn record(&self, identity: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        RateLimitRepository::record(self, identity, at).await
    }

    /// One tally per hourly bucket, stamped with the bucket's end.
    async fn admissions_since(
        &self,
        identity: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, u32)>, AppError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT window_start, count FROM rate_limit_events
            WHERE identity_hash = ?1 AND window_start >= ?2
            ORDER BY window_start ASC
            "#,
        )
        .bind(identity)
        .bind(format_timestamp(&hour_bucket(since)))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(|(window_start, count)| {
                let end = parse_timestamp(&window_start)? + BUCKET;
                Ok((end, u32::try_from(count).unwrap_or(u32::MAX)))
            })
            .collect()
    }
}
