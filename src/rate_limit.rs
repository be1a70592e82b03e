use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

/// key: rate-limit -> store-backed TTL counter
///
/// Counters live in the database, not in process memory, so every service
/// instance sees the same window. One conditional upsert either extends a
/// live window or restarts an expired one.
#[derive(Clone)]
pub struct RateLimiter {
    pool: PgPool,
}

impl RateLimiter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn is_locked(
        &self,
        key: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let locked: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT hits >= $2 FROM rate_limit_counters
            WHERE counter_key = $1 AND window_expires_at > $3
            "#,
        )
        .bind(key)
        .bind(limit)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(locked.unwrap_or(false))
    }

    /// Returns the hit count inside the current window, including this one.
    pub async fn record_failure(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        let expires_at = now + window;
        let hits: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO rate_limit_counters (counter_key, hits, window_expires_at)
            VALUES ($1, 1, $2)
            ON CONFLICT (counter_key) DO UPDATE SET
                hits = CASE
                    WHEN rate_limit_counters.window_expires_at <= $3 THEN 1
                    ELSE rate_limit_counters.hits + 1
                END,
                window_expires_at = CASE
                    WHEN rate_limit_counters.window_expires_at <= $3 THEN $2
                    ELSE rate_limit_counters.window_expires_at
                END
            RETURNING hits
            "#,
        )
        .bind(key)
        .bind(expires_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(hits)
    }

    pub async fn clear(&self, key: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM rate_limit_counters WHERE counter_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
