use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::config;

use super::error::{LedgerError, LedgerResult};
use super::models::{ActionKind, CreditOwner};

/// key: reveal-policy -> per-account overlay checked before the gate
///
/// Accounts without a verified-status flag get a bounded number of
/// database-wide reveals per rolling window, regardless of how many purchased
/// credits they hold. Reveals tied to an application the owner's own posting
/// received are exempt. The window is computed from the owner's prior
/// consumption records, so the rule can never drift from the audit ledger.
#[derive(Clone)]
pub struct RevealPolicy {
    pool: PgPool,
    window_days: i64,
    limit: i64,
}

impl RevealPolicy {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            window_days: *config::UNVERIFIED_REVEAL_WINDOW_DAYS,
            limit: *config::UNVERIFIED_REVEAL_LIMIT,
        }
    }

    pub fn with_rule(pool: PgPool, window_days: i64, limit: i64) -> Self {
        Self {
            pool,
            window_days,
            limit,
        }
    }

    pub async fn check(&self, owner: &CreditOwner, action_kind: ActionKind) -> LedgerResult<()> {
        if action_kind != ActionKind::ContactRevealDatabase {
            return Ok(());
        }

        let account_id = owner.account_id();
        let verified_at: Option<Option<DateTime<Utc>>> =
            sqlx::query_scalar("SELECT verified_at FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(verified_at) = verified_at else {
            return Err(LedgerError::NotFound);
        };
        if verified_at.is_some() {
            return Ok(());
        }

        let window_start = Utc::now() - Duration::days(self.window_days);
        let recent: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM consumption_records
            WHERE owner_account_id = $1
              AND action_kind = $2
              AND created_at > $3
            "#,
        )
        .bind(account_id)
        .bind(ActionKind::ContactRevealDatabase.as_str())
        .bind(window_start)
        .fetch_one(&self.pool)
        .await?;

        if recent >= self.limit {
            return Err(LedgerError::PolicyDenied(format!(
                "unverified accounts are limited to {} database reveal(s) per {} days",
                self.limit, self.window_days
            )));
        }
        Ok(())
    }
}
