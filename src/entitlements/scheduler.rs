use anyhow::Result;
use chrono::{DateTime, Duration, Months, Utc};
use sqlx::{FromRow, PgPool};
use tokio::time::{self, Duration as TokioDuration};
use tracing::{debug, info, warn};

use crate::config;

use super::service::LedgerService;

/// key: subscription-expiry-scheduler -> lapse automation
pub fn spawn(pool: PgPool) {
    let interval = TokioDuration::from_secs(*config::SUBSCRIPTION_EXPIRY_SCAN_INTERVAL_SECS);

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = process_tick(&pool, Utc::now()).await {
                warn!(?err, "subscription expiry tick failed");
            }
        }
    });
}

/// Marks lapsed `trialing`/`active` subscriptions `expired`. Rows are never
/// deleted; the consumption gate stops honoring their quota as soon as the
/// status flips.
pub async fn process_tick(pool: &PgPool, now: DateTime<Utc>) -> Result<()> {
    let service = LedgerService::new(pool.clone());
    let candidates = sqlx::query_as::<_, ExpiryCandidate>(
        r#"
        SELECT
            s.id,
            s.account_id,
            s.status,
            s.trial_ends_at,
            s.current_period_start,
            s.current_period_end,
            p.billing_period
        FROM subscriptions s
        JOIN subscription_plans p ON p.id = s.plan_id
        WHERE s.status IN ('trialing', 'active')
        "#,
    )
    .fetch_all(pool)
    .await?;

    for record in candidates {
        let mut lapsed = false;
        if record.status == "trialing" {
            if let Some(trial_end) = record.trial_ends_at {
                if trial_end < now {
                    lapsed = true;
                }
            }
        }

        let expected_end = compute_period_end(
            record.current_period_start,
            record.current_period_end,
            &record.billing_period,
        );
        if expected_end < now {
            lapsed = true;
        }

        if lapsed {
            match service.mark_subscription_expired(record.id).await {
                Ok(Some(subscription)) => info!(
                    account_id = subscription.account_id,
                    subscription = %subscription.id,
                    "marked subscription expired"
                ),
                Ok(None) => {}
                Err(err) => warn!(
                    ?err,
                    account_id = record.account_id,
                    "failed to mark subscription expired"
                ),
            }
        } else {
            debug!(
                account_id = record.account_id,
                status = %record.status,
                "subscription within its period"
            );
        }
    }

    Ok(())
}

#[derive(Debug, FromRow)]
struct ExpiryCandidate {
    id: uuid::Uuid,
    account_id: i32,
    status: String,
    trial_ends_at: Option<DateTime<Utc>>,
    current_period_start: DateTime<Utc>,
    current_period_end: Option<DateTime<Utc>>,
    billing_period: String,
}

fn compute_period_end(
    current_period_start: DateTime<Utc>,
    explicit_end: Option<DateTime<Utc>>,
    billing_period: &str,
) -> DateTime<Utc> {
    if let Some(end) = explicit_end {
        return end;
    }

    match billing_period {
        "daily" => current_period_start
            .checked_add_signed(Duration::days(1))
            .unwrap_or(current_period_start),
        "weekly" => current_period_start
            .checked_add_signed(Duration::days(7))
            .unwrap_or(current_period_start),
        "quarterly" => current_period_start
            .checked_add_months(Months::new(3))
            .unwrap_or(current_period_start),
        "annual" | "yearly" => current_period_start
            .checked_add_months(Months::new(12))
            .unwrap_or(current_period_start),
        _ => current_period_start
            .checked_add_months(Months::new(1))
            .unwrap_or(current_period_start),
    }
}
