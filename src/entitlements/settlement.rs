use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::mpsc::{channel, Sender};
use tracing::{error, info};
use uuid::Uuid;

use crate::config;

use super::error::{LedgerError, LedgerResult};
use super::models::{
    CreditBalance, CreditPackage, PaymentSettlement, SettlementOutcome, Subscription,
    SubscriptionPlan,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementItemType {
    SubscriptionPlan,
    CreditPackage,
}

impl SettlementItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementItemType::SubscriptionPlan => "subscription_plan",
            SettlementItemType::CreditPackage => "credit_package",
        }
    }

    pub fn parse(raw: &str) -> Option<SettlementItemType> {
        match raw {
            "subscription_plan" => Some(SettlementItemType::SubscriptionPlan),
            "credit_package" => Some(SettlementItemType::CreditPackage),
            _ => None,
        }
    }
}

/// Normalized form of one successful-payment signal. Delivery is
/// at-least-once; `payment_ref` is the dedupe key.
#[derive(Debug, Clone)]
pub struct SettlementRequest {
    pub payment_ref: String,
    pub account_id: i32,
    pub item_type: SettlementItemType,
    pub item_id: Uuid,
}

/// key: settlement-service -> exactly-once crediting per payment identifier
#[derive(Clone)]
pub struct SettlementService {
    pool: PgPool,
}

impl SettlementService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Safe to call any number of times for the same `payment_ref`. The
    /// conditional status flip and the crediting share one transaction, so a
    /// crash between them leaves the row `pending` and the provider's retry
    /// converges to the same end state.
    pub async fn settle(&self, request: &SettlementRequest) -> LedgerResult<SettlementOutcome> {
        sqlx::query(
            r#"
            INSERT INTO payment_settlements (id, payment_ref, account_id, item_type, item_id, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            ON CONFLICT (payment_ref) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.payment_ref)
        .bind(request.account_id)
        .bind(request.item_type.as_str())
        .bind(request.item_id)
        .execute(&self.pool)
        .await?;

        let settlement = self
            .find_settlement(&request.payment_ref)
            .await?
            .ok_or(LedgerError::NotFound)?;

        if settlement.item_type != request.item_type.as_str()
            || settlement.item_id != request.item_id
            || settlement.account_id != request.account_id
        {
            return Err(LedgerError::SettlementConflict {
                payment_ref: request.payment_ref.clone(),
                detail: "payment identifier already recorded for a different purchase".into(),
            });
        }

        if settlement.status == "succeeded" {
            return self.recorded_outcome(settlement).await;
        }

        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query_as::<_, PaymentSettlement>(
            r#"
            UPDATE payment_settlements
            SET status = 'succeeded', settled_at = NOW(), updated_at = NOW()
            WHERE payment_ref = $1 AND status <> 'succeeded'
            RETURNING *
            "#,
        )
        .bind(&request.payment_ref)
        .fetch_optional(&mut tx)
        .await?;

        let Some(settlement) = flipped else {
            // a concurrent delivery flipped the row first
            tx.rollback().await?;
            let settlement = self
                .find_settlement(&request.payment_ref)
                .await?
                .ok_or(LedgerError::NotFound)?;
            return self.recorded_outcome(settlement).await;
        };

        let mut outcome = SettlementOutcome {
            already_settled: false,
            settlement,
            subscription: None,
            balance: None,
        };

        match request.item_type {
            SettlementItemType::SubscriptionPlan => {
                let plan = sqlx::query_as::<_, SubscriptionPlan>(
                    "SELECT * FROM subscription_plans WHERE id = $1",
                )
                .bind(request.item_id)
                .fetch_optional(&mut tx)
                .await?
                .ok_or(LedgerError::NotFound)?;
                let subscription =
                    activate_subscription(&mut tx, request.account_id, &plan, Utc::now()).await?;
                outcome.subscription = Some(subscription);
            }
            SettlementItemType::CreditPackage => {
                let package = sqlx::query_as::<_, CreditPackage>(
                    "SELECT * FROM credit_packages WHERE id = $1",
                )
                .bind(request.item_id)
                .fetch_optional(&mut tx)
                .await?
                .ok_or(LedgerError::NotFound)?;
                let balance =
                    credit_purchase(&mut tx, request.account_id, &package, Utc::now()).await?;
                outcome.balance = Some(balance);
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn find_settlement(
        &self,
        payment_ref: &str,
    ) -> LedgerResult<Option<PaymentSettlement>> {
        let settlement = sqlx::query_as::<_, PaymentSettlement>(
            "SELECT * FROM payment_settlements WHERE payment_ref = $1",
        )
        .bind(payment_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(settlement)
    }

    /// Replays what a succeeded settlement activated without touching any
    /// balance again.
    async fn recorded_outcome(
        &self,
        settlement: PaymentSettlement,
    ) -> LedgerResult<SettlementOutcome> {
        let mut outcome = SettlementOutcome {
            already_settled: true,
            subscription: None,
            balance: None,
            settlement,
        };

        match SettlementItemType::parse(&outcome.settlement.item_type) {
            Some(SettlementItemType::SubscriptionPlan) => {
                outcome.subscription = sqlx::query_as::<_, Subscription>(
                    r#"
                    SELECT * FROM subscriptions
                    WHERE account_id = $1
                    ORDER BY updated_at DESC
                    LIMIT 1
                    "#,
                )
                .bind(outcome.settlement.account_id)
                .fetch_optional(&self.pool)
                .await?;
            }
            Some(SettlementItemType::CreditPackage) => {
                outcome.balance = sqlx::query_as::<_, CreditBalance>(
                    r#"
                    SELECT b.* FROM credit_balances b
                    JOIN credit_packages p ON p.credit_type = b.credit_type
                    WHERE b.account_id = $1 AND p.id = $2
                    "#,
                )
                .bind(outcome.settlement.account_id)
                .bind(outcome.settlement.item_id)
                .fetch_optional(&self.pool)
                .await?;
            }
            None => {}
        }

        Ok(outcome)
    }
}

/// Period bounds always restart from the settlement moment; a renewal payment
/// therefore extends from now, not from the old period end.
async fn activate_subscription(
    tx: &mut Transaction<'_, Postgres>,
    account_id: i32,
    plan: &SubscriptionPlan,
    now: DateTime<Utc>,
) -> LedgerResult<Subscription> {
    let existing_id: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM subscriptions WHERE account_id = $1 ORDER BY updated_at DESC LIMIT 1",
    )
    .bind(account_id)
    .fetch_optional(&mut *tx)
    .await?;

    let (status, trial_ends_at) = if existing_id.is_none() && plan.trial_days > 0 {
        (
            "trialing",
            Some(now + Duration::days(plan.trial_days as i64)),
        )
    } else {
        ("active", None)
    };

    let period_end = period_end_from(now, &plan.billing_period);
    let subscription_id = existing_id.unwrap_or_else(Uuid::new_v4);
    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO subscriptions (
            id,
            account_id,
            plan_id,
            status,
            trial_ends_at,
            current_period_start,
            current_period_end
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id)
        DO UPDATE SET
            plan_id = EXCLUDED.plan_id,
            status = EXCLUDED.status,
            trial_ends_at = EXCLUDED.trial_ends_at,
            current_period_start = EXCLUDED.current_period_start,
            current_period_end = EXCLUDED.current_period_end,
            canceled_at = NULL,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(subscription_id)
    .bind(account_id)
    .bind(plan.id)
    .bind(status)
    .bind(trial_ends_at)
    .bind(now)
    .bind(period_end)
    .fetch_one(&mut *tx)
    .await?;

    Ok(subscription)
}

async fn credit_purchase(
    tx: &mut Transaction<'_, Postgres>,
    account_id: i32,
    package: &CreditPackage,
    now: DateTime<Utc>,
) -> LedgerResult<CreditBalance> {
    let expires_at = package
        .validity_days
        .map(|days| now + Duration::days(days as i64));

    // a non-expiring tranche keeps the whole pot non-expiring; otherwise the
    // later window wins
    let balance = sqlx::query_as::<_, CreditBalance>(
        r#"
        INSERT INTO credit_balances (
            id,
            account_id,
            credit_type,
            allocated,
            used,
            purchased,
            purchased_expires_at
        ) VALUES ($1, $2, $3, 0, 0, $4, $5)
        ON CONFLICT (account_id, credit_type)
        DO UPDATE SET
            purchased = credit_balances.purchased + EXCLUDED.purchased,
            purchased_expires_at = CASE
                WHEN credit_balances.purchased_expires_at IS NULL
                  OR EXCLUDED.purchased_expires_at IS NULL THEN NULL
                ELSE GREATEST(credit_balances.purchased_expires_at, EXCLUDED.purchased_expires_at)
            END,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(&package.credit_type)
    .bind(package.total_amount())
    .bind(expires_at)
    .fetch_one(&mut *tx)
    .await?;

    Ok(balance)
}

fn period_end_from(start: DateTime<Utc>, billing_period: &str) -> DateTime<Utc> {
    match billing_period {
        "daily" => start + Duration::days(1),
        "weekly" => start + Duration::days(7),
        "quarterly" => start.checked_add_months(Months::new(3)).unwrap_or(start),
        "annual" | "yearly" => start.checked_add_months(Months::new(12)).unwrap_or(start),
        _ => start.checked_add_months(Months::new(1)).unwrap_or(start),
    }
}

/// key: settlement-adapter -> provider payload normalization
#[async_trait]
pub trait PaymentEventAdapter: Send + Sync {
    fn normalize(&self, account_id: i32, payload: &Value) -> Result<SettlementRequest>;

    async fn settle_event(
        &self,
        service: &SettlementService,
        account_id: i32,
        payload: Value,
    ) -> Result<SettlementOutcome> {
        let request = self.normalize(account_id, &payload)?;
        let outcome = service.settle(&request).await?;
        Ok(outcome)
    }
}

/// Stub for a card/e-wallet checkout provider; real integrations only need to
/// produce the same normalized request.
pub struct CheckoutLikeAdapter;

impl CheckoutLikeAdapter {
    fn required_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str> {
        payload
            .get(field)
            .and_then(|value| value.as_str())
            .ok_or_else(|| anyhow!("{field} missing from payment payload"))
    }
}

#[async_trait]
impl PaymentEventAdapter for CheckoutLikeAdapter {
    fn normalize(&self, account_id: i32, payload: &Value) -> Result<SettlementRequest> {
        let payment_ref = Self::required_str(payload, "payment_ref")?;
        let item_type = Self::required_str(payload, "item_type")?;
        let item_type = SettlementItemType::parse(item_type)
            .ok_or_else(|| anyhow!("unknown settlement item type `{item_type}`"))?;
        let item_id = Self::required_str(payload, "item_id")?;
        let item_id = Uuid::parse_str(item_id)?;

        Ok(SettlementRequest {
            payment_ref: payment_ref.to_string(),
            account_id,
            item_type,
            item_id,
        })
    }
}

/// key: settlement-worker -> webhook-fed background pipeline
#[derive(Debug)]
pub enum SettlementJob {
    PaymentSucceeded { account_id: i32, payload: Value },
}

#[derive(Clone)]
pub struct SettlementHandle {
    sender: Sender<SettlementJob>,
}

impl SettlementHandle {
    pub async fn dispatch(&self, job: SettlementJob) -> Result<()> {
        self.sender
            .send(job)
            .await
            .map_err(|err| anyhow!("failed to enqueue settlement job: {err}"))
    }
}

pub fn start_settlement_worker(pool: PgPool) -> SettlementHandle {
    let (tx, mut rx) = channel(*config::SETTLEMENT_QUEUE_DEPTH);
    tokio::spawn(async move {
        let adapter = CheckoutLikeAdapter;
        let service = SettlementService::new(pool);
        while let Some(job) = rx.recv().await {
            match job {
                SettlementJob::PaymentSucceeded {
                    account_id,
                    payload,
                } => match adapter.settle_event(&service, account_id, payload).await {
                    Ok(outcome) => info!(
                        %account_id,
                        payment_ref = %outcome.settlement.payment_ref,
                        already_settled = outcome.already_settled,
                        "payment settled"
                    ),
                    Err(err) => error!(
                        ?err,
                        %account_id,
                        "failed to settle payment event",
                    ),
                },
            }
        }
    });

    SettlementHandle { sender: tx }
}
