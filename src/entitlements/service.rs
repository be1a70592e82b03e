use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::error::{LedgerError, LedgerResult};
use super::models::{
    BalanceEntry, ConsumeOutcome, ConsumptionSource, CreditOwner, CreditType, PlanAllowance,
    Subscription, SubscriptionPlan,
};

/// key: ledger-service -> balance store and consumption gate
///
/// Every mutation is either a single conditional UPDATE or a short
/// row-locked transaction against the store, so concurrent requests,
/// possibly from different processes, can never push `used` past `allocated`
/// or `purchased` below zero. The CHECK constraints on `credit_balances` are
/// the second fence.
#[derive(Clone)]
pub struct LedgerService {
    pool: PgPool,
}

impl LedgerService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn active_subscription(
        &self,
        account_id: i32,
        now: DateTime<Utc>,
    ) -> LedgerResult<Option<(Subscription, SubscriptionPlan)>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE account_id = $1
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(subscription) = subscription else {
            return Ok(None);
        };
        if !subscription.is_active(now) {
            return Ok(None);
        }

        let plan =
            sqlx::query_as::<_, SubscriptionPlan>("SELECT * FROM subscription_plans WHERE id = $1")
                .bind(subscription.plan_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(LedgerError::NotFound)?;

        Ok(Some((subscription, plan)))
    }

    pub async fn plan_allowance(
        &self,
        plan_id: Uuid,
        credit_type: CreditType,
    ) -> LedgerResult<Option<PlanAllowance>> {
        let allowance = sqlx::query_as::<_, PlanAllowance>(
            "SELECT * FROM plan_allowances WHERE plan_id = $1 AND credit_type = $2",
        )
        .bind(plan_id)
        .bind(credit_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(allowance)
    }

    /// Lazily creates the balance row and re-aligns the subscription quota
    /// columns with the current period. `used` resets exactly once per
    /// rollover because the guard compares `period_start` against the
    /// subscription's current period.
    async fn refresh_balance(
        &self,
        account_id: i32,
        credit_type: CreditType,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        let subscription = self.active_subscription(account_id, now).await?;

        let (allocated, period_start) = match &subscription {
            Some((subscription, _plan)) => {
                let allowance = self
                    .plan_allowance(subscription.plan_id, credit_type)
                    .await?;
                let limit = allowance.map(|a| a.limit_quantity).unwrap_or(0);
                (limit, Some(subscription.current_period_start))
            }
            None => (0, None),
        };

        sqlx::query(
            r#"
            INSERT INTO credit_balances (id, account_id, credit_type, allocated, used, purchased, period_start)
            VALUES ($1, $2, $3, $4, 0, 0, $5)
            ON CONFLICT (account_id, credit_type) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(credit_type.as_str())
        .bind(allocated)
        .bind(period_start)
        .execute(&self.pool)
        .await?;

        match period_start {
            Some(period_start) => {
                sqlx::query(
                    r#"
                    UPDATE credit_balances
                    SET allocated = $4, used = 0, period_start = $3, updated_at = NOW()
                    WHERE account_id = $1
                      AND credit_type = $2
                      AND period_start IS DISTINCT FROM $3
                    "#,
                )
                .bind(account_id)
                .bind(credit_type.as_str())
                .bind(period_start)
                .bind(allocated)
                .execute(&self.pool)
                .await?;
            }
            None => {
                // no live subscription: lapsed quota must not stay consumable
                sqlx::query(
                    r#"
                    UPDATE credit_balances
                    SET allocated = 0, used = 0, period_start = NULL, updated_at = NOW()
                    WHERE account_id = $1
                      AND credit_type = $2
                      AND period_start IS NOT NULL
                    "#,
                )
                .bind(account_id)
                .bind(credit_type.as_str())
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    /// Subscription quota is always drawn before purchased credits; quota has
    /// no monetary carry-over value, purchased credits do. A request larger
    /// than the remaining quota drains the quota and takes the rest from the
    /// purchased pot, or fails whole if the pot cannot cover the rest.
    ///
    /// The row lock spans the shortfall check and the debit, and the UPDATE
    /// keeps its own ceiling guard, so two requests racing on the same
    /// account cannot both succeed past `allocated`.
    pub async fn consume(
        &self,
        owner: &CreditOwner,
        credit_type: CreditType,
        amount: i64,
    ) -> LedgerResult<ConsumeOutcome> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let account_id = owner.account_id();
        self.refresh_balance(account_id, credit_type, Utc::now())
            .await?;

        let mut tx = self.pool.begin().await?;

        let row: Option<(i64, i64, i64, Option<DateTime<Utc>>)> = sqlx::query_as(
            r#"
            SELECT allocated, used, purchased, purchased_expires_at
            FROM credit_balances
            WHERE account_id = $1 AND credit_type = $2
            FOR UPDATE
            "#,
        )
        .bind(account_id)
        .bind(credit_type.as_str())
        .fetch_optional(&mut tx)
        .await?;

        let Some((allocated, used, purchased, purchased_expires_at)) = row else {
            tx.rollback().await?;
            return Err(LedgerError::InsufficientBalance {
                subscription_remaining: 0,
                purchased: 0,
            });
        };

        let now = Utc::now();
        let available_purchased = match purchased_expires_at {
            Some(expiry) if expiry <= now => 0,
            _ => purchased,
        };
        let subscription_remaining = (allocated - used).max(0);
        let subscription_debited = subscription_remaining.min(amount);
        let credit_debited = amount - subscription_debited;

        if credit_debited > available_purchased {
            tx.rollback().await?;
            return Err(LedgerError::InsufficientBalance {
                subscription_remaining,
                purchased: available_purchased,
            });
        }

        let debited = sqlx::query(
            r#"
            UPDATE credit_balances
            SET used = used + $3, purchased = purchased - $4, updated_at = NOW()
            WHERE account_id = $1
              AND credit_type = $2
              AND used + $3 <= allocated
              AND purchased >= $4
            "#,
        )
        .bind(account_id)
        .bind(credit_type.as_str())
        .bind(subscription_debited)
        .bind(credit_debited)
        .execute(&mut tx)
        .await?;

        if debited.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(LedgerError::InsufficientBalance {
                subscription_remaining,
                purchased: available_purchased,
            });
        }
        tx.commit().await?;

        let source = if credit_debited == 0 {
            ConsumptionSource::Subscription
        } else {
            ConsumptionSource::Credit
        };
        Ok(ConsumeOutcome {
            source,
            subscription_debited,
            credit_debited,
            subscription_remaining: subscription_remaining - subscription_debited,
            purchased_remaining: available_purchased - credit_debited,
        })
    }

    /// Compensating update for the reveal registry's lost-race path. Only ever
    /// called with the source and amount of a debit that committed moments
    /// earlier in the same request.
    pub async fn reverse(
        &self,
        owner: &CreditOwner,
        credit_type: CreditType,
        source: ConsumptionSource,
        amount: i64,
    ) -> LedgerResult<()> {
        let account_id = owner.account_id();
        let result = match source {
            ConsumptionSource::Subscription => {
                sqlx::query(
                    r#"
                    UPDATE credit_balances
                    SET used = used - $3, updated_at = NOW()
                    WHERE account_id = $1 AND credit_type = $2 AND used >= $3
                    "#,
                )
                .bind(account_id)
                .bind(credit_type.as_str())
                .bind(amount)
                .execute(&self.pool)
                .await?
            }
            ConsumptionSource::Credit => {
                sqlx::query(
                    r#"
                    UPDATE credit_balances
                    SET purchased = purchased + $3, updated_at = NOW()
                    WHERE account_id = $1 AND credit_type = $2
                    "#,
                )
                .bind(account_id)
                .bind(credit_type.as_str())
                .bind(amount)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            // a period rollover between debit and reversal can void the guard
            tracing::warn!(
                %account_id,
                credit_type = credit_type.as_str(),
                source = source.as_str(),
                amount,
                "ledger reversal found no row to compensate"
            );
        }
        Ok(())
    }

    /// Snapshot for UI display, one entry per credit type. Lazily
    /// materializes and refreshes balance rows so the numbers reflect the
    /// current period.
    pub async fn balance_snapshot(&self, owner: &CreditOwner) -> LedgerResult<Vec<BalanceEntry>> {
        let account_id = owner.account_id();
        let now = Utc::now();
        let mut entries = Vec::with_capacity(CreditType::ALL.len());
        for credit_type in CreditType::ALL {
            self.refresh_balance(account_id, credit_type, now).await?;
            let row: Option<(i64, i64)> = sqlx::query_as(
                r#"
                SELECT
                    GREATEST(allocated - used, 0),
                    CASE
                        WHEN purchased_expires_at IS NOT NULL AND purchased_expires_at <= NOW() THEN 0
                        ELSE purchased
                    END
                FROM credit_balances
                WHERE account_id = $1 AND credit_type = $2
                "#,
            )
            .bind(account_id)
            .bind(credit_type.as_str())
            .fetch_optional(&self.pool)
            .await?;
            let (subscription_remaining, purchased) = row.unwrap_or((0, 0));
            entries.push(BalanceEntry {
                credit_type,
                subscription_remaining,
                purchased,
            });
        }
        Ok(entries)
    }

    pub async fn cancel_subscription(
        &self,
        account_id: i32,
    ) -> LedgerResult<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = 'canceled', canceled_at = NOW(), updated_at = NOW()
            WHERE account_id = $1 AND status IN ('trialing', 'active')
            RETURNING *
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(subscription)
    }

    pub async fn mark_subscription_expired(
        &self,
        subscription_id: Uuid,
    ) -> LedgerResult<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = 'expired', updated_at = NOW()
            WHERE id = $1 AND status IN ('trialing', 'active')
            RETURNING *
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(subscription)
    }
}
