use sqlx::PgPool;
use uuid::Uuid;

use super::error::{LedgerError, LedgerResult};
use super::models::{ActionKind, ConsumptionRecord, CreditOwner, RevealOutcome};
use super::policy::RevealPolicy;
use super::service::LedgerService;

/// key: reveal-registry -> idempotent paid-action ledger
///
/// The unique index on (owner_account_id, target_ref, action_kind) is the
/// sole arbiter of "has this already been charged". Application code only
/// ever inserts through `ON CONFLICT DO NOTHING`; a lookup-then-insert race
/// is settled by the constraint, never by the lookup.
#[derive(Clone)]
pub struct RevealService {
    pool: PgPool,
    ledger: LedgerService,
    policy: RevealPolicy,
}

impl RevealService {
    pub fn new(pool: PgPool) -> Self {
        let ledger = LedgerService::new(pool.clone());
        let policy = RevealPolicy::new(pool.clone());
        Self {
            pool,
            ledger,
            policy,
        }
    }

    pub fn with_policy(pool: PgPool, policy: RevealPolicy) -> Self {
        let ledger = LedgerService::new(pool.clone());
        Self {
            pool,
            ledger,
            policy,
        }
    }

    /// Retries, page refreshes and concurrent duplicate clicks all land here;
    /// only the first insert for a given (owner, target, kind) pays.
    pub async fn reveal_or_charge(
        &self,
        actor_account_id: i32,
        owner: &CreditOwner,
        action_kind: ActionKind,
        target_ref: &str,
    ) -> LedgerResult<RevealOutcome> {
        let owner_id = owner.account_id();

        if let Some(record) = self.find_record(owner_id, action_kind, target_ref).await? {
            return Ok(RevealOutcome {
                already_paid: true,
                record,
            });
        }

        self.policy.check(owner, action_kind).await?;

        let credit_type = action_kind.credit_type();
        let outcome = self.ledger.consume(owner, credit_type, 1).await?;

        let inserted = sqlx::query_as::<_, ConsumptionRecord>(
            r#"
            INSERT INTO consumption_records (
                id,
                actor_account_id,
                owner_account_id,
                action_kind,
                target_ref,
                source,
                amount
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (owner_account_id, target_ref, action_kind) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(actor_account_id)
        .bind(owner_id)
        .bind(action_kind.as_str())
        .bind(target_ref)
        .bind(outcome.source.as_str())
        .bind(1_i64)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(record) => Ok(RevealOutcome {
                already_paid: false,
                record,
            }),
            None => {
                // a concurrent duplicate won the insert; hand the unit back
                // and replay the winner's record
                tracing::info!(
                    %owner_id,
                    action_kind = action_kind.as_str(),
                    target_ref,
                    "reveal lost insert race, reversing debit"
                );
                self.ledger
                    .reverse(owner, credit_type, outcome.source, 1)
                    .await?;
                let record = self
                    .find_record(owner_id, action_kind, target_ref)
                    .await?
                    .ok_or(LedgerError::NotFound)?;
                Ok(RevealOutcome {
                    already_paid: true,
                    record,
                })
            }
        }
    }

    async fn find_record(
        &self,
        owner_account_id: i32,
        action_kind: ActionKind,
        target_ref: &str,
    ) -> LedgerResult<Option<ConsumptionRecord>> {
        let record = sqlx::query_as::<_, ConsumptionRecord>(
            r#"
            SELECT * FROM consumption_records
            WHERE owner_account_id = $1
              AND target_ref = $2
              AND action_kind = $3
            "#,
        )
        .bind(owner_account_id)
        .bind(target_ref)
        .bind(action_kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }
}
