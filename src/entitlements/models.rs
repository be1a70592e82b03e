use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// key: ledger-credit-types -> scarce actions gated by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditType {
    ResumeContact,
    AiAnalysis,
    JobPosting,
}

impl CreditType {
    pub const ALL: [CreditType; 3] = [
        CreditType::ResumeContact,
        CreditType::AiAnalysis,
        CreditType::JobPosting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CreditType::ResumeContact => "resume_contact",
            CreditType::AiAnalysis => "ai_analysis",
            CreditType::JobPosting => "job_posting",
        }
    }

    pub fn parse(raw: &str) -> Option<CreditType> {
        match raw {
            "resume_contact" => Some(CreditType::ResumeContact),
            "ai_analysis" => Some(CreditType::AiAnalysis),
            "job_posting" => Some(CreditType::JobPosting),
            _ => None,
        }
    }
}

/// key: ledger-action-kinds -> reveal registry keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Reveal sourced from the candidate database, not tied to an application.
    ContactRevealDatabase,
    /// Reveal of an applicant to one of the owner's own postings.
    ContactRevealApplication,
    AiAnalysis,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ContactRevealDatabase => "contact_reveal_database",
            ActionKind::ContactRevealApplication => "contact_reveal_application",
            ActionKind::AiAnalysis => "ai_analysis",
        }
    }

    pub fn parse(raw: &str) -> Option<ActionKind> {
        match raw {
            "contact_reveal_database" => Some(ActionKind::ContactRevealDatabase),
            "contact_reveal_application" => Some(ActionKind::ContactRevealApplication),
            "ai_analysis" => Some(ActionKind::AiAnalysis),
            _ => None,
        }
    }

    pub fn credit_type(&self) -> CreditType {
        match self {
            ActionKind::ContactRevealDatabase | ActionKind::ContactRevealApplication => {
                CreditType::ResumeContact
            }
            ActionKind::AiAnalysis => CreditType::AiAnalysis,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionSource {
    Subscription,
    Credit,
}

impl ConsumptionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumptionSource::Subscription => "subscription",
            ConsumptionSource::Credit => "credit",
        }
    }

    pub fn parse(raw: &str) -> Option<ConsumptionSource> {
        match raw {
            "subscription" => Some(ConsumptionSource::Subscription),
            "credit" => Some(ConsumptionSource::Credit),
            _ => None,
        }
    }
}

/// key: credit-owner -> balance resolution target
///
/// Sub-account seats never own balances; every consumption and settlement
/// resolves to exactly one owning account before touching a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOwner {
    Direct { account_id: i32 },
    Delegated { parent_account_id: i32 },
}

impl CreditOwner {
    pub fn account_id(&self) -> i32 {
        match self {
            CreditOwner::Direct { account_id } => *account_id,
            CreditOwner::Delegated { parent_account_id } => *parent_account_id,
        }
    }
}

/// key: ledger-models -> plans,allowances,subscriptions
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub billing_period: String,
    pub price_cents: i32,
    pub trial_days: i32,
    pub active: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PlanAllowance {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub credit_type: String,
    pub limit_quantity: i64,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub account_id: i32,
    pub plan_id: Uuid,
    pub status: String,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.status != "active" && self.status != "trialing" {
            return false;
        }
        if let Some(end) = self.current_period_end {
            if end < now {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CreditPackage {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub credit_type: String,
    pub base_amount: i64,
    pub bonus_amount: i64,
    pub price_cents: i32,
    pub validity_days: Option<i32>,
    pub active: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreditPackage {
    pub fn total_amount(&self) -> i64 {
        self.base_amount + self.bonus_amount
    }
}

/// key: ledger-balance-model -> per (account, credit type) row
///
/// `allocated`/`used` are subscription quota scoped to `period_start`;
/// `purchased` survives period rollover and may carry an expiry.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CreditBalance {
    pub id: Uuid,
    pub account_id: i32,
    pub credit_type: String,
    pub allocated: i64,
    pub used: i64,
    pub purchased: i64,
    pub period_start: Option<DateTime<Utc>>,
    pub purchased_expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CreditBalance {
    pub fn subscription_remaining(&self) -> i64 {
        (self.allocated - self.used).max(0)
    }
}

/// Immutable audit row; one per paid action, never mutated after insert.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ConsumptionRecord {
    pub id: Uuid,
    pub actor_account_id: i32,
    pub owner_account_id: i32,
    pub action_kind: String,
    pub target_ref: String,
    pub source: String,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentSettlement {
    pub id: Uuid,
    pub payment_ref: String,
    pub account_id: i32,
    pub item_type: String,
    pub item_id: Uuid,
    pub status: String,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of one gate decision. `source` is `Credit` as soon as any purchased
/// credits were spent; a draw that fits entirely inside the subscription
/// quota reports `Subscription`.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumeOutcome {
    pub source: ConsumptionSource,
    pub subscription_debited: i64,
    pub credit_debited: i64,
    pub subscription_remaining: i64,
    pub purchased_remaining: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceEntry {
    pub credit_type: CreditType,
    pub subscription_remaining: i64,
    pub purchased: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevealOutcome {
    pub already_paid: bool,
    pub record: ConsumptionRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementOutcome {
    pub already_settled: bool,
    pub settlement: PaymentSettlement,
    pub subscription: Option<Subscription>,
    pub balance: Option<CreditBalance>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reveal_kinds_draw_from_resume_contact() {
        assert_eq!(
            ActionKind::ContactRevealDatabase.credit_type(),
            CreditType::ResumeContact
        );
        assert_eq!(
            ActionKind::ContactRevealApplication.credit_type(),
            CreditType::ResumeContact
        );
        assert_eq!(ActionKind::AiAnalysis.credit_type(), CreditType::AiAnalysis);
    }

    #[test]
    fn credit_type_round_trips_through_storage_form() {
        for credit_type in CreditType::ALL {
            assert_eq!(CreditType::parse(credit_type.as_str()), Some(credit_type));
        }
        assert_eq!(CreditType::parse("unknown"), None);
    }

    #[test]
    fn expired_subscription_is_not_active() {
        let now = Utc::now();
        let subscription = Subscription {
            id: Uuid::new_v4(),
            account_id: 1,
            plan_id: Uuid::new_v4(),
            status: "active".into(),
            trial_ends_at: None,
            current_period_start: now - chrono::Duration::days(60),
            current_period_end: Some(now - chrono::Duration::days(30)),
            canceled_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(!subscription.is_active(now));
    }
}
