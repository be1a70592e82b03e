use axum::{
    extract::{Extension, Path},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::accounts::resolve_credit_owner;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

use super::catalog::{self, PlanCatalogEntry};
use super::models::{
    ActionKind, BalanceEntry, ConsumeOutcome, ConsumptionRecord, CreditPackage, CreditType,
    PlanAllowance, Subscription, SubscriptionPlan,
};
use super::reveal::RevealService;
use super::service::LedgerService;

/// key: ledger-api -> rest endpoints over the engine

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account_id: i32,
    pub balances: Vec<BalanceEntry>,
}

pub async fn get_balance(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path(account_id): Path<i32>,
) -> AppResult<Json<BalanceResponse>> {
    let requester = resolve_credit_owner(&pool, user_id).await?;
    if user_id != account_id && requester.account_id() != account_id {
        return Err(AppError::Forbidden);
    }

    let owner = resolve_credit_owner(&pool, account_id).await?;
    let balances = LedgerService::new(pool)
        .balance_snapshot(&owner)
        .await?;
    Ok(Json(BalanceResponse {
        account_id: owner.account_id(),
        balances,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    pub credit_type: CreditType,
    #[serde(default = "default_amount")]
    pub amount: i64,
}

fn default_amount() -> i64 {
    1
}

pub async fn consume(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Json(payload): Json<ConsumeRequest>,
) -> AppResult<Json<ConsumeOutcome>> {
    let owner = resolve_credit_owner(&pool, user_id).await?;
    let outcome = LedgerService::new(pool)
        .consume(&owner, payload.credit_type, payload.amount)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct RevealRequest {
    pub action_kind: ActionKind,
    pub target_ref: String,
}

#[derive(Debug, Serialize)]
pub struct RevealResponse {
    pub already_paid: bool,
    pub record: ConsumptionRecord,
}

pub async fn reveal(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Json(payload): Json<RevealRequest>,
) -> AppResult<Json<RevealResponse>> {
    if payload.target_ref.trim().is_empty() {
        return Err(AppError::BadRequest("target_ref required".into()));
    }

    let owner = resolve_credit_owner(&pool, user_id).await?;
    let outcome = RevealService::new(pool)
        .reveal_or_charge(user_id, &owner, payload.action_kind, &payload.target_ref)
        .await?;
    Ok(Json(RevealResponse {
        already_paid: outcome.already_paid,
        record: outcome.record,
    }))
}

pub async fn list_plans(
    Extension(pool): Extension<PgPool>,
) -> AppResult<Json<Vec<PlanCatalogEntry>>> {
    catalog::ensure_seeded(&pool)
        .await
        .map_err(|e| AppError::Message(e.to_string()))?;
    let entries = catalog::plan_catalog(&pool)
        .await
        .map_err(|e| AppError::Message(e.to_string()))?;
    Ok(Json(entries))
}

pub async fn list_packages(
    Extension(pool): Extension<PgPool>,
) -> AppResult<Json<Vec<CreditPackage>>> {
    catalog::ensure_seeded(&pool)
        .await
        .map_err(|e| AppError::Message(e.to_string()))?;
    let packages = catalog::package_catalog(&pool)
        .await
        .map_err(|e| AppError::Message(e.to_string()))?;
    Ok(Json(packages))
}

#[derive(Debug, Serialize)]
pub struct SubscriptionEnvelope {
    pub subscription: Subscription,
    pub plan: SubscriptionPlan,
    pub allowances: Vec<PlanAllowance>,
}

pub async fn get_subscription(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path(account_id): Path<i32>,
) -> AppResult<Json<Option<SubscriptionEnvelope>>> {
    let requester = resolve_credit_owner(&pool, user_id).await?;
    if user_id != account_id && requester.account_id() != account_id {
        return Err(AppError::Forbidden);
    }

    let owner = resolve_credit_owner(&pool, account_id).await?;
    let service = LedgerService::new(pool.clone());
    let Some((subscription, plan)) = service
        .active_subscription(owner.account_id(), Utc::now())
        .await?
    else {
        return Ok(Json(None));
    };

    let allowances = sqlx::query_as::<_, PlanAllowance>(
        "SELECT * FROM plan_allowances WHERE plan_id = $1 ORDER BY credit_type ASC",
    )
    .bind(plan.id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(Some(SubscriptionEnvelope {
        subscription,
        plan,
        allowances,
    })))
}

pub async fn cancel_subscription(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<Subscription>> {
    let owner = resolve_credit_owner(&pool, user_id).await?;
    let subscription = LedgerService::new(pool)
        .cancel_subscription(owner.account_id())
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(subscription))
}
