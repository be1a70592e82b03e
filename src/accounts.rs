use axum::{extract::Path, Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::entitlements::CreditOwner;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Account {
    pub id: i32,
    pub email: String,
    pub role: String,
    pub parent_account_id: Option<i32>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub async fn fetch_account(pool: &PgPool, account_id: i32) -> AppResult<Account> {
    let account = sqlx::query_as::<_, Account>(
        "SELECT id, email, role, parent_account_id, verified_at, created_at FROM accounts WHERE id = $1",
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound)?;
    Ok(account)
}

/// Resolves the account whose balances a request actually touches. A
/// `sub_user` seat delegates to its parent; everyone else owns their own
/// ledger. Resolved once per request and threaded explicitly from there.
pub async fn resolve_credit_owner(pool: &PgPool, account_id: i32) -> AppResult<CreditOwner> {
    let row: Option<(String, Option<i32>)> =
        sqlx::query_as("SELECT role, parent_account_id FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(pool)
            .await?;
    let (role, parent_account_id) = row.ok_or(AppError::NotFound)?;

    match (role.as_str(), parent_account_id) {
        ("sub_user", Some(parent_account_id)) => Ok(CreditOwner::Delegated { parent_account_id }),
        _ => Ok(CreditOwner::Direct { account_id }),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSeatRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SeatInfo {
    pub id: i32,
    pub email: String,
    pub parent_account_id: i32,
}

/// Seats act on behalf of the employer account that created them; they never
/// own balances of their own.
pub async fn create_seat(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, role }: AuthUser,
    Json(payload): Json<CreateSeatRequest>,
) -> AppResult<Json<SeatInfo>> {
    if role == "sub_user" {
        return Err(AppError::Forbidden);
    }
    if payload.password.len() < 8 {
        return Err(AppError::BadRequest("Password too short".into()));
    }

    let hash = crate::auth::hash_password(&payload.password)?;
    let result = sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO accounts (email, password_hash, role, parent_account_id)
        VALUES ($1, $2, 'sub_user', $3)
        RETURNING id
        "#,
    )
    .bind(&payload.email)
    .bind(hash)
    .bind(user_id)
    .fetch_one(&pool)
    .await;

    match result {
        Ok(id) => Ok(Json(SeatInfo {
            id,
            email: payload.email,
            parent_account_id: user_id,
        })),
        Err(e) => {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("accounts_email_key") {
                    return Err(AppError::BadRequest("Email already registered".into()));
                }
            }
            Err(AppError::Db(e))
        }
    }
}

/// Inlet for the document-verification collaborator: flips the verified flag
/// the reveal policy consumes.
pub async fn verify_account(
    Extension(pool): Extension<PgPool>,
    AuthUser { role, .. }: AuthUser,
    Path(account_id): Path<i32>,
) -> AppResult<Json<Account>> {
    if role != "admin" {
        return Err(AppError::Forbidden);
    }

    sqlx::query("UPDATE accounts SET verified_at = NOW() WHERE id = $1 AND verified_at IS NULL")
        .bind(account_id)
        .execute(&pool)
        .await?;

    let account = fetch_account(&pool, account_id).await?;
    tracing::info!(%account_id, "account marked verified");
    Ok(Json(account))
}
