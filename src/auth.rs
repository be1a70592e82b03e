use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::error;

use crate::config;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::rate_limit::RateLimiter;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
struct Claims {
    sub: i32,
    role: String,
    exp: usize,
}

#[derive(Serialize)]
pub struct AccountInfo {
    pub id: i32,
    pub email: String,
    pub role: String,
    pub parent_account_id: Option<i32>,
    pub verified: bool,
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Message(format!("Hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

pub async fn register_account(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<StatusCode> {
    if payload.password.len() < 8 {
        return Err(AppError::BadRequest("Password too short".into()));
    }
    let hash = hash_password(&payload.password)?;
    let result = sqlx::query("INSERT INTO accounts (email, password_hash) VALUES ($1, $2)")
        .bind(&payload.email)
        .bind(hash)
        .execute(&pool)
        .await;
    match result {
        Ok(_) => Ok(StatusCode::CREATED),
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

pub async fn login_account(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, &'static str)> {
    let limiter = RateLimiter::new(pool.clone());
    let lockout_key = format!("login:{}", payload.email);
    let now = Utc::now();
    if limiter
        .is_locked(&lockout_key, *config::LOGIN_FAILURE_LIMIT, now)
        .await?
    {
        return Err(AppError::RateLimited);
    }

    let rec = sqlx::query("SELECT id, password_hash, role FROM accounts WHERE email = $1")
        .bind(&payload.email)
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error while fetching account");
            AppError::Db(e)
        })?;
    let Some(rec) = rec else {
        record_login_failure(&limiter, &lockout_key, now).await?;
        return Err(AppError::Unauthorized);
    };
    let id: i32 = rec.get("id");
    let pass_hash: String = rec.get("password_hash");
    let role: String = rec.get("role");
    let parsed = PasswordHash::new(&pass_hash).map_err(|e| {
        error!(?e, "Hash parse error");
        AppError::Message(format!("Hash error: {}", e))
    })?;
    if Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed)
        .is_err()
    {
        record_login_failure(&limiter, &lockout_key, now).await?;
        return Err(AppError::Unauthorized);
    }
    limiter.clear(&lockout_key).await?;

    let exp = expiry_timestamp(now);
    let claims = Claims {
        sub: id,
        role: role.clone(),
        exp,
    };
    let secret = config::JWT_SECRET.as_str();
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        error!(?e, "Token encoding error");
        AppError::Message("Token error".into())
    })?;
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::SET_COOKIE,
        format!("auth_token={token}; HttpOnly; Secure; SameSite=Strict; Path=/")
            .parse()
            .expect("valid header value"),
    );
    Ok((headers, "Login successful"))
}

async fn record_login_failure(
    limiter: &RateLimiter,
    key: &str,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let window = Duration::seconds(*config::LOGIN_LOCKOUT_WINDOW_SECS);
    let hits = limiter.record_failure(key, window, now).await?;
    if hits >= *config::LOGIN_FAILURE_LIMIT {
        tracing::warn!(%key, hits, "login lockout window closed");
    }
    Ok(())
}

fn expiry_timestamp(now: DateTime<Utc>) -> usize {
    now.checked_add_signed(Duration::hours(24))
        .expect("valid timestamp")
        .timestamp() as usize
}

pub async fn logout_account() -> (HeaderMap, &'static str) {
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::SET_COOKIE,
        "auth_token=deleted; HttpOnly; Path=/; Max-Age=0"
            .parse()
            .expect("valid header value"),
    );
    (headers, "Logged out")
}

pub async fn current_account(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<AccountInfo>> {
    let account = crate::accounts::fetch_account(&pool, user_id).await?;
    Ok(Json(AccountInfo {
        id: account.id,
        email: account.email,
        role: account.role,
        parent_account_id: account.parent_account_id,
        verified: account.verified_at.is_some(),
    }))
}
