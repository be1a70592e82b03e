use axum::{
    routing::{get, post},
    Router,
};

use crate::{accounts, auth, entitlements::api, webhooks};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/register", post(auth::register_account))
        .route("/api/login", post(auth::login_account))
        .route("/api/logout", post(auth::logout_account))
        .route("/api/me", get(auth::current_account))
        .route("/api/seats", post(accounts::create_seat))
        .route("/api/accounts/:id/verify", post(accounts::verify_account))
        .route("/api/plans", get(api::list_plans))
        .route("/api/packages", get(api::list_packages))
        .route("/api/accounts/:id/balance", get(api::get_balance))
        .route(
            "/api/accounts/:id/subscription",
            get(api::get_subscription),
        )
        .route("/api/subscription/cancel", post(api::cancel_subscription))
        .route("/api/consume", post(api::consume))
        .route("/api/reveal", post(api::reveal))
        .route("/api/webhooks/payments", post(webhooks::payment_webhook))
}
