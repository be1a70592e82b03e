use axum::{extract::Extension, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::Value;

use crate::entitlements::{SettlementHandle, SettlementJob};

/// key: webhooks-payments -> settlement pipeline entrypoint
///
/// The provider delivers at-least-once; the settlement service dedupes on
/// `payment_ref`, so this handler only has to enqueue and acknowledge.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhookRequest {
    pub account_id: i32,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

pub async fn payment_webhook(
    Extension(settlements): Extension<SettlementHandle>,
    Json(payload): Json<PaymentWebhookRequest>,
) -> Result<StatusCode, StatusCode> {
    match payload.event.as_str() {
        "payment.succeeded" | "checkout.completed" => {
            settlements
                .dispatch(SettlementJob::PaymentSucceeded {
                    account_id: payload.account_id,
                    payload: payload.data,
                })
                .await
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            Ok(StatusCode::ACCEPTED)
        }
        _ => Ok(StatusCode::ACCEPTED),
    }
}
