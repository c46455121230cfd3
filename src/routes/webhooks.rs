use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::model::Gateway;
use crate::services::checkout::from_minor_units;
use crate::services::settlement::{handle_successful_payment, PaymentEvent};
use crate::services::{paystack, stripe};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/webhooks/stripe", axum::routing::post(stripe_webhook))
        .route("/webhooks/paystack", axum::routing::post(paystack_webhook))
}

/// Stripe webhook. The signature check over the raw body is the sole
/// authentication for this boundary. Once an event is accepted the gateway
/// always gets a 200: settlement failures are absorbed and logged, because
/// a non-2xx would only trigger retries of an event we already took.
async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let secret = state
        .config
        .stripe_webhook_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Dependency("STRIPE_WEBHOOK_SECRET not configured".to_string()))?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !stripe::verify_signature(&body, signature, secret) {
        return Err(AppError::BadRequest(
            "Invalid Stripe webhook signature.".to_string(),
        ));
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("Malformed Stripe webhook payload.".to_string()))?;

    let event_type = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match event_type {
        "checkout.session.completed" => match extract_stripe_event(&payload) {
            Some(event) => settle_absorbing_errors(&state, event).await,
            None => tracing::warn!("Stripe event missing session fields; ignoring"),
        },
        _ => tracing::debug!(event_type, "Unhandled Stripe event type"),
    }

    Ok(Json(json!({ "received": true })))
}

/// Paystack webhook: `x-paystack-signature` is the hex HMAC-SHA512 of the
/// raw body.
async fn paystack_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let secret = state
        .config
        .paystack_secret_key
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Dependency("PAYSTACK_SECRET_KEY not configured".to_string()))?;

    let signature = headers
        .get("x-paystack-signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !paystack::verify_signature(&body, signature, secret) {
        return Err(AppError::BadRequest(
            "Invalid Paystack webhook signature.".to_string(),
        ));
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("Malformed Paystack webhook payload.".to_string()))?;

    let event_type = payload
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match event_type {
        "charge.success" => match extract_paystack_event(&payload) {
            Some(event) => settle_absorbing_errors(&state, event).await,
            None => tracing::warn!("Paystack event missing charge fields; ignoring"),
        },
        _ => tracing::debug!(event_type, "Unhandled Paystack event type"),
    }

    Ok(Json(json!({ "status": "ok" })))
}

async fn settle_absorbing_errors(state: &AppState, event: PaymentEvent) {
    let reference = event.gateway_reference.clone();
    if let Err(error) =
        handle_successful_payment(state.store.as_ref(), state.storage.as_ref(), event).await
    {
        tracing::error!(
            gateway_reference = %reference,
            error = %error,
            "Settlement failed after accepted webhook"
        );
    }
}

fn extract_stripe_event(payload: &Value) -> Option<PaymentEvent> {
    let object = payload.get("data")?.get("object")?;
    let amount_minor = object.get("amount_total").and_then(Value::as_i64)?;
    let currency = object.get("currency").and_then(Value::as_str)?;
    let reference = object.get("id").and_then(Value::as_str)?;
    let metadata = object.get("metadata");

    Some(PaymentEvent {
        invoice_id: meta_str(metadata, "invoice_id"),
        tenant_id: meta_str(metadata, "tenant_id"),
        landlord_id: meta_str(metadata, "landlord_id"),
        property_id: meta_str(metadata, "property_id"),
        unit_id: meta_str(metadata, "unit_id"),
        amount: from_minor_units(amount_minor),
        currency: currency.to_uppercase(),
        gateway_reference: reference.to_string(),
        gateway: Gateway::Stripe,
    })
}

fn extract_paystack_event(payload: &Value) -> Option<PaymentEvent> {
    let data = payload.get("data")?;
    let amount_minor = data.get("amount").and_then(Value::as_i64)?;
    let currency = data.get("currency").and_then(Value::as_str)?;
    let reference = data.get("reference").and_then(Value::as_str)?;
    let metadata = data.get("metadata");

    Some(PaymentEvent {
        invoice_id: meta_str(metadata, "invoice_id"),
        tenant_id: meta_str(metadata, "tenant_id"),
        landlord_id: meta_str(metadata, "landlord_id"),
        property_id: meta_str(metadata, "property_id"),
        unit_id: meta_str(metadata, "unit_id"),
        amount: from_minor_units(amount_minor),
        currency: currency.to_uppercase(),
        gateway_reference: reference.to_string(),
        gateway: Gateway::Paystack,
    })
}

fn meta_str(metadata: Option<&Value>, key: &str) -> Option<String> {
    metadata?
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
