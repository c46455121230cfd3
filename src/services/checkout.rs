use reqwest::Client;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::model::Gateway;
use crate::services::{paystack, stripe};

/// A validated checkout request, ready for gateway dispatch.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub gateway: Gateway,
    pub landlord_id: String,
    pub property_id: String,
    pub tenant_email: String,
    pub amount: f64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub invoice_id: Option<String>,
    pub metadata: Vec<(String, String)>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckoutSession {
    pub url: String,
    pub gateway: Gateway,
    pub reference: String,
}

/// Gateways take amounts in minor units (cents/kobo).
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

pub fn from_minor_units(minor: i64) -> f64 {
    minor as f64 / 100.0
}

/// Dispatch a checkout request to the selected gateway and return the
/// redirect URL. Ownership ids travel as session metadata so the webhook can
/// correlate the payment back to the invoice.
pub async fn create_checkout_session(
    http_client: &Client,
    config: &AppConfig,
    request: CheckoutRequest,
) -> Result<CheckoutSession, AppError> {
    if !request.amount.is_finite() || request.amount <= 0.0 {
        return Err(AppError::BadRequest(
            "Amount must be a positive number.".to_string(),
        ));
    }

    let mut metadata = vec![
        ("landlord_id".to_string(), request.landlord_id.clone()),
        ("property_id".to_string(), request.property_id.clone()),
    ];
    if let Some(invoice_id) = &request.invoice_id {
        metadata.push(("invoice_id".to_string(), invoice_id.clone()));
    }
    metadata.extend(request.metadata.iter().cloned());

    let amount_minor = to_minor_units(request.amount);

    let session = match request.gateway {
        Gateway::Stripe => {
            let secret_key = config
                .stripe_secret_key
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    AppError::Dependency("STRIPE_SECRET_KEY not configured".to_string())
                })?;
            stripe::create_checkout_session(
                http_client,
                secret_key,
                amount_minor,
                &request.currency,
                &request.tenant_email,
                &request.success_url,
                &request.cancel_url,
                &metadata,
            )
            .await
            .map_err(AppError::Dependency)?
        }
        Gateway::Paystack => {
            let secret_key = config
                .paystack_secret_key
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    AppError::Dependency("PAYSTACK_SECRET_KEY not configured".to_string())
                })?;
            paystack::initialize_transaction(
                http_client,
                secret_key,
                &request.tenant_email,
                amount_minor,
                &request.currency,
                &request.success_url,
                &metadata,
            )
            .await
            .map_err(AppError::Dependency)?
        }
    };

    tracing::info!(
        gateway = request.gateway.as_str(),
        landlord_id = %request.landlord_id,
        reference = %session.reference,
        "Checkout session created"
    );

    Ok(CheckoutSession {
        url: session.url,
        gateway: request.gateway,
        reference: session.reference,
    })
}
