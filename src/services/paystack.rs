use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{json, Map, Value};
use sha2::Sha512;

use super::stripe::{hex_decode, GatewaySession};

type HmacSha512 = Hmac<Sha512>;

const PAYSTACK_API_BASE: &str = "https://api.paystack.co";

/// Initialize a Paystack transaction.
///
/// Amounts are in the gateway's minor units (kobo for NGN). Metadata rides
/// along and comes back on `charge.success`.
pub async fn initialize_transaction(
    http_client: &Client,
    secret_key: &str,
    tenant_email: &str,
    amount_minor: i64,
    currency: &str,
    callback_url: &str,
    metadata: &[(String, String)],
) -> Result<GatewaySession, String> {
    let mut meta = Map::new();
    for (key, value) in metadata {
        meta.insert(key.clone(), Value::String(value.clone()));
    }

    let response = http_client
        .post(format!("{PAYSTACK_API_BASE}/transaction/initialize"))
        .bearer_auth(secret_key)
        .json(&json!({
            "email": tenant_email,
            "amount": amount_minor,
            "currency": currency.to_uppercase(),
            "callback_url": callback_url,
            "metadata": Value::Object(meta),
        }))
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Paystack API request failed");
            "Paystack API request failed.".to_string()
        })?;

    let status = response.status();
    let resp_body: Value = response
        .json()
        .await
        .unwrap_or(json!({"error": "failed to parse response"}));

    if status.is_success() {
        let data = resp_body.get("data").cloned().unwrap_or(Value::Null);
        let url = data
            .get("authorization_url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let reference = data
            .get("reference")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if url.is_empty() {
            return Err("Paystack returned no authorization URL.".to_string());
        }
        Ok(GatewaySession { url, reference })
    } else {
        let error_msg = resp_body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown Paystack error");
        Err(format!("Paystack API error ({status}): {error_msg}"))
    }
}

/// Verify a Paystack webhook: `x-paystack-signature` is the hex
/// HMAC-SHA512 of the raw request body under the account's secret key.
/// Constant-time comparison via the MAC itself.
pub fn verify_signature(payload: &[u8], signature_hex: &str, secret_key: &str) -> bool {
    let Ok(mut mac) = HmacSha512::new_from_slice(secret_key.as_bytes()) else {
        return false;
    };
    mac.update(payload);

    let Ok(expected) = hex_decode(signature_hex.trim()) else {
        return false;
    };
    mac.verify_slice(&expected).is_ok()
}
