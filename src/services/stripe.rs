use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{json, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A checkout session issued by a gateway: the redirect URL plus the
/// reference the webhook will later correlate on.
#[derive(Debug, Clone)]
pub struct GatewaySession {
    pub url: String,
    pub reference: String,
}

/// Create a Stripe Checkout Session.
///
/// Amounts are passed in the gateway's minor units (cents). The metadata is
/// echoed back on `checkout.session.completed`, which is how settlement
/// recovers the invoice and ownership ids.
#[allow(clippy::too_many_arguments)]
pub async fn create_checkout_session(
    http_client: &Client,
    secret_key: &str,
    amount_minor: i64,
    currency: &str,
    tenant_email: &str,
    success_url: &str,
    cancel_url: &str,
    metadata: &[(String, String)],
) -> Result<GatewaySession, String> {
    let currency_lower = currency.to_lowercase();
    let amount_str = amount_minor.to_string();

    let mut form: Vec<(String, String)> = vec![
        ("mode".to_string(), "payment".to_string()),
        ("payment_method_types[]".to_string(), "card".to_string()),
        ("customer_email".to_string(), tenant_email.to_string()),
        (
            "line_items[0][price_data][currency]".to_string(),
            currency_lower,
        ),
        (
            "line_items[0][price_data][unit_amount]".to_string(),
            amount_str,
        ),
        (
            "line_items[0][price_data][product_data][name]".to_string(),
            "Rent payment".to_string(),
        ),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        ("success_url".to_string(), success_url.to_string()),
        ("cancel_url".to_string(), cancel_url.to_string()),
    ];
    for (key, value) in metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
    }

    let response = http_client
        .post("https://api.stripe.com/v1/checkout/sessions")
        .basic_auth(secret_key, None::<&str>)
        .form(&form)
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Stripe API request failed");
            "Stripe API request failed.".to_string()
        })?;

    let status = response.status();
    let resp_body: Value = response
        .json()
        .await
        .unwrap_or(json!({"error": "failed to parse response"}));

    if status.is_success() {
        let url = resp_body
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let reference = resp_body
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if url.is_empty() {
            return Err("Stripe returned a session without a URL.".to_string());
        }
        Ok(GatewaySession { url, reference })
    } else {
        let error_msg = resp_body
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown Stripe error");
        Err(format!("Stripe API error ({status}): {error_msg}"))
    }
}

/// Verify a Stripe webhook signature using HMAC-SHA256.
///
/// Parses the `stripe-signature` header (format: `t=<timestamp>,v1=<hex>`),
/// constructs the signed payload `<timestamp>.<raw body>`, computes
/// HMAC-SHA256 with the webhook secret, and compares in constant time.
/// The raw, unparsed body is required: re-serializing the JSON can change
/// byte content and break the match. Signatures older than 5 minutes are
/// rejected to prevent replay.
pub fn verify_signature(payload: &[u8], signature_header: &str, webhook_secret: &str) -> bool {
    const TOLERANCE_SECS: i64 = 300;

    let mut timestamp: Option<&str> = None;
    let mut signature: Option<&str> = None;

    for part in signature_header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(v1) = part.strip_prefix("v1=") {
            signature = Some(v1);
        }
    }

    let (Some(ts_str), Some(expected_hex)) = (timestamp, signature) else {
        return false;
    };

    let Ok(ts) = ts_str.parse::<i64>() else {
        return false;
    };

    let now = chrono::Utc::now().timestamp();
    if (now - ts).abs() > TOLERANCE_SECS {
        tracing::warn!(delta = (now - ts).abs(), "Stripe webhook signature too old");
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(webhook_secret.as_bytes()) else {
        return false;
    };
    mac.update(ts_str.as_bytes());
    mac.update(b".");
    mac.update(payload);

    let Ok(expected_bytes) = hex_decode(expected_hex) else {
        return false;
    };

    mac.verify_slice(&expected_bytes).is_ok()
}

pub(crate) fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    if hex.len() % 2 != 0 {
        return Err(());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &[u8], ts: i64, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{ts}.").as_bytes());
        mac.update(payload);
        let hex: String = mac
            .finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        format!("t={ts},v1={hex}")
    }

    #[test]
    fn accepts_a_valid_fresh_signature() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let ts = chrono::Utc::now().timestamp();
        let header = sign(payload, ts, "whsec_test");
        assert!(verify_signature(payload, &header, "whsec_test"));
    }

    #[test]
    fn rejects_wrong_secret_and_tampered_body() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let ts = chrono::Utc::now().timestamp();
        let header = sign(payload, ts, "whsec_test");
        assert!(!verify_signature(payload, &header, "whsec_other"));
        assert!(!verify_signature(b"{\"type\":\"tampered\"}", &header, "whsec_test"));
    }

    #[test]
    fn rejects_stale_signature() {
        let payload = b"{}";
        let ts = chrono::Utc::now().timestamp() - 3600;
        let header = sign(payload, ts, "whsec_test");
        assert!(!verify_signature(payload, &header, "whsec_test"));
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(!verify_signature(b"{}", "v1=abc", "whsec_test"));
        assert!(!verify_signature(b"{}", "t=notanumber,v1=abc", "whsec_test"));
        assert!(!verify_signature(b"{}", "", "whsec_test"));
    }
}
