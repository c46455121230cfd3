use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::model::Gateway;
use crate::schemas::{validate_input, validate_redirect_url, CreateCheckoutInput};
use crate::services::checkout::{create_checkout_session, CheckoutRequest};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/payments/checkout",
        axum::routing::post(create_checkout),
    )
}

async fn create_checkout(
    State(state): State<AppState>,
    Json(payload): Json<CreateCheckoutInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    validate_redirect_url(&payload.success_url, "success_url")?;
    validate_redirect_url(&payload.cancel_url, "cancel_url")?;

    let gateway = Gateway::parse(&payload.gateway).ok_or_else(|| {
        AppError::BadRequest(format!(
            "Unsupported payment gateway '{}'.",
            payload.gateway
        ))
    })?;

    // Caller metadata rides along as strings; nested values are flattened
    // via their JSON rendering.
    let metadata: Vec<(String, String)> = payload
        .metadata
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect();

    let session = create_checkout_session(
        &state.http_client,
        &state.config,
        CheckoutRequest {
            gateway,
            landlord_id: payload.landlord_id,
            property_id: payload.property_id,
            tenant_email: payload.tenant_email,
            amount: payload.amount,
            currency: payload.currency,
            success_url: payload.success_url,
            cancel_url: payload.cancel_url,
            invoice_id: payload.invoice_id,
            metadata,
        },
    )
    .await?;

    Ok(Json(json!({
        "url": session.url,
        "gateway": session.gateway,
        "reference": session.reference,
    })))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::state::AppState;

    fn app() -> axum::Router {
        crate::routes::v1_router().with_state(AppState::for_tests(AppConfig::from_env()))
    }

    fn checkout_body(gateway: &str, amount: f64) -> String {
        json!({
            "gateway": gateway,
            "landlord_id": "landlord-1",
            "property_id": "prop-1",
            "tenant_email": "tenant@example.com",
            "amount": amount,
            "currency": "NGN",
            "success_url": "https://app.example.com/paid",
            "cancel_url": "https://app.example.com/cancelled",
        })
        .to_string()
    }

    #[tokio::test]
    async fn unsupported_gateway_is_rejected() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/payments/checkout")
                    .header("content-type", "application/json")
                    .body(Body::from(checkout_body("flutterwave", 100.0)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn non_positive_amount_is_rejected() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/payments/checkout")
                    .header("content-type", "application/json")
                    .body(Body::from(checkout_body("stripe", -5.0)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_method_is_rejected() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/payments/checkout")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn invalid_redirect_url_is_rejected() {
        let body = json!({
            "gateway": "stripe",
            "landlord_id": "landlord-1",
            "property_id": "prop-1",
            "tenant_email": "tenant@example.com",
            "amount": 100.0,
            "currency": "NGN",
            "success_url": "not-a-url",
            "cancel_url": "https://app.example.com/cancelled",
        })
        .to_string();
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/payments/checkout")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
