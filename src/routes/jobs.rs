//! Internal triggers for the daily billing jobs.
//!
//! The clock-driven scheduler is the normal caller; these endpoints exist for
//! manual re-runs (an outage, a backfill). Every job is idempotent, so an
//! extra trigger while the scheduler is mid-run is harmless.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::services::{invoice_generator, overdue_sweep, reminder_scheduler};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/internal/jobs/generate-invoices",
            axum::routing::post(generate_invoices),
        )
        .route(
            "/internal/jobs/overdue-sweep",
            axum::routing::post(run_overdue_sweep),
        )
        .route(
            "/internal/jobs/schedule-reminders",
            axum::routing::post(schedule_reminders),
        )
}

fn require_internal_key(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state
        .config
        .internal_api_key
        .as_deref()
        .filter(|key| !key.is_empty())
    else {
        return Err(AppError::Unauthorized(
            "INTERNAL_API_KEY is not configured.".to_string(),
        ));
    };
    let provided = headers
        .get("x-internal-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if provided != expected {
        return Err(AppError::Unauthorized(
            "Invalid internal API key.".to_string(),
        ));
    }
    Ok(())
}

async fn generate_invoices(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    let result = invoice_generator::run_invoice_generation(
        state.store.as_ref(),
        Utc::now(),
        state.config.invoice_batch_limit,
    )
    .await;
    Ok(Json(json!({ "job": "generate-invoices", "result": result })))
}

async fn run_overdue_sweep(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    let result = overdue_sweep::run_overdue_sweep(
        state.store.as_ref(),
        Utc::now(),
        state.config.invoice_batch_limit,
    )
    .await;
    Ok(Json(json!({ "job": "overdue-sweep", "result": result })))
}

async fn schedule_reminders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    let result = reminder_scheduler::run_reminder_scheduling(
        state.store.as_ref(),
        Utc::now(),
        state.config.invoice_batch_limit,
    )
    .await;
    Ok(Json(json!({ "job": "schedule-reminders", "result": result })))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::state::AppState;

    fn state_with_key() -> AppState {
        let mut config = AppConfig::from_env();
        config.internal_api_key = Some("key-123".to_string());
        AppState::for_tests(config)
    }

    fn trigger(key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/internal/jobs/overdue-sweep");
        if let Some(key) = key {
            builder = builder.header("x-internal-api-key", key);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_key() {
        let app = crate::routes::v1_router().with_state(state_with_key());
        let missing = app.clone().oneshot(trigger(None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        let wrong = app.oneshot(trigger(Some("nope"))).await.unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn runs_the_job_with_a_valid_key() {
        let app = crate::routes::v1_router().with_state(state_with_key());
        let response = app.oneshot(trigger(Some("key-123"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
