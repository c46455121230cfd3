use std::time::Duration;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    // Wrap in a short timeout so the healthcheck always responds quickly,
    // even if the first store connection hangs.
    let store_ok = match tokio::time::timeout(Duration::from_secs(3), state.store.health_check())
        .await
    {
        Ok(Ok(())) => true,
        Ok(Err(error)) => {
            tracing::error!(error = %error, "Health check store query failed");
            false
        }
        Err(_) => {
            tracing::error!("Health check store query timed out (3s)");
            false
        }
    };

    let status = if store_ok { "ok" } else { "degraded" };
    Json(json!({
        "status": status,
        "now": Utc::now().to_rfc3339(),
        "store": state.store.backend_name(),
        "store_ok": store_ok,
    }))
}
