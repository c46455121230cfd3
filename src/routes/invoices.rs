use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::schemas::InvoicePath;
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/invoices/{invoice_id}",
        axum::routing::get(get_invoice),
    )
}

async fn get_invoice(
    State(state): State<AppState>,
    Path(path): Path<InvoicePath>,
) -> AppResult<Json<Value>> {
    let invoice = state
        .store
        .get_invoice(&path.invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Invoice not found.".to_string()))?;
    Ok(Json(json!(invoice)))
}
