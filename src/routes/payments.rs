use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/tenants/{tenant_id}/receipts",
            axum::routing::get(list_tenant_receipts),
        )
        .route(
            "/landlords/{landlord_id}/properties/{property_id}/payments",
            axum::routing::get(list_property_payments),
        )
}

#[derive(Debug, Clone, serde::Deserialize)]
struct TenantPath {
    tenant_id: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct PropertyPath {
    landlord_id: String,
    property_id: String,
}

/// Tenant-facing receipt history, written by the settlement pipeline.
async fn list_tenant_receipts(
    State(state): State<AppState>,
    Path(path): Path<TenantPath>,
) -> AppResult<Json<Value>> {
    let receipts = state
        .store
        .list_receipts_for_tenant(&path.tenant_id)
        .await?;
    Ok(Json(json!({ "data": receipts })))
}

/// Per-property payment feed over the denormalized copy the settlement
/// pipeline maintains alongside the global payment records.
async fn list_property_payments(
    State(state): State<AppState>,
    Path(path): Path<PropertyPath>,
) -> AppResult<Json<Value>> {
    let payments = state
        .store
        .list_property_payments(&path.landlord_id, &path.property_id)
        .await?;
    Ok(Json(json!({ "data": payments })))
}
