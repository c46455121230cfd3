use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::AppError;
use crate::store::BillingStore;

/// Result of a close request. `transitioned` is true only when this call
/// moved the tenancy from `active` to `closed`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CloseOutcome {
    pub transitioned: bool,
    pub invoices_cancelled: u64,
}

/// Close a tenancy and cancel its outstanding invoices.
///
/// The `active -> closed` swap happens inside the store, so only the call
/// that actually performs the transition runs the cancellation; closing an
/// already-closed tenancy is a no-op rather than a re-trigger. Cancellation
/// touches `draft` and `sent` invoices only; `overdue`, `paid` and
/// `cancelled` are left alone.
pub async fn close_tenancy(
    store: &dyn BillingStore,
    tenancy_id: &str,
    now: DateTime<Utc>,
) -> Result<CloseOutcome, AppError> {
    let Some(tenancy) = store.close_tenancy(tenancy_id, now).await? else {
        return Ok(CloseOutcome {
            transitioned: false,
            invoices_cancelled: 0,
        });
    };

    let invoices_cancelled = store.cancel_open_invoices(&tenancy.id).await?;
    info!(
        tenancy_id = %tenancy.id,
        invoices_cancelled,
        "Tenancy closed; outstanding invoices cancelled"
    );
    Ok(CloseOutcome {
        transitioned: true,
        invoices_cancelled,
    })
}
