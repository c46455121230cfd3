use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::store::BillingStore;

/// Result of a daily overdue sweep.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OverdueSweepResult {
    pub marked_overdue: u32,
    pub errors: u32,
}

/// Transition every unpaid invoice past its due date to `overdue`.
///
/// The transition is a compare-and-swap on `status = sent`, so reapplying the
/// sweep (or racing a concurrent settlement) never touches paid, cancelled or
/// already-overdue invoices.
pub async fn run_overdue_sweep(
    store: &dyn BillingStore,
    now: DateTime<Utc>,
    limit: i64,
) -> OverdueSweepResult {
    let mut result = OverdueSweepResult {
        marked_overdue: 0,
        errors: 0,
    };

    let invoices = match store.list_invoices_past_due(now, limit).await {
        Ok(invoices) => invoices,
        Err(error) => {
            warn!(error = %error, "Failed to list past-due invoices");
            result.errors += 1;
            return result;
        }
    };

    for invoice in invoices {
        match store.mark_invoice_overdue(&invoice.id).await {
            Ok(true) => result.marked_overdue += 1,
            Ok(false) => {}
            Err(error) => {
                warn!(invoice_id = %invoice.id, error = %error, "Failed to mark invoice overdue");
                result.errors += 1;
            }
        }
    }

    info!(
        marked = result.marked_overdue,
        errors = result.errors,
        "Overdue sweep completed"
    );
    result
}
