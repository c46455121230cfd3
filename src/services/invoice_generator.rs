use chrono::{DateTime, Duration, NaiveTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::{self, Invoice, InvoiceStatus, Tenancy};
use crate::store::{BillingStore, InvoiceBatch};

/// Result of a daily invoice generation run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InvoiceGenerationResult {
    pub tenancies_billed: u32,
    pub invoices_created: u32,
    pub skipped: u32,
    pub errors: u32,
}

/// Safety cap on catch-up periods per tenancy per pass. A daily tenancy that
/// was paused for years still converges over a few runs instead of looping.
const MAX_PERIODS_PER_PASS: usize = 120;

/// Generate invoices for every active tenancy whose `next_invoice_date` has
/// elapsed.
///
/// Each elapsed billing period gets its own invoice (so a tenancy several
/// cycles behind is caught up in one pass), and `next_invoice_date` advances
/// past end-of-today. One tenancy = one atomic batch: a malformed or failing
/// tenancy is logged and skipped without aborting the rest of the pass, and
/// a failed batch leaves the tenancy untouched for the next run to retry.
pub async fn run_invoice_generation(
    store: &dyn BillingStore,
    now: DateTime<Utc>,
    limit: i64,
) -> InvoiceGenerationResult {
    let cutoff = start_of_tomorrow(now);
    let mut result = InvoiceGenerationResult {
        tenancies_billed: 0,
        invoices_created: 0,
        skipped: 0,
        errors: 0,
    };

    let tenancies = match store.list_billable_tenancies(cutoff, limit).await {
        Ok(tenancies) => tenancies,
        Err(error) => {
            warn!(error = %error, "Failed to list billable tenancies");
            result.errors += 1;
            return result;
        }
    };

    for tenancy in tenancies {
        if let Err(reason) = validate_tenancy(&tenancy) {
            warn!(tenancy_id = %tenancy.id, reason, "Skipping malformed tenancy");
            result.skipped += 1;
            continue;
        }

        let batch = build_batch(&tenancy, cutoff, now);
        if batch.invoices.is_empty() {
            continue;
        }

        let created = batch.invoices.len() as u32;
        match store.commit_invoice_batch(batch).await {
            Ok(()) => {
                result.tenancies_billed += 1;
                result.invoices_created += created;
            }
            Err(error) => {
                warn!(
                    tenancy_id = %tenancy.id,
                    error = %error,
                    "Invoice batch failed; tenancy will be retried next run"
                );
                result.errors += 1;
            }
        }
    }

    info!(
        tenancies = result.tenancies_billed,
        invoices = result.invoices_created,
        skipped = result.skipped,
        errors = result.errors,
        "Invoice generation completed"
    );
    result
}

/// One invoice per elapsed period, due dates walking the billing cycle from
/// the tenancy's `next_invoice_date` up to (excluding) `cutoff`.
fn build_batch(tenancy: &Tenancy, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> InvoiceBatch {
    let mut due = tenancy.next_invoice_date;
    let mut invoices = Vec::new();
    while due < cutoff && invoices.len() < MAX_PERIODS_PER_PASS {
        invoices.push(snapshot_invoice(tenancy, due, now));
        due = tenancy.billing_cycle.advance(due);
    }
    InvoiceBatch {
        tenancy_id: tenancy.id.clone(),
        invoices,
        next_invoice_date: due,
    }
}

/// The invoice copies the tenancy's current billing attributes; later
/// tenancy edits must not retroactively change issued invoices.
fn snapshot_invoice(tenancy: &Tenancy, due: DateTime<Utc>, now: DateTime<Utc>) -> Invoice {
    Invoice {
        id: Uuid::new_v4().to_string(),
        invoice_number: model::generate_invoice_number(now),
        tenancy_id: tenancy.id.clone(),
        tenant_id: Some(tenancy.tenant_id.clone()),
        landlord_id: tenancy.landlord_id.clone(),
        property_id: tenancy.property_id.clone(),
        unit_id: Some(tenancy.unit_id.clone()),
        amount: tenancy.rent_amount,
        currency: tenancy.currency.clone(),
        billing_cycle: tenancy.billing_cycle,
        status: InvoiceStatus::Sent,
        due_date: due,
        paid_date: None,
        payment_id: None,
        gateway_reference: None,
        pdf_url: None,
        created_at: now,
    }
}

fn validate_tenancy(tenancy: &Tenancy) -> Result<(), &'static str> {
    if !tenancy.rent_amount.is_finite() || tenancy.rent_amount <= 0.0 {
        return Err("non-positive rent amount");
    }
    if tenancy.currency.trim().is_empty() {
        return Err("missing currency");
    }
    Ok(())
}

/// Exclusive end-of-today bound: midnight at the start of the next UTC day.
pub fn start_of_tomorrow(now: DateTime<Utc>) -> DateTime<Utc> {
    (now.date_naive() + Duration::days(1))
        .and_time(NaiveTime::MIN)
        .and_utc()
}
