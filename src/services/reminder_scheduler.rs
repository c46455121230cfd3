use chrono::{DateTime, Duration, NaiveTime, Utc};
use tracing::{info, warn};

use crate::model::{self, Invoice, OwnerRole, Reminder, ReminderStatus};
use crate::store::BillingStore;

/// Lead times, in days before the due date, at which reminders are created.
pub const LEAD_TIMES_DAYS: [u32; 3] = [30, 7, 1];

/// Result of a daily reminder scheduling run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReminderSchedulingResult {
    pub reminders_created: u32,
    pub already_existed: u32,
    pub errors: u32,
}

/// For each lead time L, find unpaid invoices due exactly L days out and
/// create a landlord reminder plus, when the invoice has a tenant, a tenant
/// reminder.
///
/// Reminder ids are deterministic in (owner, invoice, lead time), so creation
/// is an insert-if-absent: overlapping or repeated runs cannot produce
/// duplicates.
pub async fn run_reminder_scheduling(
    store: &dyn BillingStore,
    now: DateTime<Utc>,
    limit: i64,
) -> ReminderSchedulingResult {
    let mut result = ReminderSchedulingResult {
        reminders_created: 0,
        already_existed: 0,
        errors: 0,
    };

    for days_before in LEAD_TIMES_DAYS {
        let (window_start, window_end) = due_window(now, days_before);
        let invoices = match store
            .list_invoices_due_between(window_start, window_end, limit)
            .await
        {
            Ok(invoices) => invoices,
            Err(error) => {
                warn!(days_before, error = %error, "Failed to list invoices for reminder window");
                result.errors += 1;
                continue;
            }
        };

        for invoice in invoices {
            let mut recipients = vec![(invoice.landlord_id.clone(), OwnerRole::Landlord)];
            if let Some(tenant_id) = invoice.tenant_id.clone() {
                recipients.push((tenant_id, OwnerRole::Tenant));
            }

            for (owner_id, owner_role) in recipients {
                let reminder = build_reminder(&invoice, &owner_id, owner_role, days_before, now);
                match store.insert_reminder_if_absent(reminder).await {
                    Ok(true) => result.reminders_created += 1,
                    Ok(false) => result.already_existed += 1,
                    Err(error) => {
                        warn!(
                            invoice_id = %invoice.id,
                            owner_id = %owner_id,
                            days_before,
                            error = %error,
                            "Failed to create reminder"
                        );
                        result.errors += 1;
                    }
                }
            }
        }
    }

    info!(
        created = result.reminders_created,
        existing = result.already_existed,
        errors = result.errors,
        "Reminder scheduling completed"
    );
    result
}

/// Calendar-day window `[today+L, today+L+1)` in UTC.
fn due_window(now: DateTime<Utc>, days_before: u32) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = (now.date_naive() + Duration::days(days_before as i64))
        .and_time(NaiveTime::MIN)
        .and_utc();
    (start, start + Duration::days(1))
}

fn build_reminder(
    invoice: &Invoice,
    owner_id: &str,
    owner_role: OwnerRole,
    days_before: u32,
    now: DateTime<Utc>,
) -> Reminder {
    Reminder {
        id: model::reminder_id(owner_id, &invoice.id, days_before),
        owner_id: owner_id.to_string(),
        owner_role,
        title: model::reminder_title(days_before),
        property_id: invoice.property_id.clone(),
        unit_id: invoice.unit_id.clone(),
        invoice_id: invoice.id.clone(),
        tenancy_id: invoice.tenancy_id.clone(),
        due_date: invoice.due_date,
        amount: invoice.amount,
        currency: invoice.currency.clone(),
        days_before,
        status: ReminderStatus::Pending,
        created_at: now,
    }
}
