//! The post-payment settlement saga.
//!
//! Given a confirmed gateway payment, settle it against the store in ordered,
//! independently idempotent steps. Only the payment record itself is
//! hard-fail; every later step is an enrichment that logs and continues, so a
//! flaky unit lookup or storage upload can never lose a payment.

use chrono::Utc;
use tracing::{info, warn};

use crate::error::AppError;
use crate::model::{
    self, Gateway, Invoice, PaidStamp, Payment, Receipt, UnitPaymentStamp,
};
use crate::services::receipt_pdf::{self, ReceiptDetails};
use crate::storage::{invoice_pdf_path, ReceiptStorage};
use crate::store::BillingStore;

/// A confirmed "payment succeeded" event as extracted from a webhook.
/// Identity fields other than amount/currency/reference/gateway are optional
/// and are backfilled from the invoice when missing.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub invoice_id: Option<String>,
    pub tenant_id: Option<String>,
    pub landlord_id: Option<String>,
    pub property_id: Option<String>,
    pub unit_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub gateway_reference: String,
    pub gateway: Gateway,
}

/// Event + invoice identity merged: event fields win, the invoice fills the
/// gaps.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIdentity {
    pub invoice_id: Option<String>,
    pub tenant_id: Option<String>,
    pub landlord_id: Option<String>,
    pub property_id: Option<String>,
    pub unit_id: Option<String>,
}

pub fn resolve_identity(event: &PaymentEvent, invoice: Option<&Invoice>) -> ResolvedIdentity {
    ResolvedIdentity {
        invoice_id: event
            .invoice_id
            .clone()
            .or_else(|| invoice.map(|i| i.id.clone())),
        tenant_id: event
            .tenant_id
            .clone()
            .or_else(|| invoice.and_then(|i| i.tenant_id.clone())),
        landlord_id: event
            .landlord_id
            .clone()
            .or_else(|| invoice.map(|i| i.landlord_id.clone())),
        property_id: event
            .property_id
            .clone()
            .or_else(|| invoice.map(|i| i.property_id.clone())),
        unit_id: event
            .unit_id
            .clone()
            .or_else(|| invoice.and_then(|i| i.unit_id.clone())),
    }
}

/// What the saga actually did, step by step.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SettlementOutcome {
    pub payment_id: String,
    pub duplicate: bool,
    pub invoice_marked_paid: bool,
    pub receipt_recorded: bool,
    pub unit_stamped: bool,
    pub reminders_closed: u32,
    pub pdf_url: Option<String>,
}

impl SettlementOutcome {
    fn duplicate_of(payment_id: String) -> Self {
        Self {
            payment_id,
            duplicate: true,
            invoice_marked_paid: false,
            receipt_recorded: false,
            unit_stamped: false,
            reminders_closed: 0,
            pdf_url: None,
        }
    }
}

pub async fn handle_successful_payment(
    store: &dyn BillingStore,
    storage: &dyn ReceiptStorage,
    event: PaymentEvent,
) -> Result<SettlementOutcome, AppError> {
    // Dedup short-circuit: gateways deliver at-least-once, so the same
    // transaction may arrive twice. The reference pre-check plus the unique
    // index in `record_payment` make the whole saga safely re-runnable.
    if let Some(existing) = store
        .find_payment_by_reference(&event.gateway_reference)
        .await?
    {
        info!(
            gateway_reference = %event.gateway_reference,
            payment_id = %existing.payment_id,
            "Duplicate payment delivery; returning existing payment"
        );
        return Ok(SettlementOutcome::duplicate_of(existing.payment_id));
    }

    let now = Utc::now();
    let payment_id = model::generate_payment_id(now);

    let invoice = match &event.invoice_id {
        Some(invoice_id) => {
            let found = store.get_invoice(invoice_id).await?;
            if found.is_none() {
                warn!(invoice_id = %invoice_id, "Invoice not found; settling payment without it");
            }
            found
        }
        None => None,
    };
    let identity = resolve_identity(&event, invoice.as_ref());

    let mut invoice_marked_paid = false;
    if let Some(inv) = &invoice {
        let stamp = PaidStamp {
            payment_id: payment_id.clone(),
            gateway_reference: event.gateway_reference.clone(),
            paid_date: now,
        };
        match store.mark_invoice_paid(&inv.id, &stamp).await? {
            Some(_) => invoice_marked_paid = true,
            None => warn!(
                invoice_id = %inv.id,
                status = inv.status.as_str(),
                "Invoice was not payable; keeping its existing settlement"
            ),
        }
    }

    // The one step that must succeed: the durable payment record (and its
    // per-property copy, committed together).
    let payment = Payment {
        payment_id: payment_id.clone(),
        invoice_id: identity.invoice_id.clone(),
        tenant_id: identity.tenant_id.clone(),
        landlord_id: identity.landlord_id.clone(),
        property_id: identity.property_id.clone(),
        unit_id: identity.unit_id.clone(),
        amount: event.amount,
        currency: event.currency.clone(),
        gateway: event.gateway,
        gateway_reference: event.gateway_reference.clone(),
        paid_at: now,
    };
    if !store.record_payment(&payment).await? {
        // Lost a race against a concurrent delivery of the same reference.
        if let Some(existing) = store
            .find_payment_by_reference(&event.gateway_reference)
            .await?
        {
            return Ok(SettlementOutcome::duplicate_of(existing.payment_id));
        }
        return Err(AppError::Conflict(
            "Payment reference already recorded.".to_string(),
        ));
    }

    let mut receipt_recorded = false;
    if let Some(tenant_id) = &identity.tenant_id {
        let receipt = Receipt {
            payment_id: payment_id.clone(),
            tenant_id: tenant_id.clone(),
            invoice_id: identity.invoice_id.clone(),
            invoice_number: invoice.as_ref().map(|i| i.invoice_number.clone()),
            amount: event.amount,
            currency: event.currency.clone(),
            gateway: event.gateway,
            paid_at: now,
        };
        match store.record_receipt(&receipt).await {
            Ok(()) => receipt_recorded = true,
            Err(error) => {
                warn!(tenant_id = %tenant_id, error = %error, "Failed to write tenant receipt")
            }
        }
    }

    let mut unit_stamped = false;
    if let (Some(landlord_id), Some(property_id), Some(unit_id)) = (
        &identity.landlord_id,
        &identity.property_id,
        &identity.unit_id,
    ) {
        let stamp = UnitPaymentStamp {
            payment_id: payment_id.clone(),
            paid_at: now,
            amount: event.amount,
        };
        match store
            .stamp_unit_payment(landlord_id, property_id, unit_id, &stamp)
            .await
        {
            Ok(true) => unit_stamped = true,
            Ok(false) => warn!(unit_id = %unit_id, "Unit not found; skipping rent-status update"),
            Err(error) => warn!(unit_id = %unit_id, error = %error, "Failed to update unit"),
        }
    }

    let mut reminders_closed = 0;
    if let Some(invoice_id) = &identity.invoice_id {
        let mut owners = Vec::new();
        if let Some(landlord_id) = &identity.landlord_id {
            owners.push(landlord_id.clone());
        }
        if let Some(tenant_id) = &identity.tenant_id {
            owners.push(tenant_id.clone());
        }
        for owner_id in owners {
            let reminders = match store
                .list_pending_reminders_for_invoice(&owner_id, invoice_id)
                .await
            {
                Ok(reminders) => reminders,
                Err(error) => {
                    warn!(owner_id = %owner_id, error = %error, "Failed to list reminders");
                    continue;
                }
            };
            for reminder in reminders {
                match store.mark_reminder_paid(&reminder.id).await {
                    Ok(true) => reminders_closed += 1,
                    Ok(false) => {}
                    Err(error) => {
                        warn!(reminder_id = %reminder.id, error = %error, "Failed to close reminder")
                    }
                }
            }
        }
    }

    // PDF generation and upload: the payment is already durable, so any
    // failure here is logged and swallowed.
    let mut pdf_url = None;
    if let (Some(landlord_id), Some(property_id)) =
        (&identity.landlord_id, &identity.property_id)
    {
        let bytes = receipt_pdf::render_receipt_pdf(&ReceiptDetails {
            invoice_number: invoice.as_ref().map(|i| i.invoice_number.clone()),
            payment_id: payment_id.clone(),
            amount: event.amount,
            currency: event.currency.clone(),
            gateway_reference: event.gateway_reference.clone(),
            paid_at: now,
        });
        let path = invoice_pdf_path(landlord_id, property_id, &payment_id);
        match storage.store_pdf(&path, bytes).await {
            Ok(url) => {
                if let Some(invoice_id) = &identity.invoice_id {
                    if let Err(error) = store.set_invoice_pdf_url(invoice_id, &url).await {
                        warn!(invoice_id = %invoice_id, error = %error, "Failed to attach PDF URL");
                    }
                }
                pdf_url = Some(url);
            }
            Err(error) => warn!(path = %path, error = %error, "Receipt PDF upload failed"),
        }
    }

    info!(
        payment_id = %payment_id,
        gateway = event.gateway.as_str(),
        gateway_reference = %event.gateway_reference,
        amount = event.amount,
        invoice_marked_paid,
        "Payment settled"
    );

    Ok(SettlementOutcome {
        payment_id,
        duplicate: false,
        invoice_marked_paid,
        receipt_recorded,
        unit_stamped,
        reminders_closed,
        pdf_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BillingCycle, InvoiceStatus, OwnerRole, Reminder, ReminderStatus, RentStatus, Tenancy,
        TenancyStatus, Unit,
    };
    use crate::storage::memory::InMemoryReceiptStorage;
    use crate::store::memory::InMemoryStore;
    use crate::store::InvoiceBatch;
    use chrono::{DateTime, TimeZone};

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn event(reference: &str) -> PaymentEvent {
        PaymentEvent {
            invoice_id: Some("inv-1".to_string()),
            tenant_id: None,
            landlord_id: Some("landlord-1".to_string()),
            property_id: None,
            unit_id: None,
            amount: 100_000.0,
            currency: "NGN".to_string(),
            gateway_reference: reference.to_string(),
            gateway: Gateway::Paystack,
        }
    }

    async fn seed(store: &InMemoryStore) {
        store
            .create_tenancy(Tenancy {
                id: "ten-1".to_string(),
                tenant_id: "tenant-1".to_string(),
                landlord_id: "landlord-1".to_string(),
                property_id: "prop-1".to_string(),
                unit_id: "unit-1".to_string(),
                rent_amount: 100_000.0,
                currency: "NGN".to_string(),
                billing_cycle: BillingCycle::Monthly,
                status: TenancyStatus::Active,
                invoice_scheduling_enabled: true,
                next_invoice_date: utc(2024, 4, 1),
                start_date: utc(2024, 3, 1),
                end_date: None,
                created_at: utc(2024, 3, 1),
            })
            .await
            .unwrap();
        store
            .commit_invoice_batch(InvoiceBatch {
                tenancy_id: "ten-1".to_string(),
                invoices: vec![crate::model::Invoice {
                    id: "inv-1".to_string(),
                    invoice_number: "INV-TEST-0001".to_string(),
                    tenancy_id: "ten-1".to_string(),
                    tenant_id: Some("tenant-1".to_string()),
                    landlord_id: "landlord-1".to_string(),
                    property_id: "prop-1".to_string(),
                    unit_id: Some("unit-1".to_string()),
                    amount: 100_000.0,
                    currency: "NGN".to_string(),
                    billing_cycle: BillingCycle::Monthly,
                    status: InvoiceStatus::Sent,
                    due_date: utc(2024, 3, 1),
                    paid_date: None,
                    payment_id: None,
                    gateway_reference: None,
                    pdf_url: None,
                    created_at: utc(2024, 3, 1),
                }],
                next_invoice_date: utc(2024, 4, 1),
            })
            .await
            .unwrap();
        store
            .upsert_unit(Unit {
                id: "unit-1".to_string(),
                landlord_id: "landlord-1".to_string(),
                property_id: "prop-1".to_string(),
                label: Some("Flat 3B".to_string()),
                rent_status: RentStatus::Pending,
                last_payment_id: None,
                last_payment_date: None,
                last_payment_amount: None,
            })
            .await
            .unwrap();
        store
            .insert_reminder_if_absent(Reminder {
                id: model::reminder_id("landlord-1", "inv-1", 7),
                owner_id: "landlord-1".to_string(),
                owner_role: OwnerRole::Landlord,
                title: model::reminder_title(7),
                property_id: "prop-1".to_string(),
                unit_id: Some("unit-1".to_string()),
                invoice_id: "inv-1".to_string(),
                tenancy_id: "ten-1".to_string(),
                due_date: utc(2024, 3, 1),
                amount: 100_000.0,
                currency: "NGN".to_string(),
                days_before: 7,
                status: ReminderStatus::Pending,
                created_at: utc(2024, 2, 23),
            })
            .await
            .unwrap();
    }

    #[test]
    fn identity_backfills_from_invoice_without_overriding_event() {
        let invoice = crate::model::Invoice {
            id: "inv-1".to_string(),
            invoice_number: "INV-1".to_string(),
            tenancy_id: "ten-1".to_string(),
            tenant_id: Some("tenant-from-invoice".to_string()),
            landlord_id: "landlord-from-invoice".to_string(),
            property_id: "prop-from-invoice".to_string(),
            unit_id: Some("unit-from-invoice".to_string()),
            amount: 1.0,
            currency: "NGN".to_string(),
            billing_cycle: BillingCycle::Monthly,
            status: InvoiceStatus::Sent,
            due_date: Utc::now(),
            paid_date: None,
            payment_id: None,
            gateway_reference: None,
            pdf_url: None,
            created_at: Utc::now(),
        };
        let mut ev = event("ref-1");
        ev.landlord_id = Some("landlord-from-event".to_string());

        let identity = resolve_identity(&ev, Some(&invoice));
        assert_eq!(identity.landlord_id.as_deref(), Some("landlord-from-event"));
        assert_eq!(identity.tenant_id.as_deref(), Some("tenant-from-invoice"));
        assert_eq!(identity.property_id.as_deref(), Some("prop-from-invoice"));
        assert_eq!(identity.unit_id.as_deref(), Some("unit-from-invoice"));
    }

    #[tokio::test]
    async fn settles_invoice_payment_end_to_end() {
        let store = InMemoryStore::new();
        let storage = InMemoryReceiptStorage::new();
        seed(&store).await;

        let outcome = handle_successful_payment(&store, &storage, event("ref-1"))
            .await
            .unwrap();

        assert!(!outcome.duplicate);
        assert!(outcome.invoice_marked_paid);
        assert!(outcome.receipt_recorded);
        assert!(outcome.unit_stamped);
        assert_eq!(outcome.reminders_closed, 1);
        assert!(outcome.pdf_url.is_some());

        let invoice = store.get_invoice("inv-1").await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.payment_id.as_deref(), Some(outcome.payment_id.as_str()));
        assert_eq!(invoice.pdf_url, outcome.pdf_url);

        let payment = store
            .find_payment_by_reference("ref-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.amount, 100_000.0);
        // Identity was backfilled from the invoice.
        assert_eq!(payment.tenant_id.as_deref(), Some("tenant-1"));
        assert_eq!(payment.property_id.as_deref(), Some("prop-1"));

        let receipts = store.list_receipts_for_tenant("tenant-1").await.unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].payment_id, outcome.payment_id);

        let unit = store.get_unit("unit-1").await.unwrap().unwrap();
        assert_eq!(unit.rent_status, RentStatus::Paid);
        assert_eq!(unit.last_payment_amount, Some(100_000.0));

        let copies = store
            .list_property_payments("landlord-1", "prop-1")
            .await
            .unwrap();
        assert_eq!(copies.len(), 1);

        let url = outcome.pdf_url.unwrap();
        let path = url.strip_prefix("memory://").unwrap();
        let pdf = storage.get(path).await.unwrap();
        assert!(pdf.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn duplicate_delivery_creates_one_payment() {
        let store = InMemoryStore::new();
        let storage = InMemoryReceiptStorage::new();
        seed(&store).await;

        let first = handle_successful_payment(&store, &storage, event("ref-1"))
            .await
            .unwrap();
        let second = handle_successful_payment(&store, &storage, event("ref-1"))
            .await
            .unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.payment_id, second.payment_id);
        let copies = store
            .list_property_payments("landlord-1", "prop-1")
            .await
            .unwrap();
        assert_eq!(copies.len(), 1);
    }

    #[tokio::test]
    async fn missing_invoice_still_records_the_payment() {
        let store = InMemoryStore::new();
        let storage = InMemoryReceiptStorage::new();

        let mut ev = event("ref-ghost");
        ev.invoice_id = Some("no-such-invoice".to_string());
        ev.property_id = Some("prop-1".to_string());

        let outcome = handle_successful_payment(&store, &storage, ev).await.unwrap();
        assert!(!outcome.invoice_marked_paid);
        assert!(store
            .find_payment_by_reference("ref-ghost")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn already_paid_invoice_keeps_its_first_payment_id() {
        let store = InMemoryStore::new();
        let storage = InMemoryReceiptStorage::new();
        seed(&store).await;

        let first = handle_successful_payment(&store, &storage, event("ref-1"))
            .await
            .unwrap();
        // Different gateway reference, same invoice: a second charge slips
        // through. The payment is recorded but the invoice is untouched.
        let second = handle_successful_payment(&store, &storage, event("ref-2"))
            .await
            .unwrap();

        assert!(!second.duplicate);
        assert!(!second.invoice_marked_paid);
        let invoice = store.get_invoice("inv-1").await.unwrap().unwrap();
        assert_eq!(invoice.payment_id.as_deref(), Some(first.payment_id.as_str()));
    }
}
