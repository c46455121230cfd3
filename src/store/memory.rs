//! In-memory implementation of the billing store.
//!
//! Exists for tests and local development: no external dependencies, not
//! durable, consistent within one process. All state lives behind a single
//! `RwLock`, so every trait method (including the multi-entity batch
//! commits) is atomic with respect to every other call.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::model::{
    Invoice, InvoiceStatus, InviteToken, InviteTokenStatus, PaidStamp, Payment, Receipt, Reminder,
    ReminderStatus, RentStatus, Tenancy, TenancyStatus, Unit, UnitPaymentStamp,
};

use super::{BillingStore, InvoiceBatch, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    tenancies: HashMap<String, Tenancy>,
    invoices: HashMap<String, Invoice>,
    /// Global payment records keyed by payment id.
    payments: HashMap<String, Payment>,
    /// Dedup index: gateway reference -> payment id.
    payment_refs: HashMap<String, String>,
    /// Denormalized per-property copies, keyed by `(landlord, property)`.
    property_payments: HashMap<(String, String), Vec<Payment>>,
    receipts: HashMap<String, Vec<Receipt>>,
    units: HashMap<String, Unit>,
    reminders: HashMap<String, Reminder>,
    invite_tokens: HashMap<String, InviteToken>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BillingStore for InMemoryStore {
    async fn create_tenancy(&self, tenancy: Tenancy) -> StoreResult<Tenancy> {
        let mut inner = self.inner.write().await;
        if inner.tenancies.contains_key(&tenancy.id) {
            return Err(StoreError::Conflict(format!(
                "Tenancy {} already exists.",
                tenancy.id
            )));
        }
        inner.tenancies.insert(tenancy.id.clone(), tenancy.clone());
        Ok(tenancy)
    }

    async fn get_tenancy(&self, tenancy_id: &str) -> StoreResult<Option<Tenancy>> {
        Ok(self.inner.read().await.tenancies.get(tenancy_id).cloned())
    }

    async fn list_billable_tenancies(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Tenancy>> {
        let inner = self.inner.read().await;
        let mut due: Vec<Tenancy> = inner
            .tenancies
            .values()
            .filter(|t| {
                t.status == TenancyStatus::Active
                    && t.invoice_scheduling_enabled
                    && t.next_invoice_date < cutoff
            })
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_invoice_date);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn close_tenancy(
        &self,
        tenancy_id: &str,
        closed_at: DateTime<Utc>,
    ) -> StoreResult<Option<Tenancy>> {
        let mut inner = self.inner.write().await;
        let tenancy = inner
            .tenancies
            .get_mut(tenancy_id)
            .ok_or_else(|| StoreError::NotFound(format!("Tenancy {tenancy_id} not found.")))?;
        if tenancy.status != TenancyStatus::Active {
            return Ok(None);
        }
        tenancy.status = TenancyStatus::Closed;
        tenancy.end_date = Some(closed_at);
        Ok(Some(tenancy.clone()))
    }

    async fn commit_invoice_batch(&self, batch: InvoiceBatch) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.tenancies.contains_key(&batch.tenancy_id) {
            return Err(StoreError::NotFound(format!(
                "Tenancy {} not found.",
                batch.tenancy_id
            )));
        }
        for invoice in &batch.invoices {
            if inner.invoices.contains_key(&invoice.id) {
                return Err(StoreError::Conflict(format!(
                    "Invoice {} already exists.",
                    invoice.id
                )));
            }
        }
        for invoice in batch.invoices {
            inner.invoices.insert(invoice.id.clone(), invoice);
        }
        if let Some(tenancy) = inner.tenancies.get_mut(&batch.tenancy_id) {
            tenancy.next_invoice_date = batch.next_invoice_date;
        }
        Ok(())
    }

    async fn get_invoice(&self, invoice_id: &str) -> StoreResult<Option<Invoice>> {
        Ok(self.inner.read().await.invoices.get(invoice_id).cloned())
    }

    async fn list_invoices_for_tenancy(&self, tenancy_id: &str) -> StoreResult<Vec<Invoice>> {
        let inner = self.inner.read().await;
        let mut invoices: Vec<Invoice> = inner
            .invoices
            .values()
            .filter(|i| i.tenancy_id == tenancy_id)
            .cloned()
            .collect();
        invoices.sort_by_key(|i| i.due_date);
        Ok(invoices)
    }

    async fn list_invoices_past_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Invoice>> {
        let inner = self.inner.read().await;
        let mut due: Vec<Invoice> = inner
            .invoices
            .values()
            .filter(|i| i.status == InvoiceStatus::Sent && i.due_date < now)
            .cloned()
            .collect();
        due.sort_by_key(|i| i.due_date);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn mark_invoice_overdue(&self, invoice_id: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(invoice) = inner.invoices.get_mut(invoice_id) else {
            return Ok(false);
        };
        if !invoice.status.can_transition_to(InvoiceStatus::Overdue) {
            return Ok(false);
        }
        invoice.status = InvoiceStatus::Overdue;
        Ok(true)
    }

    async fn list_invoices_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Invoice>> {
        let inner = self.inner.read().await;
        let mut window: Vec<Invoice> = inner
            .invoices
            .values()
            .filter(|i| i.status.is_payable() && i.due_date >= from && i.due_date < to)
            .cloned()
            .collect();
        window.sort_by_key(|i| i.due_date);
        window.truncate(limit.max(0) as usize);
        Ok(window)
    }

    async fn mark_invoice_paid(
        &self,
        invoice_id: &str,
        stamp: &PaidStamp,
    ) -> StoreResult<Option<Invoice>> {
        let mut inner = self.inner.write().await;
        let Some(invoice) = inner.invoices.get_mut(invoice_id) else {
            return Ok(None);
        };
        if !invoice.status.can_transition_to(InvoiceStatus::Paid) {
            return Ok(None);
        }
        invoice.status = InvoiceStatus::Paid;
        invoice.paid_date = Some(stamp.paid_date);
        invoice.payment_id = Some(stamp.payment_id.clone());
        invoice.gateway_reference = Some(stamp.gateway_reference.clone());
        Ok(Some(invoice.clone()))
    }

    async fn set_invoice_pdf_url(&self, invoice_id: &str, pdf_url: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let invoice = inner
            .invoices
            .get_mut(invoice_id)
            .ok_or_else(|| StoreError::NotFound(format!("Invoice {invoice_id} not found.")))?;
        invoice.pdf_url = Some(pdf_url.to_string());
        Ok(())
    }

    async fn cancel_open_invoices(&self, tenancy_id: &str) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut cancelled = 0;
        for invoice in inner.invoices.values_mut() {
            if invoice.tenancy_id == tenancy_id
                && invoice.status.can_transition_to(InvoiceStatus::Cancelled)
            {
                invoice.status = InvoiceStatus::Cancelled;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn find_payment_by_reference(
        &self,
        gateway_reference: &str,
    ) -> StoreResult<Option<Payment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .payment_refs
            .get(gateway_reference)
            .and_then(|payment_id| inner.payments.get(payment_id))
            .cloned())
    }

    async fn record_payment(&self, payment: &Payment) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.payment_refs.contains_key(&payment.gateway_reference) {
            return Ok(false);
        }
        inner
            .payment_refs
            .insert(payment.gateway_reference.clone(), payment.payment_id.clone());
        inner
            .payments
            .insert(payment.payment_id.clone(), payment.clone());
        if let (Some(landlord_id), Some(property_id)) =
            (payment.landlord_id.clone(), payment.property_id.clone())
        {
            inner
                .property_payments
                .entry((landlord_id, property_id))
                .or_default()
                .push(payment.clone());
        }
        Ok(true)
    }

    async fn list_property_payments(
        &self,
        landlord_id: &str,
        property_id: &str,
    ) -> StoreResult<Vec<Payment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .property_payments
            .get(&(landlord_id.to_string(), property_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn record_receipt(&self, receipt: &Receipt) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .receipts
            .entry(receipt.tenant_id.clone())
            .or_default()
            .push(receipt.clone());
        Ok(())
    }

    async fn list_receipts_for_tenant(&self, tenant_id: &str) -> StoreResult<Vec<Receipt>> {
        let inner = self.inner.read().await;
        Ok(inner.receipts.get(tenant_id).cloned().unwrap_or_default())
    }

    async fn upsert_unit(&self, unit: Unit) -> StoreResult<()> {
        self.inner.write().await.units.insert(unit.id.clone(), unit);
        Ok(())
    }

    async fn get_unit(&self, unit_id: &str) -> StoreResult<Option<Unit>> {
        Ok(self.inner.read().await.units.get(unit_id).cloned())
    }

    async fn stamp_unit_payment(
        &self,
        landlord_id: &str,
        property_id: &str,
        unit_id: &str,
        stamp: &UnitPaymentStamp,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(unit) = inner.units.get_mut(unit_id) else {
            return Ok(false);
        };
        if unit.landlord_id != landlord_id || unit.property_id != property_id {
            return Ok(false);
        }
        unit.last_payment_id = Some(stamp.payment_id.clone());
        unit.last_payment_date = Some(stamp.paid_at);
        unit.last_payment_amount = Some(stamp.amount);
        unit.rent_status = RentStatus::Paid;
        Ok(true)
    }

    async fn insert_reminder_if_absent(&self, reminder: Reminder) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.reminders.contains_key(&reminder.id) {
            return Ok(false);
        }
        inner.reminders.insert(reminder.id.clone(), reminder);
        Ok(true)
    }

    async fn list_pending_reminders_for_invoice(
        &self,
        owner_id: &str,
        invoice_id: &str,
    ) -> StoreResult<Vec<Reminder>> {
        let inner = self.inner.read().await;
        Ok(inner
            .reminders
            .values()
            .filter(|r| {
                r.owner_id == owner_id
                    && r.invoice_id == invoice_id
                    && r.status != ReminderStatus::Paid
            })
            .cloned()
            .collect())
    }

    async fn mark_reminder_paid(&self, reminder_id: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(reminder) = inner.reminders.get_mut(reminder_id) else {
            return Ok(false);
        };
        if reminder.status == ReminderStatus::Paid {
            return Ok(false);
        }
        reminder.status = ReminderStatus::Paid;
        Ok(true)
    }

    async fn create_invite_token(&self, token: InviteToken) -> StoreResult<InviteToken> {
        let mut inner = self.inner.write().await;
        if inner.invite_tokens.contains_key(&token.token) {
            return Err(StoreError::Conflict(
                "Invite token already exists.".to_string(),
            ));
        }
        inner
            .invite_tokens
            .insert(token.token.clone(), token.clone());
        Ok(token)
    }

    async fn get_invite_token(&self, token: &str) -> StoreResult<Option<InviteToken>> {
        Ok(self.inner.read().await.invite_tokens.get(token).cloned())
    }

    async fn consume_invite_token(
        &self,
        token: &str,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<InviteToken>> {
        let mut inner = self.inner.write().await;
        let Some(invite) = inner.invite_tokens.get_mut(token) else {
            return Err(StoreError::NotFound("Invite token not found.".to_string()));
        };
        if invite.status != InviteTokenStatus::Pending {
            return Ok(None);
        }
        invite.status = InviteTokenStatus::Used;
        invite.used_at = Some(now);
        invite.used_by = Some(tenant_id.to_string());
        Ok(Some(invite.clone()))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{self, BillingCycle, Gateway};
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn invoice(id: &str, status: InvoiceStatus, due: DateTime<Utc>) -> Invoice {
        Invoice {
            id: id.to_string(),
            invoice_number: format!("INV-{id}"),
            tenancy_id: "ten-1".to_string(),
            tenant_id: Some("tenant-1".to_string()),
            landlord_id: "landlord-1".to_string(),
            property_id: "prop-1".to_string(),
            unit_id: Some("unit-1".to_string()),
            amount: 100_000.0,
            currency: "NGN".to_string(),
            billing_cycle: BillingCycle::Monthly,
            status,
            due_date: due,
            paid_date: None,
            payment_id: None,
            gateway_reference: None,
            pdf_url: None,
            created_at: due,
        }
    }

    fn tenancy(id: &str) -> Tenancy {
        Tenancy {
            id: id.to_string(),
            tenant_id: "tenant-1".to_string(),
            landlord_id: "landlord-1".to_string(),
            property_id: "prop-1".to_string(),
            unit_id: "unit-1".to_string(),
            rent_amount: 100_000.0,
            currency: "NGN".to_string(),
            billing_cycle: BillingCycle::Monthly,
            status: TenancyStatus::Active,
            invoice_scheduling_enabled: true,
            next_invoice_date: utc(2024, 3, 1),
            start_date: utc(2024, 3, 1),
            end_date: None,
            created_at: utc(2024, 2, 20),
        }
    }

    fn payment(reference: &str) -> Payment {
        Payment {
            payment_id: model::generate_payment_id(Utc::now()),
            invoice_id: Some("inv-1".to_string()),
            tenant_id: Some("tenant-1".to_string()),
            landlord_id: Some("landlord-1".to_string()),
            property_id: Some("prop-1".to_string()),
            unit_id: Some("unit-1".to_string()),
            amount: 100_000.0,
            currency: "NGN".to_string(),
            gateway: Gateway::Paystack,
            gateway_reference: reference.to_string(),
            paid_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn mark_invoice_paid_is_a_cas() {
        let store = InMemoryStore::new();
        store.create_tenancy(tenancy("ten-1")).await.unwrap();
        store
            .commit_invoice_batch(InvoiceBatch {
                tenancy_id: "ten-1".to_string(),
                invoices: vec![invoice("inv-1", InvoiceStatus::Sent, utc(2024, 3, 1))],
                next_invoice_date: utc(2024, 4, 1),
            })
            .await
            .unwrap();

        let stamp = PaidStamp {
            payment_id: "PAY-A".to_string(),
            gateway_reference: "ref-a".to_string(),
            paid_date: utc(2024, 3, 2),
        };
        let updated = store.mark_invoice_paid("inv-1", &stamp).await.unwrap();
        assert_eq!(
            updated.as_ref().and_then(|i| i.payment_id.as_deref()),
            Some("PAY-A")
        );

        // A second settlement attempt must not replace the payment id.
        let second = PaidStamp {
            payment_id: "PAY-B".to_string(),
            gateway_reference: "ref-b".to_string(),
            paid_date: utc(2024, 3, 3),
        };
        assert!(store.mark_invoice_paid("inv-1", &second).await.unwrap().is_none());
        let invoice = store.get_invoice("inv-1").await.unwrap().unwrap();
        assert_eq!(invoice.payment_id.as_deref(), Some("PAY-A"));
    }

    #[tokio::test]
    async fn record_payment_dedupes_on_gateway_reference() {
        let store = InMemoryStore::new();
        assert!(store.record_payment(&payment("ref-1")).await.unwrap());
        assert!(!store.record_payment(&payment("ref-1")).await.unwrap());
        assert!(store
            .find_payment_by_reference("ref-1")
            .await
            .unwrap()
            .is_some());
        let copies = store
            .list_property_payments("landlord-1", "prop-1")
            .await
            .unwrap();
        assert_eq!(copies.len(), 1);
    }

    #[tokio::test]
    async fn invoice_batch_is_atomic_on_conflict() {
        let store = InMemoryStore::new();
        store.create_tenancy(tenancy("ten-1")).await.unwrap();
        store
            .commit_invoice_batch(InvoiceBatch {
                tenancy_id: "ten-1".to_string(),
                invoices: vec![invoice("inv-1", InvoiceStatus::Sent, utc(2024, 3, 1))],
                next_invoice_date: utc(2024, 4, 1),
            })
            .await
            .unwrap();

        // Batch containing a duplicate id commits nothing.
        let result = store
            .commit_invoice_batch(InvoiceBatch {
                tenancy_id: "ten-1".to_string(),
                invoices: vec![
                    invoice("inv-2", InvoiceStatus::Sent, utc(2024, 4, 1)),
                    invoice("inv-1", InvoiceStatus::Sent, utc(2024, 5, 1)),
                ],
                next_invoice_date: utc(2024, 6, 1),
            })
            .await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert!(store.get_invoice("inv-2").await.unwrap().is_none());
        let t = store.get_tenancy("ten-1").await.unwrap().unwrap();
        assert_eq!(t.next_invoice_date, utc(2024, 4, 1));
    }

    #[tokio::test]
    async fn close_tenancy_fires_once() {
        let store = InMemoryStore::new();
        store.create_tenancy(tenancy("ten-1")).await.unwrap();
        assert!(store
            .close_tenancy("ten-1", utc(2024, 5, 1))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .close_tenancy("ten-1", utc(2024, 5, 2))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn reminder_upsert_is_exactly_once() {
        let store = InMemoryStore::new();
        let reminder = Reminder {
            id: model::reminder_id("landlord-1", "inv-1", 7),
            owner_id: "landlord-1".to_string(),
            owner_role: crate::model::OwnerRole::Landlord,
            title: model::reminder_title(7),
            property_id: "prop-1".to_string(),
            unit_id: None,
            invoice_id: "inv-1".to_string(),
            tenancy_id: "ten-1".to_string(),
            due_date: utc(2024, 3, 8),
            amount: 100_000.0,
            currency: "NGN".to_string(),
            days_before: 7,
            status: ReminderStatus::Pending,
            created_at: utc(2024, 3, 1),
        };
        assert!(store
            .insert_reminder_if_absent(reminder.clone())
            .await
            .unwrap());
        assert!(!store.insert_reminder_if_absent(reminder).await.unwrap());
    }

    #[tokio::test]
    async fn invite_token_consumes_once() {
        let store = InMemoryStore::new();
        store
            .create_invite_token(InviteToken {
                token: "tok-1".to_string(),
                landlord_id: "landlord-1".to_string(),
                property_id: "prop-1".to_string(),
                unit_id: "unit-1".to_string(),
                rent_amount: 100_000.0,
                currency: "NGN".to_string(),
                billing_cycle: BillingCycle::Monthly,
                start_date: utc(2024, 3, 1),
                status: InviteTokenStatus::Pending,
                expires_at: utc(2024, 4, 1),
                used_at: None,
                used_by: None,
            })
            .await
            .unwrap();

        let first = store
            .consume_invite_token("tok-1", "tenant-1", utc(2024, 3, 1))
            .await
            .unwrap();
        assert!(first.is_some());
        let second = store
            .consume_invite_token("tok-1", "tenant-2", utc(2024, 3, 1))
            .await
            .unwrap();
        assert!(second.is_none());
    }
}
