use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{
    Invoice, InviteToken, PaidStamp, Payment, Receipt, Reminder, Tenancy, Unit, UnitPaymentStamp,
};

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One tenancy's generation-pass output. Committed atomically: either all
/// invoices become visible and the tenancy's `next_invoice_date` advances,
/// or nothing does and the next run reprocesses the tenancy.
#[derive(Debug, Clone)]
pub struct InvoiceBatch {
    pub tenancy_id: String,
    pub invoices: Vec<Invoice>,
    pub next_invoice_date: DateTime<Utc>,
}

/// The billing document store. Postgres in production, in-memory for tests
/// and local development; pipeline logic only ever sees this trait.
///
/// Every mutation that guards a lifecycle transition is a compare-and-swap:
/// the precondition is evaluated inside the backend, so overlapping job runs
/// and duplicate webhook deliveries cannot corrupt state.
#[async_trait]
pub trait BillingStore: Send + Sync {
    // --- tenancies ---
    async fn create_tenancy(&self, tenancy: Tenancy) -> StoreResult<Tenancy>;
    async fn get_tenancy(&self, tenancy_id: &str) -> StoreResult<Option<Tenancy>>;
    /// Tenancies with `status=active`, scheduling enabled and
    /// `next_invoice_date < cutoff`. The cutoff is exclusive: callers pass
    /// the start of the first day NOT billed. Ordered by `next_invoice_date`.
    async fn list_billable_tenancies(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Tenancy>>;
    /// CAS `active -> closed`. `Ok(Some)` only when this call performed the
    /// transition; `Ok(None)` when the tenancy was already closed.
    async fn close_tenancy(
        &self,
        tenancy_id: &str,
        closed_at: DateTime<Utc>,
    ) -> StoreResult<Option<Tenancy>>;

    // --- invoices ---
    async fn commit_invoice_batch(&self, batch: InvoiceBatch) -> StoreResult<()>;
    async fn get_invoice(&self, invoice_id: &str) -> StoreResult<Option<Invoice>>;
    async fn list_invoices_for_tenancy(&self, tenancy_id: &str) -> StoreResult<Vec<Invoice>>;
    /// Invoices with `status=sent` and `due_date < now`.
    async fn list_invoices_past_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Invoice>>;
    /// CAS `sent -> overdue`. `false` when the invoice was no longer `sent`.
    async fn mark_invoice_overdue(&self, invoice_id: &str) -> StoreResult<bool>;
    /// Invoices with `status in (sent, overdue)` and `from <= due_date < to`.
    async fn list_invoices_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Invoice>>;
    /// CAS `sent|overdue -> paid`, stamping payment id, reference and paid
    /// date. `Ok(None)` when the invoice was not payable (already settled or
    /// cancelled); the paid invoice keeps its first payment id forever.
    async fn mark_invoice_paid(
        &self,
        invoice_id: &str,
        stamp: &PaidStamp,
    ) -> StoreResult<Option<Invoice>>;
    async fn set_invoice_pdf_url(&self, invoice_id: &str, pdf_url: &str) -> StoreResult<()>;
    /// Atomically cancel every `draft|sent` invoice of a tenancy. Returns the
    /// number cancelled; `overdue`, `paid` and `cancelled` are untouched.
    async fn cancel_open_invoices(&self, tenancy_id: &str) -> StoreResult<u64>;

    // --- payments ---
    async fn find_payment_by_reference(
        &self,
        gateway_reference: &str,
    ) -> StoreResult<Option<Payment>>;
    /// Insert the global payment record and, when landlord+property are
    /// known, the per-property denormalized copy, as one atomic group.
    /// `false` when a payment with this `gateway_reference` already exists.
    async fn record_payment(&self, payment: &Payment) -> StoreResult<bool>;
    /// Legacy dashboard read path over the denormalized copy.
    async fn list_property_payments(
        &self,
        landlord_id: &str,
        property_id: &str,
    ) -> StoreResult<Vec<Payment>>;

    // --- receipts ---
    async fn record_receipt(&self, receipt: &Receipt) -> StoreResult<()>;
    async fn list_receipts_for_tenant(&self, tenant_id: &str) -> StoreResult<Vec<Receipt>>;

    // --- units ---
    async fn upsert_unit(&self, unit: Unit) -> StoreResult<()>;
    async fn get_unit(&self, unit_id: &str) -> StoreResult<Option<Unit>>;
    /// `false` when the unit does not exist (settlement logs and moves on).
    async fn stamp_unit_payment(
        &self,
        landlord_id: &str,
        property_id: &str,
        unit_id: &str,
        stamp: &UnitPaymentStamp,
    ) -> StoreResult<bool>;

    // --- reminders ---
    /// Deterministic-id upsert: `false` when the reminder already existed.
    async fn insert_reminder_if_absent(&self, reminder: Reminder) -> StoreResult<bool>;
    async fn list_pending_reminders_for_invoice(
        &self,
        owner_id: &str,
        invoice_id: &str,
    ) -> StoreResult<Vec<Reminder>>;
    async fn mark_reminder_paid(&self, reminder_id: &str) -> StoreResult<bool>;

    // --- invite tokens ---
    async fn create_invite_token(&self, token: InviteToken) -> StoreResult<InviteToken>;
    async fn get_invite_token(&self, token: &str) -> StoreResult<Option<InviteToken>>;
    /// CAS `pending -> used`. `Ok(None)` when the token was already consumed
    /// or revoked.
    async fn consume_invite_token(
        &self,
        token: &str,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<InviteToken>>;

    async fn health_check(&self) -> StoreResult<()>;
    fn backend_name(&self) -> &'static str;
}
