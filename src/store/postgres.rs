//! PostgreSQL implementation of the billing store.
//!
//! Reads come back as `row_to_json(t)` and deserialize straight into the
//! typed models; lifecycle transitions are conditional updates
//! (`WHERE status IN (...) RETURNING`), so the precondition check and the
//! write are one statement. Multi-row groups (invoice batches, payment +
//! denormalized copy) run in a single transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::model::{
    Invoice, InviteToken, PaidStamp, Payment, Receipt, Reminder, Tenancy, Unit, UnitPaymentStamp,
};

use super::{BillingStore, InvoiceBatch, StoreError, StoreResult};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_db_error(error: sqlx::Error) -> StoreError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");
    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return StoreError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    StoreError::Backend("Database operation failed.".to_string())
}

fn row_json(row: &PgRow) -> Option<Value> {
    row.try_get::<Option<Value>, _>("row").ok().flatten()
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> StoreResult<T> {
    serde_json::from_value(value)
        .map_err(|error| StoreError::Backend(format!("Failed to decode {what} row: {error}")))
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<PgRow>, what: &str) -> StoreResult<Vec<T>> {
    rows.iter()
        .filter_map(row_json)
        .map(|value| decode(value, what))
        .collect()
}

#[async_trait]
impl BillingStore for PostgresStore {
    async fn create_tenancy(&self, tenancy: Tenancy) -> StoreResult<Tenancy> {
        sqlx::query(
            "INSERT INTO tenancies
               (id, tenant_id, landlord_id, property_id, unit_id, rent_amount, currency,
                billing_cycle, status, invoice_scheduling_enabled, next_invoice_date,
                start_date, end_date, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(&tenancy.id)
        .bind(&tenancy.tenant_id)
        .bind(&tenancy.landlord_id)
        .bind(&tenancy.property_id)
        .bind(&tenancy.unit_id)
        .bind(tenancy.rent_amount)
        .bind(&tenancy.currency)
        .bind(tenancy.billing_cycle.as_str())
        .bind(tenancy.status.as_str())
        .bind(tenancy.invoice_scheduling_enabled)
        .bind(tenancy.next_invoice_date)
        .bind(tenancy.start_date)
        .bind(tenancy.end_date)
        .bind(tenancy.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(tenancy)
    }

    async fn get_tenancy(&self, tenancy_id: &str) -> StoreResult<Option<Tenancy>> {
        let row = sqlx::query("SELECT row_to_json(t) AS row FROM tenancies t WHERE id = $1")
            .bind(tenancy_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        row.as_ref()
            .and_then(row_json)
            .map(|value| decode(value, "tenancy"))
            .transpose()
    }

    async fn list_billable_tenancies(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Tenancy>> {
        let rows = sqlx::query(
            "SELECT row_to_json(t) AS row FROM tenancies t
             WHERE t.status = 'active'
               AND t.invoice_scheduling_enabled
               AND t.next_invoice_date < $1
             ORDER BY t.next_invoice_date ASC
             LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        decode_rows(rows, "tenancy")
    }

    async fn close_tenancy(
        &self,
        tenancy_id: &str,
        closed_at: DateTime<Utc>,
    ) -> StoreResult<Option<Tenancy>> {
        let row = sqlx::query(
            "UPDATE tenancies t
             SET status = 'closed', end_date = $2
             WHERE t.id = $1 AND t.status = 'active'
             RETURNING row_to_json(t) AS row",
        )
        .bind(tenancy_id)
        .bind(closed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        if let Some(value) = row.as_ref().and_then(row_json) {
            return Ok(Some(decode(value, "tenancy")?));
        }

        let exists = sqlx::query("SELECT 1 AS one FROM tenancies WHERE id = $1")
            .bind(tenancy_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!(
                "Tenancy {tenancy_id} not found."
            )));
        }
        Ok(None)
    }

    async fn commit_invoice_batch(&self, batch: InvoiceBatch) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        for invoice in &batch.invoices {
            sqlx::query(
                "INSERT INTO invoices
                   (id, invoice_number, tenancy_id, tenant_id, landlord_id, property_id,
                    unit_id, amount, currency, billing_cycle, status, due_date, paid_date,
                    payment_id, gateway_reference, pdf_url, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
            )
            .bind(&invoice.id)
            .bind(&invoice.invoice_number)
            .bind(&invoice.tenancy_id)
            .bind(&invoice.tenant_id)
            .bind(&invoice.landlord_id)
            .bind(&invoice.property_id)
            .bind(&invoice.unit_id)
            .bind(invoice.amount)
            .bind(&invoice.currency)
            .bind(invoice.billing_cycle.as_str())
            .bind(invoice.status.as_str())
            .bind(invoice.due_date)
            .bind(invoice.paid_date)
            .bind(&invoice.payment_id)
            .bind(&invoice.gateway_reference)
            .bind(&invoice.pdf_url)
            .bind(invoice.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;
        }
        let updated = sqlx::query("UPDATE tenancies SET next_invoice_date = $2 WHERE id = $1")
            .bind(&batch.tenancy_id)
            .bind(batch.next_invoice_date)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "Tenancy {} not found.",
                batch.tenancy_id
            )));
        }
        tx.commit().await.map_err(map_db_error)
    }

    async fn get_invoice(&self, invoice_id: &str) -> StoreResult<Option<Invoice>> {
        let row = sqlx::query("SELECT row_to_json(t) AS row FROM invoices t WHERE id = $1")
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        row.as_ref()
            .and_then(row_json)
            .map(|value| decode(value, "invoice"))
            .transpose()
    }

    async fn list_invoices_for_tenancy(&self, tenancy_id: &str) -> StoreResult<Vec<Invoice>> {
        let rows = sqlx::query(
            "SELECT row_to_json(t) AS row FROM invoices t
             WHERE t.tenancy_id = $1
             ORDER BY t.due_date ASC",
        )
        .bind(tenancy_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        decode_rows(rows, "invoice")
    }

    async fn list_invoices_past_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Invoice>> {
        let rows = sqlx::query(
            "SELECT row_to_json(t) AS row FROM invoices t
             WHERE t.status = 'sent' AND t.due_date < $1
             ORDER BY t.due_date ASC
             LIMIT $2",
        )
        .bind(now)
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        decode_rows(rows, "invoice")
    }

    async fn mark_invoice_overdue(&self, invoice_id: &str) -> StoreResult<bool> {
        let updated = sqlx::query(
            "UPDATE invoices SET status = 'overdue'
             WHERE id = $1 AND status = 'sent'",
        )
        .bind(invoice_id)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(updated.rows_affected() > 0)
    }

    async fn list_invoices_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Invoice>> {
        let rows = sqlx::query(
            "SELECT row_to_json(t) AS row FROM invoices t
             WHERE t.status IN ('sent', 'overdue')
               AND t.due_date >= $1 AND t.due_date < $2
             ORDER BY t.due_date ASC
             LIMIT $3",
        )
        .bind(from)
        .bind(to)
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        decode_rows(rows, "invoice")
    }

    async fn mark_invoice_paid(
        &self,
        invoice_id: &str,
        stamp: &PaidStamp,
    ) -> StoreResult<Option<Invoice>> {
        let row = sqlx::query(
            "UPDATE invoices t
             SET status = 'paid', paid_date = $2, payment_id = $3, gateway_reference = $4
             WHERE t.id = $1 AND t.status IN ('sent', 'overdue')
             RETURNING row_to_json(t) AS row",
        )
        .bind(invoice_id)
        .bind(stamp.paid_date)
        .bind(&stamp.payment_id)
        .bind(&stamp.gateway_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        row.as_ref()
            .and_then(row_json)
            .map(|value| decode(value, "invoice"))
            .transpose()
    }

    async fn set_invoice_pdf_url(&self, invoice_id: &str, pdf_url: &str) -> StoreResult<()> {
        let updated = sqlx::query("UPDATE invoices SET pdf_url = $2 WHERE id = $1")
            .bind(invoice_id)
            .bind(pdf_url)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "Invoice {invoice_id} not found."
            )));
        }
        Ok(())
    }

    async fn cancel_open_invoices(&self, tenancy_id: &str) -> StoreResult<u64> {
        let updated = sqlx::query(
            "UPDATE invoices SET status = 'cancelled'
             WHERE tenancy_id = $1 AND status IN ('draft', 'sent')",
        )
        .bind(tenancy_id)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(updated.rows_affected())
    }

    async fn find_payment_by_reference(
        &self,
        gateway_reference: &str,
    ) -> StoreResult<Option<Payment>> {
        let row = sqlx::query(
            "SELECT row_to_json(t) AS row FROM payments t WHERE gateway_reference = $1",
        )
        .bind(gateway_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        row.as_ref()
            .and_then(row_json)
            .map(|value| decode(value, "payment"))
            .transpose()
    }

    async fn record_payment(&self, payment: &Payment) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        let inserted = sqlx::query(
            "INSERT INTO payments
               (payment_id, invoice_id, tenant_id, landlord_id, property_id, unit_id,
                amount, currency, gateway, gateway_reference, paid_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (gateway_reference) DO NOTHING",
        )
        .bind(&payment.payment_id)
        .bind(&payment.invoice_id)
        .bind(&payment.tenant_id)
        .bind(&payment.landlord_id)
        .bind(&payment.property_id)
        .bind(&payment.unit_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.gateway.as_str())
        .bind(&payment.gateway_reference)
        .bind(payment.paid_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;

        if inserted.rows_affected() == 0 {
            return Ok(false);
        }

        if let (Some(landlord_id), Some(property_id)) =
            (&payment.landlord_id, &payment.property_id)
        {
            sqlx::query(
                "INSERT INTO property_payments
                   (payment_id, landlord_id, property_id, invoice_id, tenant_id, unit_id,
                    amount, currency, gateway, gateway_reference, paid_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(&payment.payment_id)
            .bind(landlord_id)
            .bind(property_id)
            .bind(&payment.invoice_id)
            .bind(&payment.tenant_id)
            .bind(&payment.unit_id)
            .bind(payment.amount)
            .bind(&payment.currency)
            .bind(payment.gateway.as_str())
            .bind(&payment.gateway_reference)
            .bind(payment.paid_at)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;
        }

        tx.commit().await.map_err(map_db_error)?;
        Ok(true)
    }

    async fn list_property_payments(
        &self,
        landlord_id: &str,
        property_id: &str,
    ) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query(
            "SELECT row_to_json(t) AS row FROM property_payments t
             WHERE t.landlord_id = $1 AND t.property_id = $2
             ORDER BY t.paid_at DESC",
        )
        .bind(landlord_id)
        .bind(property_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        decode_rows(rows, "payment")
    }

    async fn record_receipt(&self, receipt: &Receipt) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO receipts
               (payment_id, tenant_id, invoice_id, invoice_number, amount, currency,
                gateway, paid_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (payment_id, tenant_id) DO NOTHING",
        )
        .bind(&receipt.payment_id)
        .bind(&receipt.tenant_id)
        .bind(&receipt.invoice_id)
        .bind(&receipt.invoice_number)
        .bind(receipt.amount)
        .bind(&receipt.currency)
        .bind(receipt.gateway.as_str())
        .bind(receipt.paid_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    async fn list_receipts_for_tenant(&self, tenant_id: &str) -> StoreResult<Vec<Receipt>> {
        let rows = sqlx::query(
            "SELECT row_to_json(t) AS row FROM receipts t
             WHERE t.tenant_id = $1
             ORDER BY t.paid_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        decode_rows(rows, "receipt")
    }

    async fn upsert_unit(&self, unit: Unit) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO units
               (id, landlord_id, property_id, label, rent_status, last_payment_id,
                last_payment_date, last_payment_amount)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
               landlord_id = EXCLUDED.landlord_id,
               property_id = EXCLUDED.property_id,
               label = EXCLUDED.label",
        )
        .bind(&unit.id)
        .bind(&unit.landlord_id)
        .bind(&unit.property_id)
        .bind(&unit.label)
        .bind(unit.rent_status.as_str())
        .bind(&unit.last_payment_id)
        .bind(unit.last_payment_date)
        .bind(unit.last_payment_amount)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    async fn get_unit(&self, unit_id: &str) -> StoreResult<Option<Unit>> {
        let row = sqlx::query("SELECT row_to_json(t) AS row FROM units t WHERE id = $1")
            .bind(unit_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        row.as_ref()
            .and_then(row_json)
            .map(|value| decode(value, "unit"))
            .transpose()
    }

    async fn stamp_unit_payment(
        &self,
        landlord_id: &str,
        property_id: &str,
        unit_id: &str,
        stamp: &UnitPaymentStamp,
    ) -> StoreResult<bool> {
        let updated = sqlx::query(
            "UPDATE units
             SET last_payment_id = $4, last_payment_date = $5, last_payment_amount = $6,
                 rent_status = 'paid'
             WHERE id = $1 AND landlord_id = $2 AND property_id = $3",
        )
        .bind(unit_id)
        .bind(landlord_id)
        .bind(property_id)
        .bind(&stamp.payment_id)
        .bind(stamp.paid_at)
        .bind(stamp.amount)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(updated.rows_affected() > 0)
    }

    async fn insert_reminder_if_absent(&self, reminder: Reminder) -> StoreResult<bool> {
        let inserted = sqlx::query(
            "INSERT INTO reminders
               (id, owner_id, owner_role, title, property_id, unit_id, invoice_id,
                tenancy_id, due_date, amount, currency, days_before, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&reminder.id)
        .bind(&reminder.owner_id)
        .bind(reminder.owner_role.as_str())
        .bind(&reminder.title)
        .bind(&reminder.property_id)
        .bind(&reminder.unit_id)
        .bind(&reminder.invoice_id)
        .bind(&reminder.tenancy_id)
        .bind(reminder.due_date)
        .bind(reminder.amount)
        .bind(&reminder.currency)
        .bind(reminder.days_before as i32)
        .bind(reminder.status.as_str())
        .bind(reminder.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(inserted.rows_affected() > 0)
    }

    async fn list_pending_reminders_for_invoice(
        &self,
        owner_id: &str,
        invoice_id: &str,
    ) -> StoreResult<Vec<Reminder>> {
        let rows = sqlx::query(
            "SELECT row_to_json(t) AS row FROM reminders t
             WHERE t.owner_id = $1 AND t.invoice_id = $2 AND t.status <> 'paid'",
        )
        .bind(owner_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        decode_rows(rows, "reminder")
    }

    async fn mark_reminder_paid(&self, reminder_id: &str) -> StoreResult<bool> {
        let updated = sqlx::query(
            "UPDATE reminders SET status = 'paid'
             WHERE id = $1 AND status <> 'paid'",
        )
        .bind(reminder_id)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(updated.rows_affected() > 0)
    }

    async fn create_invite_token(&self, token: InviteToken) -> StoreResult<InviteToken> {
        sqlx::query(
            "INSERT INTO invite_tokens
               (token, landlord_id, property_id, unit_id, rent_amount, currency,
                billing_cycle, status, start_date, expires_at, used_at, used_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&token.token)
        .bind(&token.landlord_id)
        .bind(&token.property_id)
        .bind(&token.unit_id)
        .bind(token.rent_amount)
        .bind(&token.currency)
        .bind(token.billing_cycle.as_str())
        .bind(token.status.as_str())
        .bind(token.start_date)
        .bind(token.expires_at)
        .bind(token.used_at)
        .bind(&token.used_by)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(token)
    }

    async fn get_invite_token(&self, token: &str) -> StoreResult<Option<InviteToken>> {
        let row = sqlx::query("SELECT row_to_json(t) AS row FROM invite_tokens t WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        row.as_ref()
            .and_then(row_json)
            .map(|value| decode(value, "invite token"))
            .transpose()
    }

    async fn consume_invite_token(
        &self,
        token: &str,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<InviteToken>> {
        let row = sqlx::query(
            "UPDATE invite_tokens t
             SET status = 'used', used_at = $2, used_by = $3
             WHERE t.token = $1 AND t.status = 'pending'
             RETURNING row_to_json(t) AS row",
        )
        .bind(token)
        .bind(now)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        if let Some(value) = row.as_ref().and_then(row_json) {
            return Ok(Some(decode(value, "invite token")?));
        }

        let exists = sqlx::query("SELECT 1 AS one FROM invite_tokens WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        if exists.is_none() {
            return Err(StoreError::NotFound("Invite token not found.".to_string()));
        }
        Ok(None)
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
