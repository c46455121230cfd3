use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How often a tenancy bills rent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl BillingCycle {
    /// Next due date after billing the period that started at `from`.
    ///
    /// Calendar cycles keep the same day-of-month, clamped at month end
    /// (Jan 31 + 1 month = Feb 28/29).
    pub fn advance(self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Daily => from + Duration::days(1),
            Self::Weekly => from + Duration::days(7),
            Self::Monthly => from
                .checked_add_months(Months::new(1))
                .unwrap_or_else(|| from + Duration::days(30)),
            Self::Yearly => from
                .checked_add_months(Months::new(12))
                .unwrap_or_else(|| from + Duration::days(365)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenancyStatus {
    Active,
    Closed,
}

impl TenancyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Overdue,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    /// The only legal moves in the invoice lifecycle. Everything else
    /// (e.g. `paid -> sent`) is rejected at the store boundary.
    pub fn can_transition_to(self, next: InvoiceStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Sent)
                | (Self::Draft, Self::Cancelled)
                | (Self::Sent, Self::Overdue)
                | (Self::Sent, Self::Paid)
                | (Self::Sent, Self::Cancelled)
                | (Self::Overdue, Self::Paid)
        )
    }

    /// Still awaiting payment.
    pub fn is_payable(self) -> bool {
        matches!(self, Self::Sent | Self::Overdue)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Overdue => "overdue",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Paid,
}

impl ReminderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerRole {
    Landlord,
    Tenant,
}

impl OwnerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Landlord => "landlord",
            Self::Tenant => "tenant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
    Stripe,
    Paystack,
}

impl Gateway {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stripe" => Some(Self::Stripe),
            "paystack" => Some(Self::Paystack),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Paystack => "paystack",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteTokenStatus {
    Pending,
    Used,
    Revoked,
}

impl InviteTokenStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Used => "used",
            Self::Revoked => "revoked",
        }
    }
}

/// An active lease binding a tenant to a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenancy {
    pub id: String,
    pub tenant_id: String,
    pub landlord_id: String,
    pub property_id: String,
    pub unit_id: String,
    pub rent_amount: f64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub status: TenancyStatus,
    pub invoice_scheduling_enabled: bool,
    pub next_invoice_date: DateTime<Utc>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A billing obligation for one tenancy cycle. Billing attributes are a
/// snapshot of the tenancy at generation time and never change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub invoice_number: String,
    pub tenancy_id: String,
    pub tenant_id: Option<String>,
    pub landlord_id: String,
    pub property_id: String,
    pub unit_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub status: InvoiceStatus,
    pub due_date: DateTime<Utc>,
    pub paid_date: Option<DateTime<Utc>>,
    pub payment_id: Option<String>,
    pub gateway_reference: Option<String>,
    pub pdf_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An immutable settlement record. `gateway_reference` is the dedup key:
/// at most one payment per successful gateway transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: String,
    pub invoice_id: Option<String>,
    pub tenant_id: Option<String>,
    pub landlord_id: Option<String>,
    pub property_id: Option<String>,
    pub unit_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub gateway: Gateway,
    pub gateway_reference: String,
    pub paid_at: DateTime<Utc>,
}

/// Tenant-facing copy of a settlement, keyed by payment id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub payment_id: String,
    pub tenant_id: String,
    pub invoice_id: Option<String>,
    pub invoice_number: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub gateway: Gateway,
    pub paid_at: DateTime<Utc>,
}

/// A notification obligation owned by a landlord or tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub owner_id: String,
    pub owner_role: OwnerRole,
    pub title: String,
    pub property_id: String,
    pub unit_id: Option<String>,
    pub invoice_id: String,
    pub tenancy_id: String,
    pub due_date: DateTime<Utc>,
    pub amount: f64,
    pub currency: String,
    pub days_before: u32,
    pub status: ReminderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RentStatus {
    Pending,
    Paid,
}

impl RentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
        }
    }
}

/// A rentable unit. Only the last-payment stamp is owned by this service;
/// the rest of the unit record belongs to the wider product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    pub landlord_id: String,
    pub property_id: String,
    pub label: Option<String>,
    pub rent_status: RentStatus,
    pub last_payment_id: Option<String>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub last_payment_amount: Option<f64>,
}

/// Denormalized last-payment stamp written onto a unit after settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitPaymentStamp {
    pub payment_id: String,
    pub paid_at: DateTime<Utc>,
    pub amount: f64,
}

/// Single-use token carrying the lease terms; consuming it creates the
/// tenancy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteToken {
    pub token: String,
    pub landlord_id: String,
    pub property_id: String,
    pub unit_id: String,
    pub rent_amount: f64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub start_date: DateTime<Utc>,
    pub status: InviteTokenStatus,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by: Option<String>,
}

/// Fields stamped onto an invoice when it settles.
#[derive(Debug, Clone)]
pub struct PaidStamp {
    pub payment_id: String,
    pub gateway_reference: String,
    pub paid_date: DateTime<Utc>,
}

/// `PAY-<base36 millis>-<4 random>`, uppercased. Collision-resistant without
/// a counter: the timestamp orders ids, the suffix breaks same-millisecond
/// ties.
pub fn generate_payment_id(now: DateTime<Utc>) -> String {
    format!(
        "PAY-{}-{}",
        base36(now.timestamp_millis().max(0) as u64),
        random_suffix(4)
    )
    .to_uppercase()
}

/// Human-readable invoice number, same time+random shape as payment ids.
pub fn generate_invoice_number(now: DateTime<Utc>) -> String {
    format!(
        "INV-{}-{}",
        base36(now.timestamp_millis().max(0) as u64),
        random_suffix(4)
    )
    .to_uppercase()
}

/// Deterministic reminder id: the same (owner, invoice, lead time) triple
/// always maps to the same id, so creation is an exactly-once upsert even
/// across overlapping scheduler runs.
pub fn reminder_id(owner_id: &str, invoice_id: &str, days_before: u32) -> String {
    let key = format!("{owner_id}|{invoice_id}|{days_before}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

pub fn reminder_title(days_before: u32) -> String {
    match days_before {
        1 => "Rent due tomorrow".to_string(),
        n => format!("Rent due in {n} days"),
    }
}

fn base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn random_suffix(len: usize) -> String {
    Uuid::new_v4().simple().to_string()[..len].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn monthly_advance_keeps_day_of_month() {
        assert_eq!(
            BillingCycle::Monthly.advance(utc(2024, 3, 1)),
            utc(2024, 4, 1)
        );
    }

    #[test]
    fn monthly_advance_clamps_at_month_end() {
        assert_eq!(
            BillingCycle::Monthly.advance(utc(2024, 1, 31)),
            utc(2024, 2, 29)
        );
        assert_eq!(
            BillingCycle::Monthly.advance(utc(2023, 1, 31)),
            utc(2023, 2, 28)
        );
    }

    #[test]
    fn yearly_advance_keeps_month_and_day() {
        assert_eq!(
            BillingCycle::Yearly.advance(utc(2024, 3, 15)),
            utc(2025, 3, 15)
        );
    }

    #[test]
    fn weekly_and_daily_advance() {
        assert_eq!(
            BillingCycle::Weekly.advance(utc(2024, 3, 1)),
            utc(2024, 3, 8)
        );
        assert_eq!(
            BillingCycle::Daily.advance(utc(2024, 3, 1)),
            utc(2024, 3, 2)
        );
    }

    #[test]
    fn invoice_transitions_are_closed() {
        use InvoiceStatus::*;
        assert!(Sent.can_transition_to(Overdue));
        assert!(Sent.can_transition_to(Paid));
        assert!(Overdue.can_transition_to(Paid));
        assert!(Draft.can_transition_to(Cancelled));
        assert!(Sent.can_transition_to(Cancelled));

        assert!(!Paid.can_transition_to(Sent));
        assert!(!Overdue.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Sent));
        assert!(!Paid.can_transition_to(Cancelled));
    }

    #[test]
    fn payment_id_shape() {
        let id = generate_payment_id(Utc::now());
        assert!(id.starts_with("PAY-"));
        assert_eq!(id, id.to_uppercase());
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 4);
    }

    #[test]
    fn reminder_id_is_deterministic_and_keyed() {
        let a = reminder_id("landlord-1", "inv-1", 7);
        let b = reminder_id("landlord-1", "inv-1", 7);
        let c = reminder_id("landlord-1", "inv-1", 30);
        let d = reminder_id("tenant-1", "inv-1", 7);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn reminder_titles() {
        assert_eq!(reminder_title(1), "Rent due tomorrow");
        assert!(reminder_title(7).contains("in 7 days"));
        assert!(reminder_title(30).contains("in 30 days"));
    }

    #[test]
    fn statuses_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&InvoiceStatus::Overdue).unwrap(),
            "\"overdue\""
        );
        assert_eq!(
            serde_json::to_string(&Gateway::Paystack).unwrap(),
            "\"paystack\""
        );
        assert_eq!(
            serde_json::from_str::<BillingCycle>("\"monthly\"").unwrap(),
            BillingCycle::Monthly
        );
    }
}
