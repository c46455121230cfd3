pub mod checkout;
pub mod invoice_generator;
pub mod overdue_sweep;
pub mod paystack;
pub mod receipt_pdf;
pub mod reminder_scheduler;
pub mod scheduler;
pub mod settlement;
pub mod stripe;
pub mod tenancy_lifecycle;
