use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod s3;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Durable object storage for generated invoice PDFs. S3 in production,
/// in-memory for tests. Uploads are publicly retrievable; the returned URL
/// is written back onto the invoice.
#[async_trait]
pub trait ReceiptStorage: Send + Sync {
    async fn store_pdf(&self, path: &str, bytes: Vec<u8>) -> StorageResult<String>;
    fn backend_name(&self) -> &'static str;
}

/// Storage key for a settled invoice's PDF.
pub fn invoice_pdf_path(landlord_id: &str, property_id: &str, payment_id: &str) -> String {
    format!("invoices/{landlord_id}/{property_id}/{payment_id}.pdf")
}
