use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::db;
use crate::storage::{memory::InMemoryReceiptStorage, s3::S3ReceiptStorage, ReceiptStorage};
use crate::store::{memory::InMemoryStore, postgres::PostgresStore, BillingStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub http_client: reqwest::Client,
    pub store: Arc<dyn BillingStore>,
    pub storage: Arc<dyn ReceiptStorage>,
}

impl AppState {
    pub async fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.gateway_timeout_seconds))
            .build()?;

        let store: Arc<dyn BillingStore> = match db::build_pool(&config).await? {
            Some(pool) => {
                tracing::info!("Using PostgreSQL billing store");
                Arc::new(PostgresStore::new(pool))
            }
            None => {
                tracing::warn!(
                    "DATABASE_URL not set — using the in-memory store (state is lost on restart)"
                );
                Arc::new(InMemoryStore::new())
            }
        };

        let storage: Arc<dyn ReceiptStorage> = match config.receipt_bucket.clone() {
            Some(bucket) => Arc::new(
                S3ReceiptStorage::from_env(bucket, config.receipt_public_base_url.clone()).await,
            ),
            None => {
                tracing::warn!(
                    "RECEIPT_BUCKET not set — receipt PDFs go to in-memory storage"
                );
                Arc::new(InMemoryReceiptStorage::new())
            }
        };

        Ok(Self {
            config: Arc::new(config),
            http_client,
            store,
            storage,
        })
    }

    /// Fully in-memory state for router-level tests.
    #[cfg(test)]
    pub fn for_tests(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            http_client: reqwest::Client::new(),
            store: Arc::new(InMemoryStore::new()),
            storage: Arc::new(InMemoryReceiptStorage::new()),
        }
    }
}
