//! In-memory object storage for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ReceiptStorage, StorageResult};

#[derive(Default)]
pub struct InMemoryReceiptStorage {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryReceiptStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(path).cloned()
    }
}

#[async_trait]
impl ReceiptStorage for InMemoryReceiptStorage {
    async fn store_pdf(&self, path: &str, bytes: Vec<u8>) -> StorageResult<String> {
        self.objects
            .write()
            .await
            .insert(path.to_string(), bytes);
        Ok(format!("memory://{path}"))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
