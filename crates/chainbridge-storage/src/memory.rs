//! In-memory subscription store.
//!
//! Records are kept as serialized JSON documents, exactly as a persistent
//! backend would hold them. All data is lost when the process exits.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use chainbridge_core::error::StoreError;
use chainbridge_core::store::SubscriptionStore;
use chainbridge_core::types::{store_key, SubscriptionRecord, STORE_KEY_PREFIX};

#[derive(Default)]
pub struct InMemoryStore {
    documents: RwLock<BTreeMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn load_all(&self) -> Result<Vec<SubscriptionRecord>, StoreError> {
        let documents = self.documents.read().await;
        let records = documents
            .iter()
            .filter(|(key, _)| key.starts_with(STORE_KEY_PREFIX))
            .filter_map(|(key, body)| match serde_json::from_str(body) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping undecodable subscription document");
                    None
                }
            })
            .collect();
        Ok(records)
    }

    async fn save(&self, record: &SubscriptionRecord) -> Result<(), StoreError> {
        let body = serde_json::to_string(record)?;
        self.documents.write().await.insert(record.store_key(), body);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.documents.write().await.remove(&store_key(id));
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<SubscriptionRecord>, StoreError> {
        let documents = self.documents.read().await;
        documents
            .get(&store_key(id))
            .map(|body| serde_json::from_str(body).map_err(StoreError::from))
            .transpose()
    }
}
