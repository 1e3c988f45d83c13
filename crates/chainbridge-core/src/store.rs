//! The `SubscriptionStore` trait: persistence seam for subscription records.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::SubscriptionRecord;

/// Durable storage of subscription records, keyed by
/// [`SubscriptionRecord::store_key`].
#[async_trait]
pub trait SubscriptionStore: Send + Sync + 'static {
    /// Every decodable record. Documents that fail to decode are logged and
    /// left out; only a backend failure is an error.
    async fn load_all(&self) -> Result<Vec<SubscriptionRecord>, StoreError>;

    /// Insert or replace.
    async fn save(&self, record: &SubscriptionRecord) -> Result<(), StoreError>;

    /// Deleting a missing record is not an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    async fn load(&self, id: &str) -> Result<Option<SubscriptionRecord>, StoreError> {
        Ok(self.load_all().await?.into_iter().find(|r| r.id == id))
    }
}
