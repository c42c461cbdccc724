//! Document store collaborator seam.
//!
//! The pipeline coordinates exclusively through an external durable store
//! with read-then-write semantics; there is no shared in-process mutable
//! state between concurrently handled events. `create` is the primitive the
//! dedup guard depends on: it must fail on conflict rather than overwrite,
//! so the second of two racing writers observes that it lost.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

/// Collection names used by the pipeline.
pub mod collections {
    /// Processed-sale records, keyed by sale id.
    pub const PURCHASES: &str = "purchases";
    /// Account state documents, keyed by account id.
    pub const USERS: &str = "users";
    /// Activation token documents, keyed by the code itself.
    pub const ACTIVATION_TOKENS: &str = "activation_tokens";
}

/// Errors emitted by document store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A `create` hit an existing document.
    #[error("document already exists: {collection}/{key}")]
    Conflict {
        /// Collection of the conflicting document.
        collection: String,
        /// Key of the conflicting document.
        key: String,
    },

    /// The backing store failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub(crate) fn conflict(collection: &str, key: &str) -> Self {
        Self::Conflict {
            collection: collection.to_string(),
            key: key.to_string(),
        }
    }

    /// Returns `true` for the fail-on-conflict signal of `create`.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Durable document store with get/set/merge/create primitives.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads a document, returning `None` when absent.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError>;

    /// Writes a document, replacing any existing body.
    async fn set(&self, collection: &str, key: &str, value: Value) -> Result<(), StoreError>;

    /// Merges `value` into an existing document, creating it when absent.
    ///
    /// Object fields are merged recursively; keys not present in `value`
    /// are preserved. Non-object values replace the existing field.
    async fn merge(&self, collection: &str, key: &str, value: Value) -> Result<(), StoreError>;

    /// Writes a document only if no document exists under the key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the key is already present.
    async fn create(&self, collection: &str, key: &str, value: Value) -> Result<(), StoreError>;
}

/// Recursively merges `incoming` into `existing`.
///
/// Matches the merge-write semantics of document databases: maps merge key
/// by key, everything else replaces.
pub fn merge_value(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(base), Value::Object(update)) => {
            for (key, value) in update {
                match base.get_mut(&key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        base.insert(key, value);
                    },
                }
            }
        },
        (slot, incoming) => *slot = incoming,
    }
}

/// In-memory [`DocumentStore`] for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<(String, String), Value>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of documents in a collection.
    pub async fn collection_len(&self, collection: &str) -> usize {
        self.docs
            .read()
            .await
            .keys()
            .filter(|(c, _)| c == collection)
            .count()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs
            .get(&(collection.to_string(), key.to_string()))
            .cloned())
    }

    async fn set(&self, collection: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        docs.insert((collection.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn merge(&self, collection: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        let slot = docs
            .entry((collection.to_string(), key.to_string()))
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        merge_value(slot, value);
        Ok(())
    }

    async fn create(&self, collection: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        let entry = (collection.to_string(), key.to_string());
        if docs.contains_key(&entry) {
            return Err(StoreError::conflict(collection, key));
        }
        docs.insert(entry, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn merge_preserves_existing_keys() {
        let mut existing = json!({
            "purchase_info": { "sale_id": "s1", "price": 100 },
            "email": "a@x.com",
        });
        merge_value(
            &mut existing,
            json!({ "purchase_info": { "sale_id": "s2", "currency": "USD" } }),
        );
        assert_eq!(existing["purchase_info"]["sale_id"], "s2");
        assert_eq!(existing["purchase_info"]["price"], 100);
        assert_eq!(existing["purchase_info"]["currency"], "USD");
        assert_eq!(existing["email"], "a@x.com");
    }

    #[test]
    fn merge_replaces_non_objects() {
        let mut existing = json!({ "counter": 1 });
        merge_value(&mut existing, json!({ "counter": 2 }));
        assert_eq!(existing["counter"], 2);
    }

    #[tokio::test]
    async fn create_fails_on_existing_key() {
        let store = MemoryStore::new();
        store
            .create("purchases", "s1", json!({ "email": "a@x.com" }))
            .await
            .unwrap();

        let err = store
            .create("purchases", "s1", json!({ "email": "b@x.com" }))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // The first write survives.
        let doc = store.get("purchases", "s1").await.unwrap().unwrap();
        assert_eq!(doc["email"], "a@x.com");
    }

    #[tokio::test]
    async fn merge_creates_when_absent() {
        let store = MemoryStore::new();
        store
            .merge("users", "u1", json!({ "purchase_info": { "sale_id": "s1" } }))
            .await
            .unwrap();
        let doc = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc["purchase_info"]["sale_id"], "s1");
    }

    #[tokio::test]
    async fn get_absent_returns_none() {
        let store = MemoryStore::new();
        assert!(store.get("users", "missing").await.unwrap().is_none());
    }
}
