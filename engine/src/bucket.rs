//! Bucket: asynchronous key-value persistence.
//!
//! The engine persists transform logs through this abstraction; concrete
//! adapters (browser storage, disk, remote) live outside the engine. Any
//! rejection is treated as a persistence failure by callers.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Asynchronous key-value persistence consumed by the engine.
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    async fn get_item(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Store `value` under `key`.
    async fn set_item(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Remove the value stored under `key`.
    async fn remove_item(&self, key: &str) -> Result<()>;

    /// Remove all stored values.
    async fn clear(&self) -> Result<()>;
}

/// In-memory bucket for tests and embedded use.
#[derive(Default)]
pub struct MemoryBucket {
    items: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryBucket {
    /// Create an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current item count.
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Whether the bucket holds no items.
    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    async fn get_item(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.items.lock().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.items.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.items.lock().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.items.lock().await.clear();
        Ok(())
    }
}

/// Convert an adapter-specific failure message into the engine error.
pub fn bucket_error(message: impl Into<String>) -> Error {
    Error::Bucket(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_and_get() {
        let bucket = MemoryBucket::new();

        bucket.set_item("log", json!(["t1", "t2"])).await.unwrap();

        let value = bucket.get_item("log").await.unwrap();
        assert_eq!(value, Some(json!(["t1", "t2"])));
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let bucket = MemoryBucket::new();
        assert_eq!(bucket.get_item("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_overwrites() {
        let bucket = MemoryBucket::new();

        bucket.set_item("log", json!(["t1"])).await.unwrap();
        bucket.set_item("log", json!(["t1", "t2"])).await.unwrap();

        assert_eq!(bucket.len().await, 1);
        assert_eq!(
            bucket.get_item("log").await.unwrap(),
            Some(json!(["t1", "t2"]))
        );
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let bucket = MemoryBucket::new();

        bucket.set_item("a", json!(1)).await.unwrap();
        bucket.set_item("b", json!(2)).await.unwrap();

        bucket.remove_item("a").await.unwrap();
        assert_eq!(bucket.get_item("a").await.unwrap(), None);
        assert_eq!(bucket.len().await, 1);

        bucket.clear().await.unwrap();
        assert!(bucket.is_empty().await);
    }
}
