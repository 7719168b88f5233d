//! Transform log: the ordered history of applied transform ids.
//!
//! The log is the idempotence gate for push/update/sync and the anchor for
//! replay and rollback. Entries are unique; range operations address
//! positions relative to a logged id and fail with `TransformNotLogged` or
//! `OutOfRange` when they cannot.
//!
//! When a bucket is attached, every mutation persists the full entry list
//! under the log's name. Persistence runs after the in-memory mutation, so
//! a bucket failure surfaces to the caller with memory already advanced.

use crate::bucket::Bucket;
use crate::error::{Error, Result};
use crate::notifier::Notifier;
use crate::TransformId;
use std::sync::{Arc, RwLock};

/// Log mutation events, published after state is updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// An id was appended.
    Append(TransformId),
    /// Entries before a position were discarded.
    Truncate { removed: Vec<TransformId> },
    /// Entries after a position were discarded.
    Rollback { removed: Vec<TransformId> },
    /// All entries were discarded.
    Clear { removed: Vec<TransformId> },
}

/// Ordered, persisted record of applied transform ids.
pub struct TransformLog {
    name: String,
    entries: RwLock<Vec<TransformId>>,
    bucket: Option<Arc<dyn Bucket>>,
    notifier: Notifier<LogEvent>,
}

impl TransformLog {
    /// Create an empty, unpersisted log.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(Vec::new()),
            bucket: None,
            notifier: Notifier::new(),
        }
    }

    /// Create an empty log that persists through `bucket`.
    pub fn with_bucket(name: impl Into<String>, bucket: Arc<dyn Bucket>) -> Self {
        Self {
            bucket: Some(bucket),
            ..Self::new(name)
        }
    }

    /// Create a log rehydrated from entries previously persisted in
    /// `bucket` under `name`, then persisting through the same bucket.
    pub async fn load(name: impl Into<String>, bucket: Arc<dyn Bucket>) -> Result<Self> {
        let name = name.into();
        let entries = match bucket.get_item(&name).await? {
            Some(value) => serde_json::from_value::<Vec<TransformId>>(value)
                .map_err(|err| Error::Bucket(format!("invalid persisted log: {err}")))?,
            None => Vec::new(),
        };
        Ok(Self {
            name,
            entries: RwLock::new(entries),
            bucket: Some(bucket),
            notifier: Notifier::new(),
        })
    }

    /// The log's name, also its bucket key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mutation event notifier.
    pub fn notifier(&self) -> &Notifier<LogEvent> {
        &self.notifier
    }

    /// The most recently appended id, if any.
    pub fn head(&self) -> Option<TransformId> {
        self.entries.read().unwrap().last().cloned()
    }

    /// The full ordered entry list.
    pub fn entries(&self) -> Vec<TransformId> {
        self.entries.read().unwrap().clone()
    }

    /// Number of logged ids.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Whether `id` has been logged.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().unwrap().iter().any(|e| e == id)
    }

    fn position_of(&self, entries: &[TransformId], id: &str) -> Result<usize> {
        entries
            .iter()
            .position(|e| e == id)
            .ok_or_else(|| Error::TransformNotLogged(id.to_string()))
    }

    fn checked_boundary(&self, position: i64, length: usize) -> Result<usize> {
        if position < 0 || position > length as i64 {
            return Err(Error::OutOfRange { position, length });
        }
        Ok(position as usize)
    }

    /// Ids before the position of `id`, offset by `relative`.
    pub fn before(&self, id: &str, relative: i64) -> Result<Vec<TransformId>> {
        let entries = self.entries.read().unwrap();
        let position = self.position_of(&entries, id)? as i64 + relative;
        let end = self.checked_boundary(position, entries.len())?;
        Ok(entries[..end].to_vec())
    }

    /// Ids after the position of `id`, offset by `relative`.
    pub fn after(&self, id: &str, relative: i64) -> Result<Vec<TransformId>> {
        let entries = self.entries.read().unwrap();
        let position = self.position_of(&entries, id)? as i64 + 1 + relative;
        let start = self.checked_boundary(position, entries.len())?;
        Ok(entries[start..].to_vec())
    }

    /// Append `id`. Returns `false` without mutating or notifying when the
    /// id is already logged.
    pub async fn append(&self, id: TransformId) -> Result<bool> {
        {
            let mut entries = self.entries.write().unwrap();
            if entries.iter().any(|e| *e == id) {
                return Ok(false);
            }
            entries.push(id.clone());
        }
        self.persist().await?;
        self.notifier.settle_serial(&LogEvent::Append(id)).await;
        Ok(true)
    }

    /// Discard all entries before the position of `id` offset by
    /// `relative`, keeping the rest.
    pub async fn truncate(&self, id: &str, relative: i64) -> Result<()> {
        let removed = {
            let mut entries = self.entries.write().unwrap();
            let position = self.position_of(&entries, id)? as i64 + relative;
            let start = self.checked_boundary(position, entries.len())?;
            entries.drain(..start).collect::<Vec<_>>()
        };
        self.persist().await?;
        self.notifier
            .settle_serial(&LogEvent::Truncate { removed })
            .await;
        Ok(())
    }

    /// Discard all entries after the position of `id` offset by `relative`,
    /// keeping entries up to and including that position.
    pub async fn rollback(&self, id: &str, relative: i64) -> Result<()> {
        let removed = {
            let mut entries = self.entries.write().unwrap();
            let position = self.position_of(&entries, id)? as i64 + 1 + relative;
            let end = self.checked_boundary(position, entries.len())?;
            entries.split_off(end)
        };
        self.persist().await?;
        self.notifier
            .settle_serial(&LogEvent::Rollback { removed })
            .await;
        Ok(())
    }

    /// Discard every entry.
    pub async fn clear(&self) -> Result<()> {
        let removed = std::mem::take(&mut *self.entries.write().unwrap());
        self.persist().await?;
        self.notifier
            .settle_serial(&LogEvent::Clear { removed })
            .await;
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        if let Some(bucket) = &self.bucket {
            let entries = self.entries();
            bucket
                .set_item(&self.name, serde_json::json!(entries))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::MemoryBucket;
    use serde_json::json;

    async fn seeded_log() -> TransformLog {
        let log = TransformLog::new("test");
        for id in ["a", "b", "c", "d"] {
            log.append(id.to_string()).await.unwrap();
        }
        log
    }

    #[tokio::test]
    async fn append_and_head() {
        let log = TransformLog::new("test");
        assert!(log.is_empty());
        assert_eq!(log.head(), None);

        assert!(log.append("t1".into()).await.unwrap());
        assert!(log.append("t2".into()).await.unwrap());

        assert_eq!(log.head(), Some("t2".to_string()));
        assert_eq!(log.entries(), vec!["t1".to_string(), "t2".to_string()]);
        assert!(log.contains("t1"));
        assert!(!log.contains("t3"));
    }

    #[tokio::test]
    async fn append_rejects_duplicates() {
        let log = TransformLog::new("test");
        assert!(log.append("t1".into()).await.unwrap());
        assert!(!log.append("t1".into()).await.unwrap());
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn before_and_after() {
        let log = seeded_log().await;

        assert_eq!(log.before("c", 0).unwrap(), vec!["a", "b"]);
        assert_eq!(log.after("b", 0).unwrap(), vec!["c", "d"]);
        assert_eq!(log.before("a", 0).unwrap(), Vec::<String>::new());
        assert_eq!(log.after("d", 0).unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn before_and_after_with_offsets() {
        let log = seeded_log().await;

        assert_eq!(log.before("c", 1).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(log.after("b", -1).unwrap(), vec!["b", "c", "d"]);
    }

    #[tokio::test]
    async fn range_errors() {
        let log = seeded_log().await;

        assert_eq!(
            log.before("z", 0),
            Err(Error::TransformNotLogged("z".into()))
        );
        assert_eq!(
            log.before("a", -1),
            Err(Error::OutOfRange {
                position: -1,
                length: 4
            })
        );
        assert_eq!(
            log.after("d", 2),
            Err(Error::OutOfRange {
                position: 6,
                length: 4
            })
        );
    }

    #[tokio::test]
    async fn truncate_discards_earlier_entries() {
        let log = seeded_log().await;
        log.truncate("c", 0).await.unwrap();
        assert_eq!(log.entries(), vec!["c", "d"]);
    }

    #[tokio::test]
    async fn rollback_discards_later_entries() {
        let log = seeded_log().await;
        log.rollback("b", 0).await.unwrap();
        assert_eq!(log.entries(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn rollback_missing_id_fails() {
        let log = seeded_log().await;
        assert_eq!(
            log.rollback("z", 0).await,
            Err(Error::TransformNotLogged("z".into()))
        );
    }

    #[tokio::test]
    async fn clear_discards_everything() {
        let log = seeded_log().await;
        log.clear().await.unwrap();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn mutation_events_fire_after_state_update() {
        let log = seeded_log().await;
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let seen = std::sync::Arc::clone(&seen);
            log.notifier().on(move |event: LogEvent| {
                let seen = std::sync::Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(event);
                    Ok(())
                }
            });
        }

        log.append("e".into()).await.unwrap();
        log.rollback("b", 0).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], LogEvent::Append("e".into()));
        assert_eq!(
            seen[1],
            LogEvent::Rollback {
                removed: vec!["c".into(), "d".into(), "e".into()]
            }
        );
    }

    #[tokio::test]
    async fn persists_through_bucket() {
        let bucket = Arc::new(MemoryBucket::new());
        let log = TransformLog::with_bucket("ledger", Arc::clone(&bucket) as Arc<dyn Bucket>);

        log.append("t1".into()).await.unwrap();
        log.append("t2".into()).await.unwrap();

        assert_eq!(
            bucket.get_item("ledger").await.unwrap(),
            Some(json!(["t1", "t2"]))
        );

        log.rollback("t1", 0).await.unwrap();
        assert_eq!(
            bucket.get_item("ledger").await.unwrap(),
            Some(json!(["t1"]))
        );
    }

    #[tokio::test]
    async fn load_rehydrates_persisted_entries() {
        let bucket = Arc::new(MemoryBucket::new());
        bucket
            .set_item("ledger", json!(["t1", "t2"]))
            .await
            .unwrap();

        let log = TransformLog::load("ledger", Arc::clone(&bucket) as Arc<dyn Bucket>)
            .await
            .unwrap();

        assert_eq!(log.entries(), vec!["t1", "t2"]);
        assert!(log.contains("t2"));
    }
}
