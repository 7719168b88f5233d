//! The in-memory source: a cache behind the request-flow protocol.
//!
//! `MemorySource` is the authoritative local store: queryable through the
//! expression evaluator, updatable with locally-built transforms, and
//! syncable with transforms relayed from other sources.

use crate::bucket::Bucket;
use crate::cache::{Cache, Patch};
use crate::coordinator::CoordinatedSource;
use crate::error::{Error, Result};
use crate::evaluator::{QueryContext, QueryEvaluator};
use crate::log::TransformLog;
use crate::query::Query;
use crate::record::{Record, RecordIdentity};
use crate::schema::Schema;
use crate::source::{Queryable, Source, SourceCore, Syncable, Updatable};
use crate::transform::Transform;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Construction settings for a [`MemorySource`]. Dependencies are injected
/// here; the engine reads no ambient state.
pub struct MemorySourceSettings {
    /// Source name; also the log's bucket key
    pub name: String,
    /// Schema the cache is built against
    pub schema: Schema,
    /// Optional bucket for log persistence
    pub bucket: Option<Arc<dyn Bucket>>,
}

/// An in-memory store implementing query, update, and sync.
pub struct MemorySource {
    core: SourceCore,
    cache: Mutex<Cache>,
}

impl MemorySource {
    /// Create a source from settings.
    pub fn new(settings: MemorySourceSettings) -> Result<Self> {
        if settings.name.is_empty() {
            return Err(Error::Assertion("source name must not be empty".into()));
        }
        let core = match settings.bucket {
            Some(bucket) => SourceCore::with_bucket(settings.name, bucket),
            None => SourceCore::new(settings.name),
        };
        Ok(Self {
            core,
            cache: Mutex::new(Cache::new(Arc::new(settings.schema))),
        })
    }

    /// Create a source whose log is rehydrated from its bucket, so a
    /// restarted process remembers which transforms it has applied.
    pub async fn load(settings: MemorySourceSettings) -> Result<Self> {
        if settings.name.is_empty() {
            return Err(Error::Assertion("source name must not be empty".into()));
        }
        let bucket = settings.bucket.ok_or_else(|| {
            Error::Assertion("loading a source requires a bucket".into())
        })?;
        let log = TransformLog::load(settings.name, bucket).await?;
        Ok(Self {
            core: SourceCore::from_log(log),
            cache: Mutex::new(Cache::new(Arc::new(settings.schema))),
        })
    }

    /// Inspect the cache under its lock.
    pub async fn with_cache<R>(&self, inspect: impl FnOnce(&Cache) -> R) -> R {
        let cache = self.cache.lock().await;
        inspect(&cache)
    }

    /// Get a record by identity.
    pub async fn record(&self, identity: &RecordIdentity) -> Option<Record> {
        self.with_cache(|cache| cache.record(identity).cloned())
            .await
    }

    /// All records of a model type.
    pub async fn records_of(&self, model: &str) -> Vec<Record> {
        self.with_cache(|cache| cache.records(model).into_iter().cloned().collect())
            .await
    }
}

impl Source for MemorySource {
    fn source_core(&self) -> &SourceCore {
        &self.core
    }
}

#[async_trait]
impl Queryable for MemorySource {
    async fn query_hook(&self, query: &Query) -> Result<serde_json::Value> {
        let cache = self.cache.lock().await;
        QueryEvaluator::new(&cache).evaluate(&query.expression, &QueryContext::default())
    }
}

#[async_trait]
impl Updatable for MemorySource {
    async fn update_hook(&self, transform: &Transform) -> Result<Vec<Patch>> {
        let mut cache = self.cache.lock().await;
        Ok(cache.patch(&transform.operations))
    }
}

#[async_trait]
impl Syncable for MemorySource {
    async fn sync_hook(&self, transform: &Transform) -> Result<()> {
        let mut cache = self.cache.lock().await;
        cache.patch(&transform.operations);
        Ok(())
    }
}

impl CoordinatedSource for MemorySource {
    fn as_queryable(&self) -> Option<&dyn Queryable> {
        Some(self)
    }

    fn as_updatable(&self) -> Option<&dyn Updatable> {
        Some(self)
    }

    fn as_syncable(&self) -> Option<&dyn Syncable> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryExpression;
    use crate::schema::{AttributeKind, ModelDefinition, RelationshipDef};
    use serde_json::json;

    fn solar_schema() -> Schema {
        Schema::new()
            .with_model(
                "planet",
                ModelDefinition::new()
                    .with_attribute("name", AttributeKind::String)
                    .with_relationship(
                        "moons",
                        RelationshipDef::has_many("moon").with_inverse("planet"),
                    ),
            )
            .with_model(
                "moon",
                ModelDefinition::new()
                    .with_attribute("name", AttributeKind::String)
                    .with_relationship(
                        "planet",
                        RelationshipDef::has_one("planet").with_inverse("moons"),
                    ),
            )
    }

    fn test_source() -> MemorySource {
        MemorySource::new(MemorySourceSettings {
            name: "store".into(),
            schema: solar_schema(),
            bucket: None,
        })
        .unwrap()
    }

    #[test]
    fn empty_name_is_rejected() {
        let result = MemorySource::new(MemorySourceSettings {
            name: String::new(),
            schema: solar_schema(),
            bucket: None,
        });
        assert!(matches!(result, Err(Error::Assertion(_))));
    }

    #[tokio::test]
    async fn update_applies_and_logs() {
        let source = test_source();
        let transform = Transform::builder()
            .id("t1")
            .add_record(Record::new("planet", "p1").with_attribute("name", "Jupiter"))
            .build();

        let patches = source.update(transform).await.unwrap();
        assert_eq!(patches.len(), 1);
        assert!(source.source_core().log().contains("t1"));

        let record = source
            .record(&RecordIdentity::new("planet", "p1"))
            .await
            .unwrap();
        assert_eq!(record.attribute("name"), Some(&json!("Jupiter")));
    }

    #[tokio::test]
    async fn update_is_idempotent() {
        let source = test_source();
        let transform = Transform::builder()
            .id("t1")
            .add_record(Record::new("planet", "p1"))
            .build();

        let first = source.update(transform.clone()).await.unwrap();
        let second = source.update(transform).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(source.source_core().log().entries(), vec!["t1"]);
    }

    #[tokio::test]
    async fn query_evaluates_against_cache() {
        let source = test_source();
        source
            .update(
                Transform::builder()
                    .add_record(Record::new("planet", "p1").with_attribute("name", "Jupiter"))
                    .add_record(Record::new("planet", "p2").with_attribute("name", "Pluto"))
                    .build(),
            )
            .await
            .unwrap();

        let all = source
            .query(Query::new(QueryExpression::records("planet")))
            .await
            .unwrap();
        assert_eq!(all.as_object().unwrap().len(), 2);

        let plutos = source
            .query(Query::new(QueryExpression::records("planet").filter(
                QueryExpression::attribute("name").equal(json!("Pluto")),
            )))
            .await
            .unwrap();
        let members = plutos.as_object().unwrap();
        assert_eq!(members.len(), 1);
        assert!(members.contains_key("p2"));
    }

    #[tokio::test]
    async fn sync_applies_external_transforms() {
        let source = test_source();
        let transform = Transform::builder()
            .id("remote-t1")
            .add_record(Record::new("planet", "p1"))
            .build();

        source.sync(transform.clone()).await.unwrap();
        // Replaying the same transform is a no-op.
        source.sync(transform).await.unwrap();

        assert_eq!(source.records_of("planet").await.len(), 1);
        assert_eq!(source.source_core().log().entries(), vec!["remote-t1"]);
    }

    #[tokio::test]
    async fn load_rehydrates_applied_log() {
        use crate::bucket::MemoryBucket;

        let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
        bucket
            .set_item("store", json!(["t1"]))
            .await
            .unwrap();

        let source = MemorySource::load(MemorySourceSettings {
            name: "store".into(),
            schema: solar_schema(),
            bucket: Some(Arc::clone(&bucket)),
        })
        .await
        .unwrap();

        // The rehydrated log makes replay of t1 a no-op.
        let replay = Transform::with_id("t1", vec![]);
        source.sync(replay).await.unwrap();
        assert_eq!(source.source_core().log().entries(), vec!["t1"]);
    }
}
