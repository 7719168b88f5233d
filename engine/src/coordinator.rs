//! Coordinator and strategies: cross-source wiring.
//!
//! The coordinator registers sources by name and holds an ordered list of
//! strategies. Each strategy subscribes to one source's events and relays
//! work to a target source. Relays serialize through a per-target queue so
//! concurrently-arriving relays from multiple strategies do not interleave
//! against one target.

use crate::error::{Error, Result};
use crate::notifier::ListenerId;
use crate::source::{
    Pullable, Pushable, Queryable, RequestPayload, Source, SourceEvent, SourceEventKind, Syncable,
    Updatable,
};
use crate::transform::Transform;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A source the coordinator can drive: the base capability plus downcasts
/// to whichever request verbs the store supports.
pub trait CoordinatedSource: Source {
    fn as_queryable(&self) -> Option<&dyn Queryable> {
        None
    }

    fn as_updatable(&self) -> Option<&dyn Updatable> {
        None
    }

    fn as_pushable(&self) -> Option<&dyn Pushable> {
        None
    }

    fn as_pullable(&self) -> Option<&dyn Pullable> {
        None
    }

    fn as_syncable(&self) -> Option<&dyn Syncable> {
        None
    }
}

/// The request verb a strategy drives on its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestVerb {
    Query,
    Update,
    Push,
    Pull,
    Sync,
}

impl fmt::Display for RequestVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            RequestVerb::Query => "query",
            RequestVerb::Update => "update",
            RequestVerb::Push => "push",
            RequestVerb::Pull => "pull",
            RequestVerb::Sync => "sync",
        };
        f.write_str(verb)
    }
}

/// Relay a request-carrying event on `source` into a verb on `target`.
#[derive(Debug, Clone)]
pub struct RequestStrategy {
    /// Source whose events trigger the relay
    pub source: String,
    /// Target the request is driven on
    pub target: String,
    /// Which event kind triggers the relay
    pub on: SourceEventKind,
    /// Verb to drive on the target
    pub action: RequestVerb,
    /// Whether the triggering call waits for the relay to finish
    pub blocking: bool,
    /// Whether resulting transforms are synced back onto the source
    pub sync_results: bool,
}

/// Relay every transform applied to `source` into a sync on `target`.
#[derive(Debug, Clone)]
pub struct SyncStrategy {
    /// Source whose transforms are relayed
    pub source: String,
    /// Target the transforms are synced onto
    pub target: String,
    /// Whether the triggering call waits for the relay to finish
    pub blocking: bool,
}

/// A relay rule held by the coordinator.
#[derive(Debug, Clone)]
pub enum Strategy {
    Request(RequestStrategy),
    Sync(SyncStrategy),
}

impl Strategy {
    fn source(&self) -> &str {
        match self {
            Strategy::Request(spec) => &spec.source,
            Strategy::Sync(spec) => &spec.source,
        }
    }

    fn target(&self) -> &str {
        match self {
            Strategy::Request(spec) => &spec.target,
            Strategy::Sync(spec) => &spec.target,
        }
    }
}

impl From<RequestStrategy> for Strategy {
    fn from(strategy: RequestStrategy) -> Self {
        Strategy::Request(strategy)
    }
}

impl From<SyncStrategy> for Strategy {
    fn from(strategy: SyncStrategy) -> Self {
        Strategy::Sync(strategy)
    }
}

fn capability_error(target: &str, verb: RequestVerb) -> Error {
    Error::OperationNotAllowed {
        source: target.to_string(),
        verb: verb.to_string(),
    }
}

// Shared by active listeners; holds the registry snapshot and the
// per-target relay queues.
struct CoordinatorInner {
    sources: BTreeMap<String, Arc<dyn CoordinatedSource>>,
    relay_queues: BTreeMap<String, Mutex<()>>,
}

impl CoordinatorInner {
    fn source(&self, name: &str) -> Result<&Arc<dyn CoordinatedSource>> {
        self.sources
            .get(name)
            .ok_or_else(|| Error::Assertion(format!("unknown source: {name}")))
    }

    async fn queue_request(
        &self,
        target: &str,
        verb: RequestVerb,
        payload: RequestPayload,
    ) -> Result<Vec<Transform>> {
        let source = self.source(target)?;
        let _slot = self.relay_queues[target].lock().await;
        match (verb, payload) {
            (RequestVerb::Query, RequestPayload::Query(query)) => {
                source
                    .as_queryable()
                    .ok_or_else(|| capability_error(target, verb))?
                    .query(query)
                    .await?;
                Ok(Vec::new())
            }
            (RequestVerb::Update, RequestPayload::Transform(transform)) => {
                source
                    .as_updatable()
                    .ok_or_else(|| capability_error(target, verb))?
                    .update(transform)
                    .await?;
                Ok(Vec::new())
            }
            (RequestVerb::Push, RequestPayload::Transform(transform)) => {
                source
                    .as_pushable()
                    .ok_or_else(|| capability_error(target, verb))?
                    .push(transform)
                    .await
            }
            (RequestVerb::Pull, RequestPayload::Query(query)) => {
                source
                    .as_pullable()
                    .ok_or_else(|| capability_error(target, verb))?
                    .pull(query)
                    .await
            }
            (RequestVerb::Sync, RequestPayload::Transform(transform)) => {
                source
                    .as_syncable()
                    .ok_or_else(|| capability_error(target, verb))?
                    .sync(transform)
                    .await?;
                Ok(Vec::new())
            }
            (verb, payload) => Err(Error::Assertion(format!(
                "{verb} cannot be driven by a {} payload",
                match payload {
                    RequestPayload::Query(_) => "query",
                    RequestPayload::Transform(_) => "transform",
                }
            ))),
        }
    }

    async fn queue_transform(&self, target: &str, transform: Transform) -> Result<()> {
        let source = self.source(target)?;
        let syncable = source
            .as_syncable()
            .ok_or_else(|| capability_error(target, RequestVerb::Sync))?;
        let _slot = self.relay_queues[target].lock().await;
        syncable.sync(transform).await
    }
}

/// Registry of named sources plus the strategies that wire them together.
#[derive(Default)]
pub struct Coordinator {
    sources: BTreeMap<String, Arc<dyn CoordinatedSource>>,
    strategies: Vec<Strategy>,
    active: Option<ActiveState>,
}

struct ActiveState {
    inner: Arc<CoordinatorInner>,
    listeners: Vec<(String, ListenerId)>,
}

impl Coordinator {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source. Fails while activated or on a duplicate name.
    pub fn add_source(&mut self, source: Arc<dyn CoordinatedSource>) -> Result<&mut Self> {
        if self.active.is_some() {
            return Err(Error::Assertion(
                "cannot add a source while activated".into(),
            ));
        }
        let name = source.name().to_string();
        if self.sources.contains_key(&name) {
            return Err(Error::Assertion(format!("duplicate source: {name}")));
        }
        self.sources.insert(name, source);
        Ok(self)
    }

    /// Register a strategy. Fails while activated.
    pub fn add_strategy(&mut self, strategy: impl Into<Strategy>) -> Result<&mut Self> {
        if self.active.is_some() {
            return Err(Error::Assertion(
                "cannot add a strategy while activated".into(),
            ));
        }
        self.strategies.push(strategy.into());
        Ok(self)
    }

    /// Look up a registered source.
    pub fn source(&self, name: &str) -> Option<Arc<dyn CoordinatedSource>> {
        self.sources.get(name).cloned()
    }

    /// Whether strategies are currently subscribed.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Subscribe every strategy's listener.
    pub fn activate(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Err(Error::Assertion("coordinator already activated".into()));
        }
        for strategy in &self.strategies {
            for name in [strategy.source(), strategy.target()] {
                if !self.sources.contains_key(name) {
                    return Err(Error::Assertion(format!(
                        "strategy references unknown source: {name}"
                    )));
                }
            }
        }

        let inner = Arc::new(CoordinatorInner {
            sources: self.sources.clone(),
            relay_queues: self
                .sources
                .keys()
                .map(|name| (name.clone(), Mutex::new(())))
                .collect(),
        });

        let mut listeners = Vec::new();
        for strategy in &self.strategies {
            listeners.push(subscribe(strategy, &inner));
        }
        tracing::debug!(strategies = listeners.len(), "coordinator activated");

        self.active = Some(ActiveState { inner, listeners });
        Ok(())
    }

    /// Unsubscribe every strategy's listener.
    pub fn deactivate(&mut self) {
        if let Some(state) = self.active.take() {
            for (source_name, listener) in state.listeners {
                if let Some(source) = self.sources.get(&source_name) {
                    source.source_core().notifier().off(listener);
                }
            }
            tracing::debug!("coordinator deactivated");
        }
    }

    fn inner(&self) -> Result<&Arc<CoordinatorInner>> {
        self.active
            .as_ref()
            .map(|state| &state.inner)
            .ok_or_else(|| Error::Assertion("coordinator is not activated".into()))
    }

    /// Drive a verb on a target source through its relay queue.
    pub async fn queue_request(
        &self,
        target: &str,
        verb: RequestVerb,
        payload: RequestPayload,
    ) -> Result<Vec<Transform>> {
        self.inner()?.queue_request(target, verb, payload).await
    }

    /// Sync a transform onto a target source through its relay queue.
    pub async fn queue_transform(&self, target: &str, transform: Transform) -> Result<()> {
        self.inner()?.queue_transform(target, transform).await
    }
}

fn subscribe(strategy: &Strategy, inner: &Arc<CoordinatorInner>) -> (String, ListenerId) {
    let source_name = strategy.source().to_string();
    // Validated by activate(); a racing removal is impossible because the
    // registry is frozen while active.
    let notifier = inner.sources[&source_name].source_core().notifier();

    let listener = match strategy {
        Strategy::Sync(spec) => {
            let inner = Arc::clone(inner);
            let spec = spec.clone();
            notifier.on(move |event: SourceEvent| {
                let inner = Arc::clone(&inner);
                let spec = spec.clone();
                async move {
                    let SourceEvent::Transform(transform) = event else {
                        return Ok(());
                    };
                    let blocking = spec.blocking;
                    let target = spec.target.clone();
                    relay(blocking, &target, async move {
                        inner.queue_transform(&spec.target, transform).await
                    })
                    .await
                }
            })
        }
        Strategy::Request(spec) => {
            let inner = Arc::clone(inner);
            let spec = spec.clone();
            notifier.on(move |event: SourceEvent| {
                let inner = Arc::clone(&inner);
                let spec = spec.clone();
                async move {
                    if event.kind() != spec.on {
                        return Ok(());
                    }
                    let Some(payload) = event.request() else {
                        return Ok(());
                    };
                    let blocking = spec.blocking;
                    let target = spec.target.clone();
                    relay(blocking, &target, async move {
                        let result = inner
                            .queue_request(&spec.target, spec.action, payload)
                            .await?;
                        if spec.sync_results {
                            for transform in result {
                                inner.queue_transform(&spec.source, transform).await?;
                            }
                        }
                        Ok(())
                    })
                    .await
                }
            })
        }
    };

    (source_name, listener)
}

// Blocking relays propagate their outcome into the triggering listener;
// detached relays are spawned and only logged on failure.
async fn relay(
    blocking: bool,
    target: &str,
    work: impl std::future::Future<Output = Result<()>> + Send + 'static,
) -> Result<()> {
    if blocking {
        work.await
    } else {
        let target = target.to_string();
        tokio::spawn(async move {
            if let Err(error) = work.await {
                tracing::warn!(%target, %error, "detached strategy relay failed");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemorySource, MemorySourceSettings};
    use crate::record::Record;
    use crate::schema::{AttributeKind, ModelDefinition, Schema};
    use crate::transform::Transform;

    fn test_schema() -> Schema {
        Schema::new().with_model(
            "planet",
            ModelDefinition::new().with_attribute("name", AttributeKind::String),
        )
    }

    fn test_source(name: &str) -> Arc<MemorySource> {
        Arc::new(
            MemorySource::new(MemorySourceSettings {
                name: name.into(),
                schema: test_schema(),
                bucket: None,
            })
            .unwrap(),
        )
    }

    #[test]
    fn duplicate_sources_are_rejected() {
        let mut coordinator = Coordinator::new();
        coordinator.add_source(test_source("store")).unwrap();
        let result = coordinator.add_source(test_source("store"));
        assert!(matches!(result, Err(Error::Assertion(_))));
    }

    #[test]
    fn activation_validates_strategy_references() {
        let mut coordinator = Coordinator::new();
        coordinator.add_source(test_source("store")).unwrap();
        coordinator
            .add_strategy(SyncStrategy {
                source: "store".into(),
                target: "backup".into(),
                blocking: true,
            })
            .unwrap();

        assert!(matches!(
            coordinator.activate(),
            Err(Error::Assertion(_))
        ));
    }

    #[test]
    fn activate_and_deactivate_manage_listeners() {
        let store = test_source("store");
        let backup = test_source("backup");

        let mut coordinator = Coordinator::new();
        coordinator.add_source(Arc::clone(&store)).unwrap();
        coordinator.add_source(Arc::clone(&backup)).unwrap();
        coordinator
            .add_strategy(SyncStrategy {
                source: "store".into(),
                target: "backup".into(),
                blocking: true,
            })
            .unwrap();

        coordinator.activate().unwrap();
        assert!(coordinator.is_active());
        assert_eq!(store.source_core().notifier().listener_count(), 1);

        coordinator.deactivate();
        assert!(!coordinator.is_active());
        assert_eq!(store.source_core().notifier().listener_count(), 0);
    }

    #[tokio::test]
    async fn queue_request_requires_capability() {
        let mut coordinator = Coordinator::new();
        coordinator.add_source(test_source("store")).unwrap();
        coordinator.activate().unwrap();

        // MemorySource is not pushable.
        let result = coordinator
            .queue_request(
                "store",
                RequestVerb::Push,
                RequestPayload::Transform(Transform::with_id("t1", vec![])),
            )
            .await;

        assert_eq!(
            result,
            Err(Error::OperationNotAllowed {
                source: "store".into(),
                verb: "push".into(),
            })
        );
    }

    #[tokio::test]
    async fn queue_transform_syncs_target() {
        let store = test_source("store");

        let mut coordinator = Coordinator::new();
        coordinator.add_source(Arc::clone(&store)).unwrap();
        coordinator.activate().unwrap();

        let transform = Transform::builder()
            .id("t1")
            .add_record(Record::new("planet", "p1"))
            .build();
        coordinator
            .queue_transform("store", transform)
            .await
            .unwrap();

        assert_eq!(store.records_of("planet").await.len(), 1);
    }
}
