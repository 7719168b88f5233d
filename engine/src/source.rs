//! The request-flow protocol.
//!
//! A source is the unit of synchronization: a name, a transform log, a
//! notifier, and per-verb FIFO queues. The five capabilities (Queryable,
//! Updatable, Pushable, Pullable, Syncable) are independent traits whose
//! default methods drive the shared flow over the host's [`SourceCore`]:
//!
//! 1. acquire the verb's queue slot (one in-flight request per verb);
//! 2. publish `Before<Verb>` and await every listener in series, aborting
//!    on the first failure;
//! 3. invoke the capability hook supplied by the concrete store;
//! 4. feed resulting transforms through [`transformed`]: unlogged ids are
//!    appended to the log and published as `Transform` events;
//! 5. publish the verb's success event, or `<Verb>Fail` with the original
//!    error, and resolve the caller.
//!
//! Push, update, and sync carry an idempotence guard: a transform whose id
//! is already logged resolves immediately without hooks or events.

use crate::cache::Patch;
use crate::error::{Error, Result};
use crate::log::TransformLog;
use crate::notifier::Notifier;
use crate::query::Query;
use crate::transform::Transform;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Lifecycle events published by a source.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    BeforeQuery(Query),
    Query { query: Query, result: serde_json::Value },
    QueryFail { query: Query, error: Error },

    BeforeUpdate(Transform),
    Update { transform: Transform, patches: Vec<Patch> },
    UpdateFail { transform: Transform, error: Error },

    BeforePush(Transform),
    Push { transform: Transform, result: Vec<Transform> },
    PushFail { transform: Transform, error: Error },

    BeforePull(Query),
    Pull { query: Query, result: Vec<Transform> },
    PullFail { query: Query, error: Error },

    BeforeSync(Transform),
    Sync { transform: Transform },
    SyncFail { transform: Transform, error: Error },

    /// A transform was appended to the log.
    Transform(Transform),
}

/// Discriminant of a [`SourceEvent`], used by strategies to pick which
/// event to relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEventKind {
    BeforeQuery,
    Query,
    QueryFail,
    BeforeUpdate,
    Update,
    UpdateFail,
    BeforePush,
    Push,
    PushFail,
    BeforePull,
    Pull,
    PullFail,
    BeforeSync,
    Sync,
    SyncFail,
    Transform,
}

/// The request carried by an event, for relaying to another source.
#[derive(Debug, Clone)]
pub enum RequestPayload {
    Query(Query),
    Transform(Transform),
}

impl SourceEvent {
    /// This event's discriminant.
    pub fn kind(&self) -> SourceEventKind {
        match self {
            SourceEvent::BeforeQuery(_) => SourceEventKind::BeforeQuery,
            SourceEvent::Query { .. } => SourceEventKind::Query,
            SourceEvent::QueryFail { .. } => SourceEventKind::QueryFail,
            SourceEvent::BeforeUpdate(_) => SourceEventKind::BeforeUpdate,
            SourceEvent::Update { .. } => SourceEventKind::Update,
            SourceEvent::UpdateFail { .. } => SourceEventKind::UpdateFail,
            SourceEvent::BeforePush(_) => SourceEventKind::BeforePush,
            SourceEvent::Push { .. } => SourceEventKind::Push,
            SourceEvent::PushFail { .. } => SourceEventKind::PushFail,
            SourceEvent::BeforePull(_) => SourceEventKind::BeforePull,
            SourceEvent::Pull { .. } => SourceEventKind::Pull,
            SourceEvent::PullFail { .. } => SourceEventKind::PullFail,
            SourceEvent::BeforeSync(_) => SourceEventKind::BeforeSync,
            SourceEvent::Sync { .. } => SourceEventKind::Sync,
            SourceEvent::SyncFail { .. } => SourceEventKind::SyncFail,
            SourceEvent::Transform(_) => SourceEventKind::Transform,
        }
    }

    /// The request this event carries.
    pub fn request(&self) -> Option<RequestPayload> {
        match self {
            SourceEvent::BeforeQuery(query)
            | SourceEvent::Query { query, .. }
            | SourceEvent::QueryFail { query, .. }
            | SourceEvent::BeforePull(query)
            | SourceEvent::Pull { query, .. }
            | SourceEvent::PullFail { query, .. } => Some(RequestPayload::Query(query.clone())),
            SourceEvent::BeforeUpdate(transform)
            | SourceEvent::Update { transform, .. }
            | SourceEvent::UpdateFail { transform, .. }
            | SourceEvent::BeforePush(transform)
            | SourceEvent::Push { transform, .. }
            | SourceEvent::PushFail { transform, .. }
            | SourceEvent::BeforeSync(transform)
            | SourceEvent::Sync { transform }
            | SourceEvent::SyncFail { transform, .. }
            | SourceEvent::Transform(transform) => {
                Some(RequestPayload::Transform(transform.clone()))
            }
        }
    }
}

// One FIFO slot per verb; requests of different verbs are not ordered
// against each other.
#[derive(Default)]
struct RequestQueues {
    query: Mutex<()>,
    update: Mutex<()>,
    push: Mutex<()>,
    pull: Mutex<()>,
    sync: Mutex<()>,
}

/// The shared base every capability requires: name, log, notifier, queues.
pub struct SourceCore {
    name: String,
    log: TransformLog,
    notifier: Notifier<SourceEvent>,
    queues: RequestQueues,
}

impl SourceCore {
    /// Create a core with an unpersisted log named after the source.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            log: TransformLog::new(name.clone()),
            name,
            notifier: Notifier::new(),
            queues: RequestQueues::default(),
        }
    }

    /// Create a core whose log persists through `bucket` under the
    /// source's name.
    pub fn with_bucket(name: impl Into<String>, bucket: Arc<dyn crate::bucket::Bucket>) -> Self {
        let name = name.into();
        Self {
            log: TransformLog::with_bucket(name.clone(), bucket),
            name,
            notifier: Notifier::new(),
            queues: RequestQueues::default(),
        }
    }

    /// Create a core around an existing log (e.g. one rehydrated with
    /// [`TransformLog::load`]), named after it.
    pub fn from_log(log: TransformLog) -> Self {
        Self {
            name: log.name().to_string(),
            log,
            notifier: Notifier::new(),
            queues: RequestQueues::default(),
        }
    }

    /// The source's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The source's transform log.
    pub fn log(&self) -> &TransformLog {
        &self.log
    }

    /// The source's event notifier.
    pub fn notifier(&self) -> &Notifier<SourceEvent> {
        &self.notifier
    }
}

/// Append unlogged transforms and publish `Transform` events for them.
///
/// This is the shared tail of update/push/pull/sync: every transform that
/// reaches a source's state flows through here exactly once.
pub async fn transformed(core: &SourceCore, transforms: &[Transform]) -> Result<()> {
    for transform in transforms {
        if core.log().contains(&transform.id) {
            continue;
        }
        core.log().append(transform.id.clone()).await?;
        tracing::debug!(source = core.name(), transform = %transform.id, "transform logged");
        core.notifier()
            .settle_serial(&SourceEvent::Transform(transform.clone()))
            .await;
    }
    Ok(())
}

/// The base capability: access to the shared core.
pub trait Source: Send + Sync {
    /// The shared core this source is built around.
    fn source_core(&self) -> &SourceCore;

    /// The source's name.
    fn name(&self) -> &str {
        self.source_core().name()
    }
}

/// Capability: answer queries.
#[async_trait]
pub trait Queryable: Source {
    /// The store-specific query step.
    async fn query_hook(&self, query: &Query) -> Result<serde_json::Value>;

    /// Run a query through the request flow.
    async fn query(&self, query: Query) -> Result<serde_json::Value> {
        let core = self.source_core();
        let _slot = core.queues.query.lock().await;
        tracing::debug!(source = core.name(), query = %query.id, "query started");

        let outcome = async {
            core.notifier
                .publish_serial(&SourceEvent::BeforeQuery(query.clone()))
                .await?;
            self.query_hook(&query).await
        }
        .await;

        match outcome {
            Ok(result) => {
                core.notifier
                    .settle_serial(&SourceEvent::Query {
                        query,
                        result: result.clone(),
                    })
                    .await;
                Ok(result)
            }
            Err(error) => {
                core.notifier
                    .settle_serial(&SourceEvent::QueryFail {
                        query,
                        error: error.clone(),
                    })
                    .await;
                Err(error)
            }
        }
    }
}

/// Capability: apply locally-originated transforms.
#[async_trait]
pub trait Updatable: Source {
    /// The store-specific update step; returns the patches applied.
    async fn update_hook(&self, transform: &Transform) -> Result<Vec<Patch>>;

    /// Run a transform through the request flow.
    async fn update(&self, transform: Transform) -> Result<Vec<Patch>> {
        let core = self.source_core();
        if core.log().contains(&transform.id) {
            return Ok(Vec::new());
        }
        let _slot = core.queues.update.lock().await;
        if core.log().contains(&transform.id) {
            return Ok(Vec::new());
        }
        tracing::debug!(source = core.name(), transform = %transform.id, "update started");

        let outcome: Result<Vec<Patch>> = async {
            core.notifier
                .publish_serial(&SourceEvent::BeforeUpdate(transform.clone()))
                .await?;
            let patches = self.update_hook(&transform).await?;
            transformed(core, std::slice::from_ref(&transform)).await?;
            Ok(patches)
        }
        .await;

        match outcome {
            Ok(patches) => {
                core.notifier
                    .settle_serial(&SourceEvent::Update {
                        transform,
                        patches: patches.clone(),
                    })
                    .await;
                Ok(patches)
            }
            Err(error) => {
                core.notifier
                    .settle_serial(&SourceEvent::UpdateFail {
                        transform,
                        error: error.clone(),
                    })
                    .await;
                Err(error)
            }
        }
    }
}

/// Capability: push transforms to a downstream store.
#[async_trait]
pub trait Pushable: Source {
    /// The store-specific push step; returns the transforms applied
    /// downstream (conventionally including the pushed transform itself).
    async fn push_hook(&self, transform: &Transform) -> Result<Vec<Transform>>;

    /// Run a transform through the request flow.
    async fn push(&self, transform: Transform) -> Result<Vec<Transform>> {
        let core = self.source_core();
        if core.log().contains(&transform.id) {
            return Ok(Vec::new());
        }
        let _slot = core.queues.push.lock().await;
        if core.log().contains(&transform.id) {
            return Ok(Vec::new());
        }
        tracing::debug!(source = core.name(), transform = %transform.id, "push started");

        let outcome: Result<Vec<Transform>> = async {
            core.notifier
                .publish_serial(&SourceEvent::BeforePush(transform.clone()))
                .await?;
            let result = self.push_hook(&transform).await?;
            transformed(core, &result).await?;
            Ok(result)
        }
        .await;

        match outcome {
            Ok(result) => {
                core.notifier
                    .settle_serial(&SourceEvent::Push {
                        transform,
                        result: result.clone(),
                    })
                    .await;
                Ok(result)
            }
            Err(error) => {
                core.notifier
                    .settle_serial(&SourceEvent::PushFail {
                        transform,
                        error: error.clone(),
                    })
                    .await;
                Err(error)
            }
        }
    }
}

/// Capability: pull catch-up transforms for a query.
#[async_trait]
pub trait Pullable: Source {
    /// The store-specific pull step; returns transforms that materialize
    /// the fetched state (e.g. remote records as `addRecord` operations).
    async fn pull_hook(&self, query: &Query) -> Result<Vec<Transform>>;

    /// Run a pull through the request flow. No idempotence guard: queries
    /// are not logged.
    async fn pull(&self, query: Query) -> Result<Vec<Transform>> {
        let core = self.source_core();
        let _slot = core.queues.pull.lock().await;
        tracing::debug!(source = core.name(), query = %query.id, "pull started");

        let outcome: Result<Vec<Transform>> = async {
            core.notifier
                .publish_serial(&SourceEvent::BeforePull(query.clone()))
                .await?;
            let result = self.pull_hook(&query).await?;
            transformed(core, &result).await?;
            Ok(result)
        }
        .await;

        match outcome {
            Ok(result) => {
                core.notifier
                    .settle_serial(&SourceEvent::Pull {
                        query,
                        result: result.clone(),
                    })
                    .await;
                Ok(result)
            }
            Err(error) => {
                core.notifier
                    .settle_serial(&SourceEvent::PullFail {
                        query,
                        error: error.clone(),
                    })
                    .await;
                Err(error)
            }
        }
    }
}

/// Capability: apply externally-originated transforms.
#[async_trait]
pub trait Syncable: Source {
    /// The store-specific sync step.
    async fn sync_hook(&self, transform: &Transform) -> Result<()>;

    /// Run a transform through the request flow.
    async fn sync(&self, transform: Transform) -> Result<()> {
        let core = self.source_core();
        if core.log().contains(&transform.id) {
            return Ok(());
        }
        let _slot = core.queues.sync.lock().await;
        if core.log().contains(&transform.id) {
            return Ok(());
        }
        tracing::debug!(source = core.name(), transform = %transform.id, "sync started");

        let outcome: Result<()> = async {
            core.notifier
                .publish_serial(&SourceEvent::BeforeSync(transform.clone()))
                .await?;
            self.sync_hook(&transform).await?;
            transformed(core, std::slice::from_ref(&transform)).await?;
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => {
                core.notifier
                    .settle_serial(&SourceEvent::Sync { transform })
                    .await;
                Ok(())
            }
            Err(error) => {
                core.notifier
                    .settle_serial(&SourceEvent::SyncFail {
                        transform,
                        error: error.clone(),
                    })
                    .await;
                Err(error)
            }
        }
    }

    /// Sync a batch of transforms in order.
    async fn sync_all(&self, transforms: Vec<Transform>) -> Result<()> {
        for transform in transforms {
            self.sync(transform).await?;
        }
        Ok(())
    }
}
