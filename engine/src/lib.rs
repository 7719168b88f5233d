//! # Weft Engine
//!
//! An embeddable, in-process data-orchestration engine.
//!
//! Weft maintains normalized graphs of typed records, accepts changes as
//! atomic transforms, tracks applied transforms in a replayable log, answers
//! structural queries against the graph, and coordinates propagation of
//! transforms and requests among independent stores.
//!
//! ## Design Principles
//!
//! - **Operations, not mutations**: every change is expressed as data and
//!   flows through one pipeline, so consequences (inverse relationships,
//!   tombstones) and notifications fall out uniformly
//! - **Explicit dependencies**: buckets, schemas, and processors are
//!   injected at construction; the engine reads no ambient state
//! - **Cooperative concurrency**: one logical thread, FIFO request queues,
//!   no locks held across suspension points
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! Data is normalized into [`Record`]s keyed by [`RecordIdentity`]
//! (`{type, id}`), each carrying keys, attributes, and relationships.
//!
//! ### Transforms
//!
//! Changes are expressed as [`RecordOperation`]s bundled into an atomic
//! [`Transform`]. A [`TransformLog`] remembers which transforms a source has
//! applied; replaying a logged transform is a no-op.
//!
//! ### Sources
//!
//! A source composes a store behind the request-flow protocol: the
//! [`Queryable`], [`Updatable`], [`Pushable`], [`Pullable`], and
//! [`Syncable`] capabilities, each publishing lifecycle events around its
//! core hook. [`MemorySource`] is the in-crate store: a normalized
//! [`Cache`] whose processor pipeline maintains inverse relationships and
//! tracks deletions.
//!
//! ### Coordination
//!
//! A [`Coordinator`] registers sources by name and wires them with
//! [`SyncStrategy`] (relay every transform) and [`RequestStrategy`] (relay
//! one event into a request verb), with explicit blocking policy.
//!
//! ## Quick Start
//!
//! ```rust
//! use weft_engine::{
//!     AttributeKind, MemorySource, MemorySourceSettings, ModelDefinition, Query,
//!     QueryExpression, Queryable, Record, Schema, Transform, Updatable,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> weft_engine::Result<()> {
//! // 1. Define a schema
//! let schema = Schema::new().with_model(
//!     "planet",
//!     ModelDefinition::new().with_attribute("name", AttributeKind::String),
//! );
//!
//! // 2. Create a source
//! let store = MemorySource::new(MemorySourceSettings {
//!     name: "store".into(),
//!     schema,
//!     bucket: None,
//! })?;
//!
//! // 3. Apply a transform
//! store
//!     .update(
//!         Transform::builder()
//!             .add_record(Record::new("planet", "p1").with_attribute("name", "Pluto"))
//!             .build(),
//!     )
//!     .await?;
//!
//! // 4. Query records
//! let result = store
//!     .query(Query::new(QueryExpression::records("planet").filter(
//!         QueryExpression::attribute("name").equal(json!("Pluto")),
//!     )))
//!     .await?;
//! assert_eq!(result.as_object().unwrap().len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistence
//!
//! Attach a [`Bucket`] to persist a source's transform log; rehydrate with
//! [`MemorySource::load`] or [`TransformLog::load`]. Buckets are
//! best-effort: a persistence failure surfaces to the caller after the
//! in-memory state has already advanced.

pub mod bucket;
pub mod cache;
pub mod coordinator;
pub mod error;
pub mod evaluator;
pub mod log;
pub mod map;
pub mod memory;
pub mod notifier;
pub mod operation;
pub mod processor;
pub mod query;
pub mod record;
pub mod schema;
pub mod source;
pub mod transform;

// Re-export main types at crate root
pub use bucket::{Bucket, MemoryBucket};
pub use cache::{Cache, Patch, PatchOp};
pub use coordinator::{
    CoordinatedSource, Coordinator, RequestStrategy, RequestVerb, Strategy, SyncStrategy,
};
pub use error::{Error, Result};
pub use evaluator::{QueryContext, QueryEvaluator};
pub use log::{LogEvent, TransformLog};
pub use map::PersistentMap;
pub use memory::{MemorySource, MemorySourceSettings};
pub use notifier::{ListenerId, Notifier};
pub use operation::RecordOperation;
pub use processor::{
    DeletionTrackingProcessor, InverseRelationshipProcessor, OperationProcessor,
};
pub use query::{Query, QueryExpression};
pub use record::{Record, RecordIdentity, Relationship, RelationshipData};
pub use schema::{
    AttributeDef, AttributeKind, ModelDefinition, RelationshipDef, RelationshipKind, Schema,
};
pub use source::{
    Pullable, Pushable, Queryable, RequestPayload, Source, SourceCore, SourceEvent,
    SourceEventKind, Syncable, Updatable,
};
pub use transform::{Transform, TransformBuilder};

/// Type aliases for clarity
pub type ModelName = String;
pub type RecordId = String;
pub type TransformId = String;
pub type QueryId = String;
