//! Operation processors: pluggable pipeline stages that derive
//! consequential operations and side bookkeeping from a primary operation.
//!
//! Processors add, they never veto. The cache runs `process` before
//! applying an operation's base patch and `finally` after the whole input
//! has been applied.

use crate::cache::Cache;
use crate::operation::RecordOperation;
use crate::record::{Record, RecordIdentity, RelationshipData};
use crate::schema::{RelationshipKind, Schema};
use std::collections::{BTreeSet, HashSet};
use std::sync::RwLock;

/// A pipeline stage in the cache's patch algorithm.
pub trait OperationProcessor: Send + Sync {
    /// Derive consequential operations for `operation`, against the cache
    /// state before the operation is applied.
    fn process(&self, cache: &Cache, operation: &RecordOperation) -> Vec<RecordOperation>;

    /// Bookkeeping hook, run per original operation after all patches for
    /// the input have been applied. Produces no patches.
    fn finally(&self, cache: &Cache, operation: &RecordOperation) {
        let _ = (cache, operation);
    }

    /// Whether this processor tracks `identity` as deleted.
    fn has_deleted(&self, identity: &RecordIdentity) -> bool {
        let _ = identity;
        false
    }

    /// Drop accumulated state.
    fn reset(&self) {}
}

/// Keeps declared inverse relationships consistent with their forward side.
///
/// Every derived operation targets the directly related record, so the
/// cache can apply consequences without re-entering the pipeline.
pub struct InverseRelationshipProcessor;

impl InverseRelationshipProcessor {
    fn link(
        schema: &Schema,
        owner: &RecordIdentity,
        relationship: &str,
        related: &RecordIdentity,
    ) -> Option<RecordOperation> {
        let (inverse, inverse_def) = schema.inverse_of(&owner.model, relationship)?;
        Some(match inverse_def.kind {
            RelationshipKind::HasMany => RecordOperation::AddToHasMany {
                record: related.clone(),
                relationship: inverse.to_string(),
                related_record: owner.clone(),
            },
            RelationshipKind::HasOne => RecordOperation::ReplaceHasOne {
                record: related.clone(),
                relationship: inverse.to_string(),
                related_record: Some(owner.clone()),
            },
        })
    }

    fn unlink(
        cache: &Cache,
        owner: &RecordIdentity,
        relationship: &str,
        related: &RecordIdentity,
    ) -> Option<RecordOperation> {
        let (inverse, inverse_def) = cache.schema().inverse_of(&owner.model, relationship)?;
        match inverse_def.kind {
            RelationshipKind::HasMany => Some(RecordOperation::RemoveFromHasMany {
                record: related.clone(),
                relationship: inverse.to_string(),
                related_record: owner.clone(),
            }),
            RelationshipKind::HasOne => {
                // Only clear an inverse that still points back at the owner.
                let current = cache.record(related)?.relationship_data(inverse)?.as_one()?;
                (current == owner).then(|| RecordOperation::ReplaceHasOne {
                    record: related.clone(),
                    relationship: inverse.to_string(),
                    related_record: None,
                })
            }
        }
    }

    // All populated (relationship, identity) pairs on a record.
    fn links_of(record: &Record) -> Vec<(String, RecordIdentity)> {
        let mut links = Vec::new();
        for (name, relationship) in &record.relationships {
            match &relationship.data {
                RelationshipData::One(Some(identity)) => {
                    links.push((name.clone(), identity.clone()));
                }
                RelationshipData::One(None) => {}
                RelationshipData::Many(members) => {
                    links.extend(members.iter().map(|m| (name.clone(), m.clone())));
                }
            }
        }
        links
    }

    fn current_members(
        cache: &Cache,
        owner: &RecordIdentity,
        relationship: &str,
    ) -> BTreeSet<RecordIdentity> {
        cache
            .record(owner)
            .and_then(|r| r.relationship_data(relationship))
            .and_then(RelationshipData::as_many)
            .cloned()
            .unwrap_or_default()
    }
}

impl OperationProcessor for InverseRelationshipProcessor {
    fn process(&self, cache: &Cache, operation: &RecordOperation) -> Vec<RecordOperation> {
        let schema = cache.schema();
        match operation {
            RecordOperation::AddRecord { record } => {
                let owner = record.identity();
                Self::links_of(record)
                    .into_iter()
                    .filter_map(|(name, related)| Self::link(schema, &owner, &name, &related))
                    .collect()
            }
            RecordOperation::ReplaceRecord { record } => {
                let owner = record.identity();
                let old_links: BTreeSet<(String, RecordIdentity)> = cache
                    .record(&owner)
                    .map(|current| Self::links_of(current).into_iter().collect())
                    .unwrap_or_default();
                let new_links: BTreeSet<(String, RecordIdentity)> =
                    Self::links_of(record).into_iter().collect();

                let mut operations = Vec::new();
                for (name, related) in old_links.difference(&new_links) {
                    operations.extend(Self::unlink(cache, &owner, name, related));
                }
                for (name, related) in new_links.difference(&old_links) {
                    operations.extend(Self::link(schema, &owner, name, related));
                }
                operations
            }
            RecordOperation::RemoveRecord { record } => {
                let Some(current) = cache.record(record) else {
                    return Vec::new();
                };
                Self::links_of(current)
                    .into_iter()
                    .filter_map(|(name, related)| Self::unlink(cache, record, &name, &related))
                    .collect()
            }
            RecordOperation::AddToHasMany {
                record,
                relationship,
                related_record,
            } => {
                // A tombstoned owner never materializes, so no mirror either.
                if cache.record(record).is_none() && cache.has_deleted(record) {
                    return Vec::new();
                }
                if Self::current_members(cache, record, relationship).contains(related_record) {
                    return Vec::new();
                }
                Self::link(schema, record, relationship, related_record)
                    .into_iter()
                    .collect()
            }
            RecordOperation::RemoveFromHasMany {
                record,
                relationship,
                related_record,
            } => {
                if !Self::current_members(cache, record, relationship).contains(related_record) {
                    return Vec::new();
                }
                Self::unlink(cache, record, relationship, related_record)
                    .into_iter()
                    .collect()
            }
            RecordOperation::ReplaceHasMany {
                record,
                relationship,
                related_records,
            } => {
                // The base patch no-ops on absent records; so must the mirror.
                if cache.record(record).is_none() {
                    return Vec::new();
                }
                let current = Self::current_members(cache, record, relationship);
                let next: BTreeSet<RecordIdentity> = related_records.iter().cloned().collect();

                let mut operations = Vec::new();
                for related in current.difference(&next) {
                    operations.extend(Self::unlink(cache, record, relationship, related));
                }
                for related in next.difference(&current) {
                    operations.extend(Self::link(schema, record, relationship, related));
                }
                operations
            }
            RecordOperation::ReplaceHasOne {
                record,
                relationship,
                related_record,
            } => {
                // The base patch no-ops on absent records; so must the mirror.
                if cache.record(record).is_none() {
                    return Vec::new();
                }
                let current = cache
                    .record(record)
                    .and_then(|r| r.relationship_data(relationship))
                    .and_then(RelationshipData::as_one)
                    .cloned();
                if current == *related_record {
                    return Vec::new();
                }

                let mut operations = Vec::new();
                if let Some(previous) = &current {
                    operations.extend(Self::unlink(cache, record, relationship, previous));
                }
                if let Some(next) = related_record {
                    operations.extend(Self::link(schema, record, relationship, next));
                }
                operations
            }
            RecordOperation::ReplaceKey { .. } | RecordOperation::ReplaceAttribute { .. } => {
                Vec::new()
            }
        }
    }
}

/// Tracks removed records as tombstones so stale upstream operations cannot
/// resurrect them.
#[derive(Default)]
pub struct DeletionTrackingProcessor {
    deleted: RwLock<HashSet<RecordIdentity>>,
}

impl OperationProcessor for DeletionTrackingProcessor {
    fn process(&self, _cache: &Cache, _operation: &RecordOperation) -> Vec<RecordOperation> {
        Vec::new()
    }

    fn finally(&self, _cache: &Cache, operation: &RecordOperation) {
        if let RecordOperation::RemoveRecord { record } = operation {
            self.deleted.write().unwrap().insert(record.clone());
        }
    }

    fn has_deleted(&self, identity: &RecordIdentity) -> bool {
        self.deleted.read().unwrap().contains(identity)
    }

    fn reset(&self) {
        self.deleted.write().unwrap().clear();
    }
}
