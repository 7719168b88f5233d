//! Normalized record cache.
//!
//! The cache owns one persistent map per model type and applies operations
//! through an ordered processor pipeline. Each operation maps to one base
//! patch; processors derive consequential operations (inverse relationship
//! maintenance) before the base patch is applied, and their `finally` hooks
//! run bookkeeping (tombstones) after the whole input has been applied.

use crate::map::PersistentMap;
use crate::operation::RecordOperation;
use crate::processor::{
    DeletionTrackingProcessor, InverseRelationshipProcessor, OperationProcessor,
};
use crate::record::{Record, RecordIdentity, Relationship, RelationshipData};
use crate::schema::Schema;
use crate::{ModelName, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Patch kinds, mirroring the three ways a path can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

/// The applied, path-addressed effect of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    /// What happened at the path
    pub op: PatchOp,
    /// Path segments: `[type]`, `[type, id]`, or deeper
    pub path: Vec<String>,
    /// New value for add/replace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl Patch {
    fn add(path: Vec<String>, value: serde_json::Value) -> Self {
        Self {
            op: PatchOp::Add,
            path,
            value: Some(value),
        }
    }

    fn replace(path: Vec<String>, value: serde_json::Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path,
            value: Some(value),
        }
    }

    fn remove(path: Vec<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path,
            value: None,
        }
    }
}

fn record_path(identity: &RecordIdentity) -> Vec<String> {
    vec![identity.model.clone(), identity.id.clone()]
}

fn sub_path(identity: &RecordIdentity, segments: &[&str]) -> Vec<String> {
    let mut path = record_path(identity);
    path.extend(segments.iter().map(|s| s.to_string()));
    path
}

fn has_many_value(members: impl IntoIterator<Item = RecordIdentity>) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = members
        .into_iter()
        .map(|m| (m.key(), serde_json::Value::Bool(true)))
        .collect();
    serde_json::Value::Object(map)
}

/// The normalized record store.
pub struct Cache {
    schema: Arc<Schema>,
    maps: BTreeMap<ModelName, PersistentMap<RecordId, Record>>,
    processors: Vec<Box<dyn OperationProcessor>>,
}

impl Cache {
    /// Create a cache with the default processor pipeline: inverse
    /// relationship maintenance followed by deletion tracking.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::with_processors(
            schema,
            vec![
                Box::new(InverseRelationshipProcessor),
                Box::<DeletionTrackingProcessor>::default(),
            ],
        )
    }

    /// Create a cache with a custom processor pipeline.
    pub fn with_processors(
        schema: Arc<Schema>,
        processors: Vec<Box<dyn OperationProcessor>>,
    ) -> Self {
        let maps = schema
            .models
            .keys()
            .map(|name| (name.clone(), PersistentMap::new()))
            .collect();
        Self {
            schema,
            maps,
            processors,
        }
    }

    /// The schema this cache was built against.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Get a record by identity.
    pub fn record(&self, identity: &RecordIdentity) -> Option<&Record> {
        self.maps.get(&identity.model)?.get(&identity.id)
    }

    /// All records of a model type.
    pub fn records(&self, model: &str) -> Vec<&Record> {
        self.maps
            .get(model)
            .map(|map| map.values().collect())
            .unwrap_or_default()
    }

    /// Whether any processor tracks `identity` as deleted.
    pub fn has_deleted(&self, identity: &RecordIdentity) -> bool {
        self.processors.iter().any(|p| p.has_deleted(identity))
    }

    /// Read a value at a path.
    ///
    /// Supported paths: `[type]`, `[type, id]`, `[type, id, attributes, name]`,
    /// `[type, id, keys, name]`, `[type, id, relationships, name]`,
    /// `[type, id, relationships, name, data]`, and
    /// `[type, id, relationships, name, data, "type:id"]`.
    pub fn get(&self, path: &[&str]) -> Option<serde_json::Value> {
        match path {
            [model] => {
                let map = self.maps.get(*model)?;
                let object: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .map(|(id, record)| (id.clone(), serde_json::to_value(record).unwrap_or_default()))
                    .collect();
                Some(serde_json::Value::Object(object))
            }
            [model, id] => {
                let record = self.maps.get(*model)?.get(&id.to_string())?;
                serde_json::to_value(record).ok()
            }
            [model, id, "attributes", name] => self
                .record(&RecordIdentity::new(*model, *id))?
                .attributes
                .get(*name)
                .cloned(),
            [model, id, "keys", name] => self
                .record(&RecordIdentity::new(*model, *id))?
                .keys
                .get(*name)
                .map(|v| serde_json::Value::String(v.clone())),
            [model, id, "relationships", name] => {
                let relationship = self
                    .record(&RecordIdentity::new(*model, *id))?
                    .relationships
                    .get(*name)?;
                serde_json::to_value(relationship).ok()
            }
            [model, id, "relationships", name, "data"] => {
                let data = self
                    .record(&RecordIdentity::new(*model, *id))?
                    .relationship_data(name)?;
                Some(match data {
                    RelationshipData::One(None) => serde_json::Value::Null,
                    RelationshipData::One(Some(identity)) => {
                        serde_json::to_value(identity).ok()?
                    }
                    RelationshipData::Many(members) => has_many_value(members.iter().cloned()),
                })
            }
            [model, id, "relationships", name, "data", member] => {
                let data = self
                    .record(&RecordIdentity::new(*model, *id))?
                    .relationship_data(name)?;
                let members = data.as_many()?;
                members
                    .iter()
                    .any(|m| m.key() == *member)
                    .then_some(serde_json::Value::Bool(true))
            }
            _ => None,
        }
    }

    /// Write a value at a path. The primitive counterpart of [`Cache::patch`]:
    /// no processors run and no patches are emitted.
    pub fn set(&mut self, path: &[&str], value: serde_json::Value) -> crate::Result<()> {
        match path {
            [model] => {
                let object = value
                    .as_object()
                    .ok_or_else(|| bad_path_value(path, "an object of records"))?;
                let mut map = PersistentMap::new();
                for (id, entry) in object {
                    let record: Record = serde_json::from_value(entry.clone())
                        .map_err(|err| crate::Error::Assertion(format!("invalid record: {err}")))?;
                    map = map.insert(id.clone(), record);
                }
                self.maps.insert(model.to_string(), map);
                Ok(())
            }
            [_, _] => {
                let record: Record = serde_json::from_value(value)
                    .map_err(|err| crate::Error::Assertion(format!("invalid record: {err}")))?;
                self.insert_record(record);
                Ok(())
            }
            [model, id, "attributes", name] => {
                self.update_record(&RecordIdentity::new(*model, *id), |record| {
                    record.attributes.insert(name.to_string(), value);
                });
                Ok(())
            }
            [model, id, "keys", name] => {
                let value = value
                    .as_str()
                    .ok_or_else(|| bad_path_value(path, "a string"))?
                    .to_string();
                self.update_record(&RecordIdentity::new(*model, *id), |record| {
                    record.keys.insert(name.to_string(), value);
                });
                Ok(())
            }
            [model, id, "relationships", name, "data"] => {
                let data = parse_relationship_data(&value)
                    .ok_or_else(|| bad_path_value(path, "relationship data"))?;
                self.update_record(&RecordIdentity::new(*model, *id), |record| {
                    record
                        .relationships
                        .insert(name.to_string(), Relationship { data });
                });
                Ok(())
            }
            _ => Err(crate::Error::Assertion(format!(
                "unsupported cache path: {}",
                path.join("/")
            ))),
        }
    }

    /// Remove the value at a path. Same primitive status as [`Cache::set`].
    pub fn remove(&mut self, path: &[&str]) -> crate::Result<()> {
        match path {
            [model] => {
                self.maps.insert(model.to_string(), PersistentMap::new());
                Ok(())
            }
            [model, id] => {
                if let Some(map) = self.maps.get_mut(*model) {
                    *map = map.remove(&id.to_string());
                }
                Ok(())
            }
            [model, id, "attributes", name] => {
                self.update_record(&RecordIdentity::new(*model, *id), |record| {
                    record.attributes.remove(*name);
                });
                Ok(())
            }
            [model, id, "relationships", name, "data", member] => {
                self.update_record(&RecordIdentity::new(*model, *id), |record| {
                    if let Some(Relationship {
                        data: RelationshipData::Many(members),
                    }) = record.relationships.get_mut(*name)
                    {
                        members.retain(|m| m.key() != *member);
                    }
                });
                Ok(())
            }
            _ => Err(crate::Error::Assertion(format!(
                "unsupported cache path: {}",
                path.join("/")
            ))),
        }
    }

    /// Apply operations through the processor pipeline.
    ///
    /// Returns the ordered patches actually applied: for each operation, its
    /// base patch first, then patches from processor-derived operations in
    /// processor-registration order. Derived operations are applied without
    /// re-entering the pipeline; inverse maintenance only ever targets the
    /// directly related record.
    pub fn patch(&mut self, operations: &[RecordOperation]) -> Vec<Patch> {
        let mut patches = Vec::new();
        for operation in operations {
            let derived: Vec<RecordOperation> = {
                let this: &Cache = self;
                this.processors
                    .iter()
                    .flat_map(|p| p.process(this, operation))
                    .collect()
            };

            if let Some(patch) = self.apply_operation(operation) {
                patches.push(patch);
            }
            for consequence in &derived {
                if let Some(patch) = self.apply_operation(consequence) {
                    patches.push(patch);
                }
            }
        }
        {
            let this: &Cache = self;
            for operation in operations {
                for processor in &this.processors {
                    processor.finally(this, operation);
                }
            }
        }
        tracing::debug!(
            operations = operations.len(),
            patches = patches.len(),
            "cache patch applied"
        );
        patches
    }

    /// Reset to another cache's contents, or to empty.
    ///
    /// Resetting to a base is cheap: persistent maps share structure, so
    /// this is the restore half of a fork/diff/reset cycle.
    pub fn reset(&mut self, base: Option<&Cache>) {
        self.maps = match base {
            Some(base) => base.maps.clone(),
            None => self
                .schema
                .models
                .keys()
                .map(|name| (name.clone(), PersistentMap::new()))
                .collect(),
        };
        for processor in &self.processors {
            processor.reset();
        }
    }

    fn insert_record(&mut self, record: Record) {
        let map = self.maps.entry(record.model.clone()).or_default();
        *map = map.insert(record.id.clone(), record);
    }

    // Mutate a record in place, materializing a stub when absent.
    fn update_record(&mut self, identity: &RecordIdentity, mutate: impl FnOnce(&mut Record)) {
        let mut record = self
            .record(identity)
            .cloned()
            .unwrap_or_else(|| Record::stub(identity));
        mutate(&mut record);
        self.insert_record(record);
    }

    // Stub-materializing operations skip tombstoned identities so a stale
    // upstream operation cannot resurrect a removed record.
    fn blocked_by_tombstone(&self, identity: &RecordIdentity) -> bool {
        self.record(identity).is_none() && self.has_deleted(identity)
    }

    fn apply_operation(&mut self, operation: &RecordOperation) -> Option<Patch> {
        match operation {
            RecordOperation::AddRecord { record } => {
                let value = serde_json::to_value(record).ok()?;
                self.insert_record(record.clone());
                Some(Patch::add(record_path(&record.identity()), value))
            }
            RecordOperation::ReplaceRecord { record } => {
                let value = serde_json::to_value(record).ok()?;
                self.insert_record(record.clone());
                Some(Patch::replace(record_path(&record.identity()), value))
            }
            RecordOperation::RemoveRecord { record } => {
                let map = self.maps.get_mut(&record.model)?;
                if !map.contains_key(&record.id) {
                    return None;
                }
                *map = map.remove(&record.id);
                Some(Patch::remove(record_path(record)))
            }
            RecordOperation::ReplaceKey { record, key, value } => {
                if self.blocked_by_tombstone(record) {
                    return None;
                }
                self.update_record(record, |r| {
                    r.keys.insert(key.clone(), value.clone());
                });
                Some(Patch::replace(
                    sub_path(record, &["keys", key]),
                    serde_json::Value::String(value.clone()),
                ))
            }
            RecordOperation::ReplaceAttribute {
                record,
                attribute,
                value,
            } => {
                if self.blocked_by_tombstone(record) {
                    return None;
                }
                self.update_record(record, |r| {
                    r.attributes.insert(attribute.clone(), value.clone());
                });
                Some(Patch::replace(
                    sub_path(record, &["attributes", attribute]),
                    value.clone(),
                ))
            }
            RecordOperation::AddToHasMany {
                record,
                relationship,
                related_record,
            } => {
                if self.blocked_by_tombstone(record) {
                    return None;
                }
                let mut changed = false;
                self.update_record(record, |r| {
                    let slot = r
                        .relationships
                        .entry(relationship.clone())
                        .or_insert_with(|| Relationship::has_many([]));
                    match &mut slot.data {
                        RelationshipData::Many(members) => {
                            changed = members.insert(related_record.clone());
                        }
                        RelationshipData::One(_) => {
                            slot.data =
                                RelationshipData::Many([related_record.clone()].into());
                            changed = true;
                        }
                    }
                });
                changed.then(|| {
                    Patch::add(
                        sub_path(
                            record,
                            &["relationships", relationship, "data", &related_record.key()],
                        ),
                        serde_json::Value::Bool(true),
                    )
                })
            }
            RecordOperation::RemoveFromHasMany {
                record,
                relationship,
                related_record,
            } => {
                self.record(record)?;
                let mut changed = false;
                self.update_record(record, |r| {
                    if let Some(Relationship {
                        data: RelationshipData::Many(members),
                    }) = r.relationships.get_mut(relationship)
                    {
                        changed = members.remove(related_record);
                    }
                });
                changed.then(|| {
                    Patch::remove(sub_path(
                        record,
                        &["relationships", relationship, "data", &related_record.key()],
                    ))
                })
            }
            RecordOperation::ReplaceHasMany {
                record,
                relationship,
                related_records,
            } => {
                self.record(record)?;
                self.update_record(record, |r| {
                    r.relationships.insert(
                        relationship.clone(),
                        Relationship::has_many(related_records.iter().cloned()),
                    );
                });
                Some(Patch::replace(
                    sub_path(record, &["relationships", relationship, "data"]),
                    has_many_value(related_records.iter().cloned()),
                ))
            }
            RecordOperation::ReplaceHasOne {
                record,
                relationship,
                related_record,
            } => {
                self.record(record)?;
                self.update_record(record, |r| {
                    r.relationships.insert(
                        relationship.clone(),
                        Relationship::has_one(related_record.clone()),
                    );
                });
                let value = match related_record {
                    Some(identity) => serde_json::to_value(identity).ok()?,
                    None => serde_json::Value::Null,
                };
                Some(Patch::replace(
                    sub_path(record, &["relationships", relationship, "data"]),
                    value,
                ))
            }
        }
    }
}

fn bad_path_value(path: &[&str], expected: &str) -> crate::Error {
    crate::Error::Assertion(format!(
        "value at {} must be {expected}",
        path.join("/")
    ))
}

fn parse_relationship_data(value: &serde_json::Value) -> Option<RelationshipData> {
    match value {
        serde_json::Value::Null => Some(RelationshipData::One(None)),
        serde_json::Value::Array(items) => {
            let members = items
                .iter()
                .map(|item| serde_json::from_value(item.clone()).ok())
                .collect::<Option<_>>()?;
            Some(RelationshipData::Many(members))
        }
        serde_json::Value::Object(map) => {
            if map.contains_key("type") && map.contains_key("id") {
                serde_json::from_value(value.clone())
                    .ok()
                    .map(|identity| RelationshipData::One(Some(identity)))
            } else {
                // Membership-object form: {"type:id": true, ...}
                let members = map
                    .keys()
                    .map(|key| {
                        key.split_once(':')
                            .map(|(model, id)| RecordIdentity::new(model, id))
                    })
                    .collect::<Option<_>>()?;
                Some(RelationshipData::Many(members))
            }
        }
        _ => None,
    }
}
