//! Transforms: atomic, identified sequences of operations.
//!
//! A transform is the unit of atomicity and the unit of logging. Once built
//! it is immutable; only its id outlives application, in the transform log.

use crate::operation::RecordOperation;
use crate::record::{Record, RecordIdentity};
use crate::TransformId;
use serde::{Deserialize, Serialize};

/// An atomic, identified, ordered sequence of operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    /// Process-unique identifier, assigned at creation
    pub id: TransformId,
    /// Operations, applied in order
    pub operations: Vec<RecordOperation>,
    /// Free-form options passed through to stores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

impl Transform {
    /// Create a transform with a fresh uuid id.
    pub fn new(operations: Vec<RecordOperation>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operations,
            options: None,
        }
    }

    /// Create a transform with a caller-supplied id.
    pub fn with_id(id: impl Into<TransformId>, operations: Vec<RecordOperation>) -> Self {
        Self {
            id: id.into(),
            operations,
            options: None,
        }
    }

    /// Start building a transform from chained operations.
    pub fn builder() -> TransformBuilder {
        TransformBuilder::default()
    }
}

impl From<RecordOperation> for Transform {
    fn from(operation: RecordOperation) -> Self {
        Transform::new(vec![operation])
    }
}

/// Chained construction of a [`Transform`]. Pure data assembly, no I/O.
#[derive(Debug, Default)]
pub struct TransformBuilder {
    id: Option<TransformId>,
    operations: Vec<RecordOperation>,
    options: Option<serde_json::Value>,
}

impl TransformBuilder {
    /// Use a caller-supplied id instead of a fresh uuid.
    pub fn id(mut self, id: impl Into<TransformId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach free-form options.
    pub fn options(mut self, options: serde_json::Value) -> Self {
        self.options = Some(options);
        self
    }

    /// Append an `addRecord` operation.
    pub fn add_record(mut self, record: Record) -> Self {
        self.operations.push(RecordOperation::AddRecord { record });
        self
    }

    /// Append a `replaceRecord` operation.
    pub fn replace_record(mut self, record: Record) -> Self {
        self.operations
            .push(RecordOperation::ReplaceRecord { record });
        self
    }

    /// Append a `removeRecord` operation.
    pub fn remove_record(mut self, record: RecordIdentity) -> Self {
        self.operations
            .push(RecordOperation::RemoveRecord { record });
        self
    }

    /// Append a `replaceKey` operation.
    pub fn replace_key(
        mut self,
        record: RecordIdentity,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.operations.push(RecordOperation::ReplaceKey {
            record,
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Append a `replaceAttribute` operation.
    pub fn replace_attribute(
        mut self,
        record: RecordIdentity,
        attribute: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.operations.push(RecordOperation::ReplaceAttribute {
            record,
            attribute: attribute.into(),
            value: value.into(),
        });
        self
    }

    /// Append an `addToHasMany` operation.
    pub fn add_to_has_many(
        mut self,
        record: RecordIdentity,
        relationship: impl Into<String>,
        related_record: RecordIdentity,
    ) -> Self {
        self.operations.push(RecordOperation::AddToHasMany {
            record,
            relationship: relationship.into(),
            related_record,
        });
        self
    }

    /// Append a `removeFromHasMany` operation.
    pub fn remove_from_has_many(
        mut self,
        record: RecordIdentity,
        relationship: impl Into<String>,
        related_record: RecordIdentity,
    ) -> Self {
        self.operations.push(RecordOperation::RemoveFromHasMany {
            record,
            relationship: relationship.into(),
            related_record,
        });
        self
    }

    /// Append a `replaceHasMany` operation.
    pub fn replace_has_many(
        mut self,
        record: RecordIdentity,
        relationship: impl Into<String>,
        related_records: Vec<RecordIdentity>,
    ) -> Self {
        self.operations.push(RecordOperation::ReplaceHasMany {
            record,
            relationship: relationship.into(),
            related_records,
        });
        self
    }

    /// Append a `replaceHasOne` operation.
    pub fn replace_has_one(
        mut self,
        record: RecordIdentity,
        relationship: impl Into<String>,
        related_record: Option<RecordIdentity>,
    ) -> Self {
        self.operations.push(RecordOperation::ReplaceHasOne {
            record,
            relationship: relationship.into(),
            related_record,
        });
        self
    }

    /// Finish building.
    pub fn build(self) -> Transform {
        match self.id {
            Some(id) => Transform {
                id,
                operations: self.operations,
                options: self.options,
            },
            None => Transform {
                options: self.options,
                ..Transform::new(self.operations)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fresh_ids_are_unique() {
        let a = Transform::new(vec![]);
        let b = Transform::new(vec![]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn builder_chains_operations_in_order() {
        let planet = RecordIdentity::new("planet", "p1");
        let moon = RecordIdentity::new("moon", "m1");

        let transform = Transform::builder()
            .add_record(Record::new("planet", "p1"))
            .replace_attribute(planet.clone(), "name", json!("Jupiter"))
            .add_to_has_many(planet.clone(), "moons", moon.clone())
            .build();

        assert_eq!(transform.operations.len(), 3);
        assert!(matches!(
            &transform.operations[0],
            RecordOperation::AddRecord { .. }
        ));
        assert!(matches!(
            &transform.operations[2],
            RecordOperation::AddToHasMany { related_record, .. } if *related_record == moon
        ));
    }

    #[test]
    fn builder_with_explicit_id() {
        let transform = Transform::builder()
            .id("t-1")
            .remove_record(RecordIdentity::new("planet", "p1"))
            .build();

        assert_eq!(transform.id, "t-1");
    }

    #[test]
    fn from_single_operation() {
        let transform: Transform = RecordOperation::RemoveRecord {
            record: RecordIdentity::new("planet", "p1"),
        }
        .into();

        assert_eq!(transform.operations.len(), 1);
    }

    #[test]
    fn serialization_roundtrip() {
        let transform = Transform::builder()
            .id("t-1")
            .replace_attribute(RecordIdentity::new("planet", "p1"), "name", json!("Pluto"))
            .build();

        let json = serde_json::to_string(&transform).unwrap();
        let parsed: Transform = serde_json::from_str(&json).unwrap();
        assert_eq!(transform, parsed);
    }
}
