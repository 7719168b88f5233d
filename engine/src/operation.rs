//! Operation types for expressing changes.
//!
//! Changes are expressed as operations, not direct mutations. Operations are
//! a closed set matched exhaustively, so every consumer (cache pipeline,
//! inverse maintenance, serialization) is checked at compile time.

use crate::record::{Record, RecordIdentity};
use serde::{Deserialize, Serialize};

/// One typed mutation intent against a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RecordOperation {
    /// Add a full record to the graph.
    AddRecord { record: Record },
    /// Replace a record wholesale.
    ReplaceRecord { record: Record },
    /// Remove a record from the graph.
    RemoveRecord { record: RecordIdentity },
    /// Replace one remote key value.
    ReplaceKey {
        record: RecordIdentity,
        key: String,
        value: String,
    },
    /// Replace one attribute value.
    ReplaceAttribute {
        record: RecordIdentity,
        attribute: String,
        value: serde_json::Value,
    },
    /// Add a member to a has-many relationship.
    AddToHasMany {
        record: RecordIdentity,
        relationship: String,
        related_record: RecordIdentity,
    },
    /// Remove a member from a has-many relationship.
    RemoveFromHasMany {
        record: RecordIdentity,
        relationship: String,
        related_record: RecordIdentity,
    },
    /// Replace the full membership of a has-many relationship.
    ReplaceHasMany {
        record: RecordIdentity,
        relationship: String,
        related_records: Vec<RecordIdentity>,
    },
    /// Replace the target of a has-one relationship (`None` unsets it).
    ReplaceHasOne {
        record: RecordIdentity,
        relationship: String,
        related_record: Option<RecordIdentity>,
    },
}

impl RecordOperation {
    /// The identity of the record this operation targets.
    pub fn record_identity(&self) -> RecordIdentity {
        match self {
            RecordOperation::AddRecord { record } | RecordOperation::ReplaceRecord { record } => {
                record.identity()
            }
            RecordOperation::RemoveRecord { record }
            | RecordOperation::ReplaceKey { record, .. }
            | RecordOperation::ReplaceAttribute { record, .. }
            | RecordOperation::AddToHasMany { record, .. }
            | RecordOperation::RemoveFromHasMany { record, .. }
            | RecordOperation::ReplaceHasMany { record, .. }
            | RecordOperation::ReplaceHasOne { record, .. } => record.clone(),
        }
    }

    /// The relationship this operation touches, if any.
    pub fn relationship(&self) -> Option<&str> {
        match self {
            RecordOperation::AddToHasMany { relationship, .. }
            | RecordOperation::RemoveFromHasMany { relationship, .. }
            | RecordOperation::ReplaceHasMany { relationship, .. }
            | RecordOperation::ReplaceHasOne { relationship, .. } => Some(relationship),
            _ => None,
        }
    }
}
