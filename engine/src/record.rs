//! Record types for the normalized graph.
//!
//! Records are identified by a `{type, id}` pair and carry keys, attributes,
//! and relationships. Relationship data is a closed enum: an optional single
//! identity for has-one, an ordered set of identities for has-many.

use crate::{ModelName, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The universal record key: a model type plus an id.
///
/// Equality is structural. The serialized form `"type:id"` is used as the
/// has-many membership key and in patch paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordIdentity {
    /// Model type
    #[serde(rename = "type")]
    pub model: ModelName,
    /// Record id, unique within the model type
    pub id: RecordId,
}

impl RecordIdentity {
    /// Create a new record identity.
    pub fn new(model: impl Into<ModelName>, id: impl Into<RecordId>) -> Self {
        Self {
            model: model.into(),
            id: id.into(),
        }
    }

    /// The serialized `"type:id"` form.
    pub fn key(&self) -> String {
        format!("{}:{}", self.model, self.id)
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model, self.id)
    }
}

/// Relationship linkage data.
///
/// Serialized untagged: `null` or a single identity object for has-one,
/// an array of identities for has-many.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipData {
    /// Has-one linkage; `None` when unset
    One(Option<RecordIdentity>),
    /// Has-many linkage, ordered by identity
    Many(BTreeSet<RecordIdentity>),
}

impl RelationshipData {
    /// The linked identity of a has-one relationship.
    pub fn as_one(&self) -> Option<&RecordIdentity> {
        match self {
            RelationshipData::One(data) => data.as_ref(),
            RelationshipData::Many(_) => None,
        }
    }

    /// The linked identities of a has-many relationship.
    pub fn as_many(&self) -> Option<&BTreeSet<RecordIdentity>> {
        match self {
            RelationshipData::One(_) => None,
            RelationshipData::Many(data) => Some(data),
        }
    }
}

/// A named relationship slot on a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    /// Current linkage
    pub data: RelationshipData,
}

impl Relationship {
    /// A has-one relationship pointing at `related`.
    pub fn has_one(related: Option<RecordIdentity>) -> Self {
        Self {
            data: RelationshipData::One(related),
        }
    }

    /// A has-many relationship containing `related`.
    pub fn has_many(related: impl IntoIterator<Item = RecordIdentity>) -> Self {
        Self {
            data: RelationshipData::Many(related.into_iter().collect()),
        }
    }
}

/// A record in the normalized graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Model type
    #[serde(rename = "type")]
    pub model: ModelName,
    /// Record id
    pub id: RecordId,
    /// Remote key values by key name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, String>,
    /// Attribute values by attribute name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Relationships by relationship name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, Relationship>,
}

impl Record {
    /// Create an empty record with the given identity.
    pub fn new(model: impl Into<ModelName>, id: impl Into<RecordId>) -> Self {
        Self {
            model: model.into(),
            id: id.into(),
            keys: BTreeMap::new(),
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    /// Create a bare stub record for an identity.
    pub fn stub(identity: &RecordIdentity) -> Self {
        Self::new(identity.model.clone(), identity.id.clone())
    }

    /// This record's identity.
    pub fn identity(&self) -> RecordIdentity {
        RecordIdentity::new(self.model.clone(), self.id.clone())
    }

    /// Builder-style attribute assignment.
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Builder-style key assignment.
    pub fn with_key(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.keys.insert(name.into(), value.into());
        self
    }

    /// Builder-style relationship assignment.
    pub fn with_relationship(mut self, name: impl Into<String>, relationship: Relationship) -> Self {
        self.relationships.insert(name.into(), relationship);
        self
    }

    /// Get an attribute value.
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    /// Get a relationship's linkage data.
    pub fn relationship_data(&self, name: &str) -> Option<&RelationshipData> {
        self.relationships.get(name).map(|r| &r.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_key_and_display() {
        let identity = RecordIdentity::new("planet", "p1");
        assert_eq!(identity.key(), "planet:p1");
        assert_eq!(identity.to_string(), "planet:p1");
    }

    #[test]
    fn identity_equality_is_structural() {
        let a = RecordIdentity::new("planet", "p1");
        let b = RecordIdentity::new("planet", "p1");
        let c = RecordIdentity::new("moon", "p1");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn build_record() {
        let record = Record::new("planet", "p1")
            .with_attribute("name", "Jupiter")
            .with_key("remoteId", "j-1")
            .with_relationship(
                "moons",
                Relationship::has_many([RecordIdentity::new("moon", "m1")]),
            );

        assert_eq!(record.identity(), RecordIdentity::new("planet", "p1"));
        assert_eq!(record.attribute("name"), Some(&json!("Jupiter")));
        assert_eq!(record.keys.get("remoteId"), Some(&"j-1".to_string()));

        let moons = record.relationship_data("moons").unwrap().as_many().unwrap();
        assert!(moons.contains(&RecordIdentity::new("moon", "m1")));
    }

    #[test]
    fn stub_record_is_bare() {
        let stub = Record::stub(&RecordIdentity::new("planet", "p1"));
        assert!(stub.keys.is_empty());
        assert!(stub.attributes.is_empty());
        assert!(stub.relationships.is_empty());
    }

    #[test]
    fn relationship_data_accessors() {
        let one = RelationshipData::One(Some(RecordIdentity::new("planet", "p1")));
        assert_eq!(one.as_one(), Some(&RecordIdentity::new("planet", "p1")));
        assert!(one.as_many().is_none());

        let many = RelationshipData::Many([RecordIdentity::new("moon", "m1")].into());
        assert!(many.as_one().is_none());
        assert_eq!(many.as_many().unwrap().len(), 1);
    }

    #[test]
    fn serialization_roundtrip() {
        let record = Record::new("planet", "p1")
            .with_attribute("name", "Pluto")
            .with_relationship("moons", Relationship::has_many([]));

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"type\":\"planet\""));

        let parsed: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
    }

    #[test]
    fn has_one_serializes_untagged() {
        let unset = Relationship::has_one(None);
        let json = serde_json::to_string(&unset).unwrap();
        assert_eq!(json, "{\"data\":null}");

        let parsed: Relationship = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, unset);
    }
}
