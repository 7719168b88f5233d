//! Schema definitions: models, attributes, keys, relationships.
//!
//! The schema is trusted metadata consumed by the cache pipeline and the
//! query evaluator. It declares each relationship's kind, target model, and
//! optional inverse, which drives inverse-relationship maintenance.

use crate::ModelName;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Attribute value kinds. Metadata only; the engine does not coerce values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

/// Definition of an attribute on a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDef {
    /// Attribute kind
    pub kind: AttributeKind,
}

/// Relationship cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipKind {
    HasOne,
    HasMany,
}

/// Definition of a relationship on a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipDef {
    /// Cardinality of this relationship
    pub kind: RelationshipKind,
    /// Target model type
    pub model: ModelName,
    /// Name of the inverse relationship on the target model, if declared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
}

impl RelationshipDef {
    /// A has-one relationship targeting `model`.
    pub fn has_one(model: impl Into<ModelName>) -> Self {
        Self {
            kind: RelationshipKind::HasOne,
            model: model.into(),
            inverse: None,
        }
    }

    /// A has-many relationship targeting `model`.
    pub fn has_many(model: impl Into<ModelName>) -> Self {
        Self {
            kind: RelationshipKind::HasMany,
            model: model.into(),
            inverse: None,
        }
    }

    /// Declare the inverse relationship name on the target model.
    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }
}

/// Definition of a model: its attributes, keys, and relationships.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDefinition {
    /// Attribute definitions by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeDef>,
    /// Remote key names
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub keys: BTreeSet<String>,
    /// Relationship definitions by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, RelationshipDef>,
}

impl ModelDefinition {
    /// Create an empty model definition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style attribute declaration.
    pub fn with_attribute(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes.insert(name.into(), AttributeDef { kind });
        self
    }

    /// Builder-style key declaration.
    pub fn with_key(mut self, name: impl Into<String>) -> Self {
        self.keys.insert(name.into());
        self
    }

    /// Builder-style relationship declaration.
    pub fn with_relationship(
        mut self,
        name: impl Into<String>,
        relationship: RelationshipDef,
    ) -> Self {
        self.relationships.insert(name.into(), relationship);
        self
    }
}

/// Schema for the whole graph: model definitions by model type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Model definitions by model type
    pub models: BTreeMap<ModelName, ModelDefinition>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style model declaration.
    pub fn with_model(mut self, name: impl Into<ModelName>, definition: ModelDefinition) -> Self {
        self.models.insert(name.into(), definition);
        self
    }

    /// Get a model definition.
    pub fn model(&self, name: &str) -> Option<&ModelDefinition> {
        self.models.get(name)
    }

    /// Get a relationship definition on a model.
    pub fn relationship(&self, model: &str, relationship: &str) -> Option<&RelationshipDef> {
        self.models.get(model)?.relationships.get(relationship)
    }

    /// Resolve the inverse of a relationship, if declared.
    ///
    /// Returns the inverse relationship's name and definition, looked up on
    /// the target model.
    pub fn inverse_of(
        &self,
        model: &str,
        relationship: &str,
    ) -> Option<(&str, &RelationshipDef)> {
        let def = self.relationship(model, relationship)?;
        let inverse = def.inverse.as_deref()?;
        let inverse_def = self.relationship(&def.model, inverse)?;
        Some((inverse, inverse_def))
    }
}
