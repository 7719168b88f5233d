//! Queries: structural questions against the graph.
//!
//! A query expression is a closed tagged tree; construction is pure data
//! assembly. Evaluation lives in [`crate::evaluator`].

use crate::record::RecordIdentity;
use crate::{ModelName, QueryId};
use serde::{Deserialize, Serialize};

/// A tagged tree node describing a query operator and its operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum QueryExpression {
    /// All records of a model type, keyed by id.
    Records { model: ModelName },
    /// A single record by identity.
    Record { record: RecordIdentity },
    /// The target of a has-one relationship.
    RelatedRecord {
        record: RecordIdentity,
        relationship: String,
    },
    /// The members of a has-many relationship, keyed by id.
    RelatedRecords {
        record: RecordIdentity,
        relationship: String,
    },
    /// An attribute of the record in context.
    Attribute { name: String },
    /// Members of `select` for which `predicate` is truthy.
    Filter {
        select: Box<QueryExpression>,
        predicate: Box<QueryExpression>,
    },
    /// True when every operand is truthy; short-circuits.
    And { expressions: Vec<QueryExpression> },
    /// True when any operand is truthy; short-circuits.
    Or { expressions: Vec<QueryExpression> },
    /// True when every operand equals the first; requires two or more.
    Equal { expressions: Vec<QueryExpression> },
    /// A literal value.
    Constant { value: serde_json::Value },
}

impl QueryExpression {
    /// All records of a model type.
    pub fn records(model: impl Into<ModelName>) -> Self {
        QueryExpression::Records {
            model: model.into(),
        }
    }

    /// A single record by identity.
    pub fn record(record: RecordIdentity) -> Self {
        QueryExpression::Record { record }
    }

    /// The target of a has-one relationship.
    pub fn related_record(record: RecordIdentity, relationship: impl Into<String>) -> Self {
        QueryExpression::RelatedRecord {
            record,
            relationship: relationship.into(),
        }
    }

    /// The members of a has-many relationship.
    pub fn related_records(record: RecordIdentity, relationship: impl Into<String>) -> Self {
        QueryExpression::RelatedRecords {
            record,
            relationship: relationship.into(),
        }
    }

    /// An attribute of the record in context.
    pub fn attribute(name: impl Into<String>) -> Self {
        QueryExpression::Attribute { name: name.into() }
    }

    /// A literal value.
    pub fn constant(value: impl Into<serde_json::Value>) -> Self {
        QueryExpression::Constant {
            value: value.into(),
        }
    }

    /// Keep members of `self` for which `predicate` is truthy.
    pub fn filter(self, predicate: QueryExpression) -> Self {
        QueryExpression::Filter {
            select: Box::new(self),
            predicate: Box::new(predicate),
        }
    }

    /// `self == other`, chaining into an existing `Equal` when possible.
    pub fn equal(self, other: impl Into<QueryExpression>) -> Self {
        match self {
            QueryExpression::Equal { mut expressions } => {
                expressions.push(other.into());
                QueryExpression::Equal { expressions }
            }
            first => QueryExpression::Equal {
                expressions: vec![first, other.into()],
            },
        }
    }

    /// `self && other`, chaining into an existing `And` when possible.
    pub fn and(self, other: impl Into<QueryExpression>) -> Self {
        match self {
            QueryExpression::And { mut expressions } => {
                expressions.push(other.into());
                QueryExpression::And { expressions }
            }
            first => QueryExpression::And {
                expressions: vec![first, other.into()],
            },
        }
    }

    /// `self || other`, chaining into an existing `Or` when possible.
    pub fn or(self, other: impl Into<QueryExpression>) -> Self {
        match self {
            QueryExpression::Or { mut expressions } => {
                expressions.push(other.into());
                QueryExpression::Or { expressions }
            }
            first => QueryExpression::Or {
                expressions: vec![first, other.into()],
            },
        }
    }
}

impl From<serde_json::Value> for QueryExpression {
    fn from(value: serde_json::Value) -> Self {
        QueryExpression::Constant { value }
    }
}

/// An identified query: an expression plus free-form options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Process-unique identifier
    pub id: QueryId,
    /// The expression to evaluate
    pub expression: QueryExpression,
    /// Free-form options passed through to stores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

impl Query {
    /// Create a query with a fresh uuid id.
    pub fn new(expression: QueryExpression) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            expression,
            options: None,
        }
    }

    /// Create a query with a caller-supplied id.
    pub fn with_id(id: impl Into<QueryId>, expression: QueryExpression) -> Self {
        Self {
            id: id.into(),
            expression,
            options: None,
        }
    }
}

impl From<QueryExpression> for Query {
    fn from(expression: QueryExpression) -> Self {
        Query::new(expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_chains() {
        let expression = QueryExpression::records("planet")
            .filter(QueryExpression::attribute("name").equal(json!("Pluto")));

        assert_eq!(
            expression,
            QueryExpression::Filter {
                select: Box::new(QueryExpression::Records {
                    model: "planet".into()
                }),
                predicate: Box::new(QueryExpression::Equal {
                    expressions: vec![
                        QueryExpression::Attribute {
                            name: "name".into()
                        },
                        QueryExpression::Constant {
                            value: json!("Pluto")
                        },
                    ]
                }),
            }
        );
    }

    #[test]
    fn equal_chains_flat() {
        let expression = QueryExpression::attribute("name")
            .equal(json!("a"))
            .equal(json!("b"));

        assert!(matches!(
            expression,
            QueryExpression::Equal { expressions } if expressions.len() == 3
        ));
    }

    #[test]
    fn queries_get_unique_ids() {
        let a = Query::new(QueryExpression::records("planet"));
        let b = Query::new(QueryExpression::records("planet"));
        assert_ne!(a.id, b.id);
        assert_eq!(a.expression, b.expression);
    }

    #[test]
    fn serialization_tags() {
        let query = Query::with_id(
            "q-1",
            QueryExpression::records("planet")
                .filter(QueryExpression::attribute("name").equal(json!("Pluto"))),
        );

        let json = serde_json::to_string(&query).unwrap();
        assert!(json.contains("\"op\":\"filter\""));
        assert!(json.contains("\"op\":\"equal\""));

        let parsed: Query = serde_json::from_str(&json).unwrap();
        assert_eq!(query, parsed);
    }
}
