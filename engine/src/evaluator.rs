//! Query expression evaluator.
//!
//! A context-passing tree walker over a [`Cache`] target. Expressions are a
//! closed enum, so dispatch is an exhaustive match; operators recurse into
//! their operands lazily, which gives `and`/`or` short-circuiting for free.
//!
//! The context carries the base path of the record currently in scope.
//! `records` establishes it for collections; `filter` rebases it onto each
//! member while re-evaluating its predicate; `attribute` reads relative to
//! it.

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::query::QueryExpression;
use crate::record::{RecordIdentity, RelationshipData};

/// Evaluation context: the path of the record currently in scope.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    base_path: Vec<String>,
}

impl QueryContext {
    /// A context scoped to one record.
    pub fn for_record(identity: &RecordIdentity) -> Self {
        Self {
            base_path: vec![identity.model.clone(), identity.id.clone()],
        }
    }
}

/// Whether a value counts as true in boolean position.
fn truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        _ => true,
    }
}

/// Tree-walking interpreter over a cache.
pub struct QueryEvaluator<'a> {
    cache: &'a Cache,
}

impl<'a> QueryEvaluator<'a> {
    /// Create an evaluator targeting `cache`.
    pub fn new(cache: &'a Cache) -> Self {
        Self { cache }
    }

    /// Evaluate an expression in a context.
    pub fn evaluate(
        &self,
        expression: &QueryExpression,
        context: &QueryContext,
    ) -> Result<serde_json::Value> {
        match expression {
            QueryExpression::Constant { value } => Ok(value.clone()),

            QueryExpression::Records { model } => {
                let records: serde_json::Map<String, serde_json::Value> = self
                    .cache
                    .records(model)
                    .into_iter()
                    .map(|record| {
                        Ok((
                            record.id.clone(),
                            serde_json::to_value(record)
                                .map_err(|err| Error::Query(err.to_string()))?,
                        ))
                    })
                    .collect::<Result<_>>()?;
                Ok(serde_json::Value::Object(records))
            }

            QueryExpression::Record { record } => self
                .cache
                .record(record)
                .map(|r| serde_json::to_value(r).map_err(|err| Error::Query(err.to_string())))
                .transpose()?
                .ok_or_else(|| Error::RecordNotFound(record.clone())),

            QueryExpression::RelatedRecord {
                record,
                relationship,
            } => {
                let data = self.relationship_data(record, relationship)?;
                match data {
                    RelationshipData::One(None) => Ok(serde_json::Value::Null),
                    RelationshipData::One(Some(related)) => match self.cache.record(&related) {
                        Some(r) => {
                            serde_json::to_value(r).map_err(|err| Error::Query(err.to_string()))
                        }
                        None => Ok(serde_json::Value::Null),
                    },
                    RelationshipData::Many(_) => Err(Error::Query(format!(
                        "relatedRecord applied to has-many relationship '{relationship}'"
                    ))),
                }
            }

            QueryExpression::RelatedRecords {
                record,
                relationship,
            } => {
                let data = self.relationship_data(record, relationship)?;
                let members = match data {
                    RelationshipData::Many(members) => members,
                    RelationshipData::One(_) => {
                        return Err(Error::Query(format!(
                            "relatedRecords applied to has-one relationship '{relationship}'"
                        )))
                    }
                };
                let records: serde_json::Map<String, serde_json::Value> = members
                    .iter()
                    .filter_map(|identity| self.cache.record(identity))
                    .map(|record| {
                        Ok((
                            record.id.clone(),
                            serde_json::to_value(record)
                                .map_err(|err| Error::Query(err.to_string()))?,
                        ))
                    })
                    .collect::<Result<_>>()?;
                Ok(serde_json::Value::Object(records))
            }

            QueryExpression::Attribute { name } => {
                if context.base_path.is_empty() {
                    return Err(Error::Query(format!(
                        "attribute('{name}') evaluated outside a record context"
                    )));
                }
                let path: Vec<&str> = context
                    .base_path
                    .iter()
                    .map(String::as_str)
                    .chain(["attributes", name.as_str()])
                    .collect();
                Ok(self.cache.get(&path).unwrap_or(serde_json::Value::Null))
            }

            QueryExpression::Filter { select, predicate } => {
                let selected = self.evaluate(select, context)?;
                let members = match selected {
                    serde_json::Value::Object(members) => members,
                    other => {
                        return Err(Error::Query(format!(
                            "filter applied to non-collection value: {other}"
                        )))
                    }
                };

                let mut kept = serde_json::Map::new();
                for (key, member) in members {
                    let member_context = member_context(&member)?;
                    if truthy(&self.evaluate(predicate, &member_context)?) {
                        kept.insert(key, member);
                    }
                }
                Ok(serde_json::Value::Object(kept))
            }

            QueryExpression::And { expressions } => {
                for expression in expressions {
                    if !truthy(&self.evaluate(expression, context)?) {
                        return Ok(serde_json::Value::Bool(false));
                    }
                }
                Ok(serde_json::Value::Bool(true))
            }

            QueryExpression::Or { expressions } => {
                for expression in expressions {
                    if truthy(&self.evaluate(expression, context)?) {
                        return Ok(serde_json::Value::Bool(true));
                    }
                }
                Ok(serde_json::Value::Bool(false))
            }

            QueryExpression::Equal { expressions } => {
                let (first, rest) = match expressions.split_first() {
                    Some((first, rest)) if !rest.is_empty() => (first, rest),
                    _ => {
                        return Err(Error::Query(
                            "equal requires at least two operands".into(),
                        ))
                    }
                };
                let reference = self.evaluate(first, context)?;
                for expression in rest {
                    if self.evaluate(expression, context)? != reference {
                        return Ok(serde_json::Value::Bool(false));
                    }
                }
                Ok(serde_json::Value::Bool(true))
            }
        }
    }

    fn relationship_data(
        &self,
        record: &RecordIdentity,
        relationship: &str,
    ) -> Result<RelationshipData> {
        let rec = self
            .cache
            .record(record)
            .ok_or_else(|| Error::RecordNotFound(record.clone()))?;
        match rec.relationship_data(relationship) {
            Some(data) => Ok(data.clone()),
            // Fall back to the schema shape for declared-but-unset slots.
            None => match self.cache.schema().relationship(&record.model, relationship) {
                Some(def) => Ok(match def.kind {
                    crate::schema::RelationshipKind::HasOne => RelationshipData::One(None),
                    crate::schema::RelationshipKind::HasMany => {
                        RelationshipData::Many(Default::default())
                    }
                }),
                None => Err(Error::RelationshipNotFound {
                    record: record.clone(),
                    relationship: relationship.to_string(),
                }),
            },
        }
    }
}

// Filter members are record objects; their own type and id form the rebased
// context for predicate evaluation.
fn member_context(member: &serde_json::Value) -> Result<QueryContext> {
    let model = member
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| Error::Query("filter member is not a record".into()))?;
    let id = member
        .get("id")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| Error::Query("filter member is not a record".into()))?;
    Ok(QueryContext::for_record(&RecordIdentity::new(model, id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::RecordOperation;
    use crate::record::Record;
    use crate::schema::{AttributeKind, ModelDefinition, RelationshipDef, Schema};
    use serde_json::json;
    use std::sync::Arc;

    fn solar_schema() -> Arc<Schema> {
        Arc::new(
            Schema::new()
                .with_model(
                    "planet",
                    ModelDefinition::new()
                        .with_attribute("name", AttributeKind::String)
                        .with_relationship(
                            "moons",
                            RelationshipDef::has_many("moon").with_inverse("planet"),
                        ),
                )
                .with_model(
                    "moon",
                    ModelDefinition::new()
                        .with_attribute("name", AttributeKind::String)
                        .with_relationship(
                            "planet",
                            RelationshipDef::has_one("planet").with_inverse("moons"),
                        ),
                ),
        )
    }

    fn seeded_cache() -> Cache {
        let mut cache = Cache::new(solar_schema());
        cache.patch(&[
            RecordOperation::AddRecord {
                record: Record::new("planet", "p1").with_attribute("name", "Jupiter"),
            },
            RecordOperation::AddRecord {
                record: Record::new("planet", "p2").with_attribute("name", "Pluto"),
            },
            RecordOperation::AddRecord {
                record: Record::new("moon", "m1").with_attribute("name", "Io"),
            },
            RecordOperation::AddToHasMany {
                record: RecordIdentity::new("planet", "p1"),
                relationship: "moons".into(),
                related_record: RecordIdentity::new("moon", "m1"),
            },
        ]);
        cache
    }

    fn evaluate(cache: &Cache, expression: &QueryExpression) -> Result<serde_json::Value> {
        QueryEvaluator::new(cache).evaluate(expression, &QueryContext::default())
    }

    #[test]
    fn records_returns_all_of_a_type() {
        let cache = seeded_cache();
        let result = evaluate(&cache, &QueryExpression::records("planet")).unwrap();

        let members = result.as_object().unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.contains_key("p1"));
        assert!(members.contains_key("p2"));
    }

    #[test]
    fn record_fails_when_absent() {
        let cache = seeded_cache();
        let result = evaluate(
            &cache,
            &QueryExpression::record(RecordIdentity::new("planet", "p9")),
        );

        assert_eq!(
            result,
            Err(Error::RecordNotFound(RecordIdentity::new("planet", "p9")))
        );
    }

    #[test]
    fn filter_narrows_by_attribute() {
        let cache = seeded_cache();
        let expression = QueryExpression::records("planet")
            .filter(QueryExpression::attribute("name").equal(json!("Pluto")));

        let result = evaluate(&cache, &expression).unwrap();
        let members = result.as_object().unwrap();
        assert_eq!(members.len(), 1);
        assert!(members.contains_key("p2"));
    }

    #[test]
    fn related_record_traverses_has_one() {
        let cache = seeded_cache();
        let result = evaluate(
            &cache,
            &QueryExpression::related_record(RecordIdentity::new("moon", "m1"), "planet"),
        )
        .unwrap();

        assert_eq!(result.get("id"), Some(&json!("p1")));
    }

    #[test]
    fn related_records_traverses_has_many() {
        let cache = seeded_cache();
        let result = evaluate(
            &cache,
            &QueryExpression::related_records(RecordIdentity::new("planet", "p1"), "moons"),
        )
        .unwrap();

        let members = result.as_object().unwrap();
        assert_eq!(members.len(), 1);
        assert!(members.contains_key("m1"));
    }

    #[test]
    fn related_records_empty_when_unset() {
        let cache = seeded_cache();
        let result = evaluate(
            &cache,
            &QueryExpression::related_records(RecordIdentity::new("planet", "p2"), "moons"),
        )
        .unwrap();

        assert_eq!(result, json!({}));
    }

    #[test]
    fn relationship_not_found() {
        let cache = seeded_cache();
        let result = evaluate(
            &cache,
            &QueryExpression::related_records(RecordIdentity::new("planet", "p1"), "rings"),
        );

        assert_eq!(
            result,
            Err(Error::RelationshipNotFound {
                record: RecordIdentity::new("planet", "p1"),
                relationship: "rings".into(),
            })
        );
    }

    #[test]
    fn and_or_short_circuit() {
        let cache = seeded_cache();

        let and = QueryExpression::constant(false)
            .and(QueryExpression::record(RecordIdentity::new("planet", "p9")));
        assert_eq!(evaluate(&cache, &and).unwrap(), json!(false));

        let or = QueryExpression::constant(true)
            .or(QueryExpression::record(RecordIdentity::new("planet", "p9")));
        assert_eq!(evaluate(&cache, &or).unwrap(), json!(true));
    }

    #[test]
    fn equal_compares_pairwise_to_first() {
        let cache = seeded_cache();

        let equal = QueryExpression::constant(1).equal(json!(1)).equal(json!(1));
        assert_eq!(evaluate(&cache, &equal).unwrap(), json!(true));

        let unequal = QueryExpression::constant(1).equal(json!(2));
        assert_eq!(evaluate(&cache, &unequal).unwrap(), json!(false));
    }

    #[test]
    fn equal_requires_two_operands() {
        let cache = seeded_cache();
        let underspecified = QueryExpression::Equal {
            expressions: vec![QueryExpression::constant(1)],
        };

        assert!(matches!(
            evaluate(&cache, &underspecified),
            Err(Error::Query(_))
        ));
    }

    #[test]
    fn attribute_outside_record_context_fails() {
        let cache = seeded_cache();
        let result = evaluate(&cache, &QueryExpression::attribute("name"));
        assert!(matches!(result, Err(Error::Query(_))));
    }
}
