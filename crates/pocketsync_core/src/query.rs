//! Query and predicate language.
//!
//! Queries are built against the caller-facing entity shape. The local
//! entity store translates them into its own predicate form (see
//! `store::translate`) before evaluation; the canonical serialized form of
//! a predicate doubles as the query signature used to key sync checkpoints.

use crate::entity::Entity;
use crate::error::CoreResult;
use crate::geo::{haversine_distance, point_in_polygon, GeoPoint};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Comparison operator for field predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
}

/// A filtering predicate over entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Compares a field against a constant.
    Compare {
        /// Dotted field path.
        field: String,
        /// Comparison operator.
        op: Comparison,
        /// Constant to compare against.
        value: Value,
    },
    /// Matches entities whose array field contains the given element.
    Contains {
        /// Dotted field path of the array field.
        field: String,
        /// Element to look for.
        value: Value,
    },
    /// All sub-predicates must match.
    And {
        /// Sub-predicates.
        predicates: Vec<Predicate>,
    },
    /// At least one sub-predicate must match.
    Or {
        /// Sub-predicates.
        predicates: Vec<Predicate>,
    },
    /// The sub-predicate must not match.
    Not {
        /// Negated predicate.
        predicate: Box<Predicate>,
    },
    /// Matches entities whose geo field lies within a circle.
    ///
    /// Evaluated in application code with great-circle distance, never by
    /// the storage engine.
    WithinCircle {
        /// Dotted field path of the geo field.
        field: String,
        /// Circle center.
        center: GeoPoint,
        /// Radius in meters.
        radius: f64,
    },
    /// Matches entities whose geo field lies within a polygon.
    ///
    /// Evaluated in application code with even-odd containment, never by
    /// the storage engine.
    WithinPolygon {
        /// Dotted field path of the geo field.
        field: String,
        /// Polygon ring; an explicit closing point is optional.
        ring: Vec<GeoPoint>,
    },
}

impl Predicate {
    /// Equality predicate.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Eq, value)
    }

    /// Inequality predicate.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Ne, value)
    }

    /// Greater-than predicate.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Gt, value)
    }

    /// Greater-than-or-equal predicate.
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Gte, value)
    }

    /// Less-than predicate.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Lt, value)
    }

    /// Less-than-or-equal predicate.
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Lte, value)
    }

    /// Comparison predicate with an explicit operator.
    pub fn compare(field: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Array-membership predicate.
    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Conjunction of predicates.
    pub fn and(predicates: Vec<Predicate>) -> Self {
        Self::And { predicates }
    }

    /// Disjunction of predicates.
    pub fn or(predicates: Vec<Predicate>) -> Self {
        Self::Or { predicates }
    }

    /// Negation of a predicate.
    pub fn not(predicate: Predicate) -> Self {
        Self::Not {
            predicate: Box::new(predicate),
        }
    }

    /// Geo-circle containment predicate.
    pub fn within_circle(field: impl Into<String>, center: GeoPoint, radius: f64) -> Self {
        Self::WithinCircle {
            field: field.into(),
            center,
            radius,
        }
    }

    /// Geo-polygon containment predicate.
    pub fn within_polygon(field: impl Into<String>, ring: Vec<GeoPoint>) -> Self {
        Self::WithinPolygon {
            field: field.into(),
            ring,
        }
    }

    /// Returns true if this predicate tree contains a geo predicate.
    #[must_use]
    pub fn has_geo(&self) -> bool {
        match self {
            Predicate::WithinCircle { .. } | Predicate::WithinPolygon { .. } => true,
            Predicate::And { predicates } | Predicate::Or { predicates } => {
                predicates.iter().any(Predicate::has_geo)
            }
            Predicate::Not { predicate } => predicate.has_geo(),
            _ => false,
        }
    }

    /// Evaluates the predicate against a caller-facing entity.
    ///
    /// Field paths address caller-defined fields; the reserved path `_id`
    /// addresses the entity id. Geo predicates combine conjunctively with
    /// the rest of the tree.
    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Predicate::Compare { field, op, value } => {
                if field == "_id" {
                    compare_values(*op, &Value::String(entity.id.clone()), value)
                } else {
                    entity_value(entity, field)
                        .is_some_and(|actual| compare_values(*op, actual, value))
                }
            }
            Predicate::Contains { field, value } => entity_value(entity, field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.iter().any(|item| values_equal(item, value))),
            Predicate::And { predicates } => predicates.iter().all(|p| p.matches(entity)),
            Predicate::Or { predicates } => predicates.iter().any(|p| p.matches(entity)),
            Predicate::Not { predicate } => !predicate.matches(entity),
            Predicate::WithinCircle {
                field,
                center,
                radius,
            } => entity_value(entity, field).is_some_and(|value| {
                GeoPoint::from_value(value)
                    .map(|point| haversine_distance(point, *center) <= *radius)
                    .unwrap_or(false)
            }),
            Predicate::WithinPolygon { field, ring } => {
                entity_value(entity, field).is_some_and(|value| {
                    GeoPoint::from_value(value)
                        .map(|point| point_in_polygon(point, ring))
                        .unwrap_or(false)
                })
            }
        }
    }
}

/// Sort directive for query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    /// Field to sort by.
    pub field: String,
    /// Ascending when true, descending otherwise.
    pub ascending: bool,
}

/// A query over a collection: optional predicate plus result shaping.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    /// Filtering predicate; `None` selects the whole collection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate: Option<Predicate>,
    /// Sort directives, applied in order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<SortField>>,
    /// Number of leading results to skip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    /// Maximum number of results to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Query {
    /// An unfiltered query over the whole collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A query filtered by the given predicate.
    pub fn filtered(predicate: Predicate) -> Self {
        Self {
            predicate: Some(predicate),
            ..Self::default()
        }
    }

    /// Adds a sort directive.
    #[must_use]
    pub fn sort_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.sort.get_or_insert_with(Vec::new).push(SortField {
            field: field.into(),
            ascending,
        });
        self
    }

    /// Sets the number of leading results to skip.
    #[must_use]
    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Sets the maximum number of results.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Canonical signature of the filtering predicate, or `None` for an
    /// unfiltered query.
    ///
    /// Two queries with the same predicate always produce the same
    /// signature; result shaping (sort/skip/limit) does not participate.
    pub fn signature(&self) -> CoreResult<Option<String>> {
        match &self.predicate {
            Some(predicate) => Ok(Some(serde_json::to_string(predicate)?)),
            None => Ok(None),
        }
    }
}

/// Resolves a dotted field path against a caller-facing entity's fields.
pub(crate) fn entity_value<'a>(entity: &'a Entity, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = entity.fields.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Resolves a dotted field path against a JSON object.
pub(crate) fn map_value<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = map.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Equality with numeric coercion: `1` equals `1.0`.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Partial ordering between JSON values: numbers and strings are ordered,
/// everything else is not.
pub(crate) fn value_ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    }
}

/// Applies a comparison operator to two JSON values.
pub(crate) fn compare_values(op: Comparison, actual: &Value, expected: &Value) -> bool {
    match op {
        Comparison::Eq => values_equal(actual, expected),
        Comparison::Ne => !values_equal(actual, expected),
        Comparison::Gt => value_ordering(actual, expected) == Some(Ordering::Greater),
        Comparison::Gte => matches!(
            value_ordering(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Comparison::Lt => value_ordering(actual, expected) == Some(Ordering::Less),
        Comparison::Lte => matches!(
            value_ordering(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
    }
}
