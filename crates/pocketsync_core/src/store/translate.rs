//! Predicate translation between the caller-facing query language and the
//! store's native predicate form.
//!
//! The store persists primitive array elements as wrapped `{"value": v}`
//! objects (see `memory`), so a caller-facing `Contains` predicate must be
//! rewritten into an element-`.value` subquery over the stored shape. Geo
//! predicates are stripped out entirely and handed back as in-memory
//! post-filters; they are never evaluated by the store.

use crate::geo::{haversine_distance, point_in_polygon, GeoPoint};
use crate::query::{compare_values, map_value, values_equal, Comparison, Predicate};
use serde_json::{Map, Value};

/// A predicate in the store's native form, evaluated against the stored
/// (normalized) entity document.
#[derive(Debug, Clone, PartialEq)]
pub enum StorePredicate {
    /// Compares a stored field against a constant.
    Compare {
        /// Dotted path into the stored document.
        path: String,
        /// Comparison operator.
        op: Comparison,
        /// Constant to compare against.
        value: Value,
    },
    /// Matches documents where any element of the wrapped array at `path`
    /// has `element.value` equal to the constant.
    ElementValue {
        /// Dotted path of the wrapped array.
        path: String,
        /// Element value to look for.
        value: Value,
    },
    /// All sub-predicates must match.
    And(Vec<StorePredicate>),
    /// At least one sub-predicate must match.
    Or(Vec<StorePredicate>),
    /// The sub-predicate must not match.
    Not(Box<StorePredicate>),
    /// Matches every document. Stands in for predicates the store cannot
    /// evaluate (geo containment).
    True,
}

impl StorePredicate {
    /// Evaluates the predicate against a stored document.
    #[must_use]
    pub fn matches(&self, document: &Map<String, Value>) -> bool {
        match self {
            StorePredicate::Compare { path, op, value } => {
                map_value(document, path).is_some_and(|actual| compare_values(*op, actual, value))
            }
            StorePredicate::ElementValue { path, value } => map_value(document, path)
                .and_then(Value::as_array)
                .is_some_and(|items| {
                    items.iter().any(|item| {
                        item.as_object()
                            .and_then(|obj| obj.get("value"))
                            .is_some_and(|element| values_equal(element, value))
                    })
                }),
            StorePredicate::And(predicates) => predicates.iter().all(|p| p.matches(document)),
            StorePredicate::Or(predicates) => predicates.iter().any(|p| p.matches(document)),
            StorePredicate::Not(predicate) => !predicate.matches(document),
            StorePredicate::True => true,
        }
    }
}

/// A geo containment filter applied in memory after the store resolves the
/// rest of the predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoFilter {
    /// Great-circle distance from `center` must not exceed `radius`.
    Circle {
        /// Dotted path of the geo field.
        field: String,
        /// Circle center.
        center: GeoPoint,
        /// Radius in meters.
        radius: f64,
    },
    /// The point must lie within the polygon ring.
    Polygon {
        /// Dotted path of the geo field.
        field: String,
        /// Polygon ring.
        ring: Vec<GeoPoint>,
    },
}

impl GeoFilter {
    /// Evaluates the filter against a stored document.
    ///
    /// A geo field is itself a two-element primitive array, so its stored
    /// form is wrapped; the value is denormalized before parsing.
    #[must_use]
    pub fn matches(&self, document: &Map<String, Value>) -> bool {
        let point = |field: &str| {
            map_value(document, field)
                .map(denormalize_value)
                .and_then(|value| GeoPoint::from_value(&value).ok())
        };
        match self {
            GeoFilter::Circle {
                field,
                center,
                radius,
            } => point(field)
                .is_some_and(|point| haversine_distance(point, *center) <= *radius),
            GeoFilter::Polygon { field, ring } => {
                point(field).is_some_and(|point| point_in_polygon(point, ring))
            }
        }
    }
}

/// A caller-facing predicate translated into the store's terms.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedQuery {
    /// Predicate for the store to evaluate natively.
    pub predicate: StorePredicate,
    /// Geo filters to apply in memory afterwards. These combine
    /// conjunctively with the store predicate regardless of where the geo
    /// predicate sat in the original tree.
    pub geo: Vec<GeoFilter>,
}

impl TranslatedQuery {
    /// Evaluates the full translated query against a stored document.
    #[must_use]
    pub fn matches(&self, document: &Map<String, Value>) -> bool {
        self.predicate.matches(document) && self.geo.iter().all(|g| g.matches(document))
    }
}

/// Translates a caller-facing predicate into the store's form.
#[must_use]
pub fn translate(predicate: &Predicate) -> TranslatedQuery {
    let mut geo = Vec::new();
    let predicate = translate_node(predicate, &mut geo);
    TranslatedQuery { predicate, geo }
}

fn translate_node(predicate: &Predicate, geo: &mut Vec<GeoFilter>) -> StorePredicate {
    match predicate {
        Predicate::Compare { field, op, value } => StorePredicate::Compare {
            path: field.clone(),
            op: *op,
            value: value.clone(),
        },
        Predicate::Contains { field, value } => StorePredicate::ElementValue {
            path: field.clone(),
            value: value.clone(),
        },
        Predicate::And { predicates } => {
            StorePredicate::And(predicates.iter().map(|p| translate_node(p, geo)).collect())
        }
        Predicate::Or { predicates } => {
            StorePredicate::Or(predicates.iter().map(|p| translate_node(p, geo)).collect())
        }
        Predicate::Not { predicate } => {
            StorePredicate::Not(Box::new(translate_node(predicate, geo)))
        }
        Predicate::WithinCircle {
            field,
            center,
            radius,
        } => {
            geo.push(GeoFilter::Circle {
                field: field.clone(),
                center: *center,
                radius: *radius,
            });
            StorePredicate::True
        }
        Predicate::WithinPolygon { field, ring } => {
            geo.push(GeoFilter::Polygon {
                field: field.clone(),
                ring: ring.clone(),
            });
            StorePredicate::True
        }
    }
}

/// Normalizes caller-facing fields into the stored shape: elements of
/// primitive arrays are wrapped as `{"value": v}` objects.
#[must_use]
pub fn normalize_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), normalize_value(value)))
        .collect()
}

/// Reverses `normalize_fields`: wrapped arrays are unwrapped back into
/// plain primitive arrays.
#[must_use]
pub fn denormalize_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), denormalize_value(value)))
        .collect()
}

pub(crate) fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Array(items) if items.iter().all(is_primitive) && !items.is_empty() => {
            Value::Array(
                items
                    .iter()
                    .map(|item| {
                        let mut wrapped = Map::with_capacity(1);
                        wrapped.insert("value".to_string(), item.clone());
                        Value::Object(wrapped)
                    })
                    .collect(),
            )
        }
        _ => value.clone(),
    }
}

pub(crate) fn denormalize_value(value: &Value) -> Value {
    match value {
        Value::Array(items) if !items.is_empty() && items.iter().all(is_wrapped) => Value::Array(
            items
                .iter()
                .filter_map(|item| item.as_object().and_then(|obj| obj.get("value")).cloned())
                .collect(),
        ),
        _ => value.clone(),
    }
}

fn is_primitive(value: &Value) -> bool {
    matches!(
        value,
        Value::String(_) | Value::Number(_) | Value::Bool(_)
    )
}

fn is_wrapped(value: &Value) -> bool {
    value
        .as_object()
        .map(|obj| obj.len() == 1 && obj.contains_key("value"))
        .unwrap_or(false)
}
