//! In-memory field values.
//!
//! A stored value is either still raw ([`FieldValue::Json`], exactly as the
//! data service or the caller supplied it) or already coerced by its field
//! descriptor. Reads coerce lazily and memoize the result.

use crate::entity::Entity;
use crate::tracked::{ChangeNotifier, TrackedList, TrackedMap};
use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};

/// Wire format for date fields: ISO-8601 with millisecond precision.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Pattern accepted when parsing dates (fraction optional, any precision).
pub(crate) const DATE_PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Formats a date the way the data service stores it.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// The value of one entity field.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Date(DateTime<Utc>),
    /// Not yet coerced, or a mixed value that is not a mapping.
    Json(Value),
    /// A mixed mapping whose edits are reported to the owning entity.
    Map(TrackedMap),
    /// A list whose edits are reported to the owning entity.
    List(TrackedList),
    /// An embedded document or a resolved reference.
    Entity(Box<Entity>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null | FieldValue::Json(Value::Null))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) | FieldValue::Json(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Number(n) | FieldValue::Json(Value::Number(n)) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) | FieldValue::Json(Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) | FieldValue::Json(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            FieldValue::Date(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&TrackedMap> {
        match self {
            FieldValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&TrackedList> {
        match self {
            FieldValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            FieldValue::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Turns raw JSON scalars into their typed variants. Arrays and objects
    /// stay raw.
    pub(crate) fn lift(self) -> Self {
        match self {
            FieldValue::Json(Value::Null) => FieldValue::Null,
            FieldValue::Json(Value::Bool(b)) => FieldValue::Bool(b),
            FieldValue::Json(Value::Number(n)) => FieldValue::Number(n),
            FieldValue::Json(Value::String(s)) => FieldValue::String(s),
            other => other,
        }
    }

    /// The id this value refers to: a bare id, the `_id` of a raw map, or
    /// the identity of a resolved entity.
    pub fn reference_id(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) | FieldValue::Json(Value::String(s)) => Some(s),
            FieldValue::Json(Value::Object(map)) => map.get("_id").and_then(Value::as_str),
            FieldValue::Map(map) => map.get("_id").and_then(Value::as_str),
            FieldValue::Entity(entity) => entity.id(),
            _ => None,
        }
    }

    /// Storage-safe form sent to the data service. Dates become ISO strings,
    /// references collapse to their id and embedded documents to plain maps.
    pub fn to_storage(&self) -> Value {
        match self {
            FieldValue::Entity(entity) => entity.to_saved_value(false),
            FieldValue::List(list) => Value::Array(list.iter().map(FieldValue::to_storage).collect()),
            other => other.to_json(),
        }
    }

    /// Full JSON form; resolved references are expanded rather than
    /// collapsed to their id.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Number(n) => Value::Number(n.clone()),
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Date(d) => Value::String(format_date(d)),
            FieldValue::Json(v) => v.clone(),
            FieldValue::Map(m) => Value::Object(m.as_map().clone()),
            FieldValue::List(l) => Value::Array(l.iter().map(FieldValue::to_json).collect()),
            FieldValue::Entity(e) => e.to_json(),
        }
    }

    /// Points every tracked container and embedded document inside this
    /// value at a new owner slot.
    pub(crate) fn rebind(&mut self, notifier: &ChangeNotifier) {
        match self {
            FieldValue::Map(map) => map.rebind(notifier.clone()),
            FieldValue::List(list) => list.rebind(notifier),
            FieldValue::Entity(entity) if entity.entity_type().is_embedded() => {
                entity.rebind(notifier);
            }
            _ => {}
        }
    }
}

/// Structural JSON equality where `1` and `1.0` compare equal.
pub(crate) fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| json_eq(v, w)))
        }
        _ => a == b,
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Entity(a), FieldValue::Entity(b)) => a == b,
            (FieldValue::Date(a), FieldValue::Date(b)) => a == b,
            (FieldValue::List(a), FieldValue::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
            }
            _ => json_eq(&self.to_json(), &other.to_json()),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Json(value)
    }
}

impl From<Map<String, Value>> for FieldValue {
    fn from(map: Map<String, Value>) -> Self {
        FieldValue::Json(Value::Object(map))
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        FieldValue::Number(n.into())
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Number(n.into())
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        FieldValue::Number(n.into())
    }
}

impl From<f64> for FieldValue {
    /// NaN and infinities have no JSON number form; they are kept as text so
    /// that coercion rejects them instead of storing null.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or_else(|| FieldValue::String(n.to_string()), FieldValue::Number)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(date: DateTime<Utc>) -> Self {
        FieldValue::Date(date)
    }
}

impl From<Entity> for FieldValue {
    fn from(entity: Entity) -> Self {
        FieldValue::Entity(Box::new(entity))
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}
