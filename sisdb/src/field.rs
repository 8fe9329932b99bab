//! Field descriptors: one per declared field, each knowing how to coerce a
//! raw value into its canonical in-memory form and how to compare two values
//! for change detection.
//!
//! The per-type behaviour lives behind the [`FieldCodec`] trait. Every codec
//! implements `kind` and `coerce`; `equals` and the structural accessors have
//! defaults, so plain scalar codecs stay tiny.

use crate::entity::Entity;
use crate::error::{SisDbError, SisDbResult};
use crate::registry::Catalog;
use crate::schema::EntityType;
use crate::tracked::{ChangeNotifier, TrackedList, TrackedMap};
use crate::value::{format_date, FieldValue, DATE_PARSE_FORMAT};
use chrono::{NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::warn;

/// The declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Boolean,
    Number,
    String,
    Date,
    Mixed,
    #[serde(rename = "objectid")]
    ObjectId,
    List,
    Embedded,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Boolean => "boolean",
            FieldKind::Number => "number",
            FieldKind::String => "string",
            FieldKind::Date => "date",
            FieldKind::Mixed => "mixed",
            FieldKind::ObjectId => "objectid",
            FieldKind::List => "list",
            FieldKind::Embedded => "embedded",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context of a single coercion.
pub struct Coercion<'a> {
    /// Name of the field being coerced (used in errors and logs).
    pub field: &'a str,
    /// Handle that containers and embedded documents report their edits to.
    pub notifier: &'a ChangeNotifier,
    /// When set, reference ids are left unresolved instead of loaded.
    pub lazy: bool,
}

impl Coercion<'_> {
    fn mismatch(&self, expected: &'static str, value: &FieldValue) -> SisDbError {
        SisDbError::FieldConversion {
            field: self.field.to_string(),
            expected,
            value: value.to_json().to_string(),
        }
    }
}

/// Coercion and equality rule of one field type.
pub trait FieldCodec {
    /// The field type this codec implements.
    fn kind(&self) -> FieldKind;

    /// Converts `value` into the canonical form for this field.
    fn coerce(&self, value: FieldValue, cx: &Coercion<'_>) -> SisDbResult<FieldValue>;

    /// Whether assigning `b` over `a` leaves the field unchanged.
    fn equals(&self, a: &FieldValue, b: &FieldValue) -> bool {
        a == b
    }

    /// Target schema of a reference field.
    fn reference(&self) -> Option<&str> {
        None
    }

    /// Element descriptor of a list field.
    fn inner(&self) -> Option<&Rc<FieldDescriptor>> {
        None
    }

    /// Entity type of an embedded field.
    fn embedded_type(&self) -> Option<&Rc<EntityType>> {
        None
    }
}

// ── Scalar codecs ────────────────────────────────────────────────

pub(crate) struct BooleanCodec;

impl FieldCodec for BooleanCodec {
    fn kind(&self) -> FieldKind {
        FieldKind::Boolean
    }

    fn coerce(&self, value: FieldValue, cx: &Coercion<'_>) -> SisDbResult<FieldValue> {
        match value.lift() {
            FieldValue::Bool(b) => Ok(FieldValue::Bool(b)),
            FieldValue::Null => Ok(FieldValue::Bool(false)),
            FieldValue::String(s) if s == "true" || s == "True" => Ok(FieldValue::Bool(true)),
            FieldValue::String(s) if s == "false" || s == "False" => Ok(FieldValue::Bool(false)),
            other => Err(cx.mismatch("boolean", &other)),
        }
    }
}

pub(crate) struct NumberCodec;

impl FieldCodec for NumberCodec {
    fn kind(&self) -> FieldKind {
        FieldKind::Number
    }

    fn coerce(&self, value: FieldValue, cx: &Coercion<'_>) -> SisDbResult<FieldValue> {
        match value.lift() {
            FieldValue::Null => Ok(FieldValue::Null),
            FieldValue::Number(n) => Ok(FieldValue::Number(n)),
            FieldValue::String(s) => {
                let text = s.trim();
                if let Ok(n) = text.parse::<i64>() {
                    return Ok(FieldValue::Number(n.into()));
                }
                text.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(FieldValue::Number)
                    .ok_or_else(|| cx.mismatch("number", &FieldValue::String(s.clone())))
            }
            other => Err(cx.mismatch("number", &other)),
        }
    }
}

pub(crate) struct StringCodec;

impl FieldCodec for StringCodec {
    fn kind(&self) -> FieldKind {
        FieldKind::String
    }

    fn coerce(&self, value: FieldValue, _cx: &Coercion<'_>) -> SisDbResult<FieldValue> {
        Ok(match value.lift() {
            FieldValue::Null => FieldValue::Null,
            FieldValue::String(s) => FieldValue::String(s),
            FieldValue::Number(n) => FieldValue::String(n.to_string()),
            FieldValue::Bool(b) => FieldValue::String(b.to_string()),
            FieldValue::Date(d) => FieldValue::String(format_date(&d)),
            other => FieldValue::String(other.to_json().to_string()),
        })
    }
}

pub(crate) struct DateCodec;

impl FieldCodec for DateCodec {
    fn kind(&self) -> FieldKind {
        FieldKind::Date
    }

    fn coerce(&self, value: FieldValue, cx: &Coercion<'_>) -> SisDbResult<FieldValue> {
        match value.lift() {
            FieldValue::Null => Ok(FieldValue::Null),
            // Dates are stored with millisecond precision.
            FieldValue::Date(d) => Ok(FieldValue::Date(d.trunc_subsecs(3))),
            FieldValue::String(s) => match NaiveDateTime::parse_from_str(&s, DATE_PARSE_FORMAT) {
                Ok(naive) => Ok(FieldValue::Date(naive.and_utc().trunc_subsecs(3))),
                Err(err) => {
                    warn!(field = cx.field, value = %s, error = %err, "unparseable date");
                    Err(cx.mismatch("date", &FieldValue::String(s)))
                }
            },
            other => Err(cx.mismatch("date", &other)),
        }
    }
}

/// Any JSON value. Mappings are wrapped so in-place edits are observed.
pub(crate) struct MixedCodec;

impl FieldCodec for MixedCodec {
    fn kind(&self) -> FieldKind {
        FieldKind::Mixed
    }

    fn coerce(&self, value: FieldValue, cx: &Coercion<'_>) -> SisDbResult<FieldValue> {
        Ok(match value.lift() {
            FieldValue::Map(mut map) => {
                map.rebind(cx.notifier.clone());
                FieldValue::Map(map)
            }
            FieldValue::Json(Value::Object(map)) => {
                FieldValue::Map(TrackedMap::new(map, cx.notifier.clone()))
            }
            FieldValue::List(list) => FieldValue::Json(FieldValue::List(list).to_json()),
            FieldValue::Entity(entity) => match entity.to_json() {
                Value::Object(map) => FieldValue::Map(TrackedMap::new(map, cx.notifier.clone())),
                other => FieldValue::Json(other),
            },
            other => other,
        })
    }
}

// ── References ───────────────────────────────────────────────────

/// An object id, optionally referring to records of another schema.
pub(crate) struct ObjectIdCodec {
    target: Option<String>,
    catalog: Weak<Catalog>,
}

impl ObjectIdCodec {
    pub(crate) fn new(target: Option<String>, catalog: Weak<Catalog>) -> Self {
        Self { target, catalog }
    }
}

impl FieldCodec for ObjectIdCodec {
    fn kind(&self) -> FieldKind {
        FieldKind::ObjectId
    }

    fn coerce(&self, value: FieldValue, cx: &Coercion<'_>) -> SisDbResult<FieldValue> {
        let value = value.lift();
        if value.is_null() {
            return Ok(FieldValue::Null);
        }

        let Some(target_name) = self.target.as_deref() else {
            return match value {
                FieldValue::String(_)
                | FieldValue::Entity(_)
                | FieldValue::Map(_)
                | FieldValue::Json(Value::Object(_)) => Ok(value),
                other => Err(cx.mismatch("objectid", &other)),
            };
        };

        let Some(target) = self.catalog.upgrade().and_then(|c| c.lookup(target_name)) else {
            warn!(field = cx.field, target = target_name, "reference target is not a known schema");
            return Ok(value);
        };

        match value {
            FieldValue::Entity(entity) if entity.entity_type().name() == target.name() => {
                Ok(FieldValue::Entity(entity))
            }
            FieldValue::Json(Value::Object(record)) => Ok(target.from_server(record).into()),
            FieldValue::Map(map) => Ok(target.from_server(map.as_map().clone()).into()),
            FieldValue::String(id) if cx.lazy => Ok(FieldValue::String(id)),
            FieldValue::String(id) => Ok(target.load(&id)?.into()),
            other => Err(cx.mismatch("objectid", &other)),
        }
    }

    /// References compare by id, whatever form each side is held in.
    fn equals(&self, a: &FieldValue, b: &FieldValue) -> bool {
        if a == b {
            return true;
        }
        matches!((a.reference_id(), b.reference_id()), (Some(x), Some(y)) if x == y)
    }

    fn reference(&self) -> Option<&str> {
        self.target.as_deref()
    }
}

// ── Containers ───────────────────────────────────────────────────

pub(crate) struct ListCodec {
    inner: Rc<FieldDescriptor>,
}

impl ListCodec {
    pub(crate) fn new(inner: Rc<FieldDescriptor>) -> Self {
        Self { inner }
    }
}

impl FieldCodec for ListCodec {
    fn kind(&self) -> FieldKind {
        FieldKind::List
    }

    fn coerce(&self, value: FieldValue, cx: &Coercion<'_>) -> SisDbResult<FieldValue> {
        match value.lift() {
            FieldValue::List(mut list) => {
                list.rebind(cx.notifier);
                Ok(FieldValue::List(list))
            }
            FieldValue::Null => Ok(FieldValue::List(TrackedList::new(
                Vec::new(),
                Rc::clone(&self.inner),
                cx.notifier.clone(),
            ))),
            FieldValue::Json(Value::Array(items)) => {
                let items = items
                    .into_iter()
                    .map(|item| self.inner.coerce(FieldValue::Json(item), cx.notifier, true))
                    .collect::<SisDbResult<Vec<_>>>()?;
                Ok(FieldValue::List(TrackedList::new(
                    items,
                    Rc::clone(&self.inner),
                    cx.notifier.clone(),
                )))
            }
            other => Err(cx.mismatch("list", &other)),
        }
    }

    fn inner(&self) -> Option<&Rc<FieldDescriptor>> {
        Some(&self.inner)
    }
}

/// A nested anonymous schema. Values are embedded entities that report
/// their edits to the enclosing root under this field's name.
pub(crate) struct EmbeddedCodec {
    schema: Rc<EntityType>,
}

impl EmbeddedCodec {
    pub(crate) fn new(schema: Rc<EntityType>) -> Self {
        Self { schema }
    }

    fn populated(&self, data: serde_json::Map<String, Value>, cx: &Coercion<'_>) -> FieldValue {
        let mut entity = Entity::embedded(Rc::clone(&self.schema), cx.notifier.clone());
        entity.populate(data, false);
        entity.into()
    }
}

impl FieldCodec for EmbeddedCodec {
    fn kind(&self) -> FieldKind {
        FieldKind::Embedded
    }

    fn coerce(&self, value: FieldValue, cx: &Coercion<'_>) -> SisDbResult<FieldValue> {
        match value.lift() {
            FieldValue::Entity(mut entity) if Rc::ptr_eq(entity.entity_type(), &self.schema) => {
                entity.rebind(cx.notifier);
                Ok(FieldValue::Entity(entity))
            }
            // Held under a previous definition of this field.
            FieldValue::Entity(entity) if entity.is_embedded() => match entity.to_json() {
                Value::Object(data) => Ok(self.populated(data, cx)),
                other => Err(cx.mismatch("embedded document", &FieldValue::Json(other))),
            },
            FieldValue::Null => {
                Ok(Entity::embedded(Rc::clone(&self.schema), cx.notifier.clone()).into())
            }
            FieldValue::Json(Value::Object(data)) => Ok(self.populated(data, cx)),
            FieldValue::Map(map) => Ok(self.populated(map.as_map().clone(), cx)),
            other => Err(cx.mismatch("embedded document", &other)),
        }
    }

    fn embedded_type(&self) -> Option<&Rc<EntityType>> {
        Some(&self.schema)
    }
}

// ── FieldDescriptor ──────────────────────────────────────────────

/// A compiled field: its name, the raw type specification it was compiled
/// from, and the codec implementing its rules.
///
/// Two descriptors are equal when their raw specifications are equal; this
/// is what schema reconciliation uses to detect a redefined field.
pub struct FieldDescriptor {
    name: String,
    raw: Value,
    codec: Box<dyn FieldCodec>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, raw: Value, codec: Box<dyn FieldCodec>) -> Self {
        Self {
            name: name.into(),
            raw,
            codec,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type specification this descriptor was compiled from.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn kind(&self) -> FieldKind {
        self.codec.kind()
    }

    pub fn reference(&self) -> Option<&str> {
        self.codec.reference()
    }

    pub fn inner(&self) -> Option<&Rc<FieldDescriptor>> {
        self.codec.inner()
    }

    pub fn embedded_type(&self) -> Option<&Rc<EntityType>> {
        self.codec.embedded_type()
    }

    /// Coerces `value`, binding any container it produces to `notifier`.
    pub fn coerce(
        &self,
        value: FieldValue,
        notifier: &ChangeNotifier,
        lazy: bool,
    ) -> SisDbResult<FieldValue> {
        let cx = Coercion {
            field: &self.name,
            notifier,
            lazy,
        };
        self.codec.coerce(value, &cx)
    }

    pub fn equals(&self, a: &FieldValue, b: &FieldValue) -> bool {
        self.codec.equals(a, b)
    }
}

impl PartialEq for FieldDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("raw", &self.raw)
            .finish()
    }
}
