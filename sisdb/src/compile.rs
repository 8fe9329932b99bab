//! Schema definition compiler: type specifications to field descriptors.
//!
//! Accepted specifications, tried in order:
//! 1. a type tag (`"String"`, `"number"`, ...), case-insensitive
//! 2. `{}`, a mixed field
//! 3. a mapping without `type`, an embedded schema
//! 4. `{type: <tag>, ...}`, a scalar with modifiers (`ref`, `enum`, `min`, ...)
//! 5. `{type: [<spec>]}`, a list
//! 6. `{type: {...}}`, an embedded schema; when the inner mapping itself has
//!    a string `type`, the outer mapping is the schema and declares a field
//!    literally called `type`
//! 7. `[<spec>]`, a list
//!
//! Lists with no element spec hold mixed values.

use crate::error::{SisDbError, SisDbResult};
use crate::field::{
    BooleanCodec, DateCodec, EmbeddedCodec, FieldCodec, FieldDescriptor, ListCodec, MixedCodec,
    NumberCodec, ObjectIdCodec, StringCodec,
};
use crate::registry::Catalog;
use crate::schema::EntityType;
use serde_json::{Map, Value};
use sisdb_client::SisClient;
use std::rc::{Rc, Weak};

/// Compiles the fields of one schema.
pub(crate) struct Compiler<'a> {
    schema: &'a str,
    catalog: &'a Weak<Catalog>,
    client: &'a Rc<dyn SisClient>,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(
        schema: &'a str,
        catalog: &'a Weak<Catalog>,
        client: &'a Rc<dyn SisClient>,
    ) -> Self {
        Self {
            schema,
            catalog,
            client,
        }
    }

    /// Compiles the specification of the field `name`.
    pub(crate) fn compile(&self, name: &str, spec: &Value) -> SisDbResult<FieldDescriptor> {
        match spec {
            Value::String(tag) => self.tagged(name, tag, spec.clone(), None),
            Value::Array(items) => self.list(name, items.first(), spec.clone()),
            Value::Object(map) => self.mapping(name, map, spec),
            other => Err(SisDbError::schema(
                name,
                format!("unsupported type specification `{other}`"),
            )),
        }
    }

    fn mapping(&self, name: &str, map: &Map<String, Value>, spec: &Value) -> SisDbResult<FieldDescriptor> {
        if map.is_empty() {
            return Ok(FieldDescriptor::new(name, spec.clone(), Box::new(MixedCodec)));
        }
        match map.get("type") {
            None => self.embedded(name, map, spec.clone()),
            Some(Value::String(tag)) => {
                let reference = match map.get("ref") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(target)) => Some(target.clone()),
                    Some(other) => {
                        return Err(SisDbError::schema(
                            name,
                            format!("`ref` must name a schema, got `{other}`"),
                        ));
                    }
                };
                self.tagged(name, tag, spec.clone(), reference)
            }
            Some(Value::Array(items)) => self.list(name, items.first(), spec.clone()),
            Some(Value::Object(inner)) => {
                if matches!(inner.get("type"), Some(Value::String(_))) {
                    self.embedded(name, map, spec.clone())
                } else {
                    self.embedded(name, inner, spec.clone())
                }
            }
            Some(other) => Err(SisDbError::schema(
                name,
                format!("unsupported `type` value `{other}`"),
            )),
        }
    }

    fn tagged(
        &self,
        name: &str,
        tag: &str,
        raw: Value,
        reference: Option<String>,
    ) -> SisDbResult<FieldDescriptor> {
        let codec: Box<dyn FieldCodec> = match tag.to_ascii_lowercase().as_str() {
            "number" => Box::new(NumberCodec),
            "boolean" => Box::new(BooleanCodec),
            "string" => Box::new(StringCodec),
            "date" => Box::new(DateCodec),
            "mixed" | "ipaddress" => Box::new(MixedCodec),
            "objectid" => Box::new(ObjectIdCodec::new(reference, Weak::clone(self.catalog))),
            _ => {
                return Err(SisDbError::schema(name, format!("unknown type `{tag}`")));
            }
        };
        Ok(FieldDescriptor::new(name, raw, codec))
    }

    fn list(&self, name: &str, element: Option<&Value>, raw: Value) -> SisDbResult<FieldDescriptor> {
        let inner = match element {
            Some(spec) => self.compile(name, spec)?,
            None => FieldDescriptor::new(name, Value::String("mixed".into()), Box::new(MixedCodec)),
        };
        Ok(FieldDescriptor::new(name, raw, Box::new(ListCodec::new(Rc::new(inner)))))
    }

    fn embedded(&self, name: &str, definition: &Map<String, Value>, raw: Value) -> SisDbResult<FieldDescriptor> {
        let type_name = format!("{}__{}", self.schema, name);
        let schema = EntityType::embedded(type_name, definition, self.catalog, self.client)?;
        Ok(FieldDescriptor::new(name, raw, Box::new(EmbeddedCodec::new(schema))))
    }
}
