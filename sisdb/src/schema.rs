//! Entity types: compiled schemas.
//!
//! An [`EntityType`] is the runtime stand-in for one schema: its descriptor,
//! its field table and its way to the data service. Types are shared as
//! `Rc<EntityType>` and redefined in place, so entities and queries created
//! before a schema change keep working against the new definition.

use crate::compile::Compiler;
use crate::config::DEFAULT_PAGE_WINDOW;
use crate::entity::Entity;
use crate::error::{SisDbError, SisDbResult};
use crate::field::FieldDescriptor;
use crate::query::Query;
use crate::registry::Catalog;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use sisdb_client::{DataEndpoint, Record, SchemaDescriptor, SisClient};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::debug;

/// Metadata fields implicitly declared by every root schema.
pub const INTERNAL_FIELD_NAMES: [&str; 7] = [
    "_id",
    "_created_at",
    "_updated_at",
    "_created_by",
    "_updated_by",
    "_owner",
    "_tags",
];

/// Metadata fields written by the data service; never copied by
/// [`Entity::duplicate`].
pub const SERVER_MANAGED_FIELDS: [&str; 5] = [
    "_id",
    "_created_at",
    "_updated_at",
    "_created_by",
    "_updated_by",
];

fn internal_definition() -> Map<String, Value> {
    let string_list = || Value::Array(vec![Value::String("string".into())]);
    [
        ("_id", Value::String("objectid".into())),
        ("_created_at", Value::String("number".into())),
        ("_updated_at", Value::String("number".into())),
        ("_created_by", Value::String("string".into())),
        ("_updated_by", Value::String("string".into())),
        ("_owner", string_list()),
        ("_tags", string_list()),
    ]
    .into_iter()
    .map(|(name, spec)| (name.to_string(), spec))
    .collect()
}

/// Whether entities of a type are persisted on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    /// A named schema of the data service, with its own endpoint.
    Root,
    /// An anonymous schema nested inside a field of another schema.
    Embedded,
}

/// Field names affected by a redefinition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefinitionDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl DefinitionDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// A compiled schema.
pub struct EntityType {
    name: String,
    kind: SchemaKind,
    descriptor: RefCell<SchemaDescriptor>,
    fields: RefCell<IndexMap<String, Rc<FieldDescriptor>>>,
    catalog: Weak<Catalog>,
    client: Rc<dyn SisClient>,
}

impl EntityType {
    /// Compiles a named schema of the data service.
    pub(crate) fn root(
        descriptor: SchemaDescriptor,
        catalog: Weak<Catalog>,
        client: Rc<dyn SisClient>,
    ) -> SisDbResult<Rc<Self>> {
        let mut fields = {
            let compiler = Compiler::new(&descriptor.name, &catalog, &client);
            compile_all(&compiler, &descriptor.definition)?
        };
        let internal = {
            let compiler = Compiler::new(&descriptor.name, &catalog, &client);
            compile_all(&compiler, &internal_definition())?
        };
        fields.extend(internal);
        debug!(schema = %descriptor.name, fields = fields.len(), "compiled schema");

        Ok(Rc::new(Self {
            name: descriptor.name.clone(),
            kind: SchemaKind::Root,
            descriptor: RefCell::new(descriptor),
            fields: RefCell::new(fields),
            catalog,
            client,
        }))
    }

    /// Compiles an anonymous schema nested in a field.
    pub(crate) fn embedded(
        name: String,
        definition: &Map<String, Value>,
        catalog: &Weak<Catalog>,
        client: &Rc<dyn SisClient>,
    ) -> SisDbResult<Rc<Self>> {
        let fields = compile_all(&Compiler::new(&name, catalog, client), definition)?;
        Ok(Rc::new(Self {
            descriptor: RefCell::new(SchemaDescriptor::new(name.clone(), definition.clone())),
            name,
            kind: SchemaKind::Embedded,
            fields: RefCell::new(fields),
            catalog: Weak::clone(catalog),
            client: Rc::clone(client),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SchemaKind {
        self.kind
    }

    pub fn is_embedded(&self) -> bool {
        self.kind == SchemaKind::Embedded
    }

    /// The schema descriptor this type was last compiled from.
    pub fn descriptor(&self) -> SchemaDescriptor {
        self.descriptor.borrow().clone()
    }

    pub fn field(&self, name: &str) -> Option<Rc<FieldDescriptor>> {
        self.fields.borrow().get(name).cloned()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.borrow().contains_key(name)
    }

    /// Declared field names in declaration order, implicit metadata fields
    /// last.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.borrow().keys().cloned().collect()
    }

    /// A new, empty, unpersisted entity.
    pub fn new_entity(self: &Rc<Self>) -> Entity {
        Entity::new(Rc::clone(self))
    }

    /// Wraps a record returned by the data service. The entity starts clean.
    pub fn from_server(self: &Rc<Self>, record: Record) -> Entity {
        let mut entity = Entity::new(Rc::clone(self));
        entity.populate(record, false);
        entity
    }

    /// Fetches the record with the given id.
    pub fn load(self: &Rc<Self>, id: &str) -> SisDbResult<Entity> {
        let record = self.endpoint()?.get(id)?;
        debug!(schema = %self.name, id, "loaded entity");
        Ok(self.from_server(record))
    }

    /// A new query over the records of this type.
    pub fn objects(self: &Rc<Self>) -> SisDbResult<Query> {
        let window = self
            .catalog
            .upgrade()
            .map_or(DEFAULT_PAGE_WINDOW, |catalog| catalog.config().page_window);
        Ok(Query::new(Rc::clone(self), self.endpoint()?, window))
    }

    /// Moves the field table from `old` to `new`: removed fields lose their
    /// descriptor, added fields get one, and fields whose specification
    /// changed are recompiled. Implicit metadata fields are never touched.
    ///
    /// Nothing is applied unless every new specification compiles.
    pub fn update_definition(
        &self,
        old: &Map<String, Value>,
        new: &Map<String, Value>,
    ) -> SisDbResult<DefinitionDiff> {
        let internal = |name: &str| self.kind == SchemaKind::Root && INTERNAL_FIELD_NAMES.contains(&name);
        let old_keys: BTreeSet<&String> = old.keys().filter(|k| !internal(k.as_str())).collect();
        let new_keys: BTreeSet<&String> = new.keys().filter(|k| !internal(k.as_str())).collect();

        let mut diff = DefinitionDiff::default();
        let mut compiled = Vec::new();
        {
            let compiler = Compiler::new(&self.name, &self.catalog, &self.client);
            for name in new.keys().filter(|k| !internal(k.as_str())) {
                let spec = &new[name.as_str()];
                match old.get(name.as_str()) {
                    None => diff.added.push(name.clone()),
                    Some(previous) if previous != spec => diff.changed.push(name.clone()),
                    Some(_) => continue,
                }
                compiled.push((name.clone(), Rc::new(compiler.compile(name, spec)?)));
            }
        }
        diff.removed = old_keys.difference(&new_keys).map(|k| (*k).clone()).collect();

        let mut fields = self.fields.borrow_mut();
        for name in &diff.removed {
            fields.shift_remove(name);
        }
        fields.extend(compiled);
        let declared: Vec<&String> = new.keys().filter(|k| !internal(k.as_str())).collect();
        let position = |name: &String| {
            declared
                .iter()
                .position(|k| *k == name)
                .unwrap_or(usize::MAX)
        };
        fields.sort_by(|a, _, b, _| position(a).cmp(&position(b)));
        Ok(diff)
    }

    /// Brings this type in line with `descriptor`, as returned by the
    /// schema service.
    pub(crate) fn reconcile(&self, descriptor: SchemaDescriptor) -> SisDbResult<DefinitionDiff> {
        let old = self.descriptor.borrow().definition.clone();
        let diff = if old == descriptor.definition {
            DefinitionDiff::default()
        } else {
            self.update_definition(&old, &descriptor.definition)?
        };
        *self.descriptor.borrow_mut() = descriptor;
        Ok(diff)
    }

    pub(crate) fn endpoint(&self) -> SisDbResult<Box<dyn DataEndpoint>> {
        match self.kind {
            SchemaKind::Root => Ok(self.client.entities(&self.name)),
            SchemaKind::Embedded => Err(SisDbError::NotPersistable(self.name.clone())),
        }
    }
}

fn compile_all(
    compiler: &Compiler<'_>,
    definition: &Map<String, Value>,
) -> SisDbResult<IndexMap<String, Rc<FieldDescriptor>>> {
    definition
        .iter()
        .map(|(name, spec)| -> SisDbResult<_> {
            Ok((name.clone(), Rc::new(compiler.compile(name, spec)?)))
        })
        .collect()
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("fields", &self.field_names())
            .finish()
    }
}
