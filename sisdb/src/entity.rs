//! Entity instances.
//!
//! An [`Entity`] pairs an [`EntityType`] with a value store and a change
//! binding. A root entity owns its change log (the set of dirty field
//! names); an embedded entity owns nothing and forwards every change to the
//! slot of the root field it lives in.

use crate::error::{SisDbError, SisDbResult};
use crate::field::{FieldDescriptor, FieldKind};
use crate::schema::{EntityType, SERVER_MANAGED_FIELDS};
use crate::tracked::{ChangeLog, ChangeNotifier, TrackedList, TrackedMap};
use crate::value::FieldValue;
use serde_json::{Map, Value};
use sisdb_client::{ClientError, Record, Records};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use tracing::{debug, warn};

const ID_FIELD: &str = "_id";

/// Where an entity's changes are recorded.
#[derive(Debug)]
enum Binding {
    Root(Rc<ChangeLog>),
    Embedded(ChangeNotifier),
}

/// A live record of some [`EntityType`].
#[derive(Debug)]
pub struct Entity {
    entity_type: Rc<EntityType>,
    store: BTreeMap<String, FieldValue>,
    binding: Binding,
}

impl Entity {
    pub(crate) fn new(entity_type: Rc<EntityType>) -> Self {
        Self {
            entity_type,
            store: BTreeMap::new(),
            binding: Binding::Root(Rc::default()),
        }
    }

    pub(crate) fn embedded(entity_type: Rc<EntityType>, notifier: ChangeNotifier) -> Self {
        Self {
            entity_type,
            store: BTreeMap::new(),
            binding: Binding::Embedded(notifier),
        }
    }

    pub fn entity_type(&self) -> &Rc<EntityType> {
        &self.entity_type
    }

    /// The identity assigned by the data service, once persisted.
    pub fn id(&self) -> Option<&str> {
        self.store.get(ID_FIELD).and_then(FieldValue::as_str)
    }

    pub fn is_persisted(&self) -> bool {
        self.id().is_some()
    }

    pub fn is_embedded(&self) -> bool {
        self.entity_type.is_embedded()
    }

    /// Whether this entity is the record with the given id.
    pub fn matches_id(&self, id: &str) -> bool {
        self.id() == Some(id)
    }

    fn field(&self, name: &str) -> SisDbResult<Rc<FieldDescriptor>> {
        self.entity_type
            .field(name)
            .ok_or_else(|| SisDbError::UnknownField {
                schema: self.entity_type.name().to_string(),
                field: name.to_string(),
            })
    }

    fn notifier_for(&self, name: &str) -> ChangeNotifier {
        match &self.binding {
            Binding::Root(log) => ChangeNotifier::new(log, name),
            Binding::Embedded(notifier) => notifier.clone(),
        }
    }

    // ── Data ─────────────────────────────────────────────────────

    /// Replaces the whole store with `data`, marking every applied field
    /// changed. Keys the type does not declare are dropped. A known `_id`
    /// survives the reset and wins over any `_id` in `data`.
    pub fn set_data(&mut self, data: Map<String, Value>) {
        self.populate(data, true);
    }

    pub(crate) fn populate(&mut self, data: Map<String, Value>, notify: bool) {
        let current_id = self
            .store
            .remove(ID_FIELD)
            .filter(|id| !id.is_null());
        self.store.clear();
        for (name, value) in data {
            if !self.entity_type.has_field(&name) {
                continue;
            }
            if notify && name != ID_FIELD {
                self.mark_changed(&name);
            }
            self.store.insert(name, FieldValue::Json(value));
        }
        if let Some(id) = current_id {
            self.store.insert(ID_FIELD.to_string(), id);
        }
    }

    /// The coerced value of a field. Coercion happens on first read and is
    /// memoized; reading never marks the field changed. References are
    /// resolved, loading the target record when only its id is held.
    pub fn get(&mut self, name: &str) -> SisDbResult<&FieldValue> {
        let field = self.field(name)?;
        let raw = self.store.get(name).cloned().unwrap_or(FieldValue::Null);
        let coerced = field.coerce(raw, &self.notifier_for(name), false)?;
        let slot = self.store.entry(name.to_string()).or_insert(FieldValue::Null);
        *slot = coerced;
        Ok(&*slot)
    }

    /// The stored value of a field, without coercion.
    pub fn peek(&self, name: &str) -> Option<&FieldValue> {
        self.store.get(name)
    }

    /// Iterates the stored values of declared fields, without coercion.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.store
            .iter()
            .filter(|(name, _)| self.entity_type.has_field(name))
    }

    /// Assigns a field. The field is marked changed unless the coerced value
    /// equals the current one under the field's equality rule.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> SisDbResult<()> {
        let field = self.field(name)?;
        let notifier = self.notifier_for(name);
        let value = field.coerce(value.into(), &notifier, true)?;
        let unchanged = match self.store.get(name) {
            // compare against what a read would return, not the raw form
            Some(raw @ FieldValue::Json(_)) => field
                .coerce(raw.clone(), &notifier, true)
                .is_ok_and(|current| field.equals(&current, &value)),
            Some(current) => field.equals(current, &value),
            None => false,
        };
        if !unchanged {
            self.mark_changed(name);
            self.store.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// Mutable access to a mixed mapping, installing an empty one when the
    /// field holds nothing. Edits through it mark the field changed.
    pub fn map_mut(&mut self, name: &str) -> SisDbResult<&mut TrackedMap> {
        let field = self.field(name)?;
        if field.kind() != FieldKind::Mixed {
            return Err(self.not_a(name, "mapping"));
        }
        if self.get(name)?.is_null() {
            let map = TrackedMap::new(Map::new(), self.notifier_for(name));
            self.store.insert(name.to_string(), FieldValue::Map(map));
        }
        let error = self.not_a(name, "mapping");
        match self.store.get_mut(name) {
            Some(FieldValue::Map(map)) => Ok(map),
            _ => Err(error),
        }
    }

    /// Mutable access to a list field. Edits through it mark the field
    /// changed.
    pub fn list_mut(&mut self, name: &str) -> SisDbResult<&mut TrackedList> {
        self.get(name)?;
        let error = self.not_a(name, "list");
        match self.store.get_mut(name) {
            Some(FieldValue::List(list)) => Ok(list),
            _ => Err(error),
        }
    }

    /// Mutable access to an embedded document, or to the resolved target of
    /// a reference. Edits to an embedded document mark this entity's field
    /// changed; a referenced entity tracks its own changes.
    pub fn entity_mut(&mut self, name: &str) -> SisDbResult<&mut Entity> {
        self.get(name)?;
        let error = self.not_a(name, "entity");
        match self.store.get_mut(name) {
            Some(FieldValue::Entity(entity)) => Ok(entity.as_mut()),
            _ => Err(error),
        }
    }

    fn not_a(&self, name: &str, expected: &'static str) -> SisDbError {
        SisDbError::FieldConversion {
            field: name.to_string(),
            expected,
            value: self.store.get(name).map_or(Value::Null, FieldValue::to_json).to_string(),
        }
    }

    // ── Change tracking ──────────────────────────────────────────

    /// Flags a field as changed. On an embedded entity this flags the
    /// enclosing root field instead.
    ///
    /// # Panics
    ///
    /// Panics if this is an embedded entity whose root has been dropped.
    pub fn mark_changed(&self, name: &str) {
        match &self.binding {
            Binding::Root(log) => {
                log.borrow_mut().insert(name.to_string());
            }
            Binding::Embedded(notifier) => notifier.notify(),
        }
    }

    /// Names of the fields changed since the last load or save. Always
    /// empty for an embedded entity, whose changes belong to its root.
    pub fn changed_fields(&self) -> BTreeSet<String> {
        match &self.binding {
            Binding::Root(log) => log.borrow().clone(),
            Binding::Embedded(_) => BTreeSet::new(),
        }
    }

    pub fn is_changed(&self, name: &str) -> bool {
        match &self.binding {
            Binding::Root(log) => log.borrow().contains(name),
            Binding::Embedded(_) => false,
        }
    }

    pub fn has_changes(&self) -> bool {
        match &self.binding {
            Binding::Root(log) => !log.borrow().is_empty(),
            Binding::Embedded(_) => false,
        }
    }

    pub(crate) fn rebind(&mut self, notifier: &ChangeNotifier) {
        self.binding = Binding::Embedded(notifier.clone());
        for value in self.store.values_mut() {
            value.rebind(notifier);
        }
    }

    // ── Persistence ──────────────────────────────────────────────

    /// Sends the changed fields to the data service: an update when the
    /// entity has an id, a create otherwise. On success the store is
    /// replaced by the service's reply and the entity is clean again; on
    /// failure nothing changes, so a retry resends the same fields.
    pub fn save(&mut self) -> SisDbResult<()> {
        let endpoint = self.entity_type.endpoint()?;
        let Binding::Root(log) = &self.binding else {
            return Err(SisDbError::NotPersistable(self.entity_type.name().to_string()));
        };
        let log = Rc::clone(log);
        if log.borrow().is_empty() {
            return Ok(());
        }

        let payload = self.changed_payload();
        if payload.is_empty() {
            debug!(schema = self.entity_type.name(), id = ?self.id(), "nothing left to save");
            log.borrow_mut().clear();
            return Ok(());
        }
        let reply = match self.id().map(str::to_owned) {
            Some(id) => endpoint.update(&id, &payload)?,
            None => {
                let response = endpoint.create(Records::One(payload))?;
                if !response.errors.is_empty() {
                    return Err(ClientError::Rejected(Value::Array(response.errors).to_string()).into());
                }
                match response.result {
                    Records::One(record) => record,
                    Records::Many(mut records) if records.len() == 1 => records.remove(0),
                    Records::Many(records) => {
                        return Err(ClientError::Rejected(format!(
                            "create returned {} records for one entity",
                            records.len()
                        ))
                        .into());
                    }
                }
            }
        };

        self.populate(reply, false);
        log.borrow_mut().clear();
        debug!(schema = self.entity_type.name(), id = ?self.id(), "saved entity");
        Ok(())
    }

    /// Deletes the record (when persisted) and resets this entity to an
    /// empty, unpersisted state.
    pub fn delete(&mut self) -> SisDbResult<()> {
        let endpoint = self.entity_type.endpoint()?;
        if let Some(id) = self.id().map(str::to_owned) {
            endpoint.delete(&id)?;
            debug!(schema = self.entity_type.name(), %id, "deleted entity");
        }
        self.store.clear();
        if let Binding::Root(log) = &self.binding {
            log.borrow_mut().clear();
        }
        Ok(())
    }

    /// A new unpersisted entity with a copy of this one's fields, minus the
    /// identity and the server-managed metadata. Every copied field counts
    /// as changed on the copy.
    pub fn duplicate(&self) -> SisDbResult<Entity> {
        let mut copy = self.entity_type.new_entity();
        for (name, value) in &self.store {
            if SERVER_MANAGED_FIELDS.contains(&name.as_str()) || value.is_null() {
                continue;
            }
            if self.entity_type.has_field(name) {
                copy.set(name, value.clone())?;
            }
        }
        Ok(copy)
    }

    // ── Serialization ────────────────────────────────────────────

    /// The storage form of this entity.
    ///
    /// Embedded entities always produce their full mapping. A root entity
    /// produces its id when nested (`as_root == false`) and the payload of
    /// its changed fields otherwise.
    pub fn to_saved_value(&self, as_root: bool) -> Value {
        if self.is_embedded() {
            return Value::Object(
                self.iter()
                    .map(|(name, value)| (name.clone(), value.to_storage()))
                    .collect(),
            );
        }
        if !as_root {
            return self.id().map_or(Value::Null, |id| Value::String(id.to_string()));
        }
        Value::Object(self.changed_payload())
    }

    fn changed_payload(&self) -> Record {
        let mut payload = Record::new();
        for name in self.changed_fields() {
            if let Some(value) = self.store.get(&name) {
                if self.entity_type.has_field(&name) {
                    payload.insert(name, value.to_storage());
                } else {
                    warn!(schema = self.entity_type.name(), field = %name, "dropping change to a field the schema no longer declares");
                }
                continue;
            }
            // Qualified `parent__child` marks are saved through their parent.
            let parent = name.split_once("__").map(|(parent, _)| parent);
            match parent.and_then(|p| self.store.get_key_value(p)) {
                Some((parent, value)) if self.entity_type.has_field(parent) => {
                    payload.insert(parent.clone(), value.to_storage());
                }
                _ => debug!(schema = self.entity_type.name(), field = %name, "changed field holds no value"),
            }
        }
        payload
    }

    /// The full JSON form of this entity; resolved references are expanded.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }
}

impl Clone for Entity {
    /// A root entity clones into an independent root with its own change
    /// log; an embedded entity clone still reports to the same root slot.
    fn clone(&self) -> Self {
        match &self.binding {
            Binding::Root(log) => {
                let log: Rc<ChangeLog> = Rc::new(log.borrow().clone().into());
                let store = self
                    .store
                    .iter()
                    .map(|(name, value)| {
                        let mut value = value.clone();
                        value.rebind(&ChangeNotifier::new(&log, name.as_str()));
                        (name.clone(), value)
                    })
                    .collect();
                Self {
                    entity_type: Rc::clone(&self.entity_type),
                    store,
                    binding: Binding::Root(log),
                }
            }
            Binding::Embedded(notifier) => Self {
                entity_type: Rc::clone(&self.entity_type),
                store: self.store.clone(),
                binding: Binding::Embedded(notifier.clone()),
            },
        }
    }
}

impl PartialEq for Entity {
    /// Same type name and equal values for every declared field, an absent
    /// field counting as null.
    fn eq(&self, other: &Self) -> bool {
        if self.entity_type.name() != other.entity_type.name() {
            return false;
        }
        let null = FieldValue::Null;
        self.iter()
            .chain(other.iter())
            .all(|(name, _)| self.store.get(name).unwrap_or(&null) == other.store.get(name).unwrap_or(&null))
    }
}
