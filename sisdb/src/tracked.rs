//! Dirty-tracking containers.
//!
//! [`TrackedMap`] and [`TrackedList`] behave like an ordinary map and list,
//! but every mutation first reports "field changed" to the entity that owns
//! them. The link back to the owner is a [`ChangeNotifier`]: a weak handle
//! on the root entity's change log plus the name of the top-level field
//! the container lives in. Containers never keep their owner alive.

use crate::entity::Entity;
use crate::error::SisDbResult;
use crate::field::FieldDescriptor;
use crate::value::FieldValue;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};

/// The set of changed field names owned by a root entity.
pub(crate) type ChangeLog = RefCell<BTreeSet<String>>;

/// Non-owning handle used to report a change on one field of a root entity.
#[derive(Clone)]
pub struct ChangeNotifier {
    log: Weak<ChangeLog>,
    slot: String,
}

impl ChangeNotifier {
    pub(crate) fn new(log: &Rc<ChangeLog>, slot: impl Into<String>) -> Self {
        Self {
            log: Rc::downgrade(log),
            slot: slot.into(),
        }
    }

    /// The top-level field this handle reports on.
    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Whether the owning root entity is still alive.
    pub fn is_attached(&self) -> bool {
        self.log.strong_count() > 0
    }

    /// Records a change on the slot.
    ///
    /// # Panics
    ///
    /// Panics if the owning root entity has been dropped.
    pub fn notify(&self) {
        match self.log.upgrade() {
            Some(log) => {
                log.borrow_mut().insert(self.slot.clone());
            }
            None => panic!(
                "change to `{}` reported after its owning entity was dropped",
                self.slot
            ),
        }
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("slot", &self.slot)
            .field("attached", &self.is_attached())
            .finish()
    }
}

// ── TrackedMap ───────────────────────────────────────────────────

/// A JSON mapping (the value of a mixed field) that reports edits.
#[derive(Debug, Clone)]
pub struct TrackedMap {
    entries: Map<String, Value>,
    notifier: ChangeNotifier,
}

impl TrackedMap {
    pub(crate) fn new(entries: Map<String, Value>, notifier: ChangeNotifier) -> Self {
        Self { entries, notifier }
    }

    pub(crate) fn rebind(&mut self, notifier: ChangeNotifier) {
        self.notifier = notifier;
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Read-only view of the underlying mapping.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.entries
    }

    /// Sets `key`, returning the previous value.
    ///
    /// # Panics
    ///
    /// Panics if the owning entity has been dropped.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.notifier.notify();
        self.entries.insert(key.into(), value)
    }

    /// Removes `key`, returning its value. A missing key is not an edit.
    ///
    /// # Panics
    ///
    /// Panics if the owning entity has been dropped.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.notifier.notify();
        self.entries.shift_remove(key)
    }

    /// Mutable access to one entry. Counts as an edit whenever the key exists.
    ///
    /// # Panics
    ///
    /// Panics if the owning entity has been dropped.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        if self.entries.contains_key(key) {
            self.notifier.notify();
        }
        self.entries.get_mut(key)
    }

    /// Removes every entry.
    ///
    /// # Panics
    ///
    /// Panics if the owning entity has been dropped.
    pub fn clear(&mut self) {
        self.notifier.notify();
        self.entries.clear();
    }

    /// Inserts every pair of `other` (dict-style update).
    ///
    /// # Panics
    ///
    /// Panics if the owning entity has been dropped.
    pub fn extend(&mut self, other: impl IntoIterator<Item = (String, Value)>) {
        self.notifier.notify();
        self.entries.extend(other);
    }

    /// Keeps only the entries for which `keep` returns true.
    ///
    /// # Panics
    ///
    /// Panics if the owning entity has been dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&String, &mut Value) -> bool) {
        self.notifier.notify();
        self.entries.retain(|k, v| keep(k, v));
    }
}

impl PartialEq for TrackedMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

// ── TrackedList ──────────────────────────────────────────────────

/// A list field. Elements are coerced through the inner field descriptor
/// when read; the coerced form replaces the stored element.
#[derive(Debug, Clone)]
pub struct TrackedList {
    items: Vec<FieldValue>,
    inner: Rc<FieldDescriptor>,
    notifier: ChangeNotifier,
}

impl TrackedList {
    pub(crate) fn new(items: Vec<FieldValue>, inner: Rc<FieldDescriptor>, notifier: ChangeNotifier) -> Self {
        Self {
            items,
            inner,
            notifier,
        }
    }

    pub(crate) fn rebind(&mut self, notifier: &ChangeNotifier) {
        self.notifier = notifier.clone();
        for item in &mut self.items {
            item.rebind(notifier);
        }
    }

    /// Descriptor applied to every element.
    pub fn inner(&self) -> &Rc<FieldDescriptor> {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates the stored elements without coercing them.
    pub fn iter(&self) -> std::slice::Iter<'_, FieldValue> {
        self.items.iter()
    }

    /// Stored element at `index`, without coercion.
    pub fn peek(&self, index: usize) -> Option<&FieldValue> {
        self.items.get(index)
    }

    /// Element at `index`, coerced by the inner descriptor (references are
    /// resolved). The coerced form is written back; this never marks the
    /// owner changed.
    pub fn get(&mut self, index: usize) -> SisDbResult<Option<&FieldValue>> {
        self.coerce_at(index)?;
        Ok(self.items.get(index))
    }

    /// Mutable access to an embedded document (or resolved reference) at
    /// `index`. Edits made through it report to the owner on their own.
    pub fn entity_mut(&mut self, index: usize) -> SisDbResult<Option<&mut Entity>> {
        self.coerce_at(index)?;
        Ok(match self.items.get_mut(index) {
            Some(FieldValue::Entity(entity)) => Some(entity.as_mut()),
            _ => None,
        })
    }

    /// Mutable access to a mixed mapping at `index`.
    pub fn map_mut(&mut self, index: usize) -> SisDbResult<Option<&mut TrackedMap>> {
        self.coerce_at(index)?;
        Ok(match self.items.get_mut(index) {
            Some(FieldValue::Map(map)) => Some(map),
            _ => None,
        })
    }

    fn coerce_at(&mut self, index: usize) -> SisDbResult<()> {
        if let Some(raw) = self.items.get(index) {
            let coerced = self.inner.coerce(raw.clone(), &self.notifier, false)?;
            self.items[index] = coerced;
        }
        Ok(())
    }

    /// Membership test that also honors the inner descriptor's equality, so
    /// a reference is found by id whatever form it is stored in.
    pub fn contains(&self, value: &FieldValue) -> bool {
        self.items
            .iter()
            .any(|item| item == value || self.inner.equals(item, value))
    }

    /// Appends an element.
    ///
    /// # Panics
    ///
    /// Panics if the owning entity has been dropped.
    pub fn push(&mut self, value: impl Into<FieldValue>) -> SisDbResult<()> {
        let value = self.inner.coerce(value.into(), &self.notifier, true)?;
        self.notifier.notify();
        self.items.push(value);
        Ok(())
    }

    /// Inserts an element at `index`, shifting later elements.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`, or if the owning entity has been dropped.
    pub fn insert(&mut self, index: usize, value: impl Into<FieldValue>) -> SisDbResult<()> {
        let value = self.inner.coerce(value.into(), &self.notifier, true)?;
        self.notifier.notify();
        self.items.insert(index, value);
        Ok(())
    }

    /// Replaces the element at `index`, returning the previous one.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds, or if the owning entity has been
    /// dropped.
    pub fn set(&mut self, index: usize, value: impl Into<FieldValue>) -> SisDbResult<FieldValue> {
        let value = self.inner.coerce(value.into(), &self.notifier, true)?;
        self.notifier.notify();
        Ok(std::mem::replace(&mut self.items[index], value))
    }

    /// Appends every element of `values`.
    ///
    /// # Panics
    ///
    /// Panics if the owning entity has been dropped.
    pub fn extend<I, V>(&mut self, values: I) -> SisDbResult<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<FieldValue>,
    {
        let values = values
            .into_iter()
            .map(|v| self.inner.coerce(v.into(), &self.notifier, true))
            .collect::<SisDbResult<Vec<_>>>()?;
        self.notifier.notify();
        self.items.extend(values);
        Ok(())
    }

    /// Removes and returns the element at `index`, if any. An index out of
    /// range is not an edit.
    ///
    /// # Panics
    ///
    /// Panics if the owning entity has been dropped.
    pub fn remove(&mut self, index: usize) -> Option<FieldValue> {
        if index >= self.items.len() {
            return None;
        }
        self.notifier.notify();
        Some(self.items.remove(index))
    }

    /// Removes and returns the last element. Popping an empty list is not
    /// an edit.
    ///
    /// # Panics
    ///
    /// Panics if the owning entity has been dropped.
    pub fn pop(&mut self) -> Option<FieldValue> {
        if self.items.is_empty() {
            return None;
        }
        self.notifier.notify();
        self.items.pop()
    }

    /// Removes the first element equal to `value` (by the inner descriptor's
    /// equality). Returns whether one was found; only a removal is an edit.
    ///
    /// # Panics
    ///
    /// Panics if the owning entity has been dropped.
    pub fn remove_item(&mut self, value: &FieldValue) -> bool {
        let position = self
            .items
            .iter()
            .position(|item| item == value || self.inner.equals(item, value));
        match position {
            Some(index) => {
                self.notifier.notify();
                self.items.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes every element.
    ///
    /// # Panics
    ///
    /// Panics if the owning entity has been dropped.
    pub fn clear(&mut self) {
        self.notifier.notify();
        self.items.clear();
    }

    /// Keeps only the elements for which `keep` returns true.
    ///
    /// # Panics
    ///
    /// Panics if the owning entity has been dropped.
    pub fn retain(&mut self, keep: impl FnMut(&FieldValue) -> bool) {
        self.notifier.notify();
        self.items.retain(keep);
    }

    /// Reverses the list in place.
    ///
    /// # Panics
    ///
    /// Panics if the owning entity has been dropped.
    pub fn reverse(&mut self) {
        self.notifier.notify();
        self.items.reverse();
    }

    /// Sorts the list in place.
    ///
    /// # Panics
    ///
    /// Panics if the owning entity has been dropped.
    pub fn sort_by(&mut self, compare: impl FnMut(&FieldValue, &FieldValue) -> Ordering) {
        self.notifier.notify();
        self.items.sort_by(compare);
    }
}

impl PartialEq for TrackedList {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}
