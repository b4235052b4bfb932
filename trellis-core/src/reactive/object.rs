//! Tracked Objects
//!
//! A tracked object is a keyed store with one tag per property plus one tag
//! for the key set itself. Instead of intercepting field access, the store
//! exposes explicit accessors; consumers call `get`, `set`, `has`, `delete`
//! and `keys` rather than using field syntax.
//!
//! # Tag Rules
//!
//! - Reading a property, or testing for it, consumes that property's tag.
//!   The tag is created on first use even for keys that do not exist yet,
//!   so adding such a key later is observed.
//! - Enumerating keys and testing membership consume the key-set tag.
//! - Adding a key dirties the key-set tag and the property tag; changing a
//!   value dirties only the property tag; deleting a key dirties both.
//!
//! # Stored Signals
//!
//! A property may hold a [`Signal`] instead of a plain value
//! ([`Slot::Signal`]). Reads unwrap it, and writes are forwarded to it, so
//! the signal's identity survives assignment through the store.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};

use super::runtime::Runtime;
use super::signal::{cyclic_write, Signal};
use super::tag::Tag;
use crate::error::Result;

/// The content of one property.
pub enum Slot<V> {
    /// A plain value owned by the store.
    Value(V),
    /// A signal read and written through the store.
    Signal(Signal<V>),
}

impl<V: Clone + 'static> Slot<V> {
    /// The current value, read without tracking.
    pub fn value_untracked(&self) -> V {
        match self {
            Slot::Value(value) => value.clone(),
            Slot::Signal(signal) => signal.get_untracked(),
        }
    }
}

impl<V: Clone> Clone for Slot<V> {
    fn clone(&self) -> Self {
        match self {
            Slot::Value(value) => Slot::Value(value.clone()),
            Slot::Signal(signal) => Slot::Signal(signal.clone()),
        }
    }
}

impl<V: Debug> Debug for Slot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Slot::Signal(signal) => f.debug_tuple("Signal").field(signal).finish(),
        }
    }
}

/// A keyed store with per-property dependency tracking.
///
/// Cloning yields another handle to the same store.
///
/// # Example
///
/// ```rust
/// use trellis_core::Runtime;
///
/// let runtime = Runtime::new();
/// let store = runtime.tracked_object([("a".to_string(), 1)]);
/// let keys = {
///     let store = store.clone();
///     runtime.memoize(move || store.keys())
/// };
///
/// assert_eq!(keys.get(), vec!["a".to_string()]);
/// store.set("b".to_string(), 2);
/// assert_eq!(keys.get(), vec!["a".to_string(), "b".to_string()]);
/// ```
pub struct TrackedObject<K, V> {
    inner: Rc<ObjectInner<K, V>>,
}

struct ObjectInner<K, V> {
    runtime: Runtime,
    /// The underlying structure, mutated in place.
    entries: RefCell<IndexMap<K, Slot<V>>>,
    /// Per-property tags, created on first use.
    tags: RefCell<HashMap<K, Tag>>,
    /// Tag for the set of keys.
    keys_tag: Tag,
}

/// What a write finds at its key before it happens.
enum Prior<V> {
    Absent,
    Equal,
    Different,
    Forward(Signal<V>),
}

impl<K, V> TrackedObject<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    /// Create an empty store.
    pub fn new(runtime: &Runtime) -> Self {
        Self::from_slots(runtime, IndexMap::new())
    }

    /// Create a store from existing slots, without dirtying anything.
    pub fn from_slots(runtime: &Runtime, slots: IndexMap<K, Slot<V>>) -> Self {
        Self {
            inner: Rc::new(ObjectInner {
                runtime: runtime.clone(),
                entries: RefCell::new(slots),
                tags: RefCell::new(HashMap::new()),
                keys_tag: Tag::new(runtime),
            }),
        }
    }

    /// The tag for `key`, created on first use.
    fn property_tag(&self, key: &K) -> Tag {
        self.inner
            .tags
            .borrow_mut()
            .entry(key.clone())
            .or_insert_with(|| Tag::new(&self.inner.runtime))
            .clone()
    }

    fn existing_tag(&self, key: &K) -> Option<Tag> {
        self.inner.tags.borrow().get(key).cloned()
    }

    fn slot(&self, key: &K) -> Option<Slot<V>> {
        self.inner.entries.borrow().get(key).cloned()
    }

    /// Read a property, recording the dependency.
    ///
    /// Stored signals are unwrapped, which records the signal as well.
    pub fn get(&self, key: &K) -> Option<V> {
        self.property_tag(key).consume();
        match self.slot(key)? {
            Slot::Value(value) => Some(value),
            Slot::Signal(signal) => Some(signal.get()),
        }
    }

    /// Read a property without recording anything.
    pub fn get_untracked(&self, key: &K) -> Option<V> {
        self.inner
            .entries
            .borrow()
            .get(key)
            .map(Slot::value_untracked)
    }

    /// Check whether `key` exists, recording the key set and the property.
    pub fn has(&self, key: &K) -> bool {
        self.inner.keys_tag.consume();
        self.property_tag(key).consume();
        self.inner.entries.borrow().contains_key(key)
    }

    /// All keys in insertion order, recording the key set.
    pub fn keys(&self) -> Vec<K> {
        self.inner.keys_tag.consume();
        self.inner.entries.borrow().keys().cloned().collect()
    }

    /// Number of properties, recording the key set.
    pub fn len(&self) -> usize {
        self.inner.keys_tag.consume();
        self.inner.entries.borrow().len()
    }

    /// Check whether the store is empty, recording the key set.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every key with its value, recording the key set and each property.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get(&key).map(|value| (key, value)))
            .collect()
    }

    /// Write a property.
    ///
    /// A new key dirties the key set; a changed value dirties the property.
    /// Writes to a property holding a signal are forwarded to the signal.
    pub fn try_set(&self, key: K, value: V) -> Result<()> {
        let tag = self.property_tag(&key);

        let prior = match self.inner.entries.borrow().get(&key) {
            None => Prior::Absent,
            Some(Slot::Signal(signal)) => Prior::Forward(signal.clone()),
            Some(Slot::Value(old)) if *old == value => Prior::Equal,
            Some(Slot::Value(_)) => Prior::Different,
        };

        match prior {
            Prior::Forward(signal) => return signal.try_set(value),
            Prior::Equal => {}
            Prior::Different => tag.dirty()?,
            Prior::Absent => {
                self.inner.keys_tag.check_writable()?;
                tag.check_writable()?;
                self.inner.keys_tag.dirty()?;
                tag.dirty()?;
            }
        }

        self.inner.entries.borrow_mut().insert(key, Slot::Value(value));
        Ok(())
    }

    /// Write a property.
    ///
    /// # Panics
    ///
    /// Panics if the running computation has already read a tag this write
    /// has to dirty.
    #[track_caller]
    pub fn set(&self, key: K, value: V) {
        if let Err(err) = self.try_set(key, value) {
            cyclic_write(err);
        }
    }

    /// Store a signal as a property.
    ///
    /// Later reads and writes of the property go through the signal.
    pub fn try_insert_signal(&self, key: K, signal: Signal<V>) -> Result<()> {
        let tag = self.property_tag(&key);

        let (present, same) = match self.inner.entries.borrow().get(&key) {
            None => (false, false),
            Some(Slot::Signal(existing)) => (true, existing.ptr_eq(&signal)),
            Some(Slot::Value(_)) => (true, false),
        };

        if same {
            return Ok(());
        }
        if !present {
            self.inner.keys_tag.check_writable()?;
            tag.check_writable()?;
            self.inner.keys_tag.dirty()?;
        }
        tag.dirty()?;

        self.inner.entries.borrow_mut().insert(key, Slot::Signal(signal));
        Ok(())
    }

    /// Store a signal as a property.
    ///
    /// # Panics
    ///
    /// Panics if the running computation has already read a tag this write
    /// has to dirty.
    #[track_caller]
    pub fn insert_signal(&self, key: K, signal: Signal<V>) {
        if let Err(err) = self.try_insert_signal(key, signal) {
            cyclic_write(err);
        }
    }

    /// Remove a property, returning its last value.
    ///
    /// Removing a missing key changes nothing.
    pub fn try_delete(&self, key: &K) -> Result<Option<V>> {
        if !self.inner.entries.borrow().contains_key(key) {
            return Ok(None);
        }

        let tag = self.existing_tag(key);
        self.inner.keys_tag.check_writable()?;
        if let Some(tag) = &tag {
            tag.check_writable()?;
        }
        self.inner.keys_tag.dirty()?;
        if let Some(tag) = &tag {
            tag.dirty()?;
        }

        let removed = self.inner.entries.borrow_mut().shift_remove(key);
        Ok(removed.map(|slot| slot.value_untracked()))
    }

    /// Remove a property, returning its last value.
    ///
    /// # Panics
    ///
    /// Panics if the running computation has already read a tag this write
    /// has to dirty.
    #[track_caller]
    pub fn delete(&self, key: &K) -> Option<V> {
        match self.try_delete(key) {
            Ok(removed) => removed,
            Err(err) => cyclic_write(err),
        }
    }

    /// Replace a property with `f(current)`, reading it without tracking.
    ///
    /// Returns `false` if the key does not exist.
    pub fn try_update(&self, key: &K, f: impl FnOnce(&V) -> V) -> Result<bool> {
        match self.slot(key) {
            None => Ok(false),
            Some(Slot::Signal(signal)) => signal.try_update(f).map(|()| true),
            Some(Slot::Value(value)) => self.try_set(key.clone(), f(&value)).map(|()| true),
        }
    }

    /// Replace a property with `f(current)`, reading it without tracking.
    ///
    /// # Panics
    ///
    /// Panics if the running computation has already read a tag this write
    /// has to dirty.
    #[track_caller]
    pub fn update(&self, key: &K, f: impl FnOnce(&V) -> V) -> bool {
        match self.try_update(key, f) {
            Ok(updated) => updated,
            Err(err) => cyclic_write(err),
        }
    }

    /// Make the store hold exactly `entries`.
    ///
    /// Keys missing from `entries` are deleted first, then every pair is
    /// assigned, so unchanged values dirty nothing.
    pub fn try_sync_from(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<()> {
        let next: IndexMap<K, V> = entries.into_iter().collect();
        let stale: Vec<K> = self
            .inner
            .entries
            .borrow()
            .keys()
            .filter(|key| !next.contains_key(*key))
            .cloned()
            .collect();

        for key in &stale {
            self.try_delete(key)?;
        }
        for (key, value) in next {
            self.try_set(key, value)?;
        }
        Ok(())
    }

    /// Make the store hold exactly `entries`.
    ///
    /// # Panics
    ///
    /// Panics if the running computation has already read a tag this write
    /// has to dirty.
    #[track_caller]
    pub fn sync_from(&self, entries: impl IntoIterator<Item = (K, V)>) {
        if let Err(err) = self.try_sync_from(entries) {
            cyclic_write(err);
        }
    }

    /// One delegating view per key that exists right now.
    ///
    /// Keys added afterwards are not reflected.
    pub fn to_refs(&self) -> IndexMap<K, PropertyRef<K, V>> {
        self.keys()
            .into_iter()
            .map(|key| (key.clone(), self.to_ref(key)))
            .collect()
    }

    /// A delegating view of one property.
    pub fn to_ref(&self, key: K) -> PropertyRef<K, V> {
        PropertyRef {
            object: self.clone(),
            key,
        }
    }

    /// The tag tracking the key set.
    pub fn keys_tag(&self) -> &Tag {
        &self.inner.keys_tag
    }

    /// Check whether two handles refer to the same store.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<K, V> TrackedObject<K, V>
where
    K: Eq + Hash + Clone + Serialize + 'static,
    V: Clone + PartialEq + Serialize + 'static,
{
    /// Serialize the store to a JSON string through the tracked accessors.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl<K, V> Serialize for TrackedObject<K, V>
where
    K: Eq + Hash + Clone + Serialize + 'static,
    V: Clone + PartialEq + Serialize + 'static,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let entries = self.entries();
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in &entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<K, V> Clone for TrackedObject<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K: Debug, V: Debug> Debug for TrackedObject<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedObject")
            .field("entries", &*self.inner.entries.borrow())
            .field("keys_tag", &self.inner.keys_tag)
            .finish()
    }
}

/// A view of one property of a [`TrackedObject`].
///
/// Every operation is forwarded to the store, so the view behaves like a
/// cell even though the value lives in the store.
pub struct PropertyRef<K, V> {
    object: TrackedObject<K, V>,
    key: K,
}

impl<K, V> PropertyRef<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    /// The property this view delegates to.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Read the property, recording the dependency.
    pub fn get(&self) -> Option<V> {
        self.object.get(&self.key)
    }

    /// Read the property without recording anything.
    pub fn get_untracked(&self) -> Option<V> {
        self.object.get_untracked(&self.key)
    }

    /// Write the property.
    pub fn try_set(&self, value: V) -> Result<()> {
        self.object.try_set(self.key.clone(), value)
    }

    /// Write the property.
    ///
    /// # Panics
    ///
    /// Panics if the running computation has already read this property.
    #[track_caller]
    pub fn set(&self, value: V) {
        self.object.set(self.key.clone(), value)
    }

    /// Replace the property with `f(current)`, reading it without tracking.
    ///
    /// Returns `false` if the property no longer exists.
    pub fn try_update(&self, f: impl FnOnce(&V) -> V) -> Result<bool> {
        self.object.try_update(&self.key, f)
    }

    /// Replace the property with `f(current)`, reading it without tracking.
    ///
    /// # Panics
    ///
    /// Panics if the running computation has already read this property.
    #[track_caller]
    pub fn update(&self, f: impl FnOnce(&V) -> V) -> bool {
        self.object.update(&self.key, f)
    }
}

impl<K: Clone, V> Clone for PropertyRef<K, V> {
    fn clone(&self) -> Self {
        Self {
            object: self.object.clone(),
            key: self.key.clone(),
        }
    }
}

impl<K: Debug, V> Debug for PropertyRef<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyRef").field("key", &self.key).finish()
    }
}

impl Runtime {
    /// Create a tracked object from key/value pairs.
    pub fn tracked_object<K, V>(
        &self,
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> TrackedObject<K, V>
    where
        K: Eq + Hash + Clone + 'static,
        V: Clone + PartialEq + 'static,
    {
        let slots = entries
            .into_iter()
            .map(|(key, value)| (key, Slot::Value(value)))
            .collect();
        TrackedObject::from_slots(self, slots)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
