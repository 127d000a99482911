//! Observable native containers
//!
//! `Property<T>` and `ObservableList<T>` are the native halves of a binding.
//! They notify listeners synchronously after every effective change. The
//! bridge talks to them through the type-erased `ObservableValue` and
//! `ObservableCollection` traits.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::{Bindable, Value, ValueError, ValueKind};

// ─────────────────────────────────────────────────────────────────────────────
// Listeners
// ─────────────────────────────────────────────────────────────────────────────

/// Handle returned when registering a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ListenerSet<F: ?Sized> {
    next: Cell<u64>,
    entries: RefCell<Vec<(ListenerId, Rc<F>)>>,
}

impl<F: ?Sized> ListenerSet<F> {
    fn new() -> Self {
        Self {
            next: Cell::new(0),
            entries: RefCell::new(Vec::new()),
        }
    }

    fn add(&self, listener: Rc<F>) -> ListenerId {
        let id = ListenerId(self.next.get());
        self.next.set(id.0 + 1);
        self.entries.borrow_mut().push((id, listener));
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Listeners may register or remove listeners while being notified.
    fn snapshot(&self) -> Vec<Rc<F>> {
        self.entries
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Property
// ─────────────────────────────────────────────────────────────────────────────

/// Observable scalar property
///
/// Listeners receive `(old, new)` and only fire when the value actually
/// changes (see `Bindable::same`).
pub struct Property<T> {
    value: RefCell<T>,
    listeners: ListenerSet<dyn Fn(&T, &T)>,
}

impl<T: Bindable> Property<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: RefCell::new(initial),
            listeners: ListenerSet::new(),
        }
    }

    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    /// Store a new value. Returns false if it was the same as the current one.
    pub fn set(&self, value: T) -> bool {
        if self.value.borrow().same(&value) {
            return false;
        }
        let old = self.value.replace(value.clone());
        for listener in self.listeners.snapshot() {
            listener(&old, &value);
        }
        true
    }

    pub fn add_listener(&self, listener: impl Fn(&T, &T) + 'static) -> ListenerId {
        self.listeners.add(Rc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl<T: Bindable + Default> Default for Property<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Bindable + fmt::Debug> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("value", &*self.value.borrow())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Type-erased view of a `Property`
pub trait ObservableValue {
    fn kind(&self) -> ValueKind;

    fn value(&self) -> Value;

    /// Store a boundary value. Returns whether the stored value changed.
    fn set_value(&self, value: Value) -> Result<bool, ValueError>;

    /// The listener receives the new value.
    fn subscribe(&self, listener: Rc<dyn Fn(&Value)>) -> ListenerId;

    fn unsubscribe(&self, id: ListenerId) -> bool;
}

impl<T: Bindable> ObservableValue for Property<T> {
    fn kind(&self) -> ValueKind {
        T::kind()
    }

    fn value(&self) -> Value {
        self.value.borrow().to_value()
    }

    fn set_value(&self, value: Value) -> Result<bool, ValueError> {
        let value = T::from_value(T::kind().coerce(value)?)?;
        Ok(self.set(value))
    }

    fn subscribe(&self, listener: Rc<dyn Fn(&Value)>) -> ListenerId {
        self.add_listener(move |_, new| listener(&new.to_value()))
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        self.remove_listener(id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// List Changes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Elements `from..to` of the new list were inserted
    Added,
    /// `to - from` elements starting at `from` of the old list were removed
    Removed,
    /// Elements `from..to` were replaced in place
    Updated,
    /// Elements `from..to` were reordered
    Permuted,
}

/// One contiguous change to an `ObservableList`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ListChange {
    pub kind: ChangeKind,
    pub from: usize,
    pub to: usize,
}

impl ListChange {
    pub fn new(kind: ChangeKind, from: usize, to: usize) -> Self {
        Self { kind, from, to }
    }

    /// Number of elements covered by the change
    pub fn len(&self) -> usize {
        self.to.saturating_sub(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Observable List
// ─────────────────────────────────────────────────────────────────────────────

/// Observable ordered list
pub struct ObservableList<T> {
    items: RefCell<Vec<T>>,
    listeners: ListenerSet<dyn Fn(&ListChange)>,
}

impl<T: Bindable> ObservableList<T> {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            items: RefCell::new(items),
            listeners: ListenerSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.items.borrow().get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.borrow().clone()
    }

    pub fn push(&self, item: T) {
        let index = self.len();
        self.items.borrow_mut().push(item);
        self.fire(ListChange::new(ChangeKind::Added, index, index + 1));
    }

    pub fn insert(&self, index: usize, item: T) -> Result<(), ValueError> {
        self.insert_all(index, vec![item])
    }

    pub fn insert_all(&self, index: usize, items: Vec<T>) -> Result<(), ValueError> {
        self.check_position(index)?;
        let count = items.len();
        if count == 0 {
            return Ok(());
        }
        self.items.borrow_mut().splice(index..index, items);
        self.fire(ListChange::new(ChangeKind::Added, index, index + count));
        Ok(())
    }

    pub fn remove(&self, index: usize) -> Result<T, ValueError> {
        self.remove_range(index, index + 1)?
            .pop()
            .ok_or(ValueError::OutOfRange { index, len: self.len() })
    }

    /// Remove elements `from..to`
    pub fn remove_range(&self, from: usize, to: usize) -> Result<Vec<T>, ValueError> {
        self.check_range(from, to)?;
        if from == to {
            return Ok(Vec::new());
        }
        let removed: Vec<T> = self.items.borrow_mut().drain(from..to).collect();
        self.fire(ListChange::new(ChangeKind::Removed, from, to));
        Ok(removed)
    }

    /// Replace one element, returning the previous one
    pub fn set(&self, index: usize, item: T) -> Result<T, ValueError> {
        self.check_range(index, index + 1)?;
        let old = std::mem::replace(&mut self.items.borrow_mut()[index], item);
        self.fire(ListChange::new(ChangeKind::Updated, index, index + 1));
        Ok(old)
    }

    /// Replace elements starting at `index` in place
    pub fn set_range(&self, index: usize, items: Vec<T>) -> Result<(), ValueError> {
        let count = items.len();
        self.check_range(index, index + count)?;
        if count == 0 {
            return Ok(());
        }
        self.items.borrow_mut().splice(index..index + count, items);
        self.fire(ListChange::new(ChangeKind::Updated, index, index + count));
        Ok(())
    }

    pub fn clear(&self) {
        let len = self.len();
        if len == 0 {
            return;
        }
        self.items.borrow_mut().clear();
        self.fire(ListChange::new(ChangeKind::Removed, 0, len));
    }

    /// Replace the whole content. Notifies a removal followed by an addition.
    pub fn replace_all(&self, items: Vec<T>) {
        self.clear();
        let count = items.len();
        if count == 0 {
            return;
        }
        *self.items.borrow_mut() = items;
        self.fire(ListChange::new(ChangeKind::Added, 0, count));
    }

    /// Reorder the list in place
    pub fn sort_by(&self, compare: impl FnMut(&T, &T) -> Ordering) {
        let len = self.len();
        self.items.borrow_mut().sort_by(compare);
        if len > 1 {
            self.fire(ListChange::new(ChangeKind::Permuted, 0, len));
        }
    }

    pub fn add_listener(&self, listener: impl Fn(&ListChange) + 'static) -> ListenerId {
        self.listeners.add(Rc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn fire(&self, change: ListChange) {
        for listener in self.listeners.snapshot() {
            listener(&change);
        }
    }

    fn check_position(&self, index: usize) -> Result<(), ValueError> {
        let len = self.len();
        if index > len {
            return Err(ValueError::OutOfRange { index, len });
        }
        Ok(())
    }

    fn check_range(&self, from: usize, to: usize) -> Result<(), ValueError> {
        let len = self.len();
        if from > to {
            return Err(ValueError::OutOfRange { index: from, len });
        }
        if to > len {
            return Err(ValueError::OutOfRange { index: to - 1, len });
        }
        Ok(())
    }
}

impl<T: Bindable> Default for ObservableList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Bindable + fmt::Debug> fmt::Debug for ObservableList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableList")
            .field("items", &*self.items.borrow())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Type-erased view of an `ObservableList`
pub trait ObservableCollection {
    fn element_kind(&self) -> ValueKind;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn values(&self) -> Vec<Value>;

    fn values_in(&self, from: usize, to: usize) -> Result<Vec<Value>, ValueError>;

    fn insert_values(&self, index: usize, values: Vec<Value>) -> Result<(), ValueError>;

    fn remove_values(&self, from: usize, to: usize) -> Result<(), ValueError>;

    fn update_values(&self, index: usize, values: Vec<Value>) -> Result<(), ValueError>;

    fn replace_values(&self, values: Vec<Value>) -> Result<(), ValueError>;

    fn subscribe(&self, listener: Rc<dyn Fn(&ListChange)>) -> ListenerId;

    fn unsubscribe(&self, id: ListenerId) -> bool;
}

fn convert_all<T: Bindable>(values: Vec<Value>) -> Result<Vec<T>, ValueError> {
    values
        .into_iter()
        .map(|value| T::from_value(T::kind().coerce(value)?))
        .collect()
}

impl<T: Bindable> ObservableCollection for ObservableList<T> {
    fn element_kind(&self) -> ValueKind {
        T::kind()
    }

    fn len(&self) -> usize {
        ObservableList::len(self)
    }

    fn values(&self) -> Vec<Value> {
        self.items.borrow().iter().map(Bindable::to_value).collect()
    }

    fn values_in(&self, from: usize, to: usize) -> Result<Vec<Value>, ValueError> {
        self.check_range(from, to)?;
        Ok(self.items.borrow()[from..to]
            .iter()
            .map(Bindable::to_value)
            .collect())
    }

    fn insert_values(&self, index: usize, values: Vec<Value>) -> Result<(), ValueError> {
        self.insert_all(index, convert_all(values)?)
    }

    fn remove_values(&self, from: usize, to: usize) -> Result<(), ValueError> {
        self.remove_range(from, to).map(|_| ())
    }

    fn update_values(&self, index: usize, values: Vec<Value>) -> Result<(), ValueError> {
        self.set_range(index, convert_all(values)?)
    }

    fn replace_values(&self, values: Vec<Value>) -> Result<(), ValueError> {
        self.replace_all(convert_all(values)?);
        Ok(())
    }

    fn subscribe(&self, listener: Rc<dyn Fn(&ListChange)>) -> ListenerId {
        self.add_listener(move |change| listener(change))
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        self.remove_listener(id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_fires_only_on_change() {
        let prop = Property::new(String::from("a"));
        let calls = Rc::new(RefCell::new(Vec::new()));
        let seen = calls.clone();
        prop.add_listener(move |old: &String, new: &String| {
            seen.borrow_mut().push((old.clone(), new.clone()));
        });

        assert!(prop.set("b".into()));
        assert!(!prop.set("b".into()));
        assert_eq!(*calls.borrow(), vec![("a".to_string(), "b".to_string())]);
    }

    #[test]
    fn test_property_remove_listener() {
        let prop = Property::new(1i64);
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let id = prop.add_listener(move |_, _| counter.set(counter.get() + 1));
        prop.set(2);
        assert!(prop.remove_listener(id));
        prop.set(3);
        assert_eq!(hits.get(), 1);
        assert_eq!(prop.listener_count(), 0);
    }

    #[test]
    fn test_erased_property_rejects_wrong_kind() {
        let prop = Property::new(String::from("x"));
        let erased: &dyn ObservableValue = &prop;
        assert!(erased.set_value(Value::Int(10)).is_err());
        assert!(erased.set_value(Value::Null).is_err());
        assert_eq!(erased.set_value(Value::from("y")), Ok(true));
        assert_eq!(prop.get(), "y");
    }

    #[test]
    fn test_list_changes() {
        let list = ObservableList::from_vec(vec!["a".to_string(), "b".into(), "c".into()]);
        let changes = Rc::new(RefCell::new(Vec::new()));
        let seen = changes.clone();
        list.add_listener(move |change| seen.borrow_mut().push(*change));

        list.remove(1).unwrap();
        list.push("d".into());
        list.set(0, "z".into()).unwrap();
        list.insert_all(1, vec!["x".into(), "y".into()]).unwrap();

        assert_eq!(list.to_vec(), vec!["z", "x", "y", "c", "d"]);
        assert_eq!(
            *changes.borrow(),
            vec![
                ListChange::new(ChangeKind::Removed, 1, 2),
                ListChange::new(ChangeKind::Added, 2, 3),
                ListChange::new(ChangeKind::Updated, 0, 1),
                ListChange::new(ChangeKind::Added, 1, 3),
            ]
        );
    }

    #[test]
    fn test_list_out_of_range() {
        let list: ObservableList<i64> = ObservableList::from_vec(vec![1, 2]);
        assert!(list.remove(2).is_err());
        assert!(list.insert(3, 9).is_err());
        assert!(list.remove_range(1, 3).is_err());
        assert_eq!(list.to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_sort_reports_permutation() {
        let list: ObservableList<i64> = ObservableList::from_vec(vec![3, 1, 2]);
        let last = Rc::new(Cell::new(None));
        let seen = last.clone();
        list.add_listener(move |change| seen.set(Some(change.kind)));
        list.sort_by(|a, b| a.cmp(b));
        assert_eq!(list.to_vec(), vec![1, 2, 3]);
        assert_eq!(last.get(), Some(ChangeKind::Permuted));
    }

    #[test]
    fn test_erased_collection_converts() {
        let list: ObservableList<i64> = ObservableList::new();
        let erased: &dyn ObservableCollection = &list;
        erased
            .insert_values(0, vec![Value::Int(1), Value::Float(2.0)])
            .unwrap();
        assert_eq!(list.to_vec(), vec![1, 2]);
        assert!(erased.insert_values(0, vec![Value::from("nope")]).is_err());
        assert_eq!(erased.values_in(1, 2).unwrap(), vec![Value::Int(2)]);
    }
}
