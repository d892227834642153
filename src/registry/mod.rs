//! Handle registry
//!
//! Maps opaque engine handles to the records this layer owns. The registry is
//! the single admission point for new records: [`HandleRegistry::find_or_create`]
//! reports whether it created the record, and callers emit a "created" event
//! only when it did. Engines are known to announce the same creation more than
//! once, so this flag is what keeps duplicate callbacks harmless.
//!
//! The registry does no locking of its own. Every mutating method takes
//! `&mut self`, and the only holder of mutable access is the dispatch context.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;

/// Insertion-ordered map from handle to record
#[derive(Debug, Clone)]
pub struct HandleRegistry<H, R> {
    records: HashMap<H, R>,
    order: Vec<H>,
}

impl<H, R> HandleRegistry<H, R>
where
    H: Copy + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, handle: &H) -> bool {
        self.records.contains_key(handle)
    }

    pub fn find(&self, handle: &H) -> Option<&R> {
        self.records.get(handle)
    }

    pub fn find_mut(&mut self, handle: &H) -> Option<&mut R> {
        self.records.get_mut(handle)
    }

    /// Return the record for `handle`, creating it with `factory` if absent
    ///
    /// The boolean is `true` only when this call created the record.
    pub fn find_or_create<F>(&mut self, handle: H, factory: F) -> (&mut R, bool)
    where
        F: FnOnce() -> R,
    {
        match self.records.entry(handle) {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => {
                self.order.push(handle);
                (entry.insert(factory()), true)
            }
        }
    }

    /// Like [`find_or_create`](Self::find_or_create) for factories that can fail
    ///
    /// Nothing is inserted when the factory fails.
    pub fn try_find_or_create<F, E>(&mut self, handle: H, factory: F) -> Result<(&mut R, bool), E>
    where
        F: FnOnce() -> Result<R, E>,
    {
        match self.records.entry(handle) {
            Entry::Occupied(entry) => Ok((entry.into_mut(), false)),
            Entry::Vacant(entry) => {
                let record = factory()?;
                self.order.push(handle);
                Ok((entry.insert(record), true))
            }
        }
    }

    /// Remove a record; removing an absent handle is a no-op
    pub fn remove(&mut self, handle: &H) -> Option<R> {
        let removed = self.records.remove(handle);
        if removed.is_some() {
            self.order.retain(|existing| existing != handle);
        }
        removed
    }

    /// Handles in insertion order
    pub fn handles(&self) -> impl Iterator<Item = &H> + '_ {
        self.order.iter()
    }

    /// Records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&H, &R)> + '_ {
        self.order
            .iter()
            .filter_map(move |handle| self.records.get(handle).map(|record| (handle, record)))
    }

    /// Visit every record mutably, in insertion order
    pub fn for_each_mut<F>(&mut self, mut visit: F)
    where
        F: FnMut(&H, &mut R),
    {
        for handle in &self.order {
            if let Some(record) = self.records.get_mut(handle) {
                visit(handle, record);
            }
        }
    }

    /// Remove every record, returning them in insertion order
    pub fn drain(&mut self) -> Vec<(H, R)> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|handle| self.records.remove(&handle).map(|record| (handle, record)))
            .collect()
    }
}

impl<H, R> Default for HandleRegistry<H, R>
where
    H: Copy + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_or_create_is_idempotent() {
        let mut registry: HandleRegistry<u64, String> = HandleRegistry::new();

        let (record, created) = registry.find_or_create(1, || "first".to_string());
        assert!(created);
        assert_eq!(record, "first");

        let (record, created) = registry.find_or_create(1, || "second".to_string());
        assert!(!created);
        assert_eq!(record, "first");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_factory_not_called_for_existing_handle() {
        let mut registry: HandleRegistry<u64, u32> = HandleRegistry::new();
        registry.find_or_create(9, || 1);

        let mut called = false;
        registry.find_or_create(9, || {
            called = true;
            2
        });
        assert!(!called);
    }

    #[test]
    fn test_failed_factory_inserts_nothing() {
        let mut registry: HandleRegistry<u64, u32> = HandleRegistry::new();
        let result: Result<_, &str> = registry.try_find_or_create(3, || Err("bad payload"));
        assert!(result.is_err());
        assert!(!registry.contains(&3));
        assert_eq!(registry.handles().count(), 0);

        let (value, created) = registry.try_find_or_create::<_, &str>(3, || Ok(7)).unwrap();
        assert!(created);
        assert_eq!(*value, 7);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry: HandleRegistry<u64, u32> = HandleRegistry::new();
        registry.find_or_create(1, || 10);
        registry.find_or_create(2, || 20);

        assert_eq!(registry.remove(&1), Some(10));
        assert_eq!(registry.remove(&1), None);
        assert_eq!(registry.remove(&42), None);
        assert_eq!(registry.handles().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_iteration_follows_insertion_order() {
        let mut registry: HandleRegistry<u64, u32> = HandleRegistry::new();
        for handle in [5, 3, 9, 1] {
            registry.find_or_create(handle, || handle as u32 * 10);
        }
        registry.remove(&9);

        let seen: Vec<u64> = registry.iter().map(|(h, _)| *h).collect();
        assert_eq!(seen, vec![5, 3, 1]);

        registry.for_each_mut(|_, value| *value += 1);
        assert_eq!(registry.find(&3), Some(&31));

        let drained: Vec<(u64, u32)> = registry.drain();
        assert_eq!(drained, vec![(5, 51), (3, 31), (1, 11)]);
        assert!(registry.is_empty());
    }
}
