//! Fixed-capacity object arenas
//!
//! Listeners, entities, environments, and rooms live in these. Slots are
//! recycled; a generation counter in the handle detects use-after-free.
//! User-visible object ids map to slots through a side index.

use std::collections::HashMap;

use em_core::{ObjectId, SlotHandle};

struct Slot<T> {
    value: Option<T>,
    generation: u32,
}

/// Fixed-capacity arena with generation-checked handles and id lookup
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    by_id: HashMap<ObjectId, SlotHandle>,
}

impl<T> Arena<T> {
    pub fn new(capacity: usize) -> Self {
        let mut free: Vec<u32> = (0..capacity as u32).collect();
        free.reverse();
        Self {
            slots: (0..capacity).map(|_| Slot { value: None, generation: 0 }).collect(),
            free,
            by_id: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Insert a value under a user id. Fails when full or the id is taken.
    pub fn insert(&mut self, id: ObjectId, value: T) -> Option<SlotHandle> {
        if self.by_id.contains_key(&id) {
            return None;
        }
        let index = self.free.pop()?;
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1).max(1);
        slot.value = Some(value);

        let handle = SlotHandle::new(index, slot.generation);
        self.by_id.insert(id, handle);
        Some(handle)
    }

    pub fn handle_of(&self, id: ObjectId) -> Option<SlotHandle> {
        self.by_id.get(&id).copied()
    }

    pub fn get(&self, handle: SlotHandle) -> Option<&T> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_mut()
    }

    pub fn get_by_id(&self, id: ObjectId) -> Option<&T> {
        self.get(self.handle_of(id)?)
    }

    pub fn get_by_id_mut(&mut self, id: ObjectId) -> Option<&mut T> {
        let handle = self.handle_of(id)?;
        self.get_mut(handle)
    }

    /// Remove by user id; the slot's generation advances so stale handles
    /// stop resolving.
    pub fn remove(&mut self, id: ObjectId) -> Option<T> {
        let handle = self.by_id.remove(&id)?;
        let slot = &mut self.slots[handle.index()];
        let value = slot.value.take();
        self.free.push(handle.index() as u32);
        value
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &T)> {
        self.by_id.iter().filter_map(|(&id, &handle)| self.get(handle).map(|v| (id, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| slot.value.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut arena: Arena<i32> = Arena::new(2);
        let handle = arena.insert(10, 42).unwrap();
        assert_eq!(arena.get(handle), Some(&42));
        assert_eq!(arena.get_by_id(10), Some(&42));
    }

    #[test]
    fn test_capacity_enforced() {
        let mut arena: Arena<i32> = Arena::new(1);
        assert!(arena.insert(1, 1).is_some());
        assert!(arena.insert(2, 2).is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut arena: Arena<i32> = Arena::new(4);
        assert!(arena.insert(1, 1).is_some());
        assert!(arena.insert(1, 2).is_none());
    }

    #[test]
    fn test_stale_handle_after_remove() {
        let mut arena: Arena<i32> = Arena::new(1);
        let handle = arena.insert(1, 1).unwrap();
        arena.remove(1);
        assert!(arena.get(handle).is_none());

        // Reusing the slot bumps the generation
        let fresh = arena.insert(2, 2).unwrap();
        assert!(arena.get(handle).is_none());
        assert_eq!(arena.get(fresh), Some(&2));
    }
}
