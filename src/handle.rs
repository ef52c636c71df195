//! Stream handles and the slot arena behind them.
//!
//! Handles pair a slot index with a generation counter. Closing a stream
//! bumps the slot's generation, so a stale copy of the handle can never
//! reach a stream that later reuses the slot; it fails `BadHandle` instead.

use std::fmt;

/// Opaque stream handle returned by `Session::open`.
///
/// Cheap to copy and safe to share across threads; all validity checking
/// happens at the entry points.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    index: u16,
    generation: u32,
}

impl StreamHandle {
    /// Packs the handle into a single integer, e.g. for logging.
    #[inline]
    pub fn raw(self) -> u64 {
        (u64::from(self.generation) << 16) | u64::from(self.index)
    }

    #[inline]
    pub(crate) fn new(index: u16, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamHandle({}:{})", self.index, self.generation)
    }
}

/// Generation-checked slot arena.
///
/// Slots are reused after removal, but each removal bumps the slot's
/// generation, invalidating every handle minted before it.
pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u16>,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Stores a value and mints a handle for it.
    pub fn insert(&mut self, value: T) -> StreamHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return StreamHandle::new(index, slot.generation);
        }
        let index = self.slots.len() as u16;
        self.slots.push(Slot {
            // generation 0 is never minted, so a zeroed handle is dead
            generation: 1,
            value: Some(value),
        });
        StreamHandle::new(index, 1)
    }

    pub fn get(&self, handle: StreamHandle) -> Option<&T> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Removes the value and invalidates the handle generation.
    pub fn remove(&mut self, handle: StreamHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index() as u16);
        Some(value)
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates live values with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (StreamHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value
                .as_ref()
                .map(|v| (StreamHandle::new(i as u16, slot.generation), v))
        })
    }

}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut arena = Arena::new();
        let h = arena.insert("alpha");
        assert_eq!(arena.get(h), Some(&"alpha"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_stale_handle_rejected_after_remove() {
        let mut arena = Arena::new();
        let h = arena.insert(1u32);
        assert_eq!(arena.remove(h), Some(1));
        assert_eq!(arena.get(h), None);
        assert_eq!(arena.remove(h), None);
    }

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let mut arena = Arena::new();
        let first = arena.insert("first");
        arena.remove(first);
        let second = arena.insert("second");
        // same slot, different generation
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert_eq!(arena.get(first), None);
        assert_eq!(arena.get(second), Some(&"second"));
    }

    #[test]
    fn test_len_and_iter() {
        let mut arena = Arena::new();
        let a = arena.insert(10);
        let b = arena.insert(20);
        assert_eq!(arena.len(), 2);
        arena.remove(a);
        assert_eq!(arena.len(), 1);
        let live: Vec<_> = arena.iter().collect();
        assert_eq!(live, vec![(b, &20)]);
    }

    #[test]
    fn test_raw_is_unique_per_generation() {
        let mut arena = Arena::new();
        let first = arena.insert(());
        arena.remove(first);
        let second = arena.insert(());
        assert_ne!(first.raw(), second.raw());
    }
}
