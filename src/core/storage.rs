use std::hash::Hash;

/// Dense integer key usable as a direct slot index.
pub trait SparseIndex: Copy + Eq + Hash {
    fn to_usize(self) -> usize;
}

impl SparseIndex for u32 {
    #[inline]
    fn to_usize(self) -> usize {
        self as usize
    }
}

impl SparseIndex for usize {
    #[inline]
    fn to_usize(self) -> usize {
        self
    }
}

/// Slots addressed by a [`SparseIndex`], grown on demand. Cleared slots
/// keep their memory so per-build scratch state doesn't reallocate.
#[derive(Debug, Clone)]
pub struct SparseArray<I, V> {
    slots: Vec<Option<V>>,
    _key: std::marker::PhantomData<I>,
}

impl<I: SparseIndex, V> SparseArray<I, V> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            _key: std::marker::PhantomData,
        }
    }

    /// Number of slots, occupied or not.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.fill_with(|| None);
    }

    pub fn insert(&mut self, key: I, value: V) {
        let slot = key.to_usize();
        if slot >= self.slots.len() {
            self.slots.resize_with(slot + 1, || None);
        }
        self.slots[slot] = Some(value);
    }

    pub fn get(&self, key: I) -> Option<&V> {
        self.slots.get(key.to_usize()).and_then(Option::as_ref)
    }
}

impl<I: SparseIndex, V> Default for SparseArray<I, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_grows_and_leaves_holes() {
        let mut array = SparseArray::<u32, &str>::new();
        array.insert(3, "c");
        array.insert(0, "a");

        assert_eq!(array.capacity(), 4);
        assert_eq!(array.get(0), Some(&"a"));
        assert_eq!(array.get(1), None);
        assert_eq!(array.get(3), Some(&"c"));
        assert_eq!(array.get(42), None);
    }

    #[test]
    fn clear_keeps_slots() {
        let mut array = SparseArray::<usize, u8>::new();
        array.insert(7, 1);
        array.clear();

        assert_eq!(array.capacity(), 8);
        assert_eq!(array.get(7), None);
    }
}
