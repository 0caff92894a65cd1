/// Index of a live entry in a [`Pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolRef(u32);

#[derive(Debug)]
enum Slot<T> {
    Vacant { next_free: Option<u32> },
    Occupied(T),
}

/// A fixed-capacity slab with a free list, used for outgoing packet records
/// so the send path never allocates per packet.
///
/// Acquire and release are O(1). The pool does not grow: exhaustion makes
/// new sends fail while leaving in-flight records untouched. Double frees
/// are caught in debug builds.
#[derive(Debug)]
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Pool<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let next = if i + 1 < capacity {
                Some(i as u32 + 1)
            } else {
                None
            };
            slots.push(Slot::Vacant { next_free: next });
        }
        Self {
            slots,
            free_head: if capacity > 0 { Some(0) } else { None },
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.free_head.is_none()
    }

    /// Stores `value`, returning its handle, or `None` when the pool is
    /// exhausted.
    pub fn insert(&mut self, value: T) -> Option<PoolRef> {
        let index = self.free_head?;
        match self.slots[index as usize] {
            Slot::Vacant { next_free } => {
                self.free_head = next_free;
                self.slots[index as usize] = Slot::Occupied(value);
                self.len += 1;
                Some(PoolRef(index))
            }
            Slot::Occupied(_) => unreachable!("free list points at an occupied slot"),
        }
    }

    pub fn get(&self, id: PoolRef) -> Option<&T> {
        match self.slots.get(id.0 as usize) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: PoolRef) -> Option<&mut T> {
        match self.slots.get_mut(id.0 as usize) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Releases the entry and returns it. Freeing a vacant slot is a bug;
    /// debug builds panic, release builds return `None`.
    pub fn remove(&mut self, id: PoolRef) -> Option<T> {
        let slot = self.slots.get_mut(id.0 as usize)?;
        if matches!(slot, Slot::Vacant { .. }) {
            debug_assert!(false, "double free of pool slot {}", id.0);
            return None;
        }
        let value = std::mem::replace(
            slot,
            Slot::Vacant {
                next_free: self.free_head,
            },
        );
        self.free_head = Some(id.0);
        self.len -= 1;
        match value {
            Slot::Occupied(value) => Some(value),
            Slot::Vacant { .. } => unreachable!(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PoolRef, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Occupied(value) => Some((PoolRef(i as u32), value)),
            Slot::Vacant { .. } => None,
        })
    }
}
