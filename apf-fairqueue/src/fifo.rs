//! Arena-backed FIFO with O(1) removal by handle.
//!
//! Entries live in a slot vector linked into a doubly-linked list by index.
//! Freed slots are recycled through a free list, and every slot carries a
//! generation counter so that a handle to a removed entry can never reach
//! whatever reuses its slot.
//!
//! Not safe for concurrent use; the owning queue set serializes access.

/// Stable position of an entry in a [`Fifo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FifoHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
    prev: Option<u32>,
    next: Option<u32>,
}

/// First-in first-out list supporting removal of arbitrary entries.
#[derive(Debug)]
pub struct Fifo<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl<T> Default for Fifo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Fifo<T> {
    /// Creates an empty FIFO.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Returns the number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the FIFO is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends an entry at the tail and returns its handle.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX` slots would be allocated.
    pub fn push_back(&mut self, value: T) -> FifoHandle {
        let index = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            slot.prev = self.tail;
            slot.next = None;
            index
        } else {
            let index = u32::try_from(self.slots.len()).expect("fifo slot count overflow");
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
                prev: self.tail,
                next: None,
            });
            index
        };

        match self.tail {
            Some(tail) => self.slots[tail as usize].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;

        FifoHandle {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// Returns the oldest entry without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        let head = self.head?;
        self.slots[head as usize].value.as_ref()
    }

    /// Removes and returns the oldest entry.
    pub fn pop_front(&mut self) -> Option<T> {
        let head = self.head?;
        self.unlink(head)
    }

    /// Removes the entry behind `handle`.
    ///
    /// Returns `None` if that entry was already removed, so calling this more
    /// than once is harmless.
    pub fn remove(&mut self, handle: FifoHandle) -> Option<T> {
        if !self.contains(handle) {
            return None;
        }
        self.unlink(handle.index)
    }

    /// Returns whether `handle` still refers to a queued entry.
    #[must_use]
    pub fn contains(&self, handle: FifoHandle) -> bool {
        self.slots
            .get(handle.index as usize)
            .is_some_and(|slot| slot.generation == handle.generation && slot.value.is_some())
    }

    /// Iterates from oldest to newest.
    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let index = cursor?;
            let slot = &self.slots[index as usize];
            cursor = slot.next;
            slot.value.as_ref()
        })
    }

    fn unlink(&mut self, index: u32) -> Option<T> {
        let (prev, next, value) = {
            let slot = &mut self.slots[index as usize];
            let value = slot.value.take()?;
            slot.generation = slot.generation.wrapping_add(1);
            (slot.prev.take(), slot.next.take(), value)
        };

        match prev {
            Some(prev) => self.slots[prev as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.slots[next as usize].prev = prev,
            None => self.tail = prev,
        }

        self.free.push(index);
        self.len -= 1;
        Some(value)
    }
}
