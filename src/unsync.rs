use crate::{BufferError, Cell, allocate_slots, geometry::RingGeometry, traits::RingMetrics};
use std::fmt;

/// Fixed-capacity FIFO ring for use from a single thread of control.
///
/// This is the reference implementation the two thread-safe flavors reproduce.
/// Every mutating operation takes `&mut self`: nothing blocks, nothing retries,
/// and an operation that cannot complete leaves the ring exactly as it was.
///
/// # Invariants
///
/// - `slots.len() == capacity + 1` while created, `0` otherwise.
/// - Slots in `[head, tail)` (wrapping) hold `Some(cell)`; all others are
///   `None`.
/// - `size == geometry.len(head, tail)`.
///
/// # Examples
///
/// ```
/// use carousel::{BufferError, RingBuffer, traits::RingMetrics};
///
/// # fn main() -> Result<(), BufferError> {
/// let mut ring: RingBuffer<'_, String> = RingBuffer::new();
/// assert_eq!(ring.capacity(), 0);
/// assert_eq!(ring.load_copy(), Err(BufferError::NotCreated));
///
/// ring.create(2)?;
/// ring.store_move("a".to_owned()).map_err(|(_, e)| e)?;
/// assert_eq!(ring.capacity_remaining(), 1);
///
/// ring.destroy();
/// assert!(!ring.is_created());
/// # Ok(())
/// # }
/// ```
pub struct RingBuffer<'a, T> {
    slots: Vec<Option<Cell<'a, T>>>,
    geometry: Option<RingGeometry>,
    head: usize,
    tail: usize,
    size: usize,
}

impl<'a, T> RingBuffer<'a, T> {
    /// A ring in the not-created state.
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            geometry: None,
            head: 0,
            tail: 0,
            size: 0,
        }
    }

    /// Creates a ring able to hold `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Result<Self, BufferError> {
        let mut ring = Self::new();
        ring.create(capacity)?;
        Ok(ring)
    }

    /// Allocates `capacity + 1` vacant slots and resets the cursors.
    ///
    /// Any previous contents are dropped first. On failure the ring is left
    /// not-created.
    pub fn create(&mut self, capacity: usize) -> Result<(), BufferError> {
        self.destroy();
        let geometry = RingGeometry::new(capacity)?;
        self.slots = allocate_slots(geometry.slots(), || None)?;
        self.geometry = Some(geometry);
        tracing::debug!(capacity, slots = geometry.slots(), "ring created");
        Ok(())
    }

    /// Drops every stored cell, releases the slot array and returns to the
    /// not-created state.
    pub fn destroy(&mut self) {
        if self.geometry.take().is_some() {
            tracing::debug!(dropped = self.size, "ring destroyed");
        }
        self.slots = Vec::new();
        self.head = 0;
        self.tail = 0;
        self.size = 0;
    }

    /// `true` between a successful [`create`](Self::create) and the next
    /// [`destroy`](Self::destroy).
    pub const fn is_created(&self) -> bool {
        self.geometry.is_some()
    }

    /// Enqueues a clone of `value`.
    pub fn store_copy(&mut self, value: &T) -> Result<(), BufferError>
    where
        T: Clone,
    {
        let geometry = self.vacancy()?;
        self.put(geometry, Cell::Owned(value.clone()));
        Ok(())
    }

    /// Enqueues `value` by move. A rejected value is handed back.
    pub fn store_move(&mut self, value: T) -> Result<(), (T, BufferError)> {
        match self.vacancy() {
            Ok(geometry) => {
                self.put(geometry, Cell::Owned(value));
                Ok(())
            },
            Err(e) => Err((value, e)),
        }
    }

    /// Enqueues a reference to caller-owned `value` without copying it.
    pub fn store_borrowed(&mut self, value: &'a T) -> Result<(), BufferError> {
        let geometry = self.vacancy()?;
        self.put(geometry, Cell::Borrowed(value));
        Ok(())
    }

    /// Dequeues the head element as an owned value.
    ///
    /// Owned cells are moved out; borrowed cells are cloned from the referent.
    pub fn load_copy(&mut self) -> Result<T, BufferError>
    where
        T: Clone,
    {
        self.take().map(Cell::into_owned)
    }

    /// Dequeues the head cell as stored, without cloning anything.
    pub fn load_move(&mut self) -> Result<Cell<'a, T>, BufferError> {
        self.take()
    }

    /// The head element, if any.
    pub fn peek(&self) -> Option<&T> {
        if self.size == 0 {
            return None;
        }
        self.slots.get(self.head)?.as_deref()
    }

    /// Drops every stored element, keeping the allocation.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.size = 0;
    }

    /// Geometry of a created ring with at least one free slot.
    fn vacancy(&self) -> Result<RingGeometry, BufferError> {
        let geometry = self.geometry.ok_or(BufferError::NotCreated)?;
        if geometry.is_full(self.head, self.tail) {
            return Err(BufferError::Full);
        }
        Ok(geometry)
    }

    fn put(&mut self, geometry: RingGeometry, cell: Cell<'a, T>) {
        self.slots[self.tail] = Some(cell);
        self.tail = geometry.advance(self.tail);
        self.size += 1;
        debug_assert_eq!(self.size, geometry.len(self.head, self.tail));
    }

    fn take(&mut self) -> Result<Cell<'a, T>, BufferError> {
        let geometry = self.geometry.ok_or(BufferError::NotCreated)?;
        if geometry.is_empty(self.head, self.tail) {
            return Err(BufferError::Empty);
        }
        let cell = self.slots[self.head].take().ok_or(BufferError::Empty)?;
        self.head = geometry.advance(self.head);
        self.size -= 1;
        debug_assert_eq!(self.size, geometry.len(self.head, self.tail));
        Ok(cell)
    }
}

impl<T> RingMetrics for RingBuffer<'_, T> {
    fn capacity(&self) -> usize {
        self.geometry.map_or(0, |g| g.capacity())
    }

    fn size(&self) -> usize {
        self.size
    }
}

impl<T> Default for RingBuffer<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for RingBuffer<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("size", &self.size)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .finish_non_exhaustive()
    }
}
