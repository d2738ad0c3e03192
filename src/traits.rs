use crate::{BufferError, Cell};

/// Size queries shared by every ring flavor.
///
/// On the lock-free ring `size` is a relaxed counter: exact when the ring is
/// quiescent, approximate while producers and consumers are in flight. It is
/// always clamped to `0..=capacity`.
pub trait RingMetrics {
    /// Maximum number of elements; `0` for a ring that is not created.
    fn capacity(&self) -> usize;

    /// Number of occupied slots.
    fn size(&self) -> usize;

    /// Number of free slots.
    fn capacity_remaining(&self) -> usize {
        self.capacity().saturating_sub(self.size())
    }

    /// `true` if no element is stored.
    /// Note: In concurrent scenarios, this may race with other operations.
    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// `true` if no slot is free. A not-created ring is never full.
    fn is_full(&self) -> bool {
        let capacity = self.capacity();
        capacity > 0 && self.size() >= capacity
    }
}

/// Trait for rings that accept elements through a shared reference.
///
/// Implemented by the thread-safe flavors, so one producer routine can feed
/// either of them. Every method either enqueues exactly one element or fails
/// without touching the ring.
pub trait RingProducer<'a, T: 'a> {
    /// Enqueue `value` by move.
    ///
    /// # Returns
    /// `Ok(())` on success, or the value together with the reason it was
    /// rejected
    fn store_move(&self, value: T) -> Result<(), (T, BufferError)>;

    /// Enqueue a reference to caller-owned data without copying it.
    ///
    /// # Returns
    /// `Ok(())` on success, or the reason the reference was rejected
    fn store_borrowed(&self, value: &'a T) -> Result<(), BufferError>;

    /// Enqueue a clone of `value`.
    ///
    /// # Returns
    /// `Ok(())` on success, or the reason the value was rejected
    fn store_copy(&self, value: &T) -> Result<(), BufferError>
    where
        T: Clone,
    {
        self.store_move(value.clone()).map_err(|(_, e)| e)
    }
}

/// Trait for rings that hand out elements through a shared reference.
pub trait RingConsumer<'a, T: 'a> {
    /// Dequeue the head cell as stored.
    ///
    /// # Returns
    /// The cell on success, or `BufferError::Empty` if nothing is ready
    fn load_move(&self) -> Result<Cell<'a, T>, BufferError>;

    /// Dequeue the head element as an owned value, cloning borrowed cells.
    ///
    /// # Returns
    /// The value on success, or `BufferError::Empty` if nothing is ready
    fn load_copy(&self) -> Result<T, BufferError>
    where
        T: Clone,
    {
        self.load_move().map(Cell::into_owned)
    }

    /// Dequeue cells with a closure until the ring is empty or the closure
    /// returns `true` to stop.
    ///
    /// The closure runs between dequeues; no lock is held while it runs.
    ///
    /// # Returns
    /// Number of cells consumed
    fn consume<F>(&self, mut consumer: F) -> usize
    where
        F: FnMut(Cell<'a, T>) -> bool,
    {
        let mut count = 0;
        while let Ok(cell) = self.load_move() {
            count += 1;
            if consumer(cell) {
                break;
            }
        }
        count
    }
}
