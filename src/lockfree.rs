use crate::{
    BufferError, Cell, allocate_slots,
    geometry::RingGeometry,
    traits::{RingConsumer, RingMetrics, RingProducer},
};
use crossbeam_utils::{Backoff, CachePadded};
use portable_atomic::AtomicU64;
use std::{
    cell::UnsafeCell,
    fmt,
    sync::atomic::{self, AtomicUsize, Ordering},
};

/// One ring slot plus the position it is ready for.
///
/// For position `p` mapping to this slot, the stamp moves through:
/// - `p`: vacant, a producer may claim `p` and write;
/// - `p + 1`: written, a consumer may claim `p` and read;
/// - `p + slots`: read, vacant again for the next lap.
///
/// Claims only succeed when the stamp matches the claimant's snapshot, so a
/// cursor that has come round a full lap can never reach a slot that a slow
/// thread of the previous lap is still using.
struct Slot<'a, T> {
    stamp: AtomicU64,
    cell: UnsafeCell<Option<Cell<'a, T>>>,
}

/// Lock-free multi-producer multi-consumer ring.
///
/// Same FIFO ring as [`RingBuffer`](crate::RingBuffer), shared through `&self`.
/// Producers claim a slot by advancing `tail` with compare-and-swap and only
/// then write into it; consumers do the same on `head`. No two threads ever
/// touch the same slot at once, so the payload needs no further
/// synchronization.
///
/// - **Lock-free**: a failed CAS means another thread made progress.
/// - **Non-blocking**: a full or empty ring fails immediately. A slot that
///   another thread has claimed but not finished with counts as unavailable,
///   so `store_*` may report `Full` and `load_*` may report `Empty` for that
///   short window.
/// - **Approximate size**: `size()` is a relaxed counter, clamped to
///   `0..=capacity`.
///
/// Cursors are 64-bit positions that only ever grow; `position % (capacity +
/// 1)` selects the slot. Exhausting them takes 2^64 operations.
///
/// # Examples
///
/// ```
/// use carousel::{
///     BufferError, LockFreeRingBuffer,
///     traits::{RingConsumer, RingMetrics, RingProducer},
/// };
///
/// # fn main() -> Result<(), BufferError> {
/// let ring = LockFreeRingBuffer::with_capacity(2)?;
///
/// ring.store_copy(&"a")?;
/// ring.store_copy(&"b")?;
/// assert_eq!(ring.store_copy(&"c"), Err(BufferError::Full));
/// assert_eq!(ring.size(), 2);
///
/// assert_eq!(ring.load_copy()?, "a");
/// # Ok(())
/// # }
/// ```
pub struct LockFreeRingBuffer<'a, T> {
    slots: Box<[Slot<'a, T>]>,
    geometry: Option<RingGeometry>,
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    size: CachePadded<AtomicUsize>,
}

// SAFETY: slot contents are only accessed by the single thread holding the
// claim on that slot's position, and claims are handed over through the
// stamp's release/acquire pair. Cells move owned `T`s between threads (`Send`)
// and share `&T` between threads (`Sync`).
unsafe impl<T: Send + Sync> Sync for LockFreeRingBuffer<'_, T> {}

impl<'a, T> LockFreeRingBuffer<'a, T> {
    /// A ring in the not-created state.
    pub fn new() -> Self {
        Self {
            slots: Box::default(),
            geometry: None,
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            size: CachePadded::new(AtomicUsize::new(0)),
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
    /// Takes `&mut self`: nothing else can be using the ring while it is being
    /// rebuilt. Any previous contents are dropped first.
    pub fn create(&mut self, capacity: usize) -> Result<(), BufferError> {
        self.destroy();
        let geometry = RingGeometry::new(capacity)?;

        let mut position = 0u64;
        let slots = allocate_slots(geometry.slots(), || {
            let slot = Slot {
                stamp: AtomicU64::new(position),
                cell: UnsafeCell::new(None),
            };
            position += 1;
            slot
        })?;

        self.slots = slots.into_boxed_slice();
        self.geometry = Some(geometry);
        tracing::debug!(capacity, slots = geometry.slots(), "lock-free ring created");
        Ok(())
    }

    /// Drops every stored cell, releases the slots and returns to the
    /// not-created state.
    pub fn destroy(&mut self) {
        if self.geometry.take().is_some() {
            tracing::debug!(dropped = *self.size.get_mut(), "lock-free ring destroyed");
        }
        self.slots = Box::default();
        *self.head.get_mut() = 0;
        *self.tail.get_mut() = 0;
        *self.size.get_mut() = 0;
    }

    /// `true` between a successful [`create`](Self::create) and the next
    /// [`destroy`](Self::destroy).
    pub const fn is_created(&self) -> bool {
        self.geometry.is_some()
    }

    /// Claims the slot at `tail` and writes `into_cell(value)` into it.
    ///
    /// The value is only converted once a slot is ours, so a rejected value
    /// comes back untouched.
    fn store_with<V>(
        &self,
        value: V,
        into_cell: impl FnOnce(V) -> Cell<'a, T>,
    ) -> Result<(), (V, BufferError)> {
        let Some(geometry) = self.geometry else {
            return Err((value, BufferError::NotCreated));
        };
        let capacity = geometry.capacity() as u64;
        let backoff = Backoff::new();
        let mut tail = self.tail.load(Ordering::Relaxed);

        loop {
            // Relaxed fullness probe; a stale head only ever looks fuller.
            if tail.wrapping_sub(self.head.load(Ordering::Relaxed)) >= capacity {
                atomic::fence(Ordering::SeqCst);
                let head = self.head.load(Ordering::Acquire);
                if tail.wrapping_sub(head) >= capacity {
                    let current = self.tail.load(Ordering::Relaxed);
                    if current == tail {
                        return Err((value, BufferError::Full));
                    }
                    tail = current;
                    continue;
                }
            }

            let slot = &self.slots[geometry.index_of(tail)];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == tail {
                match self.tail.compare_exchange_weak(
                    tail,
                    tail + 1,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the CAS gave this thread position `tail`, and
                        // the stamp shows the previous lap's reader is done.
                        unsafe {
                            *slot.cell.get() = Some(into_cell(value));
                        }
                        self.size.fetch_add(1, Ordering::Relaxed);
                        slot.stamp.store(tail + 1, Ordering::Release);
                        return Ok(());
                    },
                    Err(current) => {
                        tail = current;
                        backoff.spin();
                    },
                }
            } else if stamp < tail {
                // A reader from the previous lap has not released this slot.
                return Err((value, BufferError::Full));
            } else {
                // Our snapshot is behind; other producers already moved on.
                backoff.spin();
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Claims the slot at `head` and moves its cell out.
    fn take(&self) -> Result<Cell<'a, T>, BufferError> {
        let geometry = self.geometry.ok_or(BufferError::NotCreated)?;
        let lap = geometry.slots() as u64;
        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Relaxed);

        loop {
            let slot = &self.slots[geometry.index_of(head)];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == head + 1 {
                match self.head.compare_exchange_weak(
                    head,
                    head + 1,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the CAS gave this thread position `head`, and
                        // the stamp shows its producer has published the cell.
                        let cell = unsafe { (*slot.cell.get()).take() };
                        self.size.fetch_sub(1, Ordering::Relaxed);
                        slot.stamp.store(head + lap, Ordering::Release);
                        return cell.ok_or(BufferError::Empty);
                    },
                    Err(current) => {
                        head = current;
                        backoff.spin();
                    },
                }
            } else if stamp <= head {
                // Nothing published at `head` yet: either the ring is empty or
                // a producer holds the claim and is still writing.
                atomic::fence(Ordering::SeqCst);
                let current = self.head.load(Ordering::Relaxed);
                if current == head {
                    return Err(BufferError::Empty);
                }
                head = current;
            } else {
                backoff.spin();
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }
}

impl<'a, T> RingProducer<'a, T> for LockFreeRingBuffer<'a, T> {
    fn store_move(&self, value: T) -> Result<(), (T, BufferError)> {
        self.store_with(value, Cell::Owned)
    }

    fn store_borrowed(&self, value: &'a T) -> Result<(), BufferError> {
        self.store_with(value, Cell::Borrowed).map_err(|(_, e)| e)
    }
}

impl<'a, T> RingConsumer<'a, T> for LockFreeRingBuffer<'a, T> {
    fn load_move(&self) -> Result<Cell<'a, T>, BufferError> {
        self.take()
    }
}

impl<T> RingMetrics for LockFreeRingBuffer<'_, T> {
    fn capacity(&self) -> usize {
        self.geometry.map_or(0, |g| g.capacity())
    }

    fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed).min(self.capacity())
    }
}

impl<T> Default for LockFreeRingBuffer<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for LockFreeRingBuffer<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFreeRingBuffer")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .field("head", &self.head.load(Ordering::Relaxed))
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, thread};

    #[test]
    fn three_slot_walkthrough() {
        let mut ring = LockFreeRingBuffer::new();
        ring.create(3).unwrap();

        assert!(ring.store_copy(&1).is_ok());
        assert!(ring.store_copy(&2).is_ok());
        assert!(ring.store_copy(&3).is_ok());
        assert_eq!(ring.store_copy(&4), Err(BufferError::Full));

        assert_eq!(ring.load_copy(), Ok(1));
        assert!(ring.store_copy(&4).is_ok());

        assert_eq!(ring.load_copy(), Ok(2));
        assert_eq!(ring.load_copy(), Ok(3));
        assert_eq!(ring.load_copy(), Ok(4));
        assert_eq!(ring.load_copy(), Err(BufferError::Empty));
    }

    #[test]
    fn stamps_survive_many_laps() {
        let ring = LockFreeRingBuffer::with_capacity(2).unwrap();

        for i in 0..1_000u32 {
            ring.store_move(i).unwrap();
            ring.store_move(i + 1).unwrap();
            assert_eq!(ring.store_move(i + 2), Err((i + 2, BufferError::Full)));
            assert_eq!(ring.load_copy(), Ok(i));
            assert_eq!(ring.load_copy(), Ok(i + 1));
            assert_eq!(ring.load_copy(), Err(BufferError::Empty));
        }
        assert_eq!(ring.size(), 0);
    }

    #[test]
    fn rejections_leave_size_alone() {
        let ring = LockFreeRingBuffer::with_capacity(1).unwrap();
        assert_eq!(ring.load_move(), Err(BufferError::Empty));
        assert_eq!(ring.size(), 0);

        ring.store_move(5u8).unwrap();
        assert_eq!(ring.store_move(6), Err((6, BufferError::Full)));
        assert_eq!(ring.size(), 1);
        assert!(ring.is_full());
        assert_eq!(ring.capacity_remaining(), 0);
    }

    #[test]
    fn borrowed_round_trip() {
        let payload = vec![7u8; 64];
        let ring = LockFreeRingBuffer::with_capacity(4).unwrap();

        ring.store_borrowed(&payload).unwrap();
        match ring.load_move().unwrap() {
            Cell::Borrowed(r) => assert!(std::ptr::eq(r, &payload)),
            Cell::Owned(_) => panic!("expected a borrowed cell"),
        }

        ring.store_borrowed(&payload).unwrap();
        assert_eq!(ring.load_copy().unwrap(), payload);
    }

    #[test]
    fn not_created_and_recreate() {
        let mut ring: LockFreeRingBuffer<'_, u32> = LockFreeRingBuffer::default();
        assert_eq!(ring.capacity(), 0);
        assert_eq!(ring.store_move(1), Err((1, BufferError::NotCreated)));
        assert_eq!(ring.load_copy(), Err(BufferError::NotCreated));

        ring.create(2).unwrap();
        ring.store_move(1).unwrap();
        ring.destroy();
        assert_eq!(ring.load_copy(), Err(BufferError::NotCreated));
        assert_eq!(ring.size(), 0);

        ring.create(2).unwrap();
        assert_eq!(ring.load_copy(), Err(BufferError::Empty));
        assert_eq!(ring.create(0), Err(BufferError::InvalidCapacity));
        assert!(!ring.is_created());
    }

    #[test]
    fn drops_leftover_owned_values() {
        use std::sync::Arc;

        let token = Arc::new(());
        {
            let ring = LockFreeRingBuffer::with_capacity(3).unwrap();
            ring.store_move(Arc::clone(&token)).unwrap();
            ring.store_move(Arc::clone(&token)).unwrap();
            assert_eq!(Arc::strong_count(&token), 3);
        }
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn consume_stops_on_request() {
        let ring = LockFreeRingBuffer::with_capacity(8).unwrap();
        for i in 0..5 {
            ring.store_move(i).unwrap();
        }

        let mut seen = Vec::new();
        let count = ring.consume(|cell| {
            seen.push(*cell);
            *cell == 2
        });

        assert_eq!(count, 3);
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(ring.load_copy(), Ok(3));
    }

    #[test]
    fn panicking_clone_leaves_no_claimed_slot() {
        use std::panic::{self, AssertUnwindSafe};

        #[derive(Debug, PartialEq)]
        struct Brittle(u32);

        impl Clone for Brittle {
            fn clone(&self) -> Self {
                assert!(self.0 != 13, "refusing to clone 13");
                Self(self.0)
            }
        }

        let ring = LockFreeRingBuffer::with_capacity(2).unwrap();
        let stored = panic::catch_unwind(AssertUnwindSafe(|| ring.store_copy(&Brittle(13))));
        assert!(stored.is_err());
        assert_eq!(ring.size(), 0);

        ring.store_copy(&Brittle(1)).unwrap();
        ring.store_move(Brittle(2)).unwrap();
        assert_eq!(ring.load_move().unwrap().into_inner(), Some(Brittle(1)));
        assert_eq!(ring.load_copy(), Ok(Brittle(2)));
        assert_eq!(ring.load_move(), Err(BufferError::Empty));
        assert_eq!(ring.size(), 0);
    }

    fn run_threads(capacity: usize, producers: u64, consumers: usize, per_producer: u64) {
        let ring = LockFreeRingBuffer::with_capacity(capacity).unwrap();
        let total = usize::try_from(producers * per_producer).unwrap();
        let taken = AtomicUsize::new(0);

        let drained: Vec<Vec<u64>> = thread::scope(|s| {
            let ring = &ring;
            for pid in 0..producers {
                s.spawn(move || {
                    for i in 0..per_producer {
                        let mut value = (pid << 32) | i;
                        while let Err((rejected, e)) = ring.store_move(value) {
                            assert_eq!(e, BufferError::Full);
                            value = rejected;
                            thread::yield_now();
                        }
                    }
                });
            }

            let taken = &taken;
            let handles: Vec<_> = (0..consumers)
                .map(|_| {
                    s.spawn(move || {
                        let mut local = Vec::new();
                        while taken.load(Ordering::SeqCst) < total {
                            match ring.load_copy() {
                                Ok(v) => {
                                    local.push(v);
                                    taken.fetch_add(1, Ordering::SeqCst);
                                },
                                Err(BufferError::Empty) => thread::yield_now(),
                                Err(e) => panic!("unexpected ring error in consumer: {e:?}"),
                            }
                        }
                        local
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut seen = HashSet::with_capacity(total);
        for value in drained.into_iter().flatten() {
            assert!(seen.insert(value), "duplicate value observed: {value}");
        }
        assert_eq!(seen.len(), total, "expected all items consumed once");
        for pid in 0..producers {
            for i in 0..per_producer {
                assert!(seen.contains(&((pid << 32) | i)));
            }
        }
        assert_eq!(ring.size(), 0);
    }

    #[test]
    fn mpmc_capacity_one() {
        run_threads(1, 4, 4, 5_000);
    }

    #[test]
    fn mpmc_small_ring() {
        run_threads(7, 4, 3, 20_000);
    }

    #[test]
    fn per_producer_order_is_kept_with_one_consumer() {
        let ring = LockFreeRingBuffer::with_capacity(16).unwrap();
        let per_producer = 10_000u64;

        thread::scope(|s| {
            let ring = &ring;
            for pid in 0..3u64 {
                s.spawn(move || {
                    for i in 0..per_producer {
                        while ring.store_move((pid << 32) | i).is_err() {
                            thread::yield_now();
                        }
                    }
                });
            }

            let mut next = [0u64; 3];
            let mut received = 0;
            while received < 3 * per_producer {
                if let Ok(v) = ring.load_copy() {
                    let pid = usize::try_from(v >> 32).unwrap();
                    assert_eq!(v & 0xFFFF_FFFF, next[pid]);
                    next[pid] += 1;
                    received += 1;
                }
            }
        });
    }

    #[test]
    fn borrowed_cells_cross_threads() {
        let values: Vec<String> = (0..2_000).map(|i| format!("item_{i}")).collect();
        let ring = LockFreeRingBuffer::with_capacity(32).unwrap();

        let mut received: Vec<String> = thread::scope(|s| {
            let ring = &ring;
            let values = &values;
            s.spawn(move || {
                for v in values {
                    while ring.store_borrowed(v).is_err() {
                        thread::yield_now();
                    }
                }
            });

            let consumer = s.spawn(move || {
                let mut out = Vec::with_capacity(values.len());
                while out.len() < values.len() {
                    match ring.load_move() {
                        Ok(cell) => {
                            assert!(cell.is_borrowed());
                            out.push(cell.into_owned());
                        },
                        Err(_) => thread::yield_now(),
                    }
                }
                out
            });
            consumer.join().unwrap()
        });

        received.sort();
        let mut expected = values.clone();
        expected.sort();
        assert_eq!(received, expected);
    }

    /// Multi-producer / multi-consumer stress test on tokio worker threads
    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn mpmc_stress_tokio() {
        use std::sync::Arc;
        use tokio::{
            task,
            time::{Duration, sleep},
        };

        let producers = 4u64;
        let consumers = 4usize;
        let items_per_producer = 50_000u64;
        let capacity = 1000usize;
        let total = usize::try_from(producers * items_per_producer).unwrap();

        let ring: Arc<LockFreeRingBuffer<'static, u64>> =
            Arc::new(LockFreeRingBuffer::with_capacity(capacity).unwrap());

        let seen = Arc::new(tokio::sync::Mutex::new(HashSet::<u64>::with_capacity(
            total,
        )));
        let consumed = Arc::new(AtomicUsize::new(0));

        let mut consumer_handles = Vec::with_capacity(consumers);
        for _ in 0..consumers {
            let ring = ring.clone();
            let seen = seen.clone();
            let consumed = consumed.clone();
            consumer_handles.push(task::spawn(async move {
                while consumed.load(Ordering::SeqCst) < total {
                    match ring.load_copy() {
                        Ok(val) => {
                            let inserted = seen.lock().await.insert(val);
                            assert!(inserted, "duplicate value observed: {val}");
                            consumed.fetch_add(1, Ordering::SeqCst);
                        },
                        Err(BufferError::Empty) => task::yield_now().await,
                        Err(e) => panic!("unexpected ring error in consumer: {e:?}"),
                    }
                }
            }));
        }

        let mut producer_handles = Vec::with_capacity(4);
        for pid in 0..producers {
            let ring = ring.clone();
            producer_handles.push(task::spawn(async move {
                for i in 0..items_per_producer {
                    let val = (pid << 32) | i;
                    loop {
                        match ring.store_move(val) {
                            Ok(()) => break,
                            Err((_, BufferError::Full)) => task::yield_now().await,
                            Err((_, e)) => panic!("unexpected ring error in producer: {e:?}"),
                        }
                    }
                }
            }));
        }

        for h in producer_handles {
            h.await.expect("producer join");
        }
        while consumed.load(Ordering::SeqCst) < total {
            sleep(Duration::from_millis(1)).await;
        }
        for h in consumer_handles {
            h.await.expect("consumer join");
        }

        assert_eq!(seen.lock().await.len(), total, "expected all items consumed once");
        assert_eq!(ring.size(), 0);
    }
}
