use crate::{
    BufferError, Cell, RingBuffer,
    traits::{RingConsumer, RingMetrics, RingProducer},
};
use crossbeam_utils::Backoff;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::{
    fmt,
    ops::{Deref, DerefMut, Shl, Shr},
    sync::atomic::{AtomicBool, Ordering},
};

/// Everything the mutex protects.
struct State<'a, T> {
    ring: RingBuffer<'a, T>,
    /// Set by `destroy`, cleared by `create`. Every wait predicate checks it.
    teardown: bool,
    /// Bumped by every `destroy`, so a waiter can tell that the ring it was
    /// waiting on is gone even if a new one has been created since.
    generation: u64,
    bad_object: Option<T>,
}

impl<T> State<'_, T> {
    /// Whether a wait for `n` slots can ever finish on this ring.
    fn admit(&self, n: usize) -> Result<(), BufferError> {
        if self.teardown {
            return Ok(());
        }
        if !self.ring.is_created() {
            return Err(BufferError::NotCreated);
        }
        let capacity = self.ring.capacity();
        if n > capacity {
            return Err(BufferError::ExceedsCapacity {
                requested: n,
                capacity,
            });
        }
        Ok(())
    }
}

/// Ring buffer guarded by a mutex, with blocking waits for data and space.
///
/// All cursor and cell state lives behind one [`parking_lot::Mutex`], which is
/// the only serialization point. Two condition variables sit next to it:
/// *capacity available*, broadcast after every successful dequeue, and *data
/// available*, broadcast after every successful enqueue.
///
/// Besides the plain [`RingProducer`] / [`RingConsumer`] operations it offers:
/// - predicate-checked waits: [`wait_for_size`](Self::wait_for_size),
///   [`wait_for_capacity`](Self::wait_for_capacity);
/// - RAII locks over the whole ring for compound operations:
///   [`acquire_exclusivity`](Self::acquire_exclusivity) and the
///   wait-then-hold guards [`LockWithSize`] / [`LockWithCapacity`];
/// - a chained stream API (`&ring << a << b`, `&ring >> &mut x`) whose
///   failures are reported afterwards through one-shot completion flags;
/// - a sentinel "bad object" returned by [`pop`](Self::pop) and
///   [`get`](Self::get) when there is nothing to return.
///
/// [`destroy`](Self::destroy) is safe to call while other threads are blocked
/// in a wait: they all wake up and return. The waits do not say why they
/// returned; check [`is_torn_down`](Self::is_torn_down) afterwards.
///
/// # Examples
///
/// ```
/// use carousel::{BlockingRingBuffer, traits::RingMetrics};
/// use std::thread;
///
/// # fn main() -> Result<(), carousel::BufferError> {
/// let ring = BlockingRingBuffer::with_capacity(4)?;
///
/// thread::scope(|s| {
///     s.spawn(|| {
///         // sleeps until all three values are in
///         let batch = ring.wait_for_size_and_acquire_exclusivity(3).unwrap();
///         assert!(batch.good(3));
///     });
///     let _ = &ring << 1 << 2 << 3;
/// });
///
/// assert!(ring.stream_store_completed());
/// let (mut a, mut b) = (0, 0);
/// let _ = &ring >> &mut a >> &mut b;
/// assert_eq!((a, b), (1, 2));
/// assert_eq!(ring.size(), 1);
/// # Ok(())
/// # }
/// ```
pub struct BlockingRingBuffer<'a, T> {
    state: Mutex<State<'a, T>>,
    capacity_available: Condvar,
    data_available: Condvar,
    stream_store_ok: AtomicBool,
    stream_load_ok: AtomicBool,
}

impl<'a, T> BlockingRingBuffer<'a, T> {
    /// A ring in the not-created state.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State {
                ring: RingBuffer::new(),
                teardown: false,
                generation: 0,
                bad_object: None,
            }),
            capacity_available: Condvar::new(),
            data_available: Condvar::new(),
            stream_store_ok: AtomicBool::new(true),
            stream_load_ok: AtomicBool::new(true),
        }
    }

    /// Creates a ring able to hold `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Result<Self, BufferError> {
        let ring = Self::new();
        ring.create(capacity)?;
        Ok(ring)
    }

    /// Allocates the slots and resets the cursors, clearing any earlier
    /// teardown. Previous contents are dropped.
    pub fn create(&self, capacity: usize) -> Result<(), BufferError> {
        let mut state = self.state.lock();
        if state.ring.is_created() {
            // waiters on the replaced ring are released
            state.generation += 1;
            self.capacity_available.notify_all();
            self.data_available.notify_all();
        }
        state.ring.create(capacity)?;
        state.teardown = false;
        Ok(())
    }

    /// Tears the ring down.
    ///
    /// Sets the teardown flag, wakes every thread blocked in a wait on either
    /// condition variable, then drops all cells and returns to the not-created
    /// state. Woken waiters return as soon as they reacquire the lock.
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        state.teardown = true;
        state.generation += 1;
        let woken = self.capacity_available.notify_all() + self.data_available.notify_all();
        tracing::debug!(woken, generation = state.generation, "ring teardown");
        state.ring.destroy();
    }

    /// `true` between a successful [`create`](Self::create) and the next
    /// [`destroy`](Self::destroy).
    pub fn is_created(&self) -> bool {
        self.state.lock().ring.is_created()
    }

    /// `true` once [`destroy`](Self::destroy) has run and no new
    /// [`create`](Self::create) has happened since.
    pub fn is_torn_down(&self) -> bool {
        self.state.lock().teardown
    }

    /// Locks the whole ring until the returned guard is dropped.
    ///
    /// Use it to make several non-blocking operations atomic with respect to
    /// other threads, e.g. "check the size, then pop".
    pub fn acquire_exclusivity(&self) -> ExclusiveGuard<'_, 'a, T> {
        ExclusiveGuard {
            buffer: self,
            state: self.state.lock(),
        }
    }

    /// Locks the ring, exposing [`LockWithSize::good`].
    pub fn lock_with_size(&self) -> LockWithSize<'_, 'a, T> {
        LockWithSize {
            guard: self.acquire_exclusivity(),
        }
    }

    /// Locks the ring, exposing [`LockWithCapacity::good`].
    pub fn lock_with_capacity(&self) -> LockWithCapacity<'_, 'a, T> {
        LockWithCapacity {
            guard: self.acquire_exclusivity(),
        }
    }

    /// Blocks until at least `n` elements are stored or the ring is torn down.
    ///
    /// The predicate is re-evaluated after every wakeup, so spurious wakeups
    /// are harmless. Returns `Ok(())` in both cases; callers that care check
    /// [`is_torn_down`](Self::is_torn_down).
    pub fn wait_for_size(&self, n: usize) -> Result<(), BufferError> {
        let mut state = self.state.lock();
        Self::wait_on(&self.data_available, &mut state, n, |ring| ring.size() >= n)
    }

    /// Blocks until at least `n` slots are free or the ring is torn down.
    ///
    /// See [`wait_for_size`](Self::wait_for_size) for the wakeup rules.
    pub fn wait_for_capacity(&self, n: usize) -> Result<(), BufferError> {
        let mut state = self.state.lock();
        Self::wait_on(&self.capacity_available, &mut state, n, |ring| {
            ring.capacity_remaining() >= n
        })
    }

    /// Wakes one thread waiting for free slots. Returns whether one was
    /// waiting.
    pub fn notify_one_for_capacity(&self) -> bool {
        self.capacity_available.notify_one()
    }

    /// Wakes one thread waiting for stored elements. Returns whether one was
    /// waiting.
    pub fn notify_one_for_size(&self) -> bool {
        self.data_available.notify_one()
    }

    /// Spins until at least `n` elements are stored (or teardown), then
    /// returns with the lock held.
    ///
    /// The check and the lock are one step: nothing can be dequeued between
    /// the predicate passing and the caller getting the guard.
    pub fn spin_for_size_and_acquire_exclusivity(
        &self,
        n: usize,
    ) -> Result<LockWithSize<'_, 'a, T>, BufferError> {
        let backoff = Backoff::new();
        loop {
            let lock = self.lock_with_size();
            lock.state.admit(n)?;
            if lock.good(n) || lock.state.teardown {
                return Ok(lock);
            }
            drop(lock);
            backoff.snooze();
        }
    }

    /// Spins until at least `n` slots are free (or teardown), then returns
    /// with the lock held.
    pub fn spin_for_capacity_and_acquire_exclusivity(
        &self,
        n: usize,
    ) -> Result<LockWithCapacity<'_, 'a, T>, BufferError> {
        let backoff = Backoff::new();
        loop {
            let lock = self.lock_with_capacity();
            lock.state.admit(n)?;
            if lock.good(n) || lock.state.teardown {
                return Ok(lock);
            }
            drop(lock);
            backoff.snooze();
        }
    }

    /// Sleeps on the data-available condition until at least `n` elements are
    /// stored (or teardown), then returns with the lock held.
    pub fn wait_for_size_and_acquire_exclusivity(
        &self,
        n: usize,
    ) -> Result<LockWithSize<'_, 'a, T>, BufferError> {
        let mut lock = self.lock_with_size();
        Self::wait_on(&self.data_available, &mut lock.guard.state, n, |ring| {
            ring.size() >= n
        })?;
        Ok(lock)
    }

    /// Sleeps on the capacity-available condition until at least `n` slots
    /// are free (or teardown), then returns with the lock held.
    pub fn wait_for_capacity_and_acquire_exclusivity(
        &self,
        n: usize,
    ) -> Result<LockWithCapacity<'_, 'a, T>, BufferError> {
        let mut lock = self.lock_with_capacity();
        Self::wait_on(&self.capacity_available, &mut lock.guard.state, n, |ring| {
            ring.capacity_remaining() >= n
        })?;
        Ok(lock)
    }

    fn wait_on(
        condition: &Condvar,
        state: &mut MutexGuard<'_, State<'a, T>>,
        n: usize,
        target: impl Fn(&RingBuffer<'a, T>) -> bool,
    ) -> Result<(), BufferError> {
        state.admit(n)?;
        let generation = state.generation;
        condition.wait_while(state, |s| {
            !s.teardown && s.generation == generation && !target(&s.ring)
        });
        tracing::trace!(n, teardown = state.teardown, "wait finished");
        Ok(())
    }

    /// Sets the sentinel returned by [`pop`](Self::pop) and [`get`](Self::get)
    /// when the ring is empty.
    pub fn set_bad_object(&self, value: T) {
        self.state.lock().bad_object = Some(value);
    }

    /// Dequeues the head element, or returns a clone of the bad object if the
    /// ring is empty (`T::default()` if none was set).
    ///
    /// Prefer [`try_pop`](Self::try_pop) where the caller can handle a
    /// `Result`; the sentinel is indistinguishable from a stored element equal
    /// to it.
    pub fn pop(&self) -> T
    where
        T: Clone + Default,
    {
        let mut guard = self.acquire_exclusivity();
        match guard.load_copy() {
            Ok(value) => value,
            Err(_) => guard.sentinel(),
        }
    }

    /// Returns a clone of the head element without removing it, or the bad
    /// object if the ring is empty.
    pub fn get(&self) -> T
    where
        T: Clone + Default,
    {
        let guard = self.acquire_exclusivity();
        guard.peek().cloned().unwrap_or_else(|| guard.sentinel())
    }

    /// Dequeues the head element as an owned value.
    pub fn try_pop(&self) -> Result<T, BufferError>
    where
        T: Clone,
    {
        self.load_copy()
    }

    /// Enqueues `value`, recording a failure for
    /// [`stream_store_completed`](Self::stream_store_completed) instead of
    /// returning it. Returns `self` for chaining.
    pub fn stream_store(&self, value: T) -> &Self {
        if let Err((_, e)) = self.store_move(value) {
            tracing::trace!(error = %e, "stream store dropped a value");
            self.stream_store_ok.store(false, Ordering::Release);
        }
        self
    }

    /// Dequeues into `out`, recording a failure for
    /// [`stream_load_completed`](Self::stream_load_completed) instead of
    /// returning it. `out` is left untouched on failure.
    pub fn stream_load(&self, out: &mut T) -> &Self
    where
        T: Clone,
    {
        match self.load_copy() {
            Ok(value) => *out = value,
            Err(e) => {
                tracing::trace!(error = %e, "stream load came back empty");
                self.stream_load_ok.store(false, Ordering::Release);
            },
        }
        self
    }

    /// `false` if any stream store failed since the last call. Reading
    /// resets the flag to `true`.
    pub fn stream_store_completed(&self) -> bool {
        self.stream_store_ok.swap(true, Ordering::AcqRel)
    }

    /// `false` if any stream load failed since the last call. Reading resets
    /// the flag to `true`.
    pub fn stream_load_completed(&self) -> bool {
        self.stream_load_ok.swap(true, Ordering::AcqRel)
    }
}

impl<'a, T> RingProducer<'a, T> for BlockingRingBuffer<'a, T> {
    fn store_move(&self, value: T) -> Result<(), (T, BufferError)> {
        self.acquire_exclusivity().store_move(value)
    }

    fn store_borrowed(&self, value: &'a T) -> Result<(), BufferError> {
        self.acquire_exclusivity().store_borrowed(value)
    }
}

impl<'a, T> RingConsumer<'a, T> for BlockingRingBuffer<'a, T> {
    fn load_move(&self) -> Result<Cell<'a, T>, BufferError> {
        self.acquire_exclusivity().load_move()
    }
}

impl<T> RingMetrics for BlockingRingBuffer<'_, T> {
    fn capacity(&self) -> usize {
        self.state.lock().ring.capacity()
    }

    fn size(&self) -> usize {
        self.state.lock().ring.size()
    }

    fn capacity_remaining(&self) -> usize {
        self.state.lock().ring.capacity_remaining()
    }
}

impl<T> Default for BlockingRingBuffer<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for BlockingRingBuffer<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("BlockingRingBuffer");
        match self.state.try_lock() {
            Some(state) => d
                .field("capacity", &state.ring.capacity())
                .field("size", &state.ring.size())
                .field("teardown", &state.teardown),
            None => d.field("state", &"<locked>"),
        };
        d.finish_non_exhaustive()
    }
}

impl<'a, T> Shl<T> for &BlockingRingBuffer<'a, T> {
    type Output = Self;

    /// Chained enqueue, see [`BlockingRingBuffer::stream_store`].
    fn shl(self, value: T) -> Self {
        self.stream_store(value)
    }
}

impl<'a, T: Clone> Shr<&mut T> for &BlockingRingBuffer<'a, T> {
    type Output = Self;

    /// Chained dequeue, see [`BlockingRingBuffer::stream_load`].
    fn shr(self, out: &mut T) -> Self {
        self.stream_load(out)
    }
}

/// Exclusive lock over a [`BlockingRingBuffer`].
///
/// While the guard lives no other thread can observe or change the ring. The
/// lock is released when the guard is dropped, including during unwinding.
/// Successful enqueues and dequeues through the guard wake waiters as usual;
/// they run once the guard is gone.
pub struct ExclusiveGuard<'g, 'a, T> {
    buffer: &'g BlockingRingBuffer<'a, T>,
    state: MutexGuard<'g, State<'a, T>>,
}

impl<'a, T> ExclusiveGuard<'_, 'a, T> {
    /// Enqueues a clone of `value`.
    pub fn store_copy(&mut self, value: &T) -> Result<(), BufferError>
    where
        T: Clone,
    {
        self.state.ring.store_copy(value)?;
        self.buffer.data_available.notify_all();
        Ok(())
    }

    /// Enqueues `value` by move. A rejected value is handed back.
    pub fn store_move(&mut self, value: T) -> Result<(), (T, BufferError)> {
        self.state.ring.store_move(value)?;
        self.buffer.data_available.notify_all();
        Ok(())
    }

    /// Enqueues a reference to caller-owned `value` without copying it.
    pub fn store_borrowed(&mut self, value: &'a T) -> Result<(), BufferError> {
        self.state.ring.store_borrowed(value)?;
        self.buffer.data_available.notify_all();
        Ok(())
    }

    /// Dequeues the head element as an owned value.
    pub fn load_copy(&mut self) -> Result<T, BufferError>
    where
        T: Clone,
    {
        self.load_move().map(Cell::into_owned)
    }

    /// Dequeues the head cell as stored.
    pub fn load_move(&mut self) -> Result<Cell<'a, T>, BufferError> {
        let cell = self.state.ring.load_move()?;
        self.buffer.capacity_available.notify_all();
        Ok(cell)
    }

    /// The head element, if any.
    pub fn peek(&self) -> Option<&T> {
        self.state.ring.peek()
    }

    /// `true` while the ring is created.
    pub fn is_created(&self) -> bool {
        self.state.ring.is_created()
    }

    /// `true` once the ring has been torn down and not re-created.
    pub fn is_torn_down(&self) -> bool {
        self.state.teardown
    }

    fn sentinel(&self) -> T
    where
        T: Clone + Default,
    {
        self.state.bad_object.clone().unwrap_or_default()
    }
}

impl<T> RingMetrics for ExclusiveGuard<'_, '_, T> {
    fn capacity(&self) -> usize {
        self.state.ring.capacity()
    }

    fn size(&self) -> usize {
        self.state.ring.size()
    }
}

impl<T> fmt::Debug for ExclusiveGuard<'_, '_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveGuard")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

/// Exclusive lock that also answers "are at least `n` elements stored?".
///
/// Returned already locked by
/// [`spin_for_size_and_acquire_exclusivity`](BlockingRingBuffer::spin_for_size_and_acquire_exclusivity)
/// and
/// [`wait_for_size_and_acquire_exclusivity`](BlockingRingBuffer::wait_for_size_and_acquire_exclusivity).
/// Those return early on teardown, so check [`good`](Self::good) before
/// relying on the count.
#[derive(Debug)]
pub struct LockWithSize<'g, 'a, T> {
    guard: ExclusiveGuard<'g, 'a, T>,
}

impl<'g, 'a, T> LockWithSize<'g, 'a, T> {
    /// `true` if at least `n` elements are stored right now.
    pub fn good(&self, n: usize) -> bool {
        self.guard.size() >= n
    }

    /// The plain exclusive guard.
    pub fn into_inner(self) -> ExclusiveGuard<'g, 'a, T> {
        self.guard
    }
}

/// Exclusive lock that also answers "are at least `n` slots free?".
///
/// Returned already locked by
/// [`spin_for_capacity_and_acquire_exclusivity`](BlockingRingBuffer::spin_for_capacity_and_acquire_exclusivity)
/// and
/// [`wait_for_capacity_and_acquire_exclusivity`](BlockingRingBuffer::wait_for_capacity_and_acquire_exclusivity).
#[derive(Debug)]
pub struct LockWithCapacity<'g, 'a, T> {
    guard: ExclusiveGuard<'g, 'a, T>,
}

impl<'g, 'a, T> LockWithCapacity<'g, 'a, T> {
    /// `true` if at least `n` slots are free right now.
    pub fn good(&self, n: usize) -> bool {
        self.guard.capacity_remaining() >= n
    }

    /// The plain exclusive guard.
    pub fn into_inner(self) -> ExclusiveGuard<'g, 'a, T> {
        self.guard
    }
}

impl<'g, 'a, T> Deref for LockWithSize<'g, 'a, T> {
    type Target = ExclusiveGuard<'g, 'a, T>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for LockWithSize<'_, '_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<'g, 'a, T> Deref for LockWithCapacity<'g, 'a, T> {
    type Target = ExclusiveGuard<'g, 'a, T>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for LockWithCapacity<'_, '_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
