//! # Carousel: Bounded Ring Buffers in Three Concurrency Flavors
//!
//! Carousel provides one fixed-capacity FIFO ring, written three times for
//! three different sharing models. All of them lay `capacity` elements over
//! `capacity + 1` slots so that "full" and "empty" are told apart by the two
//! cursors alone (see [`geometry::RingGeometry`]).
//!
//! ## Ring Types
//!
//! ### 1. Unsynchronized (`RingBuffer`)
//! The reference semantics. Mutation takes `&mut self`, so the borrow checker
//! keeps it on one thread of control:
//!
//! ```rust
//! use carousel::{BufferError, RingBuffer, traits::RingMetrics};
//!
//! # fn main() -> Result<(), BufferError> {
//! let mut ring = RingBuffer::with_capacity(3)?;
//!
//! ring.store_copy(&1)?;
//! ring.store_copy(&2)?;
//! ring.store_copy(&3)?;
//! assert_eq!(ring.store_copy(&4), Err(BufferError::Full));
//!
//! assert_eq!(ring.load_copy()?, 1);
//! assert_eq!(ring.size(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ### 2. Lock-free (`LockFreeRingBuffer`)
//! Multi-producer, multi-consumer. Slots are claimed by compare-and-swap on
//! the cursors; no operation ever waits on another thread:
//!
//! ```rust
//! use carousel::{
//!     LockFreeRingBuffer,
//!     traits::{RingConsumer, RingProducer},
//! };
//! use std::thread;
//!
//! # fn main() -> Result<(), carousel::BufferError> {
//! let ring = LockFreeRingBuffer::with_capacity(64)?;
//!
//! thread::scope(|s| {
//!     s.spawn(|| {
//!         for i in 0..32u32 {
//!             ring.store_move(i).unwrap();
//!         }
//!     });
//! });
//!
//! let mut drained = 0;
//! while ring.load_copy().is_ok() {
//!     drained += 1;
//! }
//! assert_eq!(drained, 32);
//! # Ok(())
//! # }
//! ```
//!
//! ### 3. Blocking (`BlockingRingBuffer`)
//! A mutex around the unsynchronized ring, plus condition variables so that
//! threads can sleep until data or space shows up:
//!
//! ```rust
//! use carousel::{
//!     BlockingRingBuffer,
//!     traits::{RingConsumer, RingMetrics, RingProducer},
//! };
//! use std::thread;
//!
//! # fn main() -> Result<(), carousel::BufferError> {
//! let ring = BlockingRingBuffer::with_capacity(8)?;
//!
//! thread::scope(|s| {
//!     s.spawn(|| {
//!         ring.wait_for_size(3).unwrap();
//!         let batch = ring.acquire_exclusivity();
//!         assert!(batch.size() >= 3);
//!     });
//!     for i in 0..3 {
//!         ring.store_move(i).unwrap();
//!     }
//! });
//! assert_eq!(ring.load_copy()?, 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Borrowed Storage
//!
//! Every flavor can store a reference to caller-owned data instead of a copy.
//! The ring is parameterized by the lifetime of those references, so the
//! compiler rejects any borrowed element that would outlive its owner:
//!
//! ```rust
//! use carousel::{Cell, RingBuffer};
//!
//! # fn main() -> Result<(), carousel::BufferError> {
//! let big = vec![0u8; 4096];
//! let mut ring = RingBuffer::with_capacity(2)?;
//!
//! ring.store_borrowed(&big)?;
//! match ring.load_move()? {
//!     Cell::Borrowed(bytes) => assert!(std::ptr::eq(bytes, &big)),
//!     Cell::Owned(_) => unreachable!(),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! The [`builder::ring`] entry point collects the settings shared by all
//! flavors and finishes in the one you want:
//!
//! ```rust
//! use carousel::builder::ring;
//!
//! # fn main() -> Result<(), carousel::BufferError> {
//! let blocking = ring::<u64>().capacity(16).bad_object(u64::MAX).blocking()?;
//! assert_eq!(blocking.pop(), u64::MAX); // empty: the sentinel comes back
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Fallible operations return [`BufferError`]:
//! - `BufferError::Full` - enqueue on a ring holding `capacity` elements
//! - `BufferError::Empty` - dequeue on an empty ring
//! - `BufferError::NotCreated` - the ring was never created, or was destroyed
//! - `BufferError::InvalidCapacity` - zero capacity, or `capacity + 1`
//!   overflows
//! - `BufferError::AllocationFailed` - the slot array could not be allocated
//! - `BufferError::ExceedsCapacity` - a wait for more than the ring can hold
//!
//! ## Logging
//!
//! Lifecycle events are emitted through [`tracing`] at `debug` level and wait
//! wakeups at `trace` level. The crate never installs a subscriber.
//!
//! ## Minimum Supported Rust Version (MSRV)
//!
//! Carousel requires Rust 1.88 or later.
#![deny(
    dead_code,
    missing_docs,
    unused_imports,
    unused_variables,
    unreachable_code,
    unused_must_use
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::type_complexity
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Mutex and condition-variable ring with blocking waits.
///
/// This module provides [`BlockingRingBuffer`], its RAII lock guards
/// ([`ExclusiveGuard`], [`LockWithSize`], [`LockWithCapacity`]) and the
/// stream-style chained API.
///
/// [`BlockingRingBuffer`]: blocking::BlockingRingBuffer
/// [`ExclusiveGuard`]: blocking::ExclusiveGuard
/// [`LockWithSize`]: blocking::LockWithSize
/// [`LockWithCapacity`]: blocking::LockWithCapacity
pub mod blocking;

/// Fluent configuration for all ring flavors.
pub mod builder;

/// Storage cell holding an owned value or a borrowed reference.
pub mod cell;

/// Cursor arithmetic over `capacity + 1` slots.
pub mod geometry;

/// Lock-free multi-producer multi-consumer ring.
///
/// This module provides [`LockFreeRingBuffer`], which claims slots with
/// compare-and-swap on 64-bit cursors and guards every slot with a sequence
/// stamp.
///
/// [`LockFreeRingBuffer`]: lockfree::LockFreeRingBuffer
pub mod lockfree;

/// Common traits for ring producers, consumers and size queries.
///
/// [`RingProducer`], [`RingConsumer`] and [`RingMetrics`] give the shared
/// surface of the thread-safe flavors; [`RingMetrics`] also covers the
/// unsynchronized one.
///
/// [`RingProducer`]: traits::RingProducer
/// [`RingConsumer`]: traits::RingConsumer
/// [`RingMetrics`]: traits::RingMetrics
pub mod traits;

/// Single-threaded ring, the reference implementation.
pub mod unsync;

pub use blocking::BlockingRingBuffer;
pub use cell::Cell;
pub use lockfree::LockFreeRingBuffer;
pub use unsync::RingBuffer;

use thiserror::Error;

/// Errors that can occur during ring operations.
///
/// None of these are fatal: a full or empty ring is an ordinary outcome and the
/// caller decides whether to retry, wait, or give up.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// The ring already holds `capacity` elements.
    ///
    /// Returned by every enqueue on a full ring. The ring is left untouched;
    /// moving enqueues hand the rejected value back alongside this error.
    #[error("ring buffer is full")]
    Full,

    /// The ring holds no element that can be dequeued.
    ///
    /// On the lock-free ring this is also returned while the only pending
    /// element has been claimed by a producer that has not published it yet.
    #[error("ring buffer is empty")]
    Empty,

    /// The ring has not been created, or has been destroyed.
    ///
    /// A not-created ring reports a capacity of zero and rejects every data
    /// operation until [`RingBuffer::create`] (or the equivalent on the other
    /// flavors) succeeds.
    #[error("ring buffer has not been created")]
    NotCreated,

    /// The requested capacity cannot be laid out.
    ///
    /// Capacities must be at least one, and `capacity + 1` slots must be
    /// addressable.
    #[error("invalid capacity: must be >= 1 and capacity + 1 must fit in usize")]
    InvalidCapacity,

    /// The slot array could not be allocated.
    #[error("failed to allocate {slots} ring slots")]
    AllocationFailed {
        /// Number of slots that were requested.
        slots: usize,
    },

    /// A wait asked for more free or occupied slots than the ring can ever
    /// have.
    #[error("requested {requested} slots from a ring of capacity {capacity}")]
    ExceedsCapacity {
        /// Slot count the caller waited for.
        requested: usize,
        /// Capacity of the ring at the time of the call.
        capacity: usize,
    },
}

/// Allocates `slots` vacant slots, reporting allocation failure instead of
/// aborting.
pub(crate) fn allocate_slots<S>(
    slots: usize,
    mut vacant: impl FnMut() -> S,
) -> Result<Vec<S>, BufferError> {
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(slots)
        .map_err(|_| BufferError::AllocationFailed { slots })?;
    storage.extend((0..slots).map(|_| vacant()));
    Ok(storage)
}
