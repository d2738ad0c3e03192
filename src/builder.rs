use crate::{BlockingRingBuffer, BufferError, LockFreeRingBuffer, RingBuffer};
use std::sync::Arc;

/// Builder for creating rings of any flavor.
///
/// Collects the settings shared by all flavors and validates them when the
/// ring is built. Capacity has no default: building without calling
/// [`capacity`](Self::capacity) fails with [`BufferError::InvalidCapacity`].
///
/// # Examples
///
/// ```
/// use carousel::{
///     builder::ring,
///     traits::{RingConsumer, RingProducer},
/// };
///
/// # fn main() -> Result<(), carousel::BufferError> {
/// let shared = ring::<u32>().capacity(64).lock_free_shared()?;
///
/// let producer = std::sync::Arc::clone(&shared);
/// std::thread::spawn(move || producer.store_move(7).unwrap())
///     .join()
///     .unwrap();
/// assert_eq!(shared.load_copy()?, 7);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RingBuilder<T> {
    capacity: Option<usize>,
    bad_object: Option<T>,
}

impl<T> Default for RingBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RingBuilder<T> {
    /// Create a new ring builder
    pub const fn new() -> Self {
        Self {
            capacity: None,
            bad_object: None,
        }
    }

    /// Set the number of elements the ring holds
    #[must_use]
    pub const fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Set the sentinel a blocking ring returns from `pop` and `get` when it
    /// is empty. Ignored by the other flavors.
    #[must_use]
    pub fn bad_object(mut self, value: T) -> Self {
        self.bad_object = Some(value);
        self
    }

    /// Build an unsynchronized ring
    pub fn unsync<'a>(self) -> Result<RingBuffer<'a, T>, BufferError> {
        RingBuffer::with_capacity(self.validated()?)
    }

    /// Build a lock-free ring
    pub fn lock_free<'a>(self) -> Result<LockFreeRingBuffer<'a, T>, BufferError> {
        LockFreeRingBuffer::with_capacity(self.validated()?)
    }

    /// Build a lock-free ring behind an `Arc`, ready to hand to threads
    pub fn lock_free_shared(self) -> Result<Arc<LockFreeRingBuffer<'static, T>>, BufferError> {
        Ok(Arc::new(self.lock_free()?))
    }

    /// Build a blocking ring, installing the bad object if one was set
    pub fn blocking<'a>(self) -> Result<BlockingRingBuffer<'a, T>, BufferError> {
        let capacity = self.validated()?;
        let ring = BlockingRingBuffer::with_capacity(capacity)?;
        if let Some(value) = self.bad_object {
            ring.set_bad_object(value);
        }
        Ok(ring)
    }

    /// Build a blocking ring behind an `Arc`, ready to hand to threads
    pub fn blocking_shared(self) -> Result<Arc<BlockingRingBuffer<'static, T>>, BufferError> {
        Ok(Arc::new(self.blocking()?))
    }

    const fn validated(&self) -> Result<usize, BufferError> {
        match self.capacity {
            Some(capacity) => Ok(capacity),
            None => Err(BufferError::InvalidCapacity),
        }
    }
}

/// Entry point for configuring a ring of `T`.
///
/// # Examples
///
/// ```
/// use carousel::{builder::ring, traits::RingMetrics};
///
/// # fn main() -> Result<(), carousel::BufferError> {
/// let ring = ring::<String>().capacity(8).unsync()?;
/// assert_eq!(ring.capacity(), 8);
/// # Ok(())
/// # }
/// ```
pub const fn ring<T>() -> RingBuilder<T> {
    RingBuilder::new()
}
