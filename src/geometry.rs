use crate::BufferError;

/// Index arithmetic shared by every ring variant.
///
/// A ring of `capacity` elements is laid out over `capacity + 1` slots. The
/// extra slot is never occupied, which is what separates the two boundary
/// states using nothing but the two cursors:
///
/// ```text
/// empty:  head == tail
/// full:   advance(tail) == head
/// ```
///
/// Cursors are plain indices in `0..slots`; advancing past the last slot wraps
/// to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGeometry {
    slots: usize,
}

impl RingGeometry {
    /// Geometry for a ring holding at most `capacity` elements.
    pub const fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::InvalidCapacity);
        }
        match capacity.checked_add(1) {
            Some(slots) => Ok(Self { slots }),
            None => Err(BufferError::InvalidCapacity),
        }
    }

    /// Number of elements the ring can hold.
    pub const fn capacity(&self) -> usize {
        self.slots - 1
    }

    /// Number of backing slots, always `capacity + 1`.
    pub const fn slots(&self) -> usize {
        self.slots
    }

    /// Moves a cursor forward by one slot.
    #[inline]
    pub const fn advance(&self, cursor: usize) -> usize {
        let next = cursor + 1;
        if next == self.slots { 0 } else { next }
    }

    /// `true` when no slot between `head` and `tail` is occupied.
    #[inline]
    pub const fn is_empty(&self, head: usize, tail: usize) -> bool {
        head == tail
    }

    /// `true` when writing at `tail` would run into `head`.
    #[inline]
    pub const fn is_full(&self, head: usize, tail: usize) -> bool {
        self.advance(tail) == head
    }

    /// Occupied slots between the cursors.
    #[inline]
    pub const fn len(&self, head: usize, tail: usize) -> usize {
        if tail >= head {
            tail - head
        } else {
            self.slots - head + tail
        }
    }

    /// Slot index for a monotonically increasing position.
    ///
    /// The lock-free ring keeps 64-bit positions instead of wrapped cursors so
    /// that each lap of a slot is distinguishable.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index_of(&self, position: u64) -> usize {
        // slots fits in usize, so the remainder does too
        (position % self.slots as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_capacity() {
        assert_eq!(RingGeometry::new(0), Err(BufferError::InvalidCapacity));
        assert_eq!(RingGeometry::new(usize::MAX), Err(BufferError::InvalidCapacity));
    }

    #[test]
    fn one_spare_slot() {
        let g = RingGeometry::new(3).unwrap();
        assert_eq!(g.capacity(), 3);
        assert_eq!(g.slots(), 4);
    }

    #[test]
    fn advance_wraps_at_slot_count() {
        let g = RingGeometry::new(3).unwrap();
        assert_eq!(g.advance(0), 1);
        assert_eq!(g.advance(2), 3);
        assert_eq!(g.advance(3), 0);
    }

    #[test]
    fn full_and_empty_are_distinct() {
        let g = RingGeometry::new(3).unwrap();

        assert!(g.is_empty(0, 0));
        assert!(!g.is_full(0, 0));

        // tail one behind head
        assert!(g.is_full(2, 1));
        // wraparound: head at the start, tail at the last slot
        assert!(g.is_full(0, 3));
        assert!(!g.is_empty(0, 3));
    }

    #[test]
    fn len_across_the_seam() {
        let g = RingGeometry::new(3).unwrap();
        assert_eq!(g.len(0, 0), 0);
        assert_eq!(g.len(0, 3), 3);
        assert_eq!(g.len(3, 1), 2);
        assert_eq!(g.len(2, 1), 3);
    }

    #[test]
    fn index_of_follows_laps() {
        let g = RingGeometry::new(2).unwrap();
        let seen: Vec<usize> = (0..7).map(|p| g.index_of(p)).collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
    }
}
