//! Bump-style host memory arena.
//!
//! All host-side backing storage for a virtual machine instance (guest RAM,
//! per-core structures) is carved out of a small number of arenas, each a
//! single contiguous reservation. Allocations are monotonic: nothing is ever
//! freed individually, and the whole arena is reclaimed at once with
//! [`Arena::reset`] or released when the arena is dropped.
//!
//! Allocations are handed out as [`ArenaSlice`] handles (offset + length)
//! rather than pointers; the arena resolves a handle to bytes on demand.
//! Exceeding the reservation is a host bug and panics — callers size their
//! arenas up front.

use thiserror::Error;

/// Byte pattern the reservation is filled with on creation and on
/// [`Arena::reset`]. Reads of never-written memory show up as repeated
/// `0xAA` instead of silent zeroes.
pub const POISON_BYTE: u8 = 0xAA;

/// The host refused the arena's one-time memory reservation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to reserve {capacity} bytes of host memory for arena")]
pub struct ReserveError {
    pub capacity: usize,
}

/// A bounds-known carve-out of an [`Arena`].
///
/// Handles stay valid across [`Arena::reset`] (they still resolve to bytes
/// within the reservation) but the owner is responsible for not reusing
/// handles that logically belong to a previous generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaSlice {
    offset: usize,
    len: usize,
}

impl ArenaSlice {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Fixed-capacity bump allocator over one contiguous host reservation.
#[derive(Debug)]
pub struct Arena {
    data: Box<[u8]>,
    size: usize,
}

impl Arena {
    /// Reserve `capacity` bytes from the host in one call and poison-fill
    /// the region.
    ///
    /// Reservation failure is recoverable: the caller decides whether a
    /// machine can come up without this arena.
    pub fn reserve(capacity: usize) -> Result<Self, ReserveError> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| ReserveError { capacity })?;
        data.resize(capacity, POISON_BYTE);
        Ok(Self {
            data: data.into_boxed_slice(),
            size: 0,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes consumed by allocations so far.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.size
    }

    /// Allocate `len` bytes.
    ///
    /// # Panics
    /// Panics if `len` exceeds the remaining capacity. Arena exhaustion is a
    /// host sizing bug, never a runtime condition to recover from.
    pub fn alloc(&mut self, len: usize) -> ArenaSlice {
        assert!(
            len <= self.remaining(),
            "arena overflow: requested {len} bytes, {} of {} remaining",
            self.remaining(),
            self.capacity(),
        );
        let slice = ArenaSlice {
            offset: self.size,
            len,
        };
        self.size += len;
        slice
    }

    /// Allocate storage for `count` elements of `T`, without size-in-bytes
    /// arithmetic at the call site.
    ///
    /// # Panics
    /// Panics if the byte size overflows or exceeds the remaining capacity.
    pub fn alloc_array<T>(&mut self, count: usize) -> ArenaSlice {
        let len = count
            .checked_mul(core::mem::size_of::<T>())
            .unwrap_or_else(|| panic!("arena allocation size overflow: {count} elements"));
        self.alloc(len)
    }

    /// Allocate the arena's entire remaining capacity.
    pub fn alloc_rest(&mut self) -> ArenaSlice {
        let rest = self.remaining();
        self.alloc(rest)
    }

    /// Resolve a carve-out to its bytes.
    #[inline]
    pub fn bytes(&self, slice: ArenaSlice) -> &[u8] {
        &self.data[slice.offset..slice.offset + slice.len]
    }

    /// Resolve a carve-out to its bytes, mutably.
    #[inline]
    pub fn bytes_mut(&mut self, slice: ArenaSlice) -> &mut [u8] {
        &mut self.data[slice.offset..slice.offset + slice.len]
    }

    /// Reclaim every allocation at once and re-poison the region.
    ///
    /// Used between independent runs; outstanding [`ArenaSlice`] handles
    /// become logically stale.
    pub fn reset(&mut self) {
        self.size = 0;
        self.data.fill(POISON_BYTE);
    }
}
