//! Memory-mapped I/O dispatch.
//!
//! A [`MmioDatabase`] is the routing table between guest physical addresses
//! and virtual-device handlers. It holds two parallel, index-aligned
//! sequences — address ranges sorted by base, and handler pairs — in a
//! structure-of-arrays layout so the hot dispatch path binary-searches the
//! compact ranges vector and only touches a handler once a range has
//! matched.
//!
//! The database is populated once, during single-threaded machine bring-up,
//! and is read-only for the rest of execution; there is no runtime
//! insert/remove.

use thiserror::Error;

/// A half-open guest physical address range `[gpa_base, gpa_end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmioRange {
    pub gpa_base: u64,
    pub gpa_end: u64,
}

impl MmioRange {
    pub fn new(gpa_base: u64, gpa_end: u64) -> Self {
        Self { gpa_base, gpa_end }
    }

    #[inline]
    pub fn contains(&self, gpa: u64) -> bool {
        self.gpa_base <= gpa && gpa < self.gpa_end
    }

    #[inline]
    fn overlaps(&self, other: &MmioRange) -> bool {
        self.gpa_base < other.gpa_end && other.gpa_base < self.gpa_end
    }
}

/// Read handler: fill `data` with the device's response to a read at `gpa`.
pub type ReadFn = Box<dyn FnMut(u64, &mut [u8])>;
/// Write handler: consume the bytes the guest wrote to `gpa`.
pub type WriteFn = Box<dyn FnMut(u64, &[u8])>;

/// The handler pair for one device region.
///
/// Either direction may be absent: a device register window can be
/// read-only or write-only, and an access in the missing direction is
/// refused by the dispatcher without consulting the device.
///
/// Device state travels inside the closures; there is no separate context
/// argument.
#[derive(Default)]
pub struct MmioHandler {
    pub read: Option<ReadFn>,
    pub write: Option<WriteFn>,
}

impl MmioHandler {
    pub fn read_write(read: ReadFn, write: WriteFn) -> Self {
        Self {
            read: Some(read),
            write: Some(write),
        }
    }

    pub fn read_only(read: ReadFn) -> Self {
        Self {
            read: Some(read),
            write: None,
        }
    }

    pub fn write_only(write: WriteFn) -> Self {
        Self {
            read: None,
            write: Some(write),
        }
    }
}

/// Errors registering a region. Registration happens during machine
/// bring-up only; the caller treats any of these as a fatal configuration
/// bug, not a runtime condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MmioRegisterError {
    #[error(
        "MMIO range [0x{new_base:x}, 0x{new_end:x}) overlaps registered range [0x{existing_base:x}, 0x{existing_end:x})"
    )]
    AddressOverlap {
        new_base: u64,
        new_end: u64,
        existing_base: u64,
        existing_end: u64,
    },
    #[error("MMIO range [0x{gpa_base:x}, 0x{gpa_end:x}) is empty")]
    EmptyRange { gpa_base: u64, gpa_end: u64 },
}

/// Outcome of routing one guest physical access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmioDispatch {
    /// A device handler consumed the access.
    Handled,
    /// No registered region contains the address; the caller falls through
    /// to plain RAM.
    NotHandled,
    /// A region contains the address but has no handler for this direction.
    AccessDenied,
}

/// Sorted, non-overlapping collection of device regions plus the dispatcher
/// that classifies a guest physical address as "device" or "RAM".
#[derive(Default)]
pub struct MmioDatabase {
    /// Sorted by `gpa_base`; the sole target of the dispatch binary search.
    ranges: Vec<MmioRange>,
    /// Parallel to `ranges`, index-aligned.
    handlers: Vec<MmioHandler>,
}

impl MmioDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region_count(&self) -> usize {
        self.ranges.len()
    }

    /// Registered ranges, sorted by base. Exposed for boot-time diagnostics
    /// and tests.
    pub fn ranges(&self) -> &[MmioRange] {
        &self.ranges
    }

    /// Register a device region.
    ///
    /// The insertion point that keeps `ranges` sorted is found by binary
    /// search; because the sequence is always sorted and non-overlapping,
    /// checking the immediate left and right neighbors suffices to detect a
    /// conflict with *any* existing region. On error nothing is mutated.
    pub fn register(
        &mut self,
        range: MmioRange,
        handler: MmioHandler,
    ) -> Result<(), MmioRegisterError> {
        if range.gpa_end <= range.gpa_base {
            return Err(MmioRegisterError::EmptyRange {
                gpa_base: range.gpa_base,
                gpa_end: range.gpa_end,
            });
        }

        let i = self
            .ranges
            .partition_point(|r| r.gpa_base < range.gpa_base);

        for neighbor in [i.checked_sub(1), Some(i)].into_iter().flatten() {
            if let Some(existing) = self.ranges.get(neighbor) {
                if existing.overlaps(&range) {
                    return Err(MmioRegisterError::AddressOverlap {
                        new_base: range.gpa_base,
                        new_end: range.gpa_end,
                        existing_base: existing.gpa_base,
                        existing_end: existing.gpa_end,
                    });
                }
            }
        }

        tracing::debug!(
            target: "mmio",
            base = format_args!("0x{:x}", range.gpa_base),
            end = format_args!("0x{:x}", range.gpa_end),
            read = handler.read.is_some(),
            write = handler.write.is_some(),
            "registered MMIO region"
        );

        self.ranges.insert(i, range);
        self.handlers.insert(i, handler);
        Ok(())
    }

    /// Find the index of the region containing `gpa`, if any.
    ///
    /// The first range whose base exceeds `gpa` is found by binary search;
    /// the only possible containing range is the one immediately before
    /// that point.
    #[inline]
    fn lookup(&self, gpa: u64) -> Option<usize> {
        let i = self.ranges.partition_point(|r| r.gpa_base <= gpa);
        let candidate = i.checked_sub(1)?;
        self.ranges[candidate].contains(gpa).then_some(candidate)
    }

    /// Route a guest physical read.
    pub fn dispatch_read(&mut self, gpa: u64, data: &mut [u8]) -> MmioDispatch {
        let Some(i) = self.lookup(gpa) else {
            return MmioDispatch::NotHandled;
        };
        match self.handlers[i].read.as_mut() {
            None => MmioDispatch::AccessDenied,
            Some(read) => {
                read(gpa, data);
                MmioDispatch::Handled
            }
        }
    }

    /// Route a guest physical write.
    pub fn dispatch_write(&mut self, gpa: u64, data: &[u8]) -> MmioDispatch {
        let Some(i) = self.lookup(gpa) else {
            return MmioDispatch::NotHandled;
        };
        match self.handlers[i].write.as_mut() {
            None => MmioDispatch::AccessDenied,
            Some(write) => {
                write(gpa, data);
                MmioDispatch::Handled
            }
        }
    }
}
