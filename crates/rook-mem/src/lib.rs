//! Guest physical memory: a flat RAM view carved from a host arena.
//!
//! The guest's physical address space is one contiguous block; a guest
//! physical address (GPA) is always a byte offset into that block, never a
//! pointer. This flat model is the foundational assumption of the whole
//! memory subsystem: translation produces offsets, MMIO dispatch filters
//! offsets, and whatever falls through lands here.
//!
//! Accessors come in one family per width (8/16/32/64 bits). Every access is
//! bounds-checked, widths of two bytes and up are natural-alignment-checked,
//! and values are stored little-endian (the guest is little-endian; byte
//! order is corrected exactly when the host is big-endian). A failed access
//! performs no mutation and a successful one is a single contiguous copy, so
//! torn values are impossible.

use rook_arena::{Arena, ArenaSlice};
use thiserror::Error;

/// Guest-induced memory access faults.
///
/// These are expected, architecture-level conditions (the guest touched
/// memory it shouldn't have, or misaligned an access) — they are reported to
/// the caller for conversion into a synchronous exception, never treated as
/// host errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemFault {
    /// The access extends past the end of guest RAM.
    #[error("guest memory access out of bounds: gpa=0x{gpa:x} len={len} size=0x{size:x}")]
    Boundary { gpa: u64, len: usize, size: u64 },
    /// The access is not aligned to its own width.
    #[error("unaligned guest memory access: gpa=0x{gpa:x} width={width}")]
    Unaligned { gpa: u64, width: usize },
}

pub type MemResult<T> = Result<T, MemFault>;

/// A flat block of guest physical RAM.
///
/// Construction consumes an [`Arena`] and carves its entire remaining
/// capacity as RAM; base and size are fixed for the lifetime of the value.
/// There is no way to re-point or grow a `GuestMemory` after creation.
pub struct GuestMemory {
    arena: Arena,
    ram: ArenaSlice,
}

impl GuestMemory {
    /// Build guest RAM out of everything `arena` has left.
    pub fn create(mut arena: Arena) -> Self {
        let ram = arena.alloc_rest();
        Self { arena, ram }
    }

    /// Size of guest physical RAM in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.ram.len() as u64
    }

    /// Validate an access of `len` bytes at `gpa` with the given alignment
    /// requirement, returning the RAM-local offset.
    ///
    /// Alignment is checked first so a misaligned access near the end of RAM
    /// reports `Unaligned`, not `Boundary`.
    #[inline]
    fn check_access(&self, gpa: u64, len: usize, align: usize) -> MemResult<usize> {
        if align > 1 && gpa & (align as u64 - 1) != 0 {
            return Err(MemFault::Unaligned { gpa, width: align });
        }
        let size = self.size();
        let end = gpa.checked_add(len as u64).ok_or(MemFault::Boundary {
            gpa,
            len,
            size,
        })?;
        if end > size {
            return Err(MemFault::Boundary { gpa, len, size });
        }
        // In-bounds implies the offset fits in usize: ram.len() is a usize.
        Ok(gpa as usize)
    }

    pub fn read_u8(&self, gpa: u64) -> MemResult<u8> {
        let off = self.check_access(gpa, 1, 1)?;
        Ok(self.arena.bytes(self.ram)[off])
    }

    pub fn read_u16(&self, gpa: u64) -> MemResult<u16> {
        let off = self.check_access(gpa, 2, 2)?;
        let ram = self.arena.bytes(self.ram);
        let mut buf = [0u8; 2];
        buf.copy_from_slice(&ram[off..off + 2]);
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&self, gpa: u64) -> MemResult<u32> {
        let off = self.check_access(gpa, 4, 4)?;
        let ram = self.arena.bytes(self.ram);
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&ram[off..off + 4]);
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&self, gpa: u64) -> MemResult<u64> {
        let off = self.check_access(gpa, 8, 8)?;
        let ram = self.arena.bytes(self.ram);
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&ram[off..off + 8]);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn write_u8(&mut self, gpa: u64, value: u8) -> MemResult<()> {
        let off = self.check_access(gpa, 1, 1)?;
        self.arena.bytes_mut(self.ram)[off] = value;
        Ok(())
    }

    pub fn write_u16(&mut self, gpa: u64, value: u16) -> MemResult<()> {
        let off = self.check_access(gpa, 2, 2)?;
        self.arena.bytes_mut(self.ram)[off..off + 2].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_u32(&mut self, gpa: u64, value: u32) -> MemResult<()> {
        let off = self.check_access(gpa, 4, 4)?;
        self.arena.bytes_mut(self.ram)[off..off + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_u64(&mut self, gpa: u64, value: u64) -> MemResult<()> {
        let off = self.check_access(gpa, 8, 8)?;
        self.arena.bytes_mut(self.ram)[off..off + 8].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Byte-granular bulk read, no alignment requirement.
    ///
    /// Used by the physical access path when an MMIO lookup falls through to
    /// RAM.
    pub fn read_bytes(&self, gpa: u64, dst: &mut [u8]) -> MemResult<()> {
        let off = self.check_access(gpa, dst.len(), 1)?;
        dst.copy_from_slice(&self.arena.bytes(self.ram)[off..off + dst.len()]);
        Ok(())
    }

    /// Byte-granular bulk write, no alignment requirement.
    pub fn write_bytes(&mut self, gpa: u64, src: &[u8]) -> MemResult<()> {
        let off = self.check_access(gpa, src.len(), 1)?;
        self.arena.bytes_mut(self.ram)[off..off + src.len()].copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
