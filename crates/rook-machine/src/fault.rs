//! Guest fault classification and ESR syndrome synthesis.
//!
//! Every failure the memory pipeline can produce funnels into one
//! [`GuestFault`], and this module owns the mapping onto the data-abort ISS
//! encoding (the DFSC subset this core can actually produce, plus the WnR
//! direction bit). Keeping the ESR layout here leaves the translator and
//! the memory crates free of syndrome details.

use rook_mem::MemFault;
use rook_mmu::TranslationFault;
use thiserror::Error;

/// Direction of the faulting access; sets the ISS WnR bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// ISS bit 6: write-not-read.
pub const ISS_WNR: u32 = 1 << 6;

// DFSC encodings (ISS bits [5:0]) for the fault conditions this core
// produces.
const DFSC_ADDRESS_SIZE_L0: u32 = 0b00_0000;
const DFSC_TRANSLATION_L0: u32 = 0b00_0100;
const DFSC_PERMISSION_L3: u32 = 0b00_1111;
const DFSC_EXTERNAL: u32 = 0b01_0000;
const DFSC_EXTERNAL_WALK_L0: u32 = 0b01_0100;
const DFSC_ALIGNMENT: u32 = 0b10_0001;

/// A guest-induced failure anywhere along the
/// translate → dispatch → RAM pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GuestFault {
    #[error(transparent)]
    Translation(TranslationFault),
    #[error(transparent)]
    Memory(MemFault),
    /// A registered MMIO region refused the access direction.
    #[error("MMIO access denied at gpa 0x{gpa:x}")]
    MmioAccessDenied { gpa: u64 },
}

impl GuestFault {
    /// Synthesize the 25-bit instruction-specific syndrome for a data
    /// abort caused by this fault.
    pub(crate) fn syndrome(&self, kind: AccessKind) -> u32 {
        let dfsc = match *self {
            GuestFault::Translation(TranslationFault::AddressSize { .. }) => DFSC_ADDRESS_SIZE_L0,
            GuestFault::Translation(TranslationFault::Invalid { level, .. }) => {
                DFSC_TRANSLATION_L0 + u32::from(level)
            }
            GuestFault::Translation(TranslationFault::WalkAccess { level, .. }) => {
                DFSC_EXTERNAL_WALK_L0 + u32::from(level)
            }
            GuestFault::Memory(MemFault::Unaligned { .. }) => DFSC_ALIGNMENT,
            GuestFault::Memory(MemFault::Boundary { .. }) => DFSC_EXTERNAL,
            GuestFault::MmioAccessDenied { .. } => DFSC_PERMISSION_L3,
        };

        match kind {
            AccessKind::Read => dfsc,
            AccessKind::Write => dfsc | ISS_WNR,
        }
    }
}
