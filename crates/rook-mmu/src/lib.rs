//! Stage-1 address translation: guest virtual → guest physical.
//!
//! [`translate`] models the AArch64 stage-1 MMU as configured by
//! SCTLR_EL1/TCR_EL1/TTBRx_EL1. With translation disabled it is the
//! identity function, matching the core's reset-time behavior. With
//! translation enabled it classifies and validates the virtual address,
//! then walks the guest-memory-resident translation tables level by level,
//! fetching 8-byte descriptors through the [`GuestMemory`] accessors.
//!
//! Failures split along the workspace-wide line: anything the guest can
//! cause (unrepresentable address, invalid descriptor, tables pointing
//! outside RAM) comes back as a [`TranslationFault`] for the caller to turn
//! into a synchronous exception; configurations the implementation does not
//! support (reserved granule encodings, block descriptors) are host
//! invariant violations and panic. The walk has no observable side effects
//! on failure.

use rook_cpu_core::VCpuState;
use rook_mem::GuestMemory;
use thiserror::Error;

pub const GRANULE_4K: u64 = 1 << 12;
pub const GRANULE_16K: u64 = 1 << 14;
pub const GRANULE_64K: u64 = 1 << 16;

/// log2 of the 8-byte translation table descriptor.
const DESC_SHIFT: u32 = 3;
/// Deepest translation table level.
const FINAL_LEVEL: u8 = 3;

const TCR_T0SZ_SHIFT: u32 = 0;
const TCR_TG0_SHIFT: u32 = 14;
const TCR_T1SZ_SHIFT: u32 = 16;
const TCR_TG1_SHIFT: u32 = 30;
const TCR_TXSZ_MASK: u64 = 0x3F;
const TCR_TG_MASK: u64 = 0b11;

/// Guest-induced translation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TranslationFault {
    /// The virtual address is not representable in the configured
    /// `va_bits`-wide space (top bits are not the required zero /
    /// sign-extension + tag pattern).
    #[error("address size fault: gva 0x{gva:x} not valid in a {va_bits}-bit space")]
    AddressSize { gva: u64, va_bits: u32 },
    /// A descriptor with bit 0 clear terminated the walk.
    #[error("translation fault: invalid level-{level} descriptor for gva 0x{gva:x}")]
    Invalid { gva: u64, level: u8 },
    /// A descriptor fetch left guest RAM: the guest pointed a table base at
    /// memory that does not exist.
    #[error("translation fault: level-{level} table walk for gva 0x{gva:x} left guest memory at gpa 0x{gpa:x}")]
    WalkAccess { gva: u64, gpa: u64, level: u8 },
}

/// Which half of the virtual address space an address belongs to, and hence
/// which TTBR roots its walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Half {
    Lower,
    Upper,
}

/// Decode the granule size for one half from TCR_EL1.
///
/// TG0 and TG1 use *different* encodings; the asymmetry is architectural.
/// A reserved encoding means the host configured a translation regime it
/// cannot model, which is a bug, not a guest fault.
fn granule_size(tcr: u64, half: Half) -> u64 {
    match half {
        Half::Lower => match (tcr >> TCR_TG0_SHIFT) & TCR_TG_MASK {
            0b00 => GRANULE_4K,
            0b01 => GRANULE_64K,
            0b10 => GRANULE_16K,
            tg0 => panic!("reserved TG0 encoding {tg0:#04b} in TCR_EL1"),
        },
        Half::Upper => match (tcr >> TCR_TG1_SHIFT) & TCR_TG_MASK {
            0b01 => GRANULE_16K,
            0b10 => GRANULE_4K,
            0b11 => GRANULE_64K,
            tg1 => panic!("reserved TG1 encoding {tg1:#04b} in TCR_EL1"),
        },
    }
}

/// Mask selecting every virtual-address bit at or above `va_bits`.
#[inline]
fn top_bits_mask(va_bits: u32) -> u64 {
    if va_bits >= u64::BITS {
        0
    } else {
        u64::MAX << va_bits
    }
}

/// Translate a guest virtual address to a guest physical address for one
/// core.
pub fn translate(
    vcpu: &VCpuState,
    mem: &GuestMemory,
    gva: u64,
) -> Result<u64, TranslationFault> {
    // Reset-time / early-boot behavior: translation off is the identity.
    if !vcpu.translation_enabled() {
        return Ok(gva);
    }

    // Bit 63 selects the half. The full top-bits validation below catches
    // any address whose upper bits disagree with its half.
    let half = if gva >> 63 != 0 {
        Half::Upper
    } else {
        Half::Lower
    };

    // TxSZ is "bits stripped from 64": a value of N configures a
    // (64 - N)-bit space whose top N bits must be zero (lower half) or the
    // sign-extension pattern (upper half). This must hold before any table
    // access.
    let (txsz, table_root) = match half {
        Half::Lower => ((vcpu.tcr_el1 >> TCR_T0SZ_SHIFT) & TCR_TXSZ_MASK, vcpu.ttbr0_el1),
        Half::Upper => ((vcpu.tcr_el1 >> TCR_T1SZ_SHIFT) & TCR_TXSZ_MASK, vcpu.ttbr1_el1),
    };
    let va_bits = u64::BITS - txsz as u32;
    let top_mask = top_bits_mask(va_bits);

    let table_base = match half {
        Half::Lower => {
            if gva & top_mask != 0 {
                return Err(TranslationFault::AddressSize { gva, va_bits });
            }
            table_root
        }
        Half::Upper => {
            // Upper-half addresses must be sign-extended all-ones and must
            // agree with the tag bits of TTBR1; the remaining TTBR1 bits
            // are the table base.
            let gva_tag = gva & top_mask;
            if gva_tag != top_mask || gva_tag != table_root & top_mask {
                return Err(TranslationFault::AddressSize { gva, va_bits });
            }
            table_root & !top_mask
        }
    };

    walk(mem, gva, va_bits, granule_size(vcpu.tcr_el1, half), table_base)
}

/// The multi-level table walk.
///
/// A table is one granule of 8-byte descriptors, so the per-level index
/// width is `log2(granule) - 3` and the level shifts stack on top of the
/// page-offset bits. The starting level is the highest one needed to cover
/// `va_bits`.
fn walk(
    mem: &GuestMemory,
    gva: u64,
    va_bits: u32,
    granule: u64,
    mut table_base: u64,
) -> Result<u64, TranslationFault> {
    let offset_bits = granule.trailing_zeros();
    let index_bits = offset_bits - DESC_SHIFT;

    let l3_shift = offset_bits;
    let l2_shift = l3_shift + index_bits;
    let l1_shift = l2_shift + index_bits;
    let l0_shift = l1_shift + index_bits;

    // A 4KB granule supports a four-level walk from L0; 16KB and 64KB
    // granules top out at L1.
    let start_level: u8 = if granule == GRANULE_4K {
        if va_bits > l0_shift {
            0
        } else if va_bits > l1_shift {
            1
        } else {
            2
        }
    } else if va_bits > l1_shift {
        1
    } else {
        2
    };

    let index_mask = (1u64 << index_bits) - 1;
    let offset_mask = granule - 1;
    let page_offset = gva & offset_mask;

    for level in start_level..=FINAL_LEVEL {
        let shift = match level {
            0 => l0_shift,
            1 => l1_shift,
            2 => l2_shift,
            3 => l3_shift,
            _ => unreachable!(),
        };
        let index = (gva >> shift) & index_mask;
        // The table base comes straight from a guest-writable register, so
        // the descriptor address must not be allowed to wrap.
        let desc_gpa = table_base
            .checked_add(index << DESC_SHIFT)
            .ok_or(TranslationFault::WalkAccess {
                gva,
                gpa: table_base,
                level,
            })?;

        let descriptor =
            mem.read_u64(desc_gpa)
                .map_err(|_| TranslationFault::WalkAccess {
                    gva,
                    gpa: desc_gpa,
                    level,
                })?;

        // Bit 0 is the valid bit on every descriptor.
        if descriptor & 0b1 == 0 {
            return Err(TranslationFault::Invalid { gva, level });
        }

        match (level, descriptor & 0b11) {
            // Final level: a page descriptor carries the physical page base
            // above the offset bits.
            (FINAL_LEVEL, 0b11) => return Ok((descriptor & !offset_mask) | page_offset),
            // Intermediate level: a table descriptor points at the next
            // table.
            (_, 0b11) => table_base = descriptor & !offset_mask,
            // Block descriptors terminate the walk early with a large
            // contiguous mapping. The configuration demands support this
            // implementation does not provide; resolve before any guest
            // relies on block mappings.
            (_, 0b01) => panic!(
                "unsupported block descriptor at level {level} for gva 0x{gva:x}"
            ),
            _ => unreachable!(),
        }
    }

    unreachable!("table walk ran past level {FINAL_LEVEL}")
}
