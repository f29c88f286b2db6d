//! Architectural state for one emulated AArch64 core, plus the synchronous
//! exception transition.
//!
//! [`VCpuState`] holds the registers the memory subsystem needs: general
//! purpose registers, pc, PSTATE, and the EL1 system registers driving
//! stage-1 translation (SCTLR/TCR/TTBRx) and exception delivery
//! (ESR/FAR/ELR/SPSR/VBAR). Register *write* semantics (MSR/MRS decoding)
//! belong to the execution loop; the only mutation implemented here is
//! [`VCpuState::take_synchronous_exception`].

use bitflags::bitflags;

/// Number of general-purpose registers (X0–X30 plus SP/XZR slot).
pub const GP_REGISTERS: usize = 32;

/// SCTLR_EL1.M — stage-1 translation enable.
pub const SCTLR_EL1_M: u64 = 1 << 0;

/// PSTATE mode field (M[3:0]).
pub const PSTATE_MODE_MASK: u64 = 0b1111;
/// EL0 with SP_EL0.
pub const PSTATE_MODE_EL0T: u64 = 0b0000;
/// EL1 with SP_EL1 — the target mode for synchronous exception entry.
pub const PSTATE_MODE_EL1H: u64 = 0b0101;

/// ESR_EL1 layout: EC in [31:26], IL at [25], ISS in [24:0].
pub const ESR_EC_SHIFT: u32 = 26;
pub const ESR_IL_BIT: u64 = 1 << 25;
pub const ESR_ISS_MASK: u32 = (1 << 25) - 1;

bitflags! {
    /// PSTATE asynchronous-exception mask bits (the DAIF nibble plus the
    /// SError mask position used by exception entry).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PstateMask: u64 {
        /// FIQ mask.
        const F = 1 << 6;
        /// IRQ mask.
        const I = 1 << 7;
        /// SError mask.
        const A = 1 << 8;
        /// Debug mask.
        const D = 1 << 9;
    }
}

/// Synchronous exception classes (ESR_EL1.EC) this core can inject.
///
/// A closed enum keeps malformed 6-bit classes unrepresentable; the numeric
/// codes are the architected encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionClass {
    /// Unknown/uncategorized reason.
    Unknown = 0b00_0000,
    /// Instruction abort from a lower exception level.
    InstructionAbortLowerEl = 0b10_0000,
    /// Instruction abort without a change in exception level.
    InstructionAbort = 0b10_0001,
    /// Data abort from a lower exception level.
    DataAbortLowerEl = 0b10_0100,
    /// Data abort without a change in exception level.
    DataAbort = 0b10_0101,
    /// SP alignment fault.
    SpAlignment = 0b10_0110,
}

impl ExceptionClass {
    #[inline]
    pub fn code(self) -> u64 {
        self as u64
    }

    /// Data-abort classes record the faulting address in FAR_EL1.
    #[inline]
    pub fn is_data_abort(self) -> bool {
        matches!(self, Self::DataAbort | Self::DataAbortLowerEl)
    }
}

/// Architectural register state for one emulated core.
///
/// Aligned to the host cache-line size so that independent host threads,
/// each driving one core out of a contiguous array, never share a cache
/// line. That is a throughput measure, not a correctness requirement.
#[derive(Debug, Clone)]
#[repr(align(64))]
pub struct VCpuState {
    /// General-purpose registers X0–X31.
    pub x: [u64; GP_REGISTERS],
    /// Program counter.
    pub pc: u64,
    /// Process state (NZCV, DAIF, mode field).
    pub pstate: u64,

    /// System control register; bit 0 enables stage-1 translation.
    pub sctlr_el1: u64,
    /// Translation control: T0SZ[5:0], TG0[15:14], T1SZ[21:16], TG1[31:30].
    pub tcr_el1: u64,
    /// Table base for the lower (user) half of the address space.
    pub ttbr0_el1: u64,
    /// Table base for the upper (kernel) half of the address space.
    pub ttbr1_el1: u64,

    /// Exception syndrome.
    pub esr_el1: u64,
    /// Faulting address of the last data abort.
    pub far_el1: u64,
    /// Return address of the interrupted instruction stream.
    pub elr_el1: u64,
    /// PSTATE snapshot taken at exception entry.
    pub spsr_el1: u64,
    /// Exception vector table base. Carried but not vectored: redirecting
    /// pc into the vector table is the execution loop's job once the
    /// decoder exists.
    pub vbar_el1: u64,

    // EL0 counter/timer and thread-pointer registers; plain state for
    // device and timer models to read and update.
    pub cntfrq_el0: u64,
    pub cntvct_el0: u64,
    pub tpidr_el0: u64,
    pub tpidrro_el0: u64,
}

impl Default for VCpuState {
    fn default() -> Self {
        Self {
            x: [0; GP_REGISTERS],
            pc: 0,
            pstate: 0,
            sctlr_el1: 0,
            tcr_el1: 0,
            ttbr0_el1: 0,
            ttbr1_el1: 0,
            esr_el1: 0,
            far_el1: 0,
            elr_el1: 0,
            spsr_el1: 0,
            vbar_el1: 0,
            cntfrq_el0: 0,
            cntvct_el0: 0,
            tpidr_el0: 0,
            tpidrro_el0: 0,
        }
    }
}

impl VCpuState {
    /// Whether stage-1 translation is enabled (SCTLR_EL1.M).
    #[inline]
    pub fn translation_enabled(&self) -> bool {
        self.sctlr_el1 & SCTLR_EL1_M != 0
    }

    /// Take a synchronous exception to EL1.
    ///
    /// Models the architected transition on a synchronous fault: the
    /// interrupted pc and PSTATE are saved to ELR/SPSR, the syndrome is
    /// synthesized from the class and the 25-bit instruction-specific
    /// syndrome, the faulting address is recorded for data-abort classes,
    /// asynchronous exception sources are masked so the handler cannot be
    /// interrupted by a less important event, and the mode field moves to
    /// EL1h.
    ///
    /// By the time this runs the fault has already been classified; the
    /// only failure mode left is a malformed syndrome, which is a host bug.
    ///
    /// # Panics
    /// Panics if `iss` does not fit in 25 bits.
    pub fn take_synchronous_exception(
        &mut self,
        class: ExceptionClass,
        iss: u32,
        faulting_address: u64,
    ) {
        assert!(
            iss & !ESR_ISS_MASK == 0,
            "ISS 0x{iss:x} does not fit in 25 bits"
        );

        self.elr_el1 = self.pc;
        self.spsr_el1 = self.pstate;
        self.esr_el1 = (class.code() << ESR_EC_SHIFT) | ESR_IL_BIT | u64::from(iss);

        if class.is_data_abort() {
            self.far_el1 = faulting_address;
        }

        self.pstate |= (PstateMask::A | PstateMask::I | PstateMask::F).bits();
        self.pstate = (self.pstate & !PSTATE_MODE_MASK) | PSTATE_MODE_EL1H;
    }
}
