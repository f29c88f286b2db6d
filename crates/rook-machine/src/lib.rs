//! Machine assembly: guest RAM, the MMIO database, and the per-core CPU
//! state, wired into one memory access pipeline.
//!
//! Every guest data access follows the same path: stage-1 translation, then
//! MMIO dispatch, then flat RAM. MMIO is consulted *before* RAM on purpose —
//! device windows may shadow physical addresses that RAM would otherwise
//! satisfy, and a device claim always wins. Any guest-induced failure along
//! the path is converted into a synchronous data abort on the issuing core
//! before the error is returned, so callers observe architectural state that
//! already reflects the fault.

mod fault;
mod ref_board;

pub use fault::{AccessKind, GuestFault, ISS_WNR};
pub use ref_board::{BOARD_ID, BOARD_ID_BASE, BOARD_ID_SIZE, UART_BASE, UART_SIZE};

use rook_arena::Arena;
use rook_cpu_core::{
    ExceptionClass, VCpuState, PSTATE_MODE_EL0T, PSTATE_MODE_MASK,
};
use rook_mem::GuestMemory;
use rook_mmio::{MmioDatabase, MmioDispatch, MmioHandler, MmioRange};
use thiserror::Error;

/// Board targets this workspace can assemble. A closed enum dispatched by
/// match: adding a target means adding a variant and its registration arm,
/// and the compiler walks every construction site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The built-in reference board (UART + board-ID block).
    RefBoard,
}

/// Boot-time machine description.
#[derive(Debug, Clone, Copy)]
pub struct MachineConfig {
    pub target: Target,
    /// Guest physical RAM size in bytes.
    pub ram_bytes: usize,
    /// Number of cores; must be at least one.
    pub cores: usize,
}

/// Host-side failures bringing a machine up. Guest-induced conditions never
/// appear here.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("failed to reserve guest RAM: {0}")]
    RamReservation(#[from] rook_arena::ReserveError),
}

/// One assembled guest machine.
pub struct Machine {
    mem: GuestMemory,
    mmio: MmioDatabase,
    vcpus: Box<[VCpuState]>,
}

impl Machine {
    /// Assemble a machine: reserve RAM, register the target's devices, and
    /// reset every core.
    ///
    /// RAM reservation can fail on a constrained host and is reported as an
    /// error. A device-region conflict, by contrast, is a configuration bug
    /// in the target definition and panics.
    ///
    /// # Panics
    /// Panics if `config.cores` is zero or the target's MMIO layout
    /// overlaps itself.
    pub fn new(config: MachineConfig) -> Result<Self, MachineError> {
        assert!(config.cores > 0, "machine requires at least one core");

        let arena = Arena::reserve(config.ram_bytes)?;
        let mem = GuestMemory::create(arena);

        let mut mmio = MmioDatabase::new();
        match config.target {
            Target::RefBoard => ref_board::register(&mut mmio),
        }

        let vcpus = vec![VCpuState::default(); config.cores].into_boxed_slice();

        tracing::info!(
            target: "machine",
            machine_target = ?config.target,
            ram = mem.size(),
            cores = vcpus.len(),
            mmio_regions = mmio.region_count(),
            "machine assembled"
        );

        Ok(Self { mem, mmio, vcpus })
    }

    pub fn core_count(&self) -> usize {
        self.vcpus.len()
    }

    pub fn vcpu(&self, core: usize) -> &VCpuState {
        &self.vcpus[core]
    }

    pub fn vcpu_mut(&mut self, core: usize) -> &mut VCpuState {
        &mut self.vcpus[core]
    }

    /// Direct guest RAM access, bypassing translation and MMIO. For loaders
    /// and tests.
    pub fn memory(&self) -> &GuestMemory {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut GuestMemory {
        &mut self.mem
    }

    /// Register an additional device region. Bring-up only: the database is
    /// not built for mutation once the guest runs.
    pub fn register_mmio(
        &mut self,
        range: MmioRange,
        handler: MmioHandler,
    ) -> Result<(), rook_mmio::MmioRegisterError> {
        self.mmio.register(range, handler)
    }

    /// Translate, then inject a data abort on failure.
    fn translate(&mut self, core: usize, gva: u64, kind: AccessKind) -> Result<u64, GuestFault> {
        rook_mmu::translate(&self.vcpus[core], &self.mem, gva)
            .map_err(|f| self.inject(core, gva, kind, GuestFault::Translation(f)))
    }

    /// Deliver a synchronous data abort for `fault` to `core` and hand the
    /// fault back for the caller's error path.
    fn inject(&mut self, core: usize, gva: u64, kind: AccessKind, fault: GuestFault) -> GuestFault {
        let vcpu = &mut self.vcpus[core];
        let class = if vcpu.pstate & PSTATE_MODE_MASK == PSTATE_MODE_EL0T {
            ExceptionClass::DataAbortLowerEl
        } else {
            ExceptionClass::DataAbort
        };

        tracing::debug!(
            target: "machine",
            core,
            gva = format_args!("0x{gva:x}"),
            %fault,
            "injecting synchronous data abort"
        );

        vcpu.take_synchronous_exception(class, fault.syndrome(kind), gva);
        fault
    }

    fn denied(&mut self, core: usize, gva: u64, gpa: u64, kind: AccessKind) -> GuestFault {
        self.inject(core, gva, kind, GuestFault::MmioAccessDenied { gpa })
    }

    /// Guest byte read at a virtual address.
    ///
    /// On `Err` the data abort has already been taken: ESR/FAR/ELR/SPSR and
    /// PSTATE on `core` reflect the fault when this returns.
    pub fn read_u8(&mut self, core: usize, gva: u64) -> Result<u8, GuestFault> {
        let gpa = self.translate(core, gva, AccessKind::Read)?;
        let mut buf = [0u8; 1];
        match self.mmio.dispatch_read(gpa, &mut buf) {
            MmioDispatch::Handled => Ok(buf[0]),
            MmioDispatch::AccessDenied => Err(self.denied(core, gva, gpa, AccessKind::Read)),
            MmioDispatch::NotHandled => self
                .mem
                .read_u8(gpa)
                .map_err(|f| self.inject(core, gva, AccessKind::Read, GuestFault::Memory(f))),
        }
    }

    pub fn read_u16(&mut self, core: usize, gva: u64) -> Result<u16, GuestFault> {
        let gpa = self.translate(core, gva, AccessKind::Read)?;
        let mut buf = [0u8; 2];
        match self.mmio.dispatch_read(gpa, &mut buf) {
            MmioDispatch::Handled => Ok(u16::from_le_bytes(buf)),
            MmioDispatch::AccessDenied => Err(self.denied(core, gva, gpa, AccessKind::Read)),
            MmioDispatch::NotHandled => self
                .mem
                .read_u16(gpa)
                .map_err(|f| self.inject(core, gva, AccessKind::Read, GuestFault::Memory(f))),
        }
    }

    pub fn read_u32(&mut self, core: usize, gva: u64) -> Result<u32, GuestFault> {
        let gpa = self.translate(core, gva, AccessKind::Read)?;
        let mut buf = [0u8; 4];
        match self.mmio.dispatch_read(gpa, &mut buf) {
            MmioDispatch::Handled => Ok(u32::from_le_bytes(buf)),
            MmioDispatch::AccessDenied => Err(self.denied(core, gva, gpa, AccessKind::Read)),
            MmioDispatch::NotHandled => self
                .mem
                .read_u32(gpa)
                .map_err(|f| self.inject(core, gva, AccessKind::Read, GuestFault::Memory(f))),
        }
    }

    pub fn read_u64(&mut self, core: usize, gva: u64) -> Result<u64, GuestFault> {
        let gpa = self.translate(core, gva, AccessKind::Read)?;
        let mut buf = [0u8; 8];
        match self.mmio.dispatch_read(gpa, &mut buf) {
            MmioDispatch::Handled => Ok(u64::from_le_bytes(buf)),
            MmioDispatch::AccessDenied => Err(self.denied(core, gva, gpa, AccessKind::Read)),
            MmioDispatch::NotHandled => self
                .mem
                .read_u64(gpa)
                .map_err(|f| self.inject(core, gva, AccessKind::Read, GuestFault::Memory(f))),
        }
    }

    /// Guest byte write at a virtual address. Error semantics mirror
    /// [`Machine::read_u8`].
    pub fn write_u8(&mut self, core: usize, gva: u64, value: u8) -> Result<(), GuestFault> {
        let gpa = self.translate(core, gva, AccessKind::Write)?;
        match self.mmio.dispatch_write(gpa, &[value]) {
            MmioDispatch::Handled => Ok(()),
            MmioDispatch::AccessDenied => Err(self.denied(core, gva, gpa, AccessKind::Write)),
            MmioDispatch::NotHandled => self
                .mem
                .write_u8(gpa, value)
                .map_err(|f| self.inject(core, gva, AccessKind::Write, GuestFault::Memory(f))),
        }
    }

    pub fn write_u16(&mut self, core: usize, gva: u64, value: u16) -> Result<(), GuestFault> {
        let gpa = self.translate(core, gva, AccessKind::Write)?;
        match self.mmio.dispatch_write(gpa, &value.to_le_bytes()) {
            MmioDispatch::Handled => Ok(()),
            MmioDispatch::AccessDenied => Err(self.denied(core, gva, gpa, AccessKind::Write)),
            MmioDispatch::NotHandled => self
                .mem
                .write_u16(gpa, value)
                .map_err(|f| self.inject(core, gva, AccessKind::Write, GuestFault::Memory(f))),
        }
    }

    pub fn write_u32(&mut self, core: usize, gva: u64, value: u32) -> Result<(), GuestFault> {
        let gpa = self.translate(core, gva, AccessKind::Write)?;
        match self.mmio.dispatch_write(gpa, &value.to_le_bytes()) {
            MmioDispatch::Handled => Ok(()),
            MmioDispatch::AccessDenied => Err(self.denied(core, gva, gpa, AccessKind::Write)),
            MmioDispatch::NotHandled => self
                .mem
                .write_u32(gpa, value)
                .map_err(|f| self.inject(core, gva, AccessKind::Write, GuestFault::Memory(f))),
        }
    }

    pub fn write_u64(&mut self, core: usize, gva: u64, value: u64) -> Result<(), GuestFault> {
        let gpa = self.translate(core, gva, AccessKind::Write)?;
        match self.mmio.dispatch_write(gpa, &value.to_le_bytes()) {
            MmioDispatch::Handled => Ok(()),
            MmioDispatch::AccessDenied => Err(self.denied(core, gva, gpa, AccessKind::Write)),
            MmioDispatch::NotHandled => self
                .mem
                .write_u64(gpa, value)
                .map_err(|f| self.inject(core, gva, AccessKind::Write, GuestFault::Memory(f))),
        }
    }
}
