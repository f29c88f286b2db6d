//! End-to-end tests of the machine access pipeline: translation, MMIO
//! dispatch, RAM fallthrough, and fault injection observed through the
//! architectural registers.

use std::cell::RefCell;
use std::rc::Rc;

use rook_cpu_core::{
    ExceptionClass, PSTATE_MODE_EL1H, PSTATE_MODE_MASK, ESR_EC_SHIFT, ESR_ISS_MASK, SCTLR_EL1_M,
};
use rook_machine::{
    GuestFault, Machine, MachineConfig, Target, BOARD_ID, BOARD_ID_BASE, ISS_WNR, UART_BASE,
};
use rook_mem::MemFault;
use rook_mmio::{MmioHandler, MmioRange};
use rook_mmu::TranslationFault;

const RAM_SIZE: usize = 1 << 20;

fn new_machine() -> Machine {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Machine::new(MachineConfig {
        target: Target::RefBoard,
        ram_bytes: RAM_SIZE,
        cores: 1,
    })
    .unwrap()
}

fn esr_fields(esr: u64) -> (u64, u32, u32) {
    let iss = esr as u32 & ESR_ISS_MASK;
    (esr >> ESR_EC_SHIFT, iss & 0x3F, iss & ISS_WNR)
}

#[test]
fn ram_round_trip_with_translation_disabled() {
    let mut m = new_machine();

    m.write_u64(0, 0x1000, 0x0123_4567_89AB_CDEF).unwrap();
    assert_eq!(m.read_u64(0, 0x1000).unwrap(), 0x0123_4567_89AB_CDEF);

    // Translation off means gva == gpa: the loader-side view agrees.
    assert_eq!(m.memory().read_u64(0x1000).unwrap(), 0x0123_4567_89AB_CDEF);

    m.write_u16(0, 0x1008, 0xBEEF).unwrap();
    assert_eq!(m.read_u8(0, 0x1008).unwrap(), 0xEF);
    assert_eq!(m.read_u8(0, 0x1009).unwrap(), 0xBE);
}

#[test]
fn board_id_reads_through_the_pipeline() {
    let mut m = new_machine();

    assert_eq!(m.read_u32(0, BOARD_ID_BASE).unwrap(), BOARD_ID);
    // Single-byte reads see the little-endian ID bytes: "ROOK".
    assert_eq!(m.read_u8(0, BOARD_ID_BASE).unwrap(), b'R');
    assert_eq!(m.read_u8(0, BOARD_ID_BASE + 1).unwrap(), b'O');
}

#[test]
fn uart_write_is_handled_without_touching_ram() {
    let mut m = new_machine();
    m.write_u8(0, UART_BASE, b'A').unwrap();
    m.write_u32(0, UART_BASE + 4, 0x0A21_6B6F).unwrap();
}

#[test]
fn denied_mmio_read_injects_a_data_abort() {
    let mut m = new_machine();
    m.vcpu_mut(0).pc = 0x8000_0040;

    let err = m.read_u32(0, UART_BASE).unwrap_err();
    assert_eq!(err, GuestFault::MmioAccessDenied { gpa: UART_BASE });

    let vcpu = m.vcpu(0);
    let (ec, dfsc, wnr) = esr_fields(vcpu.esr_el1);
    // Reset-state cores run in EL0, so the abort is from a lower level.
    assert_eq!(ec, ExceptionClass::DataAbortLowerEl.code());
    assert_eq!(dfsc, 0b00_1111);
    assert_eq!(wnr, 0);
    assert_eq!(vcpu.far_el1, UART_BASE);
    assert_eq!(vcpu.elr_el1, 0x8000_0040);
    assert_eq!(vcpu.pstate & PSTATE_MODE_MASK, PSTATE_MODE_EL1H);
}

#[test]
fn denied_mmio_write_sets_the_wnr_bit() {
    let mut m = new_machine();

    let err = m.write_u32(0, BOARD_ID_BASE, 0).unwrap_err();
    assert_eq!(
        err,
        GuestFault::MmioAccessDenied {
            gpa: BOARD_ID_BASE
        }
    );

    let (_, dfsc, wnr) = esr_fields(m.vcpu(0).esr_el1);
    assert_eq!(dfsc, 0b00_1111);
    assert_ne!(wnr, 0);
}

#[test]
fn out_of_bounds_ram_access_faults() {
    let mut m = new_machine();
    let gva = RAM_SIZE as u64;

    let err = m.read_u64(0, gva).unwrap_err();
    assert_eq!(
        err,
        GuestFault::Memory(MemFault::Boundary {
            gpa: gva,
            len: 8,
            size: RAM_SIZE as u64
        })
    );

    let (_, dfsc, _) = esr_fields(m.vcpu(0).esr_el1);
    assert_eq!(dfsc, 0b01_0000);
    assert_eq!(m.vcpu(0).far_el1, gva);
}

#[test]
fn unaligned_ram_access_faults() {
    let mut m = new_machine();

    let err = m.write_u32(0, 0x1002, 7).unwrap_err();
    assert_eq!(
        err,
        GuestFault::Memory(MemFault::Unaligned {
            gpa: 0x1002,
            width: 4
        })
    );

    let (_, dfsc, wnr) = esr_fields(m.vcpu(0).esr_el1);
    assert_eq!(dfsc, 0b10_0001);
    assert_ne!(wnr, 0);
    // The faulting RAM is untouched.
    assert_ne!(m.memory().read_u32(0x1000).unwrap(), 7);
}

/// Point core 0 at a 39-bit lower address space rooted at `ttbr0`.
fn enable_translation(m: &mut Machine, ttbr0: u64) {
    let vcpu = m.vcpu_mut(0);
    vcpu.sctlr_el1 = SCTLR_EL1_M;
    vcpu.tcr_el1 = 25 | (25 << 16) | (0b10 << 30);
    vcpu.ttbr0_el1 = ttbr0;
}

#[test]
fn translation_fault_injects_with_the_walk_level() {
    let mut m = new_machine();
    enable_translation(&mut m, 0x1000);

    // Nothing mapped: the freshly poisoned L1 entry has bit 0 clear.
    let gva = 0x4000_0123u64;
    let err = m.read_u32(0, gva).unwrap_err();
    assert_eq!(
        err,
        GuestFault::Translation(TranslationFault::Invalid { gva, level: 1 })
    );

    let (ec, dfsc, _) = esr_fields(m.vcpu(0).esr_el1);
    assert_eq!(ec, ExceptionClass::DataAbortLowerEl.code());
    assert_eq!(dfsc, 0b00_0101);
    assert_eq!(m.vcpu(0).far_el1, gva);
}

#[test]
fn same_level_abort_when_already_in_el1() {
    let mut m = new_machine();
    enable_translation(&mut m, 0x1000);
    m.vcpu_mut(0).pstate = PSTATE_MODE_EL1H;

    let gva = 0x4000_0000u64;
    m.read_u32(0, gva).unwrap_err();

    let (ec, _, _) = esr_fields(m.vcpu(0).esr_el1);
    assert_eq!(ec, ExceptionClass::DataAbort.code());
}

#[test]
fn translated_access_walks_the_tables_to_ram() {
    let mut m = new_machine();
    enable_translation(&mut m, 0x1000);

    // One 4KB page: gva 0x4000_0000 → physical page 0x8_0000.
    let gva = 0x4000_0000u64;
    let (i1, i2, i3) = ((gva >> 30) & 0x1FF, (gva >> 21) & 0x1FF, (gva >> 12) & 0x1FF);
    let mem = m.memory_mut();
    mem.write_u64(0x1000 + i1 * 8, 0x2000 | 0b11).unwrap();
    mem.write_u64(0x2000 + i2 * 8, 0x3000 | 0b11).unwrap();
    mem.write_u64(0x3000 + i3 * 8, 0x8_0000 | 0b11).unwrap();
    mem.write_u64(0x8_0040, 0x5555_AAAA_5555_AAAA).unwrap();

    assert_eq!(m.read_u64(0, gva + 0x40).unwrap(), 0x5555_AAAA_5555_AAAA);

    m.write_u32(0, gva + 0x80, 0xCAFE_F00D).unwrap();
    assert_eq!(m.memory().read_u32(0x8_0080).unwrap(), 0xCAFE_F00D);
}

#[test]
fn extra_device_regions_route_through_the_machine() {
    let mut m = new_machine();

    let writes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&writes);
    m.register_mmio(
        MmioRange::new(0x0A00_0000, 0x0A00_0100),
        MmioHandler::read_write(
            Box::new(|_, data| data.fill(0x42)),
            Box::new(move |gpa, data| sink.borrow_mut().push((gpa, data.to_vec()))),
        ),
    )
    .unwrap();

    assert_eq!(m.read_u16(0, 0x0A00_0010).unwrap(), 0x4242);
    m.write_u8(0, 0x0A00_0020, 9).unwrap();
    assert_eq!(&*writes.borrow(), &[(0x0A00_0020u64, vec![9u8])]);
}
