use super::new_ram;
use crate::MemFault;
use rook_arena::POISON_BYTE;

#[test]
fn round_trips_every_width() {
    let mut mem = new_ram(0x1000);

    mem.write_u8(0, 0x5a).unwrap();
    mem.write_u16(2, 0x1122).unwrap();
    mem.write_u32(4, 0x3344_5566).unwrap();
    mem.write_u64(8, 0x7788_99aa_bbcc_ddee).unwrap();

    assert_eq!(mem.read_u8(0).unwrap(), 0x5a);
    assert_eq!(mem.read_u16(2).unwrap(), 0x1122);
    assert_eq!(mem.read_u32(4).unwrap(), 0x3344_5566);
    assert_eq!(mem.read_u64(8).unwrap(), 0x7788_99aa_bbcc_ddee);
}

#[test]
fn values_are_stored_little_endian() {
    let mut mem = new_ram(16);
    mem.write_u32(0, 0xdead_beef).unwrap();
    assert_eq!(mem.read_u8(0).unwrap(), 0xef);
    assert_eq!(mem.read_u8(1).unwrap(), 0xbe);
    assert_eq!(mem.read_u8(2).unwrap(), 0xad);
    assert_eq!(mem.read_u8(3).unwrap(), 0xde);
}

#[test]
fn first_and_last_aligned_offsets_succeed() {
    let mut mem = new_ram(0x100);

    mem.write_u64(0, 1).unwrap();
    mem.write_u64(0x100 - 8, 2).unwrap();
    assert_eq!(mem.read_u64(0).unwrap(), 1);
    assert_eq!(mem.read_u64(0x100 - 8).unwrap(), 2);

    mem.write_u16(0x100 - 2, 3).unwrap();
    assert_eq!(mem.read_u16(0x100 - 2).unwrap(), 3);

    mem.write_u8(0x100 - 1, 4).unwrap();
    assert_eq!(mem.read_u8(0x100 - 1).unwrap(), 4);
}

#[test]
fn at_or_past_size_is_a_boundary_fault() {
    let mut mem = new_ram(0x100);

    assert_eq!(
        mem.read_u8(0x100),
        Err(MemFault::Boundary {
            gpa: 0x100,
            len: 1,
            size: 0x100
        })
    );
    assert!(matches!(
        mem.read_u64(0x100),
        Err(MemFault::Boundary { .. })
    ));
    assert!(matches!(
        mem.write_u32(0x200, 0),
        Err(MemFault::Boundary { .. })
    ));
}

#[test]
fn aligned_access_extending_past_the_end_is_a_boundary_fault() {
    // An odd RAM size leaves an aligned u64 slot that starts in bounds but
    // runs off the end.
    let mem = new_ram(0x104);
    assert!(matches!(
        mem.read_u64(0x100),
        Err(MemFault::Boundary {
            gpa: 0x100,
            len: 8,
            size: 0x104
        })
    ));
}

#[test]
fn misaligned_tail_is_an_alignment_fault_not_a_boundary_fault() {
    let mut mem = new_ram(0x100);

    // size - 1 with a wide access is both misaligned and out of bounds;
    // alignment wins.
    assert_eq!(
        mem.read_u32(0xFF),
        Err(MemFault::Unaligned { gpa: 0xFF, width: 4 })
    );
    assert_eq!(
        mem.write_u16(0xFF, 0),
        Err(MemFault::Unaligned { gpa: 0xFF, width: 2 })
    );
}

#[test]
fn misaligned_access_faults_and_mutates_nothing() {
    let mut mem = new_ram(64);
    mem.write_u64(0, 0x0101_0101_0101_0101).unwrap();
    mem.write_u64(8, 0x0202_0202_0202_0202).unwrap();

    for gpa in [1u64, 2, 3, 5, 7] {
        assert!(matches!(
            mem.write_u64(gpa, 0xffff_ffff_ffff_ffff),
            Err(MemFault::Unaligned { .. })
        ));
    }
    assert!(matches!(
        mem.read_u32(6),
        Err(MemFault::Unaligned { gpa: 6, width: 4 })
    ));

    assert_eq!(mem.read_u64(0).unwrap(), 0x0101_0101_0101_0101);
    assert_eq!(mem.read_u64(8).unwrap(), 0x0202_0202_0202_0202);
}

#[test]
fn failed_boundary_write_mutates_nothing() {
    let mut mem = new_ram(16);
    mem.write_u64(8, 0x1111_1111_1111_1111).unwrap();

    assert!(mem.write_u64(16, 0).is_err());
    assert_eq!(mem.read_u64(8).unwrap(), 0x1111_1111_1111_1111);
}

#[test]
fn fresh_ram_reads_back_the_poison_pattern() {
    let mem = new_ram(32);
    assert_eq!(mem.read_u8(0).unwrap(), POISON_BYTE);
    assert_eq!(mem.read_u64(24).unwrap(), u64::from_le_bytes([POISON_BYTE; 8]));
}

#[test]
fn bulk_bytes_have_no_alignment_requirement() {
    let mut mem = new_ram(64);
    let src = [1u8, 2, 3, 4, 5];
    mem.write_bytes(3, &src).unwrap();

    let mut dst = [0u8; 5];
    mem.read_bytes(3, &mut dst).unwrap();
    assert_eq!(dst, src);

    assert!(matches!(
        mem.read_bytes(62, &mut dst),
        Err(MemFault::Boundary { .. })
    ));
}

#[test]
fn size_reflects_the_arena_carve_out() {
    let mem = new_ram(0x4000);
    assert_eq!(mem.size(), 0x4000);
}
