//! The reference board: the fixed device complement a bare machine boots
//! with.
//!
//! Two deliberately asymmetric regions, so both refusal directions of the
//! dispatcher are exercised by real devices: a write-only UART transmit
//! window and a read-only board-identification register block.

use rook_mmio::{MmioDatabase, MmioHandler, MmioRange};

/// UART transmit window. Bytes written here are the guest's console output.
pub const UART_BASE: u64 = 0x0900_0000;
pub const UART_SIZE: u64 = 0x1000;

/// Board identification block: reads anywhere in the window return the
/// little-endian board ID, repeating every four bytes.
pub const BOARD_ID_BASE: u64 = 0x0910_0000;
pub const BOARD_ID_SIZE: u64 = 0x10;
/// "ROOK" in ASCII.
pub const BOARD_ID: u32 = 0x4B4F_4F52;

/// Populate `db` with the board's device regions.
///
/// Runs once during bring-up; the fixed region layout cannot overlap, so a
/// registration failure is a bug in this module.
pub(crate) fn register(db: &mut MmioDatabase) {
    db.register(
        MmioRange::new(UART_BASE, UART_BASE + UART_SIZE),
        MmioHandler::write_only(Box::new(|gpa, data| {
            for &byte in data {
                tracing::trace!(
                    target: "ref_board",
                    gpa = format_args!("0x{gpa:x}"),
                    byte = format_args!("0x{byte:02x}"),
                    "uart tx"
                );
            }
        })),
    )
    .expect("reference board UART region must register");

    db.register(
        MmioRange::new(BOARD_ID_BASE, BOARD_ID_BASE + BOARD_ID_SIZE),
        MmioHandler::read_only(Box::new(|gpa, data| {
            let id = BOARD_ID.to_le_bytes();
            let start = (gpa - BOARD_ID_BASE) as usize;
            for (i, b) in data.iter_mut().enumerate() {
                *b = id[(start + i) % id.len()];
            }
        })),
    )
    .expect("reference board ID region must register");
}
