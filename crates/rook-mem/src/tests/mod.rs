mod accessors;

use rook_arena::Arena;

use crate::GuestMemory;

pub(crate) fn new_ram(size: usize) -> GuestMemory {
    GuestMemory::create(Arena::reserve(size).unwrap())
}
