use crate::sizes::{KB, MB};

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;
pub const HUGE_PAGE_SIZE: usize = 4 * MB;

// Any virtual address at or above OFFSET is a kernel address, so user address
// spaces never grow past it.
pub const OFFSET: usize = 0x80000000;

#[inline]
pub const fn page_round_up(addr: usize) -> usize {
    addr.next_multiple_of(PAGE_FRAME_SIZE)
}

#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_FRAME_SIZE - 1)
}

#[inline]
pub const fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_FRAME_SIZE == 0
}
