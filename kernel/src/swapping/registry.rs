//! The page frame registry: where every swap-managed page of one process
//! lives.

use alloc::{boxed::Box, vec};
use core::fmt::{self, Display, Formatter};

/// Index of a slot in a [`PageFrameRegistry`]. Only meaningful for the
/// registry that produced it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(usize);

impl SlotIndex {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn get(self) -> usize {
        self.0
    }
}

impl Display for SlotIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageFrameRecord {
    /// Page-aligned virtual address, `None` while the slot is unused.
    pub virtual_address: Option<usize>,
    pub in_memory: bool,
    pub used: bool,
    /// Aging counter; larger means referenced more recently.
    pub age: u32,
    /// Where the page's bytes go in the swap file.
    pub swap_offset: Option<usize>,
    /// Load order among resident pages, used for FIFO.
    pub loaded_seq: u64,
    /// Whether anything has been written at `swap_offset` for this page.
    pub persisted: bool,
}

impl PageFrameRecord {
    pub const UNUSED: Self = Self {
        virtual_address: None,
        in_memory: false,
        used: false,
        age: 0,
        swap_offset: None,
        loaded_seq: 0,
        persisted: false,
    };

    pub fn is_resident(&self) -> bool {
        self.used && self.in_memory
    }

    pub fn is_swapped(&self) -> bool {
        self.used && !self.in_memory
    }
}

impl Default for PageFrameRecord {
    fn default() -> Self {
        Self::UNUSED
    }
}

/// Fixed-capacity table of page records. Every lookup is a linear scan; the
/// table is small and never reallocates after construction.
#[derive(Clone, Debug)]
pub struct PageFrameRegistry {
    records: Box<[PageFrameRecord]>,
}

impl PageFrameRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: vec![PageFrameRecord::UNUSED; capacity].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    pub fn get(&self, index: SlotIndex) -> &PageFrameRecord {
        &self.records[index.0]
    }

    pub fn get_mut(&mut self, index: SlotIndex) -> &mut PageFrameRecord {
        &mut self.records[index.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotIndex, &PageFrameRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(|(index, record)| (SlotIndex(index), record))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotIndex, &mut PageFrameRecord)> {
        self.records
            .iter_mut()
            .enumerate()
            .map(|(index, record)| (SlotIndex(index), record))
    }

    pub fn resident(&self) -> impl Iterator<Item = (SlotIndex, &PageFrameRecord)> {
        self.iter().filter(|(_, record)| record.is_resident())
    }

    pub fn find_free_slot(&self) -> Option<SlotIndex> {
        self.iter()
            .find(|(_, record)| !record.used)
            .map(|(index, _)| index)
    }

    pub fn find_slot_by_virtual_address(&self, addr: usize) -> Option<SlotIndex> {
        self.iter()
            .find(|(_, record)| record.used && record.virtual_address == Some(addr))
            .map(|(index, _)| index)
    }

    /// The live record holding `offset` in the swap file, if any.
    pub fn find_slot_by_swap_offset(&self, offset: usize) -> Option<SlotIndex> {
        self.iter()
            .find(|(_, record)| record.used && record.swap_offset == Some(offset))
            .map(|(index, _)| index)
    }

    /// Record that `addr` is resident in slot `index`, loaded `loaded_seq`-th.
    /// A page coming back from swap keeps its `persisted` flag.
    pub fn mark_resident(
        &mut self,
        index: SlotIndex,
        addr: usize,
        swap_offset: usize,
        loaded_seq: u64,
    ) {
        let record = &mut self.records[index.0];
        let persisted = record.is_swapped() && record.swap_offset == Some(swap_offset);
        *record = PageFrameRecord {
            virtual_address: Some(addr),
            in_memory: true,
            used: true,
            age: 0,
            swap_offset: Some(swap_offset),
            loaded_seq,
            persisted,
        };
    }

    pub fn mark_swapped(&mut self, index: SlotIndex) {
        let record = &mut self.records[index.0];
        debug_assert!(record.is_resident(), "{index} swapped out while not resident");
        record.in_memory = false;
        record.age = 0;
    }

    pub fn release(&mut self, index: SlotIndex) {
        self.records[index.0] = PageFrameRecord::UNUSED;
    }

    pub fn reset(&mut self) {
        self.records.fill(PageFrameRecord::UNUSED);
    }
}
