//! Victim selection among one process's resident pages.

use super::registry::{PageFrameRegistry, SlotIndex};
use crate::paging::AddressSpace;

pub trait PageReplacementPolicy {
    /// The resident slot to evict next, or `None` if nothing is resident.
    fn select_victim(&self, registry: &PageFrameRegistry) -> Option<SlotIndex>;

    /// `index` has just become resident.
    fn page_loaded(&mut self, _registry: &PageFrameRegistry, _index: SlotIndex) {}

    /// `index` has just stopped being resident (evicted or released).
    fn page_unloaded(&mut self, _registry: &PageFrameRegistry, _index: SlotIndex) {}

    fn reset(&mut self) {}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PolicyKind {
    #[default]
    Fifo,
    Aging,
}

impl PolicyKind {
    pub fn name(self) -> &'static str {
        match self {
            PolicyKind::Fifo => "fifo",
            PolicyKind::Aging => "aging",
        }
    }
}

/// First in, first out. `start_index` names the resident slot that has been
/// resident the longest; load order comes from each record's `loaded_seq`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Fifo {
    start_index: SlotIndex,
}

impl Fifo {
    pub fn start_index(&self) -> SlotIndex {
        self.start_index
    }

    fn oldest_resident(registry: &PageFrameRegistry) -> Option<SlotIndex> {
        registry
            .resident()
            .min_by_key(|(_, record)| record.loaded_seq)
            .map(|(index, _)| index)
    }
}

impl PageReplacementPolicy for Fifo {
    fn select_victim(&self, registry: &PageFrameRegistry) -> Option<SlotIndex> {
        if registry.get(self.start_index).is_resident() {
            debug_assert_eq!(Some(self.start_index), Self::oldest_resident(registry));
            return Some(self.start_index);
        }
        Self::oldest_resident(registry)
    }

    fn page_loaded(&mut self, registry: &PageFrameRegistry, index: SlotIndex) {
        // A newly loaded page is the youngest, so it only becomes the head
        // when nothing else is resident.
        if !registry.get(self.start_index).is_resident() || self.start_index == index {
            self.start_index = Self::oldest_resident(registry).unwrap_or_default();
        }
    }

    fn page_unloaded(&mut self, registry: &PageFrameRegistry, index: SlotIndex) {
        if index == self.start_index {
            self.start_index = Self::oldest_resident(registry).unwrap_or_default();
        }
    }

    fn reset(&mut self) {
        self.start_index = SlotIndex::default();
    }
}

/// Approximate LRU: evict the resident page with the smallest age, ties going
/// to the lowest slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Aging;

impl Aging {
    pub const REFERENCED: u32 = 1 << 31;

    /// One sampling epoch over a process's resident pages: shift every age
    /// right, set the top bit of pages whose accessed bit is set, and clear
    /// the accessed bits.
    pub fn sample(registry: &mut PageFrameRegistry, space: &mut dyn AddressSpace) -> usize {
        let mut sampled = 0;
        for (_, record) in registry.iter_mut().filter(|(_, record)| record.is_resident()) {
            let Some(addr) = record.virtual_address else {
                continue;
            };
            let Some(entry) = space.resolve_entry(addr, false) else {
                continue;
            };
            let referenced = entry.accessed();
            *entry = entry.with_accessed(false);

            record.age >>= 1;
            if referenced {
                record.age |= Self::REFERENCED;
            }
            sampled += 1;
        }
        sampled
    }
}

impl PageReplacementPolicy for Aging {
    fn select_victim(&self, registry: &PageFrameRegistry) -> Option<SlotIndex> {
        // `min_by_key` keeps the first of equal keys, i.e. the lowest slot.
        registry
            .resident()
            .min_by_key(|(_, record)| record.age)
            .map(|(index, _)| index)
    }
}

/// The policy a process was configured with, along with its state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplacementPolicy {
    Fifo(Fifo),
    Aging(Aging),
}

impl ReplacementPolicy {
    pub fn new(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::Fifo => ReplacementPolicy::Fifo(Fifo::default()),
            PolicyKind::Aging => ReplacementPolicy::Aging(Aging),
        }
    }

    pub fn kind(&self) -> PolicyKind {
        match self {
            ReplacementPolicy::Fifo(_) => PolicyKind::Fifo,
            ReplacementPolicy::Aging(_) => PolicyKind::Aging,
        }
    }

    fn as_dyn(&self) -> &dyn PageReplacementPolicy {
        match self {
            ReplacementPolicy::Fifo(policy) => policy,
            ReplacementPolicy::Aging(policy) => policy,
        }
    }

    fn as_dyn_mut(&mut self) -> &mut dyn PageReplacementPolicy {
        match self {
            ReplacementPolicy::Fifo(policy) => policy,
            ReplacementPolicy::Aging(policy) => policy,
        }
    }
}

impl PageReplacementPolicy for ReplacementPolicy {
    fn select_victim(&self, registry: &PageFrameRegistry) -> Option<SlotIndex> {
        self.as_dyn().select_victim(registry)
    }

    fn page_loaded(&mut self, registry: &PageFrameRegistry, index: SlotIndex) {
        self.as_dyn_mut().page_loaded(registry, index);
    }

    fn page_unloaded(&mut self, registry: &PageFrameRegistry, index: SlotIndex) {
        self.as_dyn_mut().page_unloaded(registry, index);
    }

    fn reset(&mut self) {
        self.as_dyn_mut().reset();
    }
}
