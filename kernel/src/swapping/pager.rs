//! Demand paging for one process: keeps at most `max_resident_pages` pages in
//! frames and the rest of its (at most `max_total_pages`) pages in the swap
//! file.

use super::{
    page_replacement::{Aging, PageReplacementPolicy, PolicyKind, ReplacementPolicy},
    paging_error::PagingError,
    registry::{PageFrameRegistry, SlotIndex},
    swap_space::{SwapError, SwapStore},
};
use crate::{mem::FrameAllocator, paging::AddressSpace, threading::process::Pid};
use core::ops::Range;
use swapvm_shared::{
    eprintln,
    mem::{page_round_down, page_round_up, OFFSET, PAGE_FRAME_SIZE},
    paging::PageTableEntry,
};

static ZERO_PAGE: [u8; PAGE_FRAME_SIZE] = [0; PAGE_FRAME_SIZE];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PagingLimits {
    /// Most pages that may be resident at once.
    pub max_resident_pages: usize,
    /// Most pages, resident or swapped, the process may own.
    pub max_total_pages: usize,
}

impl Default for PagingLimits {
    fn default() -> Self {
        Self {
            max_resident_pages: 15,
            max_total_pages: 30,
        }
    }
}

/// The collaborators a paging operation works through.
pub struct PagingContext<'a> {
    pub space: &'a mut dyn AddressSpace,
    pub frames: &'a mut dyn FrameAllocator,
    pub swap: &'a mut dyn SwapStore,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PagingStats {
    /// Faults served by reading a page back from swap.
    pub page_faults: usize,
    /// Pages evicted from memory.
    pub swap_outs: usize,
    /// Evictions that had to write the page to swap.
    pub swap_writes: usize,
}

pub struct Pager {
    pid: Pid,
    limits: PagingLimits,
    // Bootstrap processes are never swap-managed: no registry, no budget.
    swap_managed: bool,
    registry: PageFrameRegistry,
    resident_count: usize,
    swapped_count: usize,
    policy: ReplacementPolicy,
    next_seq: u64,
    stats: PagingStats,
}

impl Pager {
    pub fn new(pid: Pid, limits: PagingLimits, policy: PolicyKind, swap_managed: bool) -> Self {
        let capacity = if swap_managed {
            limits.max_total_pages
        } else {
            0
        };
        Self {
            pid,
            limits,
            swap_managed,
            registry: PageFrameRegistry::new(capacity),
            resident_count: 0,
            swapped_count: 0,
            policy: ReplacementPolicy::new(policy),
            next_seq: 0,
            stats: PagingStats::default(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn limits(&self) -> PagingLimits {
        self.limits
    }

    pub fn is_swap_managed(&self) -> bool {
        self.swap_managed
    }

    pub fn registry(&self) -> &PageFrameRegistry {
        &self.registry
    }

    pub fn resident_count(&self) -> usize {
        self.resident_count
    }

    pub fn swapped_count(&self) -> usize {
        self.swapped_count
    }

    pub fn policy(&self) -> &ReplacementPolicy {
        &self.policy
    }

    pub fn stats(&self) -> PagingStats {
        self.stats
    }

    /// Forget every page, as when a new program image replaces the address
    /// space. The caller has already freed the old frames and replaced the
    /// swap file.
    pub fn reset(&mut self) {
        self.registry.reset();
        self.resident_count = 0;
        self.swapped_count = 0;
        self.policy.reset();
        self.next_seq = 0;
        self.stats = PagingStats::default();
    }

    /// Grow the address space from `old_size` to `new_size` bytes, mapping a
    /// zeroed frame for every new page. Returns the new size.
    ///
    /// # Errors
    ///
    /// - [`PagingError::BudgetExceeded`] before anything is touched if the
    ///   process would own more than `max_total_pages` pages.
    /// - [`PagingError::OutOfMemory`] (or an eviction failure) part way
    ///   through; the pages mapped by this call are unmapped again.
    pub fn grow_address_space(
        &mut self,
        cx: &mut PagingContext<'_>,
        old_size: usize,
        new_size: usize,
    ) -> Result<usize, PagingError> {
        if new_size >= OFFSET {
            return Err(PagingError::AddressOverflow(new_size));
        }
        if new_size < old_size {
            return Ok(old_size);
        }

        let requested = page_round_up(new_size) / PAGE_FRAME_SIZE;
        if self.swap_managed && requested > self.limits.max_total_pages {
            return Err(PagingError::BudgetExceeded {
                requested,
                limit: self.limits.max_total_pages,
            });
        }

        let start = page_round_up(old_size);
        for addr in (start..new_size).step_by(PAGE_FRAME_SIZE) {
            if let Err(err) = self.map_new_page(cx, addr) {
                eprintln!("pager: pid {}: growing to {new_size:#x} failed: {err}", self.pid);
                if let Err(rollback) = self.unmap_range(cx, start..addr, true) {
                    eprintln!("pager: pid {}: rollback failed: {rollback}", self.pid);
                }
                return Err(err);
            }
        }
        Ok(new_size)
    }

    fn map_new_page(&mut self, cx: &mut PagingContext<'_>, addr: usize) -> Result<(), PagingError> {
        let frame = cx.frames.alloc(1)?;
        cx.frames.frame_mut(frame).fill(0);

        if !self.swap_managed {
            Self::install(cx, addr, frame);
            return Ok(());
        }

        // Make room first so the resident count never passes the budget.
        if self.resident_count >= self.limits.max_resident_pages {
            if let Err(err) = self.evict_one(cx) {
                cx.frames.dealloc(frame);
                return Err(err);
            }
        }
        let Some(slot) = self.registry.find_free_slot() else {
            cx.frames.dealloc(frame);
            return Err(self.desync(PagingError::Desync("no free slot within the page budget")));
        };

        Self::install(cx, addr, frame);
        let swap_offset = self.assign_swap_offset();
        let seq = self.take_seq();
        self.registry.mark_resident(slot, addr, swap_offset, seq);
        self.resident_count += 1;
        self.policy.page_loaded(&self.registry, slot);

        trace!(
            "pager: pid {}: mapped {addr:#x} in {slot}, swap offset {swap_offset:#x}",
            self.pid
        );
        Ok(())
    }

    fn install(cx: &mut PagingContext<'_>, addr: usize, frame: usize) {
        if let Err(err) = cx.space.install_mapping(addr, frame, true) {
            // The registry says the page is new, the page table says it is
            // not. Nothing can be trusted past this point.
            panic!("pager: {err}");
        }
    }

    /// `PAGE_FRAME_SIZE * (pages owned)` unless a live page already holds
    /// that offset, in which case the lowest offset nobody holds.
    fn assign_swap_offset(&self) -> usize {
        let preferred = PAGE_FRAME_SIZE * (self.swapped_count + self.resident_count);
        if self.registry.find_slot_by_swap_offset(preferred).is_none() {
            return preferred;
        }
        (0..self.registry.capacity())
            .map(|page| page * PAGE_FRAME_SIZE)
            .find(|&offset| self.registry.find_slot_by_swap_offset(offset).is_none())
            .unwrap_or(preferred)
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Shrink the address space from `old_size` to `new_size` bytes,
    /// releasing every page past the new end. Returns the new size.
    pub fn shrink_address_space(
        &mut self,
        cx: &mut PagingContext<'_>,
        old_size: usize,
        new_size: usize,
    ) -> Result<usize, PagingError> {
        if new_size >= old_size {
            return Ok(old_size);
        }
        self.unmap_range(cx, page_round_up(new_size)..old_size, true)?;
        Ok(new_size)
    }

    /// Release every page and frame without writing anything back, then drop
    /// the page tables. Used on exit and before a new image is loaded; the
    /// latter follows up with [`Pager::reset`] once the swap file is fresh.
    pub fn release_all(&mut self, cx: &mut PagingContext<'_>, size: usize) {
        if let Err(err) = self.unmap_range(cx, 0..size, false) {
            eprintln!("pager: pid {}: teardown: {err}", self.pid);
        }
        if self.resident_count != 0 || self.swapped_count != 0 {
            eprintln!(
                "pager: pid {}: {} resident and {} swapped pages outside the address space",
                self.pid, self.resident_count, self.swapped_count
            );
        }
        cx.space.free();
    }

    /// Unmap every page in `range`. With `scrub`, swap slots that were ever
    /// written are zeroed so a later page given the same offset starts out
    /// blank.
    fn unmap_range(
        &mut self,
        cx: &mut PagingContext<'_>,
        range: Range<usize>,
        scrub: bool,
    ) -> Result<(), PagingError> {
        for addr in (page_round_up(range.start)..range.end).step_by(PAGE_FRAME_SIZE) {
            let Some(entry) = cx.space.resolve_entry(addr, false) else {
                continue;
            };
            let old = *entry;
            if !old.present() && !old.paged_out() {
                continue;
            }
            *entry = PageTableEntry::DEFAULT;
            if old.present() {
                cx.frames.dealloc(old.frame());
            }

            let Some(slot) = self.registry.find_slot_by_virtual_address(addr) else {
                continue;
            };
            let record = *self.registry.get(slot);
            if record.in_memory {
                self.resident_count -= 1;
            } else {
                self.swapped_count -= 1;
            }
            self.registry.release(slot);
            self.policy.page_unloaded(&self.registry, slot);

            if let (true, true, Some(offset)) = (scrub, record.persisted, record.swap_offset) {
                cx.swap.write_at(self.pid, &ZERO_PAGE, offset)?;
            }
        }
        Ok(())
    }

    /// Move one resident page, chosen by the replacement policy, out to
    /// swap. Returns the slot that was evicted.
    ///
    /// The page is written only if its dirty bit is set; a clean page's
    /// bytes are already in the swap file, or it has never been written and
    /// reads back as zeros. The frame is released either way.
    ///
    /// # Errors
    ///
    /// A failed swap write leaves the victim resident and mapped.
    pub fn evict_one(&mut self, cx: &mut PagingContext<'_>) -> Result<SlotIndex, PagingError> {
        let Some(victim) = self.policy.select_victim(&self.registry) else {
            return Err(self.desync(PagingError::NoResidentPages));
        };
        let record = *self.registry.get(victim);
        let (Some(addr), Some(swap_offset)) = (record.virtual_address, record.swap_offset) else {
            return Err(self.desync(PagingError::Desync("resident record without an address")));
        };
        let entry = match cx.space.resolve_entry(addr, false) {
            Some(entry) if entry.present() => entry,
            _ => return Err(self.desync(PagingError::Desync("victim page is not present"))),
        };

        let frame = entry.frame();
        let dirty = entry.dirty();
        if dirty {
            let written = cx.swap.write_at(self.pid, cx.frames.frame(frame), swap_offset)?;
            if written != PAGE_FRAME_SIZE {
                return Err(PagingError::Swap(SwapError::Short {
                    expected: PAGE_FRAME_SIZE,
                    actual: written,
                }));
            }
            self.registry.get_mut(victim).persisted = true;
            self.stats.swap_writes += 1;
        }
        // One store: the entry goes straight from present to paged out, and
        // only then is the frame given back.
        *entry = entry.paged_out_copy();
        cx.frames.dealloc(frame);

        self.registry.mark_swapped(victim);
        self.resident_count -= 1;
        self.swapped_count += 1;
        self.policy.page_unloaded(&self.registry, victim);
        self.stats.swap_outs += 1;

        trace!(
            "pager: pid {}: evicted {addr:#x} from {victim} (dirty: {dirty})",
            self.pid
        );
        Ok(victim)
    }

    /// Bring the swapped page containing `fault_addr` back into a frame,
    /// evicting another page first if the resident budget is full.
    ///
    /// # Errors
    ///
    /// [`PagingError::MissingEntry`] and [`PagingError::NotPagedOut`] mean the
    /// fault was not a swap fault; the rest mean it cannot be served. Either
    /// way the caller kills the process.
    pub fn page_in(
        &mut self,
        cx: &mut PagingContext<'_>,
        fault_addr: usize,
    ) -> Result<(), PagingError> {
        let addr = page_round_down(fault_addr);
        if addr >= OFFSET {
            return Err(PagingError::MissingEntry(addr));
        }
        let entry = cx.space.entry(addr).ok_or(PagingError::MissingEntry(addr))?;
        if !entry.paged_out() {
            return Err(PagingError::NotPagedOut(addr));
        }

        let Some(slot) = self
            .registry
            .iter()
            .find(|(_, record)| record.is_swapped() && record.virtual_address == Some(addr))
            .map(|(index, _)| index)
        else {
            return Err(self.desync(PagingError::MissingRecord(addr)));
        };
        let Some(swap_offset) = self.registry.get(slot).swap_offset else {
            return Err(self.desync(PagingError::Desync("swapped record without an offset")));
        };

        let frame = cx.frames.alloc(1)?;
        if let Err(err) = Self::read_page(cx, self.pid, frame, swap_offset) {
            cx.frames.dealloc(frame);
            return Err(err);
        }

        if self.resident_count >= self.limits.max_resident_pages {
            if let Err(err) = self.evict_one(cx) {
                cx.frames.dealloc(frame);
                return Err(err);
            }
        }

        let Some(entry) = cx.space.resolve_entry(addr, false) else {
            cx.frames.dealloc(frame);
            return Err(self.desync(PagingError::Desync("faulting entry vanished")));
        };
        *entry = PageTableEntry::mapping(frame, entry.read_write());

        let seq = self.take_seq();
        self.registry.mark_resident(slot, addr, swap_offset, seq);
        self.swapped_count -= 1;
        self.resident_count += 1;
        self.policy.page_loaded(&self.registry, slot);
        self.stats.page_faults += 1;

        trace!("pager: pid {}: paged in {addr:#x} to {slot}", self.pid);
        Ok(())
    }

    fn read_page(
        cx: &mut PagingContext<'_>,
        pid: Pid,
        frame: usize,
        swap_offset: usize,
    ) -> Result<(), PagingError> {
        let read = cx.swap.read_at(pid, cx.frames.frame_mut(frame), swap_offset)?;
        if read != PAGE_FRAME_SIZE {
            return Err(PagingError::Swap(SwapError::Short {
                expected: PAGE_FRAME_SIZE,
                actual: read,
            }));
        }
        Ok(())
    }

    /// One aging epoch over this process's resident pages. Returns the number
    /// of pages sampled.
    pub fn age_pages(&mut self, space: &mut dyn AddressSpace) -> usize {
        if !self.swap_managed {
            return 0;
        }
        Aging::sample(&mut self.registry, space)
    }

    /// Check the registry against its counters, budgets and the page table.
    pub fn check_invariants(&self, space: &dyn AddressSpace) -> Result<(), PagingError> {
        let resident = self.registry.resident().count();
        let used = self.registry.iter().filter(|(_, record)| record.used).count();

        if resident != self.resident_count {
            return Err(PagingError::Desync("resident count does not match registry"));
        }
        if used - resident != self.swapped_count {
            return Err(PagingError::Desync("swapped count does not match registry"));
        }
        if self.swap_managed && resident > self.limits.max_resident_pages {
            return Err(PagingError::Desync("resident budget exceeded"));
        }
        if self.swap_managed && used > self.limits.max_total_pages {
            return Err(PagingError::Desync("total page budget exceeded"));
        }

        for (index, record) in self.registry.iter().filter(|(_, record)| record.used) {
            let (Some(addr), Some(offset)) = (record.virtual_address, record.swap_offset) else {
                return Err(PagingError::Desync("used record without address or offset"));
            };
            let Some(entry) = space.entry(addr) else {
                return Err(PagingError::Desync("used record without a page table entry"));
            };
            if entry.present() == entry.paged_out() {
                return Err(PagingError::Desync("entry is both or neither present and paged out"));
            }
            if entry.present() != record.in_memory {
                return Err(PagingError::Desync("entry disagrees with the registry"));
            }
            let duplicate = self.registry.iter().any(|(other, other_record)| {
                other != index
                    && other_record.used
                    && (other_record.virtual_address == Some(addr)
                        || other_record.swap_offset == Some(offset))
            });
            if duplicate {
                return Err(PagingError::Desync("address or swap offset held twice"));
            }
        }
        Ok(())
    }

    fn desync(&self, err: PagingError) -> PagingError {
        eprintln!("pager: pid {}: {err}", self.pid);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mem::CoreMapFrameAllocator,
        paging::PageManager,
        swapping::{registry::PageFrameRecord, swap_space::SwapSpace},
    };

    const PID: Pid = 3;
    const PAGE: usize = PAGE_FRAME_SIZE;

    struct Harness {
        space: PageManager,
        frames: CoreMapFrameAllocator,
        swap: SwapSpace,
        pager: Pager,
        size: usize,
    }

    impl Harness {
        fn new(policy: PolicyKind, max_resident_pages: usize, max_total_pages: usize) -> Self {
            Self::with_parts(policy, max_resident_pages, max_total_pages, 64, SwapSpace::default())
        }

        fn with_parts(
            policy: PolicyKind,
            max_resident_pages: usize,
            max_total_pages: usize,
            frames: usize,
            mut swap: SwapSpace,
        ) -> Self {
            swap.create(PID).expect("new swap file");
            let limits = PagingLimits {
                max_resident_pages,
                max_total_pages,
            };
            Self {
                space: PageManager::new(),
                frames: CoreMapFrameAllocator::new(frames),
                swap,
                pager: Pager::new(PID, limits, policy, true),
                size: 0,
            }
        }

        fn with_cx<R>(&mut self, f: impl FnOnce(&mut Pager, &mut PagingContext<'_>) -> R) -> R {
            let mut cx = PagingContext {
                space: &mut self.space,
                frames: &mut self.frames,
                swap: &mut self.swap,
            };
            f(&mut self.pager, &mut cx)
        }

        fn grow_pages(&mut self, pages: usize) -> Result<usize, PagingError> {
            let old = self.size;
            let new = old + pages * PAGE;
            let size = self.with_cx(|pager, cx| pager.grow_address_space(cx, old, new))?;
            self.size = size;
            Ok(size)
        }

        fn shrink_pages(&mut self, pages: usize) -> Result<usize, PagingError> {
            let old = self.size;
            let new = old - pages * PAGE;
            let size = self.with_cx(|pager, cx| pager.shrink_address_space(cx, old, new))?;
            self.size = size;
            Ok(size)
        }

        fn page_in(&mut self, addr: usize) -> Result<(), PagingError> {
            self.with_cx(|pager, cx| pager.page_in(cx, addr))
        }

        fn evict(&mut self) -> Result<SlotIndex, PagingError> {
            self.with_cx(|pager, cx| pager.evict_one(cx))
        }

        /// What the MMU does on a user store: fill the page and set the
        /// accessed and dirty bits.
        fn store(&mut self, addr: usize, byte: u8) {
            let entry = self.space.resolve_entry(addr, false).expect("mapped");
            assert!(entry.present(), "store to a non-resident page");
            *entry = entry.with_accessed(true).with_dirty(true);
            let frame = entry.frame();
            self.frames.frame_mut(frame).fill(byte);
        }

        fn contents(&self, addr: usize) -> &[u8] {
            let entry = self.space.entry(addr).expect("mapped");
            assert!(entry.present(), "page is not resident");
            self.frames.frame(entry.frame())
        }

        fn record(&self, addr: usize) -> PageFrameRecord {
            let slot = self
                .pager
                .registry()
                .find_slot_by_virtual_address(addr)
                .expect("tracked page");
            *self.pager.registry().get(slot)
        }

        fn assert_consistent(&self) {
            self.pager
                .check_invariants(&self.space)
                .expect("registry consistent with page table");
        }
    }

    #[test]
    fn test_grow_maps_zeroed_resident_pages() {
        let mut h = Harness::new(PolicyKind::Fifo, 4, 8);
        assert_eq!(h.grow_pages(3), Ok(3 * PAGE));
        assert_eq!(h.pager.resident_count(), 3);
        assert_eq!(h.pager.swapped_count(), 0);
        for page in 0..3 {
            let record = h.record(page * PAGE);
            assert!(record.is_resident());
            assert_eq!(record.age, 0);
            assert_eq!(record.swap_offset, Some(page * PAGE));
            assert!(h.contents(page * PAGE).iter().all(|&byte| byte == 0));
        }
        h.assert_consistent();
    }

    #[test]
    fn test_partial_page_growth_rounds_up() {
        let mut h = Harness::new(PolicyKind::Fifo, 4, 8);
        let size = h.with_cx(|pager, cx| pager.grow_address_space(cx, 0, 10));
        assert_eq!(size, Ok(10));
        assert_eq!(h.pager.resident_count(), 1);
        // Growing within the same page maps nothing new.
        let size = h.with_cx(|pager, cx| pager.grow_address_space(cx, 10, 20));
        assert_eq!(size, Ok(20));
        assert_eq!(h.pager.resident_count(), 1);
    }

    #[test]
    fn test_shrinking_request_is_a_noop_for_grow() {
        let mut h = Harness::new(PolicyKind::Fifo, 4, 8);
        h.grow_pages(2).expect("within budget");
        let size = h.with_cx(|pager, cx| pager.grow_address_space(cx, 2 * PAGE, PAGE));
        assert_eq!(size, Ok(2 * PAGE));
        assert_eq!(h.pager.resident_count(), 2);
    }

    #[test]
    fn test_budget_exceeded_has_no_side_effects() {
        let mut h = Harness::new(PolicyKind::Fifo, 2, 4);
        h.grow_pages(3).expect("within budget");
        let free_before = h.frames.frames_free();

        assert_eq!(
            h.grow_pages(2),
            Err(PagingError::BudgetExceeded {
                requested: 5,
                limit: 4
            })
        );
        assert_eq!(h.size, 3 * PAGE);
        assert_eq!(h.frames.frames_free(), free_before);
        assert_eq!(h.pager.resident_count(), 2);
        assert_eq!(h.pager.swapped_count(), 1);
        assert_eq!(h.swap.stats().writes, 0);
        h.assert_consistent();
    }

    #[test]
    fn test_kernel_addresses_are_rejected() {
        let mut h = Harness::new(PolicyKind::Fifo, 2, 4);
        let result = h.with_cx(|pager, cx| pager.grow_address_space(cx, 0, OFFSET));
        assert_eq!(result, Err(PagingError::AddressOverflow(OFFSET)));
    }

    #[test]
    fn test_out_of_memory_rolls_back() {
        let mut h = Harness::with_parts(PolicyKind::Fifo, 8, 8, 3, SwapSpace::default());
        h.grow_pages(1).expect("one frame");
        assert_eq!(h.grow_pages(4), Err(PagingError::OutOfMemory));

        assert_eq!(h.size, PAGE);
        assert_eq!(h.frames.frames_free(), 2);
        assert_eq!(h.pager.resident_count(), 1);
        assert!(h.space.entry(PAGE).map_or(true, |entry| !entry.present()));
        h.assert_consistent();
    }

    #[test]
    fn test_fifo_evicts_first_allocation() {
        let mut h = Harness::new(PolicyKind::Fifo, 4, 8);
        h.grow_pages(4).expect("within budget");
        h.grow_pages(1).expect("within budget");

        assert!(h.record(0).is_swapped());
        for page in 1..5 {
            assert!(h.record(page * PAGE).is_resident());
        }
        assert_eq!(h.pager.resident_count(), 4);
        assert_eq!(h.pager.swapped_count(), 1);
        h.assert_consistent();
    }

    #[test]
    fn test_two_frame_scenario() {
        let (a, b, c) = (0, PAGE, 2 * PAGE);
        let mut h = Harness::new(PolicyKind::Fifo, 2, 8);
        h.grow_pages(2).expect("A and B");
        assert!(h.record(a).is_resident() && h.record(b).is_resident());

        h.grow_pages(1).expect("C");
        assert!(h.record(a).is_swapped());
        assert_eq!(h.record(a).swap_offset, Some(0));
        assert!(h.record(b).is_resident() && h.record(c).is_resident());
        let entry = h.space.entry(a).expect("A has an entry");
        assert!(entry.paged_out() && !entry.present());
        h.assert_consistent();

        h.page_in(a + 123).expect("A comes back");
        assert!(h.record(a).is_resident());
        assert_eq!(h.record(a).swap_offset, Some(0));
        // B has been resident longest.
        assert!(h.record(b).is_swapped());
        assert!(h.record(c).is_resident());
        assert_eq!(h.pager.stats().page_faults, 1);
        assert_eq!(h.pager.stats().swap_outs, 2);
        h.assert_consistent();
    }

    #[test]
    fn test_dirty_page_round_trip() {
        let mut h = Harness::new(PolicyKind::Fifo, 1, 4);
        h.grow_pages(1).expect("A");
        h.store(0, 0x5A);
        let before = h.contents(0).to_vec();

        h.grow_pages(1).expect("B evicts A");
        assert_eq!(h.swap.stats().writes, 1);
        assert!(h.record(0).persisted);

        h.page_in(0).expect("A comes back");
        assert_eq!(h.contents(0), &before[..]);
        // The restored mapping starts clean.
        let entry = h.space.entry(0).expect("mapped");
        assert!(!entry.dirty() && !entry.accessed() && !entry.paged_out());
        h.assert_consistent();
    }

    #[test]
    fn test_clean_eviction_never_writes() {
        let mut h = Harness::new(PolicyKind::Fifo, 1, 4);
        h.grow_pages(1).expect("A");
        h.grow_pages(1).expect("B evicts clean A");
        assert_eq!(h.swap.stats().writes, 0);

        h.page_in(0).expect("A comes back as zeros");
        assert!(h.contents(0).iter().all(|&byte| byte == 0));
        assert_eq!(h.swap.stats().writes, 0);
    }

    #[test]
    fn test_clean_eviction_keeps_last_persisted_bytes() {
        let mut h = Harness::new(PolicyKind::Fifo, 1, 4);
        h.grow_pages(1).expect("A");
        h.store(0, 0x11);
        h.grow_pages(1).expect("B evicts dirty A");
        h.page_in(0).expect("A back, B out");
        assert_eq!(h.swap.stats().writes, 1);

        // A is clean now; evicting it again must not write.
        h.evict().expect("A out again");
        assert_eq!(h.swap.stats().writes, 1);
        h.page_in(0).expect("A back again");
        assert!(h.contents(0).iter().all(|&byte| byte == 0x11));
    }

    #[test]
    fn test_page_in_rejects_non_swap_faults() {
        let mut h = Harness::new(PolicyKind::Fifo, 2, 4);
        h.grow_pages(1).expect("A");
        assert_eq!(h.page_in(0), Err(PagingError::NotPagedOut(0)));
        assert_eq!(
            h.page_in(0x40_0000),
            Err(PagingError::MissingEntry(0x40_0000))
        );
        assert_eq!(h.pager.stats().page_faults, 0);
    }

    #[test]
    fn test_page_in_without_record_is_a_desync() {
        let mut h = Harness::new(PolicyKind::Fifo, 2, 4);
        h.grow_pages(1).expect("A");
        // Forge a paged-out entry the registry knows nothing about.
        let entry = h.space.resolve_entry(PAGE, true).expect("created");
        *entry = PageTableEntry::DEFAULT.with_paged_out(true);
        let err = h.page_in(PAGE).expect_err("no record");
        assert_eq!(err, PagingError::MissingRecord(PAGE));
        assert!(err.is_desync());
    }

    #[test]
    fn test_page_in_out_of_memory_leaves_page_swapped() {
        let mut h = Harness::with_parts(PolicyKind::Fifo, 1, 4, 1, SwapSpace::default());
        h.grow_pages(1).expect("A");
        h.evict().expect("A out");
        // Hold the only frame elsewhere.
        let held = h.frames.alloc(1).expect("frame");
        assert_eq!(h.page_in(0), Err(PagingError::OutOfMemory));
        assert!(h.record(0).is_swapped());
        h.frames.dealloc(held);
        h.page_in(0).expect("frame available again");
        h.assert_consistent();
    }

    #[test]
    fn test_evict_with_nothing_resident() {
        let mut h = Harness::new(PolicyKind::Aging, 2, 4);
        assert_eq!(h.evict(), Err(PagingError::NoResidentPages));
    }

    #[test]
    fn test_failed_swap_write_keeps_victim_resident() {
        // Room in the swap file for exactly one page.
        let swap = SwapSpace::new(PAGE / swapvm_shared::sizes::SECTOR_SIZE);
        let mut h = Harness::with_parts(PolicyKind::Fifo, 1, 4, 8, swap);
        h.grow_pages(1).expect("A");
        h.store(0, 1);
        h.grow_pages(1).expect("B evicts A into offset 0");
        h.store(PAGE, 2);

        let err = h.grow_pages(1).expect_err("B's offset is past the swap area");
        assert!(matches!(err, PagingError::Swap(SwapError::OutOfBounds { .. })));
        assert!(h.record(PAGE).is_resident());
        assert!(h.contents(PAGE).iter().all(|&byte| byte == 2));
        assert_eq!(h.size, 2 * PAGE);
        h.assert_consistent();
    }

    #[test]
    fn test_failed_swap_read_leaves_page_swapped() {
        // Room in the swap file for exactly one page; B's offset lies past it.
        let swap = SwapSpace::new(PAGE / swapvm_shared::sizes::SECTOR_SIZE);
        let mut h = Harness::with_parts(PolicyKind::Fifo, 1, 4, 8, swap);
        h.grow_pages(1).expect("A");
        h.grow_pages(1).expect("B evicts clean A");
        h.grow_pages(1).expect("C evicts clean B without writing");
        assert_eq!(h.record(PAGE).swap_offset, Some(PAGE));
        let free_before = h.frames.frames_free();

        assert_eq!(
            h.page_in(PAGE),
            Err(PagingError::Swap(SwapError::OutOfBounds {
                offset: PAGE,
                len: PAGE
            }))
        );
        assert_eq!(h.frames.frames_free(), free_before);
        assert!(h.record(PAGE).is_swapped());
        assert!(h.record(2 * PAGE).is_resident());
        assert_eq!(h.pager.stats().page_faults, 0);
        h.assert_consistent();
    }

    #[test]
    fn test_page_in_rejects_kernel_addresses() {
        let mut h = Harness::new(PolicyKind::Fifo, 1, 4);
        h.grow_pages(2).expect("page 0 swapped out");
        assert_eq!(h.page_in(OFFSET), Err(PagingError::MissingEntry(OFFSET)));
        // Would alias page 0 if the address were truncated.
        #[cfg(target_pointer_width = "64")]
        assert_eq!(h.page_in(1 << 32), Err(PagingError::MissingEntry(1 << 32)));
        assert!(h.record(0).is_swapped());
        h.assert_consistent();
    }

    #[test]
    fn test_evicting_unmapped_victim_frees_nothing() {
        let mut h = Harness::new(PolicyKind::Fifo, 2, 4);
        h.grow_pages(1).expect("A");
        let entry = h.space.resolve_entry(0, false).expect("mapped");
        let frame = entry.frame();
        *entry = PageTableEntry::DEFAULT;
        let free_before = h.frames.frames_free();

        let err = h.evict().expect_err("victim has no present entry");
        assert_eq!(err, PagingError::Desync("victim page is not present"));
        assert_eq!(h.frames.frames_free(), free_before);
        assert!(h.record(0).is_resident());
        assert_eq!(h.pager.stats().swap_outs, 0);
        h.frames.dealloc(frame);
    }

    #[test]
    fn test_aging_evicts_unreferenced_page() {
        let (a, b) = (0, PAGE);
        let mut h = Harness::new(PolicyKind::Aging, 2, 4);
        h.grow_pages(2).expect("A and B");

        h.store(a, 7);
        h.pager.age_pages(&mut h.space);
        assert!(h.record(a).age > h.record(b).age);

        h.grow_pages(1).expect("C evicts B");
        assert!(h.record(b).is_swapped());
        assert!(h.record(a).is_resident());
        h.assert_consistent();
    }

    #[test]
    fn test_aging_ties_go_to_lowest_slot() {
        let mut h = Harness::new(PolicyKind::Aging, 3, 6);
        h.grow_pages(3).expect("three pages");
        h.grow_pages(1).expect("evicts slot 0");
        assert!(h.record(0).is_swapped());
    }

    #[test]
    fn test_shrink_releases_resident_and_swapped_pages() {
        let mut h = Harness::new(PolicyKind::Fifo, 2, 6);
        h.grow_pages(4).expect("within budget");
        assert_eq!(h.pager.swapped_count(), 2);
        let free_before = h.frames.frames_free();

        // Drops page 3 (resident) and page 2 (resident).
        h.shrink_pages(2).expect("shrink");
        assert_eq!(h.pager.resident_count(), 0);
        assert_eq!(h.pager.swapped_count(), 2);
        assert_eq!(h.frames.frames_free(), free_before + 2);
        assert!(h.pager.registry().find_slot_by_virtual_address(2 * PAGE).is_none());
        h.assert_consistent();

        // Drops the two swapped pages.
        h.shrink_pages(2).expect("shrink");
        assert_eq!(h.pager.swapped_count(), 0);
        assert!(h.space.entry(0).map_or(true, |entry| !entry.paged_out()));
        h.assert_consistent();
    }

    #[test]
    fn test_reused_swap_offset_reads_blank() {
        let mut h = Harness::new(PolicyKind::Fifo, 1, 4);
        h.grow_pages(1).expect("A");
        h.store(0, 0xEE);
        h.grow_pages(1).expect("B evicts A, writing offset 0");
        h.shrink_pages(2).expect("drop both");

        h.grow_pages(1).expect("A' gets offset 0 again");
        assert_eq!(h.record(0).swap_offset, Some(0));
        h.grow_pages(1).expect("B' evicts clean A'");
        h.page_in(0).expect("A' back");
        assert!(h.contents(0).iter().all(|&byte| byte == 0));
    }

    #[test]
    fn test_release_all_frees_everything_without_writes() {
        let mut h = Harness::new(PolicyKind::Fifo, 2, 6);
        h.grow_pages(4).expect("within budget");
        for page in 2..4 {
            h.store(page * PAGE, 9);
        }
        let writes = h.swap.stats().writes;
        let size = h.size;
        h.with_cx(|pager, cx| pager.release_all(cx, size));

        assert_eq!(h.frames.frames_free(), 64);
        assert_eq!(h.swap.stats().writes, writes);
        assert_eq!(h.pager.resident_count(), 0);
        assert_eq!(h.pager.swapped_count(), 0);
        assert_eq!(h.space.table_count(), 0);
    }

    #[test]
    fn test_unmanaged_process_has_no_budget() {
        let mut space = PageManager::new();
        let mut frames = CoreMapFrameAllocator::new(64);
        let mut swap = SwapSpace::default();
        let mut pager = Pager::new(1, PagingLimits::default(), PolicyKind::Fifo, false);
        let mut cx = PagingContext {
            space: &mut space,
            frames: &mut frames,
            swap: &mut swap,
        };

        let size = pager.grow_address_space(&mut cx, 0, 40 * PAGE);
        assert_eq!(size, Ok(40 * PAGE));
        assert_eq!(pager.resident_count(), 0);
        assert_eq!(pager.registry().capacity(), 0);
        assert_eq!(cx.frames.frames_free(), 24);
        assert_eq!(pager.age_pages(cx.space), 0);
        pager.check_invariants(cx.space).expect("nothing tracked");
    }

    #[test]
    fn test_reset_forgets_pages() {
        let mut h = Harness::new(PolicyKind::Fifo, 2, 4);
        h.grow_pages(3).expect("within budget");
        h.pager.reset();
        assert_eq!(h.pager.resident_count(), 0);
        assert_eq!(h.pager.swapped_count(), 0);
        assert_eq!(h.pager.stats(), PagingStats::default());
        assert!(h.pager.registry().iter().all(|(_, record)| !record.used));
    }
}
