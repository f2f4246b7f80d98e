//! Per-process two-level page tables.
//!
//! Page tables are owned by their [`PageManager`]; a directory entry's
//! `page_table_address` is the table's index in the manager's table arena
//! rather than a physical address, so nothing here depends on the MMU being
//! live and the same code runs under host tests.

use alloc::{boxed::Box, vec::Vec};
use arbitrary_int::u20;
use core::{
    error::Error,
    fmt::{self, Display, Formatter},
};
use swapvm_shared::{
    mem::{is_page_aligned, OFFSET},
    paging::{PageDirectory, PageDirectoryEntry, PageTable, PageTableEntry, VirtualAddress},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// The virtual address already has a present mapping.
    Remap(usize),
    /// The virtual address belongs to the kernel half.
    KernelAddress(usize),
}

impl Display for MapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MapError::Remap(addr) => write!(f, "remap of {addr:#x}"),
            MapError::KernelAddress(addr) => write!(f, "{addr:#x} is a kernel address"),
        }
    }
}

impl Error for MapError {}

/// Page-table operations the paging engine relies on.
pub trait AddressSpace {
    /// A copy of the entry for `virt_addr`, if its page table exists. Kernel
    /// addresses have no user entry.
    fn entry(&self, virt_addr: usize) -> Option<PageTableEntry>;

    /// The entry for `virt_addr`, creating the page table that holds it when
    /// `create` is set.
    fn resolve_entry(&mut self, virt_addr: usize, create: bool) -> Option<&mut PageTableEntry>;

    /// Map the page at `virt_addr` to `frame` for user access.
    ///
    /// # Errors
    ///
    /// [`MapError::Remap`] if the page is already present,
    /// [`MapError::KernelAddress`] if it is not a user page.
    fn install_mapping(
        &mut self,
        virt_addr: usize,
        frame: usize,
        writable: bool,
    ) -> Result<(), MapError>;

    /// Drop every page table. Frames referenced by the entries are not
    /// touched; their owner frees them first.
    fn free(&mut self);
}

pub struct PageManager {
    directory: Box<PageDirectory>,
    tables: Vec<Box<PageTable>>,
}

impl Default for PageManager {
    fn default() -> Self {
        Self {
            directory: Box::default(),
            tables: Vec::new(),
        }
    }
}

impl PageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Directory and table index of a user address. `None` at or above
    /// `OFFSET`, where the split would alias a user page.
    fn table_index(virt_addr: usize) -> Option<(usize, usize)> {
        if virt_addr >= OFFSET {
            return None;
        }
        let virt_addr = VirtualAddress::from_usize(virt_addr);
        Some((
            virt_addr.page_directory_index().value().into(),
            virt_addr.page_table_index().value().into(),
        ))
    }
}

impl AddressSpace for PageManager {
    fn entry(&self, virt_addr: usize) -> Option<PageTableEntry> {
        let (directory_index, table_index) = Self::table_index(virt_addr)?;
        let directory_entry = self.directory[directory_index];
        if !directory_entry.present() {
            return None;
        }
        let table = &self.tables[directory_entry.page_table_address().value() as usize];
        Some(table[table_index])
    }

    fn resolve_entry(&mut self, virt_addr: usize, create: bool) -> Option<&mut PageTableEntry> {
        let (directory_index, table_index) = Self::table_index(virt_addr)?;

        if !self.directory[directory_index].present() {
            if !create {
                return None;
            }
            let arena_index = self.tables.len();
            self.tables.push(Box::default());
            #[allow(clippy::cast_possible_truncation)]
            let address = u20::new(arena_index as u32);
            self.directory[directory_index] = PageDirectoryEntry::DEFAULT
                .with_present(true)
                .with_read_write(true)
                .with_user_supervisor(true)
                .with_page_table_address(address);
        }

        let arena_index = self.directory[directory_index]
            .page_table_address()
            .value() as usize;
        Some(&mut self.tables[arena_index][table_index])
    }

    fn install_mapping(
        &mut self,
        virt_addr: usize,
        frame: usize,
        writable: bool,
    ) -> Result<(), MapError> {
        debug_assert!(is_page_aligned(virt_addr));
        let Some(entry) = self.resolve_entry(virt_addr, true) else {
            return Err(MapError::KernelAddress(virt_addr));
        };
        if entry.present() {
            return Err(MapError::Remap(virt_addr));
        }
        *entry = PageTableEntry::mapping(frame, writable);
        Ok(())
    }

    fn free(&mut self) {
        self.tables.clear();
        *self.directory = PageDirectory::DEFAULT;
    }
}
