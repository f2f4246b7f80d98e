use super::swap_space::SwapError;
use crate::mem::AllocError;
use crate::threading::process::Pid;
use core::error::Error;
use core::fmt::{self, Debug, Display, Formatter};

/// Error type for allocation, eviction and page-fault handling.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// No physical frame is available.
    OutOfMemory,
    /// Growing to `requested` pages would pass the per-process total-page
    /// budget.
    BudgetExceeded { requested: usize, limit: usize },
    /// The requested size reaches into kernel address space.
    AddressOverflow(usize),
    /// The faulting address has no page table entry.
    MissingEntry(usize),
    /// The entry at this address is not marked as paged out.
    NotPagedOut(usize),
    /// No swapped registry record exists for this address.
    MissingRecord(usize),
    /// An eviction was requested while no page is resident.
    NoResidentPages,
    /// The registry and the page table disagree.
    Desync(&'static str),
    NoSuchProcess(Pid),
    Swap(SwapError),
}

impl PagingError {
    /// Bookkeeping errors that indicate a kernel bug rather than a resource
    /// or caller problem.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            PagingError::MissingRecord(_) | PagingError::NoResidentPages | PagingError::Desync(_)
        )
    }
}

impl Debug for PagingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PagingError::OutOfMemory => write!(f, "OutOfMemory"),
            PagingError::BudgetExceeded { requested, limit } => {
                write!(f, "BudgetExceeded {{ requested: {requested}, limit: {limit} }}")
            }
            PagingError::AddressOverflow(addr) => write!(f, "AddressOverflow({addr:#x})"),
            PagingError::MissingEntry(addr) => write!(f, "MissingEntry({addr:#x})"),
            PagingError::NotPagedOut(addr) => write!(f, "NotPagedOut({addr:#x})"),
            PagingError::MissingRecord(addr) => write!(f, "MissingRecord({addr:#x})"),
            PagingError::NoResidentPages => write!(f, "NoResidentPages"),
            PagingError::Desync(what) => write!(f, "Desync({what:?})"),
            PagingError::NoSuchProcess(pid) => write!(f, "NoSuchProcess({pid})"),
            PagingError::Swap(err) => write!(f, "Swap({err:?})"),
        }
    }
}

impl Display for PagingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PagingError::OutOfMemory => write!(f, "out of physical memory"),
            PagingError::BudgetExceeded { requested, limit } => {
                write!(f, "{requested} pages requested, limit is {limit}")
            }
            PagingError::AddressOverflow(addr) => {
                write!(f, "size {addr:#x} reaches kernel address space")
            }
            PagingError::MissingEntry(addr) => write!(f, "no page table entry for {addr:#x}"),
            PagingError::NotPagedOut(addr) => write!(f, "page {addr:#x} is not paged out"),
            PagingError::MissingRecord(addr) => {
                write!(f, "no swapped registry record for {addr:#x}")
            }
            PagingError::NoResidentPages => write!(f, "eviction with no resident pages"),
            PagingError::Desync(what) => write!(f, "registry desync: {what}"),
            PagingError::NoSuchProcess(pid) => write!(f, "no process with pid {pid}"),
            PagingError::Swap(err) => write!(f, "swap I/O failed: {err}"),
        }
    }
}

impl Error for PagingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PagingError::Swap(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SwapError> for PagingError {
    fn from(err: SwapError) -> Self {
        PagingError::Swap(err)
    }
}

impl From<AllocError> for PagingError {
    fn from(_: AllocError) -> Self {
        PagingError::OutOfMemory
    }
}
