//! Per-process swapping: the page frame registry, replacement policies, the
//! swap file store and the pager tying them together.

pub mod page_replacement;
mod pager;
mod paging_error;
pub mod registry;
mod swap_space;

pub use page_replacement::{PageReplacementPolicy, PolicyKind, ReplacementPolicy};
pub use pager::{Pager, PagingContext, PagingLimits, PagingStats};
pub use paging_error::PagingError;
pub use swap_space::{SwapError, SwapSpace, SwapStats, SwapStore};
