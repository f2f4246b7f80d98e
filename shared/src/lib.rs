#![cfg_attr(target_os = "none", no_std)]

pub mod console;
pub mod macros;
pub mod mem;
pub mod paging;
pub mod sizes;
