#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

#[macro_use]
mod macros;

pub mod config;
pub mod interrupts;
pub mod mem;
pub mod paging;
pub mod swapping;
pub mod sync;
pub mod system;
pub mod threading;

pub use config::{boot_config, init_boot_config, PagingConfig};
pub use system::SystemState;
