pub mod process;

pub use process::{Pid, Process, ProcessMemory, ProcessStatus, ProcessTable};
