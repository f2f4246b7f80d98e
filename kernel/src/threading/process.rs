use crate::{paging::PageManager, swapping::Pager, sync::Mutex};
use alloc::{collections::BTreeMap, sync::Arc};
use core::fmt::{self, Display, Formatter};

pub type Pid = u16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessStatus {
    Embryo,
    Runnable,
    Running,
    Sleeping,
    Zombie,
}

impl ProcessStatus {
    /// Whether the aging sampler looks at processes in this state.
    pub fn is_sampled(self) -> bool {
        matches!(
            self,
            ProcessStatus::Runnable | ProcessStatus::Running | ProcessStatus::Sleeping
        )
    }
}

impl Display for ProcessStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessStatus::Embryo => "embryo",
            ProcessStatus::Runnable => "runble",
            ProcessStatus::Running => "run",
            ProcessStatus::Sleeping => "sleep",
            ProcessStatus::Zombie => "zombie",
        };
        f.pad(name)
    }
}

/// Everything the pager touches for one process. Guarded by the process's
/// own lock.
pub struct ProcessMemory {
    pub page_manager: PageManager,
    pub pager: Pager,
    /// Size of the user address space in bytes.
    pub size: usize,
}

pub struct Process {
    pub pid: Pid,
    pub memory: Mutex<ProcessMemory>,
}

impl Process {
    pub fn new(pid: Pid, pager: Pager) -> Self {
        Self {
            pid,
            memory: Mutex::new(ProcessMemory {
                page_manager: PageManager::new(),
                pager,
                size: 0,
            }),
        }
    }
}

struct ProcessEntry {
    status: ProcessStatus,
    process: Arc<Process>,
}

/// Process membership and scheduling status. Always taken before any
/// process's memory lock.
pub struct ProcessTable {
    content: BTreeMap<Pid, ProcessEntry>,
    next_pid: Pid,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self {
            content: BTreeMap::new(),
            next_pid: 1,
        }
    }
}

impl ProcessTable {
    pub fn allocate_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        let Some(next_pid) = self.next_pid.checked_add(1) else {
            panic!("PID overflow");
        };
        self.next_pid = next_pid;
        pid
    }

    pub fn add(&mut self, process: Arc<Process>) {
        let pid = process.pid;
        assert!(
            !self.content.contains_key(&pid),
            "process with pid {pid} already added to process table."
        );
        self.content.insert(
            pid,
            ProcessEntry {
                status: ProcessStatus::Embryo,
                process,
            },
        );
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Arc<Process>> {
        self.content.remove(&pid).map(|entry| entry.process)
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.content.get(&pid).map(|entry| entry.process.clone())
    }

    pub fn status(&self, pid: Pid) -> Option<ProcessStatus> {
        self.content.get(&pid).map(|entry| entry.status)
    }

    /// Returns the previous status, or `None` if there is no such process.
    pub fn set_status(&mut self, pid: Pid, status: ProcessStatus) -> Option<ProcessStatus> {
        let entry = self.content.get_mut(&pid)?;
        Some(core::mem::replace(&mut entry.status, status))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Pid, ProcessStatus, &Arc<Process>)> {
        self.content
            .iter()
            .map(|(&pid, entry)| (pid, entry.status, &entry.process))
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
