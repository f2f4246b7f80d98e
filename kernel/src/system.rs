//! Kernel-facing entry points: process creation and teardown, heap growth,
//! page faults, user memory access and the timer tick.
//!
//! Lock order is process table, then a process's memory, then the frame
//! allocator, then the swap store. Nothing takes the process table while
//! holding a process's memory.

use crate::{
    config::PagingConfig,
    interrupts::timer::Timer,
    mem::FrameAllocator,
    swapping::{Pager, PagingContext, PagingError, PagingLimits, PagingStats, PolicyKind, SwapStore},
    sync::{Mutex, MutexGuard},
    threading::{Pid, Process, ProcessMemory, ProcessStatus, ProcessTable},
};
use alloc::{sync::Arc, vec::Vec};
use core::{
    fmt::{self, Display, Formatter},
    ops::Range,
};
use swapvm_shared::{
    eprintln,
    mem::{page_round_down, PAGE_FRAME_SIZE},
    println,
};

pub struct SystemState<F, S> {
    config: PagingConfig,
    table: Mutex<ProcessTable>,
    frames: Mutex<F>,
    swap: Mutex<S>,
    timer: Mutex<Timer>,
}

impl<F: FrameAllocator, S: SwapStore> SystemState<F, S> {
    pub fn new(config: PagingConfig, frames: F, swap: S) -> Self {
        Self {
            timer: Mutex::new(Timer::new(config.aging_interval_ticks)),
            config,
            table: Mutex::new(ProcessTable::default()),
            frames: Mutex::new(frames),
            swap: Mutex::new(swap),
        }
    }

    pub fn config(&self) -> &PagingConfig {
        &self.config
    }

    pub fn frames(&self) -> MutexGuard<'_, F> {
        self.frames.lock()
    }

    pub fn swap(&self) -> MutexGuard<'_, S> {
        self.swap.lock()
    }

    /// Create an empty, runnable process. Swap-managed processes get a fresh
    /// swap file.
    pub fn spawn(&self) -> Result<Pid, PagingError> {
        let mut table = self.table.lock();
        let pid = table.allocate_pid();
        let managed = !self.config.is_exempt(pid);
        if managed {
            self.swap.lock().create(pid)?;
        }

        let pager = Pager::new(pid, self.config.limits(), self.config.policy, managed);
        table.add(Arc::new(Process::new(pid, pager)));
        table.set_status(pid, ProcessStatus::Runnable);
        Ok(pid)
    }

    pub fn status(&self, pid: Pid) -> Option<ProcessStatus> {
        self.table.lock().status(pid)
    }

    pub fn set_status(&self, pid: Pid, status: ProcessStatus) -> Result<ProcessStatus, PagingError> {
        self.table
            .lock()
            .set_status(pid, status)
            .ok_or(PagingError::NoSuchProcess(pid))
    }

    fn process(&self, pid: Pid) -> Result<Arc<Process>, PagingError> {
        self.table.lock().get(pid).ok_or(PagingError::NoSuchProcess(pid))
    }

    /// Run `f` with the process's memory and every paging collaborator
    /// locked.
    fn with_paging<R>(
        &self,
        pid: Pid,
        f: impl FnOnce(&mut Pager, &mut PagingContext<'_>, &mut usize) -> R,
    ) -> Result<R, PagingError> {
        let process = self.process(pid)?;
        let mut memory = process.memory.lock();
        let memory = &mut *memory;
        let mut frames = self.frames.lock();
        let mut swap = self.swap.lock();
        let mut cx = PagingContext {
            space: &mut memory.page_manager,
            frames: &mut *frames,
            swap: &mut *swap,
        };
        Ok(f(&mut memory.pager, &mut cx, &mut memory.size))
    }

    /// Read-only view of a process's memory, for reports and checks.
    pub fn with_process_memory<R>(
        &self,
        pid: Pid,
        f: impl FnOnce(&ProcessMemory) -> R,
    ) -> Result<R, PagingError> {
        let process = self.process(pid)?;
        let memory = process.memory.lock();
        Ok(f(&memory))
    }

    pub fn size(&self, pid: Pid) -> Result<usize, PagingError> {
        self.with_process_memory(pid, |memory| memory.size)
    }

    pub fn check_invariants(&self, pid: Pid) -> Result<(), PagingError> {
        self.with_process_memory(pid, |memory| memory.pager.check_invariants(&memory.page_manager))?
    }

    /// Grow or shrink the process by `delta` bytes. Returns the new size.
    /// Failure leaves the process running with its old size.
    pub fn grow(&self, pid: Pid, delta: isize) -> Result<usize, PagingError> {
        self.with_paging(pid, |pager, cx, size| -> Result<usize, PagingError> {
            let old = *size;
            let new = old
                .checked_add_signed(delta)
                .ok_or(PagingError::AddressOverflow(old))?;
            *size = if delta >= 0 {
                pager.grow_address_space(cx, old, new)?
            } else {
                pager.shrink_address_space(cx, old, new)?
            };
            Ok(*size)
        })?
    }

    /// Serve a fault on `addr`. The process is killed if the fault is not a
    /// swap fault or cannot be served.
    pub fn page_fault(&self, pid: Pid, addr: usize) -> Result<(), PagingError> {
        let result = self.with_paging(pid, |pager, cx, _| pager.page_in(cx, addr))?;
        if let Err(err) = result {
            self.kill(pid, &err);
            return Err(err);
        }
        Ok(())
    }

    pub fn read_user(&self, pid: Pid, addr: usize, buf: &mut [u8]) -> Result<(), PagingError> {
        self.access_user(pid, addr, buf.len(), false, |page, range| {
            buf[range].copy_from_slice(page);
        })
    }

    pub fn write_user(&self, pid: Pid, addr: usize, data: &[u8]) -> Result<(), PagingError> {
        self.access_user(pid, addr, data.len(), true, |page, range| {
            page.copy_from_slice(&data[range]);
        })
    }

    /// Walk `len` bytes of user memory from `addr` the way the MMU would,
    /// faulting paged-out pages back in and setting the accessed and dirty
    /// bits. `copy` gets the touched part of each page and the matching range
    /// of the caller's buffer. Any fault that cannot be served kills the
    /// process.
    fn access_user(
        &self,
        pid: Pid,
        addr: usize,
        len: usize,
        write: bool,
        mut copy: impl FnMut(&mut [u8], Range<usize>),
    ) -> Result<(), PagingError> {
        let result = self.with_paging(pid, |pager, cx, size| -> Result<(), PagingError> {
            let end = addr.checked_add(len).ok_or(PagingError::AddressOverflow(addr))?;
            if end > *size {
                return Err(PagingError::MissingEntry(page_round_down((*size).max(addr))));
            }

            let mut va = addr;
            while va < end {
                let page = page_round_down(va);
                let offset = va - page;
                let chunk = (PAGE_FRAME_SIZE - offset).min(end - va);

                let entry = cx.space.entry(page).ok_or(PagingError::MissingEntry(page))?;
                if entry.paged_out() {
                    pager.page_in(cx, page)?;
                } else if !entry.present() {
                    return Err(PagingError::MissingEntry(page));
                }

                let entry = cx
                    .space
                    .resolve_entry(page, false)
                    .ok_or(PagingError::MissingEntry(page))?;
                *entry = entry.with_accessed(true).with_dirty(write || entry.dirty());
                let frame = entry.frame();

                let buffer = va - addr;
                copy(
                    &mut cx.frames.frame_mut(frame)[offset..offset + chunk],
                    buffer..buffer + chunk,
                );
                va += chunk;
            }
            Ok(())
        })?;

        if let Err(err) = result {
            self.kill(pid, &err);
            return Err(err);
        }
        Ok(())
    }

    /// Replace the process image with a fresh address space of `image_size`
    /// bytes. The old image is gone before the new one is built, so a failure
    /// kills the process.
    pub fn exec(&self, pid: Pid, image_size: usize) -> Result<(), PagingError> {
        let result = self.with_paging(pid, |pager, cx, size| -> Result<(), PagingError> {
            pager.release_all(cx, *size);
            *size = 0;
            if pager.is_swap_managed() {
                cx.swap.remove(pid)?;
                cx.swap.create(pid)?;
            }
            pager.reset();
            *size = pager.grow_address_space(cx, 0, image_size)?;
            Ok(())
        })?;

        if let Err(err) = result {
            self.kill(pid, &err);
            return Err(err);
        }
        Ok(())
    }

    /// Tear the process down: every frame is released without write-back
    /// and the swap file is removed.
    pub fn exit(&self, pid: Pid) -> Result<(), PagingError> {
        // Zombies are skipped by the sampler, so teardown can run without the
        // table lock.
        self.set_status(pid, ProcessStatus::Zombie)?;

        self.with_paging(pid, |pager, cx, size| {
            pager.release_all(cx, *size);
            *size = 0;
            if pager.is_swap_managed() {
                if let Err(err) = cx.swap.remove(pid) {
                    eprintln!("exit: pid {pid}: {err}");
                }
            }
        })?;

        self.table.lock().remove(pid);
        Ok(())
    }

    pub fn kill(&self, pid: Pid, reason: &PagingError) {
        eprintln!("pid {pid}: killed: {reason}");
        if let Err(err) = self.exit(pid) {
            eprintln!("pid {pid}: {err}");
        }
    }

    /// Timer interrupt. On an aging epoch every sampled process has its
    /// resident pages aged; the whole epoch runs under the process table lock
    /// and each process's own memory lock. Returns the pages sampled.
    pub fn timer_tick(&self) -> usize {
        if !self.timer.lock().tick() || self.config.policy != PolicyKind::Aging {
            return 0;
        }

        let table = self.table.lock();
        let mut sampled = 0;
        for (_, _, process) in table.iter().filter(|(_, status, _)| status.is_sampled()) {
            let mut memory = process.memory.lock();
            let memory = &mut *memory;
            sampled += memory.pager.age_pages(&mut memory.page_manager);
        }
        sampled
    }

    pub fn procdump(&self) -> PagingReport {
        let processes = {
            let table = self.table.lock();
            table
                .iter()
                .map(|(pid, status, process)| {
                    let memory = process.memory.lock();
                    let pager = &memory.pager;
                    ProcessReport {
                        pid,
                        status,
                        policy: pager.policy().kind(),
                        swap_managed: pager.is_swap_managed(),
                        size: memory.size,
                        resident: pager.resident_count(),
                        swapped: pager.swapped_count(),
                        limits: pager.limits(),
                        stats: pager.stats(),
                    }
                })
                .collect()
        };
        PagingReport {
            processes,
            frames_free: self.frames.lock().frames_free(),
        }
    }

    pub fn print_procdump(&self) {
        println!("{}", self.procdump());
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessReport {
    pub pid: Pid,
    pub status: ProcessStatus,
    pub policy: PolicyKind,
    pub swap_managed: bool,
    pub size: usize,
    pub resident: usize,
    pub swapped: usize,
    pub limits: PagingLimits,
    pub stats: PagingStats,
}

impl Display for ProcessReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:<6} size {:#x}", self.pid, self.status, self.size)?;
        if !self.swap_managed {
            return write!(f, " (not swapped)");
        }
        write!(
            f,
            " resident {}/{} swapped {} total {}/{} faults {} swapped out {} ({})",
            self.resident,
            self.limits.max_resident_pages,
            self.swapped,
            self.resident + self.swapped,
            self.limits.max_total_pages,
            self.stats.page_faults,
            self.stats.swap_outs,
            self.policy.name(),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PagingReport {
    pub processes: Vec<ProcessReport>,
    pub frames_free: usize,
}

impl Display for PagingReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for process in &self.processes {
            writeln!(f, "{process}")?;
        }
        write!(f, "{} free frames", self.frames_free)
    }
}
