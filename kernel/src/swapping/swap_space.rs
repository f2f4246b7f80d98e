//! Per-process swap files kept in kernel memory, one sector at a time.

use crate::threading::process::Pid;
use alloc::{boxed::Box, collections::BTreeMap, vec::Vec};
use core::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
};
use swapvm_shared::sizes::{SECTOR_SIZE, SWAP_SECTORS};

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SwapError {
    /// The process has no swap file.
    NoSwapFile(Pid),
    /// `create` was called for a process that already has a swap file.
    AlreadyExists(Pid),
    /// Offset or length is not a whole number of sectors.
    Misaligned { offset: usize, len: usize },
    /// The transfer would run past the end of the swap area.
    OutOfBounds { offset: usize, len: usize },
    /// The backing store moved fewer bytes than requested.
    Short { expected: usize, actual: usize },
}

impl Debug for SwapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SwapError::NoSwapFile(pid) => write!(f, "NoSwapFile({pid})"),
            SwapError::AlreadyExists(pid) => write!(f, "AlreadyExists({pid})"),
            SwapError::Misaligned { offset, len } => {
                write!(f, "Misaligned {{ offset: {offset:#x}, len: {len:#x} }}")
            }
            SwapError::OutOfBounds { offset, len } => {
                write!(f, "OutOfBounds {{ offset: {offset:#x}, len: {len:#x} }}")
            }
            SwapError::Short { expected, actual } => {
                write!(f, "Short {{ expected: {expected}, actual: {actual} }}")
            }
        }
    }
}

impl Display for SwapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SwapError::NoSwapFile(pid) => write!(f, "process {pid} has no swap file"),
            SwapError::AlreadyExists(pid) => write!(f, "process {pid} already has a swap file"),
            SwapError::Misaligned { offset, len } => {
                write!(f, "swap transfer of {len} bytes at {offset:#x} is not sector aligned")
            }
            SwapError::OutOfBounds { offset, len } => {
                write!(f, "swap transfer of {len} bytes at {offset:#x} exceeds the swap area")
            }
            SwapError::Short { expected, actual } => {
                write!(f, "swap transfer moved {actual} of {expected} bytes")
            }
        }
    }
}

impl Error for SwapError {}

/// Swap-file operations the paging engine relies on. Offsets and lengths are
/// in bytes.
pub trait SwapStore {
    fn create(&mut self, pid: Pid) -> Result<(), SwapError>;

    fn remove(&mut self, pid: Pid) -> Result<(), SwapError>;

    /// Write `src` at `offset`, returning the number of bytes written.
    fn write_at(&mut self, pid: Pid, src: &[u8], offset: usize) -> Result<usize, SwapError>;

    /// Fill `dst` from `offset`, returning the number of bytes read. Regions
    /// never written read back as zeros.
    fn read_at(&mut self, pid: Pid, dst: &mut [u8], offset: usize) -> Result<usize, SwapError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SwapStats {
    pub reads: usize,
    pub writes: usize,
    pub bytes_read: usize,
    pub bytes_written: usize,
}

type Sector = [u8; SECTOR_SIZE];

#[derive(Default)]
struct SwapFile {
    // Sparse: a sector is only allocated once something is written to it.
    sectors: Vec<Option<Box<Sector>>>,
}

pub struct SwapSpace {
    files: BTreeMap<Pid, SwapFile>,
    max_sectors: usize,
    stats: SwapStats,
}

impl Default for SwapSpace {
    fn default() -> Self {
        Self::new(SWAP_SECTORS)
    }
}

impl SwapSpace {
    /// A swap area whose files may each hold up to `max_sectors` sectors.
    pub fn new(max_sectors: usize) -> Self {
        Self {
            files: BTreeMap::new(),
            max_sectors,
            stats: SwapStats::default(),
        }
    }

    pub fn stats(&self) -> SwapStats {
        self.stats
    }

    pub fn has_file(&self, pid: Pid) -> bool {
        self.files.contains_key(&pid)
    }

    /// Sector range covered by a transfer, after checking alignment and
    /// bounds.
    fn sectors_for(&self, offset: usize, len: usize) -> Result<core::ops::Range<usize>, SwapError> {
        if offset % SECTOR_SIZE != 0 || len % SECTOR_SIZE != 0 {
            return Err(SwapError::Misaligned { offset, len });
        }
        let first = offset / SECTOR_SIZE;
        let last = first + len / SECTOR_SIZE;
        if last > self.max_sectors {
            return Err(SwapError::OutOfBounds { offset, len });
        }
        Ok(first..last)
    }
}

impl SwapStore for SwapSpace {
    fn create(&mut self, pid: Pid) -> Result<(), SwapError> {
        if self.files.contains_key(&pid) {
            return Err(SwapError::AlreadyExists(pid));
        }
        self.files.insert(pid, SwapFile::default());
        Ok(())
    }

    fn remove(&mut self, pid: Pid) -> Result<(), SwapError> {
        self.files
            .remove(&pid)
            .map(drop)
            .ok_or(SwapError::NoSwapFile(pid))
    }

    fn write_at(&mut self, pid: Pid, src: &[u8], offset: usize) -> Result<usize, SwapError> {
        let sectors = self.sectors_for(offset, src.len())?;
        let file = self.files.get_mut(&pid).ok_or(SwapError::NoSwapFile(pid))?;

        if file.sectors.len() < sectors.end {
            file.sectors.resize_with(sectors.end, || None);
        }
        for (sector, chunk) in sectors.zip(src.chunks_exact(SECTOR_SIZE)) {
            file.sectors[sector]
                .get_or_insert_with(|| Box::new([0; SECTOR_SIZE]))
                .copy_from_slice(chunk);
        }

        self.stats.writes += 1;
        self.stats.bytes_written += src.len();
        Ok(src.len())
    }

    fn read_at(&mut self, pid: Pid, dst: &mut [u8], offset: usize) -> Result<usize, SwapError> {
        let sectors = self.sectors_for(offset, dst.len())?;
        let file = self.files.get(&pid).ok_or(SwapError::NoSwapFile(pid))?;

        for (sector, chunk) in sectors.zip(dst.chunks_exact_mut(SECTOR_SIZE)) {
            match file.sectors.get(sector).and_then(Option::as_ref) {
                Some(data) => chunk.copy_from_slice(&data[..]),
                None => chunk.fill(0),
            }
        }

        self.stats.reads += 1;
        self.stats.bytes_read += dst.len();
        Ok(dst.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swapvm_shared::mem::PAGE_FRAME_SIZE;

    #[test]
    fn test_write_then_read_page() {
        let mut swap = SwapSpace::default();
        swap.create(3).expect("new file");

        let page: Vec<u8> = (0..PAGE_FRAME_SIZE).map(|i| (i % 251) as u8).collect();
        assert_eq!(swap.write_at(3, &page, PAGE_FRAME_SIZE), Ok(PAGE_FRAME_SIZE));

        let mut back = vec![0xFF; PAGE_FRAME_SIZE];
        assert_eq!(swap.read_at(3, &mut back, PAGE_FRAME_SIZE), Ok(PAGE_FRAME_SIZE));
        assert_eq!(back, page);
        assert_eq!(swap.stats().writes, 1);
        assert_eq!(swap.stats().reads, 1);
    }

    #[test]
    fn test_unwritten_regions_read_as_zero() {
        let mut swap = SwapSpace::default();
        swap.create(3).expect("new file");
        let mut back = vec![0xFF; PAGE_FRAME_SIZE];
        swap.read_at(3, &mut back, 4 * PAGE_FRAME_SIZE).expect("in bounds");
        assert!(back.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn test_files_are_per_process() {
        let mut swap = SwapSpace::default();
        swap.create(3).expect("new file");
        swap.create(4).expect("new file");
        swap.write_at(3, &[7; SECTOR_SIZE], 0).expect("in bounds");

        let mut back = [0xFF; SECTOR_SIZE];
        swap.read_at(4, &mut back, 0).expect("in bounds");
        assert_eq!(back, [0; SECTOR_SIZE]);

        swap.remove(3).expect("exists");
        assert_eq!(swap.read_at(3, &mut back, 0), Err(SwapError::NoSwapFile(3)));
        assert_eq!(swap.remove(3), Err(SwapError::NoSwapFile(3)));
    }

    #[test]
    fn test_recreated_file_is_empty() {
        let mut swap = SwapSpace::default();
        swap.create(5).expect("new file");
        assert_eq!(swap.create(5), Err(SwapError::AlreadyExists(5)));
        swap.write_at(5, &[9; SECTOR_SIZE], 0).expect("in bounds");
        swap.remove(5).expect("exists");
        swap.create(5).expect("new file");

        let mut back = [0xFF; SECTOR_SIZE];
        swap.read_at(5, &mut back, 0).expect("in bounds");
        assert_eq!(back, [0; SECTOR_SIZE]);
    }

    #[test]
    fn test_bounds_and_alignment() {
        let mut swap = SwapSpace::new(8);
        swap.create(1).expect("new file");
        assert_eq!(
            swap.write_at(1, &[0; SECTOR_SIZE], 3),
            Err(SwapError::Misaligned {
                offset: 3,
                len: SECTOR_SIZE
            })
        );
        assert_eq!(
            swap.write_at(1, &[0; SECTOR_SIZE], 8 * SECTOR_SIZE),
            Err(SwapError::OutOfBounds {
                offset: 8 * SECTOR_SIZE,
                len: SECTOR_SIZE
            })
        );
        assert_eq!(swap.write_at(1, &[0; SECTOR_SIZE], 7 * SECTOR_SIZE), Ok(SECTOR_SIZE));
    }
}
