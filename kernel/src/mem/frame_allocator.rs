mod placement_algorithms;

pub use placement_algorithms::{FirstFit, NextFit, PlacementAlgorithm};

use super::{AllocError, FrameAllocator};
use alloc::{boxed::Box, vec};
use bitbybit::bitfield;
use swapvm_shared::mem::PAGE_FRAME_SIZE;

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
    /// Set on every frame of a multi-frame allocation except the last.
    #[bit(1, rw)]
    next: bool,
}

/// Physical frame allocator over a contiguous region of frame memory, with
/// one core map entry per frame.
pub struct CoreMapFrameAllocator<P: PlacementAlgorithm = NextFit> {
    memory: Box<[u8]>,
    core_map: Box<[CoreMapEntry]>,
    placement_algorithm: P,
    frames_allocated: usize,
}

impl CoreMapFrameAllocator {
    pub fn new(num_frames: usize) -> Self {
        Self::with_placement(num_frames)
    }
}

impl<P: PlacementAlgorithm> CoreMapFrameAllocator<P> {
    pub fn with_placement(num_frames: usize) -> Self {
        Self {
            memory: vec![0u8; num_frames * PAGE_FRAME_SIZE].into_boxed_slice(),
            core_map: vec![CoreMapEntry::DEFAULT; num_frames].into_boxed_slice(),
            placement_algorithm: P::default(),
            frames_allocated: 0,
        }
    }

    pub fn core_map(&self) -> &[CoreMapEntry] {
        &self.core_map
    }

    fn frame_range(&self, frame: usize) -> core::ops::Range<usize> {
        assert!(
            self.core_map[frame].allocated(),
            "frame {frame} accessed while not allocated"
        );
        frame * PAGE_FRAME_SIZE..(frame + 1) * PAGE_FRAME_SIZE
    }
}

impl<P: PlacementAlgorithm> FrameAllocator for CoreMapFrameAllocator<P> {
    fn alloc(&mut self, frames_requested: usize) -> Result<usize, AllocError> {
        if self.frames_allocated + frames_requested > self.core_map.len() {
            return Err(AllocError);
        }

        let range = self
            .placement_algorithm
            .place(&self.core_map, frames_requested)?;

        let last = range.end - 1;
        for i in range.clone() {
            assert!(!self.core_map[i].allocated());
            self.core_map[i] = self.core_map[i].with_next(i != last).with_allocated(true);
        }
        self.frames_allocated += range.len();

        Ok(range.start)
    }

    fn dealloc(&mut self, first_frame: usize) -> usize {
        let mut frame = first_frame;
        let mut frames_freed = 0;

        loop {
            let entry = self.core_map[frame];
            assert!(entry.allocated(), "double free of frame {frame}");
            self.core_map[frame] = CoreMapEntry::DEFAULT;
            frames_freed += 1;

            if !entry.next() {
                break;
            }
            frame += 1;
        }

        self.frames_allocated -= frames_freed;
        frames_freed
    }

    fn frame(&self, frame: usize) -> &[u8] {
        let range = self.frame_range(frame);
        &self.memory[range]
    }

    fn frame_mut(&mut self, frame: usize) -> &mut [u8] {
        let range = self.frame_range(frame);
        &mut self.memory[range]
    }

    fn frames_free(&self) -> usize {
        self.core_map.len() - self.frames_allocated
    }
}
