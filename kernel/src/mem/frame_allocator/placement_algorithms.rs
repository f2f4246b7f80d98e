//! Frame placement policies for the core map allocator.

use super::CoreMapEntry;
use crate::mem::AllocError;
use core::ops::Range;

/// A placement algorithm for allocating frames.
pub trait PlacementAlgorithm: Default {
    /// Returns [`Ok`] containing the range of frame numbers to allocate.
    ///
    /// # Errors
    ///
    /// If no run of `frames_requested` free frames exists.
    fn place(
        &mut self,
        core_map: &[CoreMapEntry],
        frames_requested: usize,
    ) -> Result<Range<usize>, AllocError>;
}

/// Resumes searching where the previous allocation ended.
#[derive(Default)]
pub struct NextFit {
    position: usize,
}

/// Always searches from frame 0.
#[derive(Default)]
pub struct FirstFit;

/// Length of the free run starting at `start`, capped at `limit`.
fn free_run(core_map: &[CoreMapEntry], start: usize, limit: usize) -> usize {
    core_map[start..]
        .iter()
        .take(limit)
        .take_while(|entry| !entry.allocated())
        .count()
}

/// First free run of `frames_requested` frames within `window`.
fn search(
    core_map: &[CoreMapEntry],
    window: Range<usize>,
    frames_requested: usize,
) -> Option<Range<usize>> {
    let mut start = window.start;
    while start + frames_requested <= window.end {
        let run = free_run(core_map, start, frames_requested);
        if run == frames_requested {
            return Some(start..start + run);
        }
        // Skip past the allocated frame that ended the run.
        start += run + 1;
    }
    None
}

impl PlacementAlgorithm for NextFit {
    fn place(
        &mut self,
        core_map: &[CoreMapEntry],
        frames_requested: usize,
    ) -> Result<Range<usize>, AllocError> {
        if frames_requested == 0 || frames_requested > core_map.len() {
            return Err(AllocError);
        }
        let position = self.position.min(core_map.len());

        // A block may not straddle the end of the core map, so the wrapped
        // search covers everything before `position` plus what could extend
        // into the already-searched tail.
        let wrapped_end = (position + frames_requested - 1).min(core_map.len());
        let range = search(core_map, position..core_map.len(), frames_requested)
            .or_else(|| search(core_map, 0..wrapped_end, frames_requested))
            .ok_or(AllocError)?;

        self.position = range.end % core_map.len();
        Ok(range)
    }
}

impl PlacementAlgorithm for FirstFit {
    fn place(
        &mut self,
        core_map: &[CoreMapEntry],
        frames_requested: usize,
    ) -> Result<Range<usize>, AllocError> {
        if frames_requested == 0 {
            return Err(AllocError);
        }
        search(core_map, 0..core_map.len(), frames_requested).ok_or(AllocError)
    }
}
