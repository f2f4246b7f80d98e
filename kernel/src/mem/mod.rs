mod frame_allocator;

pub use frame_allocator::{
    CoreMapEntry, CoreMapFrameAllocator, FirstFit, NextFit, PlacementAlgorithm,
};

use core::{
    error::Error,
    fmt::{self, Display, Formatter},
};

/// Physical memory is exhausted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocError;

impl Display for AllocError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("out of physical frames")
    }
}

impl Error for AllocError {}

/// Hands out physical frames by frame number and gives the kernel access to
/// their contents.
pub trait FrameAllocator {
    /// Allocate `frames_requested` contiguous frames, returning the first
    /// frame number.
    ///
    /// # Errors
    ///
    /// [`AllocError`] if no such run of frames is free.
    fn alloc(&mut self, frames_requested: usize) -> Result<usize, AllocError>;

    /// Free the allocation that begins at `first_frame`, returning the number
    /// of frames released.
    fn dealloc(&mut self, first_frame: usize) -> usize;

    /// Contents of an allocated frame, `PAGE_FRAME_SIZE` bytes long.
    fn frame(&self, frame: usize) -> &[u8];

    fn frame_mut(&mut self, frame: usize) -> &mut [u8];

    fn frames_free(&self) -> usize;
}
