//! Compute-context registrar capability
//!
//! A compute context wraps an existing host mapping in a GPU-visible
//! memory object without copying. The object must be released before
//! the mapping goes away.

use crate::layout::DEVICE_PAGE_SIZE;
use crate::Result;
use std::os::fd::BorrowedFd;
use std::ptr::NonNull;

/// The mapping being registered
#[derive(Debug, Clone, Copy)]
pub struct HostRegion<'a> {
    /// Sharable handle backing the mapping
    pub handle: BorrowedFd<'a>,
    /// Start of the mapping, aligned to [`ComputeContext::page_size`]
    pub addr: NonNull<u8>,
    /// Payload bytes exposed to the device
    pub len: usize,
}

pub trait ComputeContext {
    /// Alignment required of a registered mapping
    fn page_size(&self) -> usize {
        DEVICE_PAGE_SIZE
    }

    /// Create a zero-copy memory object aliasing `region`
    fn register(&self, region: HostRegion<'_>) -> Result<Box<dyn ComputeMemory>>;
}

/// Opaque memory object living in a compute context
pub trait ComputeMemory: Send {
    /// Raw handle value for passing to kernels
    fn raw(&self) -> u64;

    /// Release the object. On failure the object is still live.
    fn release(&mut self) -> Result<()>;
}
