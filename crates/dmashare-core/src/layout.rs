//! Buffer layout and frame counter footer
//!
//! Every region is laid out as `[payload | padding | frame counter]`.
//! Only the payload is handed to producers and consumers.

use crate::{Error, Result};
use std::ptr::NonNull;

/// Bytes reserved between the payload and the frame counter
pub const PADDING: usize = 0;

/// Size of the frame counter stored past the payload
pub const FRAME_COUNTER_SIZE: usize = std::mem::size_of::<u64>();

/// Alignment the compute context requires of a registered mapping
pub const DEVICE_PAGE_SIZE: usize = 4096;

/// Out-of-band metadata needed to import a buffer in another process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Usable payload length in bytes
    pub len: usize,
    /// Length of the backing region
    pub mapped_len: usize,
}

impl BufferDescriptor {
    /// Region length needed to back `len` payload bytes
    pub fn required_len(len: usize) -> Option<usize> {
        len.checked_add(PADDING)?.checked_add(FRAME_COUNTER_SIZE)
    }

    /// Validate an agreed layout
    pub fn new(len: usize, mapped_len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::ZeroLength);
        }
        match Self::required_len(len) {
            Some(required) if mapped_len >= required => Ok(Self { len, mapped_len }),
            _ => Err(Error::InvalidLayout { len, mapped_len }),
        }
    }

    /// Offset of the frame counter inside the region
    pub fn counter_offset(&self) -> usize {
        self.len + PADDING
    }
}

/// Typed view of the frame counter footer
///
/// The footer sits right after the payload and is not necessarily
/// 8-byte aligned, so it is accessed bytewise.
pub(crate) struct FrameCounter {
    ptr: NonNull<u8>,
}

impl FrameCounter {
    /// # Safety
    ///
    /// `base` must point to a live mapping of at least `desc.mapped_len` bytes.
    pub(crate) unsafe fn new(base: NonNull<u8>, desc: &BufferDescriptor) -> Self {
        Self {
            ptr: NonNull::new_unchecked(base.as_ptr().add(desc.counter_offset())),
        }
    }

    pub(crate) fn get(&self) -> u64 {
        let bytes = unsafe { std::ptr::read_volatile(self.ptr.as_ptr() as *const [u8; FRAME_COUNTER_SIZE]) };
        u64::from_ne_bytes(bytes)
    }

    pub(crate) fn set(&self, value: u64) {
        unsafe {
            std::ptr::write_volatile(
                self.ptr.as_ptr() as *mut [u8; FRAME_COUNTER_SIZE],
                value.to_ne_bytes(),
            )
        }
    }
}
