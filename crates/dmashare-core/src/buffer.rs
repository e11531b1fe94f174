//! Shared buffer lifecycle
//!
//! A [`SharedBuffer`] owns one kernel region, its mapping in this
//! process and, once registered, the compute memory object aliasing it.
//!
//! ```text
//! allocate | import
//!     -> register_with_compute_context (optional)
//!     -> { sync(ToDevice) .. device access .. sync(FromDevice) }*
//!     -> release
//! ```

use crate::compute::{ComputeContext, ComputeMemory, HostRegion};
use crate::dma_buf::SyncDirection;
use crate::heap::{BufferHeap, HeapKind};
use crate::layout::{BufferDescriptor, FrameCounter};
use crate::mapper::{Mapper, MmapMapper};
use crate::{Error, Result};
use nix::fcntl::{fcntl, FcntlArg};
use std::os::fd::{AsFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::ptr::NonNull;
use std::sync::Arc;

/// Capability providers a buffer is built on
#[derive(Clone)]
pub struct Platform {
    heap: Arc<dyn BufferHeap>,
    mapper: Arc<dyn Mapper>,
}

impl Platform {
    /// Use `heap` with the default `mmap` mapper
    pub fn new(heap: Arc<dyn BufferHeap>) -> Self {
        Self {
            heap,
            mapper: Arc::new(MmapMapper),
        }
    }

    /// Replace the mapper
    pub fn with_mapper(mut self, mapper: Arc<dyn Mapper>) -> Self {
        self.mapper = mapper;
        self
    }

    /// Platform on the heap selected by `DMASHARE_HEAP`
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(HeapKind::from_env()?.open()?))
    }

    pub fn heap(&self) -> &Arc<dyn BufferHeap> {
        &self.heap
    }

    pub fn mapper(&self) -> &Arc<dyn Mapper> {
        &self.mapper
    }
}

/// Live mapping of the region
struct Mapping {
    addr: NonNull<u8>,
    frame_counter: FrameCounter,
}

/// One physical region shared between CPU, devices and processes
pub struct SharedBuffer {
    platform: Platform,
    desc: BufferDescriptor,
    handle: Option<OwnedFd>,
    mapping: Option<Mapping>,
    compute: Option<Box<dyn ComputeMemory>>,
}

// Safety: the mapping is owned by this buffer and only reachable through it.
// Concurrent CPU/device access is coordinated by the sync protocol.
unsafe impl Send for SharedBuffer {}

impl SharedBuffer {
    /// Allocate a fresh zero-filled region with `len` usable bytes
    pub fn allocate(platform: &Platform, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::ZeroLength);
        }
        let request = BufferDescriptor::required_len(len).ok_or(Error::TooLarge(len))?;

        let alloc = platform
            .heap
            .allocate(request)
            .map_err(|source| Error::HeapExhausted { len: request, source })?;
        let desc = BufferDescriptor::new(len, alloc.mapped_len)?;

        let buffer = Self::map(platform.clone(), alloc.handle, desc)?;
        if let Some(mapping) = &buffer.mapping {
            // Heaps may hand back pages another owner left behind
            unsafe { std::ptr::write_bytes(mapping.addr.as_ptr(), 0, desc.mapped_len) };
        }

        tracing::debug!(
            fd = ?buffer.handle,
            len,
            mapped_len = desc.mapped_len,
            "allocated shared buffer"
        );
        Ok(buffer)
    }

    /// Map a region allocated elsewhere
    ///
    /// `len` and `mapped_len` are the values the allocating side reported
    /// through [`SharedBuffer::descriptor`]. The contents are left as is.
    pub fn import(platform: &Platform, handle: OwnedFd, len: usize, mapped_len: usize) -> Result<Self> {
        let desc = BufferDescriptor::new(len, mapped_len)?;
        let buffer = Self::map(platform.clone(), handle, desc)?;

        tracing::debug!(fd = ?buffer.handle, len, mapped_len, "imported shared buffer");
        Ok(buffer)
    }

    /// Import from a raw descriptor received over IPC
    ///
    /// Negative or closed descriptors are rejected before anything is mapped.
    ///
    /// # Safety
    ///
    /// `fd` must not be owned by anything else; the buffer takes ownership
    /// and closes it on release.
    pub unsafe fn import_raw(platform: &Platform, fd: RawFd, len: usize, mapped_len: usize) -> Result<Self> {
        if fd < 0 {
            return Err(Error::InvalidHandle(format!("negative descriptor {fd}")));
        }
        fcntl(fd, FcntlArg::F_GETFD).map_err(|e| Error::InvalidHandle(format!("descriptor {fd}: {e}")))?;
        Self::import(platform, OwnedFd::from_raw_fd(fd), len, mapped_len)
    }

    fn map(platform: Platform, handle: OwnedFd, desc: BufferDescriptor) -> Result<Self> {
        let addr = platform
            .mapper
            .map(handle.as_fd(), desc.mapped_len)
            .map_err(|source| Error::Map {
                len: desc.mapped_len,
                source,
            })?;
        let frame_counter = unsafe { FrameCounter::new(addr, &desc) };

        Ok(Self {
            platform,
            desc,
            handle: Some(handle),
            mapping: Some(Mapping { addr, frame_counter }),
            compute: None,
        })
    }

    /// Hand the buffer over between CPU and device
    ///
    /// Interrupted calls are retried a bounded number of times; what is
    /// left is returned as [`Error::Sync`] and the buffer stays usable.
    pub fn sync(&self, direction: SyncDirection) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(Error::Released)?;
        tracing::trace!(fd = ?handle, ?direction, "sync");
        self.platform
            .heap
            .sync(handle.as_fd(), direction)
            .map_err(Error::Sync)
    }

    /// Alias the mapping in `context` for zero-copy device access
    ///
    /// A mapping not aligned to the context's page size is rejected and
    /// leaves the buffer unregistered.
    pub fn register_with_compute_context<C>(&mut self, context: &C) -> Result<()>
    where
        C: ComputeContext + ?Sized,
    {
        let (handle, mapping) = match (&self.handle, &self.mapping) {
            (Some(handle), Some(mapping)) => (handle, mapping),
            _ => return Err(Error::Released),
        };
        if self.compute.is_some() {
            return Err(Error::AlreadyRegistered);
        }

        let align = context.page_size();
        let addr = mapping.addr.as_ptr() as usize;
        if align == 0 || addr % align != 0 {
            return Err(Error::Misaligned { addr, align });
        }

        let memory = context.register(HostRegion {
            handle: handle.as_fd(),
            addr: mapping.addr,
            len: self.desc.len,
        })?;

        tracing::debug!(fd = ?handle, memory = memory.raw(), "registered with compute context");
        self.compute = Some(memory);
        Ok(())
    }

    /// Tear down the compute object, the mapping and the handle, in that order
    ///
    /// A compute object that refuses to go away stops the release with the
    /// mapping still in place. Otherwise every step runs and the first
    /// failure is returned. Nothing is retried.
    pub fn release(&mut self) -> Result<()> {
        if self.handle.is_none() {
            return Err(Error::Released);
        }

        if let Some(memory) = self.compute.as_mut() {
            memory
                .release()
                .map_err(|e| Error::ReleaseCompute(Box::new(e)))?;
            self.compute = None;
        }

        let mut first_err = None;
        if let Some(mapping) = self.mapping.take() {
            if let Err(e) = unsafe { self.platform.mapper.unmap(mapping.addr, self.desc.mapped_len) } {
                first_err = Some(Error::Unmap(e));
            }
        }
        if let Some(handle) = self.handle.take() {
            tracing::debug!(fd = ?handle, len = self.desc.len, "releasing shared buffer");
            if let Err(e) = self.platform.heap.release(handle) {
                first_err.get_or_insert(Error::Close(e));
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Usable payload length
    pub fn byte_len(&self) -> usize {
        self.desc.len
    }

    /// Length of the backing region, payload plus footer
    pub fn mapped_len(&self) -> usize {
        self.desc.mapped_len
    }

    /// Layout to send along with the handle
    pub fn descriptor(&self) -> BufferDescriptor {
        self.desc
    }

    /// Start of the mapping, `None` once released
    pub fn base_address(&self) -> Option<NonNull<u8>> {
        self.mapping.as_ref().map(|m| m.addr)
    }

    /// Sharable handle, `None` once released
    pub fn handle(&self) -> Option<BorrowedFd<'_>> {
        self.handle.as_ref().map(|h| h.as_fd())
    }

    /// Duplicate the sharable handle for another owner
    pub fn try_clone_handle(&self) -> Result<OwnedFd> {
        let handle = self.handle.as_ref().ok_or(Error::Released)?;
        handle
            .try_clone()
            .map_err(|e| Error::InvalidHandle(e.to_string()))
    }

    /// Raw compute memory object, if registered
    pub fn compute_memory(&self) -> Option<u64> {
        self.compute.as_ref().map(|m| m.raw())
    }

    pub fn is_registered(&self) -> bool {
        self.compute.is_some()
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    /// Identifier of the data currently held
    pub fn frame_id(&self) -> Result<u64> {
        let mapping = self.mapping.as_ref().ok_or(Error::Released)?;
        Ok(mapping.frame_counter.get())
    }

    /// Stamp the data currently held
    pub fn set_frame_id(&mut self, frame_id: u64) -> Result<()> {
        let mapping = self.mapping.as_ref().ok_or(Error::Released)?;
        mapping.frame_counter.set(frame_id);
        Ok(())
    }

    /// Payload bytes, the footer excluded
    pub fn as_slice(&self) -> Result<&[u8]> {
        let mapping = self.mapping.as_ref().ok_or(Error::Released)?;
        Ok(unsafe { std::slice::from_raw_parts(mapping.addr.as_ptr(), self.desc.len) })
    }

    /// Mutable payload bytes, the footer excluded
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        let mapping = self.mapping.as_ref().ok_or(Error::Released)?;
        Ok(unsafe { std::slice::from_raw_parts_mut(mapping.addr.as_ptr(), self.desc.len) })
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("handle", &self.handle)
            .field("base_address", &self.base_address())
            .field("len", &self.desc.len)
            .field("mapped_len", &self.desc.mapped_len)
            .field("compute_memory", &self.compute_memory())
            .finish()
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        if self.is_released() {
            return;
        }
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "implicit release of shared buffer failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::MemfdHeap;
    use crate::layout::{FRAME_COUNTER_SIZE, PADDING};

    fn platform() -> Platform {
        Platform::new(Arc::new(MemfdHeap::new()))
    }

    #[test]
    fn test_allocate_zero_filled() {
        let buf = SharedBuffer::allocate(&platform(), 4096).unwrap();
        assert_eq!(buf.byte_len(), 4096);
        assert_eq!(buf.mapped_len(), 4096 + PADDING + FRAME_COUNTER_SIZE);
        assert!(buf.base_address().is_some());
        assert!(buf.handle().is_some());
        assert!(!buf.is_registered());
        assert!(buf.as_slice().unwrap().iter().all(|&b| b == 0));
        assert_eq!(buf.frame_id().unwrap(), 0);
    }

    #[test]
    fn test_allocate_zero_rejected() {
        let err = SharedBuffer::allocate(&platform(), 0).unwrap_err();
        assert!(matches!(err, Error::ZeroLength));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_allocate_overflow_rejected() {
        let err = SharedBuffer::allocate(&platform(), usize::MAX).unwrap_err();
        assert!(matches!(err, Error::TooLarge(len) if len == usize::MAX));
        assert!(err.is_fatal());
        assert!(!err.to_string().contains("mapped length"));
    }

    #[test]
    fn test_frame_id_outside_payload() {
        let mut buf = SharedBuffer::allocate(&platform(), 100).unwrap();
        buf.as_mut_slice().unwrap().fill(0xFF);
        buf.set_frame_id(42).unwrap();
        assert_eq!(buf.frame_id().unwrap(), 42);
        assert!(buf.as_slice().unwrap().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_release_rejects_reuse() {
        let mut buf = SharedBuffer::allocate(&platform(), 64).unwrap();
        buf.release().unwrap();

        assert!(buf.is_released());
        assert!(buf.base_address().is_none());
        assert!(buf.handle().is_none());
        assert!(matches!(buf.release(), Err(Error::Released)));
        assert!(matches!(buf.sync(SyncDirection::ToDevice), Err(Error::Released)));
        assert!(matches!(buf.as_slice(), Err(Error::Released)));
        assert!(matches!(buf.frame_id(), Err(Error::Released)));
        assert!(matches!(buf.try_clone_handle(), Err(Error::Released)));
    }

    #[test]
    fn test_import_raw_rejects_bad_descriptors() {
        let platform = platform();
        let err = unsafe { SharedBuffer::import_raw(&platform, -1, 64, 72) }.unwrap_err();
        assert!(matches!(err, Error::InvalidHandle(_)));
        assert!(err.is_fatal());

        // A descriptor number nobody has open
        let err = unsafe { SharedBuffer::import_raw(&platform, 1 << 20, 64, 72) }.unwrap_err();
        assert!(matches!(err, Error::InvalidHandle(_)));
    }

    #[test]
    fn test_import_rejects_short_region() {
        let platform = platform();
        let buf = SharedBuffer::allocate(&platform, 64).unwrap();
        let handle = buf.try_clone_handle().unwrap();
        let err = SharedBuffer::import(&platform, handle, 64, 64).unwrap_err();
        assert!(matches!(err, Error::InvalidLayout { .. }));
    }
}
