//! Virtual-memory mapper capability

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use std::io;
use std::num::NonZeroUsize;
use std::os::fd::BorrowedFd;
use std::ptr::NonNull;

/// Maps sharable handles into the process address space
pub trait Mapper: Send + Sync {
    /// Map `len` bytes of `handle` shared and read/write
    fn map(&self, handle: BorrowedFd<'_>, len: usize) -> io::Result<NonNull<u8>>;

    /// Remove a mapping made by [`Mapper::map`]
    ///
    /// # Safety
    ///
    /// `addr` and `len` must come from a successful `map` on this mapper,
    /// and nothing may access the range afterwards.
    unsafe fn unmap(&self, addr: NonNull<u8>, len: usize) -> io::Result<()>;
}

/// `mmap(2)`-backed mapper
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapMapper;

impl Mapper for MmapMapper {
    fn map(&self, handle: BorrowedFd<'_>, len: usize) -> io::Result<NonNull<u8>> {
        let length = NonZeroUsize::new(len).ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        let addr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                handle,
                0,
            )?
        };
        Ok(addr.cast())
    }

    unsafe fn unmap(&self, addr: NonNull<u8>, len: usize) -> io::Result<()> {
        munmap(addr.cast(), len).map_err(io::Error::from)
    }
}
