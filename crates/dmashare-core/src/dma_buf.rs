//! DMA-BUF cache synchronization
//!
//! `DMA_BUF_IOCTL_SYNC` is part of the kernel's stable ABI and works on
//! every dma-buf fd, whichever heap produced it and whichever process
//! mapped it.

use crate::sys::retry_eintr;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};

const DMA_BUF_SYNC_READ: u64 = 1 << 0;
const DMA_BUF_SYNC_WRITE: u64 = 1 << 1;
const DMA_BUF_SYNC_RW: u64 = DMA_BUF_SYNC_READ | DMA_BUF_SYNC_WRITE;
const DMA_BUF_SYNC_START: u64 = 0 << 2;
const DMA_BUF_SYNC_END: u64 = 1 << 2;

mod ioctl {
    #[repr(C)]
    pub struct DmaBufSync {
        pub flags: u64,
    }

    nix::ioctl_write_ptr!(dma_buf_ioctl_sync, b'b', 0, DmaBufSync);
}

/// Direction of a cache-coherency hand-over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// CPU writes are done, flush them before a device reads
    ToDevice,
    /// Device access is done, invalidate before the CPU reads
    FromDevice,
}

impl SyncDirection {
    /// Flags passed to the kernel. Both read and write caches are always covered.
    pub fn flags(self) -> u64 {
        match self {
            SyncDirection::FromDevice => DMA_BUF_SYNC_START | DMA_BUF_SYNC_RW,
            SyncDirection::ToDevice => DMA_BUF_SYNC_END | DMA_BUF_SYNC_RW,
        }
    }
}

/// Issue a cache sync on a dma-buf handle
pub fn sync(handle: BorrowedFd<'_>, direction: SyncDirection) -> io::Result<()> {
    let request = ioctl::DmaBufSync {
        flags: direction.flags(),
    };
    retry_eintr(|| unsafe { ioctl::dma_buf_ioctl_sync(handle.as_raw_fd(), &request) })
        .map(drop)
        .map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
    use std::os::fd::AsFd;

    #[test]
    fn test_direction_flags() {
        assert_eq!(SyncDirection::FromDevice.flags(), 0b011);
        assert_eq!(SyncDirection::ToDevice.flags(), 0b111);
    }

    #[test]
    fn test_sync_rejects_non_dmabuf() {
        let fd = memfd_create(c"not-a-dmabuf", MemFdCreateFlag::MFD_CLOEXEC).unwrap();
        let err = sync(fd.as_fd(), SyncDirection::ToDevice).unwrap_err();
        assert_ne!(err.kind(), io::ErrorKind::Interrupted);
        assert_eq!(err.raw_os_error(), Some(nix::libc::ENOTTY));
    }
}
