//! DMA-BUF heap backend (`/dev/dma_heap/<name>`), ION's upstream replacement

use crate::dma_buf::{self, SyncDirection};
use crate::heap::{Allocation, BufferHeap};
use crate::sys::retry_eintr;
use crate::{Error, Result};
use nix::fcntl::OFlag;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;

/// Directory holding the heap device nodes
pub const DMA_HEAP_DIR: &str = "/dev/dma_heap";

/// Heap used by [`DmaHeap::open`]
pub const DEFAULT_DMA_HEAP: &str = "system";

mod ioctl {
    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct DmaHeapAllocationData {
        pub len: u64,
        pub fd: u32,
        pub fd_flags: u32,
        pub heap_flags: u64,
    }

    nix::ioctl_readwrite!(dma_heap_ioctl_alloc, b'H', 0, DmaHeapAllocationData);
}

#[derive(Debug)]
pub struct DmaHeap {
    device: File,
    name: String,
}

impl DmaHeap {
    /// Open the system heap
    pub fn open() -> Result<Self> {
        Self::open_named(DEFAULT_DMA_HEAP)
    }

    /// Open a heap by name, e.g. `"system"` or `"linux,cma"`
    pub fn open_named(name: &str) -> Result<Self> {
        let path: PathBuf = [DMA_HEAP_DIR, name].iter().collect();
        let device = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|source| Error::Device {
                path: path.display().to_string(),
                source,
            })?;

        tracing::debug!(heap = name, "opened DMA-BUF heap");
        Ok(Self {
            device,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl BufferHeap for DmaHeap {
    fn allocate(&self, len: usize) -> io::Result<Allocation> {
        let mut data = ioctl::DmaHeapAllocationData {
            len: len as u64,
            fd_flags: (OFlag::O_RDWR | OFlag::O_CLOEXEC).bits() as u32,
            ..Default::default()
        };
        retry_eintr(|| unsafe { ioctl::dma_heap_ioctl_alloc(self.device.as_raw_fd(), &mut data) })?;

        let handle = unsafe { OwnedFd::from_raw_fd(data.fd as RawFd) };
        Ok(Allocation {
            handle,
            mapped_len: data.len as usize,
        })
    }

    fn sync(&self, handle: BorrowedFd<'_>, direction: SyncDirection) -> io::Result<()> {
        dma_buf::sync(handle, direction)
    }
}
