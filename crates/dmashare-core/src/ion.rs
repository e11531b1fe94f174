//! ION heap backend
//!
//! Since kernel 4.12 `ION_IOC_ALLOC` hands back a dma-buf fd directly, so
//! there is no ION client handle to share or free. The device fd is only
//! needed to allocate; it is opened once per process and shared.

use crate::dma_buf::{self, SyncDirection};
use crate::heap::{Allocation, BufferHeap};
use crate::sys::retry_eintr;
use crate::{Error, Result};
use nix::fcntl::OFlag;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Default ION device node
pub const ION_DEVICE: &str = "/dev/ion";

/// System heap id on msm kernels
pub const ION_SYSTEM_HEAP_ID: u32 = 25;

/// Ask for CPU-cached pages
pub const ION_FLAG_CACHED: u32 = 1;

mod ioctl {
    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct IonAllocationData {
        pub len: u64,
        pub heap_id_mask: u32,
        pub flags: u32,
        pub fd: u32,
        pub unused: u32,
    }

    nix::ioctl_readwrite!(ion_ioc_alloc, b'I', 0, IonAllocationData);
}

static SHARED: Mutex<Weak<IonHeap>> = Mutex::new(Weak::new());

/// Allocator over an open ION device
#[derive(Debug)]
pub struct IonHeap {
    device: File,
    heap_id_mask: u32,
}

impl IonHeap {
    /// Open the default ION device
    pub fn open() -> Result<Self> {
        Self::open_path(ION_DEVICE)
    }

    /// Open an ION device at a custom path
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(path)
            .map_err(|source| Error::Device {
                path: path.display().to_string(),
                source,
            })?;

        tracing::debug!(path = %path.display(), "opened ION device");
        Ok(Self {
            device,
            heap_id_mask: 1 << ION_SYSTEM_HEAP_ID,
        })
    }

    /// Process-wide ION heap
    ///
    /// The device is opened on first use and closed once the last
    /// returned handle is dropped.
    pub fn shared() -> Result<Arc<Self>> {
        let mut slot = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(heap) = slot.upgrade() {
            return Ok(heap);
        }
        let heap = Arc::new(Self::open()?);
        *slot = Arc::downgrade(&heap);
        Ok(heap)
    }

    /// Allocate from a different set of heaps
    pub fn with_heap_mask(mut self, heap_id_mask: u32) -> Self {
        self.heap_id_mask = heap_id_mask;
        self
    }

    pub fn heap_id_mask(&self) -> u32 {
        self.heap_id_mask
    }
}

impl BufferHeap for IonHeap {
    fn allocate(&self, len: usize) -> io::Result<Allocation> {
        let mut data = ioctl::IonAllocationData {
            len: len as u64,
            heap_id_mask: self.heap_id_mask,
            flags: ION_FLAG_CACHED,
            ..Default::default()
        };
        retry_eintr(|| unsafe { ioctl::ion_ioc_alloc(self.device.as_raw_fd(), &mut data) })?;

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
