//! Kernel buffer-heap capability
//!
//! A heap hands out sharable handles (file descriptors) to fresh regions,
//! syncs caches on them and closes them again. [`SharedBuffer`] only
//! talks to a heap through [`BufferHeap`], so tests can substitute one.
//!
//! [`SharedBuffer`]: crate::SharedBuffer

use crate::dma_buf::SyncDirection;
use crate::dma_heap::DmaHeap;
use crate::ion::IonHeap;
use crate::{Error, Result};
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use std::env::VarError;
use std::fs::File;
use std::io;
use std::os::fd::{BorrowedFd, IntoRawFd, OwnedFd};
use std::str::FromStr;
use std::sync::Arc;

/// Environment variable consulted by [`HeapKind::from_env`]
pub const HEAP_ENV: &str = "DMASHARE_HEAP";

/// A region handed out by a heap
#[derive(Debug)]
pub struct Allocation {
    /// Sharable handle to the region
    pub handle: OwnedFd,
    /// Length the heap reports for the region
    pub mapped_len: usize,
}

pub trait BufferHeap: Send + Sync {
    /// Allocate a CPU-cacheable region of at least `len` bytes
    fn allocate(&self, len: usize) -> io::Result<Allocation>;

    /// Synchronize caches for a handle issued by this heap (or imported)
    fn sync(&self, handle: BorrowedFd<'_>, direction: SyncDirection) -> io::Result<()>;

    /// Close a handle, surfacing the kernel's answer
    fn release(&self, handle: OwnedFd) -> io::Result<()> {
        close_handle(handle)
    }
}

/// Close a handle without swallowing the error like `OwnedFd`'s drop does
pub fn close_handle(handle: OwnedFd) -> io::Result<()> {
    nix::unistd::close(handle.into_raw_fd()).map_err(io::Error::from)
}

/// Anonymous shared memory heap
///
/// Works on any Linux kernel. The pages are ordinary CPU-coherent
/// memory, so sync has nothing to do.
#[derive(Debug, Default)]
pub struct MemfdHeap;

impl MemfdHeap {
    pub fn new() -> Self {
        Self
    }
}

impl BufferHeap for MemfdHeap {
    fn allocate(&self, len: usize) -> io::Result<Allocation> {
        let fd = memfd_create(c"dmashare", MemFdCreateFlag::MFD_CLOEXEC)?;
        let file = File::from(fd);
        file.set_len(len as u64)?;
        Ok(Allocation {
            handle: file.into(),
            mapped_len: len,
        })
    }

    fn sync(&self, _handle: BorrowedFd<'_>, _direction: SyncDirection) -> io::Result<()> {
        Ok(())
    }
}

/// Heap backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapKind {
    /// Legacy ION allocator, `/dev/ion`
    Ion,
    /// DMA-BUF system heap, `/dev/dma_heap/system`
    DmaHeap,
    /// memfd, no device needed
    Memfd,
}

impl HeapKind {
    /// Read the backend from [`HEAP_ENV`], defaulting to the DMA-BUF heap
    pub fn from_env() -> Result<Self> {
        Self::from_env_value(std::env::var(HEAP_ENV))
    }

    /// Use `explicit` if given, otherwise [`HeapKind::from_env`]
    pub fn resolve(explicit: Option<&str>) -> Result<Self> {
        match explicit {
            Some(name) => name.parse(),
            None => Self::from_env(),
        }
    }

    fn from_env_value(value: std::result::Result<String, VarError>) -> Result<Self> {
        match value {
            Ok(v) => v.parse(),
            Err(VarError::NotPresent) => Ok(HeapKind::DmaHeap),
            Err(VarError::NotUnicode(raw)) => Err(Error::Config(format!(
                "{HEAP_ENV} is not valid unicode: {}",
                raw.to_string_lossy()
            ))),
        }
    }

    /// Open the selected backend
    pub fn open(self) -> Result<Arc<dyn BufferHeap>> {
        let heap: Arc<dyn BufferHeap> = match self {
            HeapKind::Ion => IonHeap::shared()?,
            HeapKind::DmaHeap => Arc::new(DmaHeap::open()?),
            HeapKind::Memfd => Arc::new(MemfdHeap::new()),
        };
        Ok(heap)
    }
}

impl FromStr for HeapKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ion" => Ok(HeapKind::Ion),
            "dma-heap" | "dma_heap" | "dmaheap" => Ok(HeapKind::DmaHeap),
            "memfd" => Ok(HeapKind::Memfd),
            other => Err(Error::Config(format!("unknown heap kind: {other}"))),
        }
    }
}
