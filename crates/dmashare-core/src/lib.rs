//! dmashare - Zero-copy DMA-BUF shared buffers

pub mod buffer;
pub mod compute;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod dma_buf;
pub mod dma_heap;
pub mod error;
pub mod heap;
pub mod ion;
pub mod layout;
pub mod mapper;
mod sys;

pub use buffer::{Platform, SharedBuffer};
pub use compute::{ComputeContext, ComputeMemory, HostRegion};
pub use dma_buf::SyncDirection;
pub use dma_heap::DmaHeap;
pub use error::{Error, Result};
pub use heap::{Allocation, BufferHeap, HeapKind, MemfdHeap};
pub use ion::IonHeap;
pub use layout::{BufferDescriptor, DEVICE_PAGE_SIZE, FRAME_COUNTER_SIZE, PADDING};
pub use mapper::{Mapper, MmapMapper};
pub use sys::MAX_EINTR_RETRIES;

#[cfg(feature = "cuda")]
pub use cuda::{CudaContext, CudaHostMemory};
