//! Error types for dmashare

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("buffer length must be non-zero")]
    ZeroLength,

    #[error("buffer length {0} overflows the addressable region size")]
    TooLarge(usize),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("opening heap device {path} failed: {source}")]
    Device { path: String, source: io::Error },

    #[error("heap allocation of {len} bytes failed: {source}")]
    HeapExhausted { len: usize, source: io::Error },

    #[error("mmap of {len} bytes failed: {source}")]
    Map { len: usize, source: io::Error },

    #[error("invalid sharable handle: {0}")]
    InvalidHandle(String),

    #[error("invalid layout: mapped length {mapped_len} cannot hold {len} payload bytes and footer")]
    InvalidLayout { len: usize, mapped_len: usize },

    #[error("mapping at {addr:#x} is not aligned to {align} bytes")]
    Misaligned { addr: usize, align: usize },

    #[error("compute context rejected registration: {0}")]
    ComputeRejected(String),

    #[error("buffer already registered with a compute context")]
    AlreadyRegistered,

    #[error("cache sync failed: {0}")]
    Sync(#[source] io::Error),

    #[error("releasing compute memory object failed: {0}")]
    ReleaseCompute(#[source] Box<Error>),

    #[error("munmap failed: {0}")]
    Unmap(#[source] io::Error),

    #[error("closing sharable handle failed: {0}")]
    Close(#[source] io::Error),

    #[error("buffer already released")]
    Released,

    #[cfg(feature = "cuda")]
    #[error("CUDA error: {0}")]
    Cuda(String),
}

impl Error {
    /// Whether the buffer invariants could not be established.
    ///
    /// Fatal errors mean the operation can never succeed with the same
    /// inputs on this platform. Everything else leaves the buffer
    /// structurally intact.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::ZeroLength
            | Error::TooLarge(_)
            | Error::Config(_)
            | Error::Device { .. }
            | Error::HeapExhausted { .. }
            | Error::Map { .. }
            | Error::InvalidHandle(_)
            | Error::InvalidLayout { .. }
            | Error::Misaligned { .. }
            | Error::ComputeRejected(_) => true,
            #[cfg(feature = "cuda")]
            Error::Cuda(_) => true,
            _ => false,
        }
    }

    /// A sync that kept getting interrupted until the retry budget ran out.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Sync(e) if e.kind() == io::ErrorKind::Interrupted)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
