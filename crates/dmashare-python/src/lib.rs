//! Python bindings for dmashare

use dmashare_core::{HeapKind, Platform, SharedBuffer as CoreBuffer, SyncDirection};
use pyo3::exceptions::{PyOSError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyBytes;
use std::os::fd::{AsRawFd, BorrowedFd};

/// Fatal errors become RuntimeError, the rest OSError
fn to_py_err(e: dmashare_core::Error) -> PyErr {
    if e.is_fatal() {
        PyRuntimeError::new_err(e.to_string())
    } else {
        PyOSError::new_err(e.to_string())
    }
}

/// Explicit heap name, or the one selected by `DMASHARE_HEAP`
fn platform(heap: Option<&str>) -> PyResult<Platform> {
    let kind = HeapKind::resolve(heap).map_err(to_py_err)?;
    Ok(Platform::new(kind.open().map_err(to_py_err)?))
}

/// Python wrapper for SharedBuffer
#[pyclass(unsendable)]
struct SharedBuffer {
    inner: CoreBuffer,
}

impl SharedBuffer {
    fn check_range(&self, offset: usize, size: usize) -> PyResult<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.inner.byte_len() => Ok(()),
            _ => Err(PyValueError::new_err(format!(
                "range {}..+{} outside buffer of {} bytes",
                offset,
                size,
                self.inner.byte_len()
            ))),
        }
    }
}

#[pymethods]
impl SharedBuffer {
    #[staticmethod]
    #[pyo3(signature = (len, heap = None))]
    fn allocate(len: usize, heap: Option<&str>) -> PyResult<Self> {
        let inner = CoreBuffer::allocate(&platform(heap)?, len).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Import a handle; the descriptor is duplicated, the caller keeps `fd`
    #[staticmethod]
    #[pyo3(signature = (fd, len, mapped_len, heap = None))]
    fn import_fd(fd: i32, len: usize, mapped_len: usize, heap: Option<&str>) -> PyResult<Self> {
        if fd < 0 {
            return Err(PyValueError::new_err(format!("invalid descriptor {}", fd)));
        }
        let handle = unsafe { BorrowedFd::borrow_raw(fd) }
            .try_clone_to_owned()
            .map_err(|e| PyOSError::new_err(e.to_string()))?;
        let inner = CoreBuffer::import(&platform(heap)?, handle, len, mapped_len).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    fn sync_to_device(&self) -> PyResult<()> {
        self.inner.sync(SyncDirection::ToDevice).map_err(to_py_err)
    }

    fn sync_from_device(&self) -> PyResult<()> {
        self.inner.sync(SyncDirection::FromDevice).map_err(to_py_err)
    }

    #[getter]
    fn fd(&self) -> PyResult<i32> {
        self.inner
            .handle()
            .map(|h| h.as_raw_fd())
            .ok_or_else(|| to_py_err(dmashare_core::Error::Released))
    }

    #[getter]
    fn mapped_len(&self) -> usize {
        self.inner.mapped_len()
    }

    fn __len__(&self) -> usize {
        self.inner.byte_len()
    }

    #[getter]
    fn frame_id(&self) -> PyResult<u64> {
        self.inner.frame_id().map_err(to_py_err)
    }

    #[setter]
    fn set_frame_id(&mut self, frame_id: u64) -> PyResult<()> {
        self.inner.set_frame_id(frame_id).map_err(to_py_err)
    }

    /// Copy payload bytes out
    #[pyo3(signature = (offset = 0, size = None))]
    fn read<'py>(&self, py: Python<'py>, offset: usize, size: Option<usize>) -> PyResult<&'py PyBytes> {
        let size = size.unwrap_or_else(|| self.inner.byte_len().saturating_sub(offset));
        self.check_range(offset, size)?;
        let data = self.inner.as_slice().map_err(to_py_err)?;
        Ok(PyBytes::new(py, &data[offset..offset + size]))
    }

    /// Copy bytes into the payload
    fn write(&mut self, offset: usize, data: &[u8]) -> PyResult<()> {
        self.check_range(offset, data.len())?;
        let dst = self.inner.as_mut_slice().map_err(to_py_err)?;
        dst[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn release(&mut self) -> PyResult<()> {
        self.inner.release().map_err(to_py_err)
    }

    #[getter]
    fn released(&self) -> bool {
        self.inner.is_released()
    }
}

#[pymodule]
fn dmashare(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<SharedBuffer>()?;
    Ok(())
}
