//! CUDA zero-copy registration
//!
//! The host mapping is page-locked and mapped into the device address
//! space with `cuMemHostRegister`, so kernels read and write the dma-buf
//! pages directly.

use crate::compute::{ComputeContext, ComputeMemory, HostRegion};
use crate::{Error, Result};
use cudarc::driver::{sys, CudaDevice};
use std::ffi::c_void;
use std::sync::Arc;

/// `CU_MEMHOSTREGISTER_DEVICEMAP`
const HOST_REGISTER_DEVICEMAP: u32 = 0x02;

/// Map a driver status to `Err` naming the failed call
fn check(result: sys::CUresult, call: &str) -> std::result::Result<(), String> {
    if result == sys::CUresult::CUDA_SUCCESS {
        Ok(())
    } else {
        Err(format!("{} failed: {:?}", call, result))
    }
}

/// Compute context on one CUDA device
pub struct CudaContext {
    device: Arc<CudaDevice>,
    device_id: usize,
}

impl CudaContext {
    /// Bind the primary context of device `device_id`
    pub fn new(device_id: usize) -> Result<Self> {
        let device = CudaDevice::new(device_id).map_err(|e| Error::Cuda(e.to_string()))?;
        Ok(Self { device, device_id })
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }
}

impl ComputeContext for CudaContext {
    fn register(&self, region: HostRegion<'_>) -> Result<Box<dyn ComputeMemory>> {
        self.device
            .bind_to_thread()
            .map_err(|e| Error::Cuda(e.to_string()))?;

        let host = region.addr.as_ptr() as *mut c_void;
        let mut device_ptr: sys::CUdeviceptr = 0;

        unsafe {
            check(
                sys::cuMemHostRegister_v2(host, region.len, HOST_REGISTER_DEVICEMAP),
                "cuMemHostRegister",
            )
            .map_err(Error::ComputeRejected)?;

            if let Err(e) = check(
                sys::cuMemHostGetDevicePointer_v2(&mut device_ptr, host, 0),
                "cuMemHostGetDevicePointer",
            ) {
                if let Err(cleanup) = check(sys::cuMemHostUnregister(host), "cuMemHostUnregister") {
                    tracing::warn!(error = %cleanup, "unregistering host range after failed registration");
                }
                return Err(Error::ComputeRejected(e));
            }
        }

        Ok(Box::new(CudaHostMemory {
            device: self.device.clone(),
            host,
            device_ptr,
            registered: true,
        }))
    }
}

/// Registered host range and its device pointer
pub struct CudaHostMemory {
    device: Arc<CudaDevice>,
    host: *mut c_void,
    device_ptr: sys::CUdeviceptr,
    registered: bool,
}

impl CudaHostMemory {
    fn unregister(&self) -> Result<()> {
        self.device
            .bind_to_thread()
            .map_err(|e| Error::Cuda(e.to_string()))?;
        check(unsafe { sys::cuMemHostUnregister(self.host) }, "cuMemHostUnregister").map_err(Error::Cuda)
    }
}

impl ComputeMemory for CudaHostMemory {
    fn raw(&self) -> u64 {
        self.device_ptr as u64
    }

    fn release(&mut self) -> Result<()> {
        if self.registered {
            self.unregister()?;
            self.registered = false;
        }
        Ok(())
    }
}

impl Drop for CudaHostMemory {
    fn drop(&mut self) {
        if self.registered {
            if let Err(e) = self.unregister() {
                tracing::warn!(error = %e, "implicit unregister of CUDA host memory failed");
            }
        }
    }
}

// Safety: the host pointer is only handed back to the driver, which is
// thread-safe when the owning context is bound first
unsafe impl Send for CudaHostMemory {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_names_failed_call() {
        assert!(check(sys::CUresult::CUDA_SUCCESS, "cuMemHostUnregister").is_ok());

        let err = check(sys::CUresult::CUDA_ERROR_INVALID_VALUE, "cuMemHostUnregister").unwrap_err();
        assert!(err.starts_with("cuMemHostUnregister failed"));
        assert!(err.contains("CUDA_ERROR_INVALID_VALUE"));
    }
}
