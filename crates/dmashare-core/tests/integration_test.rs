//! Cross-process integration tests
//!
//! Uses fork() so the importing side is a genuinely separate process
//! holding its own mapping of the inherited handle.

#[cfg(all(test, feature = "integration"))]
mod integration {
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};
    use std::os::fd::{AsRawFd, IntoRawFd};
    use std::sync::Arc;

    use dmashare_core::{MemfdHeap, Platform, SharedBuffer, SyncDirection};

    fn platform() -> Platform {
        Platform::new(Arc::new(MemfdHeap::new()))
    }

    /// Check that the child exited cleanly
    fn is_exit_success(status: WaitStatus) -> bool {
        matches!(status, WaitStatus::Exited(_, code) if code == 0)
    }

    /// Child writes through its own import, parent reads after sync
    #[test]
    fn test_child_writes_parent_reads() {
        let platform = platform();
        let mut buf = SharedBuffer::allocate(&platform, 4096).unwrap();
        let desc = buf.descriptor();
        let fd = buf.try_clone_handle().unwrap().into_raw_fd();

        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let ok = (|| -> dmashare_core::Result<()> {
                    let mut view = unsafe { SharedBuffer::import_raw(&platform, fd, desc.len, desc.mapped_len)? };
                    view.sync(SyncDirection::FromDevice)?;
                    view.as_mut_slice()?[..100].fill(0xAB);
                    view.set_frame_id(1234)?;
                    view.sync(SyncDirection::ToDevice)?;
                    view.release()
                })()
                .is_ok();
                std::process::exit(if ok { 0 } else { 1 });
            }
            ForkResult::Parent { child } => {
                let status = waitpid(child, None).unwrap();
                assert!(is_exit_success(status));

                buf.sync(SyncDirection::FromDevice).unwrap();
                let data = buf.as_slice().unwrap();
                assert!(data[..100].iter().all(|&b| b == 0xAB));
                assert!(data[100..].iter().all(|&b| b == 0x00));
                assert_eq!(buf.frame_id().unwrap(), 1234);

                let _ = nix::unistd::close(fd);
                buf.release().unwrap();
            }
        }
    }

    /// Releasing in one process leaves the other's mapping intact
    #[test]
    fn test_release_is_per_process() {
        let platform = platform();
        let mut buf = SharedBuffer::allocate(&platform, 512).unwrap();
        buf.as_mut_slice().unwrap().fill(0x11);
        buf.sync(SyncDirection::ToDevice).unwrap();
        let handle = buf.try_clone_handle().unwrap();
        let desc = buf.descriptor();

        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let ok = buf.release().is_ok();
                std::process::exit(if ok { 0 } else { 1 });
            }
            ForkResult::Parent { child } => {
                let status = waitpid(child, None).unwrap();
                assert!(is_exit_success(status));

                assert!(buf.as_slice().unwrap().iter().all(|&b| b == 0x11));
                assert!(handle.as_raw_fd() >= 0);
                let view = SharedBuffer::import(&platform, handle, desc.len, desc.mapped_len).unwrap();
                assert!(view.as_slice().unwrap().iter().all(|&b| b == 0x11));
            }
        }
    }
}
