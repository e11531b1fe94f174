//! Kernel call helpers

use nix::errno::Errno;

/// Attempts allowed for a call that keeps getting interrupted by signals
pub const MAX_EINTR_RETRIES: usize = 100;

/// Re-issue `f` while it fails with `EINTR`, up to [`MAX_EINTR_RETRIES`] retries
pub(crate) fn retry_eintr<T>(mut f: impl FnMut() -> nix::Result<T>) -> nix::Result<T> {
    let mut retries = 0;
    loop {
        match f() {
            Err(Errno::EINTR) if retries < MAX_EINTR_RETRIES => {
                retries += 1;
                tracing::trace!(retries, "kernel call interrupted, retrying");
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_until_success() {
        let mut calls = 0;
        let result = retry_eintr(|| {
            calls += 1;
            if calls < 4 {
                Err(Errno::EINTR)
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(4));
    }

    #[test]
    fn test_retry_is_bounded() {
        let mut calls = 0;
        let result: nix::Result<()> = retry_eintr(|| {
            calls += 1;
            Err(Errno::EINTR)
        });
        assert_eq!(result, Err(Errno::EINTR));
        assert_eq!(calls, MAX_EINTR_RETRIES + 1);
    }

    #[test]
    fn test_other_errors_not_retried() {
        let mut calls = 0;
        let result: nix::Result<()> = retry_eintr(|| {
            calls += 1;
            Err(Errno::EBADF)
        });
        assert_eq!(result, Err(Errno::EBADF));
        assert_eq!(calls, 1);
    }
}
