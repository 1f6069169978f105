//! Sync fences: opaque kernel handles signalling asynchronous completion.
//!
//! The queue stores and forwards fences between producer and consumer but
//! never interprets them. A fence is either invalid (nothing to wait for),
//! already signalled (local software rendering), or backed by a pollable
//! file descriptor such as a `sync_file` from the GPU driver.

use std::os::fd::{AsFd, OwnedFd};

use rustix::event::{poll, PollFd, PollFlags};
use tracing::trace;

use crate::error::{SurfaceError, SurfaceResult};

#[derive(Debug)]
enum Inner {
    Invalid,
    Signalled,
    Fd(OwnedFd),
}

/// An opaque completion handle attached to a buffer handoff.
///
/// Producers attach the GPU's render-done fence on flush; consumers attach
/// their presentation-done fence on release. The peer must wait on the fence
/// before touching the pixels.
#[derive(Debug)]
pub struct SyncFence {
    inner: Inner,
}

impl SyncFence {
    /// A fence that carries no completion obligation.
    pub fn invalid() -> SyncFence {
        SyncFence { inner: Inner::Invalid }
    }

    /// A fence that is already signalled. Used by software rendering paths.
    pub fn signalled() -> SyncFence {
        SyncFence { inner: Inner::Signalled }
    }

    /// Wraps a pollable fence fd.
    pub fn from_fd(fd: OwnedFd) -> SyncFence {
        SyncFence { inner: Inner::Fd(fd) }
    }

    /// Whether waiting on this fence is meaningful.
    pub fn is_valid(&self) -> bool {
        !matches!(self.inner, Inner::Invalid)
    }

    /// Waits for the fence to signal.
    ///
    /// Returns `Ok(true)` once signalled, `Ok(false)` on timeout. Invalid
    /// and pre-signalled fences return immediately. A negative timeout
    /// blocks until the fence signals.
    pub fn wait(&self, timeout_ms: i32) -> SurfaceResult<bool> {
        let fd = match &self.inner {
            Inner::Invalid | Inner::Signalled => return Ok(true),
            Inner::Fd(fd) => fd,
        };
        loop {
            let mut fds = [PollFd::new(fd, PollFlags::IN)];
            match poll(&mut fds, timeout_ms) {
                Ok(0) => {
                    trace!(timeout_ms, "fence wait timed out");
                    return Ok(false);
                }
                // POLLERR on a sync_file also means the work retired.
                Ok(_) => return Ok(true),
                Err(rustix::io::Errno::INTR) => continue,
                Err(_) => return Err(SurfaceError::ApiFailed { errno: libc::EINVAL }),
            }
        }
    }

    /// Duplicates the underlying fd for transport. Fences with nothing to
    /// wait on serialize as "no fd": the receiver reconstructs an invalid
    /// fence, which imposes the same (empty) obligation.
    pub fn dup_fd(&self) -> SurfaceResult<Option<OwnedFd>> {
        match &self.inner {
            Inner::Invalid | Inner::Signalled => Ok(None),
            Inner::Fd(fd) => fd
                .as_fd()
                .try_clone_to_owned()
                .map(Some)
                .map_err(|_| SurfaceError::ApiFailed { errno: libc::EBADF }),
        }
    }
}

impl Default for SyncFence {
    fn default() -> Self {
        SyncFence::invalid()
    }
}
