//! Wire protocol plumbing: parcels, request codes and the transport seam.
//!
//! The queue's methods are invoked through a transport whose wire format is
//! the parcel byte stream plus an fd side channel. The kernel binder is the
//! production carrier; [`LoopbackTransport`] is the in-process stand-in that
//! exercises the same marshalling byte-for-byte, used by local rendering and
//! tests. Both directions (producer calls and listener callbacks) use the
//! same shapes.

mod code;
mod parcel;

pub use code::{ListenerCode, RequestCode};
pub use parcel::{Parcel, SURFACE_PARCEL_SIZE_LIMIT};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::{SurfaceError, SurfaceResult};

/// Identity of the process a request came from.
#[derive(Debug, Clone, Copy)]
pub struct CallerContext {
    /// The caller's pid as the kernel reports it.
    pub pid: u64,
}

impl CallerContext {
    /// The current process.
    pub fn local() -> CallerContext {
        CallerContext {
            pid: std::process::id() as u64,
        }
    }
}

/// Server side of a transport: decodes a code + parcel into a reply parcel.
///
/// The first field of every reply is the `i32` error code; payload follows
/// only on success.
pub trait RemoteStub: Send + Sync {
    /// Handles one request.
    fn on_remote_request(&self, caller: CallerContext, code: u32, data: &mut Parcel) -> Parcel;
}

/// Client side of a transport.
pub trait Transport: Send + Sync {
    /// Synchronous round trip.
    fn send_request(&self, code: u32, data: Parcel) -> SurfaceResult<Parcel>;
    /// Fire-and-forget, per-sender ordered. Used by listener callbacks.
    fn send_async(&self, code: u32, data: Parcel) -> SurfaceResult<()>;
    /// Runs `callback` once if the remote dies.
    fn register_death_recipient(&self, callback: Box<dyn Fn() + Send + Sync>);
}

/// In-process transport: requests dispatch straight into a [`RemoteStub`].
///
/// Death is simulated rather than observed, which is what the unit tests
/// need to drive the self-heal paths.
pub struct LoopbackTransport {
    stub: Arc<dyn RemoteStub>,
    caller: CallerContext,
    dead: AtomicBool,
    death_recipients: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("caller", &self.caller)
            .field("dead", &self.dead.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl LoopbackTransport {
    /// Wraps a stub, attributing requests to the current process.
    pub fn new(stub: Arc<dyn RemoteStub>) -> Arc<LoopbackTransport> {
        LoopbackTransport::with_caller(stub, CallerContext::local())
    }

    /// Wraps a stub with an explicit caller identity, so tests can
    /// impersonate a second process.
    pub fn with_caller(
        stub: Arc<dyn RemoteStub>,
        caller: CallerContext,
    ) -> Arc<LoopbackTransport> {
        Arc::new(LoopbackTransport {
            stub,
            caller,
            dead: AtomicBool::new(false),
            death_recipients: Mutex::new(Vec::new()),
        })
    }

    /// Marks the remote dead and fires every death recipient once.
    pub fn simulate_death(&self) {
        if self.dead.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("loopback remote died");
        let recipients = std::mem::take(&mut *self.death_recipients.lock().unwrap());
        for recipient in recipients {
            recipient();
        }
    }
}

impl Transport for LoopbackTransport {
    fn send_request(&self, code: u32, mut data: Parcel) -> SurfaceResult<Parcel> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(SurfaceError::Binder);
        }
        Ok(self.stub.on_remote_request(self.caller, code, &mut data))
    }

    fn send_async(&self, code: u32, data: Parcel) -> SurfaceResult<()> {
        self.send_request(code, data).map(|_| ())
    }

    fn register_death_recipient(&self, callback: Box<dyn Fn() + Send + Sync>) {
        if self.dead.load(Ordering::SeqCst) {
            callback();
            return;
        }
        self.death_recipients.lock().unwrap().push(callback);
    }
}
