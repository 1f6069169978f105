//! Release-notification dispatch from the consumer process back to the
//! producer.
//!
//! Both directions use the parcel shapes from [`crate::ipc`]. The proxy side
//! lives next to the queue and fires `OnBufferReleased[WithFence]`
//! asynchronously; the stub side lives in the producer process and invokes
//! the user callback. Delivery is fire-and-forget with per-sender ordering.

use std::sync::{Arc, Mutex};

use tracing::{trace, warn};

use crate::buffer::SurfaceBuffer;
use crate::error::{SurfaceError, SurfaceResult};
use crate::fence::SyncFence;
use crate::ipc::{CallerContext, ListenerCode, Parcel, RemoteStub, Transport};
use crate::queue::{OnReleaseFunc, ProducerListener};

/// Interface token checked on every listener message.
pub const LISTENER_TOKEN: &str = "framequeue.IProducerListener";

/// Release callback taking the buffer and its release fence.
pub type OnReleaseWithFenceFunc =
    Box<dyn Fn(&Arc<SurfaceBuffer>, &Arc<SyncFence>) -> SurfaceResult<()> + Send + Sync>;

/// Consumer-process proxy that forwards release events over a transport.
pub struct ProducerListenerProxy {
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for ProducerListenerProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerListenerProxy").finish_non_exhaustive()
    }
}

impl ProducerListenerProxy {
    /// Wraps the transport that reaches the producer's listener stub.
    pub fn new(transport: Arc<dyn Transport>) -> ProducerListenerProxy {
        ProducerListenerProxy { transport }
    }
}

impl ProducerListener for ProducerListenerProxy {
    fn on_buffer_released(&self) -> SurfaceResult<()> {
        let mut parcel = Parcel::new();
        parcel.write_string(LISTENER_TOKEN)?;
        self.transport
            .send_async(ListenerCode::OnBufferReleased as u32, parcel)
    }

    fn on_buffer_released_with_fence(
        &self,
        buffer: &Arc<SurfaceBuffer>,
        fence: &Arc<SyncFence>,
    ) -> SurfaceResult<()> {
        let mut parcel = Parcel::new();
        parcel.write_string(LISTENER_TOKEN)?;
        parcel.write_buffer(buffer)?;
        parcel.write_fence(fence)?;
        self.transport
            .send_async(ListenerCode::OnBufferReleasedWithFence as u32, parcel)
    }
}

/// Producer-process stub that receives release events and runs the user
/// callback.
///
/// Unregistration clears the callback under the lock *before* the server is
/// told, so no callback can fire after unregister returns.
#[derive(Default)]
pub struct ProducerListenerStub {
    callback: Mutex<Option<OnReleaseFunc>>,
    fence_callback: Mutex<Option<OnReleaseWithFenceFunc>>,
    /// Optional secondary subscriber (a surface delegator).
    forward: Mutex<Option<Arc<dyn ProducerListener>>>,
}

impl std::fmt::Debug for ProducerListenerStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerListenerStub").finish_non_exhaustive()
    }
}

impl ProducerListenerStub {
    /// An empty stub.
    pub fn new() -> Arc<ProducerListenerStub> {
        Arc::new(ProducerListenerStub::default())
    }

    /// Installs the release callback.
    pub fn set_callback(&self, func: OnReleaseFunc) {
        *self.callback.lock().unwrap() = Some(func);
    }

    /// Installs the fence-aware release callback.
    pub fn set_fence_callback(&self, func: OnReleaseWithFenceFunc) {
        *self.fence_callback.lock().unwrap() = Some(func);
    }

    /// Installs a secondary subscriber that sees every event.
    pub fn set_forward(&self, listener: Arc<dyn ProducerListener>) {
        *self.forward.lock().unwrap() = Some(listener);
    }

    /// Clears every callback. Call before telling the server to
    /// unregister.
    pub fn clear(&self) {
        *self.callback.lock().unwrap() = None;
        *self.fence_callback.lock().unwrap() = None;
        *self.forward.lock().unwrap() = None;
    }

    fn released(&self, buffer: Option<(Arc<SurfaceBuffer>, Arc<SyncFence>)>) {
        match &buffer {
            Some((buffer, fence)) => {
                trace!(sequence = buffer.sequence(), "release notification");
                if let Some(callback) = self.fence_callback.lock().unwrap().as_ref() {
                    if let Err(err) = callback(buffer, fence) {
                        warn!(?err, "release-with-fence callback failed");
                    }
                } else if let Some(callback) = self.callback.lock().unwrap().as_ref() {
                    if let Err(err) = callback(buffer) {
                        warn!(?err, "release callback failed");
                    }
                }
                let forward = self.forward.lock().unwrap().clone();
                if let Some(forward) = forward {
                    let _ = forward.on_buffer_released_with_fence(buffer, fence);
                }
            }
            None => {
                trace!("release notification without payload");
                let forward = self.forward.lock().unwrap().clone();
                if let Some(forward) = forward {
                    let _ = forward.on_buffer_released();
                }
            }
        }
    }
}

impl RemoteStub for ProducerListenerStub {
    fn on_remote_request(&self, _caller: CallerContext, code: u32, data: &mut Parcel) -> Parcel {
        let mut reply = Parcel::new();
        let result = (|| -> SurfaceResult<()> {
            let token = data.read_string()?;
            if token != LISTENER_TOKEN {
                return Err(SurfaceError::Binder);
            }
            match ListenerCode::from_u32(code).ok_or(SurfaceError::NotSupport)? {
                ListenerCode::OnBufferReleased => self.released(None),
                ListenerCode::OnBufferReleasedWithFence => {
                    let buffer = data.read_buffer()?;
                    let fence = data.read_fence()?;
                    self.released(Some((buffer, fence)));
                }
            }
            Ok(())
        })();
        let _ = reply.write_i32(SurfaceError::result_code(&result));
        reply
    }
}
