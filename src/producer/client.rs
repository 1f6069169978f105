//! Producer-side proxy over the wire protocol.
//!
//! A [`ProducerClient`] mirrors the queue's slot map in
//! `buffer_cache: sequence -> buffer` so the server can omit the buffer
//! payload on reuse (the cache-hit fast path). The proxy honors the
//! server's `deleting_buffers` hints, self-heals on `NoConsumer` by
//! emptying its mirror, and keeps one lookaside reference
//! (`pre_cache_buffer`) alive across a cache clean so the compositor's
//! prebuffer is not freed mid-composition.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace, warn};

use crate::buffer::{
    BufferFlushConfig, BufferRequestConfig, BufferUsage, ColorGamut, HdrMetadata, HdrMetadataKey,
    PresentTimestampType, ScalingMode, SurfaceBuffer, SurfaceSourceType, TransformType,
};
use crate::error::{SurfaceError, SurfaceResult};
use crate::fence::SyncFence;
use crate::ipc::{Parcel, RequestCode, Transport};
use crate::producer::listener::ProducerListenerStub;
use crate::producer::service::INTERFACE_TOKEN;
use crate::producer::ProducerInitInfo;
use crate::queue::{OnReleaseFunc, RequestBufferReturnValue, TunnelHandle};

// Session-scoped user-data keys re-applied to every requested buffer.
const USER_DATA_COLOR_GAMUT: &str = "ATTRKEY_COLORSPACE_INFO";
const USER_DATA_BUFFER_TRANSFORM: &str = "ATTRKEY_BUFFER_TRANSFORM";

struct ClientState {
    cache: HashMap<u32, Arc<SurfaceBuffer>>,
    pre_cache_buffer: Option<Arc<SurfaceBuffer>>,
    is_disconnected: bool,
}

/// The producer's handle on a remote buffer queue.
pub struct ProducerClient {
    transport: Arc<dyn Transport>,
    state: Mutex<ClientState>,
    listener_stub: Arc<ProducerListenerStub>,
    user_data: Mutex<BTreeMap<String, String>>,
    init_info: Mutex<Option<ProducerInitInfo>>,
}

impl std::fmt::Debug for ProducerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("ProducerClient")
            .field("cached", &state.cache.len())
            .field("is_disconnected", &state.is_disconnected)
            .finish_non_exhaustive()
    }
}

impl ProducerClient {
    /// Creates a proxy over a transport to a producer service. The client
    /// starts disconnected; the first request connects implicitly.
    pub fn new(transport: Arc<dyn Transport>) -> Arc<ProducerClient> {
        Arc::new(ProducerClient {
            transport,
            state: Mutex::new(ClientState {
                cache: HashMap::new(),
                pre_cache_buffer: None,
                is_disconnected: true,
            }),
            listener_stub: ProducerListenerStub::new(),
            user_data: Mutex::new(BTreeMap::new()),
            init_info: Mutex::new(None),
        })
    }

    /// The producer-side listener stub; hand this to the connection setup
    /// so the service can call back.
    pub fn listener_stub(&self) -> Arc<ProducerListenerStub> {
        self.listener_stub.clone()
    }

    fn call(
        &self,
        code: RequestCode,
        build: impl FnOnce(&mut Parcel) -> SurfaceResult<()>,
    ) -> SurfaceResult<Parcel> {
        let mut data = Parcel::new();
        data.write_string(INTERFACE_TOKEN)?;
        build(&mut data)?;
        let mut reply = self.transport.send_request(code as u32, data)?;
        match SurfaceError::from_code(reply.read_i32()?) {
            Some(err) => Err(err),
            None => Ok(reply),
        }
    }

    // Connection ----------------------------------------------------------

    /// Connects explicitly, returning the server's init info.
    pub fn connect(&self) -> SurfaceResult<ProducerInitInfo> {
        let mut reply = self.call(RequestCode::Connect, |_| Ok(()))?;
        let info = ProducerInitInfo {
            name: reply.read_string()?,
            unique_id: reply.read_u64()?,
            buffer_name: reply.read_string()?,
            app_name: reply.read_string()?,
            producer_id: reply.read_u64()?,
            width: reply.read_i32()?,
            height: reply.read_i32()?,
            transform_hint: TransformType::from_i32(reply.read_i32()?)
                .ok_or(SurfaceError::InvalidArguments)?,
            is_in_hebc_list: reply.read_bool()?,
        };
        debug!(name = %info.name, unique_id = info.unique_id, "producer connected");
        self.state.lock().unwrap().is_disconnected = false;
        *self.init_info.lock().unwrap() = Some(info.clone());
        Ok(info)
    }

    fn ensure_connected(&self) -> SurfaceResult<()> {
        if self.state.lock().unwrap().is_disconnected {
            self.connect()?;
        }
        Ok(())
    }

    /// Disconnects and empties the mirror, lookaside included.
    pub fn disconnect(&self) -> SurfaceResult<()> {
        let result = self.call(RequestCode::Disconnect, |_| Ok(()));
        let mut state = self.state.lock().unwrap();
        state.cache.clear();
        state.pre_cache_buffer = None;
        state.is_disconnected = true;
        result.map(|_| ())
    }

    /// Tells the server this producer went to the background and empties
    /// the mirror, keeping the lookaside.
    pub fn go_background(&self) -> SurfaceResult<()> {
        let result = self.call(RequestCode::GoBackground, |_| Ok(()));
        self.clean_cache_locked(false);
        result.map(|_| ())
    }

    /// Drops every cached slot on the server and mirrors that locally.
    pub fn clean_cache(&self) -> SurfaceResult<()> {
        let result = self.call(RequestCode::CleanCache, |p| p.write_bool(false));
        self.clean_cache_locked(false);
        result.map(|_| ())
    }

    // `clean_all` also drops the pre-cache lookaside; a plain clean keeps
    // it so the consumer's prebuffer survives.
    fn clean_cache_locked(&self, clean_all: bool) {
        let mut state = self.state.lock().unwrap();
        state.cache.clear();
        if clean_all {
            state.pre_cache_buffer = None;
        }
    }

    // Frame loop ----------------------------------------------------------

    fn read_request_return(reply: &mut Parcel) -> SurfaceResult<RequestBufferReturnValue> {
        let sequence = reply.read_u32()?;
        let buffer = if reply.read_bool()? {
            Some(reply.read_buffer()?)
        } else {
            None
        };
        let fence = reply.read_fence()?;
        let deleting_buffers = reply.read_u32_vec()?;
        let is_connected = reply.read_bool()?;
        Ok(RequestBufferReturnValue {
            sequence,
            buffer,
            fence,
            deleting_buffers,
            is_connected,
        })
    }

    fn adopt_request_return(
        &self,
        retval: RequestBufferReturnValue,
    ) -> SurfaceResult<(Arc<SurfaceBuffer>, Arc<SyncFence>)> {
        let mut state = self.state.lock().unwrap();
        let buffer = match retval.buffer {
            Some(buffer) => {
                state.cache.insert(retval.sequence, buffer.clone());
                buffer
            }
            None => match state.cache.get(&retval.sequence) {
                Some(buffer) => buffer.clone(),
                None => {
                    // Mirror desync: drop whatever the server told us to and
                    // bail; the next request starts clean.
                    warn!(sequence = retval.sequence, "mirror cache desync");
                    for sequence in &retval.deleting_buffers {
                        state.cache.remove(sequence);
                    }
                    return Err(SurfaceError::Unknown);
                }
            },
        };
        for sequence in &retval.deleting_buffers {
            if *sequence != retval.sequence {
                trace!(sequence, "evicting mirrored slot");
                state.cache.remove(sequence);
            }
        }
        state.pre_cache_buffer = Some(buffer.clone());
        if state.cache.len() >= 2 {
            state.pre_cache_buffer = None;
        }
        drop(state);
        self.apply_session_metadata(&buffer);
        Ok((buffer, retval.fence))
    }

    // Re-applies session-scoped attributes the consumer expects on every
    // frame, sourced from stringly-typed user data.
    fn apply_session_metadata(&self, buffer: &Arc<SurfaceBuffer>) {
        let user_data = self.user_data.lock().unwrap();
        if let Some(value) = user_data.get(USER_DATA_COLOR_GAMUT) {
            if let Some(gamut) = value.parse().ok().and_then(ColorGamut::from_i32) {
                buffer.set_color_gamut(gamut);
            }
        }
        if let Some(value) = user_data.get(USER_DATA_BUFFER_TRANSFORM) {
            if let Some(transform) = value.parse().ok().and_then(TransformType::from_i32) {
                buffer.set_transform(transform);
            }
        }
    }

    /// Requests an empty buffer. Returns the buffer and the fence to wait
    /// on before rendering.
    pub fn request_buffer(
        &self,
        config: &BufferRequestConfig,
    ) -> SurfaceResult<(Arc<SurfaceBuffer>, Arc<SyncFence>)> {
        self.ensure_connected()?;
        let result = self.call(RequestCode::RequestBuffer, |p| {
            p.write_request_config(config)
        });
        let mut reply = match result {
            Ok(reply) => reply,
            Err(SurfaceError::NoConsumer) => {
                // Self-heal: the next request runs against an empty mirror.
                self.clean_cache_locked(false);
                return Err(SurfaceError::NoConsumer);
            }
            Err(err) => return Err(err),
        };
        let retval = Self::read_request_return(&mut reply)?;
        self.state.lock().unwrap().is_disconnected = false;
        self.adopt_request_return(retval)
    }

    /// Batch request. Partial success returns the granted buffers; the
    /// disconnect latch reflects only the first element's outcome.
    pub fn request_buffers(
        &self,
        config: &BufferRequestConfig,
        count: u32,
    ) -> SurfaceResult<Vec<(Arc<SurfaceBuffer>, Arc<SyncFence>)>> {
        self.ensure_connected()?;
        let result = self.call(RequestCode::RequestBuffers, |p| {
            p.write_u32(count)?;
            p.write_request_config(config)
        });
        let mut reply = match result {
            Ok(reply) => reply,
            Err(SurfaceError::NoConsumer) => {
                self.clean_cache_locked(false);
                return Err(SurfaceError::NoConsumer);
            }
            Err(err) => return Err(err),
        };
        let granted = reply.read_u32()?;
        let mut buffers = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            let retval = Self::read_request_return(&mut reply)?;
            if index == 0 {
                self.state.lock().unwrap().is_disconnected = false;
            }
            buffers.push(self.adopt_request_return(retval)?);
        }
        Ok(buffers)
    }

    /// `request_buffer` plus removal from both caches: the caller owns the
    /// buffer outright.
    pub fn request_and_detach_buffer(
        &self,
        config: &BufferRequestConfig,
    ) -> SurfaceResult<(Arc<SurfaceBuffer>, Arc<SyncFence>)> {
        self.ensure_connected()?;
        let mut reply = self.call(RequestCode::RequestAndDetachBuffer, |p| {
            p.write_request_config(config)
        })?;
        let retval = Self::read_request_return(&mut reply)?;
        let buffer = retval.buffer.ok_or(SurfaceError::Unknown)?;
        let mut state = self.state.lock().unwrap();
        state.cache.remove(&retval.sequence);
        for sequence in &retval.deleting_buffers {
            state.cache.remove(sequence);
        }
        Ok((buffer, retval.fence))
    }

    /// Commits a rendered buffer with damage and timing metadata.
    pub fn flush_buffer(
        &self,
        buffer: &Arc<SurfaceBuffer>,
        fence: &Arc<SyncFence>,
        flush_config: &BufferFlushConfig,
    ) -> SurfaceResult<()> {
        self.call(RequestCode::FlushBuffer, |p| {
            p.write_u32(buffer.sequence())?;
            p.write_extra_data(&buffer.extra_data())?;
            p.write_fence(fence)?;
            p.write_damages(&flush_config.damages)?;
            p.write_i64(flush_config.timestamp)?;
            p.write_i64(flush_config.desired_present_timestamp)
        })
        .map(|_| ())
    }

    /// Batch flush: commits several rendered buffers in one round trip.
    pub fn flush_buffers(
        &self,
        frames: &[(Arc<SurfaceBuffer>, Arc<SyncFence>, BufferFlushConfig)],
    ) -> SurfaceResult<()> {
        if frames.is_empty() {
            return Err(SurfaceError::InvalidArguments);
        }
        self.call(RequestCode::FlushBuffers, |p| {
            p.write_u32(frames.len() as u32)?;
            for (buffer, fence, flush_config) in frames {
                p.write_u32(buffer.sequence())?;
                p.write_extra_data(&buffer.extra_data())?;
                p.write_fence(fence)?;
                p.write_damages(&flush_config.damages)?;
                p.write_i64(flush_config.timestamp)?;
                p.write_i64(flush_config.desired_present_timestamp)?;
            }
            Ok(())
        })
        .map(|_| ())
    }

    /// Returns a requested-but-unflushed buffer.
    pub fn cancel_buffer(&self, buffer: &Arc<SurfaceBuffer>) -> SurfaceResult<()> {
        self.call(RequestCode::CancelBuffer, |p| {
            p.write_u32(buffer.sequence())?;
            p.write_extra_data(&buffer.extra_data())
        })
        .map(|_| ())
    }

    /// Injects a foreign buffer and flushes it in one hop.
    pub fn attach_and_flush_buffer(
        &self,
        buffer: &Arc<SurfaceBuffer>,
        fence: &Arc<SyncFence>,
        flush_config: &BufferFlushConfig,
        need_map: bool,
    ) -> SurfaceResult<()> {
        self.call(RequestCode::AttachAndFlushBuffer, |p| {
            p.write_buffer(buffer)?;
            p.write_fence(fence)?;
            p.write_damages(&flush_config.damages)?;
            p.write_i64(flush_config.timestamp)?;
            p.write_i64(flush_config.desired_present_timestamp)?;
            p.write_bool(need_map)
        })?;
        self.state
            .lock()
            .unwrap()
            .cache
            .insert(buffer.sequence(), buffer.clone());
        Ok(())
    }

    /// The one-argument attach is not wired on the proxy; use
    /// [`Self::attach_buffer_with_timeout`].
    pub fn attach_buffer(&self, _buffer: &Arc<SurfaceBuffer>) -> SurfaceResult<()> {
        Err(SurfaceError::NotSupport)
    }

    /// Injects a foreign buffer, waiting up to `timeout_ms` for a slot.
    pub fn attach_buffer_with_timeout(
        &self,
        buffer: &Arc<SurfaceBuffer>,
        timeout_ms: i32,
    ) -> SurfaceResult<()> {
        self.call(RequestCode::AttachBuffer, |p| {
            p.write_buffer(buffer)?;
            p.write_i32(timeout_ms)
        })
        .map(|_| ())
    }

    /// Removes a buffer from the queue and from the mirror.
    pub fn detach_buffer(&self, buffer: &Arc<SurfaceBuffer>) -> SurfaceResult<()> {
        self.call(RequestCode::DetachBuffer, |p| p.write_buffer(buffer))?;
        self.state.lock().unwrap().cache.remove(&buffer.sequence());
        Ok(())
    }

    // Listener ------------------------------------------------------------

    /// Registers the release callback, invoked from the consumer process
    /// when a buffer returns to the free list.
    pub fn register_release_listener(&self, func: OnReleaseFunc) -> SurfaceResult<()> {
        self.listener_stub.set_callback(func);
        self.call(RequestCode::RegisterReleaseListener, |_| Ok(()))
            .map(|_| ())
    }

    /// Unregisters the release callback. The local slot is cleared first so
    /// no callback can land after this returns.
    pub fn unregister_release_listener(&self) -> SurfaceResult<()> {
        self.listener_stub.clear();
        self.call(RequestCode::UnregisterReleaseListener, |_| Ok(()))
            .map(|_| ())
    }

    /// Asks the server to watch this producer for death.
    pub fn register_death_recipient(&self) -> SurfaceResult<()> {
        self.call(RequestCode::RegisterDeathRecipient, |_| Ok(()))
            .map(|_| ())
    }

    // Scalar wire calls ---------------------------------------------------

    /// The pool bound.
    pub fn get_queue_size(&self) -> SurfaceResult<u32> {
        self.call(RequestCode::GetQueueSize, |_| Ok(()))?.read_u32()
    }

    /// Resizes the pool.
    pub fn set_queue_size(&self, queue_size: u32) -> SurfaceResult<()> {
        self.call(RequestCode::SetQueueSize, |p| p.write_u32(queue_size))
            .map(|_| ())
    }

    /// The queue name.
    pub fn get_name(&self) -> SurfaceResult<String> {
        self.call(RequestCode::GetName, |_| Ok(()))?.read_string()
    }

    /// Name and unique id in one round trip.
    pub fn get_name_and_unique_id(&self) -> SurfaceResult<(String, u64)> {
        let mut reply = self.call(RequestCode::GetNameAndUniqueId, |_| Ok(()))?;
        Ok((reply.read_string()?, reply.read_u64()?))
    }

    /// The queue unique id.
    pub fn get_unique_id(&self) -> SurfaceResult<u64> {
        self.call(RequestCode::GetUniqueId, |_| Ok(()))?.read_u64()
    }

    /// Default width.
    pub fn get_default_width(&self) -> SurfaceResult<i32> {
        self.call(RequestCode::GetDefaultWidth, |_| Ok(()))?.read_i32()
    }

    /// Default height.
    pub fn get_default_height(&self) -> SurfaceResult<i32> {
        self.call(RequestCode::GetDefaultHeight, |_| Ok(()))?.read_i32()
    }

    /// Default usage.
    pub fn get_default_usage(&self) -> SurfaceResult<BufferUsage> {
        let bits = self.call(RequestCode::GetDefaultUsage, |_| Ok(()))?.read_u64()?;
        Ok(BufferUsage::from_bits_truncate(bits))
    }

    /// Sets the default usage.
    pub fn set_default_usage(&self, usage: BufferUsage) -> SurfaceResult<()> {
        self.call(RequestCode::SetDefaultUsage, |p| p.write_u64(usage.bits()))
            .map(|_| ())
    }

    /// Sets the presentation transform.
    pub fn set_transform(&self, transform: TransformType) -> SurfaceResult<()> {
        self.call(RequestCode::SetTransform, |p| p.write_i32(transform as i32))
            .map(|_| ())
    }

    /// The presentation transform.
    pub fn get_transform(&self) -> SurfaceResult<TransformType> {
        let value = self.call(RequestCode::GetTransform, |_| Ok(()))?.read_i32()?;
        TransformType::from_i32(value).ok_or(SurfaceError::TypeError)
    }

    /// Sets the transform hint.
    pub fn set_transform_hint(&self, hint: TransformType) -> SurfaceResult<()> {
        self.call(RequestCode::SetTransformHint, |p| p.write_i32(hint as i32))
            .map(|_| ())
    }

    /// The transform hint.
    pub fn get_transform_hint(&self) -> SurfaceResult<TransformType> {
        let value = self
            .call(RequestCode::GetTransformHint, |_| Ok(()))?
            .read_i32()?;
        TransformType::from_i32(value).ok_or(SurfaceError::TypeError)
    }

    /// Sets a slot's scaling mode.
    pub fn set_scaling_mode(&self, sequence: u32, mode: ScalingMode) -> SurfaceResult<()> {
        self.call(RequestCode::SetScalingMode, |p| {
            p.write_u32(sequence)?;
            p.write_i32(mode as i32)
        })
        .map(|_| ())
    }

    /// Attaches HDR static metadata to a slot.
    pub fn set_metadata(&self, sequence: u32, metadata: &[HdrMetadata]) -> SurfaceResult<()> {
        self.call(RequestCode::SetMetadata, |p| {
            p.write_u32(sequence)?;
            p.write_u32(metadata.len() as u32)?;
            for entry in metadata {
                p.write_i32(entry.key as i32)?;
                p.write_f32(entry.value)?;
            }
            Ok(())
        })
        .map(|_| ())
    }

    /// Attaches a keyed HDR metadata blob to a slot.
    pub fn set_metadata_set(
        &self,
        sequence: u32,
        key: HdrMetadataKey,
        metadata: &[u8],
    ) -> SurfaceResult<()> {
        self.call(RequestCode::SetMetadataSet, |p| {
            p.write_u32(sequence)?;
            p.write_i32(key as i32)?;
            p.write_bytes(metadata)
        })
        .map(|_| ())
    }

    /// Installs or clears the tunnel handle.
    pub fn set_tunnel_handle(&self, handle: Option<&TunnelHandle>) -> SurfaceResult<()> {
        self.call(RequestCode::SetTunnelHandle, |p| match handle {
            Some(handle) => {
                p.write_bool(true)?;
                let fds: Vec<u32> = handle.fds.iter().map(|fd| *fd as u32).collect();
                let ints: Vec<u32> = handle.reserve_ints.iter().map(|v| *v as u32).collect();
                p.write_u32_vec(&fds)?;
                p.write_u32_vec(&ints)
            }
            None => p.write_bool(false),
        })
        .map(|_| ())
    }

    /// Reads when a slot was presented.
    pub fn get_present_timestamp(
        &self,
        sequence: u32,
        ty: PresentTimestampType,
    ) -> SurfaceResult<i64> {
        self.call(RequestCode::GetPresentTimestamp, |p| {
            p.write_u32(sequence)?;
            p.write_i32(ty as i32)
        })?
        .read_i64()
    }

    /// The most recently flushed buffer with its fence and texture matrix.
    pub fn get_last_flushed_buffer(
        &self,
    ) -> SurfaceResult<(Arc<SurfaceBuffer>, Arc<SyncFence>, [f32; 16])> {
        let mut reply = self.call(RequestCode::GetLastFlushedBuffer, |_| Ok(()))?;
        Self::read_flushed_buffer(&mut reply)
    }

    /// Like [`Self::get_last_flushed_buffer`], pinning the slot server-side.
    pub fn acquire_last_flushed_buffer(
        &self,
    ) -> SurfaceResult<(Arc<SurfaceBuffer>, Arc<SyncFence>, [f32; 16])> {
        let mut reply = self.call(RequestCode::AcquireLastFlushedBuffer, |_| Ok(()))?;
        Self::read_flushed_buffer(&mut reply)
    }

    fn read_flushed_buffer(
        reply: &mut Parcel,
    ) -> SurfaceResult<(Arc<SurfaceBuffer>, Arc<SyncFence>, [f32; 16])> {
        let buffer = reply.read_buffer()?;
        let fence = reply.read_fence()?;
        let mut matrix = [0.0f32; 16];
        for value in matrix.iter_mut() {
            *value = reply.read_f32()?;
        }
        Ok((buffer, fence, matrix))
    }

    /// Releases the server-side pin.
    pub fn release_last_flushed_buffer(&self, sequence: u32) -> SurfaceResult<()> {
        self.call(RequestCode::ReleaseLastFlushedBuffer, |p| {
            p.write_u32(sequence)
        })
        .map(|_| ())
    }

    /// Engages the strict-connect latch.
    pub fn connect_strictly(&self) -> SurfaceResult<()> {
        self.call(RequestCode::ConnectStrictly, |_| Ok(())).map(|_| ())
    }

    /// Releases producer activity without tearing down the cache.
    pub fn disconnect_strictly(&self) -> SurfaceResult<()> {
        self.call(RequestCode::DisconnectStrictly, |_| Ok(())).map(|_| ())
    }

    /// Suppresses consumer wakeups while frames are held.
    pub fn set_buffer_hold(&self, hold: bool) -> SurfaceResult<()> {
        self.call(RequestCode::SetBufferHold, |p| p.write_bool(hold))
            .map(|_| ())
    }

    /// Names buffers for dumps.
    pub fn set_buffer_name(&self, name: &str) -> SurfaceResult<()> {
        self.call(RequestCode::SetBufferName, |p| p.write_string(name))
            .map(|_| ())
    }

    /// Sets where the surface content originates.
    pub fn set_surface_source_type(&self, ty: SurfaceSourceType) -> SurfaceResult<()> {
        self.call(RequestCode::SetSurfaceSourceType, |p| p.write_i32(ty as i32))
            .map(|_| ())
    }

    /// Content origin.
    pub fn get_surface_source_type(&self) -> SurfaceResult<SurfaceSourceType> {
        let value = self
            .call(RequestCode::GetSurfaceSourceType, |_| Ok(()))?
            .read_i32()?;
        SurfaceSourceType::from_i32(value).ok_or(SurfaceError::TypeError)
    }

    /// Sets the app framework tag.
    pub fn set_surface_app_framework_type(&self, ty: &str) -> SurfaceResult<()> {
        self.call(RequestCode::SetSurfaceAppFrameworkType, |p| {
            p.write_string(ty)
        })
        .map(|_| ())
    }

    /// The app framework tag.
    pub fn get_surface_app_framework_type(&self) -> SurfaceResult<String> {
        self.call(RequestCode::GetSurfaceAppFrameworkType, |_| Ok(()))?
            .read_string()
    }

    /// Sets HDR white point brightness.
    pub fn set_hdr_white_point_brightness(&self, brightness: f32) -> SurfaceResult<()> {
        self.call(RequestCode::SetHdrWhitePointBrightness, |p| {
            p.write_f32(brightness)
        })
        .map(|_| ())
    }

    /// Sets SDR white point brightness.
    pub fn set_sdr_white_point_brightness(&self, brightness: f32) -> SurfaceResult<()> {
        self.call(RequestCode::SetSdrWhitePointBrightness, |p| {
            p.write_f32(brightness)
        })
        .map(|_| ())
    }

    /// Sets the surface-wide alpha.
    pub fn set_global_alpha(&self, alpha: i32) -> SurfaceResult<()> {
        self.call(RequestCode::SetGlobalAlpha, |p| p.write_i32(alpha))
            .map(|_| ())
    }

    /// How many buffers the producer rotates through.
    pub fn get_cycle_buffers_number(&self) -> SurfaceResult<u32> {
        self.call(RequestCode::GetCycleBuffersNumber, |_| Ok(()))?.read_u32()
    }

    /// Sets the rotation count.
    pub fn set_cycle_buffers_number(&self, count: u32) -> SurfaceResult<()> {
        self.call(RequestCode::SetCycleBuffersNumber, |p| p.write_u32(count))
            .map(|_| ())
    }

    // Local state ---------------------------------------------------------

    /// Stores a producer-side user-data entry (session metadata source).
    pub fn set_user_data(&self, key: impl Into<String>, value: impl Into<String>) {
        self.user_data.lock().unwrap().insert(key.into(), value.into());
    }

    /// Reads a producer-side user-data entry.
    pub fn get_user_data(&self, key: &str) -> Option<String> {
        self.user_data.lock().unwrap().get(key).cloned()
    }

    /// Number of slots mirrored locally.
    pub fn cached_buffer_count(&self) -> usize {
        self.state.lock().unwrap().cache.len()
    }

    /// Whether the lookaside reference is currently held.
    pub fn has_pre_cache_buffer(&self) -> bool {
        self.state.lock().unwrap().pre_cache_buffer.is_some()
    }

    /// The init info received at connect, if connected.
    pub fn init_info(&self) -> Option<ProducerInitInfo> {
        self.init_info.lock().unwrap().clone()
    }
}
