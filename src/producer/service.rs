//! Server side of the producer wire protocol.
//!
//! A [`ProducerService`] sits next to the queue in the consumer process.
//! Dispatch is one match over [`RequestCode`]; every handler unmarshals its
//! arguments, calls the queue, and marshals `(error, payload)` back. The
//! service also owns the connection policy: the first caller's pid is
//! latched and other pids are rejected for everything but queries.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace, warn};

use crate::buffer::{
    BufferFlushConfig, BufferUsage, HdrMetadata, HdrMetadataKey, PresentTimestampType,
    ScalingMode, SurfaceSourceType, TransformType,
};
use crate::error::{SurfaceError, SurfaceResult};
use crate::hebc::HebcWhiteList;
use crate::ipc::{CallerContext, Parcel, RemoteStub, RequestCode, Transport};
use crate::producer::listener::ProducerListenerProxy;
use crate::producer::ProducerInitInfo;
use crate::queue::{BufferQueue, RequestBufferReturnValue, TunnelHandle};

/// Interface token checked on every producer request.
pub const INTERFACE_TOKEN: &str = "framequeue.IBufferProducer";

static PRODUCER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// The queue-side dispatcher for one producer connection.
pub struct ProducerService {
    queue: Arc<BufferQueue>,
    /// Channel to the producer-side listener stub, wired at connection
    /// setup; `register_release_listener` turns it into the queue's
    /// producer listener.
    listener_channel: Mutex<Option<Arc<dyn Transport>>>,
    death_recipient_registered: AtomicBool,
    producer_id: u64,
}

impl std::fmt::Debug for ProducerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerService")
            .field("queue", &self.queue)
            .field("producer_id", &self.producer_id)
            .finish_non_exhaustive()
    }
}

impl ProducerService {
    /// Creates a service over a queue.
    pub fn new(queue: Arc<BufferQueue>) -> Arc<ProducerService> {
        Arc::new(ProducerService {
            queue,
            listener_channel: Mutex::new(None),
            death_recipient_registered: AtomicBool::new(false),
            producer_id: PRODUCER_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// The queue this service fronts.
    pub fn queue(&self) -> &Arc<BufferQueue> {
        &self.queue
    }

    /// Wires the channel back to the producer's listener stub. On binder
    /// the object reference travels inside the register parcel; here it is
    /// handed over at connection setup and the register code activates it.
    pub fn set_listener_channel(&self, transport: Arc<dyn Transport>) {
        *self.listener_channel.lock().unwrap() = Some(transport);
    }

    /// Whether the producer asked to be watched for death.
    pub fn death_recipient_registered(&self) -> bool {
        self.death_recipient_registered.load(Ordering::Acquire)
    }

    /// Death-recipient hook: a producer crash drops its whole cache mirror
    /// and frees the connection slot.
    pub fn on_producer_died(&self) {
        warn!(queue = %self.queue.name(), "producer died");
        let _ = self.queue.clean_cache(true);
        self.queue.set_connected_pid(0);
    }

    fn ensure_caller(&self, code: RequestCode, caller: CallerContext) -> SurfaceResult<()> {
        if code.is_query() {
            return Ok(());
        }
        if matches!(code, RequestCode::Connect | RequestCode::Disconnect) {
            // These manage the latch themselves.
            return Ok(());
        }
        let connected = self.queue.connected_pid();
        if connected == 0 {
            self.queue.set_connected_pid(caller.pid);
            return Ok(());
        }
        if connected != caller.pid {
            warn!(connected, caller = caller.pid, "rejecting foreign pid");
            return Err(SurfaceError::InvalidOperating);
        }
        Ok(())
    }

    fn init_info(&self) -> ProducerInitInfo {
        let hebc = HebcWhiteList::global();
        let app_name = hebc.application_name();
        ProducerInitInfo {
            name: self.queue.name().to_owned(),
            unique_id: self.queue.unique_id(),
            buffer_name: String::new(),
            is_in_hebc_list: hebc.check(&app_name),
            app_name,
            producer_id: self.producer_id,
            width: self.queue.get_default_width(),
            height: self.queue.get_default_height(),
            transform_hint: self.queue.get_transform_hint(),
        }
    }

    fn write_request_return(
        reply: &mut Parcel,
        retval: &RequestBufferReturnValue,
    ) -> SurfaceResult<()> {
        reply.write_u32(retval.sequence)?;
        match &retval.buffer {
            Some(buffer) => {
                reply.write_bool(true)?;
                reply.write_buffer(buffer)?;
            }
            None => reply.write_bool(false)?,
        }
        reply.write_fence(&retval.fence)?;
        reply.write_u32_vec(&retval.deleting_buffers)?;
        reply.write_bool(retval.is_connected)
    }

    fn dispatch(
        &self,
        code: RequestCode,
        caller: CallerContext,
        data: &mut Parcel,
        reply: &mut Parcel,
    ) -> SurfaceResult<()> {
        match code {
            RequestCode::RequestBuffer => {
                let config = data.read_request_config()?;
                let retval = self.queue.request_buffer(&config)?;
                Self::write_request_return(reply, &retval)
            }
            RequestCode::RequestBuffers => {
                let count = data.read_u32()?.min(crate::buffer::SURFACE_MAX_QUEUE_SIZE);
                let config = data.read_request_config()?;
                let mut retvals = Vec::new();
                for _ in 0..count {
                    match self.queue.request_buffer(&config) {
                        Ok(retval) => retvals.push(retval),
                        Err(err) if retvals.is_empty() => return Err(err),
                        Err(_) => break,
                    }
                }
                reply.write_u32(retvals.len() as u32)?;
                for retval in &retvals {
                    Self::write_request_return(reply, retval)?;
                }
                Ok(())
            }
            RequestCode::CancelBuffer => {
                let sequence = data.read_u32()?;
                let extra = data.read_extra_data()?;
                self.queue.cancel_buffer(sequence, &extra)
            }
            RequestCode::FlushBuffer => {
                let sequence = data.read_u32()?;
                let extra = data.read_extra_data()?;
                let fence = data.read_fence()?;
                let flush_config = BufferFlushConfig {
                    damages: data.read_damages()?,
                    timestamp: data.read_i64()?,
                    desired_present_timestamp: data.read_i64()?,
                };
                self.queue.flush_buffer(sequence, &extra, fence, &flush_config)
            }
            RequestCode::FlushBuffers => {
                let count = data.read_u32()?.min(crate::buffer::SURFACE_MAX_QUEUE_SIZE);
                for _ in 0..count {
                    let sequence = data.read_u32()?;
                    let extra = data.read_extra_data()?;
                    let fence = data.read_fence()?;
                    let flush_config = BufferFlushConfig {
                        damages: data.read_damages()?,
                        timestamp: data.read_i64()?,
                        desired_present_timestamp: data.read_i64()?,
                    };
                    self.queue
                        .flush_buffer(sequence, &extra, fence, &flush_config)?;
                }
                Ok(())
            }
            RequestCode::GetLastFlushedBuffer => {
                let (buffer, fence, matrix) = self.queue.get_last_flushed_buffer()?;
                reply.write_buffer(&buffer)?;
                reply.write_fence(&fence)?;
                for value in matrix {
                    reply.write_f32(value)?;
                }
                Ok(())
            }
            RequestCode::AcquireLastFlushedBuffer => {
                let (buffer, fence, matrix) = self.queue.acquire_last_flushed_buffer()?;
                reply.write_buffer(&buffer)?;
                reply.write_fence(&fence)?;
                for value in matrix {
                    reply.write_f32(value)?;
                }
                Ok(())
            }
            RequestCode::ReleaseLastFlushedBuffer => {
                let sequence = data.read_u32()?;
                self.queue.release_last_flushed_buffer(sequence)
            }
            RequestCode::AttachBuffer => {
                let buffer = data.read_buffer()?;
                let timeout_ms = data.read_i32()?;
                self.queue.attach_buffer(buffer, timeout_ms)
            }
            RequestCode::AttachBufferToQueue => {
                let buffer = data.read_buffer()?;
                let timeout_ms = data.read_i32()?;
                self.queue.attach_buffer_to_queue(buffer, timeout_ms)
            }
            RequestCode::DetachBuffer => {
                let buffer = data.read_buffer()?;
                self.queue.detach_buffer(&buffer)
            }
            RequestCode::DetachBufferFromQueue => {
                let buffer = data.read_buffer()?;
                let is_reserve_slot = data.read_bool()?;
                self.queue.detach_buffer_from_queue(&buffer, is_reserve_slot)
            }
            RequestCode::GetQueueSize => reply.write_u32(self.queue.get_queue_size()),
            RequestCode::SetQueueSize => {
                let queue_size = data.read_u32()?;
                self.queue.set_queue_size(queue_size)
            }
            RequestCode::GetName => reply.write_string(self.queue.name()),
            RequestCode::GetNameAndUniqueId => {
                reply.write_string(self.queue.name())?;
                reply.write_u64(self.queue.unique_id())
            }
            RequestCode::GetDefaultWidth => reply.write_i32(self.queue.get_default_width()),
            RequestCode::GetDefaultHeight => reply.write_i32(self.queue.get_default_height()),
            RequestCode::GetDefaultUsage => {
                reply.write_u64(self.queue.get_default_usage().bits())
            }
            RequestCode::SetDefaultUsage => {
                let usage = BufferUsage::from_bits_truncate(data.read_u64()?);
                self.queue.set_default_usage(usage);
                Ok(())
            }
            RequestCode::GetUniqueId => reply.write_u64(self.queue.unique_id()),
            RequestCode::CleanCache => {
                let clean_all = data.read_bool()?;
                let freed = self.queue.clean_cache(clean_all)?;
                reply.write_u32_vec(&freed)
            }
            RequestCode::GoBackground => self.queue.go_background(),
            RequestCode::RegisterReleaseListener => {
                let channel = self
                    .listener_channel
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or(SurfaceError::NotInit)?;
                self.queue
                    .register_producer_release_listener(Arc::new(ProducerListenerProxy::new(
                        channel,
                    )));
                Ok(())
            }
            RequestCode::UnregisterReleaseListener => {
                self.queue.unregister_producer_release_listener();
                Ok(())
            }
            RequestCode::RegisterDeathRecipient => {
                self.death_recipient_registered.store(true, Ordering::Release);
                Ok(())
            }
            RequestCode::Connect => {
                let connected = self.queue.connected_pid();
                if connected != 0 && connected != caller.pid {
                    return Err(SurfaceError::ConsumerIsConnected);
                }
                self.queue.set_connected_pid(caller.pid);
                debug!(pid = caller.pid, "producer connected");
                let info = self.init_info();
                reply.write_string(&info.name)?;
                reply.write_u64(info.unique_id)?;
                reply.write_string(&info.buffer_name)?;
                reply.write_string(&info.app_name)?;
                reply.write_u64(info.producer_id)?;
                reply.write_i32(info.width)?;
                reply.write_i32(info.height)?;
                reply.write_i32(info.transform_hint as i32)?;
                reply.write_bool(info.is_in_hebc_list)
            }
            RequestCode::Disconnect => {
                let connected = self.queue.connected_pid();
                if connected != 0 && connected != caller.pid {
                    return Err(SurfaceError::InvalidOperating);
                }
                self.queue.set_connected_pid(0);
                let _ = self.queue.clean_cache(false)?;
                debug!(pid = caller.pid, "producer disconnected");
                Ok(())
            }
            RequestCode::ConnectStrictly => self.queue.connect_strictly(),
            RequestCode::DisconnectStrictly => self.queue.disconnect_strictly(),
            RequestCode::SetTransform => {
                let transform = TransformType::from_i32(data.read_i32()?)
                    .ok_or(SurfaceError::InvalidArguments)?;
                self.queue.set_transform(transform)
            }
            RequestCode::GetTransform => reply.write_i32(self.queue.get_transform() as i32),
            RequestCode::SetTransformHint => {
                let hint = TransformType::from_i32(data.read_i32()?)
                    .ok_or(SurfaceError::InvalidArguments)?;
                self.queue.set_transform_hint(hint)
            }
            RequestCode::GetTransformHint => {
                reply.write_i32(self.queue.get_transform_hint() as i32)
            }
            RequestCode::SetScalingMode => {
                let sequence = data.read_u32()?;
                let mode = ScalingMode::from_i32(data.read_i32()?)
                    .ok_or(SurfaceError::InvalidArguments)?;
                self.queue.set_scaling_mode(sequence, mode)
            }
            RequestCode::SetMetadata => {
                let sequence = data.read_u32()?;
                let count = data.read_u32()? as usize;
                if count > u8::MAX as usize {
                    return Err(SurfaceError::InvalidArguments);
                }
                let mut metadata = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = HdrMetadataKey::from_i32(data.read_i32()?)
                        .ok_or(SurfaceError::InvalidArguments)?;
                    let value = data.read_f32()?;
                    metadata.push(HdrMetadata { key, value });
                }
                self.queue.set_metadata(sequence, metadata)
            }
            RequestCode::SetMetadataSet => {
                let sequence = data.read_u32()?;
                let key = HdrMetadataKey::from_i32(data.read_i32()?)
                    .ok_or(SurfaceError::InvalidArguments)?;
                let blob = data.read_bytes()?;
                self.queue.set_metadata_set(sequence, key, blob)
            }
            RequestCode::SetTunnelHandle => {
                let handle = if data.read_bool()? {
                    let fds = data
                        .read_u32_vec()?
                        .into_iter()
                        .map(|fd| fd as i32)
                        .collect();
                    let reserve_ints = data
                        .read_u32_vec()?
                        .into_iter()
                        .map(|value| value as i32)
                        .collect();
                    Some(Arc::new(TunnelHandle { fds, reserve_ints }))
                } else {
                    None
                };
                self.queue.set_tunnel_handle(handle)
            }
            RequestCode::GetPresentTimestamp => {
                let sequence = data.read_u32()?;
                let ty = PresentTimestampType::from_i32(data.read_i32()?)
                    .ok_or(SurfaceError::InvalidArguments)?;
                let time = self.queue.get_present_timestamp(sequence, ty)?;
                reply.write_i64(time)
            }
            RequestCode::SetBufferHold => {
                let hold = data.read_bool()?;
                self.queue.set_buffer_hold(hold);
                Ok(())
            }
            RequestCode::SetBufferName => {
                let name = data.read_string()?;
                self.queue.set_buffer_name(name);
                Ok(())
            }
            RequestCode::SetSurfaceSourceType => {
                let ty = SurfaceSourceType::from_i32(data.read_i32()?)
                    .ok_or(SurfaceError::InvalidArguments)?;
                self.queue.set_surface_source_type(ty)
            }
            RequestCode::GetSurfaceSourceType => {
                reply.write_i32(self.queue.get_surface_source_type() as i32)
            }
            RequestCode::SetSurfaceAppFrameworkType => {
                let ty = data.read_string()?;
                self.queue.set_surface_app_framework_type(ty)
            }
            RequestCode::GetSurfaceAppFrameworkType => {
                reply.write_string(&self.queue.get_surface_app_framework_type())
            }
            RequestCode::SetHdrWhitePointBrightness => {
                let brightness = data.read_f32()?;
                self.queue.set_hdr_white_point_brightness(brightness)
            }
            RequestCode::SetSdrWhitePointBrightness => {
                let brightness = data.read_f32()?;
                self.queue.set_sdr_white_point_brightness(brightness)
            }
            RequestCode::SetGlobalAlpha => {
                let alpha = data.read_i32()?;
                self.queue.set_global_alpha(alpha)
            }
            RequestCode::RequestAndDetachBuffer => {
                let config = data.read_request_config()?;
                let retval = self.queue.request_and_detach_buffer(&config)?;
                Self::write_request_return(reply, &retval)
            }
            RequestCode::AttachAndFlushBuffer => {
                let buffer = data.read_buffer()?;
                let fence = data.read_fence()?;
                let flush_config = BufferFlushConfig {
                    damages: data.read_damages()?,
                    timestamp: data.read_i64()?,
                    desired_present_timestamp: data.read_i64()?,
                };
                let need_map = data.read_bool()?;
                self.queue
                    .attach_and_flush_buffer(buffer, fence, &flush_config, need_map)
            }
            RequestCode::GetCycleBuffersNumber => {
                reply.write_u32(self.queue.get_cycle_buffers_number())
            }
            RequestCode::SetCycleBuffersNumber => {
                let count = data.read_u32()?;
                self.queue.set_cycle_buffers_number(count)
            }
        }
    }
}

impl RemoteStub for ProducerService {
    fn on_remote_request(&self, caller: CallerContext, code: u32, data: &mut Parcel) -> Parcel {
        let result = (|| -> SurfaceResult<Parcel> {
            let token = data.read_string()?;
            if token != INTERFACE_TOKEN {
                warn!(token = %token, "interface token mismatch");
                return Err(SurfaceError::Binder);
            }
            let code = RequestCode::from_u32(code).ok_or(SurfaceError::NotSupport)?;
            trace!(?code, pid = caller.pid, "dispatching");
            self.ensure_caller(code, caller)?;
            let mut payload = Parcel::new();
            self.dispatch(code, caller, data, &mut payload)?;
            Ok(payload)
        })();

        let status = match result {
            Ok(payload) => {
                let mut reply = Parcel::new();
                if reply.write_i32(0).is_ok() && reply.append(payload).is_ok() {
                    return reply;
                }
                SurfaceError::Binder
            }
            Err(err) => err,
        };
        let mut reply = Parcel::new();
        let _ = reply.write_i32(status.code());
        reply
    }
}
