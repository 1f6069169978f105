//! The buffer queue core: slot cache, state machine and handoff protocol.
//!
//! A [`BufferQueue`] owns a bounded pool of buffer slots keyed by sequence
//! number. Producers move slots `Released -> Requested -> Flushed`; consumers
//! move them `Flushed -> Acquired -> Released`. Attach/detach inject and
//! remove foreign buffers. All mutations happen under one mutex; two
//! condition variables gate producers waiting for a free slot and attachers
//! waiting for cache capacity.
//!
//! Listeners are always invoked with the queue mutex released, so a callback
//! may re-enter the queue without deadlocking.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::buffer::{
    BufferAllocator, BufferFlushConfig, BufferRequestConfig, BufferUsage, ExtraData, HdrMetadata,
    HdrMetadataKey, HdrMetadataType, PresentTimestamp, PresentTimestampType, ScalingMode,
    SurfaceBuffer, SurfaceSourceType, TransformType, SURFACE_DEFAULT_QUEUE_SIZE,
    SURFACE_MAX_QUEUE_SIZE,
};
use crate::error::{SurfaceError, SurfaceResult};
use crate::fence::SyncFence;
use crate::utils::{next_unique_id, now_nanos, transform_matrix, DamageRegion};

mod slot;
pub use slot::{BufferElement, BufferState};

const ONE_SECOND_NANOS: i64 = 1_000_000_000;
const MAX_APP_FRAMEWORK_TYPE_LEN: usize = 64;

/// Consumer-side event hooks. `on_buffer_available` is delivered at least
/// once per accepted flush; the secondary hooks default to no-ops.
pub trait ConsumerListener: Send + Sync {
    /// A flushed buffer is waiting on the dirty list.
    fn on_buffer_available(&self);
    /// The tunnel handle changed.
    fn on_tunnel_handle_change(&self) {}
    /// The producer cleaned the cache.
    fn on_clean_cache(&self) {}
    /// The producer went to the background.
    fn on_go_background(&self) {}
}

/// Producer-side release notifications, delivered after the consumer's
/// release returns.
pub trait ProducerListener: Send + Sync {
    /// A buffer returned to the free list.
    fn on_buffer_released(&self) -> SurfaceResult<()>;
    /// Like `on_buffer_released`, with the buffer and its release fence.
    fn on_buffer_released_with_fence(
        &self,
        _buffer: &Arc<SurfaceBuffer>,
        _fence: &Arc<SyncFence>,
    ) -> SurfaceResult<()> {
        self.on_buffer_released()
    }
}

/// Legacy single-function release callback.
pub type OnReleaseFunc = Box<dyn Fn(&Arc<SurfaceBuffer>) -> SurfaceResult<()> + Send + Sync>;
/// Per-sequence deletion callback, one subscriber per consumer thread.
pub type OnDeleteBufferFunc = Box<dyn Fn(u32) + Send + Sync>;

/// An opaque tunnel descriptor handed through to the display driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelHandle {
    /// Driver-defined fds.
    pub fds: Vec<i32>,
    /// Driver-defined integers.
    pub reserve_ints: Vec<i32>,
}

/// Reply of a producer `request_buffer`.
#[derive(Debug)]
pub struct RequestBufferReturnValue {
    /// Slot id of the granted buffer.
    pub sequence: u32,
    /// The buffer itself; `None` when the producer is known to hold this
    /// sequence in its mirror cache already.
    pub buffer: Option<Arc<SurfaceBuffer>>,
    /// The consumer's release fence; wait on it before rendering.
    pub fence: Arc<SyncFence>,
    /// Slots the producer must evict from its mirror cache.
    pub deleting_buffers: Vec<u32>,
    /// Whether a producer connection is established.
    pub is_connected: bool,
}

/// Reply of a consumer `acquire_buffer`.
#[derive(Debug)]
pub struct AcquireReturnValue {
    /// The acquired buffer.
    pub buffer: Arc<SurfaceBuffer>,
    /// The producer's render-done fence; wait on it before reading pixels.
    pub fence: Arc<SyncFence>,
    /// Render timestamp recorded at flush.
    pub timestamp: i64,
    /// Damage recorded at flush.
    pub damages: DamageRegion,
}

struct QueueState {
    queue_size: u32,
    cache: IndexMap<u32, BufferElement>,
    free_list: VecDeque<u32>,
    dirty_list: VecDeque<u32>,
    deleting_list: Vec<u32>,
    producer_cache_list: Vec<u32>,
    producer_cache_clean: bool,
    detached_reserve_slots: u32,
    default_width: i32,
    default_height: i32,
    default_usage: BufferUsage,
    transform: TransformType,
    transform_hint: TransformType,
    last_flushed_transform: TransformType,
    last_flushed_sequence: Option<u32>,
    last_flushed_fence: Arc<SyncFence>,
    pinned_last_flushed: Option<(u32, Arc<SurfaceBuffer>)>,
    tunnel_handle: Option<Arc<TunnelHandle>>,
    is_buffer_hold: bool,
    no_block_mode: bool,
    scaling_mode_default: ScalingMode,
    surface_source_type: SurfaceSourceType,
    app_framework_type: String,
    hdr_white_point_brightness: f32,
    sdr_white_point_brightness: f32,
    global_alpha: i32,
    buffer_name: String,
    cycle_buffers_number: u32,
    dropped_frames: u64,
}

impl QueueState {
    fn effective_queue_size(&self) -> u32 {
        self.queue_size.saturating_sub(self.detached_reserve_slots)
    }

    fn has_alloc_capacity(&self) -> bool {
        (self.cache.len() as u32) < self.effective_queue_size()
    }
}

/// Process-local buffer queue shared by one producer/consumer pair.
pub struct BufferQueue {
    name: String,
    unique_id: u64,
    is_shared: bool,
    allocator: Arc<BufferAllocator>,
    state: Mutex<QueueState>,
    wait_req: Condvar,
    wait_attach: Condvar,
    is_valid_status: AtomicBool,
    is_strictly_disconnected: AtomicBool,
    connected_pid: AtomicU64,
    listener: Mutex<Option<Arc<dyn ConsumerListener>>>,
    on_buffer_release: Mutex<Option<OnReleaseFunc>>,
    producer_listener: Mutex<Option<Arc<dyn ProducerListener>>>,
    on_delete_main: Mutex<Option<OnDeleteBufferFunc>>,
    on_delete_hardware: Mutex<Option<OnDeleteBufferFunc>>,
}

impl std::fmt::Debug for BufferQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferQueue")
            .field("name", &self.name)
            .field("unique_id", &self.unique_id)
            .field("is_shared", &self.is_shared)
            .finish_non_exhaustive()
    }
}

impl BufferQueue {
    /// Creates a queue with the process-wide allocator.
    pub fn new(name: impl Into<String>, is_shared: bool) -> Arc<BufferQueue> {
        BufferQueue::with_allocator(name, is_shared, BufferAllocator::global())
    }

    /// Creates a queue over an explicit allocator; the seam tests use to
    /// observe HAL traffic.
    pub fn with_allocator(
        name: impl Into<String>,
        is_shared: bool,
        allocator: Arc<BufferAllocator>,
    ) -> Arc<BufferQueue> {
        let name = name.into();
        let unique_id = next_unique_id();
        debug!(name = %name, unique_id, is_shared, "creating buffer queue");
        Arc::new(BufferQueue {
            name,
            unique_id,
            is_shared,
            allocator,
            state: Mutex::new(QueueState {
                queue_size: if is_shared { 1 } else { SURFACE_DEFAULT_QUEUE_SIZE },
                cache: IndexMap::new(),
                free_list: VecDeque::new(),
                dirty_list: VecDeque::new(),
                deleting_list: Vec::new(),
                producer_cache_list: Vec::new(),
                producer_cache_clean: false,
                detached_reserve_slots: 0,
                default_width: 0,
                default_height: 0,
                default_usage: BufferUsage::empty(),
                transform: TransformType::RotateNone,
                transform_hint: TransformType::RotateNone,
                last_flushed_transform: TransformType::RotateNone,
                last_flushed_sequence: None,
                last_flushed_fence: Arc::new(SyncFence::invalid()),
                pinned_last_flushed: None,
                tunnel_handle: None,
                is_buffer_hold: false,
                no_block_mode: false,
                scaling_mode_default: ScalingMode::default(),
                surface_source_type: SurfaceSourceType::default(),
                app_framework_type: String::new(),
                hdr_white_point_brightness: 1.0,
                sdr_white_point_brightness: 1.0,
                global_alpha: -1,
                buffer_name: String::new(),
                cycle_buffers_number: 0,
                dropped_frames: 0,
            }),
            wait_req: Condvar::new(),
            wait_attach: Condvar::new(),
            is_valid_status: AtomicBool::new(true),
            is_strictly_disconnected: AtomicBool::new(false),
            connected_pid: AtomicU64::new(0),
            listener: Mutex::new(None),
            on_buffer_release: Mutex::new(None),
            producer_listener: Mutex::new(None),
            on_delete_main: Mutex::new(None),
            on_delete_hardware: Mutex::new(None),
        })
    }

    /// The queue's debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The process-global `pid << 32 | counter` id.
    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    /// Whether the queue runs in single-slot shared mode.
    pub fn is_shared(&self) -> bool {
        self.is_shared
    }

    /// Whether the queue is usable (false once the consumer died).
    pub fn get_status(&self) -> bool {
        self.is_valid_status.load(Ordering::Acquire)
    }

    /// Marks the queue usable or not and wakes all waiters.
    pub fn set_status(&self, status: bool) {
        self.is_valid_status.store(status, Ordering::Release);
        self.wait_req.notify_all();
        self.wait_attach.notify_all();
    }

    fn check_request_status(&self) -> SurfaceResult<()> {
        if self.is_strictly_disconnected.load(Ordering::Acquire) {
            return Err(SurfaceError::ConsumerDisconnected);
        }
        if !self.get_status() {
            // The consumer died; the proxy self-heals on this code.
            return Err(SurfaceError::NoConsumer);
        }
        Ok(())
    }

    // Producer side -------------------------------------------------------

    /// Grants the producer an empty buffer, reusing the free list in FIFO
    /// order, allocating while below capacity, and otherwise blocking per
    /// `config.timeout_ms`.
    pub fn request_buffer(
        &self,
        config: &BufferRequestConfig,
    ) -> SurfaceResult<RequestBufferReturnValue> {
        self.check_request_status()?;
        config.check()?;

        let mut state = self.state.lock().unwrap();
        if self.is_shared {
            return self.request_shared(state, config);
        }

        loop {
            if !state.free_list.is_empty() || state.has_alloc_capacity() {
                break;
            }
            if state.no_block_mode || config.timeout_ms == 0 {
                return Err(SurfaceError::NoBuffer);
            }
            if config.timeout_ms < 0 {
                state = self.wait_req.wait(state).unwrap();
            } else {
                let timeout = Duration::from_millis(config.timeout_ms as u64);
                let (guard, result) = self.wait_req.wait_timeout(state, timeout).unwrap();
                state = guard;
                if result.timed_out()
                    && state.free_list.is_empty()
                    && !state.has_alloc_capacity()
                {
                    trace!(timeout_ms = config.timeout_ms, "request timed out");
                    return Err(SurfaceError::NoBuffer);
                }
            }
            self.check_request_status()?;
        }

        let (sequence, is_new, realloced) = if let Some(sequence) = state.free_list.pop_front() {
            let element = state
                .cache
                .get(&sequence)
                .ok_or(SurfaceError::Internal)?;
            let realloc = !element.config.same_shape(config);
            if realloc {
                if let Err(err) = self.allocator.realloc(element.buffer(), config) {
                    state.free_list.push_front(sequence);
                    return Err(err);
                }
            }
            (sequence, false, realloc)
        } else {
            let buffer = self.allocator.alloc(config)?;
            buffer.set_name(state.buffer_name.clone());
            let sequence = buffer.sequence();
            let mut element = BufferElement::new(buffer, BufferState::Released, *config);
            element.scaling_mode = state.scaling_mode_default;
            state.cache.insert(sequence, element);
            (sequence, true, false)
        };

        let deleting_buffers = std::mem::take(&mut state.producer_cache_list);
        let had_clean_flag = std::mem::replace(&mut state.producer_cache_clean, false);

        let element = state.cache.get_mut(&sequence).ok_or(SurfaceError::Internal)?;
        element.state = BufferState::Requested;
        element.config = *config;

        let send_buffer =
            is_new || realloced || had_clean_flag || deleting_buffers.contains(&sequence);
        trace!(
            sequence,
            reused = !is_new,
            realloced,
            deleting = deleting_buffers.len(),
            "request granted"
        );
        Ok(RequestBufferReturnValue {
            sequence,
            buffer: send_buffer.then(|| element.buffer.clone()),
            fence: element.fence.clone(),
            deleting_buffers,
            is_connected: true,
        })
    }

    fn request_shared(
        &self,
        mut state: MutexGuard<'_, QueueState>,
        config: &BufferRequestConfig,
    ) -> SurfaceResult<RequestBufferReturnValue> {
        if let Some((&sequence, _)) = state.cache.first() {
            let element = state.cache.get_mut(&sequence).ok_or(SurfaceError::Internal)?;
            element.state = BufferState::Requested;
            return Ok(RequestBufferReturnValue {
                sequence,
                buffer: None,
                fence: element.fence.clone(),
                deleting_buffers: Vec::new(),
                is_connected: true,
            });
        }
        let buffer = self.allocator.alloc(config)?;
        let sequence = buffer.sequence();
        let mut element = BufferElement::new(buffer.clone(), BufferState::Requested, *config);
        element.fence = Arc::new(SyncFence::invalid());
        state.cache.insert(sequence, element);
        Ok(RequestBufferReturnValue {
            sequence,
            buffer: Some(buffer),
            fence: Arc::new(SyncFence::invalid()),
            deleting_buffers: Vec::new(),
            is_connected: true,
        })
    }

    /// `request_buffer` plus removal from the cache: the producer owns the
    /// returned buffer outright and it will not be offered again.
    pub fn request_and_detach_buffer(
        &self,
        config: &BufferRequestConfig,
    ) -> SurfaceResult<RequestBufferReturnValue> {
        let mut retval = self.request_buffer(config)?;
        let mut state = self.state.lock().unwrap();
        if let Some(element) = state.cache.shift_remove(&retval.sequence) {
            if retval.buffer.is_none() {
                retval.buffer = Some(element.buffer.clone());
            }
        }
        Ok(retval)
    }

    /// Returns a requested-but-unflushed buffer to the free list. Only
    /// `Requested` slots can be canceled; an attached slot must be
    /// reclaimed through [`Self::flush_buffer`] or removed with
    /// [`Self::detach_buffer`].
    pub fn cancel_buffer(&self, sequence: u32, extra: &ExtraData) -> SurfaceResult<()> {
        let mut state = self.state.lock().unwrap();
        let element = state
            .cache
            .get_mut(&sequence)
            .ok_or(SurfaceError::NoEntry)?;
        if element.state != BufferState::Requested {
            return Err(SurfaceError::BufferStateInvalid);
        }
        element.state = BufferState::Released;
        element.buffer.set_extra_data(extra.clone());
        state.free_list.push_back(sequence);
        trace!(sequence, "buffer canceled");
        self.wait_req.notify_one();
        self.wait_attach.notify_one();
        Ok(())
    }

    /// Commits a rendered buffer to the dirty list and notifies the
    /// consumer. Fails with `NoConsumer` (leaving the slot `Requested`) when
    /// no consumer listener is registered. An attached slot is reclaimed by
    /// the producer here: it exits to `Requested` and is committed in the
    /// same call.
    pub fn flush_buffer(
        &self,
        sequence: u32,
        extra: &ExtraData,
        fence: Arc<SyncFence>,
        flush_config: &BufferFlushConfig,
    ) -> SurfaceResult<()> {
        if self.is_strictly_disconnected.load(Ordering::Acquire) {
            return Err(SurfaceError::ConsumerDisconnected);
        }
        let mut state = self.state.lock().unwrap();
        let element = state.cache.get(&sequence).ok_or(SurfaceError::NoEntry)?;
        if !self.is_shared
            && element.state != BufferState::Requested
            && element.state != BufferState::Attached
        {
            return Err(SurfaceError::BufferStateInvalid);
        }
        flush_config.check(element.buffer.width(), element.buffer.height())?;
        if self.listener.lock().unwrap().is_none() {
            return Err(SurfaceError::NoConsumer);
        }

        let transform = state.transform;
        let element = state
            .cache
            .get_mut(&sequence)
            .ok_or(SurfaceError::Internal)?;
        if element.state == BufferState::Attached {
            // Producer reclaim: the attached slot exits to Requested before
            // it can flush.
            element.state = BufferState::Requested;
        }
        element.buffer.set_extra_data(extra.clone());
        element.fence = fence;
        element.timestamp = if flush_config.timestamp == 0 {
            now_nanos()
        } else {
            flush_config.timestamp
        };
        element.damages = flush_config.damages.clone();
        if flush_config.desired_present_timestamp > 0 {
            element.desired_present_timestamp = flush_config.desired_present_timestamp;
            element.is_auto_timestamp = false;
        } else {
            element.desired_present_timestamp = 0;
            element.is_auto_timestamp = true;
        }
        element.state = BufferState::Flushed;
        let last_fence = element.fence.clone();
        if !state.dirty_list.contains(&sequence) {
            state.dirty_list.push_back(sequence);
        }
        state.last_flushed_sequence = Some(sequence);
        state.last_flushed_fence = last_fence;
        state.last_flushed_transform = transform;
        let hold = state.is_buffer_hold;
        drop(state);

        trace!(sequence, "buffer flushed");
        if !hold {
            let listener = self.listener.lock().unwrap().clone();
            if let Some(listener) = listener {
                listener.on_buffer_available();
            }
        }
        Ok(())
    }

    // Consumer side -------------------------------------------------------

    /// Claims the oldest flushed buffer.
    pub fn acquire_buffer(&self) -> SurfaceResult<AcquireReturnValue> {
        let mut state = self.state.lock().unwrap();
        if self.is_shared {
            let (&sequence, _) = state.cache.first().ok_or(SurfaceError::NoBuffer)?;
            let element = state.cache.get_mut(&sequence).ok_or(SurfaceError::Internal)?;
            element.state = BufferState::Acquired;
            return Ok(AcquireReturnValue {
                buffer: element.buffer.clone(),
                fence: element.fence.clone(),
                timestamp: element.timestamp,
                damages: element.damages.clone(),
            });
        }
        let sequence = state.dirty_list.pop_front().ok_or(SurfaceError::NoBuffer)?;
        let element = state.cache.get_mut(&sequence).ok_or(SurfaceError::Internal)?;
        element.state = BufferState::Acquired;
        trace!(sequence, "buffer acquired");
        Ok(AcquireReturnValue {
            buffer: element.buffer.clone(),
            fence: element.fence.clone(),
            timestamp: element.timestamp,
            damages: element.damages.clone(),
        })
    }

    /// Claims the newest flushed buffer that is due at
    /// `expect_present_timestamp`, dropping the stale frames before it.
    ///
    /// Fails with `NoBuffer` when nothing is flushed, and `NoBufferReady`
    /// when everything flushed wants a strictly later present time. A
    /// desired time more than a second past the expectation is treated as
    /// bogus and presented immediately.
    pub fn acquire_buffer_with_timestamp(
        &self,
        expect_present_timestamp: i64,
    ) -> SurfaceResult<AcquireReturnValue> {
        if self.is_shared {
            return self.acquire_buffer();
        }
        let mut state = self.state.lock().unwrap();
        if state.dirty_list.is_empty() {
            return Err(SurfaceError::NoBuffer);
        }

        let due = |element: &BufferElement| {
            element.is_auto_timestamp
                || element.desired_present_timestamp <= expect_present_timestamp
        };
        let newest_due = state
            .dirty_list
            .iter()
            .enumerate()
            .filter(|(_, seq)| state.cache.get(*seq).map(&due).unwrap_or(false))
            .map(|(index, _)| index)
            .last();

        let chosen = match newest_due {
            Some(index) => index,
            None => {
                let front = *state.dirty_list.front().ok_or(SurfaceError::Internal)?;
                let element = state.cache.get(&front).ok_or(SurfaceError::Internal)?;
                if element.desired_present_timestamp
                    > expect_present_timestamp.saturating_add(ONE_SECOND_NANOS)
                {
                    // Timestamp too far out to be meaningful; show it now.
                    0
                } else {
                    return Err(SurfaceError::NoBufferReady);
                }
            }
        };

        // Everything older than the chosen frame missed its window.
        for _ in 0..chosen {
            if let Some(stale) = state.dirty_list.pop_front() {
                if let Some(element) = state.cache.get_mut(&stale) {
                    element.state = BufferState::Released;
                }
                state.free_list.push_back(stale);
                state.dropped_frames += 1;
                trace!(sequence = stale, "dropped stale frame");
            }
        }
        if chosen > 0 {
            self.wait_req.notify_one();
        }

        let sequence = state.dirty_list.pop_front().ok_or(SurfaceError::Internal)?;
        let element = state.cache.get_mut(&sequence).ok_or(SurfaceError::Internal)?;
        element.state = BufferState::Acquired;
        Ok(AcquireReturnValue {
            buffer: element.buffer.clone(),
            fence: element.fence.clone(),
            timestamp: element.timestamp,
            damages: element.damages.clone(),
        })
    }

    /// Returns an acquired (or attached) buffer to the pool and notifies the
    /// producer.
    pub fn release_buffer(
        &self,
        buffer: &Arc<SurfaceBuffer>,
        fence: Arc<SyncFence>,
    ) -> SurfaceResult<()> {
        let sequence = buffer.sequence();
        let mut deleted = false;
        {
            let mut state = self.state.lock().unwrap();
            let element = state
                .cache
                .get_mut(&sequence)
                .ok_or(SurfaceError::NoEntry)?;
            if !self.is_shared {
                if element.state != BufferState::Acquired && element.state != BufferState::Attached
                {
                    return Err(SurfaceError::BufferStateInvalid);
                }
            }
            element.fence = fence.clone();
            if !self.is_shared {
                if element.is_deleting {
                    self.delete_buffer_locked(&mut state, sequence);
                    state.producer_cache_list.push(sequence);
                    deleted = true;
                } else {
                    let element = state
                        .cache
                        .get_mut(&sequence)
                        .ok_or(SurfaceError::Internal)?;
                    element.state = BufferState::Released;
                    state.free_list.push_back(sequence);
                }
            }
            self.wait_req.notify_one();
            self.wait_attach.notify_one();
        }

        trace!(sequence, deleted, "buffer released");
        if deleted {
            self.notify_deleted(&[sequence]);
        }
        if !self.is_shared {
            if let Some(callback) = self.on_buffer_release.lock().unwrap().as_ref() {
                if let Err(err) = callback(buffer) {
                    warn!(sequence, ?err, "release callback failed");
                }
            }
            let listener = self.producer_listener.lock().unwrap().clone();
            if let Some(listener) = listener {
                if let Err(err) = listener.on_buffer_released_with_fence(buffer, &fence) {
                    warn!(sequence, ?err, "producer release listener failed");
                }
            }
        }
        Ok(())
    }

    // Attach / detach -----------------------------------------------------

    /// Producer-side injection of a foreign buffer; waits up to `timeout_ms`
    /// for cache capacity and fails with `OutOfRange` on timeout.
    pub fn attach_buffer(
        &self,
        buffer: Arc<SurfaceBuffer>,
        timeout_ms: i32,
    ) -> SurfaceResult<()> {
        self.attach_internal(buffer, timeout_ms, false, SurfaceError::OutOfRange)
    }

    /// Consumer-side injection; waits up to `timeout_ms` and fails with
    /// `BufferQueueFull` on timeout.
    pub fn attach_buffer_to_queue(
        &self,
        buffer: Arc<SurfaceBuffer>,
        timeout_ms: i32,
    ) -> SurfaceResult<()> {
        self.attach_internal(buffer, timeout_ms, true, SurfaceError::BufferQueueFull)
    }

    fn attach_internal(
        &self,
        buffer: Arc<SurfaceBuffer>,
        timeout_ms: i32,
        from_consumer: bool,
        timeout_error: SurfaceError,
    ) -> SurfaceResult<()> {
        let sequence = buffer.sequence();
        let mut state = self.state.lock().unwrap();
        if state.cache.contains_key(&sequence) {
            return Err(SurfaceError::BufferIsInCache);
        }

        // A reserve slot freed by detach_buffer_from_queue is restored by
        // the matching attach.
        let reserved_after = state.detached_reserve_slots.saturating_sub(1);
        let capacity = state.queue_size.saturating_sub(reserved_after);
        if state.cache.len() as u32 >= capacity {
            let deadline = Instant::now() + Duration::from_millis(timeout_ms.max(0) as u64);
            loop {
                let now = Instant::now();
                if now >= deadline {
                    return Err(timeout_error);
                }
                let (guard, _) = self.wait_attach.wait_timeout(state, deadline - now).unwrap();
                state = guard;
                if (state.cache.len() as u32)
                    < state.queue_size.saturating_sub(
                        state.detached_reserve_slots.saturating_sub(1),
                    )
                {
                    break;
                }
            }
        }
        state.detached_reserve_slots = state.detached_reserve_slots.saturating_sub(1);

        self.allocator.map(&buffer)?;
        buffer.set_consumer_attach_flag(from_consumer);
        let config = buffer.request_config();
        let mut element = BufferElement::new(buffer, BufferState::Attached, config);
        element.scaling_mode = state.scaling_mode_default;
        state.cache.insert(sequence, element);
        trace!(sequence, from_consumer, "buffer attached");
        Ok(())
    }

    /// Removes a buffer from the cache regardless of its list membership.
    pub fn detach_buffer(&self, buffer: &Arc<SurfaceBuffer>) -> SurfaceResult<()> {
        self.detach_buffer_from_queue(buffer, false)
    }

    /// Like [`Self::detach_buffer`]; with `is_reserve_slot` the effective
    /// pool shrinks by one until a matching attach restores it.
    pub fn detach_buffer_from_queue(
        &self,
        buffer: &Arc<SurfaceBuffer>,
        is_reserve_slot: bool,
    ) -> SurfaceResult<()> {
        let sequence = buffer.sequence();
        let mut state = self.state.lock().unwrap();
        if state.cache.shift_remove(&sequence).is_none() {
            return Err(SurfaceError::BufferNotInCache);
        }
        state.free_list.retain(|seq| *seq != sequence);
        state.dirty_list.retain(|seq| *seq != sequence);
        state.deleting_list.retain(|seq| *seq != sequence);
        if is_reserve_slot {
            state.detached_reserve_slots += 1;
        }
        trace!(sequence, is_reserve_slot, "buffer detached");
        Ok(())
    }

    /// Injects a foreign buffer and flushes it in one hop.
    pub fn attach_and_flush_buffer(
        &self,
        buffer: Arc<SurfaceBuffer>,
        fence: Arc<SyncFence>,
        flush_config: &BufferFlushConfig,
        need_map: bool,
    ) -> SurfaceResult<()> {
        if self.is_strictly_disconnected.load(Ordering::Acquire) {
            return Err(SurfaceError::ConsumerDisconnected);
        }
        let sequence = buffer.sequence();
        let extra = buffer.extra_data();
        {
            let mut state = self.state.lock().unwrap();
            if state.cache.contains_key(&sequence) {
                return Err(SurfaceError::BufferIsInCache);
            }
            if state.cache.len() as u32 >= state.effective_queue_size() {
                return Err(SurfaceError::BufferQueueFull);
            }
            if need_map {
                self.allocator.map(&buffer)?;
            }
            let config = buffer.request_config();
            let mut element = BufferElement::new(buffer, BufferState::Attached, config);
            element.scaling_mode = state.scaling_mode_default;
            state.cache.insert(sequence, element);
        }
        // The flush reclaims the attached slot and commits it.
        self.flush_buffer(sequence, &extra, fence, flush_config)
    }

    // Pool control --------------------------------------------------------

    /// Current maximum number of slots.
    pub fn get_queue_size(&self) -> u32 {
        self.state.lock().unwrap().queue_size
    }

    /// Resizes the pool. Shrinking evicts free slots now and marks held
    /// slots for deletion on their next release.
    pub fn set_queue_size(&self, queue_size: u32) -> SurfaceResult<()> {
        if queue_size == 0 || queue_size > SURFACE_MAX_QUEUE_SIZE {
            return Err(SurfaceError::InvalidArguments);
        }
        let mut deleted = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            let used = state.cache.len() as u32;
            if queue_size < used {
                let mut excess = (used - queue_size) as usize;
                while excess > 0 {
                    let Some(sequence) = state.free_list.pop_front() else {
                        break;
                    };
                    self.delete_buffer_locked(&mut state, sequence);
                    state.producer_cache_list.push(sequence);
                    deleted.push(sequence);
                    excess -= 1;
                }
                if excess > 0 {
                    // Held slots drain through release_buffer.
                    let held: Vec<u32> = state
                        .cache
                        .iter()
                        .filter(|(_, element)| {
                            !element.is_deleting && element.state != BufferState::Released
                        })
                        .map(|(seq, _)| *seq)
                        .take(excess)
                        .collect();
                    for sequence in held {
                        if let Some(element) = state.cache.get_mut(&sequence) {
                            element.is_deleting = true;
                        }
                        state.deleting_list.push(sequence);
                    }
                }
            }
            state.queue_size = queue_size;
        }
        debug!(queue_size, evicted = deleted.len(), "queue resized");
        self.notify_deleted(&deleted);
        self.wait_req.notify_all();
        self.wait_attach.notify_all();
        Ok(())
    }

    /// Marks every slot for deletion, evicting the ones not currently held.
    /// Returns the sequences evicted immediately. With `clean_all` the
    /// producer's mirror hint list is dropped too (the producer is gone).
    pub fn clean_cache(&self, clean_all: bool) -> SurfaceResult<Vec<u32>> {
        let mut freed = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            let sequences: Vec<u32> = state.cache.keys().copied().collect();
            for sequence in sequences {
                let element = match state.cache.get_mut(&sequence) {
                    Some(element) => element,
                    None => continue,
                };
                match element.state {
                    BufferState::Released | BufferState::Flushed => {
                        self.delete_buffer_locked(&mut state, sequence);
                        freed.push(sequence);
                    }
                    _ => {
                        element.is_deleting = true;
                        state.deleting_list.push(sequence);
                    }
                }
            }
            if clean_all {
                state.producer_cache_list.clear();
                state.producer_cache_clean = false;
            } else {
                state.producer_cache_list.extend(freed.iter().copied());
                state.producer_cache_clean = true;
            }
        }
        debug!(clean_all, evicted = freed.len(), "cache cleaned");
        self.notify_deleted(&freed);
        self.wait_req.notify_all();
        self.wait_attach.notify_all();
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener.on_clean_cache();
        }
        Ok(freed)
    }

    /// Signals the producer, via its next request, to flush its mirror
    /// cache.
    pub fn go_background(&self) -> SurfaceResult<()> {
        self.set_producer_cache_clean_flag(true);
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener.on_go_background();
        }
        Ok(())
    }

    /// Sets the producer-mirror-flush flag directly.
    pub fn set_producer_cache_clean_flag(&self, flag: bool) {
        self.state.lock().unwrap().producer_cache_clean = flag;
    }

    /// Consumer death: invalidates the queue and wakes every waiter.
    pub fn on_consumer_died(&self) -> SurfaceResult<()> {
        warn!(name = %self.name, "consumer died");
        self.set_status(false);
        *self.listener.lock().unwrap() = None;
        Ok(())
    }

    // Removes the slot from the cache and every list. Callbacks fire via
    // notify_deleted, outside the lock.
    fn delete_buffer_locked(&self, state: &mut QueueState, sequence: u32) {
        state.cache.shift_remove(&sequence);
        state.free_list.retain(|seq| *seq != sequence);
        state.dirty_list.retain(|seq| *seq != sequence);
        state.deleting_list.retain(|seq| *seq != sequence);
    }

    fn notify_deleted(&self, sequences: &[u32]) {
        if sequences.is_empty() {
            return;
        }
        let main = self.on_delete_main.lock().unwrap();
        let hardware = self.on_delete_hardware.lock().unwrap();
        for sequence in sequences {
            if let Some(callback) = main.as_ref() {
                callback(*sequence);
            }
            if let Some(callback) = hardware.as_ref() {
                callback(*sequence);
            }
        }
    }

    // Strict connect latch ------------------------------------------------

    /// Engages producer activity; idempotent.
    pub fn connect_strictly(&self) -> SurfaceResult<()> {
        self.is_strictly_disconnected.store(false, Ordering::Release);
        Ok(())
    }

    /// Gates producer activity without tearing down the cache; idempotent.
    pub fn disconnect_strictly(&self) -> SurfaceResult<()> {
        self.is_strictly_disconnected.store(true, Ordering::Release);
        Ok(())
    }

    // Queries and per-slot attributes -------------------------------------

    /// Whether a flushed buffer is waiting. Lets a consumer that missed its
    /// wakeup poll instead.
    pub fn query_if_buffer_available(&self) -> bool {
        !self.state.lock().unwrap().dirty_list.is_empty()
    }

    /// Frames dropped by the expect-present acquire path.
    pub fn dropped_frame_count(&self) -> u64 {
        self.state.lock().unwrap().dropped_frames
    }

    /// The most recently flushed buffer, its fence, and the texture
    /// transform matrix in effect at that flush.
    pub fn get_last_flushed_buffer(
        &self,
    ) -> SurfaceResult<(Arc<SurfaceBuffer>, Arc<SyncFence>, [f32; 16])> {
        let state = self.state.lock().unwrap();
        let sequence = state.last_flushed_sequence.ok_or(SurfaceError::NoEntry)?;
        let element = state.cache.get(&sequence).ok_or(SurfaceError::NoEntry)?;
        if element.config.usage.contains(BufferUsage::PROTECTED) {
            return Err(SurfaceError::NotSupport);
        }
        Ok((
            element.buffer.clone(),
            state.last_flushed_fence.clone(),
            transform_matrix(state.last_flushed_transform),
        ))
    }

    /// Like [`Self::get_last_flushed_buffer`], additionally pinning the
    /// buffer so its slot survives cache cleaning until released.
    pub fn acquire_last_flushed_buffer(
        &self,
    ) -> SurfaceResult<(Arc<SurfaceBuffer>, Arc<SyncFence>, [f32; 16])> {
        let (buffer, fence, matrix) = self.get_last_flushed_buffer()?;
        let mut state = self.state.lock().unwrap();
        if state.pinned_last_flushed.is_some() {
            return Err(SurfaceError::BufferStateInvalid);
        }
        state.pinned_last_flushed = Some((buffer.sequence(), buffer.clone()));
        Ok((buffer, fence, matrix))
    }

    /// Releases the pin taken by [`Self::acquire_last_flushed_buffer`].
    pub fn release_last_flushed_buffer(&self, sequence: u32) -> SurfaceResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.pinned_last_flushed {
            Some((pinned, _)) if pinned == sequence => {
                state.pinned_last_flushed = None;
                Ok(())
            }
            Some(_) => Err(SurfaceError::BufferStateInvalid),
            None => Err(SurfaceError::NoEntry),
        }
    }

    /// Sets a slot's scaling mode.
    pub fn set_scaling_mode(&self, sequence: u32, mode: ScalingMode) -> SurfaceResult<()> {
        let mut state = self.state.lock().unwrap();
        let element = state
            .cache
            .get_mut(&sequence)
            .ok_or(SurfaceError::NoEntry)?;
        element.scaling_mode = mode;
        Ok(())
    }

    /// Reads a slot's scaling mode, falling back to the queue default.
    pub fn get_scaling_mode(&self, sequence: u32) -> SurfaceResult<ScalingMode> {
        let state = self.state.lock().unwrap();
        state
            .cache
            .get(&sequence)
            .map(|element| element.scaling_mode)
            .ok_or(SurfaceError::NoEntry)
    }

    /// Sets the default scaling mode applied to future slots.
    pub fn set_default_scaling_mode(&self, mode: ScalingMode) {
        self.state.lock().unwrap().scaling_mode_default = mode;
    }

    /// Attaches HDR static metadata to a slot.
    pub fn set_metadata(&self, sequence: u32, metadata: Vec<HdrMetadata>) -> SurfaceResult<()> {
        if metadata.is_empty() {
            return Err(SurfaceError::InvalidArguments);
        }
        let mut state = self.state.lock().unwrap();
        let element = state
            .cache
            .get_mut(&sequence)
            .ok_or(SurfaceError::NoEntry)?;
        element.metadata = metadata;
        element.hdr_metadata_type = HdrMetadataType::Metadata;
        Ok(())
    }

    /// Reads a slot's HDR static metadata.
    pub fn get_metadata(&self, sequence: u32) -> SurfaceResult<Vec<HdrMetadata>> {
        let state = self.state.lock().unwrap();
        state
            .cache
            .get(&sequence)
            .map(|element| element.metadata.clone())
            .ok_or(SurfaceError::NoEntry)
    }

    /// Attaches a keyed HDR metadata blob to a slot.
    pub fn set_metadata_set(
        &self,
        sequence: u32,
        key: HdrMetadataKey,
        metadata: Vec<u8>,
    ) -> SurfaceResult<()> {
        if metadata.is_empty() {
            return Err(SurfaceError::InvalidArguments);
        }
        let mut state = self.state.lock().unwrap();
        let element = state
            .cache
            .get_mut(&sequence)
            .ok_or(SurfaceError::NoEntry)?;
        element.metadata_set = Some((key, metadata));
        element.hdr_metadata_type = HdrMetadataType::MetadataSet;
        Ok(())
    }

    /// Reads a slot's HDR metadata blob.
    pub fn get_metadata_set(&self, sequence: u32) -> SurfaceResult<(HdrMetadataKey, Vec<u8>)> {
        let state = self.state.lock().unwrap();
        let element = state.cache.get(&sequence).ok_or(SurfaceError::NoEntry)?;
        element.metadata_set.clone().ok_or(SurfaceError::NoEntry)
    }

    /// Which flavor of HDR metadata a slot carries.
    pub fn query_metadata_type(&self, sequence: u32) -> SurfaceResult<HdrMetadataType> {
        let state = self.state.lock().unwrap();
        state
            .cache
            .get(&sequence)
            .map(|element| element.hdr_metadata_type)
            .ok_or(SurfaceError::NoEntry)
    }

    /// Records when a slot was actually presented.
    pub fn set_present_timestamp(
        &self,
        sequence: u32,
        timestamp: PresentTimestamp,
    ) -> SurfaceResult<()> {
        let mut state = self.state.lock().unwrap();
        let element = state
            .cache
            .get_mut(&sequence)
            .ok_or(SurfaceError::NoEntry)?;
        element.present_timestamp = timestamp;
        Ok(())
    }

    /// Reads a slot's present timestamp in the requested interpretation.
    pub fn get_present_timestamp(
        &self,
        sequence: u32,
        ty: PresentTimestampType,
    ) -> SurfaceResult<i64> {
        let state = self.state.lock().unwrap();
        let element = state.cache.get(&sequence).ok_or(SurfaceError::NoEntry)?;
        if ty == PresentTimestampType::Unsupported
            || element.present_timestamp.ty == PresentTimestampType::Unsupported
        {
            return Err(SurfaceError::NotSupport);
        }
        if element.present_timestamp.ty != ty {
            return Err(SurfaceError::TypeError);
        }
        Ok(element.present_timestamp.time)
    }

    /// Installs (or clears) the tunnel handle; re-setting an identical
    /// handle is rejected.
    pub fn set_tunnel_handle(&self, handle: Option<Arc<TunnelHandle>>) -> SurfaceResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            match (&state.tunnel_handle, &handle) {
                (None, None) => return Err(SurfaceError::NoEntry),
                (Some(current), Some(new)) if **current == **new => {
                    return Err(SurfaceError::InvalidOperating)
                }
                _ => state.tunnel_handle = handle,
            }
        }
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener.on_tunnel_handle_change();
        }
        Ok(())
    }

    /// The current tunnel handle.
    pub fn get_tunnel_handle(&self) -> Option<Arc<TunnelHandle>> {
        self.state.lock().unwrap().tunnel_handle.clone()
    }

    // Scalar configuration ------------------------------------------------

    /// Sets the fallback geometry used when a request omits dimensions.
    pub fn set_default_width_and_height(&self, width: i32, height: i32) -> SurfaceResult<()> {
        if width <= 0 || height <= 0 {
            return Err(SurfaceError::InvalidArguments);
        }
        let mut state = self.state.lock().unwrap();
        state.default_width = width;
        state.default_height = height;
        Ok(())
    }

    /// Default width.
    pub fn get_default_width(&self) -> i32 {
        self.state.lock().unwrap().default_width
    }

    /// Default height.
    pub fn get_default_height(&self) -> i32 {
        self.state.lock().unwrap().default_height
    }

    /// Sets the usage merged into requests that pass none.
    pub fn set_default_usage(&self, usage: BufferUsage) {
        self.state.lock().unwrap().default_usage = usage;
    }

    /// Default usage.
    pub fn get_default_usage(&self) -> BufferUsage {
        self.state.lock().unwrap().default_usage
    }

    /// Sets the presentation transform.
    pub fn set_transform(&self, transform: TransformType) -> SurfaceResult<()> {
        self.state.lock().unwrap().transform = transform;
        Ok(())
    }

    /// The presentation transform.
    pub fn get_transform(&self) -> TransformType {
        self.state.lock().unwrap().transform
    }

    /// Sets the transform hint surfaced to new producers.
    pub fn set_transform_hint(&self, hint: TransformType) -> SurfaceResult<()> {
        self.state.lock().unwrap().transform_hint = hint;
        Ok(())
    }

    /// The transform hint.
    pub fn get_transform_hint(&self) -> TransformType {
        self.state.lock().unwrap().transform_hint
    }

    /// Suppresses consumer wakeups while the consumer holds frames.
    pub fn set_buffer_hold(&self, hold: bool) {
        self.state.lock().unwrap().is_buffer_hold = hold;
    }

    /// Makes `request_buffer` fail fast instead of blocking.
    pub fn set_no_block_mode(&self, no_block: bool) {
        self.state.lock().unwrap().no_block_mode = no_block;
    }

    /// Names buffers allocated from now on, for dumps and debugging.
    pub fn set_buffer_name(&self, name: impl Into<String>) {
        let name = name.into();
        let mut state = self.state.lock().unwrap();
        for (_, element) in state.cache.iter() {
            element.buffer.set_name(name.clone());
        }
        state.buffer_name = name;
    }

    /// Sets where the surface content originates.
    pub fn set_surface_source_type(&self, ty: SurfaceSourceType) -> SurfaceResult<()> {
        self.state.lock().unwrap().surface_source_type = ty;
        Ok(())
    }

    /// Content origin.
    pub fn get_surface_source_type(&self) -> SurfaceSourceType {
        self.state.lock().unwrap().surface_source_type
    }

    /// Sets the app framework tag (bounded length).
    pub fn set_surface_app_framework_type(&self, ty: impl Into<String>) -> SurfaceResult<()> {
        let ty = ty.into();
        if ty.len() > MAX_APP_FRAMEWORK_TYPE_LEN {
            return Err(SurfaceError::OutOfRange);
        }
        self.state.lock().unwrap().app_framework_type = ty;
        Ok(())
    }

    /// The app framework tag.
    pub fn get_surface_app_framework_type(&self) -> String {
        self.state.lock().unwrap().app_framework_type.clone()
    }

    /// Sets the HDR white point brightness, in `[0, 1]`.
    pub fn set_hdr_white_point_brightness(&self, brightness: f32) -> SurfaceResult<()> {
        if !(0.0..=1.0).contains(&brightness) {
            return Err(SurfaceError::InvalidArguments);
        }
        self.state.lock().unwrap().hdr_white_point_brightness = brightness;
        Ok(())
    }

    /// Sets the SDR white point brightness, in `[0, 1]`.
    pub fn set_sdr_white_point_brightness(&self, brightness: f32) -> SurfaceResult<()> {
        if !(0.0..=1.0).contains(&brightness) {
            return Err(SurfaceError::InvalidArguments);
        }
        self.state.lock().unwrap().sdr_white_point_brightness = brightness;
        Ok(())
    }

    /// HDR white point brightness.
    pub fn get_hdr_white_point_brightness(&self) -> f32 {
        self.state.lock().unwrap().hdr_white_point_brightness
    }

    /// SDR white point brightness.
    pub fn get_sdr_white_point_brightness(&self) -> f32 {
        self.state.lock().unwrap().sdr_white_point_brightness
    }

    /// Sets the surface-wide alpha, `-1` (unset) or `0..=255`.
    pub fn set_global_alpha(&self, alpha: i32) -> SurfaceResult<()> {
        if !(-1..=255).contains(&alpha) {
            return Err(SurfaceError::InvalidArguments);
        }
        self.state.lock().unwrap().global_alpha = alpha;
        Ok(())
    }

    /// The surface-wide alpha.
    pub fn get_global_alpha(&self) -> i32 {
        self.state.lock().unwrap().global_alpha
    }

    /// Sets how many buffers the producer rotates through, independent of
    /// the pool bound.
    pub fn set_cycle_buffers_number(&self, count: u32) -> SurfaceResult<()> {
        if count == 0 || count > SURFACE_MAX_QUEUE_SIZE {
            return Err(SurfaceError::InvalidArguments);
        }
        self.state.lock().unwrap().cycle_buffers_number = count;
        Ok(())
    }

    /// The rotation count; follows the queue size until set.
    pub fn get_cycle_buffers_number(&self) -> u32 {
        let state = self.state.lock().unwrap();
        if state.cycle_buffers_number == 0 {
            state.queue_size
        } else {
            state.cycle_buffers_number
        }
    }

    /// Remembers the connected producer's pid; `0` clears it.
    pub fn set_connected_pid(&self, pid: u64) {
        self.connected_pid.store(pid, Ordering::Release);
    }

    /// The connected producer's pid, `0` if none.
    pub fn connected_pid(&self) -> u64 {
        self.connected_pid.load(Ordering::Acquire)
    }

    // Listener registration -----------------------------------------------

    /// Registers the consumer listener; its presence is what makes flushes
    /// succeed.
    pub fn register_consumer_listener(&self, listener: Arc<dyn ConsumerListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    /// Removes the consumer listener; subsequent flushes fail with
    /// `NoConsumer`.
    pub fn unregister_consumer_listener(&self) {
        *self.listener.lock().unwrap() = None;
    }

    /// Whether a consumer listener is registered.
    pub fn has_consumer_listener(&self) -> bool {
        self.listener.lock().unwrap().is_some()
    }

    /// Registers the legacy single-function release callback.
    pub fn register_release_listener(&self, func: OnReleaseFunc) {
        *self.on_buffer_release.lock().unwrap() = Some(func);
    }

    /// Registers the producer release listener (travels over IPC).
    pub fn register_producer_release_listener(&self, listener: Arc<dyn ProducerListener>) {
        *self.producer_listener.lock().unwrap() = Some(listener);
    }

    /// Clears the producer release listener.
    pub fn unregister_producer_release_listener(&self) {
        *self.producer_listener.lock().unwrap() = None;
    }

    /// Registers a per-sequence deletion callback. One subscriber slot each
    /// for the composition main thread and the hardware thread.
    pub fn register_delete_buffer_listener(&self, func: OnDeleteBufferFunc, for_hardware: bool) {
        if for_hardware {
            *self.on_delete_hardware.lock().unwrap() = Some(func);
        } else {
            *self.on_delete_main.lock().unwrap() = Some(func);
        }
    }

    // Diagnostics ---------------------------------------------------------

    /// Human-readable snapshot of the queue for bug reports.
    pub fn dump(&self) -> String {
        let state = self.state.lock().unwrap();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "BufferQueue {} id={:#x} size={} cache={} free={:?} dirty={:?} deleting={:?}",
            self.name,
            self.unique_id,
            state.queue_size,
            state.cache.len(),
            state.free_list,
            state.dirty_list,
            state.deleting_list,
        );
        for (sequence, element) in state.cache.iter() {
            let _ = writeln!(
                out,
                "  [{}] state={:?} deleting={} {}x{} fmt={:?} usage={:?}",
                sequence,
                element.state,
                element.is_deleting,
                element.config.width,
                element.config.height,
                element.config.format,
                element.config.usage,
            );
        }
        out
    }
}

#[cfg(test)]
mod tests;
