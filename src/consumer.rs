//! The consumer-side surface: a thin facade over the buffer queue.
//!
//! Compositors and encoders hold a [`ConsumerSurface`]; every queue
//! operation delegates straight through. The facade adds the string
//! user-data map with change callbacks and the listener registration
//! points that travel to the producer over IPC.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::buffer::{
    BufferUsage, HdrMetadata, HdrMetadataKey, HdrMetadataType, PresentTimestamp,
    PresentTimestampType, ScalingMode, SurfaceBuffer, TransformType,
};
use crate::error::{SurfaceError, SurfaceResult};
use crate::fence::SyncFence;
use crate::queue::{
    AcquireReturnValue, BufferQueue, ConsumerListener, OnDeleteBufferFunc, OnReleaseFunc,
    ProducerListener, TunnelHandle,
};

/// Upper bound on user-data entries per surface.
pub const SURFACE_MAX_USER_DATA_COUNT: usize = 1000;

/// Callback invoked after each successful `set_user_data`.
pub type OnUserDataChangeFunc = Box<dyn Fn(&str, &str) + Send + Sync>;

/// The consumer's handle on a buffer queue.
pub struct ConsumerSurface {
    queue: Arc<BufferQueue>,
    user_data: Mutex<BTreeMap<String, String>>,
    user_data_listeners: Mutex<HashMap<String, OnUserDataChangeFunc>>,
}

impl std::fmt::Debug for ConsumerSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerSurface")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl ConsumerSurface {
    /// Creates a surface over a fresh queue.
    pub fn new(name: impl Into<String>) -> Arc<ConsumerSurface> {
        ConsumerSurface::with_queue(BufferQueue::new(name, false))
    }

    /// Creates a surface over an existing queue (shared-mode queues enter
    /// here).
    pub fn with_queue(queue: Arc<BufferQueue>) -> Arc<ConsumerSurface> {
        Arc::new(ConsumerSurface {
            queue,
            user_data: Mutex::new(BTreeMap::new()),
            user_data_listeners: Mutex::new(HashMap::new()),
        })
    }

    /// The underlying queue, shared with the producer service.
    pub fn queue(&self) -> &Arc<BufferQueue> {
        &self.queue
    }

    /// The queue's debug name.
    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// The queue's process-global id.
    pub fn unique_id(&self) -> u64 {
        self.queue.unique_id()
    }

    // Frame handoff -------------------------------------------------------

    /// Claims the oldest flushed frame.
    pub fn acquire_buffer(&self) -> SurfaceResult<AcquireReturnValue> {
        self.queue.acquire_buffer()
    }

    /// Claims the newest frame due at `expect_present_timestamp`.
    pub fn acquire_buffer_with_timestamp(
        &self,
        expect_present_timestamp: i64,
    ) -> SurfaceResult<AcquireReturnValue> {
        self.queue
            .acquire_buffer_with_timestamp(expect_present_timestamp)
    }

    /// Returns a presented frame to the pool.
    pub fn release_buffer(
        &self,
        buffer: &Arc<SurfaceBuffer>,
        fence: Arc<SyncFence>,
    ) -> SurfaceResult<()> {
        self.queue.release_buffer(buffer, fence)
    }

    /// Injects a foreign buffer into the queue.
    pub fn attach_buffer_to_queue(
        &self,
        buffer: Arc<SurfaceBuffer>,
        timeout_ms: i32,
    ) -> SurfaceResult<()> {
        self.queue.attach_buffer_to_queue(buffer, timeout_ms)
    }

    /// Removes a buffer from the queue.
    pub fn detach_buffer_from_queue(
        &self,
        buffer: &Arc<SurfaceBuffer>,
        is_reserve_slot: bool,
    ) -> SurfaceResult<()> {
        self.queue.detach_buffer_from_queue(buffer, is_reserve_slot)
    }

    /// Whether a flushed frame is waiting.
    pub fn query_if_buffer_available(&self) -> bool {
        self.queue.query_if_buffer_available()
    }

    // Listeners -----------------------------------------------------------

    /// Registers the consumer listener that receives `on_buffer_available`.
    pub fn register_consumer_listener(&self, listener: Arc<dyn ConsumerListener>) {
        self.queue.register_consumer_listener(listener);
    }

    /// Removes the consumer listener.
    pub fn unregister_consumer_listener(&self) {
        self.queue.unregister_consumer_listener();
    }

    /// Registers the producer-side release callback; it travels over IPC to
    /// be invoked from this (consumer) process.
    pub fn register_release_listener(&self, func: OnReleaseFunc) {
        self.queue.register_release_listener(func);
    }

    /// Registers the producer release listener object.
    pub fn register_producer_release_listener(&self, listener: Arc<dyn ProducerListener>) {
        self.queue.register_producer_release_listener(listener);
    }

    /// Registers a per-sequence deletion callback.
    pub fn register_delete_buffer_listener(&self, func: OnDeleteBufferFunc, for_hardware: bool) {
        self.queue.register_delete_buffer_listener(func, for_hardware);
    }

    // Pool and scalar config ----------------------------------------------

    /// Current pool bound.
    pub fn get_queue_size(&self) -> u32 {
        self.queue.get_queue_size()
    }

    /// Resizes the pool.
    pub fn set_queue_size(&self, queue_size: u32) -> SurfaceResult<()> {
        self.queue.set_queue_size(queue_size)
    }

    /// Sets fallback geometry for producers that request `0x0`.
    pub fn set_default_width_and_height(&self, width: i32, height: i32) -> SurfaceResult<()> {
        self.queue.set_default_width_and_height(width, height)
    }

    /// Sets the usage merged into requests.
    pub fn set_default_usage(&self, usage: BufferUsage) {
        self.queue.set_default_usage(usage)
    }

    /// Sets the presentation transform.
    pub fn set_transform(&self, transform: TransformType) -> SurfaceResult<()> {
        self.queue.set_transform(transform)
    }

    /// The presentation transform.
    pub fn get_transform(&self) -> TransformType {
        self.queue.get_transform()
    }

    /// Reads a slot's scaling mode.
    pub fn get_scaling_mode(&self, sequence: u32) -> SurfaceResult<ScalingMode> {
        self.queue.get_scaling_mode(sequence)
    }

    /// Reads a slot's HDR static metadata.
    pub fn get_metadata(&self, sequence: u32) -> SurfaceResult<Vec<HdrMetadata>> {
        self.queue.get_metadata(sequence)
    }

    /// Reads a slot's HDR metadata blob.
    pub fn get_metadata_set(&self, sequence: u32) -> SurfaceResult<(HdrMetadataKey, Vec<u8>)> {
        self.queue.get_metadata_set(sequence)
    }

    /// Which flavor of HDR metadata a slot carries.
    pub fn query_metadata_type(&self, sequence: u32) -> SurfaceResult<HdrMetadataType> {
        self.queue.query_metadata_type(sequence)
    }

    /// Records when a slot was presented, unblocking the producer's
    /// `get_present_timestamp`.
    pub fn set_present_timestamp(
        &self,
        sequence: u32,
        timestamp: PresentTimestamp,
    ) -> SurfaceResult<()> {
        self.queue.set_present_timestamp(sequence, timestamp)
    }

    /// Reads a present timestamp back.
    pub fn get_present_timestamp(
        &self,
        sequence: u32,
        ty: PresentTimestampType,
    ) -> SurfaceResult<i64> {
        self.queue.get_present_timestamp(sequence, ty)
    }

    /// Installs or clears the tunnel handle.
    pub fn set_tunnel_handle(&self, handle: Option<Arc<TunnelHandle>>) -> SurfaceResult<()> {
        self.queue.set_tunnel_handle(handle)
    }

    /// The tunnel handle.
    pub fn get_tunnel_handle(&self) -> Option<Arc<TunnelHandle>> {
        self.queue.get_tunnel_handle()
    }

    /// Suppresses producer wakeups while frames are held.
    pub fn set_buffer_hold(&self, hold: bool) {
        self.queue.set_buffer_hold(hold)
    }

    // Lifecycle -----------------------------------------------------------

    /// Drops every cached slot, marking held ones for deletion on return.
    pub fn clean_cache(&self) -> SurfaceResult<Vec<u32>> {
        self.queue.clean_cache(false)
    }

    /// Tells the producer to flush its mirror cache on its next request.
    pub fn go_background(&self) -> SurfaceResult<()> {
        self.queue.go_background()
    }

    /// Disconnects the producer. Routed through `go_background`, matching
    /// the long-standing behavior compositors depend on.
    pub fn disconnect(&self) -> SurfaceResult<()> {
        self.queue.go_background()
    }

    /// Death-recipient hook for the consumer process.
    pub fn on_consumer_died(&self) -> SurfaceResult<()> {
        self.queue.on_consumer_died()
    }

    /// Human-readable queue snapshot.
    pub fn dump(&self) -> String {
        self.queue.dump()
    }

    // User data -----------------------------------------------------------

    /// Stores a user-data entry and notifies every change listener.
    ///
    /// Re-setting an identical key/value fails with `ApiFailed`; exceeding
    /// [`SURFACE_MAX_USER_DATA_COUNT`] fails with `OutOfRange`.
    pub fn set_user_data(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> SurfaceResult<()> {
        let key = key.into();
        let value = value.into();
        {
            let mut data = self.user_data.lock().unwrap();
            if data.get(&key) == Some(&value) {
                return Err(SurfaceError::ApiFailed { errno: libc::EEXIST });
            }
            if !data.contains_key(&key) && data.len() >= SURFACE_MAX_USER_DATA_COUNT {
                return Err(SurfaceError::OutOfRange);
            }
            data.insert(key.clone(), value.clone());
        }
        debug!(key = %key, "user data changed");
        let listeners = self.user_data_listeners.lock().unwrap();
        for listener in listeners.values() {
            listener(&key, &value);
        }
        Ok(())
    }

    /// Reads a user-data entry.
    pub fn get_user_data(&self, key: &str) -> Option<String> {
        self.user_data.lock().unwrap().get(key).cloned()
    }

    /// Registers a named user-data change listener.
    pub fn register_user_data_change_listener(
        &self,
        name: impl Into<String>,
        func: OnUserDataChangeFunc,
    ) {
        self.user_data_listeners
            .lock()
            .unwrap()
            .insert(name.into(), func);
    }

    /// Removes a named user-data change listener.
    pub fn unregister_user_data_change_listener(&self, name: &str) {
        self.user_data_listeners.lock().unwrap().remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn duplicate_user_data_is_rejected() {
        let surface = ConsumerSurface::new("userdata");
        surface.set_user_data("scene", "game").unwrap();
        assert_eq!(
            surface.set_user_data("scene", "game"),
            Err(SurfaceError::ApiFailed { errno: libc::EEXIST })
        );
        surface.set_user_data("scene", "video").unwrap();
        assert_eq!(surface.get_user_data("scene").as_deref(), Some("video"));
    }

    #[test]
    fn user_data_is_bounded() {
        let surface = ConsumerSurface::new("bounded");
        for i in 0..SURFACE_MAX_USER_DATA_COUNT {
            surface.set_user_data(format!("k{}", i), "v").unwrap();
        }
        assert_eq!(
            surface.set_user_data("overflow", "v"),
            Err(SurfaceError::OutOfRange)
        );
        // Overwriting an existing key still works at the cap.
        surface.set_user_data("k0", "v2").unwrap();
    }

    #[test]
    fn change_listeners_fire_per_set() {
        let surface = ConsumerSurface::new("listeners");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        surface.register_user_data_change_listener(
            "test",
            Box::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        surface.set_user_data("a", "1").unwrap();
        surface.set_user_data("b", "2").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        surface.unregister_user_data_change_listener("test");
        surface.set_user_data("c", "3").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
