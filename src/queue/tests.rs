use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::smallvec;

use super::*;
use crate::buffer::testing::CountingHal;
use crate::buffer::{BufferAllocator, PixelFormat};
use crate::utils::Rect;

struct CountListener {
    available: AtomicUsize,
}

impl CountListener {
    fn new() -> Arc<CountListener> {
        Arc::new(CountListener {
            available: AtomicUsize::new(0),
        })
    }

    fn count(&self) -> usize {
        self.available.load(Ordering::SeqCst)
    }
}

impl ConsumerListener for CountListener {
    fn on_buffer_available(&self) {
        self.available.fetch_add(1, Ordering::SeqCst);
    }
}

fn test_queue(queue_size: u32) -> (Arc<BufferQueue>, Arc<CountingHal>, Arc<CountListener>) {
    let hal = Arc::new(CountingHal::default());
    let allocator = Arc::new(BufferAllocator::new(hal.clone()));
    let queue = BufferQueue::with_allocator("test", false, allocator);
    queue.set_queue_size(queue_size).unwrap();
    let listener = CountListener::new();
    queue.register_consumer_listener(listener.clone());
    (queue, hal, listener)
}

fn request_config(timeout_ms: i32) -> BufferRequestConfig {
    BufferRequestConfig {
        width: 256,
        height: 256,
        timeout_ms,
        usage: BufferUsage::CPU_READ | BufferUsage::CPU_WRITE | BufferUsage::MEM_DMA,
        ..Default::default()
    }
}

fn flush_config() -> BufferFlushConfig {
    BufferFlushConfig {
        damages: smallvec![Rect::new(0, 0, 256, 256)],
        timestamp: 0,
        desired_present_timestamp: 0,
    }
}

fn invalid_fence() -> Arc<SyncFence> {
    Arc::new(SyncFence::invalid())
}

fn assert_invariants(queue: &BufferQueue) {
    let state = queue.state.lock().unwrap();
    for (sequence, element) in state.cache.iter() {
        let in_free = state.free_list.iter().filter(|s| *s == sequence).count();
        let in_dirty = state.dirty_list.iter().filter(|s| *s == sequence).count();
        match element.state {
            BufferState::Released => {
                assert_eq!(in_free, 1, "released slot {} not on free list", sequence);
                assert_eq!(in_dirty, 0);
            }
            BufferState::Flushed => {
                assert_eq!(in_dirty, 1, "flushed slot {} not on dirty list", sequence);
                assert_eq!(in_free, 0);
            }
            _ => {
                assert_eq!(in_free, 0, "held slot {} on free list", sequence);
                assert_eq!(in_dirty, 0, "held slot {} on dirty list", sequence);
            }
        }
    }
    for sequence in &state.free_list {
        assert!(state.cache.contains_key(sequence));
        assert!(!state.dirty_list.contains(sequence));
    }
    assert!(state.cache.len() as u32 <= state.queue_size);
}

#[test]
fn round_trip_reuses_slot_and_handle() {
    let (queue, hal, _) = test_queue(2);
    let config = request_config(0);

    let first = queue.request_buffer(&config).unwrap();
    assert!(first.buffer.is_some());
    queue
        .flush_buffer(first.sequence, &ExtraData::new(), invalid_fence(), &flush_config())
        .unwrap();
    let acquired = queue.acquire_buffer().unwrap();
    queue.release_buffer(&acquired.buffer, invalid_fence()).unwrap();

    let second = queue.request_buffer(&config).unwrap();
    assert_eq!(second.sequence, first.sequence);
    // Cache-hit fast path: the producer holds this sequence already.
    assert!(second.buffer.is_none());
    assert_eq!(hal.alloc_count(), 1);
    assert_eq!(hal.free_count(), 0);
}

#[test]
fn acquire_order_matches_flush_order() {
    let (queue, _, listener) = test_queue(3);
    let config = request_config(0);

    let mut flushed = Vec::new();
    for _ in 0..3 {
        let retval = queue.request_buffer(&config).unwrap();
        queue
            .flush_buffer(retval.sequence, &ExtraData::new(), invalid_fence(), &flush_config())
            .unwrap();
        flushed.push(retval.sequence);
    }
    assert_eq!(listener.count(), 3);

    let mut acquired = Vec::new();
    let mut last_timestamp = 0;
    for _ in 0..3 {
        let frame = queue.acquire_buffer().unwrap();
        assert!(frame.timestamp >= last_timestamp);
        last_timestamp = frame.timestamp;
        acquired.push(frame.buffer.sequence());
        queue.release_buffer(&frame.buffer, invalid_fence()).unwrap();
    }
    assert_eq!(flushed, acquired);
}

#[test]
fn backpressure_times_out() {
    let (queue, _, _) = test_queue(3);
    for _ in 0..3 {
        queue.request_buffer(&request_config(0)).unwrap();
    }

    // Immediate failure with a zero timeout.
    assert_eq!(
        queue.request_buffer(&request_config(0)).err(),
        Some(SurfaceError::NoBuffer)
    );

    let start = Instant::now();
    assert_eq!(
        queue.request_buffer(&request_config(10)).err(),
        Some(SurfaceError::NoBuffer)
    );
    assert!(start.elapsed() >= Duration::from_millis(10));
}

#[test]
fn waiting_request_is_woken_by_release() {
    let (queue, _, _) = test_queue(1);
    let retval = queue.request_buffer(&request_config(0)).unwrap();
    queue
        .flush_buffer(retval.sequence, &ExtraData::new(), invalid_fence(), &flush_config())
        .unwrap();
    let frame = queue.acquire_buffer().unwrap();

    let waiter = {
        let queue = queue.clone();
        std::thread::spawn(move || queue.request_buffer(&request_config(2000)))
    };
    std::thread::sleep(Duration::from_millis(20));
    queue.release_buffer(&frame.buffer, invalid_fence()).unwrap();
    let woken = waiter.join().unwrap().unwrap();
    assert_eq!(woken.sequence, retval.sequence);
}

#[test]
fn flush_without_consumer_leaves_slot_requested() {
    let hal = Arc::new(CountingHal::default());
    let queue = BufferQueue::with_allocator("s2", false, Arc::new(BufferAllocator::new(hal)));
    queue.set_queue_size(1).unwrap();

    let retval = queue.request_buffer(&request_config(0)).unwrap();
    assert_eq!(
        queue.flush_buffer(retval.sequence, &ExtraData::new(), invalid_fence(), &flush_config()),
        Err(SurfaceError::NoConsumer)
    );

    // The slot stayed REQUESTED: a consumer arriving late can still get the
    // frame.
    queue.register_consumer_listener(CountListener::new());
    queue
        .flush_buffer(retval.sequence, &ExtraData::new(), invalid_fence(), &flush_config())
        .unwrap();
    assert!(queue.query_if_buffer_available());
}

#[test]
fn cancel_returns_slot_to_free_list() {
    let (queue, _, _) = test_queue(2);
    let retval = queue.request_buffer(&request_config(0)).unwrap();
    queue.cancel_buffer(retval.sequence, &ExtraData::new()).unwrap();
    assert_invariants(&queue);
    assert_eq!(
        queue.cancel_buffer(retval.sequence, &ExtraData::new()),
        Err(SurfaceError::BufferStateInvalid)
    );

    let again = queue.request_buffer(&request_config(0)).unwrap();
    assert_eq!(again.sequence, retval.sequence);
}

#[test]
fn shape_change_reallocates_in_place() {
    let (queue, hal, _) = test_queue(1);
    let retval = queue.request_buffer(&request_config(0)).unwrap();
    queue.cancel_buffer(retval.sequence, &ExtraData::new()).unwrap();

    let mut bigger = request_config(0);
    bigger.width = 512;
    bigger.height = 512;
    bigger.format = PixelFormat::Rgb565;
    let realloced = queue.request_buffer(&bigger).unwrap();
    assert_eq!(realloced.sequence, retval.sequence);
    // The handle changed, so it travels again.
    let buffer = realloced.buffer.expect("realloc must resend the buffer");
    assert_eq!(buffer.width(), 512);
    assert_eq!(buffer.format(), Some(PixelFormat::Rgb565));
    assert_eq!(hal.alloc_count(), 2);
    assert_eq!(hal.free_count(), 1);
}

#[test]
fn shrinking_queue_surfaces_deletions_on_next_request() {
    let (queue, _, _) = test_queue(3);
    let mut sequences = Vec::new();
    for _ in 0..3 {
        let retval = queue.request_buffer(&request_config(0)).unwrap();
        sequences.push(retval.sequence);
        queue.cancel_buffer(retval.sequence, &ExtraData::new()).unwrap();
    }

    queue.set_queue_size(1).unwrap();
    let retval = queue.request_buffer(&request_config(0)).unwrap();
    assert_eq!(retval.deleting_buffers.len(), 2);
    for deleted in &retval.deleting_buffers {
        assert!(sequences.contains(deleted));
        assert_ne!(*deleted, retval.sequence);
    }
    assert_invariants(&queue);
}

#[test]
fn held_slot_is_deleted_on_release() {
    let (queue, _, _) = test_queue(2);
    let a = queue.request_buffer(&request_config(0)).unwrap();
    queue
        .flush_buffer(a.sequence, &ExtraData::new(), invalid_fence(), &flush_config())
        .unwrap();
    let frame = queue.acquire_buffer().unwrap();
    // A second slot keeps the cache over the new bound with no free slot to
    // evict, so the held slot must drain on release.
    queue.request_buffer(&request_config(0)).unwrap();

    queue.set_queue_size(1).unwrap();
    {
        let state = queue.state.lock().unwrap();
        assert!(state.cache.get(&a.sequence).unwrap().is_deleting);
    }
    let deleted = Arc::new(AtomicUsize::new(0));
    let counter = deleted.clone();
    queue.register_delete_buffer_listener(Box::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }), false);

    queue.release_buffer(&frame.buffer, invalid_fence()).unwrap();
    assert_eq!(deleted.load(Ordering::SeqCst), 1);
    let state = queue.state.lock().unwrap();
    assert!(!state.cache.contains_key(&a.sequence));
    assert!(state.producer_cache_list.contains(&a.sequence));
}

#[test]
fn clean_cache_hints_the_producer() {
    let (queue, _, _) = test_queue(3);
    let mut sequences = Vec::new();
    for _ in 0..3 {
        let retval = queue.request_buffer(&request_config(0)).unwrap();
        sequences.push(retval.sequence);
        queue.cancel_buffer(retval.sequence, &ExtraData::new()).unwrap();
    }

    let freed = queue.clean_cache(false).unwrap();
    assert_eq!(freed.len(), 3);

    let retval = queue.request_buffer(&request_config(0)).unwrap();
    let mut hinted = retval.deleting_buffers.clone();
    hinted.sort_unstable();
    sequences.sort_unstable();
    assert_eq!(hinted, sequences);
    // A fresh slot was allocated for the request.
    assert!(!sequences.contains(&retval.sequence));
    assert!(retval.buffer.is_some());
}

#[test]
fn consumer_death_fails_requests_with_no_consumer() {
    let (queue, _, _) = test_queue(2);
    queue.request_buffer(&request_config(0)).unwrap();
    queue.on_consumer_died().unwrap();
    assert_eq!(
        queue.request_buffer(&request_config(0)).err(),
        Some(SurfaceError::NoConsumer)
    );
}

#[test]
fn strict_disconnect_is_an_idempotent_latch() {
    let (queue, _, _) = test_queue(2);
    for _ in 0..3 {
        queue.disconnect_strictly().unwrap();
    }
    assert_eq!(
        queue.request_buffer(&request_config(0)).err(),
        Some(SurfaceError::ConsumerDisconnected)
    );
    let retval_err = queue.flush_buffer(0, &ExtraData::new(), invalid_fence(), &flush_config());
    assert_eq!(retval_err, Err(SurfaceError::ConsumerDisconnected));

    for _ in 0..3 {
        queue.connect_strictly().unwrap();
    }
    assert!(queue.request_buffer(&request_config(0)).is_ok());
}

#[test]
fn expect_present_skips_stale_frames() {
    let (queue, _, _) = test_queue(3);
    let base = 1_000_000_000i64;
    for i in 0..3 {
        let retval = queue.request_buffer(&request_config(0)).unwrap();
        let config = BufferFlushConfig {
            damages: smallvec![Rect::new(0, 0, 256, 256)],
            timestamp: base,
            desired_present_timestamp: base + i * 1000,
        };
        queue
            .flush_buffer(retval.sequence, &ExtraData::new(), invalid_fence(), &config)
            .unwrap();
    }

    // All three are due; the newest wins and the two stale frames drop.
    let frame = queue
        .acquire_buffer_with_timestamp(base + 2 * 1000)
        .unwrap();
    assert_eq!(queue.dropped_frame_count(), 2);
    assert_invariants(&queue);
    queue.release_buffer(&frame.buffer, invalid_fence()).unwrap();

    // Nothing flushed now.
    assert_eq!(
        queue.acquire_buffer_with_timestamp(base).err(),
        Some(SurfaceError::NoBuffer)
    );
}

#[test]
fn expect_present_respects_future_frames() {
    let (queue, _, _) = test_queue(2);
    let now = 1_000_000_000i64;

    let retval = queue.request_buffer(&request_config(0)).unwrap();
    let config = BufferFlushConfig {
        damages: smallvec![Rect::new(0, 0, 256, 256)],
        timestamp: now,
        desired_present_timestamp: now + 500_000_000,
    };
    queue
        .flush_buffer(retval.sequence, &ExtraData::new(), invalid_fence(), &config)
        .unwrap();
    assert_eq!(
        queue.acquire_buffer_with_timestamp(now).err(),
        Some(SurfaceError::NoBufferReady)
    );

    // A timestamp more than a second out is bogus and presents now.
    let retval = queue.request_buffer(&request_config(0)).unwrap();
    let config = BufferFlushConfig {
        damages: smallvec![Rect::new(0, 0, 256, 256)],
        timestamp: now,
        desired_present_timestamp: now + 5 * ONE_SECOND_NANOS,
    };
    queue
        .flush_buffer(retval.sequence, &ExtraData::new(), invalid_fence(), &config)
        .unwrap();
    let frame = queue.acquire_buffer_with_timestamp(now + 600_000_000);
    assert!(frame.is_ok());
}

#[test]
fn damages_and_timestamp_travel_verbatim() {
    let (queue, _, _) = test_queue(2);
    let retval = queue.request_buffer(&request_config(0)).unwrap();
    let config = BufferFlushConfig {
        damages: smallvec![Rect::new(0, 0, 100, 100), Rect::new(50, 50, 50, 50)],
        timestamp: 42,
        desired_present_timestamp: 0,
    };
    queue
        .flush_buffer(retval.sequence, &ExtraData::new(), invalid_fence(), &config)
        .unwrap();

    let frame = queue.acquire_buffer().unwrap();
    assert_eq!(frame.timestamp, 42);
    assert_eq!(
        frame.damages.as_slice(),
        &[Rect::new(0, 0, 100, 100), Rect::new(50, 50, 50, 50)]
    );
}

#[test]
fn attach_on_full_pool_times_out_with_queue_full() {
    let (queue, hal, _) = test_queue(2);
    queue.request_buffer(&request_config(0)).unwrap();
    queue.request_buffer(&request_config(0)).unwrap();

    let allocator = BufferAllocator::new(hal);
    let foreign = allocator.alloc(&request_config(0)).unwrap();
    let start = Instant::now();
    assert_eq!(
        queue.attach_buffer_to_queue(foreign.clone(), 5),
        Err(SurfaceError::BufferQueueFull)
    );
    assert!(start.elapsed() >= Duration::from_millis(5));

    // The producer-side variant reports a timeout instead.
    assert_eq!(
        queue.attach_buffer(foreign, 5),
        Err(SurfaceError::OutOfRange)
    );
}

#[test]
fn attach_detach_round_trip() {
    let (queue, hal, _) = test_queue(3);
    let allocator = BufferAllocator::new(hal);
    let foreign = allocator.alloc(&request_config(0)).unwrap();

    queue.attach_buffer_to_queue(foreign.clone(), 0).unwrap();
    assert!(foreign.consumer_attach_flag());
    assert_eq!(
        queue.attach_buffer_to_queue(foreign.clone(), 0),
        Err(SurfaceError::BufferIsInCache)
    );

    // Attached slots release into the free list like any held slot.
    queue.release_buffer(&foreign, invalid_fence()).unwrap();
    assert_invariants(&queue);

    queue.detach_buffer(&foreign).unwrap();
    assert_eq!(
        queue.detach_buffer(&foreign),
        Err(SurfaceError::BufferNotInCache)
    );
}

#[test]
fn reserve_slot_detach_shrinks_the_pool() {
    let (queue, _, _) = test_queue(2);
    let retval = queue.request_buffer(&request_config(0)).unwrap();
    let buffer = retval.buffer.unwrap();
    queue.detach_buffer_from_queue(&buffer, true).unwrap();

    // Only one effective slot remains.
    queue.request_buffer(&request_config(0)).unwrap();
    assert_eq!(
        queue.request_buffer(&request_config(0)).err(),
        Some(SurfaceError::NoBuffer)
    );

    // Re-attaching restores the reserved slot.
    queue.attach_buffer_to_queue(buffer, 0).unwrap();
    assert_eq!(queue.state.lock().unwrap().detached_reserve_slots, 0);
}

#[test]
fn attached_slot_is_reclaimed_by_flush_not_cancel() {
    let (queue, hal, _) = test_queue(3);
    let allocator = BufferAllocator::new(hal);
    let foreign = allocator.alloc(&request_config(0)).unwrap();
    queue.attach_buffer(foreign.clone(), 0).unwrap();

    // Cancel only takes Requested slots.
    assert_eq!(
        queue.cancel_buffer(foreign.sequence(), &ExtraData::new()),
        Err(SurfaceError::BufferStateInvalid)
    );

    // Flushing reclaims the attached slot and commits it in one call.
    queue
        .flush_buffer(foreign.sequence(), &ExtraData::new(), invalid_fence(), &flush_config())
        .unwrap();
    let frame = queue.acquire_buffer().unwrap();
    assert_eq!(frame.buffer.sequence(), foreign.sequence());
    queue.release_buffer(&frame.buffer, invalid_fence()).unwrap();
    assert_invariants(&queue);
}

#[test]
fn attach_and_flush_delivers_a_frame() {
    let (queue, hal, listener) = test_queue(2);
    let allocator = BufferAllocator::new(hal);
    let foreign = allocator.alloc(&request_config(0)).unwrap();

    queue
        .attach_and_flush_buffer(foreign.clone(), invalid_fence(), &flush_config(), false)
        .unwrap();
    assert_eq!(listener.count(), 1);
    let frame = queue.acquire_buffer().unwrap();
    assert_eq!(frame.buffer.sequence(), foreign.sequence());
}

#[test]
fn request_and_detach_removes_the_slot() {
    let (queue, _, _) = test_queue(2);
    let retval = queue.request_and_detach_buffer(&request_config(0)).unwrap();
    assert!(retval.buffer.is_some());
    let state = queue.state.lock().unwrap();
    assert!(!state.cache.contains_key(&retval.sequence));
}

#[test]
fn buffer_hold_suppresses_wakeups() {
    let (queue, _, listener) = test_queue(2);
    queue.set_buffer_hold(true);
    let retval = queue.request_buffer(&request_config(0)).unwrap();
    queue
        .flush_buffer(retval.sequence, &ExtraData::new(), invalid_fence(), &flush_config())
        .unwrap();
    assert_eq!(listener.count(), 0);
    assert!(queue.query_if_buffer_available());
}

#[test]
fn go_background_forces_buffer_resend() {
    let (queue, _, _) = test_queue(2);
    let retval = queue.request_buffer(&request_config(0)).unwrap();
    queue.cancel_buffer(retval.sequence, &ExtraData::new()).unwrap();

    // Normally a reuse is a cache hit and the handle is omitted.
    let again = queue.request_buffer(&request_config(0)).unwrap();
    assert!(again.buffer.is_none());
    queue.cancel_buffer(again.sequence, &ExtraData::new()).unwrap();

    queue.go_background().unwrap();
    let resent = queue.request_buffer(&request_config(0)).unwrap();
    assert!(resent.buffer.is_some());
}

#[test]
fn last_flushed_buffer_is_pinned_once() {
    let (queue, _, _) = test_queue(2);
    let retval = queue.request_buffer(&request_config(0)).unwrap();
    assert_eq!(
        queue.get_last_flushed_buffer().err(),
        Some(SurfaceError::NoEntry)
    );
    queue
        .flush_buffer(retval.sequence, &ExtraData::new(), invalid_fence(), &flush_config())
        .unwrap();

    let (buffer, _, matrix) = queue.get_last_flushed_buffer().unwrap();
    assert_eq!(buffer.sequence(), retval.sequence);
    assert_eq!(matrix, transform_matrix(TransformType::RotateNone));

    let (pinned, _, _) = queue.acquire_last_flushed_buffer().unwrap();
    assert_eq!(
        queue.acquire_last_flushed_buffer().err(),
        Some(SurfaceError::BufferStateInvalid)
    );
    assert_eq!(
        queue.release_last_flushed_buffer(pinned.sequence() + 1),
        Err(SurfaceError::BufferStateInvalid)
    );
    queue.release_last_flushed_buffer(pinned.sequence()).unwrap();
    assert_eq!(
        queue.release_last_flushed_buffer(pinned.sequence()),
        Err(SurfaceError::NoEntry)
    );
}

#[test]
fn per_slot_attributes_round_trip() {
    let (queue, _, _) = test_queue(2);
    let retval = queue.request_buffer(&request_config(0)).unwrap();
    let sequence = retval.sequence;

    queue.set_scaling_mode(sequence, ScalingMode::ScaleCrop).unwrap();
    assert_eq!(queue.get_scaling_mode(sequence), Ok(ScalingMode::ScaleCrop));

    assert_eq!(
        queue.set_metadata(sequence, Vec::new()),
        Err(SurfaceError::InvalidArguments)
    );
    queue
        .set_metadata(
            sequence,
            vec![HdrMetadata {
                key: HdrMetadataKey::MaxLuminance,
                value: 1000.0,
            }],
        )
        .unwrap();
    assert_eq!(queue.query_metadata_type(sequence), Ok(HdrMetadataType::Metadata));

    queue
        .set_metadata_set(sequence, HdrMetadataKey::Hdr10Plus, vec![1, 2, 3])
        .unwrap();
    assert_eq!(
        queue.query_metadata_type(sequence),
        Ok(HdrMetadataType::MetadataSet)
    );
    let (key, blob) = queue.get_metadata_set(sequence).unwrap();
    assert_eq!(key, HdrMetadataKey::Hdr10Plus);
    assert_eq!(blob, vec![1, 2, 3]);

    queue
        .set_present_timestamp(
            sequence,
            PresentTimestamp {
                ty: PresentTimestampType::Timestamp,
                time: 777,
            },
        )
        .unwrap();
    assert_eq!(
        queue.get_present_timestamp(sequence, PresentTimestampType::Timestamp),
        Ok(777)
    );
    assert_eq!(
        queue.get_present_timestamp(sequence, PresentTimestampType::Delay),
        Err(SurfaceError::TypeError)
    );
    assert_eq!(
        queue.get_present_timestamp(sequence + 1, PresentTimestampType::Timestamp),
        Err(SurfaceError::NoEntry)
    );
}

#[test]
fn default_scaling_mode_applies_to_new_slots() {
    let (queue, _, _) = test_queue(2);
    queue.set_default_scaling_mode(ScalingMode::ScaleFit);
    let retval = queue.request_buffer(&request_config(0)).unwrap();
    assert_eq!(
        queue.get_scaling_mode(retval.sequence),
        Ok(ScalingMode::ScaleFit)
    );
}

#[test]
fn tunnel_handle_rejects_duplicate_set() {
    let (queue, _, _) = test_queue(2);
    assert_eq!(queue.set_tunnel_handle(None), Err(SurfaceError::NoEntry));

    let handle = Arc::new(TunnelHandle {
        fds: vec![3],
        reserve_ints: vec![1, 2],
    });
    queue.set_tunnel_handle(Some(handle.clone())).unwrap();
    assert_eq!(
        queue.set_tunnel_handle(Some(handle.clone())),
        Err(SurfaceError::InvalidOperating)
    );
    assert_eq!(queue.get_tunnel_handle(), Some(handle));
    queue.set_tunnel_handle(None).unwrap();
    assert_eq!(queue.get_tunnel_handle(), None);
}

#[test]
fn shared_mode_reuses_one_slot_in_place() {
    let hal = Arc::new(CountingHal::default());
    let queue = BufferQueue::with_allocator("shared", true, Arc::new(BufferAllocator::new(hal.clone())));
    queue.register_consumer_listener(CountListener::new());

    let first = queue.request_buffer(&request_config(0)).unwrap();
    assert!(first.buffer.is_some());
    let second = queue.request_buffer(&request_config(0)).unwrap();
    assert_eq!(second.sequence, first.sequence);
    assert_eq!(hal.alloc_count(), 1);

    queue
        .flush_buffer(first.sequence, &ExtraData::new(), invalid_fence(), &flush_config())
        .unwrap();
    let frame = queue.acquire_buffer().unwrap();
    assert_eq!(frame.buffer.sequence(), first.sequence);
    queue.release_buffer(&frame.buffer, invalid_fence()).unwrap();

    // Latest-wins: producer can keep requesting without releases.
    assert!(queue.request_buffer(&request_config(0)).is_ok());
}

#[test]
fn queue_size_bounds_are_validated() {
    let (queue, _, _) = test_queue(2);
    assert_eq!(queue.set_queue_size(0), Err(SurfaceError::InvalidArguments));
    assert_eq!(
        queue.set_queue_size(SURFACE_MAX_QUEUE_SIZE + 1),
        Err(SurfaceError::InvalidArguments)
    );
    queue.set_queue_size(SURFACE_MAX_QUEUE_SIZE).unwrap();
    assert_eq!(queue.get_queue_size(), SURFACE_MAX_QUEUE_SIZE);
}

#[test]
fn pool_conservation_under_random_driving() {
    let (queue, _, _) = test_queue(4);
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut requested: Vec<u32> = Vec::new();
    let mut flushed_order: VecDeque<u32> = VecDeque::new();
    let mut acquired: Vec<Arc<SurfaceBuffer>> = Vec::new();

    for _ in 0..1000 {
        match rng.gen_range(0..5) {
            0 => {
                if let Ok(retval) = queue.request_buffer(&request_config(0)) {
                    requested.push(retval.sequence);
                }
            }
            1 => {
                if let Some(index) = (!requested.is_empty())
                    .then(|| rng.gen_range(0..requested.len()))
                {
                    let sequence = requested.swap_remove(index);
                    queue.cancel_buffer(sequence, &ExtraData::new()).unwrap();
                }
            }
            2 => {
                if let Some(index) = (!requested.is_empty())
                    .then(|| rng.gen_range(0..requested.len()))
                {
                    let sequence = requested.swap_remove(index);
                    queue
                        .flush_buffer(sequence, &ExtraData::new(), invalid_fence(), &flush_config())
                        .unwrap();
                    flushed_order.push_back(sequence);
                }
            }
            3 => {
                if let Ok(frame) = queue.acquire_buffer() {
                    // FIFO: acquires see flushes in order.
                    assert_eq!(flushed_order.pop_front(), Some(frame.buffer.sequence()));
                    acquired.push(frame.buffer);
                }
            }
            _ => {
                if let Some(index) = (!acquired.is_empty())
                    .then(|| rng.gen_range(0..acquired.len()))
                {
                    let buffer = acquired.swap_remove(index);
                    queue.release_buffer(&buffer, invalid_fence()).unwrap();
                }
            }
        }
        assert_invariants(&queue);
    }
}
