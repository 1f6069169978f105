//! End-to-end scenarios: producer proxy -> loopback transport -> service ->
//! queue -> consumer facade, with real memfd-backed buffers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use smallvec::smallvec;

use framequeue::buffer::{BufferAllocator, BufferFlushConfig, BufferRequestConfig, BufferUsage};
use framequeue::consumer::ConsumerSurface;
use framequeue::fence::SyncFence;
use framequeue::ipc::LoopbackTransport;
use framequeue::producer::client::ProducerClient;
use framequeue::producer::service::ProducerService;
use framequeue::queue::ConsumerListener;
use framequeue::utils::Rect;
use framequeue::SurfaceError;

#[derive(Default)]
struct NotifyListener {
    available: AtomicUsize,
}

impl ConsumerListener for NotifyListener {
    fn on_buffer_available(&self) {
        self.available.fetch_add(1, Ordering::SeqCst);
    }
}

struct Pipeline {
    consumer: Arc<ConsumerSurface>,
    service: Arc<ProducerService>,
    client: Arc<ProducerClient>,
    listener: Arc<NotifyListener>,
}

fn pipeline(name: &str) -> Pipeline {
    let consumer = ConsumerSurface::new(name);
    let listener = Arc::new(NotifyListener::default());
    consumer.register_consumer_listener(listener.clone());

    let service = ProducerService::new(consumer.queue().clone());
    let transport = LoopbackTransport::new(service.clone());
    let client = ProducerClient::new(transport);
    service.set_listener_channel(LoopbackTransport::new(client.listener_stub()));

    Pipeline {
        consumer,
        service,
        client,
        listener,
    }
}

fn render_config(timeout_ms: i32) -> BufferRequestConfig {
    BufferRequestConfig {
        width: 256,
        height: 256,
        timeout_ms,
        usage: BufferUsage::CPU_READ | BufferUsage::CPU_WRITE | BufferUsage::MEM_DMA,
        ..Default::default()
    }
}

fn full_damage() -> BufferFlushConfig {
    BufferFlushConfig {
        damages: smallvec![Rect::new(0, 0, 256, 256)],
        timestamp: 0,
        desired_present_timestamp: 0,
    }
}

fn fence() -> Arc<SyncFence> {
    Arc::new(SyncFence::signalled())
}

#[test]
fn s1_two_frames_round_trip_with_slot_reuse() {
    let p = pipeline("s1");
    p.consumer.set_queue_size(2).unwrap();

    let mut sequences = Vec::new();
    let mut last_timestamp = 0;
    for frame in 0u8..2 {
        let (buffer, acquire_fence) = p.client.request_buffer(&render_config(0)).unwrap();
        assert!(acquire_fence.wait(0).unwrap());

        // Render: the buffer is a real memfd mapping on the producer side.
        BufferAllocator::global().map(&buffer).unwrap();
        buffer
            .with_mapped_mut(|pixels| {
                pixels[..4].copy_from_slice(&[frame, frame, frame, 0xff]);
            })
            .unwrap();

        p.client.flush_buffer(&buffer, &fence(), &full_damage()).unwrap();

        let acquired = p.consumer.acquire_buffer().unwrap();
        assert!(acquired.fence.wait(1000).unwrap());
        assert!(acquired.timestamp > last_timestamp);
        last_timestamp = acquired.timestamp;
        acquired
            .buffer
            .with_mapped(|pixels| {
                assert_eq!(&pixels[..4], &[frame, frame, frame, 0xff]);
            })
            .unwrap();
        sequences.push(acquired.buffer.sequence());

        p.consumer
            .release_buffer(&acquired.buffer, fence())
            .unwrap();
    }

    // Second frame reused the first slot.
    assert_eq!(sequences[0], sequences[1]);
    assert_eq!(p.listener.available.load(Ordering::SeqCst), 2);
}

#[test]
fn s2_flush_without_consumer_returns_no_consumer() {
    let p = pipeline("s2");
    p.consumer.set_queue_size(1).unwrap();

    let (buffer, _) = p.client.request_buffer(&render_config(0)).unwrap();
    p.consumer.unregister_consumer_listener();

    assert_eq!(
        p.client.flush_buffer(&buffer, &fence(), &full_damage()),
        Err(SurfaceError::NoConsumer)
    );

    // Slot stayed REQUESTED; re-registering the consumer lets the same
    // flush succeed.
    p.consumer
        .register_consumer_listener(Arc::new(NotifyListener::default()));
    p.client
        .flush_buffer(&buffer, &fence(), &full_damage())
        .unwrap();
}

#[test]
fn s3_backpressure_over_the_wire() {
    let p = pipeline("s3");
    p.consumer.set_queue_size(3).unwrap();

    for _ in 0..3 {
        p.client.request_buffer(&render_config(0)).unwrap();
    }

    let start = Instant::now();
    assert_eq!(
        p.client.request_buffer(&render_config(10)).err(),
        Some(SurfaceError::NoBuffer)
    );
    assert!(start.elapsed() >= Duration::from_millis(10));
}

#[test]
fn s4_consumer_attach_times_out_on_a_full_pool() {
    let p = pipeline("s4");
    p.consumer.set_queue_size(2).unwrap();
    p.client.request_buffer(&render_config(0)).unwrap();
    p.client.request_buffer(&render_config(0)).unwrap();

    let foreign = BufferAllocator::global().alloc(&render_config(0)).unwrap();
    let start = Instant::now();
    assert_eq!(
        p.consumer.attach_buffer_to_queue(foreign, 5),
        Err(SurfaceError::BufferQueueFull)
    );
    assert!(start.elapsed() >= Duration::from_millis(5));
}

#[test]
fn s5_damages_and_timestamp_reach_the_consumer_verbatim() {
    let p = pipeline("s5");
    let (buffer, _) = p.client.request_buffer(&render_config(0)).unwrap();

    let flush = BufferFlushConfig {
        damages: smallvec![Rect::new(0, 0, 100, 100), Rect::new(50, 50, 50, 50)],
        timestamp: 42,
        desired_present_timestamp: 0,
    };
    p.client.flush_buffer(&buffer, &fence(), &flush).unwrap();

    let acquired = p.consumer.acquire_buffer().unwrap();
    assert_eq!(acquired.timestamp, 42);
    assert_eq!(
        acquired.damages.as_slice(),
        &[Rect::new(0, 0, 100, 100), Rect::new(50, 50, 50, 50)]
    );
}

#[test]
fn s6_clean_cache_hints_reach_the_mirror() {
    let p = pipeline("s6");
    p.consumer.set_queue_size(3).unwrap();

    // Seed the mirror with three cached slots.
    let mut buffers = Vec::new();
    for _ in 0..3 {
        let (buffer, _) = p.client.request_buffer(&render_config(0)).unwrap();
        buffers.push(buffer);
    }
    for buffer in &buffers {
        p.client.cancel_buffer(buffer).unwrap();
    }
    assert_eq!(p.client.cached_buffer_count(), 3);

    p.consumer.clean_cache().unwrap();

    // The next request is served from a fresh slot and evicts the stale
    // mirror entries.
    let (buffer, _) = p.client.request_buffer(&render_config(0)).unwrap();
    assert!(!buffers.iter().any(|b| b.sequence() == buffer.sequence()));
    assert_eq!(p.client.cached_buffer_count(), 1);
}

#[test]
fn deletion_propagates_after_queue_shrink() {
    let p = pipeline("shrink");
    p.consumer.set_queue_size(3).unwrap();

    let mut buffers = Vec::new();
    for _ in 0..3 {
        let (buffer, _) = p.client.request_buffer(&render_config(0)).unwrap();
        buffers.push(buffer);
    }
    for buffer in &buffers {
        p.client.cancel_buffer(buffer).unwrap();
    }

    p.consumer.set_queue_size(1).unwrap();
    p.client.request_buffer(&render_config(0)).unwrap();
    assert_eq!(p.client.cached_buffer_count(), 1);
}

#[test]
fn peer_death_self_heals_the_mirror() {
    let p = pipeline("death");
    p.consumer.set_queue_size(2).unwrap();

    let (buffer, _) = p.client.request_buffer(&render_config(0)).unwrap();
    p.client.flush_buffer(&buffer, &fence(), &full_damage()).unwrap();
    assert!(p.client.cached_buffer_count() > 0);

    p.consumer.on_consumer_died().unwrap();

    assert_eq!(
        p.client.request_buffer(&render_config(0)).err(),
        Some(SurfaceError::NoConsumer)
    );
    assert_eq!(p.client.cached_buffer_count(), 0);
}

#[test]
fn producer_death_clears_the_connection_and_cache() {
    let p = pipeline("producer-death");
    p.client.connect().unwrap();
    let (buffer, _) = p.client.request_buffer(&render_config(0)).unwrap();
    p.client.cancel_buffer(&buffer).unwrap();
    assert_ne!(p.service.queue().connected_pid(), 0);

    p.service.on_producer_died();
    assert_eq!(p.service.queue().connected_pid(), 0);
    // Every slot left the server cache.
    assert_eq!(p.service.queue().dump().lines().count(), 1);
}

#[test]
fn release_listener_fires_after_consumer_release() {
    let p = pipeline("release");
    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    p.client
        .register_release_listener(Box::new(move |buffer| {
            assert!(buffer.sequence() < u32::MAX);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();

    let (buffer, _) = p.client.request_buffer(&render_config(0)).unwrap();
    p.client.flush_buffer(&buffer, &fence(), &full_damage()).unwrap();
    let acquired = p.consumer.acquire_buffer().unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 0);

    p.consumer.release_buffer(&acquired.buffer, fence()).unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 1);

    // Unregister clears the callback before the server forgets it: no
    // event can land afterwards.
    p.client.unregister_release_listener().unwrap();
    let (buffer, _) = p.client.request_buffer(&render_config(0)).unwrap();
    p.client.flush_buffer(&buffer, &fence(), &full_damage()).unwrap();
    let acquired = p.consumer.acquire_buffer().unwrap();
    p.consumer.release_buffer(&acquired.buffer, fence()).unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn pre_cache_buffer_survives_a_clean() {
    let p = pipeline("precache");
    p.consumer.set_queue_size(3).unwrap();

    let (buffer, _) = p.client.request_buffer(&render_config(0)).unwrap();
    p.client.cancel_buffer(&buffer).unwrap();
    // One mirrored entry: the lookaside holds the prebuffer.
    assert!(p.client.has_pre_cache_buffer());

    p.client.clean_cache().unwrap();
    assert_eq!(p.client.cached_buffer_count(), 0);
    assert!(p.client.has_pre_cache_buffer());

    // Two live entries again: the lookaside is dropped.
    let (a, _) = p.client.request_buffer(&render_config(0)).unwrap();
    let _keep = a;
    let (_b, _) = p.client.request_buffer(&render_config(0)).unwrap();
    assert!(p.client.cached_buffer_count() >= 2);
    assert!(!p.client.has_pre_cache_buffer());
}

#[test]
fn strict_disconnect_gates_the_wire() {
    let p = pipeline("strict");
    p.client.request_buffer(&render_config(0)).unwrap();

    p.client.disconnect_strictly().unwrap();
    p.client.disconnect_strictly().unwrap();
    assert_eq!(
        p.client.request_buffer(&render_config(0)).err(),
        Some(SurfaceError::ConsumerDisconnected)
    );

    p.client.connect_strictly().unwrap();
    assert!(p.client.request_buffer(&render_config(0)).is_ok());
}

#[test]
fn connect_returns_init_info() {
    let p = pipeline("init-info");
    p.consumer.set_default_width_and_height(1920, 1080).unwrap();

    let info = p.client.connect().unwrap();
    assert_eq!(info.name, "init-info");
    assert_eq!(info.unique_id, p.consumer.unique_id());
    assert_eq!(info.width, 1920);
    assert_eq!(info.height, 1080);
    assert!(!info.is_in_hebc_list);
}

#[test]
fn scalar_settings_round_trip_over_the_wire() {
    let p = pipeline("scalars");

    p.client.set_queue_size(5).unwrap();
    assert_eq!(p.client.get_queue_size(), Ok(5));
    assert_eq!(p.consumer.get_queue_size(), 5);

    p.client
        .set_transform(framequeue::buffer::TransformType::Rotate90)
        .unwrap();
    assert_eq!(
        p.client.get_transform(),
        Ok(framequeue::buffer::TransformType::Rotate90)
    );

    p.client.set_surface_app_framework_type("arkui").unwrap();
    assert_eq!(p.client.get_surface_app_framework_type().unwrap(), "arkui");

    assert_eq!(
        p.client.set_global_alpha(300).err(),
        Some(SurfaceError::InvalidArguments)
    );
    p.client.set_global_alpha(128).unwrap();

    let (name, unique_id) = p.client.get_name_and_unique_id().unwrap();
    assert_eq!(name, "scalars");
    assert_eq!(unique_id, p.consumer.unique_id());
}

#[test]
fn request_and_detach_gives_ownership() {
    let p = pipeline("detach");
    let (buffer, _) = p.client.request_and_detach_buffer(&render_config(0)).unwrap();
    assert_eq!(p.client.cached_buffer_count(), 0);

    // The slot left the server cache too, so the pool is free again.
    p.client.request_buffer(&render_config(0)).unwrap();
    drop(buffer);
}

#[test]
fn batch_request_and_flush_round_trip() {
    let p = pipeline("batch");
    p.consumer.set_queue_size(3).unwrap();

    let buffers = p.client.request_buffers(&render_config(0), 3).unwrap();
    assert_eq!(buffers.len(), 3);

    let frames: Vec<_> = buffers
        .iter()
        .map(|(buffer, _)| (buffer.clone(), fence(), full_damage()))
        .collect();
    p.client.flush_buffers(&frames).unwrap();

    for _ in 0..3 {
        let acquired = p.consumer.acquire_buffer().unwrap();
        p.consumer.release_buffer(&acquired.buffer, fence()).unwrap();
    }
}

#[test]
fn transport_death_surfaces_binder_errors() {
    let consumer = ConsumerSurface::new("binder");
    let service = ProducerService::new(consumer.queue().clone());
    let transport = LoopbackTransport::new(service);
    let client = ProducerClient::new(transport.clone());

    transport.simulate_death();
    assert_eq!(
        client.get_queue_size().err(),
        Some(SurfaceError::Binder)
    );
}
