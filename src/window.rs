//! Native-window facade over a producer surface.
//!
//! The window keeps a current [`BufferRequestConfig`] mutated by typed
//! get/set operations, so rendering code can request/flush/abort buffers
//! without rebuilding the config per frame. Windows register themselves in
//! the process-wide [`crate::registry::SurfaceRegistry`] so they can be
//! recovered from a 64-bit surface id.

use std::sync::{Arc, Mutex};

use crate::buffer::{
    BufferFlushConfig, BufferRequestConfig, BufferUsage, PixelFormat, SurfaceBuffer,
    SurfaceSourceType, TransformType,
};
use crate::error::{SurfaceError, SurfaceResult};
use crate::fence::SyncFence;
use crate::producer::client::ProducerClient;
use crate::registry::SurfaceRegistry;
use crate::utils::DamageRegion;

/// A window-shaped handle for rendering code.
pub struct NativeWindow {
    client: Arc<ProducerClient>,
    unique_id: u64,
    config: Mutex<BufferRequestConfig>,
}

impl std::fmt::Debug for NativeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeWindow")
            .field("unique_id", &self.unique_id)
            .finish_non_exhaustive()
    }
}

impl NativeWindow {
    /// Wraps a producer surface, registering the window under the queue's
    /// unique id.
    pub fn from_surface(client: Arc<ProducerClient>) -> SurfaceResult<Arc<NativeWindow>> {
        let unique_id = client.get_unique_id()?;
        let window = Arc::new(NativeWindow {
            client,
            unique_id,
            config: Mutex::new(BufferRequestConfig::default()),
        });
        SurfaceRegistry::global().add_window(unique_id, &window);
        Ok(window)
    }

    /// Recovers a window from a surface id: an existing window if one is
    /// registered, else a fresh one over the registered surface.
    pub fn from_surface_id(unique_id: u64) -> SurfaceResult<Arc<NativeWindow>> {
        let registry = SurfaceRegistry::global();
        if let Some(window) = registry.get_window(unique_id) {
            return Ok(window);
        }
        let surface = registry.get_surface(unique_id).ok_or(SurfaceError::NoEntry)?;
        NativeWindow::from_surface(surface)
    }

    /// The id this window registered under.
    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    /// The underlying producer surface.
    pub fn surface(&self) -> &Arc<ProducerClient> {
        &self.client
    }

    // Frame loop ----------------------------------------------------------

    /// Requests a buffer using the window's current config.
    pub fn request_buffer(&self) -> SurfaceResult<(Arc<SurfaceBuffer>, Arc<SyncFence>)> {
        let config = *self.config.lock().unwrap();
        self.client.request_buffer(&config)
    }

    /// Flushes a rendered buffer with the given damage.
    pub fn flush_buffer(
        &self,
        buffer: &Arc<SurfaceBuffer>,
        fence: &Arc<SyncFence>,
        damages: DamageRegion,
    ) -> SurfaceResult<()> {
        let flush_config = BufferFlushConfig {
            damages,
            timestamp: 0,
            desired_present_timestamp: 0,
        };
        self.client.flush_buffer(buffer, fence, &flush_config)
    }

    /// Aborts a requested buffer, returning it unrendered.
    pub fn abort_buffer(&self, buffer: &Arc<SurfaceBuffer>) -> SurfaceResult<()> {
        self.client.cancel_buffer(buffer)
    }

    /// Injects a foreign buffer.
    pub fn attach_buffer(&self, buffer: &Arc<SurfaceBuffer>, timeout_ms: i32) -> SurfaceResult<()> {
        self.client.attach_buffer_with_timeout(buffer, timeout_ms)
    }

    /// Removes a buffer from the queue.
    pub fn detach_buffer(&self, buffer: &Arc<SurfaceBuffer>) -> SurfaceResult<()> {
        self.client.detach_buffer(buffer)
    }

    // Typed handle options ------------------------------------------------

    /// Sets the usage for future requests.
    pub fn set_usage(&self, usage: BufferUsage) {
        self.config.lock().unwrap().usage = usage;
    }

    /// The usage for future requests.
    pub fn usage(&self) -> BufferUsage {
        self.config.lock().unwrap().usage
    }

    /// Sets the geometry for future requests.
    pub fn set_buffer_geometry(&self, width: i32, height: i32) -> SurfaceResult<()> {
        if width <= 0 || height <= 0 {
            return Err(SurfaceError::InvalidArguments);
        }
        let mut config = self.config.lock().unwrap();
        config.width = width;
        config.height = height;
        Ok(())
    }

    /// The geometry for future requests.
    pub fn buffer_geometry(&self) -> (i32, i32) {
        let config = self.config.lock().unwrap();
        (config.width, config.height)
    }

    /// Sets the pixel format for future requests.
    pub fn set_format(&self, format: PixelFormat) {
        self.config.lock().unwrap().format = format;
    }

    /// The pixel format for future requests.
    pub fn format(&self) -> PixelFormat {
        self.config.lock().unwrap().format
    }

    /// Sets the stride alignment for future requests.
    pub fn set_stride(&self, stride_alignment: i32) -> SurfaceResult<()> {
        if !matches!(stride_alignment, 4 | 8 | 16 | 32 | 64) {
            return Err(SurfaceError::InvalidArguments);
        }
        self.config.lock().unwrap().stride_alignment = stride_alignment;
        Ok(())
    }

    /// The stride alignment for future requests.
    pub fn stride(&self) -> i32 {
        self.config.lock().unwrap().stride_alignment
    }

    /// Sets the color gamut for future requests.
    pub fn set_color_gamut(&self, gamut: crate::buffer::ColorGamut) {
        self.config.lock().unwrap().color_gamut = gamut;
    }

    /// The color gamut for future requests.
    pub fn color_gamut(&self) -> crate::buffer::ColorGamut {
        self.config.lock().unwrap().color_gamut
    }

    /// Sets the request timeout.
    pub fn set_timeout(&self, timeout_ms: i32) {
        self.config.lock().unwrap().timeout_ms = timeout_ms;
    }

    /// The request timeout.
    pub fn timeout(&self) -> i32 {
        self.config.lock().unwrap().timeout_ms
    }

    /// Sets the presentation transform, locally and on the queue.
    pub fn set_transform(&self, transform: TransformType) -> SurfaceResult<()> {
        self.config.lock().unwrap().transform = transform;
        self.client.set_transform(transform)
    }

    /// The presentation transform.
    pub fn transform(&self) -> TransformType {
        self.config.lock().unwrap().transform
    }

    /// The queue's transform hint (get-only from the window).
    pub fn transform_hint(&self) -> SurfaceResult<TransformType> {
        self.client.get_transform_hint()
    }

    /// Sets the queue size.
    pub fn set_buffer_queue_size(&self, size: u32) -> SurfaceResult<()> {
        self.client.set_queue_size(size)
    }

    /// The queue size.
    pub fn buffer_queue_size(&self) -> SurfaceResult<u32> {
        self.client.get_queue_size()
    }

    /// Sets where the surface content originates.
    pub fn set_source_type(&self, ty: SurfaceSourceType) -> SurfaceResult<()> {
        self.client.set_surface_source_type(ty)
    }

    /// Content origin.
    pub fn source_type(&self) -> SurfaceResult<SurfaceSourceType> {
        self.client.get_surface_source_type()
    }

    /// Sets the app framework tag.
    pub fn set_app_framework_type(&self, ty: &str) -> SurfaceResult<()> {
        self.client.set_surface_app_framework_type(ty)
    }

    /// The app framework tag.
    pub fn app_framework_type(&self) -> SurfaceResult<String> {
        self.client.get_surface_app_framework_type()
    }

    /// Sets HDR white point brightness.
    pub fn set_hdr_white_point_brightness(&self, brightness: f32) -> SurfaceResult<()> {
        self.client.set_hdr_white_point_brightness(brightness)
    }

    /// Sets SDR white point brightness.
    pub fn set_sdr_white_point_brightness(&self, brightness: f32) -> SurfaceResult<()> {
        self.client.set_sdr_white_point_brightness(brightness)
    }
}
