//! Buffer descriptors and pixel metadata.
//!
//! A [`SurfaceBuffer`] is an opaque handle to a shared memory region plus the
//! pixel metadata describing it. Buffers are allocated through the
//! [`BufferAllocator`] adaptor over a display-buffer HAL and are shared by
//! reference count between the queue's slot cache, the producer's mirror
//! cache and whichever peer currently holds the slot; the HAL handle is
//! freed exactly once when the last reference drops.

use std::collections::BTreeMap;
use std::os::fd::OwnedFd;
use std::sync::{Mutex, RwLock};

use crate::error::{SurfaceError, SurfaceResult};
use crate::utils::next_sequence;

mod allocator;
mod memfd;
#[cfg(test)]
pub(crate) mod testing;

pub use allocator::{AllocInfo, BufferAllocator, DisplayBufferHal, HalError};
pub use memfd::MemfdHal;

/// Queue sizes are bounded to keep slot scans cheap.
pub const SURFACE_MAX_QUEUE_SIZE: u32 = 64;
/// Triple buffering unless the producer asks otherwise.
pub const SURFACE_DEFAULT_QUEUE_SIZE: u32 = 3;
/// Upper bound for either buffer dimension.
pub const SURFACE_MAX_SIZE: i32 = 16384;
/// Per-frame extra-data bags stay small; the consumer reads them verbatim.
pub const EXTRA_DATA_MAX_COUNT: usize = 64;

bitflags::bitflags! {
    /// Intended use of a buffer, as requested by the producer.
    ///
    /// The allocator forwards these to the HAL; the queue itself only
    /// inspects `PROTECTED` (skip CPU mapping) and the CPU bits (map after
    /// allocation for software rendering).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u64 {
        /// CPU reads the pixels.
        const CPU_READ = 1 << 0;
        /// CPU writes the pixels.
        const CPU_WRITE = 1 << 1;
        /// Physically contiguous media-zone memory.
        const MEM_MMZ = 1 << 2;
        /// DMA-capable memory.
        const MEM_DMA = 1 << 3;
        /// Shareable across processes.
        const MEM_SHARE = 1 << 4;
        /// Cached media-zone memory.
        const MEM_MMZ_CACHE = 1 << 5;
        /// Framebuffer memory.
        const MEM_FB = 1 << 6;
        /// The caller supplies the size.
        const ASSIGN_SIZE = 1 << 7;
        /// GPU render target.
        const HW_RENDER = 1 << 8;
        /// GPU texture source.
        const HW_TEXTURE = 1 << 9;
        /// Display controller scanout.
        const HW_COMPOSER = 1 << 10;
        /// Contents must not be CPU-mappable.
        const PROTECTED = 1 << 11;
        /// Camera capture read.
        const CAMERA_READ = 1 << 12;
        /// Camera capture write.
        const CAMERA_WRITE = 1 << 13;
        /// Video encoder input.
        const VIDEO_ENCODER = 1 << 14;
        /// Video decoder output.
        const VIDEO_DECODER = 1 << 15;
    }
}

/// Pixel layout of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PixelFormat {
    /// 32-bit RGBA, 8 bits per channel.
    Rgba8888 = 0,
    /// 32-bit RGBX, alpha ignored.
    Rgbx8888 = 1,
    /// 32-bit BGRA.
    Bgra8888 = 2,
    /// 24-bit RGB.
    Rgb888 = 3,
    /// 16-bit RGB 5:6:5.
    Rgb565 = 4,
    /// 32-bit RGBA 10:10:10:2.
    Rgba1010102 = 5,
    /// Semi-planar YCbCr 4:2:0.
    Ycbcr420Sp = 6,
    /// Semi-planar YCrCb 4:2:0.
    Ycrcb420Sp = 7,
    /// Planar YCbCr 4:2:0.
    Ycbcr420P = 8,
    /// Packed YUYV 4:2:2.
    Yuyv422 = 9,
}

impl PixelFormat {
    /// Decodes a wire value; `None` for formats outside the valid set.
    pub fn from_i32(v: i32) -> Option<PixelFormat> {
        Some(match v {
            0 => PixelFormat::Rgba8888,
            1 => PixelFormat::Rgbx8888,
            2 => PixelFormat::Bgra8888,
            3 => PixelFormat::Rgb888,
            4 => PixelFormat::Rgb565,
            5 => PixelFormat::Rgba1010102,
            6 => PixelFormat::Ycbcr420Sp,
            7 => PixelFormat::Ycrcb420Sp,
            8 => PixelFormat::Ycbcr420P,
            9 => PixelFormat::Yuyv422,
            _ => return None,
        })
    }

    /// Bits per pixel of the dominant plane.
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgba8888
            | PixelFormat::Rgbx8888
            | PixelFormat::Bgra8888
            | PixelFormat::Rgba1010102 => 32,
            PixelFormat::Rgb888 => 24,
            PixelFormat::Rgb565 | PixelFormat::Yuyv422 => 16,
            PixelFormat::Ycbcr420Sp | PixelFormat::Ycrcb420Sp | PixelFormat::Ycbcr420P => 8,
        }
    }

    /// Total bytes for `stride x height`, accounting for chroma planes.
    pub fn plane_size(self, stride: i32, height: i32) -> usize {
        let luma = stride as usize * height as usize;
        match self {
            PixelFormat::Ycbcr420Sp | PixelFormat::Ycrcb420Sp | PixelFormat::Ycbcr420P => {
                luma + luma / 2
            }
            _ => luma,
        }
    }
}

/// Color gamut the buffer contents are encoded in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum ColorGamut {
    /// Device-native gamut.
    #[default]
    Native = 0,
    /// Standard gamut (BT.601).
    Standard = 1,
    /// sRGB.
    Srgb = 2,
    /// Adobe RGB.
    AdobeRgb = 3,
    /// Display P3.
    DisplayP3 = 4,
    /// BT.2020.
    Bt2020 = 5,
    /// BT.2100 with PQ transfer.
    Bt2100Pq = 6,
    /// BT.2100 with HLG transfer.
    Bt2100Hlg = 7,
}

impl ColorGamut {
    /// Decodes a wire value.
    pub fn from_i32(v: i32) -> Option<ColorGamut> {
        Some(match v {
            0 => ColorGamut::Native,
            1 => ColorGamut::Standard,
            2 => ColorGamut::Srgb,
            3 => ColorGamut::AdobeRgb,
            4 => ColorGamut::DisplayP3,
            5 => ColorGamut::Bt2020,
            6 => ColorGamut::Bt2100Pq,
            7 => ColorGamut::Bt2100Hlg,
            _ => return None,
        })
    }
}

/// Rotation/flip applied to the buffer contents at presentation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum TransformType {
    /// No transform.
    #[default]
    RotateNone = 0,
    /// Rotate 90 degrees.
    Rotate90 = 1,
    /// Rotate 180 degrees.
    Rotate180 = 2,
    /// Rotate 270 degrees.
    Rotate270 = 3,
    /// Mirror horizontally.
    FlipH = 4,
    /// Mirror vertically.
    FlipV = 5,
    /// Mirror horizontally, then rotate 90 degrees.
    FlipHRotate90 = 6,
    /// Mirror vertically, then rotate 90 degrees.
    FlipVRotate90 = 7,
}

impl TransformType {
    /// Decodes a wire value.
    pub fn from_i32(v: i32) -> Option<TransformType> {
        Some(match v {
            0 => TransformType::RotateNone,
            1 => TransformType::Rotate90,
            2 => TransformType::Rotate180,
            3 => TransformType::Rotate270,
            4 => TransformType::FlipH,
            5 => TransformType::FlipV,
            6 => TransformType::FlipHRotate90,
            7 => TransformType::FlipVRotate90,
            _ => return None,
        })
    }
}

/// How the consumer scales a buffer that does not match the window size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum ScalingMode {
    /// Freeze the window contents until a matching buffer arrives.
    #[default]
    Freeze = 0,
    /// Stretch to the window.
    ScaleToWindow = 1,
    /// Scale uniformly and crop the overflow.
    ScaleCrop = 2,
    /// Center without scaling, cropping the overflow.
    NoScaleCrop = 3,
    /// Scale uniformly and letterbox.
    ScaleFit = 4,
}

impl ScalingMode {
    /// Decodes a wire value.
    pub fn from_i32(v: i32) -> Option<ScalingMode> {
        Some(match v {
            0 => ScalingMode::Freeze,
            1 => ScalingMode::ScaleToWindow,
            2 => ScalingMode::ScaleCrop,
            3 => ScalingMode::NoScaleCrop,
            4 => ScalingMode::ScaleFit,
            _ => return None,
        })
    }
}

/// Which flavor of HDR metadata a slot carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum HdrMetadataType {
    /// No HDR metadata attached.
    #[default]
    NotUsed = 0,
    /// Key/value static metadata, see [`HdrMetadata`].
    Metadata = 1,
    /// A keyed binary blob, see [`SurfaceBuffer`] metadata-set accessors.
    MetadataSet = 2,
}

/// Keys for HDR static metadata entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
#[allow(missing_docs)]
pub enum HdrMetadataKey {
    RedPrimaryX = 0,
    RedPrimaryY = 1,
    GreenPrimaryX = 2,
    GreenPrimaryY = 3,
    BluePrimaryX = 4,
    BluePrimaryY = 5,
    WhitePointX = 6,
    WhitePointY = 7,
    MaxLuminance = 8,
    MinLuminance = 9,
    MaxContentLightLevel = 10,
    MaxFrameAverageLightLevel = 11,
    Hdr10Plus = 12,
    HdrVivid = 13,
}

impl HdrMetadataKey {
    /// Decodes a wire value.
    pub fn from_i32(v: i32) -> Option<HdrMetadataKey> {
        Some(match v {
            0 => HdrMetadataKey::RedPrimaryX,
            1 => HdrMetadataKey::RedPrimaryY,
            2 => HdrMetadataKey::GreenPrimaryX,
            3 => HdrMetadataKey::GreenPrimaryY,
            4 => HdrMetadataKey::BluePrimaryX,
            5 => HdrMetadataKey::BluePrimaryY,
            6 => HdrMetadataKey::WhitePointX,
            7 => HdrMetadataKey::WhitePointY,
            8 => HdrMetadataKey::MaxLuminance,
            9 => HdrMetadataKey::MinLuminance,
            10 => HdrMetadataKey::MaxContentLightLevel,
            11 => HdrMetadataKey::MaxFrameAverageLightLevel,
            12 => HdrMetadataKey::Hdr10Plus,
            13 => HdrMetadataKey::HdrVivid,
            _ => return None,
        })
    }
}

/// One HDR static metadata entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HdrMetadata {
    /// Which quantity this entry describes.
    pub key: HdrMetadataKey,
    /// The value, in the key's natural unit.
    pub value: f32,
}

/// How a present timestamp is to be interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum PresentTimestampType {
    /// The display pipeline does not report timestamps.
    #[default]
    Unsupported = 0,
    /// `time` is a delay in nanoseconds relative to the flush.
    Delay = 1,
    /// `time` is an absolute monotonic-clock timestamp.
    Timestamp = 2,
}

impl PresentTimestampType {
    /// Decodes a wire value.
    pub fn from_i32(v: i32) -> Option<PresentTimestampType> {
        Some(match v {
            0 => PresentTimestampType::Unsupported,
            1 => PresentTimestampType::Delay,
            2 => PresentTimestampType::Timestamp,
            _ => return None,
        })
    }
}

/// When (or by how much later) a buffer was actually presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresentTimestamp {
    /// Interpretation of `time`.
    pub ty: PresentTimestampType,
    /// Nanoseconds; meaning depends on `ty`.
    pub time: i64,
}

/// Where the surface content originates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum SurfaceSourceType {
    /// Unspecified.
    #[default]
    Default = 0,
    /// UI framework rendering.
    Ui = 1,
    /// Game rendering.
    Game = 2,
    /// Camera preview/capture.
    Camera = 3,
    /// Video playback.
    Video = 4,
}

impl SurfaceSourceType {
    /// Decodes a wire value.
    pub fn from_i32(v: i32) -> Option<SurfaceSourceType> {
        Some(match v {
            0 => SurfaceSourceType::Default,
            1 => SurfaceSourceType::Ui,
            2 => SurfaceSourceType::Game,
            3 => SurfaceSourceType::Camera,
            4 => SurfaceSourceType::Video,
            _ => return None,
        })
    }
}

/// The tuple a producer hands to `request_buffer`. Carried on the allocated
/// buffer so reallocation can detect "same shape".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequestConfig {
    /// Requested width in pixels.
    pub width: i32,
    /// Requested height in pixels.
    pub height: i32,
    /// Row alignment in bytes; one of 4, 8, 16, 32, 64.
    pub stride_alignment: i32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Intended usage.
    pub usage: BufferUsage,
    /// How long `request_buffer` may block, in milliseconds. `0` returns
    /// immediately, negative blocks until a slot frees up.
    pub timeout_ms: i32,
    /// Color gamut of the content to be rendered.
    pub color_gamut: ColorGamut,
    /// Presentation transform.
    pub transform: TransformType,
}

impl Default for BufferRequestConfig {
    fn default() -> Self {
        BufferRequestConfig {
            width: 0,
            height: 0,
            stride_alignment: 4,
            format: PixelFormat::Rgba8888,
            usage: BufferUsage::CPU_READ | BufferUsage::CPU_WRITE | BufferUsage::MEM_DMA,
            timeout_ms: 3000,
            color_gamut: ColorGamut::Native,
            transform: TransformType::RotateNone,
        }
    }
}

impl BufferRequestConfig {
    /// Validates the config the way the queue does before touching the pool.
    pub fn check(&self) -> SurfaceResult<()> {
        if self.width <= 0 || self.width > SURFACE_MAX_SIZE {
            return Err(SurfaceError::InvalidArguments);
        }
        if self.height <= 0 || self.height > SURFACE_MAX_SIZE {
            return Err(SurfaceError::InvalidArguments);
        }
        if !matches!(self.stride_alignment, 4 | 8 | 16 | 32 | 64) {
            return Err(SurfaceError::InvalidArguments);
        }
        Ok(())
    }

    /// Whether a cached buffer of `other`'s shape can be reused without
    /// reallocating.
    pub fn same_shape(&self, other: &BufferRequestConfig) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.format == other.format
            && self.usage == other.usage
    }
}

/// Damage and timing metadata the producer attaches when flushing a frame.
#[derive(Debug, Clone, Default)]
pub struct BufferFlushConfig {
    /// Sub-rectangles that changed versus the previous frame.
    pub damages: crate::utils::DamageRegion,
    /// Render timestamp in nanoseconds; `0` lets the queue stamp the flush
    /// with the monotonic clock.
    pub timestamp: i64,
    /// Earliest monotonic time the frame wants to be shown, or `<= 0` for
    /// "as soon as possible".
    pub desired_present_timestamp: i64,
}

impl BufferFlushConfig {
    /// Validates the config against the flushed buffer's dimensions.
    pub fn check(&self, width: i32, height: i32) -> SurfaceResult<()> {
        if self.damages.is_empty() {
            return Err(SurfaceError::InvalidArguments);
        }
        for rect in &self.damages {
            if !rect.is_sane(width, height) {
                return Err(SurfaceError::InvalidArguments);
            }
        }
        Ok(())
    }
}

/// A typed value in the per-frame extra-data bag.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtraValue {
    /// 32-bit integer.
    I32(i32),
    /// 64-bit integer.
    I64(i64),
    /// Double-precision float.
    F64(f64),
    /// UTF-8 string.
    Str(String),
}

/// Small key/value bag attached per frame by the producer and delivered
/// verbatim to the consumer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtraData {
    entries: BTreeMap<String, ExtraValue>,
}

impl ExtraData {
    /// An empty bag.
    pub fn new() -> ExtraData {
        ExtraData::default()
    }

    /// Inserts or replaces an entry. Bags are capped at
    /// [`EXTRA_DATA_MAX_COUNT`] entries.
    pub fn set(&mut self, key: impl Into<String>, value: ExtraValue) -> SurfaceResult<()> {
        let key = key.into();
        if !self.entries.contains_key(&key) && self.entries.len() >= EXTRA_DATA_MAX_COUNT {
            return Err(SurfaceError::OutOfRange);
        }
        self.entries.insert(key, value);
        Ok(())
    }

    /// Looks up an entry.
    pub fn get(&self, key: &str) -> Option<&ExtraValue> {
        self.entries.get(key)
    }

    /// Typed lookup; `TypeError` if the entry holds another type.
    pub fn get_i32(&self, key: &str) -> SurfaceResult<i32> {
        match self.entries.get(key) {
            Some(ExtraValue::I32(v)) => Ok(*v),
            Some(_) => Err(SurfaceError::TypeError),
            None => Err(SurfaceError::NoEntry),
        }
    }

    /// Typed lookup; `TypeError` if the entry holds another type.
    pub fn get_i64(&self, key: &str) -> SurfaceResult<i64> {
        match self.entries.get(key) {
            Some(ExtraValue::I64(v)) => Ok(*v),
            Some(_) => Err(SurfaceError::TypeError),
            None => Err(SurfaceError::NoEntry),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExtraValue)> {
        self.entries.iter()
    }
}

/// CPU mapping of a buffer handle. Unmapped on drop.
#[derive(Debug)]
pub(crate) struct Mapping {
    pub(crate) ptr: *mut u8,
    pub(crate) len: usize,
}

// SAFETY: the mapping is private to its BufferHandle, which hands out access
// only under the owning SurfaceBuffer's lock.
unsafe impl Send for Mapping {}
// SAFETY: see above; concurrent readers go through the RwLock read guard.
unsafe impl Sync for Mapping {}

impl Drop for Mapping {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // munmap of a valid private mapping cannot fail meaningfully.
            let _ = unsafe { rustix::mm::munmap(self.ptr as *mut _, self.len) };
        }
    }
}

/// The HAL-owned description of one allocated buffer.
///
/// Carries the shareable file descriptor, the pixel geometry the HAL chose
/// (stride may exceed `width * bpp` for alignment) and any vendor reserve
/// data. Closing the fd and tearing down the mapping happens exactly once,
/// on drop.
#[derive(Debug)]
pub struct BufferHandle {
    /// Shareable memory fd; `None` for purely physical allocations.
    pub fd: Option<OwnedFd>,
    /// Width in pixels.
    pub width: i32,
    /// Row stride in bytes.
    pub stride: i32,
    /// Height in pixels.
    pub height: i32,
    /// Total allocation size in bytes.
    pub size: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Usage the buffer was allocated for.
    pub usage: BufferUsage,
    /// Physical address for zero-copy scanout, `0` if not applicable.
    pub phys_addr: u64,
    /// Vendor-defined integers carried opaquely.
    pub reserve_ints: Vec<i32>,
    /// Vendor-defined fds carried opaquely.
    pub reserve_fds: Vec<OwnedFd>,
    pub(crate) mapping: Option<Mapping>,
}

impl BufferHandle {
    /// Whether the handle currently has a CPU mapping.
    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }
}

#[derive(Debug)]
struct BufferMeta {
    request_config: BufferRequestConfig,
    width: i32,
    height: i32,
    color_gamut: ColorGamut,
    transform: TransformType,
    extra: ExtraData,
    name: String,
    consumer_attach_flag: bool,
}

/// A frame buffer: shared memory plus pixel metadata and a process-unique
/// sequence number.
///
/// Logical attributes (`width`, `height`, gamut, transform) are set at
/// allocation and only mutated by explicit producer setters; the extra-data
/// bag is replaced wholesale per frame.
#[derive(Debug)]
pub struct SurfaceBuffer {
    sequence: u32,
    handle: RwLock<Option<BufferHandle>>,
    meta: Mutex<BufferMeta>,
}

impl SurfaceBuffer {
    /// Wraps a freshly allocated handle, assigning the next sequence number.
    pub fn new(handle: BufferHandle, config: BufferRequestConfig) -> SurfaceBuffer {
        SurfaceBuffer::with_sequence(next_sequence(), handle, config)
    }

    /// Wraps a handle under an existing sequence number. Used by the
    /// reallocation path, where the slot identity must survive the handle
    /// swap, and by the proxy when reconstructing a buffer from a parcel.
    pub fn with_sequence(
        sequence: u32,
        handle: BufferHandle,
        config: BufferRequestConfig,
    ) -> SurfaceBuffer {
        let meta = BufferMeta {
            width: handle.width,
            height: handle.height,
            color_gamut: config.color_gamut,
            transform: config.transform,
            request_config: config,
            extra: ExtraData::new(),
            name: String::new(),
            consumer_attach_flag: false,
        };
        SurfaceBuffer {
            sequence,
            handle: RwLock::new(Some(handle)),
            meta: Mutex::new(meta),
        }
    }

    /// The process-unique id of this buffer.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Logical width in pixels.
    pub fn width(&self) -> i32 {
        self.meta.lock().unwrap().width
    }

    /// Logical height in pixels.
    pub fn height(&self) -> i32 {
        self.meta.lock().unwrap().height
    }

    /// Pixel format, from the underlying handle.
    pub fn format(&self) -> Option<PixelFormat> {
        self.handle.read().unwrap().as_ref().map(|h| h.format)
    }

    /// Usage flags, from the underlying handle.
    pub fn usage(&self) -> Option<BufferUsage> {
        self.handle.read().unwrap().as_ref().map(|h| h.usage)
    }

    /// Row stride in bytes, from the underlying handle.
    pub fn stride(&self) -> Option<i32> {
        self.handle.read().unwrap().as_ref().map(|h| h.stride)
    }

    /// Total allocation size in bytes.
    pub fn size(&self) -> Option<u32> {
        self.handle.read().unwrap().as_ref().map(|h| h.size)
    }

    /// The request config that produced the current handle.
    pub fn request_config(&self) -> BufferRequestConfig {
        self.meta.lock().unwrap().request_config
    }

    /// Color gamut.
    pub fn color_gamut(&self) -> ColorGamut {
        self.meta.lock().unwrap().color_gamut
    }

    /// Sets the color gamut (producer-side setter).
    pub fn set_color_gamut(&self, gamut: ColorGamut) {
        self.meta.lock().unwrap().color_gamut = gamut;
    }

    /// Presentation transform.
    pub fn transform(&self) -> TransformType {
        self.meta.lock().unwrap().transform
    }

    /// Sets the presentation transform (producer-side setter).
    pub fn set_transform(&self, transform: TransformType) {
        self.meta.lock().unwrap().transform = transform;
    }

    /// Debug name, surfaced in dumps.
    pub fn name(&self) -> String {
        self.meta.lock().unwrap().name.clone()
    }

    /// Sets the debug name.
    pub fn set_name(&self, name: impl Into<String>) {
        self.meta.lock().unwrap().name = name.into();
    }

    /// The per-frame extra-data bag.
    pub fn extra_data(&self) -> ExtraData {
        self.meta.lock().unwrap().extra.clone()
    }

    /// Replaces the per-frame extra-data bag.
    pub fn set_extra_data(&self, extra: ExtraData) {
        self.meta.lock().unwrap().extra = extra;
    }

    /// True iff this buffer entered the queue via a consumer-side attach.
    pub fn consumer_attach_flag(&self) -> bool {
        self.meta.lock().unwrap().consumer_attach_flag
    }

    /// Marks the buffer as consumer-attached.
    pub fn set_consumer_attach_flag(&self, flag: bool) {
        self.meta.lock().unwrap().consumer_attach_flag = flag;
    }

    /// Runs `f` against the handle, if any.
    pub fn with_handle<T>(&self, f: impl FnOnce(&BufferHandle) -> T) -> SurfaceResult<T> {
        match self.handle.read().unwrap().as_ref() {
            Some(h) => Ok(f(h)),
            None => Err(SurfaceError::NotInit),
        }
    }

    /// Runs `f` against the handle mutably, if any.
    pub fn with_handle_mut<T>(&self, f: impl FnOnce(&mut BufferHandle) -> T) -> SurfaceResult<T> {
        match self.handle.write().unwrap().as_mut() {
            Some(h) => Ok(f(h)),
            None => Err(SurfaceError::NotInit),
        }
    }

    /// Replaces the handle, returning the previous one. The reallocation
    /// path frees the returned handle through the allocator.
    pub(crate) fn replace_handle(&self, handle: Option<BufferHandle>) -> Option<BufferHandle> {
        std::mem::replace(&mut *self.handle.write().unwrap(), handle)
    }

    /// Updates the logical attributes after a reallocation.
    pub(crate) fn apply_config(&self, config: BufferRequestConfig) {
        let mut meta = self.meta.lock().unwrap();
        meta.width = config.width;
        meta.height = config.height;
        meta.color_gamut = config.color_gamut;
        meta.transform = config.transform;
        meta.request_config = config;
    }

    /// Read access to the mapped pixels.
    pub fn with_mapped<T>(&self, f: impl FnOnce(&[u8]) -> T) -> SurfaceResult<T> {
        let guard = self.handle.read().unwrap();
        let handle = guard.as_ref().ok_or(SurfaceError::NotInit)?;
        let mapping = handle.mapping.as_ref().ok_or(SurfaceError::NotInit)?;
        // SAFETY: the mapping stays valid while the read guard pins the
        // handle, and writers require the write guard.
        let slice = unsafe { std::slice::from_raw_parts(mapping.ptr, mapping.len) };
        Ok(f(slice))
    }

    /// Write access to the mapped pixels.
    pub fn with_mapped_mut<T>(&self, f: impl FnOnce(&mut [u8]) -> T) -> SurfaceResult<T> {
        let mut guard = self.handle.write().unwrap();
        let handle = guard.as_mut().ok_or(SurfaceError::NotInit)?;
        let mapping = handle.mapping.as_mut().ok_or(SurfaceError::NotInit)?;
        // SAFETY: exclusive access via the write guard.
        let slice = unsafe { std::slice::from_raw_parts_mut(mapping.ptr, mapping.len) };
        Ok(f(slice))
    }
}
