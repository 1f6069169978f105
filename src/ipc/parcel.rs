use std::collections::VecDeque;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::buffer::{
    BufferHandle, BufferRequestConfig, BufferUsage, ColorGamut, ExtraData, ExtraValue, PixelFormat,
    SurfaceBuffer, TransformType,
};
use crate::error::{SurfaceError, SurfaceResult};
use crate::fence::SyncFence;
use crate::utils::{DamageRegion, Rect};

/// Hard bound on a single parcel's byte payload.
pub const SURFACE_PARCEL_SIZE_LIMIT: usize = 1024 * 1024;

// Bounds on repeated elements, so a corrupt length prefix cannot make the
// reader allocate unboundedly.
const MAX_VECTOR_COUNT: usize = 4096;
const MAX_STRING_LEN: usize = 64 * 1024;

/// A little-endian wire buffer with an fd side channel.
///
/// Integers are written little-endian; strings are length-prefixed UTF-8;
/// file descriptors travel out-of-band in arrival order, referenced by a
/// validity flag in the byte stream. Writes past
/// [`SURFACE_PARCEL_SIZE_LIMIT`] fail with `Binder`; short or malformed
/// reads fail with `InvalidArguments`.
#[derive(Debug, Default)]
pub struct Parcel {
    data: Vec<u8>,
    fds: VecDeque<OwnedFd>,
    read_offset: usize,
}

impl Parcel {
    /// An empty parcel.
    pub fn new() -> Parcel {
        Parcel::default()
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn reserve(&mut self, extra: usize) -> SurfaceResult<()> {
        if self.data.len() + extra > SURFACE_PARCEL_SIZE_LIMIT {
            return Err(SurfaceError::Binder);
        }
        Ok(())
    }

    fn take(&mut self, count: usize) -> SurfaceResult<&[u8]> {
        if self.read_offset + count > self.data.len() {
            return Err(SurfaceError::InvalidArguments);
        }
        let slice = &self.data[self.read_offset..self.read_offset + count];
        self.read_offset += count;
        Ok(slice)
    }

    /// Appends another parcel's bytes and fds.
    pub fn append(&mut self, mut other: Parcel) -> SurfaceResult<()> {
        self.reserve(other.data.len())?;
        self.data.extend_from_slice(&other.data);
        while let Some(fd) = other.fds.pop_front() {
            self.fds.push_back(fd);
        }
        Ok(())
    }

    // Scalars -------------------------------------------------------------

    /// Writes a `u32`.
    pub fn write_u32(&mut self, value: u32) -> SurfaceResult<()> {
        self.reserve(4)?;
        self.data.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Reads a `u32`.
    pub fn read_u32(&mut self) -> SurfaceResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Writes an `i32`.
    pub fn write_i32(&mut self, value: i32) -> SurfaceResult<()> {
        self.write_u32(value as u32)
    }

    /// Reads an `i32`.
    pub fn read_i32(&mut self) -> SurfaceResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Writes a `u64`.
    pub fn write_u64(&mut self, value: u64) -> SurfaceResult<()> {
        self.reserve(8)?;
        self.data.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Reads a `u64`.
    pub fn read_u64(&mut self) -> SurfaceResult<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Writes an `i64`.
    pub fn write_i64(&mut self, value: i64) -> SurfaceResult<()> {
        self.write_u64(value as u64)
    }

    /// Reads an `i64`.
    pub fn read_i64(&mut self) -> SurfaceResult<i64> {
        Ok(self.read_u64()? as u64 as i64)
    }

    /// Writes an `f32`.
    pub fn write_f32(&mut self, value: f32) -> SurfaceResult<()> {
        self.write_u32(value.to_bits())
    }

    /// Reads an `f32`.
    pub fn read_f32(&mut self) -> SurfaceResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Writes an `f64`.
    pub fn write_f64(&mut self, value: f64) -> SurfaceResult<()> {
        self.write_u64(value.to_bits())
    }

    /// Reads an `f64`.
    pub fn read_f64(&mut self) -> SurfaceResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Writes a `bool` as one byte.
    pub fn write_bool(&mut self, value: bool) -> SurfaceResult<()> {
        self.reserve(1)?;
        self.data.push(value as u8);
        Ok(())
    }

    /// Reads a `bool`.
    pub fn read_bool(&mut self) -> SurfaceResult<bool> {
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SurfaceError::InvalidArguments),
        }
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> SurfaceResult<()> {
        if value.len() > MAX_STRING_LEN {
            return Err(SurfaceError::Binder);
        }
        self.write_u32(value.len() as u32)?;
        self.reserve(value.len())?;
        self.data.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Reads a string.
    pub fn read_string(&mut self) -> SurfaceResult<String> {
        let len = self.read_u32()? as usize;
        if len > MAX_STRING_LEN {
            return Err(SurfaceError::InvalidArguments);
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SurfaceError::InvalidArguments)
    }

    /// Writes a byte blob.
    pub fn write_bytes(&mut self, value: &[u8]) -> SurfaceResult<()> {
        self.write_u32(value.len() as u32)?;
        self.reserve(value.len())?;
        self.data.extend_from_slice(value);
        Ok(())
    }

    /// Reads a byte blob.
    pub fn read_bytes(&mut self) -> SurfaceResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        if len > SURFACE_PARCEL_SIZE_LIMIT {
            return Err(SurfaceError::InvalidArguments);
        }
        Ok(self.take(len)?.to_vec())
    }

    /// Writes a `u32` vector.
    pub fn write_u32_vec(&mut self, values: &[u32]) -> SurfaceResult<()> {
        if values.len() > MAX_VECTOR_COUNT {
            return Err(SurfaceError::Binder);
        }
        self.write_u32(values.len() as u32)?;
        for value in values {
            self.write_u32(*value)?;
        }
        Ok(())
    }

    /// Reads a `u32` vector.
    pub fn read_u32_vec(&mut self) -> SurfaceResult<Vec<u32>> {
        let count = self.read_u32()? as usize;
        if count > MAX_VECTOR_COUNT {
            return Err(SurfaceError::InvalidArguments);
        }
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.read_u32()?);
        }
        Ok(values)
    }

    // File descriptors ----------------------------------------------------

    /// Writes an optional fd: a validity flag in the stream, the fd itself
    /// out-of-band.
    pub fn write_fd(&mut self, fd: Option<OwnedFd>) -> SurfaceResult<()> {
        match fd {
            Some(fd) => {
                self.write_bool(true)?;
                self.fds.push_back(fd);
                Ok(())
            }
            None => self.write_bool(false),
        }
    }

    /// Reads an optional fd.
    pub fn read_fd(&mut self) -> SurfaceResult<Option<OwnedFd>> {
        if !self.read_bool()? {
            return Ok(None);
        }
        self.fds.pop_front().map(Some).ok_or(SurfaceError::Binder)
    }

    // Composite types -----------------------------------------------------

    /// Writes a rectangle.
    pub fn write_rect(&mut self, rect: &Rect) -> SurfaceResult<()> {
        self.write_i32(rect.x)?;
        self.write_i32(rect.y)?;
        self.write_i32(rect.w)?;
        self.write_i32(rect.h)
    }

    /// Reads a rectangle.
    pub fn read_rect(&mut self) -> SurfaceResult<Rect> {
        Ok(Rect {
            x: self.read_i32()?,
            y: self.read_i32()?,
            w: self.read_i32()?,
            h: self.read_i32()?,
        })
    }

    /// Writes a damage list.
    pub fn write_damages(&mut self, damages: &DamageRegion) -> SurfaceResult<()> {
        if damages.len() > MAX_VECTOR_COUNT {
            return Err(SurfaceError::Binder);
        }
        self.write_u32(damages.len() as u32)?;
        for rect in damages {
            self.write_rect(rect)?;
        }
        Ok(())
    }

    /// Reads a damage list.
    pub fn read_damages(&mut self) -> SurfaceResult<DamageRegion> {
        let count = self.read_u32()? as usize;
        if count > MAX_VECTOR_COUNT {
            return Err(SurfaceError::InvalidArguments);
        }
        let mut damages = SmallVec::new();
        for _ in 0..count {
            damages.push(self.read_rect()?);
        }
        Ok(damages)
    }

    /// Writes a request config.
    pub fn write_request_config(&mut self, config: &BufferRequestConfig) -> SurfaceResult<()> {
        self.write_i32(config.width)?;
        self.write_i32(config.height)?;
        self.write_i32(config.stride_alignment)?;
        self.write_i32(config.format as i32)?;
        self.write_u64(config.usage.bits())?;
        self.write_i32(config.timeout_ms)?;
        self.write_i32(config.color_gamut as i32)?;
        self.write_i32(config.transform as i32)
    }

    /// Reads a request config.
    pub fn read_request_config(&mut self) -> SurfaceResult<BufferRequestConfig> {
        let width = self.read_i32()?;
        let height = self.read_i32()?;
        let stride_alignment = self.read_i32()?;
        let format =
            PixelFormat::from_i32(self.read_i32()?).ok_or(SurfaceError::InvalidArguments)?;
        let usage = BufferUsage::from_bits_truncate(self.read_u64()?);
        let timeout_ms = self.read_i32()?;
        let color_gamut =
            ColorGamut::from_i32(self.read_i32()?).ok_or(SurfaceError::InvalidArguments)?;
        let transform =
            TransformType::from_i32(self.read_i32()?).ok_or(SurfaceError::InvalidArguments)?;
        Ok(BufferRequestConfig {
            width,
            height,
            stride_alignment,
            format,
            usage,
            timeout_ms,
            color_gamut,
            transform,
        })
    }

    /// Writes an extra-data bag.
    pub fn write_extra_data(&mut self, extra: &ExtraData) -> SurfaceResult<()> {
        self.write_u32(extra.len() as u32)?;
        for (key, value) in extra.iter() {
            self.write_string(key)?;
            match value {
                ExtraValue::I32(v) => {
                    self.write_u32(0)?;
                    self.write_i32(*v)?;
                }
                ExtraValue::I64(v) => {
                    self.write_u32(1)?;
                    self.write_i64(*v)?;
                }
                ExtraValue::F64(v) => {
                    self.write_u32(2)?;
                    self.write_f64(*v)?;
                }
                ExtraValue::Str(v) => {
                    self.write_u32(3)?;
                    self.write_string(v)?;
                }
            }
        }
        Ok(())
    }

    /// Reads an extra-data bag.
    pub fn read_extra_data(&mut self) -> SurfaceResult<ExtraData> {
        let count = self.read_u32()? as usize;
        if count > MAX_VECTOR_COUNT {
            return Err(SurfaceError::InvalidArguments);
        }
        let mut extra = ExtraData::new();
        for _ in 0..count {
            let key = self.read_string()?;
            let value = match self.read_u32()? {
                0 => ExtraValue::I32(self.read_i32()?),
                1 => ExtraValue::I64(self.read_i64()?),
                2 => ExtraValue::F64(self.read_f64()?),
                3 => ExtraValue::Str(self.read_string()?),
                _ => return Err(SurfaceError::InvalidArguments),
            };
            extra.set(key, value)?;
        }
        Ok(extra)
    }

    /// Writes a buffer handle, duplicating its fds.
    pub fn write_buffer_handle(&mut self, handle: &BufferHandle) -> SurfaceResult<()> {
        self.write_i32(handle.width)?;
        self.write_i32(handle.stride)?;
        self.write_i32(handle.height)?;
        self.write_u32(handle.size)?;
        self.write_i32(handle.format as i32)?;
        self.write_u64(handle.usage.bits())?;
        self.write_u64(handle.phys_addr)?;
        let fd = match &handle.fd {
            Some(fd) => Some(dup_fd(fd)?),
            None => None,
        };
        self.write_fd(fd)?;
        if handle.reserve_ints.len() > MAX_VECTOR_COUNT
            || handle.reserve_fds.len() > MAX_VECTOR_COUNT
        {
            return Err(SurfaceError::Binder);
        }
        self.write_u32(handle.reserve_ints.len() as u32)?;
        for value in &handle.reserve_ints {
            self.write_i32(*value)?;
        }
        self.write_u32(handle.reserve_fds.len() as u32)?;
        for fd in &handle.reserve_fds {
            self.write_fd(Some(dup_fd(fd)?))?;
        }
        Ok(())
    }

    /// Reads a buffer handle. The mapping does not travel; the receiver
    /// remaps if it needs CPU access.
    pub fn read_buffer_handle(&mut self) -> SurfaceResult<BufferHandle> {
        let width = self.read_i32()?;
        let stride = self.read_i32()?;
        let height = self.read_i32()?;
        let size = self.read_u32()?;
        let format =
            PixelFormat::from_i32(self.read_i32()?).ok_or(SurfaceError::InvalidArguments)?;
        let usage = BufferUsage::from_bits_truncate(self.read_u64()?);
        let phys_addr = self.read_u64()?;
        let fd = self.read_fd()?;
        let reserve_int_count = self.read_u32()? as usize;
        if reserve_int_count > MAX_VECTOR_COUNT {
            return Err(SurfaceError::InvalidArguments);
        }
        let mut reserve_ints = Vec::with_capacity(reserve_int_count);
        for _ in 0..reserve_int_count {
            reserve_ints.push(self.read_i32()?);
        }
        let reserve_fd_count = self.read_u32()? as usize;
        if reserve_fd_count > MAX_VECTOR_COUNT {
            return Err(SurfaceError::InvalidArguments);
        }
        let mut reserve_fds = Vec::with_capacity(reserve_fd_count);
        for _ in 0..reserve_fd_count {
            if let Some(fd) = self.read_fd()? {
                reserve_fds.push(fd);
            }
        }
        Ok(BufferHandle {
            fd,
            width,
            stride,
            height,
            size,
            format,
            usage,
            phys_addr,
            reserve_ints,
            reserve_fds,
            mapping: None,
        })
    }

    /// Writes a whole buffer: sequence, request config, handle, extra data.
    pub fn write_buffer(&mut self, buffer: &SurfaceBuffer) -> SurfaceResult<()> {
        self.write_u32(buffer.sequence())?;
        self.write_request_config(&buffer.request_config())?;
        buffer.with_handle(|handle| self.write_buffer_handle(handle))??;
        self.write_extra_data(&buffer.extra_data())
    }

    /// Reads a buffer back, reconstructing it under its original sequence.
    pub fn read_buffer(&mut self) -> SurfaceResult<Arc<SurfaceBuffer>> {
        let sequence = self.read_u32()?;
        let config = self.read_request_config()?;
        let handle = self.read_buffer_handle()?;
        let buffer = Arc::new(SurfaceBuffer::with_sequence(sequence, handle, config));
        buffer.set_extra_data(self.read_extra_data()?);
        Ok(buffer)
    }

    /// Writes a fence as an optional fd.
    pub fn write_fence(&mut self, fence: &SyncFence) -> SurfaceResult<()> {
        self.write_fd(fence.dup_fd()?)
    }

    /// Reads a fence.
    pub fn read_fence(&mut self) -> SurfaceResult<Arc<SyncFence>> {
        Ok(match self.read_fd()? {
            Some(fd) => Arc::new(SyncFence::from_fd(fd)),
            None => Arc::new(SyncFence::invalid()),
        })
    }
}

fn dup_fd(fd: &OwnedFd) -> SurfaceResult<OwnedFd> {
    use std::os::fd::AsFd;
    fd.as_fd()
        .try_clone_to_owned()
        .map_err(|_| SurfaceError::ApiFailed { errno: libc::EBADF })
}
