use std::fmt;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::buffer::{BufferHandle, BufferRequestConfig, BufferUsage, PixelFormat, SurfaceBuffer};
use crate::error::{SurfaceError, SurfaceResult};

// Errno stand-ins for HAL failures that have no POSIX equivalent; they share
// the ApiFailed errno span with the real errnos.
const LOWERROR_FAILURE: i32 = 999;
const LOWERROR_INVALID: i32 = 998;

/// Parameters for one HAL allocation.
#[derive(Debug, Clone, Copy)]
pub struct AllocInfo {
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
    /// Row alignment in bytes.
    pub stride_alignment: i32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Intended usage.
    pub usage: BufferUsage,
}

/// Error codes reported by a display-buffer HAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HalError {
    /// Generic failure.
    #[error("hal failure")]
    Failure,
    /// A file descriptor was invalid.
    #[error("bad file descriptor")]
    BadFd,
    /// A parameter was rejected.
    #[error("invalid parameter")]
    InvalidParam,
    /// A required pointer was null.
    #[error("null pointer")]
    NullPtr,
    /// The operation is not implemented by this HAL.
    #[error("not supported")]
    NotSupported,
    /// Allocation failed for lack of memory.
    #[error("out of memory")]
    NoMem,
    /// The device is busy.
    #[error("device busy")]
    Busy,
    /// The caller lacks permission.
    #[error("not permitted")]
    NoPerm,
    /// A vendor-specific code outside the portable set.
    #[error("hal error {0}")]
    Other(i32),
}

impl HalError {
    /// The errno composited into [`SurfaceError::ApiFailed`].
    pub fn errno(&self) -> i32 {
        match self {
            HalError::Failure => LOWERROR_FAILURE,
            HalError::BadFd => libc::EBADF,
            HalError::InvalidParam | HalError::NullPtr => libc::EINVAL,
            HalError::NotSupported => libc::EOPNOTSUPP,
            HalError::NoMem => libc::ENOMEM,
            HalError::Busy => libc::EBUSY,
            HalError::NoPerm => libc::EPERM,
            HalError::Other(_) => LOWERROR_INVALID,
        }
    }
}

impl From<HalError> for SurfaceError {
    fn from(err: HalError) -> SurfaceError {
        SurfaceError::ApiFailed { errno: err.errno() }
    }
}

/// The display-buffer HAL the allocator adapts.
///
/// The queue calls this but does not implement it; [`super::MemfdHal`] is the
/// in-process implementation used for local rendering and tests. Real
/// deployments plug in a DMA allocator here.
pub trait DisplayBufferHal: Send + Sync + fmt::Debug {
    /// Allocates a buffer.
    fn alloc_mem(&self, info: &AllocInfo) -> Result<BufferHandle, HalError>;
    /// Maps the buffer into the CPU address space.
    fn mmap(&self, handle: &mut BufferHandle) -> Result<(), HalError>;
    /// Drops the CPU mapping.
    fn unmap(&self, handle: &mut BufferHandle) -> Result<(), HalError>;
    /// Writes CPU caches back to memory.
    fn flush_cache(&self, handle: &BufferHandle) -> Result<(), HalError>;
    /// Discards CPU caches so the next read sees device writes.
    fn invalidate_cache(&self, handle: &BufferHandle) -> Result<(), HalError>;
    /// Frees the allocation. The handle must no longer be mapped.
    fn free_mem(&self, handle: BufferHandle) -> Result<(), HalError>;
}

type HalFactory = Box<dyn Fn() -> Option<Arc<dyn DisplayBufferHal>> + Send + Sync>;

/// Thin, stateless adaptor over the display-buffer HAL.
///
/// Owns the HAL reference and translates its error codes into the unified
/// space. When the HAL service dies the reference is invalidated and
/// re-acquired lazily on the next call.
pub struct BufferAllocator {
    hal: RwLock<Option<Arc<dyn DisplayBufferHal>>>,
    factory: HalFactory,
}

impl fmt::Debug for BufferAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferAllocator")
            .field("hal", &self.hal.read().unwrap().is_some())
            .finish_non_exhaustive()
    }
}

static GLOBAL_ALLOCATOR: Lazy<Arc<BufferAllocator>> = Lazy::new(|| {
    Arc::new(BufferAllocator::with_factory(Box::new(|| {
        Some(Arc::new(super::MemfdHal::new()) as Arc<dyn DisplayBufferHal>)
    })))
});

impl BufferAllocator {
    /// Builds an allocator over an explicit HAL instance.
    pub fn new(hal: Arc<dyn DisplayBufferHal>) -> BufferAllocator {
        let factory_hal = hal.clone();
        BufferAllocator {
            hal: RwLock::new(Some(hal)),
            factory: Box::new(move || Some(factory_hal.clone())),
        }
    }

    /// Builds an allocator that acquires (and re-acquires) its HAL from a
    /// factory.
    pub fn with_factory(factory: HalFactory) -> BufferAllocator {
        BufferAllocator {
            hal: RwLock::new(None),
            factory,
        }
    }

    /// The process-wide allocator, backed by [`super::MemfdHal`].
    pub fn global() -> Arc<BufferAllocator> {
        GLOBAL_ALLOCATOR.clone()
    }

    /// Death-recipient hook: drops the HAL reference so the next call
    /// re-acquires it.
    pub fn on_hal_died(&self) {
        warn!("display-buffer hal died, invalidating");
        self.hal.write().unwrap().take();
    }

    fn hal(&self) -> SurfaceResult<Arc<dyn DisplayBufferHal>> {
        if let Some(hal) = self.hal.read().unwrap().as_ref() {
            return Ok(hal.clone());
        }
        let mut guard = self.hal.write().unwrap();
        if let Some(hal) = guard.as_ref() {
            return Ok(hal.clone());
        }
        match (self.factory)() {
            Some(hal) => {
                debug!("acquired display-buffer hal");
                *guard = Some(hal.clone());
                Ok(hal)
            }
            None => Err(SurfaceError::Internal),
        }
    }

    /// Allocates a buffer for `config` and maps it if the usage asks for CPU
    /// access.
    pub fn alloc(&self, config: &BufferRequestConfig) -> SurfaceResult<Arc<SurfaceBuffer>> {
        config.check()?;
        let handle = self.alloc_handle(config)?;
        let buffer = Arc::new(SurfaceBuffer::new(handle, *config));
        self.map(&buffer)?;
        Ok(buffer)
    }

    /// Swaps `buffer`'s allocation for one matching `config`, keeping the
    /// sequence number. The previous handle is freed through the HAL.
    pub fn realloc(&self, buffer: &SurfaceBuffer, config: &BufferRequestConfig) -> SurfaceResult<()> {
        config.check()?;
        let new_handle = self.alloc_handle(config)?;
        if let Some(old) = buffer.replace_handle(Some(new_handle)) {
            self.free_handle(old)?;
        }
        buffer.apply_config(*config);
        self.map(buffer)?;
        debug!(
            sequence = buffer.sequence(),
            width = config.width,
            height = config.height,
            "reallocated buffer"
        );
        Ok(())
    }

    fn alloc_handle(&self, config: &BufferRequestConfig) -> SurfaceResult<BufferHandle> {
        let hal = self.hal()?;
        let info = AllocInfo {
            width: config.width,
            height: config.height,
            stride_alignment: config.stride_alignment,
            format: config.format,
            usage: config.usage,
        };
        Ok(hal.alloc_mem(&info)?)
    }

    /// Maps the buffer for CPU access. A no-op when the buffer is already
    /// mapped, carries protected contents, or was not allocated for CPU use.
    pub fn map(&self, buffer: &SurfaceBuffer) -> SurfaceResult<()> {
        let hal = self.hal()?;
        buffer.with_handle_mut(|handle| {
            if handle.is_mapped() || handle.usage.contains(BufferUsage::PROTECTED) {
                return Ok(());
            }
            if !handle
                .usage
                .intersects(BufferUsage::CPU_READ | BufferUsage::CPU_WRITE)
            {
                return Ok(());
            }
            hal.mmap(handle).map_err(SurfaceError::from)
        })?
    }

    /// Drops the CPU mapping. A no-op when not mapped.
    pub fn unmap(&self, buffer: &SurfaceBuffer) -> SurfaceResult<()> {
        let hal = self.hal()?;
        buffer.with_handle_mut(|handle| {
            if !handle.is_mapped() {
                return Ok(());
            }
            hal.unmap(handle).map_err(SurfaceError::from)
        })?
    }

    /// Writes CPU caches back; requires a mapped buffer.
    pub fn flush_cache(&self, buffer: &SurfaceBuffer) -> SurfaceResult<()> {
        let hal = self.hal()?;
        buffer.with_handle(|handle| {
            if !handle.is_mapped() {
                return Err(SurfaceError::InvalidOperating);
            }
            hal.flush_cache(handle).map_err(SurfaceError::from)
        })?
    }

    /// Discards CPU caches; requires a mapped buffer.
    pub fn invalidate_cache(&self, buffer: &SurfaceBuffer) -> SurfaceResult<()> {
        let hal = self.hal()?;
        buffer.with_handle(|handle| {
            if !handle.is_mapped() {
                return Err(SurfaceError::InvalidOperating);
            }
            hal.invalidate_cache(handle).map_err(SurfaceError::from)
        })?
    }

    /// Detaches and frees the buffer's handle, unmapping first if needed.
    pub fn free(&self, buffer: &SurfaceBuffer) -> SurfaceResult<()> {
        match buffer.replace_handle(None) {
            Some(handle) => self.free_handle(handle),
            None => Ok(()),
        }
    }

    fn free_handle(&self, mut handle: BufferHandle) -> SurfaceResult<()> {
        let hal = self.hal()?;
        if handle.is_mapped() {
            hal.unmap(&mut handle)?;
        }
        hal.free_mem(handle)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::testing::CountingHal;
    use std::sync::atomic::Ordering;

    #[test]
    fn hal_errors_translate_to_errnos() {
        assert_eq!(
            SurfaceError::from(HalError::NoMem),
            SurfaceError::ApiFailed { errno: libc::ENOMEM }
        );
        assert_eq!(
            SurfaceError::from(HalError::Failure),
            SurfaceError::ApiFailed { errno: LOWERROR_FAILURE }
        );
        assert_eq!(
            SurfaceError::from(HalError::Other(-7)),
            SurfaceError::ApiFailed { errno: LOWERROR_INVALID }
        );
    }

    #[test]
    fn realloc_frees_the_old_handle() {
        let hal = Arc::new(CountingHal::default());
        let allocator = BufferAllocator::new(hal.clone());
        let config = BufferRequestConfig {
            width: 32,
            height: 32,
            ..Default::default()
        };
        let buffer = allocator.alloc(&config).unwrap();
        let seq = buffer.sequence();

        let bigger = BufferRequestConfig {
            width: 128,
            height: 128,
            ..config
        };
        allocator.realloc(&buffer, &bigger).unwrap();
        assert_eq!(buffer.sequence(), seq);
        assert_eq!(buffer.width(), 128);
        assert_eq!(hal.allocs.load(Ordering::SeqCst), 2);
        assert_eq!(hal.free_count(), 1);
    }

    #[test]
    fn dead_hal_is_reacquired_lazily() {
        let allocator = BufferAllocator::new(Arc::new(CountingHal::default()));
        allocator.on_hal_died();
        let config = BufferRequestConfig {
            width: 16,
            height: 16,
            ..Default::default()
        };
        assert!(allocator.alloc(&config).is_ok());
    }
}
