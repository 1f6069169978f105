//! Test-only HAL doubles.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::buffer::{AllocInfo, BufferHandle, DisplayBufferHal, HalError};

/// Counts allocations and frees so tests can assert balance.
#[derive(Debug, Default)]
pub(crate) struct CountingHal {
    pub(crate) allocs: AtomicUsize,
    pub(crate) frees: AtomicUsize,
}

impl CountingHal {
    pub(crate) fn alloc_count(&self) -> usize {
        self.allocs.load(Ordering::SeqCst)
    }

    pub(crate) fn free_count(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }
}

impl DisplayBufferHal for CountingHal {
    fn alloc_mem(&self, info: &AllocInfo) -> Result<BufferHandle, HalError> {
        self.allocs.fetch_add(1, Ordering::SeqCst);
        let stride = info.width * (info.format.bits_per_pixel() as i32 / 8).max(1);
        Ok(BufferHandle {
            fd: None,
            width: info.width,
            stride,
            height: info.height,
            size: info.format.plane_size(stride, info.height) as u32,
            format: info.format,
            usage: info.usage,
            phys_addr: 0,
            reserve_ints: Vec::new(),
            reserve_fds: Vec::new(),
            mapping: None,
        })
    }

    fn mmap(&self, _handle: &mut BufferHandle) -> Result<(), HalError> {
        Ok(())
    }

    fn unmap(&self, _handle: &mut BufferHandle) -> Result<(), HalError> {
        Ok(())
    }

    fn flush_cache(&self, _handle: &BufferHandle) -> Result<(), HalError> {
        Ok(())
    }

    fn invalidate_cache(&self, _handle: &BufferHandle) -> Result<(), HalError> {
        Ok(())
    }

    fn free_mem(&self, handle: BufferHandle) -> Result<(), HalError> {
        self.frees.fetch_add(1, Ordering::SeqCst);
        drop(handle);
        Ok(())
    }
}
