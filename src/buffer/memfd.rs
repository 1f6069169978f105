use std::ptr;

use rustix::fs::{fcntl_add_seals, ftruncate, memfd_create, MemfdFlags, SealFlags};
use rustix::mm::{mmap, MapFlags, ProtFlags};
use tracing::trace;

use crate::buffer::{AllocInfo, BufferHandle, BufferUsage, DisplayBufferHal, HalError, Mapping};

fn align_up(value: i32, alignment: i32) -> i32 {
    (value + alignment - 1) & !(alignment - 1)
}

/// An in-process display-buffer HAL backed by sealed memfds.
///
/// Local rendering and tests run against this; the fds it produces cross
/// process boundaries the same way real DMA heap fds do, so the IPC path is
/// exercised unchanged.
#[derive(Debug, Default)]
pub struct MemfdHal;

impl MemfdHal {
    /// Creates the HAL. Stateless.
    pub fn new() -> MemfdHal {
        MemfdHal
    }
}

impl DisplayBufferHal for MemfdHal {
    fn alloc_mem(&self, info: &AllocInfo) -> Result<BufferHandle, HalError> {
        if info.width <= 0 || info.height <= 0 {
            return Err(HalError::InvalidParam);
        }
        let bytes_per_pixel = (info.format.bits_per_pixel() as i32 / 8).max(1);
        let stride = align_up(info.width * bytes_per_pixel, info.stride_alignment.max(1));
        let size = info.format.plane_size(stride, info.height);

        let fd = memfd_create(
            "framequeue-buffer",
            MemfdFlags::CLOEXEC | MemfdFlags::ALLOW_SEALING,
        )
        .map_err(|_| HalError::NoMem)?;
        ftruncate(&fd, size as u64).map_err(|_| HalError::NoMem)?;
        // Seal against shrinking so a peer cannot SIGBUS us after the fd is
        // shared.
        fcntl_add_seals(&fd, SealFlags::SHRINK).map_err(|_| HalError::Failure)?;

        trace!(
            width = info.width,
            height = info.height,
            stride,
            size,
            "allocated memfd buffer"
        );
        Ok(BufferHandle {
            fd: Some(fd),
            width: info.width,
            stride,
            height: info.height,
            size: size as u32,
            format: info.format,
            usage: info.usage,
            phys_addr: 0,
            reserve_ints: Vec::new(),
            reserve_fds: Vec::new(),
            mapping: None,
        })
    }

    fn mmap(&self, handle: &mut BufferHandle) -> Result<(), HalError> {
        if handle.mapping.is_some() {
            return Ok(());
        }
        if handle.usage.contains(BufferUsage::PROTECTED) {
            return Err(HalError::NoPerm);
        }
        let fd = handle.fd.as_ref().ok_or(HalError::NullPtr)?;
        let len = handle.size as usize;
        // SAFETY: mapping a shared fd we own; the Mapping unmaps on drop.
        let ptr = unsafe {
            mmap(
                ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                fd,
                0,
            )
        }
        .map_err(|_| HalError::Failure)?;
        handle.mapping = Some(Mapping {
            ptr: ptr as *mut u8,
            len,
        });
        Ok(())
    }

    fn unmap(&self, handle: &mut BufferHandle) -> Result<(), HalError> {
        // Dropping the mapping unmaps it.
        handle.mapping.take();
        Ok(())
    }

    fn flush_cache(&self, handle: &BufferHandle) -> Result<(), HalError> {
        // memfd memory is cache-coherent with every CPU consumer.
        if handle.mapping.is_none() {
            return Err(HalError::InvalidParam);
        }
        Ok(())
    }

    fn invalidate_cache(&self, handle: &BufferHandle) -> Result<(), HalError> {
        if handle.mapping.is_none() {
            return Err(HalError::InvalidParam);
        }
        Ok(())
    }

    fn free_mem(&self, handle: BufferHandle) -> Result<(), HalError> {
        // Dropping closes the fd and tears down any mapping left behind.
        drop(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelFormat;

    fn rgba_info(width: i32, height: i32) -> AllocInfo {
        AllocInfo {
            width,
            height,
            stride_alignment: 64,
            format: PixelFormat::Rgba8888,
            usage: BufferUsage::CPU_READ | BufferUsage::CPU_WRITE,
        }
    }

    #[test]
    fn stride_honors_alignment() {
        let hal = MemfdHal::new();
        let handle = hal.alloc_mem(&rgba_info(100, 10)).unwrap();
        assert_eq!(handle.stride % 64, 0);
        assert!(handle.stride >= 400);
        assert_eq!(handle.size, (handle.stride * 10) as u32);
    }

    #[test]
    fn mapping_is_idempotent_and_writable() {
        let hal = MemfdHal::new();
        let mut handle = hal.alloc_mem(&rgba_info(8, 8)).unwrap();
        hal.mmap(&mut handle).unwrap();
        hal.mmap(&mut handle).unwrap();
        assert!(handle.is_mapped());

        let mapping = handle.mapping.as_ref().unwrap();
        // SAFETY: freshly mapped, exclusively owned.
        unsafe {
            std::ptr::write_bytes(mapping.ptr, 0xab, mapping.len);
            assert_eq!(*mapping.ptr, 0xab);
        }

        hal.unmap(&mut handle).unwrap();
        assert!(!handle.is_mapped());
        hal.free_mem(handle).unwrap();
    }

    #[test]
    fn protected_buffers_refuse_cpu_mapping() {
        let hal = MemfdHal::new();
        let mut info = rgba_info(8, 8);
        info.usage |= BufferUsage::PROTECTED;
        let mut handle = hal.alloc_mem(&info).unwrap();
        assert_eq!(hal.mmap(&mut handle), Err(HalError::NoPerm));
    }

    #[test]
    fn yuv_allocations_cover_chroma_planes() {
        let hal = MemfdHal::new();
        let info = AllocInfo {
            width: 64,
            height: 64,
            stride_alignment: 16,
            format: PixelFormat::Ycbcr420Sp,
            usage: BufferUsage::CPU_READ,
        };
        let handle = hal.alloc_mem(&info).unwrap();
        assert_eq!(handle.size, (handle.stride * 64 + handle.stride * 32) as u32);
    }
}
