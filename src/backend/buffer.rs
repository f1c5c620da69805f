// GPU buffers backed by gpu-allocator
//
// Device-local buffers are filled through the transfer engine; host-visible
// ones (staging, per-frame uniforms, read-back) are written through their
// persistent mapping.

use super::VulkanDevice;
use crate::error::{RenderError, RenderResult};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

pub struct DeviceBuffer {
    device: Arc<VulkanDevice>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    name: &'static str,
}

impl DeviceBuffer {
    /// Create a buffer and bind freshly allocated memory to it.
    ///
    /// `location` picks the memory heap: `GpuOnly` for device-local data,
    /// `CpuToGpu` for host-visible + host-coherent uploads, `GpuToCpu` for
    /// read-back.
    pub fn new(
        device: Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &'static str,
    ) -> RenderResult<Self> {
        if size == 0 {
            return Err(RenderError::InvalidHandle(format!(
                "{} buffer size must be greater than 0",
                name
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }?;
        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        if let Err(e) = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            let _ = device.allocator().lock().free(allocation);
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        log::trace!("Created {} buffer: {} bytes ({:?})", name, size, location);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            name,
        })
    }

    /// Copy `data` into the mapped memory at `offset`.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RenderResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RenderError::InvalidHandle(format!(
                "write of {} bytes at {} exceeds {} buffer of {} bytes",
                data.len(),
                offset,
                self.name,
                self.size
            )));
        }

        let mapped = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .ok_or_else(|| {
                RenderError::InvalidHandle(format!("{} buffer is not host-visible", self.name))
            })?;

        unsafe {
            let dst = (mapped.as_ptr() as *mut u8).add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Snapshot of the mapped contents.
    pub fn read(&self) -> RenderResult<Vec<u8>> {
        let bytes = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .ok_or_else(|| {
                RenderError::InvalidHandle(format!("{} buffer is not host-visible", self.name))
            })?;

        Ok(bytes[..self.size as usize].to_vec())
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().lock().free(allocation) {
                log::error!("Failed to free {} buffer allocation: {}", self.name, e);
            }
        }

        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
    }
}
