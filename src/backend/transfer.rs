// Transfer engine - host to device-local uploads
//
// Every upload goes through a staging buffer sized exactly to the payload and
// a one-shot command buffer on the graphics queue. The call blocks until the
// copy is done; uploads only happen at load time, never per frame.

use super::buffer::DeviceBuffer;
use super::image::{color_or_depth_range, DeviceImage};
use super::VulkanDevice;
use crate::error::{RenderError, RenderResult};
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// Upper bound on a single blocking transfer.
pub const TRANSFER_TIMEOUT_NS: u64 = 10_000_000_000;

/// Texel format used for every uploaded texture.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// What the uploaded data will be used for on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    Vertex,
    Index,
    Texture { width: u32, height: u32 },
}

impl UsageKind {
    /// Usage bits of the final buffer: transfer destination plus semantic usage.
    pub fn buffer_usage(self) -> Option<vk::BufferUsageFlags> {
        match self {
            UsageKind::Vertex => Some(
                vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::VERTEX_BUFFER,
            ),
            UsageKind::Index => {
                Some(vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::INDEX_BUFFER)
            }
            UsageKind::Texture { .. } => None,
        }
    }
}

/// Result of `TransferEngine::upload`.
pub enum DeviceResource {
    Buffer(DeviceBuffer),
    Image(DeviceImage),
}

pub struct TransferEngine {
    device: Arc<VulkanDevice>,
    command_pool: vk::CommandPool,
}

impl TransferEngine {
    pub fn new(device: Arc<VulkanDevice>) -> RenderResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_families.graphics)
            // TRANSIENT: every buffer from this pool is recorded once and freed
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }?;

        Ok(Self {
            device,
            command_pool,
        })
    }

    /// Upload `data` into a new device-local resource tagged for `usage`.
    pub fn upload(&self, data: &[u8], usage: UsageKind) -> RenderResult<DeviceResource> {
        match usage {
            UsageKind::Texture { width, height } => self
                .upload_texture(data, width, height)
                .map(DeviceResource::Image),
            UsageKind::Vertex => self
                .upload_buffer(data, UsageKind::Vertex, "vertex")
                .map(DeviceResource::Buffer),
            UsageKind::Index => self
                .upload_buffer(data, UsageKind::Index, "index")
                .map(DeviceResource::Buffer),
        }
    }

    pub fn upload_buffer(
        &self,
        data: &[u8],
        usage: UsageKind,
        name: &'static str,
    ) -> RenderResult<DeviceBuffer> {
        let usage_flags = usage.buffer_usage().ok_or_else(|| {
            RenderError::InvalidHandle(format!("{:?} is not a buffer usage", usage))
        })?;
        // Read-back copies out of the final buffer as well
        self.upload_buffer_with_flags(data, usage_flags | vk::BufferUsageFlags::TRANSFER_SRC, name)
    }

    fn upload_buffer_with_flags(
        &self,
        data: &[u8],
        usage: vk::BufferUsageFlags,
        name: &'static str,
    ) -> RenderResult<DeviceBuffer> {
        let size = data.len() as vk::DeviceSize;
        let staging = self.staging_buffer(data)?;
        let buffer = DeviceBuffer::new(self.device.clone(), size, usage, MemoryLocation::GpuOnly, name)?;

        self.one_shot(|cmd| unsafe {
            let region = vk::BufferCopy::default().size(size);
            self.device
                .device
                .cmd_copy_buffer(cmd, staging.handle(), buffer.handle(), &[region]);
        })?;

        log::debug!("Uploaded {} bytes to {} buffer", size, name);
        Ok(buffer)
    }

    /// Upload tightly packed RGBA8 pixels into a sampled image.
    ///
    /// The image ends in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn upload_texture(&self, pixels: &[u8], width: u32, height: u32) -> RenderResult<DeviceImage> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(RenderError::UnsupportedFormat(format!(
                "texture {}x{} needs {} RGBA8 bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }

        let staging = self.staging_buffer(pixels)?;
        let extent = vk::Extent2D { width, height };
        let image = DeviceImage::new(
            self.device.clone(),
            extent,
            TEXTURE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
            "texture",
        )?;

        self.one_shot(|cmd| unsafe {
            self.transition_layout(
                cmd,
                image.handle(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );

            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                });
            self.device.device.cmd_copy_buffer_to_image(
                cmd,
                staging.handle(),
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            self.transition_layout(
                cmd,
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        })?;

        log::debug!("Uploaded {}x{} texture", width, height);
        Ok(image)
    }

    /// Copy a device-local buffer back to the host.
    pub fn read_back(&self, source: &DeviceBuffer) -> RenderResult<Vec<u8>> {
        let size = source.size();
        let readback = DeviceBuffer::new(
            self.device.clone(),
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "read-back",
        )?;

        self.one_shot(|cmd| unsafe {
            let region = vk::BufferCopy::default().size(size);
            self.device
                .device
                .cmd_copy_buffer(cmd, source.handle(), readback.handle(), &[region]);
        })?;

        readback.read()
    }

    fn staging_buffer(&self, data: &[u8]) -> RenderResult<DeviceBuffer> {
        let staging = DeviceBuffer::new(
            self.device.clone(),
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "staging",
        )?;
        staging.write(0, data)?;
        Ok(staging)
    }

    /// Record, submit and wait for a single-use command buffer.
    fn one_shot(&self, record: impl FnOnce(vk::CommandBuffer)) -> RenderResult<()> {
        let device = &self.device.device;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }?;
        let fence = match unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.free_command_buffers(self.command_pool, &command_buffers) };
                return Err(e.into());
            }
        };

        let result = self.submit_and_wait(&command_buffers, fence, record);

        unsafe {
            // A timed-out submission may still be executing
            if result.is_err() {
                if let Err(e) = device.device_wait_idle() {
                    log::error!("wait_idle after failed transfer: {}", e);
                }
            }
            device.destroy_fence(fence, None);
            device.free_command_buffers(self.command_pool, &command_buffers);
        }

        result
    }

    fn submit_and_wait(
        &self,
        command_buffers: &[vk::CommandBuffer],
        fence: vk::Fence,
        record: impl FnOnce(vk::CommandBuffer),
    ) -> RenderResult<()> {
        let device = &self.device.device;
        let cmd = command_buffers[0];

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device.begin_command_buffer(cmd, &begin_info)?;
            record(cmd);
            device.end_command_buffer(cmd)?;

            let submit_info = vk::SubmitInfo::default().command_buffers(command_buffers);
            device.queue_submit(self.device.graphics_queue, &[submit_info], fence)?;

            match device.wait_for_fences(&[fence], true, TRANSFER_TIMEOUT_NS) {
                Ok(()) => Ok(()),
                Err(vk::Result::TIMEOUT) => Err(RenderError::TransferTimeout {
                    timeout_ms: TRANSFER_TIMEOUT_NS / 1_000_000,
                }),
                Err(e) => Err(e.into()),
            }
        }
    }

    unsafe fn transition_layout(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let (src_access, dst_access, src_stage, dst_stage) = transition_masks(old_layout, new_layout);

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_or_depth_range(vk::ImageAspectFlags::COLOR))
            .src_access_mask(src_access)
            .dst_access_mask(dst_access);

        self.device.device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

impl Drop for TransferEngine {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Access masks and stages for the two texture upload transitions.
pub fn transition_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> (
    vk::AccessFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::PipelineStageFlags,
) {
    match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        _ => (
            vk::AccessFlags::MEMORY_WRITE,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_usages_carry_transfer_dst() {
        let vertex = UsageKind::Vertex.buffer_usage().unwrap();
        assert!(vertex.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(vertex.contains(vk::BufferUsageFlags::VERTEX_BUFFER));

        let index = UsageKind::Index.buffer_usage().unwrap();
        assert!(index.contains(vk::BufferUsageFlags::INDEX_BUFFER));
        assert!(!index.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
    }

    #[test]
    fn textures_are_not_buffers() {
        let usage = UsageKind::Texture {
            width: 1,
            height: 1,
        };
        assert!(usage.buffer_usage().is_none());
    }

    #[test]
    fn upload_transitions_order_transfer_before_sampling() {
        let (src, dst, src_stage, dst_stage) = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert_eq!(src, vk::AccessFlags::empty());
        assert_eq!(dst, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(dst_stage, vk::PipelineStageFlags::TRANSFER);

        let (src, dst, src_stage, dst_stage) = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(src, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst, vk::AccessFlags::SHADER_READ);
        assert_eq!(src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }
}
