// Descriptor pools and sets
//
// Set A: one view/projection uniform buffer + set per swapchain image,
// rebuilt with the swapchain. Set B: one sampler set per texture, allocated
// from a pool bounded by `graphics.max_objects` for the renderer's lifetime.

use super::buffer::DeviceBuffer;
use super::VulkanDevice;
use crate::error::{RenderError, RenderResult};
use crate::uniform::UboViewProjection;
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// Counts texture descriptor sets against the fixed pool size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBudget {
    max: u32,
    used: u32,
}

impl TextureBudget {
    pub fn new(max: u32) -> Self {
        Self { max, used: 0 }
    }

    /// Claim one slot, or fail without side effects once the pool is full.
    pub fn reserve(&mut self) -> RenderResult<u32> {
        if self.used >= self.max {
            return Err(RenderError::TextureLimit { max: self.max });
        }
        let slot = self.used;
        self.used += 1;
        Ok(slot)
    }

    /// Give back the most recent reservation after a failed allocation.
    pub fn release_last(&mut self) {
        self.used = self.used.saturating_sub(1);
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

fn create_pool(
    device: &VulkanDevice,
    ty: vk::DescriptorType,
    count: u32,
) -> RenderResult<vk::DescriptorPool> {
    let pool_sizes = [vk::DescriptorPoolSize {
        ty,
        descriptor_count: count,
    }];
    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(count)
        .pool_sizes(&pool_sizes);

    Ok(unsafe { device.device.create_descriptor_pool(&pool_info, None) }?)
}

/// Per-image uniform buffers and their descriptor sets.
pub struct UniformDescriptors {
    buffers: Vec<DeviceBuffer>,
    sets: Vec<vk::DescriptorSet>,
    pool: vk::DescriptorPool,
    device: Arc<VulkanDevice>,
}

impl UniformDescriptors {
    pub fn new(
        device: Arc<VulkanDevice>,
        layout: vk::DescriptorSetLayout,
        image_count: usize,
    ) -> RenderResult<Self> {
        let pool = create_pool(&device, vk::DescriptorType::UNIFORM_BUFFER, image_count as u32)?;
        let mut created = Self {
            buffers: Vec::with_capacity(image_count),
            sets: Vec::new(),
            pool,
            device,
        };

        let buffer_size = std::mem::size_of::<UboViewProjection>() as vk::DeviceSize;
        for _ in 0..image_count {
            created.buffers.push(DeviceBuffer::new(
                created.device.clone(),
                buffer_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                "view/projection uniform",
            )?);
        }

        let layouts = vec![layout; image_count];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(created.pool)
            .set_layouts(&layouts);
        created.sets = unsafe { created.device.device.allocate_descriptor_sets(&alloc_info) }?;

        for (set, buffer) in created.sets.iter().zip(&created.buffers) {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: buffer.handle(),
                offset: 0,
                range: buffer_size,
            }];
            let write = vk::WriteDescriptorSet::default()
                .dst_set(*set)
                .dst_binding(0)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info);
            unsafe { created.device.device.update_descriptor_sets(&[write], &[]) };
        }

        log::debug!("Allocated {} uniform descriptor sets", image_count);
        Ok(created)
    }

    /// Overwrite image `image_index`'s uniform block.
    pub fn write(&self, image_index: usize, ubo: &UboViewProjection) -> RenderResult<()> {
        let buffer = self.buffers.get(image_index).ok_or_else(|| {
            RenderError::InvalidHandle(format!("uniform buffer for image {}", image_index))
        })?;
        buffer.write(0, bytemuck::bytes_of(ubo))
    }

    pub fn set(&self, image_index: usize) -> Option<vk::DescriptorSet> {
        self.sets.get(image_index).copied()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl Drop for UniformDescriptors {
    fn drop(&mut self) {
        // Sets are freed with their pool
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Texture sampler sets, one per texture.
pub struct SamplerDescriptors {
    device: Arc<VulkanDevice>,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    budget: TextureBudget,
}

impl SamplerDescriptors {
    pub fn new(
        device: Arc<VulkanDevice>,
        layout: vk::DescriptorSetLayout,
        max_objects: u32,
    ) -> RenderResult<Self> {
        if max_objects == 0 {
            return Err(RenderError::Config(
                "graphics.max_objects must be at least 1".to_string(),
            ));
        }
        let pool = create_pool(
            &device,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            max_objects,
        )?;

        Ok(Self {
            device,
            pool,
            layout,
            budget: TextureBudget::new(max_objects),
        })
    }

    /// Allocate and fill a set for `view`. Fails with `TextureLimit` before
    /// touching the pool once `max_objects` sets exist.
    pub fn allocate(
        &mut self,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> RenderResult<vk::DescriptorSet> {
        self.budget.reserve()?;

        let layouts = [self.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let set = match unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets[0],
            Err(e) => {
                self.budget.release_last();
                return Err(e.into());
            }
        };

        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);
        unsafe { self.device.device.update_descriptor_sets(&[write], &[]) };

        Ok(set)
    }

    pub fn budget(&self) -> TextureBudget {
        self.budget
    }
}

impl Drop for SamplerDescriptors {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_hands_out_sequential_slots() {
        let mut budget = TextureBudget::new(3);
        assert_eq!(budget.reserve().unwrap(), 0);
        assert_eq!(budget.reserve().unwrap(), 1);
        assert_eq!(budget.used(), 2);
    }

    #[test]
    fn exceeding_the_budget_fails_deterministically() {
        let mut budget = TextureBudget::new(2);
        budget.reserve().unwrap();
        budget.reserve().unwrap();
        for _ in 0..3 {
            let err = budget.reserve().unwrap_err();
            assert!(matches!(err, RenderError::TextureLimit { max: 2 }));
        }
        assert_eq!(budget.used(), 2);
    }

    #[test]
    fn released_slot_can_be_reserved_again() {
        let mut budget = TextureBudget::new(1);
        budget.reserve().unwrap();
        budget.release_last();
        assert_eq!(budget.reserve().unwrap(), 0);
    }
}
