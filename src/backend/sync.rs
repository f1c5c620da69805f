// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync, plus the bookkeeping that
// decides which frame slot is active and which slot last rendered into each
// swapchain image.

use super::VulkanDevice;
use crate::error::RenderResult;
use ash::vk;
use std::sync::Arc;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    device: Arc<VulkanDevice>,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: Arc<VulkanDevice>) -> RenderResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Start signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let mut sync = Self {
            device,
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
        };

        unsafe {
            sync.image_available = sync.device.device.create_semaphore(&semaphore_info, None)?;
            sync.render_finished = sync.device.device.create_semaphore(&semaphore_info, None)?;
            sync.in_flight_fence = sync.device.device.create_fence(&fence_info, None)?;
        }

        Ok(sync)
    }

    /// Block until the GPU is done with this slot's last submission.
    pub fn wait(&self) -> RenderResult<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)
        }?;
        Ok(())
    }

    pub fn reset(&self) -> RenderResult<()> {
        unsafe { self.device.device.reset_fences(&[self.in_flight_fence]) }?;
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            if self.image_available != vk::Semaphore::null() {
                self.device
                    .device
                    .destroy_semaphore(self.image_available, None);
            }
            if self.render_finished != vk::Semaphore::null() {
                self.device
                    .device
                    .destroy_semaphore(self.render_finished, None);
            }
            if self.in_flight_fence != vk::Fence::null() {
                self.device.device.destroy_fence(self.in_flight_fence, None);
            }
        }
    }
}

/// Round-robin frame slot cursor with per-image ownership tracking.
///
/// Slot and image indices are distinct: there are `slots` frame slots and
/// as many images as the swapchain hands out.
#[derive(Debug, Clone)]
pub struct FrameRing {
    slots: usize,
    current: usize,
    image_owners: Vec<Option<usize>>,
}

impl FrameRing {
    pub fn new(slots: usize, image_count: usize) -> Self {
        Self {
            slots: slots.max(1),
            current: 0,
            image_owners: vec![None; image_count],
        }
    }

    #[inline]
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots;
    }

    /// Record that the current slot renders into `image_index`.
    ///
    /// Returns the other slot whose gate must be waited on before the
    /// image's resources are rewritten, if the image was last used by one.
    pub fn claim_image(&mut self, image_index: usize) -> Option<usize> {
        if image_index >= self.image_owners.len() {
            self.image_owners.resize(image_index + 1, None);
        }
        let previous = self.image_owners[image_index].replace(self.current);
        previous.filter(|&slot| slot != self.current)
    }

    /// Forget image ownership after the swapchain was rebuilt.
    pub fn reset_images(&mut self, image_count: usize) {
        self.image_owners = vec![None; image_count];
    }
}
