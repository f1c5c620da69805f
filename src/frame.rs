// Frame synchronizer and command recorder
//
// Per frame:
//   1. wait on the slot's fence
//   2. acquire an image (signals the slot's image_available semaphore)
//   3. wait on whichever other slot last rendered to that image
//   4. caller rewrites the image's uniform buffer, records
//   5. reset fence, submit (image_available -> render_finished + fence)
//   6. present on render_finished, advance the slot
//
// CPU waits only ever happen on fences in steps 1 and 3; every
// queue-to-queue ordering is carried by semaphores. A frame that fails
// between acquire and submit is abandoned: an empty submit consumes the
// acquire semaphore and re-signals the slot's fence.

use crate::backend::swapchain::Swapchain;
use crate::backend::sync::{FrameRing, FrameSync};
use crate::backend::VulkanDevice;
use crate::error::{RenderError, RenderResult};
use crate::model::Model;
use crate::registry::{MeshHandle, ResourceRegistry, ResourceTable};
use ash::vk;
use glam::Mat4;
use std::sync::Arc;

/// Frame slots cycling through the pipeline.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// An acquired swapchain image, tied to the slot that acquired it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredFrame {
    pub slot: usize,
    pub image_index: u32,
    pub suboptimal: bool,
}

/// GPU-side operations the frame protocol is built from.
///
/// `FrameSynchronizer` drives a Vulkan implementation; the protocol itself
/// lives in `FramePacer` and only ever sees slots and image indices.
pub trait FrameGates {
    /// Block until `slot`'s fence signals.
    fn wait(&mut self, slot: usize) -> RenderResult<()>;
    /// Acquire an image, signaling `slot`'s image-acquired semaphore.
    fn acquire(&mut self, slot: usize) -> RenderResult<(u32, bool)>;
    /// Unsignal `slot`'s fence ahead of a submit.
    fn reset(&mut self, slot: usize) -> RenderResult<()>;
    /// Submit `slot`'s command buffer; signals render-finished and the fence.
    fn submit(&mut self, slot: usize) -> RenderResult<()>;
    /// Submit nothing but a wait on `slot`'s image-acquired semaphore,
    /// signaling the fence.
    fn drain(&mut self, slot: usize) -> RenderResult<()>;
    /// Queue `image_index` for presentation. `Ok(true)` means stale.
    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<bool>;
}

/// Slot rotation and the wait/acquire/submit/present ordering.
#[derive(Debug, Clone)]
pub struct FramePacer {
    ring: FrameRing,
}

impl FramePacer {
    pub fn new(slots: usize, image_count: usize) -> Self {
        Self {
            ring: FrameRing::new(slots, image_count),
        }
    }

    pub fn current_slot(&self) -> usize {
        self.ring.current()
    }

    /// Steps 1-3. On error nothing has been submitted and the slot's fence
    /// is still signaled, so the next attempt doesn't deadlock.
    pub fn begin_frame(&mut self, gates: &mut impl FrameGates) -> RenderResult<AcquiredFrame> {
        let slot = self.ring.current();

        gates.wait(slot)?;

        let (image_index, suboptimal) = gates.acquire(slot)?;

        if let Some(previous) = self.ring.claim_image(image_index as usize) {
            gates.wait(previous)?;
        }

        Ok(AcquiredFrame {
            slot,
            image_index,
            suboptimal,
        })
    }

    /// Step 5.
    pub fn submit(&self, gates: &mut impl FrameGates, frame: &AcquiredFrame) -> RenderResult<()> {
        gates.reset(frame.slot)?;
        gates.submit(frame.slot)
    }

    /// Step 6. The slot advances even when the swapchain turns out stale.
    pub fn present(
        &mut self,
        gates: &mut impl FrameGates,
        frame: &AcquiredFrame,
    ) -> RenderResult<()> {
        let result = gates.present(frame.slot, frame.image_index);
        self.ring.advance();

        match result {
            Ok(false) if !frame.suboptimal => Ok(()),
            Ok(_) => Err(RenderError::SwapchainStale),
            Err(e) => Err(e),
        }
    }

    /// Give up on an acquired frame without drawing it.
    ///
    /// The acquire left the slot's semaphore pending; a drain submit consumes
    /// it and re-signals the fence, so the slot can be used again.
    pub fn abandon(&self, gates: &mut impl FrameGates, frame: &AcquiredFrame) -> RenderResult<()> {
        gates.reset(frame.slot)?;
        gates.drain(frame.slot)
    }

    pub fn reset_images(&mut self, image_count: usize) {
        self.ring.reset_images(image_count);
    }
}

/// `FrameGates` over real fences, semaphores and a swapchain.
struct VulkanGates<'a> {
    device: &'a VulkanDevice,
    syncs: &'a [FrameSync],
    command_buffers: &'a [vk::CommandBuffer],
    swapchain: &'a Swapchain,
}

impl VulkanGates<'_> {
    fn queue_submit(&self, slot: usize, command_buffers: &[vk::CommandBuffer]) -> RenderResult<()> {
        let sync = &self.syncs[slot];

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];

        let mut submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(command_buffers);
        if !command_buffers.is_empty() {
            submit_info = submit_info.signal_semaphores(&signal_semaphores);
        }

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                sync.in_flight_fence,
            )
        }?;
        Ok(())
    }
}

impl FrameGates for VulkanGates<'_> {
    fn wait(&mut self, slot: usize) -> RenderResult<()> {
        self.syncs[slot].wait()
    }

    fn acquire(&mut self, slot: usize) -> RenderResult<(u32, bool)> {
        self.swapchain
            .acquire_next_image(u64::MAX, self.syncs[slot].image_available)
    }

    fn reset(&mut self, slot: usize) -> RenderResult<()> {
        self.syncs[slot].reset()
    }

    fn submit(&mut self, slot: usize) -> RenderResult<()> {
        self.queue_submit(slot, &self.command_buffers[slot..=slot])
    }

    fn drain(&mut self, slot: usize) -> RenderResult<()> {
        self.queue_submit(slot, &[])
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<bool> {
        self.swapchain.present(
            self.device.present_queue,
            image_index,
            &[self.syncs[slot].render_finished],
        )
    }
}

pub struct FrameSynchronizer {
    syncs: Vec<FrameSync>,
    command_buffers: Vec<vk::CommandBuffer>,
    command_pool: vk::CommandPool,
    pacer: FramePacer,
    device: Arc<VulkanDevice>,
}

impl FrameSynchronizer {
    pub fn new(device: Arc<VulkanDevice>, image_count: usize) -> RenderResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_families.graphics)
            // RESET: each slot's buffer is re-recorded every frame
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }?;

        let mut created = Self {
            syncs: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
            command_buffers: Vec::new(),
            command_pool,
            pacer: FramePacer::new(MAX_FRAMES_IN_FLIGHT, image_count),
            device,
        };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(MAX_FRAMES_IN_FLIGHT as u32);
        created.command_buffers =
            unsafe { created.device.device.allocate_command_buffers(&alloc_info) }?;

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            created.syncs.push(FrameSync::new(created.device.clone())?);
        }

        log::debug!(
            "Frame synchronizer: {} slots, {} images",
            MAX_FRAMES_IN_FLIGHT,
            image_count
        );

        Ok(created)
    }

    pub fn begin_frame(&mut self, swapchain: &Swapchain) -> RenderResult<AcquiredFrame> {
        let mut gates = VulkanGates {
            device: &self.device,
            syncs: &self.syncs,
            command_buffers: &self.command_buffers,
            swapchain,
        };
        self.pacer.begin_frame(&mut gates)
    }

    pub fn command_buffer(&self, frame: &AcquiredFrame) -> vk::CommandBuffer {
        self.command_buffers[frame.slot]
    }

    pub fn submit(&self, swapchain: &Swapchain, frame: &AcquiredFrame) -> RenderResult<()> {
        let mut gates = VulkanGates {
            device: &self.device,
            syncs: &self.syncs,
            command_buffers: &self.command_buffers,
            swapchain,
        };
        self.pacer.submit(&mut gates, frame)
    }

    pub fn present(&mut self, swapchain: &Swapchain, frame: &AcquiredFrame) -> RenderResult<()> {
        let mut gates = VulkanGates {
            device: &self.device,
            syncs: &self.syncs,
            command_buffers: &self.command_buffers,
            swapchain,
        };
        self.pacer.present(&mut gates, frame)
    }

    /// Drop an acquired frame whose recording failed.
    pub fn abandon(&self, swapchain: &Swapchain, frame: &AcquiredFrame) -> RenderResult<()> {
        let mut gates = VulkanGates {
            device: &self.device,
            syncs: &self.syncs,
            command_buffers: &self.command_buffers,
            swapchain,
        };
        self.pacer.abandon(&mut gates, frame)
    }

    /// The swapchain was rebuilt: previous image ownership no longer applies.
    pub fn reset_images(&mut self, image_count: usize) {
        self.pacer.reset_images(image_count);
    }
}

impl Drop for FrameSynchronizer {
    fn drop(&mut self) {
        // Command buffers go with their pool
        unsafe {
            self.device
                .device
                .destroy_command_pool(self.command_pool, None);
        }
    }
}

/// One step of the per-frame draw list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawOp {
    PushTransform(Mat4),
    Draw(MeshHandle),
}

/// Flatten models into push-constant updates and draws.
///
/// Each model pushes its coarse transform once. A mesh with its own
/// transform pushes `model * mesh`; the next plain mesh re-pushes the
/// model's transform.
pub fn plan_draws(
    models: &ResourceTable<Model>,
    mesh_transform: impl Fn(MeshHandle) -> Option<Mat4>,
) -> Vec<DrawOp> {
    let mut ops = Vec::new();

    for model in models.iter() {
        if model.meshes.is_empty() {
            continue;
        }
        ops.push(DrawOp::PushTransform(model.transform));
        let mut pushed_fine = false;

        for &mesh in &model.meshes {
            let Some(fine) = mesh_transform(mesh) else {
                continue;
            };
            if fine != Mat4::IDENTITY {
                ops.push(DrawOp::PushTransform(model.transform * fine));
                pushed_fine = true;
            } else if pushed_fine {
                ops.push(DrawOp::PushTransform(model.transform));
                pushed_fine = false;
            }
            ops.push(DrawOp::Draw(mesh));
        }
    }

    ops
}

/// Everything the recorder needs besides the registry.
pub struct RecordTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub uniform_set: vk::DescriptorSet,
    pub clear_color: [f32; 4],
}

/// Step 4: record one frame into `cmd`.
pub fn record_commands(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    target: &RecordTarget,
    registry: &ResourceRegistry,
) -> RenderResult<()> {
    let ops = plan_draws(&registry.models, |handle| {
        registry.meshes.get(handle).map(|mesh| mesh.transform)
    });

    let clear_values = [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: target.clear_color,
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ];

    let render_area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: target.extent,
    };

    let render_pass_info = vk::RenderPassBeginInfo::default()
        .render_pass(target.render_pass)
        .framebuffer(target.framebuffer)
        .render_area(render_area)
        .clear_values(&clear_values);

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: target.extent.width as f32,
        height: target.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };

    unsafe {
        device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())?;

        device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, target.pipeline);
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[render_area]);

        for op in ops {
            match op {
                DrawOp::PushTransform(transform) => {
                    device.cmd_push_constants(
                        cmd,
                        target.pipeline_layout,
                        vk::ShaderStageFlags::VERTEX,
                        0,
                        bytemuck::bytes_of(&transform),
                    );
                }
                DrawOp::Draw(handle) => {
                    let mesh = registry.mesh(handle)?;
                    let Some(texture) = registry.texture_or_sentinel(mesh.texture) else {
                        continue;
                    };

                    device.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertex_buffer.handle()], &[0]);
                    device.cmd_bind_index_buffer(
                        cmd,
                        mesh.index_buffer.handle(),
                        0,
                        vk::IndexType::UINT32,
                    );
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        target.pipeline_layout,
                        0,
                        &[target.uniform_set, texture.descriptor_set],
                        &[],
                    );
                    device.cmd_draw_indexed(cmd, mesh.index_count, 1, 0, 0, 0);
                }
            }
        }

        device.cmd_end_render_pass(cmd);
        device.end_command_buffer(cmd)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::registry::Handle;
    use glam::Vec3;
    use std::collections::VecDeque;

    fn model(meshes: &[u32], transform: Mat4) -> Model {
        Model {
            meshes: meshes.iter().map(|&i| Handle::new(i)).collect(),
            transform,
        }
    }

    #[test]
    fn identity_meshes_push_once_per_model() {
        let mut models = ResourceTable::new();
        let a = Mat4::from_translation(Vec3::X);
        let b = Mat4::from_translation(Vec3::Y);
        models.push(model(&[0, 1], a));
        models.push(model(&[2], b));

        let ops = plan_draws(&models, |_| Some(Mat4::IDENTITY));
        assert_eq!(
            ops,
            vec![
                DrawOp::PushTransform(a),
                DrawOp::Draw(Handle::new(0)),
                DrawOp::Draw(Handle::new(1)),
                DrawOp::PushTransform(b),
                DrawOp::Draw(Handle::new(2)),
            ]
        );
    }

    #[test]
    fn fine_transform_is_composed_and_then_restored() {
        let mut models = ResourceTable::new();
        let coarse = Mat4::from_rotation_y(0.5);
        let fine = Mat4::from_translation(Vec3::Z);
        models.push(model(&[0, 1, 2], coarse));

        let ops = plan_draws(&models, |h| {
            Some(if h.index() == 1 { fine } else { Mat4::IDENTITY })
        });
        assert_eq!(
            ops,
            vec![
                DrawOp::PushTransform(coarse),
                DrawOp::Draw(Handle::new(0)),
                DrawOp::PushTransform(coarse * fine),
                DrawOp::Draw(Handle::new(1)),
                DrawOp::PushTransform(coarse),
                DrawOp::Draw(Handle::new(2)),
            ]
        );
    }

    #[test]
    fn last_model_update_wins() {
        let mut models = ResourceTable::new();
        let h = models.push(model(&[0], Mat4::IDENTITY));
        let first = Mat4::from_scale(Vec3::splat(2.0));
        let second = Mat4::from_scale(Vec3::splat(3.0));
        models.get_mut(h).unwrap().transform = first;
        models.get_mut(h).unwrap().transform = second;

        let ops = plan_draws(&models, |_| Some(Mat4::IDENTITY));
        let pushed: Vec<_> = ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::PushTransform(m) => Some(*m),
                _ => None,
            })
            .collect();
        assert_eq!(pushed, vec![second]);
    }

    #[test]
    fn empty_models_and_unknown_meshes_draw_nothing() {
        let mut models = ResourceTable::new();
        models.push(model(&[], Mat4::IDENTITY));
        models.push(model(&[7], Mat4::IDENTITY));

        let ops = plan_draws(&models, |_| None);
        assert_eq!(ops, vec![DrawOp::PushTransform(Mat4::IDENTITY)]);
    }

    /// A GPU that retires submissions in order, with a swapchain that hands
    /// out images in a scrambled order.
    struct FakeGpu {
        fence_signaled: Vec<bool>,
        semaphore_pending: Vec<bool>,
        /// (slot, submission id) in execution order
        queue: VecDeque<(usize, usize)>,
        submitted: usize,
        retired: usize,
        /// Submission that last read each image's uniform buffer
        image_reader: Vec<Option<usize>>,
        acquired_by: Vec<Option<u32>>,
        held: Vec<bool>,
        rng: u64,
        max_unsignaled: usize,
        acquire_script: VecDeque<RenderResult<(u32, bool)>>,
        present_script: VecDeque<RenderResult<bool>>,
    }

    impl FakeGpu {
        fn new(slots: usize, images: usize) -> Self {
            Self {
                fence_signaled: vec![true; slots],
                semaphore_pending: vec![false; slots],
                queue: VecDeque::new(),
                submitted: 0,
                retired: 0,
                image_reader: vec![None; images],
                acquired_by: vec![None; slots],
                held: vec![false; images],
                rng: 0x2545_f491_4f6c_dd1d,
                max_unsignaled: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
            }
        }

        fn retire_one(&mut self) {
            if let Some((slot, _)) = self.queue.pop_front() {
                self.fence_signaled[slot] = true;
                self.retired += 1;
            }
        }

        fn next_image(&mut self) -> u32 {
            let images = self.held.len();
            self.rng = self
                .rng
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let start = (self.rng >> 33) as usize % images;
            (0..images)
                .map(|i| (start + i) % images)
                .find(|&i| !self.held[i])
                .expect("every swapchain image is held") as u32
        }

        /// The CPU rewrites the image's uniform buffer.
        fn write_uniforms(&self, image_index: u32) {
            if let Some(reader) = self.image_reader[image_index as usize] {
                assert!(
                    reader < self.retired,
                    "image {} rewritten while submission {} may still read it",
                    image_index,
                    reader
                );
            }
        }

        fn enqueue(&mut self, slot: usize) -> usize {
            assert!(
                self.semaphore_pending[slot],
                "slot {} submitted without an acquire",
                slot
            );
            self.semaphore_pending[slot] = false;
            assert!(!self.fence_signaled[slot], "submitted with a signaled fence");

            let id = self.submitted;
            self.submitted += 1;
            self.queue.push_back((slot, id));

            let unsignaled = self.fence_signaled.iter().filter(|s| !**s).count();
            self.max_unsignaled = self.max_unsignaled.max(unsignaled);
            id
        }
    }

    impl FrameGates for FakeGpu {
        fn wait(&mut self, slot: usize) -> RenderResult<()> {
            while !self.fence_signaled[slot] {
                assert!(!self.queue.is_empty(), "waiting on a fence nothing will signal");
                self.retire_one();
            }
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> RenderResult<(u32, bool)> {
            if let Some(scripted) = self.acquire_script.pop_front() {
                return scripted;
            }
            assert!(
                !self.semaphore_pending[slot],
                "slot {} acquired with its semaphore still signaled",
                slot
            );
            let image = self.next_image();
            self.held[image as usize] = true;
            self.semaphore_pending[slot] = true;
            self.acquired_by[slot] = Some(image);
            Ok((image, false))
        }

        fn reset(&mut self, slot: usize) -> RenderResult<()> {
            assert!(
                self.fence_signaled[slot],
                "slot {} reused before its fence signaled",
                slot
            );
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> RenderResult<()> {
            let id = self.enqueue(slot);
            let image = self.acquired_by[slot].expect("submit without an image");
            self.image_reader[image as usize] = Some(id);
            Ok(())
        }

        fn drain(&mut self, slot: usize) -> RenderResult<()> {
            self.enqueue(slot);
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<bool> {
            assert_eq!(self.acquired_by[slot], Some(image_index));
            self.held[image_index as usize] = false;
            self.acquired_by[slot] = None;
            self.present_script.pop_front().unwrap_or(Ok(false))
        }
    }

    fn run_frames(slots: usize, images: usize, frames: usize) -> FakeGpu {
        let mut pacer = FramePacer::new(slots, images);
        let mut gpu = FakeGpu::new(slots, images);

        for n in 0..frames {
            let frame = pacer.begin_frame(&mut gpu).unwrap();
            gpu.write_uniforms(frame.image_index);
            pacer.submit(&mut gpu, &frame).unwrap();
            pacer.present(&mut gpu, &frame).unwrap();

            // The GPU sometimes keeps up, sometimes lags
            if n % 3 == 0 {
                gpu.retire_one();
            }
        }
        gpu
    }

    #[test]
    fn thousand_frames_never_exceed_two_pending_fences() {
        let gpu = run_frames(MAX_FRAMES_IN_FLIGHT, 3, 1000);
        assert_eq!(gpu.submitted, 1000);
        assert!(gpu.max_unsignaled <= MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn slots_are_safe_for_any_image_count() {
        for images in 1..=5 {
            for slots in 1..=3 {
                let gpu = run_frames(slots, images, 300);
                assert!(gpu.max_unsignaled <= slots);
            }
        }
    }

    fn present_once(gpu: &mut FakeGpu, pacer: &mut FramePacer) -> RenderResult<()> {
        let frame = pacer.begin_frame(gpu)?;
        pacer.submit(gpu, &frame)?;
        pacer.present(gpu, &frame)
    }

    #[test]
    fn present_results_are_classified() {
        let mut pacer = FramePacer::new(2, 3);
        let mut gpu = FakeGpu::new(2, 3);

        gpu.present_script.push_back(Ok(false));
        assert!(present_once(&mut gpu, &mut pacer).is_ok());
        assert_eq!(pacer.current_slot(), 1);

        gpu.present_script.push_back(Ok(true));
        let err = present_once(&mut gpu, &mut pacer).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SwapchainStale);
        assert_eq!(pacer.current_slot(), 0);

        gpu.present_script.push_back(Err(RenderError::DeviceLost));
        let err = present_once(&mut gpu, &mut pacer).unwrap_err();
        assert!(matches!(err, RenderError::DeviceLost));
        assert_eq!(pacer.current_slot(), 1);
    }

    #[test]
    fn suboptimal_acquire_is_drawn_then_reported_stale() {
        let mut pacer = FramePacer::new(2, 3);
        let mut gpu = FakeGpu::new(2, 3);

        let mut frame = pacer.begin_frame(&mut gpu).unwrap();
        frame.suboptimal = true;
        pacer.submit(&mut gpu, &frame).unwrap();
        let err = pacer.present(&mut gpu, &frame).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SwapchainStale);
        assert_eq!(gpu.submitted, 1);
        assert_eq!(pacer.current_slot(), 1);
    }

    #[test]
    fn failed_acquire_leaves_the_slot_usable() {
        let mut pacer = FramePacer::new(2, 3);
        let mut gpu = FakeGpu::new(2, 3);

        gpu.acquire_script.push_back(Err(RenderError::SwapchainStale));
        let err = pacer.begin_frame(&mut gpu).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SwapchainStale);
        assert_eq!(pacer.current_slot(), 0);
        assert_eq!(gpu.submitted, 0);

        // Fence still signaled: the retry doesn't block
        assert!(present_once(&mut gpu, &mut pacer).is_ok());
    }

    #[test]
    fn abandoned_frame_consumes_its_acquire() {
        let mut pacer = FramePacer::new(2, 4);
        let mut gpu = FakeGpu::new(2, 4);

        let frame = pacer.begin_frame(&mut gpu).unwrap();
        pacer.abandon(&mut gpu, &frame).unwrap();
        assert!(!gpu.semaphore_pending[frame.slot]);
        assert_eq!(pacer.current_slot(), frame.slot);

        // The same slot acquires again without tripping over the old signal
        for _ in 0..10 {
            present_once(&mut gpu, &mut pacer).unwrap();
        }
        assert_eq!(gpu.submitted, 11);
    }
}
