// =============================================================================
// RENDERER - public entry point
// =============================================================================
//
// Owns every GPU object through RAII wrappers. Field order is drop order:
// registry -> frame resources -> swapchain targets -> pipeline -> device
// -> surface -> instance.

use crate::backend::descriptor::{SamplerDescriptors, UniformDescriptors};
use crate::backend::image::TextureSampler;
use crate::backend::instance::{Surface, VulkanInstance};
use crate::backend::pipeline::{DescriptorSetLayouts, Framebuffers, GraphicsPipeline, RenderPass};
use crate::backend::shader::ShaderModule;
use crate::backend::swapchain::{DepthBuffer, Swapchain};
use crate::backend::transfer::{TransferEngine, UsageKind};
use crate::backend::VulkanDevice;
use crate::config::Config;
use crate::error::{RenderError, RenderResult};
use crate::frame::{record_commands, FrameSynchronizer, RecordTarget};
use crate::model::{self, ImportedMesh, Model, ModelSink};
use crate::registry::{
    Mesh, MeshHandle, ModelHandle, ResourceRegistry, Texture, TextureHandle,
};
use crate::texture::DecodedImage;
use crate::uniform::{aspect_ratio, UboViewProjection};
use ash::vk;
use glam::Mat4;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::path::Path;
use std::sync::Arc;

/// Everything sized to the current swapchain.
struct SwapchainTargets {
    uniforms: UniformDescriptors,
    framebuffers: Framebuffers,
    depth: DepthBuffer,
    swapchain: Swapchain,
}

impl SwapchainTargets {
    fn new(
        device: &Arc<VulkanDevice>,
        surface: &Surface,
        render_pass: &RenderPass,
        set_layouts: &DescriptorSetLayouts,
        config: &Config,
        width: u32,
        height: u32,
    ) -> RenderResult<Self> {
        Self::new_detached(device, surface, config, width, height)?.attach(
            device,
            render_pass,
            set_layouts,
        )
    }

    /// Swapchain + depth buffer only; the render pass needs their formats
    /// before the rest can be built.
    fn new_detached(
        device: &Arc<VulkanDevice>,
        surface: &Surface,
        config: &Config,
        width: u32,
        height: u32,
    ) -> RenderResult<DetachedTargets> {
        let swapchain = Swapchain::new(
            device.clone(),
            surface,
            width,
            height,
            config.preferred_present_mode(),
        )?;
        let depth = DepthBuffer::new(device.clone(), swapchain.extent)?;
        Ok(DetachedTargets { depth, swapchain })
    }
}

struct DetachedTargets {
    depth: DepthBuffer,
    swapchain: Swapchain,
}

impl DetachedTargets {
    fn attach(
        self,
        device: &Arc<VulkanDevice>,
        render_pass: &RenderPass,
        set_layouts: &DescriptorSetLayouts,
    ) -> RenderResult<SwapchainTargets> {
        let framebuffers = Framebuffers::new(
            device.clone(),
            render_pass,
            &self.swapchain.image_views,
            self.depth.view(),
            self.swapchain.extent,
        )?;
        let uniforms = UniformDescriptors::new(
            device.clone(),
            set_layouts.uniform,
            self.swapchain.image_count(),
        )?;

        Ok(SwapchainTargets {
            uniforms,
            framebuffers,
            depth: self.depth,
            swapchain: self.swapchain,
        })
    }
}

pub struct Renderer {
    registry: ResourceRegistry,
    samplers: SamplerDescriptors,
    texture_sampler: TextureSampler,
    transfer: TransferEngine,
    frames: FrameSynchronizer,
    /// `None` while the window has a zero-sized surface.
    targets: Option<SwapchainTargets>,
    pipeline: GraphicsPipeline,
    set_layouts: DescriptorSetLayouts,
    render_pass: RenderPass,
    device: Arc<VulkanDevice>,
    surface: Surface,

    config: Config,
    color_format: vk::Format,
    view_projection: UboViewProjection,
    custom_view_projection: bool,
}

impl Renderer {
    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Bring up the whole renderer against a window.
    ///
    /// Any failure here is a setup error; nothing is left half-built since
    /// every created object drops on the error path.
    pub fn init(
        config: Config,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        width: u32,
        height: u32,
    ) -> RenderResult<Self> {
        log::info!("Initializing renderer...");

        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let instance = VulkanInstance::new(&config.window.title, enable_validation, Some(display))?;
        let surface = instance.create_surface(display, window)?;
        let device = VulkanDevice::new(instance.clone(), Some(&surface))?;

        let targets = SwapchainTargets::new_detached(&device, &surface, &config, width, height)?;
        let color_format = targets.swapchain.format;

        let depth_format = targets.depth.format();
        let render_pass = RenderPass::new(device.clone(), color_format, depth_format)?;
        let set_layouts = DescriptorSetLayouts::new(device.clone())?;

        let vert = ShaderModule::load(device.clone(), &config.assets.shader_dir.join("mesh.vert.spv"))?;
        let frag = ShaderModule::load(device.clone(), &config.assets.shader_dir.join("mesh.frag.spv"))?;
        let pipeline = GraphicsPipeline::new(device.clone(), &render_pass, &set_layouts, &vert, &frag)?;
        drop((vert, frag));

        let targets = targets.attach(&device, &render_pass, &set_layouts)?;
        let extent = targets.swapchain.extent;

        let frames = FrameSynchronizer::new(device.clone(), targets.swapchain.image_count())?;
        let transfer = TransferEngine::new(device.clone())?;
        let texture_sampler = TextureSampler::new(device.clone(), config.graphics.max_anisotropy)?;
        let samplers = SamplerDescriptors::new(
            device.clone(),
            set_layouts.sampler,
            config.graphics.max_objects,
        )?;

        let view_projection =
            UboViewProjection::from_camera(&config.camera, aspect_ratio(extent.width, extent.height));

        let mut renderer = Self {
            registry: ResourceRegistry::new(),
            samplers,
            texture_sampler,
            transfer,
            frames,
            targets: Some(targets),
            pipeline,
            set_layouts,
            render_pass,
            device,
            surface,
            config,
            color_format,
            view_projection,
            custom_view_projection: false,
        };

        renderer.create_sentinel_texture()?;

        log::info!("Renderer initialized");
        Ok(renderer)
    }

    /// Texture slot 0, used by meshes without a textured material.
    fn create_sentinel_texture(&mut self) -> RenderResult<()> {
        let image = match self.config.assets.default_texture.clone() {
            Some(file) => {
                let path = self.config.texture_path(&file);
                let image = DecodedImage::decode_file(&path)?;
                image.check_extent(&path, self.max_texture_dimension())?;
                image
            }
            None => DecodedImage::solid([255, 255, 255, 255]),
        };
        self.upload_sink().add_texture(&image)?;
        Ok(())
    }

    fn max_texture_dimension(&self) -> u32 {
        self.device.properties.limits.max_image_dimension2_d
    }

    fn upload_sink(&mut self) -> UploadSink<'_> {
        let max_dimension = self.max_texture_dimension();
        UploadSink {
            transfer: &self.transfer,
            registry: &mut self.registry,
            samplers: &mut self.samplers,
            sampler: self.texture_sampler.handle(),
            texture_dir: self.config.assets.texture_dir.as_path(),
            max_dimension,
        }
    }

    // =========================================================================
    // ASSETS
    // =========================================================================

    /// Import a model (relative paths resolve against `assets.model_dir`).
    ///
    /// Textures shared between materials are uploaded once. Entries created
    /// before a failure stay registered; the registry is append-only.
    pub fn create_mesh_model(&mut self, path: impl AsRef<Path>) -> RenderResult<ModelHandle> {
        let path = self.config.model_path(path);
        let scene = model::load_obj(&path)?;
        let textures_before = self.texture_count();
        let handle = model::build_model(&scene, &mut self.upload_sink())?;

        log::info!(
            "Model {:?} ready: {:?} with {} meshes, {} new textures",
            path,
            handle,
            self.mesh_count(handle)?,
            self.texture_count() - textures_before
        );
        Ok(handle)
    }

    /// Set a model's coarse transform. Only the last value before a draw counts.
    pub fn update_model(&mut self, handle: ModelHandle, transform: Mat4) -> RenderResult<()> {
        self.registry.model_mut(handle)?.transform = transform;
        Ok(())
    }

    /// Set one mesh's own transform, applied on top of its model's.
    pub fn update_mesh(
        &mut self,
        model: ModelHandle,
        mesh_index: usize,
        transform: Mat4,
    ) -> RenderResult<()> {
        let mesh = self
            .registry
            .model(model)?
            .meshes
            .get(mesh_index)
            .copied()
            .ok_or_else(|| {
                RenderError::InvalidHandle(format!("mesh {} of {:?}", mesh_index, model))
            })?;
        self.registry.mesh_mut(mesh)?.transform = transform;
        Ok(())
    }

    /// Replace the camera; the projection is used as given (Y already flipped).
    pub fn set_view_projection(&mut self, view: Mat4, projection: Mat4) {
        self.view_projection = UboViewProjection { projection, view };
        self.custom_view_projection = true;
    }

    pub fn model_count(&self) -> usize {
        self.registry.models.len()
    }

    pub fn mesh_count(&self, model: ModelHandle) -> RenderResult<usize> {
        Ok(self.registry.model(model)?.mesh_count())
    }

    /// Includes the sentinel in slot 0.
    pub fn texture_count(&self) -> usize {
        self.registry.textures.len()
    }

    // =========================================================================
    // FRAME LOOP
    // =========================================================================

    /// Render and present one frame.
    ///
    /// `SwapchainStale` means the frame was dropped or presented late and
    /// `recreate_swapchain` should be called before the next one.
    pub fn draw_frame(&mut self) -> RenderResult<()> {
        let Some(targets) = self.targets.as_ref() else {
            return Ok(());
        };

        let frame = self.frames.begin_frame(&targets.swapchain)?;

        let cmd = self.frames.command_buffer(&frame);
        if let Err(e) = self.record_frame(targets, cmd, frame.image_index as usize) {
            self.frames.abandon(&targets.swapchain, &frame)?;
            return Err(e);
        }

        self.frames.submit(&targets.swapchain, &frame)?;
        self.frames.present(&targets.swapchain, &frame)
    }

    /// Steps 3-4: refresh the image's uniform buffer and record into `cmd`.
    fn record_frame(
        &self,
        targets: &SwapchainTargets,
        cmd: vk::CommandBuffer,
        image_index: usize,
    ) -> RenderResult<()> {
        targets.uniforms.write(image_index, &self.view_projection)?;

        let framebuffer = targets.framebuffers.get(image_index).ok_or_else(|| {
            RenderError::InvalidHandle(format!("framebuffer for image {}", image_index))
        })?;
        let uniform_set = targets.uniforms.set(image_index).ok_or_else(|| {
            RenderError::InvalidHandle(format!("uniform set for image {}", image_index))
        })?;

        let target = RecordTarget {
            render_pass: self.render_pass.render_pass,
            framebuffer,
            extent: targets.swapchain.extent,
            pipeline: self.pipeline.pipeline,
            pipeline_layout: self.pipeline.layout,
            uniform_set,
            clear_color: self.config.graphics.clear_color,
        };
        record_commands(&self.device.device, cmd, &target, &self.registry)
    }

    /// Rebuild everything sized to the surface. A zero extent (minimized
    /// window) releases the swapchain and pauses drawing until the next call.
    pub fn recreate_swapchain(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.device.wait_idle()?;

        // The surface only supports one swapchain at a time
        self.targets = None;

        if width == 0 || height == 0 {
            log::info!("Surface has zero extent, drawing paused");
            return Ok(());
        }

        let targets = SwapchainTargets::new(
            &self.device,
            &self.surface,
            &self.render_pass,
            &self.set_layouts,
            &self.config,
            width,
            height,
        )?;

        if targets.swapchain.format != self.color_format {
            return Err(RenderError::UnsupportedFormat(format!(
                "surface format changed from {:?} to {:?}",
                self.color_format, targets.swapchain.format
            )));
        }

        let extent = targets.swapchain.extent;
        let depth_format = targets.depth.format();
        self.frames.reset_images(targets.swapchain.image_count());
        self.targets = Some(targets);

        if !self.custom_view_projection {
            self.view_projection = self
                .view_projection
                .with_aspect(&self.config.camera, aspect_ratio(extent.width, extent.height));
        }

        log::info!(
            "Swapchain recreated: {}x{}, depth {:?}",
            extent.width,
            extent.height,
            depth_format
        );
        Ok(())
    }

    /// Wait for the GPU and release everything.
    pub fn shutdown(self) {
        log::info!("Shutting down renderer");
        drop(self);
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Nothing may be freed while the GPU still references it
        if let Err(e) = self.device.wait_idle() {
            log::error!("wait_idle during shutdown failed: {}", e);
        }
    }
}

/// Uploads imported data into the registry.
struct UploadSink<'a> {
    transfer: &'a TransferEngine,
    registry: &'a mut ResourceRegistry,
    samplers: &'a mut SamplerDescriptors,
    sampler: vk::Sampler,
    texture_dir: &'a Path,
    max_dimension: u32,
}

impl UploadSink<'_> {
    /// Fail before any decoding or uploading once the pool is exhausted.
    fn check_budget(&self) -> RenderResult<()> {
        let budget = self.samplers.budget();
        if budget.used() >= budget.max() {
            return Err(RenderError::TextureLimit { max: budget.max() });
        }
        Ok(())
    }

    fn add_texture(&mut self, image: &DecodedImage) -> RenderResult<TextureHandle> {
        self.check_budget()?;
        let device_image = self
            .transfer
            .upload_texture(&image.pixels, image.width, image.height)?;
        let descriptor_set = self.samplers.allocate(device_image.view(), self.sampler)?;

        Ok(self.registry.textures.push(Texture {
            image: device_image,
            descriptor_set,
        }))
    }
}

impl ModelSink for UploadSink<'_> {
    fn load_texture(&mut self, file_name: &str) -> RenderResult<TextureHandle> {
        self.check_budget()?;
        let path = self.texture_dir.join(file_name);
        let image = DecodedImage::decode_file(&path)?;
        image.check_extent(&path, self.max_dimension)?;
        self.add_texture(&image)
    }

    fn add_mesh(&mut self, mesh: &ImportedMesh, texture: TextureHandle) -> RenderResult<MeshHandle> {
        let vertex_buffer = self.transfer.upload_buffer(
            bytemuck::cast_slice(&mesh.vertices),
            UsageKind::Vertex,
            "vertex",
        )?;
        let index_buffer = self.transfer.upload_buffer(
            bytemuck::cast_slice(&mesh.indices),
            UsageKind::Index,
            "index",
        )?;

        Ok(self.registry.meshes.push(Mesh {
            vertex_buffer,
            index_buffer,
            vertex_count: mesh.vertices.len() as u32,
            index_count: mesh.indices.len() as u32,
            texture,
            transform: Mat4::IDENTITY,
        }))
    }

    fn add_model(&mut self, model: Model) -> ModelHandle {
        self.registry.models.push(model)
    }
}
