// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen,
// plus the single depth buffer shared by every framebuffer.

use super::image::{create_image_view, DeviceImage};
use super::instance::Surface;
use super::VulkanDevice;
use crate::error::{RenderError, RenderResult};
use ash::vk;
use std::sync::Arc;

pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// 8-bit RGBA/BGRA in sRGB-nonlinear space if offered, else the first entry.
///
/// A lone `UNDEFINED` entry means the surface takes any format.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> RenderResult<vk::SurfaceFormatKHR> {
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Ok(vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            });
        }
    }

    formats
        .iter()
        .copied()
        .find(|f| {
            (f.format == vk::Format::R8G8B8A8_UNORM || f.format == vk::Format::B8G8R8A8_UNORM)
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
        .ok_or_else(|| RenderError::UnsupportedFormat("surface reports no formats".into()))
}

/// `preferred` when offered, otherwise FIFO (always supported).
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, clamped (never rejected) to a nonzero maximum.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && count > caps.max_image_count {
        caps.max_image_count
    } else {
        count
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: &Surface,
        width: u32,
        height: u32,
        preferred_mode: vk::PresentModeKHR,
    ) -> RenderResult<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let loader = surface.loader();
        let surface_caps = unsafe {
            loader.get_physical_device_surface_capabilities(device.physical_device, surface.handle)
        }?;
        let formats = unsafe {
            loader.get_physical_device_surface_formats(device.physical_device, surface.handle)
        }?;
        let present_modes = unsafe {
            loader.get_physical_device_surface_present_modes(device.physical_device, surface.handle)
        }?;

        let surface_format = choose_surface_format(&formats)?;
        let present_mode = choose_present_mode(&present_modes, preferred_mode);
        let extent = choose_extent(&surface_caps, width, height);
        let image_count = choose_image_count(&surface_caps);

        log::info!(
            "Surface format: {:?} / {:?}, present mode: {:?}",
            surface_format.format,
            surface_format.color_space,
            present_mode
        );

        let families = device.queue_families;
        let family_indices = [families.graphics, families.present];
        let swapchain_loader = ash::khr::swapchain::Device::new(&device.instance.instance, &device.device);

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        create_info = if families.is_shared() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };

        log::info!("Created swapchain with {} images", images.len());

        let mut created = Self {
            swapchain,
            swapchain_loader,
            images,
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
            present_mode,
            device,
        };

        for &image in &created.images {
            let view = create_image_view(
                &created.device.device,
                image,
                created.format,
                vk::ImageAspectFlags::COLOR,
            )?;
            created.image_views.push(view);
        }

        Ok(created)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire next image for rendering.
    ///
    /// Returns the image index and whether the swapchain is suboptimal. The
    /// image is still usable in the suboptimal case, so the frame goes ahead
    /// and the staleness is reported after present.
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> RenderResult<(u32, bool)> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        Ok(result?)
    }

    /// Present rendered image to screen. `Ok(true)` means suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> RenderResult<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Depth attachment sized to the swapchain, shared across all framebuffers.
pub struct DepthBuffer {
    pub image: DeviceImage,
}

impl DepthBuffer {
    pub fn new(device: Arc<VulkanDevice>, extent: vk::Extent2D) -> RenderResult<Self> {
        let format = device.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;

        let image = DeviceImage::new(
            device,
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
            "depth buffer",
        )?;

        log::info!("Depth buffer: {:?} {}x{}", format, extent.width, extent.height);

        Ok(Self { image })
    }

    pub fn format(&self) -> vk::Format {
        self.image.format
    }

    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 16,
                height: 16,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        }
    }

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn image_count_is_clamped_to_maximum() {
        assert_eq!(choose_image_count(&caps(2, 2)), 2);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
    }

    #[test]
    fn zero_maximum_means_unbounded() {
        assert_eq!(choose_image_count(&caps(7, 0)), 8);
    }

    #[test]
    fn fixed_current_extent_wins() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let extent = choose_extent(&c, 4000, 10);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn window_size_is_clamped_to_surface_limits() {
        let extent = choose_extent(&caps(2, 3), 4000, 10);
        assert_eq!((extent.width, extent.height), (1920, 16));
    }

    #[test]
    fn srgb_nonlinear_rgba_is_preferred() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn first_format_is_the_fallback() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT),
            format(vk::Format::A2B10G10R10_UNORM_PACK32),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::R16G16B16A16_SFLOAT
        );
    }

    #[test]
    fn undefined_format_means_anything_goes() {
        let chosen = choose_surface_format(&[format(vk::Format::UNDEFINED)]).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn no_formats_is_an_error() {
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
    }
}
