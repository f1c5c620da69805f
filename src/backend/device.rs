// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection against the live surface
// - Logical device + graphics/presentation queue creation
// - Memory allocator setup

use super::instance::{Surface, VulkanInstance};
use crate::error::{RenderError, RenderResult};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::Arc;

const PORTABILITY_SUBSET: &CStr = c"VK_KHR_portability_subset";

/// Queue families resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Distinct families, one queue gets created per entry.
    pub fn unique(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = [self.graphics, self.present].into_iter().collect();
        set.into_iter().collect()
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// Resolve graphics + presentation families.
///
/// A family that can do both wins; otherwise the first graphics family is
/// paired with the first presentation family. Families with zero queues are
/// skipped.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> RenderResult<bool>,
) -> RenderResult<Option<QueueFamilyIndices>> {
    let mut graphics = None;
    let mut present = None;

    for (index, family) in families.iter().enumerate() {
        if family.queue_count == 0 {
            continue;
        }
        let index = index as u32;
        let has_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let has_present = supports_present(index)?;

        if has_graphics && has_present {
            return Ok(Some(QueueFamilyIndices {
                graphics: index,
                present: index,
            }));
        }
        if has_graphics && graphics.is_none() {
            graphics = Some(index);
        }
        if has_present && present.is_none() {
            present = Some(index);
        }
    }

    Ok(graphics
        .zip(present)
        .map(|(graphics, present)| QueueFamilyIndices { graphics, present }))
}

/// First candidate whose tiling features cover `features`.
pub fn pick_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    properties_of: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| {
        let props = properties_of(format);
        match tiling {
            vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
            vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
            _ => false,
        }
    })
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: Arc<VulkanInstance>,

    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilyIndices,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
}

impl VulkanDevice {
    /// Pick a GPU and open its queues.
    ///
    /// With `surface == None` presentation checks are skipped and the
    /// presentation queue aliases the graphics queue.
    pub fn new(instance: Arc<VulkanInstance>, surface: Option<&Surface>) -> RenderResult<Arc<Self>> {
        let (physical_device, queue_families) = Self::pick_physical_device(&instance, surface)?;

        let properties = unsafe {
            instance
                .instance
                .get_physical_device_properties(physical_device)
        };

        log::info!(
            "Selected GPU: {}",
            properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::debug!("Queue families: {:?}", queue_families);

        let device = Self::create_logical_device(
            &instance,
            physical_device,
            queue_families,
            surface.is_some(),
        )?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            instance,
            graphics_queue,
            present_queue,
            queue_families,
            properties,
        }))
    }

    fn required_extensions(presenting: bool) -> Vec<&'static CStr> {
        let mut extensions = Vec::new();
        if presenting {
            extensions.push(ash::khr::swapchain::NAME);
        }
        extensions
    }

    fn pick_physical_device(
        instance: &VulkanInstance,
        surface: Option<&Surface>,
    ) -> RenderResult<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            log::error!("No Vulkan-capable GPU found");
            return Err(RenderError::NoSuitableGpu);
        }

        for physical_device in devices {
            match Self::check_device_suitable(instance, physical_device, surface)? {
                Some(families) => return Ok((physical_device, families)),
                None => continue,
            }
        }

        Err(RenderError::NoSuitableGpu)
    }

    fn check_device_suitable(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
        surface: Option<&Surface>,
    ) -> RenderResult<Option<QueueFamilyIndices>> {
        let vk_instance = &instance.instance;

        let features = unsafe { vk_instance.get_physical_device_features(physical_device) };
        if features.sampler_anisotropy != vk::TRUE {
            return Ok(None);
        }

        let families =
            unsafe { vk_instance.get_physical_device_queue_family_properties(physical_device) };
        let indices = find_queue_families(&families, |index| match surface {
            Some(surface) => Ok(unsafe {
                surface.loader().get_physical_device_surface_support(
                    physical_device,
                    index,
                    surface.handle,
                )
            }?),
            None => Ok(true),
        })?;
        let Some(indices) = indices else {
            return Ok(None);
        };

        let available =
            unsafe { vk_instance.enumerate_device_extension_properties(physical_device) }?;
        let extensions_supported = Self::required_extensions(surface.is_some())
            .iter()
            .all(|&required| {
                available
                    .iter()
                    .any(|ext| ext.extension_name_as_c_str() == Ok(required))
            });
        if !extensions_supported {
            return Ok(None);
        }

        if let Some(surface) = surface {
            let formats = unsafe {
                surface
                    .loader()
                    .get_physical_device_surface_formats(physical_device, surface.handle)
            }?;
            let modes = unsafe {
                surface
                    .loader()
                    .get_physical_device_surface_present_modes(physical_device, surface.handle)
            }?;
            if formats.is_empty() || modes.is_empty() {
                return Ok(None);
            }
        }

        Ok(Some(indices))
    }

    fn create_logical_device(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
        families: QueueFamilyIndices,
        presenting: bool,
    ) -> RenderResult<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let mut extensions: Vec<_> = Self::required_extensions(presenting)
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        // MoltenVK exposes the portability subset and requires it enabled
        let available =
            unsafe { instance.instance.enumerate_device_extension_properties(physical_device) }?;
        if available
            .iter()
            .any(|ext| ext.extension_name_as_c_str() == Ok(PORTABILITY_SUBSET))
        {
            extensions.push(PORTABILITY_SUBSET.as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .instance
                .create_device(physical_device, &create_info, None)
        }?;

        Ok(device)
    }

    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// First format in `candidates` the device supports for `tiling`.
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> RenderResult<vk::Format> {
        pick_supported_format(candidates, tiling, features, |format| unsafe {
            self.instance
                .instance
                .get_physical_device_format_properties(self.physical_device, format)
        })
        .ok_or_else(|| RenderError::UnsupportedFormat(format!("{:?}", candidates)))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            // Allocator frees its memory blocks through the device
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn shared_family_is_preferred() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
        ];
        let found = find_queue_families(&families, |i| Ok(i != 1)).unwrap().unwrap();
        assert_eq!(found, QueueFamilyIndices { graphics: 2, present: 2 });
        assert!(found.is_shared());
        assert_eq!(found.unique(), vec![2]);
    }

    #[test]
    fn split_families_when_nothing_does_both() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let found = find_queue_families(&families, |i| Ok(i == 1)).unwrap().unwrap();
        assert_eq!(found, QueueFamilyIndices { graphics: 0, present: 1 });
        assert_eq!(found.unique(), vec![0, 1]);
    }

    #[test]
    fn empty_families_are_skipped() {
        let families = [family(vk::QueueFlags::GRAPHICS, 0)];
        assert!(find_queue_families(&families, |_| Ok(true)).unwrap().is_none());
    }

    #[test]
    fn no_presentation_means_unsuitable() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        assert!(find_queue_families(&families, |_| Ok(false)).unwrap().is_none());
    }

    #[test]
    fn depth_candidates_are_tried_in_order() {
        let candidates = [
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D32_SFLOAT,
            vk::Format::D24_UNORM_S8_UINT,
        ];
        let picked = pick_supported_format(
            &candidates,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |format| {
                let mut props = vk::FormatProperties::default();
                if format != vk::Format::D32_SFLOAT_S8_UINT {
                    props.optimal_tiling_features = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
                }
                props
            },
        );
        assert_eq!(picked, Some(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn linear_features_do_not_satisfy_optimal_tiling() {
        let picked = pick_supported_format(
            &[vk::Format::D32_SFLOAT],
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| vk::FormatProperties {
                linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                ..Default::default()
            },
        );
        assert_eq!(picked, None);
    }
}
