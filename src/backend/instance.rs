// Vulkan Instance - entry point and window surface
//
// Responsibilities:
// - Instance creation with the surface extensions the window system needs
// - Optional validation layers + debug messenger routed into `log`
// - Surface creation from raw window handles

use crate::error::{RenderError, RenderResult};
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct VulkanInstance {
    pub instance: ash::Instance,
    pub surface_loader: ash::khr::surface::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub entry: Entry,
}

impl VulkanInstance {
    /// Create the Vulkan instance.
    ///
    /// `display` decides which surface extensions get enabled; pass `None`
    /// for headless use (transfers and tests, no presentation).
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        display: Option<RawDisplayHandle>,
    ) -> RenderResult<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }?;

        let mut extensions: Vec<*const c_char> = match display {
            Some(display) => ash_window::enumerate_required_extensions(display)?.to_vec(),
            None => Vec::new(),
        };

        let validation = enable_validation && Self::has_validation_layer(&entry)?;
        if enable_validation && !validation {
            log::warn!("Validation requested but {:?} is not installed", VALIDATION_LAYER);
        }
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let mut flags = vk::InstanceCreateFlags::empty();
        if cfg!(target_os = "macos") {
            extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
            extensions.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
            flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        Self::check_instance_extensions(&entry, &extensions)?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|e| RenderError::Config(format!("invalid application name: {}", e)))?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"mesh-renderer")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let layer_names = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names)
            .flags(flags);

        let instance = unsafe { entry.create_instance(&create_info, None) }?;

        let debug_utils = if validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        Ok(Arc::new(Self {
            instance,
            surface_loader,
            debug_utils,
            entry,
        }))
    }

    fn has_validation_layer(entry: &Entry) -> RenderResult<bool> {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }?;
        Ok(layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER)))
    }

    fn check_instance_extensions(entry: &Entry, required: &[*const c_char]) -> RenderResult<()> {
        let available = unsafe { entry.enumerate_instance_extension_properties(None) }?;

        for &name in required {
            let name = unsafe { CStr::from_ptr(name) };
            let supported = available
                .iter()
                .any(|ext| ext.extension_name_as_c_str() == Ok(name));
            if !supported {
                return Err(RenderError::MissingExtension(
                    name.to_string_lossy().into_owned(),
                ));
            }
        }

        Ok(())
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> RenderResult<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    /// Create a presentation surface for a window.
    pub fn create_surface(
        self: &Arc<Self>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> RenderResult<Surface> {
        let handle = unsafe {
            ash_window::create_surface(&self.entry, &self.instance, display, window, None)
        }?;

        Ok(Surface {
            handle,
            instance: self.clone(),
        })
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");

        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Window surface; destroyed before the instance it came from.
pub struct Surface {
    pub handle: vk::SurfaceKHR,
    instance: Arc<VulkanInstance>,
}

impl Surface {
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.instance.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.instance
                .surface_loader
                .destroy_surface(self.handle, None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
