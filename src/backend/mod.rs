// Backend module - Vulkan abstraction layer
//
// Design: thin RAII wrappers around ash. Every wrapper holds an
// `Arc<VulkanDevice>` and destroys its handles in `Drop`.

pub mod buffer;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod transfer;

pub use device::VulkanDevice;
pub use instance::VulkanInstance;
pub use swapchain::Swapchain;
