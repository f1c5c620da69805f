//! Vulkan mesh renderer.
//!
//! Loads textured OBJ models, uploads them to device-local memory and draws
//! them with a small ring of in-flight frames.
//!
//! ```no_run
//! # fn run(display: raw_window_handle::RawDisplayHandle,
//! #        window: raw_window_handle::RawWindowHandle) -> mesh_renderer::RenderResult<()> {
//! use mesh_renderer::{Config, Renderer};
//!
//! let mut renderer = Renderer::init(Config::default(), display, window, 1366, 768)?;
//! let plane = renderer.create_mesh_model("FA18f/FA-18F.obj")?;
//! renderer.update_model(plane, glam::Mat4::from_rotation_y(0.3))?;
//! renderer.draw_frame()?;
//! renderer.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod model;
pub mod registry;
pub mod renderer;
pub mod texture;
pub mod uniform;

pub use config::Config;
pub use error::{ErrorKind, RenderError, RenderResult};
pub use frame::MAX_FRAMES_IN_FLIGHT;
pub use registry::{MeshHandle, ModelHandle, TextureHandle};
pub use renderer::Renderer;
