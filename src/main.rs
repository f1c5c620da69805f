// =============================================================================
// MESH RENDERER - demo driver
// =============================================================================
//
// Opens a window, loads the configured model and spins it about Y.
//
// FRAME FLOW:
// 1. Advance the model's rotation
// 2. Renderer::draw_frame (wait slot -> acquire -> record -> submit -> present)
// 3. On a stale swapchain, rebuild it at the window's current size
//
// Only this file decides between retrying and giving up, based on
// `RenderError::kind()`.
//
// =============================================================================

use anyhow::{Context, Result};
use glam::Mat4;
use mesh_renderer::{Config, ErrorKind, ModelHandle, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

/// Degrees per second the demo model turns.
const SPIN_DEGREES_PER_SECOND: f32 = 10.0;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config)?;
    log::info!("Starting mesh renderer");
    log::info!(
        "Window: {}x{}, present mode: {}",
        config.window.width,
        config.window.height,
        config.graphics.prefer_present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging; with `debug.log_to_file` output goes to the log file
/// instead of stderr.
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    if config.debug.log_to_file {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
            .with_context(|| format!("Failed to open log file {}", config.debug.log_file))?;
        writeln!(file, "=== Mesh Renderer Log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
        writeln!(file)?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer (and its surface) must go
/// before the window it was created from.
struct App {
    config: Config,
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    model: Option<ModelHandle>,

    /// Set when the swapchain must be rebuilt before the next frame.
    needs_resize: bool,
    started: Instant,
    /// First fatal error, reported from `main`.
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            model: None,
            needs_resize: false,
            started: Instant::now(),
            failure: None,
        }
    }

    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        let display = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();
        let size = window.inner_size();

        let mut renderer =
            Renderer::init(self.config.clone(), display, handle, size.width, size.height)
                .context("Failed to initialize renderer")?;

        if let Some(file) = self.config.assets.model.as_deref() {
            // A broken asset leaves an empty scene rather than no renderer
            match renderer.create_mesh_model(file) {
                Ok(model) => self.model = Some(model),
                Err(e) if e.kind() == ErrorKind::Asset => {
                    log::error!("Failed to load model {}: {}", file, e);
                }
                Err(e) => return Err(e).context("Failed to create model"),
            }
        } else {
            log::warn!("No assets.model configured, rendering an empty scene");
        }

        self.renderer = Some(renderer);
        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn render_frame(&mut self) -> Result<()> {
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return Ok(());
        };

        if self.needs_resize {
            let size = window.inner_size();
            renderer.recreate_swapchain(size.width, size.height)?;
            self.needs_resize = false;
        }

        if let Some(model) = self.model {
            let angle = (self.started.elapsed().as_secs_f32() * SPIN_DEGREES_PER_SECOND)
                .rem_euclid(360.0)
                .to_radians();
            renderer.update_model(model, Mat4::from_rotation_y(angle))?;
        }

        match renderer.draw_frame() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::SwapchainStale => {
                log::debug!("Swapchain stale, rebuilding before next frame");
                self.needs_resize = true;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:?}", error);
        if self.failure.is_none() {
            self.failure = Some(error);
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        if let Err(e) = self.init_renderer(&window) {
            self.fail(event_loop, e);
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(renderer) = self.renderer.take() {
                    renderer.shutdown();
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.needs_resize = true;
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render_frame() {
                    self.fail(event_loop, e);
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
