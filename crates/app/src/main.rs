//! Lantern - Main Entry Point
//!
//! Opens a window, renders the configured glTF model (or a cube) with the
//! deferred renderer, and orbits the camera with the mouse.

use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use lantern_core::{DEFAULT_LOG_FILTER, EngineConfig, LoggingContext, Timer};
use lantern_platform::Window;
use lantern_renderer::Renderer;
use lantern_resources::Model;
use lantern_scene::{Camera, DirectionalLight, OrbitController};

/// Radians per pixel of mouse drag.
const ORBIT_SENSITIVITY: f32 = 0.005;
/// Radians per second while idle.
const IDLE_SPIN: f32 = 0.2;

struct App {
    config: EngineConfig,
    // Dropped before the window it renders to.
    renderer: Option<Renderer>,
    window: Option<Window>,
    camera: Camera,
    orbit: OrbitController,
    light: DirectionalLight,
    timer: Timer,
    dragging: bool,
    last_cursor: Option<(f64, f64)>,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            camera: Camera::new(),
            orbit: OrbitController::default(),
            light: DirectionalLight::default(),
            timer: Timer::new(),
            dragging: false,
            last_cursor: None,
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(event_loop, &self.config.window)?;
        let mut renderer = Renderer::new(&window, &self.config)?;

        let model = match &self.config.assets.model {
            Some(path) => Model::load(path)
                .with_context(|| format!("loading model {}", path.display()))?,
            None => {
                info!("No model configured, rendering the built-in cube");
                Model::cube()
            }
        };
        renderer.upload_model(&model)?;

        // The model is normalized to [-1, 1]; frame its bounding sphere.
        self.orbit
            .frame_sphere(glam::Vec3::ZERO, 3.0_f32.sqrt(), self.camera.fov_y);
        self.camera.set_viewport(window.width(), window.height());

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    // Reported by main once the loop has returned.
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.fatal = Some(err);
        event_loop.exit();
    }

    fn redraw(&mut self) -> Result<()> {
        let delta = self.timer.delta_secs();
        if !self.dragging {
            self.orbit.orbit(delta * IDLE_SPIN, 0.0);
        }
        self.orbit.apply(&mut self.camera);

        if let Some(renderer) = self.renderer.as_mut() {
            renderer
                .render_frame(&self.camera, &self.light)
                .context("frame failed")?;
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match self.init(event_loop) {
            Ok(()) => info!("Initialization complete, entering main loop"),
            Err(e) => self.fail(event_loop, e.context("initialization failed")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
                self.camera.set_viewport(size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                self.dragging = state == ElementState::Pressed;
            }
            WindowEvent::CursorMoved { position, .. } => {
                if self.dragging
                    && let Some((x, y)) = self.last_cursor
                {
                    self.orbit.orbit(
                        -((position.x - x) as f32) * ORBIT_SENSITIVITY,
                        ((position.y - y) as f32) * ORBIT_SENSITIVITY,
                    );
                }
                self.last_cursor = Some((position.x, position.y));
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32 / 40.0,
                };
                self.orbit.zoom(0.9_f32.powf(lines));
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref()
            && !window.is_minimized()
        {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        info!(
            "Rendered {} frames, {:.1} fps average",
            self.timer.frames(),
            self.timer.average_fps()
        );
        self.renderer = None;
    }
}

fn run(config: EngineConfig) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    let (config, config_error) = match EngineConfig::load_or_default() {
        Ok(config) => (config, None),
        Err(e) => (EngineConfig::default(), Some(e)),
    };

    let filter = if config_error.is_some() {
        DEFAULT_LOG_FILTER
    } else {
        config.log.filter.as_str()
    };
    let _logging = LoggingContext::new(filter);

    if let Some(e) = config_error {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }
    if config.render.validation {
        warn!("Validation layers requested; expect reduced performance");
    }
    info!("Starting Lantern");

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
