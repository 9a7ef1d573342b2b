//! vkframe - colored triangle on the presentation and frame-sync layer.
//!
//! Loads `vkframe.toml` (or the path given as the first argument), opens a
//! window and draws one indexed triangle every frame. The window title shows
//! the frame rate. Esc closes the window, F11 toggles borderless fullscreen.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use tracing::{error, info, warn};

use vkframe_core::{AppConfig, Config, FpsCounter, WindowMode};
use vkframe_platform::{
    KeyCode, NativeWindow, Surface, SurfaceSource, WindowEvents, WindowOptions, WinitWindow,
};
use vkframe_renderer::{DrawSource, FrameOutcome, Renderer, RendererSettings};
use vkframe_rhi::buffer::{Buffer, BufferUsage};
use vkframe_rhi::device::DeviceContext;
use vkframe_rhi::pipeline::{CullMode, PipelineOptions};
use vkframe_rhi::shader::{Shader, ShaderStage};
use vkframe_rhi::vertex::TriangleVertex;
use vkframe_rhi::{FenceWait, GpuDevice, vk};

const DEFAULT_CONFIG: &str = "vkframe.toml";

const TRIANGLE: [TriangleVertex; 3] = [
    TriangleVertex::new(Vec3::new(0.0, 0.6, 0.0), Vec3::new(1.0, 0.0, 0.0)),
    TriangleVertex::new(Vec3::new(0.6, -0.6, 0.0), Vec3::new(0.0, 1.0, 0.0)),
    TriangleVertex::new(Vec3::new(-0.6, -0.6, 0.0), Vec3::new(0.0, 0.0, 1.0)),
];

const TRIANGLE_INDICES: [u32; 3] = [0, 1, 2];

/// Keeps the triangle undistorted at any aspect ratio. Y is flipped so +Y
/// points up on screen.
fn projection(width: u32, height: u32) -> Mat4 {
    let aspect = if height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    };
    let (x, y) = if aspect >= 1.0 {
        (aspect, 1.0)
    } else {
        (1.0, 1.0 / aspect)
    };
    Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0)) * Mat4::orthographic_rh(-x, x, -y, y, -1.0, 1.0)
}

// Fields drop in order: renderer, surface, then the device context.
struct App {
    renderer: Option<Renderer>,
    surface: Option<Surface>,
    context: Arc<DeviceContext>,
    config: AppConfig,
    fps: FpsCounter,
    mode: WindowMode,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: AppConfig, context: Arc<DeviceContext>) -> Self {
        let mode = config.window_mode;
        Self {
            renderer: None,
            surface: None,
            context,
            config,
            fps: FpsCounter::new(),
            mode,
            fatal: None,
        }
    }

    fn settings(&self) -> RendererSettings {
        RendererSettings {
            vsync: self.config.vsync,
            clear_color: self.config.clear_color,
            fence_wait: FenceWait::from_millis(self.config.fence_timeout_ms),
            pipeline_cache_path: self.config.pipeline_cache_path.clone(),
        }
    }

    fn setup_renderer(&mut self, surface: vk::SurfaceKHR, width: u32, height: u32) -> Result<()> {
        let device: Arc<dyn GpuDevice> = self.context.clone();
        let mut renderer =
            Renderer::initialize(device.clone(), surface, width, height, self.settings())
                .context("Failed to initialize renderer")?;

        let shaders = [
            (&self.config.vertex_shader, ShaderStage::Vertex),
            (&self.config.fragment_shader, ShaderStage::Fragment),
        ]
        .into_iter()
        .map(|(path, stage)| Shader::from_spirv_file(device.clone(), path, stage, "main"))
        .collect::<Result<Vec<_>, _>>();

        match shaders {
            Ok(shaders) => {
                let options = PipelineOptions {
                    cull_mode: CullMode::None,
                    ..PipelineOptions::default()
                };
                renderer
                    .build_pipelines(shaders, TriangleVertex::input_layout(), options)
                    .context("Failed to build triangle pipeline")?;
            }
            Err(e) => {
                // The slots keep recording the clear-only pass.
                warn!("Shaders unavailable, clearing only: {}", e);
            }
        }

        let vertices = Buffer::with_data(
            device.clone(),
            BufferUsage::Vertex,
            bytemuck::cast_slice(&TRIANGLE),
        )?;
        let indices = Buffer::with_data(
            device.clone(),
            BufferUsage::Index,
            bytemuck::cast_slice(&TRIANGLE_INDICES),
        )?;
        renderer.set_draw(DrawSource::new(vertices, indices)?)?;

        let transform = projection(width, height);
        let uniform = Buffer::with_data(device, BufferUsage::Uniform, bytemuck::bytes_of(&transform))?;
        renderer.bind_uniform_buffer(uniform)?;

        self.renderer = Some(renderer);
        Ok(())
    }

    fn fail(&mut self, window: &WinitWindow, error: anyhow::Error) {
        error!("{:#}", error);
        self.fatal = Some(error);
        window.close();
    }

    fn shutdown(&mut self) {
        if let Some(renderer) = self.renderer.as_ref()
            && let Err(e) = renderer.save_pipeline_cache()
        {
            warn!("Failed to save pipeline cache: {}", e);
        }
        self.renderer = None;
        self.surface = None;
    }
}

impl WindowEvents<WinitWindow> for App {
    fn created(&mut self, window: &WinitWindow) -> vkframe_core::Result<()> {
        let instance = self.context.instance();
        let surface = Surface::new(instance.entry(), instance.handle(), window)?;
        let handle = surface.handle();
        self.surface = Some(surface);

        let (width, height) = window.current_size();
        if let Err(e) = self.setup_renderer(handle, width, height) {
            self.fail(window, e);
            return Ok(());
        }

        info!("Initialization complete, entering main loop");
        Ok(())
    }

    fn resized(&mut self, window: &WinitWindow, width: u32, height: u32) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        info!("Window resized to {}x{}", width, height);

        let result = renderer.resize_resources(width, height).and_then(|()| {
            if renderer.is_suspended() {
                return Ok(());
            }
            let extent = renderer.extent();
            let transform = projection(extent.width, extent.height);
            renderer.update_uniform_buffer(bytemuck::bytes_of(&transform))
        });
        if let Err(e) = result {
            self.fail(window, anyhow::Error::new(e).context("Resize failed"));
        }
    }

    fn key(&mut self, window: &WinitWindow, key: KeyCode, pressed: bool) {
        if !pressed {
            return;
        }
        match key {
            KeyCode::Escape => window.close(),
            KeyCode::F11 => {
                self.mode = match self.mode {
                    WindowMode::Windowed => WindowMode::Borderless,
                    _ => WindowMode::Windowed,
                };
                window.set_mode(self.mode);
            }
            _ => {}
        }
    }

    fn redraw(&mut self, window: &WinitWindow) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match renderer.render() {
            Ok(FrameOutcome::Presented { .. }) => {
                if let Some(fps) = self.fps.frame() {
                    window.set_title(&format!("{} - {:.0} FPS", self.config.application_name, fps));
                }
            }
            Ok(FrameOutcome::Skipped) => {}
            Err(e) => self.fail(window, anyhow::Error::new(e).context("Frame failed")),
        }
    }

    fn exiting(&mut self, _window: &WinitWindow) {
        self.shutdown();
    }
}

fn main() -> Result<()> {
    vkframe_core::init_logging();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = AppConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    info!("Starting {}", config.application_name);

    let mut queues = vk::QueueFlags::empty();
    if config.request_compute_queue {
        queues |= vk::QueueFlags::COMPUTE;
    }
    if config.request_transfer_queue {
        queues |= vk::QueueFlags::TRANSFER;
    }
    let context = DeviceContext::initialize(
        &config.application_name,
        &config.engine_name,
        config.validation,
        queues,
    )
    .context("Failed to initialize Vulkan")?;

    let options = WindowOptions {
        title: config.application_name.clone(),
        width: config.width,
        height: config.height,
        mode: config.window_mode,
        resizable: true,
    };

    let mut app = App::new(config, context);
    let result = WinitWindow::run_event_loop(options, &mut app);

    // Covers a loop that stopped without reaching `exiting`.
    app.shutdown();

    result?;
    match app.fatal.take() {
        Some(e) => Err(e),
        None => {
            info!("Shut down cleanly");
            Ok(())
        }
    }
}
