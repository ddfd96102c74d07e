//! Quad demo application
//!
//! Draws two colored quads through the frame pipeline and spins the first
//! one a little every tick. Escape closes the window.

use frame_engine::config::{Config, ConfigError};
use frame_engine::core::RendererConfig;
use frame_engine::foundation::logging;
use frame_engine::foundation::math::{rotation_z, Mat4, Vec3};
use frame_engine::render::backends::vulkan::{VulkanBackend, Window, WindowError};
use frame_engine::render::{
    FrameStatus, GpuBackend, GpuError, ObjectId, PipelineDesc, RenderError, Renderer, Vertex,
};
use glfw::{Action, Key, WindowEvent};
use thiserror::Error;

const CONFIG_PATH: &str = "quad_app.toml";
const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];
/// Radians added to the spinning quad per tick
const SPIN_PER_TICK: f32 = 0.01;

#[derive(Error, Debug)]
enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    #[error("Failed to read shaders: {0}")]
    Shaders(#[from] std::io::Error),

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),
}

/// Axis-aligned quad centred on the origin, corners red/green/blue/yellow
fn quad(half_width: f32, half_height: f32) -> [Vertex; 4] {
    [
        Vertex::new([-half_width, half_height, 0.0], [1.0, 0.0, 0.0]),
        Vertex::new([-half_width, -half_height, 0.0], [0.0, 1.0, 0.0]),
        Vertex::new([half_width, -half_height, 0.0], [0.0, 0.0, 1.0]),
        Vertex::new([half_width, half_height, 0.0], [1.0, 1.0, 0.0]),
    ]
}

struct QuadApp {
    // Renderer drops before the window that owns the surface
    renderer: Renderer<VulkanBackend>,
    window: Window,
    spinning: ObjectId,
    offset: Mat4,
    angle: f32,
}

impl QuadApp {
    fn new(config: &RendererConfig) -> Result<Self, AppError> {
        let mut window = Window::new(&config.window)?;
        let mut backend = VulkanBackend::new(&mut window, config)?;

        let (vertex_spirv, fragment_spirv) = config.shaders.load_bytes()?;
        let pipeline = backend.create_pipeline(&PipelineDesc {
            vertex_spirv: &vertex_spirv,
            fragment_spirv: &fragment_spirv,
        })?;

        let mut renderer = Renderer::new(backend, config, pipeline)?;

        let spinning = renderer.load_mesh(&quad(0.4, 0.4), &QUAD_INDICES)?;
        let offset = Mat4::new_translation(&Vec3::new(-0.5, 0.0, -0.5));
        renderer.update_object_transform(spinning, offset)?;

        let still = renderer.load_mesh(&quad(0.25, 0.6), &QUAD_INDICES)?;
        renderer.update_object_transform(still, Mat4::new_translation(&Vec3::new(0.5, 0.0, 0.0)))?;

        log::info!("Loaded {} quads", renderer.object_count());

        Ok(Self {
            renderer,
            window,
            spinning,
            offset,
            angle: 0.0,
        })
    }

    fn run(&mut self) -> Result<(), AppError> {
        while !self.window.should_close() {
            for event in self.window.poll_events() {
                if let WindowEvent::Key(Key::Escape, _, Action::Press, _) = event {
                    self.window.set_should_close(true);
                }
            }

            self.angle += SPIN_PER_TICK;
            self.renderer
                .update_object_transform(self.spinning, self.offset * rotation_z(self.angle))?;

            if let FrameStatus::Dropped(reason) = self.renderer.render_frame()? {
                log::debug!("Frame dropped: {reason:?}");
            }
        }

        let stats = self.renderer.stats();
        log::info!(
            "Rendered {} frames, dropped {}, {} blocking waits",
            stats.frames_rendered,
            stats.frames_dropped,
            stats.blocking_waits
        );
        self.renderer.wait_idle()?;
        Ok(())
    }
}

fn main() {
    logging::init();

    let result = RendererConfig::load_or_default(CONFIG_PATH)
        .map_err(AppError::from)
        .and_then(|config| QuadApp::new(&config))
        .and_then(|mut app| app.run());

    if let Err(error) = result {
        log::error!("{error}");
        std::process::exit(1);
    }
}
