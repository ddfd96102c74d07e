//! # Renderer Configuration
//!
//! Configuration structures consumed once by the renderer's initialisation
//! phase. Nothing here is read again after `Renderer::new` returns.
//!
//! ## Configuration Categories
//!
//! - **Window**: title and initial size of the presentation surface
//! - **Shaders**: SPIR-V locations for the single graphics pipeline
//! - **Frame pacing**: frames in flight and the bounds on blocking waits

use serde::{Serialize, Deserialize};
use std::path::Path;

use crate::config::Config;

/// Largest frames-in-flight value accepted by the builder
pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 8;

/// One second, in nanoseconds
const ONE_SECOND_NS: u64 = 1_000_000_000;

/// # Shader Configuration
///
/// Defines shader loading parameters and paths for the rendering system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Create shader config with automatic path resolution
    ///
    /// Tries the common shader output locations so the demo can be started
    /// from the workspace root or from its own crate directory.
    pub fn with_path_resolution(base_vertex: &str, base_fragment: &str) -> Self {
        let shader_dirs = [
            "target/shaders/",
            "../target/shaders/",
            "shaders/",
            "resources/shaders/",
            "./",
        ];

        let find = |file: &str| {
            shader_dirs
                .iter()
                .map(|dir| format!("{dir}{file}"))
                .find(|candidate| Path::new(candidate).exists())
                .unwrap_or_else(|| format!("target/shaders/{file}"))
        };

        Self {
            vertex_shader_path: find(base_vertex),
            fragment_shader_path: find(base_fragment),
        }
    }

    /// Read both SPIR-V blobs
    pub fn load_bytes(&self) -> std::io::Result<(Vec<u8>, Vec<u8>)> {
        Ok((
            std::fs::read(&self.vertex_shader_path)?,
            std::fs::read(&self.fragment_shader_path)?,
        ))
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution("vert.spv", "frag.spv")
    }
}

/// Window parameters for the presentation surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Frame Engine".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// # Renderer Configuration
///
/// Application metadata, frame pacing and debug features for the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Maximum frames in flight; clamped to the image count and
    /// [`MAX_FRAMES_IN_FLIGHT_LIMIT`] at startup
    pub max_frames_in_flight: usize,
    /// Upper bound on waiting for a presentable image, in nanoseconds
    pub acquire_timeout_ns: u64,
    /// Upper bound on waiting for a frame slot's fence, in nanoseconds
    pub fence_timeout_ns: u64,
    /// Background clear color [R, G, B, A] (0.0-1.0 range)
    pub clear_color: [f32; 4],
    /// Whether to enable Vulkan validation layers (None = debug builds only)
    pub enable_validation: Option<bool>,
    /// Presentation window
    pub window: WindowConfig,
    /// Shader configuration
    pub shaders: ShaderConfig,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            max_frames_in_flight: 2,
            acquire_timeout_ns: ONE_SECOND_NS,
            fence_timeout_ns: ONE_SECOND_NS,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            enable_validation: None,
            window: WindowConfig::default(),
            shaders: ShaderConfig::default(),
        }
    }

    /// Set window parameters
    pub fn with_window(mut self, title: impl Into<String>, width: u32, height: u32) -> Self {
        self.window = WindowConfig {
            title: title.into(),
            width,
            height,
        };
        self
    }

    /// Set shader configuration
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Set maximum frames in flight
    pub fn with_max_frames_in_flight(mut self, max_frames: usize) -> Self {
        self.max_frames_in_flight = max_frames.clamp(1, MAX_FRAMES_IN_FLIGHT_LIMIT);
        self
    }

    /// Bound both blocking waits of the frame loop
    ///
    /// `u64::MAX` waits forever.
    pub fn with_timeouts(mut self, acquire_timeout_ns: u64, fence_timeout_ns: u64) -> Self {
        self.acquire_timeout_ns = acquire_timeout_ns;
        self.fence_timeout_ns = fence_timeout_ns;
        self
    }

    /// Set background clear color [R, G, B, A] (0.0-1.0 range)
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Enable or disable Vulkan validation layers
    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = Some(enable);
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Frame Engine Application")
    }
}

impl Config for RendererConfig {}
