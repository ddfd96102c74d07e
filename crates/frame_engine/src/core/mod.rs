//! # Core Engine Module
//!
//! Shared configuration types consumed by the renderer and the demo
//! application.

pub mod config;

pub use crate::foundation;

// Re-export commonly used config types
pub use config::{
    RendererConfig,
    ShaderConfig,
    WindowConfig,
    MAX_FRAMES_IN_FLIGHT_LIMIT,
};
pub use crate::config::{Config, ConfigError};
