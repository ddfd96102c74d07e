//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the engine:
//! - Math types and the per-frame view/projection record
//! - Logging utilities

pub mod math;
pub mod logging;
