//! Backend implementations for the render module
//!
//! Vulkan drives real hardware; the mock backend stands in for it in tests.

/// Scripted in-memory backend used by the test suite
#[cfg(test)]
pub mod mock;

/// Vulkan rendering backend implementation
pub mod vulkan;
