//! Per-object GPU state owned by the scene

use crate::foundation::math::Mat4;
use crate::render::frame::upload::GpuBuffer;

/// A loaded mesh and its placement
///
/// The transform is the only field callers change after loading. Both
/// buffers live in device-local memory and are never written again.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    /// Vertex stream
    pub vertex_buffer: GpuBuffer,
    /// 32-bit index stream
    pub index_buffer: GpuBuffer,
    /// Vertices in the vertex stream
    pub vertex_count: u32,
    /// Indices drawn per frame
    pub index_count: u32,
    /// Model transform pushed with each draw
    pub transform: Mat4,
    /// Material or texture identifier; carried, never interpreted
    pub material: Option<u32>,
}

impl ObjectRecord {
    /// Create a record with an identity transform
    pub fn new(vertex_buffer: GpuBuffer, index_buffer: GpuBuffer, material: Option<u32>) -> Self {
        Self {
            vertex_count: vertex_buffer.element_count,
            index_count: index_buffer.element_count,
            vertex_buffer,
            index_buffer,
            transform: Mat4::identity(),
            material,
        }
    }
}
