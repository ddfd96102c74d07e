//! Math utilities and types
//!
//! Provides the matrix types used by the frame pipeline and the per-frame
//! view/projection record that is uploaded to the uniform buffers.

pub use nalgebra::{Matrix4, Point3, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Column-major matrix layout as consumed by GLSL (`mat4`)
pub type RawMat4 = [[f32; 4]; 4];

/// Convert a matrix into the column-major array layout shaders expect
pub fn to_raw(matrix: &Mat4) -> RawMat4 {
    let mut raw = [[0.0; 4]; 4];
    for (column, out) in raw.iter_mut().enumerate() {
        for (row, value) in out.iter_mut().enumerate() {
            *value = matrix[(row, column)];
        }
    }
    raw
}

/// Convert a column-major array back into a matrix
pub fn from_raw(raw: &RawMat4) -> Mat4 {
    Mat4::from_fn(|row, column| raw[column][row])
}

/// Rotation about the Z axis by `angle` radians
pub fn rotation_z(angle: f32) -> Mat4 {
    Mat4::new_rotation(Vec3::new(0.0, 0.0, angle))
}

/// Per-frame uniform record: projection followed by view
///
/// Layout matches the `std140` uniform block declared in `shader.vert`:
/// two `mat4` members, 128 bytes total.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ViewProjection {
    /// Projection matrix (Vulkan clip space, Y pointing down)
    pub projection: RawMat4,
    /// View matrix
    pub view: RawMat4,
}

impl ViewProjection {
    /// Vertical field of view of the default camera, in degrees
    pub const DEFAULT_FOV_DEGREES: f32 = 45.0;
    /// Near clip plane of the default camera
    pub const DEFAULT_NEAR: f32 = 0.01;
    /// Far clip plane of the default camera
    pub const DEFAULT_FAR: f32 = 100.0;

    /// Build a record from matrices
    pub fn new(projection: &Mat4, view: &Mat4) -> Self {
        Self {
            projection: to_raw(projection),
            view: to_raw(view),
        }
    }

    /// Fixed camera used by the reference scene
    ///
    /// Perspective projection sized to the surface extent, eye at (0, 0, 2)
    /// looking at the origin. The projection's Y axis is flipped because
    /// Vulkan clip space points Y down.
    pub fn for_extent(width: u32, height: u32) -> Self {
        let aspect = if height == 0 {
            1.0
        } else {
            width as f32 / height as f32
        };

        let mut projection = Mat4::new_perspective(
            aspect,
            Self::DEFAULT_FOV_DEGREES.to_radians(),
            Self::DEFAULT_NEAR,
            Self::DEFAULT_FAR,
        );
        projection[(1, 1)] *= -1.0;

        let view = Mat4::look_at_rh(
            &Point3::new(0.0, 0.0, 2.0),
            &Point3::origin(),
            &Vec3::y(),
        );

        Self::new(&projection, &view)
    }

    /// Raw bytes as written into the uniform buffer
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl Default for ViewProjection {
    fn default() -> Self {
        let identity = to_raw(&Mat4::identity());
        Self {
            projection: identity,
            view: identity,
        }
    }
}
