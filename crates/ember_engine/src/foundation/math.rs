//! Math utilities and types
//!
//! Provides the nalgebra aliases used by the renderer and the euler-angle
//! transform attached to every game object.

pub use nalgebra::{Matrix3, Matrix4, Rotation3, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Translation, scale and rotation of a game object
///
/// Rotation is stored as Tait-Bryan angles (radians) applied in Y, X, Z order,
/// so the model matrix is `translate * Ry * Rx * Rz * scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Position in world space
    pub translation: Vec3,
    /// Per-axis scale factors
    pub scale: Vec3,
    /// Rotation angles around x, y and z in radians
    pub rotation: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::zeros(),
            scale: Vec3::new(1.0, 1.0, 1.0),
            rotation: Vec3::zeros(),
        }
    }
}

impl Transform {
    /// Create a transform with only a translation
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Default::default()
        }
    }

    /// Rotation part of the transform (Ry * Rx * Rz)
    pub fn rotation_matrix(&self) -> Rotation3<f32> {
        let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), self.rotation.y);
        let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), self.rotation.x);
        let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), self.rotation.z);
        ry * rx * rz
    }

    /// Model matrix: translate * Ry * Rx * Rz * scale
    pub fn matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.translation)
            * self.rotation_matrix().to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }

    /// Matrix for transforming normals: rotation * inverse scale
    ///
    /// Scale components must be non-zero.
    pub fn normal_matrix(&self) -> Mat3 {
        let inverse_scale = Mat3::from_diagonal(&Vec3::new(
            1.0 / self.scale.x,
            1.0 / self.scale.y,
            1.0 / self.scale.z,
        ));
        self.rotation_matrix().into_inner() * inverse_scale
    }
}

/// Expand a 3x3 matrix into the upper-left block of a 4x4 matrix
///
/// Shaders receive the normal matrix as a `mat4` to keep push constant
/// columns 16-byte aligned.
pub fn mat3_to_mat4(m: &Mat3) -> Mat4 {
    m.to_homogeneous()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_identity_transform() {
        let transform = Transform::default();
        assert_relative_eq!(transform.matrix(), Mat4::identity());
        assert_relative_eq!(transform.normal_matrix(), Mat3::identity());
    }

    #[test]
    fn test_translation_lands_in_last_column() {
        let transform = Transform::from_translation(Vec3::new(1.0, -2.0, 3.0));
        let m = transform.matrix();
        assert_relative_eq!(m[(0, 3)], 1.0);
        assert_relative_eq!(m[(1, 3)], -2.0);
        assert_relative_eq!(m[(2, 3)], 3.0);
        assert_relative_eq!(m[(3, 3)], 1.0);
    }

    #[test]
    fn test_yaw_rotates_x_towards_negative_z() {
        let transform = Transform {
            rotation: Vec3::new(0.0, FRAC_PI_2, 0.0),
            ..Default::default()
        };
        let rotated = transform.matrix().transform_vector(&Vec3::x());
        assert_relative_eq!(rotated, Vec3::new(0.0, 0.0, -1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_rotation_order_is_y_then_x_then_z() {
        let transform = Transform {
            rotation: Vec3::new(0.3, 0.7, -0.4),
            ..Default::default()
        };
        // Third column of Ry*Rx*Rz is (cos x sin y, -sin x, cos x cos y)
        let m = transform.matrix();
        let (sx, cx) = 0.3f32.sin_cos();
        let (sy, cy) = 0.7f32.sin_cos();
        assert_relative_eq!(m[(0, 2)], cx * sy, epsilon = 1e-6);
        assert_relative_eq!(m[(1, 2)], -sx, epsilon = 1e-6);
        assert_relative_eq!(m[(2, 2)], cx * cy, epsilon = 1e-6);
    }

    #[test]
    fn test_normal_matrix_inverts_scale() {
        let transform = Transform {
            scale: Vec3::new(2.0, 4.0, 0.5),
            ..Default::default()
        };
        let n = transform.normal_matrix();
        assert_relative_eq!(n[(0, 0)], 0.5);
        assert_relative_eq!(n[(1, 1)], 0.25);
        assert_relative_eq!(n[(2, 2)], 2.0);
    }

    #[test]
    fn test_mat3_to_mat4_keeps_upper_block() {
        let m = Mat3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0);
        let expanded = mat3_to_mat4(&m);
        assert_relative_eq!(expanded[(1, 2)], 6.0);
        assert_relative_eq!(expanded[(3, 3)], 1.0);
        assert_relative_eq!(expanded[(0, 3)], 0.0);
    }
}
