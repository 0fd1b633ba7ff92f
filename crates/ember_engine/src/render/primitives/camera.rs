//! # 3D Camera
//!
//! Projection and view matrices for Vulkan clip space: Y points down and
//! depth runs from 0 at the near plane to 1 at the far plane. The view space
//! looks down +Z.

use crate::foundation::math::{Mat4, Vec3};

/// Camera holding a projection, a view and the inverse of the view
#[derive(Debug, Clone)]
pub struct Camera {
    projection: Mat4,
    view: Mat4,
    inverse_view: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            projection: Mat4::identity(),
            view: Mat4::identity(),
            inverse_view: Mat4::identity(),
        }
    }
}

impl Camera {
    /// Create a camera with identity matrices
    pub fn new() -> Self {
        Self::default()
    }

    /// Orthographic projection of the given view volume
    pub fn set_orthographic_projection(&mut self, left: f32, right: f32, top: f32, bottom: f32, near: f32, far: f32) {
        let mut m = Mat4::identity();
        m[(0, 0)] = 2.0 / (right - left);
        m[(1, 1)] = 2.0 / (bottom - top);
        m[(2, 2)] = 1.0 / (far - near);
        m[(0, 3)] = -(right + left) / (right - left);
        m[(1, 3)] = -(bottom + top) / (bottom - top);
        m[(2, 3)] = -near / (far - near);
        self.projection = m;
    }

    /// Perspective projection
    ///
    /// `fovy` is the vertical field of view in radians, `aspect` is width over height.
    pub fn set_perspective_projection(&mut self, fovy: f32, aspect: f32, near: f32, far: f32) {
        debug_assert!(aspect.abs() > f32::EPSILON, "aspect ratio must be non-zero");
        let tan_half_fovy = (fovy / 2.0).tan();
        let mut m = Mat4::zeros();
        m[(0, 0)] = 1.0 / (aspect * tan_half_fovy);
        m[(1, 1)] = 1.0 / tan_half_fovy;
        m[(2, 2)] = far / (far - near);
        m[(3, 2)] = 1.0;
        m[(2, 3)] = -(far * near) / (far - near);
        self.projection = m;
    }

    /// Look from `position` along `direction`
    pub fn set_view_direction(&mut self, position: Vec3, direction: Vec3, up: Vec3) {
        let w = direction.normalize();
        let u = w.cross(&up).normalize();
        let v = w.cross(&u);
        self.set_basis(position, u, v, w);
    }

    /// Look from `position` towards `target`
    pub fn set_view_target(&mut self, position: Vec3, target: Vec3, up: Vec3) {
        self.set_view_direction(position, target - position, up);
    }

    /// Orientation from Tait-Bryan angles applied in Y, X, Z order
    pub fn set_view_yxz(&mut self, position: Vec3, rotation: Vec3) {
        let (s1, c1) = rotation.y.sin_cos();
        let (s2, c2) = rotation.x.sin_cos();
        let (s3, c3) = rotation.z.sin_cos();
        let u = Vec3::new(c1 * c3 + s1 * s2 * s3, c2 * s3, c1 * s2 * s3 - c3 * s1);
        let v = Vec3::new(c3 * s1 * s2 - c1 * s3, c2 * c3, c1 * c3 * s2 + s1 * s3);
        let w = Vec3::new(c2 * s1, -s2, c1 * c2);
        self.set_basis(position, u, v, w);
    }

    fn set_basis(&mut self, position: Vec3, u: Vec3, v: Vec3, w: Vec3) {
        let mut view = Mat4::identity();
        let mut inverse = Mat4::identity();
        for (row, axis) in [u, v, w].iter().enumerate() {
            for col in 0..3 {
                view[(row, col)] = axis[col];
                inverse[(col, row)] = axis[col];
            }
            view[(row, 3)] = -axis.dot(&position);
        }
        for i in 0..3 {
            inverse[(i, 3)] = position[i];
        }
        self.view = view;
        self.inverse_view = inverse;
    }

    /// Projection matrix
    pub fn projection(&self) -> &Mat4 {
        &self.projection
    }

    /// World to view matrix
    pub fn view(&self) -> &Mat4 {
        &self.view
    }

    /// View to world matrix
    pub fn inverse_view(&self) -> &Mat4 {
        &self.inverse_view
    }

    /// World space position of the camera
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.inverse_view[(0, 3)], self.inverse_view[(1, 3)], self.inverse_view[(2, 3)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;

    #[test]
    fn test_perspective_depth_range() {
        let mut camera = Camera::new();
        camera.set_perspective_projection(50f32.to_radians(), 1.5, 0.1, 100.0);

        let near = camera.projection() * Vec4::new(0.0, 0.0, 0.1, 1.0);
        let far = camera.projection() * Vec4::new(0.0, 0.0, 100.0, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-6);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_orthographic_maps_volume_to_clip_space() {
        let mut camera = Camera::new();
        camera.set_orthographic_projection(-2.0, 2.0, -1.0, 1.0, 0.0, 10.0);

        let corner = camera.projection() * Vec4::new(2.0, 1.0, 10.0, 1.0);
        assert_relative_eq!(corner.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(corner.y, 1.0, epsilon = 1e-6);
        assert_relative_eq!(corner.z, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_view_inverse_round_trip() {
        let mut camera = Camera::new();
        camera.set_view_yxz(Vec3::new(1.0, -2.0, -3.0), Vec3::new(0.3, -0.7, 0.1));

        let product = camera.view() * camera.inverse_view();
        assert_relative_eq!(product, Mat4::identity(), epsilon = 1e-5);
        assert_relative_eq!(camera.position(), Vec3::new(1.0, -2.0, -3.0), epsilon = 1e-6);
    }

    #[test]
    fn test_view_target_puts_target_on_forward_axis() {
        let mut camera = Camera::new();
        let target = Vec3::new(0.0, 0.0, 5.0);
        camera.set_view_target(Vec3::zeros(), target, Vec3::new(0.0, -1.0, 0.0));

        let in_view = camera.view() * Vec4::new(target.x, target.y, target.z, 1.0);
        assert_relative_eq!(in_view.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(in_view.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(in_view.z, 5.0, epsilon = 1e-6);
    }
}
