// View/projection uniform block shared by every draw in a frame

use crate::config::CameraConfig;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Matches `layout(set = 0, binding = 0) uniform UboViewProjection` in mesh.vert.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UboViewProjection {
    pub projection: Mat4,
    pub view: Mat4,
}

impl UboViewProjection {
    /// Right-handed perspective with Vulkan's downward clip-space Y corrected.
    pub fn perspective(fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        let mut projection = Mat4::perspective_rh(fov_y_radians, aspect, near, far);
        projection.y_axis.y *= -1.0;
        projection
    }

    pub fn from_camera(camera: &CameraConfig, aspect: f32) -> Self {
        Self {
            projection: Self::perspective(
                camera.fov_y_degrees.to_radians(),
                aspect,
                camera.near,
                camera.far,
            ),
            view: Mat4::look_at_rh(
                Vec3::from(camera.eye),
                Vec3::from(camera.target),
                Vec3::from(camera.up),
            ),
        }
    }

    /// Rebuild the projection for a new aspect ratio, keeping the view.
    pub fn with_aspect(&self, camera: &CameraConfig, aspect: f32) -> Self {
        Self {
            projection: Self::perspective(
                camera.fov_y_degrees.to_radians(),
                aspect,
                camera.near,
                camera.far,
            ),
            view: self.view,
        }
    }
}

pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    if height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_is_two_matrices() {
        assert_eq!(std::mem::size_of::<UboViewProjection>(), 128);
        let ubo = UboViewProjection::zeroed();
        assert_eq!(bytemuck::bytes_of(&ubo).len(), 128);
    }

    #[test]
    fn projection_flips_y() {
        let flipped = UboViewProjection::perspective(45f32.to_radians(), 1.0, 0.1, 100.0);
        let plain = Mat4::perspective_rh(45f32.to_radians(), 1.0, 0.1, 100.0);
        assert_eq!(flipped.y_axis.y, -plain.y_axis.y);
        assert_eq!(flipped.x_axis.x, plain.x_axis.x);
    }

    #[test]
    fn default_camera_looks_at_target() {
        let ubo = UboViewProjection::from_camera(&CameraConfig::default(), 16.0 / 9.0);
        // The eye sits at the view-space origin
        let eye = ubo.view.transform_point3(Vec3::new(10.0, 0.0, 20.0));
        assert!(eye.length() < 1e-4);
        // The target is straight ahead (-Z)
        let target = ubo.view.transform_point3(Vec3::new(0.0, 0.0, -2.0));
        assert!(target.x.abs() < 1e-4 && target.y.abs() < 1e-4);
        assert!(target.z < 0.0);
    }

    #[test]
    fn zero_height_does_not_divide_by_zero() {
        assert_eq!(aspect_ratio(800, 0), 1.0);
        assert_eq!(aspect_ratio(800, 400), 2.0);
    }
}
