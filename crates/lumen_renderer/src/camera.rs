//! Pinhole camera for primary ray generation.

use lumen_core::Scene;
use lumen_math::{Mat3, Ray, Vec3};

/// Height of the image plane in camera space.
const PLANE_HEIGHT: f32 = 0.5;

/// Distance of the image plane along -Z.
const PLANE_DISTANCE: f32 = 1.0;

/// Camera taken from the scene's position and orientation.
#[derive(Debug, Clone)]
pub struct Camera {
    pub image_width: u32,
    pub image_height: u32,

    position: Vec3,
    matrix: Mat3,

    // Image plane extents and per-pixel steps
    plane_width: f32,
    plane_height: f32,
    pixel_dx: f32,
    pixel_dy: f32,
}

impl Camera {
    /// Create a camera for an image of `width` x `height` pixels.
    ///
    /// The plane height is fixed; its width follows the aspect ratio.
    pub fn new(scene: &Scene, width: u32, height: u32) -> Self {
        let plane_height = PLANE_HEIGHT;
        let plane_width = width as f32 * plane_height / height.max(1) as f32;

        Self {
            image_width: width,
            image_height: height,
            position: scene.camera_position,
            matrix: scene.camera_matrix,
            plane_width,
            plane_height,
            pixel_dx: plane_width / width.max(1) as f32,
            pixel_dy: plane_height / height.max(1) as f32,
        }
    }

    /// Camera position in world space.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// World-space direction through the lower-left corner of pixel `(x, y)`.
    ///
    /// Row 0 is the bottom of the image.
    pub fn primary_direction(&self, x: u32, y: u32) -> Vec3 {
        let ray_x = -self.plane_width / 2.0 + x as f32 * self.pixel_dx;
        let ray_y = -self.plane_height / 2.0 + y as f32 * self.pixel_dy;
        self.matrix * Vec3::new(ray_x, ray_y, -PLANE_DISTANCE)
    }

    /// The four anti-aliasing rays of pixel `(x, y)`: the corner plus
    /// half-pixel steps along x, y and both.
    pub fn pixel_rays(&self, x: u32, y: u32) -> [Ray; 4] {
        let dir = self.primary_direction(x, y);
        let dx = self.matrix * Vec3::new(self.pixel_dx / 2.0, 0.0, 0.0);
        let dy = self.matrix * Vec3::new(0.0, self.pixel_dy / 2.0, 0.0);

        [
            Ray::new(self.position, dir),
            Ray::new(self.position, dir + dx),
            Ray::new(self.position, dir + dy),
            Ray::new(self.position, dir + dx + dy),
        ]
    }
}
