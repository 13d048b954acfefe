//! Frame camera inputs, ray generation and the change-detection signature.

use glam::{Mat4, Vec3, Vec4};

/// Element-wise tolerance used when comparing camera signatures.
pub const SIGNATURE_EPSILON: f32 = 1e-5;

/// A ray in normalized volume space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Creates a ray, normalizing the direction.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    /// Point at parameter `t`.
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Camera matrices supplied by the orchestrator each frame.
///
/// `model` maps the normalized `[0, 1]^3` volume cube into world space;
/// `view_proj` maps world space to clip space with depth in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameCamera {
    pub model: Mat4,
    pub view_proj: Mat4,
}

impl Default for FrameCamera {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view_proj: Mat4::IDENTITY,
        }
    }
}

impl FrameCamera {
    /// Creates a camera from its matrices.
    pub fn new(model: Mat4, view_proj: Mat4) -> Self {
        Self { model, view_proj }
    }

    /// Perspective camera looking at the volume centre, with the cube scaled to
    /// `extent` and centred on the world origin.
    pub fn orbit(extent: Vec3, eye: Vec3, fov_y: f32, aspect: f32) -> Self {
        let largest = extent.max_element().max(f32::EPSILON);
        let scale = extent / largest;
        let model = Mat4::from_scale(scale) * Mat4::from_translation(Vec3::splat(-0.5));
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(fov_y, aspect.max(f32::EPSILON), 0.01, 100.0);
        Self::new(model, proj * view)
    }

    /// Inverse of the model matrix.
    pub fn inverse_model(&self) -> Mat4 {
        self.model.inverse()
    }

    /// Inverse of the view-projection matrix.
    pub fn inverse_view_proj(&self) -> Mat4 {
        self.view_proj.inverse()
    }

    /// Generates the normalized-volume-space ray through the centre of a pixel.
    pub fn ray_for_pixel(&self, x: u32, y: u32, width: u32, height: u32) -> Ray {
        let ndc_x = (x as f32 + 0.5) / width.max(1) as f32 * 2.0 - 1.0;
        let ndc_y = 1.0 - (y as f32 + 0.5) / height.max(1) as f32 * 2.0;
        let inv_vp = self.inverse_view_proj();
        let inv_model = self.inverse_model();
        let near = inv_vp * Vec4::new(ndc_x, ndc_y, 0.0, 1.0);
        let far = inv_vp * Vec4::new(ndc_x, ndc_y, 1.0, 1.0);
        let near = inv_model * (near / near.w);
        let far = inv_model * (far / far.w);
        Ray::new(near.truncate(), far.truncate() - near.truncate())
    }

    /// Signature used to detect unchanged frames.
    pub fn signature(&self) -> CameraSignature {
        CameraSignature {
            model: self.model,
            inverse_view_proj: self.inverse_view_proj(),
        }
    }

    /// GPU uniform block for the kernels.
    pub fn uniforms(&self, width: u32, height: u32) -> CameraUniforms {
        CameraUniforms {
            inverse_view_proj: self.inverse_view_proj().to_cols_array_2d(),
            inverse_model: self.inverse_model().to_cols_array_2d(),
            viewport: [width as f32, height as f32],
            _padding: [0.0; 2],
        }
    }
}

/// Camera uniforms for the ray marching kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[allow(clippy::pub_underscore_fields)]
pub struct CameraUniforms {
    pub inverse_view_proj: [[f32; 4]; 4],
    pub inverse_model: [[f32; 4]; 4],
    pub viewport: [f32; 2],
    pub _padding: [f32; 2],
}

const _: () = assert!(std::mem::size_of::<CameraUniforms>() == 144);

/// Model matrix plus inverse view-projection, compared with [`SIGNATURE_EPSILON`].
#[derive(Debug, Clone, Copy)]
pub struct CameraSignature {
    pub model: Mat4,
    pub inverse_view_proj: Mat4,
}

impl CameraSignature {
    /// Returns whether both matrices match element-wise within the tolerance.
    pub fn approx_eq(&self, other: &Self) -> bool {
        self.model.abs_diff_eq(other.model, SIGNATURE_EPSILON)
            && self
                .inverse_view_proj
                .abs_diff_eq(other.inverse_view_proj, SIGNATURE_EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_tolerance() {
        let camera = FrameCamera::orbit(Vec3::ONE, Vec3::new(0.0, 0.0, 3.0), 0.8, 1.0);
        let a = camera.signature();
        let mut nudged = camera;
        nudged.model.w_axis.x += 1e-7;
        assert!(a.approx_eq(&nudged.signature()));
        nudged.model.w_axis.x += 1e-2;
        assert!(!a.approx_eq(&nudged.signature()));
    }

    #[test]
    fn test_centre_ray_hits_cube_centre() {
        let camera = FrameCamera::orbit(Vec3::ONE, Vec3::new(0.0, 0.0, 3.0), 0.8, 1.0);
        // Even dimensions put the centre between pixels; use an odd size.
        let ray = camera.ray_for_pixel(50, 50, 101, 101);
        // Closest approach to the cube centre along the ray.
        let to_centre = Vec3::splat(0.5) - ray.origin;
        let t = to_centre.dot(ray.direction);
        assert!((ray.at(t) - Vec3::splat(0.5)).length() < 1e-3);
        assert!(ray.direction.z < 0.0);
    }
}
