//! Oblique multi-planar reformation state and its CPU reference resampler.

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::params::normalize;
use crate::raymarch::sample_lut;
use crate::volume::VolumeDataset;

/// Tolerance when testing whether a plane position lies inside the unit cube.
pub const BOUNDS_EPSILON: f32 = 1e-4;

/// How slab samples are reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(i32)]
pub enum MprBlend {
    /// One sample on the plane.
    #[default]
    Single = 0,
    /// Maximum window density across the slab.
    Mip = 1,
    /// Minimum window density across the slab.
    MinIp = 2,
    /// Average window density across the slab.
    Mean = 3,
}

/// Plane, slab and blend configuration. Vectors are in normalized volume space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MprState {
    pub origin: Vec3,
    pub axis_u: Vec3,
    pub axis_v: Vec3,
    /// Half of the slab thickness along the plane normal (normalized units).
    pub slab_half_thickness: f32,
    /// Samples across a thick slab.
    pub step_count: u32,
    pub blend: MprBlend,
    /// Map through the first channel's transfer function instead of grayscale.
    pub use_transfer_function: bool,
    /// Overlay highlight color (rgb) and opacity (a).
    pub overlay: Option<Vec4>,
}

impl Default for MprState {
    fn default() -> Self {
        Self::axial(0.5)
    }
}

impl MprState {
    /// Axial plane at normalized depth `z`.
    pub fn axial(z: f32) -> Self {
        Self {
            origin: Vec3::new(0.0, 0.0, z),
            axis_u: Vec3::X,
            axis_v: Vec3::Y,
            slab_half_thickness: 0.0,
            step_count: 16,
            blend: MprBlend::Single,
            use_transfer_function: false,
            overlay: None,
        }
    }

    /// Plane normal (`axis_u x axis_v`, normalized).
    pub fn normal(&self) -> Vec3 {
        self.axis_u.cross(self.axis_v).normalize_or_zero()
    }

    /// Whether the request samples a thick slab.
    pub fn is_slab(&self) -> bool {
        self.blend != MprBlend::Single && self.slab_half_thickness > 0.0
    }

    /// Position of output coordinate `(u, v)` in `[0, 1]^2`.
    pub fn position(&self, u: f32, v: f32) -> Vec3 {
        self.origin + self.axis_u * u + self.axis_v * v
    }

    /// Offsets along the normal at which slab samples are taken.
    pub fn slab_offsets(&self) -> Vec<f32> {
        if !self.is_slab() {
            return vec![0.0];
        }
        let count = self.step_count.max(2);
        let thickness = 2.0 * self.slab_half_thickness;
        (0..count)
            .map(|i| -self.slab_half_thickness + thickness * i as f32 / (count - 1) as f32)
            .collect()
    }

    /// GPU uniform block.
    pub fn uniforms(
        &self,
        window: (f32, f32),
        data_range: (f32, f32),
        dimensions: [u32; 3],
    ) -> MprUniforms {
        let overlay = self.overlay.unwrap_or(Vec4::ZERO);
        MprUniforms {
            origin: self.origin.to_array(),
            slab_half_thickness: self.slab_half_thickness.max(0.0),
            axis_u: self.axis_u.to_array(),
            step_count: i32::try_from(self.step_count.max(2)).unwrap_or(i32::MAX),
            axis_v: self.axis_v.to_array(),
            blend: if self.is_slab() {
                self.blend as i32
            } else {
                MprBlend::Single as i32
            },
            window_min: window.0,
            window_max: window.1,
            data_min: data_range.0,
            data_max: data_range.1,
            dimensions: dimensions.map(|d| d.max(1) as f32),
            use_transfer_function: i32::from(self.use_transfer_function),
            overlay_color: overlay.to_array(),
            overlay_enabled: i32::from(self.overlay.is_some()),
            _padding: [0; 3],
        }
    }
}

/// Uniforms for the oblique resampling kernel. Layout matches `MprParams` in `mpr.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[allow(clippy::pub_underscore_fields)]
pub struct MprUniforms {
    pub origin: [f32; 3],
    pub slab_half_thickness: f32,
    pub axis_u: [f32; 3],
    pub step_count: i32,
    pub axis_v: [f32; 3],
    pub blend: i32,
    pub window_min: f32,
    pub window_max: f32,
    pub data_min: f32,
    pub data_max: f32,
    pub dimensions: [f32; 3],
    pub use_transfer_function: i32,
    pub overlay_color: [f32; 4],
    pub overlay_enabled: i32,
    pub _padding: [i32; 3],
}

const _: () = assert!(std::mem::size_of::<MprUniforms>() == 112);

/// Window density and its paired dataset density for one output pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MprSample {
    pub window_density: f32,
    pub dataset_density: f32,
}

/// Resamples one output pixel. Returns `None` outside the volume.
pub fn resample_pixel(
    volume: &VolumeDataset,
    state: &MprState,
    window: (f32, f32),
    u: f32,
    v: f32,
) -> Option<MprSample> {
    let centre = state.position(u, v);
    let lo = -BOUNDS_EPSILON;
    let hi = 1.0 + BOUNDS_EPSILON;
    if centre.cmplt(Vec3::splat(lo)).any() || centre.cmpgt(Vec3::splat(hi)).any() {
        return None;
    }

    let (data_min, data_max) = volume.intensity_range();
    let normal = state.normal();
    let mut hits = 0u32;
    let mut best: Option<MprSample> = None;
    let mut sum = 0.0f32;
    let mut sum_data = 0.0f32;
    for offset in state.slab_offsets() {
        let p = centre + normal * offset;
        if p.cmplt(Vec3::splat(lo)).any() || p.cmpgt(Vec3::splat(hi)).any() {
            continue;
        }
        let raw = volume.sample_normalized(p);
        let sample = MprSample {
            window_density: normalize(raw, window.0, window.1),
            dataset_density: normalize(raw, data_min, data_max),
        };
        hits += 1;
        sum += sample.window_density;
        sum_data += sample.dataset_density;
        best = match (state.blend, best) {
            (_, None) => Some(sample),
            (MprBlend::MinIp, Some(b)) if sample.window_density < b.window_density => Some(sample),
            (MprBlend::Mip | MprBlend::Single, Some(b))
                if sample.window_density > b.window_density =>
            {
                Some(sample)
            }
            (_, keep) => keep,
        };
    }

    if hits == 0 {
        return Some(MprSample {
            window_density: 0.0,
            dataset_density: 0.0,
        });
    }
    if state.is_slab() && state.blend == MprBlend::Mean {
        return Some(MprSample {
            window_density: sum / hits as f32,
            dataset_density: sum_data / hits as f32,
        });
    }
    best
}

/// Final pixel color for a resampled value.
///
/// Grayscale window density by default; with a lookup table, the table entry at
/// the dataset density scaled by window density. An overlay `(color, mask)`
/// blends its rgb in with weight `mask * color.a`.
pub fn compose_color(sample: MprSample, lut: Option<&[[f32; 4]]>, overlay: Option<(Vec4, f32)>) -> Vec4 {
    let mut rgb = match lut {
        Some(lut) => sample_lut(lut, sample.dataset_density).truncate() * sample.window_density,
        None => Vec3::splat(sample.window_density),
    };
    if let Some((color, mask)) = overlay {
        rgb = rgb.lerp(color.truncate(), (mask * color.w).clamp(0.0, 1.0));
    }
    rgb.extend(1.0)
}

/// Resamples a full `width x height` plane into window densities; pixels outside
/// the volume are `None`.
pub fn resample(
    volume: &VolumeDataset,
    state: &MprState,
    window: (f32, f32),
    width: u32,
    height: u32,
) -> Vec<Option<MprSample>> {
    let mut out = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            let u = (x as f32 + 0.5) / width.max(1) as f32;
            let v = (y as f32 + 0.5) / height.max(1) as f32;
            out.push(resample_pixel(volume, state, window, u, v));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::UVec3;

    #[test]
    fn test_single_slice_constant_volume() {
        let volume = VolumeDataset::constant(UVec3::new(16, 16, 16), 100).unwrap();
        let state = MprState {
            origin: Vec3::new(0.0, 0.0, 0.5),
            ..MprState::default()
        };
        let pixels = resample(&volume, &state, (0.0, 200.0), 32, 32);
        assert_eq!(pixels.len(), 32 * 32);
        for px in pixels {
            let d = px.expect("inside volume").window_density;
            assert!((0.498..=0.502).contains(&d), "density {d}");
        }
    }

    #[test]
    fn test_outside_is_none() {
        let volume = VolumeDataset::constant(UVec3::new(4, 4, 4), 0).unwrap();
        let state = MprState {
            origin: Vec3::new(0.5, 0.0, 0.5),
            ..MprState::default()
        };
        assert!(resample_pixel(&volume, &state, (0.0, 1.0), 0.9, 0.5).is_none());
        assert!(resample_pixel(&volume, &state, (0.0, 1.0), 0.2, 0.5).is_some());
    }

    #[test]
    fn test_slab_blends() {
        // Intensity ramps along z.
        let volume =
            VolumeDataset::from_fn(UVec3::new(8, 8, 32), |p| (p.z * 1000.0) as i16).unwrap();
        let mut state = MprState::axial(0.5);
        state.slab_half_thickness = 0.2;
        state.step_count = 9;

        state.blend = MprBlend::Mip;
        let mip = resample_pixel(&volume, &state, (0.0, 1000.0), 0.5, 0.5).unwrap();
        state.blend = MprBlend::MinIp;
        let minip = resample_pixel(&volume, &state, (0.0, 1000.0), 0.5, 0.5).unwrap();
        state.blend = MprBlend::Mean;
        let mean = resample_pixel(&volume, &state, (0.0, 1000.0), 0.5, 0.5).unwrap();

        assert!(mip.window_density > mean.window_density);
        assert!(mean.window_density > minip.window_density);
        assert!((mean.window_density - 0.5).abs() < 0.02);
        assert!((mip.window_density - 0.7).abs() < 0.03);
        assert_eq!(state.slab_offsets().len(), 9);
    }

    #[test]
    fn test_compose_color() {
        let sample = MprSample {
            window_density: 0.5,
            dataset_density: 1.0,
        };
        assert_eq!(compose_color(sample, None, None), Vec4::new(0.5, 0.5, 0.5, 1.0));
        let lut = [[0.0, 0.0, 0.0, 1.0], [1.0, 0.0, 0.0, 1.0]];
        assert_eq!(compose_color(sample, Some(&lut[..]), None), Vec4::new(0.5, 0.0, 0.0, 1.0));
        let overlay = (Vec4::new(0.0, 1.0, 0.0, 0.5), 1.0);
        let blended = compose_color(sample, None, Some(overlay));
        assert!((blended - Vec4::new(0.25, 0.75, 0.25, 1.0)).length() < 1e-6);
    }

    #[test]
    fn test_slab_needs_two_samples() {
        let mut state = MprState::axial(0.5);
        state.blend = MprBlend::Mean;
        state.slab_half_thickness = 0.1;
        state.step_count = 1;
        let offsets = state.slab_offsets();
        assert_eq!(offsets.len(), 2);
        assert!((offsets[0] + 0.1).abs() < 1e-6 && (offsets[1] - 0.1).abs() < 1e-6);
    }
}
