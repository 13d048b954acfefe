//! Volume datasets handed over by the data provider.

use glam::{Mat3, UVec3, Vec3};

use crate::error::{Result, VolscopeError};

/// Signed 16-bit scalar volume plus the metadata the renderer needs.
#[derive(Debug, Clone)]
pub struct VolumeDataset {
    dimensions: UVec3,
    voxels: Vec<i16>,
    /// Physical voxel spacing (mm).
    pub spacing: Vec3,
    /// Patient-space orientation of the volume axes.
    pub orientation: Mat3,
    /// Patient-space position of the first voxel.
    pub origin: Vec3,
    /// Raw-to-HU slope.
    pub rescale_slope: f32,
    /// Raw-to-HU intercept.
    pub rescale_intercept: f32,
    intensity_range: (f32, f32),
}

impl VolumeDataset {
    /// Creates a dataset, validating the voxel count and scanning the intensity range.
    pub fn new(dimensions: UVec3, voxels: Vec<i16>) -> Result<Self> {
        if dimensions.x == 0 || dimensions.y == 0 || dimensions.z == 0 {
            return Err(VolscopeError::InvalidDimensions(
                dimensions.x,
                dimensions.y,
                dimensions.z,
            ));
        }
        let expected = dimensions.x as usize * dimensions.y as usize * dimensions.z as usize;
        if voxels.len() != expected {
            return Err(VolscopeError::SizeMismatch {
                expected,
                actual: voxels.len(),
            });
        }
        let (min, max) = voxels
            .iter()
            .fold((i16::MAX, i16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        Ok(Self {
            dimensions,
            voxels,
            spacing: Vec3::ONE,
            orientation: Mat3::IDENTITY,
            origin: Vec3::ZERO,
            rescale_slope: 1.0,
            rescale_intercept: 0.0,
            intensity_range: (f32::from(min), f32::from(max)),
        })
    }

    /// Creates a dataset where every voxel has the same value.
    pub fn constant(dimensions: UVec3, value: i16) -> Result<Self> {
        let count = dimensions.x as usize * dimensions.y as usize * dimensions.z as usize;
        Self::new(dimensions, vec![value; count])
    }

    /// Creates a dataset by evaluating `f` at every voxel's normalized centre.
    pub fn from_fn(dimensions: UVec3, mut f: impl FnMut(Vec3) -> i16) -> Result<Self> {
        let mut voxels = Vec::with_capacity(
            dimensions.x as usize * dimensions.y as usize * dimensions.z as usize,
        );
        let dims = dimensions.as_vec3();
        for z in 0..dimensions.z {
            for y in 0..dimensions.y {
                for x in 0..dimensions.x {
                    let p = (UVec3::new(x, y, z).as_vec3() + 0.5) / dims;
                    voxels.push(f(p));
                }
            }
        }
        Self::new(dimensions, voxels)
    }

    /// Sets spacing and returns self.
    #[must_use]
    pub fn with_spacing(mut self, spacing: Vec3) -> Self {
        self.spacing = spacing;
        self
    }

    /// Overrides the intensity range reported to the renderer.
    #[must_use]
    pub fn with_intensity_range(mut self, min: f32, max: f32) -> Self {
        self.intensity_range = (min.min(max), min.max(max));
        self
    }

    /// Sets the raw-to-HU rescale and returns self.
    #[must_use]
    pub fn with_rescale(mut self, slope: f32, intercept: f32) -> Self {
        self.rescale_slope = slope;
        self.rescale_intercept = intercept;
        self
    }

    /// Volume dimensions in voxels.
    pub fn dimensions(&self) -> UVec3 {
        self.dimensions
    }

    /// Raw voxel values, x fastest.
    pub fn voxels(&self) -> &[i16] {
        &self.voxels
    }

    /// Intensity range `(min, max)`.
    pub fn intensity_range(&self) -> (f32, f32) {
        self.intensity_range
    }

    /// Converts a raw value to HU.
    pub fn to_hu(&self, raw: f32) -> f32 {
        raw * self.rescale_slope + self.rescale_intercept
    }

    /// Physical extent of the volume (dimensions times spacing).
    pub fn physical_extent(&self) -> Vec3 {
        self.dimensions.as_vec3() * self.spacing
    }

    /// Voxel value with coordinates clamped to the volume.
    pub fn voxel(&self, x: i64, y: i64, z: i64) -> f32 {
        let d = self.dimensions;
        let x = x.clamp(0, i64::from(d.x) - 1) as usize;
        let y = y.clamp(0, i64::from(d.y) - 1) as usize;
        let z = z.clamp(0, i64::from(d.z) - 1) as usize;
        let idx = (z * d.y as usize + y) * d.x as usize + x;
        f32::from(self.voxels[idx])
    }

    /// Trilinear sample at a normalized position, voxel centres at `(i + 0.5) / dim`.
    pub fn sample_normalized(&self, pos: Vec3) -> f32 {
        let p = pos.clamp(Vec3::ZERO, Vec3::ONE) * self.dimensions.as_vec3() - 0.5;
        let base = p.floor();
        let f = p - base;
        let (x0, y0, z0) = (base.x as i64, base.y as i64, base.z as i64);

        let c000 = self.voxel(x0, y0, z0);
        let c100 = self.voxel(x0 + 1, y0, z0);
        let c010 = self.voxel(x0, y0 + 1, z0);
        let c110 = self.voxel(x0 + 1, y0 + 1, z0);
        let c001 = self.voxel(x0, y0, z0 + 1);
        let c101 = self.voxel(x0 + 1, y0, z0 + 1);
        let c011 = self.voxel(x0, y0 + 1, z0 + 1);
        let c111 = self.voxel(x0 + 1, y0 + 1, z0 + 1);

        let c00 = c000 + (c100 - c000) * f.x;
        let c10 = c010 + (c110 - c010) * f.x;
        let c01 = c001 + (c101 - c001) * f.x;
        let c11 = c011 + (c111 - c011) * f.x;
        let c0 = c00 + (c10 - c00) * f.y;
        let c1 = c01 + (c11 - c01) * f.y;
        c0 + (c1 - c0) * f.z
    }

    /// Central-difference gradient at a normalized position, in raw units per voxel.
    pub fn gradient(&self, pos: Vec3) -> Vec3 {
        let h = Vec3::ONE / self.dimensions.as_vec3();
        Vec3::new(
            self.sample_normalized(pos + Vec3::X * h.x) - self.sample_normalized(pos - Vec3::X * h.x),
            self.sample_normalized(pos + Vec3::Y * h.y) - self.sample_normalized(pos - Vec3::Y * h.y),
            self.sample_normalized(pos + Vec3::Z * h.z) - self.sample_normalized(pos - Vec3::Z * h.z),
        ) * 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_sizes() {
        assert!(matches!(
            VolumeDataset::new(UVec3::new(2, 2, 2), vec![0; 7]),
            Err(VolscopeError::SizeMismatch { expected: 8, actual: 7 })
        ));
        assert!(matches!(
            VolumeDataset::new(UVec3::new(0, 2, 2), vec![]),
            Err(VolscopeError::InvalidDimensions(0, 2, 2))
        ));
    }

    #[test]
    fn test_intensity_range_scan() {
        let vol = VolumeDataset::new(UVec3::new(2, 1, 1), vec![-5, 40]).unwrap();
        assert_eq!(vol.intensity_range(), (-5.0, 40.0));
        let vol = vol.with_intensity_range(100.0, -100.0);
        assert_eq!(vol.intensity_range(), (-100.0, 100.0));
    }

    #[test]
    fn test_trilinear_sampling() {
        let vol = VolumeDataset::new(UVec3::new(2, 1, 1), vec![0, 100]).unwrap();
        assert!((vol.sample_normalized(Vec3::new(0.25, 0.5, 0.5)) - 0.0).abs() < 1e-4);
        assert!((vol.sample_normalized(Vec3::new(0.5, 0.5, 0.5)) - 50.0).abs() < 1e-4);
        assert!((vol.sample_normalized(Vec3::new(0.75, 0.5, 0.5)) - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_from_fn_and_gradient() {
        let vol = VolumeDataset::from_fn(UVec3::new(8, 8, 8), |p| (p.x * 800.0) as i16).unwrap();
        let g = vol.gradient(Vec3::splat(0.5));
        assert!(g.x > 50.0);
        assert!(g.y.abs() < 1e-3 && g.z.abs() < 1e-3);
        assert_eq!(vol.to_hu(10.0), 10.0);
        assert_eq!(vol.with_rescale(2.0, -1024.0).to_hu(10.0), -1004.0);
    }
}
