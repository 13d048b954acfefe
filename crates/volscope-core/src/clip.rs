//! Clipping state: a rotatable trim box plus up to three clip planes.
//!
//! All positions are in normalized `[0, 1]^3` volume space. Plane equations
//! are evaluated against the position re-centred on the volume centre: a sample
//! is discarded when `dot(pos - 0.5, normal) + offset > 0`.

use glam::{Quat, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Maximum number of clip planes.
pub const MAX_CLIP_PLANES: usize = 3;

/// Which clip plane arrangement is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ClipPlanePreset {
    /// No clip planes.
    #[default]
    Off,
    /// Cuts along the z axis (keeps `z <= 0.5` at zero offset).
    Axial,
    /// Cuts along the x axis.
    Sagittal,
    /// Cuts along the y axis.
    Coronal,
    /// User-supplied planes.
    Custom,
}

/// A single clip plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipPlane {
    /// Plane normal in centred volume space. Samples on its positive side are removed.
    pub normal: Vec3,
    /// Signed offset added to `dot(pos - 0.5, normal)`.
    pub offset: f32,
}

impl ClipPlane {
    /// Creates a plane, normalizing `normal`. A zero normal yields `None`.
    pub fn new(normal: Vec3, offset: f32) -> Option<Self> {
        let normal = normal.try_normalize()?;
        Some(Self { normal, offset })
    }

    /// Signed distance of a normalized position; positive means clipped.
    pub fn signed_distance(&self, pos: Vec3) -> f32 {
        (pos - Vec3::splat(0.5)).dot(self.normal) + self.offset
    }

    /// Plane equation as `(normal, offset)`.
    pub fn equation(&self) -> Vec4 {
        self.normal.extend(self.offset)
    }
}

/// Trim box, box rotation and clip planes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipState {
    trim_min: Vec3,
    trim_max: Vec3,
    rotation: Quat,
    planes: Vec<ClipPlane>,
    preset: ClipPlanePreset,
}

impl Default for ClipState {
    fn default() -> Self {
        Self {
            trim_min: Vec3::ZERO,
            trim_max: Vec3::ONE,
            rotation: Quat::IDENTITY,
            planes: Vec::new(),
            preset: ClipPlanePreset::Off,
        }
    }
}

impl ClipState {
    /// Creates an unclipped state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the trim box bounds.
    pub fn trim_bounds(&self) -> (Vec3, Vec3) {
        (self.trim_min, self.trim_max)
    }

    /// Sets the trim box, clamping to `[0, 1]` and reordering inverted axes.
    pub fn set_trim_box(&mut self, min: Vec3, max: Vec3) {
        let lo = min.clamp(Vec3::ZERO, Vec3::ONE);
        let hi = max.clamp(Vec3::ZERO, Vec3::ONE);
        if lo.cmpgt(hi).any() {
            log::warn!("trim box {min} .. {max} inverted on some axis, reordering");
        }
        self.trim_min = lo.min(hi);
        self.trim_max = lo.max(hi);
    }

    /// Returns the trim box rotation.
    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    /// Sets the trim box rotation. Non-unit or non-finite input is treated as identity.
    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = if rotation.is_finite() && (rotation.length() - 1.0).abs() < 1e-3 {
            rotation.normalize()
        } else {
            log::warn!("trim rotation {rotation} is not unit length, using identity");
            Quat::IDENTITY
        };
    }

    /// Returns the active plane preset.
    pub fn preset(&self) -> ClipPlanePreset {
        self.preset
    }

    /// Returns the active planes.
    pub fn planes(&self) -> &[ClipPlane] {
        &self.planes
    }

    /// Activates a plane preset at the given offset.
    ///
    /// `Custom` keeps the current planes; `Off` removes them.
    pub fn set_preset(&mut self, preset: ClipPlanePreset, offset: f32) {
        let normal = match preset {
            ClipPlanePreset::Off => {
                self.planes.clear();
                self.preset = preset;
                return;
            }
            ClipPlanePreset::Custom => {
                self.preset = preset;
                return;
            }
            ClipPlanePreset::Axial => Vec3::Z,
            ClipPlanePreset::Sagittal => Vec3::X,
            ClipPlanePreset::Coronal => Vec3::Y,
        };
        self.planes = vec![ClipPlane { normal, offset }];
        self.preset = preset;
    }

    /// Replaces the planes with a custom set; extra planes beyond three are dropped.
    pub fn set_planes(&mut self, planes: &[ClipPlane]) {
        if planes.len() > MAX_CLIP_PLANES {
            log::warn!(
                "{} clip planes requested, only {MAX_CLIP_PLANES} are supported",
                planes.len()
            );
        }
        self.planes = planes.iter().copied().take(MAX_CLIP_PLANES).collect();
        self.preset = if self.planes.is_empty() {
            ClipPlanePreset::Off
        } else {
            ClipPlanePreset::Custom
        };
    }

    /// Plane equations in GPU order.
    pub fn plane_equations(&self) -> Vec<Vec4> {
        self.planes.iter().map(ClipPlane::equation).collect()
    }

    /// Returns whether a normalized position survives the trim box and all planes.
    pub fn contains(&self, pos: Vec3) -> bool {
        let centre = Vec3::splat(0.5);
        let local = self.rotation.inverse() * (pos - centre) + centre;
        if local.cmplt(self.trim_min).any() || local.cmpgt(self.trim_max).any() {
            return false;
        }
        self.planes.iter().all(|p| p.signed_distance(pos) <= 0.0)
    }

    /// Restores the unclipped state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
