//! CPU reference of the ray marching compositor.
//!
//! Mirrors `raycast.wgsl` step for step so kernel behavior can be verified
//! without a GPU. Colors are premultiplied by alpha throughout.

use glam::{Quat, Vec3, Vec4};

use crate::camera::{FrameCamera, Ray};
use crate::channel::ChannelSet;
use crate::options::RenderMethod;
use crate::params::RenderParameters;
use crate::transfer_function::LUT_WIDTH;
use crate::volume::VolumeDataset;

/// Consecutive near-transparent samples that trigger an empty-space skip.
pub const EMPTY_RUN_LENGTH: u32 = 4;
/// Extra base steps taken when skipping empty space.
pub const EMPTY_SKIP_STEPS: f32 = 3.0;
/// Alpha below which a sample counts as empty.
pub const EMPTY_ALPHA: f32 = 1e-3;
/// Iteration cap as a multiple of the base step count.
pub const ITERATION_CAP_FACTOR: u32 = 4;

/// Headlight Blinn-Phong coefficients.
pub const AMBIENT: f32 = 0.3;
pub const DIFFUSE: f32 = 0.7;
pub const SPECULAR: f32 = 0.2;
pub const SHININESS: f32 = 16.0;

/// Intersects a ray with the unit cube.
///
/// Returns `(enter, exit)` ray parameters, or `None` when
/// `exit <= max(enter, 0)` (miss, or cube entirely behind the origin).
pub fn intersect_box(ray: &Ray) -> Option<(f32, f32)> {
    let inv = Vec3::ONE / ray.direction;
    let t0 = (Vec3::ZERO - ray.origin) * inv;
    let t1 = (Vec3::ONE - ray.origin) * inv;
    let near = t0.min(t1);
    let far = t0.max(t1);
    let enter = near.max_element();
    let exit = far.min_element();
    if !enter.is_finite() && !exit.is_finite() {
        return None;
    }
    if exit <= enter.max(0.0) {
        return None;
    }
    Some((enter, exit))
}

/// PCG hash used to seed per-pixel jitter.
pub fn pcg_hash(value: u32) -> u32 {
    let state = value.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Pseudo-random value in `[0, 1)` for a pixel and frame.
pub fn jitter_hash(x: u32, y: u32, frame: u32) -> f32 {
    let seed = x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663) ^ frame.wrapping_mul(83_492_791);
    (pcg_hash(seed) >> 8) as f32 / 16_777_216.0
}

/// Step scale for a gradient magnitude (window-density units per voxel).
pub fn adaptive_step_factor(gradient: f32, threshold: f32, min_factor: f32, max_factor: f32) -> f32 {
    (threshold / gradient.max(1e-6)).clamp(min_factor, max_factor)
}

/// Corrects a per-sample alpha for a step that differs from the base step.
pub fn correct_opacity(alpha: f32, step_ratio: f32) -> f32 {
    if (step_ratio - 1.0).abs() < 1e-6 {
        return alpha;
    }
    1.0 - (1.0 - alpha.clamp(0.0, 1.0)).powf(step_ratio)
}

/// Front-to-back accumulation: `accum += (1 - accum.a) * sample`.
pub fn composite_front_to_back(accum: Vec4, color: Vec3, alpha: f32) -> Vec4 {
    let w = (1.0 - accum.w) * alpha;
    accum + (color * w).extend(w)
}

/// Back-to-front accumulation: `accum = sample.a * sample + (1 - sample.a) * accum`.
pub fn composite_back_to_front(accum: Vec4, color: Vec3, alpha: f32) -> Vec4 {
    let rgb = color * alpha + accum.truncate() * (1.0 - alpha);
    rgb.extend(alpha + (1.0 - alpha) * accum.w)
}

/// Linearly samples a baked lookup table at `t` in `[0, 1]`.
pub fn sample_lut(lut: &[[f32; 4]], t: f32) -> Vec4 {
    match lut.len() {
        0 => Vec4::ZERO,
        1 => Vec4::from_array(lut[0]),
        n => {
            let x = t.clamp(0.0, 1.0) * (n - 1) as f32;
            let i0 = x.floor() as usize;
            let i1 = (i0 + 1).min(n - 1);
            let f = x - i0 as f32;
            Vec4::from_array(lut[i0]).lerp(Vec4::from_array(lut[i1]), f)
        }
    }
}

/// Blinn-Phong headlight shading; a vanishing gradient leaves the color unshaded.
pub fn shade(color: Vec3, gradient: Vec3, view_dir: Vec3) -> Vec3 {
    let Some(normal) = (-gradient).try_normalize() else {
        return color;
    };
    let light = view_dir;
    let n_dot_l = normal.dot(light).abs();
    let half = (light + view_dir).normalize_or_zero();
    let spec = normal.dot(half).abs().powf(SHININESS);
    color * (AMBIENT + DIFFUSE * n_dot_l) + Vec3::splat(SPECULAR * spec)
}

/// Blends up to four channels into one straight-alpha sample.
///
/// Each channel contributes `(rgb, alpha)`. Color is the alpha-weighted average
/// and alpha the clamped sum.
pub fn blend_channels(samples: &[(Vec3, f32)]) -> (Vec3, f32) {
    let mut rgb = Vec3::ZERO;
    let mut total = 0.0;
    for &(c, a) in samples {
        rgb += c * a;
        total += a;
    }
    if total <= 0.0 {
        return (Vec3::ZERO, 0.0);
    }
    (rgb / total, total.min(1.0))
}

/// Returns whether the trim box, its rotation or a clip plane removes `pos`.
pub fn is_clipped(params: &RenderParameters, pos: Vec3) -> bool {
    let centre = Vec3::splat(0.5);
    let rotation = Quat::from_array(params.trim_rotation);
    let local = rotation.inverse() * (pos - centre) + centre;
    let min = Vec3::from_array(params.trim_min);
    let max = Vec3::from_array(params.trim_max);
    if local.cmplt(min).any() || local.cmpgt(max).any() {
        return true;
    }
    let count = params.clip_plane_count.clamp(0, 3) as usize;
    params.clip_planes[..count].iter().any(|plane| {
        let eq = Vec4::from_array(*plane);
        (pos - centre).dot(eq.truncate()) + eq.w > 0.0
    })
}

/// Result of marching one ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarchResult {
    /// Premultiplied color.
    pub color: Vec4,
    /// Samples evaluated.
    pub samples: u32,
    /// Whether the ray stopped on the early-termination threshold.
    pub terminated_early: bool,
}

impl MarchResult {
    fn transparent() -> Self {
        Self {
            color: Vec4::ZERO,
            samples: 0,
            terminated_early: false,
        }
    }
}

/// CPU ray marcher over a dataset, a parameter snapshot and the channel set.
pub struct RayMarcher<'a> {
    volume: &'a VolumeDataset,
    params: &'a RenderParameters,
    channels: &'a ChannelSet,
    luts: Vec<Vec<[f32; 4]>>,
}

impl<'a> RayMarcher<'a> {
    /// Creates a marcher. Channel lookup tables are baked over the parameter
    /// block's dataset range, as the renderer uploads them.
    pub fn new(
        volume: &'a VolumeDataset,
        params: &'a RenderParameters,
        channels: &'a ChannelSet,
    ) -> Self {
        let luts = channels
            .iter()
            .map(|c| {
                c.transfer_function()
                    .bake_over(LUT_WIDTH, params.data_min, params.data_max)
            })
            .collect();
        Self {
            volume,
            params,
            channels,
            luts,
        }
    }

    fn gradient_window(&self, pos: Vec3) -> Vec3 {
        let span = (self.params.window_max - self.params.window_min).abs().max(f32::EPSILON);
        self.volume.gradient(pos) / span
    }

    fn dvr_sample(&self, raw: f32) -> (Vec3, f32) {
        let wd = self.params.window_density(raw);
        let dd = self.params.dataset_density(raw);
        let count = (self.params.channel_count.clamp(1, 4)) as usize;
        let mut samples = [(Vec3::ZERO, 0.0f32); 4];
        for (i, (channel, lut)) in self.channels.iter().zip(&self.luts).take(count).enumerate() {
            let tf = sample_lut(lut, dd);
            let tone = channel.tone().sample_density(wd);
            let alpha = tf.w * tone * self.params.channel_gains[i] * self.params.channel_weights[i];
            samples[i] = (tf.truncate(), alpha.max(0.0));
        }
        blend_channels(&samples[..count])
    }

    fn passes_gate(&self, raw: f32, wd: f32) -> bool {
        if self.params.hu_gate_enabled != 0 {
            raw >= self.params.hu_gate_min && raw <= self.params.hu_gate_max
        } else {
            wd >= self.params.density_floor && wd <= self.params.density_ceiling
        }
    }

    /// Marches the ray through pixel `(x, y)` of a `width x height` viewport.
    pub fn march_pixel(&self, camera: &FrameCamera, x: u32, y: u32, width: u32, height: u32) -> MarchResult {
        let ray = camera.ray_for_pixel(x, y, width, height);
        let jitter = jitter_hash(x, y, self.params.frame_index);
        self.march(&ray, jitter)
    }

    /// Marches a ray; `jitter` in `[0, 1)` is scaled by the configured amount.
    pub fn march(&self, ray: &Ray, jitter: f32) -> MarchResult {
        let method = self.params.render_method();
        if method == RenderMethod::Mpr {
            return MarchResult::transparent();
        }
        let Some((enter, exit)) = intersect_box(ray) else {
            return MarchResult::transparent();
        };
        let enter = enter.max(0.0);
        let steps = self.params.step_count.max(1) as f32;
        let base_step = (exit - enter) / steps;
        if base_step <= 0.0 {
            return MarchResult::transparent();
        }
        let start = enter + jitter.clamp(0.0, 1.0) * self.params.jitter.clamp(0.0, 1.0) * base_step;
        let backward = self.params.backward != 0 && method == RenderMethod::Dvr;
        let cap = self.params.step_count.max(1) as u32 * ITERATION_CAP_FACTOR;
        let view_dir = -ray.direction;

        let mut accum = Vec4::ZERO;
        let mut agg = match method {
            RenderMethod::MinIp => f32::MAX,
            _ => 0.0,
        };
        let mut hits = 0u32;
        let mut empty_run = 0u32;
        let mut travelled = 0.0f32;
        let mut samples = 0u32;
        let length = exit - start;

        while travelled <= length && samples < cap {
            let t = if backward { exit - travelled } else { start + travelled };
            let pos = ray.at(t);
            samples += 1;

            let mut step = base_step;
            if self.params.adaptive != 0 {
                let g = self.gradient_window(pos).length();
                step *= adaptive_step_factor(
                    g,
                    self.params.adaptive_threshold,
                    self.params.adaptive_min_factor,
                    self.params.adaptive_max_factor,
                );
            }

            if is_clipped(self.params, pos) {
                travelled += step;
                continue;
            }

            let raw = self.volume.sample_normalized(pos);
            let wd = self.params.window_density(raw);

            match method {
                RenderMethod::Surface => {
                    if wd > self.params.surface_threshold {
                        let lut = self.luts.first().map_or(&[][..], Vec::as_slice);
                        let tf = sample_lut(lut, self.params.dataset_density(raw));
                        let color = shade(tf.truncate(), self.volume.gradient(pos), view_dir);
                        return MarchResult {
                            color: color.clamp(Vec3::ZERO, Vec3::ONE).extend(1.0),
                            samples,
                            terminated_early: true,
                        };
                    }
                }
                RenderMethod::Mip | RenderMethod::MinIp | RenderMethod::Mean => {
                    if self.passes_gate(raw, wd) {
                        hits += 1;
                        agg = match method {
                            RenderMethod::Mip => agg.max(wd),
                            RenderMethod::MinIp => agg.min(wd),
                            _ => agg + wd,
                        };
                    }
                }
                RenderMethod::Dvr | RenderMethod::Mpr => {
                    let (mut color, alpha) = self.dvr_sample(raw);
                    let alpha = correct_opacity(alpha, step / base_step);
                    if alpha < EMPTY_ALPHA {
                        empty_run += 1;
                        if empty_run >= EMPTY_RUN_LENGTH {
                            empty_run = 0;
                            travelled += EMPTY_SKIP_STEPS * base_step;
                        }
                    } else {
                        empty_run = 0;
                        if self.params.lighting != 0 {
                            color = shade(color, self.volume.gradient(pos), view_dir);
                        }
                        let color = color.clamp(Vec3::ZERO, Vec3::ONE);
                        accum = if backward {
                            composite_back_to_front(accum, color, alpha)
                        } else {
                            composite_front_to_back(accum, color, alpha)
                        };
                        if !backward && accum.w >= self.params.early_termination {
                            return MarchResult {
                                color: accum.min(Vec4::ONE),
                                samples,
                                terminated_early: true,
                            };
                        }
                    }
                }
            }
            travelled += step;
        }

        let color = match method {
            RenderMethod::Mip | RenderMethod::MinIp | RenderMethod::Mean => {
                if hits == 0 {
                    Vec4::ZERO
                } else {
                    let value = if method == RenderMethod::Mean {
                        agg / hits as f32
                    } else {
                        agg
                    };
                    Vec3::splat(value).extend(1.0)
                }
            }
            _ => accum.min(Vec4::ONE),
        };
        MarchResult {
            color,
            samples,
            terminated_early: false,
        }
    }

    /// Renders a full viewport into premultiplied RGBA, rows top to bottom.
    pub fn render(&self, camera: &FrameCamera, width: u32, height: u32) -> Vec<Vec4> {
        let mut out = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                out.push(self.march_pixel(camera, x, y, width, height).color);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer_function::{AlphaPoint, ColourPoint, Rgba, TransferFunction};
    use glam::UVec3;

    fn opaque_tf(min: f32, max: f32) -> TransferFunction {
        TransferFunction {
            colour_points: vec![
                ColourPoint { data_value: min, colour_value: Rgba::new(1.0, 1.0, 1.0, 1.0) },
                ColourPoint { data_value: max, colour_value: Rgba::new(1.0, 1.0, 1.0, 1.0) },
            ],
            alpha_points: vec![
                AlphaPoint { data_value: min, alpha_value: 1.0 },
                AlphaPoint { data_value: max, alpha_value: 1.0 },
            ],
            ..TransferFunction::pass_through(min, max)
        }
    }

    fn setup(value: i16) -> (VolumeDataset, RenderParameters, ChannelSet) {
        let volume = VolumeDataset::constant(UVec3::new(8, 8, 8), value)
            .unwrap()
            .with_intensity_range(0.0, 200.0);
        let mut params = RenderParameters::default();
        params.set_window(0.0, 200.0);
        params.set_dataset_range(0.0, 200.0);
        params.set_dimensions([8, 8, 8]);
        params.lighting = 0;
        let mut channels = ChannelSet::new();
        channels
            .get_mut(0)
            .unwrap()
            .set_transfer_function(opaque_tf(0.0, 200.0), None);
        (volume, params, channels)
    }

    #[test]
    fn test_transfer_function_follows_hu_not_dataset_position() {
        // Bone-like opacity ramp defined over the full CT range.
        let bone = TransferFunction {
            colour_points: vec![
                ColourPoint { data_value: -1024.0, colour_value: Rgba::new(1.0, 1.0, 1.0, 1.0) },
                ColourPoint { data_value: 3071.0, colour_value: Rgba::new(1.0, 1.0, 1.0, 1.0) },
            ],
            alpha_points: vec![
                AlphaPoint { data_value: 150.0, alpha_value: 0.0 },
                AlphaPoint { data_value: 400.0, alpha_value: 0.35 },
            ],
            ..TransferFunction::pass_through(-1024.0, 3071.0)
        };
        let volume = VolumeDataset::constant(UVec3::splat(4), 300)
            .unwrap()
            .with_intensity_range(75.0, 525.0);
        let mut params = RenderParameters::default();
        params.set_dataset_range(75.0, 525.0);
        params.set_window(75.0, 525.0);
        let mut channels = ChannelSet::new();
        channels.get_mut(0).unwrap().set_transfer_function(bone, None);
        let marcher = RayMarcher::new(&volume, &params, &channels);
        let tone = |raw: f32| channels.get(0).unwrap().tone().sample_density(params.window_density(raw));

        let (_, alpha) = marcher.dvr_sample(300.0);
        let expected = 0.21 * tone(300.0);
        assert!((alpha - expected).abs() < 2e-3, "alpha {alpha}, expected {expected}");
        for raw in [100.0, 140.0] {
            assert_eq!(marcher.dvr_sample(raw).1, 0.0);
        }
        let (_, alpha) = marcher.dvr_sample(525.0);
        assert!((alpha - 0.35 * tone(525.0)).abs() < 2e-3);
    }

    #[test]
    fn test_ray_box_axis_aligned() {
        let ray = Ray::new(Vec3::new(0.5, 0.5, -1.0), Vec3::Z);
        let (enter, exit) = intersect_box(&ray).unwrap();
        assert!((enter - 1.0).abs() < 1e-6);
        assert!((exit - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_ray_box_miss_and_behind() {
        let miss = Ray::new(Vec3::new(2.0, 2.0, -1.0), Vec3::Z);
        assert!(intersect_box(&miss).is_none());
        let behind = Ray::new(Vec3::new(0.5, 0.5, 3.0), Vec3::Z);
        assert!(intersect_box(&behind).is_none());
        let inside = Ray::new(Vec3::splat(0.5), Vec3::X);
        let (enter, exit) = intersect_box(&inside).unwrap();
        assert!(enter < 0.0 && (exit - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_early_termination_bounds() {
        let (volume, params, channels) = setup(100);
        let marcher = RayMarcher::new(&volume, &params, &channels);
        let ray = Ray::new(Vec3::new(0.5, 0.5, -1.0), Vec3::Z);
        let result = marcher.march(&ray, 0.0);
        assert!(result.terminated_early);
        assert!(result.color.w >= 0.99 && result.color.w <= 1.0, "alpha {}", result.color.w);
    }

    #[test]
    fn test_compositing_orders_agree_on_opaque_alpha() {
        let (volume, mut params, channels) = setup(100);
        params.backward = 1;
        let marcher = RayMarcher::new(&volume, &params, &channels);
        let ray = Ray::new(Vec3::new(0.5, 0.5, -1.0), Vec3::Z);
        let result = marcher.march(&ray, 0.0);
        assert!(!result.terminated_early);
        assert!((result.color.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_back_to_front_walks_whole_segment() {
        let (volume, mut params, channels) = setup(100);
        params.step_count = 50;
        let ray = Ray::new(Vec3::new(0.5, 0.5, -1.0), Vec3::Z);
        let forward = RayMarcher::new(&volume, &params, &channels).march(&ray, 0.0);
        params.backward = 1;
        let backward = RayMarcher::new(&volume, &params, &channels).march(&ray, 0.0);
        assert!(forward.terminated_early && forward.samples < 50);
        assert!(!backward.terminated_early);
        assert!(backward.samples >= 50);
    }

    #[test]
    fn test_render_buffer_size() {
        let (volume, params, channels) = setup(100);
        let marcher = RayMarcher::new(&volume, &params, &channels);
        let camera = FrameCamera::orbit(Vec3::ONE, Vec3::new(0.0, 0.0, 2.5), 0.8, 1.0);
        assert_eq!(marcher.render(&camera, 7, 5).len(), 35);
    }

    #[test]
    fn test_empty_volume_skips_ahead() {
        let (volume, mut params, mut channels) = setup(0);
        params.step_count = 100;
        channels
            .get_mut(0)
            .unwrap()
            .set_transfer_function(TransferFunction::pass_through(0.0, 200.0), None);
        let marcher = RayMarcher::new(&volume, &params, &channels);
        let ray = Ray::new(Vec3::new(0.5, 0.5, -1.0), Vec3::Z);
        let result = marcher.march(&ray, 0.0);
        assert_eq!(result.color, Vec4::ZERO);
        // Every fourth sample skips three base steps.
        assert!(result.samples < 70, "samples {}", result.samples);
    }

    #[test]
    fn test_projection_gating() {
        let volume = VolumeDataset::from_fn(UVec3::new(4, 4, 16), |p| if p.z < 0.5 { 50 } else { 150 })
            .unwrap();
        let mut params = RenderParameters::default();
        params.set_window(0.0, 200.0);
        params.set_dataset_range(0.0, 200.0);
        let channels = ChannelSet::new();
        let ray = Ray::new(Vec3::new(0.5, 0.5, -1.0), Vec3::Z);

        params.set_render_method(RenderMethod::Mip);
        let mip = RayMarcher::new(&volume, &params, &channels).march(&ray, 0.0);
        assert!((mip.color.x - 0.75).abs() < 1e-3);

        params.set_render_method(RenderMethod::MinIp);
        let minip = RayMarcher::new(&volume, &params, &channels).march(&ray, 0.0);
        assert!((minip.color.x - 0.25).abs() < 1e-3);

        params.set_density_gate(0.5, 1.0);
        let gated = RayMarcher::new(&volume, &params, &channels).march(&ray, 0.0);
        assert!(gated.color.x >= 0.5);

        params.set_hu_gate(Some((1000.0, 2000.0)));
        let none = RayMarcher::new(&volume, &params, &channels).march(&ray, 0.0);
        assert_eq!(none.color, Vec4::ZERO);
    }

    #[test]
    fn test_surface_hit_is_opaque() {
        let volume = VolumeDataset::from_fn(UVec3::new(16, 16, 16), |p| {
            if (p - Vec3::splat(0.5)).length() < 0.3 { 180 } else { 0 }
        })
        .unwrap();
        let mut params = RenderParameters::default();
        params.set_window(0.0, 200.0);
        params.set_dataset_range(0.0, 200.0);
        params.set_render_method(RenderMethod::Surface);
        let channels = ChannelSet::new();
        let marcher = RayMarcher::new(&volume, &params, &channels);
        let hit = marcher.march(&Ray::new(Vec3::new(0.5, 0.5, -1.0), Vec3::Z), 0.0);
        assert_eq!(hit.color.w, 1.0);
        let miss = marcher.march(&Ray::new(Vec3::new(0.05, 0.05, -1.0), Vec3::Z), 0.0);
        assert_eq!(miss.color, Vec4::ZERO);
    }

    #[test]
    fn test_clip_plane_removes_half() {
        let (volume, mut params, channels) = setup(100);
        params.clip_plane_count = 1;
        params.clip_planes[0] = [0.0, 0.0, -1.0, 0.0];
        let marcher = RayMarcher::new(&volume, &params, &channels);
        assert!(is_clipped(&params, Vec3::new(0.5, 0.5, 0.25)));
        assert!(!is_clipped(&params, Vec3::new(0.5, 0.5, 0.75)));
        let result = marcher.march(&Ray::new(Vec3::new(0.5, 0.5, -1.0), Vec3::Z), 0.0);
        assert!(result.samples > params.step_count as u32 / 2);
    }

    #[test]
    fn test_channel_blend() {
        let (c, a) = blend_channels(&[(Vec3::X, 0.5), (Vec3::Y, 0.5)]);
        assert!((c - Vec3::new(0.5, 0.5, 0.0)).length() < 1e-6);
        assert_eq!(a, 1.0);
        assert_eq!(blend_channels(&[(Vec3::X, 0.0)]), (Vec3::ZERO, 0.0));
    }

    #[test]
    fn test_jitter_hash_range() {
        for i in 0..1000u32 {
            let h = jitter_hash(i, i * 7, i / 3);
            assert!((0.0..1.0).contains(&h));
        }
        assert_ne!(jitter_hash(1, 2, 0), jitter_hash(1, 2, 1));
    }

    #[test]
    fn test_adaptive_factor_bounds() {
        assert_eq!(adaptive_step_factor(10.0, 0.1, 0.5, 2.0), 0.5);
        assert_eq!(adaptive_step_factor(0.0, 0.1, 0.5, 2.0), 2.0);
        assert!((adaptive_step_factor(0.1, 0.1, 0.5, 2.0) - 1.0).abs() < 1e-6);
        assert!((correct_opacity(0.5, 2.0) - 0.75).abs() < 1e-6);
    }
}
