//! Histogram-driven auto-window presets that synthesize tone curves.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::params::normalize;
use crate::tone_curve::TONE_X_MAX;

/// Box filter radius applied to histograms before analysis.
const SMOOTHING_RADIUS: usize = 2;

/// How the window is derived from the histogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AutoWindowPreset {
    /// Window spans the given lower and upper cumulative fractions.
    Percentile { low: f32, high: f32 },
    /// Window straddles the Otsu threshold between the two class means.
    Otsu,
}

impl Default for AutoWindowPreset {
    fn default() -> Self {
        Self::Percentile {
            low: 0.01,
            high: 0.99,
        }
    }
}

/// A computed intensity window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityWindow {
    pub min: f32,
    pub max: f32,
}

/// Applies a centred box filter of radius [`SMOOTHING_RADIUS`].
pub fn box_smooth(bins: &[u32]) -> Vec<f32> {
    let n = bins.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(SMOOTHING_RADIUS);
            let hi = (i + SMOOTHING_RADIUS).min(n.saturating_sub(1));
            let sum: f64 = bins[lo..=hi].iter().map(|&c| f64::from(c)).sum();
            (sum / (hi - lo + 1) as f64) as f32
        })
        .collect()
}

/// Bin index at which the cumulative fraction first reaches `fraction`.
fn percentile_bin(smoothed: &[f32], fraction: f32) -> usize {
    let total: f64 = smoothed.iter().map(|&c| f64::from(c)).sum();
    if total <= 0.0 {
        return 0;
    }
    let target = total * f64::from(fraction.clamp(0.0, 1.0));
    let mut acc = 0.0f64;
    for (i, &c) in smoothed.iter().enumerate() {
        acc += f64::from(c);
        if acc >= target {
            return i;
        }
    }
    smoothed.len().saturating_sub(1)
}

/// Otsu threshold bin plus the background and foreground class means (in bins).
fn otsu(smoothed: &[f32]) -> (usize, f32, f32) {
    let total: f64 = smoothed.iter().map(|&c| f64::from(c)).sum();
    if total <= 0.0 || smoothed.len() < 2 {
        return (0, 0.0, 0.0);
    }
    let weighted_total: f64 = smoothed
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * f64::from(c))
        .sum();

    let mut best = (0usize, f64::MIN, 0.0f64, 0.0f64);
    let mut w0 = 0.0f64;
    let mut sum0 = 0.0f64;
    for (t, &c) in smoothed.iter().enumerate() {
        w0 += f64::from(c);
        sum0 += t as f64 * f64::from(c);
        let w1 = total - w0;
        if w0 <= 0.0 || w1 <= 0.0 {
            continue;
        }
        let mu0 = sum0 / w0;
        let mu1 = (weighted_total - sum0) / w1;
        let between = w0 * w1 * (mu0 - mu1) * (mu0 - mu1);
        if between > best.1 {
            best = (t, between, mu0, mu1);
        }
    }
    (best.0, best.2 as f32, best.3 as f32)
}

/// Computes an intensity window from a histogram spanning `[range_min, range_max]`.
pub fn compute_window(
    bins: &[u32],
    range_min: f32,
    range_max: f32,
    preset: AutoWindowPreset,
) -> Option<IntensityWindow> {
    if bins.len() < 2 || bins.iter().all(|&c| c == 0) {
        return None;
    }
    let smoothed = box_smooth(bins);
    let last = (bins.len() - 1) as f32;
    let to_value = |bin: f32| range_min + (range_max - range_min) * (bin / last);

    let (lo, hi) = match preset {
        AutoWindowPreset::Percentile { low, high } => {
            let (low, high) = (low.min(high), low.max(high));
            (
                percentile_bin(&smoothed, low) as f32,
                percentile_bin(&smoothed, high) as f32,
            )
        }
        AutoWindowPreset::Otsu => {
            let (t, mu0, mu1) = otsu(&smoothed);
            let t = t as f32;
            ((mu0 + t) * 0.5, (t + mu1) * 0.5)
        }
    };
    let hi = if hi <= lo { (lo + 1.0).min(last) } else { hi };
    Some(IntensityWindow {
        min: to_value(lo),
        max: to_value(hi),
    })
}

/// Builds the 8-point shoulder, rise, plateau curve over a tone-axis window.
pub fn s_curve(lo: f32, hi: f32) -> Vec<Vec2> {
    let lo = lo.clamp(0.0, TONE_X_MAX);
    let hi = hi.clamp(lo, TONE_X_MAX);
    let w = hi - lo;
    vec![
        Vec2::new(0.0, 0.0),
        Vec2::new(lo, 0.0),
        Vec2::new(lo + 0.15 * w, 0.05),
        Vec2::new(lo + 0.35 * w, 0.3),
        Vec2::new(lo + 0.65 * w, 0.7),
        Vec2::new(lo + 0.85 * w, 0.95),
        Vec2::new(hi, 1.0),
        Vec2::new(TONE_X_MAX, 1.0),
    ]
}

/// Computes tone curve control points for a preset.
///
/// The histogram spans `histogram_range`; the tone axis is window density over
/// `display_window`, so the computed intensity window is re-expressed in tone units.
pub fn auto_window_points(
    bins: &[u32],
    histogram_range: (f32, f32),
    display_window: (f32, f32),
    preset: AutoWindowPreset,
) -> Option<Vec<Vec2>> {
    let window = compute_window(bins, histogram_range.0, histogram_range.1, preset)?;
    let lo = normalize(window.min, display_window.0, display_window.1) * TONE_X_MAX;
    let hi = normalize(window.max, display_window.0, display_window.1) * TONE_X_MAX;
    log::debug!(
        "auto-window {preset:?}: [{}, {}] -> tone [{lo:.1}, {hi:.1}]",
        window.min,
        window.max
    );
    Some(s_curve(lo, hi))
}
