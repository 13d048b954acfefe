//! Tone curves: a secondary opacity/gain mapping over window density.
//!
//! The x axis spans `[0, 255]` (window density times 255), y spans `[0, 1]`.
//! Curves are evaluated into a 256-entry cache that is uploaded as the
//! channel's tone lookup buffer.

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Number of cached samples (one per integer x).
pub const TONE_SAMPLES: usize = 256;

/// Largest x coordinate.
pub const TONE_X_MAX: f32 = 255.0;

/// Minimum spacing between consecutive control points.
pub const MIN_SPACING: f32 = 0.5;

/// Interpolation between control points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ToneInterpolation {
    /// Piecewise linear.
    Linear,
    /// Natural cubic spline.
    #[default]
    CubicSpline,
}

/// A tone curve with its sample cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneCurve {
    points: Vec<Vec2>,
    interpolation: ToneInterpolation,
    #[serde(skip)]
    samples: Vec<f32>,
}

impl Default for ToneCurve {
    fn default() -> Self {
        Self::identity()
    }
}

impl ToneCurve {
    /// Identity ramp with six evenly spaced points.
    pub fn identity() -> Self {
        let points = (0..6)
            .map(|i| {
                let x = i as f32 * 51.0;
                Vec2::new(x, x / TONE_X_MAX)
            })
            .collect();
        Self::new(points, ToneInterpolation::Linear)
    }

    /// Creates a curve from arbitrary points; they are sanitized immediately.
    pub fn new(points: Vec<Vec2>, interpolation: ToneInterpolation) -> Self {
        let mut curve = Self {
            points,
            interpolation,
            samples: Vec::new(),
        };
        curve.sanitize();
        curve
    }

    /// Returns the sanitized control points.
    pub fn points(&self) -> &[Vec2] {
        &self.points
    }

    /// Replaces the control points.
    pub fn set_points(&mut self, points: Vec<Vec2>) {
        self.points = points;
        self.sanitize();
    }

    /// Returns the interpolation mode.
    pub fn interpolation(&self) -> ToneInterpolation {
        self.interpolation
    }

    /// Changes the interpolation mode and rebuilds the cache.
    pub fn set_interpolation(&mut self, interpolation: ToneInterpolation) {
        self.interpolation = interpolation;
        self.rebuild();
    }

    /// Sorts the points, clamps them to the domain, enforces [`MIN_SPACING`],
    /// pins the endpoints to x = 0 and x = 255, and rebuilds the cache.
    pub fn sanitize(&mut self) {
        let mut pts: Vec<Vec2> = self
            .points
            .iter()
            .filter(|p| p.is_finite())
            .map(|p| Vec2::new(p.x.clamp(0.0, TONE_X_MAX), p.y.clamp(0.0, 1.0)))
            .collect();
        pts.sort_by(|a, b| a.x.total_cmp(&b.x));

        let (first_y, last_y) = match (pts.first(), pts.last()) {
            (Some(first), Some(last)) => (first.y, last.y),
            _ => (0.0, 1.0),
        };

        let mut out = Vec::with_capacity(pts.len() + 2);
        out.push(Vec2::new(0.0, first_y));
        for p in pts {
            let prev = out[out.len() - 1].x;
            if p.x >= prev + MIN_SPACING && p.x <= TONE_X_MAX - MIN_SPACING {
                out.push(p);
            }
        }
        out.push(Vec2::new(TONE_X_MAX, last_y));

        self.points = out;
        self.rebuild();
    }

    /// Re-evaluates the sample cache from the control points.
    pub fn rebuild(&mut self) {
        let second = match self.interpolation {
            ToneInterpolation::Linear => None,
            ToneInterpolation::CubicSpline => Some(natural_spline_second_derivatives(&self.points)),
        };
        self.samples = (0..TONE_SAMPLES)
            .map(|i| evaluate(&self.points, second.as_deref(), i as f32))
            .collect();
    }

    /// Cached samples, one per integer x in `[0, 255]`.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Evaluates the curve at `x` by linear interpolation of the cache.
    pub fn sample(&self, x: f32) -> f32 {
        if self.samples.len() != TONE_SAMPLES {
            return evaluate(&self.points, None, x);
        }
        let x = x.clamp(0.0, TONE_X_MAX);
        let i0 = x.floor() as usize;
        let i1 = (i0 + 1).min(TONE_SAMPLES - 1);
        let t = x - i0 as f32;
        self.samples[i0] + (self.samples[i1] - self.samples[i0]) * t
    }

    /// Evaluates the curve at a window density in `[0, 1]`.
    pub fn sample_density(&self, density: f32) -> f32 {
        self.sample(density * TONE_X_MAX)
    }
}

/// Solves for natural-spline second derivatives with the Thomas algorithm.
fn natural_spline_second_derivatives(points: &[Vec2]) -> Vec<f32> {
    let n = points.len();
    let mut m = vec![0.0f32; n];
    if n < 3 {
        return m;
    }

    let h: Vec<f32> = points.windows(2).map(|w| w[1].x - w[0].x).collect();
    let interior = n - 2;
    let mut sub = vec![0.0f32; interior];
    let mut diag = vec![0.0f32; interior];
    let mut sup = vec![0.0f32; interior];
    let mut rhs = vec![0.0f32; interior];
    for k in 0..interior {
        let i = k + 1;
        sub[k] = h[i - 1];
        diag[k] = 2.0 * (h[i - 1] + h[i]);
        sup[k] = h[i];
        rhs[k] = 6.0
            * ((points[i + 1].y - points[i].y) / h[i] - (points[i].y - points[i - 1].y) / h[i - 1]);
    }

    // Forward sweep.
    for k in 1..interior {
        let w = sub[k] / diag[k - 1];
        diag[k] -= w * sup[k - 1];
        rhs[k] -= w * rhs[k - 1];
    }
    // Back substitution.
    let mut solution = vec![0.0f32; interior];
    solution[interior - 1] = rhs[interior - 1] / diag[interior - 1];
    for k in (0..interior - 1).rev() {
        solution[k] = (rhs[k] - sup[k] * solution[k + 1]) / diag[k];
    }

    m[1..=interior].copy_from_slice(&solution);
    m
}

fn evaluate(points: &[Vec2], second: Option<&[f32]>, x: f32) -> f32 {
    let Some(first) = points.first() else {
        return x / TONE_X_MAX;
    };
    if points.len() == 1 || x <= first.x {
        return first.y;
    }
    let last = points[points.len() - 1];
    if x >= last.x {
        return last.y;
    }

    let i = points
        .windows(2)
        .position(|w| x <= w[1].x)
        .unwrap_or(points.len() - 2);
    let (p0, p1) = (points[i], points[i + 1]);
    let h = p1.x - p0.x;
    if h <= f32::EPSILON {
        return p1.y;
    }

    let y = match second {
        None => p0.y + (p1.y - p0.y) * (x - p0.x) / h,
        Some(m) => {
            let a = p1.x - x;
            let b = x - p0.x;
            m[i] * a * a * a / (6.0 * h)
                + m[i + 1] * b * b * b / (6.0 * h)
                + (p0.y / h - m[i] * h / 6.0) * a
                + (p1.y / h - m[i + 1] * h / 6.0) * b
        }
    };
    y.clamp(0.0, 1.0)
}
