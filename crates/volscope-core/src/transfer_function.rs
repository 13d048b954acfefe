//! Transfer functions: sparse color/alpha control points baked into a dense lookup.
//!
//! The on-disk layout is JSON:
//!
//! ```json
//! { "version": 1, "name": "ct-bone", "min": -1024, "max": 3071, "shift": 0,
//!   "colourPoints": [{ "dataValue": 0, "colourValue": { "r": 1, "g": 1, "b": 1, "a": 1 } }],
//!   "alphaPoints":  [{ "dataValue": 0, "alphaValue": 0.5 }] }
//! ```

use std::path::Path;

use glam::Vec4;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Number of samples in a baked lookup table.
pub const LUT_WIDTH: u32 = 512;

/// Control points closer than this are merged (last write wins).
const DEDUP_EPSILON: f32 = 1e-6;

/// Denominators smaller than this are treated as a zero span.
const SPAN_EPSILON: f32 = 1e-6;

/// Linear RGBA color with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    /// Creates a color.
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque gray of the given level.
    pub const fn gray(level: f32) -> Self {
        Self::new(level, level, level, 1.0)
    }

    fn to_vec4(self) -> Vec4 {
        Vec4::new(self.r, self.g, self.b, self.a)
    }
}

/// Color control point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColourPoint {
    pub data_value: f32,
    pub colour_value: Rgba,
}

/// Opacity control point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlphaPoint {
    pub data_value: f32,
    pub alpha_value: f32,
}

trait ControlPoint: Copy {
    fn data_value(&self) -> f32;
    fn set_data_value(&mut self, value: f32);
}

impl ControlPoint for ColourPoint {
    fn data_value(&self) -> f32 {
        self.data_value
    }
    fn set_data_value(&mut self, value: f32) {
        self.data_value = value;
    }
}

impl ControlPoint for AlphaPoint {
    fn data_value(&self) -> f32 {
        self.data_value
    }
    fn set_data_value(&mut self, value: f32) {
        self.data_value = value;
    }
}

/// A transfer function over a data-value range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFunction {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub name: String,
    pub min: f32,
    pub max: f32,
    #[serde(default)]
    pub shift: f32,
    #[serde(default)]
    pub colour_points: Vec<ColourPoint>,
    #[serde(default)]
    pub alpha_points: Vec<AlphaPoint>,
}

fn default_version() -> u32 {
    1
}

impl Default for TransferFunction {
    fn default() -> Self {
        Self::pass_through(-1024.0, 3071.0)
    }
}

impl TransferFunction {
    /// Grayscale ramp with linear opacity across `[min, max]`.
    pub fn pass_through(min: f32, max: f32) -> Self {
        Self {
            version: 1,
            name: "default".to_string(),
            min,
            max,
            shift: 0.0,
            colour_points: vec![
                ColourPoint {
                    data_value: min,
                    colour_value: Rgba::gray(0.0),
                },
                ColourPoint {
                    data_value: max,
                    colour_value: Rgba::gray(1.0),
                },
            ],
            alpha_points: vec![
                AlphaPoint {
                    data_value: min,
                    alpha_value: 0.0,
                },
                AlphaPoint {
                    data_value: max,
                    alpha_value: 1.0,
                },
            ],
        }
    }

    /// Parses a transfer function from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut tf: Self = serde_json::from_str(json)?;
        tf.sanitize();
        Ok(tf)
    }

    /// Serializes to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reads a transfer function file.
    pub fn try_load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Reads a transfer function file, falling back to [`TransferFunction::default`]
    /// when the file is missing or corrupt.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::try_load(path) {
            Ok(tf) => tf,
            Err(e) => {
                log::warn!(
                    "failed to load transfer function {}: {e}; using default",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// Writes the transfer function as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Normalizes the stored control points in place.
    ///
    /// Afterwards both lists are sorted, strictly increasing, clamped to the range,
    /// and start at exactly `min` and end at exactly `max`. The shift is not applied.
    pub fn sanitize(&mut self) {
        if self.min > self.max {
            log::warn!(
                "transfer function '{}' range [{}, {}] inverted, swapping",
                self.name,
                self.min,
                self.max
            );
            std::mem::swap(&mut self.min, &mut self.max);
        }
        self.colour_points = sanitize_points(
            &self.colour_points,
            0.0,
            self.min,
            self.max,
            ColourPoint {
                data_value: 0.0,
                colour_value: Rgba::gray(1.0),
            },
        );
        self.alpha_points = sanitize_points(
            &self.alpha_points,
            0.0,
            self.min,
            self.max,
            AlphaPoint {
                data_value: 0.0,
                alpha_value: 1.0,
            },
        );
    }

    /// Bakes the function into `width` RGBA samples evenly spaced over `[min, max]`.
    ///
    /// The shift is applied to every control point before clamping, so shifting moves
    /// features along the data axis without changing the range.
    pub fn bake(&self, width: u32) -> Vec<[f32; 4]> {
        self.bake_over(width, self.min, self.max)
    }

    /// Bakes `width` samples evenly spaced over the data domain `[lo, hi]`.
    ///
    /// The kernels index lookup tables by the dataset's normalized intensity, so
    /// tables they read are baked over the dataset range. Column `i` then holds the
    /// color this function gives `lo + (hi - lo) * i / (width - 1)`. Values outside
    /// `[min, max]` take the nearest endpoint.
    pub fn bake_over(&self, width: u32, lo: f32, hi: f32) -> Vec<[f32; 4]> {
        let width = width.max(2) as usize;
        let (min, max) = (self.min.min(self.max), self.min.max(self.max));
        let (lo, hi) = (lo.min(hi), lo.max(hi));
        let colours = sanitize_points(
            &self.colour_points,
            self.shift,
            min,
            max,
            ColourPoint {
                data_value: 0.0,
                colour_value: Rgba::gray(1.0),
            },
        );
        let alphas = sanitize_points(
            &self.alpha_points,
            self.shift,
            min,
            max,
            AlphaPoint {
                data_value: 0.0,
                alpha_value: 1.0,
            },
        );

        let mut lut = Vec::with_capacity(width);
        let mut ci = 0usize;
        let mut ai = 0usize;
        for column in 0..width {
            let t = column as f32 / (width - 1) as f32;
            let value = lo + (hi - lo) * t;

            while ci + 2 < colours.len() && colours[ci + 1].data_value < value {
                ci += 1;
            }
            while ai + 2 < alphas.len() && alphas[ai + 1].data_value < value {
                ai += 1;
            }

            let (c0, c1) = (colours[ci], colours[(ci + 1).min(colours.len() - 1)]);
            let (a0, a1) = (alphas[ai], alphas[(ai + 1).min(alphas.len() - 1)]);

            let c_span = c1.data_value - c0.data_value;
            let c_t = if c_span.abs() < SPAN_EPSILON {
                0.0
            } else {
                ((value - c0.data_value) / c_span).clamp(0.0, 1.0)
            };
            let a_span = a1.data_value - a0.data_value;
            let a_t = if a_span.abs() < SPAN_EPSILON {
                0.0
            } else {
                ((value - a0.data_value) / a_span).clamp(0.0, 1.0)
            };

            let colour = c0
                .colour_value
                .to_vec4()
                .lerp(c1.colour_value.to_vec4(), c_t);
            let alpha = a0.alpha_value + (a1.alpha_value - a0.alpha_value) * a_t;
            lut.push([
                colour.x.clamp(0.0, 1.0),
                colour.y.clamp(0.0, 1.0),
                colour.z.clamp(0.0, 1.0),
                alpha.clamp(0.0, 1.0),
            ]);
        }
        lut
    }

    /// Bakes and quantizes to RGBA8 for texture upload.
    pub fn bake_rgba8(&self, width: u32) -> Vec<u8> {
        quantize(self.bake(width))
    }

    /// [`Self::bake_over`] quantized to RGBA8.
    pub fn bake_rgba8_over(&self, width: u32, lo: f32, hi: f32) -> Vec<u8> {
        quantize(self.bake_over(width, lo, hi))
    }
}

fn quantize(lut: Vec<[f32; 4]>) -> Vec<u8> {
    lut.into_iter()
        .flat_map(|texel| texel.map(|c| (c * 255.0).round() as u8))
        .collect()
}

/// Sorts, shifts, clamps, de-duplicates and pins endpoints of a control point list.
fn sanitize_points<P: ControlPoint>(
    points: &[P],
    shift: f32,
    min: f32,
    max: f32,
    fallback: P,
) -> Vec<P> {
    let mut sorted: Vec<P> = points
        .iter()
        .filter(|p| p.data_value().is_finite())
        .map(|p| {
            let mut p = *p;
            p.set_data_value((p.data_value() + shift).clamp(min, max));
            p
        })
        .collect();
    // Stable sort keeps insertion order among equal values, so the later point wins below.
    sorted.sort_by(|a, b| a.data_value().total_cmp(&b.data_value()));

    let mut out: Vec<P> = Vec::with_capacity(sorted.len() + 2);
    for p in sorted {
        match out.last_mut() {
            Some(last) if (p.data_value() - last.data_value()).abs() <= DEDUP_EPSILON => {
                *last = p;
            }
            _ => out.push(p),
        }
    }

    if out.is_empty() {
        let mut lo = fallback;
        lo.set_data_value(min);
        let mut hi = fallback;
        hi.set_data_value(max);
        return if max - min > DEDUP_EPSILON {
            vec![lo, hi]
        } else {
            vec![lo]
        };
    }

    if let Some(first) = out.first().copied() {
        if first.data_value() - min > DEDUP_EPSILON {
            let mut pinned = first;
            pinned.set_data_value(min);
            out.insert(0, pinned);
        } else {
            out[0].set_data_value(min);
        }
    }
    if let Some(last) = out.last().copied() {
        let n = out.len();
        if max - last.data_value() > DEDUP_EPSILON {
            let mut pinned = last;
            pinned.set_data_value(max);
            out.push(pinned);
        } else if n > 1 {
            out[n - 1].set_data_value(max);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn colour(value: f32, level: f32) -> ColourPoint {
        ColourPoint {
            data_value: value,
            colour_value: Rgba::gray(level),
        }
    }

    fn alpha(value: f32, a: f32) -> AlphaPoint {
        AlphaPoint {
            data_value: value,
            alpha_value: a,
        }
    }

    #[test]
    fn test_sanitize_pins_and_sorts() {
        let mut tf = TransferFunction {
            min: 0.0,
            max: 100.0,
            colour_points: vec![colour(70.0, 0.7), colour(20.0, 0.2), colour(150.0, 1.0)],
            alpha_points: vec![alpha(50.0, 0.5)],
            ..TransferFunction::default()
        };
        tf.sanitize();
        let values: Vec<f32> = tf.colour_points.iter().map(|p| p.data_value).collect();
        assert_eq!(values, vec![0.0, 20.0, 70.0, 100.0]);
        assert_eq!(tf.colour_points[0].colour_value, Rgba::gray(0.2));
        assert_eq!(tf.alpha_points.first().unwrap().data_value, 0.0);
        assert_eq!(tf.alpha_points.last().unwrap().data_value, 100.0);
    }

    #[test]
    fn test_dedup_last_wins() {
        let mut tf = TransferFunction {
            min: 0.0,
            max: 10.0,
            colour_points: vec![colour(5.0, 0.1), colour(5.0, 0.9)],
            alpha_points: vec![],
            ..TransferFunction::default()
        };
        tf.sanitize();
        assert_eq!(tf.colour_points.len(), 3);
        assert_eq!(tf.colour_points[1].colour_value, Rgba::gray(0.9));
        // Empty alpha list gets an opaque pair.
        assert_eq!(tf.alpha_points.len(), 2);
    }

    #[test]
    fn test_bake_linear_ramp() {
        let tf = TransferFunction::pass_through(0.0, 511.0);
        let lut = tf.bake(512);
        assert_eq!(lut.len(), 512);
        assert_eq!(lut[0], [0.0, 0.0, 0.0, 0.0]);
        assert_eq!(lut[511], [1.0, 1.0, 1.0, 1.0]);
        assert!((lut[256][3] - 256.0 / 511.0).abs() < 1e-5);
        assert!((lut[256][0] - 256.0 / 511.0).abs() < 1e-5);
    }

    #[test]
    fn test_bake_with_shift() {
        let tf = TransferFunction {
            min: 0.0,
            max: 100.0,
            shift: 50.0,
            colour_points: vec![colour(0.0, 1.0), colour(100.0, 1.0)],
            alpha_points: vec![alpha(0.0, 0.0), alpha(10.0, 1.0)],
            ..TransferFunction::default()
        };
        let lut = tf.bake(101);
        // Ramp moved from [0, 10] to [50, 60].
        assert_eq!(lut[40][3], 0.0);
        assert!((lut[55][3] - 0.5).abs() < 1e-5);
        assert_eq!(lut[80][3], 1.0);
    }

    #[test]
    fn test_bake_step_edge() {
        let tf = TransferFunction {
            min: 0.0,
            max: 100.0,
            colour_points: vec![colour(0.0, 0.0), colour(100.0, 1.0)],
            alpha_points: vec![alpha(0.0, 0.0), alpha(50.0, 0.0), alpha(50.5, 1.0), alpha(100.0, 1.0)],
            ..TransferFunction::default()
        };
        let lut = tf.bake(101);
        assert_eq!(lut[50][3], 0.0);
        assert_eq!(lut[51][3], 1.0);
    }

    #[test]
    fn test_bake_over_dataset_range() {
        let tf = TransferFunction {
            min: -1024.0,
            max: 3071.0,
            colour_points: vec![colour(-1024.0, 1.0), colour(3071.0, 1.0)],
            alpha_points: vec![alpha(150.0, 0.0), alpha(400.0, 0.35)],
            ..TransferFunction::default()
        };
        // Scanned range 75..525 HU, one column per HU.
        let lut = tf.bake_over(451, 75.0, 525.0);
        let at = |hu: f32| lut[(hu - 75.0) as usize][3];
        assert_eq!(at(75.0), 0.0);
        assert_eq!(at(149.0), 0.0);
        assert!((at(300.0) - 0.21).abs() < 1e-5);
        assert!((at(525.0) - 0.35).abs() < 1e-5);

        // The same HU through the function's own range agrees.
        let own = tf.bake(4096);
        assert!((own[300 + 1024][3] - at(300.0)).abs() < 1e-5);

        assert_eq!(tf.bake_rgba8_over(451, 75.0, 525.0).len(), 451 * 4);
    }

    #[test]
    fn test_json_layout() {
        let json = r#"{
            "version": 2, "name": "bone", "min": -100, "max": 900, "shift": 0,
            "colourPoints": [{ "dataValue": 300, "colourValue": { "r": 1, "g": 0.9, "b": 0.8, "a": 1 } }],
            "alphaPoints": [{ "dataValue": 200, "alphaValue": 0.0 }, { "dataValue": 400, "alphaValue": 0.8 }]
        }"#;
        let tf = TransferFunction::from_json(json).unwrap();
        assert_eq!(tf.version, 2);
        assert_eq!(tf.name, "bone");
        assert_eq!(tf.colour_points.len(), 3);
        assert_eq!(tf.alpha_points.first().unwrap().data_value, -100.0);

        let out = tf.to_json().unwrap();
        assert!(out.contains("colourPoints"));
        assert!(out.contains("alphaValue"));
    }

    #[test]
    fn test_load_missing_falls_back() {
        let tf = TransferFunction::load("/nonexistent/volscope/tf.json");
        assert_eq!(tf, TransferFunction::default());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join("volscope_tf_roundtrip.json");
        let tf = TransferFunction::pass_through(0.0, 10.0);
        tf.save(&path).unwrap();
        let loaded = TransferFunction::load(&path);
        assert_eq!(loaded, tf);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_corrupt_falls_back() {
        let path = std::env::temp_dir().join("volscope_tf_corrupt.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(TransferFunction::load(&path), TransferFunction::default());
        let _ = std::fs::remove_file(&path);
    }

    proptest! {
        #[test]
        fn prop_sanitize_pins_endpoints(
            values in proptest::collection::vec(-2000.0f32..4000.0, 1..24),
            min in -1500.0f32..0.0,
            span in 1.0f32..3000.0,
        ) {
            let max = min + span;
            let mut tf = TransferFunction {
                min,
                max,
                colour_points: values.iter().map(|&v| colour(v, 0.5)).collect(),
                alpha_points: values.iter().map(|&v| alpha(v, 0.5)).collect(),
                ..TransferFunction::default()
            };
            tf.sanitize();
            prop_assert_eq!(tf.colour_points.first().unwrap().data_value, min);
            prop_assert_eq!(tf.colour_points.last().unwrap().data_value, max);
            prop_assert_eq!(tf.alpha_points.first().unwrap().data_value, min);
            prop_assert_eq!(tf.alpha_points.last().unwrap().data_value, max);
            for pair in tf.colour_points.windows(2) {
                prop_assert!(pair[1].data_value > pair[0].data_value);
            }
        }
    }
}
