//! Named transfer-function presets.

use std::collections::HashMap;

use volscope_core::transfer_function::{AlphaPoint, ColourPoint, Rgba, TransferFunction};

/// CT intensity range the built-in presets are authored for.
const CT_RANGE: (f32, f32) = (-1024.0, 3071.0);

/// Registry of transfer functions by preset id.
#[derive(Debug, Clone, Default)]
pub struct PresetRegistry {
    presets: HashMap<String, TransferFunction>,
}

impl PresetRegistry {
    /// Creates a registry holding the built-in presets.
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register_defaults();
        registry
    }

    fn register_defaults(&mut self) {
        let (lo, hi) = CT_RANGE;

        // Bone: transparent below 150 HU, ivory opaque from ~700 HU
        self.register(build(
            "ct-bone",
            CT_RANGE,
            &[
                (lo, Rgba::new(0.0, 0.0, 0.0, 1.0)),
                (150.0, Rgba::new(0.55, 0.25, 0.15, 1.0)),
                (400.0, Rgba::new(0.88, 0.80, 0.65, 1.0)),
                (hi, Rgba::new(1.0, 1.0, 0.95, 1.0)),
            ],
            &[(lo, 0.0), (150.0, 0.0), (400.0, 0.35), (700.0, 0.85), (hi, 0.95)],
        ));

        // Soft tissue: muscle and organs, fat faint, bone dimmed
        self.register(build(
            "ct-soft-tissue",
            CT_RANGE,
            &[
                (lo, Rgba::new(0.0, 0.0, 0.0, 1.0)),
                (-100.0, Rgba::new(0.75, 0.55, 0.35, 1.0)),
                (40.0, Rgba::new(0.85, 0.35, 0.30, 1.0)),
                (300.0, Rgba::new(1.0, 0.90, 0.85, 1.0)),
                (hi, Rgba::new(1.0, 1.0, 1.0, 1.0)),
            ],
            &[(lo, 0.0), (-150.0, 0.0), (-50.0, 0.05), (60.0, 0.35), (300.0, 0.2), (hi, 0.2)],
        ));

        // Lung: airways and parenchyma around -600 HU
        self.register(build(
            "ct-lung",
            CT_RANGE,
            &[
                (lo, Rgba::new(0.0, 0.0, 0.0, 1.0)),
                (-900.0, Rgba::new(0.30, 0.45, 0.70, 1.0)),
                (-500.0, Rgba::new(0.80, 0.65, 0.60, 1.0)),
                (hi, Rgba::new(1.0, 1.0, 1.0, 1.0)),
            ],
            &[(lo, 0.0), (-950.0, 0.0), (-700.0, 0.15), (-400.0, 0.05), (-200.0, 0.0), (hi, 0.0)],
        ));

        // Angio: contrast-filled vessels between 150 and 500 HU
        self.register(build(
            "ct-angio",
            CT_RANGE,
            &[
                (lo, Rgba::new(0.0, 0.0, 0.0, 1.0)),
                (120.0, Rgba::new(0.60, 0.05, 0.05, 1.0)),
                (300.0, Rgba::new(0.95, 0.25, 0.20, 1.0)),
                (600.0, Rgba::new(1.0, 0.95, 0.90, 1.0)),
                (hi, Rgba::new(1.0, 1.0, 1.0, 1.0)),
            ],
            &[(lo, 0.0), (100.0, 0.0), (200.0, 0.5), (500.0, 0.8), (hi, 0.9)],
        ));

        // MR: normalized 12-bit intensities
        self.register(build(
            "mr-default",
            (0.0, 4095.0),
            &[
                (0.0, Rgba::new(0.0, 0.0, 0.0, 1.0)),
                (800.0, Rgba::new(0.70, 0.60, 0.50, 1.0)),
                (4095.0, Rgba::new(1.0, 1.0, 1.0, 1.0)),
            ],
            &[(0.0, 0.0), (200.0, 0.0), (1200.0, 0.4), (4095.0, 0.8)],
        ));

        let mut grayscale = TransferFunction::pass_through(lo, hi);
        grayscale.name = "grayscale".to_string();
        self.register(grayscale);
    }

    /// Registers a transfer function under its name, replacing any existing entry.
    pub fn register(&mut self, transfer_function: TransferFunction) {
        let mut tf = transfer_function;
        tf.sanitize();
        self.presets.insert(tf.name.clone(), tf);
    }

    /// Gets a preset by id.
    pub fn get(&self, id: &str) -> Option<&TransferFunction> {
        self.presets.get(id)
    }

    /// Returns all preset ids, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.presets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn build(
    name: &str,
    range: (f32, f32),
    colours: &[(f32, Rgba)],
    alphas: &[(f32, f32)],
) -> TransferFunction {
    TransferFunction {
        version: 1,
        name: name.to_string(),
        min: range.0,
        max: range.1,
        shift: 0.0,
        colour_points: colours
            .iter()
            .map(|&(data_value, colour_value)| ColourPoint {
                data_value,
                colour_value,
            })
            .collect(),
        alpha_points: alphas
            .iter()
            .map(|&(data_value, alpha_value)| AlphaPoint {
                data_value,
                alpha_value,
            })
            .collect(),
    }
}
