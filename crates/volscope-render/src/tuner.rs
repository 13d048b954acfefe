//! Workgroup dispatch tuner.
//!
//! The first time a pipeline is dispatched, a small set of candidate workgroup
//! shapes is benchmarked against it and the fastest is cached for the rest of
//! the process.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::pipelines::PipelineId;

/// Fixed presets tried after the occupancy-derived default.
pub const PRESET_SHAPES: [WorkgroupSize; 4] = [
    WorkgroupSize::new(8, 8),
    WorkgroupSize::new(16, 8),
    WorkgroupSize::new(16, 16),
    WorkgroupSize::new(32, 4),
];

/// Execution width assumed when the adapter does not report a subgroup size.
pub const DEFAULT_EXECUTION_WIDTH: u32 = 32;

/// A 2-D workgroup shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    /// Creates a shape.
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Threads per workgroup.
    pub fn invocations(self) -> u32 {
        self.x * self.y
    }

    /// Number of workgroups covering a `width x height` grid.
    pub fn dispatch_count(self, width: u32, height: u32) -> (u32, u32) {
        (width.div_ceil(self.x.max(1)), height.div_ceil(self.y.max(1)))
    }
}

impl Default for WorkgroupSize {
    fn default() -> Self {
        Self::new(8, 8)
    }
}

/// Occupancy limits of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineLimits {
    pub max_invocations: u32,
    pub max_x: u32,
    pub max_y: u32,
    /// SIMD width the hardware schedules together.
    pub execution_width: u32,
}

impl PipelineLimits {
    /// Limits of a wgpu device. `execution_width` falls back to
    /// [`DEFAULT_EXECUTION_WIDTH`] when zero.
    pub fn from_device_limits(limits: &wgpu::Limits, execution_width: u32) -> Self {
        let width = if execution_width > 0 {
            execution_width
        } else {
            DEFAULT_EXECUTION_WIDTH
        };
        Self {
            max_invocations: limits.max_compute_invocations_per_workgroup,
            max_x: limits.max_compute_workgroup_size_x,
            max_y: limits.max_compute_workgroup_size_y,
            execution_width: width,
        }
    }

    /// SIMD width by PCI vendor: 64 on AMD, 32 elsewhere.
    pub fn execution_width_for(info: &wgpu::AdapterInfo) -> u32 {
        const AMD: u32 = 0x1002;
        if info.vendor == AMD {
            64
        } else {
            DEFAULT_EXECUTION_WIDTH
        }
    }

    /// Shape derived from occupancy: one execution width wide, as tall as the
    /// invocation budget allows.
    pub fn default_shape(&self) -> WorkgroupSize {
        let width = self.execution_width.max(1);
        let height = (self.max_invocations / width).max(1);
        self.clamp(WorkgroupSize::new(width, height))
    }

    /// Clamps a shape to the per-axis and total invocation limits.
    pub fn clamp(&self, shape: WorkgroupSize) -> WorkgroupSize {
        let x = shape.x.clamp(1, self.max_x.max(1));
        let mut y = shape.y.clamp(1, self.max_y.max(1));
        while x * y > self.max_invocations.max(1) && y > 1 {
            y /= 2;
        }
        let x = if x * y > self.max_invocations.max(1) {
            self.max_invocations.max(1)
        } else {
            x
        };
        WorkgroupSize::new(x, y)
    }

    /// Default shape plus the presets, clamped and deduplicated in declaration order.
    pub fn candidates(&self) -> Vec<WorkgroupSize> {
        let mut out: Vec<WorkgroupSize> = Vec::with_capacity(1 + PRESET_SHAPES.len());
        for shape in std::iter::once(self.default_shape()).chain(PRESET_SHAPES) {
            let shape = self.clamp(shape);
            if !out.contains(&shape) {
                out.push(shape);
            }
        }
        out
    }
}

/// Caches the fastest workgroup shape per pipeline.
#[derive(Debug, Default)]
pub struct DispatchTuner {
    cache: Mutex<HashMap<PipelineId, WorkgroupSize>>,
}

impl DispatchTuner {
    /// Creates an empty tuner.
    pub fn new() -> Self {
        Self::default()
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<PipelineId, WorkgroupSize>> {
        self.cache.lock().unwrap_or_else(|poisoned| {
            log::warn!("workgroup cache lock was poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Returns the cached shape for `pipeline` without benchmarking.
    pub fn cached(&self, pipeline: PipelineId) -> Option<WorkgroupSize> {
        self.cache().get(&pipeline).copied()
    }

    /// Returns the shape to dispatch `pipeline` with.
    ///
    /// On first use every candidate is passed to `benchmark`, which returns the
    /// measured GPU time or `None` on failure. The fastest wins, ties going to
    /// the earlier candidate. If nothing benchmarks successfully, `None` is
    /// returned, nothing is cached and the caller should use its default shape.
    pub fn configuration(
        &self,
        pipeline: PipelineId,
        limits: &PipelineLimits,
        width: u32,
        height: u32,
        mut benchmark: impl FnMut(WorkgroupSize) -> Option<Duration>,
    ) -> Option<WorkgroupSize> {
        if let Some(shape) = self.cached(pipeline) {
            return Some(shape);
        }

        // The lock is not held while benchmarking so lookups for other
        // pipelines proceed.
        let mut best: Option<(WorkgroupSize, Duration)> = None;
        for candidate in limits.candidates() {
            match benchmark(candidate) {
                Some(time) => {
                    log::debug!(
                        "{pipeline:?} {}x{} on {width}x{height}: {:.3} ms",
                        candidate.x,
                        candidate.y,
                        time.as_secs_f64() * 1000.0
                    );
                    if best.is_none_or(|(_, t)| time < t) {
                        best = Some((candidate, time));
                    }
                }
                None => log::debug!("{pipeline:?} {}x{} failed to benchmark", candidate.x, candidate.y),
            }
        }

        let (shape, _) = best?;
        let chosen = *self.cache().entry(pipeline).or_insert(shape);
        log::info!("{pipeline:?} workgroup {}x{}", chosen.x, chosen.y);
        Some(chosen)
    }

    /// Records a shape without benchmarking.
    pub fn insert(&self, pipeline: PipelineId, shape: WorkgroupSize) {
        self.cache().insert(pipeline, shape);
    }

    /// Forgets every cached shape.
    pub fn reset(&self) {
        self.cache().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> PipelineLimits {
        PipelineLimits {
            max_invocations: 256,
            max_x: 256,
            max_y: 256,
            execution_width: 32,
        }
    }

    #[test]
    fn test_candidates_default_first() {
        let c = limits().candidates();
        assert_eq!(c[0], WorkgroupSize::new(32, 8));
        assert_eq!(&c[1..], &PRESET_SHAPES);
    }

    #[test]
    fn test_candidates_clamped_and_deduped() {
        let small = PipelineLimits {
            max_invocations: 64,
            max_x: 16,
            max_y: 8,
            execution_width: 32,
        };
        let c = small.candidates();
        for shape in &c {
            assert!(shape.invocations() <= 64);
            assert!(shape.x <= 16 && shape.y <= 8);
        }
        let mut unique = c.clone();
        unique.dedup();
        assert_eq!(unique.len(), c.len());
        assert_eq!(c[0], WorkgroupSize::new(16, 2));
    }

    #[test]
    fn test_fastest_wins_and_is_cached() {
        let tuner = DispatchTuner::new();
        let mut calls = 0;
        let shape = tuner.configuration(PipelineId::Raycast, &limits(), 64, 64, |s| {
            calls += 1;
            Some(Duration::from_micros(if s == WorkgroupSize::new(16, 16) { 5 } else { 50 }))
        });
        assert_eq!(shape, Some(WorkgroupSize::new(16, 16)));
        assert_eq!(calls, 5);

        let again = tuner.configuration(PipelineId::Raycast, &limits(), 64, 64, |_| {
            panic!("must not benchmark again")
        });
        assert_eq!(again, shape);
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let tuner = DispatchTuner::new();
        let shape = tuner.configuration(PipelineId::Mpr, &limits(), 8, 8, |_| {
            Some(Duration::from_micros(10))
        });
        assert_eq!(shape, Some(limits().default_shape()));
    }

    #[test]
    fn test_all_failures_return_none() {
        let tuner = DispatchTuner::new();
        assert_eq!(
            tuner.configuration(PipelineId::HistogramLocal, &limits(), 8, 8, |_| None),
            None
        );
        assert_eq!(tuner.cached(PipelineId::HistogramLocal), None);
    }

    #[test]
    fn test_reset_clears_cache() {
        let tuner = DispatchTuner::new();
        tuner.insert(PipelineId::Mpr, WorkgroupSize::new(8, 8));
        assert!(tuner.cached(PipelineId::Mpr).is_some());
        tuner.reset();
        assert!(tuner.cached(PipelineId::Mpr).is_none());
    }

    #[test]
    fn test_poisoned_cache_still_serves_shapes() {
        let tuner = std::sync::Arc::new(DispatchTuner::new());
        tuner.insert(PipelineId::Raycast, WorkgroupSize::new(16, 8));
        let poisoner = std::sync::Arc::clone(&tuner);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.cache.lock().unwrap();
            panic!("poison the cache");
        })
        .join();
        assert!(tuner.cache.is_poisoned());

        assert_eq!(tuner.cached(PipelineId::Raycast), Some(WorkgroupSize::new(16, 8)));
        let mut calls = 0;
        let shape = tuner.configuration(PipelineId::Mpr, &limits(), 8, 8, |_| {
            calls += 1;
            Some(Duration::from_millis(1))
        });
        assert!(shape.is_some());
        let again = tuner.configuration(PipelineId::Mpr, &limits(), 8, 8, |_| {
            calls += 1;
            Some(Duration::from_millis(1))
        });
        assert_eq!(again, shape);
        assert_eq!(calls, limits().candidates().len(), "second lookup must hit the cache");
    }

    #[test]
    fn test_device_limits_conversion() {
        let limits = PipelineLimits::from_device_limits(&wgpu::Limits::default(), 0);
        assert_eq!(limits.execution_width, DEFAULT_EXECUTION_WIDTH);
        assert_eq!(limits.max_invocations, 256);
        assert_eq!(limits.default_shape(), WorkgroupSize::new(32, 8));
    }

    #[test]
    fn test_dispatch_count_rounds_up() {
        assert_eq!(WorkgroupSize::new(16, 8).dispatch_count(100, 17), (7, 3));
    }
}
