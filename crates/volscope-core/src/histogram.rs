//! Histogram planning and binning shared by the GPU reducer and the CPU reference.

use serde::{Deserialize, Serialize};

/// Smallest allowed bin count.
pub const MIN_BINS: u32 = 64;

/// Largest allowed bin count.
pub const MAX_BINS: u32 = 4096;

/// Clamps a requested bin count to `[MIN_BINS, MAX_BINS]`.
pub fn clamp_bin_count(bins: u32) -> u32 {
    bins.clamp(MIN_BINS, MAX_BINS)
}

/// Maps a raw intensity to its bin: normalize to `[0, 1]`, scale by `bins - 1`, round.
pub fn bin_index(value: f32, voxel_min: f32, voxel_max: f32, bins: u32) -> u32 {
    let span = voxel_max - voxel_min;
    let t = if span.abs() < f32::EPSILON {
        0.0
    } else {
        ((value - voxel_min) / span).clamp(0.0, 1.0)
    };
    let last = bins.max(1) - 1;
    ((t * last as f32).round() as u32).min(last)
}

/// How the GPU reducer accumulates counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistogramStrategy {
    /// Each workgroup accumulates into local memory and merges once.
    WorkgroupLocal,
    /// Every thread increments the global buffer directly.
    GlobalAtomic,
}

/// Dispatch plan for one histogram request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramPlan {
    /// Number of output channels (1..=4), each an identical copy.
    pub channels: u32,
    /// Bins per channel.
    pub bins: u32,
    /// Chosen strategy.
    pub strategy: HistogramStrategy,
}

impl HistogramPlan {
    /// Plans a request against a workgroup-local memory budget in bytes.
    pub fn new(channels: u32, bins: u32, local_memory_budget: u32) -> Self {
        let channels = channels.clamp(1, crate::params::MAX_CHANNELS as u32);
        let bins = clamp_bin_count(bins);
        let required = u64::from(channels) * u64::from(bins) * 4;
        let strategy = if required <= u64::from(local_memory_budget) {
            HistogramStrategy::WorkgroupLocal
        } else {
            HistogramStrategy::GlobalAtomic
        };
        Self {
            channels,
            bins,
            strategy,
        }
    }

    /// Size of the global result buffer in `u32` words.
    pub fn word_count(&self) -> usize {
        (self.channels * self.bins) as usize
    }
}

/// Intensity histogram for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHistogram {
    /// Counts per bin.
    pub bins: Vec<u32>,
}

impl ChannelHistogram {
    /// Total number of counted voxels.
    pub fn total(&self) -> u64 {
        self.bins.iter().map(|&c| u64::from(c)).sum()
    }

    /// Splits a flat `channels * bins` buffer into per-channel histograms.
    pub fn split(words: &[u32], plan: &HistogramPlan) -> Vec<Self> {
        words
            .chunks(plan.bins as usize)
            .take(plan.channels as usize)
            .map(|chunk| Self {
                bins: chunk.to_vec(),
            })
            .collect()
    }
}

/// CPU reference of the reducer: identical binning, fanned out to every channel.
pub fn compute_reference(
    voxels: &[i16],
    voxel_min: f32,
    voxel_max: f32,
    plan: &HistogramPlan,
) -> Vec<ChannelHistogram> {
    let mut bins = vec![0u32; plan.bins as usize];
    for &v in voxels {
        let idx = bin_index(f32::from(v), voxel_min, voxel_max, plan.bins) as usize;
        bins[idx] = bins[idx].saturating_add(1);
    }
    (0..plan.channels)
        .map(|_| ChannelHistogram { bins: bins.clone() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bin_count_clamped() {
        assert_eq!(clamp_bin_count(1), 64);
        assert_eq!(clamp_bin_count(512), 512);
        assert_eq!(clamp_bin_count(100_000), 4096);
    }

    #[test]
    fn test_bin_index_rounding() {
        assert_eq!(bin_index(-1000.0, -1000.0, 1000.0, 256), 0);
        assert_eq!(bin_index(1000.0, -1000.0, 1000.0, 256), 255);
        assert_eq!(bin_index(0.0, -1000.0, 1000.0, 256), 128);
        assert_eq!(bin_index(5000.0, -1000.0, 1000.0, 256), 255);
        assert_eq!(bin_index(7.0, 7.0, 7.0, 64), 0);
    }

    #[test]
    fn test_plan_strategy() {
        let plan = HistogramPlan::new(4, 512, 16384);
        assert_eq!(plan.strategy, HistogramStrategy::WorkgroupLocal);
        let plan = HistogramPlan::new(4, 4096, 16384);
        assert_eq!(plan.strategy, HistogramStrategy::GlobalAtomic);
        let plan = HistogramPlan::new(9, 10, 16384);
        assert_eq!((plan.channels, plan.bins), (4, 64));
        assert_eq!(plan.word_count(), 256);
    }

    #[test]
    fn test_split() {
        let plan = HistogramPlan::new(2, 64, 0);
        let words: Vec<u32> = (0..128).collect();
        let split = ChannelHistogram::split(&words, &plan);
        assert_eq!(split.len(), 2);
        assert_eq!(split[1].bins[0], 64);
    }

    proptest! {
        #[test]
        fn prop_histogram_conserves_count(
            voxels in proptest::collection::vec(any::<i16>(), 0..2000),
            bins in 1u32..5000,
            channels in 1u32..5,
        ) {
            let plan = HistogramPlan::new(channels, bins, 16384);
            let hist = compute_reference(&voxels, -1024.0, 3071.0, &plan);
            prop_assert_eq!(hist.len(), channels as usize);
            for channel in &hist {
                prop_assert_eq!(channel.total(), voxels.len() as u64);
                prop_assert_eq!(channel.bins.len(), plan.bins as usize);
            }
        }
    }
}
