use strata_common::PartitionConfig;

use crate::partition::PartitionStats;

/// Minimum time between two resizes of one map.
pub const RESIZE_COOLDOWN_MS: u64 = 10_000;
/// Minimum time between two density evaluations of one map.
pub const DENSITY_CHECK_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeDecision {
    Keep,
    Split(u32),
    Merge(u32),
}

/// Split when the densest partition exceeds the split threshold; merge
/// when the mean population falls under the merge threshold. Thresholds of
/// zero disable the respective direction.
pub fn evaluate(stats: &[PartitionStats], cfg: &PartitionConfig) -> ResizeDecision {
    let count = stats.len() as u32;
    if count == 0 {
        return ResizeDecision::Keep;
    }
    let min_count = cfg.min_count.max(1);
    let max_count = cfg.max_count.max(min_count);
    let densest = stats.iter().map(PartitionStats::population).max().unwrap_or(0);
    let total: u64 = stats.iter().map(|s| u64::from(s.population())).sum();

    if cfg.density_split_threshold > 0.0
        && densest as f32 > cfg.density_split_threshold
        && count < max_count
    {
        return ResizeDecision::Split(count + 1);
    }
    if cfg.density_merge_threshold > 0.0
        && count > min_count
        && (total as f32 / count as f32) < cfg.density_merge_threshold
    {
        return ResizeDecision::Merge(count - 1);
    }
    ResizeDecision::Keep
}
