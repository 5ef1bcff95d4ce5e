//! Dispatch metrics
//!
//! One [`DispatchMetrics`] is produced per finalized reduction and emitted as
//! a structured tracing event.
//!
//! ```text
//! use offload_core::metrics::DispatchMetrics;
//!
//! let start = std::time::Instant::now();
//! // ... run the dispatch ...
//! DispatchMetrics::new("plus", n, groups, start).log();
//! ```

use offload_tracing::performance::record_dispatch;
use std::time::{Duration, Instant};

/// Metrics for one reduction dispatch
#[derive(Debug, Clone)]
pub struct DispatchMetrics {
    /// Combine operation name (e.g. "plus", "maximum")
    pub operation: String,
    /// Number of reduced elements
    pub elements: usize,
    /// Number of work groups
    pub groups: usize,
    /// Whether partials merged in a fixed order
    pub deterministic: bool,
    /// Construction-to-publication time in microseconds
    pub total_duration_us: u64,
    /// Time spent merging partials after the join, in microseconds
    pub merge_duration_us: u64,
}

impl DispatchMetrics {
    /// Create dispatch metrics from the dispatch start time
    pub fn new(operation: impl Into<String>, elements: usize, groups: usize, start: Instant) -> Self {
        Self {
            operation: operation.into(),
            elements,
            groups,
            deterministic: false,
            total_duration_us: start.elapsed().as_micros() as u64,
            merge_duration_us: 0,
        }
    }

    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn with_merge_duration(mut self, merge: Duration) -> Self {
        self.merge_duration_us = merge.as_micros() as u64;
        self
    }

    /// Average elements per group
    pub fn elements_per_group(&self) -> f64 {
        if self.groups == 0 {
            return 0.0;
        }
        self.elements as f64 / self.groups as f64
    }

    /// Share of the dispatch spent in the final merge
    pub fn merge_overhead_percent(&self) -> f64 {
        if self.total_duration_us == 0 {
            return 0.0;
        }
        (self.merge_duration_us as f64 / self.total_duration_us as f64) * 100.0
    }

    /// Log metrics via tracing
    pub fn log(&self) {
        record_dispatch(
            &self.operation,
            self.elements,
            self.groups,
            self.deterministic,
            self.total_duration_us,
        );
        tracing::trace!(
            operation = %self.operation,
            elements_per_group = self.elements_per_group(),
            merge_duration_us = self.merge_duration_us,
            merge_overhead_percent = self.merge_overhead_percent(),
            "dispatch_breakdown"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratios() {
        let mut metrics = DispatchMetrics::new("plus", 1000, 8, Instant::now())
            .with_deterministic(true)
            .with_merge_duration(Duration::from_micros(5));
        metrics.total_duration_us = 100;

        assert_eq!(metrics.elements_per_group(), 125.0);
        assert_eq!(metrics.merge_overhead_percent(), 5.0);
        assert!(metrics.deterministic);
        metrics.log();
    }

    #[test]
    fn test_zero_guards() {
        let mut metrics = DispatchMetrics::new("plus", 0, 0, Instant::now());
        metrics.total_duration_us = 0;
        assert_eq!(metrics.elements_per_group(), 0.0);
        assert_eq!(metrics.merge_overhead_percent(), 0.0);
    }
}
