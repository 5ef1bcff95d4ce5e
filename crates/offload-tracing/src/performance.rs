//! Performance-focused tracing utilities
//!
//! Timing guards and standard event shapes for the runtime's hot paths:
//! staging allocations, image selection and reduction dispatches.
//!
//! Whether finished spans are logged, and from which duration on, is decided
//! by the [`PerformanceSettings`] installed with
//! [`init_global_tracing`](crate::init_global_tracing). Until then every span
//! is logged.
//!
//! ## Example
//!
//! ```rust
//! use offload_tracing::performance::{record_allocation, PerformanceSpan};
//!
//! let span = PerformanceSpan::new("select_image", Some(100));
//! // ... do work ...
//! drop(span); // logged only if it took at least 100μs
//!
//! record_allocation(4096, 64, 12);
//! ```

use std::sync::OnceLock;
use std::time::Instant;

static SETTINGS: OnceLock<PerformanceSettings> = OnceLock::new();

/// Process-wide switches for [`PerformanceSpan`] logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceSettings {
    /// When false, spans are timed but never logged
    pub enabled: bool,
    /// Minimum duration in microseconds for spans without their own threshold
    pub threshold_us: Option<u64>,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_us: None,
        }
    }
}

impl PerformanceSettings {
    /// Settings in effect for this process
    pub fn current() -> Self {
        SETTINGS.get().copied().unwrap_or_default()
    }

    /// Make these the process-wide settings
    ///
    /// Returns false if settings were already installed; the first ones stay.
    pub fn install(self) -> bool {
        SETTINGS.set(self).is_ok()
    }

    fn should_log(&self, elapsed_us: u64, threshold_us: Option<u64>) -> bool {
        self.enabled && threshold_us.or(self.threshold_us).is_none_or(|t| elapsed_us >= t)
    }
}

/// RAII guard that measures its own lifetime and logs it on drop.
///
/// A span's own threshold takes precedence over the process-wide one.
pub struct PerformanceSpan {
    name: String,
    threshold_us: Option<u64>,
    settings: PerformanceSettings,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Create a debug-level performance span.
    pub fn new(name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        Self::with_settings(name, threshold_us, PerformanceSettings::current())
    }

    fn with_settings(name: impl Into<String>, threshold_us: Option<u64>, settings: PerformanceSettings) -> Self {
        let name = name.into();
        let span = tracing::debug_span!("perf", name = %name);
        Self {
            name,
            threshold_us,
            settings,
            start_time: Instant::now(),
            span,
        }
    }

    /// Name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Microseconds elapsed since the span was created.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Whether dropping the span now would log it
    pub fn would_log(&self) -> bool {
        self.settings.should_log(self.elapsed_us(), self.threshold_us)
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        let elapsed_us = self.elapsed_us();

        if self.settings.should_log(elapsed_us, self.threshold_us) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// A [`PerformanceSpan`] timed inside an entered span carrying structured fields
///
/// Built by the field-carrying form of [`perf_span!`](crate::perf_span). The
/// fields enclose everything done while the guard is alive, including the
/// final duration event.
pub struct FieldedSpan {
    perf: PerformanceSpan,
    _entered: tracing::span::EnteredSpan,
}

impl FieldedSpan {
    /// Enter `span` and start timing `perf` inside it
    pub fn new(span: tracing::Span, perf: PerformanceSpan) -> Self {
        Self {
            _entered: span.entered(),
            perf,
        }
    }
}

impl std::ops::Deref for FieldedSpan {
    type Target = PerformanceSpan;

    fn deref(&self) -> &PerformanceSpan {
        &self.perf
    }
}

/// Record a staging allocation.
///
/// `size_bytes` is the rounded block length actually requested from the
/// system allocator, `alignment` the block alignment.
pub fn record_allocation(size_bytes: usize, alignment: usize, duration_us: u64) {
    tracing::debug!(
        event = "allocation",
        size_bytes = size_bytes,
        size_kb = size_bytes as f64 / 1024.0,
        alignment = alignment,
        duration_us = duration_us,
        "staging_allocation"
    );
}

/// Record the outcome of a device image selection.
///
/// `selected` is the index of the chosen image within its bundle, or `None`
/// when no image qualified.
pub fn record_selection(target: &str, candidates: usize, selected: Option<usize>, cached: bool) {
    tracing::debug!(
        event = "selection",
        device = target,
        candidates = candidates,
        selected = ?selected,
        cached = cached,
        "image_selection"
    );
}

/// Record a completed reduction dispatch with element throughput.
pub fn record_dispatch(operation: &str, elements: usize, groups: usize, deterministic: bool, duration_us: u64) {
    let elements_per_sec = if duration_us > 0 {
        (elements as f64 / duration_us as f64) * 1_000_000.0
    } else {
        0.0
    };

    tracing::debug!(
        event = "dispatch",
        operation = operation,
        elements = elements,
        groups = groups,
        deterministic = deterministic,
        duration_us = duration_us,
        melems_per_sec = elements_per_sec / 1_000_000.0,
        "reduction_dispatch"
    );
}
