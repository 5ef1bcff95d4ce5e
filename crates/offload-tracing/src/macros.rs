//! Convenience macros for performance tracing

/// Create a performance span with optional structured fields.
///
/// The plain form returns a [`crate::performance::PerformanceSpan`]; the
/// field-carrying form returns a [`crate::performance::FieldedSpan`] that
/// keeps a span with those fields entered until it is dropped. Either guard
/// logs its duration when dropped.
///
/// ```rust
/// use offload_tracing::perf_span;
///
/// {
///     let _span = perf_span!("tree_merge", groups = 8);
///     // ... merge partials ...
/// }
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        $crate::performance::FieldedSpan::new(
            tracing::debug_span!("perf", name = $name, $($field = $value),+),
            $crate::performance::PerformanceSpan::new($name, None),
        )
    }};
}

/// Emit a debug-level event with a standard `event` field.
///
/// ```rust
/// use offload_tracing::perf_event;
///
/// perf_event!("group_complete", group = 3, elements = 128);
/// ```
#[macro_export]
macro_rules! perf_event {
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {
        tracing::debug!(
            event = $name,
            $($field = $value),+
        );
    };
}

/// Evaluate a block and return `(result, duration_us)`.
///
/// ```rust
/// use offload_tracing::timed_block;
///
/// let (sum, _us) = timed_block!("sum", { (1..=10).sum::<i32>() });
/// assert_eq!(sum, 55);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(operation = $name, duration_us = duration_us, "timed_block_complete");
        (result, duration_us)
    }};
}

#[cfg(test)]
mod tests {
    use crate::{build_subscriber, TracingConfig};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_perf_span_macro() {
        let plain = perf_span!("plain");
        let fields = perf_span!("with_fields", groups = 4, n = 1024);
        assert_eq!(plain.name(), "plain");
        assert_eq!(fields.name(), "with_fields");
    }

    #[test]
    fn test_perf_span_fields_enclose_scope() {
        let config = TracingConfig {
            directives: Some("debug".to_string()),
            ..TracingConfig::for_ci()
        };
        let subscriber = build_subscriber(&config).unwrap();

        tracing::subscriber::with_default(subscriber, || {
            {
                let _span = perf_span!("launch", groups = 4);
                let current = tracing::Span::current();
                assert_eq!(current.metadata().map(|m| m.name()), Some("perf"));
            }
            assert!(tracing::Span::current().is_none());
        });
    }

    #[test]
    fn test_perf_event_macro() {
        perf_event!("test_event", group = 1, device = "spir64");
    }

    #[test]
    fn test_timed_block_macro() {
        let (result, duration_us) = timed_block!("sleep", {
            thread::sleep(Duration::from_millis(2));
            7
        });
        assert_eq!(result, 7);
        assert!(duration_us >= 2_000);
    }
}
