//! Backend trait for group execution
//!
//! A backend runs the work groups of one launch to completion. It decides
//! where and in which order groups run; the caller decides what each group
//! does through a [`GroupKernel`].

use super::types::LaunchConfig;
use crate::error::Result;
use crate::image::TargetDescriptor;

/// Work performed by one group, given its index
///
/// Kernels are shared across concurrently running groups and must not assume
/// any ordering between them.
pub type GroupKernel<'k> = dyn Fn(usize) -> Result<()> + Send + Sync + 'k;

/// Backend trait for group execution
///
/// ```text
///            launch(config, kernel)
///                     │
///     ┌───────────────┼───────────────┐
///     ▼               ▼               ▼
///  kernel(0)      kernel(1)   ...  kernel(G-1)
///     │               │               │
///     └───────────────┴───────────────┘
///                  join
/// ```
///
/// # Contract
///
/// - `launch` invokes the kernel once per group index in `0..config.groups`
///   and returns only after every invocation finished or the launch aborted.
/// - The first group error aborts the launch and is returned; groups not yet
///   started may be skipped.
/// - An invalid configuration is rejected before any group runs.
///
/// # Example
///
/// ```rust
/// use offload_backends::{Backend, CpuBackend, LaunchConfig};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let backend = CpuBackend::new();
/// let visited = AtomicUsize::new(0);
///
/// backend
///     .launch(&LaunchConfig::new(8), &|_group| {
///         visited.fetch_add(1, Ordering::Relaxed);
///         Ok(())
///     })
///     .unwrap();
///
/// assert_eq!(visited.into_inner(), 8);
/// ```
pub trait Backend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Device architecture this backend executes on
    ///
    /// Used to select a device image from a bundle.
    fn target(&self) -> &TargetDescriptor;

    /// Number of groups the backend can run concurrently
    fn parallelism(&self) -> usize;

    /// Run every group of the launch and join
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The launch configuration is invalid
    /// - Any group fails
    fn launch(&self, config: &LaunchConfig, kernel: &GroupKernel<'_>) -> Result<()>;
}
