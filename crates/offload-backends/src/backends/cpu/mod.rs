//! CPU backend implementation
//!
//! Runs work groups on rayon workers, either on the global pool or on a
//! dedicated pool sized at construction.
//!
//! # Usage
//!
//! ```rust
//! use offload_backends::{Backend, CpuBackend, LaunchConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = CpuBackend::with_threads(2)?;
//! assert_eq!(backend.parallelism(), 2);
//!
//! backend.launch(&LaunchConfig::new(16), &|_group| Ok(()))?;
//! # Ok(())
//! # }
//! ```

use crate::backend::{Backend, GroupKernel, LaunchConfig};
use crate::error::{BackendError, Result};
use crate::image::TargetDescriptor;
use offload_tracing::perf_span;
use rayon::prelude::*;
use std::sync::Arc;

/// CPU backend for executing work groups
///
/// Groups run concurrently in no particular order. Cloning is cheap: clones
/// share the dedicated worker pool, if any.
#[derive(Debug, Clone)]
pub struct CpuBackend {
    target: TargetDescriptor,
    /// Dedicated workers; `None` runs on the global rayon pool
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl CpuBackend {
    /// Create a CPU backend on the global rayon pool
    ///
    /// # Example
    ///
    /// ```rust
    /// use offload_backends::{Backend, CpuBackend};
    ///
    /// let backend = CpuBackend::new();
    /// assert_eq!(backend.name(), "cpu");
    /// ```
    pub fn new() -> Self {
        Self {
            target: TargetDescriptor::host(),
            pool: None,
        }
    }

    /// Create a CPU backend with `threads` dedicated workers
    pub fn with_threads(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("offload-cpu-{i}"))
            .build()
            .map_err(|e| BackendError::InvalidLaunchConfig(format!("failed to build worker pool: {e}")))?;

        tracing::debug!(threads = pool.current_num_threads(), "created dedicated CPU worker pool");

        Ok(Self {
            target: TargetDescriptor::host(),
            pool: Some(Arc::new(pool)),
        })
    }

    /// Report `target` instead of the host architecture for image selection
    pub fn with_target(mut self, target: impl Into<TargetDescriptor>) -> Self {
        self.target = target.into();
        self
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    fn parallelism(&self) -> usize {
        self.pool
            .as_ref()
            .map(|pool| pool.current_num_threads())
            .unwrap_or_else(rayon::current_num_threads)
    }

    #[tracing::instrument(skip(self, kernel), fields(backend = "cpu", groups = config.groups))]
    fn launch(&self, config: &LaunchConfig, kernel: &GroupKernel<'_>) -> Result<()> {
        config.validate()?;
        let _span = perf_span!("cpu_launch", groups = config.groups);

        let run = || (0..config.groups).into_par_iter().try_for_each(kernel);
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}
