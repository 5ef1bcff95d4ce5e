//! Executor for managing backend execution
//!
//! The `Executor` wraps an `offload-backends::Backend` together with the
//! runtime configuration, and answers the two questions a dispatch asks
//! before launching: how many groups, and which device image.
//!
//! ## Architecture
//!
//! ```text
//! offload-core::Executor
//!   ↓ selects image via
//! offload-backends::ImageCatalog (process-wide memo)
//!   ↓ delegates launch to
//! offload-backends::Backend (CpuBackend, OrderedBackend, ...)
//! ```

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use offload_backends::image::{ImageBundle, ImageCatalog, TargetDescriptor};
use offload_backends::{Backend, CpuBackend, ImageRef};
use std::sync::Arc;

/// Executor for reduction dispatches
///
/// Cloning is cheap; clones share the backend.
///
/// # Example
///
/// ```rust
/// use offload_core::{Executor, RuntimeConfig};
///
/// let exec = Executor::from_config(RuntimeConfig::new().with_group_count(4))?;
/// assert_eq!(exec.group_count(1024), 4);
/// assert_eq!(exec.group_count(3), 3);
/// # Ok::<(), offload_core::Error>(())
/// ```
#[derive(Clone)]
pub struct Executor {
    backend: Arc<dyn Backend>,
    config: RuntimeConfig,
    target: TargetDescriptor,
}

impl Executor {
    /// Create a new executor with a CPU backend on the global rayon pool
    #[tracing::instrument]
    pub fn new() -> Result<Self> {
        Self::from_config(RuntimeConfig::default())
    }

    /// Create an executor honouring `config`
    ///
    /// Builds a CPU backend with `worker_threads` dedicated workers when set.
    #[tracing::instrument]
    pub fn from_config(config: RuntimeConfig) -> Result<Self> {
        let start = std::time::Instant::now();
        config.validate()?;

        let backend = match config.worker_threads {
            Some(threads) => CpuBackend::with_threads(threads)?,
            None => CpuBackend::new(),
        };
        let exec = Self::with_backend(backend).with_config(config);

        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(
            duration_us = duration_us,
            backend = exec.backend.name(),
            device = %exec.target,
            "executor_created"
        );
        Ok(exec)
    }

    /// Create an executor from the `OFFLOAD_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(RuntimeConfig::from_env()?)
    }

    /// Create an executor over any backend, with default configuration
    pub fn with_backend(backend: impl Backend + 'static) -> Self {
        Self::with_shared_backend(Arc::new(backend))
    }

    /// Create an executor over a shared backend
    ///
    /// Lets the caller keep a handle on the backend, e.g. to read counters.
    pub fn with_shared_backend(backend: Arc<dyn Backend>) -> Self {
        let target = backend.target().clone();
        Self {
            backend,
            config: RuntimeConfig::default(),
            target,
        }
    }

    /// Replace the configuration, keeping the backend
    ///
    /// `worker_threads` only takes effect through [`from_config`](Self::from_config).
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.target = match &config.target {
            Some(target) => TargetDescriptor::new(target.as_str()),
            None => self.backend.target().clone(),
        };
        self.config = config;
        self
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Target used for device image selection
    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    /// Groups used to reduce `n` elements
    ///
    /// The configured count, else the backend's parallelism, clamped to
    /// `[1, max(n, 1)]` so no group is ever empty for non-empty input.
    pub fn group_count(&self, n: usize) -> usize {
        let requested = self.config.group_count.unwrap_or_else(|| self.backend.parallelism());
        requested.clamp(1, n.max(1))
    }

    /// Select the image of `bundle` for this executor's target
    ///
    /// # Errors
    ///
    /// - [`Error::Structural`] if the bundle's records cannot be trusted
    /// - [`Error::ImageNotFound`] if no image qualifies
    pub fn select_image(&self, bundle: &ImageBundle<'_>) -> Result<ImageRef> {
        ImageCatalog::global()
            .select_index(bundle, &self.target)?
            .and_then(|index| ImageRef::from_bundle(bundle, index))
            .ok_or_else(|| Error::ImageNotFound {
                target: self.target.to_string(),
            })
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("backend", &self.backend.name())
            .field("target", &self.target)
            .field("config", &self.config)
            .finish()
    }
}
