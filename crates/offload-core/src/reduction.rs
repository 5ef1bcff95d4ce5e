//! Reduction dispatch
//!
//! A [`Reduction`] folds `n` indices into one caller-owned value. The index
//! space is split into contiguous groups; each group folds its indices in
//! ascending order and the group partials are merged as the plan dictates.
//!
//! ## Lifecycle
//!
//! ```text
//! Constructed ──► Initialized ──► Combining ──► Finalized
//!  build()         slots            groups        output written
//!                  allocated        launched      exactly once
//! ```
//!
//! Configuration problems (unknown property, missing identity) fail
//! `build()`. Image selection happens before any slot is allocated. A failed
//! launch leaves the output untouched.
//!
//! ## Example
//!
//! ```rust
//! use offload_core::combiner::Plus;
//! use offload_core::properties::PropertySet;
//! use offload_core::{Executor, Reduction};
//!
//! # fn main() -> offload_core::Result<()> {
//! let exec = Executor::new()?;
//! let data: Vec<f32> = (0..1024).map(|i| i as f32 * 0.5).collect();
//! let mut sum = 0.0f32;
//!
//! Reduction::builder(&mut sum, Plus)
//!     .properties(PropertySet::deterministic())
//!     .build()?
//!     .run(&exec, data.len(), |i, reducer| reducer.combine(data[i]))?;
//!
//! assert_eq!(sum, 261_888.0);
//! # Ok(())
//! # }
//! ```

use crate::accumulator::{Accumulator, Reducer};
use crate::combiner::{Combiner, CombinerHandle, OrderTag};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::metrics::DispatchMetrics;
use crate::properties::{resolve, ExecutionPlan, PropertySet};
use offload_backends::image::ImageBundle;
use offload_backends::LaunchConfig;
use offload_tracing::timed_block;
use std::fmt;
use std::ops::Range;
use std::time::{Duration, Instant};

/// Lifecycle state of a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Constructed,
    Initialized,
    Combining,
    Finalized,
}

impl DispatchState {
    pub const fn name(self) -> &'static str {
        match self {
            DispatchState::Constructed => "constructed",
            DispatchState::Initialized => "initialized",
            DispatchState::Combining => "combining",
            DispatchState::Finalized => "finalized",
        }
    }

    /// The only state reachable from `self`
    pub const fn next(self) -> Option<DispatchState> {
        match self {
            DispatchState::Constructed => Some(DispatchState::Initialized),
            DispatchState::Initialized => Some(DispatchState::Combining),
            DispatchState::Combining => Some(DispatchState::Finalized),
            DispatchState::Finalized => None,
        }
    }

    /// Move to `to`, rejecting any transition other than the next one
    pub fn advance(&mut self, to: DispatchState) -> Result<()> {
        if self.next() != Some(to) {
            return Err(Error::InvalidState {
                from: self.name(),
                to: to.name(),
            });
        }
        tracing::trace!(from = self.name(), to = to.name(), "dispatch state");
        *self = to;
        Ok(())
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Indices covered by `group` when `n` indices are split into `groups` groups
///
/// Group `g` covers `[g * n / groups, (g + 1) * n / groups)`. `groups` is at
/// least 1; the dispatcher clamps it before partitioning.
pub(crate) fn group_range(group: usize, groups: usize, n: usize) -> Range<usize> {
    let bound = |g: usize| (g as u128 * n as u128 / groups as u128) as usize;
    bound(group)..bound(group + 1)
}

/// Builder for [`Reduction`]
pub struct ReductionBuilder<'o, 'b, T, Op> {
    output: &'o mut T,
    op: Op,
    properties: Result<PropertySet>,
    identity: Option<T>,
    bundle: Option<&'b ImageBundle<'b>>,
}

impl<'o, 'b, T, Op: Combiner<T>> ReductionBuilder<'o, 'b, T, Op> {
    /// Attach a property set
    pub fn properties(mut self, properties: PropertySet) -> Self {
        self.properties = Ok(properties);
        self
    }

    /// Attach properties by declarative name
    ///
    /// Unknown or repeated names make [`build`](Self::build) fail.
    pub fn property_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.properties = PropertySet::from_names(names);
        self
    }

    /// Identity element, overriding the operation's own
    pub fn identity(mut self, identity: T) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Select the device image to run from `bundle`
    pub fn image_bundle(mut self, bundle: &'b ImageBundle<'b>) -> Self {
        self.bundle = Some(bundle);
        self
    }

    /// Resolve the plan and validate the configuration
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownProperty`] / [`Error::DuplicateProperty`] for bad property names
    /// - [`Error::MissingIdentity`] if identity initialization is requested
    ///   and no identity is known
    pub fn build(self) -> Result<Reduction<'o, 'b, T, Op>> {
        let properties = self.properties?;
        let plan = resolve(&properties);
        let operation = Combiner::<T>::name(&self.op);

        let identity = self.identity.or_else(|| self.op.identity());
        if plan.initialize_accumulator_to_identity && identity.is_none() {
            return Err(Error::MissingIdentity { operation });
        }

        tracing::debug!(operation, ?plan, "reduction constructed");

        Ok(Reduction {
            output: self.output,
            handle: CombinerHandle::new(self.op, &plan),
            plan,
            properties,
            identity,
            bundle: self.bundle,
            state: DispatchState::Constructed,
        })
    }
}

/// A configured reduction, ready to run once
pub struct Reduction<'o, 'b, T, Op> {
    output: &'o mut T,
    handle: CombinerHandle<Op>,
    plan: ExecutionPlan,
    properties: PropertySet,
    identity: Option<T>,
    bundle: Option<&'b ImageBundle<'b>>,
    state: DispatchState,
}

/// Reduce into `output` with `op` under `properties`
///
/// Shorthand for `Reduction::builder(output, op).properties(properties).build()`.
pub fn reduction<T, Op: Combiner<T>>(
    output: &mut T,
    op: Op,
    properties: PropertySet,
) -> Result<Reduction<'_, 'static, T, Op>> {
    Reduction::builder(output, op).properties(properties).build()
}

impl<'o, 'b, T, Op: Combiner<T>> Reduction<'o, 'b, T, Op> {
    /// Start building a reduction into `output`
    pub fn builder(output: &'o mut T, op: Op) -> ReductionBuilder<'o, 'b, T, Op> {
        ReductionBuilder {
            output,
            op,
            properties: Ok(PropertySet::new()),
            identity: None,
            bundle: None,
        }
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Whether partials merge in a fixed order
    pub fn enforces_order(&self) -> bool {
        self.handle.enforces_order()
    }

    /// Run the reduction over indices `0..n` and publish the result
    ///
    /// `body` is called once per index with the reducer of the index's group;
    /// indices of one group arrive in ascending order.
    ///
    /// # Errors
    ///
    /// - [`Error::Structural`] / [`Error::ImageNotFound`] from image selection
    /// - [`Error::Execution`] if the staging allocation or any group fails
    ///
    /// On error the output is left unchanged.
    #[tracing::instrument(skip_all, fields(n = n, deterministic = self.plan.use_fixed_order_combine))]
    pub fn run<F>(mut self, executor: &Executor, n: usize, body: F) -> Result<()>
    where
        T: Clone + Send + Sync,
        F: Fn(usize, &mut Reducer<'_, T, CombinerHandle<Op>>) + Send + Sync,
    {
        let start = Instant::now();
        let operation = Combiner::<T>::name(&self.handle);

        let image = self.bundle.map(|bundle| executor.select_image(bundle)).transpose()?;
        let groups = executor.group_count(n);

        self.state.advance(DispatchState::Initialized)?;
        let accumulator = Accumulator::new(groups, &self.plan, self.output.clone(), self.identity.clone())?;

        let mut config = LaunchConfig::new(groups);
        if let Some(image) = image {
            tracing::debug!(%image, "dispatching with device image");
            config = config.with_image(image);
        }

        self.state.advance(DispatchState::Combining)?;
        let handle = &self.handle;
        let kernel = |group: usize| -> offload_backends::Result<()> {
            let mut reducer = Reducer::new(group, accumulator.take_slot(group), handle);
            for i in group_range(group, groups, n) {
                body(i, &mut reducer);
            }
            accumulator.submit(group, reducer.into_partial(), handle);
            Ok(())
        };
        executor.backend().launch(&config, &kernel).inspect_err(|err| {
            tracing::warn!(error = %err, groups, "reduction dispatch failed");
        })?;

        self.state.advance(DispatchState::Finalized)?;
        debug_assert_eq!(accumulator.groups(), groups);
        let (result, merge_us) = timed_block!("reduction_merge", { accumulator.finish(&self.handle) });
        *self.output = result;

        DispatchMetrics::new(operation, n, groups, start)
            .with_deterministic(self.handle.enforces_order())
            .with_merge_duration(Duration::from_micros(merge_us))
            .log();
        Ok(())
    }
}

impl<T, Op> fmt::Debug for Reduction<'_, '_, T, Op> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reduction")
            .field("plan", &self.plan)
            .field("state", &self.state)
            .field("bundle", &self.bundle.map(|b| b.id()))
            .finish_non_exhaustive()
    }
}
