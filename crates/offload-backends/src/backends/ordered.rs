//! Sequential backend with caller-chosen group order
//!
//! Runs groups one at a time on the calling thread, in a fixed permutation.
//! Useful for reproducing a particular completion order, and for observing
//! how often a dispatcher launches work at all.

use crate::backend::{Backend, GroupKernel, LaunchConfig};
use crate::error::{BackendError, Result};
use crate::image::TargetDescriptor;
use offload_tracing::perf_event;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Order in which [`OrderedBackend`] runs groups
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GroupOrder {
    /// `0, 1, ..., G-1`
    #[default]
    Ascending,
    /// `G-1, ..., 1, 0`
    Descending,
    /// An explicit permutation of `0..G`
    Explicit(Vec<usize>),
}

impl GroupOrder {
    /// The group sequence for a launch of `groups` groups
    pub fn sequence(&self, groups: usize) -> Result<Vec<usize>> {
        match self {
            GroupOrder::Ascending => Ok((0..groups).collect()),
            GroupOrder::Descending => Ok((0..groups).rev().collect()),
            GroupOrder::Explicit(order) => {
                let mut seen = vec![false; groups];
                for &group in order {
                    match seen.get_mut(group) {
                        Some(slot) if !*slot => *slot = true,
                        _ => {
                            return Err(BackendError::InvalidLaunchConfig(format!(
                                "group order {order:?} is not a permutation of 0..{groups}"
                            )))
                        }
                    }
                }
                if order.len() != groups {
                    return Err(BackendError::InvalidLaunchConfig(format!(
                        "group order has {} entries for {groups} groups",
                        order.len()
                    )));
                }
                Ok(order.clone())
            }
        }
    }
}

/// Backend that runs groups sequentially in a fixed order
///
/// Reports `parallelism` groups (1 by default) so that dispatchers size their
/// launches as they would for a concurrent device.
///
/// # Example
///
/// ```rust
/// use offload_backends::{Backend, GroupOrder, LaunchConfig, OrderedBackend};
/// use parking_lot::Mutex;
///
/// let backend = OrderedBackend::new(GroupOrder::Descending);
/// let seen = Mutex::new(Vec::new());
///
/// backend
///     .launch(&LaunchConfig::new(3), &|group| {
///         seen.lock().push(group);
///         Ok(())
///     })
///     .unwrap();
///
/// assert_eq!(seen.into_inner(), vec![2, 1, 0]);
/// assert_eq!(backend.launch_count(), 1);
/// ```
#[derive(Debug)]
pub struct OrderedBackend {
    order: GroupOrder,
    target: TargetDescriptor,
    parallelism: usize,
    launches: AtomicUsize,
    invocations: AtomicUsize,
}

impl OrderedBackend {
    pub fn new(order: GroupOrder) -> Self {
        Self {
            order,
            target: TargetDescriptor::host(),
            parallelism: 1,
            launches: AtomicUsize::new(0),
            invocations: AtomicUsize::new(0),
        }
    }

    /// Run groups in ascending index order
    pub fn ascending() -> Self {
        Self::new(GroupOrder::Ascending)
    }

    /// Run groups in descending index order
    pub fn descending() -> Self {
        Self::new(GroupOrder::Descending)
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_target(mut self, target: impl Into<TargetDescriptor>) -> Self {
        self.target = target.into();
        self
    }

    pub fn order(&self) -> &GroupOrder {
        &self.order
    }

    /// Number of `launch` calls, including rejected ones
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Number of group kernel invocations across all launches
    pub fn group_invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl Default for OrderedBackend {
    fn default() -> Self {
        Self::ascending()
    }
}

impl Backend for OrderedBackend {
    fn name(&self) -> &'static str {
        "ordered"
    }

    fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    fn parallelism(&self) -> usize {
        self.parallelism
    }

    #[tracing::instrument(skip(self, kernel), fields(backend = "ordered", groups = config.groups))]
    fn launch(&self, config: &LaunchConfig, kernel: &GroupKernel<'_>) -> Result<()> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        config.validate()?;

        let sequence = self.order.sequence(config.groups)?;
        tracing::trace!(?sequence, "running groups sequentially");

        for (position, group) in sequence.into_iter().enumerate() {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            kernel(group)?;
            perf_event!("ordered_group_complete", group = group, position = position);
        }
        Ok(())
    }
}
