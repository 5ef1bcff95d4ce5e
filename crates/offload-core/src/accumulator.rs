//! Per-dispatch accumulator storage and merging
//!
//! Each group owns one slot in an over-aligned staging buffer. A group takes
//! its slot's initial value, folds its indices through a [`Reducer`] and
//! submits the partial:
//!
//! - fixed order: the partial goes back into the group's slot, and the slots
//!   are merged after the join by a balanced tree over group index;
//! - arrival order: the partial is merged into a shared node as soon as the
//!   group completes.
//!
//! ```text
//! slots   s0   s1   s2   s3   s4
//!          \  /      \  /     |
//! level 1  s01       s23      s4
//!             \     /         |
//! level 2      s0123          s4
//!                   \        /
//! result             s01234
//! ```

use crate::combiner::Combiner;
use crate::error::Result;
use crate::properties::ExecutionPlan;
use offload_backends::StagingBuffer;
use parking_lot::Mutex;

/// Group-local view of a reduction
///
/// Handed to the body closure for every index of one group, in ascending
/// index order.
pub struct Reducer<'a, T, C> {
    group: usize,
    partial: Option<T>,
    op: &'a C,
}

impl<'a, T, C: Combiner<T>> Reducer<'a, T, C> {
    pub(crate) fn new(group: usize, initial: Option<T>, op: &'a C) -> Self {
        Self {
            group,
            partial: initial,
            op,
        }
    }

    /// Fold `value` into this group's partial result
    #[inline]
    pub fn combine(&mut self, value: T) {
        self.partial = Some(match self.partial.take() {
            Some(acc) => self.op.combine(acc, value),
            None => value,
        });
    }

    /// Index of the group this reducer belongs to
    pub fn group(&self) -> usize {
        self.group
    }

    /// Partial result so far, `None` if nothing was combined yet
    pub fn partial(&self) -> Option<&T> {
        self.partial.as_ref()
    }

    pub(crate) fn into_partial(self) -> Option<T> {
        self.partial
    }
}

fn merge<T, C: Combiner<T>>(left: Option<T>, right: Option<T>, op: &C) -> Option<T> {
    match (left, right) {
        (Some(a), Some(b)) => Some(op.combine(a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Merge partials pairwise by index, carrying an odd tail up a level
///
/// The association depends only on the number of partials, never on the
/// order in which they were produced.
pub(crate) fn tree_merge<T, C: Combiner<T>>(partials: Vec<Option<T>>, op: &C) -> Option<T> {
    let mut level = partials;
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut iter = level.into_iter();
        while let Some(left) = iter.next() {
            next.push(match iter.next() {
                Some(right) => merge(left, right, op),
                None => left,
            });
        }
        level = next;
    }
    level.pop().flatten()
}

/// Storage for one dispatch
pub(crate) struct Accumulator<T> {
    slots: StagingBuffer<Mutex<Option<T>>>,
    arrival: Mutex<Option<T>>,
    seed: T,
    /// Set only when slots were initialized to the identity
    identity: Option<T>,
    fixed_order: bool,
}

impl<T: Clone> Accumulator<T> {
    /// Allocate one slot per group
    ///
    /// `identity` is ignored unless the plan initializes to the identity.
    pub(crate) fn new(groups: usize, plan: &ExecutionPlan, seed: T, identity: Option<T>) -> Result<Self> {
        let identity = identity.filter(|_| plan.initialize_accumulator_to_identity);
        let slots = StagingBuffer::from_fn(groups, |_| Mutex::new(identity.clone()))?;

        Ok(Self {
            slots,
            arrival: Mutex::new(None),
            seed,
            identity,
            fixed_order: plan.use_fixed_order_combine,
        })
    }

    pub(crate) fn groups(&self) -> usize {
        self.slots.len()
    }

    /// Initial partial of `group`
    pub(crate) fn take_slot(&self, group: usize) -> Option<T> {
        self.slots[group].lock().take()
    }

    /// Record the finished partial of `group`
    pub(crate) fn submit<C: Combiner<T>>(&self, group: usize, partial: Option<T>, op: &C) {
        if self.fixed_order {
            *self.slots[group].lock() = partial;
        } else if partial.is_some() {
            let mut node = self.arrival.lock();
            *node = merge(node.take(), partial, op);
        }
    }

    /// Merge every partial and combine with the seed
    ///
    /// In identity mode the seed is discarded and an empty result is the
    /// identity. Otherwise an empty result leaves the seed unchanged.
    pub(crate) fn finish<C: Combiner<T>>(mut self, op: &C) -> T {
        let merged = if self.fixed_order {
            let partials = self.slots.iter_mut().map(|slot| slot.get_mut().take()).collect();
            tree_merge(partials, op)
        } else {
            self.arrival.into_inner()
        };

        match (self.identity, merged) {
            (Some(identity), merged) => merged.unwrap_or(identity),
            (None, Some(merged)) => op.combine(self.seed, merged),
            (None, None) => self.seed,
        }
    }
}
