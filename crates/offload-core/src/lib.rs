//! # offload-core - Reduction Dispatch
//!
//! Reductions that fold an index space into one caller-owned value on an
//! offload backend, with an opt-in reproducible combining order.
//!
//! ## Architecture
//!
//! ```text
//! PropertySet ──resolve──► ExecutionPlan
//!                              │
//! Combiner ──CombinerHandle────┤
//!                              ▼
//! Reduction::run ──► Executor ──► ImageCatalog (device image)
//!                        │
//!                        └──► Backend::launch (one call per group)
//!                                   │
//!                        Accumulator (per-group slots, merge)
//! ```
//!
//! ## Key Principles
//!
//! 1. **Deterministic on request**: with the `deterministic` property the
//!    result depends only on the input and the group count, never on
//!    scheduling
//! 2. **Publish once**: the output is written exactly once, after every
//!    group has finished, and is untouched on error
//! 3. **Fail before launch**: configuration and image selection errors
//!    surface before any group runs
//!
//! ## Example
//!
//! ```rust
//! use offload_core::combiner::Maximum;
//! use offload_core::{reduction, Executor, PropertySet};
//!
//! # fn main() -> offload_core::Result<()> {
//! let exec = Executor::new()?;
//! let data = [3i32, 9, -4, 7];
//! let mut max = i32::MIN;
//!
//! reduction(&mut max, Maximum, PropertySet::deterministic())?
//!     .run(&exec, data.len(), |i, reducer| reducer.combine(data[i]))?;
//!
//! assert_eq!(max, 9);
//! # Ok(())
//! # }
//! ```

mod accumulator;
pub mod combiner;
pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod properties;
pub mod reduction;

// Re-export primary types
pub use accumulator::Reducer;
pub use combiner::{Combiner, CombinerHandle, FixedOrderWrapper, OrderTag};
pub use config::RuntimeConfig;
pub use error::{Error, ErrorKind, Result};
pub use executor::Executor;
pub use metrics::DispatchMetrics;
pub use properties::{resolve, ExecutionPlan, PropertyKey, PropertySet};
pub use reduction::{reduction, DispatchState, Reduction, ReductionBuilder};
