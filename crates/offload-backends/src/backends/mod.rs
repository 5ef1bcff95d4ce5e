//! Backend implementations for different execution targets
//!
//! - `cpu` - Concurrent CPU backend on rayon workers
//! - `ordered` - Sequential backend with a caller-chosen group order

pub mod cpu;
pub mod ordered;

pub use cpu::CpuBackend;
pub use ordered::{GroupOrder, OrderedBackend};
