//! Backend trait and launch types

mod traits;
mod types;

pub use traits::{Backend, GroupKernel};
pub use types::{ImageRef, LaunchConfig};
