//! Device-facing layer of the offload runtime
//!
//! This crate provides:
//! - **Device images**: versioned image records, bundle parsing and
//!   target-based selection with a memoizing catalog
//! - **Staging memory**: over-aligned host allocations for per-group data
//! - **Backend trait**: pluggable group execution
//! - **Backends**: a concurrent CPU backend and a sequential ordered backend
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            Offload wrapper output (image bundle)         │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ parse / from_raw
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │        ImageCatalog: exact target > portable > none      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ LaunchConfig { groups, image }
//!               ┌───────┴───────┐
//!               ▼               ▼
//!         ┌─────────┐     ┌─────────┐
//!         │   CPU   │     │ Ordered │
//!         │ Backend │     │ Backend │
//!         └─────────┘     └─────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use offload_backends::image::{DeviceImage, ImageBundle, ImageCatalog, ImageFormat};
//! use offload_backends::{Backend, CpuBackend, ImageRef, LaunchConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = CpuBackend::new().with_target("gfxA");
//! let bundle = ImageBundle::from_images(vec![
//!     DeviceImage::new("spir64", ImageFormat::Spirv, &[0x03, 0x02, 0x23, 0x07]),
//!     DeviceImage::new("gfxA", ImageFormat::Native, &[0x7f]),
//! ]);
//!
//! let index = ImageCatalog::global().select_index(&bundle, backend.target())?.unwrap();
//! let image = ImageRef::from_bundle(&bundle, index).unwrap();
//!
//! backend.launch(&LaunchConfig::new(4).with_image(image), &|_group| Ok(()))?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backends;
pub mod error;
pub mod image;
pub mod staging;

// Re-export public API
pub use backend::{Backend, GroupKernel, ImageRef, LaunchConfig};
pub use backends::{CpuBackend, GroupOrder, OrderedBackend};
pub use error::{BackendError, RecordKind, Result};
pub use image::{DeviceImage, ImageBundle, ImageCatalog, ImageFormat, TargetDescriptor};
pub use staging::{AlignedAllocator, StagingBuffer};
