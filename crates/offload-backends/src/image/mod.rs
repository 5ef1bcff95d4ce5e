//! Device image records, bundles and selection

mod bundle;
mod catalog;
mod descriptor;

pub use bundle::{BundleId, ImageBundle, RawBinDesc, RawDeviceImage, BUNDLE_HEADER_SIZE, IMAGE_RECORD_V1_SIZE};
pub use catalog::{select_image, ImageCatalog};
pub use descriptor::{
    DeviceImage, ImageFormat, TargetDescriptor, BIN_DESC_VERSION, DEVICE_IMAGE_VERSION, OFFLOAD_KIND, TARGET_SPIRV32,
    TARGET_SPIRV64, TARGET_UNKNOWN,
};
