//! Device image descriptors
//!
//! A [`DeviceImage`] is a read-only view over one precompiled device binary
//! produced by the offload wrapper. Every byte range borrows memory owned by
//! the toolchain's output (or by the caller); nothing is copied.

use crate::error::{BackendError, RecordKind, Result};
use std::fmt;

/// Offload kind tag carried by every image this runtime consumes.
pub const OFFLOAD_KIND: u8 = 4;

/// Device image descriptor version supported by this runtime.
pub const DEVICE_IMAGE_VERSION: u16 = 1;

/// Binary descriptor (bundle) version supported by this runtime.
pub const BIN_DESC_VERSION: u16 = 1;

/// Target string of images whose device architecture is not determined.
pub const TARGET_UNKNOWN: &str = "<unknown>";

/// Target string of 32-bit SPIR-V images.
pub const TARGET_SPIRV32: &str = "spir";

/// Target string of 64-bit SPIR-V images.
pub const TARGET_SPIRV64: &str = "spir64";

/// Format of the image payload
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// Format is not determined
    None = 0,
    /// Device-specific native binary
    Native = 1,
    /// SPIR-V intermediate representation
    Spirv = 2,
    /// LLVM bitcode
    LlvmBitcode = 3,
}

impl ImageFormat {
    /// Portable formats can be compiled for any device of the family and are
    /// used as the selection fallback.
    pub const fn is_portable(self) -> bool {
        matches!(self, ImageFormat::Spirv | ImageFormat::LlvmBitcode)
    }
}

impl TryFrom<u8> for ImageFormat {
    type Error = BackendError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(ImageFormat::None),
            1 => Ok(ImageFormat::Native),
            2 => Ok(ImageFormat::Spirv),
            3 => Ok(ImageFormat::LlvmBitcode),
            other => Err(BackendError::InvalidFormat(other)),
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageFormat::None => "none",
            ImageFormat::Native => "native",
            ImageFormat::Spirv => "spirv",
            ImageFormat::LlvmBitcode => "llvm-bitcode",
        };
        f.write_str(name)
    }
}

/// Device architecture an image is requested for
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetDescriptor(String);

impl TargetDescriptor {
    /// Create a target descriptor from an architecture string
    pub fn new(spec: impl Into<String>) -> Self {
        Self(spec.into())
    }

    /// The undetermined-target sentinel
    pub fn unknown() -> Self {
        Self::new(TARGET_UNKNOWN)
    }

    /// The architecture of the host CPU
    pub fn host() -> Self {
        Self::new(std::env::consts::ARCH)
    }

    /// Target string compared against [`DeviceImage::target_spec`]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetDescriptor {
    fn from(spec: &str) -> Self {
        Self::new(spec)
    }
}

impl From<String> for TargetDescriptor {
    fn from(spec: String) -> Self {
        Self(spec)
    }
}

/// Read-only descriptor of one precompiled device binary
///
/// # Example
///
/// ```rust
/// use offload_backends::image::{DeviceImage, ImageFormat, OFFLOAD_KIND};
///
/// static PAYLOAD: [u8; 4] = [0x03, 0x02, 0x23, 0x07];
/// let image = DeviceImage::new("spir64", ImageFormat::Spirv, &PAYLOAD).with_build_options("-O2");
///
/// assert_eq!(image.kind(), OFFLOAD_KIND);
/// assert_eq!(image.image(), &PAYLOAD);
/// assert!(image.format().is_portable());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceImage<'a> {
    version: u16,
    kind: u8,
    format: ImageFormat,
    target_spec: &'a str,
    build_options: &'a str,
    manifest: &'a [u8],
    image: &'a [u8],
}

impl<'a> DeviceImage<'a> {
    /// Describe an image at the current descriptor version with this runtime's offload kind
    pub const fn new(target_spec: &'a str, format: ImageFormat, image: &'a [u8]) -> Self {
        Self {
            version: DEVICE_IMAGE_VERSION,
            kind: OFFLOAD_KIND,
            format,
            target_spec,
            build_options: "",
            manifest: &[],
            image,
        }
    }

    /// Build options suggested for compiling the image at runtime
    pub const fn with_build_options(mut self, build_options: &'a str) -> Self {
        self.build_options = build_options;
        self
    }

    /// Attach the manifest (metadata) region
    pub const fn with_manifest(mut self, manifest: &'a [u8]) -> Self {
        self.manifest = manifest;
        self
    }

    /// Override the offload kind, e.g. for images produced for another consumer
    pub const fn with_kind(mut self, kind: u8) -> Self {
        self.kind = kind;
        self
    }

    /// Override the descriptor version
    pub const fn with_version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    pub const fn version(&self) -> u16 {
        self.version
    }

    pub const fn kind(&self) -> u8 {
        self.kind
    }

    pub const fn format(&self) -> ImageFormat {
        self.format
    }

    pub const fn target_spec(&self) -> &'a str {
        self.target_spec
    }

    pub const fn build_options(&self) -> &'a str {
        self.build_options
    }

    /// Manifest (metadata) region
    pub const fn manifest(&self) -> &'a [u8] {
        self.manifest
    }

    /// Executable payload region
    pub const fn image(&self) -> &'a [u8] {
        self.image
    }

    /// Whether the image was produced for this runtime
    pub const fn is_selectable(&self) -> bool {
        self.kind == OFFLOAD_KIND
    }

    /// Reject descriptors whose layout version this runtime does not understand
    pub fn check_version(&self) -> Result<()> {
        check_version(RecordKind::DeviceImage, self.version, DEVICE_IMAGE_VERSION)
    }
}

pub(crate) fn check_version(record: RecordKind, found: u16, supported: u16) -> Result<()> {
    if found == supported {
        Ok(())
    } else {
        Err(BackendError::VersionMismatch {
            record,
            found,
            supported,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tags() {
        assert_eq!(ImageFormat::try_from(1).unwrap(), ImageFormat::Native);
        assert_eq!(ImageFormat::try_from(3).unwrap(), ImageFormat::LlvmBitcode);
        assert!(matches!(ImageFormat::try_from(9), Err(BackendError::InvalidFormat(9))));
    }

    #[test]
    fn test_portable_formats() {
        assert!(!ImageFormat::None.is_portable());
        assert!(!ImageFormat::Native.is_portable());
        assert!(ImageFormat::Spirv.is_portable());
        assert!(ImageFormat::LlvmBitcode.is_portable());
    }

    #[test]
    fn test_version_check() {
        let image = DeviceImage::new("gfxA", ImageFormat::Native, &[]);
        assert!(image.check_version().is_ok());

        let future = image.with_version(DEVICE_IMAGE_VERSION + 1);
        let err = future.check_version().unwrap_err();
        assert!(matches!(
            err,
            BackendError::VersionMismatch {
                record: RecordKind::DeviceImage,
                found: 2,
                supported: 1
            }
        ));
    }

    #[test]
    fn test_foreign_kind_not_selectable() {
        let image = DeviceImage::new(TARGET_SPIRV64, ImageFormat::Spirv, &[]).with_kind(1);
        assert!(!image.is_selectable());
    }

    #[test]
    fn test_target_descriptor() {
        assert_eq!(TargetDescriptor::unknown().as_str(), "<unknown>");
        assert_eq!(TargetDescriptor::from("spir").to_string(), TARGET_SPIRV32);
        assert!(!TargetDescriptor::host().as_str().is_empty());
    }
}
