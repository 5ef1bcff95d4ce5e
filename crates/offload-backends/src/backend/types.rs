//! Launch description types

use crate::error::{BackendError, Result};
use crate::image::{BundleId, ImageBundle, ImageFormat};
use std::fmt;

/// Reference to the device image a launch executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Bundle the image was selected from
    pub bundle: BundleId,

    /// Index of the image within its bundle
    pub index: usize,

    /// Target string of the selected image
    pub target_spec: String,

    /// Payload format of the selected image
    pub format: ImageFormat,
}

impl ImageRef {
    /// Reference image `index` of `bundle`, or `None` if out of range
    pub fn from_bundle(bundle: &ImageBundle<'_>, index: usize) -> Option<Self> {
        bundle.get(index).map(|image| Self {
            bundle: bundle.id(),
            index,
            target_spec: image.target_spec().to_owned(),
            format: image.format(),
        })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] {} ({})", self.bundle, self.index, self.target_spec, self.format)
    }
}

/// Launch configuration for one group dispatch
///
/// A launch runs `groups` independent work groups. Each group is invoked
/// exactly once with its index in `0..groups`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Number of work groups
    pub groups: usize,

    /// Device image the groups execute, when one was selected
    pub image: Option<ImageRef>,
}

impl LaunchConfig {
    /// Launch `groups` groups without a device image
    pub const fn new(groups: usize) -> Self {
        Self { groups, image: None }
    }

    /// Attach the selected device image
    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }

    /// Reject configurations no backend can execute
    pub fn validate(&self) -> Result<()> {
        if self.groups == 0 {
            return Err(BackendError::InvalidLaunchConfig("group count must be at least 1".into()));
        }
        Ok(())
    }
}

impl fmt::Display for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "groups={}", self.groups)?;
        if let Some(image) = &self.image {
            write!(f, ", image={}", image)?;
        }
        Ok(())
    }
}
