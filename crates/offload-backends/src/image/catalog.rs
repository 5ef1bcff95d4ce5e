//! Device image selection
//!
//! Selection runs in tiers over a validated bundle:
//!
//! 1. the first image whose target string equals the requested target;
//! 2. the first image in a portable format (SPIR-V or LLVM bitcode);
//! 3. nothing, which is not an error.
//!
//! Images with a foreign offload kind are never candidates. Ties resolve to
//! bundle order, so selection is stable for a given bundle.
//!
//! [`ImageCatalog`] memoizes selections per (bundle contents, target) pair,
//! including negative results. Bundles holding the same records share
//! entries, so re-parsing the same embedded bytes never grows the catalog.

use super::bundle::ImageBundle;
use super::descriptor::{DeviceImage, ImageFormat, TargetDescriptor};
use crate::error::Result;
use offload_tracing::performance::record_selection;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Select the image of `bundle` best suited to `target`
///
/// Returns the index of the image within the bundle, or `None` when no image
/// qualifies. Structural problems (version mismatch, count mismatch) are
/// reported before any image is considered.
///
/// # Example
///
/// ```rust
/// use offload_backends::image::{select_image, DeviceImage, ImageBundle, ImageFormat, TargetDescriptor};
///
/// let bundle = ImageBundle::from_images(vec![
///     DeviceImage::new("spir64", ImageFormat::Spirv, &[]),
///     DeviceImage::new("gfxA", ImageFormat::Native, &[]),
/// ]);
///
/// assert_eq!(select_image(&bundle, &TargetDescriptor::new("gfxA")).unwrap(), Some(1));
/// assert_eq!(select_image(&bundle, &TargetDescriptor::new("gfxB")).unwrap(), Some(0));
/// ```
#[tracing::instrument(skip_all, fields(bundle = %bundle.id(), device = %target, candidates = bundle.len()))]
pub fn select_image(bundle: &ImageBundle<'_>, target: &TargetDescriptor) -> Result<Option<usize>> {
    bundle.validate()?;

    let selected = select_validated(bundle, target);
    if selected.is_none() {
        tracing::debug!("no device image matches target");
    }
    Ok(selected)
}

/// Tiered selection over a bundle that already passed [`ImageBundle::validate`]
fn select_validated(bundle: &ImageBundle<'_>, target: &TargetDescriptor) -> Option<usize> {
    let candidates = || bundle.images().iter().enumerate().filter(|(_, image)| image.is_selectable());

    let exact = candidates().find(|(_, image)| image.target_spec() == target.as_str());
    exact
        .or_else(|| candidates().find(|(_, image)| image.format().is_portable()))
        .map(|(index, _)| index)
}

/// The fields of one image that selection looks at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ImageSignature {
    kind: u8,
    format: ImageFormat,
    target_spec: Box<str>,
}

impl From<&DeviceImage<'_>> for ImageSignature {
    fn from(image: &DeviceImage<'_>) -> Self {
        Self {
            kind: image.kind(),
            format: image.format(),
            target_spec: image.target_spec().into(),
        }
    }
}

/// Key of a memoized selection
///
/// Two bundles with the same signatures always select the same index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SelectionKey {
    images: Vec<ImageSignature>,
    target: TargetDescriptor,
}

impl SelectionKey {
    fn new(bundle: &ImageBundle<'_>, target: &TargetDescriptor) -> Self {
        Self {
            images: bundle.images().iter().map(ImageSignature::from).collect(),
            target: target.clone(),
        }
    }
}

/// Thread-safe memo of image selections
///
/// Every lookup validates the bundle first, so a cached answer is never
/// handed out for records this runtime cannot read. Hits take a read lock; a
/// miss computes the selection outside any lock and inserts it under the
/// write lock. Structural errors are returned to the caller and never cached.
///
/// # Example
///
/// ```rust
/// use offload_backends::image::{DeviceImage, ImageBundle, ImageCatalog, ImageFormat, TargetDescriptor};
///
/// static CATALOG: ImageCatalog = ImageCatalog::new();
///
/// let bundle = ImageBundle::from_images(vec![DeviceImage::new("gfxA", ImageFormat::Native, &[7])]);
/// let target = TargetDescriptor::new("gfxA");
///
/// let image = CATALOG.select(&bundle, &target).unwrap().unwrap();
/// assert_eq!(image.image(), &[7]);
/// assert_eq!(CATALOG.len(), 1);
/// ```
pub struct ImageCatalog {
    cache: OnceLock<parking_lot::RwLock<HashMap<SelectionKey, Option<usize>>>>,
}

impl ImageCatalog {
    /// Create a new empty catalog
    pub const fn new() -> Self {
        Self { cache: OnceLock::new() }
    }

    /// Process-wide catalog shared by all executors
    pub fn global() -> &'static ImageCatalog {
        static GLOBAL: ImageCatalog = ImageCatalog::new();
        &GLOBAL
    }

    /// Index of the image selected for `target`, memoized per (bundle contents, target)
    pub fn select_index(&self, bundle: &ImageBundle<'_>, target: &TargetDescriptor) -> Result<Option<usize>> {
        bundle.validate()?;

        let cache = self.cache.get_or_init(|| parking_lot::RwLock::new(HashMap::new()));
        let key = SelectionKey::new(bundle, target);

        {
            let read_guard = cache.read();
            if let Some(selected) = read_guard.get(&key) {
                record_selection(target.as_str(), bundle.len(), *selected, true);
                return Ok(*selected);
            }
        }

        let selected = select_validated(bundle, target);
        record_selection(target.as_str(), bundle.len(), selected, false);

        // Another thread may have raced us here; both computed the same answer.
        cache.write().entry(key).or_insert(selected);
        Ok(selected)
    }

    /// The image selected for `target`, memoized per (bundle contents, target)
    pub fn select<'b, 'a>(
        &self,
        bundle: &'b ImageBundle<'a>,
        target: &TargetDescriptor,
    ) -> Result<Option<&'b DeviceImage<'a>>> {
        Ok(self.select_index(bundle, target)?.and_then(|index| bundle.get(index)))
    }

    /// Number of memoized selections
    pub fn len(&self) -> usize {
        self.cache.get().map(|c| c.read().len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every memoized selection
    pub fn clear(&self) {
        if let Some(cache) = self.cache.get() {
            cache.write().clear();
        }
    }
}

impl Default for ImageCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::image::{ImageFormat, TARGET_SPIRV64, TARGET_UNKNOWN};

    fn target(spec: &str) -> TargetDescriptor {
        TargetDescriptor::new(spec)
    }

    #[test]
    fn test_exact_match_beats_portable() {
        let bundle = ImageBundle::from_images(vec![
            DeviceImage::new(TARGET_SPIRV64, ImageFormat::Spirv, &[]),
            DeviceImage::new("gfxA", ImageFormat::Native, &[]),
        ]);
        assert_eq!(select_image(&bundle, &target("gfxA")).unwrap(), Some(1));
    }

    #[test]
    fn test_unknown_target_image_is_skipped() {
        let bundle = ImageBundle::from_images(vec![
            DeviceImage::new(TARGET_UNKNOWN, ImageFormat::None, &[]),
            DeviceImage::new("gfxA", ImageFormat::Native, &[]),
        ]);
        assert_eq!(select_image(&bundle, &target("gfxA")).unwrap(), Some(1));
        assert_eq!(select_image(&bundle, &target("gfxB")).unwrap(), None);
    }

    #[test]
    fn test_first_in_bundle_order_wins() {
        let bundle = ImageBundle::from_images(vec![
            DeviceImage::new("gfxB", ImageFormat::Native, &[]),
            DeviceImage::new(TARGET_SPIRV64, ImageFormat::LlvmBitcode, &[]),
            DeviceImage::new(TARGET_SPIRV64, ImageFormat::Spirv, &[]),
        ]);
        assert_eq!(select_image(&bundle, &target("gfxA")).unwrap(), Some(1));
    }

    #[test]
    fn test_foreign_kind_never_selected() {
        let bundle = ImageBundle::from_images(vec![
            DeviceImage::new("gfxA", ImageFormat::Native, &[]).with_kind(1),
            DeviceImage::new(TARGET_SPIRV64, ImageFormat::Spirv, &[]).with_kind(2),
        ]);
        assert_eq!(select_image(&bundle, &target("gfxA")).unwrap(), None);
    }

    #[test]
    fn test_version_mismatch_is_fatal() {
        let bundle = ImageBundle::from_images(vec![
            DeviceImage::new("gfxA", ImageFormat::Native, &[]),
            DeviceImage::new("gfxB", ImageFormat::Native, &[]).with_version(9),
        ]);
        // The matching image comes first, but the bundle is rejected as a whole.
        let err = select_image(&bundle, &target("gfxA")).unwrap_err();
        assert!(matches!(err, BackendError::VersionMismatch { found: 9, .. }));

        let stale = ImageBundle::from_images(Vec::new()).with_version(0);
        assert!(select_image(&stale, &target("gfxA")).unwrap_err().is_structural());
    }

    #[test]
    fn test_catalog_memoizes_per_bundle_and_target() {
        let catalog = ImageCatalog::new();
        let bundle = ImageBundle::from_images(vec![DeviceImage::new("gfxA", ImageFormat::Native, &[])]);

        assert_eq!(catalog.select_index(&bundle, &target("gfxA")).unwrap(), Some(0));
        assert_eq!(catalog.select_index(&bundle, &target("gfxA")).unwrap(), Some(0));
        assert_eq!(catalog.len(), 1);

        // Negative results are memoized too.
        assert_eq!(catalog.select_index(&bundle, &target("gfxZ")).unwrap(), None);
        assert_eq!(catalog.len(), 2);

        let other = bundle.clone();
        assert_eq!(catalog.select_index(&other, &target("gfxA")).unwrap(), Some(0));
        assert_eq!(catalog.len(), 2);

        let different = ImageBundle::from_images(vec![DeviceImage::new("gfxZ", ImageFormat::Native, &[])]);
        assert_eq!(catalog.select_index(&different, &target("gfxZ")).unwrap(), Some(0));
        assert_eq!(catalog.len(), 3);

        catalog.clear();
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_catalog_revalidates_on_hit() {
        let catalog = ImageCatalog::new();
        let bundle = ImageBundle::from_images(vec![DeviceImage::new("gfxA", ImageFormat::Native, &[])]);
        assert_eq!(catalog.select_index(&bundle, &target("gfxA")).unwrap(), Some(0));

        let newer = bundle.clone().with_version(9);
        assert_ne!(newer.id(), bundle.id());
        let err = catalog.select_index(&newer, &target("gfxA")).unwrap_err();
        assert!(matches!(err, BackendError::VersionMismatch { found: 9, .. }));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_rebuilt_bundles_share_entries() {
        let catalog = ImageCatalog::new();
        let images = [
            DeviceImage::new(TARGET_SPIRV64, ImageFormat::Spirv, &[1]),
            DeviceImage::new("gfxA", ImageFormat::Native, &[2]),
        ];

        for _ in 0..100 {
            let bundle = ImageBundle::from_images(images.to_vec());
            assert_eq!(catalog.select_index(&bundle, &target("gfxA")).unwrap(), Some(1));
        }
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_catalog_does_not_cache_errors() {
        let catalog = ImageCatalog::new();
        let bundle = ImageBundle::from_images(vec![DeviceImage::new("gfxA", ImageFormat::Native, &[]).with_version(2)]);

        assert!(catalog.select(&bundle, &target("gfxA")).is_err());
        assert!(catalog.is_empty());
    }
}
