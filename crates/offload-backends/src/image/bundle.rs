//! Image bundles: every candidate image for one offload unit
//!
//! Bundles arrive in one of two shapes, both produced by the offload wrapper:
//!
//! - the serialized little-endian layout embedded in a host binary section,
//!   read with [`ImageBundle::parse`];
//! - the in-memory `#[repr(C)]` descriptor records ([`RawBinDesc`] /
//!   [`RawDeviceImage`]), read with [`ImageBundle::from_raw`].
//!
//! # Serialized Layout
//!
//! ```text
//! header   version: u16 | count: u16 | reserved: u32                 8 bytes
//! record   version: u16 | kind: u8 | format: u8                      4 bytes
//!          target_spec   offset: u32 | len: u32
//!          build_options offset: u32 | len: u32
//!          manifest      offset: u32 | len: u32
//!          image         offset: u32 | len: u32                     32 bytes
//! ```
//!
//! Offsets are absolute within the buffer. The size of a record is implied by
//! its version, which is read and checked before anything else in the record.

use super::descriptor::{check_version, DeviceImage, ImageFormat, BIN_DESC_VERSION, DEVICE_IMAGE_VERSION};
use crate::error::{BackendError, RecordKind, Result};
use bytemuck::{Pod, Zeroable};
use std::ffi::{c_char, c_void, CStr};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_BUNDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a bundle, carried by launches for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BundleId(u64);

impl BundleId {
    fn next() -> Self {
        Self(NEXT_BUNDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bundle{}", self.0)
    }
}

// ================================================================================================
// Serialized records
// ================================================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct BundleHeader {
    version: u16,
    count: u16,
    reserved: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ByteRange {
    offset: u32,
    len: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ImageRecordV1 {
    version: u16,
    kind: u8,
    format: u8,
    target_spec: ByteRange,
    build_options: ByteRange,
    manifest: ByteRange,
    image: ByteRange,
}

/// Size in bytes of the serialized bundle header
pub const BUNDLE_HEADER_SIZE: usize = std::mem::size_of::<BundleHeader>();

/// Size in bytes of a version 1 serialized image record
pub const IMAGE_RECORD_V1_SIZE: usize = std::mem::size_of::<ImageRecordV1>();

fn read_pod<T: Pod>(bytes: &[u8], offset: usize, what: &'static str) -> Result<T> {
    let needed = std::mem::size_of::<T>();
    let end = offset.checked_add(needed).filter(|end| *end <= bytes.len());
    match end {
        Some(end) => Ok(bytemuck::pod_read_unaligned(&bytes[offset..end])),
        None => Err(BackendError::Truncated {
            what,
            offset,
            needed,
            available: bytes.len(),
        }),
    }
}

fn resolve_range<'a>(bytes: &'a [u8], range: ByteRange, field: &'static str) -> Result<&'a [u8]> {
    let offset = u32::from_le(range.offset) as usize;
    let len = u32::from_le(range.len) as usize;
    offset
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .map(|end| &bytes[offset..end])
        .ok_or(BackendError::RangeOutOfBounds {
            field,
            offset,
            len,
            available: bytes.len(),
        })
}

fn resolve_str<'a>(bytes: &'a [u8], range: ByteRange, field: &'static str) -> Result<&'a str> {
    std::str::from_utf8(resolve_range(bytes, range, field)?).map_err(|_| BackendError::InvalidUtf8 { field })
}

// ================================================================================================
// C ABI records
// ================================================================================================

/// In-memory device image record emitted by the offload wrapper
///
/// Layout must match the toolchain's `__tgt_device_image` when the version
/// fields agree.
#[repr(C)]
#[derive(Debug)]
pub struct RawDeviceImage {
    pub version: u16,
    pub kind: u8,
    pub format: u8,
    /// Null-terminated device target architecture
    pub device_target_spec: *const c_char,
    /// Null-terminated build options
    pub build_options: *const c_char,
    pub manifest_start: *const u8,
    pub manifest_end: *const u8,
    pub image_start: *const u8,
    pub image_end: *const u8,
    /// Offload entry table, unused by this runtime
    pub entries_begin: *mut c_void,
    pub entries_end: *mut c_void,
}

/// In-memory binary descriptor emitted by the offload wrapper
///
/// Layout must match the toolchain's `__tgt_bin_desc` when the version fields agree.
#[repr(C)]
#[derive(Debug)]
pub struct RawBinDesc {
    pub version: u16,
    pub num_device_images: u16,
    pub device_images: *const RawDeviceImage,
    /// Host offload entry table, unused by this runtime
    pub host_entries_begin: *mut c_void,
    pub host_entries_end: *mut c_void,
}

/// # Safety
///
/// `ptr` is null or points to a null-terminated string valid for `'a`.
unsafe fn raw_str<'a>(ptr: *const c_char, field: &'static str) -> Result<&'a str> {
    if ptr.is_null() {
        return Ok("");
    }
    // SAFETY: caller guarantees a valid null-terminated string.
    let cstr = unsafe { CStr::from_ptr(ptr) };
    cstr.to_str().map_err(|_| BackendError::InvalidUtf8 { field })
}

/// # Safety
///
/// When non-null, `start..end` lies within one allocation valid for `'a`.
unsafe fn raw_range<'a>(start: *const u8, end: *const u8, field: &'static str) -> Result<&'a [u8]> {
    if start.is_null() || end.is_null() || start == end {
        return Ok(&[]);
    }
    if end < start {
        return Err(BackendError::RangeOutOfBounds {
            field,
            offset: start as usize,
            len: 0,
            available: 0,
        });
    }
    let len = end as usize - start as usize;
    // SAFETY: caller guarantees the range belongs to one live allocation.
    Ok(unsafe { std::slice::from_raw_parts(start, len) })
}

// ================================================================================================
// ImageBundle
// ================================================================================================

/// All candidate images for one offload unit, in toolchain order
#[derive(Debug, Clone)]
pub struct ImageBundle<'a> {
    id: BundleId,
    version: u16,
    declared_count: usize,
    images: Vec<DeviceImage<'a>>,
}

impl<'a> ImageBundle<'a> {
    /// Bundle of host-described images at the current bundle version
    pub fn from_images(images: Vec<DeviceImage<'a>>) -> Self {
        Self {
            id: BundleId::next(),
            version: BIN_DESC_VERSION,
            declared_count: images.len(),
            images,
        }
    }

    /// Override the bundle version, e.g. for records from a newer toolchain
    ///
    /// The result is a different bundle and gets a fresh identity.
    pub fn with_version(mut self, version: u16) -> Self {
        self.id = BundleId::next();
        self.version = version;
        self
    }

    /// Parse the serialized bundle layout without copying any image data
    ///
    /// The bundle version is checked before any record is read, and each
    /// record's version before the rest of that record.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let header: BundleHeader = read_pod(bytes, 0, "bundle header")?;
        check_version(RecordKind::Bundle, u16::from_le(header.version), BIN_DESC_VERSION)?;

        let count = u16::from_le(header.count) as usize;
        let mut images = Vec::with_capacity(count);
        let mut offset = BUNDLE_HEADER_SIZE;

        for _ in 0..count {
            let version = u16::from_le(read_pod::<u16>(bytes, offset, "image record")?);
            check_version(RecordKind::DeviceImage, version, DEVICE_IMAGE_VERSION)?;

            let record: ImageRecordV1 = read_pod(bytes, offset, "image record")?;
            let format = ImageFormat::try_from(record.format)?;
            let image = DeviceImage::new(
                resolve_str(bytes, record.target_spec, "target_spec")?,
                format,
                resolve_range(bytes, record.image, "image")?,
            )
            .with_kind(record.kind)
            .with_build_options(resolve_str(bytes, record.build_options, "build_options")?)
            .with_manifest(resolve_range(bytes, record.manifest, "manifest")?);

            images.push(image);
            offset += IMAGE_RECORD_V1_SIZE;
        }

        tracing::trace!(images = count, bytes = bytes.len(), "parsed image bundle");

        Ok(Self {
            id: BundleId::next(),
            version: BIN_DESC_VERSION,
            declared_count: count,
            images,
        })
    }

    /// View the toolchain's in-memory descriptor records without copying
    ///
    /// # Safety
    ///
    /// `desc.device_images` must point to `desc.num_device_images` records
    /// (or be null when the count is zero), and every string and byte range
    /// referenced by those records must stay valid and unmodified for `'a`.
    pub unsafe fn from_raw(desc: &'a RawBinDesc) -> Result<Self> {
        check_version(RecordKind::Bundle, desc.version, BIN_DESC_VERSION)?;

        let count = desc.num_device_images as usize;
        let records: &'a [RawDeviceImage] = if count == 0 || desc.device_images.is_null() {
            &[]
        } else {
            // SAFETY: caller guarantees `count` records at `device_images`.
            unsafe { std::slice::from_raw_parts(desc.device_images, count) }
        };
        if records.len() != count {
            return Err(BackendError::CountMismatch {
                declared: count,
                actual: records.len(),
            });
        }

        let mut images = Vec::with_capacity(count);
        for raw in records {
            check_version(RecordKind::DeviceImage, raw.version, DEVICE_IMAGE_VERSION)?;
            let format = ImageFormat::try_from(raw.format)?;

            // SAFETY: pointers are valid for 'a per this function's contract.
            let image = unsafe {
                DeviceImage::new(
                    raw_str(raw.device_target_spec, "target_spec")?,
                    format,
                    raw_range(raw.image_start, raw.image_end, "image")?,
                )
                .with_kind(raw.kind)
                .with_build_options(raw_str(raw.build_options, "build_options")?)
                .with_manifest(raw_range(raw.manifest_start, raw.manifest_end, "manifest")?)
            };
            images.push(image);
        }

        Ok(Self {
            id: BundleId::next(),
            version: desc.version,
            declared_count: count,
            images,
        })
    }

    pub fn id(&self) -> BundleId {
        self.id
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    /// Number of images
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[DeviceImage<'a>] {
        &self.images
    }

    pub fn get(&self, index: usize) -> Option<&DeviceImage<'a>> {
        self.images.get(index)
    }

    /// Check every structural invariant: bundle version, declared count and
    /// each image's version
    pub fn validate(&self) -> Result<()> {
        check_version(RecordKind::Bundle, self.version, BIN_DESC_VERSION)?;
        if self.declared_count != self.images.len() {
            return Err(BackendError::CountMismatch {
                declared: self.declared_count,
                actual: self.images.len(),
            });
        }
        self.images.iter().try_for_each(DeviceImage::check_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{OFFLOAD_KIND, TARGET_SPIRV64};
    use std::ffi::CString;

    struct Entry<'s> {
        version: u16,
        kind: u8,
        format: u8,
        target: &'s str,
        options: &'s str,
        manifest: &'s [u8],
        image: &'s [u8],
    }

    impl<'s> Entry<'s> {
        fn new(target: &'s str, format: ImageFormat, image: &'s [u8]) -> Self {
            Self {
                version: DEVICE_IMAGE_VERSION,
                kind: OFFLOAD_KIND,
                format: format as u8,
                target,
                options: "",
                manifest: &[],
                image,
            }
        }
    }

    // Lays out records first, then a data section the ranges point into.
    fn encode(version: u16, entries: &[Entry<'_>]) -> Vec<u8> {
        let mut data_offset = BUNDLE_HEADER_SIZE + entries.len() * IMAGE_RECORD_V1_SIZE;
        let mut records = Vec::new();
        let mut data = Vec::new();

        let mut push = |bytes: &[u8], data: &mut Vec<u8>| {
            let range = ByteRange {
                offset: (data_offset as u32).to_le(),
                len: (bytes.len() as u32).to_le(),
            };
            data.extend_from_slice(bytes);
            data_offset += bytes.len();
            range
        };

        for entry in entries {
            let record = ImageRecordV1 {
                version: entry.version.to_le(),
                kind: entry.kind,
                format: entry.format,
                target_spec: push(entry.target.as_bytes(), &mut data),
                build_options: push(entry.options.as_bytes(), &mut data),
                manifest: push(entry.manifest, &mut data),
                image: push(entry.image, &mut data),
            };
            records.extend_from_slice(bytemuck::bytes_of(&record));
        }

        let header = BundleHeader {
            version: version.to_le(),
            count: (entries.len() as u16).to_le(),
            reserved: 0,
        };
        let mut out = bytemuck::bytes_of(&header).to_vec();
        out.extend_from_slice(&records);
        out.extend_from_slice(&data);
        out
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(BUNDLE_HEADER_SIZE, 8);
        assert_eq!(IMAGE_RECORD_V1_SIZE, 36);
    }

    #[test]
    fn test_parse_borrows_payload() {
        let mut native = Entry::new("gfxA", ImageFormat::Native, &[1, 2, 3, 4]);
        native.options = "-cl-fast-relaxed-math";
        native.manifest = b"{\"kernels\":1}";
        let bytes = encode(
            BIN_DESC_VERSION,
            &[native, Entry::new(TARGET_SPIRV64, ImageFormat::Spirv, &[9, 9])],
        );

        let bundle = ImageBundle::parse(&bytes).unwrap();
        assert_eq!(bundle.len(), 2);
        assert!(bundle.validate().is_ok());

        let first = bundle.get(0).unwrap();
        assert_eq!(first.target_spec(), "gfxA");
        assert_eq!(first.format(), ImageFormat::Native);
        assert_eq!(first.build_options(), "-cl-fast-relaxed-math");
        assert_eq!(first.manifest(), b"{\"kernels\":1}");
        assert_eq!(first.image(), &[1, 2, 3, 4]);

        // The payload is a view into the input buffer.
        let range = bytes.as_ptr_range();
        assert!(range.contains(&first.image().as_ptr()));
        assert_eq!(bundle.get(1).unwrap().image(), &[9, 9]);
    }

    #[test]
    fn test_parse_rejects_bundle_version_before_records() {
        // A garbage record must not be looked at once the header version is wrong.
        let mut bytes = encode(BIN_DESC_VERSION + 1, &[Entry::new("x", ImageFormat::Native, &[])]);
        bytes[BUNDLE_HEADER_SIZE + 3] = 0xff;

        let err = ImageBundle::parse(&bytes).unwrap_err();
        assert!(matches!(
            err,
            BackendError::VersionMismatch {
                record: RecordKind::Bundle,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_rejects_image_version() {
        let mut entry = Entry::new("gfxA", ImageFormat::Native, &[1]);
        entry.version = 7;
        // Invalid format too: the version check must win.
        entry.format = 0xee;
        let bytes = encode(BIN_DESC_VERSION, &[entry]);

        let err = ImageBundle::parse(&bytes).unwrap_err();
        assert!(matches!(
            err,
            BackendError::VersionMismatch {
                record: RecordKind::DeviceImage,
                found: 7,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_structural_errors() {
        assert!(matches!(
            ImageBundle::parse(&[1, 0]),
            Err(BackendError::Truncated { what: "bundle header", .. })
        ));

        let bytes = encode(BIN_DESC_VERSION, &[Entry::new("gfxA", ImageFormat::Native, &[1, 2])]);
        assert!(matches!(
            ImageBundle::parse(&bytes[..BUNDLE_HEADER_SIZE + 10]),
            Err(BackendError::Truncated { what: "image record", .. })
        ));
        assert!(matches!(
            ImageBundle::parse(&bytes[..bytes.len() - 1]),
            Err(BackendError::RangeOutOfBounds { field: "image", .. })
        ));

        let mut bad_format = Entry::new("gfxA", ImageFormat::Native, &[]);
        bad_format.format = 12;
        assert!(matches!(
            ImageBundle::parse(&encode(BIN_DESC_VERSION, &[bad_format])),
            Err(BackendError::InvalidFormat(12))
        ));

        let bad_utf8 = encode(BIN_DESC_VERSION, &[Entry::new("\u{e9}", ImageFormat::Native, &[])]);
        let mut corrupted = bad_utf8.clone();
        let target_offset = BUNDLE_HEADER_SIZE + IMAGE_RECORD_V1_SIZE;
        corrupted[target_offset] = 0xff;
        assert!(matches!(
            ImageBundle::parse(&corrupted),
            Err(BackendError::InvalidUtf8 { field: "target_spec" })
        ));
    }

    #[test]
    fn test_from_raw_views_toolchain_records() {
        let target = CString::new("gfxA").unwrap();
        let options = CString::new("-O3").unwrap();
        let payload = [0xde_u8, 0xad, 0xbe, 0xef];
        let manifest = *b"meta";

        let records = [RawDeviceImage {
            version: DEVICE_IMAGE_VERSION,
            kind: OFFLOAD_KIND,
            format: ImageFormat::Native as u8,
            device_target_spec: target.as_ptr(),
            build_options: options.as_ptr(),
            manifest_start: manifest.as_ptr(),
            manifest_end: manifest.as_ptr().wrapping_add(manifest.len()),
            image_start: payload.as_ptr(),
            image_end: payload.as_ptr().wrapping_add(payload.len()),
            entries_begin: std::ptr::null_mut(),
            entries_end: std::ptr::null_mut(),
        }];
        let desc = RawBinDesc {
            version: BIN_DESC_VERSION,
            num_device_images: 1,
            device_images: records.as_ptr(),
            host_entries_begin: std::ptr::null_mut(),
            host_entries_end: std::ptr::null_mut(),
        };

        let bundle = unsafe { ImageBundle::from_raw(&desc) }.unwrap();
        let image = bundle.get(0).unwrap();
        assert_eq!(image.target_spec(), "gfxA");
        assert_eq!(image.build_options(), "-O3");
        assert_eq!(image.manifest(), b"meta");
        assert_eq!(image.image().as_ptr(), payload.as_ptr());
        assert_eq!(image.image().len(), 4);
    }

    #[test]
    fn test_from_raw_rejects_version() {
        let desc = RawBinDesc {
            version: 0,
            num_device_images: 0,
            device_images: std::ptr::null(),
            host_entries_begin: std::ptr::null_mut(),
            host_entries_end: std::ptr::null_mut(),
        };
        let err = unsafe { ImageBundle::from_raw(&desc) }.unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn test_bundle_ids_are_unique() {
        let a = ImageBundle::from_images(Vec::new());
        let b = ImageBundle::from_images(Vec::new());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }
}
