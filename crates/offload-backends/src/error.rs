//! Error types for backend operations

use std::fmt;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Which structural record a version check applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Device image descriptor
    DeviceImage,
    /// Binary (bundle) descriptor
    Bundle,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::DeviceImage => f.write_str("device image"),
            RecordKind::Bundle => f.write_str("image bundle"),
        }
    }
}

/// Errors that can occur in the catalog, the staging allocator or a backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Record version differs from the version this runtime understands
    #[error("{record} version mismatch: found {found}, supported {supported}")]
    VersionMismatch {
        record: RecordKind,
        found: u16,
        supported: u16,
    },

    /// Serialized bundle ends before a header or record does
    #[error("truncated {what}: need {needed} bytes at offset {offset}, buffer has {available}")]
    Truncated {
        what: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Byte range points outside the backing buffer
    #[error("{field} range {offset}+{len} exceeds buffer of {available} bytes")]
    RangeOutOfBounds {
        field: &'static str,
        offset: usize,
        len: usize,
        available: usize,
    },

    /// Unknown image format tag
    #[error("invalid image format tag: {0}")]
    InvalidFormat(u8),

    /// Descriptor string is not valid UTF-8
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    /// Declared image count disagrees with the images present
    #[error("bundle declares {declared} images but holds {actual}")]
    CountMismatch { declared: usize, actual: usize },

    /// The system allocator returned null
    #[error("staging allocation failed: {bytes} bytes aligned to {alignment}")]
    AllocationFailed { bytes: usize, alignment: usize },

    /// Requested element count overflows the address space
    #[error("staging allocation of {count} elements of {element_size} bytes overflows")]
    CapacityOverflow { count: usize, element_size: usize },

    /// A work group failed on the device
    #[error("device fault in group {group}: {message}")]
    DeviceFault { group: usize, message: String },

    /// Launch configuration cannot be executed
    #[error("invalid launch configuration: {0}")]
    InvalidLaunchConfig(String),
}

impl BackendError {
    /// Create a device fault error
    pub fn device_fault(group: usize, message: impl Into<String>) -> Self {
        Self::DeviceFault {
            group,
            message: message.into(),
        }
    }

    /// True for errors in externally produced image records.
    ///
    /// Structural errors are fatal: the records cannot be trusted at all.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::VersionMismatch { .. }
                | Self::Truncated { .. }
                | Self::RangeOutOfBounds { .. }
                | Self::InvalidFormat(_)
                | Self::InvalidUtf8 { .. }
                | Self::CountMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        let mismatch = BackendError::VersionMismatch {
            record: RecordKind::Bundle,
            found: 2,
            supported: 1,
        };
        assert!(mismatch.is_structural());
        assert_eq!(mismatch.to_string(), "image bundle version mismatch: found 2, supported 1");

        assert!(!BackendError::device_fault(3, "ecc").is_structural());
        assert!(!BackendError::AllocationFailed { bytes: 64, alignment: 64 }.is_structural());
    }
}
