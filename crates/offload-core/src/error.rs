//! Error types for offload-core operations

use offload_backends::BackendError;

/// Result type for offload-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad class of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected while building the dispatch, before any device work
    Configuration,
    /// No device image could be chosen
    Selection,
    /// Image records are malformed or from an unsupported version
    Structural,
    /// Failure while groups were running or finalizing
    Execution,
}

/// Errors that can occur in offload-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Property name outside the supported set
    #[error("unknown reduction property: {0:?}")]
    UnknownProperty(String),

    /// Property given more than once
    #[error("duplicate reduction property: {0}")]
    DuplicateProperty(String),

    /// Identity initialization requested for an operation without one
    #[error("initialize_to_identity requires an identity, but none is known for {operation}")]
    MissingIdentity { operation: &'static str },

    /// Bundle holds no image usable on the backend's target
    #[error("no device image in bundle matches target {target}")]
    ImageNotFound { target: String },

    /// Malformed or unsupported image records
    #[error("structural error: {0}")]
    Structural(#[source] BackendError),

    /// Backend failure during a dispatch
    #[error("execution error: {0}")]
    Execution(#[source] BackendError),

    /// Dispatcher driven through an invalid state transition
    #[error("invalid dispatch state transition: {from} -> {to}")]
    InvalidState { from: &'static str, to: &'static str },

    /// Runtime configuration could not be parsed
    #[error("invalid runtime configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownProperty(_) | Error::DuplicateProperty(_) | Error::MissingIdentity { .. } | Error::Config(_) => {
                ErrorKind::Configuration
            }
            Error::ImageNotFound { .. } => ErrorKind::Selection,
            Error::Structural(_) => ErrorKind::Structural,
            Error::Execution(_) | Error::InvalidState { .. } => ErrorKind::Execution,
        }
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        if err.is_structural() {
            Error::Structural(err)
        } else {
            Error::Execution(err)
        }
    }
}
