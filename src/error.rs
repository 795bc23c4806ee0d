//! Error Taxonomy - One Error for the Service Surface
//!
//! Leaf modules keep their own error enums. [`CoreError`] wraps them and maps
//! every failure onto a stable [`ErrorKind`] that callers can branch on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::DocumentError;
use crate::fetch::FetchError;
use crate::session::LayerError;
use crate::store::StoreError;
use crate::templates::CatalogError;
use crate::text::TextError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedInput,
    NoMatchingElements,
    PersistenceFailure,
    SizeLimitExceeded,
    NotFound,
    InvalidRequest,
    RemoteTimeout,
    RemoteFailure,
    IncompatibleFormat,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Upload rejected: {0}")]
    UploadRejected(String),

    #[error(transparent)]
    Text(#[from] TextError),

    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Persistence failure for {key}: {source}")]
    Persistence {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("Stored blob {key} is missing")]
    BlobMissing { key: String },

    #[error("Stored blob {key} does not match its recorded checksum")]
    BlobCorrupt { key: String },

    #[error("Stored design {design_id} is corrupt: {source}")]
    CorruptRecord {
        design_id: String,
        #[source]
        source: DocumentError,
    },

    #[error("Stored design {design_id} does not match its recorded hash")]
    DocumentHashMismatch { design_id: String },

    #[error("Design not found: {0}")]
    DesignNotFound(String),

    #[error("Design format {found} is not compatible with {expected}")]
    IncompatibleFormat { found: String, expected: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn persistence(key: impl Into<String>, source: StoreError) -> Self {
        CoreError::Persistence { key: key.into(), source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::UploadRejected(_) | CoreError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            CoreError::Text(TextError::MalformedInput(_)) => ErrorKind::MalformedInput,
            CoreError::Text(TextError::NoMatchingElements { .. }) => ErrorKind::NoMatchingElements,
            CoreError::Layer(err) => match err {
                LayerError::LayerNotFound(_) => ErrorKind::NotFound,
                LayerError::Text(TextError::MalformedInput(_)) => ErrorKind::MalformedInput,
                LayerError::Text(TextError::NoMatchingElements { .. }) => ErrorKind::NoMatchingElements,
                _ => ErrorKind::InvalidRequest,
            },
            CoreError::Document(err) => match err {
                DocumentError::SizeLimitExceeded { .. } => ErrorKind::SizeLimitExceeded,
                DocumentError::Serialization(_) => ErrorKind::MalformedInput,
                DocumentError::MissingContent { .. } | DocumentError::DuplicateLayerId(_) => {
                    ErrorKind::InvalidRequest
                }
            },
            CoreError::Catalog(err) => match err {
                CatalogError::NotFound(_) => ErrorKind::NotFound,
                CatalogError::MissingFrontView(_) => ErrorKind::InvalidRequest,
                CatalogError::Corrupt { .. } | CatalogError::Store(_) => ErrorKind::PersistenceFailure,
            },
            CoreError::Fetch(err) => match err {
                FetchError::Timeout { .. } => ErrorKind::RemoteTimeout,
                FetchError::UnsupportedScheme(_) => ErrorKind::InvalidRequest,
                FetchError::Status { .. } | FetchError::Transport { .. } => ErrorKind::RemoteFailure,
            },
            CoreError::Persistence { .. }
            | CoreError::BlobMissing { .. }
            | CoreError::BlobCorrupt { .. }
            | CoreError::CorruptRecord { .. }
            | CoreError::DocumentHashMismatch { .. } => ErrorKind::PersistenceFailure,
            CoreError::DesignNotFound(_) => ErrorKind::NotFound,
            CoreError::IncompatibleFormat { .. } => ErrorKind::IncompatibleFormat,
            CoreError::Serialization(_) => ErrorKind::MalformedInput,
        }
    }

    /// Whether the same call may succeed if repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Persistence { source: StoreError::InvalidKey(_), .. }
            | CoreError::Catalog(CatalogError::Store(StoreError::InvalidKey(_))) => false,
            _ => matches!(
                self.kind(),
                ErrorKind::PersistenceFailure | ErrorKind::RemoteTimeout | ErrorKind::RemoteFailure
            ),
        }
    }
}
