//! Store and reconciliation error types.

use std::path::PathBuf;

use basejmpr_core::{FetchError, ProcessError};
use thiserror::Error;

use crate::revision::RevisionId;

/// Revision store and reconciliation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("base revision '{0}' already exists")]
    AlreadyExists(RevisionId),

    #[error("revision '{0}' does not exist")]
    NotFound(RevisionId),

    #[error("no base revisions available")]
    NoRevisions,

    #[error("no revision id follows '{0}'")]
    Exhausted(RevisionId),

    #[error("revision '{0}' has no linked files")]
    EmptyRevision(RevisionId),

    #[error("unable to create target link: no line of {} names a downloaded target", manifest.display())]
    LinkCreationFailed {
        revision: RevisionId,
        manifest: PathBuf,
    },

    #[error("failed to fetch {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("invalid artifact name '{0}': must be a single file name")]
    InvalidArtifactName(String),

    #[error("image introspection failed for {}: {source}", image.display())]
    IntrospectionFailed {
        image: PathBuf,
        #[source]
        source: ProcessError,
    },

    #[error("duplicate consumer entry detected - {} (backs from both {first} and {second})", image.display())]
    DuplicateConsumer {
        image: PathBuf,
        first: String,
        second: String,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid revision metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl StoreError {
    /// Attach a path to an I/O error.
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
