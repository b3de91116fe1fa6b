//! Error types for project layout resolution and package ingestion.

use std::path::PathBuf;

/// Fatal ingestion failures. Problems confined to a single asset are never
/// reported through this type; they are recorded on the asset instead.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid project layout at {}: {reason}", .path.display())]
    InvalidLayout { path: PathBuf, reason: String },

    #[error("input directory not found: {}", .0.display())]
    Scan(PathBuf),

    #[error(
        "{} is already populated and the project root holds {} loose entries; \
         re-run with --force to merge them or clean up manually",
        .input.display(),
        .loose.len()
    )]
    Conflict { input: PathBuf, loose: Vec<PathBuf> },

    #[error("malformed notebook {path}: {reason}")]
    MalformedNotebook { path: String, reason: String },

    #[error("no notebook found in {}", .0.display())]
    MissingNotebook(PathBuf),

    #[error(
        "archiving loose files failed for {} of {} entries",
        .failed.len(),
        .failed.len() + .moved.len()
    )]
    Archive {
        moved: Vec<PathBuf>,
        failed: Vec<ArchiveFailure>,
    },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error at {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One loose entry that could not be moved into `input/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFailure {
    pub path: PathBuf,
    pub reason: String,
}

impl IngestError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
