use std::path::{Path, PathBuf};

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Fatal errors of a processing run. None of them are retried inside the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Cannot read {path:?} as video: {reason}")]
    UnreadableMedia { path: PathBuf, reason: String },

    #[error("Cannot write video to {path:?}: {reason}")]
    UnwritableDestination { path: PathBuf, reason: String },

    #[error(
        "Annotated frame is {actual_width}x{actual_height}, sink expects {expected_width}x{expected_height}"
    )]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("Inference failed on frame {frame_index}: {source}")]
    InferenceFailure {
        frame_index: u64,
        #[source]
        source: BoxError,
    },

    #[error("Encoding failed: {0}")]
    EncodeFailure(String),
}

impl PipelineError {
    pub fn unreadable(path: &Path, reason: impl ToString) -> Self {
        Self::UnreadableMedia {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn unwritable(path: &Path, reason: impl ToString) -> Self {
        Self::UnwritableDestination {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn inference(frame_index: u64, err: anyhow::Error) -> Self {
        Self::InferenceFailure {
            frame_index,
            source: err.into(),
        }
    }

    pub fn encode(reason: impl ToString) -> Self {
        Self::EncodeFailure(reason.to_string())
    }
}

/// Errors reading or writing a persisted json record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl RecordError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}
