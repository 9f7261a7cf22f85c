use thiserror::Error;

use crate::job::JobStatus;

/// Errors returned by the captioning client and the batch controller.
#[derive(Error, Debug)]
pub enum CaptionError {
    /// The caption backend returned a non-success HTTP status.
    #[error("Caption backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    /// The response was missing expected fields.
    #[error("{0}")]
    InvalidResponse(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No API key is configured; checked before any network call.
    #[error("Please configure your API key in the settings first")]
    MissingApiKey,

    /// The selected folder has no uncaptioned images left.
    #[error("Folder {0} has no uncaptioned images")]
    NothingToCaption(String),

    /// Reprocessing is only offered for fully captioned folders.
    #[error("Folder {0} is not fully captioned; use start instead of reprocess")]
    ReprocessUnavailable(String),

    /// Reprocessing overwrites captions and needs explicit confirmation.
    #[error("Reprocessing overwrites existing captions and must be confirmed")]
    ReprocessNotConfirmed,

    #[error("No source folder selected")]
    NoFolderSelected,

    /// The command is not valid from the job's current state.
    #[error("Cannot {action} while job is {status}")]
    InvalidTransition {
        action: &'static str,
        status: JobStatus,
    },

    /// Another lifecycle request has not been answered yet.
    #[error("A {0} request is already in flight")]
    TransitionInFlight(&'static str),

    /// The caller dropped a lifecycle request before the backend answered.
    #[error("The {0} request was cancelled before the backend answered")]
    Cancelled(&'static str),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for CaptionError {
    fn from(err: anyhow::Error) -> Self {
        CaptionError::Other(err.to_string())
    }
}

impl CaptionError {
    /// True for failures of the transport or the server, as opposed to
    /// local refusals (guards, invalid transitions).
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            CaptionError::Http { .. }
                | CaptionError::Network { .. }
                | CaptionError::InvalidResponse(_)
                | CaptionError::Json(_)
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, CaptionError>;
