use thiserror::Error;

/// Errors that can occur in the media-mutation pipeline
#[derive(Error, Debug)]
pub enum TransformError {
    /// Bad indices, out-of-range values, ineligible input. Rejected before
    /// any subprocess launch, no side effects.
    #[error("validation error: {0}")]
    Validation(String),

    /// The external transform tool exited with a nonzero code. The temp
    /// output has been discarded and the original file is untouched.
    #[error("transform tool exited with code {code}: {stderr}")]
    ToolExecution { code: i32, stderr: String },

    /// The owning task was cancelled. Not a true error: the batch unwinds
    /// cleanly and partial output is discarded.
    #[error("operation cancelled")]
    Cancelled,

    /// The interactive selection session hit its deadline. The session is
    /// discarded and the underlying file is returned unmodified.
    #[error("selection session timed out")]
    SessionTimeout,

    /// The external probe tool is unavailable or produced malformed output
    #[error("probe failed: {0}")]
    Probe(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TransformResult<T> = Result<T, TransformError>;
