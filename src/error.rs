use std::path::PathBuf;
use thiserror::Error;

/// Failures that end a conversion job.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("FFmpeg not found: {0}")]
    ToolNotFound(String),

    #[error("a conversion is already running")]
    Busy,

    #[error("failed to spawn {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("FFmpeg process returned non-zero exit code: {}\nStderr: {stderr_tail}", code_label(.code))]
    ProcessFailure {
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("conversion cancelled")]
    Cancelled,
}

fn code_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "terminated by signal".to_string(), |c| c.to_string())
}

/// A single diagnostic line that looked like progress but could not be read.
#[derive(Debug, Error, PartialEq)]
pub enum ParseWarning {
    #[error("timestamp field `{field}` out of range in `{raw}`")]
    FieldOutOfRange { field: &'static str, raw: String },
}
