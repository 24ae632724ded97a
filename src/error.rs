//! Typed error taxonomy (spec §7). `anyhow::Error` wraps these at the CLI
//! boundary; `BbbError::exit_code` is consulted by `main` to pick a process
//! exit status.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BbbError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("essential artifact unavailable: {0}")]
    Essential(String),

    #[error("failed to parse {file}: {reason}")]
    Parse { file: String, reason: String },

    #[error("rendering failed: {0}")]
    Render(String),

    #[error("transcoder failed: {0}")]
    Transcode(String),
}

impl BbbError {
    /// Exit codes: negative-style setup failures, positive-style data
    /// failures, matching the sign convention spec §6 describes.
    pub fn exit_code(&self) -> i32 {
        match self {
            BbbError::Config(_) => -2,
            BbbError::Essential(_) => 4,
            BbbError::Parse { .. } => 2,
            BbbError::Render(_) => 6,
            BbbError::Transcode(_) => 10,
        }
    }
}
