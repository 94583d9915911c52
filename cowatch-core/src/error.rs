use thiserror::Error;

use crate::transcode::TranscodeError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Session full: {0}")]
    SessionFull(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
