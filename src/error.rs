//! Error types for the ingestion and switching pipeline.

use std::net::SocketAddr;

use thiserror::Error;

/// Why a single wire record was rejected.
///
/// Always recoverable: the record is dropped and the connection stays open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedRecord {
    #[error("expected 11 fields, got {found}")]
    WrongArity { found: usize },

    #[error("not a number: {token:?}")]
    InvalidNumber { token: String },

    #[error("record is not valid UTF-8")]
    InvalidUtf8,

    #[error("record exceeds {limit} bytes")]
    TooLong { limit: usize },
}

#[derive(Error, Debug)]
pub enum AvatarError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("avatar index {index} out of range (count {count})")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("no avatars found")]
    NoAvatarsFound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type AvatarResult<T> = Result<T, AvatarError>;
