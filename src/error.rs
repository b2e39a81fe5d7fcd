//! Error types surfaced at the boundary operations.

use thiserror::Error;

/// A crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// An error produced by a boundary operation (read, write, dereference).
#[derive(Debug, Error)]
pub enum Error {
    /// The tokenizer or parser cannot advance.
    #[error("syntax error at offset {offset}: {reason}")]
    Syntax {
        /// Byte offset into the input at which parsing failed.
        offset: usize,
        /// What went wrong.
        reason: String,
    },

    /// The cross reference table could not be reconstructed.
    #[error("xref error: {0}")]
    XRef(String),

    /// A stream filter rejected its payload.
    #[error("decode error in {filter}: {reason}")]
    Decode {
        /// The filter that failed.
        filter: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// Password validation failed or the encryption parameters are outside
    /// the supported set.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// The object graph violates the document schema.
    #[error("validation error: {0}")]
    Validation(String),

    /// A filter or encryption variant the implementation does not cover.
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// An error from the byte source or the writer sink.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn syntax(offset: usize, reason: impl Into<String>) -> Self {
        Error::Syntax {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(filter: &'static str, reason: impl Into<String>) -> Self {
        Error::Decode {
            filter,
            reason: reason.into(),
        }
    }
}
