//! Error types for OxiTape operations.
//!
//! Every reader and writer keeps the first error it returns and replays it on
//! later calls, so [`TapeError`] is `Clone`. Underlying I/O errors are held
//! behind an [`Arc`] for that reason.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// The main error type for OxiTape operations.
#[derive(Debug, Clone, Error)]
pub enum TapeError {
    /// I/O error from the underlying reader/writer.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// Wrong or missing format signature.
    #[error("Invalid magic: expected {expected:02x?}, found {found:02x?}")]
    InvalidMagic {
        /// Expected magic bytes.
        expected: Vec<u8>,
        /// Actual bytes found.
        found: Vec<u8>,
    },

    /// Unparseable field, checksum mismatch, missing terminator, or a value
    /// that does not fit its field on write.
    #[error("Malformed header: {message}")]
    MalformedHeader {
        /// Description of the header error.
        message: String,
    },

    /// The entry was finalized before its declared size was written.
    #[error("Write too short: {remaining} of {size} bytes missing")]
    TooShort {
        /// Declared entry size.
        size: u64,
        /// Bytes still owed when the entry was finalized.
        remaining: u64,
    },

    /// A write went past the declared entry size.
    #[error("Write too long: entry declared {size} bytes, {excess} bytes rejected")]
    TooLong {
        /// Declared entry size.
        size: u64,
        /// Bytes of the offending call that were not written.
        excess: u64,
    },

    /// Recognized-looking but unhandled format variant.
    #[error("Unsupported format: {message}")]
    UnsupportedFormat {
        /// Description of the variant.
        message: String,
    },

    /// End of stream in the middle of a header, name, body or padding.
    #[error("Truncated stream: unexpected end of input in {context}")]
    TruncatedStream {
        /// What was being read when the stream ended.
        context: String,
    },

    /// PAX record length or `key=value` syntax violation.
    #[error("Invalid PAX record: {message}")]
    InvalidPaxRecord {
        /// Description of the record error.
        message: String,
    },

    /// The archive handle was already closed.
    #[error("Archive closed")]
    Closed,

    /// Body data was written before any header.
    #[error("No current entry: write_header must be called before writing data")]
    NoCurrentEntry,
}

/// Result type alias for OxiTape operations.
pub type Result<T> = std::result::Result<T, TapeError>;

impl From<io::Error> for TapeError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<TapeError> for io::Error {
    fn from(err: TapeError) -> Self {
        let kind = match &err {
            TapeError::Io(inner) => inner.kind(),
            TapeError::TruncatedStream { .. } => io::ErrorKind::UnexpectedEof,
            TapeError::TooShort { .. } | TapeError::TooLong { .. } => {
                io::ErrorKind::InvalidInput
            }
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}

impl TapeError {
    /// Create an invalid magic error.
    pub fn invalid_magic(expected: impl Into<Vec<u8>>, found: impl Into<Vec<u8>>) -> Self {
        Self::InvalidMagic {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a malformed header error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedHeader {
            message: message.into(),
        }
    }

    /// Create a too-short error.
    pub fn too_short(size: u64, remaining: u64) -> Self {
        Self::TooShort { size, remaining }
    }

    /// Create a too-long error.
    pub fn too_long(size: u64, excess: u64) -> Self {
        Self::TooLong { size, excess }
    }

    /// Create an unsupported format error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            message: message.into(),
        }
    }

    /// Create a truncated stream error.
    pub fn truncated(context: impl Into<String>) -> Self {
        Self::TruncatedStream {
            context: context.into(),
        }
    }

    /// Create an invalid PAX record error.
    pub fn invalid_pax(message: impl Into<String>) -> Self {
        Self::InvalidPaxRecord {
            message: message.into(),
        }
    }

    /// Recover a `TapeError` carried inside an `io::Error` produced by one of
    /// the `std::io` adapters, falling back to wrapping the I/O error.
    pub fn from_io(err: io::Error) -> Self {
        match err.get_ref().and_then(|e| e.downcast_ref::<TapeError>()) {
            Some(tape) => tape.clone(),
            None => Self::from(err),
        }
    }
}

impl PartialEq for TapeError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Io(a), Self::Io(b)) => Arc::ptr_eq(a, b),
            (
                Self::InvalidMagic {
                    expected: e1,
                    found: f1,
                },
                Self::InvalidMagic {
                    expected: e2,
                    found: f2,
                },
            ) => e1 == e2 && f1 == f2,
            (Self::MalformedHeader { message: a }, Self::MalformedHeader { message: b }) => a == b,
            (
                Self::TooShort {
                    size: s1,
                    remaining: r1,
                },
                Self::TooShort {
                    size: s2,
                    remaining: r2,
                },
            ) => s1 == s2 && r1 == r2,
            (
                Self::TooLong {
                    size: s1,
                    excess: x1,
                },
                Self::TooLong {
                    size: s2,
                    excess: x2,
                },
            ) => s1 == s2 && x1 == x2,
            (Self::UnsupportedFormat { message: a }, Self::UnsupportedFormat { message: b }) => {
                a == b
            }
            (Self::TruncatedStream { context: a }, Self::TruncatedStream { context: b }) => a == b,
            (Self::InvalidPaxRecord { message: a }, Self::InvalidPaxRecord { message: b }) => {
                a == b
            }
            (Self::Closed, Self::Closed) => true,
            (Self::NoCurrentEntry, Self::NoCurrentEntry) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TapeError::invalid_magic(b"!<arch>\n".to_vec(), b"garbage!".to_vec());
        assert!(err.to_string().contains("Invalid magic"));

        let err = TapeError::too_short(10, 3);
        assert!(err.to_string().contains("3 of 10"));

        let err = TapeError::invalid_pax("missing '='");
        assert!(err.to_string().contains("missing '='"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: TapeError = io_err.into();
        assert!(matches!(err, TapeError::Io(_)));
    }

    #[test]
    fn test_io_adapter_roundtrip() {
        let original = TapeError::too_long(5, 1);
        let io_err: io::Error = original.clone().into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(TapeError::from_io(io_err), original);

        let io_err: io::Error = TapeError::truncated("tar header").into();
        assert_eq!(io_err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_clone_keeps_identity() {
        let err: TapeError = io::Error::other("disk on fire").into();
        assert_eq!(err.clone(), err);
    }
}
