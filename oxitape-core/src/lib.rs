//! # OxiTape Core
//!
//! Core components for the OxiTape archive library.
//!
//! This crate provides the building blocks shared by the ar, cpio and tar
//! codecs:
//!
//! - [`header`]: Format-agnostic entry header
//! - [`bounded`]: Size-bounded body reader/writer with per-format padding
//! - [`state`]: Sticky error state of a reader/writer handle
//! - [`traits`]: Streaming archive reader/writer traits
//! - [`error`]: Error types
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ L3: Front end                                           │
//! │     oxitape CLI, format dispatch                        │
//! ├─────────────────────────────────────────────────────────┤
//! │ L2: Container codecs                                    │
//! │     ar, cpio (newc/crc), tar (USTAR + PAX)              │
//! ├─────────────────────────────────────────────────────────┤
//! │ L1: Streaming primitives (this crate)                   │
//! │     BoundedReader/Writer, StreamState, Header           │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use oxitape_core::bounded::{Alignment, BoundedReader};
//! use std::io::{Cursor, Read};
//!
//! // A 5-byte ar body followed by its newline pad and the next header.
//! let stream = Cursor::new(b"hello\nnext".to_vec());
//! let mut body = BoundedReader::new(stream, 5, Alignment::AR);
//! let mut data = Vec::new();
//! body.read_to_end(&mut data).unwrap();
//! assert_eq!(data, b"hello");
//! assert_eq!(body.position(), 6);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod bounded;
pub mod error;
pub mod header;
pub mod state;
pub mod traits;

// Re-exports for convenience
pub use bounded::{Alignment, BoundedReader, BoundedWriter};
pub use error::{Result, TapeError};
pub use header::{EntryType, Header};
pub use state::StreamState;
pub use traits::{ArchiveReader, ArchiveWriter, convert};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bounded::{Alignment, BoundedReader, BoundedWriter};
    pub use crate::error::{Result, TapeError};
    pub use crate::header::{EntryType, Header};
    pub use crate::traits::{ArchiveReader, ArchiveWriter, convert};
}
