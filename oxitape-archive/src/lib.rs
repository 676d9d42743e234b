//! # OxiTape Archive
//!
//! Streaming archive codecs for OxiTape.
//!
//! This crate provides sequential reading and writing of the classic Unix
//! container formats:
//!
//! - **ar**: archiver format used by static libraries and `.deb` packages
//! - **cpio**: new ASCII (`070701`) and new CRC (`070702`) variants
//! - **TAR**: USTAR with PAX extended headers; GNU long names on read
//!
//! Every reader implements [`ArchiveReader`](oxitape_core::ArchiveReader) and
//! every writer [`ArchiveWriter`](oxitape_core::ArchiveWriter), so entries can
//! be streamed from one format into another with [`oxitape_core::convert`].
//!
//! ## Example
//!
//! ```rust
//! use oxitape_archive::{ArchiveFormat, CpioWriter, TarReader, TarWriter};
//! use oxitape_core::{convert, ArchiveWriter, Header};
//! use std::io::Cursor;
//!
//! let mut tar = TarWriter::new(Vec::new());
//! tar.append(&Header::file("a.txt", 5), b"hello").unwrap();
//! tar.close().unwrap();
//! let tar = tar.into_inner();
//! assert_eq!(ArchiveFormat::from_magic(&tar), ArchiveFormat::Tar);
//!
//! let mut reader = TarReader::new(Cursor::new(tar));
//! let mut cpio = CpioWriter::new(Vec::new());
//! assert_eq!(convert(&mut reader, &mut cpio).unwrap(), 1);
//! cpio.close().unwrap();
//! assert_eq!(&cpio.into_inner()[..6], b"070701");
//! ```
//!
//! ## Format Detection
//!
//! Use [`detect::ArchiveFormat`] to detect the format of an archive from its
//! magic bytes and open the matching reader.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod ar;
pub mod cpio;
pub mod detect;
pub mod tar;

// Re-exports
pub use ar::{ArReader, ArWriter};
pub use cpio::{CpioReader, CpioWriter};
pub use detect::ArchiveFormat;
pub use tar::{PaxOverrides, TarHeader, TarReader, TarWriter};
