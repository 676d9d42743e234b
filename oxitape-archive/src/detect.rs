//! Archive format detection and dispatch.
//!
//! The format is chosen once, from magic bytes or a file extension, and the
//! matching codec is handed out behind `Box<dyn ArchiveReader>` /
//! `Box<dyn ArchiveWriter>`.

use crate::ar::{AR_MAGIC, ArReader, ArWriter};
use crate::cpio::{CpioReader, CpioWriter};
use crate::tar::{BLOCK_SIZE, TarReader, TarWriter, header as tar_header};
use oxitape_core::error::{Result, TapeError};
use oxitape_core::{ArchiveReader, ArchiveWriter};
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use std::str::FromStr;

/// Stream returned by [`ArchiveFormat::sniff`]: the sniffed bytes followed by
/// the rest of the original stream.
pub type Replay<R> = io::Chain<Cursor<Vec<u8>>, R>;

/// Known archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Unix archiver (.a, .ar, .deb).
    Ar,
    /// cpio new ASCII (.cpio).
    Cpio,
    /// TAR archive (.tar).
    Tar,
    /// Unknown format.
    Unknown,
}

impl ArchiveFormat {
    /// Detect format from magic bytes.
    pub fn from_magic(magic: &[u8]) -> Self {
        if magic.starts_with(AR_MAGIC) {
            return Self::Ar;
        }

        // newc, crc and odc all start with "07070"; old binary cpio is a
        // 16-bit 070707 in either byte order.
        if magic.starts_with(b"07070")
            || magic.starts_with(&[0xC7, 0x71])
            || magic.starts_with(&[0x71, 0xC7])
        {
            return Self::Cpio;
        }

        // TAR: "ustar" at offset 257, or a pre-POSIX header whose checksum
        // adds up.
        if magic.len() >= 262 && &magic[257..262] == b"ustar" {
            return Self::Tar;
        }
        let block = magic
            .get(..BLOCK_SIZE)
            .and_then(|b| <&tar_header::Block>::try_from(b).ok());
        if let Some(block) = block {
            if !tar_header::is_zero_block(block) && Self::tar_checksum_ok(block) {
                return Self::Tar;
            }
        }

        Self::Unknown
    }

    fn tar_checksum_ok(block: &tar_header::Block) -> bool {
        let Ok(stored) = tar_header::parse_numeric(&block[tar_header::CHKSUM], "chksum") else {
            return false;
        };
        let (unsigned, signed) = tar_header::checksums(block);
        stored == u64::from(unsigned) || i64::try_from(stored).ok() == Some(i64::from(signed))
    }

    /// Detect format from a file extension.
    pub fn from_extension(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("a" | "ar" | "deb") => Self::Ar,
            Some("cpio") => Self::Cpio,
            Some("tar") => Self::Tar,
            _ => Self::Unknown,
        }
    }

    /// Read the leading bytes of a stream and detect its format.
    ///
    /// Returns the bytes read, up to one tar block.
    pub fn detect<R: Read>(reader: &mut R) -> Result<(Self, Vec<u8>)> {
        let mut magic = vec![0u8; BLOCK_SIZE];
        let mut filled = 0;
        while filled < magic.len() {
            match reader.read(&mut magic[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        magic.truncate(filled);

        let format = Self::from_magic(&magic);
        log::debug!("detected {} from {} leading bytes", format, filled);
        Ok((format, magic))
    }

    /// Detect the format of `reader` without losing the bytes inspected.
    pub fn sniff<R: Read>(mut reader: R) -> Result<(Self, Replay<R>)> {
        let (format, magic) = Self::detect(&mut reader)?;
        Ok((format, Cursor::new(magic).chain(reader)))
    }

    /// Open a reader for this format.
    pub fn open_reader<'a, R: Read + 'a>(self, reader: R) -> Result<Box<dyn ArchiveReader + 'a>> {
        match self {
            Self::Ar => Ok(Box::new(ArReader::new(reader)?)),
            Self::Cpio => Ok(Box::new(CpioReader::new(reader))),
            Self::Tar => Ok(Box::new(TarReader::new(reader))),
            Self::Unknown => Err(TapeError::unsupported("unrecognized archive format")),
        }
    }

    /// Create a writer for this format.
    pub fn create_writer<'a, W: Write + 'a>(
        self,
        writer: W,
    ) -> Result<Box<dyn ArchiveWriter + 'a>> {
        match self {
            Self::Ar => Ok(Box::new(ArWriter::new(writer)?)),
            Self::Cpio => Ok(Box::new(CpioWriter::new(writer))),
            Self::Tar => Ok(Box::new(TarWriter::new(writer))),
            Self::Unknown => Err(TapeError::unsupported(
                "cannot write an archive of unknown format",
            )),
        }
    }

    /// Sniff the format of `reader` and open the matching reader.
    pub fn open<'a, R: Read + 'a>(reader: R) -> Result<(Self, Box<dyn ArchiveReader + 'a>)> {
        let (format, replay) = Self::sniff(reader)?;
        Ok((format, format.open_reader(replay)?))
    }

    /// Get the typical file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Ar => "a",
            Self::Cpio => "cpio",
            Self::Tar => "tar",
            Self::Unknown => "",
        }
    }

    /// Get the MIME type.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Ar => "application/x-archive",
            Self::Cpio => "application/x-cpio",
            Self::Tar => "application/x-tar",
            Self::Unknown => "application/octet-stream",
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = TapeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ar" | "a" => Ok(Self::Ar),
            "cpio" | "newc" => Ok(Self::Cpio),
            "tar" | "ustar" | "pax" => Ok(Self::Tar),
            other => Err(TapeError::unsupported(format!(
                "unknown archive format {:?}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ar => write!(f, "AR"),
            Self::Cpio => write!(f, "CPIO"),
            Self::Tar => write!(f, "TAR"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxitape_core::Header;

    fn archive(format: ArchiveFormat) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut writer = format.create_writer(&mut out).unwrap();
            writer.append(&Header::file("a.txt", 5), b"hello").unwrap();
            writer.close().unwrap();
        }
        out
    }

    #[test]
    fn test_detect_ar() {
        assert_eq!(ArchiveFormat::from_magic(b"!<arch>\n"), ArchiveFormat::Ar);
    }

    #[test]
    fn test_detect_cpio() {
        assert_eq!(ArchiveFormat::from_magic(b"070701"), ArchiveFormat::Cpio);
        assert_eq!(ArchiveFormat::from_magic(b"070702"), ArchiveFormat::Cpio);
        assert_eq!(ArchiveFormat::from_magic(&[0xC7, 0x71]), ArchiveFormat::Cpio);
    }

    #[test]
    fn test_detect_written_archives() {
        for format in [ArchiveFormat::Ar, ArchiveFormat::Cpio, ArchiveFormat::Tar] {
            assert_eq!(ArchiveFormat::from_magic(&archive(format)), format);
        }
    }

    #[test]
    fn test_detect_pre_posix_tar() {
        let mut data = archive(ArchiveFormat::Tar);
        // Strip the magic and fix up the checksum.
        data[257..265].fill(0);
        let block: &mut [u8; BLOCK_SIZE] = (&mut data[..BLOCK_SIZE]).try_into().unwrap();
        let (sum, _) = tar_header::checksums(block);
        block[148..156].copy_from_slice(format!("{:06o}\0 ", sum).as_bytes());
        assert_eq!(ArchiveFormat::from_magic(&data), ArchiveFormat::Tar);
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(ArchiveFormat::from_magic(&[0, 0, 0, 0]), ArchiveFormat::Unknown);
        assert_eq!(ArchiveFormat::from_magic(&[0u8; 1024]), ArchiveFormat::Unknown);
        assert_eq!(ArchiveFormat::from_magic(b""), ArchiveFormat::Unknown);
        assert!(ArchiveFormat::Unknown.open_reader(io::empty()).is_err());
    }

    #[test]
    fn test_sniff_replays_bytes() {
        for format in [ArchiveFormat::Ar, ArchiveFormat::Cpio, ArchiveFormat::Tar] {
            let (detected, mut reader) = ArchiveFormat::open(Cursor::new(archive(format))).unwrap();
            assert_eq!(detected, format);
            let header = reader.next_entry().unwrap().unwrap();
            assert_eq!(header.name, "a.txt");
            assert_eq!(reader.read_to_vec().unwrap(), b"hello");
            assert!(reader.next_entry().unwrap().is_none());
        }
    }

    #[test]
    fn test_from_extension() {
        assert_eq!(ArchiveFormat::from_extension(Path::new("libfoo.a")), ArchiveFormat::Ar);
        assert_eq!(ArchiveFormat::from_extension(Path::new("x.deb")), ArchiveFormat::Ar);
        assert_eq!(ArchiveFormat::from_extension(Path::new("initrd.CPIO")), ArchiveFormat::Cpio);
        assert_eq!(ArchiveFormat::from_extension(Path::new("src.tar")), ArchiveFormat::Tar);
        assert_eq!(ArchiveFormat::from_extension(Path::new("src.tar.gz")), ArchiveFormat::Unknown);
        assert_eq!(ArchiveFormat::from_extension(Path::new("README")), ArchiveFormat::Unknown);
    }

    #[test]
    fn test_from_str() {
        assert_eq!("TAR".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::Tar);
        assert_eq!("cpio".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::Cpio);
        assert!("zip".parse::<ArchiveFormat>().is_err());
        assert_eq!(ArchiveFormat::Cpio.to_string(), "CPIO");
        assert_eq!(ArchiveFormat::Ar.mime_type(), "application/x-archive");
    }
}
