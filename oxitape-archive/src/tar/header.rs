//! USTAR header blocks.
//!
//! A [`TarHeader`] is exactly what one 512-byte block says, before any PAX
//! or GNU long-name records are merged into it.

use oxitape_core::error::{Result, TapeError};
use oxitape_core::header::PERMISSION_MASK;
use oxitape_core::{EntryType, Header};
use std::ops::Range;

/// TAR block size.
pub const BLOCK_SIZE: usize = 512;

/// One 512-byte block.
pub type Block = [u8; BLOCK_SIZE];

/// Regular file.
pub const TYPE_REGULAR: u8 = b'0';
/// Regular file, pre-POSIX spelling.
pub const TYPE_REGULAR_OLD: u8 = 0;
/// Hard link.
pub const TYPE_LINK: u8 = b'1';
/// Symbolic link.
pub const TYPE_SYMLINK: u8 = b'2';
/// Character device.
pub const TYPE_CHAR: u8 = b'3';
/// Block device.
pub const TYPE_BLOCK: u8 = b'4';
/// Directory.
pub const TYPE_DIRECTORY: u8 = b'5';
/// FIFO.
pub const TYPE_FIFO: u8 = b'6';
/// Contiguous file, read as a regular file.
pub const TYPE_CONTIGUOUS: u8 = b'7';
/// PAX extended header (applies to next file only).
pub const TYPE_PAX: u8 = b'x';
/// PAX global extended header (applies to all subsequent files).
pub const TYPE_PAX_GLOBAL: u8 = b'g';
/// GNU LongName.
pub const TYPE_GNU_LONGNAME: u8 = b'L';
/// GNU LongLink.
pub const TYPE_GNU_LONGLINK: u8 = b'K';

pub(crate) const NAME: Range<usize> = 0..100;
pub(crate) const MODE: Range<usize> = 100..108;
pub(crate) const UID: Range<usize> = 108..116;
pub(crate) const GID: Range<usize> = 116..124;
pub(crate) const SIZE: Range<usize> = 124..136;
pub(crate) const MTIME: Range<usize> = 136..148;
pub(crate) const CHKSUM: Range<usize> = 148..156;
pub(crate) const TYPEFLAG: usize = 156;
pub(crate) const LINKNAME: Range<usize> = 157..257;
pub(crate) const MAGIC: Range<usize> = 257..263;
pub(crate) const VERSION: Range<usize> = 263..265;
pub(crate) const UNAME: Range<usize> = 265..297;
pub(crate) const GNAME: Range<usize> = 297..329;
pub(crate) const DEVMAJOR: Range<usize> = 329..337;
pub(crate) const DEVMINOR: Range<usize> = 337..345;
pub(crate) const PREFIX: Range<usize> = 345..500;

/// Longest name that fits the name field.
pub const NAME_LEN: usize = 100;
/// Longest prefix that fits the prefix field.
pub const PREFIX_LEN: usize = 155;
/// Longest owner name that fits the uname/gname fields.
pub const OWNER_NAME_LEN: usize = 32;
/// Largest value of an 8-byte octal field.
pub const MAX_ID: u64 = 0o7777777;
/// Largest value of a 12-byte octal field.
pub const MAX_SIZE: u64 = 0o77777777777;

const POSIX_MAGIC: &[u8; 6] = b"ustar\0";
const POSIX_VERSION: &[u8; 2] = b"00";

/// Map an entry type to its type flag.
pub fn type_flag(entry_type: EntryType) -> u8 {
    match entry_type {
        EntryType::File | EntryType::Unknown => TYPE_REGULAR,
        EntryType::Hardlink => TYPE_LINK,
        EntryType::Symlink => TYPE_SYMLINK,
        EntryType::CharDevice => TYPE_CHAR,
        EntryType::BlockDevice => TYPE_BLOCK,
        EntryType::Directory => TYPE_DIRECTORY,
        EntryType::Fifo => TYPE_FIFO,
    }
}

/// Map a type flag to an entry type.
pub fn entry_type(flag: u8) -> EntryType {
    match flag {
        TYPE_REGULAR | TYPE_REGULAR_OLD | TYPE_CONTIGUOUS => EntryType::File,
        TYPE_LINK => EntryType::Hardlink,
        TYPE_SYMLINK => EntryType::Symlink,
        TYPE_CHAR => EntryType::CharDevice,
        TYPE_BLOCK => EntryType::BlockDevice,
        TYPE_DIRECTORY => EntryType::Directory,
        TYPE_FIFO => EntryType::Fifo,
        _ => EntryType::Unknown,
    }
}

/// Check for an all-zero block.
pub fn is_zero_block(block: &Block) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Unsigned and signed byte sums of a block with the checksum field read as
/// spaces.
pub fn checksums(block: &Block) -> (u32, i32) {
    let mut unsigned = 0u32;
    let mut signed = 0i32;
    for (i, &b) in block.iter().enumerate() {
        let b = if CHKSUM.contains(&i) { b' ' } else { b };
        unsigned += u32::from(b);
        signed += i32::from(b as i8);
    }
    (unsigned, signed)
}

/// One decoded header block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TarHeader {
    /// File name, with the prefix already joined.
    pub name: String,
    /// Permission bits.
    pub mode: u32,
    /// Owner UID.
    pub uid: u32,
    /// Owner GID.
    pub gid: u32,
    /// File size.
    pub size: u64,
    /// Modification time.
    pub mtime: u64,
    /// Stored checksum.
    pub checksum: u32,
    /// Type flag.
    pub typeflag: u8,
    /// Link name.
    pub linkname: String,
    /// Owner name.
    pub uname: String,
    /// Group name.
    pub gname: String,
    /// Device major number.
    pub dev_major: u32,
    /// Device minor number.
    pub dev_minor: u32,
    /// Prefix for long names (write side only).
    pub prefix: String,
}

impl TarHeader {
    /// Decode a non-zero header block.
    pub fn from_block(block: &Block, verify_checksum: bool) -> Result<Self> {
        let checksum = parse_numeric(&block[CHKSUM], "chksum")?;
        if verify_checksum {
            let (unsigned, signed) = checksums(block);
            let matches_signed = i64::try_from(checksum).ok() == Some(i64::from(signed));
            if checksum != u64::from(unsigned) && !matches_signed {
                return Err(TapeError::malformed(format!(
                    "tar header checksum mismatch: stored {:o}, computed {:o}",
                    checksum, unsigned
                )));
            }
        }

        let name = parse_string(&block[NAME]);
        let mut header = Self {
            mode: to_u32(parse_numeric(&block[MODE], "mode")?, "mode")? & PERMISSION_MASK,
            uid: to_u32(parse_numeric(&block[UID], "uid")?, "uid")?,
            gid: to_u32(parse_numeric(&block[GID], "gid")?, "gid")?,
            size: parse_numeric(&block[SIZE], "size")?,
            mtime: parse_numeric(&block[MTIME], "mtime")?,
            checksum: to_u32(checksum, "chksum")?,
            typeflag: block[TYPEFLAG],
            linkname: parse_string(&block[LINKNAME]),
            ..Self::default()
        };

        // Both POSIX "ustar\0" and GNU "ustar  " carry owner names and device
        // numbers; only POSIX has a prefix.
        let posix = &block[MAGIC] == POSIX_MAGIC;
        if &block[MAGIC][..5] == b"ustar" {
            header.uname = parse_string(&block[UNAME]);
            header.gname = parse_string(&block[GNAME]);
            header.dev_major = to_u32(parse_numeric(&block[DEVMAJOR], "devmajor")?, "devmajor")?;
            header.dev_minor = to_u32(parse_numeric(&block[DEVMINOR], "devminor")?, "devminor")?;
        }
        let prefix = if posix {
            parse_string(&block[PREFIX])
        } else {
            String::new()
        };
        header.name = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };
        Ok(header)
    }

    /// Check if this is a PAX extended header, local or global.
    pub fn is_pax(&self) -> bool {
        matches!(self.typeflag, TYPE_PAX | TYPE_PAX_GLOBAL)
    }

    /// Check if this is a GNU long name or long link record.
    pub fn is_gnu_long(&self) -> bool {
        matches!(self.typeflag, TYPE_GNU_LONGNAME | TYPE_GNU_LONGLINK)
    }

    /// Convert to a format-agnostic header.
    pub fn into_header(self) -> Header {
        let entry_type = entry_type(self.typeflag);
        if entry_type == EntryType::Unknown {
            log::warn!(
                "tar entry {:?} has unknown type flag {:?}",
                self.name,
                self.typeflag as char
            );
        }
        Header {
            name: self.name,
            entry_type,
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            uname: self.uname,
            gname: self.gname,
            size: self.size,
            mtime: self.mtime,
            dev_major: self.dev_major,
            dev_minor: self.dev_minor,
            checksum: self.checksum,
            linkname: self.linkname,
            ..Header::default()
        }
    }

    /// Encode to a 512-byte block.
    ///
    /// Every field must already fit; the writer moves oversized values into
    /// PAX records before getting here.
    pub fn to_block(&self) -> Result<Block> {
        let mut block = [0u8; BLOCK_SIZE];

        write_string(&mut block[NAME], &self.name, "name")?;
        write_octal(&mut block[MODE], u64::from(self.mode & PERMISSION_MASK), "mode")?;
        write_octal(&mut block[UID], u64::from(self.uid), "uid")?;
        write_octal(&mut block[GID], u64::from(self.gid), "gid")?;
        write_octal(&mut block[SIZE], self.size, "size")?;
        write_octal(&mut block[MTIME], self.mtime, "mtime")?;
        block[TYPEFLAG] = self.typeflag;
        write_string(&mut block[LINKNAME], &self.linkname, "linkname")?;
        block[MAGIC].copy_from_slice(POSIX_MAGIC);
        block[VERSION].copy_from_slice(POSIX_VERSION);
        write_string(&mut block[UNAME], &self.uname, "uname")?;
        write_string(&mut block[GNAME], &self.gname, "gname")?;
        write_octal(&mut block[DEVMAJOR], u64::from(self.dev_major), "devmajor")?;
        write_octal(&mut block[DEVMINOR], u64::from(self.dev_minor), "devminor")?;
        write_string(&mut block[PREFIX], &self.prefix, "prefix")?;

        let (checksum, _) = checksums(&block);
        let field = format!("{:06o}\0 ", checksum);
        block[CHKSUM].copy_from_slice(field.as_bytes());
        Ok(block)
    }
}

/// Parse a NUL-terminated string.
pub(crate) fn parse_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Parse a numeric field: octal padded with spaces or NULs, or GNU base-256
/// when the high bit of the first byte is set.
pub(crate) fn parse_numeric(data: &[u8], name: &str) -> Result<u64> {
    if data.first().is_some_and(|&b| b & 0x80 != 0) {
        if data[0] & 0x40 != 0 {
            return Err(TapeError::malformed(format!(
                "negative base-256 tar {} field",
                name
            )));
        }
        let mut value = u64::from(data[0] & 0x3f);
        for &b in &data[1..] {
            if value >> 56 != 0 {
                return Err(TapeError::malformed(format!(
                    "base-256 tar {} field overflows 64 bits",
                    name
                )));
            }
            value = (value << 8) | u64::from(b);
        }
        return Ok(value);
    }

    let text = parse_string(data);
    let text = text.trim_matches(|c| c == ' ' || c == '\0');
    if text.is_empty() {
        return Ok(0);
    }
    if !text.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return Err(TapeError::malformed(format!(
            "invalid octal tar {} field {:?}",
            name, text
        )));
    }
    u64::from_str_radix(text, 8).map_err(|_| {
        TapeError::malformed(format!("tar {} field {:?} overflows 64 bits", name, text))
    })
}

fn to_u32(value: u64, name: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| TapeError::malformed(format!("tar {} value {} exceeds 32 bits", name, value)))
}

/// Write a string field. A field may be filled completely, without a NUL.
fn write_string(field: &mut [u8], value: &str, name: &str) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > field.len() {
        return Err(TapeError::malformed(format!(
            "tar {} {:?} exceeds {} bytes",
            name,
            value,
            field.len()
        )));
    }
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

/// Write a zero-padded octal field followed by a NUL.
fn write_octal(field: &mut [u8], value: u64, name: &str) -> Result<()> {
    let digits = field.len() - 1;
    let text = format!("{:0width$o}", value, width = digits);
    if text.len() > digits {
        return Err(TapeError::malformed(format!(
            "tar {} value {} does not fit in {} octal digits",
            name, value, digits
        )));
    }
    field[..digits].copy_from_slice(text.as_bytes());
    field[digits] = 0;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_octal() {
        assert_eq!(parse_numeric(b"0000644\0", "mode").unwrap(), 0o644);
        assert_eq!(parse_numeric(b"0001750\0", "uid").unwrap(), 0o1750);
        assert_eq!(parse_numeric(b"   644 \0", "mode").unwrap(), 0o644);
        assert_eq!(parse_numeric(b"\0\0\0\0\0\0\0\0", "uid").unwrap(), 0);
        assert!(parse_numeric(b"0000948\0", "mode").is_err());
    }

    #[test]
    fn test_parse_base256() {
        let mut field = [0u8; 12];
        field[0] = 0x80;
        field[7..].copy_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(parse_numeric(&field, "size").unwrap(), 1 << 33);
    }

    #[test]
    fn test_parse_string() {
        assert_eq!(parse_string(b"hello\0world"), "hello");
        assert_eq!(parse_string(b"test"), "test");
    }

    #[test]
    fn test_block_roundtrip() {
        let header = TarHeader {
            name: "file.txt".to_string(),
            prefix: "some/dir".to_string(),
            mode: 0o640,
            uid: 1000,
            gid: 1000,
            size: 13,
            mtime: 1_700_000_000,
            typeflag: TYPE_REGULAR,
            uname: "user".to_string(),
            gname: "staff".to_string(),
            ..TarHeader::default()
        };
        let block = header.to_block().unwrap();
        assert_eq!(&block[MAGIC], b"ustar\0");
        assert_eq!(&block[CHKSUM][6..], b"\0 ");

        let decoded = TarHeader::from_block(&block, true).unwrap();
        assert_eq!(decoded.name, "some/dir/file.txt");
        assert_eq!(decoded.mode, 0o640);
        assert_eq!(decoded.size, 13);
        assert_eq!(decoded.uname, "user");
        assert_eq!(decoded.checksum, checksums(&block).0);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut block = TarHeader {
            name: "a".to_string(),
            typeflag: TYPE_REGULAR,
            ..TarHeader::default()
        }
        .to_block()
        .unwrap();
        block[0] = b'b';
        assert!(matches!(
            TarHeader::from_block(&block, true),
            Err(TapeError::MalformedHeader { .. })
        ));
        assert_eq!(TarHeader::from_block(&block, false).unwrap().name, "b");
    }

    #[test]
    fn test_wide_checksum_rejected_without_verification() {
        let mut block = TarHeader {
            name: "a".to_string(),
            typeflag: TYPE_REGULAR,
            ..TarHeader::default()
        }
        .to_block()
        .unwrap();
        // Base-256 value 2^32.
        block[CHKSUM].copy_from_slice(&[0x80, 0, 0, 1, 0, 0, 0, 0]);
        assert!(matches!(
            TarHeader::from_block(&block, false),
            Err(TapeError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn test_signed_checksum_accepted() {
        let mut block = TarHeader {
            name: "caf\u{e9}".to_string(),
            typeflag: TYPE_REGULAR,
            ..TarHeader::default()
        }
        .to_block()
        .unwrap();
        let (_, signed) = checksums(&block);
        let field = format!("{:06o}\0 ", signed);
        block[CHKSUM].copy_from_slice(field.as_bytes());
        assert_eq!(TarHeader::from_block(&block, true).unwrap().name, "caf\u{e9}");
    }

    #[test]
    fn test_field_overflow() {
        let header = TarHeader {
            name: "a".repeat(101),
            ..TarHeader::default()
        };
        assert!(header.to_block().is_err());

        let header = TarHeader {
            name: "a".to_string(),
            size: MAX_SIZE + 1,
            ..TarHeader::default()
        };
        assert!(header.to_block().is_err());
    }

    #[test]
    fn test_type_flags() {
        for entry in [
            EntryType::File,
            EntryType::Directory,
            EntryType::Symlink,
            EntryType::Hardlink,
            EntryType::CharDevice,
            EntryType::BlockDevice,
            EntryType::Fifo,
        ] {
            assert_eq!(entry_type(type_flag(entry)), entry);
        }
        assert_eq!(entry_type(TYPE_REGULAR_OLD), EntryType::File);
        assert_eq!(entry_type(b'S'), EntryType::Unknown);
    }
}
