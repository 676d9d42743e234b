//! Unix `ar` archive format support.
//!
//! An ar archive is the magic `"!<arch>\n"` followed by members. Each member
//! is a 60-byte ASCII header and a body padded to an even length with `\n`.
//!
//! | offset | width | field              |
//! |--------|-------|--------------------|
//! | 0      | 16    | name, `/`-suffixed |
//! | 16     | 12    | mtime (decimal)    |
//! | 28     | 6     | uid (decimal)      |
//! | 34     | 6     | gid (decimal)      |
//! | 40     | 8     | mode (octal)       |
//! | 48     | 10    | size (decimal)     |
//! | 58     | 2     | `` ` `` `\n`       |
//!
//! The end of the archive is the end of the stream.

use oxitape_core::error::{Result, TapeError};
use oxitape_core::{
    Alignment, ArchiveReader, ArchiveWriter, BoundedReader, BoundedWriter, EntryType, Header,
    StreamState,
};
use std::io::{self, Read, Write};
use std::ops::Range;

/// Global archive signature.
pub const AR_MAGIC: &[u8; 8] = b"!<arch>\n";

/// Size of a member header.
pub const HEADER_LEN: usize = 60;

/// Header terminator.
const TERMINATOR: [u8; 2] = [0x60, 0x0A];

/// Longest name that fits in front of the `/` in the name field.
pub const MAX_NAME_LEN: usize = 15;

const NAME: Range<usize> = 0..16;
const MTIME: Range<usize> = 16..28;
const UID: Range<usize> = 28..34;
const GID: Range<usize> = 34..40;
const MODE: Range<usize> = 40..48;
const SIZE: Range<usize> = 48..58;
const END: Range<usize> = 58..60;

/// Decode a member header.
pub fn decode_header(block: &[u8; HEADER_LEN]) -> Result<Header> {
    if block[END] != TERMINATOR {
        return Err(TapeError::malformed(format!(
            "ar header terminator mismatch: {:02x?}",
            &block[END]
        )));
    }

    let raw_name = String::from_utf8_lossy(&block[NAME]);
    let trimmed = raw_name.trim_end();
    let name = trimmed.strip_suffix('/').unwrap_or(trimmed).to_string();

    let mtime = parse_field(&block[MTIME], 10, "mtime", false)?;
    let uid = parse_u32(&block[UID], 10, "uid", true)?;
    let gid = parse_u32(&block[GID], 10, "gid", true)?;
    let mode = parse_u32(&block[MODE], 8, "mode", false)?;
    let size = parse_field(&block[SIZE], 10, "size", false)?;

    Ok(Header {
        name,
        entry_type: EntryType::from_mode(mode),
        mode,
        uid,
        gid,
        size,
        mtime,
        ..Header::default()
    })
}

/// Encode a member header.
///
/// The name is reduced to its base name and cut to [`MAX_NAME_LEN`] bytes.
/// A numeric value wider than its field is rejected.
pub fn encode_header(header: &Header) -> Result<[u8; HEADER_LEN]> {
    let mut block = [b' '; HEADER_LEN];

    let mut name = member_name(&header.name);
    if name.len() > MAX_NAME_LEN {
        let mut cut = MAX_NAME_LEN;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        log::warn!(
            "ar member name {:?} truncated to {:?}",
            header.name,
            &name[..cut]
        );
        name = &name[..cut];
    }
    write_field(&mut block[NAME], &format!("{}/", name), "name")?;
    write_field(&mut block[MTIME], &header.mtime.to_string(), "mtime")?;
    write_field(&mut block[UID], &header.uid.to_string(), "uid")?;
    write_field(&mut block[GID], &header.gid.to_string(), "gid")?;
    write_field(&mut block[MODE], &format!("{:o}", header.mode), "mode")?;
    write_field(&mut block[SIZE], &header.size.to_string(), "size")?;
    block[END].copy_from_slice(&TERMINATOR);

    Ok(block)
}

/// Base name of a path, ignoring trailing slashes.
fn member_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

fn write_field(field: &mut [u8], value: &str, name: &str) -> Result<()> {
    if value.len() > field.len() {
        return Err(TapeError::malformed(format!(
            "ar {} {:?} does not fit in {} bytes",
            name,
            value,
            field.len()
        )));
    }
    field[..value.len()].copy_from_slice(value.as_bytes());
    Ok(())
}

fn parse_field(field: &[u8], radix: u32, name: &str, permit_empty: bool) -> Result<u64> {
    let text = std::str::from_utf8(field).map(str::trim).unwrap_or("\u{fffd}");
    if text.is_empty() && permit_empty {
        return Ok(0);
    }
    u64::from_str_radix(text, radix).map_err(|_| {
        TapeError::malformed(format!(
            "invalid ar {} field {:?}",
            name,
            String::from_utf8_lossy(field)
        ))
    })
}

fn parse_u32(field: &[u8], radix: u32, name: &str, permit_empty: bool) -> Result<u32> {
    let value = parse_field(field, radix, name, permit_empty)?;
    u32::try_from(value)
        .map_err(|_| TapeError::malformed(format!("ar {} value {} out of range", name, value)))
}

/// Streaming ar archive reader.
pub struct ArReader<R: Read> {
    body: BoundedReader<R>,
    state: StreamState,
}

impl<R: Read> ArReader<R> {
    /// Create a new ar reader, verifying the global magic.
    pub fn new(reader: R) -> Result<Self> {
        let mut body = BoundedReader::idle(reader, Alignment::AR);
        let mut magic = [0u8; AR_MAGIC.len()];
        let n = body.read_raw(&mut magic)?;
        if &magic != AR_MAGIC {
            return Err(TapeError::invalid_magic(AR_MAGIC.to_vec(), magic[..n].to_vec()));
        }
        Ok(Self {
            body,
            state: StreamState::default(),
        })
    }

    /// Total bytes consumed from the underlying stream.
    pub fn position(&self) -> u64 {
        self.body.position()
    }

    /// Consume the reader and return the underlying stream.
    pub fn into_inner(self) -> R {
        self.body.into_inner()
    }

    fn read_next(&mut self) -> Result<Option<Header>> {
        self.body.skip_remaining()?;

        let offset = self.body.position();
        let mut block = [0u8; HEADER_LEN];
        match self.body.read_raw(&mut block)? {
            0 => return Ok(None),
            HEADER_LEN => {}
            _ => return Err(TapeError::truncated("ar member header")),
        }

        let header = decode_header(&block)?;
        log::debug!(
            "ar member {:?} ({} bytes) at offset {}",
            header.name,
            header.size,
            offset
        );
        self.body.reset(header.size);
        Ok(Some(header))
    }
}

impl<R: Read> ArchiveReader for ArReader<R> {
    fn next_entry(&mut self) -> Result<Option<Header>> {
        self.state.check()?;
        if self.state.is_finished() {
            return Ok(None);
        }
        let result = self.read_next();
        let entry = self.state.track(result)?;
        if entry.is_none() {
            self.state.finish();
        }
        Ok(entry)
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.state.check()?;
        if self.state.is_finished() {
            return Ok(0);
        }
        let result = self.body.read_body(buf);
        self.state.track(result)
    }
}

impl<R: Read> Read for ArReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_data(buf).map_err(io::Error::from)
    }
}

/// Streaming ar archive writer.
pub struct ArWriter<W: Write> {
    body: BoundedWriter<W>,
    state: StreamState,
}

impl<W: Write> ArWriter<W> {
    /// Create a new ar writer, emitting the global magic.
    pub fn new(writer: W) -> Result<Self> {
        let mut body = BoundedWriter::idle(writer, Alignment::AR);
        body.write_raw(AR_MAGIC)?;
        Ok(Self {
            body,
            state: StreamState::default(),
        })
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &W {
        self.body.get_ref()
    }

    /// Consume the writer and return the underlying stream. Call
    /// [`ArchiveWriter::close`] first.
    pub fn into_inner(self) -> W {
        self.body.into_inner()
    }

    fn begin_entry(&mut self, header: &Header) -> Result<()> {
        self.body.finish()?;
        let block = encode_header(header)?;
        self.body.write_raw(&block)?;
        self.body.reset(header.size);
        log::debug!("ar member {:?} ({} bytes)", header.name, header.size);
        Ok(())
    }
}

impl<W: Write> ArchiveWriter for ArWriter<W> {
    fn write_header(&mut self, header: &Header) -> Result<()> {
        self.state.check()?;
        if self.state.is_finished() {
            return Err(TapeError::Closed);
        }
        let result = self.begin_entry(header);
        self.state.track(result)
    }

    fn write_data(&mut self, data: &[u8]) -> Result<usize> {
        self.state.check()?;
        if self.state.is_finished() {
            return Err(TapeError::Closed);
        }
        let result = if self.body.is_active() {
            self.body.write_body(data)
        } else {
            Err(TapeError::NoCurrentEntry)
        };
        self.state.track(result)
    }

    fn close(&mut self) -> Result<()> {
        self.state.check()?;
        if self.state.is_finished() {
            return Ok(());
        }
        let result = self.body.finish().and_then(|()| self.body.flush());
        self.state.track(result)?;
        self.state.finish();
        Ok(())
    }
}

impl<W: Write> Write for ArWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_data(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.body.flush().map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn hello_archive() -> Vec<u8> {
        let mut writer = ArWriter::new(Vec::new()).unwrap();
        let header = Header::file("a.txt", 5)
            .with_mode(0o100644)
            .with_owner(1000, 1000)
            .with_mtime(1_700_000_000);
        writer.append(&header, b"hello").unwrap();
        writer.close().unwrap();
        writer.into_inner()
    }

    #[test]
    fn test_writer_layout() {
        let data = hello_archive();
        let mut expected = b"!<arch>\n".to_vec();
        let fields = format!(
            "{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n",
            "a.txt/", "1700000000", "1000", "1000", "100644", "5"
        );
        assert_eq!(fields.len(), HEADER_LEN);
        expected.extend_from_slice(fields.as_bytes());
        expected.extend_from_slice(b"hello\n");
        assert_eq!(data, expected);
    }

    #[test]
    fn test_roundtrip() {
        let mut reader = ArReader::new(Cursor::new(hello_archive())).unwrap();
        let header = reader.next_entry().unwrap().unwrap();
        assert_eq!(header.name, "a.txt");
        assert_eq!(header.size, 5);
        assert_eq!(header.mode, 0o100644);
        assert_eq!(header.uid, 1000);
        assert_eq!(header.mtime, 1_700_000_000);
        assert_eq!(reader.read_to_vec().unwrap(), b"hello");
        assert!(reader.next_entry().unwrap().is_none());
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_unread_body_is_skipped() {
        let mut writer = ArWriter::new(Vec::new()).unwrap();
        writer.append(&Header::file("one", 3), b"abc").unwrap();
        writer.append(&Header::file("two", 4), b"defg").unwrap();
        writer.close().unwrap();

        let mut reader = ArReader::new(Cursor::new(writer.into_inner())).unwrap();
        assert_eq!(reader.next_entry().unwrap().unwrap().name, "one");
        let second = reader.next_entry().unwrap().unwrap();
        assert_eq!(second.name, "two");
        assert_eq!(reader.read_to_vec().unwrap(), b"defg");
    }

    #[test]
    fn test_invalid_magic() {
        let err = ArReader::new(Cursor::new(b"!<arce>\nrest".to_vec())).err().unwrap();
        assert!(matches!(err, TapeError::InvalidMagic { .. }));

        let err = ArReader::new(Cursor::new(b"!<a".to_vec())).err().unwrap();
        assert!(matches!(err, TapeError::InvalidMagic { found, .. } if found == b"!<a"));
    }

    #[test]
    fn test_size_field_boundary() {
        assert!(encode_header(&Header::file("big", 9_999_999_999)).is_ok());
        let err = encode_header(&Header::file("big", 10_000_000_000)).unwrap_err();
        assert!(matches!(err, TapeError::MalformedHeader { .. }));

        let err = encode_header(&Header::file("x", 1).with_owner(1_000_000, 0)).unwrap_err();
        assert!(matches!(err, TapeError::MalformedHeader { .. }));
    }

    #[test]
    fn test_name_is_base_and_truncated() {
        let block = encode_header(&Header::file("some/dir/very_long_member_name.o", 0)).unwrap();
        assert_eq!(&block[NAME], b"very_long_membe/");
        let block = encode_header(&Header::file("dir/sub/", 0)).unwrap();
        assert_eq!(&block[0..4], b"sub/");
    }

    #[test]
    fn test_empty_owner_fields() {
        let mut block = encode_header(&Header::file("lib.o", 0)).unwrap();
        block[UID].fill(b' ');
        block[GID].fill(b' ');
        let header = decode_header(&block).unwrap();
        assert_eq!((header.uid, header.gid), (0, 0));
    }

    #[test]
    fn test_malformed_header_is_sticky() {
        let mut data = hello_archive();
        // Corrupt the size field.
        data[8 + 48] = b'x';
        let len = data.len() as u64;

        let mut reader = ArReader::new(Cursor::new(data)).unwrap();
        let first = reader.next_entry().unwrap_err();
        assert!(matches!(first, TapeError::MalformedHeader { .. }));
        let consumed = reader.position();

        let second = reader.next_entry().unwrap_err();
        assert_eq!(first, second);
        assert_eq!(reader.position(), consumed);
        assert!(reader.read_data(&mut [0u8; 4]).is_err());
        assert!(consumed < len);
    }

    #[test]
    fn test_bad_terminator() {
        let mut data = hello_archive();
        data[8 + 58] = b'!';
        let mut reader = ArReader::new(Cursor::new(data)).unwrap();
        assert!(matches!(
            reader.next_entry(),
            Err(TapeError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn test_truncated_header() {
        let mut data = hello_archive();
        data.truncate(8 + 30);
        let mut reader = ArReader::new(Cursor::new(data)).unwrap();
        assert!(matches!(
            reader.next_entry(),
            Err(TapeError::TruncatedStream { .. })
        ));
    }

    #[test]
    fn test_size_contract() {
        let mut writer = ArWriter::new(Vec::new()).unwrap();
        writer.write_header(&Header::file("short", 5)).unwrap();
        writer.write_data(b"hey").unwrap();
        assert_eq!(writer.close().unwrap_err(), TapeError::too_short(5, 2));

        let mut writer = ArWriter::new(Vec::new()).unwrap();
        writer.write_header(&Header::file("long", 5)).unwrap();
        let err = writer.write_data(b"hello!").unwrap_err();
        assert_eq!(err, TapeError::too_long(5, 1));
        // The handle stays failed.
        assert_eq!(writer.close().unwrap_err(), err);
    }

    #[test]
    fn test_write_without_header() {
        let mut writer = ArWriter::new(Vec::new()).unwrap();
        assert_eq!(writer.write_data(b"x").unwrap_err(), TapeError::NoCurrentEntry);
    }

    #[test]
    fn test_io_adapters() {
        let mut writer = ArWriter::new(Vec::new()).unwrap();
        writer.write_header(&Header::file("io.txt", 4)).unwrap();
        writer.write_all(b"data").unwrap();
        writer.close().unwrap();

        let mut reader = ArReader::new(Cursor::new(writer.into_inner())).unwrap();
        reader.next_entry().unwrap();
        let mut body = String::new();
        reader.read_to_string(&mut body).unwrap();
        assert_eq!(body, "data");
    }
}
