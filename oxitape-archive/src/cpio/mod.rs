//! cpio "new ASCII" archive format support.
//!
//! Each entry is a 110-byte header of hex fields, the NUL-terminated file
//! name, padding to a 4-byte boundary, then the body padded to 4 bytes. The
//! archive ends with an entry named `TRAILER!!!` and is padded to a multiple
//! of 512 bytes.
//!
//! Both `070701` (newc) and `070702` (newc with checksum) are read; only
//! `070701` is written. For `070702` entries the `check` field is the
//! wrapping byte sum of the body and is verified once the body is consumed.
//!
//! A symlink stores its target as the entry body. The reader moves that body
//! into [`Header::linkname`] and reports the entry with size 0; the writer
//! emits `linkname` as the body of a symlink header declared with size 0.

use oxitape_core::error::{Result, TapeError};
use oxitape_core::header::PERMISSION_MASK;
use oxitape_core::{
    Alignment, ArchiveReader, ArchiveWriter, BoundedReader, BoundedWriter, EntryType, Header,
    StreamState,
};
use std::io::{self, Read, Write};

/// newc magic.
pub const NEWC_MAGIC: &[u8; 6] = b"070701";

/// newc-with-checksum magic.
pub const CRC_MAGIC: &[u8; 6] = b"070702";

/// Portable ASCII (odc) magic. Recognized but not supported.
const ODC_MAGIC: &[u8; 6] = b"070707";

/// Name of the end-of-archive entry.
pub const TRAILER: &str = "TRAILER!!!";

/// Size of the fixed part of a header.
pub const HEADER_LEN: usize = 110;

/// Archives are padded to a multiple of this.
pub const BLOCK_SIZE: u64 = 512;

/// Longest accepted file name, terminator included.
pub const MAX_NAME_SIZE: usize = 64 * 1024;

/// Longest accepted symlink target (PATH_MAX).
pub const MAX_LINK_SIZE: u64 = 4096;

const MAGIC_LEN: usize = 6;
const FIELD_LEN: usize = 8;

/// Header fields in wire order.
const FIELDS: [&str; 13] = [
    "inode", "mode", "uid", "gid", "nlink", "mtime", "filesize", "devmajor", "devminor",
    "rdevmajor", "rdevminor", "namesize", "check",
];

/// Decoded fixed part of a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawHeader {
    crc: bool,
    fields: [u32; 13],
}

impl RawHeader {
    fn parse(raw: &[u8; HEADER_LEN]) -> Result<Self> {
        let magic = &raw[..MAGIC_LEN];
        let crc = if magic == NEWC_MAGIC {
            false
        } else if magic == CRC_MAGIC {
            true
        } else if magic == ODC_MAGIC {
            return Err(TapeError::unsupported("portable ASCII (odc) cpio archive"));
        } else if magic[..2] == [0xC7, 0x71] || magic[..2] == [0x71, 0xC7] {
            return Err(TapeError::unsupported("old binary cpio archive"));
        } else {
            return Err(TapeError::invalid_magic(NEWC_MAGIC.to_vec(), magic.to_vec()));
        };

        let mut fields = [0u32; 13];
        for (i, value) in fields.iter_mut().enumerate() {
            let start = MAGIC_LEN + i * FIELD_LEN;
            *value = parse_hex(&raw[start..start + FIELD_LEN], FIELDS[i])?;
        }
        Ok(Self { crc, fields })
    }

    fn namesize(&self) -> u32 {
        self.fields[11]
    }

    fn into_header(self, name: String) -> Header {
        let [
            inode,
            mode,
            uid,
            gid,
            nlink,
            mtime,
            filesize,
            devmajor,
            devminor,
            rdevmajor,
            rdevminor,
            _namesize,
            check,
        ] = self.fields;
        Header {
            name,
            entry_type: EntryType::from_mode(mode),
            mode: mode & PERMISSION_MASK,
            uid,
            gid,
            links: nlink,
            size: u64::from(filesize),
            mtime: u64::from(mtime),
            dev_major: devmajor,
            dev_minor: devminor,
            rdev_major: rdevmajor,
            rdev_minor: rdevminor,
            inode,
            checksum: check,
            ..Header::default()
        }
    }
}

/// Parse one 8-digit hex field. Either case is accepted.
fn parse_hex(field: &[u8], name: &str) -> Result<u32> {
    let invalid = || {
        TapeError::malformed(format!(
            "invalid cpio {} field {:?}",
            name,
            String::from_utf8_lossy(field)
        ))
    };
    if !field.iter().all(u8::is_ascii_hexdigit) {
        return Err(invalid());
    }
    let text = std::str::from_utf8(field).map_err(|_| invalid())?;
    u32::from_str_radix(text, 16).map_err(|_| invalid())
}

fn to_field(value: u64, name: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        TapeError::malformed(format!("cpio {} value {} does not fit in 32 bits", name, value))
    })
}

/// Mode as stored on the wire: type bits from the entry type unless the
/// caller already supplied some.
fn wire_mode(header: &Header) -> u32 {
    if header.mode & oxitape_core::header::S_IFMT == 0 {
        header.mode | header.entry_type.mode_bits()
    } else {
        header.mode
    }
}

/// Encode a header and its name, padded to 4 bytes.
fn encode_header(header: &Header, mode: u32) -> Result<Vec<u8>> {
    if header.name.contains('\0') {
        return Err(TapeError::malformed(format!(
            "cpio file name {:?} contains NUL",
            header.name
        )));
    }
    let namesize = header.name.len() + 1;
    let fields = [
        header.inode,
        mode,
        header.uid,
        header.gid,
        header.links,
        to_field(header.mtime, "mtime")?,
        to_field(header.size, "filesize")?,
        header.dev_major,
        header.dev_minor,
        header.rdev_major,
        header.rdev_minor,
        to_field(namesize as u64, "namesize")?,
        0,
    ];

    let total = HEADER_LEN + namesize;
    let pad = Alignment::CPIO.padding(total as u64) as usize;
    let mut buf = Vec::with_capacity(total + pad);
    buf.extend_from_slice(NEWC_MAGIC);
    for value in fields {
        buf.extend_from_slice(format!("{:08x}", value).as_bytes());
    }
    buf.extend_from_slice(header.name.as_bytes());
    buf.push(0);
    buf.resize(total + pad, 0);
    Ok(buf)
}

/// Running body checksum of a `070702` entry.
#[derive(Debug, Clone, Copy)]
struct BodyCheck {
    expected: u32,
    sum: u32,
}

impl BodyCheck {
    fn verify(self) -> Result<()> {
        if self.sum != self.expected {
            return Err(TapeError::malformed(format!(
                "cpio checksum mismatch: header {:#010x}, body {:#010x}",
                self.expected, self.sum
            )));
        }
        Ok(())
    }
}

/// Streaming cpio archive reader.
pub struct CpioReader<R: Read> {
    body: BoundedReader<R>,
    state: StreamState,
    verify_checksums: bool,
    check: Option<BodyCheck>,
}

impl<R: Read> CpioReader<R> {
    /// Create a new cpio reader.
    pub fn new(reader: R) -> Self {
        Self {
            body: BoundedReader::idle(reader, Alignment::CPIO),
            state: StreamState::default(),
            verify_checksums: true,
            check: None,
        }
    }

    /// Enable or disable body checksum verification of `070702` entries.
    pub fn set_verify_checksums(&mut self, verify: bool) {
        self.verify_checksums = verify;
    }

    /// Total bytes consumed from the underlying stream.
    pub fn position(&self) -> u64 {
        self.body.position()
    }

    /// Consume the reader and return the underlying stream.
    pub fn into_inner(self) -> R {
        self.body.into_inner()
    }

    fn read_body(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.body.read_body(buf)?;
        if let Some(check) = &mut self.check {
            check.sum = buf[..n]
                .iter()
                .fold(check.sum, |sum, &b| sum.wrapping_add(u32::from(b)));
        }
        if self.body.remaining() == 0 {
            if let Some(check) = self.check.take() {
                check.verify()?;
            }
        }
        Ok(n)
    }

    fn finish_body(&mut self) -> Result<()> {
        if self.check.is_some() {
            let mut scratch = [0u8; 8192];
            while self.read_body(&mut scratch)? > 0 {}
        }
        self.body.skip_remaining()?;
        Ok(())
    }

    fn read_name(&mut self, namesize: usize) -> Result<String> {
        let mut name = Vec::with_capacity(namesize.min(4096));
        let mut chunk = [0u8; 256];
        while name.len() < namesize {
            let want = (namesize - name.len()).min(chunk.len());
            self.body
                .read_raw_exact(&mut chunk[..want], "cpio file name")?;
            name.extend_from_slice(&chunk[..want]);
        }
        if name.last() != Some(&0) {
            return Err(TapeError::malformed("cpio file name is not NUL terminated"));
        }
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        Ok(String::from_utf8_lossy(&name[..end]).into_owned())
    }

    fn read_link_target(&mut self, header: &mut Header) -> Result<()> {
        if header.size > MAX_LINK_SIZE {
            return Err(TapeError::malformed(format!(
                "cpio symlink {:?} target of {} bytes exceeds {}",
                header.name, header.size, MAX_LINK_SIZE
            )));
        }
        let mut target = Vec::with_capacity(header.size as usize);
        let mut chunk = [0u8; 512];
        loop {
            let n = self.read_body(&mut chunk)?;
            if n == 0 {
                break;
            }
            target.extend_from_slice(&chunk[..n]);
        }
        header.linkname = String::from_utf8_lossy(&target).into_owned();
        header.size = 0;
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<Header>> {
        self.finish_body()?;

        let offset = self.body.position();
        let mut raw = [0u8; HEADER_LEN];
        self.body.read_raw_exact(&mut raw, "cpio header")?;
        let header = RawHeader::parse(&raw)?;

        let namesize = header.namesize() as usize;
        if namesize == 0 {
            return Err(TapeError::malformed("cpio namesize is zero"));
        }
        if namesize > MAX_NAME_SIZE {
            return Err(TapeError::malformed(format!(
                "cpio namesize {} exceeds {}",
                namesize, MAX_NAME_SIZE
            )));
        }
        let name = self.read_name(namesize)?;
        let mut pad = [0u8; 4];
        let pad_len = Alignment::CPIO.padding((HEADER_LEN + namesize) as u64) as usize;
        self.body
            .read_raw_exact(&mut pad[..pad_len], "cpio header padding")?;

        if name == TRAILER {
            log::debug!("cpio trailer at offset {}", offset);
            return Ok(None);
        }

        let crc = header.crc;
        let mut header = header.into_header(name);
        log::debug!(
            "cpio entry {:?} ({} bytes) at offset {}",
            header.name,
            header.size,
            offset
        );
        self.body.reset(header.size);
        self.check = (crc && self.verify_checksums).then_some(BodyCheck {
            expected: header.checksum,
            sum: 0,
        });
        if header.entry_type == EntryType::Symlink {
            self.read_link_target(&mut header)?;
        }
        Ok(Some(header))
    }
}

impl<R: Read> ArchiveReader for CpioReader<R> {
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
        let result = self.read_body(buf);
        self.state.track(result)
    }
}

impl<R: Read> Read for CpioReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_data(buf).map_err(io::Error::from)
    }
}

/// Streaming cpio archive writer.
pub struct CpioWriter<W: Write> {
    body: BoundedWriter<W>,
    state: StreamState,
}

impl<W: Write> CpioWriter<W> {
    /// Create a new cpio writer.
    pub fn new(writer: W) -> Self {
        Self {
            body: BoundedWriter::idle(writer, Alignment::CPIO),
            state: StreamState::default(),
        }
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

        let target = (header.entry_type == EntryType::Symlink && header.size == 0)
            .then_some(header.linkname.as_bytes())
            .filter(|target| !target.is_empty());
        let Some(target) = target else {
            let buf = encode_header(header, wire_mode(header))?;
            self.body.write_raw(&buf)?;
            self.body.reset(header.size);
            log::debug!("cpio entry {:?} ({} bytes)", header.name, header.size);
            return Ok(());
        };

        let link = Header {
            size: target.len() as u64,
            ..header.clone()
        };
        let buf = encode_header(&link, wire_mode(&link))?;
        self.body.write_raw(&buf)?;
        self.body.reset(link.size);
        self.body.write_body(target)?;
        log::debug!("cpio symlink {:?} -> {:?}", header.name, header.linkname);
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.body.finish()?;
        let trailer = Header {
            name: TRAILER.to_string(),
            links: 1,
            ..Header::default()
        };
        let buf = encode_header(&trailer, 0)?;
        self.body.write_raw(&buf)?;
        self.body.pad_to(BLOCK_SIZE)?;
        self.body.flush()?;
        log::debug!("cpio archive closed at {} bytes", self.body.position());
        Ok(())
    }
}

impl<W: Write> ArchiveWriter for CpioWriter<W> {
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
        let result = self.write_trailer();
        self.state.track(result)?;
        self.state.finish();
        Ok(())
    }
}

impl<W: Write> Write for CpioWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_data(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.body.flush().map_err(io::Error::from)
    }
}
