//! TAR archive format support.
//!
//! This module provides streaming reading and writing of TAR archives with
//! support for:
//! - UStar format (POSIX.1-1988), including the 155-byte name prefix
//! - PAX extended headers (POSIX.1-2001), local (`x`) and global (`g`)
//! - GNU long name/link records (`L`/`K`) on read
//!
//! An archive ends with two zero blocks. A clean end of stream at a header
//! boundary is accepted as the end too.

pub mod header;
pub mod pax;

pub use header::{BLOCK_SIZE, Block, TarHeader};
pub use pax::PaxOverrides;

use header::{
    MAX_ID, MAX_SIZE, NAME_LEN, OWNER_NAME_LEN, PREFIX_LEN, TYPE_GNU_LONGLINK, TYPE_GNU_LONGNAME,
    TYPE_PAX, TYPE_PAX_GLOBAL, is_zero_block, parse_string, type_flag,
};
use oxitape_core::error::{Result, TapeError};
use oxitape_core::{
    Alignment, ArchiveReader, ArchiveWriter, BoundedReader, BoundedWriter, Header, StreamState,
};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};

/// Directory component PAX pseudo-entries are named under.
const PAX_DIR: &str = "PaxHeaders";

/// Largest PAX or GNU long-name body accepted on read.
const MAX_META_SIZE: u64 = 1 << 20;

/// Streaming TAR archive reader.
pub struct TarReader<R: Read> {
    body: BoundedReader<R>,
    state: StreamState,
    block: Block,
    global: PaxOverrides,
    verify_checksums: bool,
}

impl<R: Read> TarReader<R> {
    /// Create a new TAR reader.
    pub fn new(reader: R) -> Self {
        Self {
            body: BoundedReader::idle(reader, Alignment::TAR),
            state: StreamState::default(),
            block: [0u8; BLOCK_SIZE],
            global: PaxOverrides::new(),
            verify_checksums: true,
        }
    }

    /// Enable or disable header checksum verification.
    pub fn set_verify_checksums(&mut self, verify: bool) {
        self.verify_checksums = verify;
    }

    /// Global PAX records seen so far.
    pub fn global_records(&self) -> &PaxOverrides {
        &self.global
    }

    /// Total bytes consumed from the underlying stream.
    pub fn position(&self) -> u64 {
        self.body.position()
    }

    /// Consume the reader and return the underlying stream.
    pub fn into_inner(self) -> R {
        self.body.into_inner()
    }

    /// Read the next block. Returns `false` on a clean end of stream.
    fn read_block(&mut self) -> Result<bool> {
        match self.body.read_raw(&mut self.block)? {
            0 => Ok(false),
            BLOCK_SIZE => Ok(true),
            n => Err(TapeError::truncated(format!(
                "tar header ({} of {} bytes)",
                n, BLOCK_SIZE
            ))),
        }
    }

    /// Read the whole body of a PAX or GNU long-name record.
    fn read_meta(&mut self, size: u64) -> Result<Vec<u8>> {
        if size > MAX_META_SIZE {
            return Err(TapeError::malformed(format!(
                "tar extended header of {} bytes exceeds {} bytes",
                size, MAX_META_SIZE
            )));
        }
        self.body.reset(size);
        let mut data = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < data.len() {
            filled += self.body.read_body(&mut data[filled..])?;
        }
        self.body.skip_remaining()?;
        Ok(data)
    }

    fn read_next(&mut self) -> Result<Option<Header>> {
        self.body.skip_remaining()?;

        let mut local = PaxOverrides::new();
        let mut long_name = None;
        let mut long_link = None;

        loop {
            let offset = self.body.position();
            if !self.read_block()? {
                log::debug!("tar stream ended at offset {}", offset);
                return Ok(None);
            }
            if is_zero_block(&self.block) {
                if !self.read_block()? || is_zero_block(&self.block) {
                    log::debug!("tar end of archive at offset {}", offset);
                    return Ok(None);
                }
                return Err(TapeError::malformed(format!(
                    "zero block at offset {} followed by a non-zero block",
                    offset
                )));
            }

            let raw = TarHeader::from_block(&self.block, self.verify_checksums)?;
            match raw.typeflag {
                TYPE_PAX => {
                    let data = self.read_meta(raw.size)?;
                    local.merge(&data)?;
                }
                TYPE_PAX_GLOBAL => {
                    let data = self.read_meta(raw.size)?;
                    self.global.merge(&data)?;
                }
                TYPE_GNU_LONGNAME => long_name = Some(parse_string(&self.read_meta(raw.size)?)),
                TYPE_GNU_LONGLINK => long_link = Some(parse_string(&self.read_meta(raw.size)?)),
                _ => {
                    let mut header = raw.into_header();
                    if let Some(name) = long_name.take() {
                        header.name = name;
                    }
                    if let Some(link) = long_link.take() {
                        header.linkname = link;
                    }
                    let header = local.apply(self.global.apply(header)?)?;

                    log::debug!(
                        "tar entry {:?} ({} bytes) at offset {}",
                        header.name,
                        header.size,
                        offset
                    );
                    self.body.reset(header.size);
                    return Ok(Some(header));
                }
            }
        }
    }
}

impl<R: Read> ArchiveReader for TarReader<R> {
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

impl<R: Read> Read for TarReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_data(buf).map_err(io::Error::from)
    }
}

/// Cut `value` to at most `max` bytes on a character boundary.
fn truncate(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Split a long name into (prefix, name) at a `/`.
fn split_name(name: &str) -> Option<(&str, &str)> {
    if name.len() <= NAME_LEN {
        return Some(("", name));
    }
    name.match_indices('/')
        .map(|(i, _)| i)
        .find(|&i| name.len() - i - 1 <= NAME_LEN)
        .filter(|&i| i > 0 && i <= PREFIX_LEN && i + 1 < name.len())
        .map(|i| (&name[..i], &name[i + 1..]))
}

/// Name of the PAX pseudo-entry describing `name`: `./dir/PaxHeaders/file`,
/// or `./PaxHeaders/file` if that is too long.
fn pax_name(name: &str) -> String {
    let (dir, file) = match name.rfind('/') {
        Some(i) => (&name[..i], &name[i + 1..]),
        None => ("", name),
    };
    let mut path = String::from("./");
    if !dir.is_empty() {
        path.push_str(dir);
        path.push('/');
    }
    path.push_str(PAX_DIR);
    if !file.is_empty() {
        path.push('/');
        path.push_str(file);
    }
    if path.len() <= NAME_LEN {
        return path;
    }
    // Drop the directory when the full name does not fit.
    truncate(&format!("./{}/{}", PAX_DIR, file), NAME_LEN).to_string()
}

/// Lay `header` out as a USTAR block plus the PAX records for whatever
/// does not fit.
fn plan(header: &Header) -> (TarHeader, BTreeMap<String, String>) {
    let mut records = header.pax.clone();
    let mut block = TarHeader {
        mode: header.mode,
        uid: header.uid,
        gid: header.gid,
        size: header.size,
        mtime: header.mtime,
        typeflag: type_flag(header.entry_type),
        linkname: header.linkname.clone(),
        uname: header.uname.clone(),
        gname: header.gname.clone(),
        dev_major: header.dev_major,
        dev_minor: header.dev_minor,
        ..TarHeader::default()
    };

    match split_name(&header.name) {
        Some((prefix, name)) => {
            block.prefix = prefix.to_string();
            block.name = name.to_string();
        }
        None => {
            records.insert(pax::PATH.to_string(), header.name.clone());
            block.name = truncate(&header.name, NAME_LEN).to_string();
        }
    }

    if block.linkname.len() > NAME_LEN {
        records.insert(pax::LINKPATH.to_string(), header.linkname.clone());
        block.linkname = truncate(&header.linkname, NAME_LEN).to_string();
    }
    for (key, value, field) in [
        (pax::UNAME, &header.uname, &mut block.uname),
        (pax::GNAME, &header.gname, &mut block.gname),
    ] {
        if value.len() > OWNER_NAME_LEN {
            records.insert(key.to_string(), value.clone());
            *field = truncate(value, OWNER_NAME_LEN).to_string();
        }
    }
    for (key, value, field) in [
        (pax::UID, header.uid, &mut block.uid),
        (pax::GID, header.gid, &mut block.gid),
    ] {
        if u64::from(value) > MAX_ID {
            records.insert(key.to_string(), value.to_string());
            *field = 0;
        }
    }
    for (key, value, field) in [
        (pax::SIZE, header.size, &mut block.size),
        (pax::MTIME, header.mtime, &mut block.mtime),
    ] {
        if value > MAX_SIZE {
            records.insert(key.to_string(), value.to_string());
            *field = 0;
        }
    }
    if let Some(atime) = header.atime {
        records.insert(pax::ATIME.to_string(), atime.to_string());
    }
    if let Some(ctime) = header.ctime {
        records.insert(pax::CTIME.to_string(), ctime.to_string());
    }

    (block, records)
}

/// Streaming TAR archive writer.
pub struct TarWriter<W: Write> {
    body: BoundedWriter<W>,
    state: StreamState,
}

impl<W: Write> TarWriter<W> {
    /// Create a new TAR writer.
    pub fn new(writer: W) -> Self {
        Self {
            body: BoundedWriter::idle(writer, Alignment::TAR),
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

    /// Write a PAX `x` pseudo-entry carrying `records`.
    fn write_pax(&mut self, header: &Header, records: &BTreeMap<String, String>) -> Result<()> {
        let data = pax::encode_records(records)?;
        if data.is_empty() {
            return Ok(());
        }
        let pax_header = TarHeader {
            name: pax_name(&header.name),
            mode: header.mode,
            size: data.len() as u64,
            mtime: if header.mtime > MAX_SIZE { 0 } else { header.mtime },
            typeflag: TYPE_PAX,
            ..TarHeader::default()
        };
        self.body.write_raw(&pax_header.to_block()?)?;
        self.body.reset(data.len() as u64);
        self.body.write_body(&data)?;
        self.body.finish()?;
        log::trace!(
            "tar pax header {:?} with {} records",
            pax_header.name,
            records.len()
        );
        Ok(())
    }

    fn begin_entry(&mut self, header: &Header) -> Result<()> {
        self.body.finish()?;
        let (block, records) = plan(header);
        let encoded = block.to_block()?;
        if !records.is_empty() {
            self.write_pax(header, &records)?;
        }
        self.body.write_raw(&encoded)?;
        self.body.reset(header.size);
        log::debug!("tar entry {:?} ({} bytes)", header.name, header.size);
        Ok(())
    }

    fn write_end(&mut self) -> Result<()> {
        self.body.finish()?;
        self.body.write_raw(&[0u8; BLOCK_SIZE])?;
        self.body.write_raw(&[0u8; BLOCK_SIZE])?;
        self.body.flush()?;
        log::debug!("tar archive closed at {} bytes", self.body.position());
        Ok(())
    }
}

impl<W: Write> ArchiveWriter for TarWriter<W> {
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
        let result = self.write_end();
        self.state.track(result)?;
        self.state.finish();
        Ok(())
    }
}

impl<W: Write> Write for TarWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_data(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.body.flush().map_err(io::Error::from)
    }
}
