//! Size-bounded body I/O.
//!
//! Every archive format declares an entry's body size in its header and then
//! pads the body to the format's alignment unit. [`BoundedReader`] and
//! [`BoundedWriter`] wrap the archive stream for the whole life of a handle
//! and are re-armed with [`BoundedReader::reset`] / [`BoundedWriter::reset`]
//! for every entry. They enforce the size contract exactly:
//!
//! - reads stop at the declared size, whatever follows in the stream;
//! - a write that would go past the size writes the bytes that fit and fails
//!   with [`TapeError::TooLong`];
//! - finishing a write before the size is reached fails with
//!   [`TapeError::TooShort`];
//! - once the size is reached, the padding is consumed (read side) or
//!   emitted (write side) exactly once.
//!
//! Header bytes go through the same wrapper via `read_raw` / `write_raw` so
//! the running stream position stays accurate.

use crate::error::{Result, TapeError};
use std::io::{self, Read, Write};

/// Largest alignment unit any format uses.
const MAX_PADDING: usize = 512;

/// Padding rule of a format: bodies are padded to a multiple of `unit` with
/// `fill` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alignment {
    unit: u64,
    fill: u8,
}

impl Alignment {
    /// No padding.
    pub const NONE: Self = Self::new(1, 0);
    /// `ar`: 2-byte alignment, padded with a newline.
    pub const AR: Self = Self::new(2, b'\n');
    /// `cpio`: 4-byte alignment, padded with NUL.
    pub const CPIO: Self = Self::new(4, 0);
    /// `tar`: 512-byte blocks, padded with NUL.
    pub const TAR: Self = Self::new(512, 0);

    /// Create an alignment rule. `unit` must be between 1 and 512.
    pub const fn new(unit: u64, fill: u8) -> Self {
        assert!(unit >= 1 && unit <= MAX_PADDING as u64);
        Self { unit, fill }
    }

    /// Alignment unit in bytes.
    pub fn unit(&self) -> u64 {
        self.unit
    }

    /// Padding byte value.
    pub fn fill(&self) -> u8 {
        self.fill
    }

    /// Number of padding bytes that follow `len` bytes of data.
    pub fn padding(&self, len: u64) -> u64 {
        match len % self.unit {
            0 => 0,
            rem => self.unit - rem,
        }
    }
}

/// Reads at most one entry body, then its padding.
#[derive(Debug)]
pub struct BoundedReader<R> {
    inner: R,
    size: u64,
    remaining: u64,
    alignment: Alignment,
    padded: bool,
    position: u64,
}

impl<R: Read> BoundedReader<R> {
    /// Create a reader limited to `size` body bytes.
    pub fn new(inner: R, size: u64, alignment: Alignment) -> Self {
        Self {
            inner,
            size,
            remaining: size,
            alignment,
            padded: false,
            position: 0,
        }
    }

    /// Create a reader with no entry armed yet.
    pub fn idle(inner: R, alignment: Alignment) -> Self {
        Self {
            padded: true,
            ..Self::new(inner, 0, alignment)
        }
    }

    /// Arm the limiter for the next entry body.
    pub fn reset(&mut self, size: u64) {
        self.size = size;
        self.remaining = size;
        self.padded = false;
    }

    /// Declared size of the current body.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Body bytes not yet delivered.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Total bytes consumed from the underlying stream.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Padding rule in use.
    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// Check if the body and its padding have been fully consumed.
    pub fn is_complete(&self) -> bool {
        self.remaining == 0 && self.padded
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Consume the wrapper and return the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read body bytes. Returns `Ok(0)` once the declared size has been
    /// delivered.
    pub fn read_body(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.remaining == 0 {
            self.consume_padding()?;
            return Ok(0);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let want = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = loop {
            match self.inner.read(&mut buf[..want]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if n == 0 {
            return Err(TapeError::truncated(format!(
                "entry body ({} of {} bytes missing)",
                self.remaining, self.size
            )));
        }

        self.remaining -= n as u64;
        self.position += n as u64;
        if self.remaining == 0 {
            self.consume_padding()?;
        }
        Ok(n)
    }

    /// Discard whatever is left of the body and its padding. Returns the
    /// number of body bytes skipped.
    pub fn skip_remaining(&mut self) -> Result<u64> {
        let mut scratch = [0u8; 8192];
        let mut skipped = 0u64;
        while self.remaining > 0 {
            skipped += self.read_body(&mut scratch)? as u64;
        }
        self.consume_padding()?;
        Ok(skipped)
    }

    /// Read raw (header) bytes until `buf` is full or the stream ends.
    /// Returns the number of bytes read.
    pub fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.position += filled as u64;
        Ok(filled)
    }

    /// Read exactly `buf.len()` raw bytes, reporting `context` if the stream
    /// ends first.
    pub fn read_raw_exact(&mut self, buf: &mut [u8], context: &str) -> Result<()> {
        if self.read_raw(buf)? < buf.len() {
            return Err(TapeError::truncated(context));
        }
        Ok(())
    }

    fn consume_padding(&mut self) -> Result<()> {
        if self.padded {
            return Ok(());
        }
        let pad = self.alignment.padding(self.size) as usize;
        if pad > 0 {
            let mut scratch = [0u8; MAX_PADDING];
            self.read_raw_exact(&mut scratch[..pad], "entry padding")?;
            log::trace!("consumed {} padding bytes after {} byte body", pad, self.size);
        }
        self.padded = true;
        Ok(())
    }
}

impl<R: Read> Read for BoundedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_body(buf).map_err(io::Error::from)
    }
}

/// Writes exactly one entry body, then its padding.
#[derive(Debug)]
pub struct BoundedWriter<W> {
    inner: W,
    size: u64,
    remaining: u64,
    alignment: Alignment,
    finished: bool,
    position: u64,
}

impl<W: Write> BoundedWriter<W> {
    /// Create a writer expecting exactly `size` body bytes.
    pub fn new(inner: W, size: u64, alignment: Alignment) -> Self {
        Self {
            inner,
            size,
            remaining: size,
            alignment,
            finished: false,
            position: 0,
        }
    }

    /// Create a writer with no entry armed yet.
    pub fn idle(inner: W, alignment: Alignment) -> Self {
        Self {
            finished: true,
            ..Self::new(inner, 0, alignment)
        }
    }

    /// Arm the limiter for the next entry body.
    pub fn reset(&mut self, size: u64) {
        self.size = size;
        self.remaining = size;
        self.finished = false;
    }

    /// Declared size of the current body.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Body bytes still owed.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Total bytes written to the underlying stream.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Check if an entry is armed and not yet finished.
    pub fn is_active(&self) -> bool {
        !self.finished
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Consume the wrapper and return the underlying stream.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Write body bytes.
    ///
    /// If `buf` does not fit in the remaining size, the bytes that fit are
    /// written and [`TapeError::TooLong`] is returned.
    pub fn write_body(&mut self, buf: &[u8]) -> Result<usize> {
        let fits = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        if fits > 0 {
            self.inner.write_all(&buf[..fits])?;
            self.remaining -= fits as u64;
            self.position += fits as u64;
        }
        if fits < buf.len() {
            return Err(TapeError::too_long(self.size, (buf.len() - fits) as u64));
        }
        Ok(fits)
    }

    /// Finish the current body: fail if bytes are still owed, otherwise emit
    /// the padding. Finishing twice is a no-op.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if self.remaining > 0 {
            return Err(TapeError::too_short(self.size, self.remaining));
        }
        let pad = self.alignment.padding(self.size);
        self.write_fill(pad, self.alignment.fill())?;
        if pad > 0 {
            log::trace!("emitted {} padding bytes after {} byte body", pad, self.size);
        }
        self.finished = true;
        Ok(())
    }

    /// Write raw (header) bytes.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Write NUL bytes until the stream position is a multiple of `unit`.
    pub fn pad_to(&mut self, unit: u64) -> Result<()> {
        let pad = Alignment::new(unit, 0).padding(self.position);
        self.write_fill(pad, 0)
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    fn write_fill(&mut self, count: u64, byte: u8) -> Result<()> {
        let chunk = [byte; MAX_PADDING];
        let mut left = count;
        while left > 0 {
            let n = left.min(MAX_PADDING as u64) as usize;
            self.write_raw(&chunk[..n])?;
            left -= n as u64;
        }
        Ok(())
    }
}

impl<W: Write> Write for BoundedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_body(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
