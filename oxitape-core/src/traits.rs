//! Core traits for streaming archive operations.
//!
//! Every archive format handler implements [`ArchiveReader`] or
//! [`ArchiveWriter`]. Both traits are object safe so a format can be chosen
//! once at open time and used through a `Box<dyn ...>`.

use crate::error::Result;
use crate::header::Header;

/// A sequential archive reader.
///
/// An archive is a stream of (header, body) entries. The reader holds one
/// current entry at a time; advancing discards whatever is left of the
/// previous body.
pub trait ArchiveReader {
    /// Advance to the next entry.
    ///
    /// Returns `Ok(None)` once the end of the archive is reached, and keeps
    /// returning `Ok(None)` afterwards.
    fn next_entry(&mut self) -> Result<Option<Header>>;

    /// Read body bytes of the current entry. Returns `Ok(0)` once the whole
    /// body has been delivered, or if there is no current entry.
    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Read the rest of the current body into a new vector.
    fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut buffer = [0u8; 8192];
        loop {
            let n = self.read_data(&mut buffer)?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buffer[..n]);
        }
        Ok(data)
    }

    /// Discard the rest of the current body. Returns the number of bytes
    /// skipped.
    fn skip_data(&mut self) -> Result<u64> {
        let mut buffer = [0u8; 8192];
        let mut skipped = 0u64;
        loop {
            let n = self.read_data(&mut buffer)?;
            if n == 0 {
                break;
            }
            skipped += n as u64;
        }
        Ok(skipped)
    }
}

/// A sequential archive writer.
pub trait ArchiveWriter {
    /// Finish the previous entry (size check and padding), then write the
    /// header of a new one.
    fn write_header(&mut self, header: &Header) -> Result<()>;

    /// Write body bytes of the current entry.
    ///
    /// Writing past the size declared in the header fails with
    /// [`TooLong`](crate::TapeError::TooLong).
    fn write_data(&mut self, data: &[u8]) -> Result<usize>;

    /// Finish the last entry and write the format's closing record.
    fn close(&mut self) -> Result<()>;

    /// Write a complete entry: header followed by its whole body.
    fn append(&mut self, header: &Header, data: &[u8]) -> Result<()> {
        self.write_header(header)?;
        let mut written = 0;
        while written < data.len() {
            written += self.write_data(&data[written..])?;
        }
        Ok(())
    }
}

impl<T: ArchiveReader + ?Sized> ArchiveReader for Box<T> {
    fn next_entry(&mut self) -> Result<Option<Header>> {
        (**self).next_entry()
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_data(buf)
    }
}

impl<T: ArchiveWriter + ?Sized> ArchiveWriter for Box<T> {
    fn write_header(&mut self, header: &Header) -> Result<()> {
        (**self).write_header(header)
    }

    fn write_data(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write_data(data)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Copy every entry of `reader` into `writer`. Returns the number of entries
/// copied. The writer is not closed.
pub fn convert<R, W>(reader: &mut R, writer: &mut W) -> Result<u64>
where
    R: ArchiveReader + ?Sized,
    W: ArchiveWriter + ?Sized,
{
    let mut count = 0u64;
    let mut buffer = [0u8; 8192];

    while let Some(header) = reader.next_entry()? {
        writer.write_header(&header)?;
        loop {
            let n = reader.read_data(&mut buffer)?;
            if n == 0 {
                break;
            }
            let mut written = 0;
            while written < n {
                written += writer.write_data(&buffer[written..n])?;
            }
        }
        log::debug!("converted entry {}", header.name);
        count += 1;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory archive used to exercise the provided methods.
    #[derive(Default)]
    struct MemoryArchive {
        entries: VecDeque<(Header, Vec<u8>)>,
        current: Vec<u8>,
        written: Vec<(Header, Vec<u8>)>,
    }

    impl ArchiveReader for MemoryArchive {
        fn next_entry(&mut self) -> Result<Option<Header>> {
            Ok(self.entries.pop_front().map(|(header, body)| {
                self.current = body;
                header
            }))
        }

        fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = buf.len().min(self.current.len());
            buf[..n].copy_from_slice(&self.current[..n]);
            self.current.drain(..n);
            Ok(n)
        }
    }

    impl ArchiveWriter for MemoryArchive {
        fn write_header(&mut self, header: &Header) -> Result<()> {
            self.written.push((header.clone(), Vec::new()));
            Ok(())
        }

        fn write_data(&mut self, data: &[u8]) -> Result<usize> {
            // Accept at most 3 bytes per call to exercise the retry loops.
            let n = data.len().min(3);
            if let Some((_, body)) = self.written.last_mut() {
                body.extend_from_slice(&data[..n]);
            }
            Ok(n)
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_convert_copies_entries() {
        let mut source = MemoryArchive::default();
        source
            .entries
            .push_back((Header::file("a.txt", 5), b"hello".to_vec()));
        source.entries.push_back((Header::directory("dir"), Vec::new()));

        let mut sink = MemoryArchive::default();
        assert_eq!(convert(&mut source, &mut sink).unwrap(), 2);
        assert_eq!(sink.written[0].0.name, "a.txt");
        assert_eq!(sink.written[0].1, b"hello");
        assert!(sink.written[1].0.is_dir());
        assert!(source.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_append_and_read_to_vec() {
        let mut archive = MemoryArchive::default();
        archive
            .append(&Header::file("b.txt", 7), b"payload")
            .unwrap();
        assert_eq!(archive.written[0].1, b"payload");

        archive
            .entries
            .push_back((Header::file("c.txt", 4), b"data".to_vec()));
        let mut boxed: Box<dyn ArchiveReader> = Box::new(archive);
        assert!(boxed.next_entry().unwrap().is_some());
        assert_eq!(boxed.read_to_vec().unwrap(), b"data");
        assert_eq!(boxed.skip_data().unwrap(), 0);
    }
}
