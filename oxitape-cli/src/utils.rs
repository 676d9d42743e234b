//! Utility functions for the CLI.

use glob::Pattern;
use indicatif::{ProgressBar, ProgressStyle};
use oxitape_core::{ArchiveReader, ArchiveWriter, EntryType, Header};
use serde::Serialize;
use std::fs::Metadata;
use std::io::{self, Read, Write};
use std::path::Path;

/// Create a byte-count progress bar with standard styling.
pub fn create_progress_bar(len: u64, enable: bool) -> ProgressBar {
    if !enable {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
    {
        pb.set_style(style.progress_chars("█▓▒░ "));
    }
    pb
}

/// Check if an entry name matches the filter patterns.
/// - If include patterns are specified, the name must match at least one
/// - If exclude patterns are specified, the name must not match any
///
/// Invalid patterns never match.
pub fn matches_filters(name: &str, include: &[String], exclude: &[String]) -> bool {
    let matches = |pattern: &String| Pattern::new(pattern).is_ok_and(|p| p.matches(name));

    if exclude.iter().any(matches) {
        return false;
    }

    include.is_empty() || include.iter().any(matches)
}

/// One entry of `list --json` output.
#[derive(Debug, Serialize)]
pub struct ListingRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: &'static str,
    pub mode: String,
    pub uid: u32,
    pub gid: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uname: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub gname: String,
    pub size: u64,
    pub mtime: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub linkname: String,
}

impl From<&Header> for ListingRecord {
    fn from(header: &Header) -> Self {
        Self {
            name: header.name.clone(),
            entry_type: type_name(header.entry_type),
            mode: format!("{:04o}", header.mode),
            uid: header.uid,
            gid: header.gid,
            uname: header.uname.clone(),
            gname: header.gname.clone(),
            size: header.size,
            mtime: header.mtime,
            linkname: header.linkname.clone(),
        }
    }
}

/// Whole `list --json` document.
#[derive(Debug, Serialize)]
pub struct ArchiveListing {
    pub archive: String,
    pub format: String,
    pub entries: Vec<ListingRecord>,
}

fn type_name(entry_type: EntryType) -> &'static str {
    match entry_type {
        EntryType::File => "file",
        EntryType::Directory => "directory",
        EntryType::Symlink => "symlink",
        EntryType::Hardlink => "hardlink",
        EntryType::CharDevice => "char_device",
        EntryType::BlockDevice => "block_device",
        EntryType::Fifo => "fifo",
        EntryType::Unknown => "unknown",
    }
}

/// Print entries, one per line; `ls -l` style when verbose.
pub fn print_entries(entries: &[Header], verbose: bool) {
    if !verbose {
        for entry in entries {
            println!("{}", entry.name);
        }
        return;
    }

    for entry in entries {
        println!("{}", entry);
    }
    println!("{}", "-".repeat(60));
    let total: u64 = entries.iter().map(|e| e.size).sum();
    println!("{:>10} bytes in {} entries", total, entries.len());
}

/// Build an archive header for a filesystem object.
pub fn header_from_metadata(name: &str, metadata: &Metadata, link_target: Option<&Path>) -> Header {
    let mut header = if let Some(target) = link_target {
        Header::symlink(name, target.to_string_lossy().replace('\\', "/"))
    } else if metadata.is_dir() {
        Header::directory(name)
    } else {
        Header::file(name, metadata.len())
    };

    if let Ok(modified) = metadata.modified() {
        header = header.with_modified(modified);
    }

    #[cfg(unix)]
    {
        use oxitape_core::header::{PERMISSION_MASK, S_IFMT};
        use std::os::unix::fs::MetadataExt;

        header.mode = metadata.mode() & PERMISSION_MASK;
        header.uid = metadata.uid();
        header.gid = metadata.gid();
        header.links = u32::try_from(metadata.nlink()).unwrap_or(u32::MAX);
        // cpio inode numbers are 32 bits wide.
        header.inode = metadata.ino() as u32;
        if header.is_file() {
            header.entry_type = EntryType::from_mode(metadata.mode() & S_IFMT);
            if !header.is_file() {
                header.size = 0;
            }
        }
    }

    header
}

/// Stream `source` into the current entry of `writer`.
pub fn copy_to_entry<W, S>(writer: &mut W, source: &mut S) -> Result<u64, Box<dyn std::error::Error>>
where
    W: ArchiveWriter + ?Sized,
    S: Read + ?Sized,
{
    let mut buffer = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let n = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        let mut written = 0;
        while written < n {
            written += writer.write_data(&buffer[written..n])?;
        }
        total += n as u64;
    }
    Ok(total)
}

/// Stream the current body of `reader` into `sink`.
pub fn copy_from_entry<R, S>(reader: &mut R, sink: &mut S) -> Result<u64, Box<dyn std::error::Error>>
where
    R: ArchiveReader + ?Sized,
    S: Write + ?Sized,
{
    let mut buffer = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let n = reader.read_data(&mut buffer)?;
        if n == 0 {
            break;
        }
        sink.write_all(&buffer[..n])?;
        total += n as u64;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxitape_archive::{TarReader, TarWriter};
    use std::io::Cursor;

    #[test]
    fn test_matches_filters() {
        let none: Vec<String> = Vec::new();
        assert!(matches_filters("a.txt", &none, &none));

        let include = vec!["*.txt".to_string()];
        assert!(matches_filters("a.txt", &include, &none));
        assert!(!matches_filters("a.rs", &include, &none));

        let exclude = vec!["secret*".to_string()];
        assert!(!matches_filters("secret.txt", &include, &exclude));
        assert!(matches_filters("public.txt", &include, &exclude));

        // Exclusion wins even without include patterns.
        assert!(!matches_filters("secret.key", &none, &exclude));

        let broken = vec!["[".to_string()];
        assert!(!matches_filters("a.txt", &broken, &none));
        assert!(matches_filters("a.txt", &none, &broken));
    }

    #[test]
    fn test_listing_record_json() {
        let header = Header::symlink("bin/sh", "busybox").with_owner(0, 0);
        let json = serde_json::to_value(ListingRecord::from(&header)).unwrap();
        assert_eq!(json["name"], "bin/sh");
        assert_eq!(json["type"], "symlink");
        assert_eq!(json["mode"], "0777");
        assert_eq!(json["linkname"], "busybox");
        assert!(json.get("uname").is_none());

        let header = Header::file("a.txt", 5).with_owner_names("root", "wheel");
        let json = serde_json::to_value(ListingRecord::from(&header)).unwrap();
        assert_eq!(json["type"], "file");
        assert_eq!(json["size"], 5);
        assert_eq!(json["gname"], "wheel");
        assert!(json.get("linkname").is_none());
    }

    #[test]
    fn test_header_from_metadata() {
        let dir = std::env::temp_dir().join(format!("oxitape-utils-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("data.bin");
        std::fs::write(&file, b"twelve bytes").unwrap();

        let header = header_from_metadata("data.bin", &std::fs::metadata(&file).unwrap(), None);
        assert!(header.is_file());
        assert_eq!(header.size, 12);
        assert!(header.mtime > 0);

        let header = header_from_metadata("dir", &std::fs::metadata(&dir).unwrap(), None);
        assert!(header.is_dir());
        assert_eq!(header.size, 0);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_copy_through_entry() {
        let body = vec![7u8; 20_000];
        let mut writer = TarWriter::new(Vec::new());
        writer
            .write_header(&Header::file("big", body.len() as u64))
            .unwrap();
        assert_eq!(
            copy_to_entry(&mut writer, &mut body.as_slice()).unwrap(),
            20_000
        );
        writer.close().unwrap();

        let mut reader = TarReader::new(Cursor::new(writer.into_inner()));
        reader.next_entry().unwrap().unwrap();
        let mut out = Vec::new();
        assert_eq!(copy_from_entry(&mut reader, &mut out).unwrap(), 20_000);
        assert_eq!(out, body);
    }
}
