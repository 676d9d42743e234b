//! Archive entry header.
//!
//! This module defines the format-agnostic [`Header`] that every codec
//! decodes into and encodes from, along with its [`EntryType`].

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Bit mask for the file type bits of a Unix mode.
pub const S_IFMT: u32 = 0o170000;
/// Socket (no archive entry type, kept for mode decoding).
pub const S_IFSOCK: u32 = 0o140000;
/// Symbolic link.
pub const S_IFLNK: u32 = 0o120000;
/// Regular file.
pub const S_IFREG: u32 = 0o100000;
/// Block device.
pub const S_IFBLK: u32 = 0o060000;
/// Directory.
pub const S_IFDIR: u32 = 0o040000;
/// Character device.
pub const S_IFCHR: u32 = 0o020000;
/// FIFO.
pub const S_IFIFO: u32 = 0o010000;

/// Permission, setuid/setgid and sticky bits.
pub const PERMISSION_MASK: u32 = 0o7777;

/// Entry type (file, directory, symlink, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryType {
    /// Regular file.
    #[default]
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Hard link.
    Hardlink,
    /// Character device.
    CharDevice,
    /// Block device.
    BlockDevice,
    /// Named pipe.
    Fifo,
    /// Unknown type.
    Unknown,
}

impl EntryType {
    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File)
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory)
    }

    /// Check if this is a symlink.
    pub fn is_symlink(&self) -> bool {
        matches!(self, Self::Symlink)
    }

    /// Decode the `S_IFMT` bits of a Unix mode.
    ///
    /// A mode without type bits is a regular file.
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            0 | S_IFREG => Self::File,
            S_IFDIR => Self::Directory,
            S_IFLNK => Self::Symlink,
            S_IFCHR => Self::CharDevice,
            S_IFBLK => Self::BlockDevice,
            S_IFIFO => Self::Fifo,
            _ => Self::Unknown,
        }
    }

    /// The `S_IFMT` bits for this type. Hard links are regular files on the
    /// inode level; unknown types carry no bits.
    pub fn mode_bits(&self) -> u32 {
        match self {
            Self::File | Self::Hardlink => S_IFREG,
            Self::Directory => S_IFDIR,
            Self::Symlink => S_IFLNK,
            Self::CharDevice => S_IFCHR,
            Self::BlockDevice => S_IFBLK,
            Self::Fifo => S_IFIFO,
            Self::Unknown => 0,
        }
    }

    /// Character used in `ls -l` style listings.
    pub fn type_char(&self) -> char {
        match self {
            Self::Directory => 'd',
            Self::Symlink => 'l',
            Self::Hardlink => 'h',
            Self::CharDevice => 'c',
            Self::BlockDevice => 'b',
            Self::Fifo => 'p',
            Self::File | Self::Unknown => '-',
        }
    }
}

/// The header of one archive member.
///
/// Not every format stores every field: ar has no owner names, inode or
/// device numbers, cpio has no link target or owner names, and tar has no
/// inode or link count. Fields a format cannot carry are zero/empty when
/// decoded and ignored when encoded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    /// The name/path of the entry within the archive.
    pub name: String,
    /// The type of entry.
    pub entry_type: EntryType,
    /// Permission bits.
    pub mode: u32,
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Owner user name (tar).
    pub uname: String,
    /// Owner group name (tar).
    pub gname: String,
    /// Link count (cpio).
    pub links: u32,
    /// Body size in bytes.
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: u64,
    /// Access time, seconds since the Unix epoch (PAX).
    pub atime: Option<u64>,
    /// Status change time, seconds since the Unix epoch (PAX).
    pub ctime: Option<u64>,
    /// Device major number.
    pub dev_major: u32,
    /// Device minor number.
    pub dev_minor: u32,
    /// Raw device major number (cpio).
    pub rdev_major: u32,
    /// Raw device minor number (cpio).
    pub rdev_minor: u32,
    /// Inode number (cpio).
    pub inode: u32,
    /// Checksum as stored in the archive.
    pub checksum: u32,
    /// Link target (tar).
    pub linkname: String,
    /// Extended PAX records that have no typed field.
    pub pax: BTreeMap<String, String>,
}

impl Header {
    /// Create a new regular file header.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            entry_type: EntryType::File,
            mode: 0o644,
            links: 1,
            size,
            ..Self::default()
        }
    }

    /// Create a new directory header.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry_type: EntryType::Directory,
            mode: 0o755,
            links: 2,
            ..Self::default()
        }
    }

    /// Create a new symlink header.
    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry_type: EntryType::Symlink,
            mode: 0o777,
            links: 1,
            linkname: target.into(),
            ..Self::default()
        }
    }

    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        self.entry_type.is_file()
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.entry_type.is_dir()
    }

    /// Modification time as a `SystemTime`.
    pub fn modified(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.mtime)
    }

    /// Builder method to set permission bits.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Builder method to set owner ids.
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Builder method to set owner names.
    pub fn with_owner_names(mut self, uname: impl Into<String>, gname: impl Into<String>) -> Self {
        self.uname = uname.into();
        self.gname = gname.into();
        self
    }

    /// Builder method to set the modification time in Unix seconds.
    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }

    /// Builder method to set the modification time from a `SystemTime`.
    /// Times before the epoch clamp to zero.
    pub fn with_modified(mut self, time: SystemTime) -> Self {
        self.mtime = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self
    }

    /// Builder method to add an extended PAX record.
    pub fn with_pax(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pax.insert(key.into(), value.into());
        self
    }

    /// Validate the entry path for extraction.
    ///
    /// Returns an error if the path is absolute or contains `..` components
    /// or NUL bytes.
    pub fn validate_path(&self) -> crate::error::Result<()> {
        use crate::error::TapeError;

        let path = std::path::Path::new(&self.name);

        if path.is_absolute() || self.name.contains('\0') {
            return Err(TapeError::malformed(format!(
                "unsafe entry path: {}",
                self.name
            )));
        }

        for component in path.components() {
            if let std::path::Component::ParentDir = component {
                return Err(TapeError::malformed(format!(
                    "unsafe entry path: {}",
                    self.name
                )));
            }
        }

        Ok(())
    }

    /// Get a sanitized path that's safe for extraction.
    ///
    /// This removes `..`, `.` and root components.
    pub fn sanitized_name(&self) -> String {
        let mut result = String::new();

        for component in std::path::Path::new(&self.name).components() {
            if let std::path::Component::Normal(s) = component {
                if !result.is_empty() {
                    result.push('/');
                }
                result.push_str(&s.to_string_lossy().replace('\0', "_"));
            }
        }

        result
    }
}

impl std::fmt::Display for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{} {:>5}/{:<5} {:>10} {:>10} {}",
            self.entry_type.type_char(),
            PermissionString(self.mode),
            self.uid,
            self.gid,
            self.size,
            self.mtime,
            self.name
        )?;
        if !self.linkname.is_empty() {
            write!(f, " -> {}", self.linkname)?;
        }
        Ok(())
    }
}

struct PermissionString(u32);

impl std::fmt::Display for PermissionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Write;

        const FLAGS: [(u32, char); 9] = [
            (0o400, 'r'),
            (0o200, 'w'),
            (0o100, 'x'),
            (0o040, 'r'),
            (0o020, 'w'),
            (0o010, 'x'),
            (0o004, 'r'),
            (0o002, 'w'),
            (0o001, 'x'),
        ];
        for (bit, c) in FLAGS {
            f.write_char(if self.0 & bit != 0 { c } else { '-' })?;
        }
        Ok(())
    }
}
