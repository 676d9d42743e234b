//! PAX extended header records (POSIX.1-2001).
//!
//! A record is `"<len> <key>=<value>\n"` where `<len>` counts the whole
//! record, its own digits included.

use oxitape_core::error::{Result, TapeError};
use oxitape_core::Header;
use std::collections::BTreeMap;

/// Access time.
pub const ATIME: &str = "atime";
/// Modification time.
pub const MTIME: &str = "mtime";
/// Status change time.
pub const CTIME: &str = "ctime";
/// Path name.
pub const PATH: &str = "path";
/// Link target.
pub const LINKPATH: &str = "linkpath";
/// Owner name.
pub const UNAME: &str = "uname";
/// Group name.
pub const GNAME: &str = "gname";
/// Body size.
pub const SIZE: &str = "size";
/// Owner id.
pub const UID: &str = "uid";
/// Group id.
pub const GID: &str = "gid";

/// Format a single PAX record.
pub fn format_record(key: &str, value: &str) -> String {
    // " " + "=" + "\n"
    let base_len = key.len() + value.len() + 3;

    let mut total_len = base_len + 1;
    loop {
        let digits = total_len.to_string().len();
        let expected = base_len + digits;
        if expected == total_len {
            break;
        }
        total_len = expected;
    }

    format!("{} {}={}\n", total_len, key, value)
}

/// Encode records in key order. Records with empty values are skipped.
pub fn encode_records(records: &BTreeMap<String, String>) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    for (key, value) in records {
        if value.is_empty() {
            continue;
        }
        if key.is_empty() || key.contains('=') || key.contains('\n') {
            return Err(TapeError::invalid_pax(format!("invalid record key {:?}", key)));
        }
        data.extend_from_slice(format_record(key, value).as_bytes());
    }
    Ok(data)
}

/// Parse the body of a PAX header into records, in order.
pub fn parse_records(data: &[u8]) -> Result<Vec<(String, String)>> {
    let mut records = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let rest = &data[pos..];
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| TapeError::invalid_pax("missing space after record length"))?;

        let len_text = std::str::from_utf8(&rest[..space])
            .ok()
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| {
                TapeError::invalid_pax(format!(
                    "invalid record length {:?}",
                    String::from_utf8_lossy(&rest[..space])
                ))
            })?;
        let len: usize = len_text
            .parse()
            .map_err(|_| TapeError::invalid_pax(format!("invalid record length {:?}", len_text)))?;

        if len <= space + 1 || len > rest.len() {
            return Err(TapeError::invalid_pax(format!(
                "record length {} does not match the {} bytes available",
                len,
                rest.len()
            )));
        }
        let record = &rest[..len];
        if record[len - 1] != b'\n' {
            return Err(TapeError::invalid_pax(format!(
                "record of length {} is not newline terminated",
                len
            )));
        }

        let body = &record[space + 1..len - 1];
        let eq = body
            .iter()
            .position(|&b| b == b'=')
            .ok_or_else(|| TapeError::invalid_pax("missing '=' in record"))?;
        let key = String::from_utf8_lossy(&body[..eq]).into_owned();
        let value = String::from_utf8_lossy(&body[eq + 1..]).into_owned();
        log::trace!("pax record {}={:?}", key, value);
        records.push((key, value));

        pos += len;
    }

    Ok(records)
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| TapeError::invalid_pax(format!("invalid {} value {:?}", key, value)))
}

/// Parse a PAX time (`1350244992.023960108`); the fraction is dropped.
fn parse_time(key: &str, value: &str) -> Result<u64> {
    let (seconds, fraction) = value.split_once('.').unwrap_or((value, ""));
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TapeError::invalid_pax(format!("invalid {} value {:?}", key, value)));
    }
    parse_int(key, seconds)
}

/// Accumulated PAX records to override the next header with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaxOverrides {
    records: BTreeMap<String, String>,
}

impl PaxOverrides {
    /// Create an empty set of overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a record.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.records.get(key).map(String::as_str)
    }

    /// Add one record. A later value for the same key wins; an empty value
    /// removes the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if value.is_empty() {
            self.records.remove(&key);
        } else {
            self.records.insert(key, value);
        }
    }

    /// Parse a PAX header body and merge its records.
    pub fn merge(&mut self, data: &[u8]) -> Result<()> {
        for (key, value) in parse_records(data)? {
            self.insert(key, value);
        }
        Ok(())
    }

    /// Produce `header` with these records applied. Recognized keys replace
    /// typed fields; the rest go to [`Header::pax`].
    pub fn apply(&self, mut header: Header) -> Result<Header> {
        for (key, value) in &self.records {
            match key.as_str() {
                PATH => header.name = value.clone(),
                LINKPATH => header.linkname = value.clone(),
                UNAME => header.uname = value.clone(),
                GNAME => header.gname = value.clone(),
                SIZE => header.size = parse_int(key, value)?,
                UID => header.uid = parse_int(key, value)?,
                GID => header.gid = parse_int(key, value)?,
                MTIME => header.mtime = parse_time(key, value)?,
                ATIME => header.atime = Some(parse_time(key, value)?),
                CTIME => header.ctime = Some(parse_time(key, value)?),
                _ => {
                    header.pax.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(header)
    }
}
