//! Binary layout of directory and version-log records
//!
//! Both logs are flat arrays of fixed-size little-endian records. The flag
//! byte of every record sits after its payload so a single-byte store flips a
//! record between live, deleted and sentinel.

use crate::error::LogKind;

/// Maximum window name length in bytes, terminating NUL included.
pub const MAX_NAME: usize = 256;

/// Errors raised while decoding a metadata log.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MetadataError {
    /// File length is not a positive multiple of the record size.
    #[error("length {len} is not a multiple of record size {record_size}")]
    Truncated {
        /// File length in bytes.
        len: u64,
        /// Record size in bytes.
        record_size: usize,
    },
    /// No sentinel record before the end of the file.
    #[error("no sentinel record among {records} records")]
    MissingSentinel {
        /// Records scanned.
        records: usize,
    },
    /// Flag byte holds an unknown value.
    #[error("record {index} has invalid flags {value:#04x}")]
    InvalidFlags {
        /// Record index.
        index: usize,
        /// Raw flag byte.
        value: u8,
    },
    /// Name field is not NUL-terminated UTF-8.
    #[error("record {index} has a malformed name")]
    InvalidName {
        /// Record index.
        index: usize,
    },
}

/// Lifecycle flag of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordFlags {
    /// Sentinel, marks the logical end of the log
    NoObject = 0,
    /// Live record
    Exists = 1,
    /// Soft-deleted record
    Deleted = 3,
}

impl RecordFlags {
    /// Decode a flag byte.
    pub const fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(RecordFlags::NoObject),
            1 => Some(RecordFlags::Exists),
            3 => Some(RecordFlags::Deleted),
            _ => None,
        }
    }

    /// Raw byte value.
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }
}

/// A fixed-size record stored in a sentinel-terminated log.
pub trait Record: Sized + Clone {
    /// Encoded size in bytes.
    const SIZE: usize;
    /// Offset of the flag byte.
    const FLAGS_OFFSET: usize;
    /// Which log this record kind lives in.
    const KIND: LogKind;

    /// Terminating record.
    fn sentinel() -> Self;

    /// Lifecycle flag.
    fn flags(&self) -> RecordFlags;

    /// Encode every field except the flag byte into `dst[..SIZE]`.
    fn encode_payload(&self, dst: &mut [u8]);

    /// Decode the payload of a non-sentinel record at `index`.
    fn decode_payload(index: usize, src: &[u8], flags: RecordFlags) -> Result<Self, MetadataError>;

    /// Decode a whole record.
    fn decode(index: usize, src: &[u8]) -> Result<Self, MetadataError> {
        let raw = src[Self::FLAGS_OFFSET];
        let flags =
            RecordFlags::from_byte(raw).ok_or(MetadataError::InvalidFlags { index, value: raw })?;
        if flags == RecordFlags::NoObject {
            return Ok(Self::sentinel());
        }
        Self::decode_payload(index, src, flags)
    }
}

/// Entry of the global window directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRecord {
    /// Window name.
    pub name: String,
    /// Window size in bytes.
    pub size: u64,
    /// Lifecycle flag.
    pub flags: RecordFlags,
}

impl WindowRecord {
    const SIZE_OFFSET: usize = MAX_NAME;

    /// Live record for `name`.
    pub fn live(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            flags: RecordFlags::Exists,
        }
    }
}

impl Record for WindowRecord {
    const SIZE: usize = 272;
    const FLAGS_OFFSET: usize = MAX_NAME + 8;
    const KIND: LogKind = LogKind::Directory;

    fn sentinel() -> Self {
        Self {
            name: String::new(),
            size: 0,
            flags: RecordFlags::NoObject,
        }
    }

    fn flags(&self) -> RecordFlags {
        self.flags
    }

    fn encode_payload(&self, dst: &mut [u8]) {
        let name = &mut dst[..MAX_NAME];
        name.fill(0);
        let bytes = self.name.as_bytes();
        let n = bytes.len().min(MAX_NAME - 1);
        name[..n].copy_from_slice(&bytes[..n]);
        dst[Self::SIZE_OFFSET..Self::SIZE_OFFSET + 8].copy_from_slice(&self.size.to_le_bytes());
    }

    fn decode_payload(index: usize, src: &[u8], flags: RecordFlags) -> Result<Self, MetadataError> {
        let field = &src[..MAX_NAME];
        let end = field
            .iter()
            .position(|&b| b == 0)
            .ok_or(MetadataError::InvalidName { index })?;
        let name = std::str::from_utf8(&field[..end])
            .map_err(|_| MetadataError::InvalidName { index })?
            .to_string();
        let mut size = [0u8; 8];
        size.copy_from_slice(&src[Self::SIZE_OFFSET..Self::SIZE_OFFSET + 8]);
        Ok(Self {
            name,
            size: u64::from_le_bytes(size),
            flags,
        })
    }
}

/// Entry of a per-window version log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    /// Checkpoint version, equal to the record index.
    pub version: i32,
    /// Commit time, seconds since the Unix epoch.
    pub timestamp: i64,
    /// Lifecycle flag.
    pub flags: RecordFlags,
}

impl Record for VersionRecord {
    const SIZE: usize = 24;
    const FLAGS_OFFSET: usize = 16;
    const KIND: LogKind = LogKind::Versions;

    fn sentinel() -> Self {
        Self {
            version: 0,
            timestamp: 0,
            flags: RecordFlags::NoObject,
        }
    }

    fn flags(&self) -> RecordFlags {
        self.flags
    }

    fn encode_payload(&self, dst: &mut [u8]) {
        dst[0..4].copy_from_slice(&self.version.to_le_bytes());
        dst[4..8].fill(0);
        dst[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
    }

    fn decode_payload(_index: usize, src: &[u8], flags: RecordFlags) -> Result<Self, MetadataError> {
        let mut version = [0u8; 4];
        version.copy_from_slice(&src[0..4]);
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&src[8..16]);
        Ok(Self {
            version: i32::from_le_bytes(version),
            timestamp: i64::from_le_bytes(timestamp),
            flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_byte_values() {
        assert_eq!(RecordFlags::from_byte(0), Some(RecordFlags::NoObject));
        assert_eq!(RecordFlags::from_byte(1), Some(RecordFlags::Exists));
        assert_eq!(RecordFlags::from_byte(3), Some(RecordFlags::Deleted));
        assert_eq!(RecordFlags::from_byte(2), None);
    }

    #[test]
    fn test_window_record_layout() {
        let mut buf = vec![0xAAu8; WindowRecord::SIZE];
        let rec = WindowRecord::live("win", 1024);
        rec.encode_payload(&mut buf);
        buf[WindowRecord::FLAGS_OFFSET] = rec.flags.as_byte();

        assert_eq!(&buf[..4], b"win\0");
        assert_eq!(&buf[256..264], &1024u64.to_le_bytes());
        assert_eq!(WindowRecord::decode(0, &buf).unwrap(), rec);
    }

    #[test]
    fn test_decode_rejects_bad_flags_and_names() {
        let mut buf = vec![0u8; WindowRecord::SIZE];
        buf[WindowRecord::FLAGS_OFFSET] = 7;
        assert_eq!(
            WindowRecord::decode(4, &buf),
            Err(MetadataError::InvalidFlags { index: 4, value: 7 })
        );

        buf[..MAX_NAME].fill(b'x');
        buf[WindowRecord::FLAGS_OFFSET] = 1;
        assert_eq!(
            WindowRecord::decode(2, &buf),
            Err(MetadataError::InvalidName { index: 2 })
        );
    }

    #[test]
    fn test_sentinel_payload_is_ignored() {
        let mut buf = vec![0xFFu8; VersionRecord::SIZE];
        buf[VersionRecord::FLAGS_OFFSET] = 0;
        assert_eq!(VersionRecord::decode(0, &buf).unwrap(), VersionRecord::sentinel());
    }
}
