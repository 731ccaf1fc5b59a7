//! Write-ahead records for distributed writes
//!
//! Before a write is sent to the cache managers its range and payload are
//! stored in the cache directory:
//!
//! ```text
//! [flag u8][offset u64 LE][size u64 LE][payload]
//! ```
//!
//! The flag becomes 1 only after the whole record is durable, so a record
//! with flag 0 was torn and is discarded on recovery.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::random_name;
use crate::context::remove_file;
use crate::device::sync_dir;
use crate::error::{IoOp, PmemError, Result};

const HEADER: usize = 1 + 8 + 8;
const NAME_LEN: usize = 32;
const ACTIVE: u8 = 1;
const CLAIMED: &str = ".claimed.";

/// Prefix of the per-manager shard files, which are not records.
pub(super) const CACHE_FILE_PREFIX: &str = "cache.";

/// Durable description of one in-flight write.
#[derive(Debug)]
pub struct RecoveryRecord {
    path: PathBuf,
}

impl RecoveryRecord {
    /// Persist a record of `data` about to be written at `offset`.
    pub fn create(dir: &Path, offset: u64, data: &[u8]) -> Result<Self> {
        let path = dir.join(random_name(NAME_LEN));
        let mut file = File::create(&path).map_err(PmemError::io_with(IoOp::Open, &path))?;

        let mut header = [0u8; HEADER];
        header[1..9].copy_from_slice(&offset.to_le_bytes());
        header[9..].copy_from_slice(&(data.len() as u64).to_le_bytes());
        file.write_all(&header)
            .and_then(|_| file.write_all(data))
            .map_err(PmemError::io_with(IoOp::Write, &path))?;
        file.sync_all()
            .map_err(PmemError::io_with(IoOp::Sync, &path))?;

        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.write_all(&[ACTIVE]))
            .map_err(PmemError::io_with(IoOp::Write, &path))?;
        file.sync_all()
            .map_err(PmemError::io_with(IoOp::Sync, &path))?;
        sync_dir(dir)?;
        Ok(Self { path })
    }

    /// Record file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop the record once its write has been dispatched.
    pub fn remove(self) -> Result<()> {
        remove_file(&self.path)
    }
}

/// Decoded record: `None` when the record never became active.
pub(super) fn read_record(path: &Path) -> Result<Option<(u64, Vec<u8>)>> {
    let mut file = File::open(path).map_err(PmemError::io_with(IoOp::Open, path))?;
    let mut header = [0u8; HEADER];
    match file.read_exact(&mut header) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(PmemError::io(IoOp::Read, path, err)),
    }
    let (flag, offset, size) = decode_header(header);
    if flag != ACTIVE {
        return Ok(None);
    }

    let stored = file
        .metadata()
        .map_err(PmemError::io_with(IoOp::Read, path))?
        .len()
        .saturating_sub(HEADER as u64);
    let len = match usize::try_from(size) {
        Ok(len) if size == stored => len,
        _ => {
            warn!(record = %path.display(), size, stored, "record size does not match its payload");
            return Ok(None);
        }
    };
    let mut data = vec![0u8; len];
    file.read_exact(&mut data)
        .map_err(PmemError::io_with(IoOp::Read, path))?;
    Ok(Some((offset, data)))
}

fn decode_header(header: [u8; HEADER]) -> (u8, u64, u64) {
    let [flag, o0, o1, o2, o3, o4, o5, o6, o7, s0, s1, s2, s3, s4, s5, s6, s7] = header;
    (
        flag,
        u64::from_le_bytes([o0, o1, o2, o3, o4, o5, o6, o7]),
        u64::from_le_bytes([s0, s1, s2, s3, s4, s5, s6, s7]),
    )
}

/// Names in `dir` that may be unclaimed records.
pub(super) fn candidates(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(PmemError::io_with(IoOp::List, dir))?;
    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(PmemError::io_with(IoOp::List, dir))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(CACHE_FILE_PREFIX) || name.contains(CLAIMED) {
            continue;
        }
        found.push(entry.path());
    }
    Ok(found)
}

/// Take ownership of `record` for `manager`; `None` if another manager won.
pub(super) fn claim(record: &Path, manager: usize) -> Result<Option<PathBuf>> {
    let mut claimed = record.as_os_str().to_owned();
    claimed.push(format!("{CLAIMED}{manager}"));
    let claimed = PathBuf::from(claimed);
    match fs::rename(record, &claimed) {
        Ok(()) => Ok(Some(claimed)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(PmemError::io(IoOp::Remove, record, err)),
    }
}

/// Replay every record this manager claims from `dir` through `write`.
///
/// Records are visited in directory order. Returns how many were replayed.
pub(super) fn replay(
    dir: &Path,
    manager: usize,
    mut write: impl FnMut(u64, &[u8]) -> Result<()>,
) -> Result<usize> {
    let mut replayed = 0;
    for record in candidates(dir)? {
        let Some(claimed) = claim(&record, manager)? else {
            continue;
        };
        match read_record(&claimed)? {
            Some((offset, data)) => {
                debug!(manager, offset, len = data.len(), record = %claimed.display(), "replaying write");
                write(offset, &data)?;
                replayed += 1;
            }
            None => warn!(manager, record = %claimed.display(), "discarding torn record"),
        }
        remove_file(&claimed)?;
    }
    if replayed > 0 {
        info!(manager, replayed, "recovery finished");
    }
    Ok(replayed)
}
