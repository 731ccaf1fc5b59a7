//! Sentinel-terminated record logs mapped straight from their files
//!
//! Every mutation persists each field it writes before the flag byte that
//! makes the record meaningful, so a torn update leaves a stale flag rather
//! than a live record pointing at garbage.

use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::device::{MappedFile, MemoryArea};
use crate::error::{IoOp, PmemError, Result};
use crate::metadata::format::{MetadataError, Record, RecordFlags};

/// A mapped array of `R` records whose logical end is the first sentinel.
pub struct RecordLog<R: Record> {
    file: MappedFile,
    _marker: PhantomData<R>,
}

impl<R: Record> RecordLog<R> {
    /// Create (or truncate) a log holding only a sentinel.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = MappedFile::open_and_map(path, R::SIZE)?;
        let mut log = Self {
            file,
            _marker: PhantomData,
        };
        log.write_sentinel(0)?;
        Ok(log)
    }

    /// Open an existing log, validating its geometry.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let len = fs::metadata(path)
            .map_err(PmemError::io_with(IoOp::Open, path))?
            .len();
        if len == 0 || len % R::SIZE as u64 != 0 {
            return Err(Self::malformed(
                path,
                MetadataError::Truncated {
                    len,
                    record_size: R::SIZE,
                },
            ));
        }
        let file = MappedFile::open_existing(path)?;
        let log = Self {
            file,
            _marker: PhantomData,
        };
        log.records()?;
        Ok(log)
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Number of record slots the file can hold.
    pub fn capacity(&self) -> usize {
        self.file.len() / R::SIZE
    }

    /// Every record before the sentinel, whatever its flag.
    pub fn records(&self) -> Result<Vec<R>> {
        self.scan().map_err(|e| Self::malformed(self.path(), e))
    }

    /// Index of the sentinel, which is also the number of records.
    pub fn sentinel_index(&self) -> Result<usize> {
        Ok(self.records()?.len())
    }

    /// Record at `index`, if it lies before the sentinel.
    pub fn get(&self, index: usize) -> Result<Option<R>> {
        Ok(self.records()?.into_iter().nth(index))
    }

    fn scan(&self) -> std::result::Result<Vec<R>, MetadataError> {
        let bytes = self.file.as_slice();
        let mut out = Vec::new();
        for (index, chunk) in bytes.chunks_exact(R::SIZE).enumerate() {
            let record = R::decode(index, chunk)?;
            if record.flags() == RecordFlags::NoObject {
                return Ok(out);
            }
            out.push(record);
        }
        Err(MetadataError::MissingSentinel {
            records: out.len(),
        })
    }

    /// Make room for at least `records` slots.
    pub fn reserve(&mut self, records: usize) -> Result<()> {
        self.file.grow(records * R::SIZE)
    }

    /// Write every field of `record` except its flag into slot `index`.
    pub fn write_payload(&mut self, index: usize, record: &R) -> Result<()> {
        let offset = self.slot(index)?;
        let dst = &mut self.file.as_mut_slice()[offset..offset + R::SIZE];
        let flags = dst[R::FLAGS_OFFSET];
        record.encode_payload(dst);
        dst[R::FLAGS_OFFSET] = flags;
        self.persist_range(offset, R::FLAGS_OFFSET)?;
        let tail = R::FLAGS_OFFSET + 1;
        if tail < R::SIZE {
            self.persist_range(offset + tail, R::SIZE - tail)?;
        }
        Ok(())
    }

    /// Flip the flag byte of slot `index`.
    pub fn write_flags(&mut self, index: usize, flags: RecordFlags) -> Result<()> {
        let offset = self.slot(index)? + R::FLAGS_OFFSET;
        self.file.as_mut_slice()[offset] = flags.as_byte();
        trace!(path = %self.path().display(), index, flags = ?flags, "flag persisted");
        self.persist_range(offset, 1)
    }

    /// Overwrite slot `index` with a sentinel.
    pub fn write_sentinel(&mut self, index: usize) -> Result<()> {
        let offset = self.slot(index)?;
        let dst = &mut self.file.as_mut_slice()[offset..offset + R::SIZE];
        R::sentinel().encode_payload(dst);
        dst[R::FLAGS_OFFSET] = RecordFlags::NoObject.as_byte();
        self.persist_range(offset, R::SIZE)
    }

    /// Append `record` after the last record.
    ///
    /// The new sentinel is durable before the old one is overwritten, and the
    /// record's flag is the last byte persisted.
    pub fn append(&mut self, record: &R) -> Result<usize> {
        let index = self.sentinel_index()?;
        self.reserve(index + 2)?;
        self.write_sentinel(index + 1)?;
        self.write_payload(index, record)?;
        self.write_flags(index, record.flags())?;
        Ok(index)
    }

    /// Make the log logically empty. Geometry is kept.
    pub fn reset(&mut self) -> Result<()> {
        self.write_sentinel(0)
    }

    fn slot(&self, index: usize) -> Result<usize> {
        if index >= self.capacity() {
            return Err(PmemError::InvalidArgument(format!(
                "record {index} beyond capacity {} of {}",
                self.capacity(),
                self.path().display()
            )));
        }
        Ok(index * R::SIZE)
    }

    fn persist_range(&self, offset: usize, len: usize) -> Result<()> {
        self.file.persist(offset, len)
    }

    fn malformed(path: &Path, source: MetadataError) -> PmemError {
        PmemError::Metadata {
            log: R::KIND,
            path: PathBuf::from(path),
            source,
        }
    }
}
