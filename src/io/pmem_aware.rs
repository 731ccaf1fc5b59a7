//! Files on a pmem-aware filesystem
//!
//! Every rank maps the whole file and accesses it directly; each write is
//! persisted before it returns, so there is nothing left for sync to do.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::device::{HeapArea, MappedFile, MemoryArea};
use crate::error::{PmemError, Result};

/// Directly mapped file.
pub struct PmemAwareFile {
    path: PathBuf,
    mapping: Box<dyn MemoryArea>,
}

impl PmemAwareFile {
    /// Map the existing file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let len = std::fs::metadata(path)
            .map_err(PmemError::io_with(crate::error::IoOp::Open, path))?
            .len();
        let mapping: Box<dyn MemoryArea> = if len == 0 {
            Box::new(HeapArea::zeroed(0))
        } else {
            Box::new(MappedFile::open_existing(path)?)
        };
        debug!(path = %path.display(), len, pmem = mapping.is_pmem(), "pmem-aware file mapped");
        Ok(Self {
            path: path.to_path_buf(),
            mapping,
        })
    }

    /// Mapped file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size in bytes.
    pub fn size(&self) -> u64 {
        self.mapping.len() as u64
    }

    fn range(&self, offset: u64, len: usize) -> Result<(usize, usize)> {
        let size = self.mapping.len();
        usize::try_from(offset)
            .ok()
            .and_then(|start| start.checked_add(len).map(|end| (start, end)))
            .filter(|&(_, end)| end <= size)
            .ok_or_else(|| {
                PmemError::InvalidArgument(format!(
                    "range {offset}+{len} exceeds file size {size}"
                ))
            })
    }

    /// Copy bytes at `offset` into `buf`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let (start, end) = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.mapping.as_slice()[start..end]);
        Ok(())
    }

    /// Copy `data` to `offset` and persist it.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let (start, end) = self.range(offset, data.len())?;
        self.mapping.as_mut_slice()[start..end].copy_from_slice(data);
        trace!(offset, len = data.len(), "pmem-aware write");
        self.mapping.persist(start, data.len())
    }

    /// Unmap the file.
    pub fn close(self) {
        debug!(path = %self.path.display(), "pmem-aware file closed");
    }
}
