//! Collective file I/O through persistent memory
//!
//! [`PmemFile`] picks a strategy from the `pmem_io_mode` option:
//!
//! - `"0"` (default): [`DistributedFile`], a file sharded over per-node
//!   cache managers, with optional write-ahead records for replay after a
//!   crash.
//! - `"1"`: [`PmemAwareFile`], every rank maps the file directly.

mod cache;
mod layout;
mod manager;
mod pmem_aware;
mod recovery;

pub use cache::DistributedFile;
pub use layout::{Segment, ShardLayout};
pub use pmem_aware::PmemAwareFile;
pub use recovery::RecoveryRecord;

use std::path::Path;

use rand::{distributions::Alphanumeric, Rng};

use crate::comm::Comm;
use crate::context::{self, ErrorMode};
use crate::error::{PmemError, Result};
use crate::info::{FileOptions, Info, IoMode};

/// Open file in one of the io modes.
pub struct PmemFile {
    comm: Comm,
    error_mode: ErrorMode,
    inner: Inner,
}

enum Inner {
    Distributed(DistributedFile),
    PmemAware(PmemAwareFile),
}

impl PmemFile {
    /// Collectively open `path`, aborting the group on failure.
    pub fn open(comm: &Comm, path: impl AsRef<Path>, info: Option<&Info>) -> Result<Self> {
        Self::open_with(comm, path, info, ErrorMode::default())
    }

    /// Collectively open `path` with an explicit error mode.
    pub fn open_with(
        comm: &Comm,
        path: impl AsRef<Path>,
        info: Option<&Info>,
        error_mode: ErrorMode,
    ) -> Result<Self> {
        let path = path.as_ref();
        let inner = FileOptions::from_info(info).and_then(|options| match options.io_mode {
            IoMode::DistributedCache => {
                DistributedFile::open(comm, path, &options, error_mode).map(Inner::Distributed)
            }
            IoMode::PmemAware => PmemAwareFile::open(path).map(Inner::PmemAware),
        });
        let inner = context::surface(error_mode, comm.as_ref(), inner)?;
        Ok(Self {
            comm: comm.clone(),
            error_mode,
            inner,
        })
    }

    fn surface<T>(&self, result: Result<T>) -> Result<T> {
        context::surface(self.error_mode, self.comm.as_ref(), result)
    }

    /// Strategy serving the file.
    pub fn io_mode(&self) -> IoMode {
        match self.inner {
            Inner::Distributed(_) => IoMode::DistributedCache,
            Inner::PmemAware(_) => IoMode::PmemAware,
        }
    }

    /// File size in bytes.
    pub fn size(&self) -> u64 {
        match &self.inner {
            Inner::Distributed(file) => file.size(),
            Inner::PmemAware(file) => file.size(),
        }
    }

    /// Read `buf.len()` bytes at `offset`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let result = match &self.inner {
            Inner::Distributed(file) => file.read_at(offset, buf),
            Inner::PmemAware(file) => file.read_at(offset, buf),
        };
        self.surface(result)
    }

    /// Write `data` at `offset`.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let result = match &mut self.inner {
            Inner::Distributed(file) => file.write_at(offset, data),
            Inner::PmemAware(file) => file.write_at(offset, data),
        };
        self.surface(result)
    }

    /// Collective [`PmemFile::read_at`].
    pub fn read_at_all(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.read_at(offset, buf)
    }

    /// Collective [`PmemFile::write_at`].
    pub fn write_at_all(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.write_at(offset, data)
    }

    /// Make every completed write durable in the backing file.
    pub fn sync(&self) -> Result<()> {
        let result = match &self.inner {
            Inner::Distributed(file) => file.sync(),
            Inner::PmemAware(_) => Ok(()),
        };
        self.surface(result)
    }

    /// Resizing is not supported in either mode.
    pub fn set_size(&self, _size: u64) -> Result<()> {
        self.surface(Err(PmemError::Unsupported("set_size")))
    }

    /// Collectively close the file.
    pub fn close(self) -> Result<()> {
        let result = match self.inner {
            Inner::Distributed(file) => file.close(),
            Inner::PmemAware(file) => {
                file.close();
                Ok(())
            }
        };
        context::surface(self.error_mode, self.comm.as_ref(), result)
    }

    /// Underlying distributed file, if that is the mode.
    pub fn as_distributed(&self) -> Option<&DistributedFile> {
        match &self.inner {
            Inner::Distributed(file) => Some(file),
            Inner::PmemAware(_) => None,
        }
    }
}

impl std::fmt::Debug for PmemFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PmemFile")
            .field("io_mode", &self.io_mode())
            .field("size", &self.size())
            .field("rank", &self.comm.rank())
            .finish()
    }
}

/// Random alphanumeric string of `len` characters.
pub(crate) fn random_name(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
