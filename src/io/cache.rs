//! Distributed cache file
//!
//! The file is split into one shard per node (see [`ShardLayout`]). The
//! lowest rank of every node runs a [`CacheManager`] holding its shard in a
//! mapped file below the cache directory; reads and writes from any rank are
//! decomposed per shard and sent to the owning manager.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use super::layout::ShardLayout;
use super::manager::{self, CacheManager, ReadRequest, ShardSpec, WriteRequest};
use super::recovery::{self, RecoveryRecord, CACHE_FILE_PREFIX};
use super::random_name;
use crate::comm::{decode, encode, node_rank, Comm, CommError, Tag};
use crate::context::ErrorMode;
use crate::error::{IoOp, PmemError, Result};
use crate::info::FileOptions;

const CACHE_DIR_PREFIX: &str = "mpi_io_pmem_";
const CACHE_DIR_SUFFIX_LEN: usize = 16;

/// File served by per-node cache managers.
pub struct DistributedFile {
    comm: Comm,
    path: PathBuf,
    layout: ShardLayout,
    /// File communicator rank of every manager, by shard.
    managers: Vec<usize>,
    cache_dir: PathBuf,
    failure_recovery: bool,
    manager: Option<CacheManager>,
}

impl DistributedFile {
    /// Collectively open the existing file at `path`.
    pub fn open(
        comm: &Comm,
        path: &Path,
        options: &FileOptions,
        error_mode: ErrorMode,
    ) -> Result<Self> {
        let comm = comm.duplicate()?;
        let file_size = fs::metadata(path)
            .map_err(PmemError::io_with(IoOp::Open, path))?
            .len();

        let is_manager = node_rank(comm.as_ref())? == 0;
        let manager_comm = comm.split(is_manager.then_some(0), comm.rank() as i64)?;
        let mut gathered = Vec::new();
        if let Some(mc) = &manager_comm {
            for part in mc.gather(0, encode(Tag::GATHER, &comm.rank())?)? {
                gathered.push(decode::<usize>(Tag::GATHER, &part)?);
            }
        }
        let bytes = comm.broadcast(0, encode(Tag::BROADCAST, &gathered)?)?;
        let managers: Vec<usize> = decode(Tag::BROADCAST, &bytes)?;
        let layout = ShardLayout::new(file_size, managers.len())?;

        let cache_dir = cache_dir(&comm, options)?;
        if comm.rank() == 0 {
            info!(
                path = %path.display(),
                file_size,
                nodes = layout.nodes(),
                cache_size = layout.cache_size(),
                cache_dir = %cache_dir.display(),
                "opening distributed file"
            );
        }

        let manager = match &manager_comm {
            Some(mc) => {
                let id = mc.rank();
                let cache_file = cache_dir.join(format!("{CACHE_FILE_PREFIX}{id}"));
                if options.do_recovery {
                    if !cache_file.exists() {
                        return Err(PmemError::io(
                            IoOp::Open,
                            &cache_file,
                            io::Error::from(io::ErrorKind::NotFound),
                        ));
                    }
                } else {
                    fs::create_dir_all(&cache_dir)
                        .map_err(PmemError::io_with(IoOp::Mkdir, &cache_dir))?;
                }
                let shard = ShardSpec {
                    id,
                    offset: layout.shard_start(id),
                    len: usize::try_from(layout.shard_len(id)).map_err(|_| {
                        PmemError::Allocation {
                            what: format!("cache shard {id}"),
                        }
                    })?,
                    backing: path.to_path_buf(),
                    cache_file,
                };
                Some(CacheManager::start(comm.clone(), shard, error_mode)?)
            }
            None => None,
        };
        comm.barrier()?;

        let file = Self {
            comm,
            path: path.to_path_buf(),
            layout,
            managers,
            cache_dir,
            failure_recovery: options.failure_recovery,
            manager,
        };
        if options.do_recovery {
            if let Some(mc) = &manager_comm {
                recovery::replay(&file.cache_dir, mc.rank(), |offset, data| {
                    file.dispatch_write(offset, data)
                })?;
            }
            file.comm.barrier()?;
        }
        Ok(file)
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the shard files and recovery records.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Shard layout of the file.
    pub fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    /// Whether this rank runs its node's cache manager.
    pub fn is_manager(&self) -> bool {
        self.manager.is_some()
    }

    /// File size in bytes.
    pub fn size(&self) -> u64 {
        self.layout.file_size()
    }

    /// Read `buf.len()` bytes at `offset` from the owning managers.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut pos = 0usize;
        for segment in self.layout.split(offset, buf.len() as u64)? {
            let manager = self.managers[segment.shard];
            let request = ReadRequest {
                offset: segment.offset,
                len: segment.len,
            };
            self.comm
                .send(manager, manager::READ, encode(manager::READ, &request)?)?;
            let reply = self
                .comm
                .recv(Some(manager), &[manager::READ_RESPONSE])?;
            let len = segment.len as usize;
            if reply.payload.len() != len {
                return Err(PmemError::Comm(CommError::Malformed {
                    tag: manager::READ_RESPONSE,
                    reason: format!("expected {len} bytes, got {}", reply.payload.len()),
                }));
            }
            buf[pos..pos + len].copy_from_slice(&reply.payload);
            pos += len;
        }
        Ok(())
    }

    /// Write `data` at `offset` through the owning managers.
    ///
    /// With failure recovery enabled the write is recorded first and the
    /// record dropped once every piece has been dispatched.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.layout.split(offset, data.len() as u64)?;
        let record = if self.failure_recovery {
            Some(RecoveryRecord::create(&self.cache_dir, offset, data)?)
        } else {
            None
        };
        self.dispatch_write(offset, data)?;
        if let Some(record) = record {
            record.remove()?;
        }
        Ok(())
    }

    fn dispatch_write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut pos = 0usize;
        for segment in self.layout.split(offset, data.len() as u64)? {
            let len = segment.len as usize;
            let request = WriteRequest {
                offset: segment.offset,
                data: data[pos..pos + len].to_vec(),
            };
            self.comm.send(
                self.managers[segment.shard],
                manager::WRITE,
                encode(manager::WRITE, &request)?,
            )?;
            pos += len;
        }
        debug!(offset, len = data.len(), "write dispatched");
        Ok(())
    }

    /// Collectively write every shard back to the backing file.
    pub fn sync(&self) -> Result<()> {
        self.comm.barrier()?;
        if self.comm.rank() == 0 {
            for &manager in &self.managers {
                self.comm.send(manager, manager::SYNC, Vec::new())?;
            }
        }
        if let Some(manager) = &self.manager {
            manager.wait_synced()?;
        }
        self.comm.barrier()?;
        Ok(())
    }

    /// Collectively stop the managers and remove the cache directory.
    pub fn close(mut self) -> Result<()> {
        self.comm.barrier()?;
        if self.comm.rank() == 0 {
            for &manager in &self.managers {
                self.comm.send(manager, manager::SHUTDOWN, Vec::new())?;
            }
        }
        let outcome = match self.manager.take() {
            Some(manager) => manager.join(),
            None => Ok(()),
        };
        let outcome = outcome.map_err(|err| match err {
            PmemError::CacheManager(_) => err,
            other => PmemError::CacheManager(other.to_string()),
        });
        self.comm.barrier()?;
        outcome?;

        if self.is_manager_rank() {
            match fs::remove_dir(&self.cache_dir) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(PmemError::io(IoOp::Rmdir, &self.cache_dir, err)),
            }
        }
        self.comm.barrier()?;
        info!(path = %self.path.display(), "distributed file closed");
        Ok(())
    }

    fn is_manager_rank(&self) -> bool {
        self.managers.contains(&self.comm.rank())
    }
}

/// Cache directory shared by the managers of one open.
fn cache_dir(comm: &Comm, options: &FileOptions) -> Result<PathBuf> {
    if options.do_recovery {
        let path = options.do_recovery_path.as_deref().ok_or_else(|| {
            PmemError::InvalidArgument("do_recovery requires do_recovery_path".into())
        })?;
        return Ok(PathBuf::from(path));
    }
    let base = options
        .pmem_path
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    let name = if comm.rank() == 0 {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        format!(
            "{CACHE_DIR_PREFIX}{secs}_{}",
            random_name(CACHE_DIR_SUFFIX_LEN)
        )
    } else {
        String::new()
    };
    let bytes = comm.broadcast(0, name.into_bytes())?;
    let name = String::from_utf8(bytes).map_err(|e| CommError::Malformed {
        tag: Tag::BROADCAST,
        reason: e.to_string(),
    })?;
    Ok(base.join(name))
}
