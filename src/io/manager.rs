//! Cache manager thread
//!
//! One per node. The thread owns a mapped copy of its shard and serves
//! requests that arrive over the file communicator, so every access to a
//! shard is serialized through it.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace};

use crate::comm::{decode, Comm, Tag};
use crate::context::ErrorMode;
use crate::device::{HeapArea, MappedFile, MemoryArea};
use crate::error::{IoOp, PmemError, Result};

/// Request tags understood by the manager thread.
pub(super) const READ: Tag = Tag(1);
pub(super) const WRITE: Tag = Tag(2);
pub(super) const SYNC: Tag = Tag(3);
pub(super) const SHUTDOWN: Tag = Tag(4);
/// Reply to [`READ`], addressed to the requesting rank's main thread.
pub(super) const READ_RESPONSE: Tag = Tag(5);

const REQUESTS: [Tag; 4] = [READ, WRITE, SYNC, SHUTDOWN];

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct ReadRequest {
    pub offset: u64,
    pub len: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct WriteRequest {
    pub offset: u64,
    pub data: Vec<u8>,
}

/// Progress reported by the thread to the rank that spawned it.
#[derive(Debug)]
enum ManagerEvent {
    /// Shard loaded, requests are being served.
    Ready,
    /// A SYNC request reached the backing file.
    Synced,
    /// The thread stopped on an error.
    Failed(String),
}

/// What one manager caches.
#[derive(Debug, Clone)]
pub(super) struct ShardSpec {
    /// Manager index, also the shard index.
    pub id: usize,
    /// First file byte of the shard.
    pub offset: u64,
    /// Shard length in bytes.
    pub len: usize,
    /// File being cached.
    pub backing: PathBuf,
    /// Shard file inside the cache directory.
    pub cache_file: PathBuf,
}

/// Handle to the node's manager thread.
pub(super) struct CacheManager {
    comm: Comm,
    events: Receiver<ManagerEvent>,
    worker: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl CacheManager {
    /// Spawn the thread and wait until it serves requests.
    pub fn start(comm: Comm, shard: ShardSpec, error_mode: ErrorMode) -> Result<Self> {
        let (tx, rx) = unbounded();
        let thread_comm = comm.clone();
        let worker = thread::Builder::new()
            .name(format!("oxipmem-cache-{}", shard.id))
            .spawn(move || worker_loop(thread_comm, shard, error_mode, tx))
            .map_err(PmemError::io_with(IoOp::Thread, std::path::Path::new("cache manager")))?;

        let manager = Self {
            comm,
            events: rx,
            worker: Mutex::new(Some(worker)),
        };
        match manager.next_event()? {
            ManagerEvent::Ready => Ok(manager),
            ManagerEvent::Failed(reason) => {
                manager.join()?;
                Err(PmemError::CacheManager(reason))
            }
            ManagerEvent::Synced => Err(PmemError::CacheManager(
                "unexpected sync acknowledgement while starting".into(),
            )),
        }
    }

    fn next_event(&self) -> Result<ManagerEvent> {
        self.events
            .recv()
            .map_err(|_| PmemError::CacheManager("manager thread exited".into()))
    }

    /// Block until the thread has written a SYNC request back to the file.
    pub fn wait_synced(&self) -> Result<()> {
        match self.next_event()? {
            ManagerEvent::Synced => Ok(()),
            ManagerEvent::Failed(reason) => Err(PmemError::CacheManager(reason)),
            ManagerEvent::Ready => Err(PmemError::CacheManager(
                "unexpected ready notification".into(),
            )),
        }
    }

    /// Wait for the thread to exit after SHUTDOWN and collect its outcome.
    pub fn join(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        match worker.join() {
            Ok(result) => result,
            Err(_) => Err(PmemError::CacheManager("manager thread panicked".into())),
        }
    }

    fn stop(&self) {
        if let Some(worker) = self.worker.lock().take() {
            let _ = self.comm.send(self.comm.rank(), SHUTDOWN, Vec::new());
            let _ = worker.join();
        }
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    comm: Comm,
    shard: ShardSpec,
    error_mode: ErrorMode,
    events: Sender<ManagerEvent>,
) -> Result<()> {
    let result = serve(&comm, &shard, &events);
    if let Err(err) = &result {
        let class = err.class();
        error!(
            rank = comm.rank(),
            manager = shard.id,
            class = class.as_str(),
            "cache manager failed: {err}"
        );
        let _ = events.send(ManagerEvent::Failed(err.to_string()));
        if error_mode == ErrorMode::Abort {
            comm.abort(class.code());
        }
    }
    result
}

fn serve(comm: &Comm, shard: &ShardSpec, events: &Sender<ManagerEvent>) -> Result<()> {
    let backing = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&shard.backing)
        .map_err(PmemError::io_with(IoOp::Open, &shard.backing))?;

    let mut cache: Box<dyn MemoryArea> = if shard.len == 0 {
        Box::new(HeapArea::zeroed(0))
    } else {
        Box::new(MappedFile::open_and_map(&shard.cache_file, shard.len)?)
    };
    backing
        .read_exact_at(cache.as_mut_slice(), shard.offset)
        .map_err(PmemError::io_with(IoOp::Read, &shard.backing))?;
    info!(
        manager = shard.id,
        offset = shard.offset,
        len = shard.len,
        pmem = cache.is_pmem(),
        "cache manager serving"
    );
    let _ = events.send(ManagerEvent::Ready);

    loop {
        let envelope = comm.recv(None, &REQUESTS)?;
        match envelope.tag {
            READ => {
                let req: ReadRequest = decode(READ, &envelope.payload)?;
                let (start, end) = checked_range(shard, req.offset, req.len)?;
                trace!(manager = shard.id, from = envelope.source, start, end, "read");
                comm.send(
                    envelope.source,
                    READ_RESPONSE,
                    cache.as_slice()[start..end].to_vec(),
                )?;
            }
            WRITE => {
                let req: WriteRequest = decode(WRITE, &envelope.payload)?;
                let (start, end) = checked_range(shard, req.offset, req.data.len() as u64)?;
                trace!(manager = shard.id, from = envelope.source, start, end, "write");
                cache.as_mut_slice()[start..end].copy_from_slice(&req.data);
                cache.persist(start, end - start)?;
            }
            SYNC => {
                write_back(&backing, shard, cache.as_slice())?;
                debug!(manager = shard.id, "shard synced");
                let _ = events.send(ManagerEvent::Synced);
            }
            SHUTDOWN => {
                write_back(&backing, shard, cache.as_slice())?;
                drop(cache);
                crate::context::remove_file(&shard.cache_file)?;
                info!(manager = shard.id, "cache manager stopped");
                return Ok(());
            }
            other => trace!(manager = shard.id, tag = %other, "ignoring message"),
        }
    }
}

fn checked_range(shard: &ShardSpec, offset: u64, len: u64) -> Result<(usize, usize)> {
    let end = offset.checked_add(len).filter(|&end| end <= shard.len as u64);
    match end {
        Some(end) => Ok((offset as usize, end as usize)),
        None => Err(PmemError::InvalidArgument(format!(
            "range {offset}+{len} outside shard {} of {} bytes",
            shard.id, shard.len
        ))),
    }
}

fn write_back(backing: &File, shard: &ShardSpec, data: &[u8]) -> Result<()> {
    backing
        .write_all_at(data, shard.offset)
        .map_err(PmemError::io_with(IoOp::Write, &shard.backing))?;
    backing
        .sync_data()
        .map_err(PmemError::io_with(IoOp::Sync, &shard.backing))
}
