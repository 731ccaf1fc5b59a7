//! String-keyed option sets
//!
//! Window and file open calls take an [`Info`]: a dictionary of string keys to
//! string values. Booleans are `"true"` exactly; anything else reads as false.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::error::{PmemError, Result};
use crate::metadata::MAX_NAME;

/// Recognized option keys.
pub mod keys {
    /// Window is backed by persistent memory.
    pub const IS_PMEM: &str = "pmem_is_pmem";
    /// Keep window memory in RAM, checkpoints still go to files.
    pub const ALLOCATE_IN_RAM: &str = "pmem_allocate_in_ram";
    /// Disable checkpointing.
    pub const DONT_USE_TRANSACTIONS: &str = "pmem_dont_use_transactions";
    /// Retain every checkpoint instead of only the latest.
    pub const KEEP_ALL_CHECKPOINTS: &str = "pmem_keep_all_checkpoints";
    /// Window name.
    pub const NAME: &str = "pmem_name";
    /// `expand` or `checkpoint`.
    pub const MODE: &str = "pmem_mode";
    /// Version to restore in checkpoint mode.
    pub const CHECKPOINT_VERSION: &str = "pmem_checkpoint_version";
    /// Append new checkpoints after the last slot.
    pub const APPEND_CHECKPOINTS: &str = "pmem_append_checkpoints";
    /// Restore the same version on every rank.
    pub const GLOBAL_CHECKPOINT: &str = "pmem_global_checkpoint";
    /// Skip durability, remove the data file on free.
    pub const VOLATILE: &str = "pmem_volatile";

    /// Directory holding the distributed cache.
    pub const PMEM_PATH: &str = "pmem_path";
    /// `0` distributed cache, `1` pmem-aware.
    pub const IO_MODE: &str = "pmem_io_mode";
    /// Record every write in the recovery log.
    pub const FAILURE_RECOVERY: &str = "failure_recovery";
    /// Replay the recovery log of a previous run on open.
    pub const DO_RECOVERY: &str = "do_recovery";
    /// Cache directory of the run to recover.
    pub const DO_RECOVERY_PATH: &str = "do_recovery_path";
}

/// Option dictionary passed to open calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Info {
    entries: BTreeMap<String, String>,
}

impl Info {
    /// Empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Info::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Insert or replace a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// `true` only when the value is exactly `"true"`.
    pub fn get_bool(&self, key: &str) -> bool {
        let value = self.get(key) == Some("true");
        debug!(key, value, "info flag");
        value
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn name(&self) -> Result<String> {
        match self.get(keys::NAME) {
            Some(name) if !name.is_empty() && name.len() < MAX_NAME && !name.contains(['/', '\0']) => {
                Ok(name.to_string())
            }
            other => Err(PmemError::InvalidName(other.unwrap_or_default().to_string())),
        }
    }

    fn mode(&self) -> Result<WindowMode> {
        let value = self
            .get(keys::MODE)
            .ok_or_else(|| PmemError::InvalidMode(String::new()))?;
        value.parse()
    }

    fn checkpoint_version(&self) -> i32 {
        // Unparsable input reads as version 0, like C `atoi`.
        self.get(keys::CHECKPOINT_VERSION)
            .map(|v| v.trim().parse().unwrap_or(0))
            .unwrap_or(-1)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Info {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut info = Info::new();
        for (k, v) in iter {
            info.set(k, v);
        }
        info
    }
}

/// How a window relates to its stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowMode {
    /// Create or resize; previous checkpoints are purged.
    #[default]
    Expand,
    /// Reopen an existing window of the same size and restore a checkpoint.
    Checkpoint,
}

impl WindowMode {
    /// Option value for the mode.
    pub const fn as_str(&self) -> &'static str {
        match self {
            WindowMode::Expand => "expand",
            WindowMode::Checkpoint => "checkpoint",
        }
    }
}

impl fmt::Display for WindowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WindowMode {
    type Err = PmemError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "expand" => Ok(WindowMode::Expand),
            "checkpoint" => Ok(WindowMode::Checkpoint),
            other => Err(PmemError::InvalidMode(other.to_string())),
        }
    }
}

/// Options of an allocated window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowOptions {
    /// Backed by persistent memory (and the metadata store).
    pub is_pmem: bool,
    /// Window memory lives in RAM.
    pub allocate_in_ram: bool,
    /// Checkpointing enabled.
    pub transactional: bool,
    /// Keep every checkpoint.
    pub keep_all_checkpoints: bool,
    /// Window name.
    pub name: String,
    /// Window mode.
    pub mode: WindowMode,
    /// Version to restore, `-1` for the latest.
    pub checkpoint_version: i32,
    /// Append instead of overwriting after the restored version.
    pub append_checkpoints: bool,
    /// Agree on the restored version across ranks.
    pub global_checkpoint: bool,
    /// Skip durability.
    pub is_volatile: bool,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            is_pmem: false,
            allocate_in_ram: false,
            transactional: false,
            keep_all_checkpoints: false,
            name: String::new(),
            mode: WindowMode::Expand,
            checkpoint_version: -1,
            append_checkpoints: false,
            global_checkpoint: false,
            is_volatile: false,
        }
    }
}

impl WindowOptions {
    /// Parse the options of an allocate call.
    ///
    /// Only `pmem_is_pmem` is read unless it is true; the checkpoint-mode keys
    /// are read only in checkpoint mode.
    pub fn from_info(info: Option<&Info>) -> Result<Self> {
        let mut opts = Self::default();
        let Some(info) = info else {
            return Ok(opts);
        };

        opts.is_pmem = info.get_bool(keys::IS_PMEM);
        if !opts.is_pmem {
            return Ok(opts);
        }

        opts.allocate_in_ram = info.get_bool(keys::ALLOCATE_IN_RAM);
        opts.transactional = !info.get_bool(keys::DONT_USE_TRANSACTIONS);
        if opts.transactional {
            opts.keep_all_checkpoints = info.get_bool(keys::KEEP_ALL_CHECKPOINTS);
        }
        opts.name = info.name()?;
        opts.mode = info.mode()?;
        if opts.mode == WindowMode::Checkpoint {
            opts.checkpoint_version = info.checkpoint_version();
            opts.append_checkpoints = info.get_bool(keys::APPEND_CHECKPOINTS);
            opts.global_checkpoint = info.get_bool(keys::GLOBAL_CHECKPOINT);
        }
        opts.is_volatile = info.get_bool(keys::VOLATILE);
        Ok(opts)
    }
}

/// I/O strategy of a [`crate::io::PmemFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoMode {
    /// File range sharded over per-node cache managers.
    #[default]
    DistributedCache,
    /// Every rank maps the file directly.
    PmemAware,
}

impl IoMode {
    /// Option value for the mode.
    pub const fn as_str(&self) -> &'static str {
        match self {
            IoMode::DistributedCache => "0",
            IoMode::PmemAware => "1",
        }
    }
}

impl std::str::FromStr for IoMode {
    type Err = PmemError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "0" => Ok(IoMode::DistributedCache),
            "1" => Ok(IoMode::PmemAware),
            other => Err(PmemError::WrongIoMode(other.to_string())),
        }
    }
}

/// Options of a file open call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileOptions {
    /// I/O strategy.
    pub io_mode: IoMode,
    /// Parent directory of the cache directory.
    pub pmem_path: Option<String>,
    /// Log writes for replay.
    pub failure_recovery: bool,
    /// Replay a previous run's log on open.
    pub do_recovery: bool,
    /// Cache directory of the previous run.
    pub do_recovery_path: Option<String>,
}

impl FileOptions {
    /// Parse the options of a file open call.
    pub fn from_info(info: Option<&Info>) -> Result<Self> {
        let Some(info) = info else {
            return Ok(Self::default());
        };
        let io_mode = match info.get(keys::IO_MODE) {
            Some(value) => value.parse()?,
            None => IoMode::default(),
        };
        Ok(Self {
            io_mode,
            pmem_path: info.get(keys::PMEM_PATH).map(str::to_string),
            failure_recovery: info.get_bool(keys::FAILURE_RECOVERY),
            do_recovery: info.get_bool(keys::DO_RECOVERY),
            do_recovery_path: info.get(keys::DO_RECOVERY_PATH).map(str::to_string),
        })
    }
}
