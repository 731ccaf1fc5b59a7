//! Root path context and directory-level operations
//!
//! A [`PmemContext`] names the directory holding one rank's metadata and data
//! files. It is passed explicitly to everything that touches durable state.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::comm::Communicator;
use crate::constants::MAX_ROOT_PATH;
use crate::error::{IoOp, PmemError, Result};
use crate::metadata::{self, RecordFlags, VersionLog, WindowDirectory};

/// What a failed collective operation does after logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Abort the whole process group.
    #[default]
    Abort,
    /// Return the error to the caller.
    Return,
}

impl ErrorMode {
    /// Configuration value for the mode.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorMode::Abort => "abort",
            ErrorMode::Return => "return",
        }
    }
}

impl std::str::FromStr for ErrorMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(ErrorMode::Abort),
            "return" => Ok(ErrorMode::Return),
            other => Err(other.to_string()),
        }
    }
}

/// Live window listed by [`PmemContext::list_windows`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSummary {
    /// Window name.
    pub name: String,
    /// Window size in bytes.
    pub size: u64,
}

/// Live checkpoint listed by [`PmemContext::get_versions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionSummary {
    /// Checkpoint version.
    pub version: i32,
    /// Commit time, seconds since the Unix epoch.
    pub timestamp: i64,
}

/// Root path of one rank's persistent windows.
#[derive(Debug, Clone)]
pub struct PmemContext {
    root: PathBuf,
    error_mode: ErrorMode,
}

impl PmemContext {
    /// Use `path` as root, creating its window directory when absent.
    ///
    /// An existing directory file is reused as is.
    pub fn set_root_path(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if root.as_os_str().len() > MAX_ROOT_PATH {
            return Err(PmemError::InvalidRootPath {
                path: root,
                reason: "path too long",
            });
        }
        match fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(PmemError::InvalidRootPath {
                    path: root,
                    reason: "not a directory",
                })
            }
            Err(_) => {
                return Err(PmemError::InvalidRootPath {
                    path: root,
                    reason: "does not exist",
                })
            }
        }

        let created = WindowDirectory::create_if_missing(&metadata::directory_path(&root))?;
        info!(root = %root.display(), created, "root path set");
        Ok(Self {
            root,
            error_mode: ErrorMode::default(),
        })
    }

    /// Use `<base>/<rank>` as root, creating the subdirectory if needed.
    pub fn for_rank(base: impl AsRef<Path>, rank: usize) -> Result<Self> {
        let root = base.as_ref().join(rank.to_string());
        fs::create_dir_all(&root).map_err(PmemError::io_with(IoOp::Mkdir, &root))?;
        Self::set_root_path(root)
    }

    /// Replace the error mode.
    pub fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current error mode.
    pub fn error_mode(&self) -> ErrorMode {
        self.error_mode
    }

    /// Report the outcome of a collective operation.
    ///
    /// Errors are logged; in [`ErrorMode::Abort`] the group is torn down with
    /// the error class as exit code.
    pub fn surface<T>(&self, comm: &dyn Communicator, result: Result<T>) -> Result<T> {
        surface(self.error_mode, comm, result)
    }

    pub(crate) fn directory(&self) -> Result<WindowDirectory> {
        WindowDirectory::open(metadata::directory_path(&self.root))
    }

    pub(crate) fn version_log(&self, window: &str) -> Result<VersionLog> {
        VersionLog::open(metadata::version_log_path(&self.root, window))
    }

    /// Every live window, in directory order.
    pub fn list_windows(&self) -> Result<Vec<WindowSummary>> {
        Ok(self
            .directory()?
            .live()?
            .into_iter()
            .map(|rec| WindowSummary {
                name: rec.name,
                size: rec.size,
            })
            .collect())
    }

    /// Every live checkpoint of `window`.
    pub fn get_versions(&self, window: &str) -> Result<Vec<VersionSummary>> {
        if self.directory()?.find_live(window)?.is_none() {
            return Err(PmemError::WindowNotFound(window.to_string()));
        }
        Ok(self
            .version_log(window)?
            .live()?
            .into_iter()
            .map(|rec| VersionSummary {
                version: rec.version,
                timestamp: rec.timestamp,
            })
            .collect())
    }

    /// Delete `window` with all its checkpoints. Deleting twice is a no-op.
    pub fn delete_window(&self, window: &str) -> Result<()> {
        let mut directory = self.directory()?;
        let (index, record) = directory
            .find(window)?
            .ok_or_else(|| PmemError::WindowNotFound(window.to_string()))?;
        if record.flags != RecordFlags::Exists {
            debug!(window, "window already deleted");
            return Ok(());
        }

        let mut versions = self.version_log(window)?;
        self.purge_versions(window, &mut versions)?;
        drop(versions);
        directory.write_flags(index, RecordFlags::Deleted)?;
        remove_file(&metadata::version_log_path(&self.root, window))?;
        remove_file(&metadata::data_path(&self.root, window))?;
        info!(window, "window deleted");
        Ok(())
    }

    /// Delete one checkpoint of `window`. Deleting twice is a no-op.
    pub fn delete_version(&self, window: &str, version: i32) -> Result<()> {
        if self.directory()?.find_live(window)?.is_none() {
            return Err(PmemError::WindowNotFound(window.to_string()));
        }
        let mut versions = self.version_log(window)?;
        let record = usize::try_from(version)
            .ok()
            .map(|index| versions.get(index))
            .transpose()?
            .flatten()
            .ok_or_else(|| PmemError::VersionNotFound {
                window: window.to_string(),
                version,
            })?;
        if record.flags != RecordFlags::Exists {
            return Ok(());
        }
        self.retire_version(window, &mut versions, version)?;
        info!(window, version, "checkpoint deleted");
        Ok(())
    }

    /// Flip `version` to deleted and remove its data file.
    pub(crate) fn retire_version(
        &self,
        window: &str,
        versions: &mut VersionLog,
        version: i32,
    ) -> Result<()> {
        let index = usize::try_from(version).map_err(|_| PmemError::VersionNotFound {
            window: window.to_string(),
            version,
        })?;
        versions.write_flags(index, RecordFlags::Deleted)?;
        remove_file(&metadata::checkpoint_path(&self.root, window, version))
    }

    /// Delete every live checkpoint and empty the version log.
    pub(crate) fn purge_versions(&self, window: &str, versions: &mut VersionLog) -> Result<()> {
        let live: Vec<i32> = versions.live()?.iter().map(|rec| rec.version).collect();
        for version in &live {
            self.retire_version(window, versions, *version)?;
        }
        versions.reset()?;
        debug!(window, purged = live.len(), "checkpoints purged");
        Ok(())
    }
}

/// [`PmemContext::surface`] for callers holding only an error mode.
pub(crate) fn surface<T>(mode: ErrorMode, comm: &dyn Communicator, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        let class = err.class();
        error!(
            rank = comm.rank(),
            class = class.as_str(),
            code = class.code(),
            "{err}"
        );
        if mode == ErrorMode::Abort {
            comm.abort(class.code());
        }
    }
    result
}

/// Remove a file, treating an absent one as removed.
pub(crate) fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(PmemError::io(IoOp::Remove, path, err)),
    }
}
