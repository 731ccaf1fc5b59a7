//! Error taxonomy shared by every layer of the crate

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::comm::CommError;
use crate::config::ConfigError;
use crate::metadata::MetadataError;
use crate::status::ErrorClass;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PmemError>;

/// Filesystem operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    /// Opening or creating a file
    Open,
    /// Pre-allocating file blocks
    Allocate,
    /// Mapping or unmapping a file
    Map,
    /// Forcing data to the medium
    Sync,
    /// Reading a file
    Read,
    /// Writing a file
    Write,
    /// Removing or renaming a file
    Remove,
    /// Creating a directory
    Mkdir,
    /// Removing a directory
    Rmdir,
    /// Listing a directory
    List,
    /// Spawning or joining a thread
    Thread,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IoOp::Open => "open",
            IoOp::Allocate => "allocate",
            IoOp::Map => "map",
            IoOp::Sync => "sync",
            IoOp::Read => "read",
            IoOp::Write => "write",
            IoOp::Remove => "remove",
            IoOp::Mkdir => "mkdir",
            IoOp::Rmdir => "rmdir",
            IoOp::List => "list",
            IoOp::Thread => "thread",
        };
        f.write_str(name)
    }
}

/// Which metadata log a parse failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// Global window directory (`.windows`)
    Directory,
    /// Per-window version log (`.<name>`)
    Versions,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogKind::Directory => f.write_str("window directory"),
            LogKind::Versions => f.write_str("version log"),
        }
    }
}

/// Errors returned by window, checkpoint and file operations.
#[derive(Debug, thiserror::Error)]
pub enum PmemError {
    /// Root path rejected by `set_root_path`.
    #[error("invalid root path {path:?}: {reason}")]
    InvalidRootPath {
        /// Offending path.
        path: PathBuf,
        /// What was wrong with it.
        reason: &'static str,
    },
    /// Window name absent or too long.
    #[error("invalid window name: {0:?}")]
    InvalidName(String),
    /// No live directory entry for the window.
    #[error("window not found: {0}")]
    WindowNotFound(String),
    /// Requested checkpoint version does not exist.
    #[error("checkpoint version {version} not found for window {window}")]
    VersionNotFound {
        /// Window name.
        window: String,
        /// Requested version.
        version: i32,
    },
    /// CHECKPOINT mode open with a size different from the stored one.
    #[error("size mismatch for window {window}: stored {stored}, requested {requested}")]
    SizeMismatch {
        /// Window name.
        window: String,
        /// Size recorded in the directory.
        stored: u64,
        /// Size asked for by the caller.
        requested: u64,
    },
    /// Ranks disagree on the restorable version of a global checkpoint.
    #[error("version {version} of window {window} is not available on every rank")]
    InconsistentCheckpoint {
        /// Window name.
        window: String,
        /// Version agreed by the minimum reduction.
        version: i32,
    },
    /// Unknown window mode.
    #[error("invalid window mode: {0:?}")]
    InvalidMode(String),
    /// Detach of a base address that was never attached.
    #[error("memory region at {base:#x} is not attached")]
    RegionNotAttached {
        /// Base address passed to detach.
        base: usize,
    },
    /// Argument rejected for any other reason.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Out of memory or disk space.
    #[error("unable to allocate {what}")]
    Allocation {
        /// What could not be allocated.
        what: String,
    },
    /// Malformed directory or version log.
    #[error("malformed {log} {path:?}: {source}")]
    Metadata {
        /// Log kind.
        log: LogKind,
        /// Log file.
        path: PathBuf,
        /// Parse failure.
        #[source]
        source: MetadataError,
    },
    /// Filesystem failure.
    #[error("{op} failed for {path:?}: {source}")]
    Io {
        /// Failed operation.
        op: IoOp,
        /// File or directory involved.
        path: PathBuf,
        /// OS error.
        #[source]
        source: io::Error,
    },
    /// Version log references a checkpoint whose data file is gone.
    #[error("checkpoint file {0:?} does not exist")]
    CheckpointFileMissing(PathBuf),
    /// Communication layer failure.
    #[error(transparent)]
    Comm(#[from] CommError),
    /// Cache manager thread failed or disappeared.
    #[error("cache manager thread failed: {0}")]
    CacheManager(String),
    /// Operation not supported by the file's io mode.
    #[error("operation unsupported: {0}")]
    Unsupported(&'static str),
    /// Unknown io mode value.
    #[error("wrong io mode: {0:?}")]
    WrongIoMode(String),
    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PmemError {
    /// Build an I/O error, classifying exhausted space as an allocation failure.
    pub fn io(op: IoOp, path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        let exhausted = matches!(source.raw_os_error(), Some(libc::ENOSPC) | Some(libc::ENOMEM))
            || source.kind() == io::ErrorKind::OutOfMemory;
        if exhausted {
            return PmemError::Allocation {
                what: format!("{} ({source})", path.display()),
            };
        }
        PmemError::Io { op, path, source }
    }

    /// Closure form of [`PmemError::io`] for `map_err`.
    pub(crate) fn io_with(op: IoOp, path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| PmemError::io(op, path, source)
    }

    /// Registered class of the error.
    pub fn class(&self) -> ErrorClass {
        match self {
            PmemError::InvalidRootPath { .. } => ErrorClass::RootPath,
            PmemError::InvalidName(_) | PmemError::WindowNotFound(_) => ErrorClass::Name,
            PmemError::VersionNotFound { .. } | PmemError::InconsistentCheckpoint { .. } => {
                ErrorClass::CheckpointVersion
            }
            PmemError::SizeMismatch { .. } => ErrorClass::Argument,
            PmemError::InvalidMode(_) => ErrorClass::Mode,
            PmemError::RegionNotAttached { .. } | PmemError::InvalidArgument(_) => {
                ErrorClass::Argument
            }
            PmemError::Allocation { .. } => ErrorClass::NoMemory,
            PmemError::Metadata { log, .. } => match log {
                LogKind::Directory => ErrorClass::Windows,
                LogKind::Versions => ErrorClass::Versions,
            },
            PmemError::Io { op, .. } => match op {
                IoOp::Open => ErrorClass::FileOpen,
                IoOp::Map => ErrorClass::Map,
                IoOp::Mkdir => ErrorClass::Mkdir,
                IoOp::Rmdir => ErrorClass::Rmdir,
                IoOp::Thread => ErrorClass::Thread,
                IoOp::List => ErrorClass::Posix,
                _ => ErrorClass::General,
            },
            PmemError::CheckpointFileMissing(_) => ErrorClass::General,
            PmemError::Comm(_) => ErrorClass::Communication,
            PmemError::CacheManager(_) => ErrorClass::CacheManagerThread,
            PmemError::Unsupported(_) => ErrorClass::Unsupported,
            PmemError::WrongIoMode(_) => ErrorClass::WrongMode,
            PmemError::Config(_) => ErrorClass::Argument,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_space_becomes_allocation() {
        let err = PmemError::io(
            IoOp::Allocate,
            "/tmp/x",
            io::Error::from_raw_os_error(libc::ENOSPC),
        );
        assert!(matches!(err, PmemError::Allocation { .. }));
        assert_eq!(err.class(), ErrorClass::NoMemory);
    }

    #[test]
    fn test_io_classes_follow_operation() {
        let err = PmemError::io(
            IoOp::Open,
            "/nope",
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert_eq!(err.class(), ErrorClass::FileOpen);

        let err = PmemError::io(
            IoOp::Write,
            "/nope",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert_eq!(err.class(), ErrorClass::General);
    }

    #[test]
    fn test_metadata_class_depends_on_log() {
        let err = PmemError::Metadata {
            log: LogKind::Versions,
            path: PathBuf::from(".w"),
            source: MetadataError::MissingSentinel { records: 0 },
        };
        assert_eq!(err.class(), ErrorClass::Versions);
    }
}
