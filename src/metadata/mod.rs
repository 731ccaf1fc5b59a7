//! Durable metadata store
//!
//! Two append-only, sentinel-terminated logs describe every window under a
//! root path:
//!
//! - `.windows`: one [`WindowRecord`] per window name ever created
//! - `.<name>`: one [`VersionRecord`] per checkpoint slot of a window
//!
//! Records are never removed positionally; deletion is a flag flip.

mod directory;
mod format;
mod log;

pub use directory::{VersionLog, WindowDirectory};
pub use format::{MetadataError, Record, RecordFlags, VersionRecord, WindowRecord, MAX_NAME};
pub use log::RecordLog;

use std::path::{Path, PathBuf};

/// File name of the global window directory.
pub const DIRECTORY_FILE: &str = ".windows";

/// Path of the global window directory under `root`.
pub fn directory_path(root: &Path) -> PathBuf {
    root.join(DIRECTORY_FILE)
}

/// Path of the version log of `window`.
pub fn version_log_path(root: &Path, window: &str) -> PathBuf {
    root.join(format!(".{window}"))
}

/// Path of the live data file of `window`.
pub fn data_path(root: &Path, window: &str) -> PathBuf {
    root.join(window)
}

/// Path of the data file of checkpoint `version` of `window`.
pub fn checkpoint_path(root: &Path, window: &str, version: i32) -> PathBuf {
    root.join(format!(".{window}-{version}"))
}
