//! Global window directory and per-window version logs

use std::path::Path;

use tracing::debug;

use crate::error::{PmemError, Result};
use crate::metadata::format::{RecordFlags, VersionRecord, WindowRecord};
use crate::metadata::log::RecordLog;

/// The `.windows` file of a root path.
pub type WindowDirectory = RecordLog<WindowRecord>;

/// The `.<name>` version log of a window.
pub type VersionLog = RecordLog<VersionRecord>;

impl RecordLog<WindowRecord> {
    /// Create the directory with a lone sentinel if it does not exist yet.
    pub fn create_if_missing(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        Self::create(path)?;
        Ok(true)
    }

    /// First record carrying `name`, whatever its flag.
    pub fn find(&self, name: &str) -> Result<Option<(usize, WindowRecord)>> {
        Ok(self
            .records()?
            .into_iter()
            .enumerate()
            .find(|(_, rec)| rec.name == name))
    }

    /// Live record for `name`.
    pub fn find_live(&self, name: &str) -> Result<Option<(usize, WindowRecord)>> {
        Ok(self
            .find(name)?
            .filter(|(_, rec)| rec.flags == RecordFlags::Exists))
    }

    /// All live records in directory order.
    pub fn live(&self) -> Result<Vec<WindowRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|rec| rec.flags == RecordFlags::Exists)
            .collect())
    }

    /// Mark `name` live with `size`, reusing its slot when one exists
    /// (including a deleted one) or appending a new record otherwise.
    pub fn register(&mut self, name: &str, size: u64) -> Result<usize> {
        let record = WindowRecord::live(name, size);
        match self.find(name)? {
            Some((index, _)) => {
                self.write_payload(index, &record)?;
                self.write_flags(index, RecordFlags::Exists)?;
                debug!(window = name, index, size, "window record reused");
                Ok(index)
            }
            None => {
                let index = self.append(&record)?;
                debug!(window = name, index, size, "window record appended");
                Ok(index)
            }
        }
    }

    /// Update the size of a live window.
    pub fn update_size(&mut self, name: &str, size: u64) -> Result<()> {
        match self.find(name)? {
            Some((index, rec)) if rec.flags == RecordFlags::Exists => {
                self.write_payload(index, &WindowRecord::live(name, size))
            }
            _ => Err(PmemError::WindowNotFound(name.to_string())),
        }
    }
}

impl RecordLog<VersionRecord> {
    /// Versions flagged live.
    pub fn live(&self) -> Result<Vec<VersionRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|rec| rec.flags == RecordFlags::Exists)
            .collect())
    }

    /// Highest version flagged live.
    pub fn highest_live(&self) -> Result<Option<i32>> {
        Ok(self.live()?.last().map(|rec| rec.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_register_appends_then_reuses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".windows");
        assert!(WindowDirectory::create_if_missing(&path).unwrap());
        assert!(!WindowDirectory::create_if_missing(&path).unwrap());

        let mut windows = WindowDirectory::open(&path).unwrap();
        assert_eq!(windows.register("a", 10).unwrap(), 0);
        assert_eq!(windows.register("b", 20).unwrap(), 1);
        windows.write_flags(0, RecordFlags::Deleted).unwrap();
        assert_eq!(windows.find_live("a").unwrap(), None);

        assert_eq!(windows.register("a", 30).unwrap(), 0);
        let (_, rec) = windows.find_live("a").unwrap().unwrap();
        assert_eq!(rec.size, 30);
        assert_eq!(windows.records().unwrap().len(), 2);
    }

    #[test]
    fn test_update_size_requires_live_window() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".windows");
        let mut windows = WindowDirectory::create(&path).unwrap();
        windows.register("a", 10).unwrap();
        windows.update_size("a", 64).unwrap();
        assert_eq!(windows.live().unwrap()[0].size, 64);

        windows.write_flags(0, RecordFlags::Deleted).unwrap();
        assert!(matches!(
            windows.update_size("a", 1),
            Err(PmemError::WindowNotFound(_))
        ));
        assert!(matches!(
            windows.update_size("zzz", 1),
            Err(PmemError::WindowNotFound(_))
        ));
    }
}
