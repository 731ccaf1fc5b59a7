//! Load path

use std::fs::File;
use std::io::Read;

use tracing::{debug, enabled, Level};

use crate::error::{IoOp, PmemError, Result};
use crate::metadata;

/// Copy checkpoint `version` of `window` under `root` into `dst`.
pub fn restore(root: &std::path::Path, window: &str, version: i32, dst: &mut [u8]) -> Result<()> {
    if version < 0 {
        return Err(PmemError::VersionNotFound {
            window: window.to_string(),
            version,
        });
    }
    let path = metadata::checkpoint_path(root, window, version);
    if !path.exists() {
        return Err(PmemError::CheckpointFileMissing(path));
    }
    let mut file = File::open(&path).map_err(PmemError::io_with(IoOp::Open, &path))?;
    file.read_exact(dst)
        .map_err(PmemError::io_with(IoOp::Read, &path))?;
    if enabled!(Level::DEBUG) {
        debug!(window, version, len = dst.len(), path = %path.display(), "checkpoint restored");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ErrorClass;
    use tempfile::tempdir;

    #[test]
    fn test_restore_copies_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".w-4"), [7u8; 32]).unwrap();
        let mut buf = [0u8; 32];
        restore(dir.path(), "w", 4, &mut buf).unwrap();
        assert_eq!(buf, [7u8; 32]);
    }

    #[test]
    fn test_restore_without_version() {
        let dir = tempdir().unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(
            restore(dir.path(), "w", -1, &mut buf),
            Err(PmemError::VersionNotFound { version: -1, .. })
        ));
    }

    #[test]
    fn test_restore_missing_file_is_general_error() {
        let dir = tempdir().unwrap();
        let mut buf = [0u8; 4];
        let err = restore(dir.path(), "w", 0, &mut buf).unwrap_err();
        assert!(matches!(err, PmemError::CheckpointFileMissing(_)));
        assert_eq!(err.class(), ErrorClass::General);
    }
}
