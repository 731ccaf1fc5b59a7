//! Commit protocol

use std::fs::File;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::checkpoint::CheckpointCounters;
use crate::comm::Communicator;
use crate::context::PmemContext;
use crate::device::sync_dir;
use crate::error::{IoOp, PmemError, Result};
use crate::metadata::{self, RecordFlags, VersionRecord};

/// Write `data` as a new checkpoint of `window` and advance `counters`.
///
/// The data file is durable, as is its directory entry, before the version
/// record turns live. Reusing a slot first marks it deleted. Unless
/// `keep_all`, the previously committed version is retired afterwards, behind
/// a barrier on `comm` when `barrier` is set.
///
/// Returns the committed version.
pub fn commit(
    ctx: &PmemContext,
    comm: &dyn Communicator,
    window: &str,
    data: &[u8],
    counters: &mut CheckpointCounters,
    keep_all: bool,
    barrier: bool,
) -> Result<i32> {
    let version = counters.next;
    let index = usize::try_from(version).map_err(|_| PmemError::VersionNotFound {
        window: window.to_string(),
        version,
    })?;
    let new_slot = counters.creates_new_slot();
    let previous = counters.last;

    let data_path = metadata::checkpoint_path(ctx.root(), window, version);
    debug!(window, version, new_slot, path = %data_path.display(), "writing checkpoint");
    let mut file = File::create(&data_path).map_err(PmemError::io_with(IoOp::Open, &data_path))?;

    let mut versions = ctx.version_log(window)?;
    versions.reserve(index + 2)?;
    if !new_slot {
        versions.write_flags(index, RecordFlags::Deleted)?;
    }

    file.write_all(data)
        .map_err(PmemError::io_with(IoOp::Write, &data_path))?;
    file.sync_all()
        .map_err(PmemError::io_with(IoOp::Sync, &data_path))?;
    drop(file);
    sync_dir(ctx.root())?;

    if new_slot {
        versions.write_sentinel(index + 1)?;
    }
    let record = VersionRecord {
        version,
        timestamp: unix_now(),
        flags: RecordFlags::Exists,
    };
    versions.write_payload(index, &record)?;
    versions.write_flags(index, RecordFlags::Exists)?;

    *counters = CheckpointCounters {
        next: version + 1,
        last: version,
        highest: counters.highest.max(version),
    };
    info!(window, version, "checkpoint committed");

    if !keep_all {
        if barrier {
            comm.barrier()?;
        }
        if previous != -1 {
            ctx.retire_version(window, &mut versions, previous)?;
            debug!(window, version = previous, "previous checkpoint retired");
        }
    }
    Ok(version)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalCluster;
    use crate::metadata::VersionLog;
    use tempfile::tempdir;

    fn setup(root: &std::path::Path) -> PmemContext {
        let ctx = PmemContext::set_root_path(root).unwrap();
        VersionLog::create(metadata::version_log_path(root, "w")).unwrap();
        ctx
    }

    #[test]
    fn test_commits_fill_dense_slots() {
        let dir = tempdir().unwrap();
        let ctx = setup(dir.path());
        let mut counters = CheckpointCounters::fresh();
        let comm = LocalCluster::communicators(1).remove(0);
        for byte in 0..3u8 {
            let v = commit(&ctx, comm.as_ref(), "w", &[byte; 16], &mut counters, true, false).unwrap();
            assert_eq!(v, byte as i32);
        }
        assert_eq!(
            counters,
            CheckpointCounters {
                next: 3,
                last: 2,
                highest: 2
            }
        );
        let versions = live_versions(&ctx, "w");
        assert_eq!(versions, vec![0, 1, 2]);
        assert_eq!(std::fs::read(dir.path().join(".w-1")).unwrap(), vec![1u8; 16]);
    }

    #[test]
    fn test_keep_last_retires_previous() {
        let dir = tempdir().unwrap();
        let ctx = setup(dir.path());
        let comm = LocalCluster::communicators(1).remove(0);
        let mut counters = CheckpointCounters::fresh();

        commit(&ctx, comm.as_ref(), "w", &[0; 8], &mut counters, false, true).unwrap();
        assert!(dir.path().join(".w-0").exists());
        commit(&ctx, comm.as_ref(), "w", &[1; 8], &mut counters, false, true).unwrap();
        assert!(!dir.path().join(".w-0").exists());
        assert!(dir.path().join(".w-1").exists());
        assert_eq!(live_versions(&ctx, "w"), vec![1]);
    }

    #[test]
    fn test_overwrite_marks_slot_deleted_first() {
        let dir = tempdir().unwrap();
        let ctx = setup(dir.path());
        let comm = LocalCluster::communicators(1).remove(0);
        let mut counters = CheckpointCounters::fresh();
        for byte in 0..3u8 {
            commit(&ctx, comm.as_ref(), "w", &[byte; 8], &mut counters, true, false).unwrap();
        }

        // Reopened at version 0 without append: the next commit reuses slot 1.
        let mut counters = CheckpointCounters {
            next: 1,
            last: 0,
            highest: 2,
        };
        let v = commit(&ctx, comm.as_ref(), "w", &[9; 8], &mut counters, false, false).unwrap();
        assert_eq!(v, 1);
        assert_eq!(
            counters,
            CheckpointCounters {
                next: 2,
                last: 1,
                highest: 2
            }
        );
        assert_eq!(live_versions(&ctx, "w"), vec![1, 2]);
        assert!(!dir.path().join(".w-0").exists());
        assert_eq!(std::fs::read(dir.path().join(".w-1")).unwrap(), vec![9u8; 8]);
        let log = ctx.version_log("w").unwrap();
        assert_eq!(log.records().unwrap().len(), 3);
    }

    fn live_versions(ctx: &PmemContext, window: &str) -> Vec<i32> {
        ctx.version_log(window)
            .unwrap()
            .live()
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect()
    }
}
