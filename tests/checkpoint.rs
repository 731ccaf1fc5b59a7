//! Integration tests for checkpoint commit, retention and restore

mod common;

use common::{checkpoint_file, commit_sequence, context, pmem_info, solo};
use oxipmem::comm::{Communicator, LocalCluster};
use oxipmem::info::keys;
use oxipmem::metadata::{self, RecordFlags, VersionLog, WindowDirectory};
use oxipmem::{ErrorClass, PmemError, Window};
use tempfile::tempdir;

#[test]
fn test_keep_all_restores_first_version() {
    let dir = tempdir().unwrap();
    let ctx = context(dir.path(), 0);
    let comm = solo();
    commit_sequence(&ctx, &comm, "W", 1024, 3, true);

    for version in 0..3 {
        assert!(checkpoint_file(ctx.root(), "W", version).exists());
    }

    let info = pmem_info("W", "checkpoint").with(keys::CHECKPOINT_VERSION, "0");
    let win = Window::allocate(&ctx, &comm, 1024, Some(&info)).unwrap();
    assert!(win.with_data(|data| data.iter().all(|&b| b == 0)).unwrap());
    assert_eq!(win.counters().last, 0);
    assert_eq!(win.counters().next, 1);
    assert_eq!(win.get_info().get(keys::CHECKPOINT_VERSION), Some("0"));
    win.free().unwrap();

    for version in 0..3 {
        assert!(checkpoint_file(ctx.root(), "W", version).exists());
    }
}

#[test]
fn test_keep_last_removes_previous_file() {
    let dir = tempdir().unwrap();
    let ctx = context(dir.path(), 0);
    let comm = solo();
    commit_sequence(&ctx, &comm, "W", 1024, 2, false);

    assert!(!checkpoint_file(ctx.root(), "W", 0).exists());
    assert!(checkpoint_file(ctx.root(), "W", 1).exists());
    let versions: Vec<i32> = ctx
        .get_versions("W")
        .unwrap()
        .iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(versions, vec![1]);
}

#[test]
fn test_round_trip_after_overwrite() {
    let dir = tempdir().unwrap();
    let ctx = context(dir.path(), 0);
    let comm = solo();
    let pattern = common::pattern(4096, 7);

    let info = pmem_info("grid", "expand");
    let win = Window::allocate(&ctx, &comm, pattern.len(), Some(&info)).unwrap();
    win.with_data(|data| data.copy_from_slice(&pattern)).unwrap();
    assert_eq!(win.fence_persist().unwrap(), Some(0));
    win.with_data(|data| data.fill(0xEE)).unwrap();
    win.persist().unwrap();
    win.free().unwrap();

    let info = pmem_info("grid", "checkpoint");
    let win = Window::allocate(&ctx, &comm, pattern.len(), Some(&info)).unwrap();
    assert_eq!(win.with_data(|data| data.to_vec()).unwrap(), pattern);
    win.free().unwrap();
}

#[test]
fn test_latest_version_restored_by_default() {
    let dir = tempdir().unwrap();
    let ctx = context(dir.path(), 0);
    let comm = solo();
    commit_sequence(&ctx, &comm, "W", 64, 3, true);

    let win = Window::allocate(&ctx, &comm, 64, Some(&pmem_info("W", "checkpoint"))).unwrap();
    assert!(win.with_data(|data| data.iter().all(|&b| b == 2)).unwrap());
    assert_eq!(win.counters().highest, 2);
    win.free().unwrap();
}

#[test]
fn test_overwrite_after_restoring_old_version() {
    let dir = tempdir().unwrap();
    let ctx = context(dir.path(), 0);
    let comm = solo();
    commit_sequence(&ctx, &comm, "W", 64, 3, true);

    let info = pmem_info("W", "checkpoint").with(keys::CHECKPOINT_VERSION, "0");
    let win = Window::allocate(&ctx, &comm, 64, Some(&info)).unwrap();
    win.with_data(|data| data.fill(9)).unwrap();
    assert_eq!(win.commit_checkpoint(true).unwrap(), Some(1));
    win.free().unwrap();

    let versions: Vec<i32> = ctx
        .get_versions("W")
        .unwrap()
        .iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(versions, vec![1, 2]);
    assert_eq!(
        std::fs::read(checkpoint_file(ctx.root(), "W", 1)).unwrap(),
        vec![9u8; 64]
    );
    let log = VersionLog::open(metadata::version_log_path(ctx.root(), "W")).unwrap();
    assert_eq!(log.sentinel_index().unwrap(), 3);
}

#[test]
fn test_append_after_restoring_old_version() {
    let dir = tempdir().unwrap();
    let ctx = context(dir.path(), 0);
    let comm = solo();
    commit_sequence(&ctx, &comm, "W", 64, 3, true);

    let info = pmem_info("W", "checkpoint")
        .with(keys::CHECKPOINT_VERSION, "0")
        .with(keys::APPEND_CHECKPOINTS, "true")
        .with(keys::KEEP_ALL_CHECKPOINTS, "true");
    let win = Window::allocate(&ctx, &comm, 64, Some(&info)).unwrap();
    assert_eq!(win.commit_checkpoint(false).unwrap(), Some(3));
    win.free().unwrap();

    assert_eq!(ctx.get_versions("W").unwrap().len(), 4);
    assert!(checkpoint_file(ctx.root(), "W", 3).exists());
}

#[test]
fn test_resize_purges_versions() {
    let dir = tempdir().unwrap();
    let ctx = context(dir.path(), 0);
    let comm = solo();
    commit_sequence(&ctx, &comm, "W", 1024, 2, true);
    let log_path = metadata::version_log_path(ctx.root(), "W");
    let capacity = VersionLog::open(&log_path).unwrap().capacity();

    let win = Window::allocate(&ctx, &comm, 2048, Some(&pmem_info("W", "expand"))).unwrap();
    assert_eq!(win.size(), 2048);
    win.free().unwrap();

    assert!(ctx.get_versions("W").unwrap().is_empty());
    let log = VersionLog::open(&log_path).unwrap();
    assert_eq!(log.sentinel_index().unwrap(), 0);
    assert!(log.capacity() >= capacity);
    assert!(!checkpoint_file(ctx.root(), "W", 0).exists());
    assert!(!checkpoint_file(ctx.root(), "W", 1).exists());

    let windows = ctx.list_windows().unwrap();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].size, 2048);
}

#[test]
fn test_version_log_never_shrinks() {
    let dir = tempdir().unwrap();
    let ctx = context(dir.path(), 0);
    let comm = solo();
    commit_sequence(&ctx, &comm, "W", 32, 4, true);

    let path = metadata::version_log_path(ctx.root(), "W");
    let before = std::fs::metadata(&path).unwrap().len();
    ctx.delete_version("W", 1).unwrap();
    ctx.delete_version("W", 1).unwrap();
    let after = std::fs::metadata(&path).unwrap().len();
    assert_eq!(before, after);

    let log = VersionLog::open(&path).unwrap();
    let records = log.records().unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(records[1].flags, RecordFlags::Deleted);
    assert!(records.iter().all(|r| r.flags != RecordFlags::NoObject));
    assert!(!checkpoint_file(ctx.root(), "W", 1).exists());

    assert!(matches!(
        ctx.delete_version("W", 10),
        Err(PmemError::VersionNotFound { version: 10, .. })
    ));
}

#[test]
fn test_checkpoint_open_errors() {
    let dir = tempdir().unwrap();
    let ctx = context(dir.path(), 0);
    let comm = solo();

    let err = Window::allocate(&ctx, &comm, 64, Some(&pmem_info("W", "checkpoint"))).unwrap_err();
    assert!(matches!(err, PmemError::WindowNotFound(_)));
    assert_eq!(err.class(), ErrorClass::Name);

    commit_sequence(&ctx, &comm, "W", 64, 1, false);
    let err = Window::allocate(&ctx, &comm, 128, Some(&pmem_info("W", "checkpoint"))).unwrap_err();
    assert!(matches!(
        err,
        PmemError::SizeMismatch {
            stored: 64,
            requested: 128,
            ..
        }
    ));

    let info = pmem_info("W", "checkpoint").with(keys::CHECKPOINT_VERSION, "5");
    let err = Window::allocate(&ctx, &comm, 64, Some(&info)).unwrap_err();
    assert_eq!(err.class(), ErrorClass::CheckpointVersion);
}

#[test]
fn test_checkpoint_without_versions() {
    let dir = tempdir().unwrap();
    let ctx = context(dir.path(), 0);
    let comm = solo();

    let info = pmem_info("W", "expand").with(keys::DONT_USE_TRANSACTIONS, "true");
    let win = Window::allocate(&ctx, &comm, 64, Some(&info)).unwrap();
    assert_eq!(win.commit_checkpoint(true).unwrap(), None);
    win.free().unwrap();

    let err = Window::allocate(&ctx, &comm, 64, Some(&pmem_info("W", "checkpoint"))).unwrap_err();
    assert!(matches!(err, PmemError::VersionNotFound { version: -1, .. }));
}

#[test]
fn test_global_checkpoint_agrees_on_minimum() {
    let dir = tempdir().unwrap();
    let base = dir.path();
    let results = LocalCluster::run(2, |comm| {
        let ctx = context(base, comm.rank());
        let info = pmem_info("W", "expand").with(keys::KEEP_ALL_CHECKPOINTS, "true");
        let win = Window::allocate(&ctx, &comm, 16, Some(&info)).unwrap();
        let commits = if comm.rank() == 0 { 3 } else { 2 };
        for byte in 0..commits {
            win.with_data(|data| data.fill(byte)).unwrap();
            win.commit_checkpoint(false).unwrap();
        }
        win.free().unwrap();

        let info = pmem_info("W", "checkpoint").with(keys::GLOBAL_CHECKPOINT, "true");
        let win = Window::allocate(&ctx, &comm, 16, Some(&info)).unwrap();
        let last = win.counters().last;
        let first = win.with_data(|data| data[0]).unwrap();
        win.free().unwrap();
        (last, first)
    });
    assert_eq!(results, vec![(1, 1), (1, 1)]);
}

#[test]
fn test_global_checkpoint_inconsistent() {
    let dir = tempdir().unwrap();
    let base = dir.path();
    let results = LocalCluster::run(2, |comm| {
        let ctx = context(base, comm.rank());
        let win = Window::allocate(&ctx, &comm, 16, Some(&pmem_info("W", "expand"))).unwrap();
        // Rank 0 keeps only version 1, rank 1 only version 0.
        let commits = if comm.rank() == 0 { 2 } else { 1 };
        for _ in 0..commits {
            win.commit_checkpoint(false).unwrap();
        }
        win.free().unwrap();

        let info = pmem_info("W", "checkpoint").with(keys::GLOBAL_CHECKPOINT, "true");
        match Window::allocate(&ctx, &comm, 16, Some(&info)) {
            Ok(_) => None,
            Err(err) => Some(err.class()),
        }
    });
    assert_eq!(
        results,
        vec![
            Some(ErrorClass::CheckpointVersion),
            Some(ErrorClass::CheckpointVersion)
        ]
    );
}

#[test]
fn test_directory_listing_after_delete() {
    let dir = tempdir().unwrap();
    let ctx = context(dir.path(), 0);
    let comm = solo();
    for (name, size) in [("1", 512), ("2", 1024), ("3", 2048)] {
        commit_sequence(&ctx, &comm, name, size, 1, false);
    }

    ctx.delete_window("2").unwrap();
    ctx.delete_window("2").unwrap();

    let listed: Vec<(String, u64)> = ctx
        .list_windows()
        .unwrap()
        .into_iter()
        .map(|w| (w.name, w.size))
        .collect();
    assert_eq!(listed, vec![("1".to_string(), 512), ("3".to_string(), 2048)]);

    let directory = WindowDirectory::open(metadata::directory_path(ctx.root())).unwrap();
    assert_eq!(directory.records().unwrap().len(), 3);
    assert_eq!(directory.sentinel_index().unwrap(), 3);
    assert!(!ctx.root().join("2").exists());
    assert!(!ctx.root().join(".2").exists());
    assert!(matches!(
        ctx.get_versions("2"),
        Err(PmemError::WindowNotFound(_))
    ));
    assert!(matches!(
        ctx.delete_window("missing"),
        Err(PmemError::WindowNotFound(_))
    ));
}

#[test]
fn test_delete_operations_are_idempotent() {
    let dir = tempdir().unwrap();
    let ctx = context(dir.path(), 0);
    let comm = solo();
    commit_sequence(&ctx, &comm, "W", 32, 2, true);

    ctx.delete_version("W", 0).unwrap();
    ctx.delete_version("W", 0).unwrap();
    assert!(!checkpoint_file(ctx.root(), "W", 0).exists());
    assert!(checkpoint_file(ctx.root(), "W", 1).exists());
    let versions: Vec<i32> = ctx
        .get_versions("W")
        .unwrap()
        .iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(versions, vec![1]);

    for version in [-1, 2] {
        let err = ctx.delete_version("W", version).unwrap_err();
        assert!(matches!(err, PmemError::VersionNotFound { version: v, .. } if v == version));
    }

    ctx.delete_window("W").unwrap();
    ctx.delete_window("W").unwrap();
    assert!(matches!(
        ctx.delete_version("W", 1),
        Err(PmemError::WindowNotFound(_))
    ));
    assert!(matches!(
        ctx.delete_version("never", 0),
        Err(PmemError::WindowNotFound(_))
    ));
    assert!(ctx.list_windows().unwrap().is_empty());
}
