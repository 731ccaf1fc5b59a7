//! Integration tests for distributed cache and pmem-aware files

mod common;

use std::fs;

use common::{pattern, solo, zero_file};
use oxipmem::comm::{Communicator, LocalCluster};
use oxipmem::info::{keys, Info};
use oxipmem::io::RecoveryRecord;
use oxipmem::{ErrorClass, ErrorMode, IoMode, PmemError, PmemFile};
use tempfile::tempdir;

fn cache_info(pmem_path: &std::path::Path) -> Info {
    Info::new().with(keys::PMEM_PATH, pmem_path.to_string_lossy())
}

#[test]
fn test_distributed_write_spans_shards() {
    let dir = tempdir().unwrap();
    let pmem = dir.path().join("pmem");
    fs::create_dir(&pmem).unwrap();
    let backing = zero_file(dir.path(), "data.bin", 300);
    let data = pattern(150, 3);

    let hosts = ["n0", "n1", "n2", "n0"];
    let (backing_ref, pmem_ref, data_ref) = (&backing, &pmem, &data);
    let results = LocalCluster::run_on_hosts(&hosts, |comm| {
        let info = cache_info(pmem_ref);
        let mut file = PmemFile::open_with(&comm, backing_ref, Some(&info), ErrorMode::Return).unwrap();
        assert_eq!(file.io_mode(), IoMode::DistributedCache);
        assert_eq!(file.size(), 300);
        let distributed = file.as_distributed().unwrap();
        assert_eq!(distributed.layout().nodes(), 3);
        assert_eq!(distributed.layout().cache_size(), 100);
        let is_manager = distributed.is_manager();

        if comm.rank() == 3 {
            file.write_at(50, data_ref).unwrap();
        }
        file.sync().unwrap();

        let mut whole = vec![0u8; 300];
        file.read_at(0, &mut whole).unwrap();
        file.close().unwrap();
        (is_manager, whole)
    });

    let mut expected = vec![0u8; 300];
    expected[50..200].copy_from_slice(&data);
    for (rank, (is_manager, whole)) in results.into_iter().enumerate() {
        assert_eq!(is_manager, rank < 3, "rank {rank}");
        assert_eq!(whole, expected, "rank {rank}");
    }
    assert_eq!(fs::read(&backing).unwrap(), expected);
    assert_eq!(fs::read_dir(&pmem).unwrap().count(), 0);
}

#[test]
fn test_sync_reaches_backing_file_before_close() {
    let dir = tempdir().unwrap();
    let backing = zero_file(dir.path(), "data.bin", 64);
    let (backing_ref, pmem_ref) = (&backing, &dir.path().to_path_buf());
    LocalCluster::run_on_hosts(&["a", "b"], |comm| {
        let info = cache_info(pmem_ref);
        let mut file = PmemFile::open_with(&comm, backing_ref, Some(&info), ErrorMode::Return).unwrap();
        let offset = comm.rank() as u64 * 32;
        file.write_at(offset, &[comm.rank() as u8 + 1; 32]).unwrap();
        file.sync().unwrap();

        let on_disk = fs::read(backing_ref).unwrap();
        assert_eq!(&on_disk[..32], &[1u8; 32]);
        assert_eq!(&on_disk[32..], &[2u8; 32]);
        file.close().unwrap();
    });
}

#[test]
fn test_write_past_end_rejected() {
    let dir = tempdir().unwrap();
    let backing = zero_file(dir.path(), "data.bin", 16);
    let comm = solo();
    let mut file = PmemFile::open_with(
        &comm,
        &backing,
        Some(&cache_info(dir.path())),
        ErrorMode::Return,
    )
    .unwrap();

    let err = file.write_at(10, &[1u8; 7]).unwrap_err();
    assert!(matches!(err, PmemError::InvalidArgument(_)));
    let mut buf = [0u8; 4];
    assert!(file.read_at(14, &mut buf).is_err());

    let err = file.set_size(32).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Unsupported);
    file.close().unwrap();
}

#[test]
fn test_failure_recovery_leaves_no_records() {
    let dir = tempdir().unwrap();
    let backing = zero_file(dir.path(), "data.bin", 32);
    let comm = solo();
    let info = cache_info(dir.path()).with(keys::FAILURE_RECOVERY, "true");
    let mut file = PmemFile::open_with(&comm, &backing, Some(&info), ErrorMode::Return).unwrap();

    file.write_at(0, b"durable").unwrap();
    let cache_dir = file.as_distributed().unwrap().cache_dir().to_path_buf();
    let names: Vec<String> = fs::read_dir(&cache_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["cache.0".to_string()]);

    file.close().unwrap();
    assert!(!cache_dir.exists());
    assert_eq!(&fs::read(&backing).unwrap()[..7], b"durable");
}

#[test]
fn test_recovery_replays_pending_writes() {
    let dir = tempdir().unwrap();
    let backing = zero_file(dir.path(), "data.bin", 64);
    let previous = dir.path().join("mpi_io_pmem_crashed");
    fs::create_dir(&previous).unwrap();
    fs::write(previous.join("cache.0"), [0u8; 64]).unwrap();
    RecoveryRecord::create(&previous, 10, b"recovered").unwrap();

    let comm = solo();
    let info = Info::new()
        .with(keys::DO_RECOVERY, "true")
        .with(keys::DO_RECOVERY_PATH, previous.to_string_lossy());
    let file = PmemFile::open_with(&comm, &backing, Some(&info), ErrorMode::Return).unwrap();

    let mut buf = [0u8; 9];
    file.read_at(10, &mut buf).unwrap();
    assert_eq!(&buf, b"recovered");
    let leftover = fs::read_dir(&previous).unwrap().count();
    assert_eq!(leftover, 1);

    file.close().unwrap();
    assert_eq!(&fs::read(&backing).unwrap()[10..19], b"recovered");
}

#[test]
fn test_recovery_requires_shard_files() {
    let dir = tempdir().unwrap();
    let backing = zero_file(dir.path(), "data.bin", 64);
    let previous = dir.path().join("empty");
    fs::create_dir(&previous).unwrap();

    let comm = solo();
    let info = Info::new()
        .with(keys::DO_RECOVERY, "true")
        .with(keys::DO_RECOVERY_PATH, previous.to_string_lossy());
    let err = PmemFile::open_with(&comm, &backing, Some(&info), ErrorMode::Return).unwrap_err();
    assert_eq!(err.class(), ErrorClass::FileOpen);
}

#[test]
fn test_wrong_io_mode() {
    let dir = tempdir().unwrap();
    let backing = zero_file(dir.path(), "data.bin", 8);
    let comm = solo();
    let info = Info::new().with(keys::IO_MODE, "2");
    let err = PmemFile::open_with(&comm, &backing, Some(&info), ErrorMode::Return).unwrap_err();
    assert!(matches!(err, PmemError::WrongIoMode(_)));
    assert_eq!(err.class(), ErrorClass::WrongMode);
}

#[test]
fn test_pmem_aware_file() {
    let dir = tempdir().unwrap();
    let backing = zero_file(dir.path(), "aware.bin", 128);
    let backing_ref = &backing;
    let results = LocalCluster::run(2, |comm| {
        let info = Info::new().with(keys::IO_MODE, "1");
        let mut file = PmemFile::open_with(&comm, backing_ref, Some(&info), ErrorMode::Return).unwrap();
        assert_eq!(file.io_mode(), IoMode::PmemAware);
        assert!(file.as_distributed().is_none());

        let offset = comm.rank() as u64 * 64;
        file.write_at_all(offset, &[comm.rank() as u8 + 5; 64]).unwrap();
        file.sync().unwrap();
        comm.barrier().unwrap();

        let mut whole = vec![0u8; 128];
        file.read_at_all(0, &mut whole).unwrap();
        assert_eq!(file.set_size(0).unwrap_err().class(), ErrorClass::Unsupported);
        file.close().unwrap();
        whole
    });

    let mut expected = vec![5u8; 64];
    expected.extend_from_slice(&[6u8; 64]);
    for whole in results {
        assert_eq!(whole, expected);
    }
    assert_eq!(fs::read(&backing).unwrap(), expected);
}
