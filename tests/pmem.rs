//! Windows on memory forced to persistent through `PMEM_IS_PMEM_FORCE`
//!
//! Every test in this binary sets the variable to the same value, so running
//! them in parallel is fine.

mod common;

use std::fs;

use common::{context, pattern, pmem_info, solo};
use oxipmem::device::{self, HeapArea, MappedFile, MemoryArea, PMEM_FORCE_ENV};
use oxipmem::info::{keys, Info};
use oxipmem::metadata;
use oxipmem::Window;
use tempfile::tempdir;

fn force_pmem() {
    std::env::set_var(PMEM_FORCE_ENV, "1");
}

#[test]
fn test_forced_detection() {
    force_pmem();
    assert_eq!(device::forced_pmem(), Some(true));
    assert!(HeapArea::zeroed(8).is_pmem());

    let dir = tempdir().unwrap();
    let path = dir.path().join("area");
    let mut area = MappedFile::open_and_map(&path, 128).unwrap();
    assert!(area.is_pmem());
    area.as_mut_slice()[64..].fill(0x11);
    area.persist(64, 64).unwrap();
    drop(area);
    let bytes = fs::read(&path).unwrap();
    assert!(bytes[..64].iter().all(|&b| b == 0));
    assert!(bytes[64..].iter().all(|&b| b == 0x11));
}

#[test]
fn test_allocated_window_flushes_and_reopens() {
    force_pmem();
    let dir = tempdir().unwrap();
    let ctx = context(dir.path(), 0);
    let comm = solo();
    let data = pattern(8192, 5);

    let win = Window::allocate(&ctx, &comm, data.len(), Some(&pmem_info("P", "expand"))).unwrap();
    let (base, len) = win.regions()[0];
    assert_eq!(len, data.len());
    assert!(win.region_is_pmem(base).unwrap());

    win.with_data(|mem| mem.copy_from_slice(&data)).unwrap();
    win.persist().unwrap();
    assert_eq!(fs::read(metadata::data_path(ctx.root(), "P")).unwrap(), data);
    assert_eq!(win.fence_persist().unwrap(), Some(0));
    win.with_data(|mem| mem.fill(0)).unwrap();
    win.free().unwrap();

    let win = Window::allocate(&ctx, &comm, data.len(), Some(&pmem_info("P", "checkpoint"))).unwrap();
    assert_eq!(win.with_data(|mem| mem.to_vec()).unwrap(), data);
    win.free().unwrap();
}

#[test]
fn test_attached_region_reports_pmem() {
    force_pmem();
    let dir = tempdir().unwrap();
    let ctx = context(dir.path(), 0);
    let comm = solo();
    let path = dir.path().join("region");

    let info = Info::new().with(keys::IS_PMEM, "true");
    let win = Window::create_dynamic(&ctx, &comm, Some(&info)).unwrap();
    let mapped = MappedFile::open_and_map(&path, 256).unwrap();
    let base = win.attach(Box::new(mapped)).unwrap();
    let heap = win.attach(Box::new(HeapArea::zeroed(16))).unwrap();
    assert!(win.region_is_pmem(base).unwrap());
    assert!(win.region_is_pmem(heap).unwrap());
    assert!(win.region_is_pmem(base + 1).is_err());

    win.with_region(base, |mem| mem.fill(0x5A)).unwrap();
    win.persist().unwrap();
    drop(win.free().unwrap());

    assert_eq!(fs::read(&path).unwrap(), vec![0x5A; 256]);
}
