//! Shared helpers for window, checkpoint and file tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use oxipmem::comm::{Comm, LocalCluster};
use oxipmem::info::{keys, Info};
use oxipmem::{ErrorMode, PmemContext, Window};

/// Single-rank communicator.
pub fn solo() -> Comm {
    LocalCluster::communicators(1).remove(0)
}

/// Context for `rank` below `base`, returning errors instead of aborting.
pub fn context(base: &Path, rank: usize) -> PmemContext {
    PmemContext::for_rank(base, rank)
        .unwrap()
        .with_error_mode(ErrorMode::Return)
}

/// Options for a persistent window.
pub fn pmem_info(name: &str, mode: &str) -> Info {
    Info::new()
        .with(keys::IS_PMEM, "true")
        .with(keys::NAME, name)
        .with(keys::MODE, mode)
}

/// Allocate `name` in expand mode, fill it with `0..commits` one commit
/// per byte value, then free it.
pub fn commit_sequence(ctx: &PmemContext, comm: &Comm, name: &str, size: usize, commits: u8, keep_all: bool) {
    let info = pmem_info(name, "expand").with(
        keys::KEEP_ALL_CHECKPOINTS,
        if keep_all { "true" } else { "false" },
    );
    let win = Window::allocate(ctx, comm, size, Some(&info)).unwrap();
    for byte in 0..commits {
        win.with_data(|data| data.fill(byte)).unwrap();
        assert_eq!(win.commit_checkpoint(false).unwrap(), Some(byte as i32));
    }
    win.free().unwrap();
}

/// Path of checkpoint `version` of `name` under `root`.
pub fn checkpoint_file(root: &Path, name: &str, version: i32) -> PathBuf {
    root.join(format!(".{name}-{version}"))
}

/// Backing file of `len` zero bytes.
pub fn zero_file(dir: &Path, name: &str, len: usize) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, vec![0u8; len]).unwrap();
    path
}

/// Deterministic byte pattern.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}
