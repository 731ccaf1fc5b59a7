//! Durable file primitives
//!
//! Open, pre-allocate and map files, and force mapped ranges to their medium.
//! True persistent memory is made durable with cache write-back plus a drain;
//! everything else goes through msync.

mod flush;
mod heap;
mod mapped_file;
mod traits;

pub use flush::{
    detect_flush_method, drain, flush, flush_method, forced_pmem, persist, FlushMethod,
    PMEM_FORCE_ENV,
};
pub use heap::HeapArea;
pub use mapped_file::MappedFile;
pub use traits::MemoryArea;

use std::fs::File;
use std::path::Path;

use crate::error::{IoOp, PmemError, Result};

/// Fsync a directory so entries created inside it survive a crash.
pub fn sync_dir(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    let handle = File::open(dir).map_err(PmemError::io_with(IoOp::Open, dir))?;
    handle
        .sync_all()
        .map_err(PmemError::io_with(IoOp::Sync, dir))
}
