//! oxipmem - crash-consistent persistent-memory windows for SPMD process groups
//!
//! Every rank of a process group maps named memory windows from files under
//! its own root path. The library provides:
//! - **Windows**: one-sided memory regions with fence and post/start/
//!   complete/wait epochs, optionally backed by persistent memory
//! - **Checkpoints**: versioned, crash-consistent snapshots of a window with
//!   a sentinel-terminated append-only version log
//! - **File I/O**: files sharded over one cache manager per node, with
//!   write-ahead records for replay after a crash
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use oxipmem::prelude::*;
//!
//! LocalCluster::run(4, |comm| {
//!     let ctx = PmemContext::for_rank("/mnt/pmem0/app", comm.rank())?;
//!     let info = Info::new()
//!         .with(keys::IS_PMEM, "true")
//!         .with(keys::NAME, "grid")
//!         .with(keys::MODE, "expand");
//!     let win = Window::allocate(&ctx, &comm, 1 << 20, Some(&info))?;
//!     win.with_data(|data| data.fill(1))?;
//!     win.fence_persist()?;
//!     win.free()
//! });
//! ```

#![warn(missing_docs)]

pub mod checkpoint;
pub mod comm;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod info;
pub mod io;
pub mod metadata;
pub mod status;
pub mod window;

// Re-exports for convenience
pub use comm::{Comm, Communicator, LocalCluster};
pub use config::{ConfigError, OxipmemConfig};
pub use context::{ErrorMode, PmemContext};
pub use error::{PmemError, Result};
pub use info::{Info, IoMode, WindowMode};
pub use io::PmemFile;
pub use status::ErrorClass;
pub use window::{MemoryRegion, Window, WindowFlavor};

/// Constants used throughout the library
pub mod constants {
    /// Size of a cache line in bytes
    pub const CACHE_LINE_BYTES: usize = 64;

    /// Longest accepted root path in bytes
    pub const MAX_ROOT_PATH: usize = 4096;
}

/// Utility for size literals (e.g., 1_GiB)
pub mod size {
    /// 1 KiB in bytes
    pub const KIB: u64 = 1024;
    /// 1 MiB in bytes
    pub const MIB: u64 = 1024 * KIB;
    /// 1 GiB in bytes
    pub const GIB: u64 = 1024 * MIB;
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::comm::{Comm, Communicator, LocalCluster};
    pub use crate::context::{ErrorMode, PmemContext};
    pub use crate::error::{PmemError, Result};
    pub use crate::info::{keys, Info, IoMode, WindowMode};
    pub use crate::io::PmemFile;
    pub use crate::window::{MemoryRegion, Window};
}
