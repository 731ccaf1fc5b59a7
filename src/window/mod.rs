//! Persistent memory windows
//!
//! A [`Window`] couples immutable identity (name, mode, options it was opened
//! with) with modifiable state behind one lock: the live transactional and
//! retention settings, the checkpoint counters and the attached memory
//! regions. Clones of a handle share that state.
//!
//! Every public operation is collective over the window's communicator and
//! reports failures through [`PmemContext::surface`].

mod open;
mod sync;

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::checkpoint::{self, CheckpointCounters};
use crate::comm::Comm;
use crate::context::{remove_file, PmemContext};
use crate::device::MemoryArea;
use crate::error::{PmemError, Result};
use crate::info::{keys, Info, WindowMode, WindowOptions};
use crate::metadata;

pub use sync::Group;

/// Memory exposed through a window.
pub type MemoryRegion = Box<dyn MemoryArea>;

/// How the window's memory came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFlavor {
    /// Allocated or mapped by the window itself.
    Allocate,
    /// Caller-provided memory.
    Create,
    /// Empty at creation, populated by attach.
    Dynamic,
}

/// Handle to an open window.
#[derive(Clone)]
pub struct Window {
    inner: Arc<WindowInner>,
}

struct WindowInner {
    ctx: PmemContext,
    comm: Comm,
    flavor: WindowFlavor,
    options: WindowOptions,
    state: Mutex<WindowState>,
}

struct WindowState {
    transactional: bool,
    keep_all_checkpoints: bool,
    counters: CheckpointCounters,
    /// Most recently attached first.
    regions: Vec<MemoryRegion>,
    epoch: sync::Epoch,
}

impl Window {
    fn from_parts(
        ctx: &PmemContext,
        comm: Comm,
        flavor: WindowFlavor,
        options: WindowOptions,
        counters: CheckpointCounters,
        regions: Vec<MemoryRegion>,
    ) -> Self {
        let state = WindowState {
            transactional: options.transactional,
            keep_all_checkpoints: options.keep_all_checkpoints,
            counters,
            regions,
            epoch: sync::Epoch::default(),
        };
        Self {
            inner: Arc::new(WindowInner {
                ctx: ctx.clone(),
                comm,
                flavor,
                options,
                state: Mutex::new(state),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, WindowState> {
        self.inner.state.lock()
    }

    fn surface<T>(&self, result: Result<T>) -> Result<T> {
        self.inner.ctx.surface(self.inner.comm.as_ref(), result)
    }

    /// Whether the window manages persistent memory and its metadata.
    fn created_via_allocate(&self) -> bool {
        self.inner.flavor == WindowFlavor::Allocate && self.inner.options.is_pmem
    }

    /// Window name, empty for non-persistent windows.
    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    /// Communicator of the window.
    pub fn comm(&self) -> &Comm {
        &self.inner.comm
    }

    /// Rank of the caller in the window's group.
    pub fn rank(&self) -> usize {
        self.inner.comm.rank()
    }

    /// How the window's memory was obtained.
    pub fn flavor(&self) -> WindowFlavor {
        self.inner.flavor
    }

    /// Options the window was opened with.
    pub fn options(&self) -> &WindowOptions {
        &self.inner.options
    }

    /// Window mode.
    pub fn mode(&self) -> WindowMode {
        self.inner.options.mode
    }

    /// Whether the window is backed by persistent memory.
    pub fn is_pmem(&self) -> bool {
        self.inner.options.is_pmem
    }

    /// Whether durability is skipped.
    pub fn is_volatile(&self) -> bool {
        self.inner.options.is_volatile
    }

    /// Whether commits produce checkpoints.
    pub fn is_transactional(&self) -> bool {
        self.state().transactional
    }

    /// Whether every checkpoint is retained.
    pub fn keeps_all_checkpoints(&self) -> bool {
        self.state().keep_all_checkpoints
    }

    /// Current checkpoint counters.
    pub fn counters(&self) -> CheckpointCounters {
        self.state().counters
    }

    /// Size in bytes of all regions.
    pub fn size(&self) -> usize {
        self.state().regions.iter().map(|r| r.len()).sum()
    }

    /// Base address and length of every region, most recently attached first.
    pub fn regions(&self) -> Vec<(usize, usize)> {
        self.state()
            .regions
            .iter()
            .map(|r| (r.base(), r.len()))
            .collect()
    }

    /// Whether the region attached at `base` lives on persistent memory.
    pub fn region_is_pmem(&self, base: usize) -> Result<bool> {
        self.state()
            .regions
            .iter()
            .find(|r| r.base() == base)
            .map(|r| r.is_pmem())
            .ok_or(PmemError::RegionNotAttached { base })
    }

    /// Run `f` over the window's own memory.
    ///
    /// Dynamic windows have no memory of their own; use
    /// [`Window::with_region`].
    pub fn with_data<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        if self.inner.flavor == WindowFlavor::Dynamic {
            return Err(PmemError::InvalidArgument(
                "dynamic windows have no base memory".into(),
            ));
        }
        let mut state = self.state();
        let region = state
            .regions
            .last_mut()
            .ok_or_else(|| PmemError::InvalidArgument("window has been freed".into()))?;
        Ok(f(region.as_mut_slice()))
    }

    /// Run `f` over the region attached at `base`.
    pub fn with_region<R>(&self, base: usize, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let mut state = self.state();
        let region = state
            .regions
            .iter_mut()
            .find(|r| r.base() == base)
            .ok_or(PmemError::RegionNotAttached { base })?;
        Ok(f(region.as_mut_slice()))
    }

    /// Force the window's memory durable.
    ///
    /// A no-op unless the window is persistent, non-volatile and mapped.
    pub fn persist(&self) -> Result<()> {
        let result = self.persist_regions();
        self.surface(result)
    }

    fn persist_regions(&self) -> Result<()> {
        let opts = &self.inner.options;
        if !opts.is_pmem || opts.is_volatile || opts.allocate_in_ram {
            return Ok(());
        }
        let state = self.state();
        for region in &state.regions {
            debug!(
                base = region.base(),
                len = region.len(),
                pmem = region.is_pmem(),
                "persisting region"
            );
            region.persist_all()?;
        }
        Ok(())
    }

    /// Produce a checkpoint of the window's memory.
    ///
    /// A no-op returning `None` unless the window is persistent, non-volatile
    /// and transactional. With `barrier_before_retire` every rank has made its
    /// new version durable before any rank retires its previous one.
    pub fn commit_checkpoint(&self, barrier_before_retire: bool) -> Result<Option<i32>> {
        let result = self.commit_inner(barrier_before_retire);
        self.surface(result)
    }

    fn commit_inner(&self, barrier: bool) -> Result<Option<i32>> {
        let opts = &self.inner.options;
        let mut state = self.state();
        if !opts.is_pmem || opts.is_volatile || !state.transactional {
            return Ok(None);
        }
        let WindowState {
            keep_all_checkpoints,
            counters,
            regions,
            ..
        } = &mut *state;
        let data = regions
            .last()
            .ok_or_else(|| PmemError::InvalidArgument("window has no memory".into()))?;
        let version = checkpoint::commit(
            &self.inner.ctx,
            self.inner.comm.as_ref(),
            &opts.name,
            data.as_slice(),
            counters,
            *keep_all_checkpoints,
            barrier,
        )?;
        Ok(Some(version))
    }

    /// Update the transactional and retention settings.
    ///
    /// Only windows allocated as persistent react; others ignore `info`.
    pub fn set_info(&self, info: &Info) -> Result<()> {
        if !self.created_via_allocate() {
            return Ok(());
        }
        let mut state = self.state();
        state.transactional = !info.get_bool(keys::DONT_USE_TRANSACTIONS);
        if state.transactional {
            state.keep_all_checkpoints = info.get_bool(keys::KEEP_ALL_CHECKPOINTS);
        }
        debug!(
            window = %self.name(),
            transactional = state.transactional,
            keep_all = state.keep_all_checkpoints,
            "window info updated"
        );
        Ok(())
    }

    /// Options currently in effect.
    pub fn get_info(&self) -> Info {
        let opts = &self.inner.options;
        let flag = |b: bool| if b { "true" } else { "false" };
        let mut info = Info::new();
        info.set(keys::IS_PMEM, flag(opts.is_pmem));
        if !self.created_via_allocate() {
            return info;
        }

        let state = self.state();
        info.set(keys::ALLOCATE_IN_RAM, flag(opts.allocate_in_ram));
        info.set(keys::DONT_USE_TRANSACTIONS, flag(!state.transactional));
        if state.transactional {
            info.set(keys::KEEP_ALL_CHECKPOINTS, flag(state.keep_all_checkpoints));
        }
        if opts.mode == WindowMode::Checkpoint {
            info.set(keys::CHECKPOINT_VERSION, state.counters.last.to_string());
            info.set(keys::APPEND_CHECKPOINTS, flag(opts.append_checkpoints));
            info.set(keys::GLOBAL_CHECKPOINT, flag(opts.global_checkpoint));
        }
        info.set(keys::NAME, opts.name.as_str());
        info.set(keys::MODE, opts.mode.as_str());
        info.set(keys::VOLATILE, flag(opts.is_volatile));
        info
    }

    /// Release the window.
    ///
    /// Memory the window allocated is unmapped (and for volatile windows its
    /// data file removed). Caller-provided or attached regions are handed back.
    pub fn free(self) -> Result<Vec<MemoryRegion>> {
        let result = self.free_inner();
        self.surface(result)
    }

    fn free_inner(&self) -> Result<Vec<MemoryRegion>> {
        self.inner.comm.barrier()?;
        let regions = std::mem::take(&mut self.state().regions);
        if !self.created_via_allocate() {
            return Ok(regions);
        }

        drop(regions);
        let opts = &self.inner.options;
        if opts.is_volatile && !opts.allocate_in_ram {
            let path = metadata::data_path(self.inner.ctx.root(), &opts.name);
            remove_file(&path)?;
            debug!(window = %opts.name, path = %path.display(), "volatile data removed");
        }
        info!(window = %opts.name, "window freed");
        Ok(Vec::new())
    }
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("name", &self.inner.options.name)
            .field("flavor", &self.inner.flavor)
            .field("mode", &self.inner.options.mode)
            .field("rank", &self.inner.comm.rank())
            .finish()
    }
}
