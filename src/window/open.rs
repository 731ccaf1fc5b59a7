//! Window creation and region management

use tracing::{debug, info};

use super::{MemoryRegion, Window, WindowFlavor};
use crate::checkpoint::{self, CheckpointCounters};
use crate::comm::{Comm, Communicator};
use crate::context::PmemContext;
use crate::device::{HeapArea, MappedFile};
use crate::error::{PmemError, Result};
use crate::info::{keys, Info, WindowMode, WindowOptions};
use crate::metadata::{self, VersionLog};

impl Window {
    /// Allocate a window of `size` bytes.
    ///
    /// Without `pmem_is_pmem` this is ordinary memory. A persistent window is
    /// registered in the root's directory (expand mode) or looked up there
    /// (checkpoint mode, contents restored from the selected version), then
    /// mapped from `<root>/<name>` unless `pmem_allocate_in_ram` is set.
    pub fn allocate(
        ctx: &PmemContext,
        comm: &Comm,
        size: usize,
        info: Option<&Info>,
    ) -> Result<Window> {
        let result = allocate_inner(ctx, comm, size, info);
        ctx.surface(comm.as_ref(), result)
    }

    /// Expose caller-provided memory. Only `pmem_is_pmem` is read from `info`.
    pub fn create(
        ctx: &PmemContext,
        comm: &Comm,
        region: MemoryRegion,
        info: Option<&Info>,
    ) -> Result<Window> {
        let result = plain_options(info).and_then(|options| {
            let win_comm = comm.duplicate()?;
            debug!(base = region.base(), len = region.len(), "window created");
            Ok(Window::from_parts(
                ctx,
                win_comm,
                WindowFlavor::Create,
                options,
                CheckpointCounters::fresh(),
                vec![region],
            ))
        });
        ctx.surface(comm.as_ref(), result)
    }

    /// Window without memory; regions are added with [`Window::attach`].
    pub fn create_dynamic(ctx: &PmemContext, comm: &Comm, info: Option<&Info>) -> Result<Window> {
        let result = plain_options(info).and_then(|options| {
            let win_comm = comm.duplicate()?;
            debug!("dynamic window created");
            Ok(Window::from_parts(
                ctx,
                win_comm,
                WindowFlavor::Dynamic,
                options,
                CheckpointCounters::fresh(),
                Vec::new(),
            ))
        });
        ctx.surface(comm.as_ref(), result)
    }

    /// Add `region` in front of the region list of a dynamic window.
    ///
    /// Returns the region's base address, which identifies it for
    /// [`Window::detach`] and [`Window::with_region`].
    pub fn attach(&self, region: MemoryRegion) -> Result<usize> {
        let result = if self.inner.flavor != WindowFlavor::Dynamic {
            Err(PmemError::InvalidArgument(
                "memory can only be attached to dynamic windows".into(),
            ))
        } else {
            let base = region.base();
            debug!(base, len = region.len(), pmem = region.is_pmem(), "attaching region");
            self.state().regions.insert(0, region);
            Ok(base)
        };
        self.surface(result)
    }

    /// Remove the region attached at `base` and hand it back.
    pub fn detach(&self, base: usize) -> Result<MemoryRegion> {
        let result = {
            let mut state = self.state();
            match state.regions.iter().position(|r| r.base() == base) {
                Some(index) => {
                    debug!(base, "region detached");
                    Ok(state.regions.remove(index))
                }
                None => Err(PmemError::RegionNotAttached { base }),
            }
        };
        self.surface(result)
    }
}

fn plain_options(info: Option<&Info>) -> Result<WindowOptions> {
    Ok(WindowOptions {
        is_pmem: info.is_some_and(|i| i.get_bool(keys::IS_PMEM)),
        ..WindowOptions::default()
    })
}

fn allocate_inner(
    ctx: &PmemContext,
    comm: &Comm,
    size: usize,
    info: Option<&Info>,
) -> Result<Window> {
    let options = WindowOptions::from_info(info)?;
    let win_comm = comm.duplicate()?;

    if !options.is_pmem {
        let region: MemoryRegion = Box::new(HeapArea::zeroed(size));
        return Ok(Window::from_parts(
            ctx,
            win_comm,
            WindowFlavor::Allocate,
            options,
            CheckpointCounters::fresh(),
            vec![region],
        ));
    }

    let counters = if options.is_volatile {
        CheckpointCounters::fresh()
    } else {
        prepare_metadata(ctx, win_comm.as_ref(), &options, size)?
    };

    let mut region: MemoryRegion = if options.allocate_in_ram {
        Box::new(HeapArea::zeroed(size))
    } else {
        Box::new(MappedFile::open_and_map(
            metadata::data_path(ctx.root(), &options.name),
            size,
        )?)
    };

    if !options.is_volatile && options.mode == WindowMode::Checkpoint {
        checkpoint::restore(ctx.root(), &options.name, counters.last, region.as_mut_slice())?;
    }

    info!(
        window = %options.name,
        size,
        mode = %options.mode,
        pmem = region.is_pmem(),
        version = counters.last,
        "window allocated"
    );
    Ok(Window::from_parts(
        ctx,
        win_comm,
        WindowFlavor::Allocate,
        options,
        counters,
        vec![region],
    ))
}

/// Bring the directory and version log in line with an allocate call and
/// derive the window's counters.
fn prepare_metadata(
    ctx: &PmemContext,
    comm: &dyn Communicator,
    options: &WindowOptions,
    size: usize,
) -> Result<CheckpointCounters> {
    let name = options.name.as_str();
    let mut directory = ctx.directory()?;
    let existing = directory.find_live(name)?;

    let versions = match (existing, options.mode) {
        (Some((_, record)), WindowMode::Checkpoint) => {
            if record.size != size as u64 {
                return Err(PmemError::SizeMismatch {
                    window: name.to_string(),
                    stored: record.size,
                    requested: size as u64,
                });
            }
            ctx.version_log(name)?
        }
        (Some((_, record)), WindowMode::Expand) => {
            let mut versions = ctx.version_log(name)?;
            ctx.purge_versions(name, &mut versions)?;
            directory.update_size(name, size as u64)?;
            debug!(window = name, from = record.size, to = size, "window resized");
            versions
        }
        (None, WindowMode::Checkpoint) => {
            return Err(PmemError::WindowNotFound(name.to_string()));
        }
        (None, WindowMode::Expand) => {
            let versions = VersionLog::create(metadata::version_log_path(ctx.root(), name))?;
            directory.register(name, size as u64)?;
            versions
        }
    };

    let records = versions.records()?;
    checkpoint::derive_counters(comm, options, &records)
}
