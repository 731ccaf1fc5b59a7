//! Counter derivation on open

use tracing::{debug, warn};

use crate::checkpoint::CheckpointCounters;
use crate::comm::{Communicator, ReduceOp};
use crate::error::{PmemError, Result};
use crate::info::{WindowMode, WindowOptions};
use crate::metadata::{RecordFlags, VersionRecord};

/// Compute the counters of a window being opened with `opts` over its
/// version log `records`.
///
/// Collective when `opts.global_checkpoint` is set and no version was
/// requested: every rank of `comm` must call it.
pub fn derive_counters(
    comm: &dyn Communicator,
    opts: &WindowOptions,
    records: &[VersionRecord],
) -> Result<CheckpointCounters> {
    if opts.mode == WindowMode::Expand {
        return Ok(CheckpointCounters::fresh());
    }

    let count = records.len() as i32;
    let live_at = |version: i32| {
        usize::try_from(version)
            .ok()
            .and_then(|i| records.get(i))
            .is_some_and(|rec| rec.flags == RecordFlags::Exists)
    };

    let (last, next) = if opts.checkpoint_version == -1 {
        let mut last = records
            .iter()
            .rev()
            .find(|rec| rec.flags == RecordFlags::Exists)
            .map_or(-1, |rec| rec.version);

        if opts.global_checkpoint {
            let agreed = comm.all_reduce_i64(last as i64, ReduceOp::Min)? as i32;
            let available = comm.all_reduce_i64(live_at(agreed) as i64, ReduceOp::Min)?;
            if available == 0 {
                warn!(window = %opts.name, version = agreed, "global checkpoint unavailable");
                return Err(PmemError::InconsistentCheckpoint {
                    window: opts.name.clone(),
                    version: agreed,
                });
            }
            last = agreed;
        }
        (last, last + 1)
    } else {
        let requested = opts.checkpoint_version;
        if requested < 0 || requested >= count || !live_at(requested) {
            return Err(PmemError::VersionNotFound {
                window: opts.name.clone(),
                version: requested,
            });
        }
        let next = if opts.append_checkpoints { count } else { requested + 1 };
        (requested, next)
    };

    let counters = CheckpointCounters {
        next,
        last,
        highest: count - 1,
    };
    debug!(window = %opts.name, ?counters, "checkpoint counters derived");
    Ok(counters)
}
