//! Checkpoint engine
//!
//! A window's checkpoints are numbered slots of its version log, each with a
//! data file `.<name>-<version>`. Three counters track where the engine is:
//!
//! - `next`: slot the next commit writes
//! - `last`: most recently committed (or restored) version
//! - `highest`: highest slot ever used
//!
//! The counters live in memory only. They are derived from the version log
//! whenever a window is opened.

mod commit;
mod counters;
mod restore;

pub use commit::commit;
pub use counters::derive_counters;
pub use restore::restore;

/// Version counters of an open window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointCounters {
    /// Slot the next commit writes.
    pub next: i32,
    /// Most recently committed or restored version, `-1` when none.
    pub last: i32,
    /// Highest slot in use, `-1` when none.
    pub highest: i32,
}

impl CheckpointCounters {
    /// Counters of a window with an empty version log.
    pub const fn fresh() -> Self {
        Self {
            next: 0,
            last: -1,
            highest: -1,
        }
    }

    /// Whether the next commit writes a slot past every used one.
    pub fn creates_new_slot(&self) -> bool {
        self.next > self.highest
    }
}

impl Default for CheckpointCounters {
    fn default() -> Self {
        Self::fresh()
    }
}
