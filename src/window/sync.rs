//! Synchronization epochs and their persisting variants
//!
//! Fence is a barrier over the window group. Post, start, complete and wait
//! exchange tokens with the ranks of an explicit group: a target posts to
//! its origins, an origin's start waits for every post, complete sends a
//! token back and the target's wait collects one from every origin.
//!
//! The `_persist` variants make the window durable and commit a checkpoint at
//! the point where the epoch guarantees no access is in flight.

use tracing::{debug, trace};

use super::Window;
use crate::comm::Tag;
use crate::error::{PmemError, Result};

/// Ranks of the window group taking part in an epoch.
pub type Group = [usize];

const POST: Tag = Tag(Tag::RESERVED_BASE + 16);
const COMPLETE: Tag = Tag(Tag::RESERVED_BASE + 17);

/// Open epochs of one rank.
#[derive(Debug, Default)]
pub(super) struct Epoch {
    /// Targets of the open access epoch.
    access: Option<Vec<usize>>,
    /// Origins of the open exposure epoch that have not completed yet.
    exposure: Option<Vec<usize>>,
}

impl Window {
    fn check_group(&self, group: &Group) -> Result<()> {
        let size = self.inner.comm.size();
        match group.iter().find(|&&rank| rank >= size) {
            Some(rank) => Err(PmemError::InvalidArgument(format!(
                "rank {rank} outside window group of {size}"
            ))),
            None => Ok(()),
        }
    }

    /// Close and open a fence epoch.
    pub fn fence(&self) -> Result<()> {
        let result = self.inner.comm.barrier().map_err(PmemError::from);
        self.surface(result)
    }

    /// Fence, persist and commit a checkpoint with a barrier before
    /// retiring the previous version.
    pub fn fence_persist(&self) -> Result<Option<i32>> {
        self.fence()?;
        self.persist()?;
        self.commit_checkpoint(true)
    }

    /// Open an exposure epoch for the origins in `group`.
    pub fn post(&self, group: &Group) -> Result<()> {
        let result = self.post_inner(group);
        self.surface(result)
    }

    fn post_inner(&self, group: &Group) -> Result<()> {
        self.check_group(group)?;
        let mut state = self.state();
        if state.epoch.exposure.is_some() {
            return Err(PmemError::InvalidArgument("exposure epoch already open".into()));
        }
        for &origin in group {
            self.inner.comm.send(origin, POST, Vec::new())?;
        }
        state.epoch.exposure = Some(group.to_vec());
        debug!(rank = self.rank(), ?group, "exposure epoch posted");
        Ok(())
    }

    /// Persist and commit, then open an exposure epoch.
    pub fn post_persist(&self, group: &Group) -> Result<Option<i32>> {
        self.persist()?;
        let version = self.commit_checkpoint(false)?;
        self.post(group)?;
        Ok(version)
    }

    /// Open an access epoch to the targets in `group`, waiting until each
    /// has posted.
    pub fn start(&self, group: &Group) -> Result<()> {
        let result = self.start_inner(group);
        self.surface(result)
    }

    fn start_inner(&self, group: &Group) -> Result<()> {
        self.check_group(group)?;
        let mut state = self.state();
        if state.epoch.access.is_some() {
            return Err(PmemError::InvalidArgument("access epoch already open".into()));
        }
        for &target in group {
            self.inner.comm.recv(Some(target), &[POST])?;
        }
        state.epoch.access = Some(group.to_vec());
        debug!(rank = self.rank(), ?group, "access epoch started");
        Ok(())
    }

    /// Close the access epoch.
    pub fn complete(&self) -> Result<()> {
        let result = self.complete_inner();
        self.surface(result)
    }

    fn complete_inner(&self) -> Result<()> {
        let mut state = self.state();
        let targets = state
            .epoch
            .access
            .take()
            .ok_or_else(|| PmemError::InvalidArgument("no access epoch open".into()))?;
        for target in targets {
            self.inner.comm.send(target, COMPLETE, Vec::new())?;
        }
        Ok(())
    }

    /// Block until every origin of the exposure epoch has completed.
    pub fn wait(&self) -> Result<()> {
        let result = self.wait_inner();
        self.surface(result)
    }

    fn wait_inner(&self) -> Result<()> {
        let mut state = self.state();
        let pending = state
            .epoch
            .exposure
            .take()
            .ok_or_else(|| PmemError::InvalidArgument("no exposure epoch open".into()))?;
        for origin in pending {
            self.inner.comm.recv(Some(origin), &[COMPLETE])?;
        }
        debug!(rank = self.rank(), "exposure epoch closed");
        Ok(())
    }

    /// Wait, then persist and commit.
    pub fn wait_persist(&self) -> Result<Option<i32>> {
        self.wait()?;
        self.persist()?;
        self.commit_checkpoint(false)
    }

    /// Non-blocking [`Window::wait`]; `true` once the epoch has closed.
    pub fn test(&self) -> Result<bool> {
        let result = self.test_inner();
        self.surface(result)
    }

    fn test_inner(&self) -> Result<bool> {
        let mut state = self.state();
        let pending = state
            .epoch
            .exposure
            .as_mut()
            .ok_or_else(|| PmemError::InvalidArgument("no exposure epoch open".into()))?;
        let mut still_pending = Vec::with_capacity(pending.len());
        for &origin in pending.iter() {
            if self.inner.comm.try_recv(Some(origin), &[COMPLETE])?.is_none() {
                still_pending.push(origin);
            }
        }
        trace!(rank = self.rank(), pending = still_pending.len(), "exposure epoch tested");
        if still_pending.is_empty() {
            state.epoch.exposure = None;
            return Ok(true);
        }
        *pending = still_pending;
        Ok(false)
    }

    /// [`Window::test`], persisting and committing once the epoch closed.
    pub fn test_persist(&self) -> Result<bool> {
        let done = self.test()?;
        if done {
            self.persist()?;
            self.commit_checkpoint(false)?;
        }
        Ok(done)
    }
}
