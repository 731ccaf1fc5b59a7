//! Partition of a file into per-node cache shards

use crate::error::{PmemError, Result};

/// Contiguous piece of a request that falls into one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Index of the owning shard (and its cache manager).
    pub shard: usize,
    /// Offset inside the shard.
    pub offset: u64,
    /// Length in bytes.
    pub len: u64,
}

/// Division of a file of `file_size` bytes among `nodes` shards.
///
/// Every shard holds `file_size / nodes` bytes except the last, which also
/// takes the remainder up to end of file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardLayout {
    file_size: u64,
    nodes: usize,
    cache_size: u64,
}

impl ShardLayout {
    /// Layout for `nodes` shards; fails when `nodes` is zero.
    pub fn new(file_size: u64, nodes: usize) -> Result<Self> {
        if nodes == 0 {
            return Err(PmemError::InvalidArgument(
                "a distributed file needs at least one cache manager".into(),
            ));
        }
        Ok(Self {
            file_size,
            nodes,
            cache_size: file_size / nodes as u64,
        })
    }

    /// Total size of the file.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of shards.
    pub fn nodes(&self) -> usize {
        self.nodes
    }

    /// Nominal shard size.
    pub fn cache_size(&self) -> u64 {
        self.cache_size
    }

    /// File offset where `shard` starts.
    pub fn shard_start(&self, shard: usize) -> u64 {
        shard as u64 * self.cache_size
    }

    /// File offset where `shard` ends (exclusive).
    pub fn shard_end(&self, shard: usize) -> u64 {
        if shard + 1 >= self.nodes {
            self.file_size
        } else {
            (shard as u64 + 1) * self.cache_size
        }
    }

    /// Bytes held by `shard`.
    pub fn shard_len(&self, shard: usize) -> u64 {
        self.shard_end(shard) - self.shard_start(shard)
    }

    /// Shard holding the byte at `offset`.
    pub fn shard_of(&self, offset: u64) -> usize {
        if self.cache_size == 0 {
            return self.nodes - 1;
        }
        ((offset / self.cache_size) as usize).min(self.nodes - 1)
    }

    /// Decompose `[offset, offset + len)` into per-shard segments.
    ///
    /// The first segment starts mid-shard, the middle ones cover whole shards
    /// and the last one ends mid-shard. Ranges past end of file are rejected.
    pub fn split(&self, offset: u64, len: u64) -> Result<Vec<Segment>> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.file_size)
            .ok_or_else(|| {
                PmemError::InvalidArgument(format!(
                    "range {offset}+{len} exceeds file size {}",
                    self.file_size
                ))
            })?;

        let mut segments = Vec::new();
        let mut pos = offset;
        let mut shard = self.shard_of(offset);
        while pos < end {
            let take = end.min(self.shard_end(shard)) - pos;
            segments.push(Segment {
                shard,
                offset: pos - self.shard_start(shard),
                len: take,
            });
            pos += take;
            shard += 1;
        }
        Ok(segments)
    }
}
