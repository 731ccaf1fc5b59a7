//! Collective communication substrate
//!
//! Every distributed step in this crate goes through [`Communicator`]:
//! point-to-point messages with tags, a selective (source and tag filtered)
//! receive, and communicator split. Barrier, broadcast, gather and reductions
//! are provided on top of point-to-point as default methods, so an
//! implementation only supplies the transport.
//!
//! [`LocalCluster`] runs a whole process group as threads of one process.

mod local;
mod node;

pub use local::LocalCluster;
pub use node::{djb2_hash, host_hash, node_rank};

use std::fmt;
use std::sync::Arc;

/// Shared handle to a communicator.
pub type Comm = Arc<dyn Communicator>;

/// Errors raised by the communication layer.
#[derive(Debug, thiserror::Error)]
pub enum CommError {
    /// Destination or source rank outside the group.
    #[error("rank {rank} out of range for group of {size}")]
    RankOutOfRange {
        /// Offending rank.
        rank: usize,
        /// Group size.
        size: usize,
    },
    /// Payload could not be decoded.
    #[error("malformed message with tag {tag}: {reason}")]
    Malformed {
        /// Tag of the message.
        tag: Tag,
        /// Decoder message.
        reason: String,
    },
    /// The peer group went away.
    #[error("communicator disconnected")]
    Disconnected,
}

/// Message tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub u32);

impl Tag {
    /// First tag reserved for collective operations.
    pub const RESERVED_BASE: u32 = 1 << 30;
    /// Gather contribution.
    pub const GATHER: Tag = Tag(Self::RESERVED_BASE + 1);
    /// Broadcast payload.
    pub const BROADCAST: Tag = Tag(Self::RESERVED_BASE + 2);

    /// Whether the tag belongs to the reserved collective range.
    pub const fn is_reserved(&self) -> bool {
        self.0 >= Self::RESERVED_BASE
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Rank of the sender within the communicator.
    pub source: usize,
    /// Tag the message was sent with.
    pub tag: Tag,
    /// Message body.
    pub payload: Vec<u8>,
}

/// Reduction applied by [`Communicator::all_reduce_i64`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Minimum
    Min,
    /// Maximum
    Max,
    /// Sum
    Sum,
}

impl ReduceOp {
    fn apply(&self, a: i64, b: i64) -> i64 {
        match self {
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
            ReduceOp::Sum => a.wrapping_add(b),
        }
    }
}

/// A group of ranks that can exchange messages.
///
/// All collective methods must be called by every rank of the group in the
/// same order. Messages between one pair of ranks with the same tag are
/// delivered in send order.
pub trait Communicator: Send + Sync {
    /// Rank of the calling process.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Name of the node the calling process runs on.
    fn processor_name(&self) -> String;

    /// Send `payload` to `dest`. Never blocks on the receiver.
    fn send(&self, dest: usize, tag: Tag, payload: Vec<u8>) -> Result<(), CommError>;

    /// Block until a message matching `source` (any when `None`) and one of
    /// `tags` (any when empty) arrives, and dequeue it.
    fn recv(&self, source: Option<usize>, tags: &[Tag]) -> Result<Envelope, CommError>;

    /// Non-blocking form of [`Communicator::recv`].
    fn try_recv(&self, source: Option<usize>, tags: &[Tag])
        -> Result<Option<Envelope>, CommError>;

    /// Partition the group by `color`; ranks inside a part are ordered by
    /// `(key, rank)`. Ranks passing `None` take part but get no communicator.
    fn split(&self, color: Option<i64>, key: i64) -> Result<Option<Comm>, CommError>;

    /// Terminate the whole group.
    fn abort(&self, code: i32) -> !;

    /// New communicator over the same group with a separate message space.
    fn duplicate(&self) -> Result<Comm, CommError> {
        self.split(Some(0), self.rank() as i64)?
            .ok_or(CommError::Disconnected)
    }

    /// Collect one payload from every rank on `root`, in rank order.
    /// Non-root ranks get an empty vector.
    fn gather(&self, root: usize, payload: Vec<u8>) -> Result<Vec<Vec<u8>>, CommError> {
        check_rank(root, self.size())?;
        self.send(root, Tag::GATHER, payload)?;
        if self.rank() != root {
            return Ok(Vec::new());
        }
        (0..self.size())
            .map(|source| Ok(self.recv(Some(source), &[Tag::GATHER])?.payload))
            .collect()
    }

    /// Distribute `payload` from `root` to every rank.
    fn broadcast(&self, root: usize, payload: Vec<u8>) -> Result<Vec<u8>, CommError> {
        check_rank(root, self.size())?;
        if self.rank() == root {
            for dest in (0..self.size()).filter(|&d| d != root) {
                self.send(dest, Tag::BROADCAST, payload.clone())?;
            }
            return Ok(payload);
        }
        Ok(self.recv(Some(root), &[Tag::BROADCAST])?.payload)
    }

    /// Reduce one value per rank and give the result to every rank.
    fn all_reduce_i64(&self, value: i64, op: ReduceOp) -> Result<i64, CommError> {
        let parts = self.gather(0, value.to_le_bytes().to_vec())?;
        let mut reduced = value;
        if self.rank() == 0 {
            let mut values = parts.iter().map(|p| decode_i64(p));
            reduced = values.next().unwrap_or(Ok(value))?;
            for v in values {
                reduced = op.apply(reduced, v?);
            }
        }
        let bytes = self.broadcast(0, reduced.to_le_bytes().to_vec())?;
        decode_i64(&bytes)
    }

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<(), CommError> {
        self.all_reduce_i64(0, ReduceOp::Sum).map(|_| ())
    }
}

fn check_rank(rank: usize, size: usize) -> Result<(), CommError> {
    if rank >= size {
        return Err(CommError::RankOutOfRange { rank, size });
    }
    Ok(())
}

fn decode_i64(bytes: &[u8]) -> Result<i64, CommError> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| CommError::Malformed {
        tag: Tag::GATHER,
        reason: format!("expected 8 bytes, got {}", bytes.len()),
    })?;
    Ok(i64::from_le_bytes(raw))
}

/// Encode a serde value for a message body.
pub fn encode<T: serde::Serialize>(tag: Tag, value: &T) -> Result<Vec<u8>, CommError> {
    bincode::serialize(value).map_err(|e| CommError::Malformed {
        tag,
        reason: e.to_string(),
    })
}

/// Decode a message body produced by [`encode`].
pub fn decode<T: serde::de::DeserializeOwned>(tag: Tag, bytes: &[u8]) -> Result<T, CommError> {
    bincode::deserialize(bytes).map_err(|e| CommError::Malformed {
        tag,
        reason: e.to_string(),
    })
}
