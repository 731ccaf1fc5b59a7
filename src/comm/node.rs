//! Node-local rank determination

use super::{CommError, Communicator};

/// djb2 string hash with 32-bit wrapping arithmetic over signed bytes.
pub fn djb2_hash(data: &[u8]) -> i32 {
    data.iter().fold(5381i32, |hash, &byte| {
        hash.wrapping_mul(33).wrapping_add(byte as i8 as i32)
    })
}

/// Hash of a host name, terminating NUL included.
pub fn host_hash(name: &str) -> i32 {
    let mut bytes = name.as_bytes().to_vec();
    bytes.push(0);
    djb2_hash(&bytes)
}

/// Rank of the caller among the ranks running on the same node.
///
/// Ranks are grouped by the hash of their processor name, so two distinct
/// names with colliding hashes are treated as one node.
pub fn node_rank(comm: &dyn Communicator) -> Result<usize, CommError> {
    let color = host_hash(&comm.processor_name()) as i64;
    let node = comm
        .split(Some(color), comm.rank() as i64)?
        .ok_or(CommError::Disconnected)?;
    Ok(node.rank())
}
