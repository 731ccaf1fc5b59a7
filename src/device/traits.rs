//! Memory area trait
//!
//! Every piece of memory a window exposes implements [`MemoryArea`]. The trait
//! hides whether bytes live in an ordinary heap buffer or in a mapped file and
//! whether forcing them durable needs a cache flush or an msync.

use crate::error::Result;

/// Byte-addressable memory that can be forced to its backing medium
pub trait MemoryArea: Send + Sync + 'static {
    /// View the whole area
    fn as_slice(&self) -> &[u8];

    /// Mutable view of the whole area
    fn as_mut_slice(&mut self) -> &mut [u8];

    /// Whether the area is true persistent memory (flush+drain is durable)
    fn is_pmem(&self) -> bool;

    /// Force `len` bytes starting at `offset` to the backing medium
    ///
    /// True persistent memory is flushed line by line and drained; anything
    /// else falls back to a synchronous msync of the covering pages.
    fn persist(&self, offset: usize, len: usize) -> Result<()>;

    /// Length in bytes
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Whether the area is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Base address, used as the identity of an attached area
    fn base(&self) -> usize {
        self.as_slice().as_ptr() as usize
    }

    /// Force the whole area
    fn persist_all(&self) -> Result<()> {
        self.persist(0, self.len())
    }
}
