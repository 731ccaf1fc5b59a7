//! Heap-backed memory areas

use crate::device::flush;
use crate::device::MemoryArea;
use crate::error::{PmemError, Result};

/// Ordinary anonymous memory
///
/// Nothing backs a heap area, so persisting one only flushes caches when
/// persistent memory detection is forced on.
#[derive(Debug, Clone)]
pub struct HeapArea {
    data: Box<[u8]>,
    is_pmem: bool,
}

impl HeapArea {
    /// Allocate `len` zeroed bytes
    pub fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![0u8; len])
    }

    /// Take ownership of an existing buffer
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: data.into_boxed_slice(),
            is_pmem: flush::forced_pmem().unwrap_or(false),
        }
    }

    /// Give the buffer back
    pub fn into_vec(self) -> Vec<u8> {
        self.data.into_vec()
    }
}

impl MemoryArea for HeapArea {
    fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn is_pmem(&self) -> bool {
        self.is_pmem
    }

    fn persist(&self, offset: usize, len: usize) -> Result<()> {
        if offset.checked_add(len).map_or(true, |end| end > self.data.len()) {
            return Err(PmemError::InvalidArgument(format!(
                "persist range {offset}+{len} exceeds area of {} bytes",
                self.data.len()
            )));
        }
        if self.is_pmem && len > 0 {
            // SAFETY: the range was checked against the buffer above.
            unsafe { flush::persist(self.data.as_ptr().add(offset), len) };
        }
        Ok(())
    }
}
