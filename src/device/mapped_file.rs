//! Memory-mapped file primitives
//!
//! A [`MappedFile`] pre-allocates its blocks before mapping, so a mapped write
//! can never fail later for lack of space. Mapping first tries a synchronous
//! DAX mapping (`MAP_SHARED_VALIDATE | MAP_SYNC`); when the kernel accepts it the
//! file sits on true persistent memory and cache flushes alone are durable.

use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::io;
use std::num::NonZeroUsize;
#[cfg(target_os = "linux")]
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

#[cfg(target_os = "linux")]
use nix::{errno::Errno, fcntl::posix_fallocate};
use nix::sys::mman::{mmap, msync, munmap, MapFlags, MsFlags, ProtFlags};
use tracing::debug;

use crate::device::flush;
use crate::device::MemoryArea;
use crate::error::{IoOp, PmemError, Result};

/// A file mapped read-write into the address space
pub struct MappedFile {
    path: PathBuf,
    file: File,
    ptr: NonNull<u8>,
    len: usize,
    is_pmem: bool,
}

// SAFETY: the mapping is owned exclusively by this value; shared access only
// hands out `&[u8]`, mutation requires `&mut self`.
unsafe impl Send for MappedFile {}
// SAFETY: see above.
unsafe impl Sync for MappedFile {}

impl MappedFile {
    /// Create the file if absent, size it to exactly `len` bytes, pre-allocate
    /// its blocks and map it.
    pub fn open_and_map(path: impl AsRef<Path>, len: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if len == 0 {
            return Err(PmemError::InvalidArgument(format!(
                "cannot map zero bytes of {}",
                path.display()
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(PmemError::io_with(IoOp::Open, &path))?;

        let current = file
            .metadata()
            .map_err(PmemError::io_with(IoOp::Open, &path))?
            .len();
        if current > len as u64 {
            file.set_len(len as u64)
                .map_err(PmemError::io_with(IoOp::Allocate, &path))?;
        }
        preallocate(&file, len).map_err(PmemError::io_with(IoOp::Allocate, &path))?;

        Self::map(path, file, len)
    }

    /// Map an existing file at its current length.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(PmemError::io_with(IoOp::Open, &path))?;
        let len = file
            .metadata()
            .map_err(PmemError::io_with(IoOp::Open, &path))?
            .len() as usize;
        if len == 0 {
            return Err(PmemError::InvalidArgument(format!(
                "{} is empty",
                path.display()
            )));
        }
        Self::map(path, file, len)
    }

    fn map(path: PathBuf, file: File, len: usize) -> Result<Self> {
        let length = NonZeroUsize::new(len)
            .ok_or_else(|| PmemError::InvalidArgument("length must be non-zero".into()))?;
        let prot = ProtFlags::PROT_READ | ProtFlags::PROT_WRITE;

        let (ptr, synchronous) = match map_synchronous(&file, length, prot) {
            Some(ptr) => (ptr, true),
            None => {
                // SAFETY: the file is open read-write and sized to at least `len`.
                let ptr = unsafe { mmap(None, length, prot, MapFlags::MAP_SHARED, &file, 0) }
                    .map_err(|e| PmemError::io(IoOp::Map, &path, io::Error::from(e)))?;
                (ptr, false)
            }
        };

        let is_pmem = flush::forced_pmem().unwrap_or(synchronous);
        debug!(path = %path.display(), len, is_pmem, "mapped file");

        Ok(Self {
            path,
            file,
            ptr: ptr.cast::<u8>(),
            len,
            is_pmem,
        })
    }

    /// Grow the mapping to at least `len` bytes, keeping its contents.
    pub fn grow(&mut self, len: usize) -> Result<()> {
        if len <= self.len {
            return Ok(());
        }
        preallocate(&self.file, len).map_err(PmemError::io_with(IoOp::Allocate, &self.path))?;
        let file = self
            .file
            .try_clone()
            .map_err(PmemError::io_with(IoOp::Open, &self.path))?;
        let grown = Self::map(self.path.clone(), file, len)?;
        *self = grown;
        Ok(())
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Backing file handle
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Release the mapping. Dropping has the same effect.
    pub fn unmap(self) {
        drop(self);
    }

    fn msync(&self, offset: usize, len: usize) -> Result<()> {
        let page = page_size();
        let start = (self.ptr.as_ptr() as usize + offset) & !(page - 1);
        let end = self.ptr.as_ptr() as usize + offset + len;
        let Some(addr) = NonNull::new(start as *mut c_void) else {
            return Err(PmemError::InvalidArgument("msync at a null page".into()));
        };
        // SAFETY: `[start, end)` lies within the mapping rounded down to a page.
        unsafe { msync(addr, end - start, MsFlags::MS_SYNC) }
            .map_err(|errno| PmemError::io(IoOp::Sync, &self.path, io::Error::from(errno)))
    }
}

impl MemoryArea for MappedFile {
    fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is `len` bytes and lives as long as `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    fn is_pmem(&self) -> bool {
        self.is_pmem
    }

    fn persist(&self, offset: usize, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        if offset.checked_add(len).map_or(true, |end| end > self.len) {
            return Err(PmemError::InvalidArgument(format!(
                "persist range {offset}+{len} exceeds mapping of {} bytes",
                self.len
            )));
        }
        if self.is_pmem {
            // SAFETY: the range was checked against the mapping above.
            unsafe { flush::persist(self.ptr.as_ptr().add(offset), len) };
            Ok(())
        } else {
            self.msync(offset, len)
        }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe the mapping created in `map`.
        let _ = unsafe { munmap(self.ptr.cast::<c_void>(), self.len) };
    }
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile")
            .field("path", &self.path)
            .field("len", &self.len)
            .field("is_pmem", &self.is_pmem)
            .finish()
    }
}

#[cfg(target_os = "linux")]
fn map_synchronous(file: &File, length: NonZeroUsize, prot: ProtFlags) -> Option<NonNull<c_void>> {
    let flags = MapFlags::from_bits_retain(libc::MAP_SHARED_VALIDATE | libc::MAP_SYNC);
    // SAFETY: the kernel validates MAP_SYNC and rejects it for non-DAX files.
    unsafe { mmap(None, length, prot, flags, file, 0) }.ok()
}

#[cfg(not(target_os = "linux"))]
fn map_synchronous(_file: &File, _length: NonZeroUsize, _prot: ProtFlags) -> Option<NonNull<c_void>> {
    None
}

#[cfg(target_os = "linux")]
fn preallocate(file: &File, len: usize) -> io::Result<()> {
    let len_off = libc::off_t::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file too large"))?;
    match posix_fallocate(file.as_raw_fd(), 0, len_off) {
        Ok(()) => Ok(()),
        Err(Errno::EOPNOTSUPP | Errno::EINVAL) => extend(file, len),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(not(target_os = "linux"))]
fn preallocate(file: &File, len: usize) -> io::Result<()> {
    extend(file, len)
}

fn extend(file: &File, len: usize) -> io::Result<()> {
    if file.metadata()?.len() < len as u64 {
        file.set_len(len as u64)?;
    }
    Ok(())
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}
