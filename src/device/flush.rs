//! Cache line write-back and drain
//!
//! Stores to persistent memory are durable only once the covering cache lines
//! have been written back and a store fence has ordered that write-back.

use std::env;
use std::sync::OnceLock;

use crate::constants::CACHE_LINE_BYTES;

/// Environment variable overriding persistent memory detection.
pub const PMEM_FORCE_ENV: &str = "PMEM_IS_PMEM_FORCE";

/// Cache write-back instruction used by [`flush`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMethod {
    /// CLWB, write back without eviction
    Clwb,
    /// CLFLUSHOPT, weakly ordered evicting flush
    ClflushOpt,
    /// CLFLUSH, strongly ordered evicting flush
    Clflush,
    /// No cache control available, a full fence is the best effort
    Fence,
}

static FLUSH_METHOD: OnceLock<FlushMethod> = OnceLock::new();

/// Detect the best available write-back instruction using CPUID
pub fn detect_flush_method() -> FlushMethod {
    #[cfg(target_arch = "x86_64")]
    {
        use std::arch::x86_64::__cpuid;

        // SAFETY: CPUID is available on every x86_64 processor. Newer
        // toolchains declare the intrinsic safe.
        #[allow(unused_unsafe)]
        let leaf7 = unsafe { __cpuid(7) };
        if leaf7.ebx & (1 << 24) != 0 {
            return FlushMethod::Clwb;
        }
        if leaf7.ebx & (1 << 23) != 0 {
            return FlushMethod::ClflushOpt;
        }
        FlushMethod::Clflush
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        FlushMethod::Fence
    }
}

/// Cached flush method, detected on first use
pub fn flush_method() -> FlushMethod {
    *FLUSH_METHOD.get_or_init(detect_flush_method)
}

/// Value of the detection override, if set to `0` or `1`
pub fn forced_pmem() -> Option<bool> {
    match env::var(PMEM_FORCE_ENV).ok()?.trim() {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

/// Write back the cache lines covering `[addr, addr + len)`
///
/// # Safety
///
/// `addr` must point to at least `len` mapped bytes.
#[inline]
pub unsafe fn flush(addr: *const u8, len: usize) {
    if len == 0 {
        return;
    }

    let method = flush_method();
    let mut line = (addr as usize) & !(CACHE_LINE_BYTES - 1);
    let end = addr as usize + len;

    while line < end {
        write_back_line(method, line as *const u8);
        line += CACHE_LINE_BYTES;
    }
}

#[cfg(target_arch = "x86_64")]
#[inline]
fn write_back_line(method: FlushMethod, line: *const u8) {
    // SAFETY: the caller of `flush` guarantees the line is mapped.
    unsafe {
        match method {
            FlushMethod::Clwb => {
                std::arch::asm!("clwb [{addr}]", addr = in(reg) line, options(nostack))
            }
            FlushMethod::ClflushOpt => {
                std::arch::asm!("clflushopt [{addr}]", addr = in(reg) line, options(nostack))
            }
            FlushMethod::Clflush | FlushMethod::Fence => {
                std::arch::asm!("clflush [{addr}]", addr = in(reg) line, options(nostack))
            }
        }
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
fn write_back_line(_method: FlushMethod, _line: *const u8) {}

/// Wait until every preceding write-back has completed
#[inline]
pub fn drain() {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: SFENCE only orders preceding stores and write-backs.
        unsafe { std::arch::asm!("sfence", options(nostack)) };
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }
}

/// Flush then drain
///
/// # Safety
///
/// `addr` must point to at least `len` mapped bytes.
#[inline]
pub unsafe fn persist(addr: *const u8, len: usize) {
    // SAFETY: forwarded from the caller.
    unsafe { flush(addr, len) };
    drain();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_is_cached() {
        assert_eq!(flush_method(), flush_method());
    }

    #[test]
    fn test_flush_zero_length_is_noop() {
        // SAFETY: zero-length flush never dereferences.
        unsafe { flush(std::ptr::null(), 0) };
    }

    #[test]
    fn test_persist_unaligned_heap_range() {
        let data = vec![7u8; 300];
        // SAFETY: the range lies inside `data`.
        unsafe { persist(data.as_ptr().add(5), 200) };
        assert_eq!(data[5], 7);
    }
}
