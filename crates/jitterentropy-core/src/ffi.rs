//! C ABI for embedding the collector in non-Rust programs.
//!
//! Handles are opaque heap pointers. Return codes follow the classic
//! collector convention: reads return the byte count or a negative error,
//! the self-test returns 0 or a positive failure code.

use std::os::raw::{c_char, c_int, c_uint};
use std::ptr;

use crate::collector::Collector;
use crate::config::{CollectorConfig, Flags};
use crate::error::Error;
use crate::selftest;

/// Opaque collector handle for C callers.
pub struct JitterCollector(Collector);

/// Library version, `major * 1_000_000 + minor * 10_000 + patch * 100`.
#[unsafe(no_mangle)]
pub extern "C" fn jitter_version() -> c_uint {
    crate::version()
}

/// Run the initialization self-test on the platform timer.
#[unsafe(no_mangle)]
pub extern "C" fn jitter_self_test() -> c_int {
    match selftest::self_test() {
        Ok(_) => 0,
        Err(err) => err.code(),
    }
}

/// Allocate a collector. Returns null on failure.
#[unsafe(no_mangle)]
pub extern "C" fn jitter_collector_alloc(osr: c_uint, flags: c_uint) -> *mut JitterCollector {
    let config = CollectorConfig::new(osr, Flags::from_bits(flags));
    match Collector::with_config(&config) {
        Ok(collector) => Box::into_raw(Box::new(JitterCollector(collector))),
        Err(err) => {
            log::error!("collector allocation failed: {err}");
            ptr::null_mut()
        }
    }
}

/// Release a collector. Null is ignored.
///
/// # Safety
///
/// `handle` must be null or a pointer returned by `jitter_collector_alloc`
/// that has not been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jitter_collector_free(handle: *mut JitterCollector) {
    if handle.is_null() {
        return;
    }
    // SAFETY: caller guarantees `handle` came from Box::into_raw in
    // `jitter_collector_alloc` and is released only once.
    let boxed = unsafe { Box::from_raw(handle) };
    boxed.0.free();
}

/// Fill `buf` with `len` bytes of entropy.
///
/// Returns `len` on success, or -1 (null handle, or `len` above
/// `isize::MAX`), -2 (RCT failure), -3 (other health failure). On a health
/// failure the buffer is zeroed.
///
/// # Safety
///
/// `handle` must be null or a live collector handle. `buf` must be valid for
/// writes of `len` bytes. The handle must not be used concurrently.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jitter_read_entropy(
    handle: *mut JitterCollector,
    buf: *mut c_char,
    len: usize,
) -> isize {
    if handle.is_null() || (buf.is_null() && len > 0) || len > isize::MAX as usize {
        return Error::InvalidCollector.code() as isize;
    }
    // SAFETY: non-null and live per the caller contract; no other reference
    // to the collector exists for the duration of this call.
    let collector = unsafe { &mut (*handle).0 };
    let dest: &mut [u8] = if len == 0 {
        &mut []
    } else {
        // SAFETY: `buf` is non-null and valid for `len` writable bytes.
        unsafe { std::slice::from_raw_parts_mut(buf.cast::<u8>(), len) }
    };
    match collector.fill(dest) {
        Ok(()) => len as isize,
        Err(err) => err.code() as isize,
    }
}
