//! Owned, scrub-on-release memory for collector state.
//!
//! Sensitive buffers are heap allocated once, never cloned, and overwritten
//! with volatile zero writes (via `zeroize`) before the allocation is handed
//! back. On unix the pages are additionally locked into RAM for the lifetime
//! of the buffer so they do not land in swap.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Heap byte buffer that is zero-filled on allocation and scrubbed on drop.
///
/// Moving a `SecureBuffer` moves only the owning pointer; the bytes stay at
/// the address they were allocated at, so no stale copy is left behind by
/// moves of the owner.
pub struct SecureBuffer {
    bytes: Box<[u8]>,
    locked: bool,
}

impl SecureBuffer {
    /// Allocate `len` zero bytes and try to lock them into memory.
    pub fn zeroed(len: usize) -> Self {
        let bytes = vec![0u8; len].into_boxed_slice();
        let locked = lock_pages(&bytes);
        if !locked && len > 0 {
            log::debug!("could not lock {len} byte secure buffer into memory");
        }
        Self { bytes, locked }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the pages backing this buffer are locked into RAM.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Address of the first byte. Stable for the lifetime of the buffer.
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }
}

impl Zeroize for SecureBuffer {
    fn zeroize(&mut self) {
        self.bytes.as_mut().zeroize();
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        self.zeroize();
        if self.locked {
            unlock_pages(&self.bytes);
        }
    }
}

impl ZeroizeOnDrop for SecureBuffer {}

impl fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureBuffer([REDACTED; {}])", self.bytes.len())
    }
}

// ---------------------------------------------------------------------------
// Page locking
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn lock_pages(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    // SAFETY: the pointer and length describe a live allocation owned by the
    // caller. mlock does not read or write the memory.
    unsafe { libc::mlock(bytes.as_ptr().cast(), bytes.len()) == 0 }
}

#[cfg(unix)]
fn unlock_pages(bytes: &[u8]) {
    // SAFETY: same allocation that was passed to mlock in `lock_pages`.
    unsafe {
        libc::munlock(bytes.as_ptr().cast(), bytes.len());
    }
}

#[cfg(not(unix))]
fn lock_pages(_bytes: &[u8]) -> bool {
    false
}

#[cfg(not(unix))]
fn unlock_pages(_bytes: &[u8]) {}
