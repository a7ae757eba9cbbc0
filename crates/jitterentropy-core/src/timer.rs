//! High-resolution timestamp sources.
//!
//! The collector only needs an unsigned 64-bit counter whose back-to-back
//! readings differ. Wraparound is tolerated (see [`crate::noise::delta`]);
//! whether a given timer is fine-grained enough is decided by the
//! initialization self-test, not here.

// ---------------------------------------------------------------------------
// Timer trait
// ---------------------------------------------------------------------------

/// A source of raw timestamps.
pub trait Timer {
    /// Current counter value.
    fn now(&mut self) -> u64;
}

/// Adapts any `FnMut() -> u64` into a [`Timer`].
///
/// Used to drive the collector from scripted timestamp sequences and to plug
/// in platform counters this crate does not know about.
pub struct FnTimer<F>(pub F);

impl<F: FnMut() -> u64> Timer for FnTimer<F> {
    #[inline(always)]
    fn now(&mut self) -> u64 {
        (self.0)()
    }
}

impl<T: Timer + ?Sized> Timer for &mut T {
    #[inline(always)]
    fn now(&mut self) -> u64 {
        (**self).now()
    }
}

// ---------------------------------------------------------------------------
// Platform cycle counter
// ---------------------------------------------------------------------------

/// The best cycle-granular counter this CPU exposes.
///
/// - x86 / x86_64: `RDTSC`
/// - aarch64: the generic timer `CNTVCT_EL0`
/// - other unix: `clock_gettime` on the raw monotonic clock
/// - anything else: nanoseconds since this timer was created
#[derive(Debug, Clone)]
pub struct CycleTimer {
    #[cfg(not(any(
        target_arch = "x86",
        target_arch = "x86_64",
        target_arch = "aarch64",
        unix
    )))]
    epoch: std::time::Instant,
}

impl CycleTimer {
    pub fn new() -> Self {
        Self {
            #[cfg(not(any(
                target_arch = "x86",
                target_arch = "x86_64",
                target_arch = "aarch64",
                unix
            )))]
            epoch: std::time::Instant::now(),
        }
    }
}

impl Default for CycleTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for CycleTimer {
    #[inline(always)]
    fn now(&mut self) -> u64 {
        #[cfg(any(
            target_arch = "x86",
            target_arch = "x86_64",
            target_arch = "aarch64",
            unix
        ))]
        {
            read_counter()
        }

        #[cfg(not(any(
            target_arch = "x86",
            target_arch = "x86_64",
            target_arch = "aarch64",
            unix
        )))]
        {
            self.epoch.elapsed().as_nanos() as u64
        }
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline(always)]
fn read_counter() -> u64 {
    #[cfg(target_arch = "x86")]
    use core::arch::x86::_rdtsc;
    #[cfg(target_arch = "x86_64")]
    use core::arch::x86_64::_rdtsc;

    // SAFETY: RDTSC is available on every x86 CPU this crate targets and has
    // no memory side effects.
    #[allow(unused_unsafe)]
    unsafe {
        _rdtsc()
    }
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
fn read_counter() -> u64 {
    let val: u64;
    // SAFETY: CNTVCT_EL0 is readable from EL0 on Linux and macOS.
    // Read-only system register, no side effects.
    unsafe {
        core::arch::asm!("mrs {}, cntvct_el0", out(reg) val, options(nostack, nomem));
    }
    val
}

#[cfg(all(
    unix,
    not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64"))
))]
#[inline(always)]
fn read_counter() -> u64 {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    const CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC_RAW;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    const CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;

    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec.
    let rc = unsafe { libc::clock_gettime(CLOCK, &mut ts) };
    if rc != 0 {
        // Reported to the self-test as "timer not available".
        return 0;
    }
    (ts.tv_sec as u64)
        .wrapping_mul(1_000_000_000)
        .wrapping_add(ts.tv_nsec as u64)
}
