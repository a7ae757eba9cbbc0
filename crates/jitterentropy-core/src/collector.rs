//! The entropy collector.
//!
//! Pipeline per 64-bit output block:
//! 1. One priming measurement so the first delta is against a real timestamp
//! 2. Measurements until `64 * osr` of them were not stuck
//! 3. Every measurement: memory walk, timestamp, delta, health tests, LFSR
//! 4. Health re-checked before the block is handed out
//!
//! The entropy word and all timing history live in a boxed state that is
//! scrubbed on drop and never cloned.

use std::fmt;

use serde::Serialize;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::config::{CollectorConfig, Flags, HealthPolicy};
use crate::error::Error;
use crate::health::{HealthMonitor, HealthStatus, HealthTest};
use crate::lfsr;
use crate::noise::{self, LFSR_LOOP_BITS, MEMORY_LOOP_BITS, MemoryNoise};
use crate::timer::{CycleTimer, Timer};

/// Bits in one output block.
pub const DATA_SIZE_BITS: u32 = 64;
/// Bytes in one output block.
pub const BLOCK_BYTES: usize = (DATA_SIZE_BITS / 8) as usize;

#[derive(Zeroize, ZeroizeOnDrop)]
struct EntropyState {
    data: u64,
    prev_time: u64,
    health: HealthMonitor,
}

/// One raw measurement of the noise source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RawSample {
    pub delta: u64,
    pub stuck: bool,
}

/// CPU jitter entropy collector.
///
/// Not `Clone`: duplicating the state would duplicate future output. A
/// collector is used from one thread at a time; move it or wrap it in a
/// `Mutex` to share it.
pub struct Collector<T: Timer = CycleTimer> {
    state: Box<EntropyState>,
    memory: Option<MemoryNoise>,
    timer: T,
    osr: u32,
    policy: HealthPolicy,
    secure_memory: bool,
}

impl Collector {
    /// Allocate a collector on the platform cycle counter.
    ///
    /// `osr == 0` is treated as 1. Unknown flag bits are ignored.
    pub fn new(osr: u32, flags: Flags) -> Result<Self, Error> {
        Self::with_config(&CollectorConfig::new(osr, flags))
    }

    pub fn with_config(config: &CollectorConfig) -> Result<Self, Error> {
        Self::with_timer(config, CycleTimer::new())
    }
}

impl<T: Timer> Collector<T> {
    /// Allocate a collector on a caller-supplied timer and generate one block
    /// to seed the entropy word.
    ///
    /// A health failure while seeding does not fail allocation. It stays
    /// latched and, under [`HealthPolicy::Enforce`], the first read reports it.
    pub fn with_timer(config: &CollectorConfig, timer: T) -> Result<Self, Error> {
        let mut collector = Self::unseeded(config, timer)?;
        if let Err(err) = collector.generate_block() {
            log::warn!("seeding block failed: {err}");
        }
        log::debug!(
            "allocated collector: osr={}, memory={:?}, policy={}",
            collector.osr,
            collector.memory.as_ref().map(MemoryNoise::size),
            collector.policy
        );
        Ok(collector)
    }

    pub(crate) fn unseeded(config: &CollectorConfig, timer: T) -> Result<Self, Error> {
        config.validate()?;
        let osr = config.effective_osr();
        let memory = if config.memory_enabled() {
            MemoryNoise::new(&config.memory)
        } else {
            None
        };
        Ok(Self {
            state: Box::new(EntropyState {
                data: 0,
                prev_time: 0,
                health: HealthMonitor::new(osr),
            }),
            memory,
            timer,
            osr,
            policy: config.health,
            secure_memory: config.secure_memory,
        })
    }

    pub fn osr(&self) -> u32 {
        self.osr
    }

    pub fn policy(&self) -> HealthPolicy {
        self.policy
    }

    /// Whether health failures are fatal for this collector.
    pub fn fips_enabled(&self) -> bool {
        self.policy == HealthPolicy::Enforce
    }

    pub fn has_memory_noise(&self) -> bool {
        self.memory.is_some()
    }

    pub fn health(&self) -> HealthStatus {
        self.state.health.status(self.policy)
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    /// Fill `dest` with conditioned entropy.
    ///
    /// All or nothing: on error every byte of `dest` is zeroed. Under
    /// [`HealthPolicy::RecordOnly`] this never fails, but blocks until the
    /// timer produces enough non-stuck measurements.
    pub fn fill(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        let mut offset = 0;
        while offset < dest.len() {
            if let Err(err) = self.generate_block().and_then(|()| self.check_health()) {
                dest.zeroize();
                log::error!("entropy read aborted after {offset} bytes: {err}");
                return Err(err);
            }
            let n = (dest.len() - offset).min(BLOCK_BYTES);
            let mut word = self.state.data.to_le_bytes();
            dest[offset..offset + n].copy_from_slice(&word[..n]);
            word.zeroize();
            offset += n;
        }
        log::trace!("emitted {} bytes", dest.len());

        // Move the state on so it no longer matches the bytes just handed out.
        if !self.secure_memory {
            if let Err(err) = self.generate_block() {
                log::warn!("post-read block failed: {err}");
            }
        }
        Ok(())
    }

    /// Read `len` bytes of entropy into a buffer that is zeroed on drop.
    pub fn read(&mut self, len: usize) -> Result<Zeroizing<Vec<u8>>, Error> {
        let mut out = Zeroizing::new(vec![0u8; len]);
        self.fill(&mut out)?;
        Ok(out)
    }

    /// Explicit teardown. Equivalent to dropping the collector.
    pub fn free(self) {
        log::debug!("releasing collector");
        drop(self);
    }

    // -----------------------------------------------------------------------
    // Raw noise access
    // -----------------------------------------------------------------------

    /// Take one measurement exactly as block generation does and return it.
    ///
    /// The measurement is conditioned into the entropy word and counted by
    /// the health tests.
    pub fn raw_sample(&mut self) -> RawSample {
        self.measure()
    }

    /// `count` raw deltas, stuck ones included.
    pub fn raw_deltas(&mut self, count: usize) -> Vec<u64> {
        (0..count).map(|_| self.measure().delta).collect()
    }

    /// Time one round of noise work with fixed loop counts.
    ///
    /// `loops == 0` keeps the timer-derived counts. Used to check that the
    /// execution time of the noise work grows with the amount of work.
    pub fn measure_fixed(&mut self, loops: u64) -> u64 {
        let fixed = (loops > 0).then_some(loops);
        let t1 = self.timer.now();
        self.memory_noise(fixed);
        self.lfsr_noise(t1, fixed, false);
        let t2 = self.timer.now();
        noise::delta(t1, t2)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn memory_noise(&mut self, fixed: Option<u64>) {
        let shuffled = noise::loop_shuffle(&mut self.timer, self.state.data, MEMORY_LOOP_BITS, 0);
        if let Some(mem) = self.memory.as_mut() {
            mem.access(fixed.unwrap_or(shuffled));
        }
    }

    fn lfsr_noise(&mut self, input: u64, fixed: Option<u64>, stuck: bool) {
        let shuffled = noise::loop_shuffle(&mut self.timer, self.state.data, LFSR_LOOP_BITS, 0);
        lfsr::condition(&mut self.state.data, input, fixed.unwrap_or(shuffled), stuck);
    }

    fn measure(&mut self) -> RawSample {
        self.memory_noise(None);

        let now = self.timer.now();
        let current = noise::delta(self.state.prev_time, now);
        self.state.prev_time = now;

        let stuck = self.state.health.stuck(current);
        self.lfsr_noise(current, None, stuck);
        RawSample {
            delta: current,
            stuck,
        }
    }

    fn generate_block(&mut self) -> Result<(), Error> {
        self.check_health()?;

        // Priming: the first delta of a block is against a stale timestamp.
        self.measure();

        let target = u64::from(DATA_SIZE_BITS) * u64::from(self.osr);
        let mut credited = 0u64;
        let mut stuck = 0u64;
        while credited < target {
            let sample = self.measure();
            // A dead timer would otherwise spin here forever.
            self.check_health()?;
            if sample.stuck {
                stuck += 1;
            } else {
                credited += 1;
            }
        }
        log::trace!("block done: {credited} measurements, {stuck} stuck");
        Ok(())
    }

    /// Latched failure as a read error, if the policy makes it fatal.
    fn check_health(&self) -> Result<(), Error> {
        if self.policy == HealthPolicy::RecordOnly {
            return Ok(());
        }
        match self.state.health.failure() {
            None => Ok(()),
            Some(HealthTest::RepetitionCount) => Err(Error::RepetitionCount),
            Some(HealthTest::AdaptiveProportion) => Err(Error::HealthFailure),
        }
    }

    fn scrub(&mut self) {
        self.state.zeroize();
        if let Some(mem) = self.memory.as_mut() {
            mem.zeroize();
        }
    }

    // Hooks for the initialization self-test, which drives the noise work
    // itself instead of going through block generation.

    /// Time the noise work once with the timestamp read first as its input.
    pub(crate) fn timed_cycle(&mut self) -> (u64, u64) {
        let t1 = self.timer.now();
        self.state.prev_time = t1;
        self.memory_noise(None);
        self.lfsr_noise(t1, None, false);
        let t2 = self.timer.now();
        (t1, t2)
    }

    pub(crate) fn health_mut(&mut self) -> &mut HealthMonitor {
        &mut self.state.health
    }

    #[cfg(test)]
    fn data(&self) -> u64 {
        self.state.data
    }
}

impl<T: Timer> Drop for Collector<T> {
    fn drop(&mut self) {
        self.scrub();
    }
}

impl<T: Timer> fmt::Debug for Collector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("osr", &self.osr)
            .field("policy", &self.policy)
            .field("memory", &self.memory.as_ref().map(MemoryNoise::size))
            .field("failure", &self.state.health.failure())
            .finish_non_exhaustive()
    }
}
