//! `rand` integration.
//!
//! A collector is a fallible, cryptographically strong random source, so it
//! implements `TryRngCore` + `TryCryptoRng`. Use `unwrap_err()` from
//! `rand` to turn it into a panicking `RngCore` if that is acceptable.

use rand::{TryCryptoRng, TryRngCore};
use zeroize::Zeroize;

use crate::collector::Collector;
use crate::error::Error;
use crate::timer::Timer;

impl<T: Timer> TryRngCore for Collector<T> {
    type Error = Error;

    fn try_next_u32(&mut self) -> Result<u32, Error> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        let value = u32::from_le_bytes(buf);
        buf.zeroize();
        Ok(value)
    }

    fn try_next_u64(&mut self) -> Result<u64, Error> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        let value = u64::from_le_bytes(buf);
        buf.zeroize();
        Ok(value)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill(dest)
    }
}

impl<T: Timer> TryCryptoRng for Collector<T> {}
