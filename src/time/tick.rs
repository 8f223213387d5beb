//! Tick counting.

use crate::config;
use super::Instant;
use portable_atomic::{AtomicU64, Ordering};

/// Global tick counter for system uptime and scheduling.
///
/// This counter is incremented on every timer interrupt and provides
/// a monotonic time source for scheduling decisions.
pub struct TickCounter {
    /// Number of ticks since system start
    ticks: AtomicU64,
    /// Tick frequency in Hz
    frequency: u32,
    /// Nanoseconds per tick
    ns_per_tick: u64,
}

impl TickCounter {
    /// Create a new tick counter with the given frequency.
    ///
    /// # Arguments
    ///
    /// * `frequency` - Timer frequency in Hz
    pub const fn new(frequency: u32) -> Self {
        Self {
            ticks: AtomicU64::new(0),
            frequency,
            ns_per_tick: 1_000_000_000 / frequency as u64,
        }
    }
    
    /// Increment the tick counter (called from timer interrupt).
    ///
    /// This should only be called from the timer interrupt handler.
    pub fn increment(&self) {
        self.ticks.fetch_add(1, Ordering::AcqRel);
    }
    
    /// Get the current tick count.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }
    
    /// Get the tick frequency in Hz.
    pub fn frequency(&self) -> u32 {
        self.frequency
    }
    
    /// Convert ticks to nanoseconds.
    pub fn ticks_to_nanos(&self, ticks: u64) -> u64 {
        ticks * self.ns_per_tick
    }
    
    /// Convert nanoseconds to ticks.
    pub fn nanos_to_ticks(&self, nanos: u64) -> u64 {
        nanos / self.ns_per_tick
    }
    
    /// Get current time as an instant.
    pub fn now(&self) -> Instant {
        let ticks = self.ticks();
        Instant::from_nanos(self.ticks_to_nanos(ticks))
    }
}

/// Global tick counter instance, driven by the external timer interrupt at
/// the boot-time frequency (nominal 100 Hz).
pub static GLOBAL_TICK_COUNTER: TickCounter = TickCounter::new(config::TIMER_FREQUENCY_HZ);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_counter() {
        let counter = TickCounter::new(1000); // 1 kHz
        assert_eq!(counter.ticks(), 0);
        assert_eq!(counter.frequency(), 1000);

        counter.increment();
        assert_eq!(counter.ticks(), 1);

        assert_eq!(counter.ticks_to_nanos(1000), 1_000_000_000); // 1 second
        assert_eq!(counter.nanos_to_ticks(1_000_000_000), 1000);
    }
}