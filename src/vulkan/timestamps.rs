//! Conversion of raw timestamp query values into durations

use std::time::Duration;

/// How a device's timestamp ticks map onto wall-clock time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimestampPeriod {
    /// Nanoseconds per tick (`VkPhysicalDeviceLimits::timestampPeriod`)
    pub nanos_per_tick: f32,
    /// Meaningful low bits of each value (`timestampValidBits`)
    pub valid_bits: u32,
}

impl TimestampPeriod {
    pub fn new(nanos_per_tick: f32, valid_bits: u32) -> Self {
        Self {
            nanos_per_tick,
            valid_bits: valid_bits.min(64),
        }
    }

    fn mask(&self) -> u64 {
        match self.valid_bits {
            0 => 0,
            64 => u64::MAX,
            bits => (1u64 << bits) - 1,
        }
    }

    /// Ticks elapsed from `start` to `end`, tolerating one counter wrap
    pub fn elapsed_ticks(&self, start: u64, end: u64) -> u64 {
        let mask = self.mask();
        (end & mask).wrapping_sub(start & mask) & mask
    }

    pub fn ticks_to_duration(&self, ticks: u64) -> Duration {
        let nanos = ticks as f64 * self.nanos_per_tick as f64;
        Duration::from_nanos(nanos.round() as u64)
    }

    /// Wall-clock time between two timestamp slots
    pub fn elapsed(&self, start: u64, end: u64) -> Duration {
        self.ticks_to_duration(self.elapsed_ticks(start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_ticks_with_period() {
        let period = TimestampPeriod::new(2.5, 64);
        assert_eq!(period.elapsed(100, 500), Duration::from_nanos(1000));
    }

    #[test]
    fn masks_to_valid_bits() {
        let period = TimestampPeriod::new(1.0, 36);
        let high_garbage = 0xABC0_0000_0000_0000;
        assert_eq!(period.elapsed_ticks(high_garbage | 10, 30), 20);
    }

    #[test]
    fn survives_counter_wrap() {
        let period = TimestampPeriod::new(1.0, 8);
        assert_eq!(period.elapsed_ticks(250, 4), 10);
    }

    #[test]
    fn zero_valid_bits_yields_zero() {
        let period = TimestampPeriod::new(1.0, 0);
        assert_eq!(period.elapsed_ticks(1, 1000), 0);
    }
}
