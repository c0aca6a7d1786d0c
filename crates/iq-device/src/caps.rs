//! Hardware capability ranges
//!
//! Every tunable front-end parameter advertises an inclusive numeric domain.
//! Capabilities are queried once when a device is opened and never mutated
//! afterwards; live hardware drift only surfaces through the polled status.

/// Inclusive numeric domain for a tunable hardware parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParameterRange {
    /// Smallest accepted value
    pub minimum: i64,
    /// Granularity between accepted values
    pub step: i64,
    /// Largest accepted value
    pub maximum: i64,
}

impl ParameterRange {
    /// Create a new range
    pub fn new(minimum: i64, step: i64, maximum: i64) -> Self {
        Self {
            minimum,
            step,
            maximum,
        }
    }

    /// A degenerate single-value range
    pub fn fixed(value: i64) -> Self {
        Self {
            minimum: value,
            step: 0,
            maximum: value,
        }
    }

    /// Whether the value lies inside the range (ignoring step)
    pub fn contains(&self, value: i64) -> bool {
        value >= self.minimum && value <= self.maximum
    }

    /// Clamp a value to the range bounds
    pub fn clamp(&self, value: i64) -> i64 {
        value.clamp(self.minimum, self.maximum)
    }

    /// Clamp to the bounds and round onto the step grid
    pub fn snap(&self, value: i64) -> i64 {
        let clamped = self.clamp(value);
        if self.step <= 0 {
            return clamped;
        }
        let offset = clamped - self.minimum;
        let snapped = self.minimum + ((offset + self.step / 2) / self.step) * self.step;
        self.clamp(snapped)
    }
}

/// Full capability report for an opened device.
///
/// `valid` is false when the backend could not populate the ranges (the
/// caller should then fall back to conservative defaults).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceCapabilities {
    /// Whether the ranges below were actually reported by the hardware
    pub valid: bool,
    /// Receive tuning range in Hz
    pub rx_frequency: ParameterRange,
    /// Transmit tuning range in Hz
    pub tx_frequency: ParameterRange,
    /// Analog bandwidth range in Hz
    pub bandwidth: ParameterRange,
    /// Front-end attenuation range in dB
    pub attenuation: ParameterRange,
    /// Internal amplifier gain range in dB
    pub gain: ParameterRange,
    /// IF gain range in dB
    pub if_gain: ParameterRange,
    /// Sample rate range in Hz
    pub sample_rate: ParameterRange,
}

impl DeviceCapabilities {
    /// A capability report with every range collapsed to zero and the
    /// validity flag cleared
    pub fn invalid() -> Self {
        let zero = ParameterRange::fixed(0);
        Self {
            valid: false,
            rx_frequency: zero,
            tx_frequency: zero,
            bandwidth: zero,
            attenuation: zero,
            gain: zero,
            if_gain: zero,
            sample_rate: zero,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn contains_is_inclusive() {
        let range = ParameterRange::new(0, 1, 31);
        assert!(range.contains(0));
        assert!(range.contains(31));
        assert!(!range.contains(-1));
        assert!(!range.contains(32));
    }

    #[test]
    fn snap_rounds_to_grid() {
        let rates = ParameterRange::new(5_000_000, 5_000_000, 40_000_000);
        assert_eq!(rates.snap(5_000_000), 5_000_000);
        assert_eq!(rates.snap(11_000_000), 10_000_000);
        assert_eq!(rates.snap(13_000_000), 15_000_000);
        assert_eq!(rates.snap(90_000_000), 40_000_000);
        assert_eq!(rates.snap(1), 5_000_000);
    }

    #[test]
    fn snap_with_zero_step_only_clamps() {
        let fixed = ParameterRange::fixed(7);
        assert_eq!(fixed.snap(100), 7);
        assert_eq!(fixed.snap(-100), 7);
    }

    proptest! {
        #[test]
        fn snap_never_leaves_range(value in -1_000_000_000i64..1_000_000_000i64) {
            let range = ParameterRange::new(-500, 7, 500);
            let snapped = range.snap(value);
            prop_assert!(range.contains(snapped));
        }

        #[test]
        fn clamp_is_idempotent(value in any::<i32>()) {
            let range = ParameterRange::new(0, 1, 1000);
            let once = range.clamp(value as i64);
            prop_assert_eq!(once, range.clamp(once));
        }
    }
}
