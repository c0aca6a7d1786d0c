//! Bandwidth clamp policy
//!
//! Each decimation level carries a maximum usable IF bandwidth; below all of
//! them sits one global floor. Requests outside the valid range for the
//! selected decimation are clamped to the nearest bound and applied; the
//! caller is warned, never rejected.

use crate::error::SourceError;

/// Global bandwidth floor in Hz, shared by every decimation level
pub const MIN_BANDWIDTH_HZ: f64 = 200.0;

/// Native ADC rate before decimation
pub const NATIVE_SAMPLE_RATE_HZ: f64 = 40.0e6;

/// Largest supported decimation index (factor 2^13 = 8192)
pub const MAX_DECIMATION_INDEX: u8 = 13;

/// Maximum usable IF bandwidth per decimation index
const MAX_BANDWIDTH_HZ: [f64; 14] = [
    27.0e6,  // decimation 1 (40 MS/s)
    17.8e6,  // decimation 2 (20 MS/s)
    8.0e6,   // decimation 4 (10 MS/s)
    3.75e6,  // decimation 8 (5 MS/s)
    2.0e6,   // decimation 16 (2.5 MS/s)
    1.0e6,   // decimation 32 (1.25 MS/s)
    500.0e3, // decimation 64 (625 kS/s)
    250.0e3, // decimation 128 (312.5 kS/s)
    140.0e3, // decimation 256 (156.25 kS/s)
    65.0e3,  // decimation 512 (78.125 kS/s)
    30.0e3,  // decimation 1024 (39.0625 kS/s)
    15.0e3,  // decimation 2048 (19.53125 kS/s)
    8.0e3,   // decimation 4096 (9.765625 kS/s)
    4.0e3,   // decimation 8192 (4.8828125 kS/s)
];

/// Downsampling factor for a decimation index
pub fn decimation_factor(index: u8) -> u32 {
    1u32 << index.min(MAX_DECIMATION_INDEX)
}

/// Nominal output rate for a decimation index, before hardware trim
pub fn nominal_output_rate(index: u8) -> f64 {
    NATIVE_SAMPLE_RATE_HZ / f64::from(decimation_factor(index))
}

/// Maximum usable bandwidth for a decimation index
pub fn max_bandwidth(index: u8) -> Result<f64, SourceError> {
    MAX_BANDWIDTH_HZ
        .get(usize::from(index))
        .copied()
        .ok_or(SourceError::InvalidDecimation(index))
}

/// Outcome of clamping a bandwidth request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClampedBandwidth {
    /// What the caller asked for
    pub requested_hz: f64,
    /// What will actually be applied
    pub applied_hz: f64,
}

impl ClampedBandwidth {
    /// Whether the request was out of range
    pub fn was_clamped(&self) -> bool {
        self.requested_hz != self.applied_hz
    }
}

/// Clamp a bandwidth request into the valid range for a decimation level
pub fn clamp_bandwidth(index: u8, requested_hz: f64) -> Result<ClampedBandwidth, SourceError> {
    let ceiling = max_bandwidth(index)?;
    let applied_hz = requested_hz.clamp(MIN_BANDWIDTH_HZ, ceiling);
    Ok(ClampedBandwidth {
        requested_hz,
        applied_hz,
    })
}
