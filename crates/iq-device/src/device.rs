//! The polymorphic device control interface
//!
//! Callers depend only on [`SdrDevice`] and [`DeviceConnector`]; the concrete
//! backend modules ([`crate::kc908`], [`crate::bb60`]) are never named outside
//! device construction.

use std::sync::Arc;

use crate::calibration::{CalibrationRequest, CalibrationResult};
use crate::caps::DeviceCapabilities;
use crate::error::DeviceError;
use crate::format::SampleFormat;

/// Signal direction for direction-qualified operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// Receive path
    Rx,
    /// Transmit path
    Tx,
}

/// Polled device health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceStatus {
    /// Streaming or ready to stream
    Running,
    /// No longer present on the bus
    Disconnected,
    /// Present but faulted
    Error,
}

/// The hardware families this crate can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Backend {
    /// KC 908 family (direct-sampling wideband receiver/transmitter)
    Kc908,
    /// BB 60 family (spectrum analyzer front-end, receive only)
    Bb60,
}

impl Backend {
    /// Human-readable family name
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Kc908 => "KC 908",
            Backend::Bb60 => "BB 60",
        }
    }
}

/// Uniform control surface over one opened SDR device.
///
/// Implementations own an opaque handle created by their backend's `find`
/// and release it on drop; no operation is reachable after that point.
///
/// # Contract
///
/// - `read` blocks with an internal timeout and **must** return (with data,
///   a timeout, or a failure) within a bounded interval after `stop` is
///   invoked on the same device from any thread. Cancellation of the
///   acquisition task leans on this.
/// - `tune` is an atomic register write independent of the read path and is
///   safe to call concurrently with an in-flight `read`.
/// - Setters that a backend cannot express return
///   [`DeviceError::NotSupported`]; the coordinator treats that as "skip",
///   not as a failure.
pub trait SdrDevice: Send + Sync {
    /// Which hardware family this device belongs to
    fn backend(&self) -> Backend;

    /// Device serial number as reported by the hardware
    fn serial(&self) -> &str;

    /// Capability ranges, queried once at open
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Wire format of `read` output
    fn sample_format(&self) -> SampleFormat;

    /// Current polled health
    fn status(&self) -> DeviceStatus;

    /// Whether gain and attenuation can change while streaming
    fn supports_live_gain(&self) -> bool {
        false
    }

    /// Retune the given path. Hot: safe while streaming.
    fn tune(&self, frequency_hz: u64, direction: Direction) -> Result<(), DeviceError>;

    /// Select the RF port for the given path
    fn set_port(&self, port: u8, direction: Direction) -> Result<(), DeviceError>;

    /// Set the analog bandwidth for the given path
    fn set_bandwidth(&self, bandwidth_hz: f64, direction: Direction) -> Result<(), DeviceError>;

    /// Set front-end attenuation in dB
    fn set_attenuation(&self, attenuation: u8, direction: Direction) -> Result<(), DeviceError>;

    /// Set internal amplifier gain in dB
    fn set_gain(&self, gain: u8, direction: Direction) -> Result<(), DeviceError>;

    /// Set external amplifier gain in dB
    fn set_external_gain(&self, gain: u8, direction: Direction) -> Result<(), DeviceError>;

    /// Set the output decimation factor (power of two of the native rate)
    fn set_decimation(&self, factor: u32) -> Result<(), DeviceError>;

    /// Set the receive sample rate in Hz
    fn set_sample_rate(&self, rate_hz: f64) -> Result<(), DeviceError>;

    /// Set the reference level in dBm
    fn set_reference_level(&self, _dbm: f32) -> Result<(), DeviceError> {
        Err(DeviceError::NotSupported("reference level"))
    }

    /// Drop any internally buffered IQ backlog before the next read
    fn purge(&self) -> Result<(), DeviceError> {
        Err(DeviceError::NotSupported("purge"))
    }

    /// Begin streaming on the given path
    fn start(&self, direction: Direction) -> Result<(), DeviceError>;

    /// Stop streaming on the given path. Unblocks any pending `read`.
    fn stop(&self, direction: Direction) -> Result<(), DeviceError>;

    /// Blocking read of raw samples into `buf`; returns the byte count.
    ///
    /// Timeouts surface as [`DeviceError::Timeout`] and are retriable.
    fn read(&self, buf: &mut [u8]) -> Result<usize, DeviceError>;

    /// Blocking write of raw samples from `buf`; returns the byte count
    fn write(&self, buf: &[u8]) -> Result<usize, DeviceError>;

    /// The output rate actually achieved after `start`, which may differ
    /// from the requested rate
    fn query_actual_sample_rate(&self) -> Result<f64, DeviceError>;

    /// Pure read against the backend's calibration table.
    ///
    /// Never mutates device state. Untabulated frequencies yield the
    /// zeroed sentinel with status Unavailable, never stale data.
    fn query_calibration(
        &self,
        request: &CalibrationRequest,
    ) -> Result<CalibrationResult, DeviceError>;
}

/// Device discovery port.
///
/// `find` opens the configured device and transfers ownership of the fresh
/// handle to the returned instance. Each call opens at most one device; the
/// acquisition task never shares a handle across tasks.
pub trait DeviceConnector: Send + Sync {
    /// Locate and open the device, or report that none is present
    fn find(&self) -> Result<Arc<dyn SdrDevice>, DeviceError>;

    /// Serial numbers of matching devices currently on the bus
    fn enumerate(&self) -> Vec<String>;

    /// Human-readable description of what this connector looks for
    fn describe(&self) -> String;
}
