//! Error types for the acquisition coordinator

use thiserror::Error;

use iq_device::DeviceError;

/// Errors surfaced to callers of the source handle
#[derive(Debug, Error)]
pub enum SourceError {
    /// `find` located no device; the task stays Idle
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// A hardware call failed mid start or reconfigure; the handle was
    /// released and the task returned to Idle
    #[error("hardware error: {0}")]
    Hardware(#[from] DeviceError),

    /// Decimation index outside the supported table
    #[error("invalid decimation index {0} (supported 0..={max})", max = crate::bandwidth::MAX_DECIMATION_INDEX)]
    InvalidDecimation(u8),

    /// The source actor has shut down
    #[error("source closed")]
    Closed,
}
