//! Error types for device control

use thiserror::Error;

/// Errors surfaced by the device control interface
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No matching device is present on the bus
    #[error("device not found: {0}")]
    NotFound(String),

    /// A vendor call returned a hard (negative) status code
    #[error("vendor error in {context}: code {code}")]
    Vendor {
        /// Which vendor call failed
        context: &'static str,
        /// Raw vendor status code
        code: i32,
    },

    /// A blocking call returned without data before its internal deadline
    #[error("read timed out")]
    Timeout,

    /// The device accepted `start` but is not delivering samples yet
    #[error("device not streaming yet")]
    NotReady,

    /// The operation has no meaning on this backend
    #[error("not supported on this backend: {0}")]
    NotSupported(&'static str),

    /// The device dropped off the bus mid-operation
    #[error("device disconnected")]
    Disconnected,
}

impl DeviceError {
    /// Whether a read loop may retry after this error without tearing down
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::Timeout | DeviceError::NotReady)
    }
}

/// Classify a raw vendor status code.
///
/// Negative codes are hard errors and abort the calling operation. Positive
/// codes are warnings: logged, then treated as success. Zero is success.
pub fn check_vendor(code: i32, context: &'static str) -> Result<(), DeviceError> {
    if code < 0 {
        return Err(DeviceError::Vendor { context, code });
    }
    if code > 0 {
        tracing::warn!("vendor warning in {}: code {}", context, code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_code_is_hard_error() {
        let err = check_vendor(-3, "configure").unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Vendor {
                context: "configure",
                code: -3
            }
        ));
    }

    #[test]
    fn positive_code_is_warning() {
        assert!(check_vendor(2, "configure").is_ok());
        assert!(check_vendor(0, "configure").is_ok());
    }

    #[test]
    fn transient_classification() {
        assert!(DeviceError::Timeout.is_transient());
        assert!(DeviceError::NotReady.is_transient());
        assert!(!DeviceError::Disconnected.is_transient());
        assert!(!DeviceError::NotFound("x".into()).is_transient());
    }
}
