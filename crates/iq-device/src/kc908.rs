//! KC 908 family backend
//!
//! The vendor SDK exposes a flat operation table per device; this module
//! wraps it as [`Kc908Ops`] and adapts it to the uniform [`SdrDevice`]
//! contract. The KC family applies gain and attenuation as live register
//! writes, streams interleaved 16-bit IQ, and ships a factory calibration
//! table that is read out once when the device is opened.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::calibration::{CalibrationRequest, CalibrationResult, CalibrationTable};
use crate::caps::DeviceCapabilities;
use crate::device::{Backend, DeviceConnector, DeviceStatus, Direction, SdrDevice};
use crate::error::{check_vendor, DeviceError};
use crate::format::SampleFormat;

/// Concrete models within the KC 908 family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Kc908Model {
    /// KC 908-1
    Kc908One,
    /// KC 908-N
    Kc908N,
}

impl Kc908Model {
    /// Human-readable model name
    pub fn name(&self) -> &'static str {
        match self {
            Kc908Model::Kc908One => "KC 908-1",
            Kc908Model::Kc908N => "KC 908-N",
        }
    }
}

/// Opaque vendor handle, scoped to this backend.
///
/// Valid only between [`Kc908Ops::find`] and [`Kc908Ops::close`]; the owning
/// [`Kc908Device`] closes it on drop.
#[derive(Debug)]
pub struct Kc908Handle(pub u32);

/// Raw vendor operation table for the KC family.
///
/// This is the injection seam for the out-of-scope vendor SDK (and for the
/// simulated hardware used in tests). Setters return raw vendor status
/// codes: negative is a hard error, positive a warning, zero success.
/// `read` and `write` return false on timeout, and `read` is guaranteed by
/// the vendor to return within a bounded interval once `stop` has been
/// issued on the same handle.
pub trait Kc908Ops: Send + Sync {
    /// Locate a device of the given model and open it
    fn find(&self, model: Kc908Model) -> Option<Kc908Handle>;
    /// Release the handle
    fn close(&self, handle: &Kc908Handle);
    /// Serial number string
    fn serial(&self, handle: &Kc908Handle) -> String;
    /// Capability ranges
    fn capabilities(&self, handle: &Kc908Handle) -> DeviceCapabilities;
    /// Wire format of `read` output
    fn sample_format(&self, handle: &Kc908Handle) -> SampleFormat;
    /// Polled health
    fn status(&self, handle: &Kc908Handle) -> DeviceStatus;
    /// Read out the factory calibration table
    fn calibration_table(&self, handle: &Kc908Handle) -> CalibrationTable;

    /// Atomic frequency register write, independent of the read path
    fn set_frequency(&self, handle: &Kc908Handle, frequency_hz: u64, direction: Direction) -> i32;
    /// Select the RF port
    fn set_port(&self, handle: &Kc908Handle, port: u8, direction: Direction) -> i32;
    /// Set the analog bandwidth
    fn set_bandwidth(&self, handle: &Kc908Handle, bandwidth_hz: u32, direction: Direction) -> i32;
    /// Set front-end attenuation
    fn set_attenuation(&self, handle: &Kc908Handle, attenuation: u8, direction: Direction) -> i32;
    /// Set internal amplifier gain
    fn set_amp(&self, handle: &Kc908Handle, gain: u8, direction: Direction) -> i32;
    /// Set external amplifier gain
    fn set_external_amp(&self, handle: &Kc908Handle, gain: u8, direction: Direction) -> i32;
    /// Set the sample rate
    fn set_sample_rate(&self, handle: &Kc908Handle, rate_hz: u32, direction: Direction) -> i32;
    /// Begin streaming
    fn start(&self, handle: &Kc908Handle, direction: Direction) -> i32;
    /// Stop streaming; unblocks a pending `read`
    fn stop(&self, handle: &Kc908Handle, direction: Direction) -> i32;
    /// Blocking sample read; false on timeout
    fn read(&self, handle: &Kc908Handle, buf: &mut [u8]) -> bool;
    /// Blocking sample write; false on timeout
    fn write(&self, handle: &Kc908Handle, buf: &[u8]) -> bool;
}

/// An opened KC 908 device
pub struct Kc908Device {
    ops: Arc<dyn Kc908Ops>,
    handle: Kc908Handle,
    model: Kc908Model,
    serial: String,
    capabilities: DeviceCapabilities,
    format: SampleFormat,
    calibration: CalibrationTable,
    // Last applied rate; the KC family delivers exactly what was set.
    sample_rate_bits: AtomicU64,
}

impl std::fmt::Debug for Kc908Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kc908Device")
            .field("model", &self.model)
            .field("serial", &self.serial)
            .field("capabilities", &self.capabilities)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl Kc908Device {
    /// Default rate before any configuration is applied
    const DEFAULT_SAMPLE_RATE: f64 = 10.0e6;

    /// Locate and open a device of the given model.
    ///
    /// Queries serial, capabilities, wire format and the calibration table
    /// exactly once; they are immutable for the life of the handle.
    pub fn find(ops: Arc<dyn Kc908Ops>, model: Kc908Model) -> Result<Self, DeviceError> {
        let handle = ops
            .find(model)
            .ok_or_else(|| DeviceError::NotFound(model.name().to_string()))?;
        let serial = ops.serial(&handle);
        let capabilities = ops.capabilities(&handle);
        let format = ops.sample_format(&handle);
        let calibration = ops.calibration_table(&handle);
        tracing::info!(
            "opened {} (serial {}, {} calibration points)",
            model.name(),
            serial,
            calibration.len()
        );
        Ok(Self {
            ops,
            handle,
            model,
            serial,
            capabilities,
            format,
            calibration,
            sample_rate_bits: AtomicU64::new(Self::DEFAULT_SAMPLE_RATE.to_bits()),
        })
    }

    /// The model this device was opened as
    pub fn model(&self) -> Kc908Model {
        self.model
    }
}

impl SdrDevice for Kc908Device {
    fn backend(&self) -> Backend {
        Backend::Kc908
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn sample_format(&self) -> SampleFormat {
        self.format
    }

    fn status(&self) -> DeviceStatus {
        self.ops.status(&self.handle)
    }

    fn supports_live_gain(&self) -> bool {
        true
    }

    fn tune(&self, frequency_hz: u64, direction: Direction) -> Result<(), DeviceError> {
        check_vendor(
            self.ops.set_frequency(&self.handle, frequency_hz, direction),
            "set_frequency",
        )
    }

    fn set_port(&self, port: u8, direction: Direction) -> Result<(), DeviceError> {
        check_vendor(self.ops.set_port(&self.handle, port, direction), "set_port")
    }

    fn set_bandwidth(&self, bandwidth_hz: f64, direction: Direction) -> Result<(), DeviceError> {
        check_vendor(
            self.ops
                .set_bandwidth(&self.handle, bandwidth_hz as u32, direction),
            "set_bandwidth",
        )
    }

    fn set_attenuation(&self, attenuation: u8, direction: Direction) -> Result<(), DeviceError> {
        check_vendor(
            self.ops.set_attenuation(&self.handle, attenuation, direction),
            "set_attenuation",
        )
    }

    fn set_gain(&self, gain: u8, direction: Direction) -> Result<(), DeviceError> {
        check_vendor(self.ops.set_amp(&self.handle, gain, direction), "set_amp")
    }

    fn set_external_gain(&self, gain: u8, direction: Direction) -> Result<(), DeviceError> {
        check_vendor(
            self.ops.set_external_amp(&self.handle, gain, direction),
            "set_external_amp",
        )
    }

    fn set_decimation(&self, _factor: u32) -> Result<(), DeviceError> {
        // Rate selection on this family goes through set_sample_rate.
        Err(DeviceError::NotSupported("decimation"))
    }

    fn set_sample_rate(&self, rate_hz: f64) -> Result<(), DeviceError> {
        let snapped = self.capabilities.sample_rate.snap(rate_hz as i64);
        check_vendor(
            self.ops
                .set_sample_rate(&self.handle, snapped as u32, Direction::Rx),
            "set_sample_rate",
        )?;
        self.sample_rate_bits
            .store((snapped as f64).to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn start(&self, direction: Direction) -> Result<(), DeviceError> {
        check_vendor(self.ops.start(&self.handle, direction), "start")
    }

    fn stop(&self, direction: Direction) -> Result<(), DeviceError> {
        check_vendor(self.ops.stop(&self.handle, direction), "stop")
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        if self.ops.read(&self.handle, buf) {
            Ok(buf.len())
        } else {
            Err(DeviceError::Timeout)
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, DeviceError> {
        if self.ops.write(&self.handle, buf) {
            Ok(buf.len())
        } else {
            Err(DeviceError::Timeout)
        }
    }

    fn query_actual_sample_rate(&self) -> Result<f64, DeviceError> {
        Ok(f64::from_bits(self.sample_rate_bits.load(Ordering::Relaxed)))
    }

    fn query_calibration(
        &self,
        request: &CalibrationRequest,
    ) -> Result<CalibrationResult, DeviceError> {
        Ok(self.calibration.lookup(request.frequency_hz))
    }
}

impl Drop for Kc908Device {
    fn drop(&mut self) {
        tracing::debug!("closing {} (serial {})", self.model.name(), self.serial);
        self.ops.close(&self.handle);
    }
}

/// Connector that opens KC 908 devices of one model
pub struct Kc908Connector {
    ops: Arc<dyn Kc908Ops>,
    model: Kc908Model,
}

impl Kc908Connector {
    /// Create a connector over the given vendor operation table
    pub fn new(ops: Arc<dyn Kc908Ops>, model: Kc908Model) -> Self {
        Self { ops, model }
    }
}

impl DeviceConnector for Kc908Connector {
    fn find(&self) -> Result<Arc<dyn SdrDevice>, DeviceError> {
        let device = Kc908Device::find(self.ops.clone(), self.model)?;
        Ok(Arc::new(device))
    }

    fn enumerate(&self) -> Vec<String> {
        // The KC vendor API locates devices by model, not by serial list.
        Vec::new()
    }

    fn describe(&self) -> String {
        self.model.name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationStatus;
    use crate::caps::ParameterRange;
    use std::sync::atomic::{AtomicBool, AtomicU32};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockOps {
        present: AtomicBool,
        closed: AtomicBool,
        read_ok: AtomicBool,
        calls: Mutex<Vec<String>>,
        starts: AtomicU32,
    }

    impl MockOps {
        fn present() -> Self {
            let ops = Self::default();
            ops.present.store(true, Ordering::SeqCst);
            ops.read_ok.store(true, Ordering::SeqCst);
            ops
        }

        fn log(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    impl Kc908Ops for MockOps {
        fn find(&self, _model: Kc908Model) -> Option<Kc908Handle> {
            self.present
                .load(Ordering::SeqCst)
                .then_some(Kc908Handle(7))
        }

        fn close(&self, _handle: &Kc908Handle) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn serial(&self, _handle: &Kc908Handle) -> String {
            "KC-TEST-001".to_string()
        }

        fn capabilities(&self, _handle: &Kc908Handle) -> DeviceCapabilities {
            DeviceCapabilities {
                valid: true,
                sample_rate: ParameterRange::new(5_000_000, 5_000_000, 40_000_000),
                ..DeviceCapabilities::invalid()
            }
        }

        fn sample_format(&self, _handle: &Kc908Handle) -> SampleFormat {
            SampleFormat::int16_iq()
        }

        fn status(&self, _handle: &Kc908Handle) -> DeviceStatus {
            DeviceStatus::Running
        }

        fn calibration_table(&self, _handle: &Kc908Handle) -> CalibrationTable {
            let mut table = CalibrationTable::new();
            table.insert(
                100_000_000,
                crate::calibration::CalibrationEntry {
                    base_level: 1.5,
                    attenuation: [0.1, 0.2, 0.3],
                    internal_amp: [0.0; 5],
                    external_amp: [0.0; 2],
                    rssi_limit: -10.0,
                    field_limit: 90.0,
                },
            );
            table
        }

        fn set_frequency(&self, _h: &Kc908Handle, _hz: u64, _d: Direction) -> i32 {
            self.log("set_frequency");
            0
        }

        fn set_port(&self, _h: &Kc908Handle, _port: u8, _d: Direction) -> i32 {
            self.log("set_port");
            0
        }

        fn set_bandwidth(&self, _h: &Kc908Handle, _hz: u32, _d: Direction) -> i32 {
            self.log("set_bandwidth");
            0
        }

        fn set_attenuation(&self, _h: &Kc908Handle, _att: u8, _d: Direction) -> i32 {
            self.log("set_attenuation");
            -2
        }

        fn set_amp(&self, _h: &Kc908Handle, _gain: u8, _d: Direction) -> i32 {
            self.log("set_amp");
            1
        }

        fn set_external_amp(&self, _h: &Kc908Handle, _gain: u8, _d: Direction) -> i32 {
            0
        }

        fn set_sample_rate(&self, _h: &Kc908Handle, _hz: u32, _d: Direction) -> i32 {
            self.log("set_sample_rate");
            0
        }

        fn start(&self, _h: &Kc908Handle, _d: Direction) -> i32 {
            self.starts.fetch_add(1, Ordering::SeqCst);
            0
        }

        fn stop(&self, _h: &Kc908Handle, _d: Direction) -> i32 {
            0
        }

        fn read(&self, _h: &Kc908Handle, buf: &mut [u8]) -> bool {
            buf.fill(0);
            self.read_ok.load(Ordering::SeqCst)
        }

        fn write(&self, _h: &Kc908Handle, _buf: &[u8]) -> bool {
            true
        }
    }

    #[test]
    fn find_absent_device_reports_not_found() {
        let ops = Arc::new(MockOps::default());
        let err = Kc908Device::find(ops, Kc908Model::Kc908One).unwrap_err();
        assert!(matches!(err, DeviceError::NotFound(name) if name == "KC 908-1"));
    }

    #[test]
    fn open_queries_identity_once() {
        let ops = Arc::new(MockOps::present());
        let device = Kc908Device::find(ops, Kc908Model::Kc908N).unwrap();
        assert_eq!(device.serial(), "KC-TEST-001");
        assert_eq!(device.backend(), Backend::Kc908);
        assert!(device.capabilities().valid);
        assert!(device.supports_live_gain());
    }

    #[test]
    fn negative_vendor_code_surfaces_as_error() {
        let ops = Arc::new(MockOps::present());
        let device = Kc908Device::find(ops, Kc908Model::Kc908One).unwrap();
        let err = device.set_attenuation(10, Direction::Rx).unwrap_err();
        assert!(matches!(err, DeviceError::Vendor { code: -2, .. }));
    }

    #[test]
    fn positive_vendor_code_is_tolerated() {
        let ops = Arc::new(MockOps::present());
        let device = Kc908Device::find(ops, Kc908Model::Kc908One).unwrap();
        assert!(device.set_gain(15, Direction::Rx).is_ok());
    }

    #[test]
    fn failed_read_maps_to_timeout() {
        let ops = Arc::new(MockOps::present());
        let device = Kc908Device::find(ops.clone(), Kc908Model::Kc908One).unwrap();
        ops.read_ok.store(false, Ordering::SeqCst);
        let mut buf = [0u8; 16];
        assert!(matches!(device.read(&mut buf), Err(DeviceError::Timeout)));
    }

    #[test]
    fn sample_rate_snaps_to_supported_grid() {
        let ops = Arc::new(MockOps::present());
        let device = Kc908Device::find(ops, Kc908Model::Kc908One).unwrap();
        device.set_sample_rate(12_000_000.0).unwrap();
        assert_eq!(device.query_actual_sample_rate().unwrap(), 10_000_000.0);
    }

    #[test]
    fn decimation_is_not_supported_on_this_family() {
        let ops = Arc::new(MockOps::present());
        let device = Kc908Device::find(ops, Kc908Model::Kc908One).unwrap();
        assert!(matches!(
            device.set_decimation(4),
            Err(DeviceError::NotSupported(_))
        ));
    }

    #[test]
    fn calibration_lookup_hits_table() {
        let ops = Arc::new(MockOps::present());
        let device = Kc908Device::find(ops, Kc908Model::Kc908One).unwrap();
        let request = CalibrationRequest {
            port: 1,
            frequency_hz: 100_000_000,
            reference_level: -20.0,
        };
        let result = device.query_calibration(&request).unwrap();
        assert_eq!(result.status, CalibrationStatus::Exact);
        assert_eq!(result.base_level, 1.5);
    }

    #[test]
    fn drop_closes_handle() {
        let ops = Arc::new(MockOps::present());
        let device = Kc908Device::find(ops.clone(), Kc908Model::Kc908One).unwrap();
        assert!(!ops.closed.load(Ordering::SeqCst));
        drop(device);
        assert!(ops.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn connector_opens_trait_object() {
        let ops = Arc::new(MockOps::present());
        let connector = Kc908Connector::new(ops, Kc908Model::Kc908One);
        let device = connector.find().unwrap();
        assert_eq!(device.backend(), Backend::Kc908);
        assert_eq!(connector.describe(), "KC 908-1");
    }
}
