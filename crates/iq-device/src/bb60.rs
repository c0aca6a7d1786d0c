//! BB 60 family backend
//!
//! The BB family is a receive-only spectrum analyzer front-end. Its vendor
//! API applies configuration as a batch: individual `configure_*` calls cache
//! values and `initiate` arms the stream, after which the achieved sample
//! rate must be queried back (it can differ from the request). Gain and
//! attenuation are not live on this family; the coordinator restarts the
//! stream to change them. There is no factory calibration table, so every
//! calibration query answers with the unavailable sentinel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::calibration::{CalibrationRequest, CalibrationResult};
use crate::caps::DeviceCapabilities;
use crate::device::{Backend, DeviceConnector, DeviceStatus, Direction, SdrDevice};
use crate::error::{check_vendor, DeviceError};
use crate::format::SampleFormat;

/// Vendor status code: the device accepted `initiate` but has not buffered
/// samples yet; retriable after a short sleep
pub const STATUS_NOT_STREAMING: i32 = -8;
/// Vendor status code: a blocking fetch returned empty before its deadline
pub const STATUS_TIMEOUT: i32 = -9;

/// Gain selector meaning "let the device choose"
pub const AUTO_GAIN: i32 = -1;
/// Attenuation selector meaning "let the device choose"
pub const AUTO_ATTEN: i32 = -1;

/// Opaque vendor handle, scoped to this backend
#[derive(Debug)]
pub struct Bb60Handle(pub i32);

/// Raw vendor API surface for the BB family.
///
/// Status codes follow the vendor convention: negative hard error, positive
/// warning, zero success. `fetch_iq` fills interleaved little-endian float
/// IQ bytes and is guaranteed to return within a bounded interval once
/// `abort` has been issued on the same handle.
pub trait Bb60Api: Send + Sync {
    /// Serials of all devices currently attached
    fn serial_numbers(&self) -> Vec<u32>;
    /// Open a device by serial
    fn open_by_serial(&self, serial: u32) -> Result<Bb60Handle, i32>;
    /// Release the handle
    fn close(&self, handle: &Bb60Handle) -> i32;
    /// Capability ranges
    fn capabilities(&self, handle: &Bb60Handle) -> DeviceCapabilities;
    /// Polled health
    fn status(&self, handle: &Bb60Handle) -> DeviceStatus;

    /// Cache the reference level for the next `initiate`
    fn configure_reference_level(&self, handle: &Bb60Handle, dbm: f32) -> i32;
    /// Cache gain and attenuation for the next `initiate`
    fn configure_gain_atten(&self, handle: &Bb60Handle, gain: i32, atten: i32) -> i32;
    /// Retune the IQ center; atomic and safe while streaming
    fn configure_center(&self, handle: &Bb60Handle, frequency_hz: u64) -> i32;
    /// Cache decimation and IF bandwidth for the next `initiate`
    fn configure_iq(&self, handle: &Bb60Handle, decimation: u32, bandwidth_hz: f64) -> i32;
    /// Arm the IQ stream with the cached configuration
    fn initiate(&self, handle: &Bb60Handle) -> i32;
    /// Tear down the stream; unblocks a pending `fetch_iq`
    fn abort(&self, handle: &Bb60Handle) -> i32;
    /// Achieved (sample rate, bandwidth) after `initiate`
    fn query_stream_parameters(&self, handle: &Bb60Handle) -> Result<(f64, f64), i32>;
    /// Blocking fetch of interleaved float IQ bytes; returns the byte count
    fn fetch_iq(&self, handle: &Bb60Handle, buf: &mut [u8]) -> Result<usize, i32>;
    /// Drop the device-side IQ backlog before the next fetch
    fn purge(&self, handle: &Bb60Handle) -> i32;
}

#[derive(Debug, Clone, Copy)]
struct Bb60Config {
    reference_level: f32,
    gain: i32,
    attenuation: i32,
    center_hz: u64,
    decimation: u32,
    bandwidth_hz: f64,
}

impl Default for Bb60Config {
    fn default() -> Self {
        Self {
            reference_level: -20.0,
            gain: AUTO_GAIN,
            attenuation: AUTO_ATTEN,
            center_hz: 100_000_000,
            decimation: 64,
            bandwidth_hz: 500_000.0,
        }
    }
}

/// An opened BB 60 device
pub struct Bb60Device {
    api: Arc<dyn Bb60Api>,
    handle: Bb60Handle,
    serial: String,
    capabilities: DeviceCapabilities,
    pending: Mutex<Bb60Config>,
    streaming: AtomicBool,
    actual_rate_bits: AtomicU64,
}

impl std::fmt::Debug for Bb60Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bb60Device")
            .field("serial", &self.serial)
            .field("capabilities", &self.capabilities)
            .field("streaming", &self.streaming)
            .finish_non_exhaustive()
    }
}

impl Bb60Device {
    /// Open the device with the given serial, or the first attached device
    /// when `serial` is None
    pub fn open(api: Arc<dyn Bb60Api>, serial: Option<u32>) -> Result<Self, DeviceError> {
        let serial = match serial {
            Some(serial) => serial,
            None => *api
                .serial_numbers()
                .first()
                .ok_or_else(|| DeviceError::NotFound("BB 60".to_string()))?,
        };
        let handle = api.open_by_serial(serial).map_err(|code| {
            if code < 0 {
                DeviceError::Vendor {
                    context: "open_by_serial",
                    code,
                }
            } else {
                DeviceError::NotFound(format!("BB 60 serial {serial}"))
            }
        })?;
        let capabilities = api.capabilities(&handle);
        tracing::info!("opened BB 60 (serial {serial})");
        Ok(Self {
            api,
            handle,
            serial: serial.to_string(),
            capabilities,
            pending: Mutex::new(Bb60Config::default()),
            streaming: AtomicBool::new(false),
            actual_rate_bits: AtomicU64::new(0.0f64.to_bits()),
        })
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Bb60Config> {
        // Config mutex is only contended between setters on the control
        // thread; a poisoned lock means a panic already took the actor down.
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }
}

impl SdrDevice for Bb60Device {
    fn backend(&self) -> Backend {
        Backend::Bb60
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn sample_format(&self) -> SampleFormat {
        SampleFormat::float32_iq()
    }

    fn status(&self) -> DeviceStatus {
        self.api.status(&self.handle)
    }

    fn tune(&self, frequency_hz: u64, direction: Direction) -> Result<(), DeviceError> {
        if direction == Direction::Tx {
            return Err(DeviceError::NotSupported("transmit"));
        }
        self.pending().center_hz = frequency_hz;
        check_vendor(
            self.api.configure_center(&self.handle, frequency_hz),
            "configure_center",
        )
    }

    fn set_port(&self, _port: u8, _direction: Direction) -> Result<(), DeviceError> {
        // Single RF input on this family.
        Err(DeviceError::NotSupported("port select"))
    }

    fn set_bandwidth(&self, bandwidth_hz: f64, direction: Direction) -> Result<(), DeviceError> {
        if direction == Direction::Tx {
            return Err(DeviceError::NotSupported("transmit"));
        }
        self.pending().bandwidth_hz = bandwidth_hz;
        Ok(())
    }

    fn set_attenuation(&self, attenuation: u8, _direction: Direction) -> Result<(), DeviceError> {
        self.pending().attenuation = i32::from(attenuation);
        Ok(())
    }

    fn set_gain(&self, gain: u8, _direction: Direction) -> Result<(), DeviceError> {
        self.pending().gain = i32::from(gain);
        Ok(())
    }

    fn set_external_gain(&self, _gain: u8, _direction: Direction) -> Result<(), DeviceError> {
        Err(DeviceError::NotSupported("external amplifier"))
    }

    fn set_decimation(&self, factor: u32) -> Result<(), DeviceError> {
        self.pending().decimation = factor.max(1);
        Ok(())
    }

    fn set_sample_rate(&self, _rate_hz: f64) -> Result<(), DeviceError> {
        // The output rate on this family is native rate / decimation.
        Err(DeviceError::NotSupported("direct sample rate"))
    }

    fn set_reference_level(&self, dbm: f32) -> Result<(), DeviceError> {
        self.pending().reference_level = dbm;
        Ok(())
    }

    fn purge(&self) -> Result<(), DeviceError> {
        check_vendor(self.api.purge(&self.handle), "purge")
    }

    fn start(&self, direction: Direction) -> Result<(), DeviceError> {
        if direction == Direction::Tx {
            return Err(DeviceError::NotSupported("transmit"));
        }
        let config = *self.pending();
        check_vendor(
            self.api
                .configure_reference_level(&self.handle, config.reference_level),
            "configure_reference_level",
        )?;
        check_vendor(
            self.api
                .configure_gain_atten(&self.handle, config.gain, config.attenuation),
            "configure_gain_atten",
        )?;
        check_vendor(
            self.api.configure_center(&self.handle, config.center_hz),
            "configure_center",
        )?;
        check_vendor(
            self.api
                .configure_iq(&self.handle, config.decimation, config.bandwidth_hz),
            "configure_iq",
        )?;
        check_vendor(self.api.initiate(&self.handle), "initiate")?;

        let (rate, bandwidth) = self.api.query_stream_parameters(&self.handle).map_err(|code| {
            DeviceError::Vendor {
                context: "query_stream_parameters",
                code,
            }
        })?;
        self.actual_rate_bits.store(rate.to_bits(), Ordering::SeqCst);
        self.streaming.store(true, Ordering::SeqCst);
        tracing::info!("BB 60 streaming at {rate} sps, {bandwidth} Hz bandwidth");
        Ok(())
    }

    fn stop(&self, direction: Direction) -> Result<(), DeviceError> {
        if direction == Direction::Tx {
            return Err(DeviceError::NotSupported("transmit"));
        }
        self.streaming.store(false, Ordering::SeqCst);
        check_vendor(self.api.abort(&self.handle), "abort")
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        match self.api.fetch_iq(&self.handle, buf) {
            Ok(n) => Ok(n),
            Err(STATUS_NOT_STREAMING) => Err(DeviceError::NotReady),
            Err(STATUS_TIMEOUT) => Err(DeviceError::Timeout),
            Err(code) => Err(DeviceError::Vendor {
                context: "fetch_iq",
                code,
            }),
        }
    }

    fn write(&self, _buf: &[u8]) -> Result<usize, DeviceError> {
        Err(DeviceError::NotSupported("transmit"))
    }

    fn query_actual_sample_rate(&self) -> Result<f64, DeviceError> {
        if !self.is_streaming() {
            // Last achieved rate; zero before the first start.
            let bits = self.actual_rate_bits.load(Ordering::SeqCst);
            return Ok(f64::from_bits(bits));
        }
        let (rate, _) = self
            .api
            .query_stream_parameters(&self.handle)
            .map_err(|code| DeviceError::Vendor {
                context: "query_stream_parameters",
                code,
            })?;
        Ok(rate)
    }

    fn query_calibration(
        &self,
        request: &CalibrationRequest,
    ) -> Result<CalibrationResult, DeviceError> {
        // No factory table on this family.
        Ok(CalibrationResult::unavailable(request.frequency_hz))
    }
}

impl Drop for Bb60Device {
    fn drop(&mut self) {
        if self.is_streaming() {
            let _ = self.api.abort(&self.handle);
        }
        tracing::debug!("closing BB 60 (serial {})", self.serial);
        let _ = self.api.close(&self.handle);
    }
}

/// Connector that opens BB 60 devices, optionally pinned to one serial
pub struct Bb60Connector {
    api: Arc<dyn Bb60Api>,
    serial: Option<u32>,
}

impl Bb60Connector {
    /// Create a connector over the given vendor API
    pub fn new(api: Arc<dyn Bb60Api>, serial: Option<u32>) -> Self {
        Self { api, serial }
    }
}

impl DeviceConnector for Bb60Connector {
    fn find(&self) -> Result<Arc<dyn SdrDevice>, DeviceError> {
        let device = Bb60Device::open(self.api.clone(), self.serial)?;
        Ok(Arc::new(device))
    }

    fn enumerate(&self) -> Vec<String> {
        self.api
            .serial_numbers()
            .into_iter()
            .map(|serial| serial.to_string())
            .collect()
    }

    fn describe(&self) -> String {
        match self.serial {
            Some(serial) => format!("BB 60 serial {serial}"),
            None => "BB 60 (first attached)".to_string(),
        }
    }
}
