//! SDR Device Control Library
//!
//! This crate presents heterogeneous SDR hardware behind one polymorphic
//! control surface. Two hardware families are supported:
//!
//! - **KC 908**: wideband transceiver, interleaved 16-bit IQ, live gain and
//!   attenuation, factory calibration table
//! - **BB 60**: receive-only analyzer front-end, float IQ, batched
//!   configuration armed by `initiate`, no calibration table
//!
//! # Architecture
//!
//! Each backend module wraps its vendor SDK's raw operation surface as a
//! trait ([`kc908::Kc908Ops`], [`bb60::Bb60Api`]) and adapts it to the
//! uniform [`SdrDevice`] contract. Callers depend only on [`SdrDevice`] and
//! [`DeviceConnector`]; the vendor seam is where a real SDK binding or a
//! simulated device plugs in.
//!
//! Ownership of the opaque vendor handle is tagged per backend: a
//! [`kc908::Kc908Handle`] can only flow through KC operations, and the
//! opened device closes it when dropped. No operation is reachable after
//! close.
//!
//! # Example
//!
//! ```rust,ignore
//! use iq_device::kc908::{Kc908Connector, Kc908Model};
//! use iq_device::{DeviceConnector, Direction};
//!
//! let connector = Kc908Connector::new(vendor_ops, Kc908Model::Kc908One);
//! let device = connector.find()?;
//! device.tune(100_000_000, Direction::Rx)?;
//! ```

pub mod bb60;
pub mod calibration;
pub mod caps;
pub mod device;
pub mod error;
pub mod format;
pub mod kc908;

pub use calibration::{
    CalibrationRequest, CalibrationResult, CalibrationStatus, CalibrationTable,
};
pub use caps::{DeviceCapabilities, ParameterRange};
pub use device::{Backend, DeviceConnector, DeviceStatus, Direction, SdrDevice};
pub use error::{check_vendor, DeviceError};
pub use format::{SampleEncoding, SampleFormat};
