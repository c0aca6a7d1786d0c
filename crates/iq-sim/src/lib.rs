//! Simulated SDR vendor hardware
//!
//! Implements the raw vendor seams of both hardware families
//! ([`iq_device::kc908::Kc908Ops`], [`iq_device::bb60::Bb60Api`]) against
//! synthetic signal generation, so the whole acquisition stack can be
//! exercised without a physical device. The simulators honor the contracts
//! the real SDKs promise, most importantly that a blocking read returns
//! within a bounded interval once stop/abort is issued, and add failure
//! injection knobs and call counters for tests.

mod kc908;
mod bb60;

pub use bb60::{SimBb60, SimBb60Config};
pub use kc908::{Counters, SimKc908, SimKc908Config};
