//! SDR Acquisition Coordinator
//!
//! This crate owns the life of one SDR source: the background acquisition
//! task that reads raw samples and publishes normalized complex blocks, and
//! the reconfiguration coordinator that applies live parameter changes
//! without racing the read loop.
//!
//! # Architecture
//!
//! Each source is an actor. Commands (start, stop, tune, parameter changes)
//! arrive on a channel and are processed strictly in order; events (achieved
//! sample rate, clamp warnings, errors) leave on a broadcast channel. The
//! read loop runs on a blocking task and hands sample blocks to the host
//! through the bounded swap channel in `iq-stream`.
//!
//! Parameters split into **hot** (frequency always; gain and attenuation on
//! backends that support live updates) applied directly through the device
//! interface, and **cold** (bandwidth, decimation, sample rate, reference
//! level, port) which trigger one stop → reconfigure → start cycle. Cold
//! requests that queue up while a cycle runs collapse into a single restart.
//!
//! # Example
//!
//! ```rust,ignore
//! use iq_source::{MemoryConfigStore, SdrSource};
//!
//! let source = SdrSource::spawn("kc-908", connector, Arc::new(MemoryConfigStore::new()));
//! source.start().await?;
//! let stream = source.stream();
//! // consume blocks from `stream` on the signal path...
//! source.tune(433_920_000).await?;
//! source.stop().await?;
//! ```

pub mod actor;
pub mod bandwidth;
pub mod config;
pub mod convert;
pub mod error;
pub mod events;
pub mod source;

pub use actor::{AcquisitionState, BLOCK_PAIRS};
pub use bandwidth::{
    clamp_bandwidth, decimation_factor, max_bandwidth, nominal_output_rate, ClampedBandwidth,
    MAX_DECIMATION_INDEX, MIN_BANDWIDTH_HZ, NATIVE_SAMPLE_RATE_HZ,
};
pub use config::{ConfigStore, MemoryConfigStore, SourceConfig};
pub use convert::convert_block;
pub use error::SourceError;
pub use events::SourceEvent;
pub use source::SdrSource;
