//! Per-device persisted configuration
//!
//! The coordinator never touches disk itself: it loads one [`SourceConfig`]
//! through the injected [`ConfigStore`] when the source is created and
//! writes it back after every accepted change. Keys are device names or
//! serials, chosen by the embedding application.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Everything the host persists for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Device serial to reopen, when the backend supports selection
    pub serial: Option<String>,
    /// Center frequency in Hz
    pub frequency_hz: u64,
    /// Requested sample rate in Hz (rate-list backends)
    pub sample_rate_hz: f64,
    /// RF input port
    pub port: u8,
    /// Front-end attenuation in dB
    pub attenuation: u8,
    /// Internal amplifier gain in dB
    pub gain: u8,
    /// External amplifier gain in dB
    pub external_gain: u8,
    /// Decimation index, factor 2^index (decimation backends)
    pub decimation_index: u8,
    /// Reference level in dBm (analyzer backends)
    pub reference_level_dbm: f32,
    /// Requested IF bandwidth in Hz
    pub bandwidth_hz: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            serial: None,
            frequency_hz: 100_000_000,
            sample_rate_hz: 10.0e6,
            port: 1,
            attenuation: 0,
            gain: 15,
            external_gain: 1,
            decimation_index: 6,
            reference_level_dbm: -20.0,
            bandwidth_hz: 500_000.0,
        }
    }
}

/// Configuration persistence port.
///
/// Implementations decide where and how values live (JSON file, registry,
/// host application settings); the coordinator only calls `load` once at
/// construction and `save` after each accepted change.
pub trait ConfigStore: Send + Sync {
    /// Fetch the persisted configuration for a device key, if any
    fn load(&self, key: &str) -> Option<SourceConfig>;

    /// Persist the configuration for a device key
    fn save(&self, key: &str, config: &SourceConfig);
}

/// In-memory store for tests and demos
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: Mutex<HashMap<String, SourceConfig>>,
}

impl MemoryConfigStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a configuration
    pub fn with(key: &str, config: SourceConfig) -> Self {
        let store = Self::new();
        store.save(key, &config);
        store
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self, key: &str) -> Option<SourceConfig> {
        match self.entries.lock() {
            Ok(entries) => entries.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }

    fn save(&self, key: &str, config: &SourceConfig) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(key.to_string(), config.clone());
    }
}
