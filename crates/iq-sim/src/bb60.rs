//! Simulated BB 60 vendor API

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use iq_device::bb60::{Bb60Api, Bb60Handle, STATUS_NOT_STREAMING};
use iq_device::caps::{DeviceCapabilities, ParameterRange};
use iq_device::device::DeviceStatus;

/// Behavior knobs for the simulated BB 60
#[derive(Debug, Clone)]
pub struct SimBb60Config {
    /// Serials of the attached devices
    pub serials: Vec<u32>,
    /// Native ADC rate before decimation
    pub native_rate_hz: f64,
    /// How far the achieved rate falls short of nominal (clock trim); lets
    /// tests observe that the reported rate is the queried one, not the
    /// requested one
    pub rate_skew_hz: f64,
    /// How long a fetch waits for the stream to arm before reporting
    /// STATUS_NOT_STREAMING
    pub fetch_timeout: Duration,
    /// Extra teardown time inside `abort`, modeling a slow vendor call
    pub abort_delay: Duration,
}

impl Default for SimBb60Config {
    fn default() -> Self {
        Self {
            serials: vec![606_001],
            native_rate_hz: 40.0e6,
            rate_skew_hz: 25.0,
            fetch_timeout: Duration::from_millis(20),
            abort_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct SimState {
    streaming: bool,
    decimation: u32,
    bandwidth_hz: f64,
    center_hz: u64,
    gain: i32,
    attenuation: i32,
    reference_level: f32,
    phase: f32,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            streaming: false,
            decimation: 1,
            bandwidth_hz: 0.0,
            center_hz: 0,
            gain: -1,
            attenuation: -1,
            reference_level: 0.0,
            phase: 0.0,
        }
    }
}

/// Simulated BB 60 vendor API.
///
/// Wrap in an `Arc` and hand to [`iq_device::bb60::Bb60Connector`]; keep a
/// clone to inspect counters.
pub struct SimBb60 {
    config: SimBb60Config,
    state: Mutex<SimState>,
    wakeup: Condvar,
    open: AtomicBool,
    initiates: AtomicU32,
    aborts: AtomicU32,
    purges: AtomicU32,
}

impl SimBb60 {
    /// Create a simulator with the given knobs
    pub fn new(config: SimBb60Config) -> Self {
        Self {
            config,
            state: Mutex::new(SimState::default()),
            wakeup: Condvar::new(),
            open: AtomicBool::new(false),
            initiates: AtomicU32::new(0),
            aborts: AtomicU32::new(0),
            purges: AtomicU32::new(0),
        }
    }

    /// Simulator with default knobs
    pub fn with_defaults() -> Self {
        Self::new(SimBb60Config::default())
    }

    /// Number of `initiate` calls so far (one per stream arm)
    pub fn initiate_count(&self) -> u32 {
        self.initiates.load(Ordering::SeqCst)
    }

    /// Number of `abort` calls so far
    pub fn abort_count(&self) -> u32 {
        self.aborts.load(Ordering::SeqCst)
    }

    /// Number of `purge` calls so far
    pub fn purge_count(&self) -> u32 {
        self.purges.load(Ordering::SeqCst)
    }

    /// Last configuration applied at `initiate` (decimation, bandwidth)
    pub fn stream_geometry(&self) -> (u32, f64) {
        let state = self.lock();
        (state.decimation, state.bandwidth_hz)
    }

    /// The rate the simulator will report as achieved for a decimation
    pub fn achieved_rate(&self, decimation: u32) -> f64 {
        self.config.native_rate_hz / f64::from(decimation.max(1)) - self.config.rate_skew_hz
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Bb60Api for SimBb60 {
    fn serial_numbers(&self) -> Vec<u32> {
        self.config.serials.clone()
    }

    fn open_by_serial(&self, serial: u32) -> Result<Bb60Handle, i32> {
        if !self.config.serials.contains(&serial) {
            return Err(-1);
        }
        self.open.store(true, Ordering::SeqCst);
        tracing::debug!("sim: opened BB 60 serial {serial}");
        Ok(Bb60Handle(serial as i32))
    }

    fn close(&self, _handle: &Bb60Handle) -> i32 {
        self.open.store(false, Ordering::SeqCst);
        0
    }

    fn capabilities(&self, _handle: &Bb60Handle) -> DeviceCapabilities {
        DeviceCapabilities {
            valid: true,
            rx_frequency: ParameterRange::new(9_000, 1, 6_400_000_000),
            tx_frequency: ParameterRange::fixed(0),
            bandwidth: ParameterRange::new(200, 1, 27_000_000),
            attenuation: ParameterRange::new(0, 10, 30),
            gain: ParameterRange::new(0, 5, 35),
            if_gain: ParameterRange::fixed(0),
            sample_rate: ParameterRange::new(4_882, 1, 40_000_000),
        }
    }

    fn status(&self, _handle: &Bb60Handle) -> DeviceStatus {
        if self.open.load(Ordering::SeqCst) {
            DeviceStatus::Running
        } else {
            DeviceStatus::Disconnected
        }
    }

    fn configure_reference_level(&self, _handle: &Bb60Handle, dbm: f32) -> i32 {
        self.lock().reference_level = dbm;
        0
    }

    fn configure_gain_atten(&self, _handle: &Bb60Handle, gain: i32, atten: i32) -> i32 {
        let mut state = self.lock();
        state.gain = gain;
        state.attenuation = atten;
        0
    }

    fn configure_center(&self, _handle: &Bb60Handle, frequency_hz: u64) -> i32 {
        self.lock().center_hz = frequency_hz;
        0
    }

    fn configure_iq(&self, _handle: &Bb60Handle, decimation: u32, bandwidth_hz: f64) -> i32 {
        let mut state = self.lock();
        state.decimation = decimation.max(1);
        state.bandwidth_hz = bandwidth_hz;
        0
    }

    fn initiate(&self, _handle: &Bb60Handle) -> i32 {
        self.initiates.fetch_add(1, Ordering::SeqCst);
        self.lock().streaming = true;
        self.wakeup.notify_all();
        0
    }

    fn abort(&self, _handle: &Bb60Handle) -> i32 {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        if !self.config.abort_delay.is_zero() {
            std::thread::sleep(self.config.abort_delay);
        }
        self.lock().streaming = false;
        self.wakeup.notify_all();
        0
    }

    fn query_stream_parameters(&self, _handle: &Bb60Handle) -> Result<(f64, f64), i32> {
        let state = self.lock();
        Ok((self.achieved_rate(state.decimation), state.bandwidth_hz))
    }

    fn fetch_iq(&self, _handle: &Bb60Handle, buf: &mut [u8]) -> Result<usize, i32> {
        let deadline = Instant::now() + self.config.fetch_timeout;
        let mut state = self.lock();
        while !state.streaming {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(STATUS_NOT_STREAMING);
            }
            let (guard, _) = match self.wakeup.wait_timeout(state, remaining) {
                Ok(pair) => pair,
                Err(poisoned) => poisoned.into_inner(),
            };
            state = guard;
        }
        let step = std::f32::consts::TAU / 64.0;
        for pair in buf.chunks_exact_mut(8) {
            pair[0..4].copy_from_slice(&(state.phase.cos() * 0.25).to_le_bytes());
            pair[4..8].copy_from_slice(&(state.phase.sin() * 0.25).to_le_bytes());
            state.phase = (state.phase + step) % std::f32::consts::TAU;
        }
        Ok(buf.len())
    }

    fn purge(&self, _handle: &Bb60Handle) -> i32 {
        self.purges.fetch_add(1, Ordering::SeqCst);
        0
    }
}
