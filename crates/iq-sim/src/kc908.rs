//! Simulated KC 908 vendor operation table

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use iq_device::calibration::{CalibrationEntry, CalibrationTable};
use iq_device::caps::{DeviceCapabilities, ParameterRange};
use iq_device::device::{DeviceStatus, Direction};
use iq_device::format::SampleFormat;
use iq_device::kc908::{Kc908Handle, Kc908Model, Kc908Ops};

/// Behavior knobs for the simulated KC 908
#[derive(Debug, Clone)]
pub struct SimKc908Config {
    /// Serial reported by the device
    pub serial: String,
    /// How long an idle read blocks before reporting a timeout
    pub read_timeout: Duration,
    /// When set, reads while streaming produce no data and block until
    /// hardware stop is issued. Models a stalled vendor call and lets
    /// tests prove that cancellation does not rely on data arriving
    pub hold_reads: bool,
    /// Full-scale tone amplitude, 0.0..=1.0
    pub amplitude: f64,
}

impl Default for SimKc908Config {
    fn default() -> Self {
        Self {
            serial: "SIM-908-0001".to_string(),
            read_timeout: Duration::from_millis(50),
            hold_reads: false,
            amplitude: 0.5,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    streaming: bool,
    frequency_hz: u64,
    port: u8,
    attenuation: u8,
    gain: u8,
    external_gain: u8,
    sample_rate_hz: u32,
    phase: f64,
}

/// Simulated KC 908 vendor hardware.
///
/// Wrap in an `Arc` and hand to [`iq_device::kc908::Kc908Connector`]; keep a
/// clone to inspect counters and inject failures from tests.
pub struct SimKc908 {
    config: SimKc908Config,
    state: Mutex<SimState>,
    wakeup: Condvar,
    present: AtomicBool,
    closed: AtomicBool,
    fail_next_reads: AtomicU32,
    counters: Counters,
}

/// Call counters exposed to tests
#[derive(Debug, Default)]
pub struct Counters {
    /// Successful `find` calls
    pub finds: AtomicU32,
    /// Hardware `start` calls
    pub starts: AtomicU32,
    /// Hardware `stop` calls
    pub stops: AtomicU32,
    /// Completed `read` calls, successful or not
    pub reads: AtomicU32,
}

impl SimKc908 {
    /// Create a simulator with the given knobs
    pub fn new(config: SimKc908Config) -> Self {
        Self {
            config,
            state: Mutex::new(SimState::default()),
            wakeup: Condvar::new(),
            present: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            fail_next_reads: AtomicU32::new(0),
            counters: Counters::default(),
        }
    }

    /// Simulator with default knobs
    pub fn with_defaults() -> Self {
        Self::new(SimKc908Config::default())
    }

    /// Make subsequent `find` calls fail (device unplugged)
    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }

    /// Fail the next `count` reads with a timeout indication
    pub fn fail_reads(&self, count: u32) {
        self.fail_next_reads.store(count, Ordering::SeqCst);
    }

    /// Whether `close` has been called on the handle
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Call counters
    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Hardware start count so far
    pub fn start_count(&self) -> u32 {
        self.counters.starts.load(Ordering::SeqCst)
    }

    /// Hardware stop count so far
    pub fn stop_count(&self) -> u32 {
        self.counters.stops.load(Ordering::SeqCst)
    }

    /// Last applied front-end settings (port, att, gain, ext gain)
    pub fn front_end(&self) -> (u8, u8, u8, u8) {
        let state = self.lock();
        (
            state.port,
            state.attenuation,
            state.gain,
            state.external_gain,
        )
    }

    /// Last tuned frequency
    pub fn frequency(&self) -> u64 {
        self.lock().frequency_hz
    }

    /// Last applied sample rate
    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate_hz
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn fill_tone(&self, state: &mut SimState, buf: &mut [u8]) {
        // 1/100th of the sample rate keeps the tone well inside any band.
        let step = std::f64::consts::TAU / 100.0;
        let scale = self.config.amplitude * f64::from(i16::MAX);
        for pair in buf.chunks_exact_mut(4) {
            let re = (state.phase.cos() * scale) as i16;
            let im = (state.phase.sin() * scale) as i16;
            pair[0..2].copy_from_slice(&re.to_le_bytes());
            pair[2..4].copy_from_slice(&im.to_le_bytes());
            state.phase = (state.phase + step) % std::f64::consts::TAU;
        }
    }
}

impl Kc908Ops for SimKc908 {
    fn find(&self, model: Kc908Model) -> Option<Kc908Handle> {
        if !self.present.load(Ordering::SeqCst) {
            return None;
        }
        self.counters.finds.fetch_add(1, Ordering::SeqCst);
        self.closed.store(false, Ordering::SeqCst);
        tracing::debug!("sim: found {}", model.name());
        Some(Kc908Handle(1))
    }

    fn close(&self, _handle: &Kc908Handle) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn serial(&self, _handle: &Kc908Handle) -> String {
        self.config.serial.clone()
    }

    fn capabilities(&self, _handle: &Kc908Handle) -> DeviceCapabilities {
        DeviceCapabilities {
            valid: true,
            rx_frequency: ParameterRange::new(9_000, 1, 9_300_000_000),
            tx_frequency: ParameterRange::new(100_000, 1, 6_000_000_000),
            bandwidth: ParameterRange::new(200, 1, 40_000_000),
            attenuation: ParameterRange::new(0, 1, 31),
            gain: ParameterRange::new(0, 1, 30),
            if_gain: ParameterRange::new(0, 1, 40),
            sample_rate: ParameterRange::new(5_000_000, 5_000_000, 40_000_000),
        }
    }

    fn sample_format(&self, _handle: &Kc908Handle) -> SampleFormat {
        SampleFormat::int16_iq()
    }

    fn status(&self, _handle: &Kc908Handle) -> DeviceStatus {
        if self.present.load(Ordering::SeqCst) {
            DeviceStatus::Running
        } else {
            DeviceStatus::Disconnected
        }
    }

    fn calibration_table(&self, _handle: &Kc908Handle) -> CalibrationTable {
        let mut table = CalibrationTable::new();
        for (frequency, base) in [
            (100_000_000u64, 1.0f32),
            (500_000_000, 2.0),
            (1_000_000_000, 3.0),
        ] {
            table.insert(
                frequency,
                CalibrationEntry {
                    base_level: base,
                    attenuation: [base, base + 0.5, base + 1.0],
                    internal_amp: [base; 5],
                    external_amp: [base; 2],
                    rssi_limit: -10.0,
                    field_limit: 90.0,
                },
            );
        }
        table
    }

    fn set_frequency(&self, _handle: &Kc908Handle, frequency_hz: u64, _direction: Direction) -> i32 {
        self.lock().frequency_hz = frequency_hz;
        0
    }

    fn set_port(&self, _handle: &Kc908Handle, port: u8, _direction: Direction) -> i32 {
        self.lock().port = port;
        0
    }

    fn set_bandwidth(&self, _handle: &Kc908Handle, _bandwidth_hz: u32, _direction: Direction) -> i32 {
        0
    }

    fn set_attenuation(&self, _handle: &Kc908Handle, attenuation: u8, _direction: Direction) -> i32 {
        self.lock().attenuation = attenuation;
        0
    }

    fn set_amp(&self, _handle: &Kc908Handle, gain: u8, _direction: Direction) -> i32 {
        self.lock().gain = gain;
        0
    }

    fn set_external_amp(&self, _handle: &Kc908Handle, gain: u8, _direction: Direction) -> i32 {
        self.lock().external_gain = gain;
        0
    }

    fn set_sample_rate(&self, _handle: &Kc908Handle, rate_hz: u32, _direction: Direction) -> i32 {
        self.lock().sample_rate_hz = rate_hz;
        0
    }

    fn start(&self, _handle: &Kc908Handle, _direction: Direction) -> i32 {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        self.lock().streaming = true;
        self.wakeup.notify_all();
        0
    }

    fn stop(&self, _handle: &Kc908Handle, _direction: Direction) -> i32 {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        self.lock().streaming = false;
        self.wakeup.notify_all();
        0
    }

    fn read(&self, _handle: &Kc908Handle, buf: &mut [u8]) -> bool {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_reads.load(Ordering::SeqCst) > 0 {
            self.fail_next_reads.fetch_sub(1, Ordering::SeqCst);
            return false;
        }

        let mut state = self.lock();
        if self.config.hold_reads {
            // Model a vendor call that only returns once streaming is torn
            // down from another thread.
            while state.streaming {
                state = match self.wakeup.wait(state) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
            return false;
        }

        let deadline = Instant::now() + self.config.read_timeout;
        while !state.streaming {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, _) = match self.wakeup.wait_timeout(state, remaining) {
                Ok(pair) => pair,
                Err(poisoned) => poisoned.into_inner(),
            };
            state = guard;
        }
        self.fill_tone(&mut state, buf);
        true
    }

    fn write(&self, _handle: &Kc908Handle, _buf: &[u8]) -> bool {
        true
    }
}
