//! Source Actor
//!
//! All control of one device instance (start, stop, tune, live
//! reconfiguration) runs through this actor. Commands arrive on a channel
//! with oneshot replies and are processed strictly in order, which is what
//! serializes parameter changes against the acquisition state without locks:
//! a request that arrives while a stop/start cycle is in progress simply
//! waits in the mailbox, and consecutive queued cold changes collapse into a
//! single restart.
//!
//! The acquisition read loop itself runs on a blocking task owned by the
//! actor. Cancellation is two-layered: a run flag the loop checks each
//! iteration, plus the authoritative hardware stop and channel closure that
//! force a blocked vendor read to return.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use iq_device::{
    CalibrationRequest, CalibrationResult, DeviceConnector, DeviceError, DeviceStatus, Direction,
    SampleFormat, SdrDevice,
};
use iq_stream::SampleStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bandwidth::{clamp_bandwidth, decimation_factor, MAX_DECIMATION_INDEX};
use crate::config::{ConfigStore, SourceConfig};
use crate::convert::convert_block;
use crate::error::SourceError;
use crate::events::SourceEvent;

/// IQ pairs per read; balances vendor call overhead against latency
pub const BLOCK_PAIRS: usize = 16384;

// Backoff after a "not streaming yet" transient, bounded by design.
const NOT_READY_BACKOFF: Duration = Duration::from_millis(10);

/// Acquisition task lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// No read loop; the device may or may not be open
    Idle,
    /// Read loop running, samples flowing
    Streaming,
    /// Stop sequence in progress
    Stopping,
}

type Reply<T> = oneshot::Sender<T>;
type AckReply = Reply<Result<(), SourceError>>;

/// Commands handled by the source actor
pub(crate) enum SourceCommand {
    Start {
        reply: AckReply,
    },
    Stop {
        reply: AckReply,
    },
    Tune {
        frequency_hz: u64,
        reply: AckReply,
    },
    SetPort {
        port: u8,
        reply: AckReply,
    },
    SetAttenuation {
        db: u8,
        reply: AckReply,
    },
    SetGain {
        db: u8,
        reply: AckReply,
    },
    SetExternalGain {
        db: u8,
        reply: AckReply,
    },
    SetBandwidth {
        bandwidth_hz: f64,
        reply: AckReply,
    },
    SetDecimation {
        index: u8,
        reply: AckReply,
    },
    SetSampleRate {
        rate_hz: f64,
        reply: AckReply,
    },
    SetReferenceLevel {
        dbm: f32,
        reply: AckReply,
    },
    Purge {
        reply: AckReply,
    },
    QueryStatus {
        reply: Reply<Option<DeviceStatus>>,
    },
    QueryCalibration {
        request: CalibrationRequest,
        reply: Reply<Result<CalibrationResult, SourceError>>,
    },
    Shutdown,
}

/// One recorded parameter change, extracted from its command
enum Setting {
    Frequency(u64),
    Port(u8),
    Attenuation(u8),
    Gain(u8),
    ExternalGain(u8),
    Bandwidth(f64),
    Decimation(u8),
    SampleRate(f64),
    ReferenceLevel(f32),
}

/// Split a command into (setting, reply) if it is a parameter change
fn as_setting(cmd: SourceCommand) -> Result<(Setting, AckReply), SourceCommand> {
    match cmd {
        SourceCommand::Tune {
            frequency_hz,
            reply,
        } => Ok((Setting::Frequency(frequency_hz), reply)),
        SourceCommand::SetPort { port, reply } => Ok((Setting::Port(port), reply)),
        SourceCommand::SetAttenuation { db, reply } => Ok((Setting::Attenuation(db), reply)),
        SourceCommand::SetGain { db, reply } => Ok((Setting::Gain(db), reply)),
        SourceCommand::SetExternalGain { db, reply } => Ok((Setting::ExternalGain(db), reply)),
        SourceCommand::SetBandwidth {
            bandwidth_hz,
            reply,
        } => Ok((Setting::Bandwidth(bandwidth_hz), reply)),
        SourceCommand::SetDecimation { index, reply } => Ok((Setting::Decimation(index), reply)),
        SourceCommand::SetSampleRate { rate_hz, reply } => {
            Ok((Setting::SampleRate(rate_hz), reply))
        }
        SourceCommand::SetReferenceLevel { dbm, reply } => {
            Ok((Setting::ReferenceLevel(dbm), reply))
        }
        other => Err(other),
    }
}

/// State owned by the actor task
pub(crate) struct SourceActor {
    name: String,
    connector: Arc<dyn DeviceConnector>,
    config_store: Arc<dyn ConfigStore>,
    config: SourceConfig,
    device: Option<Arc<dyn SdrDevice>>,
    state: AcquisitionState,
    run: Arc<AtomicBool>,
    worker: Option<tokio::task::JoinHandle<()>>,
    stream: SampleStream,
    event_tx: broadcast::Sender<SourceEvent>,
    reported_rate: Option<f64>,
}

impl SourceActor {
    pub(crate) fn new(
        name: String,
        connector: Arc<dyn DeviceConnector>,
        config_store: Arc<dyn ConfigStore>,
        mut config: SourceConfig,
        stream: SampleStream,
        event_tx: broadcast::Sender<SourceEvent>,
    ) -> Self {
        // A stale store may carry an index past the table.
        config.decimation_index = config.decimation_index.min(MAX_DECIMATION_INDEX);
        Self {
            name,
            connector,
            config_store,
            config,
            device: None,
            state: AcquisitionState::Idle,
            run: Arc::new(AtomicBool::new(false)),
            worker: None,
            stream,
            event_tx,
            reported_rate: None,
        }
    }

    fn emit(&self, event: SourceEvent) {
        let _ = self.event_tx.send(event);
    }

    fn persist(&self) {
        self.config_store.save(&self.name, &self.config);
    }

    fn report_rate(&mut self, rate: f64) {
        if self.reported_rate != Some(rate) {
            self.reported_rate = Some(rate);
            self.emit(SourceEvent::SampleRateChanged {
                sample_rate_hz: rate,
            });
        }
    }

    /// Record a parameter change into the pending configuration
    fn record_setting(&mut self, setting: &Setting) -> Result<(), SourceError> {
        match *setting {
            Setting::Frequency(hz) => self.config.frequency_hz = hz,
            Setting::Port(port) => self.config.port = port,
            Setting::Attenuation(db) => self.config.attenuation = db,
            Setting::Gain(db) => self.config.gain = db,
            Setting::ExternalGain(db) => self.config.external_gain = db,
            Setting::Bandwidth(hz) => self.config.bandwidth_hz = hz,
            Setting::Decimation(index) => {
                if index > MAX_DECIMATION_INDEX {
                    return Err(SourceError::InvalidDecimation(index));
                }
                self.config.decimation_index = index;
            }
            Setting::SampleRate(hz) => self.config.sample_rate_hz = hz,
            Setting::ReferenceLevel(dbm) => self.config.reference_level_dbm = dbm,
        }
        Ok(())
    }

    /// Whether this setting can be applied without interrupting the stream
    fn is_hot(&self, setting: &Setting) -> bool {
        match setting {
            Setting::Frequency(_) => true,
            Setting::Attenuation(_) | Setting::Gain(_) | Setting::ExternalGain(_) => self
                .device
                .as_ref()
                .is_some_and(|device| device.supports_live_gain()),
            _ => false,
        }
    }

    /// Apply a hot setting directly through the device interface
    fn apply_hot(&self, setting: &Setting) -> Result<(), SourceError> {
        let Some(device) = &self.device else {
            return Ok(());
        };
        let result = match *setting {
            Setting::Frequency(hz) => device.tune(hz, Direction::Rx),
            Setting::Attenuation(db) => device.set_attenuation(db, Direction::Rx),
            Setting::Gain(db) => device.set_gain(db, Direction::Rx),
            Setting::ExternalGain(db) => device.set_external_gain(db, Direction::Rx),
            _ => Ok(()),
        };
        apply_optional(result, "live update")?;
        Ok(())
    }

    /// Handle one parameter-change command.
    ///
    /// Hot changes go straight to the hardware. Cold changes while streaming
    /// collapse with any further queued changes, then trigger exactly one
    /// stop → reconfigure → start cycle. Changes while idle are recorded and
    /// applied at the next start.
    async fn handle_setting(
        &mut self,
        setting: Setting,
        reply: AckReply,
        cmd_rx: &mut mpsc::Receiver<SourceCommand>,
    ) -> Option<SourceCommand> {
        if let Err(error) = self.record_setting(&setting) {
            let _ = reply.send(Err(error));
            return None;
        }
        self.persist();

        if self.state != AcquisitionState::Streaming {
            let _ = reply.send(Ok(()));
            return None;
        }

        if self.is_hot(&setting) {
            let _ = reply.send(self.apply_hot(&setting));
            return None;
        }

        // Cold change while streaming: absorb whatever else is already
        // queued so one restart covers the batch (latest values win).
        let carried = self.drain_queued_settings(cmd_rx);
        let result = self.restart_streaming().await;
        let _ = reply.send(result);
        carried
    }

    /// Consume immediately-available setting commands, recording each into
    /// the configuration. Returns the first non-setting command encountered.
    fn drain_queued_settings(
        &mut self,
        cmd_rx: &mut mpsc::Receiver<SourceCommand>,
    ) -> Option<SourceCommand> {
        loop {
            match cmd_rx.try_recv() {
                Ok(cmd) => match as_setting(cmd) {
                    Ok((setting, reply)) => {
                        let result = self.record_setting(&setting);
                        if result.is_ok() {
                            self.persist();
                        }
                        let _ = reply.send(result);
                    }
                    Err(other) => return Some(other),
                },
                Err(_) => return None,
            }
        }
    }

    /// Handle one command; may return a carried-over command that was pulled
    /// from the queue while collapsing cold changes
    pub(crate) async fn dispatch(
        &mut self,
        cmd: SourceCommand,
        cmd_rx: &mut mpsc::Receiver<SourceCommand>,
    ) -> Option<SourceCommand> {
        let cmd = match as_setting(cmd) {
            Ok((setting, reply)) => return self.handle_setting(setting, reply, cmd_rx).await,
            Err(cmd) => cmd,
        };
        match cmd {
            SourceCommand::Start { reply } => {
                let result = self.start_streaming().await;
                let _ = reply.send(result);
            }
            SourceCommand::Stop { reply } => {
                let result = self.stop_streaming().await;
                let _ = reply.send(result);
            }
            SourceCommand::Purge { reply } => {
                let result = match &self.device {
                    Some(device) if self.state == AcquisitionState::Streaming => {
                        apply_optional(device.purge(), "purge").map_err(SourceError::from)
                    }
                    _ => Ok(()),
                };
                let _ = reply.send(result);
            }
            SourceCommand::QueryStatus { reply } => {
                let _ = reply.send(self.device.as_ref().map(|device| device.status()));
            }
            SourceCommand::QueryCalibration { request, reply } => {
                let result = match &self.device {
                    Some(device) => device
                        .query_calibration(&request)
                        .map_err(SourceError::from),
                    None => Err(SourceError::DeviceNotFound(self.connector.describe())),
                };
                let _ = reply.send(result);
            }
            SourceCommand::Shutdown => {
                // Handled by the run loop.
            }
            _ => {}
        }
        None
    }

    /// Idle → Streaming
    pub(crate) async fn start_streaming(&mut self) -> Result<(), SourceError> {
        if self.state == AcquisitionState::Streaming {
            debug!("{}: start ignored, already streaming", self.name);
            return Ok(());
        }

        if self.device.is_none() {
            match self.connector.find() {
                Ok(device) => {
                    info!(
                        "{}: found {} (serial {})",
                        self.name,
                        device.backend().name(),
                        device.serial()
                    );
                    self.device = Some(device);
                }
                Err(error) => {
                    warn!("{}: device not found: {error}", self.name);
                    self.emit(SourceEvent::Error {
                        source: "find".to_string(),
                        message: error.to_string(),
                    });
                    return Err(SourceError::DeviceNotFound(self.connector.describe()));
                }
            }
        }
        let Some(device) = self.device.clone() else {
            return Err(SourceError::DeviceNotFound(self.connector.describe()));
        };

        if let Err(error) = self.apply_device_config(&device) {
            warn!("{}: configuration failed: {error}", self.name);
            self.emit(SourceEvent::Error {
                source: "configure".to_string(),
                message: error.to_string(),
            });
            // Release the half-configured handle rather than leak it.
            self.device = None;
            return Err(error);
        }

        if let Err(error) = device.start(Direction::Rx) {
            warn!("{}: hardware start failed: {error}", self.name);
            self.emit(SourceEvent::Error {
                source: "start".to_string(),
                message: error.to_string(),
            });
            self.device = None;
            return Err(SourceError::Hardware(error));
        }

        let rate = match device.query_actual_sample_rate() {
            Ok(rate) if rate > 0.0 => rate,
            _ => self.config.sample_rate_hz,
        };
        self.report_rate(rate);

        self.stream.clear_write_stop();
        self.run.store(true, Ordering::SeqCst);
        let worker = {
            let device = device.clone();
            let format = device.sample_format();
            let stream = self.stream.clone();
            let run = self.run.clone();
            let events = self.event_tx.clone();
            tokio::task::spawn_blocking(move || read_loop(device, format, stream, run, events))
        };
        self.worker = Some(worker);
        self.state = AcquisitionState::Streaming;
        self.emit(SourceEvent::Started {
            sample_rate_hz: rate,
        });
        info!("{}: streaming at {rate} sps", self.name);
        Ok(())
    }

    /// Streaming → Stopping → Idle.
    ///
    /// The ordering here is load-bearing and must not be rearranged:
    /// hardware stop first (unblocks a pending read), then close the write
    /// side (pending publish fails fast), then join the read loop, then
    /// reopen the channel for a future start.
    pub(crate) async fn stop_streaming(&mut self) -> Result<(), SourceError> {
        if self.state != AcquisitionState::Streaming {
            debug!("{}: stop ignored, not streaming", self.name);
            return Ok(());
        }
        self.state = AcquisitionState::Stopping;
        self.run.store(false, Ordering::SeqCst);

        if let Some(device) = &self.device {
            if let Err(error) = device.stop(Direction::Rx) {
                // Best-effort: keep tearing down so the handle is not
                // leaked in a half-configured state.
                warn!("{}: hardware stop failed: {error}", self.name);
            }
        }

        self.stream.stop_writer();

        if let Some(worker) = self.worker.take() {
            if let Err(error) = worker.await {
                warn!("{}: read loop task failed: {error}", self.name);
            }
        }

        self.stream.clear_write_stop();
        self.state = AcquisitionState::Idle;
        self.emit(SourceEvent::Stopped);
        info!("{}: stopped", self.name);
        Ok(())
    }

    async fn restart_streaming(&mut self) -> Result<(), SourceError> {
        info!("{}: restarting stream to apply configuration", self.name);
        self.stop_streaming().await?;
        self.start_streaming().await
    }

    /// Push the whole pending configuration through the device interface.
    ///
    /// Settings a backend cannot express are skipped; the bandwidth request
    /// is clamped into the valid range for the selected decimation before it
    /// is applied, with a warning when the request was out of range.
    fn apply_device_config(&mut self, device: &Arc<dyn SdrDevice>) -> Result<(), SourceError> {
        let config = self.config.clone();
        apply_optional(
            device.set_port(config.port, Direction::Rx),
            "port select",
        )?;
        device.tune(config.frequency_hz, Direction::Rx)?;
        apply_optional(
            device.set_attenuation(config.attenuation, Direction::Rx),
            "attenuation",
        )?;
        apply_optional(device.set_gain(config.gain, Direction::Rx), "gain")?;
        apply_optional(
            device.set_external_gain(config.external_gain, Direction::Rx),
            "external gain",
        )?;
        apply_optional(
            device.set_reference_level(config.reference_level_dbm),
            "reference level",
        )?;
        apply_optional(
            device.set_decimation(decimation_factor(config.decimation_index)),
            "decimation",
        )?;
        apply_optional(device.set_sample_rate(config.sample_rate_hz), "sample rate")?;

        let clamp = clamp_bandwidth(config.decimation_index, config.bandwidth_hz)?;
        if clamp.was_clamped() {
            warn!(
                "{}: bandwidth {} Hz out of range, applying {} Hz",
                self.name, clamp.requested_hz, clamp.applied_hz
            );
            self.emit(SourceEvent::BandwidthClamped {
                requested_hz: clamp.requested_hz,
                applied_hz: clamp.applied_hz,
            });
            self.config.bandwidth_hz = clamp.applied_hz;
            self.persist();
        }
        apply_optional(
            device.set_bandwidth(clamp.applied_hz, Direction::Rx),
            "bandwidth",
        )?;
        Ok(())
    }
}

/// Treat NotSupported as "skip on this backend", pass everything else through
fn apply_optional(result: Result<(), DeviceError>, what: &str) -> Result<(), DeviceError> {
    match result {
        Err(DeviceError::NotSupported(_)) => {
            debug!("{what} not supported on this backend, skipped");
            Ok(())
        }
        other => other,
    }
}

/// Run the actor until shutdown or until every handle is dropped
pub(crate) async fn run_source_actor(
    mut actor: SourceActor,
    mut cmd_rx: mpsc::Receiver<SourceCommand>,
) {
    let mut shutdown = false;
    while !shutdown {
        let Some(cmd) = cmd_rx.recv().await else {
            break;
        };
        let mut next = Some(cmd);
        while let Some(cmd) = next.take() {
            if matches!(cmd, SourceCommand::Shutdown) {
                shutdown = true;
                break;
            }
            next = actor.dispatch(cmd, &mut cmd_rx).await;
        }
    }
    if let Err(error) = actor.stop_streaming().await {
        warn!("{}: stop during shutdown failed: {error}", actor.name);
    }
    info!("{}: source actor stopped", actor.name);
}

/// The acquisition read loop, run on a blocking task.
///
/// Reads raw samples, converts them with the fixed symmetric scale, and
/// publishes blocks through the stream. Transient read failures are retried
/// while the run flag is set; a hard failure reports an error and exits,
/// leaving the next move (an explicit start) to the host.
fn read_loop(
    device: Arc<dyn SdrDevice>,
    format: SampleFormat,
    stream: SampleStream,
    run: Arc<AtomicBool>,
    events: broadcast::Sender<SourceEvent>,
) {
    let mut raw = vec![0u8; BLOCK_PAIRS * format.bytes_per_pair()];
    let mut block = Some(stream.acquire());
    debug!("read loop started");

    loop {
        if !run.load(Ordering::SeqCst) {
            break;
        }
        match device.read(&mut raw) {
            Ok(n) => {
                let mut current = block.take().unwrap_or_else(|| stream.acquire());
                convert_block(&raw[..n], format, &mut current);
                if current.is_empty() {
                    block = Some(current);
                    continue;
                }
                match stream.swap(current) {
                    Ok(next) => block = Some(next),
                    // Writer side closed: terminal, exit cleanly.
                    Err(_) => break,
                }
            }
            Err(error) if error.is_transient() => {
                if !run.load(Ordering::SeqCst) {
                    break;
                }
                if matches!(error, DeviceError::NotReady) {
                    std::thread::sleep(NOT_READY_BACKOFF);
                }
            }
            Err(error) => {
                // The run flag is the final authority: a failure after stop
                // is just the unblock we asked for.
                if run.load(Ordering::SeqCst) {
                    warn!("read failed mid-stream: {error}");
                    let _ = events.send(SourceEvent::Error {
                        source: "read".to_string(),
                        message: error.to_string(),
                    });
                }
                break;
            }
        }
    }

    if let Some(block) = block {
        stream.recycle(block);
    }
    debug!("read loop stopped");
}
