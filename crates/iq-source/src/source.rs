//! Public source handle
//!
//! [`SdrSource`] spawns the actor for one device instance and exposes the
//! synchronous-from-the-caller's-perspective entry points: each call
//! completes once the actor has finished (or failed) the transition.

use std::sync::Arc;

use iq_device::{CalibrationRequest, CalibrationResult, DeviceConnector, DeviceStatus};
use iq_stream::SampleStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::info;

use crate::actor::{run_source_actor, SourceActor, SourceCommand, BLOCK_PAIRS};
use crate::config::ConfigStore;
use crate::error::SourceError;
use crate::events::SourceEvent;

// Commands are rare; events can burst during reconfiguration.
const COMMAND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 256;

/// Handle to one spawned source instance.
///
/// Cloning is cheap; all clones drive the same actor. Dropping every handle
/// without calling [`shutdown`](Self::shutdown) also ends the actor (the
/// command channel closes), stopping any active stream on the way out.
#[derive(Clone)]
pub struct SdrSource {
    name: String,
    cmd_tx: mpsc::Sender<SourceCommand>,
    event_tx: broadcast::Sender<SourceEvent>,
    stream: SampleStream,
}

impl SdrSource {
    /// Load persisted configuration for `name` and spawn the actor.
    ///
    /// The device itself is not opened until the first [`start`](Self::start).
    pub fn spawn(
        name: impl Into<String>,
        connector: Arc<dyn DeviceConnector>,
        config_store: Arc<dyn ConfigStore>,
    ) -> Self {
        let name = name.into();
        let config = config_store.load(&name).unwrap_or_default();
        let stream = SampleStream::with_capacity(BLOCK_PAIRS);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (event_tx, _) = broadcast::channel(EVENT_QUEUE);

        let actor = SourceActor::new(
            name.clone(),
            connector,
            config_store,
            config,
            stream.clone(),
            event_tx.clone(),
        );
        tokio::spawn(run_source_actor(actor, cmd_rx));
        info!("source {name} spawned");

        Self {
            name,
            cmd_tx,
            event_tx,
            stream,
        }
    }

    /// Instance name, also the configuration key
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consumer side of the sample stream for the host signal path
    pub fn stream(&self) -> SampleStream {
        self.stream.clone()
    }

    /// Subscribe to the unified event stream
    pub fn subscribe(&self) -> broadcast::Receiver<SourceEvent> {
        self.event_tx.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SourceCommand,
    ) -> Result<T, SourceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SourceError::Closed)?;
        reply_rx.await.map_err(|_| SourceError::Closed)
    }

    /// Start streaming. A no-op when already streaming.
    pub async fn start(&self) -> Result<(), SourceError> {
        self.request(|reply| SourceCommand::Start { reply }).await?
    }

    /// Stop streaming and wait for the read loop to exit. A no-op when idle.
    pub async fn stop(&self) -> Result<(), SourceError> {
        self.request(|reply| SourceCommand::Stop { reply }).await?
    }

    /// Retune; applied live while streaming
    pub async fn tune(&self, frequency_hz: u64) -> Result<(), SourceError> {
        self.request(|reply| SourceCommand::Tune {
            frequency_hz,
            reply,
        })
        .await?
    }

    /// Select the RF input port (stream restart while streaming)
    pub async fn set_port(&self, port: u8) -> Result<(), SourceError> {
        self.request(|reply| SourceCommand::SetPort { port, reply })
            .await?
    }

    /// Set front-end attenuation; live on backends that support it
    pub async fn set_attenuation(&self, db: u8) -> Result<(), SourceError> {
        self.request(|reply| SourceCommand::SetAttenuation { db, reply })
            .await?
    }

    /// Set internal amplifier gain; live on backends that support it
    pub async fn set_gain(&self, db: u8) -> Result<(), SourceError> {
        self.request(|reply| SourceCommand::SetGain { db, reply })
            .await?
    }

    /// Set external amplifier gain; live on backends that support it
    pub async fn set_external_gain(&self, db: u8) -> Result<(), SourceError> {
        self.request(|reply| SourceCommand::SetExternalGain { db, reply })
            .await?
    }

    /// Set the IF bandwidth; clamped to the valid range for the current
    /// decimation (stream restart while streaming)
    pub async fn set_bandwidth(&self, bandwidth_hz: f64) -> Result<(), SourceError> {
        self.request(|reply| SourceCommand::SetBandwidth {
            bandwidth_hz,
            reply,
        })
        .await?
    }

    /// Set the decimation index, factor 2^index (stream restart while
    /// streaming)
    pub async fn set_decimation(&self, index: u8) -> Result<(), SourceError> {
        self.request(|reply| SourceCommand::SetDecimation { index, reply })
            .await?
    }

    /// Set the requested sample rate (stream restart while streaming)
    pub async fn set_sample_rate(&self, rate_hz: f64) -> Result<(), SourceError> {
        self.request(|reply| SourceCommand::SetSampleRate { rate_hz, reply })
            .await?
    }

    /// Set the reference level (stream restart while streaming)
    pub async fn set_reference_level(&self, dbm: f32) -> Result<(), SourceError> {
        self.request(|reply| SourceCommand::SetReferenceLevel { dbm, reply })
            .await?
    }

    /// Ask the backend to drop its buffered IQ backlog
    pub async fn purge(&self) -> Result<(), SourceError> {
        self.request(|reply| SourceCommand::Purge { reply }).await?
    }

    /// Polled device status; None when no device is open
    pub async fn status(&self) -> Result<Option<DeviceStatus>, SourceError> {
        self.request(|reply| SourceCommand::QueryStatus { reply })
            .await
    }

    /// Query the backend calibration table
    pub async fn calibration(
        &self,
        request: CalibrationRequest,
    ) -> Result<CalibrationResult, SourceError> {
        self.request(|reply| SourceCommand::QueryCalibration { request, reply })
            .await?
    }

    /// Stop any active stream and end the actor
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(SourceCommand::Shutdown).await;
    }
}
