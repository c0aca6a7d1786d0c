//! Integration tests for the acquisition coordinator
//!
//! These run the full stack (coordinator actor, blocking read loop, sample
//! stream, device adapters) against the simulated vendor hardware from
//! `iq-sim`, covering:
//! - streaming end to end with sample normalization
//! - the stop sequence's bounded-time guarantee with a stalled vendor read
//! - hot vs cold parameter dispatch and restart collapsing
//! - achieved-rate reporting and bandwidth clamping
//! - calibration lookup and failure paths

use std::sync::Arc;
use std::time::{Duration, Instant};

use iq_device::bb60::Bb60Connector;
use iq_device::kc908::{Kc908Connector, Kc908Model};
use iq_device::{CalibrationRequest, CalibrationStatus, DeviceStatus};
use iq_sim::{SimBb60, SimBb60Config, SimKc908, SimKc908Config};
use iq_source::{
    ConfigStore, MemoryConfigStore, SdrSource, SourceConfig, SourceError, SourceEvent,
};
use iq_stream::{SampleBlock, SampleStream};
use tokio::sync::broadcast;

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    pub fn kc_source(sim: Arc<SimKc908>) -> SdrSource {
        kc_source_with_store(sim, Arc::new(MemoryConfigStore::new()))
    }

    pub fn kc_source_with_store(sim: Arc<SimKc908>, store: Arc<MemoryConfigStore>) -> SdrSource {
        let connector = Arc::new(Kc908Connector::new(sim, Kc908Model::Kc908One));
        SdrSource::spawn("kc-test", connector, store)
    }

    pub fn bb_source(sim: Arc<SimBb60>) -> SdrSource {
        let connector = Arc::new(Bb60Connector::new(sim, None));
        SdrSource::spawn("bb-test", connector, Arc::new(MemoryConfigStore::new()))
    }

    /// Receive one block off the stream without blocking the runtime
    pub async fn recv_block(stream: &SampleStream) -> Option<SampleBlock> {
        let stream = stream.clone();
        tokio::task::spawn_blocking(move || stream.recv_timeout(Duration::from_secs(2)))
            .await
            .expect("recv task")
    }

    /// Wait until an event matching the predicate arrives
    pub async fn wait_for_event(
        events: &mut broadcast::Receiver<SourceEvent>,
        matches: impl Fn(&SourceEvent) -> bool,
    ) -> SourceEvent {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let event = events.recv().await.expect("event stream closed");
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }
}

// ============================================================================
// Streaming Tests
// ============================================================================

mod streaming {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn samples_flow_from_simulated_device() {
        let sim = Arc::new(SimKc908::with_defaults());
        let source = helpers::kc_source(sim.clone());

        source.start().await.unwrap();
        let stream = source.stream();

        let block = helpers::recv_block(&stream).await.expect("first block");
        assert!(!block.is_empty());
        // Normalized symmetric scale: everything inside [-1, 1).
        for sample in &block.samples {
            assert!(sample.re >= -1.0 && sample.re < 1.0);
            assert!(sample.im >= -1.0 && sample.im < 1.0);
        }
        stream.recycle(block);

        source.stop().await.unwrap();
        assert_eq!(sim.stop_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_while_streaming_is_a_noop() {
        let sim = Arc::new(SimKc908::with_defaults());
        let source = helpers::kc_source(sim.clone());

        source.start().await.unwrap();
        source.start().await.unwrap();
        assert_eq!(sim.start_count(), 1);

        source.stop().await.unwrap();
        assert_eq!(sim.start_count(), 1);
        assert_eq!(sim.stop_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_while_idle_is_a_noop() {
        let sim = Arc::new(SimKc908::with_defaults());
        let source = helpers::kc_source(sim.clone());
        source.stop().await.unwrap();
        assert_eq!(sim.stop_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stream_survives_transient_read_failures() {
        let sim = Arc::new(SimKc908::with_defaults());
        let source = helpers::kc_source(sim.clone());

        sim.fail_reads(3);
        source.start().await.unwrap();

        let block = helpers::recv_block(&source.stream()).await;
        assert!(block.is_some(), "stream should recover from timeouts");

        source.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn restart_reuses_the_stream_channel() {
        let sim = Arc::new(SimKc908::with_defaults());
        let source = helpers::kc_source(sim.clone());
        let stream = source.stream();

        source.start().await.unwrap();
        assert!(helpers::recv_block(&stream).await.is_some());
        source.stop().await.unwrap();

        source.start().await.unwrap();
        assert!(helpers::recv_block(&stream).await.is_some());
        source.stop().await.unwrap();

        assert_eq!(sim.start_count(), 2);
        assert_eq!(sim.stop_count(), 2);
    }
}

// ============================================================================
// Cancellation Tests
// ============================================================================

mod cancellation {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_is_bounded_even_with_a_stalled_read() {
        // hold_reads models a vendor read that never returns on its own;
        // only the hardware stop unblocks it.
        let sim = Arc::new(SimKc908::new(SimKc908Config {
            hold_reads: true,
            ..SimKc908Config::default()
        }));
        let source = helpers::kc_source(sim.clone());

        source.start().await.unwrap();
        // Let the read loop park inside the vendor call.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        source.stop().await.unwrap();
        let elapsed = started.elapsed();

        assert!(
            elapsed < Duration::from_secs(1),
            "stop took {elapsed:?}, cancellation must not wait for data"
        );
        assert_eq!(sim.stop_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_stops_the_actor() {
        let sim = Arc::new(SimKc908::with_defaults());
        let source = helpers::kc_source(sim.clone());

        source.start().await.unwrap();
        source.shutdown().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(matches!(source.start().await, Err(SourceError::Closed)));
        assert_eq!(sim.stop_count(), 1);
    }
}

// ============================================================================
// Start Failure Tests
// ============================================================================

mod start_failures {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_device_leaves_the_source_idle() {
        let sim = Arc::new(SimKc908::with_defaults());
        sim.set_present(false);
        let source = helpers::kc_source(sim.clone());
        let mut events = source.subscribe();

        let result = source.start().await;
        assert!(matches!(result, Err(SourceError::DeviceNotFound(_))));
        assert_eq!(sim.start_count(), 0);
        assert_eq!(source.status().await.unwrap(), None);

        let event = helpers::wait_for_event(&mut events, |event| {
            matches!(event, SourceEvent::Error { .. })
        })
        .await;
        assert!(matches!(event, SourceEvent::Error { source, .. } if source == "find"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_succeeds_after_device_reappears() {
        let sim = Arc::new(SimKc908::with_defaults());
        sim.set_present(false);
        let source = helpers::kc_source(sim.clone());

        assert!(source.start().await.is_err());
        sim.set_present(true);
        source.start().await.unwrap();
        assert_eq!(source.status().await.unwrap(), Some(DeviceStatus::Running));
        source.stop().await.unwrap();
    }
}

// ============================================================================
// Reconfiguration Tests
// ============================================================================

mod reconfiguration {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tune_is_hot_on_every_backend() {
        let sim = Arc::new(SimKc908::with_defaults());
        let source = helpers::kc_source(sim.clone());

        source.start().await.unwrap();
        source.tune(433_920_000).await.unwrap();

        assert_eq!(sim.frequency(), 433_920_000);
        // No restart for a frequency change.
        assert_eq!(sim.start_count(), 1);
        source.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn gain_is_hot_where_the_backend_supports_it() {
        let sim = Arc::new(SimKc908::with_defaults());
        let source = helpers::kc_source(sim.clone());

        source.start().await.unwrap();
        source.set_attenuation(12).await.unwrap();
        source.set_gain(22).await.unwrap();
        source.set_external_gain(3).await.unwrap();

        let (_, attenuation, gain, external_gain) = sim.front_end();
        assert_eq!(attenuation, 12);
        assert_eq!(gain, 22);
        assert_eq!(external_gain, 3);
        assert_eq!(sim.start_count(), 1, "live gain must not restart");
        source.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn gain_restarts_the_stream_on_batched_backends() {
        let sim = Arc::new(SimBb60::with_defaults());
        let source = helpers::bb_source(sim.clone());

        source.start().await.unwrap();
        assert_eq!(sim.initiate_count(), 1);

        source.set_gain(5).await.unwrap();
        assert_eq!(sim.initiate_count(), 2);
        assert_eq!(sim.abort_count(), 1);
        source.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cold_change_runs_exactly_one_cycle_and_reports_actual_rate() {
        let sim = Arc::new(SimBb60::with_defaults());
        let source = helpers::bb_source(sim.clone());
        let mut events = source.subscribe();

        source.start().await.unwrap();
        assert_eq!(sim.initiate_count(), 1);

        source.set_decimation(7).await.unwrap();

        assert_eq!(sim.initiate_count(), 2, "exactly one restart cycle");
        assert_eq!(sim.abort_count(), 1);
        let (decimation, _) = sim.stream_geometry();
        assert_eq!(decimation, 128);

        // The reported rate is what the hardware says it achieved, not the
        // nominal 312.5 kS/s request.
        let expected = sim.achieved_rate(128);
        let event = helpers::wait_for_event(&mut events, |event| {
            matches!(
                event,
                SourceEvent::SampleRateChanged { sample_rate_hz } if *sample_rate_hz == expected
            )
        })
        .await;
        assert!(matches!(event, SourceEvent::SampleRateChanged { .. }));
        source.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn queued_cold_changes_collapse_into_fewer_cycles() {
        let sim = Arc::new(SimBb60::new(SimBb60Config {
            abort_delay: Duration::from_millis(50),
            ..SimBb60Config::default()
        }));
        let source = helpers::bb_source(sim.clone());

        source.start().await.unwrap();
        assert_eq!(sim.initiate_count(), 1);

        let (a, b, c) = tokio::join!(
            source.set_decimation(3),
            source.set_bandwidth(1_000_000.0),
            source.set_reference_level(-30.0),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        // Three cold requests, but at most two restart cycles: whatever is
        // queued when a cycle begins is folded into it.
        assert!(
            sim.initiate_count() <= 3,
            "expected collapsed restarts, saw {}",
            sim.initiate_count() - 1
        );
        let (decimation, bandwidth) = sim.stream_geometry();
        assert_eq!(decimation, 8);
        assert_eq!(bandwidth, 1_000_000.0);
        source.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalid_decimation_is_rejected_without_restart() {
        let sim = Arc::new(SimBb60::with_defaults());
        let source = helpers::bb_source(sim.clone());

        source.start().await.unwrap();
        let result = source.set_decimation(14).await;
        assert!(matches!(result, Err(SourceError::InvalidDecimation(14))));
        assert_eq!(sim.initiate_count(), 1);
        source.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn changes_while_idle_apply_at_the_next_start() {
        let sim = Arc::new(SimKc908::with_defaults());
        let source = helpers::kc_source(sim.clone());

        source.set_attenuation(7).await.unwrap();
        source.tune(145_000_000).await.unwrap();
        assert_eq!(sim.start_count(), 0);

        source.start().await.unwrap();
        let (_, attenuation, _, _) = sim.front_end();
        assert_eq!(attenuation, 7);
        assert_eq!(sim.frequency(), 145_000_000);
        source.stop().await.unwrap();
    }
}

// ============================================================================
// Rate Reporting and Clamping Tests
// ============================================================================

mod rates_and_clamping {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reported_rate_is_the_queried_rate() {
        let sim = Arc::new(SimBb60::with_defaults());
        let source = helpers::bb_source(sim.clone());
        let mut events = source.subscribe();

        source.start().await.unwrap();

        // Default decimation index 6 -> factor 64 -> nominal 625 kS/s,
        // trimmed by the simulated clock skew.
        let expected = sim.achieved_rate(64);
        assert_ne!(expected, 625_000.0);
        let event = helpers::wait_for_event(&mut events, |event| {
            matches!(event, SourceEvent::Started { .. })
        })
        .await;
        assert!(matches!(
            event,
            SourceEvent::Started { sample_rate_hz } if sample_rate_hz == expected
        ));
        source.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn out_of_range_bandwidth_is_clamped_and_reported() {
        let sim = Arc::new(SimBb60::with_defaults());
        let source = helpers::bb_source(sim.clone());
        let mut events = source.subscribe();

        // 2 MHz request against the 500 kHz ceiling of decimation 64.
        source.set_bandwidth(2_000_000.0).await.unwrap();
        source.start().await.unwrap();

        let event = helpers::wait_for_event(&mut events, |event| {
            matches!(event, SourceEvent::BandwidthClamped { .. })
        })
        .await;
        assert!(matches!(
            event,
            SourceEvent::BandwidthClamped { requested_hz, applied_hz }
                if requested_hz == 2_000_000.0 && applied_hz == 500_000.0
        ));

        let (_, bandwidth) = sim.stream_geometry();
        assert_eq!(bandwidth, 500_000.0, "the clamped value gets applied");
        source.stop().await.unwrap();
    }
}

// ============================================================================
// Calibration Tests
// ============================================================================

mod calibration {
    use super::*;

    fn request(frequency_hz: u64) -> CalibrationRequest {
        CalibrationRequest {
            port: 1,
            frequency_hz,
            reference_level: -20.0,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tabulated_interpolated_and_unavailable() {
        let sim = Arc::new(SimKc908::with_defaults());
        let source = helpers::kc_source(sim.clone());
        source.start().await.unwrap();

        let exact = source.calibration(request(100_000_000)).await.unwrap();
        assert_eq!(exact.status, CalibrationStatus::Exact);
        assert_eq!(exact.base_level, 1.0);

        let blended = source.calibration(request(300_000_000)).await.unwrap();
        assert_eq!(blended.status, CalibrationStatus::Interpolated);
        assert_eq!(blended.base_level, 1.5);

        let missing = source.calibration(request(5_000_000_000)).await.unwrap();
        assert_eq!(missing.status, CalibrationStatus::Unavailable);
        assert_eq!(missing.base_level, 0.0);
        assert_eq!(missing.attenuation, [0.0; 3]);

        // A query after the sentinel must not return stale data.
        let again = source.calibration(request(100_000_000)).await.unwrap();
        assert_eq!(again, exact);

        source.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn calibration_without_a_device_fails_cleanly() {
        let sim = Arc::new(SimKc908::with_defaults());
        let source = helpers::kc_source(sim);
        let result = source.calibration(request(100_000_000)).await;
        assert!(matches!(result, Err(SourceError::DeviceNotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn analyzer_backend_answers_unavailable() {
        let sim = Arc::new(SimBb60::with_defaults());
        let source = helpers::bb_source(sim);
        source.start().await.unwrap();

        let result = source.calibration(request(100_000_000)).await.unwrap();
        assert_eq!(result.status, CalibrationStatus::Unavailable);
        source.stop().await.unwrap();
    }
}

// ============================================================================
// Configuration Persistence Tests
// ============================================================================

mod persistence {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn accepted_changes_are_saved() {
        let sim = Arc::new(SimKc908::with_defaults());
        let store = Arc::new(MemoryConfigStore::new());
        let source = helpers::kc_source_with_store(sim, store.clone());

        source.set_attenuation(9).await.unwrap();
        source.tune(868_300_000).await.unwrap();

        let saved = store.load("kc-test").expect("config saved");
        assert_eq!(saved.attenuation, 9);
        assert_eq!(saved.frequency_hz, 868_300_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn persisted_config_is_applied_at_start() {
        let sim = Arc::new(SimKc908::with_defaults());
        let store = Arc::new(MemoryConfigStore::new());
        let mut config = SourceConfig::default();
        config.gain = 27;
        config.frequency_hz = 162_400_000;
        store.save("kc-test", &config);

        let source = helpers::kc_source_with_store(sim.clone(), store);
        source.start().await.unwrap();

        let (_, _, gain, _) = sim.front_end();
        assert_eq!(gain, 27);
        assert_eq!(sim.frequency(), 162_400_000);
        source.stop().await.unwrap();
    }
}
