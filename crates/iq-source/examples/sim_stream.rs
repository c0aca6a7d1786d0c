//! Stream from a simulated KC 908 and print block statistics.
//!
//! Run with: cargo run -p iq-source --example sim_stream

use std::sync::Arc;
use std::time::Duration;

use iq_device::kc908::{Kc908Connector, Kc908Model};
use iq_sim::SimKc908;
use iq_source::{MemoryConfigStore, SdrSource, SourceEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let sim = Arc::new(SimKc908::with_defaults());
    let connector = Arc::new(Kc908Connector::new(sim, Kc908Model::Kc908One));
    let source = SdrSource::spawn("demo", connector, Arc::new(MemoryConfigStore::new()));

    // Print events as they arrive.
    let mut events = source.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SourceEvent::SampleRateChanged { sample_rate_hz } => {
                    println!("sample rate: {sample_rate_hz} sps");
                }
                SourceEvent::BandwidthClamped {
                    requested_hz,
                    applied_hz,
                } => println!("bandwidth clamped: {requested_hz} -> {applied_hz} Hz"),
                other => println!("event: {other:?}"),
            }
        }
    });

    source.start().await?;
    source.tune(433_920_000).await?;

    let stream = source.stream();
    let stats = tokio::task::spawn_blocking(move || {
        let mut blocks = 0u32;
        let mut peak = 0.0f32;
        while blocks < 8 {
            let Some(block) = stream.recv_timeout(Duration::from_secs(1)) else {
                break;
            };
            blocks += 1;
            for sample in &block.samples {
                peak = peak.max(sample.norm());
            }
            stream.recycle(block);
        }
        (blocks, peak)
    })
    .await?;

    println!("received {} blocks, peak magnitude {:.3}", stats.0, stats.1);

    source.stop().await?;
    source.shutdown().await;
    Ok(())
}
