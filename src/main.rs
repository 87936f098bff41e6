mod channel;
mod command;
mod config;
mod engine;
mod matcher;
mod simulator;
mod store;

use channel::{MemoryChannel, TelemetryChannel};
use config::EngineConfig;
use engine::FleetEngine;
use std::sync::Arc;
use store::MemoryStore;
use tokio::sync::watch;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = EngineConfig::default();

    info!("Fleet engine starting");
    info!("  tick interval: {}ms", config.tick_interval_ms);
    info!("  assignment policy: {:?}", config.assignment_policy);
    info!("  return policy: {:?}", config.return_policy);

    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let channel: Arc<MemoryChannel> = Arc::new(MemoryChannel::new());
    let engine = FleetEngine::new(store.clone(), channel.clone(), config);

    // Fleet provisioning happens out-of-band in production; the demo seeds
    // three drones on the home pad
    if let Err(e) = engine
        .seed_fleet(&[
            ("drone-001", "Falcon"),
            ("drone-002", "Heron"),
            ("drone-003", "Kestrel"),
        ])
        .await
    {
        error!("Fleet seeding failed: {}", e);
        return;
    }

    // Live-tracking stand-in: log the observed drone's telemetry
    let mut telemetry_rx = channel.subscribe_telemetry("drone-001").await;
    tokio::spawn(async move {
        loop {
            match telemetry_rx.recv().await {
                Ok(frame) => {
                    info!(
                        "[TRACK] {} at ({:.5}, {:.5}) hdg={:.0} bat={:.1}% spd={:.1}m/s",
                        frame.drone_id,
                        frame.lat,
                        frame.lng,
                        frame.heading,
                        frame.battery,
                        frame.speed_mps
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("[TRACK] missed {} frames", n);
                }
                Err(_) => break,
            }
        }
    });

    // Demo order: one delivery across the city center, claimed immediately
    match engine
        .create_delivery(
            "delivery-001",
            (51.4380, 5.4620),
            "Hub Strijp-S",
            (51.4445, 5.4780),
            "Kleine Berg 42",
            "Espresso beans, 1kg",
            Some("checkout-demo-001".into()),
        )
        .await
    {
        Ok(delivery) => {
            info!("Demo delivery created (PIN {})", delivery.unlock_pin);
            match engine.claim_delivery(&delivery.id).await {
                Ok(claimed) => info!(
                    "Demo delivery assigned to {}",
                    claimed.drone_id.as_deref().unwrap_or("?")
                ),
                Err(e) => warn!("Demo claim failed: {}", e),
            }
        }
        Err(e) => warn!("Demo delivery creation failed: {}", e),
    }

    // The simulator runs until shutdown is signalled
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let simulator = engine.start(shutdown_rx);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(e) = simulator.await {
        error!("Simulator task failed: {}", e);
    }
    info!("Fleet engine stopped");
}
