//! Kinematic simulator
//!
//! Drives every drone's physical state once per tick: mission drones step
//! toward their current waypoint, returning drones head for the home pad,
//! idle drones get cosmetic jitter. Arrival at a waypoint triggers the
//! matching delivery transition through the store's conditional update, so a
//! stale in-memory view can never double-fire a transition.
//!
//! Every tick re-reads authoritative state; nothing is cached across ticks
//! because stateless request handlers mutate the same rows concurrently.

use crate::channel::TelemetryChannel;
use crate::config::{EngineConfig, ReturnPolicy};
use crate::store::{DroneLink, EntityStore, StoreError};
use futures::future::join_all;
use skylift_shared::{
    sim, Delivery, DeliveryStatus, Drone, DroneStatus, EngineError, TelemetryFrame,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

/// What a drone is doing this tick
enum Phase {
    /// Heading to the pickup point of an assigned delivery
    Pickup(Delivery),
    /// Carrying the package to the dropoff point
    Dropoff(Delivery),
    /// No mission; heading back to the home pad
    ReturnToBase,
    /// Nothing to do
    Loiter,
}

pub struct KinematicSimulator {
    store: Arc<dyn EntityStore>,
    channel: Arc<dyn TelemetryChannel>,
    config: EngineConfig,
}

impl KinematicSimulator {
    pub fn new(
        store: Arc<dyn EntityStore>,
        channel: Arc<dyn TelemetryChannel>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            channel,
            config,
        }
    }

    /// Spawn the scheduler task. It ticks at the configured interval until
    /// the shutdown signal flips to `true` (or its sender is dropped).
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(self.config.tick_interval_ms));
            let mut tick_no: u64 = 0;

            info!(
                interval_ms = self.config.tick_interval_ms,
                "simulator started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tick_no += 1;
                        self.tick(tick_no).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("simulator stopped");
        })
    }

    /// One simulation step across the whole fleet. Per-drone steps run
    /// concurrently so one slow persistence call cannot stall the rest, and
    /// per-drone failures are logged and retried on the next tick.
    pub async fn tick(&self, tick_no: u64) {
        let drones = match self.store.list_drones().await {
            Ok(drones) => drones,
            Err(err) => {
                warn!(error = %err, "tick skipped: drone list unavailable");
                return;
            }
        };

        let steps = drones.into_iter().map(|drone| {
            let id = drone.id.clone();
            async move { (id, self.step_drone(drone, tick_no).await) }
        });

        for (drone_id, result) in join_all(steps).await {
            if let Err(err) = result {
                warn!(drone = %drone_id, error = %err, "drone step failed; retrying next tick");
            }
        }
    }

    /// Advance one drone by one tick
    async fn step_drone(&self, mut drone: Drone, tick_no: u64) -> Result<(), EngineError> {
        match drone.status {
            DroneStatus::Offline => return Ok(()),
            DroneStatus::Charging => return self.charge(drone).await,
            _ => {}
        }

        let mission = self
            .store
            .active_delivery_for_drone(&drone.id)
            .await
            .map_err(EngineError::from)?;

        let phase = match mission {
            Some(d) if d.status == DeliveryStatus::Assigned => Phase::Pickup(d),
            Some(d) if d.status == DeliveryStatus::InTransit => Phase::Dropoff(d),
            _ if drone.status == DroneStatus::Returning => Phase::ReturnToBase,
            _ => Phase::Loiter,
        };

        let target = match &phase {
            Phase::Pickup(d) => (d.pickup_lat, d.pickup_lng),
            Phase::Dropoff(d) => (d.dropoff_lat, d.dropoff_lng),
            Phase::ReturnToBase => (self.config.home_lat, self.config.home_lng),
            Phase::Loiter => return self.loiter(drone, tick_no).await,
        };

        let dlat = target.0 - drone.lat;
        let dlng = target.1 - drone.lng;
        let distance = (dlat * dlat + dlng * dlng).sqrt();

        if distance <= sim::ARRIVAL_THRESHOLD_DEG {
            return self.arrive(drone, phase).await;
        }

        // Advance along the normalized direction vector, never past the
        // target itself
        let step = sim::STEP_DEG.min(distance);
        drone.lat += dlat / distance * step;
        drone.lng += dlng / distance * step;
        drone.heading = bearing(dlat, dlng);
        drone.battery = (drone.battery - sim::BATTERY_DRAIN_PER_TICK).max(0.0);

        self.store
            .update_drone(&drone)
            .await
            .map_err(EngineError::from)?;

        let speed = step * sim::METERS_PER_DEG / (self.config.tick_interval_ms as f64 / 1000.0);
        self.publish(&drone, speed).await
    }

    /// Handle arrival at the current waypoint
    async fn arrive(&self, mut drone: Drone, phase: Phase) -> Result<(), EngineError> {
        match phase {
            Phase::Pickup(delivery) => {
                // Package picked up; the drone keeps flying toward dropoff
                match self
                    .store
                    .transition_delivery(
                        &delivery.id,
                        DeliveryStatus::Assigned,
                        DeliveryStatus::InTransit,
                        DroneLink::Keep,
                    )
                    .await
                {
                    Ok(_) => {
                        info!(drone = %drone.id, delivery = %delivery.id, "pickup reached, package in transit");
                    }
                    Err(StoreError::PreconditionFailed { .. }) => {
                        // A concurrent writer moved the delivery first;
                        // next tick reads the fresh status
                        debug!(delivery = %delivery.id, "pickup transition lost the race");
                    }
                    Err(err) => return Err(err.into()),
                }
                Ok(())
            }

            Phase::Dropoff(delivery) => {
                match self
                    .store
                    .transition_delivery(
                        &delivery.id,
                        DeliveryStatus::InTransit,
                        DeliveryStatus::Delivered,
                        // The drone link outlives the mission on delivered
                        // rows; only cancellation clears it
                        DroneLink::Keep,
                    )
                    .await
                {
                    Ok(_) => {
                        info!(drone = %drone.id, delivery = %delivery.id, "package delivered");
                        drone.status = match self.config.return_policy {
                            ReturnPolicy::ReturnToBase => DroneStatus::Returning,
                            ReturnPolicy::ImmediateIdle => DroneStatus::Idle,
                        };
                        self.store
                            .update_drone(&drone)
                            .await
                            .map_err(EngineError::from)?;
                        self.publish(&drone, 0.0).await?;
                    }
                    Err(StoreError::PreconditionFailed { .. }) => {
                        debug!(delivery = %delivery.id, "dropoff transition lost the race");
                    }
                    Err(err) => return Err(err.into()),
                }
                Ok(())
            }

            Phase::ReturnToBase => {
                drone.lat = self.config.home_lat;
                drone.lng = self.config.home_lng;
                drone.status = if drone.battery < sim::BATTERY_LOW_PERCENT {
                    DroneStatus::Charging
                } else {
                    DroneStatus::Idle
                };
                self.store
                    .update_drone(&drone)
                    .await
                    .map_err(EngineError::from)?;
                info!(drone = %drone.id, status = %drone.status, "docked at home pad");
                self.publish(&drone, 0.0).await
            }

            Phase::Loiter => Ok(()),
        }
    }

    /// Cosmetic jitter for drones with nothing to do. Idle drones persist on
    /// a reduced cadence to limit write volume; airborne-but-missionless
    /// drones still drain battery and persist every tick.
    async fn loiter(&self, mut drone: Drone, tick_no: u64) -> Result<(), EngineError> {
        let (jlat, jlng, jheading) = jitter();
        drone.lat += jlat;
        drone.lng += jlng;
        drone.heading = (drone.heading + jheading).rem_euclid(360.0);

        if drone.status.is_airborne() {
            drone.battery = (drone.battery - sim::BATTERY_DRAIN_PER_TICK).max(0.0);
        } else if tick_no % self.config.idle_persist_every != 0 {
            return Ok(());
        }

        self.store
            .update_drone(&drone)
            .await
            .map_err(EngineError::from)?;
        self.publish(&drone, 0.0).await
    }

    /// Top the battery up while docked; back to idle at full charge
    async fn charge(&self, mut drone: Drone) -> Result<(), EngineError> {
        drone.battery = (drone.battery + sim::BATTERY_CHARGE_PER_TICK).min(100.0);
        if drone.battery >= 100.0 {
            drone.status = DroneStatus::Idle;
            info!(drone = %drone.id, "charged, back in rotation");
        }
        self.store
            .update_drone(&drone)
            .await
            .map_err(EngineError::from)?;
        self.publish(&drone, 0.0).await
    }

    /// Publish the drone's kinematic state if it falls inside the configured
    /// telemetry scope
    async fn publish(&self, drone: &Drone, speed_mps: f64) -> Result<(), EngineError> {
        if !self.config.publishes(&drone.id) {
            return Ok(());
        }
        let frame = TelemetryFrame::from_drone(drone, speed_mps);
        self.channel
            .publish_telemetry(&frame)
            .await
            .map_err(|e| EngineError::TransientIo(e.to_string()))
    }
}

/// Compass bearing of a planar direction vector, degrees clockwise from north
fn bearing(dlat: f64, dlng: f64) -> f64 {
    (dlng.atan2(dlat).to_degrees() + 360.0) % 360.0
}

/// Small random positional and heading jitter for loitering drones
fn jitter() -> (f64, f64, f64) {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (
        rng.gen_range(-sim::IDLE_JITTER_DEG..=sim::IDLE_JITTER_DEG),
        rng.gen_range(-sim::IDLE_JITTER_DEG..=sim::IDLE_JITTER_DEG),
        rng.gen_range(-5.0..=5.0),
    )
}
