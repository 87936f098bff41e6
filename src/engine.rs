//! Fleet engine facade
//!
//! Owns the matcher and command handler and exposes the operator-facing
//! operations: claim-delivery, update-delivery-status, send-drone-command,
//! plus fleet seeding and delivery creation. Store and channel clients are
//! constructed once at process start and injected here; no component reaches
//! for a singleton.

use crate::channel::TelemetryChannel;
use crate::command::CommandHandler;
use crate::config::{EngineConfig, ReturnPolicy};
use crate::matcher::AssignmentMatcher;
use crate::simulator::KinematicSimulator;
use crate::store::{DroneLink, EntityStore};
use rand::Rng;
use skylift_shared::state_machine::check_delivery_transition;
use skylift_shared::{Delivery, DeliveryStatus, Drone, DroneStatus, EngineError};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct FleetEngine {
    store: Arc<dyn EntityStore>,
    channel: Arc<dyn TelemetryChannel>,
    config: EngineConfig,
    matcher: AssignmentMatcher,
    commands: CommandHandler,
}

impl FleetEngine {
    pub fn new(
        store: Arc<dyn EntityStore>,
        channel: Arc<dyn TelemetryChannel>,
        config: EngineConfig,
    ) -> Self {
        let matcher = AssignmentMatcher::new(store.clone(), config.assignment_policy);
        let commands = CommandHandler::new(store.clone(), channel.clone());
        Self {
            store,
            channel,
            config,
            matcher,
            commands,
        }
    }

    /// Spawn the simulator scheduler; it runs until `shutdown` flips to true
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let simulator = Arc::new(KinematicSimulator::new(
            self.store.clone(),
            self.channel.clone(),
            self.config.clone(),
        ));
        simulator.start(shutdown)
    }

    /// Provision drones on the home pad. Already-provisioned ids are left
    /// alone so seeding is safe to repeat on restart.
    pub async fn seed_fleet(&self, fleet: &[(&str, &str)]) -> Result<(), EngineError> {
        for (id, name) in fleet {
            match self.store.insert_drone(Drone::provision(*id, *name)).await {
                Ok(()) => info!(drone = id, name, "drone provisioned"),
                Err(crate::store::StoreError::Conflict(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Create a pending delivery with a fresh 6-digit unlock PIN. The
    /// idempotency key keeps one payment session from producing two
    /// deliveries.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_delivery(
        &self,
        id: &str,
        pickup: (f64, f64),
        pickup_address: &str,
        dropoff: (f64, f64),
        dropoff_address: &str,
        package_description: &str,
        idempotency_key: Option<String>,
    ) -> Result<Delivery, EngineError> {
        let pin = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
        let delivery = Delivery::new(
            id,
            pickup,
            pickup_address,
            dropoff,
            dropoff_address,
            pin,
            package_description,
            idempotency_key,
        );
        self.store
            .insert_delivery(delivery.clone())
            .await
            .map_err(EngineError::from)?;
        info!(delivery = id, "delivery created");
        Ok(delivery)
    }

    /// Claim a drone for a pending delivery
    pub async fn claim_delivery(&self, delivery_id: &str) -> Result<Delivery, EngineError> {
        self.matcher.claim(delivery_id).await
    }

    /// Apply an operator command to a drone
    pub async fn send_command(
        &self,
        drone_id: &str,
        command: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<Drone, EngineError> {
        self.commands.send_raw(drone_id, command, payload).await
    }

    /// Move a delivery to `new_status`, validating against the mission state
    /// machine and keeping the drone link consistent with the status.
    ///
    /// Assignment goes through [`Self::claim_delivery`]; a transition that
    /// would need a drone link this delivery does not have is rejected.
    pub async fn update_delivery_status(
        &self,
        delivery_id: &str,
        new_status: DeliveryStatus,
    ) -> Result<Delivery, EngineError> {
        let delivery = self
            .store
            .get_delivery(delivery_id)
            .await
            .map_err(EngineError::from)?;

        check_delivery_transition(delivery.status, new_status)?;
        if new_status.requires_drone() && delivery.drone_id.is_none() {
            return Err(EngineError::InvalidTransition {
                entity: "delivery",
                from: delivery.status.to_string(),
                to: new_status.to_string(),
            });
        }

        let link = if new_status == DeliveryStatus::Cancelled {
            DroneLink::Clear
        } else {
            DroneLink::Keep
        };

        let updated = self
            .store
            .transition_delivery(delivery_id, delivery.status, new_status, link)
            .await
            .map_err(EngineError::from)?;

        info!(delivery = delivery_id, status = %new_status, "delivery status updated");

        // Cancelling an assigned delivery frees its drone. Same contract as
        // the matcher's secondary write: a failure is logged, not rolled
        // back, and the next tick reconciles.
        if new_status == DeliveryStatus::Cancelled {
            if let Some(drone_id) = delivery.drone_id {
                self.release_drone(&drone_id).await;
            }
        }

        Ok(updated)
    }

    async fn release_drone(&self, drone_id: &str) {
        let result = async {
            let mut drone = self.store.get_drone(drone_id).await?;
            if drone.status == DroneStatus::Flying {
                drone.status = match self.config.return_policy {
                    ReturnPolicy::ReturnToBase => DroneStatus::Returning,
                    ReturnPolicy::ImmediateIdle => DroneStatus::Idle,
                };
                self.store.update_drone(&drone).await?;
            }
            Ok::<_, crate::store::StoreError>(())
        }
        .await;

        if let Err(err) = result {
            warn!(drone = drone_id, error = %err, "drone release failed after cancellation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::store::MemoryStore;

    const PICKUP: (f64, f64) = (51.4416, 5.4697);
    const DROPOFF: (f64, f64) = (51.4420, 5.4700);

    async fn engine_with_fleet(fleet: &[(&str, &str)]) -> (Arc<MemoryStore>, FleetEngine) {
        let store = Arc::new(MemoryStore::new());
        let channel = Arc::new(MemoryChannel::new());
        let engine = FleetEngine::new(store.clone(), channel, EngineConfig::default());
        engine.seed_fleet(fleet).await.unwrap();
        (store, engine)
    }

    #[tokio::test]
    async fn test_create_claim_flow() {
        let (store, engine) = engine_with_fleet(&[("D1", "Falcon")]).await;

        let delivery = engine
            .create_delivery(
                "del-1",
                PICKUP,
                "Depot",
                DROPOFF,
                "Customer",
                "parcel",
                Some("pay-1".into()),
            )
            .await
            .unwrap();
        assert_eq!(delivery.unlock_pin.len(), 6);
        assert!(delivery.unlock_pin.chars().all(|c| c.is_ascii_digit()));

        let claimed = engine.claim_delivery("del-1").await.unwrap();
        assert_eq!(claimed.status, DeliveryStatus::Assigned);
        assert!(claimed.drone_link_consistent());
        assert_eq!(
            store.get_drone("D1").await.unwrap().status,
            DroneStatus::Flying
        );
    }

    #[tokio::test]
    async fn test_duplicate_payment_session_rejected() {
        let (_store, engine) = engine_with_fleet(&[]).await;
        engine
            .create_delivery("del-1", PICKUP, "a", DROPOFF, "b", "box", Some("pay-1".into()))
            .await
            .unwrap();
        assert!(engine
            .create_delivery("del-2", PICKUP, "a", DROPOFF, "b", "box", Some("pay-1".into()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_seeding_is_repeatable() {
        let (_store, engine) = engine_with_fleet(&[("D1", "Falcon")]).await;
        engine.seed_fleet(&[("D1", "Falcon")]).await.unwrap();
    }

    #[tokio::test]
    async fn test_at_most_one_mission_per_drone() {
        let (_store, engine) = engine_with_fleet(&[("D1", "Falcon")]).await;
        for id in ["del-1", "del-2"] {
            engine
                .create_delivery(id, PICKUP, "a", DROPOFF, "b", "box", None)
                .await
                .unwrap();
        }

        engine.claim_delivery("del-1").await.unwrap();
        // The only drone is flying; fail-closed matcher refuses a second
        // mission instead of double-booking it
        assert!(matches!(
            engine.claim_delivery("del-2").await,
            Err(EngineError::NoDronesAvailable)
        ));
    }

    #[tokio::test]
    async fn test_cancel_pending_delivery() {
        let (_store, engine) = engine_with_fleet(&[]).await;
        engine
            .create_delivery("del-1", PICKUP, "a", DROPOFF, "b", "box", None)
            .await
            .unwrap();

        let updated = engine
            .update_delivery_status("del-1", DeliveryStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(updated.status, DeliveryStatus::Cancelled);
        assert!(updated.drone_link_consistent());
    }

    #[tokio::test]
    async fn test_cancel_assigned_delivery_releases_drone() {
        let (store, engine) = engine_with_fleet(&[("D1", "Falcon")]).await;
        engine
            .create_delivery("del-1", PICKUP, "a", DROPOFF, "b", "box", None)
            .await
            .unwrap();
        engine.claim_delivery("del-1").await.unwrap();

        let updated = engine
            .update_delivery_status("del-1", DeliveryStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(updated.status, DeliveryStatus::Cancelled);
        assert!(updated.drone_id.is_none());
        assert!(updated.drone_link_consistent());

        // Default return policy sends the freed drone home
        assert_eq!(
            store.get_drone("D1").await.unwrap().status,
            DroneStatus::Returning
        );
    }

    #[tokio::test]
    async fn test_in_transit_delivery_cannot_be_cancelled() {
        let (store, engine) = engine_with_fleet(&[("D1", "Falcon")]).await;
        engine
            .create_delivery("del-1", PICKUP, "a", DROPOFF, "b", "box", None)
            .await
            .unwrap();
        engine.claim_delivery("del-1").await.unwrap();
        engine
            .update_delivery_status("del-1", DeliveryStatus::InTransit)
            .await
            .unwrap();

        let err = engine
            .update_delivery_status("del-1", DeliveryStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(
            store.get_delivery("del-1").await.unwrap().status,
            DeliveryStatus::InTransit
        );
    }

    #[tokio::test]
    async fn test_assignment_without_drone_rejected() {
        let (_store, engine) = engine_with_fleet(&[]).await;
        engine
            .create_delivery("del-1", PICKUP, "a", DROPOFF, "b", "box", None)
            .await
            .unwrap();

        // pending -> assigned is only reachable through claim_delivery,
        // which supplies the drone link
        assert!(matches!(
            engine
                .update_delivery_status("del-1", DeliveryStatus::Assigned)
                .await,
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_delivery_surfaces_not_found() {
        let (_store, engine) = engine_with_fleet(&[]).await;
        assert!(matches!(
            engine
                .update_delivery_status("ghost", DeliveryStatus::Cancelled)
                .await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_command_passthrough() {
        let (store, engine) = engine_with_fleet(&[("D1", "Falcon")]).await;
        engine.send_command("D1", "takeoff", None).await.unwrap();
        assert_eq!(
            store.get_drone("D1").await.unwrap().status,
            DroneStatus::Flying
        );
        assert!(matches!(
            engine.send_command("D1", "warp", None).await,
            Err(EngineError::InvalidCommand(_))
        ));
    }
}
