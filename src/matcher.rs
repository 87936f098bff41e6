//! Assignment matcher
//!
//! Claims a drone for a pending delivery. The delivery row carries the
//! mission, so the conditional store update on the delivery is the
//! concurrency guard; the follow-up drone status write is best-effort and
//! left to the next simulation tick if it fails.

use crate::config::AssignmentPolicy;
use crate::store::{DroneLink, EntityStore, StoreError};
use skylift_shared::{Delivery, DeliveryStatus, Drone, DroneStatus, EngineError};
use std::sync::Arc;
use tracing::{info, warn};

pub struct AssignmentMatcher {
    store: Arc<dyn EntityStore>,
    policy: AssignmentPolicy,
}

impl AssignmentMatcher {
    pub fn new(store: Arc<dyn EntityStore>, policy: AssignmentPolicy) -> Self {
        Self { store, policy }
    }

    /// Claim a drone for the given pending delivery.
    ///
    /// On success the delivery is `assigned` and linked to the chosen drone,
    /// and the drone is marked `flying`. Concurrent claims on the same
    /// delivery cannot both succeed: the loser's conditional update is
    /// rejected by the store and surfaces as `AlreadyClaimed`.
    pub async fn claim(&self, delivery_id: &str) -> Result<Delivery, EngineError> {
        let delivery = self
            .store
            .get_delivery(delivery_id)
            .await
            .map_err(EngineError::from)?;

        if delivery.status != DeliveryStatus::Pending {
            return Err(EngineError::AlreadyClaimed(delivery_id.to_string()));
        }

        let drone = self.select_drone().await?;

        let updated = match self
            .store
            .transition_delivery(
                delivery_id,
                DeliveryStatus::Pending,
                DeliveryStatus::Assigned,
                DroneLink::Set(drone.id.clone()),
            )
            .await
        {
            Ok(row) => row,
            Err(StoreError::PreconditionFailed { .. }) => {
                return Err(EngineError::AlreadyClaimed(delivery_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            delivery = delivery_id,
            drone = %drone.id,
            "delivery claimed"
        );

        // Secondary write. A failure here leaves the drone's row stale, not
        // the mission: the simulator re-reads the delivery next tick and the
        // drone row catches up. Do not roll back the assignment.
        let mut flying = drone;
        flying.status = DroneStatus::Flying;
        if let Err(err) = self.store.update_drone(&flying).await {
            warn!(
                drone = %flying.id,
                error = %err,
                "drone status update failed after assignment; next tick recovers"
            );
        }

        Ok(updated)
    }

    /// Pick an eligible drone per the configured policy
    async fn select_drone(&self) -> Result<Drone, EngineError> {
        let idle = self
            .store
            .list_drones_by_status(DroneStatus::Idle)
            .await
            .map_err(EngineError::from)?;

        if let Some(drone) = idle.into_iter().next() {
            return Ok(drone);
        }

        match self.policy {
            AssignmentPolicy::FailClosed => Err(EngineError::NoDronesAvailable),
            AssignmentPolicy::FailOpen => {
                let all = self
                    .store
                    .list_drones()
                    .await
                    .map_err(EngineError::from)?;
                let drone = all
                    .into_iter()
                    .next()
                    .ok_or(EngineError::NoDronesAvailable)?;
                warn!(drone = %drone.id, "no idle drone; fail-open policy forcing assignment");
                Ok(drone)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use skylift_shared::Delivery;

    fn pending_delivery(id: &str) -> Delivery {
        Delivery::new(
            id,
            (51.4416, 5.4697),
            "Depot",
            (51.4420, 5.4700),
            "Customer",
            "123456",
            "parcel",
            None,
        )
    }

    async fn store_with(drones: &[&str], deliveries: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for id in drones {
            store
                .insert_drone(Drone::provision(*id, *id))
                .await
                .unwrap();
        }
        for id in deliveries {
            store.insert_delivery(pending_delivery(id)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_claim_assigns_idle_drone() {
        let store = store_with(&["D1"], &["del-1"]).await;
        let matcher = AssignmentMatcher::new(store.clone(), AssignmentPolicy::FailClosed);

        let updated = matcher.claim("del-1").await.unwrap();
        assert_eq!(updated.status, DeliveryStatus::Assigned);
        assert_eq!(updated.drone_id.as_deref(), Some("D1"));
        assert!(updated.drone_link_consistent());

        let drone = store.get_drone("D1").await.unwrap();
        assert_eq!(drone.status, DroneStatus::Flying);
    }

    #[tokio::test]
    async fn test_claim_on_claimed_delivery_fails_cleanly() {
        let store = store_with(&["D1", "D2"], &["del-1"]).await;
        let matcher = AssignmentMatcher::new(store.clone(), AssignmentPolicy::FailClosed);

        matcher.claim("del-1").await.unwrap();
        let err = matcher.claim("del-1").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyClaimed(_)));

        // First assignment untouched, second drone not dragged in
        let row = store.get_delivery("del-1").await.unwrap();
        assert_eq!(row.drone_id.as_deref(), Some("D1"));
        assert_eq!(
            store.get_drone("D2").await.unwrap().status,
            DroneStatus::Idle
        );
    }

    #[tokio::test]
    async fn test_claim_unknown_delivery() {
        let store = store_with(&["D1"], &[]).await;
        let matcher = AssignmentMatcher::new(store, AssignmentPolicy::FailClosed);
        assert!(matches!(
            matcher.claim("ghost").await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fail_closed_without_idle_drones() {
        let store = store_with(&["D1"], &["del-1"]).await;
        let mut busy = store.get_drone("D1").await.unwrap();
        busy.status = DroneStatus::Flying;
        store.update_drone(&busy).await.unwrap();

        let matcher = AssignmentMatcher::new(store.clone(), AssignmentPolicy::FailClosed);
        let err = matcher.claim("del-1").await.unwrap_err();
        assert!(matches!(err, EngineError::NoDronesAvailable));

        // Delivery stays pending
        let row = store.get_delivery("del-1").await.unwrap();
        assert_eq!(row.status, DeliveryStatus::Pending);
        assert!(row.drone_id.is_none());
    }

    #[tokio::test]
    async fn test_fail_open_presses_busy_drone_into_service() {
        let store = store_with(&["D1"], &["del-1"]).await;
        let mut busy = store.get_drone("D1").await.unwrap();
        busy.status = DroneStatus::Flying;
        store.update_drone(&busy).await.unwrap();

        let matcher = AssignmentMatcher::new(store, AssignmentPolicy::FailOpen);
        let updated = matcher.claim("del-1").await.unwrap();
        assert_eq!(updated.drone_id.as_deref(), Some("D1"));
    }

    #[tokio::test]
    async fn test_fail_open_with_empty_fleet() {
        let store = store_with(&[], &["del-1"]).await;
        let matcher = AssignmentMatcher::new(store, AssignmentPolicy::FailOpen);
        assert!(matches!(
            matcher.claim("del-1").await,
            Err(EngineError::NoDronesAvailable)
        ));
    }
}
