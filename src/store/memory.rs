//! In-memory entity store
//!
//! Backs the demo binary and the test suite. The conditional update holds
//! the write lock across the read-check-write, which gives the same
//! "update-if-status-matches" guarantee the relational backend provides
//! natively.

use super::{DroneLink, EntityStore, StoreError};
use async_trait::async_trait;
use skylift_shared::{now_ms, Delivery, DeliveryStatus, Drone, DroneStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// HashMap-backed store, shared across tasks
#[derive(Default)]
pub struct MemoryStore {
    drones: Arc<RwLock<HashMap<String, Drone>>>,
    deliveries: Arc<RwLock<HashMap<String, Delivery>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get_drone(&self, id: &str) -> Result<Drone, StoreError> {
        self.drones
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("drone {id}")))
    }

    async fn list_drones(&self) -> Result<Vec<Drone>, StoreError> {
        let drones = self.drones.read().await;
        let mut all: Vec<Drone> = drones.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn list_drones_by_status(&self, status: DroneStatus) -> Result<Vec<Drone>, StoreError> {
        let mut matching: Vec<Drone> = self
            .drones
            .read()
            .await
            .values()
            .filter(|d| d.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }

    async fn insert_drone(&self, drone: Drone) -> Result<(), StoreError> {
        let mut drones = self.drones.write().await;
        if drones.contains_key(&drone.id) {
            return Err(StoreError::Conflict(format!("drone {}", drone.id)));
        }
        drones.insert(drone.id.clone(), drone);
        Ok(())
    }

    async fn update_drone(&self, drone: &Drone) -> Result<(), StoreError> {
        let mut drones = self.drones.write().await;
        match drones.get_mut(&drone.id) {
            Some(row) => {
                *row = drone.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("drone {}", drone.id))),
        }
    }

    async fn get_delivery(&self, id: &str) -> Result<Delivery, StoreError> {
        self.deliveries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("delivery {id}")))
    }

    async fn insert_delivery(&self, delivery: Delivery) -> Result<(), StoreError> {
        let mut deliveries = self.deliveries.write().await;
        if deliveries.contains_key(&delivery.id) {
            return Err(StoreError::Conflict(format!("delivery {}", delivery.id)));
        }
        if let Some(key) = &delivery.idempotency_key {
            let duplicate = deliveries
                .values()
                .any(|d| d.idempotency_key.as_deref() == Some(key));
            if duplicate {
                return Err(StoreError::Conflict(format!("idempotency key {key}")));
            }
        }
        deliveries.insert(delivery.id.clone(), delivery);
        Ok(())
    }

    async fn active_delivery_for_drone(
        &self,
        drone_id: &str,
    ) -> Result<Option<Delivery>, StoreError> {
        let deliveries = self.deliveries.read().await;
        Ok(deliveries
            .values()
            .find(|d| {
                d.drone_id.as_deref() == Some(drone_id)
                    && matches!(
                        d.status,
                        DeliveryStatus::Assigned | DeliveryStatus::InTransit
                    )
            })
            .cloned())
    }

    async fn transition_delivery(
        &self,
        id: &str,
        expected: DeliveryStatus,
        new_status: DeliveryStatus,
        link: DroneLink,
    ) -> Result<Delivery, StoreError> {
        let mut deliveries = self.deliveries.write().await;
        let row = deliveries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("delivery {id}")))?;

        if row.status != expected {
            return Err(StoreError::PreconditionFailed {
                expected: expected.to_string(),
                actual: row.status.to_string(),
            });
        }

        row.status = new_status;
        match link {
            DroneLink::Keep => {}
            DroneLink::Set(drone_id) => row.drone_id = Some(drone_id),
            DroneLink::Clear => row.drone_id = None,
        }
        row.updated_ms = now_ms();

        Ok(row.clone())
    }
}
