//! Entity store client seam
//!
//! The engine talks to the drones/deliveries backend exclusively through the
//! [`EntityStore`] trait so the production deployment can point it at the
//! managed relational store while tests and the demo binary run against the
//! in-memory implementation.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use skylift_shared::{Delivery, DeliveryStatus, Drone, DroneStatus, EngineError};
use thiserror::Error;

/// Failures surfaced by store operations.
///
/// `PreconditionFailed` is the optimistic-concurrency rejection and must stay
/// distinguishable from plain I/O trouble: callers treat it as "someone else
/// got there first", not as a retryable fault.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("no row for {0}")]
    NotFound(String),

    #[error("precondition failed: expected {expected}, found {actual}")]
    PreconditionFailed { expected: String, actual: String },

    #[error("conflict on insert: {0}")]
    Conflict(String),

    #[error("store I/O failure: {0}")]
    Io(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::PreconditionFailed { .. } => EngineError::AlreadyClaimed(err.to_string()),
            StoreError::Conflict(what) => EngineError::AlreadyClaimed(what),
            StoreError::Io(msg) => EngineError::TransientIo(msg),
        }
    }
}

/// How a conditional delivery update touches the drone association
#[derive(Debug, Clone, PartialEq)]
pub enum DroneLink {
    /// Leave `drone_id` as it is
    Keep,
    /// Link the delivery to this drone
    Set(String),
    /// Drop the drone association
    Clear,
}

/// CRUD access to drone and delivery rows
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_drone(&self, id: &str) -> Result<Drone, StoreError>;

    async fn list_drones(&self) -> Result<Vec<Drone>, StoreError>;

    async fn list_drones_by_status(&self, status: DroneStatus) -> Result<Vec<Drone>, StoreError>;

    /// Insert a drone; `Conflict` on duplicate id
    async fn insert_drone(&self, drone: Drone) -> Result<(), StoreError>;

    /// Persist a drone's full state (position, heading, battery, status)
    async fn update_drone(&self, drone: &Drone) -> Result<(), StoreError>;

    async fn get_delivery(&self, id: &str) -> Result<Delivery, StoreError>;

    /// Insert a delivery; `Conflict` on duplicate id or duplicate
    /// idempotency key (one delivery per payment session)
    async fn insert_delivery(&self, delivery: Delivery) -> Result<(), StoreError>;

    /// The delivery this drone is currently flying for, if any
    /// (status assigned or in_transit)
    async fn active_delivery_for_drone(
        &self,
        drone_id: &str,
    ) -> Result<Option<Delivery>, StoreError>;

    /// Conditionally move a delivery to `new_status`, adjusting the drone
    /// link, but only if its current status still equals `expected`.
    /// Returns the updated row, or `PreconditionFailed` if a concurrent
    /// writer got there first.
    async fn transition_delivery(
        &self,
        id: &str,
        expected: DeliveryStatus,
        new_status: DeliveryStatus,
        link: DroneLink,
    ) -> Result<Delivery, StoreError>;
}
