//! Mission State Machine
//!
//! The authoritative definition of valid delivery and drone status
//! transitions. Components check transitions here before committing them to
//! the store; the store's conditional update then guards against races.

use crate::{DeliveryStatus, DroneStatus, EngineError};

/// Check whether a delivery status transition is valid.
///
/// `pending -> assigned -> in_transit -> delivered` is the happy path;
/// cancellation is only possible before the package is in the air.
pub fn delivery_transition_valid(from: DeliveryStatus, to: DeliveryStatus) -> bool {
    use DeliveryStatus::*;

    matches!(
        (from, to),
        (Pending, Assigned)
            | (Assigned, InTransit)
            | (InTransit, Delivered)
            | (Pending, Cancelled)
            | (Assigned, Cancelled)
    )
}

/// Check whether a drone status transition is valid.
///
/// Offline is the fault path and reachable from anywhere; it is not part of
/// the normal mission flow.
pub fn drone_transition_valid(from: DroneStatus, to: DroneStatus) -> bool {
    use DroneStatus::*;

    match (from, to) {
        // Same state is always valid
        (a, b) if a == b => true,

        // Fault path, reachable from anywhere
        (_, Offline) => true,

        (Idle, Flying) => true,
        (Flying, Idle) => true,
        (Flying, Returning) => true,
        (Returning, Idle) => true,
        (Returning, Charging) => true,
        (Charging, Idle) => true,

        _ => false,
    }
}

/// Validate a delivery transition, producing the typed error on violation
pub fn check_delivery_transition(
    from: DeliveryStatus,
    to: DeliveryStatus,
) -> Result<(), EngineError> {
    if delivery_transition_valid(from, to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            entity: "delivery",
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Validate a drone transition, producing the typed error on violation
pub fn check_drone_transition(from: DroneStatus, to: DroneStatus) -> Result<(), EngineError> {
    if drone_transition_valid(from, to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            entity: "drone",
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
