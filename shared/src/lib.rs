//! Skylift Shared Domain Types
//!
//! This crate provides the domain types, mission state machine and typed
//! errors shared between the fleet engine, its tests and any future
//! operator-facing services.

pub mod state_machine;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Simulation parameters for the kinematic engine
pub mod sim {
    /// Interval between simulation ticks in milliseconds
    pub const TICK_INTERVAL_MS: u64 = 1000;

    /// Distance a drone covers per tick, in unprojected lat/lng degrees
    pub const STEP_DEG: f64 = 0.0005;

    /// Remaining distance at which a drone counts as arrived.
    /// Must stay strictly below `STEP_DEG` so a drone converges on its
    /// target instead of oscillating around it.
    pub const ARRIVAL_THRESHOLD_DEG: f64 = 0.0001;

    /// Battery percentage drained per tick while airborne
    pub const BATTERY_DRAIN_PER_TICK: f64 = 0.4;

    /// Battery percentage recovered per tick while charging
    pub const BATTERY_CHARGE_PER_TICK: f64 = 2.5;

    /// Below this battery percentage a returning drone docks to charge
    pub const BATTERY_LOW_PERCENT: f64 = 30.0;

    /// Magnitude of the cosmetic position jitter for idle drones, in degrees
    pub const IDLE_JITTER_DEG: f64 = 0.00005;

    /// Idle drones are persisted only every Nth tick to limit write volume
    pub const IDLE_PERSIST_EVERY: u64 = 5;

    /// Home/base pad coordinates (Eindhoven)
    pub const HOME_LAT: f64 = 51.4416;
    pub const HOME_LNG: f64 = 5.4697;

    /// Rough meters per degree of latitude, for reporting speed
    pub const METERS_PER_DEG: f64 = 111_320.0;
}

/// Typed failures surfaced by engine operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("delivery already claimed: {0}")]
    AlreadyClaimed(String),

    #[error("no drones available")]
    NoDronesAvailable,

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("transient I/O failure: {0}")]
    TransientIo(String),
}

/// Lifecycle of a delivery, from checkout to the customer's hands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    InTransit,
    Delivered,
    Cancelled,
}

impl DeliveryStatus {
    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }

    /// Statuses during which a drone must be linked to the delivery
    pub fn requires_drone(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Assigned | DeliveryStatus::InTransit | DeliveryStatus::Delivered
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Assigned => "assigned",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Operational state of a drone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DroneStatus {
    Idle,
    Flying,
    Returning,
    Charging,
    Offline,
}

impl DroneStatus {
    /// Airborne drones drain battery every tick
    pub fn is_airborne(&self) -> bool {
        matches!(self, DroneStatus::Flying | DroneStatus::Returning)
    }
}

impl fmt::Display for DroneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DroneStatus::Idle => "idle",
            DroneStatus::Flying => "flying",
            DroneStatus::Returning => "returning",
            DroneStatus::Charging => "charging",
            DroneStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// A delivery request and its mission state.
///
/// The delivery row is the source of truth for which drone is on mission:
/// `drone_id` is set iff status is assigned, in_transit or delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: String,
    pub status: DeliveryStatus,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub pickup_address: String,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub dropoff_address: String,
    pub drone_id: Option<String>,
    /// 6-digit compartment unlock PIN
    pub unlock_pin: String,
    pub package_description: String,
    /// Uniqueness key tying the delivery to one payment session
    pub idempotency_key: Option<String>,
    pub created_ms: u64,
    pub updated_ms: u64,
}

impl Delivery {
    /// Create a pending delivery between two points
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        pickup: (f64, f64),
        pickup_address: impl Into<String>,
        dropoff: (f64, f64),
        dropoff_address: impl Into<String>,
        unlock_pin: impl Into<String>,
        package_description: impl Into<String>,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            status: DeliveryStatus::Pending,
            pickup_lat: pickup.0,
            pickup_lng: pickup.1,
            pickup_address: pickup_address.into(),
            dropoff_lat: dropoff.0,
            dropoff_lng: dropoff.1,
            dropoff_address: dropoff_address.into(),
            drone_id: None,
            unlock_pin: unlock_pin.into(),
            package_description: package_description.into(),
            idempotency_key,
            created_ms: now,
            updated_ms: now,
        }
    }

    /// Check the drone-link invariant for this delivery's current status
    pub fn drone_link_consistent(&self) -> bool {
        self.drone_id.is_some() == self.status.requires_drone()
    }
}

/// A drone in the fleet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drone {
    pub id: String,
    pub name: String,
    pub status: DroneStatus,
    /// Battery percentage, 0-100
    pub battery: f64,
    pub lat: f64,
    pub lng: f64,
    /// Degrees, 0-360, wraps
    pub heading: f64,
}

impl Drone {
    /// Provision an idle drone on the home pad with a full battery
    pub fn provision(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: DroneStatus::Idle,
            battery: 100.0,
            lat: sim::HOME_LAT,
            lng: sim::HOME_LNG,
            heading: 0.0,
        }
    }
}

/// Operator commands accepted by the command handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DroneCommand {
    Takeoff,
    Land,
    Hover,
    ReturnHome,
    Unlock,
}

impl DroneCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            DroneCommand::Takeoff => "takeoff",
            DroneCommand::Land => "land",
            DroneCommand::Hover => "hover",
            DroneCommand::ReturnHome => "return_home",
            DroneCommand::Unlock => "unlock",
        }
    }
}

impl fmt::Display for DroneCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DroneCommand {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "takeoff" => Ok(DroneCommand::Takeoff),
            "land" => Ok(DroneCommand::Land),
            "hover" => Ok(DroneCommand::Hover),
            "return_home" => Ok(DroneCommand::ReturnHome),
            "unlock" => Ok(DroneCommand::Unlock),
            other => Err(EngineError::InvalidCommand(other.to_string())),
        }
    }
}

/// One drone's kinematic state at a point in time, published on the
/// telemetry topic as a flat record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub drone_id: String,
    pub lat: f64,
    pub lng: f64,
    pub heading: f64,
    pub battery: f64,
    pub speed_mps: f64,
    pub timestamp_ms: u64,
}

impl TelemetryFrame {
    /// Snapshot a drone's current kinematic state
    pub fn from_drone(drone: &Drone, speed_mps: f64) -> Self {
        Self {
            drone_id: drone.id.clone(),
            lat: drone.lat,
            lng: drone.lng,
            heading: drone.heading,
            battery: drone.battery,
            speed_mps,
            timestamp_ms: now_ms(),
        }
    }
}

/// A command published on a drone's command topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub drone_id: String,
    pub command: DroneCommand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub timestamp_ms: u64,
}

impl CommandMessage {
    pub fn new(drone_id: impl Into<String>, command: DroneCommand) -> Self {
        Self {
            drone_id: drone_id.into(),
            command,
            payload: None,
            timestamp_ms: now_ms(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}
