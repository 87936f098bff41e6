//! Engine configuration
//!
//! Plain struct with defaults; callers override fields at construction.
//! The two policy knobs exist because the behavior genuinely differs between
//! the production and demo deployments, not as tuning surface.

use skylift_shared::sim;

/// What the matcher does when no idle drone exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentPolicy {
    /// Production path: report `NoDronesAvailable`, leave the delivery pending
    FailClosed,
    /// Demo fallback: press any provisioned drone into service
    FailOpen,
}

/// What happens to a drone once its delivery completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnPolicy {
    /// Fly back to the home pad before becoming available again
    ReturnToBase,
    /// Become idle (and claimable) right at the dropoff point
    ImmediateIdle,
}

/// Which drones get their kinematic state published every tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryScope {
    /// Publish every drone
    All,
    /// Publish only the designated observed drone
    Observed(String),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_interval_ms: u64,
    pub assignment_policy: AssignmentPolicy,
    pub return_policy: ReturnPolicy,
    pub telemetry_scope: TelemetryScope,
    /// Home pad the fleet returns to
    pub home_lat: f64,
    pub home_lng: f64,
    /// Idle drones are persisted only every Nth tick
    pub idle_persist_every: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: sim::TICK_INTERVAL_MS,
            assignment_policy: AssignmentPolicy::FailClosed,
            return_policy: ReturnPolicy::ReturnToBase,
            telemetry_scope: TelemetryScope::All,
            home_lat: sim::HOME_LAT,
            home_lng: sim::HOME_LNG,
            idle_persist_every: sim::IDLE_PERSIST_EVERY,
        }
    }
}

impl EngineConfig {
    /// Should this drone's telemetry be published?
    pub fn publishes(&self, drone_id: &str) -> bool {
        match &self.telemetry_scope {
            TelemetryScope::All => true,
            TelemetryScope::Observed(id) => id == drone_id,
        }
    }
}
