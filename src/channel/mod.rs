//! Telemetry channel seam
//!
//! A topic-per-drone publish/subscribe transport with two logical topics per
//! drone: telemetry outward, commands inward. Delivery is at-most-once;
//! consumers tolerate missed messages.

mod memory;

pub use memory::MemoryChannel;

use anyhow::Result;
use async_trait::async_trait;
use skylift_shared::{CommandMessage, TelemetryFrame};
use tokio::sync::broadcast;

/// Pluggable pub/sub transport for telemetry and commands
#[async_trait]
pub trait TelemetryChannel: Send + Sync {
    /// Publish a kinematic snapshot on the drone's telemetry topic
    async fn publish_telemetry(&self, frame: &TelemetryFrame) -> Result<()>;

    /// Publish an operator command on the drone's command topic
    async fn publish_command(&self, msg: &CommandMessage) -> Result<()>;

    /// Subscribe to a drone's telemetry topic
    async fn subscribe_telemetry(&self, drone_id: &str) -> broadcast::Receiver<TelemetryFrame>;

    /// Subscribe to a drone's command topic
    async fn subscribe_commands(&self, drone_id: &str) -> broadcast::Receiver<CommandMessage>;
}
