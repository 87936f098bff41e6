//! Command handler
//!
//! Applies operator-issued commands to a drone independent of the simulation
//! tick, and forwards every command onto the drone's command topic so a
//! physical or simulated receiver can react.
//!
//! Beyond rejecting unknown tokens this handler deliberately does not check
//! the drone transition table: the operator surface only exposes commands
//! appropriate to the drone's current state. Known looseness, not an
//! invariant.

use crate::channel::TelemetryChannel;
use crate::store::EntityStore;
use skylift_shared::{CommandMessage, Drone, DroneCommand, DroneStatus, EngineError};
use std::sync::Arc;
use tracing::{debug, info};

pub struct CommandHandler {
    store: Arc<dyn EntityStore>,
    channel: Arc<dyn TelemetryChannel>,
}

impl CommandHandler {
    pub fn new(store: Arc<dyn EntityStore>, channel: Arc<dyn TelemetryChannel>) -> Self {
        Self { store, channel }
    }

    /// Parse and apply a raw command token, returning the updated drone
    pub async fn send_raw(
        &self,
        drone_id: &str,
        command: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<Drone, EngineError> {
        let command: DroneCommand = command.parse()?;
        self.send(drone_id, command, payload).await
    }

    /// Apply a command to a drone and publish it on the command topic
    pub async fn send(
        &self,
        drone_id: &str,
        command: DroneCommand,
        payload: Option<serde_json::Value>,
    ) -> Result<Drone, EngineError> {
        let mut drone = self
            .store
            .get_drone(drone_id)
            .await
            .map_err(EngineError::from)?;

        let new_status = match command {
            DroneCommand::Takeoff => Some(DroneStatus::Flying),
            DroneCommand::Land => Some(DroneStatus::Idle),
            DroneCommand::ReturnHome => Some(DroneStatus::Returning),
            // Hover confirms position, unlock opens the compartment;
            // neither touches drone status
            DroneCommand::Hover | DroneCommand::Unlock => None,
        };

        if let Some(status) = new_status {
            drone.status = status;
            self.store
                .update_drone(&drone)
                .await
                .map_err(EngineError::from)?;
            info!(drone = drone_id, %command, status = %drone.status, "command applied");
        } else {
            debug!(drone = drone_id, %command, "command is a no-op for drone status");
        }

        let mut msg = CommandMessage::new(drone_id, command);
        if let Some(payload) = payload {
            msg = msg.with_payload(payload);
        }
        self.channel
            .publish_command(&msg)
            .await
            .map_err(|e| EngineError::TransientIo(e.to_string()))?;

        Ok(drone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn setup() -> (Arc<MemoryStore>, Arc<MemoryChannel>, CommandHandler) {
        let store = Arc::new(MemoryStore::new());
        let channel = Arc::new(MemoryChannel::new());
        store
            .insert_drone(Drone::provision("D1", "Falcon"))
            .await
            .unwrap();
        let handler = CommandHandler::new(store.clone(), channel.clone());
        (store, channel, handler)
    }

    #[tokio::test]
    async fn test_takeoff_and_land() {
        let (store, _channel, handler) = setup().await;

        let drone = handler.send("D1", DroneCommand::Takeoff, None).await.unwrap();
        assert_eq!(drone.status, DroneStatus::Flying);
        assert_eq!(
            store.get_drone("D1").await.unwrap().status,
            DroneStatus::Flying
        );

        let drone = handler.send("D1", DroneCommand::Land, None).await.unwrap();
        assert_eq!(drone.status, DroneStatus::Idle);
    }

    #[tokio::test]
    async fn test_return_home_sets_returning() {
        let (store, _channel, handler) = setup().await;
        handler.send("D1", DroneCommand::Takeoff, None).await.unwrap();

        let drone = handler
            .send("D1", DroneCommand::ReturnHome, None)
            .await
            .unwrap();
        assert_eq!(drone.status, DroneStatus::Returning);
        assert_eq!(
            store.get_drone("D1").await.unwrap().status,
            DroneStatus::Returning
        );
    }

    #[tokio::test]
    async fn test_hover_and_unlock_leave_status_alone() {
        let (store, channel, handler) = setup().await;
        let mut rx = channel.subscribe_commands("D1").await;

        handler.send("D1", DroneCommand::Hover, None).await.unwrap();
        handler
            .send("D1", DroneCommand::Unlock, Some(json!({ "pin": "123456" })))
            .await
            .unwrap();

        assert_eq!(
            store.get_drone("D1").await.unwrap().status,
            DroneStatus::Idle
        );

        // Both commands still hit the command topic
        assert_eq!(rx.recv().await.unwrap().command, DroneCommand::Hover);
        let unlock = rx.recv().await.unwrap();
        assert_eq!(unlock.command, DroneCommand::Unlock);
        assert_eq!(unlock.payload.unwrap()["pin"], "123456");
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let (_store, _channel, handler) = setup().await;
        assert!(matches!(
            handler.send_raw("D1", "barrel_roll", None).await,
            Err(EngineError::InvalidCommand(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_drone_rejected() {
        let (_store, _channel, handler) = setup().await;
        assert!(matches!(
            handler.send("ghost", DroneCommand::Takeoff, None).await,
            Err(EngineError::NotFound(_))
        ));
    }
}
