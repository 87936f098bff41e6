//! In-memory pub/sub channel
//!
//! One broadcast pair per drone id. Publishing to a topic nobody listens on
//! succeeds and drops the message, matching the at-most-once contract of the
//! real transport.

use super::TelemetryChannel;
use anyhow::Result;
use async_trait::async_trait;
use skylift_shared::{CommandMessage, TelemetryFrame};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

/// Buffered messages kept per topic before slow subscribers start lagging
const TOPIC_CAPACITY: usize = 64;

struct DroneTopics {
    telemetry: broadcast::Sender<TelemetryFrame>,
    commands: broadcast::Sender<CommandMessage>,
}

impl DroneTopics {
    fn new() -> Self {
        let (telemetry, _) = broadcast::channel(TOPIC_CAPACITY);
        let (commands, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            telemetry,
            commands,
        }
    }
}

/// Broadcast-backed channel for tests and the demo binary
#[derive(Default)]
pub struct MemoryChannel {
    topics: RwLock<HashMap<String, DroneTopics>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_topics<R>(&self, drone_id: &str, f: impl FnOnce(&DroneTopics) -> R) -> R {
        {
            let topics = self.topics.read().await;
            if let Some(entry) = topics.get(drone_id) {
                return f(entry);
            }
        }
        let mut topics = self.topics.write().await;
        let entry = topics
            .entry(drone_id.to_string())
            .or_insert_with(DroneTopics::new);
        f(entry)
    }
}

#[async_trait]
impl TelemetryChannel for MemoryChannel {
    async fn publish_telemetry(&self, frame: &TelemetryFrame) -> Result<()> {
        self.with_topics(&frame.drone_id, |t| {
            // No subscribers is fine; the frame is simply dropped
            let _ = t.telemetry.send(frame.clone());
        })
        .await;
        Ok(())
    }

    async fn publish_command(&self, msg: &CommandMessage) -> Result<()> {
        self.with_topics(&msg.drone_id, |t| {
            let _ = t.commands.send(msg.clone());
        })
        .await;
        Ok(())
    }

    async fn subscribe_telemetry(&self, drone_id: &str) -> broadcast::Receiver<TelemetryFrame> {
        self.with_topics(drone_id, |t| t.telemetry.subscribe()).await
    }

    async fn subscribe_commands(&self, drone_id: &str) -> broadcast::Receiver<CommandMessage> {
        self.with_topics(drone_id, |t| t.commands.subscribe()).await
    }
}
