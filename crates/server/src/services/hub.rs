// Live updates for conversations: one broadcast channel per conversation,
// created on first subscribe and dropped once nobody listens.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

use crate::db::models::MessageView;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    MessageCreated { message: MessageView },
}

#[derive(Clone, Default)]
pub struct MessageHub {
    rooms: Arc<RwLock<HashMap<String, broadcast::Sender<HubEvent>>>>,
}

impl MessageHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, conversation_id: &str) -> broadcast::Receiver<HubEvent> {
        {
            let rooms = self.rooms.read().await;
            if let Some(sender) = rooms.get(conversation_id) {
                return sender.subscribe();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(conversation_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publishes to current subscribers and returns how many received it.
    pub async fn publish(&self, conversation_id: &str, event: HubEvent) -> usize {
        let delivered = {
            let rooms = self.rooms.read().await;
            match rooms.get(conversation_id) {
                Some(sender) => sender.send(event).unwrap_or(0),
                None => return 0,
            }
        };

        if delivered == 0 {
            self.prune(conversation_id).await;
        }

        delivered
    }

    /// Drops the room once its last receiver is gone.
    pub async fn prune(&self, conversation_id: &str) {
        let mut rooms = self.rooms.write().await;
        if rooms
            .get(conversation_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            rooms.remove(conversation_id);
        }
    }

    #[cfg(test)]
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
