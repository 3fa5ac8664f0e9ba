//! Default router: relays chat traffic between members of a room.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use log::{debug, info};
use roomcast_protocol::{InboundMessage, OutboundEvent, Role, RoomId};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::connection::Connection;
use crate::hub::Hub;
use crate::router::MessageRouter;

const PREVIEW_CHARS: usize = 50;

/// Echoes user messages to the rest of their room and, when enabled,
/// streams a canned assistant reply to the whole room.
#[derive(Debug, Clone)]
pub struct RoomRelay {
    hub: Hub,
    config: RelayConfig,
}

impl RoomRelay {
    pub fn new(hub: Hub, config: RelayConfig) -> Self {
        Self { hub, config }
    }

    fn spawn_assistant_reply(&self, room: RoomId, prompt: &str) {
        let hub = self.hub.clone();
        let interval = self.config.delta_interval();
        let reply = assistant_reply(prompt);

        tokio::spawn(async move {
            let message_id = Uuid::new_v4().to_string();
            let room_id = Some(room.clone());

            hub.broadcast(
                &room,
                OutboundEvent::stream_start(room_id.clone(), &message_id, Role::Assistant),
                None,
            )
            .await;

            let mut content = String::with_capacity(reply.len() + 1);
            for word in reply.split_whitespace() {
                if hub.is_shut_down() {
                    return;
                }
                let delta = format!("{word} ");
                content.push_str(&delta);
                hub.broadcast(
                    &room,
                    OutboundEvent::content_delta(room_id.clone(), &message_id, delta),
                    None,
                )
                .await;
                tokio::time::sleep(interval).await;
            }

            hub.broadcast(
                &room,
                OutboundEvent::stream_complete(room_id, &message_id, Role::Assistant, content),
                None,
            )
            .await;
            info!("Assistant reply {} completed in room {}", message_id, room);
        });
    }
}

#[async_trait]
impl MessageRouter for RoomRelay {
    async fn on_message(
        &self,
        conn: &Arc<Connection>,
        message: InboundMessage,
    ) -> anyhow::Result<()> {
        let Some(room) = conn.room() else {
            bail!("connection is not in a room");
        };
        info!(
            "Message from {} in room {}: {}",
            conn.identity(),
            room,
            preview(&message.content)
        );

        let message_id = Uuid::new_v4().to_string();
        let echo = OutboundEvent::stream_complete(
            Some(room.clone()),
            message_id,
            Role::User,
            message.content.clone(),
        );
        self.hub.broadcast(room, echo, Some(conn.id())).await;

        if self.config.assistant_replies {
            self.spawn_assistant_reply(room.clone(), &message.content);
        }
        Ok(())
    }

    async fn on_typing(&self, conn: &Arc<Connection>) -> anyhow::Result<()> {
        let Some(room) = conn.room() else {
            debug!("Ignoring typing from {} outside any room", conn.id());
            return Ok(());
        };
        let event = OutboundEvent::typing(Some(room.clone()), conn.identity().clone(), true);
        self.hub.broadcast(room, event, Some(conn.id())).await;
        Ok(())
    }

    async fn on_disconnect(&self, conn: &Arc<Connection>) {
        info!(
            "Connection {} for {} disconnected",
            conn.id(),
            conn.identity()
        );
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let mut short: String = text.chars().take(PREVIEW_CHARS).collect();
    short.push_str("...");
    short
}

fn assistant_reply(prompt: &str) -> String {
    format!(
        "I received your message: '{}'. I'm an assistant relaying this room. \
         How can I help?",
        preview(prompt)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::connection::OutboundReceiver;
    use roomcast_protocol::IdentityId;
    use serde_json::Value;
    use std::time::Duration;

    async fn join(hub: &Hub, identity: &str, room: Option<&str>) -> (Arc<Connection>, OutboundReceiver) {
        let (conn, rx) = Connection::new(IdentityId::new(identity), room.map(RoomId::new), 64);
        hub.register(Arc::clone(&conn)).await;
        (conn, rx)
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            out.push(serde_json::from_str(&payload).unwrap());
        }
        out
    }

    fn message(content: &str) -> InboundMessage {
        InboundMessage {
            content: content.to_string(),
            ..InboundMessage::default()
        }
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(60);
        let short = preview(&long);
        assert_eq!(short.chars().count(), PREVIEW_CHARS + 3);
        assert!(short.ends_with("..."));
    }

    #[tokio::test]
    async fn test_message_echoed_to_room_except_sender() {
        let hub = Hub::start(HubConfig::default());
        let relay = RoomRelay::new(
            hub.clone(),
            RelayConfig {
                assistant_replies: false,
                ..RelayConfig::default()
            },
        );
        let (sender, mut rx_sender) = join(&hub, "alice", Some("r1")).await;
        let (_peer, mut rx_peer) = join(&hub, "bob", Some("r1")).await;

        relay.on_message(&sender, message("hello")).await.unwrap();
        hub.snapshot().await;

        assert!(drain(&mut rx_sender).is_empty());
        let received = drain(&mut rx_peer);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["type"], "stream_complete");
        assert_eq!(received[0]["role"], "user");
        assert_eq!(received[0]["content"], "hello");
        assert_eq!(received[0]["room_id"], "r1");

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_message_without_room_is_rejected() {
        let hub = Hub::start(HubConfig::default());
        let relay = RoomRelay::new(hub.clone(), RelayConfig::default());
        let (conn, _rx) = join(&hub, "alice", None).await;

        let err = relay.on_message(&conn, message("hello")).await.unwrap_err();
        assert!(err.to_string().contains("not in a room"));

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_typing_reaches_others_only() {
        let hub = Hub::start(HubConfig::default());
        let relay = RoomRelay::new(hub.clone(), RelayConfig::default());
        let (sender, mut rx_sender) = join(&hub, "alice", Some("r1")).await;
        let (_peer, mut rx_peer) = join(&hub, "bob", Some("r1")).await;

        relay.on_typing(&sender).await.unwrap();
        hub.snapshot().await;

        assert!(drain(&mut rx_sender).is_empty());
        let received = drain(&mut rx_peer);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["type"], "typing");
        assert_eq!(received[0]["metadata"]["user_id"], "alice");
        assert_eq!(received[0]["metadata"]["is_typing"], true);

        hub.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_assistant_reply_streams_to_whole_room() {
        let hub = Hub::start(HubConfig::default());
        let relay = RoomRelay::new(
            hub.clone(),
            RelayConfig {
                assistant_replies: true,
                delta_interval_ms: 10,
            },
        );
        let (sender, mut rx_sender) = join(&hub, "alice", Some("r1")).await;

        relay.on_message(&sender, message("make an ad")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        hub.snapshot().await;

        let received = drain(&mut rx_sender);
        let kinds: Vec<_> = received
            .iter()
            .map(|v| v["type"].as_str().unwrap())
            .collect();
        assert_eq!(kinds.first(), Some(&"stream_start"));
        assert_eq!(kinds.last(), Some(&"stream_complete"));
        assert!(kinds[1..kinds.len() - 1].iter().all(|k| *k == "content_delta"));

        let streamed: String = received
            .iter()
            .filter_map(|v| v["delta"].as_str())
            .collect();
        let last = received.last().unwrap();
        assert_eq!(last["role"], "assistant");
        assert_eq!(last["content"].as_str().unwrap(), streamed);
        assert!(streamed.contains("make an ad"));

        let message_id = &received[0]["message_id"];
        assert!(received.iter().all(|v| &v["message_id"] == message_id));

        hub.shutdown().await;
    }
}
