//! Realtime push over a single websocket.
//!
//! A worker task owns the socket. The UI talks to it through
//! [`RealtimeHandle`] and receives [`RealtimeEvent`]s on a bounded channel.

pub mod protocol;

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use crate::error::{ClientError, Result};
pub use protocol::{ChangeKind, ChannelConfig, PostgresBinding, RealtimeEvent};
use protocol::Codec;

pub const INBOX_CHANNEL: &str = "inbox-overview";
pub const TYPING_CHANNEL: &str = "typing-bus";
pub const STORIES_CHANNEL: &str = "stories-feed";
const DM_PREFIX: &str = "dm-";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const RECONNECT_DELAY: Duration = Duration::from_secs(3);
const EVENT_BUFFER: usize = 100;

fn message_bindings(me: Uuid) -> ChannelConfig {
    let mut config = ChannelConfig::default();
    for kind in [ChangeKind::Insert, ChangeKind::Update] {
        config = config
            .on(PostgresBinding::new(kind, "messages").filter(format!("sender_id=eq.{}", me)))
            .on(PostgresBinding::new(kind, "messages").filter(format!("receiver_id=eq.{}", me)));
    }
    config
}

/// Inserts and updates of every message I send or receive.
pub fn inbox_channel(me: Uuid) -> ChannelConfig {
    message_bindings(me)
}

/// Same bindings as the inbox; rows are filtered to the peer client-side.
pub fn dm_channel(me: Uuid, peer: Uuid) -> (String, ChannelConfig) {
    (format!("{}{}", DM_PREFIX, peer), message_bindings(me))
}

pub fn is_dm_channel(name: &str) -> bool {
    name.starts_with(DM_PREFIX)
}

pub fn typing_channel() -> ChannelConfig {
    ChannelConfig::broadcast()
}

pub fn stories_channel() -> ChannelConfig {
    ChannelConfig::default().on(PostgresBinding::new(ChangeKind::Insert, "stories"))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Join {
        channel: String,
        config: ChannelConfig,
        access_token: String,
    },
    Leave(String),
    Broadcast {
        channel: String,
        event: String,
        payload: Value,
    },
    AccessToken(String),
}

#[derive(Debug, Clone)]
pub struct RealtimeHandle {
    commands: mpsc::Sender<Command>,
}

impl RealtimeHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::Realtime("realtime worker stopped".to_string()))
    }

    pub async fn join(&self, channel: &str, config: ChannelConfig, access_token: &str) -> Result<()> {
        self.send(Command::Join {
            channel: channel.to_string(),
            config,
            access_token: access_token.to_string(),
        })
        .await
    }

    pub async fn leave(&self, channel: &str) -> Result<()> {
        self.send(Command::Leave(channel.to_string())).await
    }

    pub async fn broadcast(&self, channel: &str, event: &str, payload: Value) -> Result<()> {
        self.send(Command::Broadcast {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
        })
        .await
    }

    pub async fn refresh_token(&self, access_token: &str) -> Result<()> {
        self.send(Command::AccessToken(access_token.to_string())).await
    }
}

/// Joined channels, kept so they can be rejoined after a reconnect.
#[derive(Debug, Default)]
struct Channels {
    joined: HashMap<String, (ChannelConfig, String)>,
}

impl Channels {
    /// Applies a command and returns the frames to put on the wire.
    fn frames_for(&mut self, command: Command, codec: &mut Codec) -> Vec<String> {
        match command {
            Command::Join {
                channel,
                config,
                access_token,
            } => {
                let mut frames = Vec::new();
                if self.joined.contains_key(&channel) {
                    frames.push(codec.leave(&channel));
                }
                frames.push(codec.join(&channel, &config, &access_token));
                self.joined.insert(channel, (config, access_token));
                frames
            }
            Command::Leave(channel) => match self.joined.remove(&channel) {
                Some(_) => vec![codec.leave(&channel)],
                None => Vec::new(),
            },
            Command::Broadcast {
                channel,
                event,
                payload,
            } => vec![codec.broadcast(&channel, &event, payload)],
            Command::AccessToken(token) => self
                .joined
                .iter_mut()
                .map(|(channel, (_, current))| {
                    *current = token.clone();
                    codec.access_token(channel, &token)
                })
                .collect(),
        }
    }

    fn rejoin_frames(&self, codec: &mut Codec) -> Vec<String> {
        self.joined
            .iter()
            .map(|(channel, (config, token))| codec.join(channel, config, token))
            .collect()
    }
}

/// Starts the worker; it runs until every handle is dropped.
pub fn spawn(url: String) -> (RealtimeHandle, mpsc::Receiver<RealtimeEvent>) {
    let (command_tx, command_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(run(url, command_rx, event_tx));
    (RealtimeHandle { commands: command_tx }, event_rx)
}

async fn run(
    url: String,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<RealtimeEvent>,
) {
    let mut channels = Channels::default();
    let mut codec = Codec::new();

    loop {
        let socket = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                warn!("Realtime connect failed: {}", e);
                if events.send(RealtimeEvent::Disconnected(e.to_string())).await.is_err() {
                    return;
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };
        info!("Realtime connected");
        let (mut write, mut read) = socket.split();

        let mut pending = channels.rejoin_frames(&mut codec);
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        let reason = 'session: loop {
            for text in pending.drain(..) {
                debug!("realtime > {}", text);
                if let Err(e) = write.send(WsMessage::Text(text)).await {
                    break 'session e.to_string();
                }
            }
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => pending = channels.frames_for(command, &mut codec),
                        None => {
                            let _ = write.close().await;
                            return;
                        }
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            debug!("realtime < {}", text);
                            if let Some(event) = protocol::decode(&text) {
                                if events.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break 'session "closed by server".to_string(),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break 'session e.to_string(),
                    }
                }
                _ = heartbeat.tick() => {
                    pending.push(codec.heartbeat());
                }
            }
        };

        warn!("Realtime disconnected: {}", reason);
        if events.send(RealtimeEvent::Disconnected(reason)).await.is_err() {
            return;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::Frame;

    fn events(frames: &[String]) -> Vec<(String, String)> {
        frames
            .iter()
            .map(|f| {
                let frame: Frame = serde_json::from_str(f).unwrap();
                (frame.topic, frame.event)
            })
            .collect()
    }

    #[test]
    fn test_message_channels_bind_both_directions() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let (name, config) = dm_channel(me, peer);
        assert_eq!(name, format!("dm-{}", peer));
        assert!(is_dm_channel(&name));
        assert!(!is_dm_channel(INBOX_CHANNEL));
        assert_eq!(config.postgres.len(), 4);
        assert!(config
            .postgres
            .iter()
            .any(|b| b.kind == ChangeKind::Update && b.filter.as_deref() == Some(&*format!("receiver_id=eq.{}", me))));
        assert!(typing_channel().broadcast);
        assert_eq!(stories_channel().postgres[0].table, "stories");
    }

    #[test]
    fn test_rejoining_same_channel_leaves_first() {
        let mut channels = Channels::default();
        let mut codec = Codec::new();
        let join = || Command::Join {
            channel: "dm-a".into(),
            config: ChannelConfig::default(),
            access_token: "t".into(),
        };
        assert_eq!(
            events(&channels.frames_for(join(), &mut codec)),
            vec![("realtime:dm-a".to_string(), "phx_join".to_string())]
        );
        assert_eq!(
            events(&channels.frames_for(join(), &mut codec)),
            vec![
                ("realtime:dm-a".to_string(), "phx_leave".to_string()),
                ("realtime:dm-a".to_string(), "phx_join".to_string()),
            ]
        );
    }

    #[test]
    fn test_leave_forgets_channel_and_token_refresh_reaches_joined() {
        let mut channels = Channels::default();
        let mut codec = Codec::new();
        for name in ["dm-a", "typing-bus"] {
            channels.frames_for(
                Command::Join {
                    channel: name.into(),
                    config: ChannelConfig::broadcast(),
                    access_token: "old".into(),
                },
                &mut codec,
            );
        }
        assert_eq!(channels.frames_for(Command::Leave("dm-a".into()), &mut codec).len(), 1);
        assert!(channels.frames_for(Command::Leave("dm-a".into()), &mut codec).is_empty());

        let refreshed = channels.frames_for(Command::AccessToken("new".into()), &mut codec);
        assert_eq!(
            events(&refreshed),
            vec![("realtime:typing-bus".to_string(), "access_token".to_string())]
        );
        let rejoin = channels.rejoin_frames(&mut codec);
        let frame: Frame = serde_json::from_str(&rejoin[0]).unwrap();
        assert_eq!(frame.payload["access_token"], "new");
    }
}
