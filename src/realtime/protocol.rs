//! Phoenix channel frames as spoken by the realtime service.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const TOPIC_PREFIX: &str = "realtime:";
const PHOENIX_TOPIC: &str = "phoenix";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    All,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
            ChangeKind::All => "*",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostgresBinding {
    pub kind: ChangeKind,
    pub schema: String,
    pub table: String,
    pub filter: Option<String>,
}

impl PostgresBinding {
    pub fn new(kind: ChangeKind, table: &str) -> Self {
        PostgresBinding {
            kind,
            schema: "public".to_string(),
            table: table.to_string(),
            filter: None,
        }
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelConfig {
    pub postgres: Vec<PostgresBinding>,
    pub broadcast: bool,
}

impl ChannelConfig {
    pub fn broadcast() -> Self {
        ChannelConfig {
            postgres: Vec::new(),
            broadcast: true,
        }
    }

    pub fn on(mut self, binding: PostgresBinding) -> Self {
        self.postgres.push(binding);
        self
    }

    fn to_json(&self) -> Value {
        let changes: Vec<Value> = self
            .postgres
            .iter()
            .map(|b| {
                let mut v = json!({
                    "event": b.kind.as_str(),
                    "schema": b.schema,
                    "table": b.table,
                });
                if let Some(filter) = &b.filter {
                    v["filter"] = json!(filter);
                }
                v
            })
            .collect();
        json!({
            "broadcast": { "self": false, "ack": false },
            "presence": { "key": "" },
            "postgres_changes": changes,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Change {
        channel: String,
        kind: ChangeKind,
        table: String,
        record: Value,
    },
    Broadcast {
        channel: String,
        event: String,
        payload: Value,
    },
    Joined {
        channel: String,
    },
    Closed {
        channel: String,
    },
    ChannelError {
        channel: String,
        message: String,
    },
    /// The socket dropped; the worker reconnects and rejoins on its own.
    Disconnected(String),
}

pub fn topic(channel: &str) -> String {
    format!("{}{}", TOPIC_PREFIX, channel)
}

fn channel_of(topic: &str) -> Option<&str> {
    topic.strip_prefix(TOPIC_PREFIX)
}

/// Builds outgoing frames, numbering each with a fresh `ref`.
#[derive(Debug, Default)]
pub struct Codec {
    next_ref: u64,
}

impl Codec {
    pub fn new() -> Self {
        Codec::default()
    }

    fn frame(&mut self, topic: String, event: &str, payload: Value) -> String {
        self.next_ref += 1;
        let frame = Frame {
            topic,
            event: event.to_string(),
            payload,
            reference: Some(self.next_ref.to_string()),
        };
        // A Frame of strings and Values always serializes.
        serde_json::to_string(&frame).unwrap_or_default()
    }

    pub fn join(&mut self, channel: &str, config: &ChannelConfig, access_token: &str) -> String {
        let payload = json!({
            "config": config.to_json(),
            "access_token": access_token,
        });
        self.frame(topic(channel), "phx_join", payload)
    }

    pub fn leave(&mut self, channel: &str) -> String {
        self.frame(topic(channel), "phx_leave", json!({}))
    }

    pub fn broadcast(&mut self, channel: &str, event: &str, payload: Value) -> String {
        let payload = json!({
            "type": "broadcast",
            "event": event,
            "payload": payload,
        });
        self.frame(topic(channel), "broadcast", payload)
    }

    pub fn access_token(&mut self, channel: &str, access_token: &str) -> String {
        self.frame(topic(channel), "access_token", json!({ "access_token": access_token }))
    }

    pub fn heartbeat(&mut self) -> String {
        self.frame(PHOENIX_TOPIC.to_string(), "heartbeat", json!({}))
    }
}

/// Decodes one text frame; heartbeat replies and system notices yield `None`.
pub fn decode(text: &str) -> Option<RealtimeEvent> {
    let frame: Frame = serde_json::from_str(text).ok()?;
    let channel = channel_of(&frame.topic)?.to_string();
    match frame.event.as_str() {
        "postgres_changes" => {
            let data = frame.payload.get("data")?;
            let kind = ChangeKind::parse(data.get("type")?.as_str()?)?;
            let table = data.get("table")?.as_str()?.to_string();
            let record = match kind {
                ChangeKind::Delete => data.get("old_record").cloned().unwrap_or(Value::Null),
                _ => data.get("record").cloned().unwrap_or(Value::Null),
            };
            Some(RealtimeEvent::Change {
                channel,
                kind,
                table,
                record,
            })
        }
        "broadcast" => Some(RealtimeEvent::Broadcast {
            channel,
            event: frame.payload.get("event")?.as_str()?.to_string(),
            payload: frame.payload.get("payload").cloned().unwrap_or(Value::Null),
        }),
        "phx_reply" => {
            let status = frame.payload.get("status").and_then(Value::as_str);
            if status == Some("ok") {
                // Replies to broadcasts and leaves carry an empty response.
                let joined = frame
                    .payload
                    .get("response")
                    .and_then(|r| r.get("postgres_changes"))
                    .is_some();
                joined.then_some(RealtimeEvent::Joined { channel })
            } else {
                let message = frame
                    .payload
                    .get("response")
                    .and_then(|r| r.get("reason"))
                    .and_then(Value::as_str)
                    .unwrap_or("join rejected")
                    .to_string();
                Some(RealtimeEvent::ChannelError { channel, message })
            }
        }
        "phx_close" => Some(RealtimeEvent::Closed { channel }),
        "phx_error" => Some(RealtimeEvent::ChannelError {
            channel,
            message: "channel crashed".to_string(),
        }),
        _ => None,
    }
}
