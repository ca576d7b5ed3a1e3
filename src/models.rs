use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Content of a message that was removed before `type` could be `deleted`.
pub const LEGACY_DELETED_MARKER: &str = "::deleted::";

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub passcode_hash: Option<String>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_online: bool,
    #[serde(default)]
    pub last_active: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn has_passcode(&self) -> bool {
        self.passcode_hash.as_deref().map_or(false, |h| !h.is_empty())
    }

    pub fn display_name(&self) -> &str {
        self.username.as_deref().filter(|n| !n.is_empty()).unwrap_or("Me")
    }
}

/// Row shape returned by the `get_public_profiles` RPC.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PublicProfile {
    pub id: Uuid,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_online: bool,
    #[serde(default)]
    pub last_active: Option<DateTime<Utc>>,
}

impl PublicProfile {
    pub fn display_name(&self) -> &str {
        self.username.as_deref().filter(|n| !n.is_empty()).unwrap_or("User")
    }

    pub fn unknown(id: Uuid) -> Self {
        PublicProfile {
            id,
            username: None,
            avatar_url: None,
            is_online: false,
            last_active: None,
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct NewProfile {
    pub id: Uuid,
    pub email: Option<String>,
    pub username: Option<String>,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// `Some(None)` clears the avatar.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_online: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    Text,
    Image,
    Gif,
    Sticker,
    Tiktok,
    Video,
    Audio,
    Deleted,
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Gif => "gif",
            MessageKind::Sticker => "sticker",
            MessageKind::Tiktok => "tiktok",
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
            MessageKind::Deleted => "deleted",
            MessageKind::Other(other) => other,
        }
    }

    pub fn is_image_like(&self) -> bool {
        matches!(self, MessageKind::Image | MessageKind::Gif | MessageKind::Sticker)
    }
}

impl Default for MessageKind {
    fn default() -> Self {
        MessageKind::Text
    }
}

impl From<String> for MessageKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "text" => MessageKind::Text,
            "image" => MessageKind::Image,
            "gif" => MessageKind::Gif,
            "sticker" => MessageKind::Sticker,
            "tiktok" => MessageKind::Tiktok,
            "video" => MessageKind::Video,
            "audio" => MessageKind::Audio,
            "deleted" => MessageKind::Deleted,
            _ => MessageKind::Other(value),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.as_str().to_string()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(default)]
    pub reply_to_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub seen_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.kind == MessageKind::Deleted || self.content == LEGACY_DELETED_MARKER
    }

    /// Rows get `updated_at` on insert too; only a gap over two seconds counts.
    pub fn is_edited(&self) -> bool {
        self.updated_at
            .map_or(false, |u| (u - self.created_at).num_milliseconds() > 2000)
    }

    /// The other participant, seen from `me`.
    pub fn peer_of(&self, me: Uuid) -> Uuid {
        if self.sender_id == me {
            self.receiver_id
        } else {
            self.sender_id
        }
    }

    pub fn involves(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub reply_to_id: Option<Uuid>,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct MessagePatch {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seen_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Gif,
    Video,
}

impl MediaType {
    pub fn from_mime(mime: &str) -> Option<Self> {
        if mime.starts_with("video/") {
            Some(MediaType::Video)
        } else if mime.starts_with("image/") {
            if mime.contains("gif") {
                Some(MediaType::Gif)
            } else {
                Some(MediaType::Image)
            }
        } else {
            None
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Story {
    pub id: Uuid,
    pub user_id: Uuid,
    pub media_url: String,
    pub media_type: MediaType,
    #[serde(default)]
    pub caption: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct NewStory {
    pub user_id: Uuid,
    pub media_url: String,
    pub media_type: MediaType,
    pub caption: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoryView {
    pub story_id: Uuid,
    pub viewer_id: Uuid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    pub expires_at: i64,
    pub user: AuthUser,
}

impl Session {
    pub fn expires_within(&self, now: DateTime<Utc>, secs: i64) -> bool {
        self.expires_at - now.timestamp() <= secs
    }
}

/// A file picked from disk, ready for upload.
#[derive(Clone, Debug)]
pub struct LocalFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl LocalFile {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(kind: &str, content: &str) -> Message {
        serde_json::from_value(serde_json::json!({
            "id": Uuid::new_v4(),
            "sender_id": Uuid::new_v4(),
            "receiver_id": Uuid::new_v4(),
            "type": kind,
            "content": content,
            "created_at": "2024-05-01T10:00:00+00:00",
        }))
        .unwrap()
    }

    #[test]
    fn test_message_kind_keeps_unknown_types() {
        let msg = message("poll", "x");
        assert_eq!(msg.kind, MessageKind::Other("poll".to_string()));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "poll");
    }

    #[test]
    fn test_deleted_by_type_or_marker() {
        assert!(message("deleted", "").is_deleted());
        assert!(message("text", LEGACY_DELETED_MARKER).is_deleted());
        assert!(!message("text", "hello").is_deleted());
    }

    #[test]
    fn test_null_content_reads_as_empty() {
        let msg: Message = serde_json::from_value(serde_json::json!({
            "id": Uuid::new_v4(),
            "sender_id": Uuid::new_v4(),
            "receiver_id": Uuid::new_v4(),
            "type": "image",
            "content": null,
            "created_at": "2024-05-01T10:00:00Z",
        }))
        .unwrap();
        assert_eq!(msg.content, "");
    }

    #[test]
    fn test_edited_needs_more_than_two_seconds() {
        let mut msg = message("text", "hi");
        msg.updated_at = Some(msg.created_at + chrono::Duration::milliseconds(1500));
        assert!(!msg.is_edited());
        msg.updated_at = Some(msg.created_at + chrono::Duration::seconds(3));
        assert!(msg.is_edited());
    }

    #[test]
    fn test_profile_patch_clears_avatar_with_null() {
        let patch = ProfilePatch {
            username: Some("neo".into()),
            avatar_url: Some(None),
            ..Default::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({ "username": "neo", "avatar_url": null }));
    }

    #[test]
    fn test_media_type_from_mime() {
        assert_eq!(MediaType::from_mime("video/mp4"), Some(MediaType::Video));
        assert_eq!(MediaType::from_mime("image/gif"), Some(MediaType::Gif));
        assert_eq!(MediaType::from_mime("image/png"), Some(MediaType::Image));
        assert_eq!(MediaType::from_mime("text/plain"), None);
    }

    #[test]
    fn test_session_expiry_window() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let session = Session {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: now.timestamp() + 30,
            user: AuthUser { id: Uuid::new_v4(), email: None },
        };
        assert!(session.expires_within(now, 60));
        assert!(!session.expires_within(now, 10));
    }
}
