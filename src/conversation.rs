//! Client-side state of the open direct-message thread.
//!
//! Rows arrive from three places: the initial load, responses to our own
//! writes and the realtime feed. They are merged by id; whichever event for
//! an id is applied last wins. Render order is arrival order.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{too_large, ClientError, Result};
use crate::models::{LocalFile, Message, MessageKind};

pub const MAX_CHAT_IMAGE_BYTES: usize = 5 * 1024 * 1024;
pub const REPLY_SNIPPET_CHARS: usize = 80;
pub const DELETED_TEXT: &str = "This message was deleted";
pub const TYPING_VISIBLE_FOR: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditPolicy {
    Unlimited,
    Within(chrono::Duration),
}

impl Default for EditPolicy {
    fn default() -> Self {
        EditPolicy::Unlimited
    }
}

impl EditPolicy {
    pub fn five_minutes() -> Self {
        EditPolicy::Within(chrono::Duration::minutes(5))
    }

    pub fn allows(&self, message: &Message, now: DateTime<Utc>) -> bool {
        match self {
            EditPolicy::Unlimited => true,
            EditPolicy::Within(window) => now - message.created_at <= *window,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Row(Uuid),
    Uploading(u64),
}

#[derive(Debug, Clone)]
struct PendingUpload {
    temp_id: u64,
    file_name: String,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Replaced,
    /// The row belongs to another conversation.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Seen,
}

impl DeliveryStatus {
    pub fn label(self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "Sent",
            DeliveryStatus::Delivered => "Delivered",
            DeliveryStatus::Seen => "Seen",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Deleted,
    Text(String),
    Image(String),
    TikTok(String),
    Uploading(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplyPreview {
    pub base_id: Uuid,
    /// `…` until the base message is known.
    pub snippet: String,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageItem {
    /// `None` for an upload that has no row yet.
    pub id: Option<Uuid>,
    pub mine: bool,
    pub body: Body,
    pub reply: Option<ReplyPreview>,
    pub time: DateTime<Utc>,
    pub edited: bool,
}

pub fn is_tiktok_url(text: &str) -> bool {
    url::Url::parse(text.trim())
        .ok()
        .and_then(|u| u.host_str().map(|h| h.contains("tiktok.com")))
        .unwrap_or(false)
}

/// Short description of a message, used for reply previews and the reply bar.
pub fn reply_snippet(message: &Message) -> String {
    if message.is_deleted() {
        return DELETED_TEXT.to_string();
    }
    match message.kind {
        MessageKind::Image => "Image".to_string(),
        MessageKind::Gif => "GIF".to_string(),
        MessageKind::Sticker => "Sticker".to_string(),
        MessageKind::Tiktok => "TikTok".to_string(),
        _ => message.content.chars().take(REPLY_SNIPPET_CHARS).collect(),
    }
}

pub fn thumbnail(message: &Message) -> Option<String> {
    (message.kind.is_image_like() && !message.is_deleted() && !message.content.is_empty())
        .then(|| message.content.clone())
}

pub fn body_of(message: &Message) -> Body {
    if message.is_deleted() {
        Body::Deleted
    } else if message.kind == MessageKind::Tiktok && is_tiktok_url(&message.content) {
        Body::TikTok(message.content.clone())
    } else if message.kind.is_image_like() && !message.content.is_empty() {
        Body::Image(message.content.clone())
    } else {
        Body::Text(message.content.clone())
    }
}

pub fn validate_chat_image(file: &LocalFile) -> Result<()> {
    if !file.mime.starts_with("image/") {
        return Err(ClientError::validation("Please choose an image."));
    }
    if file.size() > MAX_CHAT_IMAGE_BYTES {
        return Err(too_large("Max 5 MB", file));
    }
    Ok(())
}

/// The trimmed replacement text, or `None` when the edit should be reverted.
pub fn edited_text(original: &str, typed: &str) -> Option<String> {
    let typed = typed.trim();
    (!typed.is_empty() && typed != original).then(|| typed.to_string())
}

#[derive(Debug, Clone)]
pub struct Conversation {
    me: Uuid,
    peer: Uuid,
    slots: Vec<Slot>,
    known: HashMap<Uuid, Message>,
    hidden: HashSet<Uuid>,
    reply_target: Option<Message>,
    pending: Vec<PendingUpload>,
    next_temp: u64,
    typing_until: Option<Instant>,
}

impl Conversation {
    pub fn new(me: Uuid, peer: Uuid, hidden: HashSet<Uuid>) -> Self {
        Conversation {
            me,
            peer,
            slots: Vec::new(),
            known: HashMap::new(),
            hidden,
            reply_target: None,
            pending: Vec::new(),
            next_temp: 0,
            typing_until: None,
        }
    }

    pub fn me(&self) -> Uuid {
        self.me
    }

    pub fn peer(&self) -> Uuid {
        self.peer
    }

    pub fn load(&mut self, rows: Vec<Message>) {
        for row in rows {
            self.apply(row);
        }
    }

    /// Inserts or replaces a row of this pair; the latest call for an id wins.
    pub fn apply(&mut self, message: Message) -> Applied {
        if !message.involves(self.me, self.peer) {
            return Applied::Ignored;
        }
        let id = message.id;
        if self.reply_target.as_ref().map_or(false, |t| t.id == id) {
            self.reply_target = Some(message.clone());
        }
        let on_screen = self.slots.contains(&Slot::Row(id));
        self.known.insert(id, message);
        if on_screen {
            Applied::Replaced
        } else {
            self.slots.push(Slot::Row(id));
            Applied::Inserted
        }
    }

    /// Caches a reply base without putting it on screen.
    pub fn remember(&mut self, message: Message) {
        self.known.entry(message.id).or_insert(message);
    }

    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.known.get(&id)
    }

    /// Reply bases referenced on screen that still need fetching.
    pub fn missing_reply_bases(&self) -> Vec<Uuid> {
        let mut missing: Vec<Uuid> = self
            .rows()
            .filter_map(|m| m.reply_to_id)
            .filter(|id| !self.known.contains_key(id))
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    pub fn hide(&mut self, id: Uuid) {
        self.hidden.insert(id);
        if self.reply_target.as_ref().map_or(false, |t| t.id == id) {
            self.reply_target = None;
        }
    }

    pub fn is_hidden(&self, id: Uuid) -> bool {
        self.hidden.contains(&id)
    }

    pub fn set_reply_target(&mut self, id: Uuid) -> bool {
        match self.known.get(&id) {
            Some(message) => {
                self.reply_target = Some(message.clone());
                true
            }
            None => false,
        }
    }

    pub fn clear_reply_target(&mut self) {
        self.reply_target = None;
    }

    pub fn reply_target(&self) -> Option<&Message> {
        self.reply_target.as_ref()
    }

    pub fn reply_target_id(&self) -> Option<Uuid> {
        self.reply_target.as_ref().map(|m| m.id)
    }

    /// Shows an optimistic "Uploading…" bubble and returns its temporary id.
    pub fn begin_upload(&mut self, file_name: &str) -> u64 {
        self.next_temp += 1;
        let temp_id = self.next_temp;
        self.pending.push(PendingUpload {
            temp_id,
            file_name: file_name.to_string(),
            started_at: Utc::now(),
        });
        self.slots.push(Slot::Uploading(temp_id));
        temp_id
    }

    /// Replaces the bubble with the stored rows.
    pub fn finish_upload(&mut self, temp_id: u64, rows: Vec<Message>) {
        self.drop_upload(temp_id);
        for row in rows {
            self.apply(row);
        }
    }

    /// Rolls back the optimistic bubble.
    pub fn fail_upload(&mut self, temp_id: u64) {
        self.drop_upload(temp_id);
    }

    fn drop_upload(&mut self, temp_id: u64) {
        self.pending.retain(|p| p.temp_id != temp_id);
        self.slots.retain(|s| *s != Slot::Uploading(temp_id));
    }

    pub fn has_pending_uploads(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn show_typing(&mut self, now: Instant) {
        self.typing_until = Some(now + TYPING_VISIBLE_FOR);
    }

    pub fn hide_typing(&mut self) {
        self.typing_until = None;
    }

    pub fn peer_is_typing(&self, now: Instant) -> bool {
        self.typing_until.map_or(false, |until| now < until)
    }

    fn rows(&self) -> impl Iterator<Item = &Message> {
        self.slots.iter().filter_map(move |slot| match slot {
            Slot::Row(id) if !self.hidden.contains(id) => self.known.get(id),
            _ => None,
        })
    }

    fn reply_preview(&self, base_id: Uuid) -> ReplyPreview {
        match self.known.get(&base_id) {
            Some(base) => ReplyPreview {
                base_id,
                snippet: reply_snippet(base),
                thumbnail: thumbnail(base),
            },
            None => ReplyPreview {
                base_id,
                snippet: "…".to_string(),
                thumbnail: None,
            },
        }
    }

    pub fn items(&self) -> Vec<MessageItem> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Row(id) if self.hidden.contains(id) => None,
                Slot::Row(id) => self.known.get(id).map(|m| MessageItem {
                    id: Some(m.id),
                    mine: m.sender_id == self.me,
                    body: body_of(m),
                    reply: m.reply_to_id.map(|base| self.reply_preview(base)),
                    time: m.created_at,
                    edited: m.is_edited(),
                }),
                Slot::Uploading(temp_id) => self
                    .pending
                    .iter()
                    .find(|p| p.temp_id == *temp_id)
                    .map(|p| MessageItem {
                        id: None,
                        mine: true,
                        body: Body::Uploading(p.file_name.clone()),
                        reply: None,
                        time: p.started_at,
                        edited: false,
                    }),
            })
            .collect()
    }

    /// Status under the newest visible message, only when it is ours.
    pub fn delivery_status(&self) -> Option<DeliveryStatus> {
        let last = self.slots.iter().rev().find(|slot| match slot {
            Slot::Row(id) => !self.hidden.contains(id) && self.known.contains_key(id),
            Slot::Uploading(_) => true,
        })?;
        match last {
            Slot::Uploading(_) => Some(DeliveryStatus::Sent),
            Slot::Row(id) => {
                let m = self.known.get(id)?;
                if m.sender_id != self.me {
                    None
                } else if m.seen_at.is_some() {
                    Some(DeliveryStatus::Seen)
                } else if m.delivered_at.is_some() {
                    Some(DeliveryStatus::Delivered)
                } else {
                    Some(DeliveryStatus::Sent)
                }
            }
        }
    }

    /// Own, not deleted, and inside the edit window.
    pub fn can_edit(&self, id: Uuid, policy: EditPolicy, now: DateTime<Utc>) -> bool {
        self.known.get(&id).map_or(false, |m| {
            m.sender_id == self.me && !m.is_deleted() && policy.allows(m, now)
        })
    }

    pub fn can_delete_for_everyone(&self, id: Uuid) -> bool {
        self.known.get(&id).map_or(false, |m| m.sender_id == self.me)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from: Uuid, to: Uuid, kind: MessageKind, content: &str) -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4(),
            sender_id: from,
            receiver_id: to,
            kind,
            content: content.to_string(),
            reply_to_id: None,
            created_at: now,
            updated_at: Some(now),
            delivered_at: None,
            seen_at: None,
        }
    }

    fn setup() -> (Conversation, Uuid, Uuid) {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        (Conversation::new(me, peer, HashSet::new()), me, peer)
    }

    #[test]
    fn test_latest_event_for_id_wins() {
        let (mut convo, me, peer) = setup();
        let original = msg(me, peer, MessageKind::Text, "helo");
        assert_eq!(convo.apply(original.clone()), Applied::Inserted);

        let mut edited = original.clone();
        edited.content = "hello".into();
        assert_eq!(convo.apply(edited), Applied::Replaced);

        let items = convo.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].body, Body::Text("hello".into()));
    }

    #[test]
    fn test_rows_of_other_pairs_are_ignored() {
        let (mut convo, me, _) = setup();
        let stranger = Uuid::new_v4();
        assert_eq!(
            convo.apply(msg(stranger, me, MessageKind::Text, "hi")),
            Applied::Ignored
        );
        assert!(convo.items().is_empty());
    }

    #[test]
    fn test_deleted_message_renders_placeholder() {
        let (mut convo, me, peer) = setup();
        let mut m = msg(peer, me, MessageKind::Text, "secret");
        convo.apply(m.clone());
        m.kind = MessageKind::Deleted;
        m.content = String::new();
        convo.apply(m);
        assert_eq!(convo.items()[0].body, Body::Deleted);
    }

    #[test]
    fn test_hidden_ids_never_render() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let hidden_msg = msg(peer, me, MessageKind::Text, "gone");
        let mut convo = Conversation::new(me, peer, HashSet::from([hidden_msg.id]));
        convo.load(vec![hidden_msg.clone(), msg(peer, me, MessageKind::Text, "kept")]);
        let items = convo.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].body, Body::Text("kept".into()));

        // A later update for the hidden row does not bring it back.
        convo.apply(hidden_msg);
        assert_eq!(convo.items().len(), 1);
    }

    #[test]
    fn test_reply_preview_fills_in_once_base_is_known() {
        let (mut convo, me, peer) = setup();
        let base = msg(peer, me, MessageKind::Gif, "https://media.tenor.com/x.gif");
        let mut reply = msg(me, peer, MessageKind::Text, "lol");
        reply.reply_to_id = Some(base.id);
        convo.apply(reply);

        assert_eq!(convo.missing_reply_bases(), vec![base.id]);
        assert_eq!(convo.items()[0].reply.as_ref().unwrap().snippet, "…");

        convo.remember(base.clone());
        assert!(convo.missing_reply_bases().is_empty());
        let preview = convo.items()[0].reply.clone().unwrap();
        assert_eq!(preview.snippet, "GIF");
        assert_eq!(preview.thumbnail.as_deref(), Some("https://media.tenor.com/x.gif"));
    }

    #[test]
    fn test_reply_target_follows_updates() {
        let (mut convo, me, peer) = setup();
        let mut base = msg(peer, me, MessageKind::Text, "first");
        convo.apply(base.clone());
        assert!(convo.set_reply_target(base.id));
        base.content = "first (fixed)".into();
        convo.apply(base);
        assert_eq!(convo.reply_target().unwrap().content, "first (fixed)");
        assert!(!convo.set_reply_target(Uuid::new_v4()));
    }

    #[test]
    fn test_failed_upload_removes_optimistic_bubble() {
        let (mut convo, _, _) = setup();
        let temp = convo.begin_upload("cat.png");
        assert_eq!(convo.items()[0].body, Body::Uploading("cat.png".into()));
        assert_eq!(convo.delivery_status(), Some(DeliveryStatus::Sent));
        convo.fail_upload(temp);
        assert!(convo.items().is_empty());
        assert!(!convo.has_pending_uploads());
    }

    #[test]
    fn test_finished_upload_is_replaced_by_row() {
        let (mut convo, me, peer) = setup();
        let temp = convo.begin_upload("cat.png");
        let row = msg(me, peer, MessageKind::Image, "https://cdn/x.png");
        convo.finish_upload(temp, vec![row]);
        let items = convo.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].body, Body::Image("https://cdn/x.png".into()));
    }

    #[test]
    fn test_delivery_status_only_for_own_last_message() {
        let (mut convo, me, peer) = setup();
        let mut mine = msg(me, peer, MessageKind::Text, "yo");
        convo.apply(mine.clone());
        assert_eq!(convo.delivery_status(), Some(DeliveryStatus::Sent));
        mine.delivered_at = Some(Utc::now());
        convo.apply(mine.clone());
        assert_eq!(convo.delivery_status(), Some(DeliveryStatus::Delivered));
        mine.seen_at = Some(Utc::now());
        convo.apply(mine);
        assert_eq!(convo.delivery_status(), Some(DeliveryStatus::Seen));

        convo.apply(msg(peer, me, MessageKind::Text, "hey"));
        assert_eq!(convo.delivery_status(), None);
    }

    #[test]
    fn test_edit_and_delete_permissions() {
        let (mut convo, me, peer) = setup();
        let mut mine = msg(me, peer, MessageKind::Text, "mine");
        mine.created_at = Utc::now() - chrono::Duration::minutes(10);
        let theirs = msg(peer, me, MessageKind::Text, "theirs");
        convo.load(vec![mine.clone(), theirs.clone()]);

        let now = Utc::now();
        assert!(convo.can_edit(mine.id, EditPolicy::Unlimited, now));
        assert!(!convo.can_edit(mine.id, EditPolicy::five_minutes(), now));
        assert!(!convo.can_edit(theirs.id, EditPolicy::Unlimited, now));
        assert!(convo.can_delete_for_everyone(mine.id));
        assert!(!convo.can_delete_for_everyone(theirs.id));
    }

    #[test]
    fn test_typing_indicator_expires() {
        let (mut convo, _, _) = setup();
        let now = Instant::now();
        convo.show_typing(now);
        assert!(convo.peer_is_typing(now + Duration::from_secs(1)));
        assert!(!convo.peer_is_typing(now + Duration::from_secs(4)));
        convo.show_typing(now);
        convo.hide_typing();
        assert!(!convo.peer_is_typing(now));
    }

    #[test]
    fn test_snippets_and_helpers() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let long = "x".repeat(100);
        assert_eq!(reply_snippet(&msg(me, peer, MessageKind::Text, &long)).len(), 80);
        assert_eq!(reply_snippet(&msg(me, peer, MessageKind::Tiktok, "u")), "TikTok");
        assert!(is_tiktok_url("https://www.tiktok.com/@a/video/1"));
        assert!(!is_tiktok_url("tiktok.com is fun"));
        assert_eq!(edited_text("a", "  b "), Some("b".to_string()));
        assert_eq!(edited_text("a", " a "), None);
        assert_eq!(edited_text("a", "   "), None);
    }

    #[test]
    fn test_chat_image_validation() {
        let ok = LocalFile { name: "a.png".into(), mime: "image/png".into(), bytes: vec![0; 10] };
        assert!(validate_chat_image(&ok).is_ok());
        let text = LocalFile { mime: "text/plain".into(), ..ok.clone() };
        assert!(validate_chat_image(&text).unwrap_err().is_validation());
        let big = LocalFile { bytes: vec![0; MAX_CHAT_IMAGE_BYTES + 1], ..ok };
        let err = validate_chat_image(&big).unwrap_err().to_string();
        assert!(err.starts_with("Max 5 MB, this file is "), "{}", err);
    }
}
