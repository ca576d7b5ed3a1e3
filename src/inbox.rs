use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::conversation::{DELETED_TEXT, TYPING_VISIBLE_FOR};
use crate::format::time_ago;
use crate::models::{Message, MessageKind, PublicProfile};

const SNIPPET_CHARS: usize = 42;

/// `You: …` or `Received: …` for the peer list.
pub fn list_snippet(message: &Message, me: Uuid) -> String {
    let prefix = if message.receiver_id == me { "Received: " } else { "You: " };
    let body = if message.is_deleted() {
        DELETED_TEXT.to_string()
    } else {
        match message.kind {
            MessageKind::Text => {
                let text = message.content.split_whitespace().collect::<Vec<_>>().join(" ");
                if text.chars().count() > SNIPPET_CHARS {
                    let cut: String = text.chars().take(SNIPPET_CHARS).collect();
                    format!("{}…", cut)
                } else {
                    text
                }
            }
            MessageKind::Image => "[Photo]".to_string(),
            MessageKind::Video => "[Video]".to_string(),
            MessageKind::Gif => "[GIF]".to_string(),
            MessageKind::Audio => "[Audio]".to_string(),
            _ => "[Attachment]".to_string(),
        }
    };
    format!("{}{}", prefix, body)
}

pub fn presence_line(profile: &PublicProfile, now: DateTime<Utc>) -> String {
    if profile.is_online {
        "Active now".to_string()
    } else {
        match profile.last_active {
            Some(ts) => time_ago(ts, now),
            None => "Offline".to_string(),
        }
    }
}

/// Badge text; `None` hides the badge.
pub fn badge_text(count: u64) -> Option<String> {
    match count {
        0 => None,
        1..=9 => Some(count.to_string()),
        _ => Some("9+".to_string()),
    }
}

#[derive(Debug, Clone)]
struct PeerEntry {
    profile: PublicProfile,
    last: Option<Message>,
    unread: u64,
    typing_until: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboxRow {
    pub id: Uuid,
    pub name: String,
    pub avatar_url: Option<String>,
    pub online: bool,
    pub status: String,
    pub badge: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Inbox {
    me: Uuid,
    peers: Vec<PeerEntry>,
}

impl Inbox {
    /// `outgoing` and `incoming` are the two batched "latest message" reads;
    /// `unseen_senders` holds one sender id per unseen incoming row.
    pub fn build(
        me: Uuid,
        profiles: Vec<PublicProfile>,
        outgoing: Vec<Message>,
        incoming: Vec<Message>,
        unseen_senders: Vec<Uuid>,
    ) -> Self {
        let mut latest: HashMap<Uuid, Message> = HashMap::new();
        for m in outgoing.into_iter().chain(incoming) {
            let peer = m.peer_of(me);
            let newer = latest
                .get(&peer)
                .map_or(true, |prev| m.created_at > prev.created_at);
            if newer {
                latest.insert(peer, m);
            }
        }
        let mut unread: HashMap<Uuid, u64> = HashMap::new();
        for sender in unseen_senders {
            *unread.entry(sender).or_default() += 1;
        }
        let peers = profiles
            .into_iter()
            .filter(|p| p.id != me)
            .map(|profile| PeerEntry {
                last: latest.remove(&profile.id),
                unread: unread.get(&profile.id).copied().unwrap_or(0),
                typing_until: None,
                profile,
            })
            .collect();
        Inbox { me, peers }
    }

    fn entry_mut(&mut self, peer: Uuid) -> Option<&mut PeerEntry> {
        self.peers.iter_mut().find(|p| p.profile.id == peer)
    }

    pub fn profile(&self, peer: Uuid) -> Option<&PublicProfile> {
        self.peers.iter().find(|p| p.profile.id == peer).map(|p| &p.profile)
    }

    pub fn profiles(&self) -> Vec<PublicProfile> {
        self.peers.iter().map(|p| p.profile.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Realtime rows replace the snippet when they are the same row or newer.
    pub fn apply_message(&mut self, message: &Message) {
        let peer = message.peer_of(self.me);
        if let Some(entry) = self.entry_mut(peer) {
            let replaces = entry.last.as_ref().map_or(true, |prev| {
                prev.id == message.id || message.created_at >= prev.created_at
            });
            if replaces {
                entry.last = Some(message.clone());
            }
        }
    }

    pub fn set_unread(&mut self, peer: Uuid, count: u64) {
        if let Some(entry) = self.entry_mut(peer) {
            entry.unread = count;
        }
    }

    pub fn unread(&self, peer: Uuid) -> u64 {
        self.peers
            .iter()
            .find(|p| p.profile.id == peer)
            .map_or(0, |p| p.unread)
    }

    pub fn show_typing(&mut self, peer: Uuid, now: Instant) {
        if let Some(entry) = self.entry_mut(peer) {
            entry.typing_until = Some(now + TYPING_VISIBLE_FOR);
        }
    }

    pub fn clear_typing(&mut self) {
        for entry in &mut self.peers {
            entry.typing_until = None;
        }
    }

    pub fn rows(&self, now: Instant, wall: DateTime<Utc>) -> Vec<InboxRow> {
        self.peers
            .iter()
            .map(|entry| {
                let typing = entry.typing_until.map_or(false, |until| now < until);
                let status = if typing {
                    "Typing…".to_string()
                } else {
                    match &entry.last {
                        Some(m) => list_snippet(m, self.me),
                        None => presence_line(&entry.profile, wall),
                    }
                };
                InboxRow {
                    id: entry.profile.id,
                    name: entry.profile.display_name().to_string(),
                    avatar_url: entry.profile.avatar_url.clone(),
                    online: entry.profile.is_online,
                    status,
                    badge: badge_text(entry.unread),
                }
            })
            .collect()
    }

    /// Case-insensitive name filter for the search box.
    pub fn search(&self, query: &str, now: Instant, wall: DateTime<Utc>) -> Vec<InboxRow> {
        let needle = query.trim().to_lowercase();
        self.rows(now, wall)
            .into_iter()
            .filter(|row| needle.is_empty() || row.name.to_lowercase().contains(&needle))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn peer(name: &str) -> PublicProfile {
        PublicProfile {
            id: Uuid::new_v4(),
            username: Some(name.to_string()),
            avatar_url: None,
            is_online: false,
            last_active: None,
        }
    }

    fn msg(from: Uuid, to: Uuid, kind: MessageKind, content: &str, minutes_ago: i64) -> Message {
        let at = Utc::now() - chrono::Duration::minutes(minutes_ago);
        Message {
            id: Uuid::new_v4(),
            sender_id: from,
            receiver_id: to,
            kind,
            content: content.to_string(),
            reply_to_id: None,
            created_at: at,
            updated_at: Some(at),
            delivered_at: None,
            seen_at: None,
        }
    }

    #[test]
    fn test_snippet_kinds() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let long = "word ".repeat(20);
        let snippet = list_snippet(&msg(me, other, MessageKind::Text, &long, 0), me);
        assert!(snippet.starts_with("You: word word"));
        assert!(snippet.ends_with('…'));
        assert_eq!(snippet.chars().count(), "You: ".len() + 42 + 1);

        assert_eq!(
            list_snippet(&msg(other, me, MessageKind::Text, "  hi \n there ", 0), me),
            "Received: hi there"
        );
        assert_eq!(list_snippet(&msg(other, me, MessageKind::Image, "u", 0), me), "Received: [Photo]");
        assert_eq!(list_snippet(&msg(me, other, MessageKind::Gif, "u", 0), me), "You: [GIF]");
        assert_eq!(list_snippet(&msg(me, other, MessageKind::Sticker, "u", 0), me), "You: [Attachment]");
        assert_eq!(
            list_snippet(&msg(me, other, MessageKind::Deleted, "", 0), me),
            "You: This message was deleted"
        );
    }

    #[test]
    fn test_badge_text() {
        assert_eq!(badge_text(0), None);
        assert_eq!(badge_text(3).as_deref(), Some("3"));
        assert_eq!(badge_text(9).as_deref(), Some("9"));
        assert_eq!(badge_text(10).as_deref(), Some("9+"));
    }

    #[test]
    fn test_build_picks_latest_per_peer_and_counts_unread() {
        let me = Uuid::new_v4();
        let alice = peer("alice");
        let bob = peer("bob");
        let mut self_profile = peer("me");
        self_profile.id = me;

        let outgoing = vec![msg(me, alice.id, MessageKind::Text, "old", 10)];
        let incoming = vec![
            msg(alice.id, me, MessageKind::Text, "new", 1),
            msg(bob.id, me, MessageKind::Text, "b1", 5),
        ];
        let inbox = Inbox::build(
            me,
            vec![self_profile, alice.clone(), bob.clone()],
            outgoing,
            incoming,
            vec![alice.id, alice.id, bob.id],
        );

        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox.unread(alice.id), 2);
        let rows = inbox.rows(Instant::now(), Utc::now());
        let alice_row = rows.iter().find(|r| r.id == alice.id).unwrap();
        assert_eq!(alice_row.status, "Received: new");
        assert_eq!(alice_row.badge.as_deref(), Some("2"));
    }

    #[test]
    fn test_presence_fallback_without_messages() {
        let me = Uuid::new_v4();
        let mut online = peer("on");
        online.is_online = true;
        let mut away = peer("away");
        away.last_active = Some(Utc::now() - chrono::Duration::minutes(3));
        let ghost = peer("ghost");
        let inbox = Inbox::build(me, vec![online, away, ghost], vec![], vec![], vec![]);
        let statuses: Vec<String> = inbox
            .rows(Instant::now(), Utc::now())
            .into_iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(statuses, vec!["Active now", "3m ago", "Offline"]);
    }

    #[test]
    fn test_realtime_row_updates_snippet_and_typing_expires() {
        let me = Uuid::new_v4();
        let alice = peer("alice");
        let mut inbox = Inbox::build(me, vec![alice.clone()], vec![], vec![], vec![]);
        let mut m = msg(alice.id, me, MessageKind::Text, "hey", 0);
        inbox.apply_message(&m);
        m.kind = MessageKind::Deleted;
        inbox.apply_message(&m);

        let now = Instant::now();
        let wall = Utc::now();
        assert_eq!(inbox.rows(now, wall)[0].status, "Received: This message was deleted");

        inbox.show_typing(alice.id, now);
        assert_eq!(inbox.rows(now, wall)[0].status, "Typing…");
        let later = now + Duration::from_secs(4);
        assert_eq!(inbox.rows(later, wall)[0].status, "Received: This message was deleted");
    }

    #[test]
    fn test_set_unread_clears_badge_and_search_filters() {
        let me = Uuid::new_v4();
        let alice = peer("Alice");
        let bob = peer("bob");
        let mut inbox = Inbox::build(me, vec![alice.clone(), bob], vec![], vec![], vec![alice.id]);
        inbox.set_unread(alice.id, 0);
        let now = Instant::now();
        let wall = Utc::now();
        assert!(inbox.rows(now, wall).iter().all(|r| r.badge.is_none()));
        let found = inbox.search("ali", now, wall);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Alice");
        assert_eq!(inbox.search("  ", now, wall).len(), 2);
    }
}
