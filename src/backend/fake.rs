//! In-memory stand-in for the hosted backend, used by unit tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use super::Backend;
use crate::error::{ClientError, Result};
use crate::models::{
    AuthUser, Message, MessagePatch, NewMessage, NewProfile, NewStory, Profile, ProfilePatch,
    PublicProfile, Session, Story,
};

#[derive(Default)]
pub struct FakeState {
    pub session: Option<Session>,
    /// Sign-up returns no session, as with e-mail confirmation on.
    pub confirm_email: bool,
    pub profiles: Vec<Profile>,
    pub passcodes: Vec<(Uuid, String)>,
    pub messages: Vec<Message>,
    pub stories: Vec<Story>,
    pub story_views: HashSet<(Uuid, Uuid)>,
    pub uploads: Vec<(String, String, usize)>,
    pub fail_uploads: bool,
    pub fail_inserts: bool,
    pub calls: Vec<String>,
}

#[derive(Default)]
pub struct FakeBackend {
    pub state: Mutex<FakeState>,
}

fn backend_error(message: &str) -> ClientError {
    ClientError::Backend {
        status: 400,
        code: None,
        message: message.to_string(),
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        FakeBackend::default()
    }

    /// Signed in as a fresh user that already has a profile.
    pub fn signed_in(username: &str) -> (Self, Uuid) {
        let backend = FakeBackend::new();
        let id = Uuid::new_v4();
        {
            let mut state = backend.state.lock().unwrap();
            state.session = Some(session_for(id));
            state.profiles.push(profile(id, username));
        }
        (backend, id)
    }

    pub fn add_user(&self, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().profiles.push(profile(id, username));
        id
    }

    pub fn push_message(&self, from: Uuid, to: Uuid, content: &str, minutes_ago: i64) -> Message {
        let msg = Message {
            id: Uuid::new_v4(),
            sender_id: from,
            receiver_id: to,
            kind: Default::default(),
            content: content.to_string(),
            reply_to_id: None,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
            updated_at: None,
            delivered_at: None,
            seen_at: None,
        };
        self.state.lock().unwrap().messages.push(msg.clone());
        msg
    }

    pub fn message(&self, id: Uuid) -> Option<Message> {
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn log(&self, call: &str) {
        self.state.lock().unwrap().calls.push(call.to_string());
    }

    fn me(&self) -> Result<Uuid> {
        self.state
            .lock()
            .unwrap()
            .session
            .as_ref()
            .map(|s| s.user.id)
            .ok_or(ClientError::NotSignedIn)
    }
}

pub fn session_for(id: Uuid) -> Session {
    Session {
        access_token: format!("access-{}", id),
        refresh_token: format!("refresh-{}", id),
        expires_at: Utc::now().timestamp() + 3600,
        user: AuthUser {
            id,
            email: Some(format!("{}@example.com", id)),
        },
    }
}

pub fn profile(id: Uuid, username: &str) -> Profile {
    Profile {
        id,
        email: None,
        username: Some(username.to_string()),
        avatar_url: None,
        passcode_hash: None,
        is_online: false,
        last_active: None,
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn sign_up(&self, email: &str, _password: &str, _username: &str) -> Result<Option<Session>> {
        self.log("sign_up");
        let mut state = self.state.lock().unwrap();
        if state.confirm_email {
            return Ok(None);
        }
        let mut session = session_for(Uuid::new_v4());
        session.user.email = Some(email.to_string());
        state.session = Some(session.clone());
        Ok(Some(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        self.log("sign_in");
        if password == "wrong" {
            return Err(backend_error("Invalid login credentials"));
        }
        let mut session = session_for(Uuid::new_v4());
        session.user.email = Some(email.to_string());
        self.state.lock().unwrap().session = Some(session.clone());
        Ok(session)
    }

    async fn restore(&self, refresh_token: &str) -> Result<Session> {
        self.log("restore");
        let id = refresh_token
            .strip_prefix("refresh-")
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| backend_error("Invalid Refresh Token"))?;
        let session = session_for(id);
        self.state.lock().unwrap().session = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        self.log("sign_out");
        self.state.lock().unwrap().session = None;
        Ok(())
    }

    async fn session(&self) -> Option<Session> {
        self.state.lock().unwrap().session.clone()
    }

    async fn fetch_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        let state = self.state.lock().unwrap();
        Ok(state.profiles.iter().find(|p| p.id == id).cloned())
    }

    async fn insert_profile(&self, new: &NewProfile) -> Result<Profile> {
        self.log("insert_profile");
        let created = Profile {
            id: new.id,
            email: new.email.clone(),
            username: new.username.clone(),
            avatar_url: None,
            passcode_hash: None,
            is_online: false,
            last_active: None,
        };
        self.state.lock().unwrap().profiles.push(created.clone());
        Ok(created)
    }

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> Result<()> {
        self.log("update_profile");
        let mut state = self.state.lock().unwrap();
        let profile = state
            .profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(ClientError::NoRowsUpdated)?;
        if let Some(username) = &patch.username {
            profile.username = Some(username.clone());
        }
        if let Some(avatar) = &patch.avatar_url {
            profile.avatar_url = avatar.clone();
        }
        if let Some(online) = patch.is_online {
            profile.is_online = online;
        }
        if patch.last_active.is_some() {
            profile.last_active = patch.last_active;
        }
        Ok(())
    }

    async fn public_profiles(&self) -> Result<Vec<PublicProfile>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .profiles
            .iter()
            .map(|p| PublicProfile {
                id: p.id,
                username: p.username.clone(),
                avatar_url: p.avatar_url.clone(),
                is_online: p.is_online,
                last_active: p.last_active,
            })
            .collect())
    }

    async fn verify_passcode(&self, passcode: &str) -> Result<bool> {
        self.log("verify_passcode");
        let me = self.me()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .passcodes
            .iter()
            .any(|(id, code)| *id == me && code == passcode))
    }

    async fn set_passcode(&self, passcode: &str) -> Result<()> {
        self.log("set_passcode");
        let me = self.me()?;
        let mut state = self.state.lock().unwrap();
        state.passcodes.retain(|(id, _)| *id != me);
        state.passcodes.push((me, passcode.to_string()));
        if let Some(profile) = state.profiles.iter_mut().find(|p| p.id == me) {
            profile.passcode_hash = Some(format!("hash:{}", passcode.len()));
        }
        Ok(())
    }

    async fn conversation(&self, me: Uuid, peer: Uuid, limit: usize) -> Result<Vec<Message>> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.involves(me, peer))
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn outgoing_to(&self, me: Uuid, peers: &[Uuid]) -> Result<Vec<Message>> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.sender_id == me && peers.contains(&m.receiver_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn incoming_from(&self, me: Uuid, peers: &[Uuid]) -> Result<Vec<Message>> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.receiver_id == me && peers.contains(&m.sender_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn unseen_senders(&self, me: Uuid, peers: &[Uuid]) -> Result<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .messages
            .iter()
            .filter(|m| m.receiver_id == me && peers.contains(&m.sender_id) && m.seen_at.is_none())
            .map(|m| m.sender_id)
            .collect())
    }

    async fn unread_count(&self, me: Uuid, peer: Uuid) -> Result<u64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .messages
            .iter()
            .filter(|m| m.receiver_id == me && m.sender_id == peer && m.seen_at.is_none())
            .count() as u64)
    }

    async fn fetch_message(&self, id: Uuid) -> Result<Option<Message>> {
        Ok(self.message(id))
    }

    async fn insert_message(&self, new: &NewMessage) -> Result<Vec<Message>> {
        self.log("insert_message");
        let mut state = self.state.lock().unwrap();
        if state.fail_inserts {
            return Err(backend_error("insert failed"));
        }
        let now = Utc::now();
        let row = Message {
            id: Uuid::new_v4(),
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            kind: new.kind.clone(),
            content: new.content.clone(),
            reply_to_id: new.reply_to_id,
            created_at: now,
            updated_at: Some(now),
            delivered_at: None,
            seen_at: None,
        };
        state.messages.push(row.clone());
        Ok(vec![row])
    }

    async fn update_own_message(
        &self,
        id: Uuid,
        sender: Uuid,
        patch: &MessagePatch,
    ) -> Result<Vec<Message>> {
        self.log("update_own_message");
        let mut state = self.state.lock().unwrap();
        let mut out = Vec::new();
        for m in state.messages.iter_mut().filter(|m| m.id == id && m.sender_id == sender) {
            if let Some(kind) = &patch.kind {
                m.kind = kind.clone();
            }
            if let Some(content) = &patch.content {
                m.content = content.clone();
            }
            m.updated_at = Some(m.created_at + Duration::seconds(10));
            out.push(m.clone());
        }
        Ok(out)
    }

    async fn patch_message(&self, id: Uuid, patch: &MessagePatch) -> Result<()> {
        self.log("patch_message");
        let mut state = self.state.lock().unwrap();
        if let Some(m) = state.messages.iter_mut().find(|m| m.id == id) {
            if patch.delivered_at.is_some() {
                m.delivered_at = patch.delivered_at;
            }
            if patch.seen_at.is_some() {
                m.seen_at = patch.seen_at;
            }
        }
        Ok(())
    }

    async fn bulk_mark_delivered(&self, me: Uuid, peer: Uuid) -> Result<()> {
        self.log("bulk_mark_delivered");
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        for m in state.messages.iter_mut() {
            if m.receiver_id == me && m.sender_id == peer && m.delivered_at.is_none() {
                m.delivered_at = Some(now);
            }
        }
        Ok(())
    }

    async fn bulk_mark_seen(&self, me: Uuid, peer: Uuid) -> Result<()> {
        self.log("bulk_mark_seen");
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        for m in state.messages.iter_mut() {
            if m.receiver_id == me && m.sender_id == peer && m.seen_at.is_none() {
                m.seen_at = Some(now);
            }
        }
        Ok(())
    }

    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        self.log("upload");
        let mut state = self.state.lock().unwrap();
        if state.fail_uploads {
            return Err(backend_error("The resource already exists"));
        }
        state
            .uploads
            .push((bucket.to_string(), path.to_string(), bytes.len()));
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("https://fake.local/storage/v1/object/public/{}/{}", bucket, path)
    }

    async fn recent_stories(&self, limit: usize) -> Result<Vec<Story>> {
        let state = self.state.lock().unwrap();
        let mut rows = state.stories.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn viewed_story_ids(&self, viewer: Uuid, ids: &[Uuid]) -> Result<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .filter(|id| state.story_views.contains(&(**id, viewer)))
            .copied()
            .collect())
    }

    async fn insert_story(&self, new: &NewStory) -> Result<()> {
        self.log("insert_story");
        let mut state = self.state.lock().unwrap();
        state.stories.push(Story {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            media_url: new.media_url.clone(),
            media_type: new.media_type,
            caption: new.caption.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn record_story_view(&self, story: Uuid, viewer: Uuid) -> Result<()> {
        self.log("record_story_view");
        self.state.lock().unwrap().story_views.insert((story, viewer));
        Ok(())
    }
}
