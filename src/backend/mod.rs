//! The hosted backend surface: auth, rows, RPCs and object storage.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Message, MessagePatch, NewMessage, NewProfile, NewStory, Profile, ProfilePatch, PublicProfile,
    Session, Story,
};

pub mod query;
pub mod storage;
pub mod supabase;

#[cfg(test)]
pub mod fake;

pub use supabase::SupabaseBackend;

pub const CONVERSATION_LIMIT: usize = 200;
pub const STORIES_LIMIT: usize = 500;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the session right away when e-mail confirmation is disabled.
    async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<Option<Session>>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;
    async fn restore(&self, refresh_token: &str) -> Result<Session>;
    async fn sign_out(&self) -> Result<()>;
    async fn session(&self) -> Option<Session>;

    async fn fetch_profile(&self, id: Uuid) -> Result<Option<Profile>>;
    async fn insert_profile(&self, profile: &NewProfile) -> Result<Profile>;
    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> Result<()>;
    async fn public_profiles(&self) -> Result<Vec<PublicProfile>>;

    async fn verify_passcode(&self, passcode: &str) -> Result<bool>;
    async fn set_passcode(&self, passcode: &str) -> Result<()>;

    /// Both directions, oldest first.
    async fn conversation(&self, me: Uuid, peer: Uuid, limit: usize) -> Result<Vec<Message>>;
    /// Messages `me` sent to `peers`, newest first.
    async fn outgoing_to(&self, me: Uuid, peers: &[Uuid]) -> Result<Vec<Message>>;
    /// Messages `peers` sent to `me`, newest first.
    async fn incoming_from(&self, me: Uuid, peers: &[Uuid]) -> Result<Vec<Message>>;
    /// Sender ids of every unseen message addressed to `me`, one per row.
    async fn unseen_senders(&self, me: Uuid, peers: &[Uuid]) -> Result<Vec<Uuid>>;
    async fn unread_count(&self, me: Uuid, peer: Uuid) -> Result<u64>;
    async fn fetch_message(&self, id: Uuid) -> Result<Option<Message>>;
    async fn insert_message(&self, message: &NewMessage) -> Result<Vec<Message>>;
    /// Only rows whose sender is `sender` are touched.
    async fn update_own_message(
        &self,
        id: Uuid,
        sender: Uuid,
        patch: &MessagePatch,
    ) -> Result<Vec<Message>>;
    async fn patch_message(&self, id: Uuid, patch: &MessagePatch) -> Result<()>;
    /// Marks peer→me rows delivered where `delivered_at` is still null.
    async fn bulk_mark_delivered(&self, me: Uuid, peer: Uuid) -> Result<()>;
    /// Marks peer→me rows seen where `seen_at` is still null.
    async fn bulk_mark_seen(&self, me: Uuid, peer: Uuid) -> Result<()>;

    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;
    fn public_url(&self, bucket: &str, path: &str) -> String;

    async fn recent_stories(&self, limit: usize) -> Result<Vec<Story>>;
    async fn viewed_story_ids(&self, viewer: Uuid, ids: &[Uuid]) -> Result<Vec<Uuid>>;
    async fn insert_story(&self, story: &NewStory) -> Result<()>;
    /// Upsert that ignores an existing (story, viewer) pair.
    async fn record_story_view(&self, story: Uuid, viewer: Uuid) -> Result<()>;
}
