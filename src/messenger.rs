//! Async use cases over the backend and the local store.
//!
//! Every method is a self-contained future so the UI can hand it to
//! `Command::perform`; results are folded into view state by the caller.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use log::{info, warn};
use uuid::Uuid;

use crate::backend::storage::{
    avatar_path, chat_image_path, normalize_story_url, story_path, AVATARS_BUCKET, IMAGE_BUCKET,
    STORIES_BUCKET,
};
use crate::backend::{Backend, CONVERSATION_LIMIT, STORIES_LIMIT};
use crate::conversation::{edited_text, is_tiktok_url, validate_chat_image, Conversation};
use crate::error::{ClientError, Result};
use crate::inbox::Inbox;
use crate::local_store::{LocalStore, PENDING_PASSCODE_KEY, REFRESH_TOKEN_KEY, THEME_KEY};
use crate::models::{
    LocalFile, Message, MessageKind, MessagePatch, NewMessage, NewProfile, NewStory, Profile,
    ProfilePatch, Session,
};
use crate::passcode::{optional_signup_passcode, validate_passcode};
use crate::profile::{validate_avatar, validate_username, AvatarChange};
use crate::stories::{normalize_caption, validate_story_file, StoryFeed};

#[derive(Debug, Clone, Default)]
pub struct SignUpForm {
    pub email: String,
    pub username: String,
    pub password: String,
    pub passcode: String,
    pub passcode_confirm: String,
}

/// A signed-in user and whether the passcode form must be shown.
#[derive(Debug, Clone)]
pub struct Account {
    pub session: Session,
    pub profile: Profile,
    pub needs_passcode: bool,
}

impl Account {
    pub fn id(&self) -> Uuid {
        self.session.user.id
    }
}

#[derive(Debug, Clone)]
pub enum SignUpOutcome {
    SignedIn(Account),
    /// E-mail confirmation is on; the user has to sign in later.
    ConfirmEmail,
}

#[derive(Clone)]
pub struct Messenger {
    backend: Arc<dyn Backend>,
    store: Arc<Mutex<LocalStore>>,
}

impl Messenger {
    pub fn new(backend: Arc<dyn Backend>, store: LocalStore) -> Self {
        Messenger {
            backend,
            store: Arc::new(Mutex::new(store)),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    fn store(&self) -> MutexGuard<'_, LocalStore> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn access_token(&self) -> Option<String> {
        self.backend.session().await.map(|s| s.access_token)
    }

    // --- auth -------------------------------------------------------------

    pub async fn sign_up(&self, form: SignUpForm) -> Result<SignUpOutcome> {
        let email = form.email.trim().to_string();
        let username = form.username.trim().to_string();
        if email.is_empty() || username.is_empty() || form.password.is_empty() {
            return Err(ClientError::validation("Email, username and password are required."));
        }
        let passcode = optional_signup_passcode(&form.passcode, &form.passcode_confirm);

        if let Some(session) = self.backend.sign_up(&email, &form.password, &username).await? {
            self.remember_session(&session);
            self.ensure_profile(&session, Some(&username)).await?;
            if let Some(code) = passcode {
                if let Err(e) = self.backend.set_passcode(&code).await {
                    warn!("Setting the sign-up passcode failed: {}", e);
                }
            }
            let account = self.account(session).await?;
            return Ok(SignUpOutcome::SignedIn(account));
        }

        if let Some(code) = passcode {
            self.store().set_setting(PENDING_PASSCODE_KEY, &code)?;
        }
        match self.backend.sign_in(&email, &form.password).await {
            Ok(session) => Ok(SignUpOutcome::SignedIn(self.after_sign_in(session, Some(&username)).await?)),
            Err(e) => {
                info!("Sign-in right after sign-up failed: {}", e);
                Ok(SignUpOutcome::ConfirmEmail)
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Account> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(ClientError::validation("Email and password are required."));
        }
        let session = self.backend.sign_in(email, password).await?;
        self.after_sign_in(session, None).await
    }

    /// Picks up the refresh token saved by the last run, if any.
    pub async fn restore(&self) -> Result<Option<Account>> {
        let Some(token) = self.store().setting(REFRESH_TOKEN_KEY)? else {
            return Ok(None);
        };
        match self.backend.restore(&token).await {
            Ok(session) => Ok(Some(self.after_sign_in(session, None).await?)),
            Err(e) => {
                warn!("Saved session could not be restored: {}", e);
                self.store().remove_setting(REFRESH_TOKEN_KEY)?;
                Ok(None)
            }
        }
    }

    pub async fn sign_out(&self, me: Uuid) -> Result<()> {
        if let Err(e) = self.set_presence(me, false).await {
            warn!("Presence update on sign-out failed: {}", e);
        }
        self.backend.sign_out().await?;
        self.store().remove_setting(REFRESH_TOKEN_KEY)?;
        Ok(())
    }

    async fn after_sign_in(&self, session: Session, username: Option<&str>) -> Result<Account> {
        self.remember_session(&session);
        self.ensure_profile(&session, username).await?;
        let pending = self.store().setting(PENDING_PASSCODE_KEY)?;
        if let Some(code) = pending {
            match self.backend.set_passcode(&code).await {
                Ok(()) => self.store().remove_setting(PENDING_PASSCODE_KEY)?,
                Err(e) => warn!("Applying the pending passcode failed: {}", e),
            }
        }
        self.account(session).await
    }

    fn remember_session(&self, session: &Session) {
        if let Err(e) = self.store().set_setting(REFRESH_TOKEN_KEY, &session.refresh_token) {
            warn!("Could not persist the session: {}", e);
        }
    }

    async fn ensure_profile(&self, session: &Session, username: Option<&str>) -> Result<Profile> {
        if let Some(profile) = self.backend.fetch_profile(session.user.id).await? {
            return Ok(profile);
        }
        let new = NewProfile {
            id: session.user.id,
            email: session.user.email.clone(),
            username: username.map(str::to_string),
        };
        self.backend.insert_profile(&new).await
    }

    async fn account(&self, session: Session) -> Result<Account> {
        let profile = self
            .backend
            .fetch_profile(session.user.id)
            .await?
            .ok_or(ClientError::NotSignedIn)?;
        Ok(Account {
            needs_passcode: !profile.has_passcode(),
            session,
            profile,
        })
    }

    pub async fn set_passcode(&self, me: Uuid, first: String, second: String) -> Result<Profile> {
        let code = validate_passcode(&first, &second)?;
        self.backend.set_passcode(&code).await?;
        self.backend
            .fetch_profile(me)
            .await?
            .ok_or(ClientError::NotSignedIn)
    }

    pub async fn unlock(&self, code: String) -> Result<bool> {
        if self.backend.session().await.is_none() {
            return Err(ClientError::NotSignedIn);
        }
        self.backend.verify_passcode(&code).await
    }

    pub async fn set_presence(&self, me: Uuid, online: bool) -> Result<()> {
        let patch = ProfilePatch {
            is_online: Some(online),
            last_active: Some(Utc::now()),
            ..Default::default()
        };
        self.backend.update_profile(me, &patch).await
    }

    // --- inbox and conversation --------------------------------------------

    pub async fn load_inbox(&self, me: Uuid) -> Result<Inbox> {
        let profiles = self.backend.public_profiles().await?;
        let peers: Vec<Uuid> = profiles.iter().map(|p| p.id).filter(|id| *id != me).collect();
        if peers.is_empty() {
            return Ok(Inbox::build(me, profiles, Vec::new(), Vec::new(), Vec::new()));
        }
        let (outgoing, incoming) = tokio::try_join!(
            self.backend.outgoing_to(me, &peers),
            self.backend.incoming_from(me, &peers)
        )?;
        let unseen = match self.backend.unseen_senders(me, &peers).await {
            Ok(unseen) => unseen,
            Err(e) => {
                warn!("Initial unread counts failed: {}", e);
                Vec::new()
            }
        };
        Ok(Inbox::build(me, profiles, outgoing, incoming, unseen))
    }

    /// Loads the thread and marks everything from the peer delivered and seen.
    pub async fn open_conversation(&self, me: Uuid, peer: Uuid) -> Result<Conversation> {
        let hidden = self.store().hidden_set(me, peer)?;
        let rows = self.backend.conversation(me, peer, CONVERSATION_LIMIT).await?;
        let mut conversation = Conversation::new(me, peer, hidden);
        conversation.load(rows);

        if let Err(e) = self.backend.bulk_mark_delivered(me, peer).await {
            warn!("Bulk delivered mark failed: {}", e);
        }
        if let Err(e) = self.backend.bulk_mark_seen(me, peer).await {
            warn!("Bulk seen mark failed: {}", e);
        }
        for base in self.fetch_messages(conversation.missing_reply_bases()).await {
            conversation.remember(base);
        }
        Ok(conversation)
    }

    /// Fetches reply bases; missing or failing rows are skipped.
    pub async fn fetch_messages(&self, ids: Vec<Uuid>) -> Vec<Message> {
        let mut found = Vec::new();
        for id in ids {
            match self.backend.fetch_message(id).await {
                Ok(Some(message)) => found.push(message),
                Ok(None) => {}
                Err(e) => warn!("Reply base {} could not be fetched: {}", id, e),
            }
        }
        found
    }

    /// Stamps an incoming row delivered, and seen when its thread is open.
    pub async fn acknowledge(&self, me: Uuid, message: Message, open: bool) -> Result<()> {
        if message.receiver_id != me {
            return Ok(());
        }
        let now = Utc::now();
        let patch = MessagePatch {
            delivered_at: message.delivered_at.is_none().then_some(now),
            seen_at: (open && message.seen_at.is_none()).then_some(now),
            ..Default::default()
        };
        if patch.delivered_at.is_none() && patch.seen_at.is_none() {
            return Ok(());
        }
        self.backend.patch_message(message.id, &patch).await
    }

    pub async fn refresh_unread(&self, me: Uuid, peer: Uuid) -> Result<u64> {
        self.backend.unread_count(me, peer).await
    }

    // --- sending -------------------------------------------------------------

    async fn insert(&self, message: NewMessage) -> Result<Vec<Message>> {
        self.backend.insert_message(&message).await
    }

    /// Trimmed text; empty input sends nothing. TikTok links get their own type.
    pub async fn send_text(
        &self,
        me: Uuid,
        peer: Option<Uuid>,
        text: String,
        reply_to: Option<Uuid>,
    ) -> Result<Vec<Message>> {
        let content = text.trim().to_string();
        if content.is_empty() {
            return Ok(Vec::new());
        }
        let peer = peer.ok_or(ClientError::NoChatSelected)?;
        let kind = if is_tiktok_url(&content) {
            MessageKind::Tiktok
        } else {
            MessageKind::Text
        };
        self.insert(NewMessage {
            sender_id: me,
            receiver_id: peer,
            kind,
            content,
            reply_to_id: reply_to,
        })
        .await
    }

    pub async fn send_gif(
        &self,
        me: Uuid,
        peer: Option<Uuid>,
        url: String,
        kind: MessageKind,
        reply_to: Option<Uuid>,
    ) -> Result<Vec<Message>> {
        let peer = peer.ok_or(ClientError::NoChatSelected)?;
        self.insert(NewMessage {
            sender_id: me,
            receiver_id: peer,
            kind,
            content: url,
            reply_to_id: reply_to,
        })
        .await
    }

    /// Uploads to the chat image bucket and inserts an `image` message.
    pub async fn send_image(
        &self,
        me: Uuid,
        peer: Uuid,
        file: LocalFile,
        reply_to: Option<Uuid>,
    ) -> Result<Vec<Message>> {
        validate_chat_image(&file)?;
        let path = chat_image_path(me, Utc::now().timestamp_millis(), &file.name);
        self.backend
            .upload(IMAGE_BUCKET, &path, file.bytes, &file.mime)
            .await?;
        let url = self.backend.public_url(IMAGE_BUCKET, &path);
        self.insert(NewMessage {
            sender_id: me,
            receiver_id: peer,
            kind: MessageKind::Image,
            content: url,
            reply_to_id: reply_to,
        })
        .await
    }

    /// `Ok(None)` when the new text is empty or unchanged.
    pub async fn edit(
        &self,
        me: Uuid,
        id: Uuid,
        original: String,
        typed: String,
    ) -> Result<Option<Vec<Message>>> {
        let Some(content) = edited_text(&original, &typed) else {
            return Ok(None);
        };
        let patch = MessagePatch {
            content: Some(content),
            ..Default::default()
        };
        let rows = self.backend.update_own_message(id, me, &patch).await?;
        if rows.is_empty() {
            return Err(ClientError::NoRowsUpdated);
        }
        Ok(Some(rows))
    }

    pub async fn delete_for_everyone(&self, me: Uuid, id: Uuid) -> Result<Vec<Message>> {
        let patch = MessagePatch {
            kind: Some(MessageKind::Deleted),
            content: Some(String::new()),
            ..Default::default()
        };
        let rows = self.backend.update_own_message(id, me, &patch).await?;
        if rows.is_empty() {
            return Err(ClientError::NoRowsUpdated);
        }
        Ok(rows)
    }

    pub fn delete_for_me(&self, me: Uuid, peer: Uuid, id: Uuid) -> Result<()> {
        self.store().hide(me, peer, id)?;
        Ok(())
    }

    // --- profile -------------------------------------------------------------

    pub async fn update_profile(&self, me: Uuid, username: String, avatar: AvatarChange) -> Result<Profile> {
        let username = validate_username(&username)?;
        let avatar_url = match avatar {
            AvatarChange::Keep => None,
            AvatarChange::Remove => Some(None),
            AvatarChange::Replace(file) => {
                validate_avatar(&file)?;
                let path = avatar_path(me, Utc::now().timestamp_millis(), &file.name);
                self.backend
                    .upload(AVATARS_BUCKET, &path, file.bytes, &file.mime)
                    .await?;
                Some(Some(self.backend.public_url(AVATARS_BUCKET, &path)))
            }
        };
        let patch = ProfilePatch {
            username: Some(username),
            avatar_url,
            ..Default::default()
        };
        self.backend.update_profile(me, &patch).await?;
        self.backend
            .fetch_profile(me)
            .await?
            .ok_or(ClientError::NotSignedIn)
    }

    // --- stories -------------------------------------------------------------

    pub async fn load_stories(&self, me: Uuid) -> Result<StoryFeed> {
        let stories = self.backend.recent_stories(STORIES_LIMIT).await?;
        let ids: Vec<Uuid> = stories.iter().map(|s| s.id).collect();
        let viewed = if ids.is_empty() {
            Vec::new()
        } else {
            match self.backend.viewed_story_ids(me, &ids).await {
                Ok(viewed) => viewed,
                Err(e) => {
                    warn!("Story views could not be loaded: {}", e);
                    Vec::new()
                }
            }
        };
        let profiles = self.backend.public_profiles().await?;
        Ok(StoryFeed::build(stories, viewed, &profiles))
    }

    pub async fn post_story(&self, me: Uuid, file: LocalFile, caption: String) -> Result<()> {
        let media_type = validate_story_file(&file)?;
        let path = story_path(me, Utc::now().timestamp_millis(), &file.name);
        self.backend
            .upload(STORIES_BUCKET, &path, file.bytes, &file.mime)
            .await?;
        let media_url = normalize_story_url(&self.backend.public_url(STORIES_BUCKET, &path));
        self.backend
            .insert_story(&NewStory {
                user_id: me,
                media_url,
                media_type,
                caption: normalize_caption(&caption),
            })
            .await
    }

    pub async fn record_story_view(&self, me: Uuid, story: Uuid) -> Result<()> {
        self.backend.record_story_view(story, me).await
    }

    /// A plain text DM to the story's author.
    pub async fn story_reply(&self, me: Uuid, author: Uuid, text: String) -> Result<Vec<Message>> {
        self.send_text(me, Some(author), text, None).await
    }

    // --- settings ------------------------------------------------------------

    pub fn theme(&self) -> Option<String> {
        match self.store().setting(THEME_KEY) {
            Ok(theme) => theme,
            Err(e) => {
                warn!("Theme setting unreadable: {}", e);
                None
            }
        }
    }

    pub fn set_theme(&self, theme: &str) -> Result<()> {
        self.store().set_setting(THEME_KEY, theme)?;
        Ok(())
    }
}
