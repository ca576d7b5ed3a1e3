use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use log::{debug, warn};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::query::{pair_filter, parse_content_range_total, Query};
use super::storage;
use super::Backend;
use crate::config::AppConfig;
use crate::error::{ClientError, Result};
use crate::models::{
    AuthUser, Message, MessagePatch, NewMessage, NewProfile, NewStory, Profile, ProfilePatch,
    PublicProfile, Session, Story, StoryView,
};

/// Refresh the access token when it expires within this many seconds.
const REFRESH_MARGIN_SECS: i64 = 60;

pub struct SupabaseBackend {
    http: Client,
    config: AppConfig,
    session: RwLock<Option<Session>>,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self, now: i64) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| now + secs))
            .or_else(|| jwt_expiry(&self.access_token))
            .unwrap_or(now + 3600);
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Reads the `exp` claim of a JWT without verifying it.
pub fn jwt_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_i64()
}

#[derive(Deserialize)]
struct StoryIdRow {
    story_id: Uuid,
}

#[derive(Deserialize)]
struct SenderRow {
    sender_id: Uuid,
}

async fn check(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let code = body.error_code.or(body.code.map(|c| match c {
        Value::String(s) => s,
        other => other.to_string(),
    }));
    let message = body
        .message
        .or(body.msg)
        .or(body.error_description)
        .or(body.error)
        .unwrap_or_else(|| {
            if text.is_empty() {
                format!("HTTP {}", status)
            } else {
                text
            }
        });
    Err(ClientError::Backend {
        status,
        code,
        message,
    })
}

impl SupabaseBackend {
    pub fn new(config: AppConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .build()?;
        Ok(SupabaseBackend {
            http,
            config,
            session: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The user's access token, refreshed when close to expiry, or the anon key.
    pub async fn access_token(&self) -> String {
        let current = self.session.read().await.clone();
        match current {
            Some(session) if session.expires_within(Utc::now(), REFRESH_MARGIN_SECS) => {
                match self.refresh(&session.refresh_token).await {
                    Ok(fresh) => fresh.access_token,
                    Err(e) => {
                        warn!("Token refresh failed: {}", e);
                        session.access_token
                    }
                }
            }
            Some(session) => session.access_token,
            None => self.config.anon_key.clone(),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        let session = self
            .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await?;
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> Result<Session> {
        let resp = self
            .http
            .post(format!("{}/token", self.config.auth_url()))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.config.anon_key)
            .json(&body)
            .send()
            .await?;
        let token: TokenResponse = check(resp).await?.json().await?;
        Ok(token.into_session(Utc::now().timestamp()))
    }

    async fn rest(&self, method: Method, path: &str) -> RequestBuilder {
        let token = self.access_token().await;
        self.http
            .request(method, format!("{}/{}", self.config.rest_url(), path))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(token)
    }

    async fn select<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<T>> {
        debug!("GET {} {:?}", query.table_name(), query.params());
        let resp = self
            .rest(Method::GET, query.table_name())
            .await
            .query(query.params())
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn select_one<T: DeserializeOwned>(&self, query: &Query) -> Result<Option<T>> {
        let resp = self
            .rest(Method::GET, query.table_name())
            .await
            .query(query.params())
            .header("Accept", "application/vnd.pgrst.object+json")
            .send()
            .await?;
        match check(resp).await {
            Ok(resp) => Ok(Some(resp.json().await?)),
            Err(e) if e.is_no_row() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn insert<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &str,
        body: &B,
    ) -> Result<Vec<T>> {
        let resp = self
            .rest(Method::POST, table)
            .await
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn update<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        query: &Query,
        body: &B,
    ) -> Result<Vec<T>> {
        let resp = self
            .rest(Method::PATCH, query.table_name())
            .await
            .query(query.params())
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn update_minimal<B: Serialize + ?Sized>(&self, query: &Query, body: &B) -> Result<()> {
        let resp = self
            .rest(Method::PATCH, query.table_name())
            .await
            .query(query.params())
            .header("Prefer", "return=minimal")
            .json(body)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        let resp = self
            .rest(Method::HEAD, query.table_name())
            .await
            .query(query.params())
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let resp = check(resp).await?;
        Ok(resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .unwrap_or(0))
    }

    async fn rpc_raw(&self, name: &str, args: Value) -> Result<Response> {
        debug!("RPC {}", name);
        let resp = self
            .rest(Method::POST, &format!("rpc/{}", name))
            .await
            .json(&args)
            .send()
            .await?;
        check(resp).await
    }
}

#[async_trait]
impl Backend for SupabaseBackend {
    async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<Option<Session>> {
        let resp = self
            .http
            .post(format!("{}/signup", self.config.auth_url()))
            .header("apikey", &self.config.anon_key)
            .json(&json!({
                "email": email,
                "password": password,
                "data": { "username": username },
            }))
            .send()
            .await?;
        let body: Value = check(resp).await?.json().await?;
        if body.get("access_token").is_none() {
            // E-mail confirmation is on; no session until the user signs in.
            return Ok(None);
        }
        let token: TokenResponse = serde_json::from_value(body)?;
        let session = token.into_session(Utc::now().timestamp());
        *self.session.write().await = Some(session.clone());
        Ok(Some(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let session = self
            .token_grant("password", json!({ "email": email, "password": password }))
            .await?;
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    async fn restore(&self, refresh_token: &str) -> Result<Session> {
        self.refresh(refresh_token).await
    }

    async fn sign_out(&self) -> Result<()> {
        let session = self.session.write().await.take();
        if let Some(session) = session {
            let resp = self
                .http
                .post(format!("{}/logout", self.config.auth_url()))
                .header("apikey", &self.config.anon_key)
                .bearer_auth(&session.access_token)
                .send()
                .await?;
            check(resp).await?;
        }
        Ok(())
    }

    async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    async fn fetch_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        self.select_one(&Query::table("profiles").select("*").eq("id", id))
            .await
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<Profile> {
        let rows: Vec<Profile> = self.insert("profiles", profile).await?;
        rows.into_iter().next().ok_or(ClientError::NoRowsUpdated)
    }

    async fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> Result<()> {
        self.update_minimal(&Query::table("profiles").eq("id", id), patch)
            .await
    }

    async fn public_profiles(&self) -> Result<Vec<PublicProfile>> {
        Ok(self.rpc_raw("get_public_profiles", json!({})).await?.json().await?)
    }

    async fn verify_passcode(&self, passcode: &str) -> Result<bool> {
        let verdict: Value = self
            .rpc_raw("verify_passcode", json!({ "passcode": passcode }))
            .await?
            .json()
            .await?;
        Ok(verdict == Value::Bool(true))
    }

    async fn set_passcode(&self, passcode: &str) -> Result<()> {
        self.rpc_raw("set_passcode", json!({ "passcode": passcode }))
            .await?;
        Ok(())
    }

    async fn conversation(&self, me: Uuid, peer: Uuid, limit: usize) -> Result<Vec<Message>> {
        self.select(
            &Query::table("messages")
                .select("*")
                .or(&pair_filter(me, peer))
                .order("created_at", true)
                .limit(limit),
        )
        .await
    }

    async fn outgoing_to(&self, me: Uuid, peers: &[Uuid]) -> Result<Vec<Message>> {
        self.select(
            &Query::table("messages")
                .select("*")
                .eq("sender_id", me)
                .in_list("receiver_id", peers)
                .order("created_at", false),
        )
        .await
    }

    async fn incoming_from(&self, me: Uuid, peers: &[Uuid]) -> Result<Vec<Message>> {
        self.select(
            &Query::table("messages")
                .select("*")
                .eq("receiver_id", me)
                .in_list("sender_id", peers)
                .order("created_at", false),
        )
        .await
    }

    async fn unseen_senders(&self, me: Uuid, peers: &[Uuid]) -> Result<Vec<Uuid>> {
        let rows: Vec<SenderRow> = self
            .select(
                &Query::table("messages")
                    .select("sender_id")
                    .eq("receiver_id", me)
                    .in_list("sender_id", peers)
                    .is_null("seen_at"),
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.sender_id).collect())
    }

    async fn unread_count(&self, me: Uuid, peer: Uuid) -> Result<u64> {
        self.count(
            &Query::table("messages")
                .select("id")
                .eq("receiver_id", me)
                .eq("sender_id", peer)
                .is_null("seen_at"),
        )
        .await
    }

    async fn fetch_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.select_one(&Query::table("messages").select("*").eq("id", id))
            .await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Vec<Message>> {
        self.insert("messages", message).await
    }

    async fn update_own_message(
        &self,
        id: Uuid,
        sender: Uuid,
        patch: &MessagePatch,
    ) -> Result<Vec<Message>> {
        self.update(
            &Query::table("messages")
                .eq("id", id)
                .eq("sender_id", sender)
                .select("*"),
            patch,
        )
        .await
    }

    async fn patch_message(&self, id: Uuid, patch: &MessagePatch) -> Result<()> {
        self.update_minimal(&Query::table("messages").eq("id", id), patch)
            .await
    }

    async fn bulk_mark_delivered(&self, me: Uuid, peer: Uuid) -> Result<()> {
        let patch = MessagePatch {
            delivered_at: Some(Utc::now()),
            ..Default::default()
        };
        self.update_minimal(
            &Query::table("messages")
                .eq("receiver_id", me)
                .eq("sender_id", peer)
                .is_null("delivered_at"),
            &patch,
        )
        .await
    }

    async fn bulk_mark_seen(&self, me: Uuid, peer: Uuid) -> Result<()> {
        let patch = MessagePatch {
            seen_at: Some(Utc::now()),
            ..Default::default()
        };
        self.update_minimal(
            &Query::table("messages")
                .eq("receiver_id", me)
                .eq("sender_id", peer)
                .is_null("seen_at"),
            &patch,
        )
        .await
    }

    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        debug!("Uploading {} bytes to {}/{}", bytes.len(), bucket, path);
        let token = self.access_token().await;
        let resp = self
            .http
            .post(format!(
                "{}/object/{}/{}",
                self.config.storage_url(),
                bucket,
                path
            ))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(token)
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        storage::public_url(&self.config.storage_url(), bucket, path)
    }

    async fn recent_stories(&self, limit: usize) -> Result<Vec<Story>> {
        self.select(
            &Query::table("stories")
                .select("*")
                .order("created_at", false)
                .limit(limit),
        )
        .await
    }

    async fn viewed_story_ids(&self, viewer: Uuid, ids: &[Uuid]) -> Result<Vec<Uuid>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<StoryIdRow> = self
            .select(
                &Query::table("story_views")
                    .select("story_id")
                    .eq("viewer_id", viewer)
                    .in_list("story_id", ids),
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.story_id).collect())
    }

    async fn insert_story(&self, story: &NewStory) -> Result<()> {
        let resp = self
            .rest(Method::POST, "stories")
            .await
            .header("Prefer", "return=minimal")
            .json(story)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn record_story_view(&self, story: Uuid, viewer: Uuid) -> Result<()> {
        let query = Query::table("story_views").on_conflict("story_id,viewer_id");
        let resp = self
            .rest(Method::POST, query.table_name())
            .await
            .query(query.params())
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&StoryView {
                story_id: story,
                viewer_id: viewer,
            })
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}
