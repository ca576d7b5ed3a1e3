use std::env;

use anyhow::{anyhow, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub anon_key: String,
    pub tenor_api_key: Option<String>,
    pub db_path: String,
    pub http_timeout_ms: u64,
}

impl AppConfig {
    /// Reads settings from the environment; call `dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self> {
        let supabase_url = env::var("SUPABASE_URL")
            .map_err(|_| anyhow!("Missing SUPABASE_URL"))?;
        let anon_key = env::var("SUPABASE_ANON_KEY")
            .map_err(|_| anyhow!("Missing SUPABASE_ANON_KEY"))?;
        let tenor_api_key = env::var("TENOR_API_KEY").ok().filter(|k| !k.trim().is_empty());
        let db_path = env::var("CALCCHAT_DB").unwrap_or("./calcchat.db".to_string());
        let http_timeout_ms = env::var("CALCCHAT_HTTP_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(15_000);

        Ok(AppConfig::new(supabase_url, anon_key)
            .with_tenor_key(tenor_api_key)
            .with_db_path(db_path)
            .with_timeout(http_timeout_ms))
    }

    pub fn new(supabase_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        AppConfig {
            supabase_url: supabase_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            tenor_api_key: None,
            db_path: "./calcchat.db".to_string(),
            http_timeout_ms: 15_000,
        }
    }

    pub fn with_tenor_key(mut self, key: Option<String>) -> Self {
        self.tenor_api_key = key;
        self
    }

    pub fn with_db_path(mut self, path: impl Into<String>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_timeout(mut self, ms: u64) -> Self {
        self.http_timeout_ms = ms;
        self
    }

    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.supabase_url)
    }

    pub fn auth_url(&self) -> String {
        format!("{}/auth/v1", self.supabase_url)
    }

    pub fn storage_url(&self) -> String {
        format!("{}/storage/v1", self.supabase_url)
    }

    pub fn realtime_url(&self) -> String {
        let ws_base = self
            .supabase_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            ws_base, self.anon_key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_urls() {
        let config = AppConfig::new("https://abc.supabase.co/", "anon");
        assert_eq!(config.rest_url(), "https://abc.supabase.co/rest/v1");
        assert_eq!(config.storage_url(), "https://abc.supabase.co/storage/v1");
        assert_eq!(
            config.realtime_url(),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
    }

    #[test]
    fn test_local_realtime_uses_plain_ws() {
        let config = AppConfig::new("http://127.0.0.1:54321", "k");
        assert!(config.realtime_url().starts_with("ws://127.0.0.1:54321/realtime"));
    }
}
