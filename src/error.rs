use thiserror::Error;

use crate::format::format_bytes;
use crate::models::LocalFile;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{message}")]
    Backend {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("{0}")]
    Validation(String),

    #[error("Please sign in first.")]
    NotSignedIn,

    #[error("Choose a user first.")]
    NoChatSelected,

    #[error("No rows updated (permissions?)")]
    NoRowsUpdated,

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Local store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Could not read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Realtime error: {0}")]
    Realtime(String),
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        ClientError::Validation(message.into())
    }

    /// Failed locally, before any request was made.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ClientError::Validation(_) | ClientError::NotSignedIn | ClientError::NoChatSelected
        )
    }

    /// PostgREST reports "no row" for single-object reads as `PGRST116`.
    pub fn is_no_row(&self) -> bool {
        matches!(self, ClientError::Backend { code: Some(code), .. } if code == "PGRST116")
    }

    /// Short heading for the toast that shows this error.
    pub fn title(&self) -> &'static str {
        if self.is_validation() {
            "Check your input"
        } else {
            "Request failed"
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Size rejection that names the limit and the chosen file's size.
pub fn too_large(limit: &str, file: &LocalFile) -> ClientError {
    ClientError::validation(format!("{}, this file is {}", limit, format_bytes(file.size() as u64)))
}
