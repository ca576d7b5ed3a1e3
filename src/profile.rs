use crate::error::{too_large, ClientError, Result};
use crate::models::LocalFile;

pub const MAX_AVATAR_BYTES: usize = 3 * 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub enum AvatarChange {
    #[default]
    Keep,
    Replace(LocalFile),
    Remove,
}

/// Trimmed username, 2 to 24 characters.
pub fn validate_username(name: &str) -> Result<String> {
    let name = name.trim();
    let len = name.chars().count();
    if !(2..=24).contains(&len) {
        return Err(ClientError::validation("Username must be 2–24 characters."));
    }
    Ok(name.to_string())
}

pub fn validate_avatar(file: &LocalFile) -> Result<()> {
    if !file.mime.starts_with("image/") {
        return Err(ClientError::validation("Please choose an image."));
    }
    if file.size() > MAX_AVATAR_BYTES {
        return Err(too_large("Max 3 MB", file));
    }
    Ok(())
}
