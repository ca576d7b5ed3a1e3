use std::path::Path;

use crate::error::{ClientError, Result};
use crate::models::LocalFile;

/// Accepts Windows separators and the quotes some shells add on drag-and-drop.
pub fn normalize_path(path: &str) -> String {
    path.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .replace("\\\\", "/")
        .replace('\\', "/")
}

pub fn mime_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "heic" => "image/heic",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

pub async fn read_local_file(path: &str) -> Result<LocalFile> {
    let path = normalize_path(path);
    if path.is_empty() {
        return Err(ClientError::validation("Please choose a file."));
    }
    let bytes = tokio::fs::read(&path).await?;
    let name = Path::new(&path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("file")
        .to_string();
    Ok(LocalFile {
        mime: mime_for(&name).to_string(),
        name,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(r#" "C:\\Users\\me\\cat.png" "#), "C:/Users/me/cat.png");
        assert_eq!(normalize_path("/tmp/a.png"), "/tmp/a.png");
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("a.PNG"), "image/png");
        assert_eq!(mime_for("clip.mov"), "video/quicktime");
        assert_eq!(mime_for("notes"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_read_local_file() {
        let path = std::env::temp_dir().join(format!("calcchat-{}.gif", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, b"GIF89a").await.unwrap();
        let file = read_local_file(path.to_str().unwrap()).await.unwrap();
        assert_eq!(file.mime, "image/gif");
        assert_eq!(file.size(), 6);
        tokio::fs::remove_file(&path).await.unwrap();

        assert!(read_local_file("  ").await.unwrap_err().is_validation());
        assert!(read_local_file("/definitely/missing.png").await.is_err());
    }
}
