use uuid::Uuid;

pub const IMAGE_BUCKET: &str = "chat-images";
pub const STORIES_BUCKET: &str = "stories";
pub const AVATARS_BUCKET: &str = "avatars";

pub fn public_url(storage_url: &str, bucket: &str, path: &str) -> String {
    format!("{}/object/public/{}/{}", storage_url, bucket, path)
}

/// Older story rows were saved without the `/public/` segment.
pub fn normalize_story_url(url: &str) -> String {
    url.replace(
        "/storage/v1/object/stories/",
        "/storage/v1/object/public/stories/",
    )
}

fn sanitize(name: &str, keep_slash: bool) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') || (keep_slash && c == '/') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `<owner>/<millis>-<name>` for chat images; the whole path is sanitized.
pub fn chat_image_path(owner: Uuid, millis: i64, file_name: &str) -> String {
    sanitize(&format!("{}/{}-{}", owner, millis, file_name), true)
}

/// `<owner>/<millis>-<name>`; only the file name is sanitized.
pub fn story_path(owner: Uuid, millis: i64, file_name: &str) -> String {
    let name = if file_name.is_empty() { "story" } else { file_name };
    format!("{}/{}-{}", owner, millis, sanitize(name, false))
}

/// `<owner>/<millis>.<ext>` with the lowercased extension, `jpg` when absent.
pub fn avatar_path(owner: Uuid, millis: i64, file_name: &str) -> String {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or("jpg".to_string());
    format!("{}/{}.{}", owner, millis, sanitize(&ext, false))
}
