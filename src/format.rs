//! Display helpers shared by the views.

use chrono::{DateTime, Local, Utc};

/// `12s ago`, `5m ago`, `3h ago`, `2d ago`.
pub fn time_ago(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - ts).num_seconds().max(0);
    if secs < 60 {
        format!("{}s ago", secs)
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86_400)
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut i = 0;
    let mut scaled = bytes as f64;
    while scaled >= 1024.0 && i < UNITS.len() - 1 {
        scaled /= 1024.0;
        i += 1;
    }
    if i == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", scaled, UNITS[i])
    }
}

/// Up to two initials from the first two words, uppercased.
pub fn initials(name: &str) -> String {
    let letters: String = name
        .split_whitespace()
        .take(2)
        .filter_map(|w| w.chars().next())
        .flat_map(char::to_uppercase)
        .collect();
    if letters.is_empty() {
        name.chars()
            .next()
            .map(|c| c.to_uppercase().collect())
            .unwrap_or("U".to_string())
    } else {
        letters
    }
}

/// Stable hue in `0..360` for an avatar background.
pub fn hue_from_name(name: &str) -> u32 {
    let h = name
        .encode_utf16()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32));
    h % 360
}

/// HSL (s=60%, l=40%) to RGB, each channel in `0.0..=1.0`.
pub fn avatar_rgb(name: &str) -> (f32, f32, f32) {
    let h = hue_from_name(name) as f32 / 60.0;
    let (s, l) = (0.6f32, 0.4f32);
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    (r + m, g + m, b + m)
}

pub fn message_time(ts: DateTime<Utc>, edited: bool) -> String {
    let local: DateTime<Local> = ts.with_timezone(&Local);
    let base = local.format("%H:%M").to_string();
    if edited {
        format!("{} (edited)", base)
    } else {
        base
    }
}
