//! Small text and path helpers.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum length of a chat message.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Characters a truncated prompt may be cut at.
const WORD_BREAKS: &[char] = &[' ', '.', ',', ':', ';', '-'];

/// Truncate `text` to at most `max` bytes, cutting at the last word break.
///
/// Text without any break inside the limit is cut to an empty string.
#[must_use]
pub fn truncate_text(text: &str, max: usize) -> String {
    if text.len() < max {
        return text.to_string();
    }
    let head = truncate_str(text, max);
    head.rfind(WORD_BREAKS)
        .map_or_else(String::new, |pos| head[..pos].to_string())
}

/// Cut `text` to at most `max` bytes on a char boundary.
#[must_use]
pub fn truncate_str(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Make `@` mentions inert and cap the length to one chat message.
#[must_use]
pub fn sanitize_reply(text: &str) -> String {
    let escaped = text.replace('@', "@\u{200b}");
    truncate_str(&escaped, MAX_MESSAGE_LEN).to_string()
}

/// `"None"` for empty strings.
#[must_use]
pub fn string_or_none(s: &str) -> &str {
    if s.is_empty() { "None" } else { s }
}

/// Format a float the way `%g` would for the values the bot shows.
#[must_use]
pub fn format_float(value: f64) -> String {
    let s = format!("{value}");
    if s.contains('e') {
        format!("{value:e}")
    } else {
        s
    }
}

/// MIME type of an encoded image, guessed from its magic bytes.
#[must_use]
pub fn sniff_image_type(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn timestamp_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Nanoseconds since the Unix epoch.
#[must_use]
pub fn timestamp_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Get the home directory.
#[must_use]
pub fn home_dir() -> Option<PathBuf> {
    dirs_next::home_dir()
}

/// Get the easel config directory (`~/.easel`).
#[must_use]
pub fn config_dir() -> PathBuf {
    home_dir().map_or_else(|| PathBuf::from(".easel"), |h| h.join(".easel"))
}

/// Default config file path (`~/.easel/config.json`).
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_at_word_break() {
        assert_eq!(truncate_text("short", 512), "short");
        assert_eq!(truncate_text("hello world foo", 13), "hello world");
        assert_eq!(truncate_text("a,b,c", 4), "a,b");
        assert_eq!(truncate_text("nobreaks", 4), "");
    }

    #[test]
    fn test_truncate_text_long_prompt() {
        let prompt = "word ".repeat(200);
        let cut = truncate_text(&prompt, 512);
        assert!(cut.len() < 512);
        assert!(cut.ends_with("word"));
    }

    #[test]
    fn test_truncate_str_respects_char_boundary() {
        assert_eq!(truncate_str("héllo", 2), "h");
        assert_eq!(truncate_str("abc", 10), "abc");
    }

    #[test]
    fn test_sanitize_reply() {
        assert_eq!(sanitize_reply("@everyone hi"), "@\u{200b}everyone hi");
        assert_eq!(sanitize_reply(&"x".repeat(3000)).len(), MAX_MESSAGE_LEN);
    }

    #[test]
    fn test_string_or_none() {
        assert_eq!(string_or_none(""), "None");
        assert_eq!(string_or_none("vae"), "vae");
    }

    #[test]
    fn test_sniff_image_type() {
        assert_eq!(sniff_image_type(b"\x89PNG\r\n\x1a\n"), "image/png");
        assert_eq!(sniff_image_type(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_image_type(b"GIF89a"), "image/gif");
        assert_eq!(sniff_image_type(b"RIFF\0\0\0\0WEBPVP8"), "image/webp");
        assert_eq!(sniff_image_type(b"hello"), "application/octet-stream");
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(12.0), "12");
        assert_eq!(format_float(0.8), "0.8");
        assert_eq!(format_float(7.5), "7.5");
    }
}
