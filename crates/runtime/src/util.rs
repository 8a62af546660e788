//! Small text helpers shared across the runtime.

/// Truncate a string to at most `max_chars` characters, respecting character
/// boundaries. Returns the input unchanged when it already fits.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

/// Truncate to a byte-bounded prefix on a character boundary. Used for log
/// previews where the limit is a byte budget rather than a display width.
pub fn truncate_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
