//! Utility functions for logging credentials and provider responses
//!
//! Provides safe string handling utilities that respect UTF-8 boundaries,
//! so provider error bodies can be clipped for logs without panicking, and
//! secrets can be shown in a recognizable but unusable form.

/// Longest provider body carried into logs
pub const MAX_LOGGED_BODY: usize = 512;

/// Safely truncate a string at a UTF-8 character boundary.
///
/// Returns a slice of at most `max_bytes` bytes, ensuring the result
/// is valid UTF-8 by finding the last valid character boundary.
///
/// # Example
/// ```
/// use digikey_oauth::utils::safe_truncate;
///
/// // "Ω" is 2 bytes - truncating at byte 4 would cut it in half
/// let text = "Ohm Ω";
/// assert_eq!(safe_truncate(text, 5), "Ohm ");
/// ```
#[inline]
#[must_use]
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut boundary = max_bytes;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }

    &s[..boundary]
}

/// Truncate a string for display with ellipsis.
///
/// # Example
/// ```
/// use digikey_oauth::utils::truncate_for_display;
///
/// let body = "invalid_client: client authentication failed";
/// assert_eq!(truncate_for_display(body, 14), "invalid_client...");
/// ```
#[must_use]
pub fn truncate_for_display(s: &str, max_bytes: usize) -> String {
    let truncated = safe_truncate(s, max_bytes);
    if truncated.len() < s.len() {
        format!("{truncated}...")
    } else {
        truncated.to_string()
    }
}

/// Show only the first four characters of a secret.
///
/// Short secrets are fully masked.
///
/// # Example
/// ```
/// use digikey_oauth::utils::redact;
///
/// assert_eq!(redact("Zk9xQ2abcdef"), "Zk9x…(12 chars)");
/// assert_eq!(redact("abc"), "***");
/// ```
#[must_use]
pub fn redact(secret: &str) -> String {
    let chars = secret.chars().count();
    if chars <= 8 {
        return "***".to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}…({chars} chars)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_truncate_ascii() {
        assert_eq!(safe_truncate("hello world", 5), "hello");
        assert_eq!(safe_truncate("hello", 10), "hello");
        assert_eq!(safe_truncate("", 5), "");
    }

    #[test]
    fn test_safe_truncate_multibyte() {
        // "µ" is 2 bytes
        let text = "10µF";
        assert_eq!(safe_truncate(text, 3), "10");
        assert_eq!(safe_truncate(text, 4), "10µ");
    }

    #[test]
    fn test_truncate_for_display() {
        assert_eq!(truncate_for_display("short", 10), "short");
        assert_eq!(truncate_for_display("a longer body", 8), "a longer...");
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact(""), "***");
        assert_eq!(redact("12345678"), "***");
        assert_eq!(redact("123456789"), "1234…(9 chars)");
    }
}
