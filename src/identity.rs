//! Email identity keys.
//!
//! Every lookup keyed by email (threads, profiles, preferences) goes through
//! [`normalize`], so `Test@Example.COM` and `test@example.com` share one
//! namespace.

use std::sync::LazyLock;

use regex::Regex;

static EMAIL_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+$").expect("static regex"));

/// Canonical lookup key for an email: trimmed and lower-cased.
pub fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic shape check used to reject malformed start requests.
///
/// Requires exactly one `@` with something on both sides and no whitespace
/// after trimming. Deliverability is not checked.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_SHAPE.is_match(email.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_and_trims() {
        assert_eq!(normalize("  Test@Example.COM "), "test@example.com");
    }

    #[test]
    fn normalize_is_idempotent() {
        for email in ["Test@Example.COM", " a-b@c.io\n", "", "ÅSA@Example.se"] {
            let once = normalize(email);
            assert_eq!(normalize(&once), once, "not idempotent for {email:?}");
        }
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("test@example.com"));
        assert!(is_valid_email(" test-user@example.com "));
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("two@@example.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@"));
        assert!(!is_valid_email("us er@example.com"));
    }
}
