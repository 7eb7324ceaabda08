//! Credential and URL validation utilities.

use std::sync::LazyLock;

use regex::Regex;

static BOT_TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+:[A-Za-z0-9_-]{35,}$").expect("valid regex"));

static CHAT_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?[0-9]+$").expect("valid regex"));

/// Telegram bot token: numeric bot id, colon, at least 35 token characters.
pub fn is_valid_bot_token(token: &str) -> bool {
    BOT_TOKEN_REGEX.is_match(token.trim())
}

/// Telegram chat id: optionally negative integer (groups are negative).
pub fn is_valid_chat_id(chat_id: &str) -> bool {
    CHAT_ID_REGEX.is_match(chat_id.trim())
}

/// Validates that a URL parses and uses http or https.
pub fn validate_http_url(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url.trim()).map_err(|e| format!("invalid URL: {}", e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!(
            "unsupported URL scheme '{}': only http and https are allowed",
            other
        )),
    }
}

/// Validates an HTTP method token (`POST`, `PUT`, `GET`...).
pub(crate) fn validate_http_method(method: &str) -> Result<(), String> {
    reqwest::Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
        .map(|_| ())
        .map_err(|_| format!("invalid HTTP method '{}'", method))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_token_formats() {
        assert!(is_valid_bot_token(
            "123456:ABCdefGHIjklMNOpqrSTUvwxYZ0123456789"
        ));
        assert!(is_valid_bot_token(
            "1:abcdefghijklmnopqrstuvwxyz_-ABCDEFGHIJ"
        ));
        // 34 token characters
        assert!(!is_valid_bot_token("123456:ABCdefGHIjklMNOpqrSTUvwxYZ01234567"));
        assert!(!is_valid_bot_token("abc:ABCdefGHIjklMNOpqrSTUvwxYZ0123456789"));
        assert!(!is_valid_bot_token(""));
    }

    #[test]
    fn chat_id_formats() {
        assert!(is_valid_chat_id("987654"));
        assert!(is_valid_chat_id("-1001234567890"));
        assert!(!is_valid_chat_id("@channel"));
        assert!(!is_valid_chat_id("12a"));
        assert!(!is_valid_chat_id(""));
    }

    #[test]
    fn http_url_schemes() {
        assert!(validate_http_url("https://relay.example.com/send").is_ok());
        assert!(validate_http_url("http://127.0.0.1:8080").is_ok());
        assert!(validate_http_url("ftp://files.example.com").is_err());
        assert!(validate_http_url("not a url").is_err());
    }

    #[test]
    fn http_methods() {
        assert!(validate_http_method("post").is_ok());
        assert!(validate_http_method("GET").is_ok());
        assert!(validate_http_method("BAD METHOD").is_err());
    }
}
