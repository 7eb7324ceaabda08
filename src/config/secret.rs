//! Secret string wrapper that never appears in logs.

use serde::Deserialize;

/// Wrapper for secrets that never appears in logs.
///
/// Relay tokens, HMAC secrets and bot tokens are held in this type. The
/// `Debug` and `Display` implementations always show `[REDACTED]` instead of
/// the actual value.
///
/// # Example
///
/// ```
/// use proxsave_notify::config::SecretString;
///
/// let secret = SecretString::new("relay-token".to_string());
/// assert_eq!(format!("{:?}", secret), "[REDACTED]");
/// assert_eq!(secret.expose(), "relay-token");
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: String) -> Self {
        SecretString(s)
    }

    /// Exposes the underlying secret value.
    ///
    /// Never pass the result to logging functions.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// True when the secret is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        Ok(SecretString::new(s.unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_string_redacts_in_debug_and_display() {
        let secret = SecretString::new("super-secret-token".to_string());

        let debug_output = format!("{:?}", secret);
        assert!(!debug_output.contains("super-secret-token"));
        assert!(debug_output.contains("[REDACTED]"));

        let display_output = format!("{}", secret);
        assert!(!display_output.contains("super-secret-token"));
        assert!(display_output.contains("[REDACTED]"));

        assert_eq!(secret.expose(), "super-secret-token");
    }

    #[test]
    fn security_audit_no_secrets_leaked_in_any_format() {
        let bot_token = SecretString::new(
            "123456:ABCdefGHIjklMNOpqrSTUvwxYZ0123456789ab".to_string(),
        );
        let hmac = SecretString::new("relay-hmac-5f2a9c".to_string());

        let representations = vec![
            format!("{:?}", bot_token),
            format!("{}", bot_token),
            format!("{:?}", hmac),
            format!("{}", hmac),
            format!("{:?}", Some(&bot_token)),
            format!("{:?}", vec![&hmac]),
        ];

        let forbidden_patterns = ["123456", "ABCdef", "relay-hmac", "5f2a9c"];

        for repr in &representations {
            for pattern in &forbidden_patterns {
                assert!(
                    !repr.contains(pattern),
                    "SECURITY VIOLATION: Found '{}' in output: {}",
                    pattern,
                    repr
                );
            }
        }
    }

    #[test]
    fn null_deserializes_as_empty() {
        let secret: SecretString = serde_yaml::from_str("~").unwrap();
        assert!(secret.is_blank());
        let secret: SecretString = serde_yaml::from_str("\"  \"").unwrap();
        assert!(secret.is_blank());
    }
}
