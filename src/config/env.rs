//! Environment variable substitution.

use std::sync::LazyLock;

use regex::Regex;

use super::secret::SecretString;
use crate::error::ConfigError;

static ENV_VAR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// True if the value still contains a `${VAR}` reference.
pub fn has_env_reference(value: &str) -> bool {
    ENV_VAR_REGEX.is_match(value)
}

/// Resolves `${VAR_NAME}` patterns in a string.
///
/// All undefined variables are reported together.
pub fn resolve_env_vars(value: &str) -> Result<String, ConfigError> {
    let mut result = value.to_string();
    let mut errors = Vec::new();

    for cap in ENV_VAR_REGEX.captures_iter(value) {
        let full_match = &cap[0];
        let var_name = &cap[1];

        match std::env::var(var_name) {
            Ok(var_value) => {
                result = result.replace(full_match, &var_value);
            }
            Err(_) => {
                errors.push(var_name.to_string());
            }
        }
    }

    if errors.is_empty() {
        Ok(result)
    } else {
        Err(ConfigError::ValidationError(format!(
            "undefined environment variable{}: {}",
            if errors.len() > 1 { "s" } else { "" },
            errors.join(", ")
        )))
    }
}

/// Same as [`resolve_env_vars`] for a secret, keeping the result wrapped.
pub fn resolve_secret(secret: &SecretString) -> Result<SecretString, ConfigError> {
    resolve_env_vars(secret.expose()).map(SecretString::new)
}
