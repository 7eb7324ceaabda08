//! Core configuration types and loading.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::env::has_env_reference;
use super::notifiers::{
    AUTH_TYPES, CloudRelayConfig, EmailConfig, EmailMethod, GotifyConfig, TelegramConfig,
    TelegramMode, WebhooksConfig,
};
use super::validation::{
    is_valid_bot_token, is_valid_chat_id, validate_http_method, validate_http_url,
};
use crate::error::ConfigError;

/// Default path for the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/proxsave/notify.yaml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dispatch: DispatchConfig,
    pub email: EmailConfig,
    pub cloud_relay: CloudRelayConfig,
    pub telegram: TelegramConfig,
    pub gotify: GotifyConfig,
    pub webhooks: WebhooksConfig,
}

/// Dispatcher settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Deadline of a single channel; a slow channel never blocks its siblings.
    #[serde(with = "humantime_serde")]
    pub channel_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            channel_timeout: Duration::from_secs(120),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully parsed configuration
    /// * `Err(ConfigError::LoadError)` - File could not be read
    /// * `Err(ConfigError::ValidationError)` - YAML parsing failed
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Validate the configuration, collecting every problem.
    ///
    /// Only enabled channels are checked. Values that still reference
    /// `${VAR}` are checked for presence only; their content is validated
    /// when the channel is built.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if self.dispatch.channel_timeout.is_zero() {
            errors.push(invalid("dispatch", "channel_timeout must be greater than zero"));
        }

        if self.email.enabled {
            self.validate_email(&mut errors);
        }
        if self.telegram.enabled {
            self.validate_telegram(&mut errors);
        }
        if self.gotify.enabled {
            self.validate_gotify(&mut errors);
        }
        if self.webhooks.enabled {
            self.validate_webhooks(&mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_email(&self, errors: &mut Vec<ConfigError>) {
        let email = &self.email;
        let method = match email.method() {
            Ok(method) => method,
            Err(e) => {
                errors.push(invalid("email", e));
                return;
            }
        };

        if method == EmailMethod::Relay {
            let relay = &self.cloud_relay;
            if relay.worker_url.trim().is_empty() {
                errors.push(invalid("cloud_relay", "worker_url is required for the relay method"));
            } else if !has_env_reference(&relay.worker_url)
                && let Err(e) = validate_http_url(&relay.worker_url)
            {
                errors.push(invalid("cloud_relay", format!("worker_url: {}", e)));
            }
            if relay.worker_token.is_blank() {
                errors.push(invalid("cloud_relay", "worker_token is required for the relay method"));
            }
            if relay.hmac_secret.is_blank() {
                errors.push(invalid("cloud_relay", "hmac_secret is required for the relay method"));
            }
        }

        let needs_forwarder =
            method == EmailMethod::Pmf || (method == EmailMethod::Relay && email.fallback_to_forwarder);
        if needs_forwarder && email.forwarder_candidates.iter().all(|c| c.trim().is_empty()) {
            errors.push(invalid("email", "forwarder_candidates must not be empty"));
        }
        if method == EmailMethod::Sendmail && email.sendmail_path.trim().is_empty() {
            errors.push(invalid("email", "sendmail_path must not be empty"));
        }
    }

    fn validate_telegram(&self, errors: &mut Vec<ConfigError>) {
        let telegram = &self.telegram;
        match telegram.mode() {
            Ok(TelegramMode::Personal) => {
                let token = telegram.bot_token.expose();
                if token.trim().is_empty() {
                    errors.push(invalid("telegram", "bot_token is required in personal mode"));
                } else if !has_env_reference(token) && !is_valid_bot_token(token) {
                    errors.push(invalid("telegram", "bot_token has an invalid format"));
                }
                let chat_id = &telegram.chat_id;
                if chat_id.trim().is_empty() {
                    errors.push(invalid("telegram", "chat_id is required in personal mode"));
                } else if !has_env_reference(chat_id) && !is_valid_chat_id(chat_id) {
                    errors.push(invalid(
                        "telegram",
                        format!("chat_id '{}' is not a numeric chat id", chat_id),
                    ));
                }
            }
            Ok(TelegramMode::Centralized) => {
                if telegram.server_api_host.trim().is_empty() {
                    errors.push(invalid(
                        "telegram",
                        "server_api_host is required in centralized mode",
                    ));
                }
                if telegram.server_id.trim().is_empty() {
                    errors.push(invalid("telegram", "server_id is required in centralized mode"));
                }
            }
            Err(e) => errors.push(invalid("telegram", e)),
        }
    }

    fn validate_gotify(&self, errors: &mut Vec<ConfigError>) {
        if self.gotify.server_url.trim().is_empty() {
            errors.push(invalid("gotify", "server_url is required"));
        } else if !has_env_reference(&self.gotify.server_url)
            && let Err(e) = validate_http_url(&self.gotify.server_url)
        {
            errors.push(invalid("gotify", format!("server_url: {}", e)));
        }
        if self.gotify.token.is_blank() {
            errors.push(invalid("gotify", "token is required"));
        }
    }

    fn validate_webhooks(&self, errors: &mut Vec<ConfigError>) {
        if self.webhooks.endpoints.is_empty() {
            errors.push(invalid("webhooks", "at least one endpoint is required"));
            return;
        }

        let mut seen = HashSet::new();
        for (index, endpoint) in self.webhooks.endpoints.iter().enumerate() {
            let label = if endpoint.name.trim().is_empty() {
                format!("webhooks.endpoints[{}]", index)
            } else {
                format!("webhook:{}", endpoint.name)
            };

            if endpoint.name.trim().is_empty() {
                errors.push(invalid(&label, "name is required"));
            } else if !seen.insert(endpoint.name.as_str()) {
                errors.push(invalid(&label, "duplicate endpoint name"));
            }
            if endpoint.url.trim().is_empty() {
                errors.push(invalid(&label, "url is required"));
            }
            if let Err(e) = validate_http_method(&endpoint.method) {
                errors.push(invalid(&label, e));
            }
            let auth = endpoint.auth.kind.trim().to_ascii_lowercase();
            if !AUTH_TYPES.contains(&auth.as_str()) {
                errors.push(invalid(
                    &label,
                    format!(
                        "unknown auth type '{}': expected one of {}",
                        endpoint.auth.kind,
                        AUTH_TYPES.join(", ")
                    ),
                ));
            }
        }
    }

    /// Names of the enabled channels, in dispatch order.
    pub fn enabled_channels(&self) -> Vec<&'static str> {
        let mut channels = Vec::new();
        if self.email.enabled {
            channels.push("email");
        }
        if self.telegram.enabled {
            channels.push("telegram");
        }
        if self.gotify.enabled {
            channels.push("gotify");
        }
        if self.webhooks.enabled {
            channels.push("webhook");
        }
        channels
    }
}

fn invalid(name: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidNotifier {
        name: name.to_string(),
        message: message.into(),
    }
}
