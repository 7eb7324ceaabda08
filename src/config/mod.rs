//! Configuration loading and validation for proxsave-notify.
//!
//! This module handles loading the YAML configuration file, validation,
//! and resolving environment variables referenced by secrets.

mod env;
mod notifiers;
mod secret;
mod types;
mod validation;

pub use env::{has_env_reference, resolve_env_vars, resolve_secret};
pub use notifiers::{
    AUTH_TYPES, CloudRelayConfig, EmailConfig, EmailMethod, GotifyConfig, TelegramConfig,
    TelegramMode, WebhookAuthConfig, WebhookEndpointConfig, WebhookFormat, WebhooksConfig,
};
pub use secret::SecretString;
pub use types::{Config, DEFAULT_CONFIG_PATH, DispatchConfig};
pub use validation::{is_valid_bot_token, is_valid_chat_id, validate_http_url};
