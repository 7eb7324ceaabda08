//! Channel configurations (email, cloud relay, Telegram, Gotify, webhooks).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use super::secret::SecretString;

// ============================================================
// Email
// ============================================================

/// Primary email transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailMethod {
    Relay,
    Sendmail,
    /// proxmox-mail-forward
    Pmf,
}

impl EmailMethod {
    pub const NAMES: [&'static str; 3] = ["relay", "sendmail", "pmf"];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmailMethod::Relay => "relay",
            EmailMethod::Sendmail => "sendmail",
            EmailMethod::Pmf => "pmf",
        }
    }
}

impl FromStr for EmailMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relay" => Ok(EmailMethod::Relay),
            "sendmail" => Ok(EmailMethod::Sendmail),
            "pmf" => Ok(EmailMethod::Pmf),
            other => Err(format!(
                "unknown delivery_method '{}': expected one of {}",
                other,
                Self::NAMES.join(", ")
            )),
        }
    }
}

impl fmt::Display for EmailMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of the email channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    /// `relay`, `sendmail` or `pmf`.
    pub delivery_method: String,
    /// Retry through proxmox-mail-forward when the cloud relay fails.
    pub fallback_to_forwarder: bool,
    pub attach_log_file: bool,
    /// Empty means auto-detect the email of `root@pam`.
    pub recipient: String,
    pub from: String,
    pub subject_override: String,
    pub sendmail_path: String,
    pub mailq_path: String,
    pub forwarder_candidates: Vec<String>,
    pub mail_log_paths: Vec<String>,
    pub mta_config_paths: Vec<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delivery_method: "relay".to_string(),
            fallback_to_forwarder: true,
            attach_log_file: false,
            recipient: String::new(),
            from: "no-reply@proxsave.local".to_string(),
            subject_override: String::new(),
            sendmail_path: "/usr/sbin/sendmail".to_string(),
            mailq_path: "mailq".to_string(),
            forwarder_candidates: vec![
                "/usr/libexec/proxmox-mail-forward".to_string(),
                "/usr/bin/proxmox-mail-forward".to_string(),
            ],
            mail_log_paths: vec![
                "/var/log/mail.log".to_string(),
                "/var/log/maillog".to_string(),
                "/var/log/mail.err".to_string(),
            ],
            mta_config_paths: vec![
                "/etc/postfix/main.cf".to_string(),
                "/etc/mail/sendmail.cf".to_string(),
                "/etc/exim4/exim4.conf".to_string(),
            ],
        }
    }
}

impl EmailConfig {
    pub fn method(&self) -> Result<EmailMethod, String> {
        self.delivery_method.parse()
    }
}

/// Cloud relay endpoint and retry budget.
///
/// There is no built-in endpoint or secret: all three credentials must be
/// configured when the relay method is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudRelayConfig {
    /// Relay URL (supports `${ENV_VAR}` substitution).
    pub worker_url: String,
    pub worker_token: SecretString,
    pub hmac_secret: SecretString,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub rate_limit_delay: Duration,
}

impl Default for CloudRelayConfig {
    fn default() -> Self {
        Self {
            worker_url: String::new(),
            worker_token: SecretString::default(),
            hmac_secret: SecretString::default(),
            timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_delay: Duration::from_secs(2),
            rate_limit_delay: Duration::from_secs(5),
        }
    }
}

// ============================================================
// Telegram
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelegramMode {
    /// Bot token and chat id come from the configuration.
    Personal,
    /// Credentials are fetched from the bot server by server id.
    Centralized,
}

impl TelegramMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelegramMode::Personal => "personal",
            TelegramMode::Centralized => "centralized",
        }
    }
}

impl FromStr for TelegramMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "personal" => Ok(TelegramMode::Personal),
            "centralized" => Ok(TelegramMode::Centralized),
            other => Err(format!(
                "unknown telegram mode '{}': expected personal or centralized",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub mode: String,
    pub bot_token: SecretString,
    pub chat_id: String,
    pub server_api_host: String,
    pub server_id: String,
    /// Bot API base URL, overridable for tests and self-hosted API servers.
    pub api_base: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: "personal".to_string(),
            bot_token: SecretString::default(),
            chat_id: String::new(),
            server_api_host: String::new(),
            server_id: String::new(),
            api_base: "https://api.telegram.org".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl TelegramConfig {
    pub fn mode(&self) -> Result<TelegramMode, String> {
        self.mode.parse()
    }
}

// ============================================================
// Gotify
// ============================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GotifyConfig {
    pub enabled: bool,
    pub server_url: String,
    pub token: SecretString,
    pub priority_success: i64,
    pub priority_warning: i64,
    pub priority_failure: i64,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for GotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: String::new(),
            token: SecretString::default(),
            priority_success: 2,
            priority_warning: 5,
            priority_failure: 8,
            timeout: Duration::from_secs(15),
        }
    }
}

// ============================================================
// Webhooks
// ============================================================

/// Payload shape of a webhook endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookFormat {
    Discord,
    Slack,
    Teams,
    Generic,
}

impl WebhookFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookFormat::Discord => "discord",
            WebhookFormat::Slack => "slack",
            WebhookFormat::Teams => "teams",
            WebhookFormat::Generic => "generic",
        }
    }
}

impl FromStr for WebhookFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discord" => Ok(WebhookFormat::Discord),
            "slack" => Ok(WebhookFormat::Slack),
            "teams" => Ok(WebhookFormat::Teams),
            "generic" => Ok(WebhookFormat::Generic),
            other => Err(format!("unknown webhook format '{}'", other)),
        }
    }
}

/// Authentication scheme names accepted in `auth.type`.
pub const AUTH_TYPES: [&str; 4] = ["none", "bearer", "basic", "hmac"];

/// Per-endpoint authentication.
///
/// Which fields are required depends on `type`; an empty required field is
/// reported when the endpoint is used.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct WebhookAuthConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub token: SecretString,
    pub user: String,
    pub pass: SecretString,
    pub secret: SecretString,
}

impl Default for WebhookAuthConfig {
    fn default() -> Self {
        Self {
            kind: "none".to_string(),
            token: SecretString::default(),
            user: String::new(),
            pass: SecretString::default(),
            secret: SecretString::default(),
        }
    }
}

impl fmt::Debug for WebhookAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookAuthConfig")
            .field("type", &self.kind)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEndpointConfig {
    pub name: String,
    /// Target URL (supports `${ENV_VAR}` substitution).
    pub url: String,
    #[serde(default = "default_post")]
    pub method: String,
    /// Empty means `webhooks.default_format`.
    #[serde(default)]
    pub format: String,
    /// Extra headers; values support `${ENV_VAR}` substitution.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub auth: WebhookAuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhooksConfig {
    pub enabled: bool,
    pub default_format: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub rate_limit_delay: Duration,
    pub endpoints: Vec<WebhookEndpointConfig>,
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_format: "generic".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            rate_limit_delay: Duration::from_secs(10),
            endpoints: Vec::new(),
        }
    }
}

fn default_post() -> String {
    "POST".to_string()
}
