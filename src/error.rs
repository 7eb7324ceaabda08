//! Centralized error types for proxsave-notify using thiserror.
//!
//! Configuration problems surface as [`ConfigError`] when the dispatcher is
//! built. Everything that can go wrong while delivering a notification is a
//! [`NotifyError`], which channels carry inside their delivery result instead
//! of propagating it.

use thiserror::Error;

/// Errors related to configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load config file: {0}")]
    LoadError(String),
    #[error("invalid configuration: {0}")]
    ValidationError(String),
    #[error("invalid notifier '{name}': {message}")]
    InvalidNotifier { name: String, message: String },
}

/// Errors raised while delivering a notification.
///
/// Variants map one-to-one onto the kinds a caller may want to react to
/// differently (retry later, fix config, contact the relay operator...).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Invalid enum value, missing required field, empty credential.
    #[error("configuration error: {0}")]
    Config(String),
    /// No usable recipient could be determined.
    #[error("recipient resolution failed: {0}")]
    Resolution(String),
    /// Network failure, subprocess failure, DNS.
    #[error("transport error: {0}")]
    Transport(String),
    /// Terminal HTTP status from a peer.
    #[error("HTTP {status}: {detail}")]
    Protocol { status: u16, detail: String },
    /// 429 that stayed rate limited after all retries.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// 429 whose detail names a capped budget. Never retried.
    #[error("rate limit exceeded: {0}")]
    Quota(String),
    /// Malformed payload from a peer.
    #[error("invalid response format: {0}")]
    Format(String),
    /// Mail queue or mail log evidence of a failed delivery.
    #[error("delivery verification failed: {0}")]
    Verification(String),
    #[error("timed out after {0} ms")]
    Timeout(u128),
    #[error("cancelled")]
    Cancelled,
}

impl NotifyError {
    /// Short kind tag, used as a metrics label and in result metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            NotifyError::Config(_) => "configuration",
            NotifyError::Resolution(_) => "resolution",
            NotifyError::Transport(_) => "transport",
            NotifyError::Protocol { .. } => "protocol",
            NotifyError::RateLimited(_) => "rate-limit",
            NotifyError::Quota(_) => "quota",
            NotifyError::Format(_) => "format",
            NotifyError::Verification(_) => "verification",
            NotifyError::Timeout(_) => "timeout",
            NotifyError::Cancelled => "cancelled",
        }
    }
}

/// Errors related to report rendering.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template '{name}' not found")]
    NotFound { name: String },
    #[error("template render failed: {message}")]
    RenderFailed { message: String },
}

impl From<TemplateError> for NotifyError {
    fn from(err: TemplateError) -> Self {
        NotifyError::Format(err.to_string())
    }
}

/// Failure modes of the centralized Telegram credential handshake.
///
/// The server answers with a small set of status codes that each call for a
/// different action from the operator, so they are kept distinct.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("bot has not been started yet: open the bot in Telegram and press Start")]
    BotNotStarted,
    #[error("server id is not registered with the bot")]
    NotRegistered,
    #[error("server id rejected as invalid")]
    InvalidServerId,
    #[error("unexpected handshake response {status}: {body}")]
    Unexpected { status: u16, body: String },
    #[error("handshake request failed: {0}")]
    Transport(String),
    #[error("handshake timed out after {0} ms")]
    Timeout(u128),
    #[error("handshake response is not valid JSON: {0}")]
    Format(String),
    #[error("handshake returned invalid credentials: {0}")]
    InvalidCredentials(String),
}

impl From<HandshakeError> for NotifyError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::BotNotStarted => NotifyError::Protocol {
                status: 403,
                detail: err.to_string(),
            },
            HandshakeError::NotRegistered => NotifyError::Protocol {
                status: 409,
                detail: err.to_string(),
            },
            HandshakeError::InvalidServerId => NotifyError::Protocol {
                status: 422,
                detail: err.to_string(),
            },
            HandshakeError::Unexpected { status, ref body } => NotifyError::Protocol {
                status,
                detail: body.clone(),
            },
            HandshakeError::Transport(msg) => NotifyError::Transport(msg),
            HandshakeError::Timeout(ms) => NotifyError::Timeout(ms),
            HandshakeError::Format(msg) => NotifyError::Format(msg),
            HandshakeError::InvalidCredentials(msg) => NotifyError::Config(msg),
        }
    }
}
