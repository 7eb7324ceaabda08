//! Delivery results and method tags.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::NotifyError;

/// How a notification actually left the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMethod {
    EmailRelay,
    EmailSendmail,
    EmailPmf,
    /// Forwarder used after the cloud relay failed.
    EmailPmfFallback,
    Telegram,
    Gotify,
    Webhook,
}

impl DeliveryMethod {
    pub const ALL: [DeliveryMethod; 7] = [
        DeliveryMethod::EmailRelay,
        DeliveryMethod::EmailSendmail,
        DeliveryMethod::EmailPmf,
        DeliveryMethod::EmailPmfFallback,
        DeliveryMethod::Telegram,
        DeliveryMethod::Gotify,
        DeliveryMethod::Webhook,
    ];

    /// Stable tag carried in results and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::EmailRelay => "email-relay",
            DeliveryMethod::EmailSendmail => "email-sendmail",
            DeliveryMethod::EmailPmf => "email-pmf",
            DeliveryMethod::EmailPmfFallback => "email-pmf-fallback",
            DeliveryMethod::Telegram => "telegram",
            DeliveryMethod::Gotify => "gotify",
            DeliveryMethod::Webhook => "webhook",
        }
    }

    /// Human readable description for log lines and CLI output.
    pub fn describe(&self) -> &'static str {
        match self {
            DeliveryMethod::EmailRelay => "cloud relay",
            DeliveryMethod::EmailSendmail => "local MTA (sendmail)",
            DeliveryMethod::EmailPmf => "proxmox-mail-forward",
            DeliveryMethod::EmailPmfFallback => "proxmox-mail-forward (fallback after relay failure)",
            DeliveryMethod::Telegram => "Telegram bot API",
            DeliveryMethod::Gotify => "Gotify server",
            DeliveryMethod::Webhook => "webhook endpoints",
        }
    }
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeliveryMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown delivery method '{}'", s))
    }
}

/// Outcome of one channel for one report.
///
/// `error` is kept even on success when a fallback rescued the delivery, so
/// operators can still see why the primary transport failed.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    pub channel: String,
    pub success: bool,
    pub method: DeliveryMethod,
    pub used_fallback: bool,
    pub error: Option<NotifyError>,
    pub duration: Duration,
    pub metadata: BTreeMap<String, String>,
}

impl DeliveryResult {
    pub fn success(channel: impl Into<String>, method: DeliveryMethod) -> Self {
        Self {
            channel: channel.into(),
            success: true,
            method,
            used_fallback: false,
            error: None,
            duration: Duration::ZERO,
            metadata: BTreeMap::new(),
        }
    }

    pub fn failure(channel: impl Into<String>, method: DeliveryMethod, error: NotifyError) -> Self {
        Self {
            channel: channel.into(),
            success: false,
            method,
            used_fallback: false,
            error: Some(error),
            duration: Duration::ZERO,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}
