//! Gotify channel.
//!
//! One JSON message per report, posted to `{server_url}/message?token=...`.
//! No retry: Gotify servers are usually on the LAN and a failure is
//! reported immediately.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::http::{self, HttpRequest, RetryPolicy, mask_url};
use super::{DeliveryMethod, DeliveryResult, Notifier};
use crate::config::{GotifyConfig, resolve_env_vars, resolve_secret};
use crate::error::{ConfigError, NotifyError};
use crate::report::{BackupStatus, Report};
use crate::template::{render_subject, render_text};

const CHANNEL: &str = "gotify";

#[derive(Debug, Clone, Serialize)]
struct GotifyMessage<'a> {
    title: &'a str,
    message: &'a str,
    priority: i64,
}

/// Priority per backup status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GotifyPriorities {
    pub success: i64,
    pub warning: i64,
    pub failure: i64,
}

impl GotifyPriorities {
    /// Unknown statuses are treated as failures.
    pub fn for_status(&self, status: BackupStatus) -> i64 {
        match status {
            BackupStatus::Success => self.success,
            BackupStatus::Warning => self.warning,
            BackupStatus::Failure | BackupStatus::Unknown => self.failure,
        }
    }
}

pub struct GotifyNotifier {
    client: reqwest::Client,
    /// Message endpoint, token included.
    url: Url,
    priorities: GotifyPriorities,
    timeout: Duration,
}

impl GotifyNotifier {
    pub fn from_config(config: &GotifyConfig) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidNotifier {
            name: CHANNEL.to_string(),
            message,
        };

        let server_url = resolve_env_vars(&config.server_url)
            .map_err(|e| invalid(format!("server_url: {}", e)))?;
        let server_url = server_url.trim().trim_end_matches('/');
        if server_url.is_empty() {
            return Err(invalid("server_url is required".to_string()));
        }
        let token = resolve_secret(&config.token).map_err(|e| invalid(format!("token: {}", e)))?;
        if token.is_blank() {
            return Err(invalid("token is required".to_string()));
        }

        let mut url = http::parse_http_url(&format!("{}/message", server_url))
            .map_err(|e| invalid(format!("server_url: {}", e)))?;
        url.query_pairs_mut().append_pair("token", token.expose().trim());

        Ok(Self {
            client: http::build_client(CHANNEL, config.timeout)?,
            url,
            priorities: GotifyPriorities {
                success: config.priority_success,
                warning: config.priority_warning,
                failure: config.priority_failure,
            },
            timeout: config.timeout,
        })
    }

    async fn deliver(&self, report: &Report, cancel: &CancellationToken) -> DeliveryResult {
        let title = render_subject(report);
        let text = render_text(report);
        let priority = self.priorities.for_status(report.status());
        let body = match serde_json::to_vec(&GotifyMessage {
            title: &title,
            message: &text,
            priority,
        }) {
            Ok(body) => body,
            Err(e) => {
                let err = NotifyError::Format(format!("cannot encode Gotify message: {}", e));
                return DeliveryResult::failure(CHANNEL, DeliveryMethod::Gotify, err);
            }
        };

        let request = HttpRequest::post(self.url.clone())
            .json(body)
            .timeout(self.timeout);
        match http::execute(&self.client, &request, &RetryPolicy::single_shot(), CHANNEL, cancel).await {
            Ok(response) => {
                tracing::info!(priority, "Gotify message sent");
                DeliveryResult::success(CHANNEL, DeliveryMethod::Gotify)
                    .with_meta("http_status", response.status.to_string())
                    .with_meta("priority", priority.to_string())
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %mask_url(self.url.as_str()), "Gotify delivery failed");
                let status = match &e {
                    NotifyError::Protocol { status, .. } => Some(*status),
                    _ => None,
                };
                let mut result = DeliveryResult::failure(CHANNEL, DeliveryMethod::Gotify, e);
                if let Some(status) = status {
                    result = result.with_meta("http_status", status.to_string());
                }
                result
            }
        }
    }
}

#[async_trait]
impl Notifier for GotifyNotifier {
    fn name(&self) -> &str {
        CHANNEL
    }

    fn notifier_type(&self) -> &str {
        CHANNEL
    }

    fn primary_method(&self) -> DeliveryMethod {
        DeliveryMethod::Gotify
    }

    async fn send(
        &self,
        report: &Report,
        cancel: &CancellationToken,
    ) -> Result<DeliveryResult, NotifyError> {
        let span = tracing::info_span!("send_gotify", channel = CHANNEL);
        Ok(self.deliver(report, cancel).instrument(span).await)
    }
}

impl std::fmt::Debug for GotifyNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GotifyNotifier")
            .field("url", &mask_url(self.url.as_str()))
            .field("priorities", &self.priorities)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretString;
    use crate::report::fixtures::sample_report;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server_url: &str) -> GotifyConfig {
        GotifyConfig {
            enabled: true,
            server_url: server_url.to_string(),
            token: SecretString::new("AbCdEf123".to_string()),
            ..GotifyConfig::default()
        }
    }

    #[test]
    fn priority_mapping_uses_config() {
        let priorities = GotifyPriorities {
            success: 1,
            warning: 4,
            failure: 9,
        };
        assert_eq!(priorities.for_status(BackupStatus::Success), 1);
        assert_eq!(priorities.for_status(BackupStatus::Warning), 4);
        assert_eq!(priorities.for_status(BackupStatus::Failure), 9);
        assert_eq!(priorities.for_status(BackupStatus::Unknown), 9);
    }

    #[test]
    fn from_config_requires_url_and_token() {
        let err = GotifyNotifier::from_config(&config("")).unwrap_err();
        assert!(err.to_string().contains("server_url is required"));

        let mut cfg = config("https://gotify.example.com");
        cfg.token = SecretString::default();
        let err = GotifyNotifier::from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("token is required"));
    }

    #[test]
    fn debug_masks_token() {
        let notifier = GotifyNotifier::from_config(&config("https://gotify.example.com/")).unwrap();
        assert!(!format!("{:?}", notifier).contains("AbCdEf123"));
    }

    #[tokio::test]
    async fn posts_title_message_priority() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .and(query_param("token", "AbCdEf123"))
            .and(body_partial_json(serde_json::json!({
                "title": "⚠️ PVE Backup on pve01 - 2026-10-19 02:30",
                "priority": 5
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":1}"#))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = GotifyNotifier::from_config(&config(&server.uri())).unwrap();
        let result = notifier
            .send(&sample_report(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.method, DeliveryMethod::Gotify);
        assert_eq!(result.meta("http_status"), Some("200"));

        let received = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert!(body["message"].as_str().unwrap().contains("pve01"));
    }

    #[tokio::test]
    async fn non_2xx_is_single_shot_failure_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = GotifyNotifier::from_config(&config(&server.uri())).unwrap();
        let result = notifier
            .send(&sample_report(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.meta("http_status"), Some("500"));
    }
}
