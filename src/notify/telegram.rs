//! Telegram channel.
//!
//! In personal mode the bot token and chat id come from the configuration.
//! In centralized mode they are fetched, on every send, from the bot server
//! with `GET {server_api_host}/api/get-chat-id?server_id=<id>`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::http::{self, HttpRequest, RESPONSE_CAP, RetryPolicy, mask_url, preview, read_capped};
use super::{DeliveryMethod, DeliveryResult, Notifier};
use crate::config::{
    SecretString, TelegramConfig, TelegramMode, is_valid_bot_token, is_valid_chat_id,
    resolve_env_vars, resolve_secret,
};
use crate::error::{ConfigError, HandshakeError, NotifyError};
use crate::report::Report;
use crate::template::render_telegram;

const CHANNEL: &str = "telegram";

/// Bound of the credential handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bot credentials used for one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramCredentials {
    pub bot_token: SecretString,
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    bot_token: String,
    #[serde(default)]
    chat_id: serde_json::Value,
    #[serde(default)]
    status: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

/// Parse and check a 200 handshake body.
fn parse_handshake(body: &str) -> Result<TelegramCredentials, HandshakeError> {
    let response: HandshakeResponse =
        serde_json::from_str(body).map_err(|e| HandshakeError::Format(e.to_string()))?;

    if let Some(status) = response.status
        && status != 200
    {
        return Err(HandshakeError::Unexpected {
            status: u16::try_from(status).unwrap_or(0),
            body: response.message.unwrap_or_default(),
        });
    }

    let chat_id = match &response.chat_id {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    };
    if !is_valid_bot_token(&response.bot_token) {
        return Err(HandshakeError::InvalidCredentials(
            "bot_token has an invalid format".to_string(),
        ));
    }
    if !is_valid_chat_id(&chat_id) {
        return Err(HandshakeError::InvalidCredentials(format!(
            "chat_id '{}' is not a numeric chat id",
            chat_id
        )));
    }
    Ok(TelegramCredentials {
        bot_token: SecretString::new(response.bot_token.trim().to_string()),
        chat_id,
    })
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    mode: TelegramMode,
    /// Set in personal mode.
    credentials: Option<TelegramCredentials>,
    server_api_host: String,
    server_id: String,
    api_base: String,
    timeout: Duration,
    handshake_timeout: Duration,
}

impl TelegramNotifier {
    /// Build the channel, resolving `${VAR}` references and checking the
    /// credentials of the selected mode.
    pub fn from_config(config: &TelegramConfig) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidNotifier {
            name: CHANNEL.to_string(),
            message,
        };
        let mode = config.mode().map_err(invalid)?;

        let api_base = resolve_env_vars(&config.api_base)
            .map_err(|e| invalid(format!("api_base: {}", e)))?
            .trim()
            .trim_end_matches('/')
            .to_string();
        http::parse_http_url(&api_base).map_err(|e| invalid(format!("api_base: {}", e)))?;

        let mut credentials = None;
        let mut server_api_host = String::new();
        let mut server_id = String::new();
        match mode {
            TelegramMode::Personal => {
                let bot_token = resolve_secret(&config.bot_token)
                    .map_err(|e| invalid(format!("bot_token: {}", e)))?;
                let chat_id = resolve_env_vars(&config.chat_id)
                    .map_err(|e| invalid(format!("chat_id: {}", e)))?
                    .trim()
                    .to_string();
                if !is_valid_bot_token(bot_token.expose()) {
                    return Err(invalid("bot_token has an invalid format".to_string()));
                }
                if !is_valid_chat_id(&chat_id) {
                    return Err(invalid(format!("chat_id '{}' is not a numeric chat id", chat_id)));
                }
                credentials = Some(TelegramCredentials {
                    bot_token: SecretString::new(bot_token.expose().trim().to_string()),
                    chat_id,
                });
            }
            TelegramMode::Centralized => {
                server_api_host = resolve_env_vars(&config.server_api_host)
                    .map_err(|e| invalid(format!("server_api_host: {}", e)))?
                    .trim()
                    .trim_end_matches('/')
                    .to_string();
                if server_api_host.is_empty() {
                    return Err(invalid("server_api_host is required in centralized mode".to_string()));
                }
                http::parse_http_url(&server_api_host)
                    .map_err(|e| invalid(format!("server_api_host: {}", e)))?;
                server_id = resolve_env_vars(&config.server_id)
                    .map_err(|e| invalid(format!("server_id: {}", e)))?
                    .trim()
                    .to_string();
                if server_id.is_empty() {
                    return Err(invalid("server_id is required in centralized mode".to_string()));
                }
            }
        }

        Ok(Self {
            client: http::build_client(CHANNEL, config.timeout)?,
            mode,
            credentials,
            server_api_host,
            server_id,
            api_base,
            timeout: config.timeout,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        })
    }

    pub fn mode(&self) -> TelegramMode {
        self.mode
    }

    /// Fetch credentials from the bot server (centralized mode).
    pub async fn handshake(&self) -> Result<TelegramCredentials, HandshakeError> {
        let mut url = Url::parse(&format!("{}/api/get-chat-id", self.server_api_host))
            .map_err(|e| HandshakeError::Transport(e.to_string()))?;
        url.query_pairs_mut().append_pair("server_id", &self.server_id);
        tracing::debug!(url = %mask_url(url.as_str()), "Requesting Telegram credentials");

        let response = self
            .client
            .get(url)
            .timeout(self.handshake_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HandshakeError::Timeout(self.handshake_timeout.as_millis())
                } else {
                    HandshakeError::Transport(e.without_url().to_string())
                }
            })?;
        let status = response.status().as_u16();
        let body = read_capped(response, RESPONSE_CAP).await;

        match status {
            200 => parse_handshake(&body),
            403 => Err(HandshakeError::BotNotStarted),
            409 => Err(HandshakeError::NotRegistered),
            422 => Err(HandshakeError::InvalidServerId),
            _ => Err(HandshakeError::Unexpected {
                status,
                body: preview(body.trim(), http::PREVIEW_CAP).to_string(),
            }),
        }
    }

    async fn credentials(&self, cancel: &CancellationToken) -> Result<TelegramCredentials, NotifyError> {
        if let Some(credentials) = &self.credentials {
            return Ok(credentials.clone());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NotifyError::Cancelled),
            result = self.handshake() => result.map_err(|e| {
                tracing::warn!(error = %e, "Telegram handshake failed");
                NotifyError::from(e)
            }),
        }
    }

    async fn deliver(&self, report: &Report, cancel: &CancellationToken) -> DeliveryResult {
        let credentials = match self.credentials(cancel).await {
            Ok(credentials) => credentials,
            Err(e) => {
                return DeliveryResult::failure(CHANNEL, DeliveryMethod::Telegram, e)
                    .with_meta("mode", self.mode.as_str());
            }
        };

        // the token is part of the path, the URL is never logged unmasked
        let url = match Url::parse(&format!(
            "{}/bot{}/sendMessage",
            self.api_base,
            credentials.bot_token.expose()
        )) {
            Ok(url) => url,
            Err(_) => {
                let err = NotifyError::Config("cannot build the Telegram API URL".to_string());
                return DeliveryResult::failure(CHANNEL, DeliveryMethod::Telegram, err);
            }
        };

        let text = render_telegram(report);
        let request = HttpRequest::post(url)
            .form(&[("chat_id", credentials.chat_id.as_str()), ("text", text.as_str())])
            .timeout(self.timeout);

        match http::execute(&self.client, &request, &RetryPolicy::single_shot(), CHANNEL, cancel).await {
            Ok(response) => {
                tracing::info!(chat_id = %credentials.chat_id, "Telegram message sent");
                DeliveryResult::success(CHANNEL, DeliveryMethod::Telegram)
                    .with_meta("mode", self.mode.as_str())
                    .with_meta("http_status", response.status.to_string())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Telegram delivery failed");
                let status = match &e {
                    NotifyError::Protocol { status, .. } => Some(*status),
                    _ => None,
                };
                let mut result = DeliveryResult::failure(CHANNEL, DeliveryMethod::Telegram, e)
                    .with_meta("mode", self.mode.as_str());
                if let Some(status) = status {
                    result = result.with_meta("http_status", status.to_string());
                }
                result
            }
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        CHANNEL
    }

    fn notifier_type(&self) -> &str {
        CHANNEL
    }

    fn primary_method(&self) -> DeliveryMethod {
        DeliveryMethod::Telegram
    }

    async fn send(
        &self,
        report: &Report,
        cancel: &CancellationToken,
    ) -> Result<DeliveryResult, NotifyError> {
        let span = tracing::info_span!("send_telegram", channel = CHANNEL, mode = self.mode.as_str());
        Ok(self.deliver(report, cancel).instrument(span).await)
    }
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("mode", &self.mode)
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::sample_report;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "123456:ABCdefGHIjklMNOpqrSTUvwxYZ0123456789";

    fn personal(api_base: &str) -> TelegramConfig {
        TelegramConfig {
            enabled: true,
            mode: "personal".to_string(),
            bot_token: SecretString::new(TOKEN.to_string()),
            chat_id: "-1001234567890".to_string(),
            api_base: api_base.to_string(),
            ..TelegramConfig::default()
        }
    }

    fn centralized(host: &str) -> TelegramConfig {
        TelegramConfig {
            enabled: true,
            mode: "centralized".to_string(),
            server_api_host: host.to_string(),
            server_id: "srv 42".to_string(),
            api_base: host.to_string(),
            ..TelegramConfig::default()
        }
    }

    #[test]
    fn personal_mode_validates_credentials() {
        let mut config = personal("https://api.telegram.org");
        assert!(TelegramNotifier::from_config(&config).is_ok());

        config.bot_token = SecretString::new("123:short".to_string());
        let err = TelegramNotifier::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("bot_token has an invalid format"));

        let mut config = personal("https://api.telegram.org");
        config.chat_id = "@channel".to_string();
        let err = TelegramNotifier::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("'@channel'"));
    }

    #[test]
    fn centralized_mode_requires_host_and_id() {
        let mut config = centralized("");
        let err = TelegramNotifier::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("api_base"));

        config.api_base = "https://api.telegram.org".to_string();
        let err = TelegramNotifier::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("server_api_host is required"));
    }

    #[test]
    fn handshake_body_parsing() {
        let creds = parse_handshake(&format!(
            r#"{{"bot_token":"{}","chat_id":987654,"status":200}}"#,
            TOKEN
        ))
        .unwrap();
        assert_eq!(creds.chat_id, "987654");
        assert_eq!(creds.bot_token.expose(), TOKEN);

        let err = parse_handshake(r#"{"bot_token":"bad","chat_id":"1"}"#).unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidCredentials(_)));

        let err = parse_handshake(&format!(
            r#"{{"bot_token":"{}","chat_id":"1","status":500,"message":"db down"}}"#,
            TOKEN
        ))
        .unwrap_err();
        assert_eq!(
            err,
            HandshakeError::Unexpected {
                status: 500,
                body: "db down".to_string()
            }
        );

        assert!(matches!(parse_handshake("<html>"), Err(HandshakeError::Format(_))));
    }

    #[tokio::test]
    async fn personal_send_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{}/sendMessage", TOKEN)))
            .and(body_string_contains("chat_id=-1001234567890"))
            .and(body_string_contains("text="))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::from_config(&personal(&server.uri())).unwrap();
        let result = notifier
            .send(&sample_report(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.method, DeliveryMethod::Telegram);
        assert_eq!(result.meta("mode"), Some("personal"));

        let received = server.received_requests().await.unwrap();
        let content_type = received[0].headers.get("content-type").unwrap().to_str().unwrap();
        assert_eq!(content_type, "application/x-www-form-urlencoded");
    }

    #[tokio::test]
    async fn handshake_status_mapping() {
        let cases = [
            (403, HandshakeError::BotNotStarted),
            (409, HandshakeError::NotRegistered),
            (422, HandshakeError::InvalidServerId),
        ];
        for (status, expected) in cases {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/api/get-chat-id"))
                .and(query_param("server_id", "srv 42"))
                .respond_with(ResponseTemplate::new(status))
                .expect(1)
                .mount(&server)
                .await;
            let notifier = TelegramNotifier::from_config(&centralized(&server.uri())).unwrap();
            assert_eq!(notifier.handshake().await.unwrap_err(), expected);
        }

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/get-chat-id"))
            .respond_with(ResponseTemplate::new(500).set_body_string("maintenance"))
            .mount(&server)
            .await;
        let notifier = TelegramNotifier::from_config(&centralized(&server.uri())).unwrap();
        assert_eq!(
            notifier.handshake().await.unwrap_err(),
            HandshakeError::Unexpected {
                status: 500,
                body: "maintenance".to_string()
            }
        );
    }

    #[tokio::test]
    async fn slow_handshake_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/get-chat-id"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let mut notifier = TelegramNotifier::from_config(&centralized(&server.uri())).unwrap();
        notifier.handshake_timeout = Duration::from_millis(100);
        assert_eq!(
            notifier.handshake().await.unwrap_err(),
            HandshakeError::Timeout(100)
        );

        let result = notifier
            .send(&sample_report(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.error, Some(NotifyError::Timeout(100)));
    }

    #[tokio::test]
    async fn trailing_slash_on_server_host_is_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/get-chat-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bot_token": TOKEN,
                "chat_id": "987654"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let notifier =
            TelegramNotifier::from_config(&centralized(&format!("{}/", server.uri()))).unwrap();
        let creds = notifier.handshake().await.unwrap();
        assert_eq!(creds.chat_id, "987654");
    }

    #[tokio::test]
    async fn failed_handshake_fails_result_without_sending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/get-chat-id"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::from_config(&centralized(&server.uri())).unwrap();
        let result = notifier
            .send(&sample_report(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(matches!(result.error, Some(NotifyError::Protocol { status: 409, .. })));
    }

    #[tokio::test]
    async fn transport_error_does_not_leak_token() {
        // nothing listens on port 9
        let notifier = TelegramNotifier::from_config(&personal("http://127.0.0.1:9")).unwrap();
        let result = notifier
            .send(&sample_report(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        let error = result.error.unwrap().to_string();
        assert!(!error.contains("ABCdefGHI"), "{}", error);
    }
}
