//! Cloud relay transport.
//!
//! Posts the signed report map to a remote relay that turns it into an email.
//! The body is signed with HMAC-SHA256 over the exact bytes sent, so the
//! payload is serialized once and reused across retries.

use std::time::Duration;

use reqwest::Url;
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue, USER_AGENT};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::http::{
    self, HttpRequest, HttpResponse, RetryPolicy, SIGNATURE_HEADER, mask_url, sensitive_value,
    sign_hmac,
};
use crate::config::{CloudRelayConfig, SecretString, resolve_env_vars, resolve_secret};
use crate::error::{ConfigError, NotifyError};
use crate::report::Report;
use crate::template::ReportMap;

const SCRIPT_VERSION_HEADER: &str = "x-script-version";
const SERVER_MAC_HEADER: &str = "x-server-mac";

/// Body accepted by the relay.
#[derive(Debug, Clone, Serialize)]
pub struct RelayPayload<'a> {
    pub to: &'a str,
    pub subject: &'a str,
    pub report: ReportMap,
    /// Unix seconds, part of the signed bytes to bound replays.
    pub t: i64,
    pub server_mac: &'a str,
}

pub struct RelayClient {
    client: reqwest::Client,
    url: Url,
    token: SecretString,
    secret: SecretString,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RelayClient {
    /// Build the relay client, resolving `${VAR}` references.
    ///
    /// All three credentials are mandatory.
    pub fn from_config(config: &CloudRelayConfig) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidNotifier {
            name: "cloud_relay".to_string(),
            message,
        };

        let raw_url =
            resolve_env_vars(&config.worker_url).map_err(|e| invalid(format!("worker_url: {}", e)))?;
        if raw_url.trim().is_empty() {
            return Err(invalid("worker_url is required".to_string()));
        }
        let url = http::parse_http_url(&raw_url).map_err(|e| invalid(e.to_string()))?;

        let token =
            resolve_secret(&config.worker_token).map_err(|e| invalid(format!("worker_token: {}", e)))?;
        let secret =
            resolve_secret(&config.hmac_secret).map_err(|e| invalid(format!("hmac_secret: {}", e)))?;
        if token.is_blank() {
            return Err(invalid("worker_token is required".to_string()));
        }
        if secret.is_blank() {
            return Err(invalid("hmac_secret is required".to_string()));
        }

        Ok(Self {
            client: http::build_client("cloud_relay", config.timeout)?,
            url,
            token,
            secret,
            policy: RetryPolicy {
                max_retries: config.max_retries,
                retry_delay: config.retry_delay,
                rate_limit_delay: config.rate_limit_delay,
            },
            timeout: config.timeout,
        })
    }

    /// Relay URL safe for logs and result metadata.
    pub fn masked_url(&self) -> String {
        mask_url(self.url.as_str())
    }

    /// Serialize the signed body.
    pub fn encode_payload(
        to: &str,
        subject: &str,
        report: &Report,
        timestamp: i64,
    ) -> Result<Vec<u8>, NotifyError> {
        let payload = RelayPayload {
            to,
            subject,
            report: ReportMap::from_report(report),
            t: timestamp,
            server_mac: &report.server_mac,
        };
        serde_json::to_vec(&payload)
            .map_err(|e| NotifyError::Format(format!("cannot encode relay payload: {}", e)))
    }

    fn build_request(&self, body: Vec<u8>, report: &Report) -> Result<HttpRequest, NotifyError> {
        let signature = sign_hmac(self.secret.expose().as_bytes(), &body);
        let mut request = HttpRequest::post(self.url.clone())
            .json(body)
            .timeout(self.timeout)
            .header(
                AUTHORIZATION,
                sensitive_value(&format!("Bearer {}", self.token.expose()))?,
            )
            .header(HeaderName::from_static(SIGNATURE_HEADER), sensitive_value(&signature)?)
            .header(USER_AGENT, header_value(&http::user_agent(&report.script_version)));

        if !report.script_version.trim().is_empty() {
            request = request.header(
                HeaderName::from_static(SCRIPT_VERSION_HEADER),
                header_value(report.script_version.trim()),
            );
        }
        if !report.server_mac.trim().is_empty() {
            request = request.header(
                HeaderName::from_static(SERVER_MAC_HEADER),
                header_value(report.server_mac.trim()),
            );
        }
        Ok(request)
    }

    /// Submit one email through the relay.
    ///
    /// # Returns
    ///
    /// * `Ok(HttpResponse)` - Relay accepted the message (2xx)
    /// * `Err(NotifyError::Quota)` - Relay budget exhausted, never retried
    /// * `Err(NotifyError)` - Any other terminal failure
    pub async fn send(
        &self,
        to: &str,
        subject: &str,
        report: &Report,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, NotifyError> {
        let body = Self::encode_payload(to, subject, report, chrono::Utc::now().timestamp())?;
        let request = self.build_request(body, report)?;
        tracing::debug!(url = %mask_url(self.url.as_str()), "Submitting email to cloud relay");

        let response = http::execute(&self.client, &request, &self.policy, "relay", cancel).await?;
        tracing::info!(
            status = response.status,
            attempts = response.attempts,
            "Email accepted by cloud relay"
        );
        Ok(response)
    }
}

/// Header value from report data; invalid characters degrade to `unknown`.
fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static("unknown"))
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("url", &mask_url(self.url.as_str()))
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::sample_report;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn relay_config(url: &str) -> CloudRelayConfig {
        CloudRelayConfig {
            worker_url: url.to_string(),
            worker_token: SecretString::new("relay-token".to_string()),
            hmac_secret: SecretString::new("relay-secret".to_string()),
            timeout: Duration::from_secs(5),
            max_retries: 0,
            retry_delay: Duration::from_millis(10),
            rate_limit_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn from_config_requires_credentials() {
        let mut config = relay_config("https://relay.example.com/send");
        config.hmac_secret = SecretString::default();
        let err = RelayClient::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("hmac_secret is required"));

        let config = relay_config("");
        let err = RelayClient::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("worker_url is required"));

        let config = relay_config("ftp://relay.example.com");
        assert!(RelayClient::from_config(&config).is_err());
    }

    #[test]
    fn payload_shape() {
        let report = sample_report();
        let body = RelayClient::encode_payload("admin@example.com", "subj", &report, 1_700_000_000)
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["to"], "admin@example.com");
        assert_eq!(value["subject"], "subj");
        assert_eq!(value["t"], 1_700_000_000);
        assert_eq!(value["server_mac"], "aa:bb:cc:dd:ee:ff");
        assert_eq!(value["report"]["hostname"], "pve01");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with(r#"{"to":"admin@example.com","subject":"subj","report":{"#));
        assert!(text.ends_with(r#","t":1700000000,"server_mac":"aa:bb:cc:dd:ee:ff"}"#));
    }

    #[test]
    fn debug_hides_credentials() {
        let client = RelayClient::from_config(&relay_config("https://relay.example.com/send")).unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("relay-token"));
        assert!(!debug.contains("relay-secret"));
        assert!(!debug.contains("/send"));
    }

    #[tokio::test]
    async fn signed_request_verifies_against_sent_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(header("authorization", "Bearer relay-token"))
            .and(header("x-script-version", "0.9.0"))
            .and(header("x-server-mac", "aa:bb:cc:dd:ee:ff"))
            .and(header("user-agent", "proxsave/0.9.0"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            RelayClient::from_config(&relay_config(&format!("{}/send", server.uri()))).unwrap();
        let response = client
            .send("admin@example.com", "subj", &sample_report(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        let received = server.received_requests().await.unwrap();
        let request = &received[0];
        let signature = request
            .headers
            .get("x-signature")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(signature, sign_hmac(b"relay-secret", &request.body));
        assert_eq!(signature.len(), 64);
    }
}
