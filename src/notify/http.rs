//! Shared HTTP client core.
//!
//! Every outbound HTTP call of the crate (cloud relay, Telegram, Gotify,
//! webhooks) goes through [`execute`], which applies one retry policy keyed by
//! response class:
//!
//! - 2xx: success
//! - 400, 401, 403, 404: terminal, never retried
//! - 429: retried after `rate_limit_delay`, unless the detail names a quota,
//!   which is terminal immediately
//! - anything else (5xx, network errors): retried after `retry_delay` up to
//!   `max_retries`
//!
//! The module also holds the request signing, authentication, header hygiene
//! and log masking helpers.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use sha2::Sha256;
use tokio_util::sync::CancellationToken;

use crate::config::{SecretString, WebhookAuthConfig, resolve_env_vars, resolve_secret};
use crate::error::{ConfigError, NotifyError};

type HmacSha256 = Hmac<Sha256>;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Body cap for responses whose content matters (429 details, handshakes).
pub const RESPONSE_CAP: usize = 2048;

/// Body cap for bodies only previewed in debug logs and error details.
pub const PREVIEW_CAP: usize = 500;

/// Header carrying the hex HMAC of the request body.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Companion header naming the signature algorithm (webhooks only).
pub const SIGNATURE_ALGORITHM_HEADER: &str = "x-signature-algorithm";

const MASKED: &str = "***MASKED***";

/// Header names callers may not set: they would let a config spoof the
/// target host or desynchronise the framing of the request.
const BLOCKED_HEADERS: [&str; 4] = ["host", "content-length", "content-type", "transfer-encoding"];

const QUOTA_KEYWORDS: [&str; 5] = [
    "quota",
    "per server",
    "per account",
    "daily",
    "write me on github",
];

const SENSITIVE_HEADER_PARTS: [&str; 4] = ["auth", "token", "key", "secret"];

/// User agent sent on every request.
pub fn user_agent(version: &str) -> String {
    if version.trim().is_empty() {
        format!("proxsave/{}", env!("CARGO_PKG_VERSION"))
    } else {
        format!("proxsave/{}", version.trim())
    }
}

/// Build the client a channel reuses across retries.
pub fn build_client(name: &str, timeout: Duration) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent(""))
        .build()
        .map_err(|e| ConfigError::InvalidNotifier {
            name: name.to_string(),
            message: format!("cannot build HTTP client: {}", e),
        })
}

// ============================================================
// Retry policy
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub rate_limit_delay: Duration,
}

impl RetryPolicy {
    /// One attempt, no retry.
    pub fn single_shot() -> Self {
        Self {
            max_retries: 0,
            retry_delay: Duration::ZERO,
            rate_limit_delay: Duration::ZERO,
        }
    }
}

/// How the retry loop treats a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    Terminal,
    RateLimited,
    Retry,
}

pub fn classify(status: StatusCode) -> ResponseClass {
    match status.as_u16() {
        200..=299 => ResponseClass::Success,
        400 | 401 | 403 | 404 => ResponseClass::Terminal,
        429 => ResponseClass::RateLimited,
        _ => ResponseClass::Retry,
    }
}

/// True if a 429 detail describes an exhausted budget rather than a burst.
pub fn is_quota_detail(detail: &str) -> bool {
    let lower = detail.to_lowercase();
    QUOTA_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Extract the human readable detail of a 429 body.
///
/// JSON bodies contribute their `message` or `error` field; anything else is
/// used verbatim.
pub fn rate_limit_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str())
                && !text.trim().is_empty()
            {
                return text.trim().to_string();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "too many requests".to_string()
    } else {
        trimmed.to_string()
    }
}

// ============================================================
// Requests
// ============================================================

/// A fully prepared request, replayable across retries.
#[derive(Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub content_type: &'static str,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Vec::new(),
            content_type: "application/json",
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn json(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self.content_type = "application/json";
        self
    }

    /// Form-encoded body, fields percent-encoded in order.
    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        let encoded = fields
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        self.body = encoded.into_bytes();
        self.content_type = "application/x-www-form-urlencoded";
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// GET and HEAD carry neither a body nor a Content-Type.
    pub fn has_body(&self) -> bool {
        self.method != Method::GET && self.method != Method::HEAD
    }

    fn to_builder(&self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let builder = client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone())
            .timeout(self.timeout);
        if self.has_body() {
            builder
                .header(CONTENT_TYPE, self.content_type)
                .body(self.body.clone())
        } else {
            builder
        }
    }
}

impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method.as_str())
            .field("url", &mask_url(self.url.as_str()))
            .field("headers", &headers_for_log(&self.headers))
            .field("body_len", &self.body.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Body, capped at [`RESPONSE_CAP`] bytes.
    pub body: String,
    pub attempts: u32,
}

/// Send a request under a retry policy.
///
/// # Arguments
///
/// * `client` - Channel client, reused across attempts
/// * `request` - Prepared request
/// * `policy` - Retry budget and delays
/// * `target` - Label for logs and the retry counter (e.g. "relay")
/// * `cancel` - Aborts the in-flight request or pending sleep
///
/// # Returns
///
/// * `Ok(HttpResponse)` - A 2xx response
/// * `Err(NotifyError)` - Terminal status, exhausted retries, or cancellation
pub async fn execute(
    client: &reqwest::Client,
    request: &HttpRequest,
    policy: &RetryPolicy,
    target: &str,
    cancel: &CancellationToken,
) -> Result<HttpResponse, NotifyError> {
    let masked = mask_url(request.url.as_str());
    let total = policy.max_retries + 1;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let last = attempt >= total;
        tracing::debug!(http_target = target, attempt, url = %masked, method = %request.method, "Sending request");

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NotifyError::Cancelled),
            sent = request.to_builder(client).send() => sent,
        };

        let delay = match sent {
            Err(e) => {
                let err = transport_error(e, request.timeout);
                if last {
                    return Err(err);
                }
                tracing::warn!(http_target = target, attempt, url = %masked, error = %err, "Request failed, retrying");
                policy.retry_delay
            }
            Ok(response) => {
                let status = response.status();
                match classify(status) {
                    ResponseClass::Success => {
                        let body = read_capped(response, RESPONSE_CAP).await;
                        tracing::debug!(http_target = target, attempt, status = status.as_u16(), "Request accepted");
                        return Ok(HttpResponse {
                            status: status.as_u16(),
                            body,
                            attempts: attempt,
                        });
                    }
                    ResponseClass::Terminal => {
                        let body = read_capped(response, PREVIEW_CAP).await;
                        tracing::warn!(http_target = target, status = status.as_u16(), "Terminal HTTP status, not retrying");
                        return Err(NotifyError::Protocol {
                            status: status.as_u16(),
                            detail: status_detail(status, &body),
                        });
                    }
                    ResponseClass::RateLimited => {
                        let body = read_capped(response, RESPONSE_CAP).await;
                        let detail = rate_limit_detail(&body);
                        if is_quota_detail(&detail) {
                            tracing::warn!(http_target = target, detail = %detail, "Quota exceeded, not retrying");
                            return Err(NotifyError::Quota(detail));
                        }
                        if last {
                            return Err(NotifyError::RateLimited(detail));
                        }
                        tracing::warn!(
                            http_target = target,
                            attempt,
                            status = 429,
                            delay_ms = policy.rate_limit_delay.as_millis() as u64,
                            "Rate limited, retrying"
                        );
                        policy.rate_limit_delay
                    }
                    ResponseClass::Retry => {
                        let body = read_capped(response, PREVIEW_CAP).await;
                        if last {
                            return Err(NotifyError::Protocol {
                                status: status.as_u16(),
                                detail: status_detail(status, &body),
                            });
                        }
                        tracing::warn!(http_target = target, attempt, status = status.as_u16(), "Server error, retrying");
                        policy.retry_delay
                    }
                }
            }
        };

        metrics::counter!("proxsave_http_retries_total", "target" => target.to_string()).increment(1);
        sleep_or_cancel(delay, cancel).await?;
    }
}

/// Sleep, returning early with `Cancelled` if the token fires.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), NotifyError> {
    if delay.is_zero() {
        return if cancel.is_cancelled() {
            Err(NotifyError::Cancelled)
        } else {
            Ok(())
        };
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(NotifyError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> NotifyError {
    if err.is_timeout() {
        NotifyError::Timeout(timeout.as_millis())
    } else {
        // the URL may carry tokens (Telegram path, Gotify query)
        NotifyError::Transport(err.without_url().to_string())
    }
}

fn status_detail(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        status.canonical_reason().unwrap_or("unexpected status").to_string()
    } else {
        body.to_string()
    }
}

/// Read at most `cap` bytes of a response body, then drop the rest.
pub async fn read_capped(mut response: reqwest::Response, cap: usize) -> String {
    let mut buf: Vec<u8> = Vec::with_capacity(cap.min(4096));
    while buf.len() < cap {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = (cap - buf.len()).min(chunk.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e.without_url(), "Failed to read response body");
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Parse a URL and require http or https.
pub fn parse_http_url(raw: &str) -> Result<Url, NotifyError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| NotifyError::Config(format!("invalid URL '{}': {}", mask_url(raw), e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(NotifyError::Config(format!(
            "unsupported URL scheme '{}': only http and https are allowed",
            other
        ))),
    }
}

// ============================================================
// Signing and authentication
// ============================================================

/// Lowercase hex HMAC-SHA256 of `body` keyed by `secret`.
pub fn sign_hmac(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Authentication of a webhook endpoint.
#[derive(Clone)]
pub enum AuthMode {
    None,
    Bearer(SecretString),
    Basic { user: String, pass: SecretString },
    Hmac(SecretString),
}

impl AuthMode {
    /// Build from configuration, resolving `${VAR}` references.
    ///
    /// A required credential that is empty is a configuration error.
    pub fn from_config(config: &WebhookAuthConfig) -> Result<Self, NotifyError> {
        let resolve = |secret: &SecretString, field: &str| -> Result<SecretString, NotifyError> {
            let resolved = resolve_secret(secret).map_err(|e| NotifyError::Config(e.to_string()))?;
            if resolved.is_blank() {
                return Err(NotifyError::Config(format!(
                    "auth.{} is required for {} authentication",
                    field, config.kind
                )));
            }
            Ok(resolved)
        };

        match config.kind.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(AuthMode::None),
            "bearer" => Ok(AuthMode::Bearer(resolve(&config.token, "token")?)),
            "basic" => {
                let user = resolve_env_vars(&config.user)
                    .map_err(|e| NotifyError::Config(e.to_string()))?;
                if user.trim().is_empty() {
                    return Err(NotifyError::Config(
                        "auth.user is required for basic authentication".to_string(),
                    ));
                }
                Ok(AuthMode::Basic {
                    user,
                    pass: resolve(&config.pass, "pass")?,
                })
            }
            "hmac" => Ok(AuthMode::Hmac(resolve(&config.secret, "secret")?)),
            other => Err(NotifyError::Config(format!("unknown auth type '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::None => "none",
            AuthMode::Bearer(_) => "bearer",
            AuthMode::Basic { .. } => "basic",
            AuthMode::Hmac(_) => "hmac",
        }
    }

    /// Add the authentication headers for `body` to `headers`.
    pub fn apply(&self, headers: &mut HeaderMap, body: &[u8]) -> Result<(), NotifyError> {
        match self {
            AuthMode::None => {}
            AuthMode::Bearer(token) => {
                headers.insert(
                    AUTHORIZATION,
                    sensitive_value(&format!("Bearer {}", token.expose()))?,
                );
            }
            AuthMode::Basic { user, pass } => {
                let credentials = BASE64.encode(format!("{}:{}", user, pass.expose()));
                headers.insert(AUTHORIZATION, sensitive_value(&format!("Basic {}", credentials))?);
            }
            AuthMode::Hmac(secret) => {
                let signature = sign_hmac(secret.expose().as_bytes(), body);
                headers.insert(
                    HeaderName::from_static(SIGNATURE_HEADER),
                    sensitive_value(&signature)?,
                );
                headers.insert(
                    HeaderName::from_static(SIGNATURE_ALGORITHM_HEADER),
                    HeaderValue::from_static("hmac-sha256"),
                );
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header value flagged sensitive so it never shows in reqwest's own logs.
pub fn sensitive_value(value: &str) -> Result<HeaderValue, NotifyError> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|_| NotifyError::Config("credential contains invalid header characters".to_string()))?;
    header.set_sensitive(true);
    Ok(header)
}

// ============================================================
// Header hygiene
// ============================================================

/// True for names the caller may not override.
pub fn is_blocked_header(name: &str) -> bool {
    let lower = name.trim().to_ascii_lowercase();
    BLOCKED_HEADERS.contains(&lower.as_str())
}

/// Build a header map from user supplied pairs.
///
/// Blocked names, empty names and pairs that are not valid HTTP headers are
/// dropped with a warning; they never reach the request.
pub fn sanitize_headers<'a, I>(pairs: I) -> HeaderMap
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = name.trim();
        if name.is_empty() {
            tracing::warn!("Dropping header with empty name");
            continue;
        }
        if is_blocked_header(name) {
            tracing::warn!(header = %name, "Dropping reserved header");
            continue;
        }
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::warn!(header = %name, "Dropping header with invalid name");
            continue;
        };
        let Ok(mut header_value) = HeaderValue::from_str(value) else {
            tracing::warn!(header = %name, "Dropping header with invalid value");
            continue;
        };
        if is_sensitive_header(name) {
            header_value.set_sensitive(true);
        }
        headers.insert(header_name, header_value);
    }
    headers
}

// ============================================================
// Log masking
// ============================================================

/// Keep `scheme://host[:port]`, replace path, query and fragment.
pub fn mask_url(raw: &str) -> String {
    let Ok(url) = Url::parse(raw.trim()) else {
        return MASKED.to_string();
    };
    let host = url.host_str().unwrap_or_default();
    let authority = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let has_tail = (url.path() != "/" && !url.path().is_empty())
        || url.query().is_some()
        || url.fragment().is_some();
    if has_tail {
        format!("{}://{}/{}", url.scheme(), authority, MASKED)
    } else {
        format!("{}://{}", url.scheme(), authority)
    }
}

pub fn is_sensitive_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_HEADER_PARTS.iter().any(|part| lower.contains(part))
}

/// Mask a header value for logging.
///
/// Sensitive values longer than 10 characters keep their first 4; shorter
/// ones are fully masked. Other headers are returned unchanged.
pub fn mask_header_value(name: &str, value: &str) -> String {
    if !is_sensitive_header(name) {
        return value.to_string();
    }
    if value.chars().count() > 10 {
        let prefix: String = value.chars().take(4).collect();
        format!("{}{}", prefix, MASKED)
    } else {
        MASKED.to_string()
    }
}

/// `name: value` pairs safe to log.
pub fn headers_for_log(headers: &HeaderMap) -> Vec<String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = value.to_str().unwrap_or("<binary>");
            format!("{}: {}", name, mask_header_value(name.as_str(), value))
        })
        .collect()
}

/// First `max` bytes of a body for debug logs, cut on a char boundary.
pub fn preview(body: &str, max: usize) -> &str {
    if body.len() <= max {
        return body;
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
