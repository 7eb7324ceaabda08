//! Webhook channel.
//!
//! Fans a report out to every configured endpoint concurrently. Each endpoint
//! gets its own payload shape, headers, authentication and retry budget; the
//! channel succeeds when at least one endpoint accepted the report.
//!
//! Endpoint problems that only show at send time (bad URL scheme, missing
//! credential, unresolved `${VAR}`) fail that endpoint alone.

pub mod payload;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::http::{self, AuthMode, HttpRequest, HttpResponse, RetryPolicy, mask_url};
use super::{DeliveryMethod, DeliveryResult, Notifier};
use crate::config::{WebhookEndpointConfig, WebhookFormat, WebhooksConfig, resolve_env_vars};
use crate::error::{ConfigError, NotifyError};
use crate::report::Report;

const CHANNEL: &str = "webhook";

/// One endpoint, as configured.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: String,
    url: String,
    method: String,
    pub format: WebhookFormat,
    headers: Vec<(String, String)>,
    auth: crate::config::WebhookAuthConfig,
}

impl Endpoint {
    fn from_config(config: &WebhookEndpointConfig, default_format: WebhookFormat) -> Self {
        let format = if config.format.trim().is_empty() {
            default_format
        } else {
            resolve_format(&config.format, &config.name)
        };
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            method: config.method.clone(),
            format,
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            auth: config.auth.clone(),
        }
    }

    /// Resolve everything needed to send and build the request.
    fn prepare(&self, body: Vec<u8>, timeout: Duration) -> Result<HttpRequest, NotifyError> {
        let raw_url = resolve_env_vars(&self.url).map_err(|e| NotifyError::Config(e.to_string()))?;
        if raw_url.trim().is_empty() {
            return Err(NotifyError::Config("url is required".to_string()));
        }
        let url = http::parse_http_url(&raw_url)?;

        let method_name = self.method.trim().to_ascii_uppercase();
        let method = if method_name.is_empty() {
            Method::POST
        } else {
            Method::from_bytes(method_name.as_bytes()).map_err(|_| {
                NotifyError::Config(format!("invalid HTTP method '{}'", self.method))
            })?
        };

        let mut resolved = Vec::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let value = resolve_env_vars(value)
                .map_err(|e| NotifyError::Config(format!("header '{}': {}", name, e)))?;
            resolved.push((name.as_str(), value));
        }
        let mut headers =
            http::sanitize_headers(resolved.iter().map(|(k, v)| (*k, v.as_str())));

        let auth = AuthMode::from_config(&self.auth)?;
        auth.apply(&mut headers, &body)?;

        let mut request = HttpRequest::new(method, url).json(body).timeout(timeout);
        request.headers = headers;
        Ok(request)
    }
}

/// Parse a format name, falling back to generic for unknown names.
fn resolve_format(raw: &str, endpoint: &str) -> WebhookFormat {
    match raw.parse::<WebhookFormat>() {
        Ok(format) => format,
        Err(e) => {
            tracing::warn!(endpoint = %endpoint, error = %e, "Unknown webhook format, using generic");
            WebhookFormat::Generic
        }
    }
}

/// Outcome of one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointOutcome {
    pub name: String,
    pub result: Result<HttpResponse, NotifyError>,
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoints: Vec<Arc<Endpoint>>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl WebhookNotifier {
    /// Build the channel.
    ///
    /// Endpoint names key the result metadata, so they must be unique.
    pub fn from_config(config: &WebhooksConfig) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for endpoint in &config.endpoints {
            if !seen.insert(endpoint.name.trim()) {
                return Err(ConfigError::InvalidNotifier {
                    name: CHANNEL.to_string(),
                    message: format!("duplicate endpoint name '{}'", endpoint.name),
                });
            }
        }

        let default_format = resolve_format(&config.default_format, "default");
        let endpoints = config
            .endpoints
            .iter()
            .map(|e| Arc::new(Endpoint::from_config(e, default_format)))
            .collect();

        Ok(Self {
            client: http::build_client(CHANNEL, config.timeout)?,
            endpoints,
            policy: RetryPolicy {
                max_retries: config.max_retries,
                retry_delay: config.retry_delay,
                rate_limit_delay: config.rate_limit_delay,
            },
            timeout: config.timeout,
        })
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    /// Send to every endpoint concurrently; outcomes keep configuration order.
    ///
    /// Endpoint tasks live in a `JoinSet`, so dropping this future (channel
    /// deadline, dispatcher shutdown) aborts every endpoint still retrying.
    pub async fn fan_out(&self, report: &Report, cancel: &CancellationToken) -> Vec<EndpointOutcome> {
        let report = Arc::new(report.clone());
        let mut tasks: JoinSet<(usize, Result<HttpResponse, NotifyError>)> = JoinSet::new();
        // Map task ID to endpoint index so a panicked task still lands in its slot
        let mut task_slots: HashMap<tokio::task::Id, usize> = HashMap::new();

        for (index, endpoint) in self.endpoints.iter().enumerate() {
            let endpoint = Arc::clone(endpoint);
            let report = Arc::clone(&report);
            let client = self.client.clone();
            let cancel = cancel.clone();
            let policy = self.policy;
            let timeout = self.timeout;
            let span = tracing::info_span!(
                "webhook_endpoint",
                endpoint = %endpoint.name,
                format = endpoint.format.as_str()
            );
            let handle = tasks.spawn(
                async move {
                    let result =
                        send_endpoint(&client, &endpoint, &report, &policy, timeout, &cancel).await;
                    (index, result)
                }
                .instrument(span),
            );
            task_slots.insert(handle.id(), index);
        }

        let mut results: Vec<Option<Result<HttpResponse, NotifyError>>> =
            (0..self.endpoints.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => {
                    if let Some(&index) = task_slots.get(&e.id()) {
                        results[index] = Some(Err(NotifyError::Transport(format!(
                            "endpoint task failed: {}",
                            e
                        ))));
                    }
                }
            }
        }

        self.endpoints
            .iter()
            .zip(results)
            .map(|(endpoint, result)| EndpointOutcome {
                name: endpoint.name.clone(),
                result: result.unwrap_or_else(|| {
                    Err(NotifyError::Transport("endpoint task failed".to_string()))
                }),
            })
            .collect()
    }

    async fn deliver(&self, report: &Report, cancel: &CancellationToken) -> DeliveryResult {
        if self.endpoints.is_empty() {
            return DeliveryResult::failure(
                CHANNEL,
                DeliveryMethod::Webhook,
                NotifyError::Config("no webhook endpoints configured".to_string()),
            );
        }
        summarize(self.fan_out(report, cancel).await)
    }
}

async fn send_endpoint(
    client: &reqwest::Client,
    endpoint: &Endpoint,
    report: &Report,
    policy: &RetryPolicy,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<HttpResponse, NotifyError> {
    let body = payload::build(endpoint.format, report)?;
    let request = endpoint.prepare(body, timeout).inspect_err(|e| {
        tracing::warn!(error = %e, "Webhook endpoint is not usable");
    })?;
    tracing::debug!(
        url = %mask_url(request.url.as_str()),
        method = %request.method,
        headers = ?http::headers_for_log(&request.headers),
        "Sending webhook"
    );

    match http::execute(client, &request, policy, CHANNEL, cancel).await {
        Ok(response) => {
            tracing::info!(status = response.status, attempts = response.attempts, "Webhook delivered");
            Ok(response)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Webhook delivery failed");
            Err(e)
        }
    }
}

/// Fold endpoint outcomes into the channel result.
///
/// Success if any endpoint succeeded; the first error is kept only when all
/// endpoints failed.
pub fn summarize(outcomes: Vec<EndpointOutcome>) -> DeliveryResult {
    let total = outcomes.len();
    let succeeded = outcomes.iter().filter(|o| o.result.is_ok()).count();
    let failed = total - succeeded;

    let first_error = outcomes.iter().find_map(|o| o.result.as_ref().err().cloned());
    let mut result = match first_error {
        Some(error) if succeeded == 0 => {
            DeliveryResult::failure(CHANNEL, DeliveryMethod::Webhook, error)
        }
        _ => DeliveryResult::success(CHANNEL, DeliveryMethod::Webhook),
    };

    for outcome in &outcomes {
        let value = match &outcome.result {
            Ok(_) => "ok".to_string(),
            Err(e) => e.to_string(),
        };
        result = result.with_meta(format!("endpoint.{}", outcome.name), value);
    }

    if failed > 0 && succeeded > 0 {
        tracing::warn!(succeeded, failed, "Some webhook endpoints failed");
    }
    result
        .with_meta("endpoints_total", total.to_string())
        .with_meta("endpoints_succeeded", succeeded.to_string())
        .with_meta("endpoints_failed", failed.to_string())
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        CHANNEL
    }

    fn notifier_type(&self) -> &str {
        CHANNEL
    }

    fn primary_method(&self) -> DeliveryMethod {
        DeliveryMethod::Webhook
    }

    async fn send(
        &self,
        report: &Report,
        cancel: &CancellationToken,
    ) -> Result<DeliveryResult, NotifyError> {
        let span = tracing::info_span!(
            "send_webhook",
            channel = CHANNEL,
            endpoints = self.endpoints.len()
        );
        Ok(self.deliver(report, cancel).instrument(span).await)
    }
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.endpoints.iter().map(|e| e.name.as_str()).collect();
        f.debug_struct("WebhookNotifier")
            .field("endpoints", &names)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
