//! Channel dispatcher.
//!
//! Runs every enabled channel in its own task, each bounded by the
//! per-channel deadline, and collects one [`DeliveryResult`] per channel in
//! registration order. A failing, slow or panicking channel never affects its
//! siblings, and nothing here propagates as an error to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{DeliveryResult, EmailNotifier, GotifyNotifier, Notifier, TelegramNotifier, WebhookNotifier};
use crate::config::Config;
use crate::error::{ConfigError, NotifyError};
use crate::report::Report;

pub struct Dispatcher {
    channels: Vec<Arc<dyn Notifier>>,
    channel_timeout: Duration,
}

impl Dispatcher {
    pub fn new(channels: Vec<Arc<dyn Notifier>>, channel_timeout: Duration) -> Self {
        Self {
            channels,
            channel_timeout,
        }
    }

    /// Build every enabled channel from configuration.
    ///
    /// Channels are registered in a fixed order: email, telegram, gotify,
    /// webhook.
    ///
    /// # Returns
    ///
    /// * `Ok(Dispatcher)` - All enabled channels built
    /// * `Err(Vec<ConfigError>)` - Every channel that could not be built
    pub fn from_config(config: &Config) -> Result<Self, Vec<ConfigError>> {
        let mut channels: Vec<Arc<dyn Notifier>> = Vec::new();
        let mut errors = Vec::new();
        let mut register = |built: Result<Arc<dyn Notifier>, ConfigError>| match built {
            Ok(channel) => {
                tracing::info!(channel = channel.name(), "Registered notification channel");
                channels.push(channel);
            }
            Err(e) => errors.push(e),
        };

        if config.email.enabled {
            register(EmailNotifier::from_config(&config.email, &config.cloud_relay).map(shared));
        }
        if config.telegram.enabled {
            register(TelegramNotifier::from_config(&config.telegram).map(shared));
        }
        if config.gotify.enabled {
            register(GotifyNotifier::from_config(&config.gotify).map(shared));
        }
        if config.webhooks.enabled {
            register(WebhookNotifier::from_config(&config.webhooks).map(shared));
        }

        if errors.is_empty() {
            Ok(Self::new(channels, config.dispatch.channel_timeout))
        } else {
            Err(errors)
        }
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.name())
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Send `report` through every enabled channel in parallel.
    ///
    /// Returns one result per enabled channel, in registration order.
    pub async fn dispatch(&self, report: &Report, cancel: &CancellationToken) -> Vec<DeliveryResult> {
        let span = tracing::info_span!(
            "dispatch",
            hostname = %report.hostname,
            status = report.status().as_str()
        );

        async {
            let report = Arc::new(report.clone());
            let enabled: Vec<Arc<dyn Notifier>> = self
                .channels
                .iter()
                .filter(|c| c.is_enabled())
                .cloned()
                .collect();
            tracing::debug!(channels = enabled.len(), "Dispatching report");

            // Channel tasks are aborted if this future is dropped
            let mut tasks: JoinSet<(usize, DeliveryResult)> = JoinSet::new();
            let mut task_slots: HashMap<tokio::task::Id, usize> = HashMap::new();
            for (index, channel) in enabled.iter().enumerate() {
                let channel = Arc::clone(channel);
                let report = Arc::clone(&report);
                let cancel = cancel.clone();
                let deadline = self.channel_timeout;
                let handle = tasks.spawn(async move {
                    (index, run_channel(channel, &report, deadline, &cancel).await)
                });
                task_slots.insert(handle.id(), index);
            }

            let mut slots: Vec<Option<DeliveryResult>> = (0..enabled.len()).map(|_| None).collect();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((index, result)) => slots[index] = Some(result),
                    Err(e) => {
                        if let Some(&index) = task_slots.get(&e.id()) {
                            let channel = &enabled[index];
                            tracing::error!(channel = channel.name(), error = %e, "Channel task panicked");
                            slots[index] = Some(DeliveryResult::failure(
                                channel.name(),
                                channel.primary_method(),
                                NotifyError::Transport(format!("channel task failed: {}", e)),
                            ));
                        }
                    }
                }
            }

            let results: Vec<DeliveryResult> = slots
                .into_iter()
                .zip(&enabled)
                .map(|(slot, channel)| {
                    slot.unwrap_or_else(|| {
                        DeliveryResult::failure(
                            channel.name(),
                            channel.primary_method(),
                            NotifyError::Transport("channel task failed".to_string()),
                        )
                    })
                })
                .collect();

            for result in &results {
                record(result);
            }
            results
        }
        .instrument(span)
        .await
    }
}

fn shared<N: Notifier + 'static>(notifier: N) -> Arc<dyn Notifier> {
    Arc::new(notifier)
}

async fn run_channel(
    channel: Arc<dyn Notifier>,
    report: &Report,
    deadline: Duration,
    cancel: &CancellationToken,
) -> DeliveryResult {
    let started = Instant::now();
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(NotifyError::Cancelled),
        sent = tokio::time::timeout(deadline, channel.send(report, cancel)) => match sent {
            Ok(sent) => sent,
            Err(_) => Err(NotifyError::Timeout(deadline.as_millis())),
        },
    };

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            if channel.is_critical() {
                tracing::error!(channel = channel.name(), error = %e, "Critical channel failed");
            }
            DeliveryResult::failure(channel.name(), channel.primary_method(), e)
        }
    };
    result.with_duration(started.elapsed())
}

fn record(result: &DeliveryResult) {
    if result.success {
        tracing::info!(
            channel = %result.channel,
            method = result.method.as_str(),
            fallback = result.used_fallback,
            duration_ms = result.duration.as_millis() as u64,
            "Notification delivered"
        );
        metrics::counter!(
            "proxsave_notifications_sent_total",
            "channel" => result.channel.clone(),
            "method" => result.method.as_str()
        )
        .increment(1);
    } else {
        let error = result
            .error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        tracing::warn!(
            channel = %result.channel,
            method = result.method.as_str(),
            error = %error,
            "Notification failed"
        );
        metrics::counter!(
            "proxsave_notifications_failed_total",
            "channel" => result.channel.clone()
        )
        .increment(1);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("channels", &self.channels().collect::<Vec<_>>())
            .field("channel_timeout", &self.channel_timeout)
            .finish()
    }
}
