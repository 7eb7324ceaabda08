//! Email channel.
//!
//! Three transports share one channel:
//!
//! - `relay`: signed report posted to the cloud relay ([`RelayClient`])
//! - `sendmail`: MIME message piped to the local MTA ([`SendmailTransport`])
//! - `pmf`: MIME message piped to proxmox-mail-forward ([`Forwarder`])
//!
//! With `fallback_to_forwarder`, a failed relay attempt is retried once
//! through the forwarder; the relay error stays in the result.
//!
//! # Testability
//!
//! Subprocesses and pauses go through injected [`ProcessRunner`] and
//! [`Clock`] implementations (see [`EmailNotifier::with_process`]).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::forwarder::{self, Forwarder};
use super::mime::{self, Attachment, MailMessage};
use super::process::{Clock, ProcessRunner, TokioClock, TokioRunner, run_cancellable};
use super::relay::RelayClient;
use super::sendmail::{self, SendmailOptions, SendmailTransport};
use super::{DeliveryMethod, DeliveryResult, Notifier};
use crate::config::{CloudRelayConfig, EmailConfig, EmailMethod, resolve_env_vars};
use crate::error::{ConfigError, NotifyError};
use crate::report::{ProxmoxType, Report};
use crate::template::{RenderedReport, render_report};

const CHANNEL: &str = "email";
const RELAY_BACKEND: &str = "cloud-relay";
const ROOT_USERID: &str = "root@pam";

/// True when the local part of `address` is `root`, in any case.
pub fn is_root_recipient(address: &str) -> bool {
    let local = address.trim().split('@').next().unwrap_or_default();
    local.eq_ignore_ascii_case("root")
}

#[derive(Debug, Deserialize)]
struct UserEntry {
    userid: String,
    #[serde(default)]
    email: Option<String>,
}

/// Email of `root@pam` from a `user list --output-format json` document.
pub fn parse_root_email(json: &str) -> Result<String, NotifyError> {
    let users: Vec<UserEntry> = serde_json::from_str(json)
        .map_err(|e| NotifyError::Resolution(format!("cannot parse user list: {}", e)))?;
    let roots: Vec<&UserEntry> = users.iter().filter(|u| u.userid == ROOT_USERID).collect();
    match roots.as_slice() {
        [] => Err(NotifyError::Resolution(format!(
            "{} not found in user list",
            ROOT_USERID
        ))),
        [root] => root
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                NotifyError::Resolution(format!("{} has no email address", ROOT_USERID))
            }),
        _ => Err(NotifyError::Resolution(format!(
            "{} listed more than once",
            ROOT_USERID
        ))),
    }
}

pub struct EmailNotifier {
    method: EmailMethod,
    fallback_to_forwarder: bool,
    attach_log_file: bool,
    recipient: String,
    from: String,
    subject_override: String,
    relay: Option<RelayClient>,
    runner: Arc<dyn ProcessRunner>,
    sendmail_path: String,
    sendmail: SendmailTransport,
    forwarder: Forwarder,
}

impl EmailNotifier {
    /// Build the channel with the real process runner and clock.
    pub fn from_config(email: &EmailConfig, relay: &CloudRelayConfig) -> Result<Self, ConfigError> {
        Self::with_process(email, relay, Arc::new(TokioRunner), Arc::new(TokioClock))
    }

    /// Build the channel with injected subprocess and clock seams.
    ///
    /// The cloud relay client is only built (and its credentials only
    /// required) for the `relay` method.
    pub fn with_process(
        email: &EmailConfig,
        relay: &CloudRelayConfig,
        runner: Arc<dyn ProcessRunner>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidNotifier {
            name: CHANNEL.to_string(),
            message,
        };
        let method = email.method().map_err(invalid)?;
        let relay = match method {
            EmailMethod::Relay => Some(RelayClient::from_config(relay)?),
            _ => None,
        };
        let recipient =
            resolve_env_vars(&email.recipient).map_err(|e| invalid(format!("recipient: {}", e)))?;
        let from = resolve_env_vars(&email.from).map_err(|e| invalid(format!("from: {}", e)))?;

        let sendmail = SendmailTransport::new(
            SendmailOptions::from_config(email),
            runner.clone(),
            clock,
        );
        let forwarder = Forwarder::new(
            email.forwarder_candidates.iter().map(PathBuf::from).collect(),
            runner.clone(),
        );

        Ok(Self {
            method,
            fallback_to_forwarder: email.fallback_to_forwarder,
            attach_log_file: email.attach_log_file,
            recipient: recipient.trim().to_string(),
            from: from.trim().to_string(),
            subject_override: email.subject_override.clone(),
            relay,
            runner,
            sendmail_path: email.sendmail_path.clone(),
            sendmail,
            forwarder,
        })
    }

    pub fn method(&self) -> EmailMethod {
        self.method
    }

    /// Configured recipient, else the email of `root@pam`.
    pub async fn resolve_recipient(
        &self,
        flavor: ProxmoxType,
        cancel: &CancellationToken,
    ) -> Result<String, NotifyError> {
        if !self.recipient.is_empty() {
            return Ok(self.recipient.clone());
        }

        let program = match flavor {
            ProxmoxType::Pve => "pveum",
            ProxmoxType::Pbs => "proxmox-backup-manager",
            ProxmoxType::Unknown => {
                return Err(NotifyError::Resolution(
                    "no recipient configured and the Proxmox flavor is unknown".to_string(),
                ));
            }
        };
        let output = run_cancellable(
            &*self.runner,
            program,
            &["user", "list", "--output-format", "json"],
            None,
            cancel,
        )
        .await
        .map_err(|e| match e {
            NotifyError::Cancelled => e,
            other => NotifyError::Resolution(other.to_string()),
        })?;
        if !output.success() {
            return Err(NotifyError::Resolution(format!(
                "{} exited with status {}: {}",
                program,
                output.status_display(),
                output.stderr.trim()
            )));
        }
        let email = parse_root_email(&output.stdout)?;
        tracing::info!(recipient = %email, "Recipient auto-detected from {}", ROOT_USERID);
        Ok(email)
    }

    async fn deliver(
        &self,
        report: &Report,
        cancel: &CancellationToken,
    ) -> Result<DeliveryResult, NotifyError> {
        let rendered = render_report(report, Some(&self.subject_override))?;
        let recipient = self.resolve_recipient(report.proxmox_type, cancel).await;

        let result = match self.method {
            EmailMethod::Relay => self.send_relay(report, &rendered, recipient, cancel).await,
            EmailMethod::Sendmail => self.send_sendmail(report, &rendered, recipient, cancel).await,
            EmailMethod::Pmf => self.send_pmf(report, &rendered, recipient, cancel).await,
        };
        Ok(result)
    }

    async fn send_relay(
        &self,
        report: &Report,
        rendered: &RenderedReport,
        recipient: Result<String, NotifyError>,
        cancel: &CancellationToken,
    ) -> DeliveryResult {
        let recipient = match recipient {
            Ok(recipient) => recipient,
            Err(e) => {
                tracing::warn!(error = %e, "No recipient, email not sent");
                return DeliveryResult::failure(CHANNEL, DeliveryMethod::EmailRelay, e);
            }
        };

        let attempt = if is_root_recipient(&recipient) {
            Err(NotifyError::Resolution(format!(
                "recipient '{}' is not allowed for the cloud relay: configure a real mailbox",
                recipient
            )))
        } else if let Some(relay) = &self.relay {
            relay
                .send(&recipient, &rendered.subject, report, cancel)
                .await
                .map(|response| (response, relay.masked_url()))
        } else {
            Err(NotifyError::Config("cloud relay is not configured".to_string()))
        };

        let error = match attempt {
            Ok((response, url)) => {
                tracing::info!(recipient = %recipient, "Email accepted by relay");
                return DeliveryResult::success(CHANNEL, DeliveryMethod::EmailRelay)
                    .with_meta("email_backend", RELAY_BACKEND)
                    .with_meta("email_backend_path", url)
                    .with_meta("http_status", response.status.to_string())
                    .with_meta("recipient", recipient);
            }
            Err(e) => e,
        };

        if error == NotifyError::Cancelled || !self.fallback_to_forwarder {
            tracing::warn!(error = %error, "Cloud relay delivery failed");
            let mut result = DeliveryResult::failure(CHANNEL, DeliveryMethod::EmailRelay, error.clone())
                .with_meta("email_backend", RELAY_BACKEND)
                .with_meta("recipient", recipient);
            if let NotifyError::Protocol { status, .. } = error {
                result = result.with_meta("http_status", status.to_string());
            }
            return result;
        }

        tracing::warn!(error = %error, "Cloud relay failed, falling back to proxmox-mail-forward");
        let message = self.compose(&recipient, rendered, report).await;
        match self.forwarder.send(message.as_bytes(), cancel).await {
            Ok(path) => {
                let mut result = DeliveryResult::success(CHANNEL, DeliveryMethod::EmailPmfFallback)
                    .with_meta("email_backend", forwarder::BACKEND_NAME)
                    .with_meta("email_backend_path", path.display().to_string())
                    .with_meta("recipient", recipient);
                result.used_fallback = true;
                result.error = Some(error);
                result
            }
            Err(fallback_error) => {
                tracing::warn!(error = %fallback_error, "Fallback to proxmox-mail-forward failed");
                let mut result =
                    DeliveryResult::failure(CHANNEL, DeliveryMethod::EmailPmfFallback, fallback_error)
                        .with_meta("email_backend", forwarder::BACKEND_NAME)
                        .with_meta("recipient", recipient);
                result.used_fallback = true;
                result
            }
        }
    }

    async fn send_sendmail(
        &self,
        report: &Report,
        rendered: &RenderedReport,
        recipient: Result<String, NotifyError>,
        cancel: &CancellationToken,
    ) -> DeliveryResult {
        let recipient = match recipient {
            Ok(recipient) => recipient,
            Err(e) => {
                tracing::warn!(error = %e, "No recipient, email not sent");
                return DeliveryResult::failure(CHANNEL, DeliveryMethod::EmailSendmail, e);
            }
        };

        let message = self.compose(&recipient, rendered, report).await;
        match self.sendmail.send(message.as_bytes(), &recipient, cancel).await {
            Ok(outcome) => {
                let mut result = DeliveryResult::success(CHANNEL, DeliveryMethod::EmailSendmail)
                    .with_meta("email_backend", outcome.backend)
                    .with_meta("email_backend_path", outcome.backend_path.clone())
                    .with_meta("recipient", recipient);
                if let Some(queue_id) = &outcome.queue_id {
                    result = result.with_meta("mail_queue_id", queue_id.clone());
                }
                if let Some(status) = outcome.log_status {
                    result = result.with_meta("mail_log_status", status.as_str());
                }
                if let Err(e) = outcome.verdict() {
                    result.success = false;
                    result.error = Some(e);
                }
                result
            }
            Err(e) => {
                tracing::warn!(error = %e, "sendmail delivery failed");
                DeliveryResult::failure(CHANNEL, DeliveryMethod::EmailSendmail, e)
                    .with_meta("email_backend", sendmail::BACKEND_NAME)
                    .with_meta("email_backend_path", self.sendmail_path.clone())
                    .with_meta("recipient", recipient)
            }
        }
    }

    async fn send_pmf(
        &self,
        report: &Report,
        rendered: &RenderedReport,
        recipient: Result<String, NotifyError>,
        cancel: &CancellationToken,
    ) -> DeliveryResult {
        // the forwarder routes by itself, the recipient only fills the header
        let recipient = match recipient {
            Ok(recipient) => recipient,
            Err(NotifyError::Cancelled) => {
                return DeliveryResult::failure(CHANNEL, DeliveryMethod::EmailPmf, NotifyError::Cancelled);
            }
            Err(e) => {
                tracing::debug!(error = %e, "No recipient, forwarder will route the message");
                String::new()
            }
        };

        let message = self.compose(&recipient, rendered, report).await;
        let result = match self.forwarder.send(message.as_bytes(), cancel).await {
            Ok(path) => DeliveryResult::success(CHANNEL, DeliveryMethod::EmailPmf)
                .with_meta("email_backend", forwarder::BACKEND_NAME)
                .with_meta("email_backend_path", path.display().to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "proxmox-mail-forward delivery failed");
                DeliveryResult::failure(CHANNEL, DeliveryMethod::EmailPmf, e)
                    .with_meta("email_backend", forwarder::BACKEND_NAME)
            }
        };
        if recipient.is_empty() {
            result
        } else {
            result.with_meta("recipient", recipient)
        }
    }

    /// Compose the MIME message, attaching the log file when asked and readable.
    async fn compose(&self, to: &str, rendered: &RenderedReport, report: &Report) -> String {
        let log_file = report.issues.log_file.trim();
        let attachment = if self.attach_log_file && !log_file.is_empty() {
            match Attachment::load(Path::new(log_file)).await {
                Ok(attachment) => Some(attachment),
                Err(reason) => {
                    tracing::warn!(reason = %reason, "Log file not attached");
                    None
                }
            }
        } else {
            None
        };

        mime::compose(&MailMessage {
            to,
            from: &self.from,
            subject: &rendered.subject,
            text: &rendered.text,
            html: &rendered.html,
            attachment,
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        CHANNEL
    }

    fn notifier_type(&self) -> &str {
        CHANNEL
    }

    fn primary_method(&self) -> DeliveryMethod {
        match self.method {
            EmailMethod::Relay => DeliveryMethod::EmailRelay,
            EmailMethod::Sendmail => DeliveryMethod::EmailSendmail,
            EmailMethod::Pmf => DeliveryMethod::EmailPmf,
        }
    }

    async fn send(
        &self,
        report: &Report,
        cancel: &CancellationToken,
    ) -> Result<DeliveryResult, NotifyError> {
        let span = tracing::info_span!("send_email", channel = CHANNEL, method = %self.method);
        self.deliver(report, cancel).instrument(span).await
    }
}

impl std::fmt::Debug for EmailNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailNotifier")
            .field("method", &self.method)
            .field("fallback_to_forwarder", &self.fallback_to_forwarder)
            .field("recipient", &self.recipient)
            .field("relay", &self.relay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::process::testing::ScriptedRunner;
    use crate::notify::process::{NoopClock, ProcessOutput};
    use crate::report::fixtures::sample_report;

    const USER_LIST: &str = r#"[
        {"userid":"backup@pve","email":"ops@example.com"},
        {"userid":"root@pam","email":" admin@example.com ","enable":1}
    ]"#;

    fn email_config(method: &str) -> EmailConfig {
        EmailConfig {
            enabled: true,
            delivery_method: method.to_string(),
            forwarder_candidates: vec!["/nonexistent/proxsave/proxmox-mail-forward".to_string()],
            ..EmailConfig::default()
        }
    }

    fn notifier(config: &EmailConfig, runner: Arc<ScriptedRunner>) -> EmailNotifier {
        EmailNotifier::with_process(config, &CloudRelayConfig::default(), runner, Arc::new(NoopClock))
            .unwrap()
    }

    #[test]
    fn root_recipient_detection() {
        assert!(is_root_recipient("root@anything"));
        assert!(is_root_recipient("ROOT@example.com"));
        assert!(is_root_recipient("root"));
        assert!(!is_root_recipient("rooted@example.com"));
        assert!(!is_root_recipient("admin@root.example.com"));
    }

    #[test]
    fn root_email_from_user_list() {
        assert_eq!(parse_root_email(USER_LIST).unwrap(), "admin@example.com");

        let err = parse_root_email(r#"[{"userid":"root@pam"}]"#).unwrap_err();
        assert!(err.to_string().contains("no email"));
        let err = parse_root_email(r#"[{"userid":"root@pam","email":""}]"#).unwrap_err();
        assert!(err.to_string().contains("no email"));
        let err = parse_root_email("[]").unwrap_err();
        assert!(err.to_string().contains("not found"));
        let err = parse_root_email(
            r#"[{"userid":"root@pam","email":"a@x"},{"userid":"root@pam","email":"b@x"}]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
        assert!(matches!(parse_root_email("not json"), Err(NotifyError::Resolution(_))));
    }

    #[test]
    fn unknown_method_is_config_error() {
        let err = EmailNotifier::from_config(&email_config("smtp"), &CloudRelayConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("unknown delivery_method 'smtp'"));
    }

    #[test]
    fn relay_method_requires_relay_credentials() {
        let err = EmailNotifier::from_config(&email_config("relay"), &CloudRelayConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("cloud_relay"));
        assert!(EmailNotifier::from_config(&email_config("sendmail"), &CloudRelayConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn recipient_configured_wins() {
        let mut config = email_config("sendmail");
        config.recipient = "  ops@example.com ".to_string();
        let runner = Arc::new(ScriptedRunner::new());
        let notifier = notifier(&config, runner.clone());
        let recipient = notifier
            .resolve_recipient(ProxmoxType::Pve, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(recipient, "ops@example.com");
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn recipient_auto_detect_per_flavor() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("pveum", ProcessOutput::ok(USER_LIST))
                .on("proxmox-backup-manager", ProcessOutput::ok(USER_LIST)),
        );
        let notifier = notifier(&email_config("sendmail"), runner.clone());
        let cancel = CancellationToken::new();

        for flavor in [ProxmoxType::Pve, ProxmoxType::Pbs] {
            let recipient = notifier.resolve_recipient(flavor, &cancel).await.unwrap();
            assert_eq!(recipient, "admin@example.com");
        }
        assert_eq!(
            runner.calls_to("pveum")[0].args,
            vec!["user", "list", "--output-format", "json"]
        );
        assert_eq!(runner.calls_to("proxmox-backup-manager").len(), 1);

        let err = notifier
            .resolve_recipient(ProxmoxType::Unknown, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Resolution(_)));
    }

    #[tokio::test]
    async fn sendmail_without_recipient_does_not_send() {
        let runner = Arc::new(ScriptedRunner::new().on("pveum", ProcessOutput::failed(1, "permission denied")));
        let notifier = notifier(&email_config("sendmail"), runner.clone());
        let result = notifier
            .send(&sample_report(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.method, DeliveryMethod::EmailSendmail);
        assert!(matches!(result.error, Some(NotifyError::Resolution(_))));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn pmf_proceeds_without_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let forwarder = dir.path().join("proxmox-mail-forward");
        std::fs::write(&forwarder, "#!/bin/sh\n").unwrap();
        let program = forwarder.to_string_lossy().into_owned();

        let mut config = email_config("pmf");
        config.forwarder_candidates = vec![program.clone()];
        let runner = Arc::new(ScriptedRunner::new().on(&program, ProcessOutput::ok("")));
        let notifier = notifier(&config, runner.clone());

        let result = notifier
            .send(&sample_report(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.method, DeliveryMethod::EmailPmf);
        assert_eq!(result.meta("email_backend"), Some("proxmox-mail-forward"));
        assert_eq!(result.meta("email_backend_path"), Some(program.as_str()));
        assert_eq!(result.meta("recipient"), None);

        let stdin = runner.calls_to(&program)[0].stdin.clone().unwrap();
        let message = String::from_utf8(stdin).unwrap();
        assert!(message.starts_with("To: root\n"));
    }

    #[tokio::test]
    async fn attachment_falls_back_when_log_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let forwarder = dir.path().join("proxmox-mail-forward");
        std::fs::write(&forwarder, "#!/bin/sh\n").unwrap();
        let program = forwarder.to_string_lossy().into_owned();

        let mut config = email_config("pmf");
        config.recipient = "admin@example.com".to_string();
        config.attach_log_file = true;
        config.forwarder_candidates = vec![program.clone()];
        let runner = Arc::new(ScriptedRunner::new().on(&program, ProcessOutput::ok("")));
        let notifier = notifier(&config, runner.clone());

        let mut report = sample_report();
        report.issues.log_file = "/nonexistent/proxsave/backup.log".to_string();
        let result = notifier.send(&report, &CancellationToken::new()).await.unwrap();
        assert!(result.success);
        let message = String::from_utf8(runner.calls_to(&program)[0].stdin.clone().unwrap()).unwrap();
        assert!(message.contains("multipart/alternative"));
        assert!(!message.contains("multipart/mixed"));

        let log = dir.path().join("backup.log");
        std::fs::write(&log, "backup started\n").unwrap();
        report.issues.log_file = log.to_string_lossy().into_owned();
        notifier.send(&report, &CancellationToken::new()).await.unwrap();
        let message = String::from_utf8(runner.calls_to(&program)[1].stdin.clone().unwrap()).unwrap();
        assert!(message.contains("multipart/mixed"));
        assert!(message.contains("filename=\"backup.log\""));
    }
}
