//! Sendmail transport.
//!
//! Hands the composed message to the local MTA and then tries to find out
//! what happened to it. A zero exit status of `sendmail` only means the
//! message was queued, so the transport walks three stages:
//!
//! ```text
//! preflight -> send -> verify
//! ```
//!
//! - **preflight** locates the binary, looks for an active MTA service, its
//!   configuration and Postfix `relayhost`, and records the queue depth.
//! - **send** pipes the message to `sendmail -t -oi` (`-v` in debug).
//! - **verify** waits briefly, finds the queue id (transcript or `mailq`)
//!   and classifies the latest mail log line mentioning it.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use super::process::{
    Clock, ProcessOutput, ProcessRunner, find_executable, pause, run_cancellable,
};
use crate::config::EmailConfig;
use crate::error::NotifyError;

/// Backend name reported in results.
pub const BACKEND_NAME: &str = "sendmail";

const MTA_SERVICES: [&str; 3] = ["postfix", "sendmail", "exim4"];
const VERIFY_DELAY: Duration = Duration::from_millis(500);
const LOG_TAIL_LINES: usize = 80;
const LOG_TAIL_BYTES: u64 = 64 * 1024;

static QUEUE_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"queued as ([A-Za-z0-9.-]+)").expect("valid regex"));

static QUEUE_RECORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{5,}[*!]?$").expect("valid regex"));

static TRANSCRIPT_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("relay", r"(?i)connecting to \S+ via relay"),
        ("direct", r"(?i)connecting to \S+ via (?:esmtp|smtp)\b"),
        ("recipient", r"(?i)recipient ok"),
        (
            "accepted",
            r"Sent \(OK id=[^)]+\)|Sent \(\S+ Message accepted for delivery\)|\S+ Message accepted for delivery",
        ),
        ("closing", r"(?i)closing connection"),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).expect("valid regex")))
    .collect()
});

/// Paths the transport reads or executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendmailOptions {
    pub sendmail_path: String,
    pub mailq_path: String,
    pub mail_log_paths: Vec<PathBuf>,
    pub mta_config_paths: Vec<PathBuf>,
}

impl SendmailOptions {
    pub fn from_config(config: &EmailConfig) -> Self {
        Self {
            sendmail_path: config.sendmail_path.clone(),
            mailq_path: config.mailq_path.clone(),
            mail_log_paths: config.mail_log_paths.iter().map(PathBuf::from).collect(),
            mta_config_paths: config.mta_config_paths.iter().map(PathBuf::from).collect(),
        }
    }
}

/// Delivery status read back from the mail log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailLogStatus {
    Sent,
    Deferred,
    Bounced,
    Expired,
    Rejected,
    Error,
    Unknown,
}

impl MailLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailLogStatus::Sent => "sent",
            MailLogStatus::Deferred => "deferred",
            MailLogStatus::Bounced => "bounced",
            MailLogStatus::Expired => "expired",
            MailLogStatus::Rejected => "rejected",
            MailLogStatus::Error => "error",
            MailLogStatus::Unknown => "unknown",
        }
    }

    /// Statuses that mean the message will not arrive.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            MailLogStatus::Bounced | MailLogStatus::Expired | MailLogStatus::Rejected
        )
    }

    /// Classify one mail log line; `None` when it carries no verdict.
    pub fn classify_line(line: &str) -> Option<Self> {
        let lower = line.to_lowercase();
        if lower.contains("status=sent") {
            Some(MailLogStatus::Sent)
        } else if lower.contains("status=deferred") {
            Some(MailLogStatus::Deferred)
        } else if lower.contains("status=bounced") || lower.contains("status=softbounce") {
            Some(MailLogStatus::Bounced)
        } else if lower.contains("status=expired") {
            Some(MailLogStatus::Expired)
        } else if lower.contains("status=rejected") || lower.contains(" rejected ") {
            Some(MailLogStatus::Rejected)
        } else if ["connection refused", "host not found", "no route to host", "timeout"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            Some(MailLogStatus::Error)
        } else {
            None
        }
    }
}

impl std::fmt::Display for MailLogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts gathered before sending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preflight {
    pub binary: PathBuf,
    pub active_mta: Option<&'static str>,
    pub config_file: Option<PathBuf>,
    pub relayhost: Option<String>,
    pub queue_depth: Option<usize>,
}

/// What the transport could establish about the handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendmailOutcome {
    pub queue_id: Option<String>,
    pub backend: &'static str,
    pub backend_path: String,
    pub log_status: Option<MailLogStatus>,
    pub log_line: Option<String>,
}

impl SendmailOutcome {
    /// Turn a failing mail log verdict into an error.
    pub fn verdict(&self) -> Result<(), NotifyError> {
        match (self.log_status, &self.log_line) {
            (Some(status), line) if status.is_failure() => Err(NotifyError::Verification(format!(
                "mail log reports status={} for queue id {}{}",
                status,
                self.queue_id.as_deref().unwrap_or("?"),
                line.as_deref()
                    .map(|l| format!(": {}", l.trim()))
                    .unwrap_or_default()
            ))),
            _ => Ok(()),
        }
    }
}

enum Stage {
    Preflight,
    Send(Preflight),
    Verify {
        preflight: Preflight,
        output: ProcessOutput,
    },
    Done(SendmailOutcome),
}

pub struct SendmailTransport {
    options: SendmailOptions,
    runner: Arc<dyn ProcessRunner>,
    clock: Arc<dyn Clock>,
}

impl SendmailTransport {
    pub fn new(
        options: SendmailOptions,
        runner: Arc<dyn ProcessRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            options,
            runner,
            clock,
        }
    }

    /// Pipe `message` to the local MTA and verify the handoff.
    ///
    /// # Returns
    ///
    /// * `Ok(SendmailOutcome)` - The MTA accepted the message; the outcome
    ///   carries whatever the queue and mail log revealed
    /// * `Err(NotifyError)` - Binary missing, non-zero exit or cancellation
    pub async fn send(
        &self,
        message: &[u8],
        recipient: &str,
        cancel: &CancellationToken,
    ) -> Result<SendmailOutcome, NotifyError> {
        let verbose = tracing::enabled!(tracing::Level::DEBUG);
        let mut stage = Stage::Preflight;
        loop {
            stage = match stage {
                Stage::Preflight => Stage::Send(self.preflight(cancel).await?),
                Stage::Send(preflight) => {
                    let output = self.submit(&preflight, message, verbose, cancel).await?;
                    Stage::Verify { preflight, output }
                }
                Stage::Verify { preflight, output } => Stage::Done(
                    self.verify(&preflight, &output, recipient, cancel)
                        .await?,
                ),
                Stage::Done(outcome) => return Ok(outcome),
            };
        }
    }

    async fn preflight(&self, cancel: &CancellationToken) -> Result<Preflight, NotifyError> {
        let binary = find_executable(&self.options.sendmail_path).ok_or_else(|| {
            NotifyError::Transport(format!(
                "sendmail binary not found at {}",
                self.options.sendmail_path
            ))
        })?;

        let active_mta = self.active_mta(cancel).await?;
        let config_file = first_existing(&self.options.mta_config_paths);
        let relayhost = match &config_file {
            Some(path) if path.file_name().is_some_and(|n| n == "main.cf") => {
                match tokio::fs::read_to_string(path).await {
                    Ok(content) => parse_relayhost(&content),
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "Cannot read Postfix configuration");
                        None
                    }
                }
            }
            _ => None,
        };
        let queue_depth = self.queue_listing(cancel).await?.as_deref().map(queue_depth);

        match active_mta {
            Some(service) => tracing::debug!(service, "Active MTA service found"),
            None => tracing::warn!("No active MTA service found (postfix, sendmail, exim4)"),
        }
        match (&config_file, &relayhost) {
            (Some(path), Some(relay)) => {
                tracing::info!(config = %path.display(), relayhost = %relay, "Local MTA relays through smarthost")
            }
            (Some(path), None) => {
                tracing::debug!(config = %path.display(), "Local MTA delivers directly")
            }
            (None, _) => tracing::warn!("No MTA configuration file found"),
        }

        Ok(Preflight {
            binary,
            active_mta,
            config_file,
            relayhost,
            queue_depth,
        })
    }

    async fn active_mta(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<&'static str>, NotifyError> {
        for service in MTA_SERVICES {
            match run_cancellable(
                &*self.runner,
                "systemctl",
                &["is-active", "--quiet", service],
                None,
                cancel,
            )
            .await
            {
                Ok(output) if output.success() => return Ok(Some(service)),
                Ok(_) => {}
                Err(NotifyError::Cancelled) => return Err(NotifyError::Cancelled),
                Err(e) => {
                    tracing::debug!(error = %e, "Cannot query init system");
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    /// Current `mailq` output, `None` when the queue can not be listed.
    async fn queue_listing(&self, cancel: &CancellationToken) -> Result<Option<String>, NotifyError> {
        match run_cancellable(&*self.runner, &self.options.mailq_path, &[], None, cancel).await {
            Ok(output) if output.success() || !output.stdout.trim().is_empty() => {
                Ok(Some(output.stdout))
            }
            Ok(output) => {
                tracing::debug!(status = %output.status_display(), "mailq failed");
                Ok(None)
            }
            Err(NotifyError::Cancelled) => Err(NotifyError::Cancelled),
            Err(e) => {
                tracing::debug!(error = %e, "mailq unavailable");
                Ok(None)
            }
        }
    }

    async fn submit(
        &self,
        preflight: &Preflight,
        message: &[u8],
        verbose: bool,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, NotifyError> {
        let mut args = vec!["-t", "-oi"];
        if verbose {
            args.push("-v");
        }
        let program = preflight.binary.to_string_lossy();
        tracing::debug!(binary = %program, args = ?args, bytes = message.len(), "Piping message to sendmail");

        let output = run_cancellable(&*self.runner, &program, &args, Some(message), cancel).await?;
        if !output.success() {
            let detail = [output.stderr.trim(), output.stdout.trim()]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or("no output");
            return Err(NotifyError::Transport(format!(
                "sendmail exited with status {}: {}",
                output.status_display(),
                detail
            )));
        }
        if output.stderr.to_lowercase().contains("warning") {
            tracing::warn!(stderr = %output.stderr.trim(), "sendmail reported a warning");
        }
        for (step, line) in transcript_highlights(&format!("{}\n{}", output.stdout, output.stderr)) {
            tracing::debug!(step, line = %line, "sendmail transcript");
        }
        tracing::info!("Message handed off to local MTA");
        Ok(output)
    }

    async fn verify(
        &self,
        preflight: &Preflight,
        output: &ProcessOutput,
        recipient: &str,
        cancel: &CancellationToken,
    ) -> Result<SendmailOutcome, NotifyError> {
        pause(&*self.clock, VERIFY_DELAY, cancel).await?;

        let listing = self.queue_listing(cancel).await?;
        if let (Some(before), Some(after)) = (preflight.queue_depth, listing.as_deref().map(queue_depth))
            && after > before
        {
            tracing::warn!(before, after, "Mail queue grew after send, message is waiting for delivery");
        }

        let mut queue_id = extract_queue_id(&format!("{}\n{}", output.stdout, output.stderr));
        if queue_id.is_none()
            && let Some(listing) = &listing
        {
            queue_id = find_queue_record(listing, recipient);
            if queue_id.is_some() {
                tracing::debug!("Queue id recovered from mail queue");
            }
        }

        let mut outcome = SendmailOutcome {
            queue_id: queue_id.clone(),
            backend: BACKEND_NAME,
            backend_path: self.options.sendmail_path.clone(),
            log_status: None,
            log_line: None,
        };
        let Some(queue_id) = queue_id else {
            tracing::warn!("No queue id found, delivery status can not be verified");
            return Ok(outcome);
        };
        tracing::info!(queue_id = %queue_id, "Message queued");

        let lines = self.mail_log_tail(cancel).await?;
        if let Some((status, line)) = classify_log(&lines, &queue_id) {
            match status {
                MailLogStatus::Sent => {
                    tracing::info!(queue_id = %queue_id, "Mail log reports status={}", status)
                }
                s if s.is_failure() => {
                    tracing::error!(queue_id = %queue_id, line = %line.trim(), "Mail log reports status={}", status)
                }
                _ => {
                    tracing::warn!(queue_id = %queue_id, line = %line.trim(), "Mail log reports status={}", status)
                }
            }
            outcome.log_status = Some(status);
            outcome.log_line = Some(line);
        } else {
            tracing::debug!(queue_id = %queue_id, "No mail log evidence yet");
        }
        Ok(outcome)
    }

    /// Last lines of the first existing mail log, else of the journal.
    async fn mail_log_tail(&self, cancel: &CancellationToken) -> Result<Vec<String>, NotifyError> {
        if let Some(path) = first_existing(&self.options.mail_log_paths) {
            match tail_file(&path, LOG_TAIL_LINES).await {
                Ok(lines) => return Ok(lines),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Cannot read mail log")
                }
            }
        }

        let count = LOG_TAIL_LINES.to_string();
        let mut args = Vec::with_capacity(MTA_SERVICES.len() * 2 + 4);
        for service in MTA_SERVICES {
            args.push("-u");
            args.push(service);
        }
        args.extend(["-n", count.as_str(), "--no-pager"]);
        match run_cancellable(&*self.runner, "journalctl", &args, None, cancel).await {
            Ok(output) if output.success() => {
                Ok(output.stdout.lines().map(str::to_string).collect())
            }
            Ok(_) => Ok(Vec::new()),
            Err(NotifyError::Cancelled) => Err(NotifyError::Cancelled),
            Err(e) => {
                tracing::debug!(error = %e, "Journal unavailable");
                Ok(Vec::new())
            }
        }
    }
}

impl std::fmt::Debug for SendmailTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendmailTransport")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn first_existing(paths: &[PathBuf]) -> Option<PathBuf> {
    paths.iter().find(|p| p.is_file()).cloned()
}

/// Effective Postfix `relayhost`; empty and `[]` mean none.
pub fn parse_relayhost(main_cf: &str) -> Option<String> {
    let mut relayhost = None;
    for line in main_cf.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() != "relayhost" {
            continue;
        }
        let value = value.trim();
        // later assignments override earlier ones
        relayhost = if value.is_empty() || value == "[]" {
            None
        } else {
            Some(value.to_string())
        };
    }
    relayhost
}

pub fn extract_queue_id(transcript: &str) -> Option<String> {
    QUEUE_ID_REGEX
        .captures(transcript)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Number of records in a `mailq` listing.
pub fn queue_depth(listing: &str) -> usize {
    if listing.to_lowercase().contains("queue is empty") {
        return 0;
    }
    listing
        .lines()
        .filter(|line| !line.starts_with(char::is_whitespace))
        .filter_map(|line| line.split_whitespace().next())
        .filter(|token| QUEUE_RECORD_REGEX.is_match(token))
        .count()
}

/// Id of the queue record addressed to `recipient`.
///
/// A record starts on an unindented line whose first token looks like a
/// queue id (a trailing `*` or `!` marks active/held entries) and ends at
/// the next blank line.
pub fn find_queue_record(listing: &str, recipient: &str) -> Option<String> {
    let recipient = recipient.trim().to_lowercase();
    if recipient.is_empty() {
        return None;
    }

    let mut current: Option<(String, bool)> = None;
    for line in listing.lines() {
        if line.trim().is_empty() {
            if let Some((id, true)) = current.take() {
                return Some(id);
            }
            continue;
        }
        let first = line.split_whitespace().next().unwrap_or_default();
        let mentions = line.to_lowercase().contains(&recipient);
        if !line.starts_with(char::is_whitespace) && QUEUE_RECORD_REGEX.is_match(first) {
            if let Some((id, true)) = current.take() {
                return Some(id);
            }
            let id = first.trim_end_matches(['*', '!']).to_string();
            current = Some((id, mentions));
        } else if let Some((_, found)) = current.as_mut() {
            *found |= mentions;
        }
    }
    current.and_then(|(id, found)| found.then_some(id))
}

/// Classify the most recent relevant line.
///
/// Lines mentioning `queue_id` are preferred; when none do, every line is
/// considered. Lines without a verdict yield `Unknown`.
pub fn classify_log(lines: &[String], queue_id: &str) -> Option<(MailLogStatus, String)> {
    let matching: Vec<&String> = lines.iter().filter(|l| l.contains(queue_id)).collect();
    let candidates: Vec<&String> = if matching.is_empty() {
        lines.iter().collect()
    } else {
        matching
    };
    candidates
        .iter()
        .rev()
        .find_map(|line| MailLogStatus::classify_line(line).map(|s| (s, line.to_string())))
        .or_else(|| {
            candidates
                .last()
                .map(|line| (MailLogStatus::Unknown, line.to_string()))
        })
}

/// First transcript line of each notable SMTP step.
pub fn transcript_highlights(transcript: &str) -> Vec<(&'static str, String)> {
    TRANSCRIPT_PATTERNS
        .iter()
        .filter_map(|(label, re)| {
            transcript
                .lines()
                .find(|line| re.is_match(line))
                .map(|line| (*label, line.trim().to_string()))
        })
        .collect()
}

/// Last `lines` lines of a file, reading at most the final 64 KiB.
pub async fn tail_file(path: &Path, lines: usize) -> std::io::Result<Vec<String>> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(LOG_TAIL_BYTES);
    file.seek(SeekFrom::Start(start)).await?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await?;

    let text = String::from_utf8_lossy(&buf);
    let mut all: Vec<&str> = text.lines().collect();
    if start > 0 && !all.is_empty() {
        // first line is cut
        all.remove(0);
    }
    let skip = all.len().saturating_sub(lines);
    Ok(all[skip..].iter().map(|l| l.to_string()).collect())
}
