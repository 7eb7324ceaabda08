//! Webhook payload shapes.
//!
//! Each endpoint receives exactly one shape, chosen by its format. Chat
//! formats (Discord, Slack, Teams) are built as JSON values since their block
//! structures are heterogeneous; the generic shape is a typed document whose
//! field order is stable for consumers that diff payloads.

use chrono::{Local, TimeZone};
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::WebhookFormat;
use crate::error::NotifyError;
use crate::report::{BackupStatus, LogCategory, Report, StorageTarget};
use crate::template::{BODY_DATE_FORMAT, compression_summary, or_na, render_subject};

/// Categories listed individually before the overflow line.
pub const MAX_CATEGORIES: usize = 5;

/// Discord rejects field values above 1024 characters.
const DISCORD_FIELD_CAP: usize = 1024;

/// Embed colour per status (Discord palette).
pub fn status_color(status: BackupStatus) -> u32 {
    match status {
        BackupStatus::Success => 3066993,
        BackupStatus::Warning => 16753920,
        BackupStatus::Failure => 15158332,
        BackupStatus::Unknown => 9807270,
    }
}

/// Same palette as [`status_color`], as `RRGGBB`.
pub fn status_color_hex(status: BackupStatus) -> String {
    format!("{:06X}", status_color(status))
}

/// Serialize the payload for `format`.
pub fn build(format: WebhookFormat, report: &Report) -> Result<Vec<u8>, NotifyError> {
    let encoded = match format {
        WebhookFormat::Discord => serde_json::to_vec(&discord(report)),
        WebhookFormat::Slack => serde_json::to_vec(&slack(report)),
        WebhookFormat::Teams => serde_json::to_vec(&teams(report)),
        WebhookFormat::Generic => serde_json::to_vec(&GenericPayload::from_report(report)),
    };
    encoded.map_err(|e| {
        NotifyError::Format(format!("cannot encode {} payload: {}", format.as_str(), e))
    })
}

/// Local timestamp of the run in RFC 3339.
///
/// Falls back to UTC when the local time does not exist (DST gap).
pub fn timestamp_iso(report: &Report) -> String {
    let naive = report.backup.timestamp;
    match Local.from_local_datetime(&naive).earliest() {
        Some(local) => local.to_rfc3339(),
        None => naive.and_utc().to_rfc3339(),
    }
}

fn storage_line(target: &StorageTarget) -> String {
    let status = target.effective_status();
    if target.enabled {
        format!("{} {} ({} backups)", status.emoji(), status.as_str(), target.count)
    } else {
        format!("{} {}", status.emoji(), status.as_str())
    }
}

fn category_line(category: &LogCategory) -> String {
    format!(
        "• [{}] {} ({})",
        category.kind.as_str(),
        category.label,
        category.count
    )
}

/// Top categories plus an overflow line when more exist.
fn category_lines(report: &Report) -> Vec<String> {
    let categories = report.issues.bounded_categories();
    let mut lines: Vec<String> = categories
        .iter()
        .take(MAX_CATEGORIES)
        .map(|c| category_line(c))
        .collect();
    if categories.len() > MAX_CATEGORIES {
        lines.push(format!(
            "… and {} more categories",
            categories.len() - MAX_CATEGORIES
        ));
    }
    lines
}

fn truncate_chars(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn files_summary(report: &Report) -> String {
    format!(
        "{} included, {} missing",
        report.backup.files_included, report.backup.files_missing
    )
}

// ============================================================
// Discord
// ============================================================

pub fn discord(report: &Report) -> Value {
    let status = report.status();
    let field = |name: &str, value: String, inline: bool| {
        json!({
            "name": name,
            "value": truncate_chars(&or_na(&value), DISCORD_FIELD_CAP),
            "inline": inline,
        })
    };

    let mut fields = vec![
        field("Status", format!("{} {}", status.emoji(), status.label()), true),
        field("Host", report.hostname.clone(), true),
        field("Type", report.proxmox_type.label().to_string(), true),
        field("Duration", report.backup.duration_human(), true),
        field("Size", report.backup.size_human.clone(), true),
        field("Files", files_summary(report), true),
        field("Compression", compression_summary(report), false),
    ];
    for (kind, target) in report.storage.iter() {
        fields.push(field(kind.label(), storage_line(target), true));
    }
    fields.push(field(
        "Issues",
        format!(
            "{} errors, {} warnings",
            report.issues.errors, report.issues.warnings
        ),
        false,
    ));
    let categories = category_lines(report);
    if !categories.is_empty() {
        fields.push(field("Log categories", categories.join("\n"), false));
    }

    json!({
        "embeds": [{
            "title": render_subject(report),
            "description": report.status_message(),
            "color": status_color(status),
            "fields": fields,
            "footer": { "text": footer(report) },
            "timestamp": timestamp_iso(report),
        }]
    })
}

fn footer(report: &Report) -> String {
    format!(
        "ProxSave v{} | exit code {}",
        or_na(&report.script_version),
        report.exit_code_display()
    )
}

// ============================================================
// Slack
// ============================================================

fn mrkdwn(label: &str, value: &str) -> Value {
    json!({ "type": "mrkdwn", "text": format!("*{}*\n{}", label, or_na(value)) })
}

pub fn slack(report: &Report) -> Value {
    let status = report.status();
    let date = report.backup.timestamp.format(BODY_DATE_FORMAT).to_string();

    let mut blocks = vec![
        json!({
            "type": "header",
            "text": { "type": "plain_text", "text": render_subject(report), "emoji": true },
        }),
        json!({
            "type": "section",
            "fields": [
                mrkdwn("Status", &format!("{} {}", status.emoji(), status.label())),
                mrkdwn("Host", &report.hostname),
                mrkdwn("Type", report.proxmox_type.label()),
                mrkdwn("Date", &date),
            ],
        }),
        json!({ "type": "divider" }),
        json!({
            "type": "section",
            "fields": [
                mrkdwn("Duration", &report.backup.duration_human()),
                mrkdwn("Size", &report.backup.size_human),
                mrkdwn("Compression", &compression_summary(report)),
                mrkdwn("Files", &files_summary(report)),
            ],
        }),
        json!({ "type": "divider" }),
        json!({
            "type": "section",
            "fields": report
                .storage
                .iter()
                .map(|(kind, target)| mrkdwn(kind.label(), &storage_line(target)))
                .collect::<Vec<_>>(),
        }),
    ];

    if report.issues.total() > 0 {
        let mut text = format!(
            "*Issues*: {} errors, {} warnings",
            report.issues.errors, report.issues.warnings
        );
        for line in category_lines(report) {
            text.push('\n');
            text.push_str(&line);
        }
        blocks.push(json!({ "type": "divider" }));
        blocks.push(json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": text },
        }));
    }

    blocks.push(json!({
        "type": "context",
        "elements": [{ "type": "mrkdwn", "text": footer(report) }],
    }));

    json!({ "text": render_subject(report), "blocks": blocks })
}

// ============================================================
// Teams
// ============================================================

pub fn teams(report: &Report) -> Value {
    let status = report.status();
    let fact = |title: &str, value: String| json!({ "title": title, "value": or_na(&value) });

    let mut facts = vec![
        fact("Hostname", report.hostname.clone()),
        fact("Status", format!("{} {}", status.emoji(), status.label())),
        fact(
            "Date",
            report.backup.timestamp.format(BODY_DATE_FORMAT).to_string(),
        ),
        fact("Duration", report.backup.duration_human()),
        fact("Size", report.backup.size_human.clone()),
        fact("Compression", compression_summary(report)),
        fact("Files", files_summary(report)),
    ];
    for (kind, target) in report.storage.iter() {
        facts.push(fact(&format!("{} Storage", kind.label()), storage_line(target)));
    }
    facts.push(fact("Errors", report.issues.errors.to_string()));
    facts.push(fact("Warnings", report.issues.warnings.to_string()));
    facts.push(fact("Exit Code", report.exit_code_display()));

    json!({
        "type": "message",
        "themeColor": status_color_hex(status),
        "attachments": [{
            "contentType": "application/vnd.microsoft.card.adaptive",
            "contentUrl": null,
            "content": {
                "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
                "type": "AdaptiveCard",
                "version": "1.5",
                "msteams": { "width": "Full" },
                "body": [
                    {
                        "type": "TextBlock",
                        "text": render_subject(report),
                        "weight": "Bolder",
                        "size": "Medium",
                        "wrap": true,
                    },
                    {
                        "type": "TextBlock",
                        "text": report.status_message(),
                        "wrap": true,
                        "isSubtle": true,
                    },
                    { "type": "FactSet", "facts": facts },
                ],
            },
        }],
    })
}

// ============================================================
// Generic
// ============================================================

#[derive(Debug, Clone, Serialize)]
pub struct GenericPayload {
    pub status: &'static str,
    pub status_message: String,
    pub status_emoji: &'static str,
    pub exit_code: Option<i32>,
    pub hostname: String,
    pub proxmox_type: &'static str,
    pub server_id: String,
    pub server_mac: String,
    pub script_version: String,
    pub timestamp: String,
    pub timestamp_iso: String,
    pub backup: GenericBackup,
    pub compression: GenericCompression,
    pub storage: GenericStorageSet,
    pub issues: GenericIssues,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_categories: Option<Vec<GenericCategory>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenericBackup {
    pub file_name: String,
    pub file_path: String,
    pub size_bytes: u64,
    pub size_human: String,
    pub duration_secs: u64,
    pub duration: String,
    pub files_included: u64,
    pub files_missing: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenericCompression {
    #[serde(rename = "type")]
    pub kind: String,
    pub level: i32,
    pub mode: String,
    pub ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenericStorage {
    pub status: &'static str,
    pub emoji: &'static str,
    pub path: String,
    pub count: u64,
    pub space: String,
    pub used: String,
    pub free: String,
    pub percent: String,
}

impl GenericStorage {
    fn from_target(target: &StorageTarget) -> Self {
        let status = target.effective_status();
        Self {
            status: status.as_str(),
            emoji: status.emoji(),
            path: target.path.clone(),
            count: target.count,
            space: target.space.clone(),
            used: target.used.clone(),
            free: target.free.clone(),
            percent: target.percent.clone(),
        }
    }
}

/// Local is always present; the other tiers only when enabled.
#[derive(Debug, Clone, Serialize)]
pub struct GenericStorageSet {
    pub local: GenericStorage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<GenericStorage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud: Option<GenericStorage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenericIssues {
    pub errors: u64,
    pub warnings: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenericCategory {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub count: u64,
    pub example: String,
}

impl GenericPayload {
    pub fn from_report(report: &Report) -> Self {
        let status = report.status();
        let optional = |target: &StorageTarget| {
            target.enabled.then(|| GenericStorage::from_target(target))
        };
        let categories: Vec<GenericCategory> = report
            .issues
            .bounded_categories()
            .into_iter()
            .map(|c| GenericCategory {
                label: c.label.clone(),
                kind: c.kind.as_str(),
                count: c.count,
                example: c.example.clone(),
            })
            .collect();
        let compression = &report.backup.compression;

        Self {
            status: status.as_str(),
            status_message: report.status_message().to_string(),
            status_emoji: status.emoji(),
            exit_code: report.exit_code,
            hostname: report.hostname.clone(),
            proxmox_type: report.proxmox_type.as_str(),
            server_id: report.server_id.clone(),
            server_mac: report.server_mac.clone(),
            script_version: report.script_version.clone(),
            timestamp: report.backup.timestamp.format(BODY_DATE_FORMAT).to_string(),
            timestamp_iso: timestamp_iso(report),
            backup: GenericBackup {
                file_name: report.backup.file_name.clone(),
                file_path: report.backup.file_path.clone(),
                size_bytes: report.backup.size_bytes,
                size_human: report.backup.size_human.clone(),
                duration_secs: report.backup.duration_secs,
                duration: report.backup.duration_human(),
                files_included: report.backup.files_included,
                files_missing: report.backup.files_missing,
            },
            compression: GenericCompression {
                kind: compression.kind.clone(),
                level: compression.level,
                mode: compression.mode.clone(),
                ratio: compression.ratio,
            },
            storage: GenericStorageSet {
                local: GenericStorage::from_target(&report.storage.local),
                secondary: optional(&report.storage.secondary),
                cloud: optional(&report.storage.cloud),
            },
            issues: GenericIssues {
                errors: report.issues.errors,
                warnings: report.issues.warnings,
                total: report.issues.total(),
            },
            log_categories: (!categories.is_empty()).then_some(categories),
        }
    }
}
