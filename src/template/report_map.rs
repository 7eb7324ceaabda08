//! Structured report map.
//!
//! This document is what the cloud relay signs and forwards, so its shape and
//! key order are a compatibility contract with the server side. It is built
//! as plain serde structs rather than a free-form map: every field is always
//! present (optional tiers excepted) and serialization order is the
//! declaration order below.

use serde::Serialize;

use super::BODY_DATE_FORMAT;
use crate::report::{IssueKind, Report, StorageStatus, StorageTarget};

/// Colour of the log summary: red with errors, yellow with warnings, else green.
pub fn log_summary_color(errors: u64, warnings: u64) -> &'static str {
    if errors > 0 {
        "#dc3545"
    } else if warnings > 0 {
        "#ffc107"
    } else {
        "#28a745"
    }
}

/// Emoji for a cross-channel status token (`ok`, `sent`, `failed`...).
pub fn cross_talk_emoji(status: &str) -> &'static str {
    match status.trim().to_ascii_lowercase().as_str() {
        "ok" | "sent" | "success" => "✅",
        "warning" | "deferred" => "⚠️",
        "failed" | "failure" | "error" => "❌",
        "" | "disabled" => "➖",
        _ => "❓",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportMap {
    pub status: &'static str,
    pub status_message: String,
    pub status_color: &'static str,
    pub proxmox_type: &'static str,
    pub hostname: String,
    pub server_id: String,
    pub server_mac: String,
    pub backup_date: String,
    pub script_version: String,
    pub emojis: Emojis,
    pub backup: BackupTiers,
    pub storage: StorageUsage,
    pub metrics: Metrics,
    pub log_summary: LogSummary,
    pub paths: Paths,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Emojis {
    pub primary: &'static str,
    pub secondary: &'static str,
    pub cloud: &'static str,
    pub email: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStatus {
    pub status: &'static str,
    pub emoji: &'static str,
    pub count: u64,
}

impl TierStatus {
    fn from_target(target: &StorageTarget) -> Self {
        let status: StorageStatus = target.effective_status();
        Self {
            status: status.as_str(),
            emoji: status.emoji(),
            count: target.count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupTiers {
    pub primary: TierStatus,
    pub secondary: TierStatus,
    pub cloud: TierStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpaceUsage {
    pub space: String,
    pub used: String,
    pub free: String,
    pub percent: String,
    pub percent_num: f64,
}

impl SpaceUsage {
    fn from_target(target: &StorageTarget) -> Self {
        Self {
            space: target.space.clone(),
            used: target.used.clone(),
            free: target.free.clone(),
            percent: target.percent.clone(),
            percent_num: target.usage_percent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageUsage {
    pub local: SpaceUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<SpaceUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub backup_file_name: String,
    pub files_included: u64,
    pub file_missing: u64,
    pub backup_duration: String,
    pub backup_size: String,
    pub compression_type: String,
    pub compression_level: String,
    pub compression_mode: String,
    pub compression_ratio: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryEntry {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub count: u64,
    pub example: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogSummary {
    pub errors: u64,
    pub warnings: u64,
    pub total: u64,
    pub log_file: String,
    pub categories: Vec<CategoryEntry>,
    pub color: &'static str,
    pub has_categories: bool,
    pub has_entries: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paths {
    pub local: String,
    pub secondary: String,
    pub cloud: String,
    pub cloud_display: String,
    pub has_secondary: bool,
    pub has_cloud: bool,
}

impl ReportMap {
    /// Build the map from a report. Total: every report yields a map.
    pub fn from_report(report: &Report) -> Self {
        let status = report.status();
        let storage = &report.storage;
        let backup = &report.backup;
        let issues = &report.issues;

        let categories: Vec<CategoryEntry> = issues
            .bounded_categories()
            .into_iter()
            .map(|c| CategoryEntry {
                label: c.label.clone(),
                kind: c.kind,
                count: c.count,
                example: c.example.clone(),
            })
            .collect();

        let cloud_display = if storage.cloud.enabled && !storage.cloud.path.trim().is_empty() {
            storage.cloud.path.clone()
        } else {
            "disabled".to_string()
        };

        Self {
            status: status.as_str(),
            status_message: report.status_message().to_string(),
            status_color: status.color(),
            proxmox_type: report.proxmox_type.as_str(),
            hostname: report.hostname.clone(),
            server_id: report.server_id.clone(),
            server_mac: report.server_mac.clone(),
            backup_date: backup.timestamp.format(BODY_DATE_FORMAT).to_string(),
            script_version: report.script_version.clone(),
            emojis: Emojis {
                primary: storage.local.effective_status().emoji(),
                secondary: storage.secondary.effective_status().emoji(),
                cloud: storage.cloud.effective_status().emoji(),
                email: cross_talk_emoji(&report.email_status),
            },
            backup: BackupTiers {
                primary: TierStatus::from_target(&storage.local),
                secondary: TierStatus::from_target(&storage.secondary),
                cloud: TierStatus::from_target(&storage.cloud),
            },
            storage: StorageUsage {
                local: SpaceUsage::from_target(&storage.local),
                secondary: storage
                    .secondary
                    .enabled
                    .then(|| SpaceUsage::from_target(&storage.secondary)),
            },
            metrics: Metrics {
                backup_file_name: backup.file_name.clone(),
                files_included: backup.files_included,
                file_missing: backup.files_missing,
                backup_duration: backup.duration_human(),
                backup_size: backup.size_human.clone(),
                compression_type: backup.compression.kind.clone(),
                compression_level: backup.compression.level.to_string(),
                compression_mode: backup.compression.mode.clone(),
                compression_ratio: format!("{:.2}", backup.compression.ratio),
            },
            log_summary: LogSummary {
                errors: issues.errors,
                warnings: issues.warnings,
                total: issues.total(),
                log_file: issues.log_file.clone(),
                has_categories: !categories.is_empty(),
                categories,
                color: log_summary_color(issues.errors, issues.warnings),
                has_entries: issues.total() > 0,
            },
            paths: Paths {
                local: storage.local.path.clone(),
                secondary: storage.secondary.path.clone(),
                cloud: storage.cloud.path.clone(),
                cloud_display,
                has_secondary: storage.secondary.enabled,
                has_cloud: storage.cloud.enabled,
            },
            exit_code: report.exit_code,
        }
    }
}
