//! Backup report model.
//!
//! A [`Report`] is the immutable description of a finished backup run. It is
//! produced by the backup pipeline (or loaded from JSON by the CLI) and handed
//! to every notification channel unchanged.
//!
//! The overall status is never stored: it is derived from the exit code so the
//! two can not disagree.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Proxmox product the backup ran on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxmoxType {
    Pve,
    Pbs,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ProxmoxType {
    /// Lowercase tag (`pve`, `pbs`, `unknown`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxmoxType::Pve => "pve",
            ProxmoxType::Pbs => "pbs",
            ProxmoxType::Unknown => "unknown",
        }
    }

    /// Uppercase label used in subjects and headers.
    pub fn label(&self) -> &'static str {
        match self {
            ProxmoxType::Pve => "PVE",
            ProxmoxType::Pbs => "PBS",
            ProxmoxType::Unknown => "UNKNOWN",
        }
    }
}

/// Overall outcome of a backup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Success,
    Warning,
    Failure,
    /// Exit code not known (report built before the run finished).
    Unknown,
}

impl BackupStatus {
    /// Fixed exit code table: 0 is success, 1 is warning, anything else failure.
    pub fn from_exit_code(exit_code: Option<i32>) -> Self {
        match exit_code {
            Some(0) => BackupStatus::Success,
            Some(1) => BackupStatus::Warning,
            Some(_) => BackupStatus::Failure,
            None => BackupStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Success => "success",
            BackupStatus::Warning => "warning",
            BackupStatus::Failure => "failure",
            BackupStatus::Unknown => "unknown",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BackupStatus::Success => "SUCCESS",
            BackupStatus::Warning => "WARNING",
            BackupStatus::Failure => "FAILURE",
            BackupStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            BackupStatus::Success => "✅",
            BackupStatus::Warning => "⚠️",
            BackupStatus::Failure => "❌",
            BackupStatus::Unknown => "❓",
        }
    }

    /// Header background colour of the HTML report.
    pub fn color(&self) -> &'static str {
        match self {
            BackupStatus::Success => "#4CAF50",
            BackupStatus::Warning => "#FF9800",
            BackupStatus::Failure => "#F44336",
            BackupStatus::Unknown => "#9E9E9E",
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            BackupStatus::Success => "Backup completed successfully",
            BackupStatus::Warning => "Backup completed with warnings",
            BackupStatus::Failure => "Backup failed",
            BackupStatus::Unknown => "Backup status unknown",
        }
    }
}

/// Per-storage status token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageStatus {
    Ok,
    Warning,
    Error,
    #[default]
    Disabled,
    Skipped,
}

impl StorageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageStatus::Ok => "ok",
            StorageStatus::Warning => "warning",
            StorageStatus::Error => "error",
            StorageStatus::Disabled => "disabled",
            StorageStatus::Skipped => "skipped",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            StorageStatus::Ok => "✅",
            StorageStatus::Warning => "⚠️",
            StorageStatus::Error => "❌",
            StorageStatus::Disabled => "➖",
            StorageStatus::Skipped => "⏭️",
        }
    }
}

/// Which of the three storage tiers a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Local,
    Secondary,
    Cloud,
}

impl StorageKind {
    pub fn label(&self) -> &'static str {
        match self {
            StorageKind::Local => "Local",
            StorageKind::Secondary => "Secondary",
            StorageKind::Cloud => "Cloud",
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            StorageKind::Local => "local",
            StorageKind::Secondary => "secondary",
            StorageKind::Cloud => "cloud",
        }
    }
}

/// GFS retention counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Retention {
    pub policy: String,
    pub daily: u32,
    pub weekly: u32,
    pub monthly: u32,
    pub yearly: u32,
}

/// State of one storage tier after the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageTarget {
    pub enabled: bool,
    pub status: StorageStatus,
    pub path: String,
    pub summary: String,
    /// Number of backups kept on this tier.
    pub count: u64,
    pub space: String,
    pub used: String,
    pub free: String,
    pub percent: String,
    pub percent_num: f64,
    pub retention: Option<Retention>,
}

impl StorageTarget {
    /// Status as rendered: a disabled tier is always `disabled`.
    pub fn effective_status(&self) -> StorageStatus {
        if self.enabled {
            self.status
        } else {
            StorageStatus::Disabled
        }
    }

    /// Usage percentage clamped to `[0, 100]`.
    pub fn usage_percent(&self) -> f64 {
        if self.percent_num.is_nan() {
            0.0
        } else {
            self.percent_num.clamp(0.0, 100.0)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSet {
    pub local: StorageTarget,
    pub secondary: StorageTarget,
    pub cloud: StorageTarget,
}

impl StorageSet {
    /// All three tiers in render order.
    pub fn iter(&self) -> impl Iterator<Item = (StorageKind, &StorageTarget)> {
        [
            (StorageKind::Local, &self.local),
            (StorageKind::Secondary, &self.secondary),
            (StorageKind::Cloud, &self.cloud),
        ]
        .into_iter()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Compression {
    #[serde(rename = "type")]
    pub kind: String,
    pub level: i32,
    pub mode: String,
    /// Compression ratio in percent.
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupInfo {
    pub timestamp: NaiveDateTime,
    pub duration_secs: u64,
    pub file_path: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub size_human: String,
    pub compression: Compression,
    pub files_included: u64,
    pub files_missing: u64,
}

impl Default for BackupInfo {
    fn default() -> Self {
        Self {
            timestamp: NaiveDateTime::default(),
            duration_secs: 0,
            file_path: String::new(),
            file_name: String::new(),
            size_bytes: 0,
            size_human: String::new(),
            compression: Compression::default(),
            files_included: 0,
            files_missing: 0,
        }
    }
}

impl BackupInfo {
    /// Human readable duration (`1h 02m 03s`, `4m 05s`, `12s`).
    pub fn duration_human(&self) -> String {
        format_duration(self.duration_secs)
    }
}

/// Severity of a log category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "WARNING")]
    Warning,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::Error => "ERROR",
            IssueKind::Warning => "WARNING",
        }
    }
}

/// A group of similar log lines found in the backup log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogCategory {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub count: u64,
    #[serde(default)]
    pub example: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Issues {
    pub errors: u64,
    pub warnings: u64,
    pub log_file: String,
    /// Ordered by importance as produced by the log analyser.
    pub categories: Vec<LogCategory>,
}

impl Issues {
    pub fn total(&self) -> u64 {
        self.errors + self.warnings
    }

    /// Categories whose counts fit inside the totals, in input order.
    ///
    /// The analyser may over-count when one line matches several categories;
    /// categories that would push the sum past the totals are dropped.
    pub fn bounded_categories(&self) -> Vec<&LogCategory> {
        let mut remaining = self.total();
        let mut kept = Vec::with_capacity(self.categories.len());
        for category in &self.categories {
            if category.count > remaining {
                continue;
            }
            remaining -= category.count;
            kept.push(category);
        }
        kept
    }
}

/// Immutable input of every notification channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Report {
    pub hostname: String,
    pub proxmox_type: ProxmoxType,
    pub server_id: String,
    pub server_mac: String,
    pub script_version: String,
    pub exit_code: Option<i32>,
    /// Free text; a status-specific default is used when empty.
    pub status_message: String,
    pub backup: BackupInfo,
    pub storage: StorageSet,
    pub issues: Issues,
    /// Informational cross-talk: outcome of the email channel, if known.
    pub email_status: String,
    /// Informational cross-talk: outcome of the Telegram channel, if known.
    pub telegram_status: String,
}

impl Report {
    pub fn status(&self) -> BackupStatus {
        BackupStatus::from_exit_code(self.exit_code)
    }

    pub fn status_message(&self) -> &str {
        if self.status_message.trim().is_empty() {
            self.status().default_message()
        } else {
            &self.status_message
        }
    }

    /// Exit code as displayed (`N/A` when unknown).
    pub fn exit_code_display(&self) -> String {
        self.exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "N/A".to_string())
    }
}

/// Format a number of seconds as `1h 02m 03s`.
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_exit_code_table() {
        assert_eq!(BackupStatus::from_exit_code(Some(0)), BackupStatus::Success);
        assert_eq!(BackupStatus::from_exit_code(Some(1)), BackupStatus::Warning);
        assert_eq!(BackupStatus::from_exit_code(Some(2)), BackupStatus::Failure);
        assert_eq!(BackupStatus::from_exit_code(Some(-1)), BackupStatus::Failure);
        assert_eq!(BackupStatus::from_exit_code(None), BackupStatus::Unknown);
    }

    #[test]
    fn status_colors_and_emojis() {
        assert_eq!(BackupStatus::Success.color(), "#4CAF50");
        assert_eq!(BackupStatus::Warning.color(), "#FF9800");
        assert_eq!(BackupStatus::Failure.color(), "#F44336");
        assert_eq!(BackupStatus::Unknown.color(), "#9E9E9E");
        assert_eq!(BackupStatus::Unknown.emoji(), "❓");
    }

    #[test]
    fn disabled_storage_renders_as_disabled() {
        let target = StorageTarget {
            enabled: false,
            status: StorageStatus::Error,
            ..Default::default()
        };
        assert_eq!(target.effective_status(), StorageStatus::Disabled);
    }

    #[test]
    fn usage_percent_is_clamped() {
        let mut target = StorageTarget {
            percent_num: 130.0,
            ..Default::default()
        };
        assert_eq!(target.usage_percent(), 100.0);
        target.percent_num = -3.0;
        assert_eq!(target.usage_percent(), 0.0);
        target.percent_num = f64::NAN;
        assert_eq!(target.usage_percent(), 0.0);
    }

    #[test]
    fn default_status_message_when_empty() {
        let mut report = fixtures::sample_report();
        assert_eq!(report.status_message(), "Backup completed with warnings");
        report.status_message = "Custom".to_string();
        assert_eq!(report.status_message(), "Custom");
    }

    #[test]
    fn bounded_categories_never_exceed_totals() {
        let issues = Issues {
            errors: 1,
            warnings: 2,
            log_file: String::new(),
            categories: vec![
                LogCategory {
                    label: "a".to_string(),
                    kind: IssueKind::Error,
                    count: 2,
                    example: String::new(),
                },
                LogCategory {
                    label: "b".to_string(),
                    kind: IssueKind::Warning,
                    count: 5,
                    example: String::new(),
                },
                LogCategory {
                    label: "c".to_string(),
                    kind: IssueKind::Warning,
                    count: 1,
                    example: String::new(),
                },
            ],
        };
        let kept: Vec<_> = issues.bounded_categories().iter().map(|c| c.label.as_str()).collect();
        assert_eq!(kept, vec!["a", "c"]);
    }

    #[test]
    fn format_duration_variants() {
        assert_eq!(format_duration(12), "12s");
        assert_eq!(format_duration(245), "4m 05s");
        assert_eq!(format_duration(3723), "1h 02m 03s");
    }

    #[test]
    fn report_deserializes_with_defaults() {
        let json = r#"{
            "hostname": "pbs01",
            "proxmox_type": "pbs",
            "exit_code": 0,
            "backup": {"timestamp": "2026-10-19T02:30:00", "files_included": 10},
            "issues": {"categories": [{"label": "x", "type": "ERROR", "count": 1}]}
        }"#;
        let report: Report = serde_json::from_str(json).unwrap();
        assert_eq!(report.proxmox_type, ProxmoxType::Pbs);
        assert_eq!(report.status(), BackupStatus::Success);
        assert_eq!(report.backup.files_included, 10);
        assert!(!report.storage.local.enabled);
        assert_eq!(report.issues.categories[0].kind, IssueKind::Error);
    }

    #[test]
    fn unknown_proxmox_flavor_deserializes_as_unknown() {
        let report: Report = serde_json::from_str(r#"{"proxmox_type": "pmg"}"#).unwrap();
        assert_eq!(report.proxmox_type, ProxmoxType::Unknown);
    }
}
