//! Compact Telegram summary.

use std::fmt::Write as _;

use super::{SUBJECT_DATE_FORMAT, or_na};
use crate::report::Report;

/// Render the fixed-layout Telegram message.
///
/// Plain text, no parse mode: Telegram would otherwise reject messages whose
/// hostnames or paths contain Markdown control characters.
pub fn render_telegram(report: &Report) -> String {
    let status = report.status();
    let mut out = String::with_capacity(512);

    let _ = writeln!(
        out,
        "{} {} Backup {}",
        status.emoji(),
        report.proxmox_type.label(),
        status.label()
    );
    let _ = writeln!(out, "Host: {}", or_na(&report.hostname));
    let _ = writeln!(out, "{}", report.status_message());
    let _ = writeln!(out);

    let _ = writeln!(out, "Storage:");
    for (kind, target) in report.storage.iter() {
        let status = target.effective_status();
        if target.enabled {
            let _ = writeln!(
                out,
                "{} {}: {} ({} backups)",
                status.emoji(),
                kind.label(),
                status.as_str(),
                target.count
            );
        } else {
            let _ = writeln!(out, "{} {}: {}", status.emoji(), kind.label(), status.as_str());
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "Files: {} included, {} missing",
        report.backup.files_included, report.backup.files_missing
    );

    let free: Vec<String> = report
        .storage
        .iter()
        .filter(|(_, target)| target.enabled && !target.free.trim().is_empty())
        .map(|(kind, target)| format!("{} {}", kind.label(), target.free.trim()))
        .collect();
    if !free.is_empty() {
        let _ = writeln!(out, "Free space: {}", free.join(" | "));
    }

    let _ = writeln!(
        out,
        "Date: {}",
        report.backup.timestamp.format(SUBJECT_DATE_FORMAT)
    );
    let _ = writeln!(out, "Duration: {}", report.backup.duration_human());
    let _ = write!(out, "Exit code: {}", report.exit_code_display());
    out
}
