//! Plain text report body.

use std::fmt::Write as _;

use super::{BODY_DATE_FORMAT, compression_summary, or_na};
use crate::report::{Report, StorageKind, StorageTarget};

const RULE: &str = "==================================================";
const SECTION_RULE: &str = "--------------------------------------------------";

/// Render the plain text body.
///
/// Section order is fixed: header, storage, backup details, issues, optional
/// issue details, trailer. Secondary and cloud storage lines only appear when
/// the tier is enabled.
pub fn render_text(report: &Report) -> String {
    let status = report.status();
    let mut out = String::with_capacity(2048);

    let _ = writeln!(
        out,
        "{} {} BACKUP {}",
        status.emoji(),
        report.proxmox_type.label(),
        status.label()
    );
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "Hostname: {}", or_na(&report.hostname));
    let _ = writeln!(
        out,
        "Date: {}",
        report.backup.timestamp.format(BODY_DATE_FORMAT)
    );
    let _ = writeln!(out, "Status: {}", report.status_message());

    section(&mut out, "STORAGE STATUS");
    for (kind, target) in report.storage.iter() {
        if kind != StorageKind::Local && !target.enabled {
            continue;
        }
        let _ = writeln!(out, "{}", storage_line(kind, target));
    }

    section(&mut out, "BACKUP DETAILS");
    let backup = &report.backup;
    let _ = writeln!(out, "File: {}", or_na(&backup.file_name));
    let _ = writeln!(out, "Size: {}", or_na(&backup.size_human));
    let _ = writeln!(out, "Files included: {}", backup.files_included);
    let _ = writeln!(out, "Files missing: {}", backup.files_missing);
    let _ = writeln!(out, "Duration: {}", backup.duration_human());
    let _ = writeln!(out, "Compression: {}", compression_summary(report));

    section(&mut out, "ISSUES");
    let issues = &report.issues;
    let _ = writeln!(out, "Errors: {}", issues.errors);
    let _ = writeln!(out, "Warnings: {}", issues.warnings);
    let _ = writeln!(out, "Total: {}", issues.total());
    let _ = writeln!(out, "Log file: {}", or_na(&issues.log_file));

    let categories = issues.bounded_categories();
    if !categories.is_empty() {
        section(&mut out, "ISSUE DETAILS");
        for category in categories {
            let _ = writeln!(
                out,
                "[{}] {} ({})",
                category.kind.as_str(),
                category.label,
                category.count
            );
            if !category.example.trim().is_empty() {
                let _ = writeln!(out, "    Example: {}", category.example.trim());
            }
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", SECTION_RULE);
    let _ = writeln!(out, "Exit code: {}", report.exit_code_display());
    let _ = write!(out, "proxsave v{}", or_na(&report.script_version));
    out.push('\n');
    out
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", title);
    let _ = writeln!(out, "{}", SECTION_RULE);
}

fn storage_line(kind: StorageKind, target: &StorageTarget) -> String {
    let status = target.effective_status();
    let mut line = format!(
        "{:<10} {} {}",
        format!("{}:", kind.label()),
        status.emoji(),
        status.as_str()
    );
    if !target.summary.trim().is_empty() {
        let _ = write!(line, " - {}", target.summary.trim());
    }
    if target.enabled && !target.free.trim().is_empty() {
        let _ = write!(
            line,
            " (free {}, {:.0}% used)",
            target.free.trim(),
            target.usage_percent()
        );
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::sample_report;

    #[test]
    fn sections_appear_in_order() {
        let text = render_text(&sample_report());
        let positions: Vec<usize> = [
            "PVE BACKUP WARNING",
            "Hostname: pve01",
            "Date: 2026-10-19 02:30:15",
            "STORAGE STATUS",
            "BACKUP DETAILS",
            "ISSUES",
            "ISSUE DETAILS",
            "Exit code: 1",
            "proxsave v0.9.0",
        ]
        .iter()
        .map(|needle| text.find(needle).unwrap_or_else(|| panic!("missing {needle}")))
        .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn disabled_tiers_are_omitted_except_local() {
        let mut report = sample_report();
        report.storage.local.enabled = false;
        let text = render_text(&report);
        assert!(text.contains("Local:"));
        assert!(text.contains("Secondary:"));
        assert!(!text.contains("Cloud:"));
        assert!(text.contains("➖ disabled"));
    }

    #[test]
    fn issue_details_skipped_without_categories() {
        let mut report = sample_report();
        report.issues.categories.clear();
        let text = render_text(&report);
        assert!(!text.contains("ISSUE DETAILS"));
    }

    #[test]
    fn storage_line_includes_free_space() {
        let report = sample_report();
        let line = storage_line(StorageKind::Local, &report.storage.local);
        assert_eq!(line, "Local:     ✅ ok - 7 backups (free 28 GiB, 72% used)");
    }

    #[test]
    fn details_lines() {
        let text = render_text(&sample_report());
        assert!(text.contains("Files missing: 2"));
        assert!(text.contains("Duration: 1h 02m 03s"));
        assert!(text.contains("Compression: zstd (level 6, ratio 42.50%)"));
        assert!(text.contains("[WARNING] File vanished during read (2)"));
        assert!(text.contains("    Example: file /etc/pve/.tmp vanished"));
    }
}
