//! Report rendering.
//!
//! Turns a [`Report`] into the artifacts the channels share:
//!
//! - the subject line (email title, Gotify title, Discord/Slack headers)
//! - a plain text body ([`text`])
//! - a self-contained HTML document ([`html`])
//! - the structured report map signed for the cloud relay ([`report_map`])
//! - the compact Telegram summary ([`telegram`])
//!
//! Rendering is pure: the same report always yields the same bytes, which is
//! what makes the relay signature reproducible.

pub mod html;
pub mod report_map;
pub mod telegram;
pub mod text;

use crate::error::TemplateError;
use crate::report::Report;

pub use html::{render_html, usage_class};
pub use report_map::ReportMap;
pub use telegram::render_telegram;
pub use text::render_text;

/// Date format used in subjects (`YYYY-MM-DD HH:MM`).
pub const SUBJECT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Date format used in bodies and the report map (`YYYY-MM-DD HH:MM:SS`).
pub const BODY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Everything an email-like channel needs, rendered once per send.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedReport {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Render subject, text and HTML for a report.
///
/// A non-blank `subject_override` replaces the generated subject.
pub fn render_report(
    report: &Report,
    subject_override: Option<&str>,
) -> Result<RenderedReport, TemplateError> {
    let subject = match subject_override.map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => render_subject(report),
    };
    tracing::trace!(subject = %subject, "Rendering report bodies");
    Ok(RenderedReport {
        subject,
        text: render_text(report),
        html: render_html(report)?,
    })
}

/// `{emoji} {FLAVOR} Backup on {hostname} - {YYYY-MM-DD HH:MM}`
pub fn render_subject(report: &Report) -> String {
    format!(
        "{} {} Backup on {} - {}",
        report.status().emoji(),
        report.proxmox_type.label(),
        report.hostname,
        report.backup.timestamp.format(SUBJECT_DATE_FORMAT)
    )
}

/// Replace an empty (or whitespace-only) string with `N/A`.
pub fn or_na(value: &str) -> String {
    if value.trim().is_empty() {
        "N/A".to_string()
    } else {
        value.to_string()
    }
}

/// `{type} (level {N}, ratio {X.XX}%)`
pub fn compression_summary(report: &Report) -> String {
    let c = &report.backup.compression;
    format!("{} (level {}, ratio {:.2}%)", or_na(&c.kind), c.level, c.ratio)
}
