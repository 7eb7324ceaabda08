//! Self-contained HTML report with embedded CSS.
//!
//! Rendered through minijinja with HTML auto-escape so hostnames, paths and
//! log excerpts can not inject markup into the email.

use std::sync::LazyLock;

use minijinja::{AutoEscape, Environment};
use serde::Serialize;

use super::{BODY_DATE_FORMAT, compression_summary, or_na, render_subject};
use crate::error::TemplateError;
use crate::report::{BackupStatus, Report, StorageKind, StorageStatus};

const TEMPLATE_NAME: &str = "report.html";

/// Usage above this percentage is critical.
pub const USAGE_CRITICAL_PERCENT: f64 = 85.0;
/// Usage above this percentage is a warning.
pub const USAGE_WARNING_PERCENT: f64 = 70.0;

const GREEN: &str = "#4CAF50";
const ORANGE: &str = "#FF9800";
const RED: &str = "#F44336";

const REPORT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{{ title }}</title>
<style>
body { font-family: -apple-system, "Segoe UI", Roboto, Helvetica, Arial, sans-serif; background: #f4f6f8; color: #333; margin: 0; padding: 20px; }
.container { max-width: 760px; margin: 0 auto; background: #fff; border-radius: 8px; overflow: hidden; box-shadow: 0 2px 6px rgba(0,0,0,0.12); }
.header { color: #fff; padding: 24px; }
.header h1 { margin: 0 0 6px 0; font-size: 22px; }
.header p { margin: 2px 0; opacity: 0.95; }
.content { padding: 20px 24px; }
.sidebars { display: flex; gap: 12px; margin-bottom: 18px; }
.sidebar { flex: 1; border-left: 5px solid; background: #fafafa; padding: 10px 14px; border-radius: 4px; }
.sidebar h3 { margin: 0 0 8px 0; font-size: 15px; }
.sidebar p { margin: 3px 0; font-size: 13px; }
h2 { font-size: 17px; border-bottom: 1px solid #e0e0e0; padding-bottom: 6px; margin-top: 22px; }
table { width: 100%; border-collapse: collapse; font-size: 14px; }
td, th { padding: 6px 8px; border-bottom: 1px solid #f0f0f0; text-align: left; vertical-align: top; }
th { background: #f7f7f7; }
.usage { margin: 10px 0 14px 0; }
.usage-label { font-size: 14px; margin-bottom: 4px; }
.bar { background: #e9ecef; border-radius: 4px; height: 14px; overflow: hidden; }
.bar-fill { height: 14px; }
.bar-fill.normal { background: #4CAF50; }
.bar-fill.warning { background: #FF9800; }
.bar-fill.critical { background: #F44336; }
.recommendations { background: #fff8e1; border: 1px solid #ffe082; border-radius: 4px; padding: 10px 14px; }
.recommendations li { margin: 4px 0; }
.footer { background: #f7f7f7; color: #777; font-size: 12px; padding: 12px 24px; text-align: center; }
</style>
</head>
<body>
<div class="container">
<div class="header" style="background-color: {{ header_color }};">
<h1>{{ status_emoji }} {{ flavor }} Backup {{ status_label }}</h1>
<p>{{ hostname }}</p>
<p>{{ date }}</p>
<p>{{ status_message }}</p>
</div>
<div class="content">
<div class="sidebars">
<div class="sidebar" style="border-color: {{ paths_color }};">
<h3>Backup paths</h3>
{% for row in paths %}<p><strong>{{ row.label }}:</strong> {{ row.path }} ({{ row.status }})</p>
{% endfor %}</div>
<div class="sidebar" style="border-color: {{ summary_color }};">
<h3>Error summary</h3>
<p><strong>Errors:</strong> {{ errors }}</p>
<p><strong>Warnings:</strong> {{ warnings }}</p>
<p><strong>Total:</strong> {{ total }}</p>
<p><strong>Log file:</strong> {{ log_file }}</p>
</div>
</div>
<h2>Storage usage</h2>
{% for row in storage %}<div class="usage">
<div class="usage-label">{{ row.emoji }} <strong>{{ row.label }}</strong>: {{ row.used }} used of {{ row.space }}, {{ row.free }} free ({{ row.percent }})</div>
<div class="bar"><div class="bar-fill {{ row.bar_class }}" style="width: {{ row.width }}%;"></div></div>
</div>
{% endfor %}<h2>Backup details</h2>
<table>
{% for fact in details %}<tr><th>{{ fact.name }}</th><td>{{ fact.value }}</td></tr>
{% endfor %}</table>
{% if categories %}<h2>Issue details</h2>
<table>
<tr><th>Type</th><th>Category</th><th>Count</th><th>Example</th></tr>
{% for cat in categories %}<tr><td>{{ cat.kind }}</td><td>{{ cat.label }}</td><td>{{ cat.count }}</td><td>{{ cat.example }}</td></tr>
{% endfor %}</table>
{% endif %}{% if recommendations %}<h2>System recommendations</h2>
<div class="recommendations"><ul>
{% for item in recommendations %}<li>{{ item }}</li>
{% endfor %}</ul></div>
{% endif %}</div>
<div class="footer">Exit code {{ exit_code }} &middot; proxsave v{{ version }}</div>
</div>
</body>
</html>
"#;

static ENVIRONMENT: LazyLock<Result<Environment<'static>, String>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    env.add_template(TEMPLATE_NAME, REPORT_TEMPLATE)
        .map_err(|e| e.to_string())?;
    Ok(env)
});

#[derive(Debug, Serialize)]
struct HtmlView {
    title: String,
    header_color: &'static str,
    status_emoji: &'static str,
    status_label: &'static str,
    flavor: &'static str,
    hostname: String,
    date: String,
    status_message: String,
    paths_color: &'static str,
    paths: Vec<PathRow>,
    summary_color: &'static str,
    errors: u64,
    warnings: u64,
    total: u64,
    log_file: String,
    storage: Vec<StorageRow>,
    details: Vec<Fact>,
    categories: Vec<CategoryRow>,
    recommendations: Vec<String>,
    exit_code: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct PathRow {
    label: &'static str,
    path: String,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct StorageRow {
    label: &'static str,
    emoji: &'static str,
    used: String,
    free: String,
    space: String,
    percent: String,
    width: String,
    bar_class: &'static str,
}

#[derive(Debug, Serialize)]
struct Fact {
    name: &'static str,
    value: String,
}

#[derive(Debug, Serialize)]
struct CategoryRow {
    kind: &'static str,
    label: String,
    count: u64,
    example: String,
}

/// Usage bar class for a percentage: `critical` above 85, `warning` above 70.
pub fn usage_class(percent: f64) -> &'static str {
    if percent > USAGE_CRITICAL_PERCENT {
        "critical"
    } else if percent > USAGE_WARNING_PERCENT {
        "warning"
    } else {
        "normal"
    }
}

/// Colour of the *Backup paths* sidebar, driven by tier statuses.
fn paths_color(report: &Report) -> &'static str {
    let statuses: Vec<StorageStatus> = report
        .storage
        .iter()
        .map(|(_, target)| target.effective_status())
        .collect();
    if statuses.contains(&StorageStatus::Error) {
        RED
    } else if statuses.contains(&StorageStatus::Warning) {
        ORANGE
    } else {
        GREEN
    }
}

/// Colour of the *Error summary* sidebar, driven by issue counts.
fn summary_color(report: &Report) -> &'static str {
    if report.issues.errors > 0 {
        RED
    } else if report.issues.warnings > 0 {
        ORANGE
    } else {
        GREEN
    }
}

fn recommendations(report: &Report) -> Vec<String> {
    let mut out = Vec::new();
    let local = &report.storage.local;
    if local.usage_percent() > USAGE_CRITICAL_PERCENT {
        out.push(format!(
            "Local storage is {:.1}% full: free up space or tighten the retention policy.",
            local.usage_percent()
        ));
    }
    let secondary = &report.storage.secondary;
    if secondary.enabled && secondary.usage_percent() > USAGE_CRITICAL_PERCENT {
        out.push(format!(
            "Secondary storage is {:.1}% full: free up space or tighten the retention policy.",
            secondary.usage_percent()
        ));
    }
    out
}

fn build_view(report: &Report) -> HtmlView {
    let status: BackupStatus = report.status();
    let backup = &report.backup;

    let paths = report
        .storage
        .iter()
        .filter(|(kind, target)| *kind == StorageKind::Local || target.enabled)
        .map(|(kind, target)| PathRow {
            label: kind.label(),
            path: or_na(&target.path),
            status: target.effective_status().as_str(),
        })
        .collect();

    let storage = report
        .storage
        .iter()
        .filter(|(kind, target)| *kind == StorageKind::Local || target.enabled)
        .map(|(kind, target)| {
            let percent = target.usage_percent();
            StorageRow {
                label: kind.label(),
                emoji: target.effective_status().emoji(),
                used: or_na(&target.used),
                free: or_na(&target.free),
                space: or_na(&target.space),
                percent: or_na(&target.percent),
                width: format!("{:.1}", percent),
                bar_class: usage_class(percent),
            }
        })
        .collect();

    let details = vec![
        Fact {
            name: "File",
            value: or_na(&backup.file_name),
        },
        Fact {
            name: "Path",
            value: or_na(&backup.file_path),
        },
        Fact {
            name: "Size",
            value: or_na(&backup.size_human),
        },
        Fact {
            name: "Files included",
            value: backup.files_included.to_string(),
        },
        Fact {
            name: "Files missing",
            value: backup.files_missing.to_string(),
        },
        Fact {
            name: "Duration",
            value: backup.duration_human(),
        },
        Fact {
            name: "Compression",
            value: compression_summary(report),
        },
        Fact {
            name: "Compression mode",
            value: or_na(&backup.compression.mode),
        },
    ];

    let categories = report
        .issues
        .bounded_categories()
        .into_iter()
        .map(|c| CategoryRow {
            kind: c.kind.as_str(),
            label: or_na(&c.label),
            count: c.count,
            example: or_na(&c.example),
        })
        .collect();

    HtmlView {
        title: render_subject(report),
        header_color: status.color(),
        status_emoji: status.emoji(),
        status_label: status.label(),
        flavor: report.proxmox_type.label(),
        hostname: or_na(&report.hostname),
        date: backup.timestamp.format(BODY_DATE_FORMAT).to_string(),
        status_message: report.status_message().to_string(),
        paths_color: paths_color(report),
        paths,
        summary_color: summary_color(report),
        errors: report.issues.errors,
        warnings: report.issues.warnings,
        total: report.issues.total(),
        log_file: or_na(&report.issues.log_file),
        storage,
        details,
        categories,
        recommendations: recommendations(report),
        exit_code: report.exit_code_display(),
        version: or_na(&report.script_version),
    }
}

/// Render the HTML report document.
pub fn render_html(report: &Report) -> Result<String, TemplateError> {
    let env = ENVIRONMENT
        .as_ref()
        .map_err(|message| TemplateError::RenderFailed {
            message: message.clone(),
        })?;
    let template = env
        .get_template(TEMPLATE_NAME)
        .map_err(|_| TemplateError::NotFound {
            name: TEMPLATE_NAME.to_string(),
        })?;
    template
        .render(build_view(report))
        .map_err(|e| TemplateError::RenderFailed {
            message: e.to_string(),
        })
}
