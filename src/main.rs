//! proxsave-notify - Send a backup report to every configured channel.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use proxsave_notify::cli::{Cli, LogFormat};
use proxsave_notify::config::Config;
use proxsave_notify::{DeliveryResult, Dispatcher, Report};

/// Initialize the tracing subscriber with the specified log format.
///
/// `RUST_LOG` wins over the default level; `--verbose` lowers the default to
/// debug.
fn init_logging(format: LogFormat, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    match format {
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .flatten_event(true)
                .with_env_filter(filter)
                .init();
        }
    }
}

fn load_report(path: &Path) -> Result<Report> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read report {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("invalid report JSON in {}", path.display()))
}

/// `<channel>: ok|FAILED method=<tag> [fallback] [error]`
fn summary_line(result: &DeliveryResult) -> String {
    let mut line = format!(
        "{}: {} method={}",
        result.channel,
        if result.success { "ok" } else { "FAILED" },
        result.method
    );
    if result.used_fallback {
        line.push_str(" fallback");
    }
    if let Some(error) = &result.error {
        line.push_str(&format!(" error=\"{}\"", error));
    }
    line
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.verbose);

    info!(config_path = %cli.config.display(), "Loading configuration");
    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, path = %cli.config.display(), "Failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!(error = %e, "Configuration validation error");
        }
        error!(error_count = errors.len(), "Configuration validation failed");
        std::process::exit(1);
    }

    if cli.validate {
        let channels = config.enabled_channels();
        println!("Configuration is valid: {}", cli.config.display());
        println!(
            "  Channels: {}",
            if channels.is_empty() {
                "none".to_string()
            } else {
                channels.join(", ")
            }
        );
        if config.email.enabled {
            println!("  Email delivery: {}", config.email.delivery_method);
        }
        if config.webhooks.enabled {
            println!("  Webhook endpoints: {}", config.webhooks.endpoints.len());
        }
        println!("  Channel timeout: {:?}", config.dispatch.channel_timeout);
        return Ok(());
    }

    let Some(report_path) = cli.report.as_deref() else {
        error!("No report given (use --report)");
        std::process::exit(1);
    };
    let report = match load_report(report_path) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to load report");
            std::process::exit(1);
        }
    };

    let dispatcher = match Dispatcher::from_config(&config) {
        Ok(d) => d,
        Err(errors) => {
            for e in &errors {
                error!(error = %e, "Cannot build notification channel");
            }
            std::process::exit(1);
        }
    };
    if dispatcher.is_empty() {
        info!("No notification channel enabled");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let results = runtime.block_on(run(dispatcher, report));

    for result in &results {
        println!("{}", summary_line(result));
    }
    let failed = results.iter().filter(|r| !r.success).count();
    info!(channels = results.len(), failed, "Notifications finished");
    Ok(())
}

async fn run(dispatcher: Dispatcher, report: Report) -> Vec<DeliveryResult> {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c signal");
            return;
        }
        info!("Received interrupt, cancelling notifications");
        cancel_clone.cancel();
    });

    info!(
        hostname = %report.hostname,
        channels = dispatcher.len(),
        "Dispatching backup report"
    );
    dispatcher.dispatch(&report, &cancel).await
}
