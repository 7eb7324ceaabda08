//! Integration tests for the proxsave-notify binary.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn run(args: &[&str], config: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_proxsave-notify"))
        .args(args)
        .arg("-c")
        .arg(config)
        .env_remove("LOG_FORMAT")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run proxsave-notify")
}

fn write_config(dir: &tempfile::TempDir, yaml: &str) -> PathBuf {
    let path = dir.path().join("notify.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

#[test]
fn validate_valid_config_exits_success() {
    let output = run(&["--validate"], &fixture_path("config_valid.yaml"));
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Configuration is valid"), "{}", stdout);
    assert!(
        stdout.contains("Channels: email, telegram, gotify, webhook"),
        "{}",
        stdout
    );
    assert!(stdout.contains("Email delivery: relay"), "{}", stdout);
    assert!(stdout.contains("Webhook endpoints: 2"), "{}", stdout);
}

#[test]
fn validate_minimal_config_with_env_reference() {
    let output = Command::new(env!("CARGO_BIN_EXE_proxsave-notify"))
        .args(["--validate", "-c"])
        .arg(fixture_path("config_minimal.yaml"))
        .env_remove("TEST_GOTIFY_TOKEN")
        .output()
        .expect("Failed to run proxsave-notify");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Channels: gotify"), "{}", stdout);
}

#[test]
fn validate_invalid_config_exits_failure() {
    let output = run(&["--validate"], &fixture_path("config_invalid.yaml"));
    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Configuration validation failed"), "{}", stderr);
    assert!(stderr.contains("bot_token"), "{}", stderr);
    assert!(!String::from_utf8_lossy(&output.stdout).contains("Configuration is valid"));
}

#[test]
fn validate_malformed_yaml_exits_failure() {
    let output = run(&["--validate"], &fixture_path("config_invalid_yaml.yaml"));
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to load configuration"));
}

#[test]
fn missing_config_file_exits_failure() {
    let output = run(&["--validate"], Path::new("/nonexistent/proxsave/notify.yaml"));
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn invalid_report_exits_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, "dispatch:\n  channel_timeout: 5s\n");
    let report = dir.path().join("report.json");
    std::fs::write(&report, "{ not json").unwrap();

    let output = run(&["--report", report.to_str().unwrap()], &config);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to load report"));
}

#[test]
fn no_enabled_channel_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, "dispatch:\n  channel_timeout: 5s\n");
    let report = fixture_path("report.json");

    let output = run(&["--report", report.to_str().unwrap()], &config);
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn report_is_dispatched_and_summarized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/message"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hooks/down"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        &dir,
        &format!(
            r#"
gotify:
  enabled: true
  server_url: {uri}
  token: AbCdEf123
webhooks:
  enabled: true
  max_retries: 0
  endpoints:
    - name: down
      url: {uri}/hooks/down
"#,
            uri = server.uri()
        ),
    );
    let report = fixture_path("report.json");

    let output = tokio::task::spawn_blocking(move || {
        run(&["--report", report.to_str().unwrap()], &config)
    })
    .await
    .unwrap();

    // Failed channels never change the exit code.
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2, "{}", stdout);
    assert_eq!(lines[0], "gotify: ok method=gotify");
    assert!(lines[1].starts_with("webhook: FAILED method=webhook error="), "{}", lines[1]);
    assert!(lines[1].contains("404"), "{}", lines[1]);
}
