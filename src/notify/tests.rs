//! Cross-channel tests: real channels driven through the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::process::testing::ScriptedRunner;
use super::process::{NoopClock, ProcessOutput};
use super::*;
use crate::config::Config;
use crate::error::NotifyError;
use crate::report::fixtures::sample_report;

fn config_for(server: &MockServer) -> Config {
    let yaml = format!(
        r#"
dispatch:
  channel_timeout: 10s
gotify:
  enabled: true
  server_url: {uri}
  token: gotify-app-token
webhooks:
  enabled: true
  max_retries: 0
  retry_delay: 0s
  rate_limit_delay: 0s
  endpoints:
    - name: ops
      url: {uri}/hooks/ops
      format: slack
    - name: audit
      url: {uri}/hooks/audit
      auth:
        type: bearer
        token: audit-bearer-token
"#,
        uri = server.uri()
    );
    Config::from_yaml(&yaml).unwrap()
}

#[tokio::test]
async fn dispatcher_drives_http_channels_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/message"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hooks/ops"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hooks/audit"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    assert!(config.validate().is_ok());
    let dispatcher = Dispatcher::from_config(&config).unwrap();
    let results = dispatcher
        .dispatch(&sample_report(), &CancellationToken::new())
        .await;

    assert_eq!(results.len(), 2);
    let gotify = &results[0];
    assert_eq!(gotify.channel, "gotify");
    assert!(gotify.success);
    assert!(gotify.duration > Duration::ZERO);

    let webhook = &results[1];
    assert_eq!(webhook.channel, "webhook");
    assert!(webhook.success);
    assert!(webhook.error.is_none());
    assert_eq!(webhook.meta("endpoints_total"), Some("2"));
    assert_eq!(webhook.meta("endpoint.ops"), Some("ok"));
    assert!(webhook.meta("endpoint.audit").unwrap().contains("403"));
}

#[tokio::test]
async fn secrets_stay_out_of_results() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::from_config(&config_for(&server)).unwrap();
    let results = dispatcher
        .dispatch(&sample_report(), &CancellationToken::new())
        .await;

    for result in &results {
        assert!(!result.success);
        let rendered = format!("{:?}", result);
        assert!(!rendered.contains("gotify-app-token"), "{}", rendered);
        assert!(!rendered.contains("audit-bearer-token"), "{}", rendered);
    }
    let debug = format!("{:?}", dispatcher);
    assert!(!debug.contains("gotify-app-token"));
}

#[tokio::test]
async fn email_forwarder_and_http_channels_run_side_by_side() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let forwarder = dir.path().join("proxmox-mail-forward");
    std::fs::write(&forwarder, "#!/bin/sh\n").unwrap();
    let program = forwarder.to_string_lossy().into_owned();

    let yaml = format!(
        r#"
email:
  enabled: true
  delivery_method: pmf
  forwarder_candidates: ["{}"]
"#,
        program
    );
    let config = Config::from_yaml(&yaml).unwrap();
    let runner = Arc::new(ScriptedRunner::new().on(&program, ProcessOutput::ok("")));
    let email = EmailNotifier::with_process(
        &config.email,
        &config.cloud_relay,
        runner.clone(),
        Arc::new(NoopClock),
    )
    .unwrap();

    let http = config_for(&server);
    let gotify = GotifyNotifier::from_config(&http.gotify).unwrap();
    let dispatcher = Dispatcher::new(
        vec![Arc::new(email), Arc::new(gotify)],
        Duration::from_secs(10),
    );

    let results = dispatcher
        .dispatch(&sample_report(), &CancellationToken::new())
        .await;
    assert_eq!(results[0].channel, "email");
    assert!(results[0].success, "{:?}", results[0].error);
    assert_eq!(results[0].method, DeliveryMethod::EmailPmf);
    assert!(results[1].success);

    let calls = runner.calls_to(&program);
    assert_eq!(calls.len(), 1);
    let stdin = String::from_utf8(calls[0].stdin.clone().unwrap()).unwrap();
    assert!(stdin.contains("To: root\n"));
}

#[tokio::test]
async fn cancelled_dispatch_reports_every_channel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::from_config(&config_for(&server)).unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let results = dispatcher.dispatch(&sample_report(), &cancel).await;
    assert_eq!(results.len(), 2);
    for result in results {
        assert!(!result.success);
        assert_eq!(result.error, Some(NotifyError::Cancelled));
    }
}

#[tokio::test]
async fn timed_out_webhook_stops_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
dispatch:
  channel_timeout: 100ms
webhooks:
  enabled: true
  max_retries: 5
  retry_delay: 150ms
  endpoints:
    - name: ops
      url: {}/hooks/ops
"#,
        server.uri()
    );
    let dispatcher = Dispatcher::from_config(&Config::from_yaml(&yaml).unwrap()).unwrap();
    let results = dispatcher
        .dispatch(&sample_report(), &CancellationToken::new())
        .await;
    assert_eq!(results[0].error, Some(NotifyError::Timeout(100)));

    let sent = server.received_requests().await.unwrap().len();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(server.received_requests().await.unwrap().len(), sent);
}

#[test]
fn method_descriptions_are_total() {
    for method in DeliveryMethod::ALL {
        let result = DeliveryResult::success("x", method);
        assert_eq!(result.method.describe(), method.describe());
        assert_eq!(result.method.to_string(), method.as_str());
    }
}
