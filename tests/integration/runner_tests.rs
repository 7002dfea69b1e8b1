//! End-to-end smoke runs through `runner::run`.

use serde_json::json;
use tokio_util::sync::CancellationToken;

use mcp_smoke::config::{ExpectConfig, StepConfig};
use mcp_smoke::jsonrpc::RequestId;
use mcp_smoke::report::StepStatus;
use mcp_smoke::runner;
use mcp_smoke::session::ShutdownMethod;

use super::fake_server::{smoke_config, CRASHING_SERVER, MCP_SERVER, REJECTING_SERVER};

fn enhance_step() -> StepConfig {
    StepConfig {
        name: Some("enhance prompt".into()),
        params: Some(json!({"name": "betterprompt", "arguments": {"prompt": "write a haiku"}})),
        expect: ExpectConfig {
            matches: Some(r"(?i)prompt engineer".into()),
            not_contains: vec!["\"isError\":true".into()],
            result_pointers: vec!["/content/0/text".into()],
            ..ExpectConfig::default()
        },
        ..StepConfig::request("tools/call")
    }
}

#[tokio::test]
async fn healthy_server_passes_every_step() {
    let mut config = smoke_config(MCP_SERVER);
    config.steps = vec![
        StepConfig {
            expect: ExpectConfig {
                contains: vec!["betterprompt".into()],
                ..ExpectConfig::default()
            },
            ..StepConfig::request("tools/list")
        },
        enhance_step(),
        StepConfig {
            notification: true,
            params: Some(json!({"requestId": 2, "reason": "smoke test"})),
            ..StepConfig::request("notifications/cancelled")
        },
        StepConfig::request("ping"),
    ];

    let report = runner::run(&config, None, CancellationToken::new()).await;

    assert!(report.passed(), "report: {report:#?}");
    assert!(report.failure.is_none());
    assert_eq!(
        report.handshake.as_ref().and_then(|h| h.server_name.as_deref()),
        Some("fake-server")
    );
    let statuses: Vec<&StepStatus> = report.steps.iter().map(|s| &s.status).collect();
    assert_eq!(
        statuses,
        vec![&StepStatus::Passed, &StepStatus::Passed, &StepStatus::Sent, &StepStatus::Passed]
    );
    assert_eq!(report.steps[1].name, "enhance prompt");
    assert_eq!(report.steps[0].notifications, 1);
    assert_eq!(
        report.exit.as_ref().map(|e| e.method),
        Some(ShutdownMethod::StdinClosed)
    );
    assert_eq!(report.passed_steps(), 4);
}

#[tokio::test]
async fn default_step_lists_tools() {
    let config = smoke_config(MCP_SERVER);

    let report = runner::run(&config, None, CancellationToken::new()).await;

    assert!(report.passed(), "report: {report:#?}");
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].method, "tools/list");
    // `initialize` takes id 1.
    assert_eq!(report.steps[0].id, Some(RequestId::Number(2)));
}

#[tokio::test]
async fn default_step_without_handshake_uses_id_one() {
    let mut config = smoke_config(MCP_SERVER);
    config.handshake.enabled = false;

    let report = runner::run(&config, None, CancellationToken::new()).await;

    assert!(report.passed(), "report: {report:#?}");
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].method, "tools/list");
    assert_eq!(report.steps[0].id, Some(RequestId::Number(1)));
}

#[tokio::test]
async fn failed_expectation_fails_the_run() {
    let mut config = smoke_config(MCP_SERVER);
    config.steps = vec![StepConfig {
        expect: ExpectConfig {
            contains: vec!["summarize".into()],
            ..ExpectConfig::default()
        },
        ..StepConfig::request("tools/list")
    }];

    let report = runner::run(&config, None, CancellationToken::new()).await;

    assert!(!report.passed());
    assert!(report.failure.is_none());
    assert_eq!(
        report.steps[0].status,
        StepStatus::Failed {
            reasons: vec!["response does not contain \"summarize\"".into()]
        }
    );
}

#[tokio::test]
async fn expected_error_response_passes() {
    let mut config = smoke_config(MCP_SERVER);
    config.steps = vec![StepConfig {
        expect: ExpectConfig {
            error_code: Some(-32601),
            ..ExpectConfig::default()
        },
        ..StepConfig::request("resources/list")
    }];

    let report = runner::run(&config, None, CancellationToken::new()).await;

    assert!(report.passed(), "report: {report:#?}");
}

#[tokio::test]
async fn missing_server_skips_all_steps() {
    let mut config = smoke_config(MCP_SERVER);
    config.server.command = "definitely-not-an-mcp-server-binary".into();
    config.steps.push(StepConfig::request("ping"));

    let report = runner::run(&config, None, CancellationToken::new()).await;

    assert!(!report.passed());
    assert!(report
        .failure
        .as_deref()
        .is_some_and(|f| f.starts_with("spawn: failed to spawn")));
    assert!(report.exit.is_none());
    assert!(report.steps.iter().all(|s| s.status
        == StepStatus::Skipped {
            reason: "server failed to start".into()
        }));
    assert_eq!(report.steps.len(), 2);
}

#[tokio::test]
async fn rejected_handshake_skips_steps_and_stops_server() {
    let config = smoke_config(REJECTING_SERVER);

    let report = runner::run(&config, None, CancellationToken::new()).await;

    assert!(!report.passed());
    assert_eq!(
        report.failure.as_deref(),
        Some("protocol: initialize rejected: Unsupported protocol version (-32602)")
    );
    assert!(report.handshake.is_none());
    assert!(matches!(
        &report.steps[0].status,
        StepStatus::Skipped { reason } if reason == "handshake failed"
    ));
    assert!(report.exit.is_some());
}

#[tokio::test]
async fn disabled_handshake_goes_straight_to_steps() {
    let mut config = smoke_config(MCP_SERVER);
    config.handshake.enabled = false;
    config.steps = vec![StepConfig::request("ping")];

    let report = runner::run(&config, None, CancellationToken::new()).await;

    assert!(report.passed(), "report: {report:#?}");
    assert!(report.handshake.is_none());
    assert!(!report.stderr_tail.iter().any(|l| l == "client initialized"));
}

#[tokio::test]
async fn server_exit_halts_remaining_steps() {
    let mut config = smoke_config(CRASHING_SERVER);
    config.steps = vec![StepConfig::request("tools/list"), StepConfig::request("ping")];

    let report = runner::run(&config, None, CancellationToken::new()).await;

    assert!(!report.passed());
    assert!(matches!(
        &report.steps[0].status,
        StepStatus::Errored { error } if error.starts_with("protocol:")
    ));
    assert_eq!(
        report.steps[1].status,
        StepStatus::Skipped {
            reason: "server stdout closed".into()
        }
    );
    assert!(report.stderr_tail.iter().any(|l| l == "fatal: out of cheese"));
}

#[tokio::test]
async fn cancellation_interrupts_the_run() {
    let config = smoke_config(MCP_SERVER);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = runner::run(&config, None, cancel).await;

    assert!(!report.passed());
    assert!(report
        .failure
        .as_deref()
        .is_some_and(|f| f.starts_with("interrupted:")));
    assert!(matches!(
        &report.steps[0].status,
        StepStatus::Skipped { .. }
    ));
}
