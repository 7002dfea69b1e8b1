//! Unit tests for scenario configuration parsing and validation.

use std::io::Write;
use std::time::Duration;

use serde_json::json;

use mcp_smoke::config::{SmokeConfig, DEFAULT_METHOD, DEFAULT_PROTOCOL_VERSION};
use mcp_smoke::AppError;

const FULL_TOML: &str = r#"
transcript = "logs/run.jsonl"

[server]
command = "node"
args = ["./dist/index.js"]
cwd = "/srv/better-prompt"
inherit_env = false

[server.env]
NODE_ENV = "production"

[startup]
delay_ms = 500
ready_pattern = "running on stdio"
timeout_ms = 3000

[timeouts]
request_ms = 1500
shutdown_ms = 800

[handshake]
protocol_version = "2024-11-05"
client_name = "ci-smoke"

[[steps]]
method = "tools/list"
[steps.expect]
contains = ["betterprompt"]
result_pointers = ["/tools/0/name"]

[[steps]]
name = "enhance"
method = "tools/call"
timeout_ms = 9000
params = { name = "betterprompt", arguments = { prompt = "write a haiku" } }
[steps.expect]
not_contains = ["\"isError\":true"]
matches = "(?i)haiku"

[[steps]]
method = "notifications/cancelled"
notification = true
params = { requestId = 2 }
"#;

fn config_error(raw: &str) -> String {
    match SmokeConfig::from_toml_str(raw) {
        Err(AppError::Config(msg)) => msg,
        other => panic!("expected Err(AppError::Config), got: {other:?}"),
    }
}

fn cmd(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_owned()).collect()
}

#[test]
fn full_scenario_parses() {
    let config = SmokeConfig::from_toml_str(FULL_TOML).expect("valid config");

    assert_eq!(config.server.command, "node");
    assert_eq!(config.server.args, vec!["./dist/index.js"]);
    assert!(!config.server.inherit_env);
    assert_eq!(config.server.env.get("NODE_ENV").map(String::as_str), Some("production"));
    assert_eq!(config.startup.ready_pattern.as_deref(), Some("running on stdio"));
    assert_eq!(config.timeouts.request_ms, 1500);
    assert_eq!(config.handshake.protocol_version, "2024-11-05");
    assert_eq!(config.handshake.client_name, "ci-smoke");
    assert_eq!(config.transcript.as_deref(), Some(std::path::Path::new("logs/run.jsonl")));

    assert_eq!(config.steps.len(), 3);
    assert_eq!(config.steps[0].label(), "tools/list");
    assert_eq!(config.steps[0].expect.contains, vec!["betterprompt"]);
    assert_eq!(config.steps[1].label(), "enhance");
    assert_eq!(
        config.steps[1].params,
        Some(json!({"name": "betterprompt", "arguments": {"prompt": "write a haiku"}}))
    );
    assert!(config.steps[2].notification);
}

#[test]
fn minimal_scenario_gets_defaults() {
    let config = SmokeConfig::from_toml_str("[server]\ncommand = \"./server\"\n").expect("valid");

    assert!(config.server.args.is_empty());
    assert!(config.server.inherit_env);
    assert_eq!(config.startup.delay_ms, 2000);
    assert!(config.startup.ready_pattern.is_none());
    assert_eq!(config.timeouts.request_ms, 5000);
    assert_eq!(config.timeouts.shutdown_ms, 5000);
    assert!(config.handshake.enabled);
    assert_eq!(config.handshake.protocol_version, DEFAULT_PROTOCOL_VERSION);
    assert_eq!(config.handshake.client_name, "mcp-smoke");

    assert_eq!(config.steps.len(), 1);
    assert_eq!(config.steps[0].method, DEFAULT_METHOD);
    assert_eq!(config.steps[0].params, Some(json!({})));
}

#[test]
fn step_timeout_overrides_request_timeout() {
    let config = SmokeConfig::from_toml_str(FULL_TOML).expect("valid config");

    assert_eq!(config.request_timeout(&config.steps[0]), Duration::from_millis(1500));
    assert_eq!(config.request_timeout(&config.steps[1]), Duration::from_millis(9000));
    assert_eq!(config.shutdown_grace(), Duration::from_millis(800));
}

#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(FULL_TOML.as_bytes()).expect("write");

    let config = SmokeConfig::load_from_path(file.path()).expect("load");
    assert_eq!(config.steps.len(), 3);
}

#[test]
fn load_from_missing_path_is_config_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = SmokeConfig::load_from_path(dir.path().join("absent.toml")).expect_err("missing");

    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("failed to read config")));
}

#[test]
fn unparsable_toml_is_config_error() {
    assert!(config_error("[server\ncommand = 1").starts_with("invalid config:"));
    assert!(config_error("[startup]\ndelay_ms = 5\n").starts_with("invalid config:"));
}

#[test]
fn validation_rejects_bad_values() {
    let cases = [
        ("[server]\ncommand = \"  \"\n", "server.command"),
        ("[server]\ncommand = \"x\"\n[timeouts]\nrequest_ms = 0\n", "request_ms"),
        ("[server]\ncommand = \"x\"\n[timeouts]\nshutdown_ms = 0\n", "shutdown_ms"),
        ("[server]\ncommand = \"x\"\n[startup]\nready_pattern = \"(\"\n", "startup.ready_pattern"),
        (
            "[server]\ncommand = \"x\"\n[startup]\nready_pattern = \"ok\"\ntimeout_ms = 0\n",
            "startup.timeout_ms",
        ),
        ("[server]\ncommand = \"x\"\n[handshake]\nprotocol_version = \"\"\n", "protocol_version"),
        ("[server]\ncommand = \"x\"\n[[steps]]\nmethod = \"\"\n", "step 1: method"),
        (
            "[server]\ncommand = \"x\"\n[[steps]]\nmethod = \"ping\"\ntimeout_ms = 0\n",
            "step 1 (ping): timeout_ms",
        ),
        (
            "[server]\ncommand = \"x\"\n[[steps]]\nmethod = \"n\"\nnotification = true\n[steps.expect]\ncontains = [\"x\"]\n",
            "remove `expect`",
        ),
        (
            "[server]\ncommand = \"x\"\n[[steps]]\nmethod = \"ping\"\n[steps.expect]\nmatches = \"[\"\n",
            "step 1 expect.matches",
        ),
        (
            "[server]\ncommand = \"x\"\n[[steps]]\nmethod = \"ping\"\n[steps.expect]\nresult_pointers = [\"tools\"]\n",
            "must start with '/'",
        ),
    ];

    for (raw, needle) in cases {
        let msg = config_error(raw);
        assert!(msg.contains(needle), "expected {needle:?} in {msg:?}");
    }
}

#[test]
fn disabled_handshake_skips_protocol_version_check() {
    let raw = "[server]\ncommand = \"x\"\n[handshake]\nenabled = false\nprotocol_version = \"\"\n";
    assert!(SmokeConfig::from_toml_str(raw).is_ok());
}

#[test]
fn for_command_builds_quick_scenario() {
    let config = SmokeConfig::for_command(&cmd(&["node", "index.js", "--stdio"]), &[])
        .expect("valid");

    assert_eq!(config.server.command, "node");
    assert_eq!(config.server.args, vec!["index.js", "--stdio"]);
    assert_eq!(config.server.display_command(), "node index.js --stdio");
    assert_eq!(config.steps.len(), 1);
    assert_eq!(config.steps[0].method, DEFAULT_METHOD);
}

#[test]
fn for_command_uses_given_methods() {
    let config = SmokeConfig::for_command(&cmd(&["./srv"]), &cmd(&["ping", "prompts/list"]))
        .expect("valid");

    let methods: Vec<&str> = config.steps.iter().map(|s| s.method.as_str()).collect();
    assert_eq!(methods, vec!["ping", "prompts/list"]);
}

#[test]
fn for_command_requires_a_program() {
    let err = SmokeConfig::for_command(&[], &[]).expect_err("empty command");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("no server command")));
}

#[test]
fn override_command_replaces_program_and_args() {
    let mut config = SmokeConfig::from_toml_str(FULL_TOML).expect("valid");

    config.override_command(&[]);
    assert_eq!(config.server.command, "node");

    config.override_command(&cmd(&["python", "-m", "server"]));
    assert_eq!(config.server.command, "python");
    assert_eq!(config.server.args, vec!["-m", "server"]);
}

#[test]
fn append_methods_replaces_implicit_default_step() {
    let mut config = SmokeConfig::from_toml_str("[server]\ncommand = \"x\"\n").expect("valid");

    config.append_methods(&cmd(&["prompts/list"]));
    config.append_methods(&cmd(&["resources/list"]));

    let methods: Vec<&str> = config.steps.iter().map(|s| s.method.as_str()).collect();
    assert_eq!(methods, vec!["prompts/list", "resources/list"]);
}

#[test]
fn append_methods_keeps_explicit_steps() {
    let mut config = SmokeConfig::from_toml_str(FULL_TOML).expect("valid");

    config.append_methods(&cmd(&["ping"]));

    assert_eq!(config.steps.len(), 4);
    assert_eq!(config.steps[3].method, "ping");
}
