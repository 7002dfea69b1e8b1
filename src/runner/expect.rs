//! Response expectations.
//!
//! Substring and regex checks run against a haystack made of the compact
//! serialized response followed by every string value inside it, one per
//! line. Matching the raw JSON keeps checks like `"isError":false` working;
//! the unescaped strings let multi-line tool output match plain text.

use serde_json::Value;

use crate::config::{compile_pattern, ExpectConfig};
use crate::jsonrpc::JsonRpcResponse;
use crate::Result;

/// Evaluate `expect` against `response`.
///
/// Returns one human-readable reason per failed check; an empty vector
/// means the step passed. Without explicit `error` / `error_code`, an error
/// response is itself a failure.
///
/// # Errors
///
/// Returns `AppError::Config` if `expect.matches` is not a valid regex.
pub fn evaluate(expect: &ExpectConfig, response: &JsonRpcResponse) -> Result<Vec<String>> {
    let mut failures = Vec::new();
    let expects_error = expect.error || expect.error_code.is_some();

    match (&response.error, expects_error) {
        (Some(err), false) => failures.push(format!(
            "unexpected error response: {} ({})",
            err.message, err.code
        )),
        (None, true) => failures.push("expected an error response, got a result".into()),
        (Some(err), true) => {
            if let Some(code) = expect.error_code {
                if err.code != code {
                    failures.push(format!("expected error code {code}, got {}", err.code));
                }
            }
        }
        (None, false) => {}
    }

    let haystack = haystack(&response.raw);

    for needle in &expect.contains {
        if !haystack.contains(needle.as_str()) {
            failures.push(format!("response does not contain {needle:?}"));
        }
    }

    for needle in &expect.not_contains {
        if haystack.contains(needle.as_str()) {
            failures.push(format!("response contains forbidden {needle:?}"));
        }
    }

    if let Some(pattern) = &expect.matches {
        let re = compile_pattern("expect.matches", pattern)?;
        if !re.is_match(&haystack) {
            failures.push(format!("response does not match /{pattern}/"));
        }
    }

    for pointer in &expect.result_pointers {
        let found = response
            .result
            .as_ref()
            .and_then(|result| result.pointer(pointer))
            .is_some();
        if !found {
            failures.push(format!("result has no value at {pointer:?}"));
        }
    }

    Ok(failures)
}

/// Text searched by `contains`, `not_contains`, and `matches`.
#[must_use]
pub fn haystack(raw: &Value) -> String {
    let mut out = raw.to_string();
    collect_strings(raw, &mut out);
    out
}

fn collect_strings(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push('\n');
            out.push_str(s);
        }
        Value::Array(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_strings(item, out);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}
