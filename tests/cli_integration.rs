// CLI integration tests for the version checkers.
use std::process::Command;

use serde_json::Value;

fn depcheck() -> Command {
    Command::new(env!("CARGO_BIN_EXE_depcheck"))
}

fn poolside() -> Command {
    Command::new(env!("CARGO_BIN_EXE_poolside"))
}

#[test]
fn depcheck_prints_one_ok_line_per_entry() {
    let output = depcheck().output().expect("depcheck");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf8");
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), poolside::api::builtin_checklist().len());
    for line in lines {
        assert!(line.starts_with("  "), "indented: {line:?}");
        assert!(line.ends_with("...ok"), "ok verdict: {line:?}");
    }
}

#[test]
fn versions_text_honors_indent() {
    let output = poolside()
        .args(["versions", "--indent", "> "])
        .output()
        .expect("versions");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf8");
    let first = stdout.lines().next().expect("line");
    assert_eq!(first, "> http-api...ok");
}

#[test]
fn versions_json_reports_counts() {
    let output = poolside()
        .args(["versions", "--json", "--terse"])
        .output()
        .expect("versions");
    assert!(output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["mismatched"], 0);
    let names: Vec<&str> = value["versions"]
        .as_array()
        .expect("versions array")
        .iter()
        .filter_map(|item| item["name"].as_str())
        .collect();
    assert_eq!(names, vec!["http-api", "runtime", "response-sink"]);
}

#[test]
fn unknown_flag_is_usage_error_json() {
    let output = poolside()
        .args(["versions", "--bogus"])
        .output()
        .expect("versions");
    assert_eq!(output.status.code(), Some(2));
    let value: Value = serde_json::from_slice(&output.stderr).expect("json stderr");
    assert_eq!(value["error"]["kind"], "Usage");
}

#[test]
fn completion_emits_script() {
    let output = poolside()
        .args(["completion", "bash"])
        .output()
        .expect("completion");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("poolside"));
}
