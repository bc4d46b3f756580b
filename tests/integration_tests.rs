//! Integration tests: CLI smoke tests against the built `aeh` binary.

mod common;

use std::fs;

use serde_json::Value;

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: aeh [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
    for subcommand in ["run", "check", "extend", "config", "completions"] {
        assert!(
            result.stdout.contains(subcommand),
            "help should list {subcommand}; log: {}",
            result.log_path.display()
        );
    }
}

#[test]
fn version_command_prints_version() {
    let result = common::run_cli_case("version_command_prints_version", &["--version"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains(env!("CARGO_PKG_VERSION")),
        "missing version; log: {}",
        result.log_path.display()
    );
}

#[test]
fn missing_explicit_config_is_user_error() {
    let result = common::run_cli_case(
        "missing_explicit_config_is_user_error",
        &["--config", "/nonexistent/aeh/config.toml", "config", "validate"],
    );
    assert_eq!(
        result.status.code(),
        Some(1),
        "log: {}",
        result.log_path.display()
    );
    assert!(result.stderr.contains("AEH-1002"));
}

#[test]
fn invalid_config_is_rejected_with_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[monitor]\nthreshold_pct = 0\n").unwrap();
    let result = common::run_cli_case(
        "invalid_config_is_rejected_with_code",
        &["--config", path.to_str().unwrap(), "config", "validate"],
    );
    assert_eq!(
        result.status.code(),
        Some(1),
        "log: {}",
        result.log_path.display()
    );
    assert!(result.stderr.contains("AEH-1001"));
}

#[test]
fn config_validate_reports_hash_in_json() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_test_config(dir.path());
    let result = common::run_cli_case(
        "config_validate_reports_hash_in_json",
        &["--config", config.to_str().unwrap(), "--json", "config", "validate"],
    );
    assert!(
        result.status.success(),
        "log: {}",
        result.log_path.display()
    );
    let payload: Value = serde_json::from_str(result.stdout.trim()).unwrap();
    assert_eq!(payload["valid"], true);
    assert_eq!(payload["hash"].as_str().map(str::len), Some(16));
}

#[test]
fn config_show_preserves_donor_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_test_config(dir.path());
    let result = common::run_cli_case(
        "config_show_preserves_donor_order",
        &["--config", config.to_str().unwrap(), "--json", "config", "show"],
    );
    assert!(
        result.status.success(),
        "log: {}",
        result.log_path.display()
    );
    let payload: Value = serde_json::from_str(result.stdout.trim()).unwrap();
    let donors = payload["config"]["cascade"]["donors"].as_array().unwrap();
    let names: Vec<&str> = donors
        .iter()
        .map(|d| d["logical_volume"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["lv_data1", "lv_data2"]);
    assert_eq!(payload["config"]["monitor"]["volume_group"], "aehtestvg");
}

#[cfg(target_os = "linux")]
#[test]
fn check_reports_monitored_usage_and_donors() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_test_config(dir.path());
    let result = common::run_cli_case(
        "check_reports_monitored_usage_and_donors",
        &["--config", config.to_str().unwrap(), "--json", "check"],
    );
    assert!(
        result.status.success(),
        "log: {}",
        result.log_path.display()
    );
    let payload: Value = serde_json::from_str(result.stdout.trim()).unwrap();
    assert_eq!(payload["command"], "check");
    assert_eq!(payload["volume"], "aehtestvg/lv_home");
    assert!(payload["monitored"]["snapshot"]["usage_pct"].is_u64());
    let donors = payload["donors"].as_array().unwrap();
    assert_eq!(donors.len(), 2);
    assert_eq!(donors[0]["donor"], "lv_data1");
    assert!(donors[0]["verdict"]["verdict"].is_string());
}

#[cfg(target_os = "linux")]
#[test]
fn dry_run_extend_succeeds_without_touching_storage() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_test_config(dir.path());
    let result = common::run_cli_case(
        "dry_run_extend_succeeds_without_touching_storage",
        &[
            "--config",
            config.to_str().unwrap(),
            "--json",
            "--dry-run",
            "extend",
        ],
    );
    assert!(
        result.status.success(),
        "dry-run extend must not fail; log: {}",
        result.log_path.display()
    );
    let payload: Value = serde_json::from_str(result.stdout.trim()).unwrap();
    assert_eq!(payload["dry_run"], true);
    let outcome = payload["result"]["outcome"].as_str().unwrap();
    assert!(
        outcome.starts_with("extended_from_"),
        "unexpected outcome {outcome}; log: {}",
        result.log_path.display()
    );

    let log = fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
    let commands: Vec<Value> = log
        .lines()
        .map(|l| serde_json::from_str::<Value>(l).unwrap())
        .filter(|e| e["event"] == "command")
        .collect();
    assert!(!commands.is_empty());
    assert!(commands.iter().all(|c| c["dry_run"] == true));
    assert!(log.contains("\"cascade_finish\""));
}

#[test]
fn completions_generate_for_bash() {
    let result = common::run_cli_case("completions_generate_for_bash", &["completions", "bash"]);
    assert!(
        result.status.success(),
        "log: {}",
        result.log_path.display()
    );
    assert!(result.stdout.contains("aeh"));
}
