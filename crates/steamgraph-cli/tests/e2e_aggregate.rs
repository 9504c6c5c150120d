//! E2E tests for the import → aggregate → query flow.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use steamgraph_core::lock::RunLock;
use tempfile::TempDir;

fn sg_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("steamgraph"));
    cmd.current_dir(dir);
    cmd.env("STEAMGRAPH_LOG", "error");
    cmd.env_remove("STEAMGRAPH_DB");
    cmd.env_remove("FORMAT");
    cmd
}

fn init_store(dir: &Path) {
    sg_cmd(dir).args(["init"]).assert().success();
}

fn write_facts(dir: &Path, name: &str, facts: &[(i64, i64)]) -> PathBuf {
    let path = dir.join(name);
    let body: String = facts
        .iter()
        .map(|(reviewer, app)| format!("{{\"appid\": {app}, \"reviewer_id\": {reviewer}}}\n"))
        .collect();
    fs::write(&path, body).expect("write fact file");
    path
}

fn json_output(dir: &Path, args: &[&str]) -> Value {
    let output = sg_cmd(dir)
        .args(args)
        .arg("--json")
        .output()
        .expect("command should not crash");
    assert!(
        output.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid JSON")
}

#[test]
fn init_creates_store_and_config_and_is_repeatable() {
    let dir = TempDir::new().unwrap();
    let first = json_output(dir.path(), &["init"]);
    assert_eq!(first["store_created"], true);
    assert_eq!(first["config_written"], true);
    assert_eq!(first["schema_version"], 2);
    assert!(dir.path().join(".steamgraph/steamgraph.db").exists());
    assert!(dir.path().join(".steamgraph/config.toml").exists());

    let second = json_output(dir.path(), &["init"]);
    assert_eq!(second["store_created"], false);
    assert_eq!(second["config_written"], false);
}

#[test]
fn commands_before_init_report_not_initialized() {
    let dir = TempDir::new().unwrap();
    for args in [&["status"][..], &["aggregate"], &["pairs"]] {
        sg_cmd(dir.path())
            .args(args)
            .assert()
            .failure()
            .stderr(predicate::str::contains("E1001"));
    }
}

#[test]
fn two_reviewers_then_a_third() {
    let dir = TempDir::new().unwrap();
    init_store(dir.path());

    let first = write_facts(dir.path(), "first.jsonl", &[(1, 10), (1, 20), (2, 10), (2, 30)]);
    let import = json_output(dir.path(), &["import", first.to_str().unwrap()]);
    assert_eq!(import["inserted"], 4);
    assert_eq!(import["duplicates"], 0);

    let report = json_output(dir.path(), &["aggregate"]);
    assert_eq!(report["newly_processed"], 2);
    assert_eq!(report["pairs_touched"], 2);
    assert_eq!(report["last_checkpointed"], 2);
    assert!(report["failure"].is_null());

    let pairs = json_output(dir.path(), &["pairs"]);
    let rows = pairs["pairs"].as_array().expect("pairs array");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["shared_count"] == 1));

    let second = write_facts(dir.path(), "second.jsonl", &[(3, 10), (3, 20)]);
    json_output(dir.path(), &["import", second.to_str().unwrap()]);
    let report = json_output(dir.path(), &["aggregate"]);
    assert_eq!(report["already_checkpointed"], 2);
    assert_eq!(report["newly_processed"], 1);

    let single = json_output(dir.path(), &["pairs", "--app", "20", "--with", "10"]);
    assert_eq!(single["appid_low"], 10);
    assert_eq!(single["appid_high"], 20);
    assert_eq!(single["shared_count"], 2);

    let partners = json_output(dir.path(), &["pairs", "--app", "10"]);
    assert_eq!(partners["appid"], 10);
    assert_eq!(partners["partners"][0]["appid"], 20);
    assert_eq!(partners["partners"][0]["shared_count"], 2);
    assert_eq!(partners["partners"][1]["appid"], 30);

    let status = json_output(dir.path(), &["status"]);
    assert_eq!(status["facts"], 6);
    assert_eq!(status["reviewers"], 3);
    assert_eq!(status["checkpointed_reviewers"], 3);
    assert_eq!(status["pending_reviewers"], 0);
    assert_eq!(status["pair_rows"], 2);
    assert_eq!(status["last_checkpointed_reviewer"], 3);
    assert!(status["last_run_at"].is_string());
}

#[test]
fn rerun_and_reimport_change_nothing() {
    let dir = TempDir::new().unwrap();
    init_store(dir.path());
    let facts = write_facts(dir.path(), "facts.jsonl", &[(1, 10), (1, 20), (1, 30)]);

    json_output(dir.path(), &["import", facts.to_str().unwrap()]);
    json_output(dir.path(), &["aggregate"]);
    let before = json_output(dir.path(), &["pairs"]);

    let again = json_output(dir.path(), &["import", facts.to_str().unwrap()]);
    assert_eq!(again["inserted"], 0);
    assert_eq!(again["duplicates"], 3);

    let report = json_output(dir.path(), &["aggregate"]);
    assert_eq!(report["scheduled"], 0);
    assert_eq!(report["newly_processed"], 0);
    assert_eq!(json_output(dir.path(), &["pairs"]), before);
}

#[test]
fn malformed_line_aborts_the_whole_file() {
    let dir = TempDir::new().unwrap();
    init_store(dir.path());
    let path = dir.path().join("bad.jsonl");
    fs::write(
        &path,
        "{\"appid\": 10, \"reviewer_id\": 1}\n{\"appid\": \"ten\"}\n",
    )
    .unwrap();

    sg_cmd(dir.path())
        .args(["import", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E3003"))
        .stderr(predicate::str::contains("line 2"));

    let status = json_output(dir.path(), &["status"]);
    assert_eq!(status["facts"], 0);
}

#[test]
fn limit_processes_a_prefix_and_next_run_resumes() {
    let dir = TempDir::new().unwrap();
    init_store(dir.path());
    let facts = write_facts(
        dir.path(),
        "facts.jsonl",
        &[(1, 10), (1, 20), (2, 10), (2, 20), (3, 10), (3, 20)],
    );
    json_output(dir.path(), &["import", facts.to_str().unwrap()]);

    let first = json_output(dir.path(), &["aggregate", "--limit", "2"]);
    assert_eq!(first["newly_processed"], 2);
    assert_eq!(first["last_checkpointed"], 2);

    let status = json_output(dir.path(), &["status"]);
    assert_eq!(status["pending_reviewers"], 1);

    let rest = json_output(dir.path(), &["aggregate"]);
    assert_eq!(rest["newly_processed"], 1);
    let single = json_output(dir.path(), &["pairs", "--app", "10", "--with", "20"]);
    assert_eq!(single["shared_count"], 3);
}

#[test]
fn reset_requires_confirmation_and_keeps_facts() {
    let dir = TempDir::new().unwrap();
    init_store(dir.path());
    let facts = write_facts(dir.path(), "facts.jsonl", &[(1, 10), (1, 20)]);
    json_output(dir.path(), &["import", facts.to_str().unwrap()]);
    json_output(dir.path(), &["aggregate"]);

    sg_cmd(dir.path())
        .args(["reset"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes"));

    let reset = json_output(dir.path(), &["reset", "--yes"]);
    assert_eq!(reset["pairs_deleted"], 1);
    assert_eq!(reset["checkpoints_deleted"], 1);

    let status = json_output(dir.path(), &["status"]);
    assert_eq!(status["facts"], 2);
    assert_eq!(status["pair_rows"], 0);
    assert_eq!(status["pending_reviewers"], 1);

    let report = json_output(dir.path(), &["aggregate"]);
    assert_eq!(report["newly_processed"], 1);
}

#[test]
fn aggregate_times_out_while_another_run_holds_the_lock() {
    let dir = TempDir::new().unwrap();
    init_store(dir.path());
    fs::write(
        dir.path().join(".steamgraph/config.toml"),
        "[aggregate]\nlock_timeout_ms = 50\n",
    )
    .unwrap();

    let _held = RunLock::acquire(
        &dir.path().join(".steamgraph/aggregate.lock"),
        Duration::from_secs(1),
    )
    .expect("hold run lock");

    sg_cmd(dir.path())
        .args(["aggregate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E5002"));
}

#[test]
fn aggregate_blocked_by_writer_names_failing_and_last_checkpointed_reviewer() {
    let dir = TempDir::new().unwrap();
    init_store(dir.path());
    fs::write(
        dir.path().join(".steamgraph/config.toml"),
        "[store]\nbusy_timeout_ms = 50\n",
    )
    .unwrap();
    let facts = write_facts(dir.path(), "facts.jsonl", &[(1, 10), (1, 20), (2, 10), (2, 30)]);
    json_output(dir.path(), &["import", facts.to_str().unwrap()]);
    json_output(dir.path(), &["aggregate", "--limit", "1"]);

    let writer = rusqlite::Connection::open(dir.path().join(".steamgraph/steamgraph.db"))
        .expect("open store directly");
    writer.execute_batch("BEGIN IMMEDIATE").expect("hold write lock");

    sg_cmd(dir.path())
        .args(["aggregate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E4001"))
        .stderr(predicate::str::contains("reviewer 2 failed"))
        .stderr(predicate::str::contains("last checkpointed reviewer: 1"));

    writer.execute_batch("ROLLBACK").expect("release write lock");

    let report = json_output(dir.path(), &["aggregate"]);
    assert_eq!(report["newly_processed"], 1);
    assert_eq!(report["last_checkpointed"], 2);
}

#[test]
fn pairs_rejects_self_pair() {
    let dir = TempDir::new().unwrap();
    init_store(dir.path());
    sg_cmd(dir.path())
        .args(["pairs", "--app", "10", "--with", "10"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("different apps"));
}

#[test]
fn broken_config_reports_parse_error() {
    let dir = TempDir::new().unwrap();
    init_store(dir.path());
    fs::write(dir.path().join(".steamgraph/config.toml"), "[store\n").unwrap();

    sg_cmd(dir.path())
        .args(["status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E1002"));
}

#[test]
fn text_output_is_compact() {
    let dir = TempDir::new().unwrap();
    init_store(dir.path());
    sg_cmd(dir.path())
        .args(["status"])
        .env("FORMAT", "text")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("facts=0 reviewers=0 apps=0"));
}

#[test]
fn completions_emit_script() {
    let dir = TempDir::new().unwrap();
    sg_cmd(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("steamgraph"));
}
