#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn provision(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("provision").unwrap();
    cmd.current_dir(dir.path())
        .env("PROVISION_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &TempDir, yaml: &str) {
    std::fs::create_dir_all(dir.path().join(".provision")).unwrap();
    std::fs::write(dir.path().join(".provision/config.yaml"), yaml).unwrap();
}

/// A small plan that only touches files inside the project directory.
const MARKER_PLAN: &str = r#"
version: 1
project:
  name: demo
environment:
  name: test
  platform: linux
  variables:
    GREETING: hello
health:
  timeout_seconds: 2
  interval_seconds: 1
services:
  - name: api
    probe: { type: command, command: test -f api.pid }
    start: { type: shell, command: touch api.pid }
    stop: { type: shell, command: rm -f api.pid }
    status: { type: shell, command: test -f api.pid }
actions:
  - id: write-greeting
    description: greeting file
    kind: configure
    precondition: { type: file_exists, path: greeting.txt }
    effect: { type: write_file, path: greeting.txt, contents: "${GREETING}\n" }
  - id: make-data-dir
    kind: install
    precondition: { type: file_exists, path: data }
    effect: { type: shell, command: mkdir data }
  - id: start-api
    kind: service_control
    precondition: { type: service_running, name: api }
    effect: { type: service, name: api, control: start }
"#;

const FAILING_PLAN: &str = r#"
project:
  name: demo
environment:
  platform: linux
actions:
  - id: first
    kind: install
    precondition: { type: file_exists, path: first }
    effect: { type: shell, command: touch first }
  - id: broken
    description: package that does not exist
    kind: install
    effect: { type: shell, command: "echo E: Unable to locate package; exit 100" }
  - id: never-reached
    kind: install
    effect: { type: shell, command: touch never }
"#;

// ---------------------------------------------------------------------------
// provision init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_directory_tree() {
    let dir = TempDir::new().unwrap();
    provision(&dir)
        .args(["init", "--platform", "linux"])
        .assert()
        .success()
        .stdout(predicate::str::contains("created"));

    assert!(dir.path().join(".provision").is_dir());
    assert!(dir.path().join(".provision/logs").is_dir());
    let config = std::fs::read_to_string(dir.path().join(".provision/config.yaml")).unwrap();
    assert!(config.contains("start-arangodb"));
    assert!(config.contains("services.arangodb"));
}

#[test]
fn init_windows_stack() {
    let dir = TempDir::new().unwrap();
    provision(&dir)
        .args(["init", "--platform", "windows"])
        .assert()
        .success();
    let config = std::fs::read_to_string(dir.path().join(".provision/config.yaml")).unwrap();
    assert!(config.contains("check-choco"));
    assert!(config.contains("platform: windows"));
}

#[test]
fn init_is_idempotent_and_keeps_existing_config() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, MARKER_PLAN);
    provision(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists"));
    let config = std::fs::read_to_string(dir.path().join(".provision/config.yaml")).unwrap();
    assert_eq!(config, MARKER_PLAN);
}

#[test]
fn scaffolded_config_validates() {
    let dir = TempDir::new().unwrap();
    provision(&dir).args(["init", "--platform", "linux"]).assert().success();
    provision(&dir)
        .args(["config", "validate"])
        .assert()
        .success();
}

// ---------------------------------------------------------------------------
// provision config
// ---------------------------------------------------------------------------

#[test]
fn config_validate_reports_errors() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        r#"
project:
  name: demo
actions:
  - id: clone
    kind: install
    effect: { type: shell, command: "git clone ${REPO_URL}" }
  - id: clone
    kind: install
    effect: { type: shell, command: "true" }
"#,
    );
    provision(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("${REPO_URL}"))
        .stdout(predicate::str::contains("duplicate action id 'clone'"));
}

#[test]
fn config_show_applies_overrides() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, MARKER_PLAN);
    provision(&dir)
        .args(["config", "show", "--var", "GREETING=bonjour", "--platform", "windows"])
        .assert()
        .success()
        .stdout(predicate::str::contains("GREETING: bonjour"))
        .stdout(predicate::str::contains("platform: windows"));
}

#[test]
fn commands_require_init() {
    let dir = TempDir::new().unwrap();
    provision(&dir)
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

// ---------------------------------------------------------------------------
// provision run
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[test]
fn run_applies_plan_then_rerun_skips() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, MARKER_PLAN);

    provision(&dir)
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("succeeded: 3 succeeded, 0 skipped, 0 failed"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("greeting.txt")).unwrap(),
        "hello\n"
    );
    assert!(dir.path().join("data").is_dir());
    assert!(dir.path().join("api.pid").exists());

    provision(&dir)
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 succeeded, 3 skipped, 0 failed"));
}

#[cfg(unix)]
#[test]
fn run_var_override_reaches_effects() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, MARKER_PLAN);
    provision(&dir)
        .args(["run", "--var", "GREETING=hi there"])
        .assert()
        .success();
    assert_eq!(
        std::fs::read_to_string(dir.path().join("greeting.txt")).unwrap(),
        "hi there\n"
    );
}

#[cfg(unix)]
#[test]
fn run_fatal_failure_reports_and_stops() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, FAILING_PLAN);

    provision(&dir)
        .arg("run")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Failed at 'broken' (package that does not exist)"))
        .stdout(predicate::str::contains("Unable to locate package"))
        .stderr(predicate::str::contains("error: run failed at action 'broken'"));

    assert!(dir.path().join("first").exists());
    assert!(!dir.path().join("never").exists());
}

#[cfg(unix)]
#[test]
fn run_json_output() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, MARKER_PLAN);
    let output = provision(&dir).args(["run", "--json"]).output().unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["status"], "succeeded");
    assert_eq!(value["outcomes"].as_array().unwrap().len(), 3);
    assert_eq!(value["outcomes"][0]["action_id"], "write-greeting");
}

#[test]
fn run_duplicate_ids_aborts() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        r#"
project:
  name: demo
actions:
  - id: same
    kind: install
    effect: { type: write_file, path: a.txt, contents: a }
  - id: same
    kind: install
    effect: { type: write_file, path: b.txt, contents: b }
"#,
    );
    provision(&dir)
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("run aborted"));
    assert!(!dir.path().join("a.txt").exists());
}

// ---------------------------------------------------------------------------
// provision check
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[test]
fn check_reports_pending_without_changing_anything() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, MARKER_PLAN);

    provision(&dir)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("pending"))
        .stdout(predicate::str::contains("0/4 checks passed"));
    assert!(!dir.path().join("greeting.txt").exists());

    provision(&dir).args(["status", "--strict"]).assert().failure();

    provision(&dir).arg("run").assert().success();
    provision(&dir)
        .args(["check", "--strict"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4/4 checks passed (100.0%)"));
}

// ---------------------------------------------------------------------------
// provision log
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[test]
fn log_shows_latest_and_failed_outcomes() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, FAILING_PLAN);
    provision(&dir).arg("run").assert().failure();

    provision(&dir)
        .arg("log")
        .assert()
        .success()
        .stdout(predicate::str::contains("first"))
        .stdout(predicate::str::contains("failed: 2 executed, 0 skipped, 1 failed"));

    let output = provision(&dir)
        .args(["log", "--failed", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let outcomes = value["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0]["action_id"], "broken");
    assert_eq!(value["summary"]["status"], "failed");
}

#[cfg(unix)]
#[test]
fn log_list_and_select_run() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, MARKER_PLAN);
    provision(&dir).arg("run").assert().success();
    provision(&dir).arg("run").assert().success();

    let output = provision(&dir).args(["log", "--list", "--json"]).output().unwrap();
    let runs: Vec<String> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(runs.len(), 2);

    provision(&dir)
        .args(["log", "--run", &runs[0], "--tail", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains(runs[0].as_str()))
        .stdout(predicate::str::contains("start-api"));

    provision(&dir)
        .args(["log", "--run", "20000101T000000Z-deadbeef"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("run not found"));
}

#[test]
fn log_without_runs_fails() {
    let dir = TempDir::new().unwrap();
    provision(&dir).arg("log").assert().failure();
}

// ---------------------------------------------------------------------------
// provision service
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[test]
fn service_start_status_stop() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, MARKER_PLAN);

    provision(&dir)
        .args(["service", "status", "api"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("running=no"));

    provision(&dir)
        .args(["service", "start", "api"])
        .assert()
        .success()
        .stdout(predicate::str::contains("healthy after 1 probe(s)"));

    provision(&dir)
        .args(["service", "status", "api"])
        .assert()
        .success()
        .stdout(predicate::str::contains("running=yes healthy=yes"));

    provision(&dir)
        .args(["service", "stop", "api"])
        .assert()
        .success();
    assert!(!dir.path().join("api.pid").exists());
}

#[test]
fn service_unknown_name_fails() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, MARKER_PLAN);
    provision(&dir)
        .args(["service", "start", "nginx"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("service not found: nginx"));
}
