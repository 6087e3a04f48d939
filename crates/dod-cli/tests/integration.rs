#![allow(deprecated)]
use assert_cmd::Command;
use mockito::{Matcher, Mock, Server};
use predicates::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;

const JIRA_ENV: &[&str] = &[
    "JIRA_BASE_URL",
    "JIRA_EMAIL",
    "JIRA_API_KEY",
    "JIRA_PROJECT_KEY",
    "JIRA_VERIFY_SSL",
    "JIRA_EPIC_LINK_FIELD",
    "JIRA_SYNC_MAX_RESULTS",
    "JIRA_CHILD_ISSUES_JQL_CLAUSE",
    "NUDGE_COOLDOWN_HOURS",
    "NUDGE_DEFAULT_RECIPIENTS",
    "NUDGE_TEAM_RECIPIENTS_JSON",
    "DOD_ACTOR",
];

fn dod(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("dod").unwrap();
    cmd.current_dir(dir.path()).env("DOD_ROOT", dir.path());
    for key in JIRA_ENV {
        cmd.env_remove(key);
    }
    cmd
}

fn dod_with_jira(dir: &TempDir, server: &Server) -> Command {
    let mut cmd = dod(dir);
    cmd.env("JIRA_BASE_URL", server.url())
        .env("JIRA_EMAIL", "bot@example.com")
        .env("JIRA_API_KEY", "token");
    cmd
}

fn init_project(dir: &TempDir) {
    dod(dir).arg("init").assert().success();
}

fn json_out(cmd: &mut Command) -> Value {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

// ---------------------------------------------------------------------------
// Jira fixtures
// ---------------------------------------------------------------------------

fn epic(key: &str) -> Value {
    json!({
        "id": "1001",
        "key": key,
        "fields": {
            "summary": "Payments revamp",
            "issuetype": {"name": "Epic"},
            "status": {"name": "In Progress", "statusCategory": {"key": "indeterminate"}},
            "resolution": null,
            "labels": ["squad_platform"],
            "updated": "2026-02-10T09:00:00.000+0000",
            "sprint": {"id": 10, "name": "Sprint 10", "state": "active"}
        }
    })
}

fn dod_task(key: &str, epic_key: &str, done: bool) -> Value {
    json!({
        "id": "2001",
        "key": key,
        "fields": {
            "summary": "DoD - Automated tests",
            "issuetype": {"name": "Sub-task"},
            "status": {
                "name": if done { "Done" } else { "In Progress" },
                "statusCategory": {"key": if done { "done" } else { "indeterminate" }}
            },
            "resolution": if done { json!({"name": "Done"}) } else { Value::Null },
            "labels": [],
            "updated": "2026-02-10T10:00:00.000+0000",
            "parent": {"key": epic_key, "fields": {"issuetype": {"name": "Epic"}}},
            "sprint": {"id": 10, "name": "Sprint 10", "state": "active"}
        }
    })
}

fn mock_jira(server: &mut Server, task_done: bool) -> (Mock, Mock) {
    let issues = vec![epic("ABC-1"), dod_task("ABC-2", "ABC-1", task_done)];
    let search = server
        .mock("GET", "/rest/api/2/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"startAt": 0, "total": issues.len(), "issues": issues}).to_string())
        .expect_at_least(1)
        .create();
    let links = server
        .mock("GET", "/rest/api/2/issue/ABC-2/remotelink")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!([{"object": {"url": "https://x/1", "title": "CI run"}}]).to_string())
        .expect_at_least(1)
        .create();
    (search, links)
}

// ---------------------------------------------------------------------------
// dod init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_and_database() {
    let dir = TempDir::new().unwrap();
    dod(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .dod/config.yaml"));

    assert!(dir.path().join(".dod/config.yaml").exists());
    assert!(dir.path().join(".dod/snapshots.db").exists());
    let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
    assert!(gitignore.lines().any(|l| l == ".dod/snapshots.db"));
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    dod(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .dod/config.yaml"));
    let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
    assert_eq!(gitignore.matches(".dod/snapshots.db").count(), 1);
}

#[test]
fn commands_require_init() {
    let dir = TempDir::new().unwrap();
    dod(&dir)
        .arg("metrics")
        .assert()
        .failure()
        .stderr(predicate::str::contains("dod init"));
}

// ---------------------------------------------------------------------------
// dod sync
// ---------------------------------------------------------------------------

#[test]
fn sync_without_credentials_records_failed_run() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    dod(&dir)
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Missing Jira configuration values: JIRA_BASE_URL, JIRA_EMAIL, JIRA_API_KEY",
        ));

    let runs = json_out(dod(&dir).args(["--json", "runs"]));
    assert_eq!(runs.as_array().unwrap().len(), 1);
    assert_eq!(runs[0]["status"], "FAILED");
    assert_eq!(runs[0]["triggered_by"], "anonymous");
}

#[test]
fn sync_refuses_invalid_config() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    std::fs::write(
        dir.path().join(".dod/config.yaml"),
        "sync:\n  max_results: 0\n",
    )
    .unwrap();
    let server = Server::new();

    dod_with_jira(&dir, &server)
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("sync.max_results must be at least 1"));

    let runs = json_out(dod(&dir).args(["--json", "runs"]));
    assert!(runs.as_array().unwrap().is_empty());
}

#[test]
fn sync_snapshots_active_sprint_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let mut server = Server::new();
    let (search, links) = mock_jira(&mut server, true);

    let first = json_out(dod_with_jira(&dir, &server).args(["--json", "sync"]));
    assert_eq!(first["run"]["status"], "SUCCESS");
    assert_eq!(first["summary"]["sprint_generations_created"], 1);
    assert_eq!(first["summary"]["epic_records_created"], 1);
    assert_eq!(first["summary"]["dod_task_records_created"], 1);

    let second = json_out(dod_with_jira(&dir, &server).args(["--json", "sync"]));
    assert_eq!(second["summary"]["sprint_generations_created"], 0);
    assert_eq!(second["summary"]["sprints"][0]["status"], "unchanged");
    search.assert();
    links.assert();

    let snapshots = json_out(dod(&dir).args(["--json", "snapshots"]));
    assert_eq!(snapshots["counts"]["sprint_snapshots"], 1);
    assert_eq!(snapshots["snapshots"][0]["sprint_name"], "Sprint 10");

    let metrics = json_out(dod(&dir).args(["--json", "metrics"]));
    assert_eq!(metrics["scope"]["scope_mode"], "single");
    assert_eq!(metrics["summary"]["total_epics"], 1);
    assert_eq!(metrics["summary"]["compliant_epics"], 1);
    assert_eq!(metrics["summary"]["compliance_percentage"], 100.0);
    assert_eq!(metrics["by_team"][0]["team"], "squad_platform");
    assert_eq!(metrics["by_category"][0]["category"], "automated_tests");
}

// ---------------------------------------------------------------------------
// Reports and nudges
// ---------------------------------------------------------------------------

#[test]
fn non_compliant_epic_can_be_nudged_once_per_cooldown() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let mut server = Server::new();
    let _mocks = mock_jira(&mut server, false);
    dod_with_jira(&dir, &server).arg("sync").assert().success();

    let listing = json_out(dod(&dir).args(["--json", "non-compliant"]));
    assert_eq!(listing["count"], 1);
    let epic = &listing["epics"][0];
    assert_eq!(epic["jira_key"], "ABC-1");
    assert_eq!(epic["compliance_reasons"], json!(["incomplete_dod_tasks"]));
    assert_eq!(epic["failing_dod_tasks"][0]["non_compliance_reason"], "task_not_done");
    assert_eq!(epic["nudge"]["cooldown_active"], false);

    dod(&dir)
        .args(["nudge", "ABC-1", "--actor", "ops@example.com"])
        .env("NUDGE_DEFAULT_RECIPIENTS", "lead@example.com")
        .assert()
        .success()
        .stdout(predicate::str::contains("[DoD Nudge] ABC-1 is non-compliant"))
        .stdout(predicate::str::contains("- ABC-2: DoD - Automated tests (task_not_done)"))
        .stdout(predicate::str::contains("  evidence: https://x/1"));

    dod(&dir)
        .args(["nudge", "ABC-1"])
        .env("NUDGE_DEFAULT_RECIPIENTS", "lead@example.com")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cooldown_active"));

    let history = json_out(dod(&dir).args(["--json", "nudges"]));
    assert_eq!(history["count"], 1);
    assert_eq!(history["nudges"][0]["epic_key"], "ABC-1");
    assert_eq!(history["nudges"][0]["team"], "squad_platform");
    assert_eq!(history["nudges"][0]["triggered_by"], "ops@example.com");
    assert_eq!(
        history["nudges"][0]["recipient_emails"],
        json!(["lead@example.com"])
    );
}

#[test]
fn nudge_rejections_are_reported() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    dod(&dir)
        .args(["nudge", "ABC-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no_sprint_snapshot"));

    let mut server = Server::new();
    let _mocks = mock_jira(&mut server, false);
    dod_with_jira(&dir, &server).arg("sync").assert().success();

    dod(&dir)
        .args(["nudge", "ABC-404"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("epic_not_found"));
    dod(&dir)
        .args(["nudge", "ABC-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no_recipients"));
    dod(&dir)
        .args(["nudge", "ABC-1", "--recipient", "a@example.com", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run: nothing recorded."));

    let history = json_out(dod(&dir).args(["--json", "nudges"]));
    assert_eq!(history["total_count"], 0);
}

#[test]
fn invalid_filters_are_rejected() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    dod(&dir)
        .args(["epics", "--compliance-status", "sometimes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown compliance status"));
    dod(&dir)
        .args(["metrics", "--epic-status", "closed"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown epic status"));
}

// ---------------------------------------------------------------------------
// dod teams
// ---------------------------------------------------------------------------

#[test]
fn team_recipients_route_nudges() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    dod(&dir)
        .args(["teams", "recipients", "squad_platform", "x@example.com"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("team not found: squad_platform"));

    let mut server = Server::new();
    let _mocks = mock_jira(&mut server, false);
    dod_with_jira(&dir, &server).arg("sync").assert().success();

    dod(&dir)
        .args([
            "teams",
            "recipients",
            "squad_platform",
            " b@example.com ",
            "a@example.com",
            "a@example.com",
        ])
        .assert()
        .success();

    let teams = json_out(dod(&dir).args(["--json", "teams", "list"]));
    assert_eq!(teams[0]["key"], "squad_platform");
    assert_eq!(
        teams[0]["notification_emails"],
        json!(["a@example.com", "b@example.com"])
    );

    let sent = json_out(dod(&dir).args(["--json", "nudge", "ABC-1"]));
    assert_eq!(sent["sent"], true);
    assert_eq!(
        sent["nudge"]["recipients"],
        json!(["a@example.com", "b@example.com"])
    );
}
