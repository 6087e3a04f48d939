use dod_core::adapter::{AdapterResult, IssueSource};
use dod_core::config::SyncConfig;
use dod_core::error::{AdapterError, ErrorKind};
use dod_core::evaluate::evaluate_epic;
use dod_core::issue::{IssueRecord, LinkRecord};
use dod_core::model::{EpicPlan, SprintPlan};
use dod_core::resolver::TeamMetadata;
use dod_core::store::{SnapshotCounts, Store};
use dod_core::sync::{SnapshotSyncService, SprintOutcome, SyncSummary};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// In-memory stand-in for Jira. Issues are decoded from REST-shaped JSON so
/// the configured field names are exercised too.
#[derive(Default)]
struct FakeJira {
    batch: Vec<IssueRecord>,
    links: HashMap<String, Vec<LinkRecord>>,
    broken_links: HashSet<String>,
}

impl FakeJira {
    fn with_batch(batch: Vec<Value>) -> Self {
        let cfg = SyncConfig::default();
        Self {
            batch: batch
                .into_iter()
                .map(|v| IssueRecord::decode(v, &cfg).unwrap())
                .collect(),
            ..Self::default()
        }
    }

    fn link(mut self, key: &str, url: &str) -> Self {
        self.links
            .entry(key.to_string())
            .or_default()
            .push(LinkRecord::with_url(url));
        self
    }

    fn touch(&mut self, key: &str, updated: &str) {
        let issue = self.batch.iter_mut().find(|i| i.key == key).unwrap();
        issue.updated = Some(dod_core::issue::VersionStamp::Text(updated.to_string()));
    }
}

impl IssueSource for FakeJira {
    fn search_active_sprint_issues(
        &self,
        _project_key: Option<&str>,
        _max_results: u32,
    ) -> AdapterResult<Vec<IssueRecord>> {
        Ok(self.batch.clone())
    }

    fn get_issue(&self, key: &str) -> AdapterResult<IssueRecord> {
        Err(AdapterError::new("get_issue", format!("Issue {key} does not exist")).with_status(404))
    }

    fn get_issue_remote_links(&self, key: &str) -> AdapterResult<Vec<LinkRecord>> {
        if self.broken_links.contains(key) {
            return Err(AdapterError::new("get_issue_remote_links", "gateway timeout").with_status(504));
        }
        Ok(self.links.get(key).cloned().unwrap_or_default())
    }

    fn browse_url(&self, key: &str) -> String {
        format!("https://jira.example.com/browse/{key}")
    }
}

fn sprint(id: u64) -> Value {
    json!({"id": id, "name": format!("Sprint {id}"), "state": "active"})
}

fn epic_json(key: &str, sprint_id: u64, labels: &[&str]) -> Value {
    json!({
        "id": format!("id-{key}"),
        "key": key,
        "fields": {
            "summary": format!("Epic {key}"),
            "issuetype": {"name": "Epic"},
            "status": {"name": "In Progress", "statusCategory": {"key": "indeterminate"}},
            "resolution": null,
            "labels": labels,
            "updated": "2026-02-01T10:00:00.000+0000",
            "sprint": sprint(sprint_id),
        }
    })
}

fn task_json(id: &str, key: &str, summary: &str, epic: &str, sprint_id: u64, done: bool) -> Value {
    json!({
        "id": id,
        "key": key,
        "fields": {
            "summary": summary,
            "issuetype": {"name": "Sub-task"},
            "status": {
                "name": if done { "Done" } else { "To Do" },
                "statusCategory": {"key": if done { "done" } else { "new" }}
            },
            "resolution": if done { json!({"name": "Done"}) } else { Value::Null },
            "labels": [],
            "updated": "2026-02-01T11:00:00.000+0000",
            "parent": {"key": epic, "fields": {"issuetype": {"name": "Epic"}}},
            "sprint": sprint(sprint_id),
        }
    })
}

fn sync(store: &mut Store, jira: &FakeJira) -> SyncSummary {
    let cfg = SyncConfig::default();
    SnapshotSyncService::new(store, jira, &cfg)
        .sync_active_sprint(None)
        .unwrap()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn linked_dod_task_with_evidence_makes_epic_compliant() {
    let mut store = Store::open_in_memory().unwrap();
    let jira = FakeJira::with_batch(vec![
        epic_json("ABC-1", 10, &["squad_platform"]),
        task_json("2001", "ABC-2", "DoD - Automated tests", "ABC-1", 10, true),
    ])
    .link("ABC-2", "https://x/1");

    let summary = sync(&mut store, &jira);
    assert_eq!(summary.sprint_generations_created, 1);
    assert_eq!(summary.epic_records_created, 1);
    assert_eq!(summary.dod_task_records_created, 1);

    let snapshot_id = match summary.sprints[0].outcome {
        SprintOutcome::Created { snapshot_id, .. } => snapshot_id,
        ref other => panic!("unexpected outcome {other:?}"),
    };
    let views = store.load_epics(&[snapshot_id], &[], None).unwrap();
    assert_eq!(views.len(), 1);
    let view = &views[0];
    assert_eq!(view.epic.teams, vec!["squad_platform"]);
    assert!(!view.epic.is_done);
    assert!(!view.epic.missing_squad_labels);
    assert_eq!(view.epic.jira_url, "https://jira.example.com/browse/ABC-1");

    let task = &view.tasks[0];
    assert_eq!(task.category, "automated_tests");
    assert!(task.is_done);
    assert!(task.has_evidence_link);
    assert_eq!(task.evidence_link, "https://x/1");
    assert_eq!(task.non_compliance_reason, "");

    let evaluation = evaluate_epic(&view.tasks, None).unwrap();
    assert!(evaluation.is_compliant);
    assert!(evaluation.reasons.is_empty());
}

#[test]
fn second_sync_of_unchanged_batch_writes_nothing() {
    let mut store = Store::open_in_memory().unwrap();
    let jira = FakeJira::with_batch(vec![
        epic_json("ABC-1", 10, &["squad_platform"]),
        task_json("2001", "ABC-2", "DoD - Docs", "ABC-1", 10, false),
    ]);

    sync(&mut store, &jira);
    let before = store.counts().unwrap();

    let second = sync(&mut store, &jira);
    assert_eq!(second.sprint_generations_created, 0);
    assert_eq!(second.epic_records_created, 0);
    assert_eq!(second.dod_task_records_created, 0);
    assert_eq!(second.sprints[0].outcome, SprintOutcome::Unchanged);
    assert_eq!(store.counts().unwrap(), before);
}

#[test]
fn changed_issue_regenerates_only_its_sprint() {
    let mut store = Store::open_in_memory().unwrap();
    let mut jira = FakeJira::with_batch(vec![
        epic_json("ABC-1", 10, &["squad_platform"]),
        task_json("2001", "ABC-2", "DoD - Docs", "ABC-1", 10, false),
        epic_json("XYZ-1", 20, &["squad_mobile"]),
    ]);
    sync(&mut store, &jira);
    let untouched = store.latest_fingerprint("20").unwrap();

    jira.touch("ABC-2", "2026-02-02T09:00:00.000+0000");
    let second = sync(&mut store, &jira);

    assert_eq!(second.sprint_generations_created, 1);
    let by_sprint: HashMap<_, _> = second
        .sprints
        .iter()
        .map(|s| (s.jira_sprint_id.as_str(), &s.outcome))
        .collect();
    assert!(matches!(by_sprint["10"], SprintOutcome::Created { .. }));
    assert_eq!(by_sprint["20"], &SprintOutcome::Unchanged);
    assert_eq!(store.latest_fingerprint("20").unwrap(), untouched);
    assert_eq!(store.counts().unwrap().sprint_snapshots, 3);
}

#[test]
fn failure_in_later_sprint_keeps_earlier_commits() {
    let mut store = Store::open_in_memory().unwrap();
    let mut jira = FakeJira::with_batch(vec![
        epic_json("ABC-1", 10, &["squad_platform"]),
        epic_json("XYZ-1", 20, &["squad_mobile"]),
        task_json("3001", "XYZ-2", "DoD - Docs", "XYZ-1", 20, true),
    ]);
    jira.broken_links.insert("XYZ-2".to_string());

    let cfg = SyncConfig::default();
    let err = SnapshotSyncService::new(&mut store, &jira, &cfg)
        .sync_active_sprint(None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Adapter);
    assert!(err.to_string().contains("get_issue_remote_links"));

    assert!(store.latest_fingerprint("10").unwrap().is_some());
    assert!(store.latest_fingerprint("20").unwrap().is_none());
    let counts = store.counts().unwrap();
    assert_eq!(counts.sprint_snapshots, 1);
    assert_eq!(counts.epic_snapshots, 1);
    assert_eq!(counts.dod_tasks, 0);
}

#[test]
fn duplicate_epic_in_one_generation_is_rejected() {
    let mut store = Store::open_in_memory().unwrap();
    let epic = EpicPlan {
        jira_issue_id: "1001".to_string(),
        jira_key: "ABC-1".to_string(),
        summary: "Epic".to_string(),
        status_name: "Open".to_string(),
        resolution_name: String::new(),
        is_done: false,
        jira_url: String::new(),
        teams: TeamMetadata::default(),
        tasks: Vec::new(),
    };
    let plan = SprintPlan {
        jira_sprint_id: "10".to_string(),
        sprint_name: "Sprint 10".to_string(),
        sprint_state: "active".to_string(),
        fingerprint: Default::default(),
        epics: vec![epic.clone(), epic],
    };

    let err = store.commit_sprint(&plan, chrono::Utc::now()).unwrap_err();
    assert!(err.is_constraint_violation());
    assert_eq!(store.counts().unwrap(), SnapshotCounts::default());
}

#[test]
fn empty_search_result_leaves_store_untouched() {
    let mut store = Store::open_in_memory().unwrap();
    let summary = sync(&mut store, &FakeJira::default());
    assert_eq!(summary, SyncSummary::default());
    assert_eq!(store.counts().unwrap(), SnapshotCounts::default());
}
