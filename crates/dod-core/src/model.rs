use crate::fingerprint::Fingerprint;
use crate::resolver::TeamMetadata;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed-width RFC 3339 UTC text, so lexical and chronological order agree.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> chrono::ParseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Persisted snapshots
// ---------------------------------------------------------------------------

/// One point-in-time capture of a tracker sprint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SprintSnapshot {
    pub id: i64,
    pub jira_sprint_id: String,
    pub sprint_name: String,
    pub sprint_state: String,
    pub sync_timestamp: DateTime<Utc>,
    pub issue_versions: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpicSnapshot {
    pub id: i64,
    pub sprint_snapshot_id: i64,
    pub jira_issue_id: String,
    pub jira_key: String,
    pub summary: String,
    pub status_name: String,
    pub resolution_name: String,
    pub is_done: bool,
    pub jira_url: String,
    pub missing_squad_labels: bool,
    pub squad_label_warnings: Vec<String>,
    /// Team keys, sorted.
    pub teams: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DodTaskSnapshot {
    pub id: i64,
    pub epic_snapshot_id: i64,
    pub jira_issue_id: String,
    pub jira_key: String,
    pub summary: String,
    pub category: String,
    pub status_name: String,
    pub resolution_name: String,
    pub is_done: bool,
    pub jira_url: String,
    pub has_evidence_link: bool,
    pub evidence_link: String,
    pub non_compliance_reason: String,
}

impl DodTaskSnapshot {
    pub fn is_compliant(&self) -> bool {
        self.is_done && self.has_evidence_link
    }
}

/// An epic together with its sprint generation and DoD tasks, as loaded for
/// evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpicView {
    pub epic: EpicSnapshot,
    pub jira_sprint_id: String,
    pub sprint_name: String,
    pub sync_timestamp: DateTime<Utc>,
    pub tasks: Vec<DodTaskSnapshot>,
}

// ---------------------------------------------------------------------------
// Teams and nudges
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Team {
    pub id: i64,
    pub key: String,
    pub display_name: String,
    pub notification_emails: Vec<String>,
    pub scrum_masters: Vec<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NudgeLog {
    pub id: i64,
    pub epic_snapshot_id: i64,
    pub team_key: Option<String>,
    pub triggered_by: String,
    pub recipient_emails: Vec<String>,
    pub message_preview: String,
    pub sent_at: DateTime<Utc>,
}

/// A nudge log joined with the epic and sprint it was sent for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NudgeEntry {
    pub epic_key: String,
    pub sprint_snapshot_id: i64,
    pub sprint_name: String,
    pub epic_summary: String,
    pub team: Option<String>,
    pub epic_teams: Vec<String>,
    pub triggered_by: String,
    pub recipient_emails: Vec<String>,
    pub sent_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sync runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Running,
    Success,
    Failed,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Running => "RUNNING",
            SyncStatus::Success => "SUCCESS",
            SyncStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(SyncStatus::Running),
            "SUCCESS" => Ok(SyncStatus::Success),
            "FAILED" => Ok(SyncStatus::Failed),
            other => Err(format!("unknown sync status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRun {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub trigger: String,
    pub triggered_by: String,
    pub project_key: Option<String>,
    pub sprint_snapshots_created: u64,
    pub epic_snapshots_created: u64,
    pub dod_tasks_created: u64,
    pub error_message: String,
}

// ---------------------------------------------------------------------------
// Plans: unsaved snapshot trees handed to the store in one piece
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SprintPlan {
    pub jira_sprint_id: String,
    pub sprint_name: String,
    pub sprint_state: String,
    pub fingerprint: Fingerprint,
    pub epics: Vec<EpicPlan>,
}

impl SprintPlan {
    pub fn task_count(&self) -> usize {
        self.epics.iter().map(|e| e.tasks.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpicPlan {
    pub jira_issue_id: String,
    pub jira_key: String,
    pub summary: String,
    pub status_name: String,
    pub resolution_name: String,
    pub is_done: bool,
    pub jira_url: String,
    pub teams: TeamMetadata,
    pub tasks: Vec<TaskPlan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskPlan {
    pub jira_issue_id: String,
    pub jira_key: String,
    pub summary: String,
    pub category: String,
    pub status_name: String,
    pub resolution_name: String,
    pub is_done: bool,
    pub jira_url: String,
    pub evidence_link: Option<String>,
    pub non_compliance_reason: String,
}
