use crate::error::{DodError, Result};
use crate::evaluate::{aggregate, evaluate_all, nudge_state, Evaluated, Metrics, NudgeState};
use crate::model::{format_timestamp, NudgeEntry, SprintSnapshot};
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_NUDGE_HISTORY_LIMIT: usize = 50;
pub const MAX_NUDGE_HISTORY_LIMIT: usize = 200;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeMode {
    Single,
    Aggregate,
}

/// Sprint generations a report covers, most recent first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    pub snapshots: Vec<SprintSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopePayload {
    pub scope_mode: ScopeMode,
    pub sprint_snapshot_count: usize,
    pub sprint_snapshot_ids: Vec<i64>,
    pub sprint_snapshot_id: i64,
    pub jira_sprint_id: String,
    pub sprint_name: String,
    pub sprint_state: String,
    pub sync_timestamp: String,
}

impl Scope {
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.snapshots.iter().map(|s| s.id).collect()
    }

    pub fn mode(&self) -> ScopeMode {
        if self.snapshots.len() == 1 {
            ScopeMode::Single
        } else {
            ScopeMode::Aggregate
        }
    }

    /// Description of the scope for reports; `None` when nothing is in scope.
    pub fn payload(&self) -> Option<ScopePayload> {
        let latest = self.snapshots.first()?;
        let count = self.snapshots.len();
        let payload = match self.mode() {
            ScopeMode::Single => ScopePayload {
                scope_mode: ScopeMode::Single,
                sprint_snapshot_count: 1,
                sprint_snapshot_ids: vec![latest.id],
                sprint_snapshot_id: latest.id,
                jira_sprint_id: latest.jira_sprint_id.clone(),
                sprint_name: latest.sprint_name.clone(),
                sprint_state: latest.sprint_state.clone(),
                sync_timestamp: format_timestamp(latest.sync_timestamp),
            },
            ScopeMode::Aggregate => ScopePayload {
                scope_mode: ScopeMode::Aggregate,
                sprint_snapshot_count: count,
                sprint_snapshot_ids: self.ids(),
                sprint_snapshot_id: latest.id,
                jira_sprint_id: "aggregate".to_string(),
                sprint_name: format!("All Active Sprints ({count})"),
                sprint_state: "mixed".to_string(),
                sync_timestamp: format_timestamp(latest.sync_timestamp),
            },
        };
        Some(payload)
    }
}

/// Resolve the generations a report covers.
///
/// An explicit id selects that generation alone (empty when unknown).
/// Otherwise the latest generation of every active sprint, and failing that
/// every generation from the most recent sync.
pub fn resolve_scope(store: &Store, explicit_snapshot_id: Option<i64>) -> Result<Scope> {
    if let Some(id) = explicit_snapshot_id {
        return Ok(Scope {
            snapshots: store.get_sprint_snapshot(id)?.into_iter().collect(),
        });
    }

    let active = store.active_sprint_snapshots()?;
    if !active.is_empty() {
        let mut seen = HashSet::new();
        let mut latest: Vec<SprintSnapshot> = active
            .into_iter()
            .filter(|s| seen.insert(s.jira_sprint_id.clone()))
            .collect();
        latest.sort_by(|a, b| {
            b.sync_timestamp
                .cmp(&a.sync_timestamp)
                .then(b.id.cmp(&a.id))
        });
        return Ok(Scope { snapshots: latest });
    }

    Ok(Scope {
        snapshots: store.latest_sync_batch()?,
    })
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EpicStatus {
    #[default]
    All,
    Done,
    Open,
}

impl EpicStatus {
    fn done_flag(self) -> Option<bool> {
        match self {
            EpicStatus::All => None,
            EpicStatus::Done => Some(true),
            EpicStatus::Open => Some(false),
        }
    }
}

impl FromStr for EpicStatus {
    type Err = DodError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" | "" => Ok(EpicStatus::All),
            "done" => Ok(EpicStatus::Done),
            "open" => Ok(EpicStatus::Open),
            other => Err(DodError::Config(format!(
                "unknown epic status '{other}' (expected all, done or open)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    #[default]
    All,
    Compliant,
    NonCompliant,
}

impl ComplianceStatus {
    pub fn admits(self, is_compliant: bool) -> bool {
        match self {
            ComplianceStatus::All => true,
            ComplianceStatus::Compliant => is_compliant,
            ComplianceStatus::NonCompliant => !is_compliant,
        }
    }
}

impl FromStr for ComplianceStatus {
    type Err = DodError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "all" | "" => Ok(ComplianceStatus::All),
            "compliant" => Ok(ComplianceStatus::Compliant),
            "non_compliant" => Ok(ComplianceStatus::NonCompliant),
            other => Err(DodError::Config(format!(
                "unknown compliance status '{other}' (expected all, compliant or non_compliant)"
            ))),
        }
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComplianceStatus::All => "all",
            ComplianceStatus::Compliant => "compliant",
            ComplianceStatus::NonCompliant => "non_compliant",
        })
    }
}

/// Epic selection within a scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpicFilter {
    pub squads: Vec<String>,
    pub epic_status: EpicStatus,
}

/// Split a comma-separated list, trimming and dropping blanks.
pub fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailingTask {
    pub jira_key: String,
    pub summary: String,
    pub category: String,
    pub is_done: bool,
    pub jira_url: String,
    pub has_evidence_link: bool,
    pub evidence_link: String,
    pub non_compliance_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpicReport {
    pub sprint_snapshot_id: i64,
    pub jira_sprint_id: String,
    pub sprint_name: String,
    pub jira_key: String,
    pub summary: String,
    pub status_name: String,
    pub resolution_name: String,
    pub is_done: bool,
    pub is_compliant: bool,
    pub jira_url: String,
    pub teams: Vec<String>,
    pub missing_squad_labels: bool,
    pub squad_label_warnings: Vec<String>,
    pub compliance_reasons: Vec<String>,
    pub failing_dod_tasks: Vec<FailingTask>,
    pub nudge: NudgeState,
}

impl EpicReport {
    fn build(e: &Evaluated<'_>, nudge: NudgeState) -> Self {
        let epic = &e.view.epic;
        Self {
            sprint_snapshot_id: epic.sprint_snapshot_id,
            jira_sprint_id: e.view.jira_sprint_id.clone(),
            sprint_name: e.view.sprint_name.clone(),
            jira_key: epic.jira_key.clone(),
            summary: epic.summary.clone(),
            status_name: epic.status_name.clone(),
            resolution_name: epic.resolution_name.clone(),
            is_done: epic.is_done,
            is_compliant: e.evaluation.is_compliant,
            jira_url: epic.jira_url.clone(),
            teams: epic.teams.clone(),
            missing_squad_labels: epic.missing_squad_labels,
            squad_label_warnings: epic.squad_label_warnings.clone(),
            compliance_reasons: e.evaluation.reasons.iter().map(|r| r.to_string()).collect(),
            failing_dod_tasks: e
                .evaluation
                .failing_tasks
                .iter()
                .map(|t| FailingTask {
                    jira_key: t.jira_key.clone(),
                    summary: t.summary.clone(),
                    category: t.category.clone(),
                    is_done: t.is_done,
                    jira_url: t.jira_url.clone(),
                    has_evidence_link: t.has_evidence_link,
                    evidence_link: t.evidence_link.clone(),
                    non_compliance_reason: t.non_compliance_reason.clone(),
                })
                .collect(),
            nudge,
        }
    }
}

/// Compliance metrics over the scope. An empty scope yields all zeros.
pub fn metrics(
    store: &Store,
    scope: &Scope,
    filter: &EpicFilter,
    category: Option<&str>,
) -> Result<Metrics> {
    if scope.is_empty() {
        return Ok(Metrics::default());
    }
    let views = store.load_epics(&scope.ids(), &filter.squads, filter.epic_status.done_flag())?;
    let evaluated = evaluate_all(&views, category);
    Ok(aggregate(&evaluated, category))
}

/// Evaluated epics of the scope that pass the compliance filter, each with
/// its current nudge cooldown state.
pub fn epic_reports(
    store: &Store,
    scope: &Scope,
    filter: &EpicFilter,
    category: Option<&str>,
    status: ComplianceStatus,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<EpicReport>> {
    if scope.is_empty() {
        return Ok(Vec::new());
    }
    let views = store.load_epics(&scope.ids(), &filter.squads, filter.epic_status.done_flag())?;

    let mut reports = Vec::new();
    for e in evaluate_all(&views, category) {
        if !status.admits(e.evaluation.is_compliant) {
            continue;
        }
        let last_sent = store.latest_nudge(e.view.epic.id)?.map(|n| n.sent_at);
        reports.push(EpicReport::build(&e, nudge_state(last_sent, cooldown, now)));
    }
    Ok(reports)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NudgeHistory {
    pub count: usize,
    pub total_count: u64,
    pub nudges: Vec<NudgeEntry>,
}

pub fn clamp_history_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_NUDGE_HISTORY_LIMIT)
        .clamp(1, MAX_NUDGE_HISTORY_LIMIT)
}

/// Nudges sent within the scope, newest first.
pub fn nudge_history(
    store: &Store,
    scope: &Scope,
    squads: &[String],
    limit: Option<usize>,
) -> Result<NudgeHistory> {
    let (total_count, nudges) =
        store.nudge_history(&scope.ids(), squads, clamp_history_limit(limit))?;
    Ok(NudgeHistory {
        count: nudges.len(),
        total_count,
        nudges,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
