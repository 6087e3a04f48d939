//! Active-sprint issues in, sprint generations out. Each changed sprint is
//! committed in its own transaction; the first error aborts the run and
//! earlier commits stay.

use crate::adapter::{first_evidence_url, IssueSource};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::fingerprint::{is_unchanged, Fingerprint};
use crate::issue::IssueRecord;
use crate::model::{EpicPlan, SprintPlan, TaskPlan};
use crate::resolver::{
    dod_category, extract_sprints, extract_team_metadata, is_dod_task, is_done, issues_in_sprint,
    non_compliance_reason, resolve_epic_key, Sprint,
};
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

// ---------------------------------------------------------------------------
// SyncSummary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SprintOutcome {
    Created {
        snapshot_id: i64,
        epics: usize,
        dod_tasks: usize,
    },
    /// Fingerprint equal to the latest generation; nothing written.
    Unchanged,
    /// No issue in the batch belongs to this sprint.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SprintResult {
    pub jira_sprint_id: String,
    pub sprint_name: String,
    #[serde(flatten)]
    pub outcome: SprintOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub sprint_generations_created: usize,
    pub epic_records_created: usize,
    pub dod_task_records_created: usize,
    pub sprints: Vec<SprintResult>,
}

impl SyncSummary {
    fn record(&mut self, sprint: &Sprint, outcome: SprintOutcome) {
        if let SprintOutcome::Created {
            epics, dod_tasks, ..
        } = outcome
        {
            self.sprint_generations_created += 1;
            self.epic_records_created += epics;
            self.dod_task_records_created += dod_tasks;
        }
        self.sprints.push(SprintResult {
            jira_sprint_id: sprint.id.clone(),
            sprint_name: sprint.name.clone(),
            outcome,
        });
    }
}

// ---------------------------------------------------------------------------
// SnapshotSyncService
// ---------------------------------------------------------------------------

pub struct SnapshotSyncService<'a, S> {
    store: &'a mut Store,
    source: S,
    config: &'a SyncConfig,
}

impl<'a, S: IssueSource> SnapshotSyncService<'a, S> {
    pub fn new(store: &'a mut Store, source: S, config: &'a SyncConfig) -> Self {
        Self {
            store,
            source,
            config,
        }
    }

    pub fn sync_active_sprint(&mut self, project_key: Option<&str>) -> Result<SyncSummary> {
        self.sync_active_sprint_at(project_key, Utc::now())
    }

    /// Run one sync with an explicit sync instant shared by every generation
    /// written in this invocation.
    pub fn sync_active_sprint_at(
        &mut self,
        project_key: Option<&str>,
        sync_timestamp: DateTime<Utc>,
    ) -> Result<SyncSummary> {
        let issues = dedupe_by_key(
            self.source
                .search_active_sprint_issues(project_key, self.config.max_results)?,
        );
        let mut summary = SyncSummary::default();
        if issues.is_empty() {
            tracing::info!("no active sprint issues returned");
            return Ok(summary);
        }

        let sprints = extract_sprints(&issues);
        tracing::debug!(
            issues = issues.len(),
            sprints = sprints.len(),
            "active sprint batch fetched"
        );

        for sprint in &sprints {
            let outcome = self.sync_sprint(sprint, &issues, sync_timestamp)?;
            match &outcome {
                SprintOutcome::Created {
                    snapshot_id,
                    epics,
                    dod_tasks,
                } => tracing::info!(
                    sprint = %sprint.id,
                    snapshot_id,
                    epics,
                    dod_tasks,
                    "sprint generation created"
                ),
                SprintOutcome::Unchanged => {
                    tracing::info!(sprint = %sprint.id, "sprint unchanged, skipped")
                }
                SprintOutcome::Empty => tracing::debug!(sprint = %sprint.id, "sprint has no issues"),
            }
            summary.record(sprint, outcome);
        }

        Ok(summary)
    }

    fn sync_sprint(
        &mut self,
        sprint: &Sprint,
        issues: &[IssueRecord],
        sync_timestamp: DateTime<Utc>,
    ) -> Result<SprintOutcome> {
        let in_sprint = issues_in_sprint(issues, &sprint.id);
        if in_sprint.is_empty() {
            return Ok(SprintOutcome::Empty);
        }

        let fetched = self.fetch_missing_epics(&in_sprint)?;
        let fingerprint = Fingerprint::build(in_sprint.iter().copied().chain(fetched.iter()));

        let latest = self.store.latest_fingerprint(&sprint.id)?;
        if is_unchanged(latest.as_ref(), &fingerprint) {
            return Ok(SprintOutcome::Unchanged);
        }

        let plan = self.plan_sprint(sprint, &in_sprint, &fetched, fingerprint)?;
        let committed = self.store.commit_sprint(&plan, sync_timestamp)?;
        Ok(SprintOutcome::Created {
            snapshot_id: committed.snapshot_id,
            epics: committed.epics,
            dod_tasks: committed.dod_tasks,
        })
    }

    /// Fetch every epic referenced by an in-sprint issue but not itself in
    /// the sprint, once each, in first-referenced order.
    fn fetch_missing_epics(&self, in_sprint: &[&IssueRecord]) -> Result<Vec<IssueRecord>> {
        let known: HashSet<&str> = in_sprint.iter().map(|i| i.key.as_str()).collect();
        let mut missing = Vec::new();
        for issue in in_sprint {
            if let Some(epic_key) = resolve_epic_key(issue) {
                if !known.contains(epic_key.as_str()) && !missing.contains(&epic_key) {
                    missing.push(epic_key);
                }
            }
        }

        let mut fetched = Vec::with_capacity(missing.len());
        for key in &missing {
            tracing::debug!(epic = %key, "fetching epic outside sprint");
            fetched.push(self.source.get_issue(key)?);
        }
        Ok(fetched)
    }

    fn plan_sprint(
        &self,
        sprint: &Sprint,
        in_sprint: &[&IssueRecord],
        fetched: &[IssueRecord],
        fingerprint: Fingerprint,
    ) -> Result<SprintPlan> {
        // Later entries win, matching how the fingerprint treats repeated keys.
        let mut by_key: HashMap<&str, &IssueRecord> = HashMap::new();
        for issue in in_sprint.iter().copied().chain(fetched.iter()) {
            by_key.insert(issue.key.as_str(), issue);
        }

        let mut groups: Vec<(String, Vec<&IssueRecord>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for &issue in in_sprint {
            let Some(epic_key) = resolve_epic_key(issue) else {
                continue;
            };
            match index.get(&epic_key) {
                Some(&i) => groups[i].1.push(issue),
                None => {
                    index.insert(epic_key.clone(), groups.len());
                    groups.push((epic_key, vec![issue]));
                }
            }
        }

        let mut epics = Vec::with_capacity(groups.len());
        for (epic_key, linked) in &groups {
            let refetched;
            let epic_issue = match by_key.get(epic_key.as_str()) {
                Some(issue) => *issue,
                None => {
                    refetched = self.source.get_issue(epic_key)?;
                    &refetched
                }
            };
            epics.push(self.plan_epic(epic_issue, linked)?);
        }

        Ok(SprintPlan {
            jira_sprint_id: sprint.id.clone(),
            sprint_name: sprint.name.clone(),
            sprint_state: sprint.state.clone(),
            fingerprint,
            epics,
        })
    }

    fn plan_epic(&self, epic: &IssueRecord, linked: &[&IssueRecord]) -> Result<EpicPlan> {
        let teams = extract_team_metadata(std::iter::once(epic).chain(linked.iter().copied()));
        if !teams.warnings.is_empty() {
            tracing::debug!(epic = %epic.key, warnings = ?teams.warnings, "malformed squad labels");
        }

        let mut tasks = Vec::new();
        for issue in linked.iter().filter(|i| is_dod_task(i)) {
            let links = self.source.get_issue_remote_links(&issue.key)?;
            let evidence_link = first_evidence_url(&links);
            let done = is_done(issue);
            tasks.push(TaskPlan {
                jira_issue_id: issue.id.clone(),
                jira_key: issue.key.clone(),
                summary: issue.summary.clone(),
                category: dod_category(&issue.summary),
                status_name: issue.status_or_unknown().to_string(),
                resolution_name: issue.resolution_or_blank().to_string(),
                is_done: done,
                jira_url: self.source.browse_url(&issue.key),
                non_compliance_reason: non_compliance_reason(done, evidence_link.is_some()),
                evidence_link,
            });
        }

        Ok(EpicPlan {
            jira_issue_id: epic.id.clone(),
            jira_key: epic.key.clone(),
            summary: epic.summary.clone(),
            status_name: epic.status_or_unknown().to_string(),
            resolution_name: epic.resolution_or_blank().to_string(),
            is_done: is_done(epic),
            jira_url: self.source.browse_url(&epic.key),
            teams,
            tasks,
        })
    }
}

/// Offset paging can return an issue twice when it moves between pages.
/// Keep the last copy, at its last position, so grouping sees what the
/// fingerprint sees.
fn dedupe_by_key(issues: Vec<IssueRecord>) -> Vec<IssueRecord> {
    let last: HashMap<&str, usize> = issues
        .iter()
        .enumerate()
        .map(|(i, issue)| (issue.key.as_str(), i))
        .collect();
    let keep: HashSet<usize> = last.into_values().collect();
    if keep.len() == issues.len() {
        return issues;
    }
    tracing::debug!(
        duplicates = issues.len() - keep.len(),
        "dropped repeated issues from the batch"
    );
    issues
        .into_iter()
        .enumerate()
        .filter(|(i, _)| keep.contains(i))
        .map(|(_, issue)| issue)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
