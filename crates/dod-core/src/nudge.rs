//! Nudges: reminders about a non-compliant epic, rate-limited per epic.
//!
//! Delivery is left to the caller. [`prepare`] decides whether a nudge may go
//! out and drafts it; [`record`] logs it once the caller has delivered it.

use crate::config::NudgeConfig;
use crate::error::Result;
use crate::evaluate::{evaluate_epic, nudge_state, NudgeState};
use crate::model::{EpicView, NudgeLog, Team};
use crate::scope::Scope;
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Why a nudge was not drafted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NudgeRejection {
    NoSprintSnapshot,
    EpicNotFound { epic_key: String },
    EpicIsCompliant { epic_key: String },
    CooldownActive { epic_key: String, nudge: NudgeState },
    NoRecipients { epic_key: String },
}

impl NudgeRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            NudgeRejection::NoSprintSnapshot => "no_sprint_snapshot",
            NudgeRejection::EpicNotFound { .. } => "epic_not_found",
            NudgeRejection::EpicIsCompliant { .. } => "epic_is_compliant",
            NudgeRejection::CooldownActive { .. } => "cooldown_active",
            NudgeRejection::NoRecipients { .. } => "no_recipients",
        }
    }
}

impl fmt::Display for NudgeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NudgeRejection::NoSprintSnapshot => f.write_str("No sprint snapshot available."),
            NudgeRejection::EpicNotFound { epic_key } => {
                write!(f, "Epic '{epic_key}' not found in selected sprint snapshot.")
            }
            NudgeRejection::EpicIsCompliant { .. } => {
                f.write_str("Epic is currently compliant; nudge is not required.")
            }
            NudgeRejection::CooldownActive { nudge, .. } => write!(
                f,
                "Nudge cooldown is active for this epic ({}s remaining).",
                nudge.seconds_remaining
            ),
            NudgeRejection::NoRecipients { .. } => {
                f.write_str("No recipients resolved for nudge email.")
            }
        }
    }
}

/// A ready-to-send nudge for one epic generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NudgeDraft {
    pub epic_snapshot_id: i64,
    pub sprint_snapshot_id: i64,
    pub epic_key: String,
    /// Set only when the epic has exactly one team.
    pub team_key: Option<String>,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub failing_task_count: usize,
}

pub type Prepared = std::result::Result<NudgeDraft, NudgeRejection>;

/// Check the nudge preconditions for `epic_key` within `scope` and draft the
/// message. Store failures are errors; unmet preconditions are rejections.
pub fn prepare(
    store: &Store,
    config: &NudgeConfig,
    scope: &Scope,
    epic_key: &str,
    explicit_recipients: &[String],
    now: DateTime<Utc>,
) -> Result<Prepared> {
    let outcome = prepare_inner(store, config, scope, epic_key, explicit_recipients, now)?;
    if let Err(rejection) = &outcome {
        tracing::warn!(
            event = "nudge.rejected",
            epic_key,
            reason = rejection.reason(),
            "nudge rejected"
        );
    }
    Ok(outcome)
}

fn prepare_inner(
    store: &Store,
    config: &NudgeConfig,
    scope: &Scope,
    epic_key: &str,
    explicit_recipients: &[String],
    now: DateTime<Utc>,
) -> Result<Prepared> {
    if scope.is_empty() {
        return Ok(Err(NudgeRejection::NoSprintSnapshot));
    }

    let Some(view) = find_epic(store, scope, epic_key)? else {
        return Ok(Err(NudgeRejection::EpicNotFound {
            epic_key: epic_key.to_string(),
        }));
    };
    let key = view.epic.jira_key.clone();

    let evaluation = match evaluate_epic(&view.tasks, None) {
        Some(e) if !e.is_compliant => e,
        _ => return Ok(Err(NudgeRejection::EpicIsCompliant { epic_key: key })),
    };

    let last_sent = store.latest_nudge(view.epic.id)?.map(|n| n.sent_at);
    let state = nudge_state(last_sent, config.cooldown(), now);
    if state.cooldown_active {
        return Ok(Err(NudgeRejection::CooldownActive {
            epic_key: key,
            nudge: state,
        }));
    }

    let mut teams = Vec::new();
    for team_key in &view.epic.teams {
        if let Some(team) = store.get_team(team_key)? {
            teams.push(team);
        }
    }
    let recipients = resolve_recipients(explicit_recipients, &view.epic.teams, &teams, config);
    if recipients.is_empty() {
        return Ok(Err(NudgeRejection::NoRecipients { epic_key: key }));
    }

    let mut lines = vec![
        format!("Epic: {} - {}", view.epic.jira_key, view.epic.summary),
        format!("Jira: {}", view.epic.jira_url),
        String::new(),
        "Non-compliant DoD tasks:".to_string(),
    ];
    for task in &evaluation.failing_tasks {
        let reason = if task.non_compliance_reason.is_empty() {
            "incomplete"
        } else {
            task.non_compliance_reason.as_str()
        };
        lines.push(format!("- {}: {} ({reason})", task.jira_key, task.summary));
        if !task.evidence_link.is_empty() {
            lines.push(format!("  evidence: {}", task.evidence_link));
        }
    }

    let team_key = match view.epic.teams.as_slice() {
        [only] => Some(only.clone()),
        _ => None,
    };

    Ok(Ok(NudgeDraft {
        epic_snapshot_id: view.epic.id,
        sprint_snapshot_id: view.epic.sprint_snapshot_id,
        subject: format!("[DoD Nudge] {key} is non-compliant"),
        body: lines.join("\n"),
        failing_task_count: evaluation.failing_tasks.len(),
        epic_key: key,
        team_key,
        recipients,
    }))
}

/// Most recent generation of the epic within the scope.
fn find_epic(store: &Store, scope: &Scope, epic_key: &str) -> Result<Option<EpicView>> {
    let views = store.load_epics(&scope.ids(), &[], None)?;
    Ok(views
        .into_iter()
        .filter(|v| v.epic.jira_key == epic_key)
        .max_by(|a, b| {
            a.sync_timestamp
                .cmp(&b.sync_timestamp)
                .then(a.epic.sprint_snapshot_id.cmp(&b.epic.sprint_snapshot_id))
                .then(a.epic.id.cmp(&b.epic.id))
        }))
}

fn normalized<'a, I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    items
        .into_iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// First non-empty of: explicit recipients, the teams' own notification
/// emails, the configured per-team recipients, the configured defaults.
pub fn resolve_recipients(
    explicit: &[String],
    team_keys: &[String],
    teams: &[Team],
    config: &NudgeConfig,
) -> Vec<String> {
    let stages = [
        normalized(explicit),
        normalized(teams.iter().flat_map(|t| &t.notification_emails)),
        normalized(
            team_keys
                .iter()
                .filter_map(|k| config.team_recipients.get(k))
                .flatten(),
        ),
        normalized(&config.default_recipients),
    ];
    stages
        .into_iter()
        .find(|stage| !stage.is_empty())
        .unwrap_or_default()
}

/// Log a delivered nudge.
pub fn record(
    store: &Store,
    draft: &NudgeDraft,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<NudgeLog> {
    let log = store.insert_nudge_log(
        draft.epic_snapshot_id,
        draft.team_key.as_deref(),
        actor,
        &draft.recipients,
        &draft.body,
        now,
    )?;
    tracing::info!(
        event = "nudge.sent",
        epic_key = %draft.epic_key,
        sprint_snapshot_id = draft.sprint_snapshot_id,
        recipient_count = draft.recipients.len(),
        nudge_log_id = log.id,
        failing_task_count = draft.failing_task_count,
        "nudge recorded"
    );
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EpicPlan, SprintPlan, TaskPlan};
    use crate::resolver::TeamMetadata;
    use crate::scope::resolve_scope;
    use chrono::{Duration, TimeZone};

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, hour, 0, 0).unwrap()
    }

    fn task(key: &str, done: bool, link: Option<&str>) -> TaskPlan {
        TaskPlan {
            jira_issue_id: key.to_string(),
            jira_key: key.to_string(),
            summary: "DoD - Automated tests".to_string(),
            category: "automated_tests".to_string(),
            status_name: String::new(),
            resolution_name: String::new(),
            is_done: done,
            jira_url: String::new(),
            evidence_link: link.map(String::from),
            non_compliance_reason: crate::resolver::non_compliance_reason(done, link.is_some()),
        }
    }

    fn seed(store: &mut Store, teams: &[&str], tasks: Vec<TaskPlan>) {
        let plan = SprintPlan {
            jira_sprint_id: "10".to_string(),
            sprint_name: "Sprint 10".to_string(),
            sprint_state: "active".to_string(),
            fingerprint: Default::default(),
            epics: vec![EpicPlan {
                jira_issue_id: "100".to_string(),
                jira_key: "ABC-100".to_string(),
                summary: "Payments revamp".to_string(),
                status_name: "In Progress".to_string(),
                resolution_name: String::new(),
                is_done: false,
                jira_url: "https://jira/browse/ABC-100".to_string(),
                teams: TeamMetadata {
                    team_keys: teams.iter().map(|t| t.to_string()).collect(),
                    missing: teams.is_empty(),
                    warnings: Vec::new(),
                },
                tasks,
            }],
        };
        store.commit_sprint(&plan, ts(8)).unwrap();
    }

    fn config() -> NudgeConfig {
        NudgeConfig {
            cooldown_hours: 24,
            default_recipients: vec!["lead@x.io".to_string()],
            ..NudgeConfig::default()
        }
    }

    #[test]
    fn drafts_message_for_failing_tasks() {
        let mut store = Store::open_in_memory().unwrap();
        seed(
            &mut store,
            &["squad_platform"],
            vec![task("ABC-101", false, Some("https://x/1")), task("ABC-102", true, None)],
        );
        let scope = resolve_scope(&store, None).unwrap();

        let draft = prepare(&store, &config(), &scope, "ABC-100", &[], ts(9))
            .unwrap()
            .unwrap();
        assert_eq!(draft.subject, "[DoD Nudge] ABC-100 is non-compliant");
        assert_eq!(draft.recipients, vec!["lead@x.io"]);
        assert_eq!(draft.team_key.as_deref(), Some("squad_platform"));
        assert_eq!(
            draft.body,
            "Epic: ABC-100 - Payments revamp\n\
             Jira: https://jira/browse/ABC-100\n\
             \n\
             Non-compliant DoD tasks:\n\
             - ABC-101: DoD - Automated tests (task_not_done)\n  evidence: https://x/1\n\
             - ABC-102: DoD - Automated tests (missing_evidence_link)"
        );
    }

    #[test]
    fn rejections() {
        let mut store = Store::open_in_memory().unwrap();
        let cfg = config();
        let empty = resolve_scope(&store, None).unwrap();
        assert_eq!(
            prepare(&store, &cfg, &empty, "ABC-100", &[], ts(9)).unwrap(),
            Err(NudgeRejection::NoSprintSnapshot)
        );

        seed(&mut store, &[], vec![task("ABC-101", true, Some("https://x/1"))]);
        let scope = resolve_scope(&store, None).unwrap();
        assert_eq!(
            prepare(&store, &cfg, &scope, "ABC-999", &[], ts(9))
                .unwrap()
                .unwrap_err()
                .reason(),
            "epic_not_found"
        );
        assert_eq!(
            prepare(&store, &cfg, &scope, "ABC-100", &[], ts(9))
                .unwrap()
                .unwrap_err()
                .reason(),
            "epic_is_compliant"
        );
    }

    #[test]
    fn cooldown_blocks_second_nudge() {
        let mut store = Store::open_in_memory().unwrap();
        seed(&mut store, &["squad_platform"], vec![]);
        let scope = resolve_scope(&store, None).unwrap();
        let cfg = config();

        let draft = prepare(&store, &cfg, &scope, "ABC-100", &[], ts(9))
            .unwrap()
            .unwrap();
        let log = record(&store, &draft, "ops@x.io", ts(9)).unwrap();
        assert_eq!(log.team_key.as_deref(), Some("squad_platform"));

        match prepare(&store, &cfg, &scope, "ABC-100", &[], ts(10)).unwrap() {
            Err(NudgeRejection::CooldownActive { nudge, .. }) => {
                assert!(nudge.cooldown_active);
                assert_eq!(nudge.seconds_remaining, 23 * 3600);
            }
            other => panic!("expected cooldown, got {other:?}"),
        }

        let later = ts(9) + Duration::hours(25);
        assert!(prepare(&store, &cfg, &scope, "ABC-100", &[], later).unwrap().is_ok());
    }

    #[test]
    fn no_recipients_rejected() {
        let mut store = Store::open_in_memory().unwrap();
        seed(&mut store, &["squad_a", "squad_b"], vec![]);
        let scope = resolve_scope(&store, None).unwrap();
        let cfg = NudgeConfig::default();
        let outcome = prepare(&store, &cfg, &scope, "ABC-100", &[], ts(9)).unwrap();
        assert_eq!(outcome.unwrap_err().reason(), "no_recipients");

        let draft = prepare(&store, &cfg, &scope, "ABC-100", &[" a@x.io ".to_string()], ts(9))
            .unwrap()
            .unwrap();
        assert_eq!(draft.recipients, vec!["a@x.io"]);
        // Two teams: the log carries no single owning team.
        assert!(draft.team_key.is_none());
    }

    #[test]
    fn recipient_precedence() {
        let mut cfg = config();
        cfg.team_recipients
            .insert("squad_a".to_string(), vec!["map@x.io".to_string()]);
        let team = Team {
            id: 1,
            key: "squad_a".to_string(),
            display_name: String::new(),
            notification_emails: vec!["team@x.io".to_string(), "team@x.io".to_string()],
            scrum_masters: Vec::new(),
            is_active: true,
        };
        let keys = vec!["squad_a".to_string()];

        let explicit = vec!["b@x.io".to_string(), "a@x.io".to_string(), "  ".to_string()];
        assert_eq!(
            resolve_recipients(&explicit, &keys, &[team.clone()], &cfg),
            vec!["a@x.io", "b@x.io"]
        );
        assert_eq!(
            resolve_recipients(&[], &keys, &[team.clone()], &cfg),
            vec!["team@x.io"]
        );

        let silent = Team {
            notification_emails: Vec::new(),
            ..team
        };
        assert_eq!(
            resolve_recipients(&[], &keys, &[silent.clone()], &cfg),
            vec!["map@x.io"]
        );
        assert_eq!(
            resolve_recipients(&[], &["squad_z".to_string()], &[], &cfg),
            vec!["lead@x.io"]
        );
    }
}
