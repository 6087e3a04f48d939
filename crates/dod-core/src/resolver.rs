use crate::issue::IssueRecord;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;

pub const DOD_PREFIX: &str = "DoD - ";
pub const SQUAD_PREFIX: &str = "squad_";
pub const DEFAULT_CATEGORY: &str = "general";

pub const REASON_TASK_NOT_DONE: &str = "task_not_done";
pub const REASON_MISSING_EVIDENCE: &str = "missing_evidence_link";

// ---------------------------------------------------------------------------
// Sprints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sprint {
    pub id: String,
    pub name: String,
    pub state: String,
}

/// Sprints an issue belongs to: the primary sprint field when it yields at
/// least one sprint, otherwise the legacy custom field.
pub fn issue_sprints(issue: &IssueRecord) -> Vec<Sprint> {
    let primary = issue.sprint.as_ref().map(|f| f.refs()).unwrap_or(&[]);
    let refs = if primary.is_empty() {
        issue.legacy_sprints.as_slice()
    } else {
        primary
    };

    refs.iter()
        .map(|r| Sprint {
            id: r.id.clone(),
            name: r
                .name
                .clone()
                .unwrap_or_else(|| format!("Sprint {}", r.id)),
            state: r.state.clone().unwrap_or_else(|| "active".to_string()),
        })
        .collect()
}

/// De-duplicated union of sprints across the batch, in first-seen order.
pub fn extract_sprints(issues: &[IssueRecord]) -> Vec<Sprint> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut sprints = Vec::new();
    for issue in issues {
        for sprint in issue_sprints(issue) {
            if !sprint.id.is_empty() && seen.insert(sprint.id.clone()) {
                sprints.push(sprint);
            }
        }
    }
    sprints
}

pub fn in_sprint(issue: &IssueRecord, sprint_id: &str) -> bool {
    issue_sprints(issue).iter().any(|s| s.id == sprint_id)
}

pub fn issues_in_sprint<'a>(issues: &'a [IssueRecord], sprint_id: &str) -> Vec<&'a IssueRecord> {
    issues.iter().filter(|i| in_sprint(i, sprint_id)).collect()
}

// ---------------------------------------------------------------------------
// Epic-key resolution
// ---------------------------------------------------------------------------

/// One step of epic-key resolution. Rules are tried in order; the first one
/// that yields a key wins.
pub struct EpicRule {
    pub id: &'static str,
    pub resolve: fn(&IssueRecord) -> Option<String>,
}

pub const EPIC_RULES: &[EpicRule] = &[
    EpicRule {
        id: "self_is_epic",
        resolve: |issue| is_epic_type(&issue.issue_type).then(|| issue.key.clone()),
    },
    EpicRule {
        id: "parent_is_epic",
        resolve: |issue| {
            let parent = issue.parent.as_ref()?;
            is_epic_type(parent.issue_type.as_deref()?).then(|| parent.key.clone())
        },
    },
    EpicRule {
        id: "epic_link_field",
        resolve: |issue| {
            issue
                .epic_link
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
        },
    },
];

fn is_epic_type(name: &str) -> bool {
    name.eq_ignore_ascii_case("epic")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpicResolution {
    pub rule: &'static str,
    pub epic_key: String,
}

pub fn resolve_epic(issue: &IssueRecord) -> Option<EpicResolution> {
    EPIC_RULES.iter().find_map(|rule| {
        (rule.resolve)(issue).map(|epic_key| EpicResolution {
            rule: rule.id,
            epic_key,
        })
    })
}

/// Epic key an issue groups under, or `None` when it belongs to no epic.
pub fn resolve_epic_key(issue: &IssueRecord) -> Option<String> {
    resolve_epic(issue).map(|r| r.epic_key)
}

// ---------------------------------------------------------------------------
// Done predicate
// ---------------------------------------------------------------------------

pub struct DonePredicate {
    pub id: &'static str,
    pub test: fn(&IssueRecord) -> bool,
}

/// Resolution is consulted first; either predicate alone marks an issue done.
pub const DONE_PREDICATES: &[DonePredicate] = &[
    DonePredicate {
        id: "resolution_done",
        test: |issue| {
            issue
                .resolution
                .as_deref()
                .is_some_and(|r| r.trim().eq_ignore_ascii_case("done"))
        },
    },
    DonePredicate {
        id: "status_category_done",
        test: |issue| {
            issue
                .status_category
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case("done"))
        },
    },
];

pub fn done_reason(issue: &IssueRecord) -> Option<&'static str> {
    DONE_PREDICATES
        .iter()
        .find(|p| (p.test)(issue))
        .map(|p| p.id)
}

pub fn is_done(issue: &IssueRecord) -> bool {
    done_reason(issue).is_some()
}

// ---------------------------------------------------------------------------
// DoD tasks
// ---------------------------------------------------------------------------

pub fn is_dod_task(issue: &IssueRecord) -> bool {
    issue.summary.starts_with(DOD_PREFIX)
}

fn non_alnum() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static regex"))
}

/// Category slug for a DoD task summary:
/// `"DoD - Threat Modelling Done!"` → `threat_modelling_done`.
pub fn dod_category(summary: &str) -> String {
    let remainder = summary.strip_prefix(DOD_PREFIX).unwrap_or(summary);
    let lowered = remainder.trim().to_lowercase();
    let slug = non_alnum().replace_all(&lowered, "_");
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        DEFAULT_CATEGORY.to_string()
    } else {
        slug.to_string()
    }
}

/// Comma-joined reason codes for a DoD task; empty when it is compliant.
pub fn non_compliance_reason(is_done: bool, has_evidence_link: bool) -> String {
    let mut reasons = Vec::new();
    if !is_done {
        reasons.push(REASON_TASK_NOT_DONE);
    }
    if !has_evidence_link {
        reasons.push(REASON_MISSING_EVIDENCE);
    }
    reasons.join(",")
}

// ---------------------------------------------------------------------------
// Team labels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeamMetadata {
    pub team_keys: BTreeSet<String>,
    pub missing: bool,
    /// Malformed squad labels exactly as written, sorted and de-duplicated.
    pub warnings: Vec<String>,
}

/// Parse `squad_<name>` labels across a set of issues (usually an epic plus
/// everything linked to it).
pub fn extract_team_metadata<'a, I>(issues: I) -> TeamMetadata
where
    I: IntoIterator<Item = &'a IssueRecord>,
{
    let mut team_keys = BTreeSet::new();
    let mut warnings = BTreeSet::new();

    for issue in issues {
        for label in &issue.labels {
            let raw = label.trim();
            if raw.is_empty() {
                continue;
            }
            let normalized = raw.to_lowercase();
            if let Some(rest) = normalized.strip_prefix(SQUAD_PREFIX) {
                let name = rest.trim();
                if name.is_empty() {
                    warnings.insert(raw.to_string());
                } else {
                    team_keys.insert(format!("{SQUAD_PREFIX}{name}"));
                }
            } else if normalized.starts_with("squad") {
                warnings.insert(raw.to_string());
            }
        }
    }

    TeamMetadata {
        missing: team_keys.is_empty(),
        team_keys,
        warnings: warnings.into_iter().collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
