use crate::model::{DodTaskSnapshot, EpicView};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

pub const REASON_NO_DOD_TASKS: &str = "no_dod_tasks";
pub const REASON_INCOMPLETE_DOD_TASKS: &str = "incomplete_dod_tasks";

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation<'a> {
    pub is_compliant: bool,
    pub reasons: Vec<&'static str>,
    pub failing_tasks: Vec<&'a DodTaskSnapshot>,
    pub scoped_tasks: Vec<&'a DodTaskSnapshot>,
}

/// A blank category filter behaves like no filter.
fn active_filter(category: Option<&str>) -> Option<&str> {
    category.filter(|c| !c.is_empty())
}

/// Evaluate one epic's DoD tasks, optionally restricted to one category.
///
/// Returns `None` when a category filter leaves no tasks: such an epic is
/// outside the filtered view altogether, not merely non-compliant.
pub fn evaluate_epic<'a>(
    tasks: &'a [DodTaskSnapshot],
    category: Option<&str>,
) -> Option<Evaluation<'a>> {
    let filter = active_filter(category);
    let scoped_tasks: Vec<&DodTaskSnapshot> = tasks
        .iter()
        .filter(|t| filter.map_or(true, |c| t.category == c))
        .collect();

    if scoped_tasks.is_empty() {
        if filter.is_some() {
            return None;
        }
        return Some(Evaluation {
            is_compliant: false,
            reasons: vec![REASON_NO_DOD_TASKS],
            failing_tasks: Vec::new(),
            scoped_tasks,
        });
    }

    let failing_tasks: Vec<&DodTaskSnapshot> = scoped_tasks
        .iter()
        .copied()
        .filter(|t| !t.is_compliant())
        .collect();
    let mut reasons = Vec::new();
    if !failing_tasks.is_empty() {
        reasons.push(REASON_INCOMPLETE_DOD_TASKS);
    }

    Some(Evaluation {
        is_compliant: failing_tasks.is_empty(),
        reasons,
        failing_tasks,
        scoped_tasks,
    })
}

/// An epic paired with its evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluated<'a> {
    pub view: &'a EpicView,
    pub evaluation: Evaluation<'a>,
}

/// Evaluate every epic, dropping the ones a category filter excludes.
pub fn evaluate_all<'a>(views: &'a [EpicView], category: Option<&str>) -> Vec<Evaluated<'a>> {
    views
        .iter()
        .filter_map(|view| {
            evaluate_epic(&view.tasks, category).map(|evaluation| Evaluated { view, evaluation })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// `part / total` as a percentage rounded to two decimals, ties to even;
/// `0.0` when empty.
pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = part as f64 / total as f64 * 100.0;
    (pct * 100.0).round_ties_even() / 100.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub total_epics: usize,
    pub compliant_epics: usize,
    pub non_compliant_epics: usize,
    pub compliance_percentage: f64,
    pub epics_with_missing_squad_labels: usize,
    pub epics_with_invalid_squad_labels: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamMetrics {
    pub team: String,
    pub total_epics: usize,
    pub compliant_epics: usize,
    pub non_compliant_epics: usize,
    pub compliance_percentage: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryMetrics {
    pub category: String,
    pub total_tasks: usize,
    pub compliant_tasks: usize,
    pub non_compliant_tasks: usize,
    pub compliance_percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub summary: MetricsSummary,
    pub by_team: Vec<TeamMetrics>,
    pub by_category: Vec<CategoryMetrics>,
}

pub fn aggregate(evaluated: &[Evaluated<'_>], category: Option<&str>) -> Metrics {
    let total = evaluated.len();
    let compliant = evaluated
        .iter()
        .filter(|e| e.evaluation.is_compliant)
        .count();

    let summary = MetricsSummary {
        total_epics: total,
        compliant_epics: compliant,
        non_compliant_epics: total - compliant,
        compliance_percentage: percentage(compliant, total),
        epics_with_missing_squad_labels: evaluated
            .iter()
            .filter(|e| e.view.epic.missing_squad_labels)
            .count(),
        epics_with_invalid_squad_labels: evaluated
            .iter()
            .filter(|e| !e.view.epic.squad_label_warnings.is_empty())
            .count(),
    };

    Metrics {
        summary,
        by_team: team_metrics(evaluated),
        by_category: category_metrics(evaluated, category),
    }
}

/// Per-team rollup. An epic owned by several teams counts once for each.
pub fn team_metrics(evaluated: &[Evaluated<'_>]) -> Vec<TeamMetrics> {
    let mut counters: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for e in evaluated {
        for team in &e.view.epic.teams {
            let entry = counters.entry(team.as_str()).or_default();
            entry.0 += 1;
            if e.evaluation.is_compliant {
                entry.1 += 1;
            }
        }
    }

    let mut rows: Vec<TeamMetrics> = counters
        .into_iter()
        .map(|(team, (total, compliant))| TeamMetrics {
            team: team.to_string(),
            total_epics: total,
            compliant_epics: compliant,
            non_compliant_epics: total - compliant,
            compliance_percentage: percentage(compliant, total),
            rank: 0,
        })
        .collect();

    rows.sort_by(|a, b| {
        b.compliance_percentage
            .total_cmp(&a.compliance_percentage)
            .then(b.compliant_epics.cmp(&a.compliant_epics))
            .then(b.total_epics.cmp(&a.total_epics))
            .then_with(|| a.team.cmp(&b.team))
    });
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i + 1;
    }
    rows
}

/// Per-category rollup over scoped tasks. With a filter the result is exactly
/// that one category, even when it has no tasks.
pub fn category_metrics(evaluated: &[Evaluated<'_>], category: Option<&str>) -> Vec<CategoryMetrics> {
    let mut counters: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for e in evaluated {
        for task in &e.evaluation.scoped_tasks {
            let entry = counters.entry(task.category.as_str()).or_default();
            entry.0 += 1;
            if task.is_compliant() {
                entry.1 += 1;
            }
        }
    }

    let categories: Vec<&str> = match active_filter(category) {
        Some(c) => vec![c],
        None => counters.keys().copied().collect(),
    };

    categories
        .into_iter()
        .filter(|c| !c.is_empty())
        .map(|c| {
            let (total, compliant) = counters.get(c).copied().unwrap_or_default();
            CategoryMetrics {
                category: c.to_string(),
                total_tasks: total,
                compliant_tasks: compliant,
                non_compliant_tasks: total - compliant,
                compliance_percentage: percentage(compliant, total),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Nudge cooldown
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NudgeState {
    pub cooldown_active: bool,
    pub seconds_remaining: i64,
    pub last_sent_at: Option<DateTime<Utc>>,
}

/// Cooldown state given the most recent nudge for an epic, if any.
pub fn nudge_state(
    last_sent_at: Option<DateTime<Utc>>,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> NudgeState {
    let Some(sent) = last_sent_at else {
        return NudgeState {
            cooldown_active: false,
            seconds_remaining: 0,
            last_sent_at: None,
        };
    };
    let expires_at = sent + cooldown;
    NudgeState {
        cooldown_active: expires_at > now,
        seconds_remaining: (expires_at - now).num_seconds().max(0),
        last_sent_at: Some(sent),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
