use crate::cmd::{load_config, open_store};
use crate::output::{list_or_dash, print_json, print_table, yes_no};
use chrono::Utc;
use clap::Args;
use dod_core::evaluate::Metrics;
use dod_core::scope::{
    self, parse_csv, ComplianceStatus, EpicFilter, EpicReport, EpicStatus, Scope,
};
use dod_core::store::Store;
use std::path::Path;

/// Scope and filter flags shared by the reporting commands.
#[derive(Args, Debug, Clone, Default)]
pub struct ReportArgs {
    /// Sprint generation id (default: latest generation of every active sprint)
    #[arg(long)]
    pub snapshot: Option<i64>,

    /// Only DoD tasks of this category, e.g. automated_tests
    #[arg(long)]
    pub category: Option<String>,

    /// Team keys, comma separated
    #[arg(long = "squad")]
    pub squads: Vec<String>,

    /// all | done | open
    #[arg(long, default_value = "all")]
    pub epic_status: String,
}

impl ReportArgs {
    pub fn filter(&self) -> anyhow::Result<EpicFilter> {
        Ok(EpicFilter {
            squads: self.squads.iter().flat_map(|s| parse_csv(s)).collect(),
            epic_status: self.epic_status.parse::<EpicStatus>()?,
        })
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    fn scope(&self, store: &Store) -> anyhow::Result<Scope> {
        Ok(scope::resolve_scope(store, self.snapshot)?)
    }
}

// ---------------------------------------------------------------------------
// dod metrics
// ---------------------------------------------------------------------------

pub fn metrics(root: &Path, args: &ReportArgs, json: bool) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let filter = args.filter()?;
    let scope = args.scope(&store)?;
    let metrics = scope::metrics(&store, &scope, &filter, args.category())?;

    if json {
        return print_json(&serde_json::json!({
            "scope": scope.payload(),
            "filters": filters_json(args, &filter, None),
            "summary": metrics.summary,
            "by_team": metrics.by_team,
            "by_category": metrics.by_category,
        }));
    }

    print_scope(&scope);
    print_metrics(&metrics);
    Ok(())
}

fn print_metrics(metrics: &Metrics) {
    let s = &metrics.summary;
    println!(
        "Epics: {} total, {} compliant, {} non-compliant ({:.2}%)",
        s.total_epics, s.compliant_epics, s.non_compliant_epics, s.compliance_percentage
    );
    println!(
        "Squad labels: {} missing, {} malformed",
        s.epics_with_missing_squad_labels, s.epics_with_invalid_squad_labels
    );

    if !metrics.by_team.is_empty() {
        println!();
        let rows = metrics
            .by_team
            .iter()
            .map(|t| {
                vec![
                    t.rank.to_string(),
                    t.team.clone(),
                    t.total_epics.to_string(),
                    t.compliant_epics.to_string(),
                    t.non_compliant_epics.to_string(),
                    format!("{:.2}%", t.compliance_percentage),
                ]
            })
            .collect();
        print_table(
            &["RANK", "TEAM", "EPICS", "COMPLIANT", "NON-COMPLIANT", "PCT"],
            rows,
        );
    }

    if !metrics.by_category.is_empty() {
        println!();
        let rows = metrics
            .by_category
            .iter()
            .map(|c| {
                vec![
                    c.category.clone(),
                    c.total_tasks.to_string(),
                    c.compliant_tasks.to_string(),
                    c.non_compliant_tasks.to_string(),
                    format!("{:.2}%", c.compliance_percentage),
                ]
            })
            .collect();
        print_table(
            &["CATEGORY", "TASKS", "COMPLIANT", "NON-COMPLIANT", "PCT"],
            rows,
        );
    }
}

// ---------------------------------------------------------------------------
// dod epics / dod non-compliant
// ---------------------------------------------------------------------------

pub fn epics(
    root: &Path,
    args: &ReportArgs,
    compliance_status: &str,
    json: bool,
) -> anyhow::Result<()> {
    let status = compliance_status.parse::<ComplianceStatus>()?;
    list_epics(root, args, status, json)
}

pub fn non_compliant(root: &Path, args: &ReportArgs, json: bool) -> anyhow::Result<()> {
    list_epics(root, args, ComplianceStatus::NonCompliant, json)
}

fn list_epics(
    root: &Path,
    args: &ReportArgs,
    status: ComplianceStatus,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let store = open_store(root)?;
    let filter = args.filter()?;
    let scope = args.scope(&store)?;
    let reports = scope::epic_reports(
        &store,
        &scope,
        &filter,
        args.category(),
        status,
        config.nudge.cooldown(),
        Utc::now(),
    )?;

    if json {
        return print_json(&serde_json::json!({
            "scope": scope.payload(),
            "filters": filters_json(args, &filter, Some(status)),
            "count": reports.len(),
            "epics": reports,
        }));
    }

    print_scope(&scope);
    if reports.is_empty() {
        println!("No epics match.");
        return Ok(());
    }
    print_reports(&reports, status == ComplianceStatus::NonCompliant);
    Ok(())
}

fn print_reports(reports: &[EpicReport], with_tasks: bool) {
    let rows = reports
        .iter()
        .map(|r| {
            vec![
                r.jira_key.clone(),
                r.sprint_name.clone(),
                list_or_dash(&r.teams),
                yes_no(r.is_done),
                yes_no(r.is_compliant),
                r.failing_dod_tasks.len().to_string(),
                nudge_cell(r),
                r.summary.clone(),
            ]
        })
        .collect();
    print_table(
        &[
            "EPIC", "SPRINT", "TEAMS", "DONE", "COMPLIANT", "FAILING", "NUDGE", "SUMMARY",
        ],
        rows,
    );

    if !with_tasks {
        return;
    }
    for r in reports {
        println!("\n{} ({})", r.jira_key, r.compliance_reasons.join(", "));
        for t in &r.failing_dod_tasks {
            let reason = if t.non_compliance_reason.is_empty() {
                "incomplete"
            } else {
                t.non_compliance_reason.as_str()
            };
            println!("  - {}: {} [{}] ({reason})", t.jira_key, t.summary, t.category);
        }
    }
}

fn nudge_cell(r: &EpicReport) -> String {
    if r.nudge.cooldown_active {
        format!("cooldown {}m", (r.nudge.seconds_remaining + 59) / 60)
    } else if r.nudge.last_sent_at.is_some() {
        "ready (sent before)".to_string()
    } else {
        "ready".to_string()
    }
}

fn print_scope(scope: &Scope) {
    match scope.payload() {
        Some(p) => println!(
            "Scope: {} ({} generation(s), synced {})\n",
            p.sprint_name, p.sprint_snapshot_count, p.sync_timestamp
        ),
        None => println!("Scope: no sprint generations. Run `dod sync`.\n"),
    }
}

fn filters_json(
    args: &ReportArgs,
    filter: &EpicFilter,
    status: Option<ComplianceStatus>,
) -> serde_json::Value {
    serde_json::json!({
        "category": args.category(),
        "squads": filter.squads,
        "epic_status": filter.epic_status,
        "compliance_status": status,
    })
}
