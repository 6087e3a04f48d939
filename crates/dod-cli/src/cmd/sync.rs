use crate::cmd::{load_config, open_store};
use crate::output::{print_json, print_table};
use anyhow::Context;
use dod_core::config::JiraCredentials;
use dod_core::jira::JiraClient;
use dod_core::runner::{execute_sync, SyncRequest};
use dod_core::sync::SprintOutcome;
use std::path::Path;

pub fn run(
    root: &Path,
    project_key: Option<&str>,
    actor: &str,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let mut store = open_store(root)?;

    let request = SyncRequest {
        project_key: project_key.map(String::from),
        trigger: "cli".to_string(),
        triggered_by: actor.to_string(),
    };
    let connect = || -> dod_core::Result<JiraClient> {
        let credentials = JiraCredentials::from_env(&config.jira)?;
        Ok(JiraClient::new(credentials, config.sync.clone())?)
    };
    let (run, summary) =
        execute_sync(&mut store, &config.sync, connect, &request).context("sync failed")?;

    if json {
        return print_json(&serde_json::json!({
            "run": run,
            "summary": summary,
        }));
    }

    println!(
        "Sync run {} finished: {} sprint generation(s), {} epic record(s), {} DoD task record(s).",
        run.id,
        summary.sprint_generations_created,
        summary.epic_records_created,
        summary.dod_task_records_created
    );
    if summary.sprints.is_empty() {
        println!("No active sprint issues returned.");
        return Ok(());
    }

    let rows = summary
        .sprints
        .iter()
        .map(|s| {
            let (status, detail) = match &s.outcome {
                SprintOutcome::Created {
                    snapshot_id,
                    epics,
                    dod_tasks,
                } => (
                    "created",
                    format!("generation {snapshot_id}: {epics} epics, {dod_tasks} DoD tasks"),
                ),
                SprintOutcome::Unchanged => ("unchanged", String::new()),
                SprintOutcome::Empty => ("empty", String::new()),
            };
            vec![
                s.jira_sprint_id.clone(),
                s.sprint_name.clone(),
                status.to_string(),
                detail,
            ]
        })
        .collect();
    print_table(&["SPRINT", "NAME", "STATUS", "DETAIL"], rows);
    Ok(())
}
