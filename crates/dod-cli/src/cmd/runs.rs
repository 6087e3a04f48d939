use crate::cmd::open_store;
use crate::output::{print_json, print_table};
use dod_core::model::format_timestamp;
use std::path::Path;

pub fn run(root: &Path, limit: usize, json: bool) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let runs = store.list_sync_runs(limit)?;

    if json {
        return print_json(&runs);
    }
    if runs.is_empty() {
        println!("No sync runs yet.");
        return Ok(());
    }

    let rows = runs
        .iter()
        .map(|r| {
            vec![
                r.id.to_string(),
                r.status.to_string(),
                format_timestamp(r.started_at),
                r.trigger.clone(),
                r.triggered_by.clone(),
                r.project_key.clone().unwrap_or_else(|| "-".to_string()),
                format!(
                    "{}/{}/{}",
                    r.sprint_snapshots_created, r.epic_snapshots_created, r.dod_tasks_created
                ),
                r.error_message.clone(),
            ]
        })
        .collect();
    print_table(
        &[
            "ID",
            "STATUS",
            "STARTED",
            "TRIGGER",
            "BY",
            "PROJECT",
            "SPRINTS/EPICS/TASKS",
            "ERROR",
        ],
        rows,
    );
    Ok(())
}
