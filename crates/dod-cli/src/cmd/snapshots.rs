use crate::cmd::open_store;
use crate::output::{print_json, print_table};
use dod_core::model::format_timestamp;
use std::path::Path;

pub fn run(root: &Path, limit: usize, json: bool) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let snapshots = store.list_sprint_snapshots(limit)?;

    if json {
        return print_json(&serde_json::json!({
            "counts": store.counts()?,
            "snapshots": snapshots,
        }));
    }
    if snapshots.is_empty() {
        println!("No sprint generations yet. Run `dod sync`.");
        return Ok(());
    }

    let rows = snapshots
        .iter()
        .map(|s| {
            vec![
                s.id.to_string(),
                s.jira_sprint_id.clone(),
                s.sprint_name.clone(),
                s.sprint_state.clone(),
                format_timestamp(s.sync_timestamp),
                s.issue_versions.len().to_string(),
            ]
        })
        .collect();
    print_table(&["ID", "SPRINT", "NAME", "STATE", "SYNCED", "ISSUES"], rows);
    Ok(())
}
