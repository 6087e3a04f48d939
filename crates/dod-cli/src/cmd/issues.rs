use crate::cmd::load_config;
use crate::output::{print_json, print_table, yes_no};
use clap::Subcommand;
use dod_core::config::JiraCredentials;
use dod_core::jira::JiraClient;
use dod_core::resolver::{is_done, is_dod_task, resolve_epic_key};
use std::path::Path;

#[derive(Subcommand)]
pub enum IssuesSubcommand {
    /// List the issues linked to an epic (epic-link field or parent)
    Children {
        epic_key: String,

        /// Defaults to sync.max_results
        #[arg(long)]
        max_results: Option<u32>,
    },
}

pub fn run(root: &Path, subcmd: IssuesSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        IssuesSubcommand::Children {
            epic_key,
            max_results,
        } => children(root, &epic_key, max_results, json),
    }
}

fn children(
    root: &Path,
    epic_key: &str,
    max_results: Option<u32>,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let credentials = JiraCredentials::from_env(&config.jira)?;
    let limit = max_results.unwrap_or(config.sync.max_results);
    let client = JiraClient::new(credentials, config.sync)?;
    let issues = client.get_child_issues(epic_key, limit)?;

    if json {
        return print_json(&serde_json::json!({
            "epic_key": epic_key,
            "jql": client.child_issues_jql(epic_key),
            "count": issues.len(),
            "issues": issues,
        }));
    }
    if issues.is_empty() {
        println!("No issues linked to {epic_key}.");
        return Ok(());
    }

    let rows = issues
        .iter()
        .map(|i| {
            vec![
                i.key.clone(),
                i.issue_type.clone(),
                i.status_or_unknown().to_string(),
                yes_no(is_done(i)),
                yes_no(is_dod_task(i)),
                resolve_epic_key(i).unwrap_or_else(|| "-".to_string()),
                i.summary.clone(),
            ]
        })
        .collect();
    print_table(
        &["KEY", "TYPE", "STATUS", "DONE", "DOD", "EPIC", "SUMMARY"],
        rows,
    );
    Ok(())
}
