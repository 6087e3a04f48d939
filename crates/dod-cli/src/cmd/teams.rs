use crate::cmd::open_store;
use crate::output::{list_or_dash, print_json, print_table, yes_no};
use anyhow::Context;
use clap::Subcommand;
use dod_core::model::Team;
use std::path::Path;

#[derive(Subcommand)]
pub enum TeamsSubcommand {
    /// List known teams
    List,
    /// Replace a team's notification emails (no emails clears them)
    Recipients { key: String, emails: Vec<String> },
    /// Replace a team's scrum masters (no usernames clears them)
    ScrumMasters { key: String, usernames: Vec<String> },
    /// Set a team's display name
    Rename { key: String, display_name: String },
}

pub fn run(root: &Path, subcmd: TeamsSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        TeamsSubcommand::List => list(root, json),
        TeamsSubcommand::Recipients { key, emails } => {
            let store = open_store(root)?;
            let team = store
                .set_team_recipients(&key, &emails)
                .with_context(|| format!("failed to update recipients of '{key}'"))?;
            show(&team, json)
        }
        TeamsSubcommand::ScrumMasters { key, usernames } => {
            let mut store = open_store(root)?;
            let team = store
                .set_team_scrum_masters(&key, &usernames)
                .with_context(|| format!("failed to update scrum masters of '{key}'"))?;
            show(&team, json)
        }
        TeamsSubcommand::Rename { key, display_name } => {
            let store = open_store(root)?;
            let team = store
                .set_team_display_name(&key, &display_name)
                .with_context(|| format!("failed to rename '{key}'"))?;
            show(&team, json)
        }
    }
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let teams = store.list_teams()?;

    if json {
        return print_json(&teams);
    }
    if teams.is_empty() {
        println!("No teams yet. Teams appear when a synced epic carries a squad_<name> label.");
        return Ok(());
    }
    let rows = teams.iter().map(row).collect();
    print_table(
        &["KEY", "NAME", "ACTIVE", "RECIPIENTS", "SCRUM MASTERS"],
        rows,
    );
    Ok(())
}

fn show(team: &Team, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(team);
    }
    println!("Updated team '{}'.", team.key);
    println!("  Recipients:    {}", list_or_dash(&team.notification_emails));
    println!("  Scrum masters: {}", list_or_dash(&team.scrum_masters));
    Ok(())
}

fn row(team: &Team) -> Vec<String> {
    vec![
        team.key.clone(),
        team.display_name.clone(),
        yes_no(team.is_active),
        list_or_dash(&team.notification_emails),
        list_or_dash(&team.scrum_masters),
    ]
}
