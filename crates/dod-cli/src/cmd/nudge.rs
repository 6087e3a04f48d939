use crate::cmd::{load_config, open_store};
use crate::output::{list_or_dash, print_json, print_table};
use chrono::Utc;
use dod_core::model::format_timestamp;
use dod_core::nudge;
use dod_core::scope::{self, parse_csv};
use std::path::Path;

pub struct NudgeArgs {
    pub epic_key: String,
    pub recipients: Vec<String>,
    pub snapshot: Option<i64>,
    pub actor: String,
    pub dry_run: bool,
}

/// Draft a nudge and, unless `dry_run`, record it as sent. Delivery itself
/// happens outside this tool; the printed draft is what gets sent.
pub fn send(root: &Path, args: &NudgeArgs, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let store = open_store(root)?;
    let scope = scope::resolve_scope(&store, args.snapshot)?;
    let now = Utc::now();

    let draft = match nudge::prepare(
        &store,
        &config.nudge,
        &scope,
        args.epic_key.trim(),
        &args.recipients,
        now,
    )? {
        Ok(draft) => draft,
        Err(rejection) => {
            if json {
                print_json(&serde_json::json!({
                    "sent": false,
                    "message": rejection.to_string(),
                    "rejection": &rejection,
                }))?;
            }
            anyhow::bail!("nudge not sent ({}): {rejection}", rejection.reason());
        }
    };

    let actor = match args.actor.trim() {
        "" => "anonymous",
        a => a,
    };
    let log = if args.dry_run {
        None
    } else {
        Some(nudge::record(&store, &draft, actor, now)?)
    };

    if json {
        return print_json(&serde_json::json!({
            "sent": log.is_some(),
            "dry_run": args.dry_run,
            "nudge": draft,
            "nudge_log": log,
        }));
    }

    println!("To:      {}", draft.recipients.join(", "));
    println!("Subject: {}", draft.subject);
    println!();
    println!("{}", draft.body);
    println!();
    match log {
        Some(log) => println!(
            "Recorded nudge {} for {} at {}.",
            log.id,
            draft.epic_key,
            format_timestamp(log.sent_at)
        ),
        None => println!("Dry run: nothing recorded."),
    }
    Ok(())
}

pub fn history(
    root: &Path,
    snapshot: Option<i64>,
    squads: &[String],
    limit: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let scope = scope::resolve_scope(&store, snapshot)?;
    let squads: Vec<String> = squads.iter().flat_map(|s| parse_csv(s)).collect();
    let history = scope::nudge_history(&store, &scope, &squads, limit)?;

    if json {
        return print_json(&serde_json::json!({
            "scope": scope.payload(),
            "count": history.count,
            "total_count": history.total_count,
            "nudges": history.nudges,
        }));
    }
    if history.nudges.is_empty() {
        println!("No nudges sent in this scope.");
        return Ok(());
    }

    let rows = history
        .nudges
        .iter()
        .map(|n| {
            vec![
                format_timestamp(n.sent_at),
                n.epic_key.clone(),
                n.sprint_name.clone(),
                n.team.clone().unwrap_or_else(|| list_or_dash(&n.epic_teams)),
                n.triggered_by.clone(),
                list_or_dash(&n.recipient_emails),
            ]
        })
        .collect();
    print_table(
        &["SENT", "EPIC", "SPRINT", "TEAM", "BY", "RECIPIENTS"],
        rows,
    );
    if history.total_count > history.count as u64 {
        println!("\nShowing {} of {} nudges.", history.count, history.total_count);
    }
    Ok(())
}
