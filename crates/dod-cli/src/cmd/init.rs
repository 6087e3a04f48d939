use anyhow::Context;
use dod_core::{config::DEFAULT_CONFIG_YAML, io, paths, store::Store};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing DoD tracker in: {}", root.display());

    let config_path = paths::config_path(root);
    let created = io::write_if_missing(&config_path, DEFAULT_CONFIG_YAML.as_bytes())
        .context("failed to write config.yaml")?;
    report(created, paths::CONFIG_FILE);

    let db_path = paths::database_path(root);
    let existed = db_path.exists();
    Store::open(&db_path).with_context(|| format!("failed to create {}", db_path.display()))?;
    report(!existed, paths::DATABASE_FILE);

    io::ensure_gitignore_entry(root, paths::DATABASE_FILE)
        .context("failed to update .gitignore")?;

    println!("\nNext: export JIRA_BASE_URL, JIRA_EMAIL and JIRA_API_KEY, then run `dod sync`.");
    Ok(())
}

fn report(created: bool, path: &str) {
    if created {
        println!("  created: {path}");
    } else {
        println!("  exists:  {path}");
    }
}
