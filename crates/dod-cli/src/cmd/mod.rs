pub mod init;
pub mod issues;
pub mod nudge;
pub mod report;
pub mod runs;
pub mod snapshots;
pub mod sync;
pub mod teams;

use anyhow::Context;
use dod_core::config::{Config, WarnLevel};
use dod_core::{paths, store::Store};
use std::path::Path;

/// Open the snapshot database of an initialized root.
pub fn open_store(root: &Path) -> anyhow::Result<Store> {
    if !paths::dod_dir(root).is_dir() {
        anyhow::bail!(
            "no {} directory under {}; run `dod init` first",
            paths::DOD_DIR,
            root.display()
        );
    }
    let db = paths::database_path(root);
    Store::open(&db).with_context(|| format!("failed to open {}", db.display()))
}

/// Config file plus environment overrides. Warnings are logged; any
/// error-level finding fails the command.
pub fn load_config(root: &Path) -> anyhow::Result<Config> {
    let config = Config::resolve(root).context("failed to load config")?;
    let mut errors = Vec::new();
    for warning in config.validate() {
        match warning.level {
            WarnLevel::Warning => tracing::warn!("{}", warning.message),
            WarnLevel::Error => errors.push(warning.message),
        }
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid config: {}", errors.join("; "));
    }
    Ok(config)
}
