use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const DOD_DIR: &str = ".dod";
pub const CONFIG_FILE: &str = ".dod/config.yaml";
pub const DATABASE_FILE: &str = ".dod/snapshots.db";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn dod_dir(root: &Path) -> PathBuf {
    root.join(DOD_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn database_path(root: &Path) -> PathBuf {
    root.join(DATABASE_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_rooted_under_dod_dir() {
        let root = Path::new("/tmp/project");
        assert_eq!(dod_dir(root), PathBuf::from("/tmp/project/.dod"));
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/project/.dod/config.yaml")
        );
        assert_eq!(
            database_path(root),
            PathBuf::from("/tmp/project/.dod/snapshots.db")
        );
    }
}
