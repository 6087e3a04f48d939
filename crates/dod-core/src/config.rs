use crate::error::{DodError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// JiraConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
}

fn default_verify_ssl() -> bool {
    true
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            verify_ssl: default_verify_ssl(),
        }
    }
}

// ---------------------------------------------------------------------------
// SyncConfig
// ---------------------------------------------------------------------------

/// Field names and limits the sync engine needs. Resolved once per run and
/// handed to the engine; nothing re-reads the environment mid-sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_epic_link_field")]
    pub epic_link_field: String,
    #[serde(default = "default_sprint_field")]
    pub sprint_field: String,
    #[serde(default = "default_legacy_sprint_field")]
    pub legacy_sprint_field: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,
    /// JQL clause used to list an epic's children; `{epic_key}` is substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_issues_jql: Option<String>,
}

pub const DEFAULT_EPIC_LINK_FIELD: &str = "customfield_10014";
pub const DEFAULT_LEGACY_SPRINT_FIELD: &str = "customfield_10020";

fn default_epic_link_field() -> String {
    DEFAULT_EPIC_LINK_FIELD.to_string()
}

fn default_sprint_field() -> String {
    "sprint".to_string()
}

fn default_legacy_sprint_field() -> String {
    DEFAULT_LEGACY_SPRINT_FIELD.to_string()
}

fn default_max_results() -> u32 {
    200
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            epic_link_field: default_epic_link_field(),
            sprint_field: default_sprint_field(),
            legacy_sprint_field: default_legacy_sprint_field(),
            max_results: default_max_results(),
            project_key: None,
            child_issues_jql: None,
        }
    }
}

// ---------------------------------------------------------------------------
// NudgeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NudgeConfig {
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_recipients: Vec<String>,
    /// Team key → recipients, consulted when a team has no emails of its own.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub team_recipients: BTreeMap<String, Vec<String>>,
}

fn default_cooldown_hours() -> u32 {
    24
}

impl Default for NudgeConfig {
    fn default() -> Self {
        Self {
            cooldown_hours: default_cooldown_hours(),
            default_recipients: Vec::new(),
            team_recipients: BTreeMap::new(),
        }
    }
}

impl NudgeConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.cooldown_hours))
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub jira: JiraConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub nudge: NudgeConfig,
}

pub const DEFAULT_CONFIG_YAML: &str = "\
# Definition-of-Done tracker configuration.
# Credentials are read from JIRA_EMAIL / JIRA_API_KEY, never from this file.
jira:
  # base_url: https://example.atlassian.net
  verify_ssl: true
sync:
  epic_link_field: customfield_10014
  sprint_field: sprint
  legacy_sprint_field: customfield_10020
  max_results: 200
  # project_key: ABC
nudge:
  cooldown_hours: 24
  # default_recipients: [dod-owners@example.com]
  # team_recipients:
  #   squad_platform: [platform@example.com]
";

impl Config {
    /// Load `.dod/config.yaml`; a missing file yields the defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Config::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Load the file and then layer process environment overrides on top.
    pub fn resolve(root: &Path) -> Result<Self> {
        let mut cfg = Self::load(root)?;
        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// Apply environment overrides through `lookup`. Blank values are ignored;
    /// malformed numbers and JSON are ignored rather than failing the load.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(url) = get("JIRA_BASE_URL") {
            self.jira.base_url = Some(url);
        }
        if let Some(raw) = get("JIRA_VERIFY_SSL") {
            self.jira.verify_ssl = parse_flag(&raw);
        }
        if let Some(field) = get("JIRA_EPIC_LINK_FIELD") {
            self.sync.epic_link_field = field;
        }
        if let Some(max) = get("JIRA_SYNC_MAX_RESULTS").and_then(|v| v.parse::<u32>().ok()) {
            if max > 0 {
                self.sync.max_results = max;
            }
        }
        if let Some(project) = get("JIRA_PROJECT_KEY") {
            self.sync.project_key = Some(project);
        }
        if let Some(clause) = get("JIRA_CHILD_ISSUES_JQL_CLAUSE") {
            self.sync.child_issues_jql = Some(clause);
        }
        if let Some(hours) = get("NUDGE_COOLDOWN_HOURS").and_then(|v| v.parse::<u32>().ok()) {
            self.nudge.cooldown_hours = hours;
        }
        if let Some(raw) = get("NUDGE_DEFAULT_RECIPIENTS") {
            self.nudge.default_recipients = crate::scope::parse_csv(&raw);
        }
        if let Some(raw) = get("NUDGE_TEAM_RECIPIENTS_JSON") {
            if let Ok(map) = serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&raw) {
                self.nudge.team_recipients = map
                    .into_iter()
                    .filter_map(|(team, value)| {
                        let list = value.as_array()?;
                        let emails = list
                            .iter()
                            .map(|v| match v {
                                serde_json::Value::String(s) => s.trim().to_string(),
                                other => other.to_string(),
                            })
                            .filter(|s| !s.is_empty())
                            .collect();
                        Some((team, emails))
                    })
                    .collect();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.jira.base_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "jira.base_url is not set; sync needs it or JIRA_BASE_URL".to_string(),
            });
        }
        if self.sync.epic_link_field.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "sync.epic_link_field must not be empty".to_string(),
            });
        }
        if self.sync.max_results == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "sync.max_results must be at least 1".to_string(),
            });
        }
        if let Some(template) = &self.sync.child_issues_jql {
            if !template.contains("{epic_key}") {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: "sync.child_issues_jql has no {epic_key} placeholder".to_string(),
                });
            }
        }
        if self.nudge.cooldown_hours == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "nudge.cooldown_hours is 0; epics can be nudged repeatedly".to_string(),
            });
        }
        for team in self.nudge.team_recipients.keys() {
            if !team.starts_with(crate::resolver::SQUAD_PREFIX) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "nudge.team_recipients key '{team}' does not follow the squad_<name> convention"
                    ),
                });
            }
        }

        warnings
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

// ---------------------------------------------------------------------------
// JiraCredentials
// ---------------------------------------------------------------------------

/// Everything needed to talk to Jira. Resolved before any network call so a
/// misconfigured process fails fast.
#[derive(Clone)]
pub struct JiraCredentials {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
    pub verify_ssl: bool,
}

impl std::fmt::Debug for JiraCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JiraCredentials")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .field("api_token", &"<redacted>")
            .field("verify_ssl", &self.verify_ssl)
            .finish()
    }
}

impl JiraCredentials {
    pub fn resolve<F>(jira: &JiraConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).unwrap_or_default();

        let base_url = jira
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(String::from)
            .unwrap_or_else(|| get("JIRA_BASE_URL"));
        let email = get("JIRA_EMAIL");
        let api_token = get("JIRA_API_KEY");

        let missing: Vec<&str> = [
            ("JIRA_BASE_URL", &base_url),
            ("JIRA_EMAIL", &email),
            ("JIRA_API_KEY", &api_token),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(DodError::Config(format!(
                "Missing Jira configuration values: {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            email,
            api_token,
            verify_ssl: jira.verify_ssl,
        })
    }

    pub fn from_env(jira: &JiraConfig) -> Result<Self> {
        Self::resolve(jira, |key| std::env::var(key).ok())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
