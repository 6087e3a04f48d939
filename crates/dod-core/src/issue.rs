//! Typed issue records, decoded once at the tracker boundary.
//!
//! Jira hands back loosely shaped JSON: sprint membership may live in a named
//! field or a legacy custom field, as one object or a list, and the epic link
//! is a configurable custom field. Everything downstream works on
//! [`IssueRecord`] so none of that probing leaks into the resolver.

use crate::config::SyncConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// SprintRef / SprintField
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SprintRef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl SprintRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            state: None,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let id = scalar_to_string(obj.get("id")?)?;
        Some(Self {
            id,
            name: obj.get("name").and_then(scalar_to_string),
            state: obj.get("state").and_then(scalar_to_string),
        })
    }
}

/// The primary sprint field, which Jira renders either as a single sprint
/// object or as a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SprintField {
    One(SprintRef),
    Many(Vec<SprintRef>),
}

impl SprintField {
    pub fn refs(&self) -> &[SprintRef] {
        match self {
            SprintField::One(sprint) => std::slice::from_ref(sprint),
            SprintField::Many(sprints) => sprints,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(SprintField::Many(
                items.iter().filter_map(SprintRef::from_value).collect(),
            )),
            Value::Object(_) => SprintRef::from_value(value).map(SprintField::One),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// VersionStamp / IssueRef
// ---------------------------------------------------------------------------

/// The tracker's `updated` field, kept in whichever shape it arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum VersionStamp {
    Text(String),
    Number(serde_json::Number),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueRef {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,
}

// ---------------------------------------------------------------------------
// IssueRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssueRecord {
    pub id: String,
    pub key: String,
    pub summary: String,
    pub issue_type: String,
    pub status_name: Option<String>,
    pub status_category: Option<String>,
    pub resolution: Option<String>,
    pub labels: Vec<String>,
    pub updated: Option<VersionStamp>,
    pub version: Option<String>,
    pub parent: Option<IssueRef>,
    pub sprint: Option<SprintField>,
    pub legacy_sprints: Vec<SprintRef>,
    pub epic_link: Option<String>,
}

#[derive(Deserialize)]
struct RawIssue {
    #[serde(default)]
    id: Value,
    key: String,
    #[serde(default)]
    version: Value,
    #[serde(default)]
    fields: RawFields,
}

#[derive(Deserialize, Default)]
struct RawFields {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    issuetype: Option<Named>,
    #[serde(default)]
    status: Option<RawStatus>,
    #[serde(default)]
    resolution: Option<Named>,
    #[serde(default)]
    labels: Option<Vec<Value>>,
    #[serde(default)]
    updated: Value,
    #[serde(default)]
    parent: Option<RawParent>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Deserialize, Default)]
struct Named {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct RawStatus {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "statusCategory")]
    status_category: Option<RawCategory>,
}

#[derive(Deserialize)]
struct RawCategory {
    #[serde(default)]
    key: Option<String>,
}

#[derive(Deserialize)]
struct RawParent {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    fields: Option<RawParentFields>,
}

#[derive(Deserialize)]
struct RawParentFields {
    #[serde(default)]
    issuetype: Option<Named>,
}

impl IssueRecord {
    /// Decode one issue as returned by the Jira REST API, applying the
    /// configured custom field names.
    pub fn decode(value: Value, fields: &SyncConfig) -> Result<Self, serde_json::Error> {
        let raw: RawIssue = serde_json::from_value(value)?;
        let f = raw.fields;

        let (status_name, status_category) = match f.status {
            Some(status) => (status.name, status.status_category.and_then(|c| c.key)),
            None => (None, None),
        };

        let updated = match f.updated {
            Value::String(s) => Some(VersionStamp::Text(s)),
            Value::Number(n) => Some(VersionStamp::Number(n)),
            _ => None,
        };

        let parent = f.parent.and_then(|p| {
            Some(IssueRef {
                key: p.key?,
                issue_type: p.fields.and_then(|pf| pf.issuetype).and_then(|t| t.name),
            })
        });

        let sprint = f
            .extra
            .get(&fields.sprint_field)
            .and_then(SprintField::from_value);
        let legacy_sprints = match f.extra.get(&fields.legacy_sprint_field) {
            Some(Value::Array(items)) => items.iter().filter_map(SprintRef::from_value).collect(),
            _ => Vec::new(),
        };
        let epic_link = match f.extra.get(&fields.epic_link_field) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        };

        let labels = f
            .labels
            .unwrap_or_default()
            .into_iter()
            .filter_map(|label| match label {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect();

        Ok(Self {
            id: scalar_to_string(&raw.id).unwrap_or_default(),
            key: raw.key,
            summary: f.summary.unwrap_or_default(),
            issue_type: f.issuetype.and_then(|t| t.name).unwrap_or_default(),
            status_name,
            status_category,
            resolution: f.resolution.and_then(|r| r.name),
            labels,
            updated,
            version: scalar_to_string(&raw.version),
            parent,
            sprint,
            legacy_sprints,
            epic_link,
        })
    }

    pub fn status_or_unknown(&self) -> &str {
        self.status_name.as_deref().unwrap_or("Unknown")
    }

    pub fn resolution_or_blank(&self) -> &str {
        self.resolution.as_deref().unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// LinkRecord
// ---------------------------------------------------------------------------

/// A remote (cross-reference) link attached to an issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkRecord {
    pub url: Option<String>,
    pub title: Option<String>,
}

#[derive(Deserialize)]
struct RawRemoteLink {
    #[serde(default)]
    object: Option<RawLinkObject>,
}

#[derive(Deserialize)]
struct RawLinkObject {
    #[serde(default)]
    url: Value,
    #[serde(default)]
    title: Value,
}

impl LinkRecord {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            title: None,
        }
    }

    pub fn decode(value: Value) -> Result<Self, serde_json::Error> {
        let raw: RawRemoteLink = serde_json::from_value(value)?;
        Ok(match raw.object {
            Some(obj) => Self {
                url: obj.url.as_str().map(String::from),
                title: obj.title.as_str().map(String::from),
            },
            None => Self::default(),
        })
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
