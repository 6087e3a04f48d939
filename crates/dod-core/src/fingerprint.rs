use crate::issue::{IssueRecord, VersionStamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Issue key to version token for one sprint generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(BTreeMap<String, String>);

impl Fingerprint {
    /// Fingerprint over a set of issues. Issues with a blank key are skipped;
    /// a key seen twice keeps its last token.
    pub fn build<'a, I>(issues: I) -> Self
    where
        I: IntoIterator<Item = &'a IssueRecord>,
    {
        let mut versions = BTreeMap::new();
        for issue in issues {
            let key = issue.key.trim();
            if key.is_empty() {
                continue;
            }
            versions.insert(key.to_string(), version_token(issue));
        }
        Fingerprint(versions)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.0)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Fingerprint::default());
        }
        serde_json::from_str(raw)
    }
}

impl FromIterator<(String, String)> for Fingerprint {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Fingerprint(iter.into_iter().collect())
    }
}

/// Version token for one issue, by priority: a non-blank `updated` string,
/// a numeric `updated`, an explicit version, then a synthetic token built
/// from status, resolution and summary.
pub fn version_token(issue: &IssueRecord) -> String {
    match &issue.updated {
        Some(VersionStamp::Text(s)) if !s.trim().is_empty() => return s.trim().to_string(),
        Some(VersionStamp::Number(n)) => return n.to_string(),
        _ => {}
    }

    if let Some(version) = &issue.version {
        return version.clone();
    }

    format!(
        "fallback:{}|{}|{}",
        issue.status_name.as_deref().unwrap_or(""),
        issue.resolution.as_deref().unwrap_or(""),
        issue.summary
    )
}

/// True when a new generation with `candidate` would duplicate `latest`.
pub fn is_unchanged(latest: Option<&Fingerprint>, candidate: &Fingerprint) -> bool {
    latest.is_some_and(|previous| previous == candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(key: &str, updated: Option<VersionStamp>) -> IssueRecord {
        IssueRecord {
            key: key.to_string(),
            updated,
            ..IssueRecord::default()
        }
    }

    #[test]
    fn token_priority() {
        let mut i = issue("ABC-1", Some(VersionStamp::Text(" 2026-02-10T10:00:00Z ".into())));
        i.version = Some("9".into());
        assert_eq!(version_token(&i), "2026-02-10T10:00:00Z");

        i.updated = Some(VersionStamp::Number(serde_json::Number::from(17)));
        assert_eq!(version_token(&i), "17");

        i.updated = Some(VersionStamp::Text("   ".into()));
        assert_eq!(version_token(&i), "9");

        i.version = None;
        i.status_name = Some("In Progress".into());
        i.summary = "Build it".into();
        assert_eq!(version_token(&i), "fallback:In Progress||Build it");
    }

    #[test]
    fn build_is_sorted_and_skips_blank_keys() {
        let issues = vec![
            issue("ABC-2", Some(VersionStamp::Text("b".into()))),
            issue("  ", Some(VersionStamp::Text("x".into()))),
            issue("ABC-1", Some(VersionStamp::Text("a".into()))),
        ];
        let fp = Fingerprint::build(&issues);
        assert_eq!(fp.len(), 2);
        assert_eq!(fp.to_json().unwrap(), r#"{"ABC-1":"a","ABC-2":"b"}"#);
    }

    #[test]
    fn json_roundtrip_and_equality() {
        let fp: Fingerprint = [("ABC-1".to_string(), "a".to_string())].into_iter().collect();
        let parsed = Fingerprint::from_json(&fp.to_json().unwrap()).unwrap();
        assert_eq!(parsed, fp);
        assert!(Fingerprint::from_json("").unwrap().is_empty());
    }

    #[test]
    fn unchanged_requires_exact_match() {
        let a: Fingerprint = [("ABC-1".to_string(), "a".to_string())].into_iter().collect();
        let b: Fingerprint = [
            ("ABC-1".to_string(), "a".to_string()),
            ("ABC-2".to_string(), "b".to_string()),
        ]
        .into_iter()
        .collect();
        assert!(!is_unchanged(None, &a));
        assert!(is_unchanged(Some(&a), &a.clone()));
        assert!(!is_unchanged(Some(&a), &b));
    }
}
