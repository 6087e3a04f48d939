use crate::adapter::{AdapterResult, IssueSource};
use crate::config::{JiraCredentials, SyncConfig};
use crate::error::AdapterError;
use crate::issue::{IssueRecord, LinkRecord};
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct JiraClient {
    http: Client,
    credentials: JiraCredentials,
    fields: SyncConfig,
}

#[derive(Deserialize)]
struct SearchPage {
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    issues: Vec<Value>,
}

impl JiraClient {
    pub fn new(credentials: JiraCredentials, fields: SyncConfig) -> AdapterResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!credentials.verify_ssl)
            .build()
            .map_err(|e| AdapterError::new("connect", e.to_string()))?;
        Ok(Self {
            http,
            credentials,
            fields,
        })
    }

    /// JQL used for the active-sprint search.
    pub fn active_sprint_jql(project_key: Option<&str>) -> String {
        let mut parts = vec!["sprint in openSprints()".to_string()];
        if let Some(project) = project_key.map(str::trim).filter(|p| !p.is_empty()) {
            parts.insert(0, format!("project = {project}"));
        }
        format!("{} ORDER BY updated DESC", parts.join(" AND "))
    }

    /// JQL listing an epic's children, either from the configured template or
    /// by epic-link field and parent.
    pub fn child_issues_jql(&self, epic_key: &str) -> String {
        let clause = match self.fields.child_issues_jql.as_deref().map(str::trim) {
            Some(template) if !template.is_empty() => template.replace("{epic_key}", epic_key),
            _ => format!(
                r#"("{}" = "{epic_key}" OR parent = "{epic_key}")"#,
                self.fields.epic_link_field.trim()
            ),
        };
        format!("{clause} ORDER BY updated DESC")
    }

    pub fn get_child_issues(
        &self,
        epic_key: &str,
        max_results: u32,
    ) -> AdapterResult<Vec<IssueRecord>> {
        let jql = self.child_issues_jql(epic_key);
        self.search("get_child_issues", &jql, max_results)
    }

    /// Run a JQL search, following pages until `max_results` issues have been
    /// collected or the tracker runs out.
    fn search(&self, operation: &str, jql: &str, max_results: u32) -> AdapterResult<Vec<IssueRecord>> {
        let limit = max_results as usize;
        let mut issues = Vec::new();
        let mut start_at = 0usize;

        while issues.len() < limit {
            let remaining = limit - issues.len();
            let body = self.get_json(
                operation,
                "/rest/api/2/search",
                &[
                    ("jql", jql.to_string()),
                    ("startAt", start_at.to_string()),
                    ("maxResults", remaining.to_string()),
                    ("fields", "*all".to_string()),
                ],
            )?;
            let page: SearchPage = serde_json::from_value(body)
                .map_err(|e| AdapterError::new(operation, format!("malformed search page: {e}")))?;

            let fetched = page.issues.len();
            for raw in page.issues.into_iter().take(remaining) {
                issues.push(self.decode_issue(operation, raw)?);
            }
            start_at += fetched;

            let exhausted = page.total.map_or(true, |total| start_at as u64 >= total);
            if fetched == 0 || exhausted {
                break;
            }
        }

        tracing::debug!(operation, count = issues.len(), "jira search complete");
        Ok(issues)
    }

    fn decode_issue(&self, operation: &str, raw: Value) -> AdapterResult<IssueRecord> {
        IssueRecord::decode(raw, &self.fields)
            .map_err(|e| AdapterError::new(operation, format!("undecodable issue: {e}")))
    }

    fn get_json(&self, operation: &str, path: &str, query: &[(&str, String)]) -> AdapterResult<Value> {
        let url = format!("{}{}", self.credentials.base_url, path);
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.credentials.email, Some(&self.credentials.api_token))
            .header(ACCEPT, "application/json")
            .query(query)
            .send()
            .map_err(|e| AdapterError::new(operation, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            let detail = if text.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                text.trim().to_string()
            };
            return Err(AdapterError::new(operation, detail).with_status(status.as_u16()));
        }

        response
            .json::<Value>()
            .map_err(|e| AdapterError::new(operation, e.to_string()).with_status(status.as_u16()))
    }
}

impl IssueSource for JiraClient {
    fn search_active_sprint_issues(
        &self,
        project_key: Option<&str>,
        max_results: u32,
    ) -> AdapterResult<Vec<IssueRecord>> {
        let jql = Self::active_sprint_jql(project_key);
        self.search("search_active_sprint_issues", &jql, max_results)
    }

    fn get_issue(&self, issue_key: &str) -> AdapterResult<IssueRecord> {
        let operation = "get_issue";
        let body = self.get_json(
            operation,
            &format!("/rest/api/2/issue/{issue_key}"),
            &[("fields", "*all".to_string())],
        )?;
        self.decode_issue(operation, body)
    }

    fn get_issue_remote_links(&self, issue_key: &str) -> AdapterResult<Vec<LinkRecord>> {
        let operation = "get_issue_remote_links";
        let body = self.get_json(operation, &format!("/rest/api/2/issue/{issue_key}/remotelink"), &[])?;
        let Value::Array(items) = body else {
            return Err(AdapterError::new(operation, "expected a list of remote links"));
        };
        items
            .into_iter()
            .map(|item| {
                LinkRecord::decode(item)
                    .map_err(|e| AdapterError::new(operation, format!("undecodable link: {e}")))
            })
            .collect()
    }

    fn browse_url(&self, issue_key: &str) -> String {
        format!("{}/browse/{issue_key}", self.credentials.base_url)
    }
}
