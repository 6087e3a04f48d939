use crate::error::AdapterError;
use crate::issue::{IssueRecord, LinkRecord};

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Read-only view of the issue tracker the sync engine pulls from.
///
/// Implementations decode tracker payloads into [`IssueRecord`]s and report
/// every transport failure as an [`AdapterError`]; retry policy is theirs.
pub trait IssueSource {
    fn search_active_sprint_issues(
        &self,
        project_key: Option<&str>,
        max_results: u32,
    ) -> AdapterResult<Vec<IssueRecord>>;

    fn get_issue(&self, issue_key: &str) -> AdapterResult<IssueRecord>;

    fn get_issue_remote_links(&self, issue_key: &str) -> AdapterResult<Vec<LinkRecord>>;

    /// Human-facing URL for an issue.
    fn browse_url(&self, issue_key: &str) -> String;
}

impl<T: IssueSource + ?Sized> IssueSource for &T {
    fn search_active_sprint_issues(
        &self,
        project_key: Option<&str>,
        max_results: u32,
    ) -> AdapterResult<Vec<IssueRecord>> {
        (**self).search_active_sprint_issues(project_key, max_results)
    }

    fn get_issue(&self, issue_key: &str) -> AdapterResult<IssueRecord> {
        (**self).get_issue(issue_key)
    }

    fn get_issue_remote_links(&self, issue_key: &str) -> AdapterResult<Vec<LinkRecord>> {
        (**self).get_issue_remote_links(issue_key)
    }

    fn browse_url(&self, issue_key: &str) -> String {
        (**self).browse_url(issue_key)
    }
}

/// First non-blank link URL, trimmed. `None` means the task has no evidence.
pub fn first_evidence_url(links: &[LinkRecord]) -> Option<String> {
    links
        .iter()
        .filter_map(|l| l.url.as_deref())
        .map(str::trim)
        .find(|u| !u.is_empty())
        .map(String::from)
}
