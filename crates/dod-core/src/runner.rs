use crate::adapter::IssueSource;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::model::SyncRun;
use crate::store::Store;
use crate::sync::{SnapshotSyncService, SyncSummary};
use chrono::Utc;

/// Who asked for a sync and for which project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Overrides `SyncConfig::project_key` when set.
    pub project_key: Option<String>,
    pub trigger: String,
    pub triggered_by: String,
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            project_key: None,
            trigger: "cli".to_string(),
            triggered_by: String::new(),
        }
    }
}

/// Run one sync and record it.
///
/// The RUNNING row is written before `connect` is called, so a source that
/// cannot be built (missing credentials) still leaves a FAILED run behind.
/// On failure the original error is returned after the row is closed.
pub fn execute_sync<S, F>(
    store: &mut Store,
    config: &SyncConfig,
    connect: F,
    request: &SyncRequest,
) -> Result<(SyncRun, SyncSummary)>
where
    S: IssueSource,
    F: FnOnce() -> Result<S>,
{
    let project_key = request
        .project_key
        .as_deref()
        .or(config.project_key.as_deref())
        .map(str::trim)
        .filter(|k| !k.is_empty());

    let run = store.start_sync_run(
        &request.trigger,
        &request.triggered_by,
        project_key,
        Utc::now(),
    )?;
    tracing::info!(
        event = "sync.execute.started",
        run_id = run.id,
        trigger = %request.trigger,
        project_key = project_key.unwrap_or(""),
        "sync started"
    );

    let outcome = connect().and_then(|source| {
        SnapshotSyncService::new(&mut *store, source, config).sync_active_sprint(project_key)
    });

    match outcome {
        Ok(summary) => {
            let run = store.finish_sync_run_success(
                run.id,
                summary.sprint_generations_created,
                summary.epic_records_created,
                summary.dod_task_records_created,
                Utc::now(),
            )?;
            tracing::info!(
                event = "sync.execute.succeeded",
                run_id = run.id,
                sprint_snapshots_created = summary.sprint_generations_created,
                epic_snapshots_created = summary.epic_records_created,
                dod_tasks_created = summary.dod_task_records_created,
                "sync finished"
            );
            Ok((run, summary))
        }
        Err(err) => {
            let message = err.to_string();
            if let Err(ledger_err) = store.finish_sync_run_failed(run.id, &message, Utc::now()) {
                tracing::error!(run_id = run.id, error = %ledger_err, "could not mark sync run failed");
            }
            tracing::error!(
                event = "sync.execute.failed",
                run_id = run.id,
                kind = ?err.kind(),
                error = %message,
                "sync failed"
            );
            tracing::error!(
                event = "alert.sync.failed",
                run_id = run.id,
                trigger = %request.trigger,
                error = %message,
                "sync failure alert"
            );
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterResult;
    use crate::error::{AdapterError, DodError};
    use crate::issue::{IssueRecord, LinkRecord};
    use crate::model::SyncStatus;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Source {
        fail: bool,
        seen_project: RefCell<Option<String>>,
    }

    impl IssueSource for Source {
        fn search_active_sprint_issues(
            &self,
            project_key: Option<&str>,
            _max_results: u32,
        ) -> AdapterResult<Vec<IssueRecord>> {
            *self.seen_project.borrow_mut() = project_key.map(String::from);
            if self.fail {
                return Err(AdapterError::new("search_active_sprint_issues", "boom").with_status(502));
            }
            Ok(Vec::new())
        }

        fn get_issue(&self, key: &str) -> AdapterResult<IssueRecord> {
            Err(AdapterError::new("get_issue", format!("{key} missing")))
        }

        fn get_issue_remote_links(&self, _key: &str) -> AdapterResult<Vec<LinkRecord>> {
            Ok(Vec::new())
        }

        fn browse_url(&self, key: &str) -> String {
            format!("https://jira/browse/{key}")
        }
    }

    #[test]
    fn success_is_recorded() {
        let mut store = Store::open_in_memory().unwrap();
        let config = SyncConfig {
            project_key: Some("ABC".to_string()),
            ..SyncConfig::default()
        };
        let source = Source::default();
        let request = SyncRequest {
            triggered_by: "ops".to_string(),
            ..SyncRequest::default()
        };

        let (run, summary) = execute_sync(&mut store, &config, || Ok(&source), &request).unwrap();
        assert_eq!(run.status, SyncStatus::Success);
        assert_eq!(run.project_key.as_deref(), Some("ABC"));
        assert_eq!(run.trigger, "cli");
        assert!(run.finished_at.is_some());
        assert_eq!(summary, SyncSummary::default());
        assert_eq!(source.seen_project.borrow().as_deref(), Some("ABC"));
    }

    #[test]
    fn request_project_overrides_config() {
        let mut store = Store::open_in_memory().unwrap();
        let config = SyncConfig {
            project_key: Some("ABC".to_string()),
            ..SyncConfig::default()
        };
        let source = Source::default();
        let request = SyncRequest {
            project_key: Some("XYZ".to_string()),
            ..SyncRequest::default()
        };
        let (run, _) = execute_sync(&mut store, &config, || Ok(&source), &request).unwrap();
        assert_eq!(run.project_key.as_deref(), Some("XYZ"));
        assert_eq!(source.seen_project.borrow().as_deref(), Some("XYZ"));
    }

    #[test]
    fn adapter_failure_marks_run_failed_and_reraises() {
        let mut store = Store::open_in_memory().unwrap();
        let source = Source {
            fail: true,
            ..Source::default()
        };
        let err = execute_sync(
            &mut store,
            &SyncConfig::default(),
            || Ok(&source),
            &SyncRequest::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DodError::Adapter(_)));

        let runs = store.list_sync_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, SyncStatus::Failed);
        assert_eq!(
            runs[0].error_message,
            "Jira API call failed (search_active_sprint_issues) [status=502]: boom"
        );
    }

    #[test]
    fn connect_failure_is_recorded() {
        let mut store = Store::open_in_memory().unwrap();
        let err = execute_sync::<Source, _>(
            &mut store,
            &SyncConfig::default(),
            || Err(DodError::Config("Missing Jira configuration values: JIRA_EMAIL".into())),
            &SyncRequest::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DodError::Config(_)));

        let run = &store.list_sync_runs(1).unwrap()[0];
        assert_eq!(run.status, SyncStatus::Failed);
        assert!(run.error_message.contains("JIRA_EMAIL"));
        assert_eq!(run.sprint_snapshots_created, 0);
    }
}
