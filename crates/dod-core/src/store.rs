use crate::error::{DodError, Result};
use crate::fingerprint::Fingerprint;
use crate::model::{
    format_timestamp, parse_timestamp, DodTaskSnapshot, EpicPlan, EpicSnapshot, EpicView,
    NudgeEntry, NudgeLog, SprintPlan, SprintSnapshot, SyncRun, SyncStatus, TaskPlan, Team,
};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

const SCHEMA_VERSION: i64 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS teams (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    key                 TEXT NOT NULL UNIQUE,
    display_name        TEXT NOT NULL DEFAULT '',
    notification_emails TEXT NOT NULL DEFAULT '[]',
    is_active           INTEGER NOT NULL DEFAULT 1,
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS team_scrum_masters (
    team_id  INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
    username TEXT NOT NULL,
    PRIMARY KEY (team_id, username)
);

CREATE TABLE IF NOT EXISTS sprint_snapshots (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    jira_sprint_id TEXT NOT NULL,
    sprint_name    TEXT NOT NULL,
    sprint_state   TEXT NOT NULL,
    sync_timestamp TEXT NOT NULL,
    issue_versions TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_sprint_snapshots_sprint_ts
    ON sprint_snapshots (jira_sprint_id, sync_timestamp);

CREATE TABLE IF NOT EXISTS epic_snapshots (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    sprint_snapshot_id   INTEGER NOT NULL REFERENCES sprint_snapshots(id) ON DELETE CASCADE,
    jira_issue_id        TEXT NOT NULL,
    jira_key             TEXT NOT NULL,
    summary              TEXT NOT NULL,
    status_name          TEXT NOT NULL,
    resolution_name      TEXT NOT NULL DEFAULT '',
    is_done              INTEGER NOT NULL DEFAULT 0,
    jira_url             TEXT NOT NULL DEFAULT '',
    missing_squad_labels INTEGER NOT NULL DEFAULT 0,
    squad_label_warnings TEXT NOT NULL DEFAULT '[]',
    UNIQUE (sprint_snapshot_id, jira_issue_id)
);
CREATE INDEX IF NOT EXISTS idx_epic_snapshots_key ON epic_snapshots (jira_key);

CREATE TABLE IF NOT EXISTS epic_snapshot_teams (
    epic_snapshot_id INTEGER NOT NULL REFERENCES epic_snapshots(id) ON DELETE CASCADE,
    team_id          INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
    PRIMARY KEY (epic_snapshot_id, team_id)
);

CREATE TABLE IF NOT EXISTS dod_task_snapshots (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    epic_snapshot_id      INTEGER NOT NULL REFERENCES epic_snapshots(id) ON DELETE CASCADE,
    jira_issue_id         TEXT NOT NULL,
    jira_key              TEXT NOT NULL,
    summary               TEXT NOT NULL,
    category              TEXT NOT NULL DEFAULT '',
    status_name           TEXT NOT NULL,
    resolution_name       TEXT NOT NULL DEFAULT '',
    is_done               INTEGER NOT NULL DEFAULT 0,
    jira_url              TEXT NOT NULL DEFAULT '',
    has_evidence_link     INTEGER NOT NULL DEFAULT 0,
    evidence_link         TEXT NOT NULL DEFAULT '',
    non_compliance_reason TEXT NOT NULL DEFAULT '',
    UNIQUE (epic_snapshot_id, jira_issue_id)
);
CREATE INDEX IF NOT EXISTS idx_dod_task_snapshots_category ON dod_task_snapshots (category);

CREATE TABLE IF NOT EXISTS nudge_logs (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    epic_snapshot_id  INTEGER NOT NULL REFERENCES epic_snapshots(id) ON DELETE CASCADE,
    team_id           INTEGER REFERENCES teams(id) ON DELETE SET NULL,
    triggered_by      TEXT NOT NULL,
    recipient_emails  TEXT NOT NULL DEFAULT '[]',
    message_preview   TEXT NOT NULL DEFAULT '',
    sent_at           TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_nudge_logs_sent_at ON nudge_logs (sent_at);

CREATE TABLE IF NOT EXISTS sync_runs (
    id                       INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at               TEXT NOT NULL,
    finished_at              TEXT,
    status                   TEXT NOT NULL,
    run_trigger              TEXT NOT NULL,
    triggered_by             TEXT NOT NULL DEFAULT '',
    project_key              TEXT,
    sprint_snapshots_created INTEGER NOT NULL DEFAULT 0,
    epic_snapshots_created   INTEGER NOT NULL DEFAULT 0,
    dod_tasks_created        INTEGER NOT NULL DEFAULT 0,
    error_message            TEXT NOT NULL DEFAULT ''
);
";

const SPRINT_COLUMNS: &str =
    "id, jira_sprint_id, sprint_name, sprint_state, sync_timestamp, issue_versions";

const TASK_COLUMNS: &str = "id, epic_snapshot_id, jira_issue_id, jira_key, summary, category, \
     status_name, resolution_name, is_done, jira_url, has_evidence_link, evidence_link, \
     non_compliance_reason";

const RUN_COLUMNS: &str = "id, started_at, finished_at, status, run_trigger, triggered_by, \
     project_key, sprint_snapshots_created, epic_snapshots_created, dod_tasks_created, \
     error_message";

/// Row counts created by one committed sprint generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommittedSprint {
    pub snapshot_id: i64,
    pub epics: usize,
    pub dod_tasks: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotCounts {
    pub sprint_snapshots: u64,
    pub epic_snapshots: u64,
    pub dod_tasks: u64,
    pub teams: u64,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::bootstrap(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(Self { conn })
    }

    // -----------------------------------------------------------------------
    // Sprint generations
    // -----------------------------------------------------------------------

    /// Fingerprint of the most recent generation of a sprint, newest by sync
    /// instant and then by id.
    pub fn latest_fingerprint(&self, jira_sprint_id: &str) -> Result<Option<Fingerprint>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT issue_versions FROM sprint_snapshots
                 WHERE jira_sprint_id = ?1
                 ORDER BY sync_timestamp DESC, id DESC
                 LIMIT 1",
                params![jira_sprint_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|r| {
            Fingerprint::from_json(&r).map_err(|e| DodError::Corrupt {
                column: "issue_versions",
                detail: e.to_string(),
            })
        })
        .transpose()
    }

    /// Write a whole sprint generation (sprint, epics, team links, DoD tasks)
    /// in one IMMEDIATE transaction. Any error rolls the whole tree back.
    pub fn commit_sprint(
        &mut self,
        plan: &SprintPlan,
        sync_timestamp: DateTime<Utc>,
    ) -> Result<CommittedSprint> {
        let ts = format_timestamp(sync_timestamp);
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO sprint_snapshots
                (jira_sprint_id, sprint_name, sprint_state, sync_timestamp, issue_versions)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                plan.jira_sprint_id,
                plan.sprint_name,
                plan.sprint_state,
                ts,
                plan.fingerprint.to_json()?,
            ],
        )?;
        let snapshot_id = tx.last_insert_rowid();

        let mut team_ids: HashMap<&str, i64> = HashMap::new();
        for epic in &plan.epics {
            let epic_id = insert_epic(&tx, snapshot_id, epic)?;
            for key in &epic.teams.team_keys {
                let team_id = match team_ids.get(key.as_str()) {
                    Some(id) => *id,
                    None => {
                        let id = get_or_create_team_id(&tx, key, &ts)?;
                        team_ids.insert(key.as_str(), id);
                        id
                    }
                };
                tx.execute(
                    "INSERT INTO epic_snapshot_teams (epic_snapshot_id, team_id) VALUES (?1, ?2)",
                    params![epic_id, team_id],
                )?;
            }
            for task in &epic.tasks {
                insert_task(&tx, epic_id, task)?;
            }
        }

        tx.commit()?;
        Ok(CommittedSprint {
            snapshot_id,
            epics: plan.epics.len(),
            dod_tasks: plan.task_count(),
        })
    }

    pub fn get_sprint_snapshot(&self, id: i64) -> Result<Option<SprintSnapshot>> {
        let sql = format!("SELECT {SPRINT_COLUMNS} FROM sprint_snapshots WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], map_sprint)
            .optional()?)
    }

    /// Generations whose state is `active` (case-insensitive), grouped by
    /// sprint and newest first within each sprint.
    pub fn active_sprint_snapshots(&self) -> Result<Vec<SprintSnapshot>> {
        let sql = format!(
            "SELECT {SPRINT_COLUMNS} FROM sprint_snapshots
             WHERE sprint_state = 'active' COLLATE NOCASE
             ORDER BY jira_sprint_id, sync_timestamp DESC, id DESC"
        );
        self.query_sprints(&sql, [])
    }

    /// Every generation written at the most recent sync instant, newest id first.
    pub fn latest_sync_batch(&self) -> Result<Vec<SprintSnapshot>> {
        let sql = format!(
            "SELECT {SPRINT_COLUMNS} FROM sprint_snapshots
             WHERE sync_timestamp = (SELECT MAX(sync_timestamp) FROM sprint_snapshots)
             ORDER BY id DESC"
        );
        self.query_sprints(&sql, [])
    }

    pub fn list_sprint_snapshots(&self, limit: usize) -> Result<Vec<SprintSnapshot>> {
        let sql = format!(
            "SELECT {SPRINT_COLUMNS} FROM sprint_snapshots
             ORDER BY sync_timestamp DESC, id DESC
             LIMIT ?1"
        );
        self.query_sprints(&sql, params![limit as i64])
    }

    fn query_sprints<P: rusqlite::Params>(&self, sql: &str, p: P) -> Result<Vec<SprintSnapshot>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(p, map_sprint)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn counts(&self) -> Result<SnapshotCounts> {
        let count = |table: &str| -> Result<u64> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(n as u64)
        };
        Ok(SnapshotCounts {
            sprint_snapshots: count("sprint_snapshots")?,
            epic_snapshots: count("epic_snapshots")?,
            dod_tasks: count("dod_task_snapshots")?,
            teams: count("teams")?,
        })
    }

    // -----------------------------------------------------------------------
    // Epics and tasks
    // -----------------------------------------------------------------------

    /// Epics of the given generations, ordered by key and then newest
    /// generation first, with their teams and DoD tasks loaded.
    ///
    /// `squads` keeps epics linked to any of the listed team keys; `done`
    /// keeps epics with that done flag.
    pub fn load_epics(
        &self,
        snapshot_ids: &[i64],
        squads: &[String],
        done: Option<bool>,
    ) -> Result<Vec<EpicView>> {
        if snapshot_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut values: Vec<Value> = snapshot_ids.iter().map(|id| Value::Integer(*id)).collect();
        let mut sql = format!(
            "SELECT e.id, e.sprint_snapshot_id, e.jira_issue_id, e.jira_key, e.summary,
                    e.status_name, e.resolution_name, e.is_done, e.jira_url,
                    e.missing_squad_labels, e.squad_label_warnings,
                    s.jira_sprint_id, s.sprint_name, s.sync_timestamp
             FROM epic_snapshots e
             JOIN sprint_snapshots s ON s.id = e.sprint_snapshot_id
             WHERE e.sprint_snapshot_id IN ({})",
            placeholders(snapshot_ids.len())
        );
        if !squads.is_empty() {
            sql.push_str(&format!(
                " AND e.id IN (SELECT est.epic_snapshot_id FROM epic_snapshot_teams est
                               JOIN teams t ON t.id = est.team_id
                               WHERE t.key IN ({}))",
                placeholders(squads.len())
            ));
            values.extend(squads.iter().map(|s| Value::Text(s.clone())));
        }
        if let Some(done) = done {
            sql.push_str(" AND e.is_done = ?");
            values.push(Value::Integer(i64::from(done)));
        }
        sql.push_str(" ORDER BY e.jira_key ASC, e.sprint_snapshot_id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            let epic = EpicSnapshot {
                id: row.get(0)?,
                sprint_snapshot_id: row.get(1)?,
                jira_issue_id: row.get(2)?,
                jira_key: row.get(3)?,
                summary: row.get(4)?,
                status_name: row.get(5)?,
                resolution_name: row.get(6)?,
                is_done: row.get(7)?,
                jira_url: row.get(8)?,
                missing_squad_labels: row.get(9)?,
                squad_label_warnings: json_list_col(row, 10)?,
                teams: Vec::new(),
            };
            Ok(EpicView {
                epic,
                jira_sprint_id: row.get(11)?,
                sprint_name: row.get(12)?,
                sync_timestamp: ts_col(row, 13)?,
                tasks: Vec::new(),
            })
        })?;
        let mut views = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        for view in &mut views {
            view.epic.teams = self.team_keys_for_epic(view.epic.id)?;
            view.tasks = self.tasks_for_epic(view.epic.id)?;
        }
        Ok(views)
    }

    pub fn tasks_for_epic(&self, epic_snapshot_id: i64) -> Result<Vec<DodTaskSnapshot>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM dod_task_snapshots
             WHERE epic_snapshot_id = ?1
             ORDER BY jira_key, id"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![epic_snapshot_id], map_task)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn team_keys_for_epic(&self, epic_snapshot_id: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT t.key FROM epic_snapshot_teams est
             JOIN teams t ON t.id = est.team_id
             WHERE est.epic_snapshot_id = ?1
             ORDER BY t.key",
        )?;
        let rows = stmt.query_map(params![epic_snapshot_id], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -----------------------------------------------------------------------
    // Teams
    // -----------------------------------------------------------------------

    pub fn get_team(&self, key: &str) -> Result<Option<Team>> {
        let team = self
            .conn
            .query_row(
                "SELECT id, key, display_name, notification_emails, is_active
                 FROM teams WHERE key = ?1",
                params![key],
                map_team,
            )
            .optional()?;
        match team {
            Some(mut team) => {
                team.scrum_masters = self.scrum_masters(team.id)?;
                Ok(Some(team))
            }
            None => Ok(None),
        }
    }

    pub fn list_teams(&self) -> Result<Vec<Team>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, key, display_name, notification_emails, is_active
             FROM teams ORDER BY key",
        )?;
        let rows = stmt.query_map([], map_team)?;
        let mut teams = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        for team in &mut teams {
            team.scrum_masters = self.scrum_masters(team.id)?;
        }
        Ok(teams)
    }

    /// Replace a team's notification emails. Blank entries are dropped and
    /// the rest trimmed, de-duplicated and sorted.
    pub fn set_team_recipients(&self, key: &str, emails: &[String]) -> Result<Team> {
        let emails = normalize_list(emails);
        let changed = self.conn.execute(
            "UPDATE teams SET notification_emails = ?1 WHERE key = ?2",
            params![serde_json::to_string(&emails)?, key],
        )?;
        self.require_team(key, changed)
    }

    /// Replace a team's scrum-master set.
    pub fn set_team_scrum_masters(&mut self, key: &str, usernames: &[String]) -> Result<Team> {
        let usernames = normalize_list(usernames);
        let tx = self.conn.transaction()?;
        let team_id: Option<i64> = tx
            .query_row("SELECT id FROM teams WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(team_id) = team_id else {
            return Err(DodError::not_found("team", key));
        };
        tx.execute(
            "DELETE FROM team_scrum_masters WHERE team_id = ?1",
            params![team_id],
        )?;
        for username in &usernames {
            tx.execute(
                "INSERT INTO team_scrum_masters (team_id, username) VALUES (?1, ?2)",
                params![team_id, username],
            )?;
        }
        tx.commit()?;
        self.require_team(key, 1)
    }

    pub fn set_team_display_name(&self, key: &str, display_name: &str) -> Result<Team> {
        let changed = self.conn.execute(
            "UPDATE teams SET display_name = ?1 WHERE key = ?2",
            params![display_name.trim(), key],
        )?;
        self.require_team(key, changed)
    }

    fn require_team(&self, key: &str, changed: usize) -> Result<Team> {
        if changed == 0 {
            return Err(DodError::not_found("team", key));
        }
        self.get_team(key)?
            .ok_or_else(|| DodError::not_found("team", key))
    }

    fn scrum_masters(&self, team_id: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT username FROM team_scrum_masters WHERE team_id = ?1 ORDER BY username",
        )?;
        let rows = stmt.query_map(params![team_id], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -----------------------------------------------------------------------
    // Nudges
    // -----------------------------------------------------------------------

    pub fn latest_nudge(&self, epic_snapshot_id: i64) -> Result<Option<NudgeLog>> {
        Ok(self
            .conn
            .query_row(
                "SELECT n.id, n.epic_snapshot_id, t.key, n.triggered_by, n.recipient_emails,
                        n.message_preview, n.sent_at
                 FROM nudge_logs n LEFT JOIN teams t ON t.id = n.team_id
                 WHERE n.epic_snapshot_id = ?1
                 ORDER BY n.sent_at DESC, n.id DESC
                 LIMIT 1",
                params![epic_snapshot_id],
                map_nudge,
            )
            .optional()?)
    }

    pub fn insert_nudge_log(
        &self,
        epic_snapshot_id: i64,
        team_key: Option<&str>,
        triggered_by: &str,
        recipients: &[String],
        message_preview: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<NudgeLog> {
        self.conn.execute(
            "INSERT INTO nudge_logs
                (epic_snapshot_id, team_id, triggered_by, recipient_emails, message_preview, sent_at)
             VALUES (?1, (SELECT id FROM teams WHERE key = ?2), ?3, ?4, ?5, ?6)",
            params![
                epic_snapshot_id,
                team_key,
                triggered_by,
                serde_json::to_string(recipients)?,
                message_preview,
                format_timestamp(sent_at),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(self.conn.query_row(
            "SELECT n.id, n.epic_snapshot_id, t.key, n.triggered_by, n.recipient_emails,
                    n.message_preview, n.sent_at
             FROM nudge_logs n LEFT JOIN teams t ON t.id = n.team_id
             WHERE n.id = ?1",
            params![id],
            map_nudge,
        )?)
    }

    /// Nudges sent for epics of the given generations, newest first. Returns
    /// the total matching count alongside at most `limit` entries.
    pub fn nudge_history(
        &self,
        snapshot_ids: &[i64],
        squads: &[String],
        limit: usize,
    ) -> Result<(u64, Vec<NudgeEntry>)> {
        if snapshot_ids.is_empty() {
            return Ok((0, Vec::new()));
        }

        let mut values: Vec<Value> = snapshot_ids.iter().map(|id| Value::Integer(*id)).collect();
        let mut filter = format!(
            "e.sprint_snapshot_id IN ({})",
            placeholders(snapshot_ids.len())
        );
        if !squads.is_empty() {
            filter.push_str(&format!(
                " AND e.id IN (SELECT est.epic_snapshot_id FROM epic_snapshot_teams est
                               JOIN teams tt ON tt.id = est.team_id
                               WHERE tt.key IN ({}))",
                placeholders(squads.len())
            ));
            values.extend(squads.iter().map(|s| Value::Text(s.clone())));
        }

        let total: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM nudge_logs n
                 JOIN epic_snapshots e ON e.id = n.epic_snapshot_id
                 WHERE {filter}"
            ),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        values.push(Value::Integer(limit as i64));
        let sql = format!(
            "SELECT e.id, e.jira_key, e.sprint_snapshot_id, s.sprint_name, e.summary, t.key,
                    n.triggered_by, n.recipient_emails, n.sent_at
             FROM nudge_logs n
             JOIN epic_snapshots e ON e.id = n.epic_snapshot_id
             JOIN sprint_snapshots s ON s.id = e.sprint_snapshot_id
             LEFT JOIN teams t ON t.id = n.team_id
             WHERE {filter}
             ORDER BY n.sent_at DESC, n.id DESC
             LIMIT ?"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            let epic_id: i64 = row.get(0)?;
            Ok((
                epic_id,
                NudgeEntry {
                    epic_key: row.get(1)?,
                    sprint_snapshot_id: row.get(2)?,
                    sprint_name: row.get(3)?,
                    epic_summary: row.get(4)?,
                    team: row.get(5)?,
                    epic_teams: Vec::new(),
                    triggered_by: row.get(6)?,
                    recipient_emails: json_list_col(row, 7)?,
                    sent_at: ts_col(row, 8)?,
                },
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (epic_id, mut entry) = row?;
            entry.epic_teams = self.team_keys_for_epic(epic_id)?;
            entries.push(entry);
        }
        Ok((total as u64, entries))
    }

    // -----------------------------------------------------------------------
    // Sync runs
    // -----------------------------------------------------------------------

    pub fn start_sync_run(
        &self,
        trigger: &str,
        triggered_by: &str,
        project_key: Option<&str>,
        started_at: DateTime<Utc>,
    ) -> Result<SyncRun> {
        self.conn.execute(
            "INSERT INTO sync_runs (started_at, status, run_trigger, triggered_by, project_key)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                format_timestamp(started_at),
                SyncStatus::Running.as_str(),
                trigger,
                triggered_by,
                project_key,
            ],
        )?;
        self.require_sync_run(self.conn.last_insert_rowid())
    }

    pub fn finish_sync_run_success(
        &self,
        id: i64,
        sprints: usize,
        epics: usize,
        dod_tasks: usize,
        finished_at: DateTime<Utc>,
    ) -> Result<SyncRun> {
        self.conn.execute(
            "UPDATE sync_runs
             SET status = ?1, finished_at = ?2, sprint_snapshots_created = ?3,
                 epic_snapshots_created = ?4, dod_tasks_created = ?5, error_message = ''
             WHERE id = ?6",
            params![
                SyncStatus::Success.as_str(),
                format_timestamp(finished_at),
                sprints as i64,
                epics as i64,
                dod_tasks as i64,
                id,
            ],
        )?;
        self.require_sync_run(id)
    }

    pub fn finish_sync_run_failed(
        &self,
        id: i64,
        error_message: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<SyncRun> {
        self.conn.execute(
            "UPDATE sync_runs SET status = ?1, finished_at = ?2, error_message = ?3 WHERE id = ?4",
            params![
                SyncStatus::Failed.as_str(),
                format_timestamp(finished_at),
                error_message,
                id,
            ],
        )?;
        self.require_sync_run(id)
    }

    pub fn get_sync_run(&self, id: i64) -> Result<Option<SyncRun>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM sync_runs WHERE id = ?1");
        Ok(self.conn.query_row(&sql, params![id], map_run).optional()?)
    }

    fn require_sync_run(&self, id: i64) -> Result<SyncRun> {
        self.get_sync_run(id)?
            .ok_or_else(|| DodError::not_found("sync run", id.to_string()))
    }

    /// Most recent runs first.
    pub fn list_sync_runs(&self, limit: usize) -> Result<Vec<SyncRun>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM sync_runs ORDER BY started_at DESC, id DESC LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], map_run)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

// ---------------------------------------------------------------------------
// Insert helpers (shared by the transaction and plain connections)
// ---------------------------------------------------------------------------

fn insert_epic(conn: &Connection, sprint_snapshot_id: i64, epic: &EpicPlan) -> Result<i64> {
    conn.execute(
        "INSERT INTO epic_snapshots
            (sprint_snapshot_id, jira_issue_id, jira_key, summary, status_name,
             resolution_name, is_done, jira_url, missing_squad_labels, squad_label_warnings)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            sprint_snapshot_id,
            epic.jira_issue_id,
            epic.jira_key,
            epic.summary,
            epic.status_name,
            epic.resolution_name,
            epic.is_done,
            epic.jira_url,
            epic.teams.missing,
            serde_json::to_string(&epic.teams.warnings)?,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_task(conn: &Connection, epic_snapshot_id: i64, task: &TaskPlan) -> Result<i64> {
    conn.execute(
        "INSERT INTO dod_task_snapshots
            (epic_snapshot_id, jira_issue_id, jira_key, summary, category, status_name,
             resolution_name, is_done, jira_url, has_evidence_link, evidence_link,
             non_compliance_reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            epic_snapshot_id,
            task.jira_issue_id,
            task.jira_key,
            task.summary,
            task.category,
            task.status_name,
            task.resolution_name,
            task.is_done,
            task.jira_url,
            task.evidence_link.is_some(),
            task.evidence_link.as_deref().unwrap_or(""),
            task.non_compliance_reason,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert-if-absent then re-select, so concurrent creators of the same key
/// converge on one row.
fn get_or_create_team_id(conn: &Connection, key: &str, created_at: &str) -> Result<i64> {
    let inserted = conn.execute(
        "INSERT INTO teams (key, created_at) VALUES (?1, ?2) ON CONFLICT(key) DO NOTHING",
        params![key, created_at],
    )?;
    if inserted > 0 {
        tracing::info!(team = key, "team created");
    }
    Ok(conn.query_row(
        "SELECT id FROM teams WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )?)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn normalize_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_timestamp(&r).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn json_list_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn map_sprint(row: &Row<'_>) -> rusqlite::Result<SprintSnapshot> {
    let versions: String = row.get(5)?;
    Ok(SprintSnapshot {
        id: row.get(0)?,
        jira_sprint_id: row.get(1)?,
        sprint_name: row.get(2)?,
        sprint_state: row.get(3)?,
        sync_timestamp: ts_col(row, 4)?,
        issue_versions: Fingerprint::from_json(&versions).map_err(|e| conversion_error(5, e))?,
    })
}

fn map_task(row: &Row<'_>) -> rusqlite::Result<DodTaskSnapshot> {
    Ok(DodTaskSnapshot {
        id: row.get(0)?,
        epic_snapshot_id: row.get(1)?,
        jira_issue_id: row.get(2)?,
        jira_key: row.get(3)?,
        summary: row.get(4)?,
        category: row.get(5)?,
        status_name: row.get(6)?,
        resolution_name: row.get(7)?,
        is_done: row.get(8)?,
        jira_url: row.get(9)?,
        has_evidence_link: row.get(10)?,
        evidence_link: row.get(11)?,
        non_compliance_reason: row.get(12)?,
    })
}

fn map_team(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        key: row.get(1)?,
        display_name: row.get(2)?,
        notification_emails: json_list_col(row, 3)?,
        scrum_masters: Vec::new(),
        is_active: row.get(4)?,
    })
}

fn map_nudge(row: &Row<'_>) -> rusqlite::Result<NudgeLog> {
    Ok(NudgeLog {
        id: row.get(0)?,
        epic_snapshot_id: row.get(1)?,
        team_key: row.get(2)?,
        triggered_by: row.get(3)?,
        recipient_emails: json_list_col(row, 4)?,
        message_preview: row.get(5)?,
        sent_at: ts_col(row, 6)?,
    })
}

fn map_run(row: &Row<'_>) -> rusqlite::Result<SyncRun> {
    let status: String = row.get(3)?;
    let count = |idx: usize| -> rusqlite::Result<u64> { Ok(row.get::<_, i64>(idx)? as u64) };
    Ok(SyncRun {
        id: row.get(0)?,
        started_at: ts_col(row, 1)?,
        finished_at: opt_ts_col(row, 2)?,
        status: status.parse().map_err(|e: String| {
            conversion_error(3, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?,
        trigger: row.get(4)?,
        triggered_by: row.get(5)?,
        project_key: row.get(6)?,
        sprint_snapshots_created: count(7)?,
        epic_snapshots_created: count(8)?,
        dod_tasks_created: count(9)?,
        error_message: row.get(10)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
