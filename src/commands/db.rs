use crate::models::issue::{Issue, IssuePatch, NewIssue, Severity, Status};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result, Row};
use std::path::PathBuf;
use std::time::Duration;

const DB_SCHEMA_VERSION: i64 = 2;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub const ISSUE_COLUMNS: &str =
    "id, title, description, site, severity, status, created_at, updated_at";

/// Handle to the SQLite file backing the issue table. Each operation opens
/// its own connection, so the store is cheap to clone and share.
#[derive(Debug, Clone)]
pub struct IssueStore {
    db_path: PathBuf,
}

impl IssueStore {
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            db_path: db_path.into(),
        };
        let conn = store.connect()?;
        initialize_schema(&conn)?;
        log::info!("Issue store ready at {}", store.db_path.display());
        Ok(store)
    }

    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Ok(conn)
    }
}

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    let mut version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        apply_migration_1(conn)?;
        version = 1;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version < 2 {
        apply_migration_2(conn)?;
        version = 2;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version > DB_SCHEMA_VERSION {
        log::warn!("Issue database is at schema {version}, newer than {DB_SCHEMA_VERSION}");
    }

    Ok(())
}

fn apply_migration_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS issues (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL CHECK(length(trim(title)) > 0),
            description TEXT NOT NULL CHECK(length(trim(description)) > 0),
            site TEXT,
            severity TEXT CHECK(severity IN ('minor', 'major', 'critical')),
            status TEXT CHECK(status IN ('open', 'in_progress', 'resolved')),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        ",
    )
}

fn apply_migration_2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_issues_created_at ON issues(created_at);
        CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status);
        CREATE INDEX IF NOT EXISTS idx_issues_severity ON issues(severity);
        CREATE INDEX IF NOT EXISTS idx_issues_title_site ON issues(title, site);
        ",
    )
}

/// Current time truncated to the millisecond precision the table stores.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

pub fn issue_from_row(row: &Row<'_>) -> Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        site: row.get(3)?,
        severity: row.get::<_, Option<Severity>>(4)?,
        status: row.get::<_, Option<Status>>(5)?,
        created_at: timestamp_column(row, 6)?,
        updated_at: timestamp_column(row, 7)?,
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

pub fn insert_issue(conn: &Connection, issue: &NewIssue, now: DateTime<Utc>) -> Result<Issue> {
    let created_at = issue.created_at.unwrap_or(now);

    conn.execute(
        "INSERT INTO issues (title, description, site, severity, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &issue.title,
            &issue.description,
            issue.site.as_deref(),
            issue.severity,
            issue.status,
            created_at.timestamp_millis(),
            now.timestamp_millis(),
        ],
    )?;

    Ok(Issue {
        id: conn.last_insert_rowid(),
        title: issue.title.clone(),
        description: issue.description.clone(),
        site: issue.site.clone(),
        severity: issue.severity,
        status: issue.status,
        created_at: truncate_millis(created_at),
        updated_at: now,
    })
}

/// Inserts every row or none of them.
pub fn insert_issues(conn: &Connection, issues: &[NewIssue], now: DateTime<Utc>) -> Result<Vec<Issue>> {
    let tx = conn.unchecked_transaction()?;
    let mut created = Vec::with_capacity(issues.len());
    for issue in issues {
        created.push(insert_issue(&tx, issue, now)?);
    }
    tx.commit()?;
    Ok(created)
}

pub fn fetch_issue(conn: &Connection, id: i64) -> Result<Option<Issue>> {
    conn.query_row(
        &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1"),
        params![id],
        issue_from_row,
    )
    .optional()
}

/// Applies the provided fields and bumps `updated_at`. Returns the number of rows touched.
pub fn update_issue(conn: &Connection, id: i64, patch: &IssuePatch, now: DateTime<Utc>) -> Result<usize> {
    let mut assignments: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(title) = &patch.title {
        assignments.push("title = ?");
        values.push(Value::Text(title.clone()));
    }
    if let Some(description) = &patch.description {
        assignments.push("description = ?");
        values.push(Value::Text(description.clone()));
    }
    if let Some(site) = &patch.site {
        assignments.push("site = ?");
        values.push(optional_text(site.clone()));
    }
    if let Some(severity) = patch.severity {
        assignments.push("severity = ?");
        values.push(optional_text(severity.map(|s| s.as_str().to_string())));
    }
    if let Some(status) = patch.status {
        assignments.push("status = ?");
        values.push(optional_text(status.map(|s| s.as_str().to_string())));
    }

    // Strictly increasing even when two updates land in the same millisecond.
    assignments.push("updated_at = MAX(?, updated_at + 1)");
    values.push(Value::Integer(now.timestamp_millis()));
    values.push(Value::Integer(id));

    let sql = format!("UPDATE issues SET {} WHERE id = ?", assignments.join(", "));
    conn.execute(&sql, params_from_iter(values))
}

pub fn delete_issue(conn: &Connection, id: i64) -> Result<usize> {
    conn.execute("DELETE FROM issues WHERE id = ?1", params![id])
}

fn optional_text(value: Option<String>) -> Value {
    value.map(Value::Text).unwrap_or(Value::Null)
}

fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}
