use crate::models::counts::IssueCounts;
use crate::models::issue::{Severity, Status};
use rusqlite::{Connection, Result};
use std::collections::BTreeMap;

/// Column an issue count can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupColumn {
    Status,
    Severity,
}

impl GroupColumn {
    fn column(self) -> &'static str {
        match self {
            GroupColumn::Status => "status",
            GroupColumn::Severity => "severity",
        }
    }

    fn known_values(self) -> Vec<&'static str> {
        match self {
            GroupColumn::Status => Status::ALL.iter().map(|s| s.as_str()).collect(),
            GroupColumn::Severity => Severity::ALL.iter().map(|s| s.as_str()).collect(),
        }
    }
}

/// Counts every issue by the given column. Every known value and the empty
/// bucket (missing value) are always present, zero-filled.
pub fn count_by(conn: &Connection, group: GroupColumn) -> Result<BTreeMap<String, u64>> {
    let mut counts: BTreeMap<String, u64> = group
        .known_values()
        .into_iter()
        .chain(std::iter::once(""))
        .map(|key| (key.to_string(), 0))
        .collect();

    let column = group.column();
    let mut stmt = conn.prepare(&format!(
        "SELECT COALESCE({column}, ''), COUNT(id) FROM issues GROUP BY COALESCE({column}, '')"
    ))?;

    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (key, count) = row?;
        *counts.entry(key).or_insert(0) += count.max(0) as u64;
    }

    Ok(counts)
}

pub fn issue_counts(conn: &Connection) -> Result<IssueCounts> {
    Ok(IssueCounts {
        status: count_by(conn, GroupColumn::Status)?,
        severity: count_by(conn, GroupColumn::Severity)?,
    })
}
