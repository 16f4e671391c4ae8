use crate::analysis::query::FilterClause;
use crate::commands::db::{issue_from_row, ISSUE_COLUMNS};
use crate::models::duplicate::DuplicateGroup;
use crate::models::issue::Issue;
use rusqlite::{params_from_iter, Connection, Result};
use std::collections::HashMap;

type GroupKey = (String, Option<String>);

/// Groups issues by exact `(title, site)` and keeps groups of two or more.
/// Groups appear in order of their first member; members keep input order.
pub fn group_duplicates(issues: &[Issue]) -> Vec<DuplicateGroup> {
    let mut index_by_key: HashMap<GroupKey, usize> = HashMap::new();
    let mut groups: Vec<DuplicateGroup> = Vec::new();

    for issue in issues {
        let key = (issue.title.clone(), issue.site.clone());
        let slot = *index_by_key.entry(key).or_insert_with(|| {
            groups.push(DuplicateGroup {
                title: issue.title.clone(),
                site: issue.site.clone(),
                issues: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].issues.push(issue.clone());
    }

    groups.retain(|group| group.len() >= 2);
    groups
}

/// Loads only the issues that share their `(title, site)` with at least one
/// other issue matching the filter, in the requested order.
pub fn fetch_duplicate_members(
    conn: &Connection,
    filter: &FilterClause,
    order_by: &str,
) -> Result<Vec<Issue>> {
    let sql = format!(
        "SELECT {ISSUE_COLUMNS} FROM (
            SELECT {ISSUE_COLUMNS}, COUNT(*) OVER (PARTITION BY title, site) AS group_size
            FROM issues{}
        ) WHERE group_size >= 2 ORDER BY {order_by}",
        filter.where_sql()
    );

    let mut stmt = conn.prepare(&sql)?;
    let issues = stmt
        .query_map(params_from_iter(filter.params().iter()), issue_from_row)?
        .collect::<Result<Vec<_>>>()?;
    Ok(issues)
}

/// Steps through duplicate groups one at a time, wrapping around at the end.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateReview {
    groups: Vec<DuplicateGroup>,
    index: usize,
}

impl DuplicateReview {
    pub fn new(groups: Vec<DuplicateGroup>) -> Self {
        Self { groups, index: 0 }
    }

    pub fn current(&self) -> Option<&DuplicateGroup> {
        self.groups.get(self.index)
    }

    pub fn next(&mut self) -> Option<&DuplicateGroup> {
        if self.groups.is_empty() {
            return None;
        }
        self.index = (self.index + 1) % self.groups.len();
        self.current()
    }

    /// One-based position of the current group and the group count.
    pub fn position(&self) -> Option<(usize, usize)> {
        self.current().map(|_| (self.index + 1, self.groups.len()))
    }
}
