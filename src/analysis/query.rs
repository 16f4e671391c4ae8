use crate::commands::db::{issue_from_row, ISSUE_COLUMNS};
use crate::error::{IssueError, IssueResult};
use crate::models::issue::{Issue, Severity, Status};
use crate::models::query::{IssueFilters, SortField, SortOrder};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

/// Paging bounds taken from settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDefaults {
    pub default_limit: i64,
    pub max_limit: i64,
}

impl Default for PageDefaults {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 100,
        }
    }
}

/// WHERE predicates and their bound values, shared by the list and duplicate queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterClause {
    predicates: Vec<String>,
    params: Vec<Value>,
}

impl FilterClause {
    pub fn from_filters(filters: &IssueFilters) -> IssueResult<Self> {
        let mut clause = Self::default();

        if let Some(title) = non_empty(&filters.title) {
            clause.push("instr(title, ?) > 0", vec![Value::Text(title.to_string())]);
        }
        if let Some(site) = non_empty(&filters.site) {
            clause.push("instr(site, ?) > 0", vec![Value::Text(site.to_string())]);
        }
        if let Some(status) = non_blank(&filters.status) {
            let status: Status = status.parse()?;
            clause.push("status = ?", vec![Value::Text(status.as_str().to_string())]);
        }
        if let Some(severity) = non_blank(&filters.severity) {
            let severity: Severity = severity.parse()?;
            clause.push("severity = ?", vec![Value::Text(severity.as_str().to_string())]);
        }
        if let Some(search) = non_empty(&filters.search) {
            let needle = Value::Text(search.to_string());
            clause.push(
                "(instr(title, ?) > 0 OR instr(description, ?) > 0 OR instr(COALESCE(site, ''), ?) > 0)",
                vec![needle.clone(), needle.clone(), needle],
            );
        }

        Ok(clause)
    }

    fn push(&mut self, predicate: &str, values: Vec<Value>) {
        self.predicates.push(predicate.to_string());
        self.params.extend(values);
    }

    pub fn where_sql(&self) -> String {
        if self.predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.predicates.join(" AND "))
        }
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

/// A fully resolved list query: filters, ordering and one page window.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueQuery {
    pub filter: FilterClause,
    pub order_by: String,
    pub page: i64,
    pub limit: i64,
    pub offset: i64,
}

pub fn build_issue_query(filters: &IssueFilters, defaults: PageDefaults) -> IssueResult<IssueQuery> {
    let filter = FilterClause::from_filters(filters)?;
    let order_by = order_by_sql(
        filters.sort_by.unwrap_or_default(),
        filters.sort_order.unwrap_or_default(),
    );

    let limit = filters.limit.unwrap_or(defaults.default_limit);
    if limit < 1 {
        return Err(IssueError::validation("limit must be at least 1"));
    }
    if limit > defaults.max_limit {
        return Err(IssueError::validation(format!(
            "limit must not exceed {}",
            defaults.max_limit
        )));
    }

    // Pages below 1 are treated as the first page.
    let page = filters.page.unwrap_or(1).max(1);
    let offset = (page - 1).saturating_mul(limit);

    Ok(IssueQuery {
        filter,
        order_by,
        page,
        limit,
        offset,
    })
}

impl IssueQuery {
    pub fn execute(&self, conn: &Connection) -> rusqlite::Result<(Vec<Issue>, u64)> {
        let where_sql = self.filter.where_sql();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM issues{where_sql}"),
            params_from_iter(self.filter.params().iter()),
            |row| row.get(0),
        )?;

        let mut values = self.filter.params().to_vec();
        values.push(Value::Integer(self.limit));
        values.push(Value::Integer(self.offset));

        let mut stmt = conn.prepare(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues{where_sql} ORDER BY {} LIMIT ? OFFSET ?",
            self.order_by
        ))?;
        let issues = stmt
            .query_map(params_from_iter(values), issue_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((issues, total.max(0) as u64))
    }
}

/// Builds the ORDER BY body. Severity and status sort by clinical rank rather
/// than lexically, with missing values ranked last; ties fall back to id.
pub fn order_by_sql(field: SortField, order: SortOrder) -> String {
    let direction = match order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };

    let expression = match field {
        SortField::CreatedAt => "created_at".to_string(),
        SortField::UpdatedAt => "updated_at".to_string(),
        SortField::Title => "title".to_string(),
        SortField::Site => "site".to_string(),
        SortField::Severity => rank_case(
            "severity",
            Severity::ALL.iter().map(|s| (s.as_str(), s.rank())),
            Severity::ALL.len(),
        ),
        SortField::Status => rank_case(
            "status",
            Status::ALL.iter().map(|s| (s.as_str(), s.rank())),
            Status::ALL.len(),
        ),
    };

    format!("{expression} {direction}, id {direction}")
}

fn rank_case<'a>(column: &str, ranks: impl Iterator<Item = (&'a str, u8)>, missing: usize) -> String {
    let arms: Vec<String> = ranks
        .map(|(value, rank)| format!("WHEN '{value}' THEN {rank}"))
        .collect();
    format!("CASE {column} {} ELSE {missing} END", arms.join(" "))
}

/// `ceil(total_items / limit)`, with a zero limit yielding zero pages.
pub fn total_pages(total_items: u64, limit: i64) -> u64 {
    if limit < 1 {
        return 0;
    }
    total_items.div_ceil(limit as u64)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
