use crate::analysis::aggregation::issue_counts;
use crate::analysis::csv_import::parse_issues_csv;
use crate::analysis::duplicates::{fetch_duplicate_members, group_duplicates};
use crate::analysis::query::{build_issue_query, order_by_sql, total_pages, FilterClause, PageDefaults};
use crate::commands::db::{self, IssueStore};
use crate::error::{IssueError, IssueResult, StoreContext};
use crate::models::counts::IssueCounts;
use crate::models::duplicate::DuplicateReport;
use crate::models::issue::{Issue, IssueInput, NewIssue};
use crate::models::query::{
    BulkCreateOutcome, DeleteOutcome, IssueFilters, IssuePage, UpdateOutcome,
};
use rusqlite::Connection;

/// Input accepted by bulk creation: pre-parsed rows or a raw CSV upload.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkPayload {
    Rows(Vec<IssueInput>),
    Csv(Vec<u8>),
}

/// Issue operations over the store. Cheap to clone; each call opens its own connection.
#[derive(Debug, Clone)]
pub struct IssueService {
    store: IssueStore,
    page_defaults: PageDefaults,
}

impl IssueService {
    pub fn new(store: IssueStore, page_defaults: PageDefaults) -> Self {
        Self {
            store,
            page_defaults,
        }
    }

    fn connect(&self) -> IssueResult<Connection> {
        self.store
            .connect()
            .store_context("Failed to open issue database")
    }

    pub fn list(&self, filters: &IssueFilters) -> IssueResult<IssuePage> {
        let query = build_issue_query(filters, self.page_defaults)?;
        let conn = self.connect()?;
        let (issues, total_items) = query.execute(&conn).store_context("Failed to get issues")?;

        Ok(IssuePage {
            issues,
            total_items,
            total_pages: total_pages(total_items, query.limit),
            current_page: query.page,
            limit: query.limit,
        })
    }

    pub fn counts(&self) -> IssueResult<IssueCounts> {
        let conn = self.connect()?;
        issue_counts(&conn).store_context("Failed to count issues")
    }

    /// Duplicate groups across every issue matching the filters (paging ignored).
    pub fn duplicates(&self, filters: &IssueFilters) -> IssueResult<DuplicateReport> {
        let filter = FilterClause::from_filters(filters)?;
        let order_by = order_by_sql(
            filters.sort_by.unwrap_or_default(),
            filters.sort_order.unwrap_or_default(),
        );

        let conn = self.connect()?;
        let members = fetch_duplicate_members(&conn, &filter, &order_by)
            .store_context("Failed to find duplicate issues")?;

        Ok(DuplicateReport::new(group_duplicates(&members)))
    }

    pub fn get(&self, id: i64) -> IssueResult<Option<Issue>> {
        let conn = self.connect()?;
        db::fetch_issue(&conn, id).store_context("Failed to get issue")
    }

    pub fn create(&self, input: IssueInput) -> IssueResult<Issue> {
        let new_issue = input.into_new_issue()?;
        let conn = self.connect()?;
        let issue = db::insert_issue(&conn, &new_issue, db::now_millis())
            .store_context("Failed to create issue")?;

        log::info!("Created issue {} ({})", issue.id, issue.title);
        Ok(issue)
    }

    /// Applies only the fields present in `input`. An unknown id is reported
    /// as zero rows updated rather than an error.
    pub fn update(&self, id: Option<i64>, input: IssueInput) -> IssueResult<UpdateOutcome> {
        let id = id.ok_or_else(|| IssueError::validation("Id is required"))?;
        let patch = input.into_patch()?;

        let conn = self.connect()?;
        let updated = db::update_issue(&conn, id, &patch, db::now_millis())
            .store_context("Failed to update issue")?;
        let issue = if updated > 0 {
            db::fetch_issue(&conn, id).store_context("Failed to get issue")?
        } else {
            None
        };

        log::info!("Updated issue {id} ({updated} row(s))");
        Ok(UpdateOutcome { updated, issue })
    }

    pub fn delete(&self, id: Option<i64>) -> IssueResult<DeleteOutcome> {
        let id = id.ok_or_else(|| IssueError::validation("Id is required"))?;
        let conn = self.connect()?;
        let deleted = db::delete_issue(&conn, id).store_context("Failed to delete issue")?;

        log::info!("Deleted issue {id} ({deleted} row(s))");
        Ok(DeleteOutcome { deleted })
    }

    /// Validates every row before inserting any; the insert itself is one transaction.
    pub fn bulk_create(&self, payload: BulkPayload) -> IssueResult<BulkCreateOutcome> {
        let new_issues = match payload {
            BulkPayload::Csv(bytes) => parse_issues_csv(&bytes)?,
            BulkPayload::Rows(rows) => validate_rows(rows)?,
        };

        let conn = self.connect()?;
        let issues = db::insert_issues(&conn, &new_issues, db::now_millis())
            .store_context("Failed to bulk create issues")?;

        log::info!("Imported {} issues", issues.len());
        Ok(BulkCreateOutcome {
            message: format!("Successfully created {} issues", issues.len()),
            created: issues.len(),
            issues,
        })
    }
}

fn validate_rows(rows: Vec<IssueInput>) -> IssueResult<Vec<NewIssue>> {
    if rows.is_empty() {
        return Err(IssueError::validation("No issues provided for bulk creation"));
    }

    rows.into_iter()
        .enumerate()
        .map(|(index, row)| {
            row.into_imported_issue().map_err(|e| {
                IssueError::validation(format!("Invalid issue at row {}: {e}", index + 1))
            })
        })
        .collect()
}

/// Reads the `id` query parameter. Missing or blank ids are "not provided".
pub fn parse_issue_id(raw: Option<&str>) -> IssueResult<Option<i64>> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(value) => value
            .parse::<i64>()
            .map(Some)
            .map_err(|_| IssueError::validation(format!("Id must be an integer, got {value}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::issue::{Severity, Status};
    use crate::models::query::{SortField, SortOrder};
    use tempfile::TempDir;

    fn service() -> (TempDir, IssueService) {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = IssueStore::open(dir.path().join("issues.db")).expect("open store");
        (dir, IssueService::new(store, PageDefaults::default()))
    }

    fn input(title: &str, site: Option<&str>) -> IssueInput {
        IssueInput {
            title: Some(title.to_string()),
            description: Some(format!("{title} noted at monitoring visit")),
            site: site.map(str::to_string),
            ..IssueInput::default()
        }
    }

    #[test]
    fn create_rejects_blank_title_and_defaults_site_to_null() {
        let (_dir, service) = service();

        let err = service
            .create(IssueInput {
                title: Some(String::new()),
                description: Some("x".to_string()),
                ..IssueInput::default()
            })
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let issue = service.create(input("Missed visit", None)).unwrap();
        assert_eq!(issue.site, None);
        assert_eq!(service.get(issue.id).unwrap(), Some(issue));
    }

    #[test]
    fn update_with_only_status_keeps_other_fields() {
        let (_dir, service) = service();
        let created = service
            .create(IssueInput {
                severity: Some("major".to_string()),
                ..input("Missed visit", Some("SITE-01"))
            })
            .unwrap();

        let outcome = service
            .update(
                Some(created.id),
                IssueInput {
                    status: Some("resolved".to_string()),
                    ..IssueInput::default()
                },
            )
            .unwrap();

        assert_eq!(outcome.updated, 1);
        let updated = outcome.issue.expect("updated issue");
        assert_eq!(updated.status, Some(Status::Resolved));
        assert_eq!(updated.title, created.title);
        assert_eq!(updated.description, created.description);
        assert_eq!(updated.site, created.site);
        assert_eq!(updated.severity, Some(Severity::Major));
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at > created.updated_at);
    }

    #[test]
    fn update_and_delete_require_an_id() {
        let (_dir, service) = service();
        assert!(service.update(None, IssueInput::default()).unwrap_err().is_validation());
        assert!(service.delete(None).unwrap_err().is_validation());
    }

    #[test]
    fn unknown_ids_report_zero_rows() {
        let (_dir, service) = service();
        assert_eq!(service.delete(Some(999)).unwrap().deleted, 0);

        let outcome = service
            .update(
                Some(999),
                IssueInput {
                    status: Some("open".to_string()),
                    ..IssueInput::default()
                },
            )
            .unwrap();
        assert_eq!(outcome.updated, 0);
        assert!(outcome.issue.is_none());
    }

    #[test]
    fn list_reports_paging_metadata() {
        let (_dir, service) = service();
        for n in 0..5 {
            service.create(input(&format!("Issue {n}"), Some("SITE-01"))).unwrap();
        }

        let page = service
            .list(&IssueFilters {
                limit: Some(2),
                page: Some(3),
                ..IssueFilters::default()
            })
            .unwrap();
        assert_eq!(page.total_items, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.current_page, 3);
        assert_eq!(page.issues.len(), 1);
        assert_eq!(page.limit, 2);
    }

    #[test]
    fn bulk_rows_are_validated_with_row_numbers() {
        let (_dir, service) = service();
        let err = service
            .bulk_create(BulkPayload::Rows(vec![
                input("A", None),
                IssueInput {
                    description: None,
                    ..input("B", None)
                },
            ]))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid issue at row 2: Description is required");
        assert_eq!(service.counts().unwrap().total(), 0);

        let err = service.bulk_create(BulkPayload::Rows(Vec::new())).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn bulk_csv_creates_every_row() {
        let (_dir, service) = service();
        let csv = "title,description,site,severity,status\n\
                   A,first,S1,minor,open\n\
                   B,second,S1,major,resolved\n\
                   C,third,,critical,\n";

        let outcome = service.bulk_create(BulkPayload::Csv(csv.as_bytes().to_vec())).unwrap();
        assert_eq!(outcome.created, 3);
        assert_eq!(outcome.issues.len(), 3);

        let counts = service.counts().unwrap();
        assert_eq!(counts.severity["critical"], 1);
        assert_eq!(counts.status[""], 1);
    }

    #[test]
    fn duplicates_respect_filters_and_sort() {
        let (_dir, service) = service();
        for (title, site) in [("A", "S1"), ("A", "S1"), ("A", "S2"), ("B", "S1"), ("B", "S1")] {
            service.create(input(title, Some(site))).unwrap();
        }

        let report = service
            .duplicates(&IssueFilters {
                sort_by: Some(SortField::Title),
                sort_order: Some(SortOrder::Desc),
                ..IssueFilters::default()
            })
            .unwrap();
        assert_eq!(report.total_groups, 2);
        assert_eq!(report.groups[0].title, "B");

        let report = service
            .duplicates(&IssueFilters {
                title: Some("A".to_string()),
                ..IssueFilters::default()
            })
            .unwrap();
        assert_eq!(report.total_groups, 1);
        assert_eq!(report.groups[0].len(), 2);
    }

    #[test]
    fn parses_issue_ids() {
        assert_eq!(parse_issue_id(None).unwrap(), None);
        assert_eq!(parse_issue_id(Some(" ")).unwrap(), None);
        assert_eq!(parse_issue_id(Some("42")).unwrap(), Some(42));
        assert!(parse_issue_id(Some("abc")).unwrap_err().is_validation());
    }
}
