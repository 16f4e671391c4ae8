use crate::error::{IssueError, IssueResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Impact of an issue on the trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl Severity {
    /// Rank order: most severe first.
    pub const ALL: [Severity; 3] = [Severity::Critical, Severity::Major, Severity::Minor];

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Minor => "minor",
        }
    }

    pub fn rank(self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::Major => 1,
            Severity::Minor => 2,
        }
    }
}

impl FromStr for Severity {
    type Err = IssueError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "major" => Ok(Severity::Major),
            "minor" => Ok(Severity::Minor),
            _ => Err(IssueError::validation(format!(
                "Invalid severity: {raw}. Must be one of: minor, major, critical"
            ))),
        }
    }
}

/// Workflow state of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    InProgress,
    Resolved,
}

impl Status {
    /// Rank order: least resolved first.
    pub const ALL: [Status; 3] = [Status::Open, Status::InProgress, Status::Resolved];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Resolved => "resolved",
        }
    }

    pub fn rank(self) -> u8 {
        match self {
            Status::Open => 0,
            Status::InProgress => 1,
            Status::Resolved => 2,
        }
    }
}

impl FromStr for Status {
    type Err = IssueError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "open" => Ok(Status::Open),
            "in_progress" => Ok(Status::InProgress),
            "resolved" => Ok(Status::Resolved),
            _ => Err(IssueError::validation(format!(
                "Invalid status: {raw}. Must be one of: open, in_progress, resolved"
            ))),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for Severity {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Severity {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: IssueError| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for Status {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: IssueError| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub site: Option<String>,
    pub severity: Option<Severity>,
    pub status: Option<Status>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Untrusted issue fields as they arrive from JSON bodies or CSV rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// A validated issue ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub site: Option<String>,
    pub severity: Option<Severity>,
    pub status: Option<Status>,
    /// Only bulk imports may backdate an issue.
    pub created_at: Option<DateTime<Utc>>,
}

/// A validated partial update. `None` leaves a column untouched;
/// `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssuePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub site: Option<Option<String>>,
    pub severity: Option<Option<Severity>>,
    pub status: Option<Option<Status>>,
}

impl IssueInput {
    /// Validates a single-issue create request. `createdAt` is ignored here.
    pub fn into_new_issue(self) -> IssueResult<NewIssue> {
        let (Some(title), Some(description)) =
            (non_blank(self.title), non_blank(self.description))
        else {
            return Err(IssueError::validation("Title and description are required"));
        };

        Ok(NewIssue {
            title,
            description,
            site: non_blank(self.site),
            severity: parse_enum(self.severity)?,
            status: parse_enum(self.status)?,
            created_at: None,
        })
    }

    /// Validates one row of a bulk import, including an optional `createdAt`.
    pub fn into_imported_issue(self) -> IssueResult<NewIssue> {
        let title =
            non_blank(self.title).ok_or_else(|| IssueError::validation("Title is required"))?;
        let description = non_blank(self.description)
            .ok_or_else(|| IssueError::validation("Description is required"))?;

        let created_at = match non_blank(self.created_at) {
            Some(raw) => Some(parse_timestamp(&raw).ok_or_else(|| {
                IssueError::validation(format!("Invalid date format for createdAt: {raw}"))
            })?),
            None => None,
        };

        Ok(NewIssue {
            title,
            description,
            site: non_blank(self.site),
            severity: parse_enum(self.severity)?,
            status: parse_enum(self.status)?,
            created_at,
        })
    }

    pub fn into_patch(self) -> IssueResult<IssuePatch> {
        let title = match self.title {
            Some(raw) => Some(
                non_blank(Some(raw)).ok_or_else(|| IssueError::validation("Title cannot be empty"))?,
            ),
            None => None,
        };
        let description = match self.description {
            Some(raw) => Some(
                non_blank(Some(raw))
                    .ok_or_else(|| IssueError::validation("Description cannot be empty"))?,
            ),
            None => None,
        };

        Ok(IssuePatch {
            title,
            description,
            site: self.site.map(|raw| non_blank(Some(raw))),
            severity: self.severity.map(|raw| parse_enum(Some(raw))).transpose()?,
            status: self.status.map(|raw| parse_enum(Some(raw))).transpose()?,
        })
    }
}

impl IssuePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.site.is_none()
            && self.severity.is_none()
            && self.status.is_none()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_enum<T>(value: Option<String>) -> IssueResult<Option<T>>
where
    T: FromStr<Err = IssueError>,
{
    non_blank(value).map(|v| v.parse()).transpose()
}

/// Accepts RFC 3339 plus the common spreadsheet date layouts. Naive values are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    for layout in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return Some(naive.and_utc());
        }
    }

    for layout in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, layout) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(title: &str, description: &str) -> IssueInput {
        IssueInput {
            title: Some(title.to_string()),
            description: Some(description.to_string()),
            ..IssueInput::default()
        }
    }

    #[test]
    fn create_requires_title_and_description() {
        let err = input("", "x").into_new_issue().unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "Title and description are required");

        let err = input("Missed visit", "   ").into_new_issue().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn create_defaults_optional_fields_to_null() {
        let issue = input("Missed visit", "Subject 014 skipped week 4")
            .into_new_issue()
            .unwrap();
        assert_eq!(issue.site, None);
        assert_eq!(issue.severity, None);
        assert_eq!(issue.status, None);
    }

    #[test]
    fn create_rejects_values_outside_the_enumerations() {
        let err = IssueInput {
            severity: Some("urgent".to_string()),
            ..input("Missed visit", "x")
        }
        .into_new_issue()
        .unwrap_err();
        assert!(err.to_string().contains("Invalid severity: urgent"));

        let ok = IssueInput {
            severity: Some("MAJOR".to_string()),
            status: Some(" In_Progress ".to_string()),
            ..input("Missed visit", "x")
        }
        .into_new_issue()
        .unwrap();
        assert_eq!(ok.severity, Some(Severity::Major));
        assert_eq!(ok.status, Some(Status::InProgress));
    }

    #[test]
    fn patch_only_carries_provided_fields() {
        let patch = IssueInput {
            status: Some("resolved".to_string()),
            ..IssueInput::default()
        }
        .into_patch()
        .unwrap();

        assert_eq!(patch.status, Some(Some(Status::Resolved)));
        assert_eq!(patch.title, None);
        assert_eq!(patch.site, None);
        assert_eq!(patch.severity, None);
    }

    #[test]
    fn patch_clears_nullable_fields_with_blank_values() {
        let patch = IssueInput {
            site: Some("".to_string()),
            severity: Some(" ".to_string()),
            ..IssueInput::default()
        }
        .into_patch()
        .unwrap();

        assert_eq!(patch.site, Some(None));
        assert_eq!(patch.severity, Some(None));
        assert!(IssueInput::default().into_patch().unwrap().is_empty());
    }

    #[test]
    fn patch_rejects_blank_title() {
        let err = IssueInput {
            title: Some("  ".to_string()),
            ..IssueInput::default()
        }
        .into_patch()
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn imported_rows_parse_created_at() {
        let issue = IssueInput {
            created_at: Some("2024-03-01".to_string()),
            ..input("Consent form outdated", "Version 2 used after amendment")
        }
        .into_imported_issue()
        .unwrap();
        assert_eq!(
            issue.created_at.map(|ts| ts.to_rfc3339()),
            Some("2024-03-01T00:00:00+00:00".to_string())
        );

        let err = IssueInput {
            created_at: Some("yesterday".to_string()),
            ..input("Consent form outdated", "x")
        }
        .into_imported_issue()
        .unwrap_err();
        assert!(err.to_string().contains("Invalid date format for createdAt"));
    }

    #[test]
    fn parses_common_timestamp_layouts() {
        assert!(parse_timestamp("2024-03-01T10:15:00Z").is_some());
        assert!(parse_timestamp("2024-03-01 10:15:00").is_some());
        assert!(parse_timestamp("03/01/2024").is_some());
        assert!(parse_timestamp("not a date").is_none());
    }

    #[test]
    fn enums_serialize_as_snake_case() {
        assert_eq!(
            serde_json::to_value(Status::InProgress).unwrap(),
            serde_json::json!("in_progress")
        );
        assert_eq!(Severity::Critical.to_string(), "critical");
    }
}
