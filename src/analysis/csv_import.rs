use crate::error::{IssueError, IssueResult};
use crate::models::issue::{IssueInput, NewIssue};

pub const REQUIRED_HEADERS: [&str; 2] = ["title", "description"];
pub const ALLOWED_HEADERS: [&str; 6] = ["title", "description", "site", "severity", "status", "createdAt"];

const EMPTY_IMPORT: &str = "CSV file is empty or contains no valid issues";

/// Parses an uploaded CSV into validated issues. The whole import fails on the
/// first invalid row; row numbers in errors are 1-based and exclude the header.
pub fn parse_issues_csv(bytes: &[u8]) -> IssueResult<Vec<NewIssue>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| IssueError::validation(format!("Error reading CSV file: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(IssueError::validation(EMPTY_IMPORT));
    }
    validate_headers(&headers)?;

    let mut issues = Vec::new();
    for (index, record) in reader.deserialize::<IssueInput>().enumerate() {
        let row = index + 1;
        let issue = record
            .map_err(|e| IssueError::validation(record_error_reason(&e)))
            .and_then(IssueInput::into_imported_issue)
            .map_err(|e| IssueError::validation(format!("Error parsing CSV row {row}: {e}")))?;
        issues.push(issue);
    }

    if issues.is_empty() {
        return Err(IssueError::validation(EMPTY_IMPORT));
    }

    log::debug!("Parsed {} issues from CSV upload", issues.len());
    Ok(issues)
}

/// Short reason for a record-level csv error; the row number is added by the caller.
fn record_error_reason(err: &csv::Error) -> String {
    match err.kind() {
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => format!("expected {expected_len} fields, found {len}"),
        csv::ErrorKind::Utf8 { .. } => "row is not valid UTF-8".to_string(),
        csv::ErrorKind::Deserialize { err, .. } => err.kind().to_string(),
        _ => err.to_string(),
    }
}

pub fn validate_headers(headers: &[String]) -> IssueResult<()> {
    let missing: Vec<&str> = REQUIRED_HEADERS
        .iter()
        .copied()
        .filter(|required| !headers.iter().any(|h| h == required))
        .collect();
    if !missing.is_empty() {
        return Err(IssueError::validation(format!(
            "Missing required CSV headers: {}",
            missing.join(", ")
        )));
    }

    let unknown: Vec<&str> = headers
        .iter()
        .map(String::as_str)
        .filter(|h| !ALLOWED_HEADERS.contains(h))
        .collect();
    if !unknown.is_empty() {
        return Err(IssueError::validation(format!(
            "Invalid CSV headers: {}. Allowed headers: {}",
            unknown.join(", "),
            ALLOWED_HEADERS.join(", ")
        )));
    }

    Ok(())
}
