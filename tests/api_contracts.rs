use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use trialtrack_lib::client::browser::IssueBrowser;
use trialtrack_lib::client::search::SearchDebouncer;
use trialtrack_lib::client::{ClientError, IssueClient};
use trialtrack_lib::commands::settings::Settings;
use trialtrack_lib::models::issue::{IssueInput, Severity, Status};
use trialtrack_lib::models::query::{IssueFilters, SortField, SortOrder};
use trialtrack_lib::{build_state, serve};

struct TestServer {
    _data_dir: TempDir,
    client: IssueClient,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn start_server() -> TestServer {
    let data_dir = tempfile::tempdir().expect("create temp dir");
    let settings = Settings {
        data_dir: data_dir.path().to_path_buf(),
        ..Settings::default()
    };
    let state = build_state(settings).expect("build state");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        serve(listener, state, async {
            let _ = rx.await;
        })
        .await
        .expect("serve");
    });

    TestServer {
        _data_dir: data_dir,
        client: IssueClient::new(format!("http://{addr}")),
        shutdown: Some(tx),
    }
}

fn issue(title: &str, site: Option<&str>, severity: Option<&str>, status: Option<&str>) -> IssueInput {
    IssueInput {
        title: Some(title.to_string()),
        description: Some(format!("{title} observed during monitoring")),
        site: site.map(str::to_string),
        severity: severity.map(str::to_string),
        status: status.map(str::to_string),
        ..IssueInput::default()
    }
}

fn api_status(err: ClientError) -> u16 {
    match err {
        ClientError::Api { status, .. } => status,
        other => panic!("expected API error, got {other}"),
    }
}

#[tokio::test]
async fn created_issue_round_trips_through_list() {
    let server = start_server().await;
    let created = server
        .client
        .create(&issue("Missed visit", Some("SITE-01"), Some("major"), Some("open")))
        .await
        .expect("create");

    assert!(created.id > 0);
    assert_eq!(created.created_at, created.updated_at);

    let page = server.client.list(&IssueFilters::default()).await.expect("list");
    assert_eq!(page.total_items, 1);
    assert_eq!(page.total_pages, 1);
    assert_eq!(page.current_page, 1);
    assert_eq!(page.limit, 20);
    assert_eq!(page.issues, vec![created]);
}

#[tokio::test]
async fn create_validates_required_fields_and_enums() {
    let server = start_server().await;

    let err = server
        .client
        .create(&IssueInput {
            title: Some("Only a title".to_string()),
            ..IssueInput::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Title and description are required");
    assert_eq!(api_status(err), 400);

    let err = server
        .client
        .create(&issue("Bad", None, Some("urgent"), None))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Invalid severity: urgent"));
    assert_eq!(api_status(err), 400);

    let counts = server.client.counts().await.expect("counts");
    assert_eq!(counts.total(), 0);
}

#[tokio::test]
async fn paging_and_filters_agree_with_totals() {
    let server = start_server().await;
    for n in 0..25 {
        let status = if n % 5 == 0 { "resolved" } else { "open" };
        server
            .client
            .create(&issue(&format!("Deviation {n:02}"), Some("SITE-02"), Some("minor"), Some(status)))
            .await
            .expect("create");
    }

    let page = server
        .client
        .list(&IssueFilters {
            page: Some(3),
            limit: Some(10),
            ..IssueFilters::default()
        })
        .await
        .expect("page 3");
    assert_eq!(page.total_items, 25);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.issues.len(), 5);

    let resolved = server
        .client
        .list(&IssueFilters {
            status: Some("resolved".to_string()),
            sort_by: Some(SortField::Title),
            sort_order: Some(SortOrder::Asc),
            ..IssueFilters::default()
        })
        .await
        .expect("resolved");
    assert_eq!(resolved.total_items, 5);
    assert!(resolved.issues.iter().all(|i| i.status == Some(Status::Resolved)));
    let titles: Vec<&str> = resolved.issues.iter().map(|i| i.title.as_str()).collect();
    let mut sorted = titles.clone();
    sorted.sort();
    assert_eq!(titles, sorted);

    let err = server
        .client
        .list(&IssueFilters {
            limit: Some(500),
            ..IssueFilters::default()
        })
        .await
        .unwrap_err();
    assert_eq!(api_status(err), 400);
}

#[tokio::test]
async fn severity_sorts_by_rank() {
    let server = start_server().await;
    for severity in ["minor", "critical", "major"] {
        server
            .client
            .create(&issue(severity, None, Some(severity), None))
            .await
            .expect("create");
    }

    let page = server
        .client
        .list(&IssueFilters {
            sort_by: Some(SortField::Severity),
            sort_order: Some(SortOrder::Asc),
            ..IssueFilters::default()
        })
        .await
        .expect("list");
    let severities: Vec<Option<Severity>> = page.issues.iter().map(|i| i.severity).collect();
    assert_eq!(
        severities,
        vec![Some(Severity::Critical), Some(Severity::Major), Some(Severity::Minor)]
    );
}

#[tokio::test]
async fn partial_update_then_delete() {
    let server = start_server().await;
    let created = server
        .client
        .create(&issue("Consent outdated", Some("SITE-03"), Some("critical"), Some("open")))
        .await
        .expect("create");

    let outcome = server
        .client
        .update(
            created.id,
            &IssueInput {
                status: Some("in_progress".to_string()),
                ..IssueInput::default()
            },
        )
        .await
        .expect("update");
    assert_eq!(outcome.updated, 1);
    let updated = outcome.issue.expect("updated issue");
    assert_eq!(updated.status, Some(Status::InProgress));
    assert_eq!(updated.severity, Some(Severity::Critical));
    assert_eq!(updated.site.as_deref(), Some("SITE-03"));
    assert!(updated.updated_at > created.updated_at);

    let missing = server
        .client
        .update(
            created.id + 100,
            &IssueInput {
                status: Some("open".to_string()),
                ..IssueInput::default()
            },
        )
        .await
        .expect("update unknown id");
    assert_eq!(missing.updated, 0);

    assert_eq!(server.client.delete(created.id).await.expect("delete").deleted, 1);
    assert_eq!(server.client.delete(created.id).await.expect("delete again").deleted, 0);
    assert_eq!(server.client.counts().await.expect("counts").total(), 0);
}

#[tokio::test]
async fn counts_include_zero_buckets() {
    let server = start_server().await;
    server
        .client
        .create(&issue("A", None, Some("major"), Some("open")))
        .await
        .expect("create");
    server
        .client
        .create(&issue("B", None, None, None))
        .await
        .expect("create");

    let counts = server.client.counts().await.expect("counts");
    assert_eq!(counts.status["open"], 1);
    assert_eq!(counts.status["in_progress"], 0);
    assert_eq!(counts.status["resolved"], 0);
    assert_eq!(counts.status[""], 1);
    assert_eq!(counts.severity["major"], 1);
    assert_eq!(counts.severity["critical"], 0);
}

#[tokio::test]
async fn csv_upload_is_all_or_nothing() {
    let server = start_server().await;

    let bad = "title,description,severity\nA,first,minor\nB,second,urgent\n";
    let err = server
        .client
        .upload_csv("issues.csv", bad.as_bytes().to_vec())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("row 2"), "{err}");
    assert_eq!(api_status(err), 400);
    assert_eq!(server.client.counts().await.expect("counts").total(), 0);

    let good = "title,description,site,severity,status,createdAt\n\
                A,first,S1,minor,open,2024-01-15\n\
                A,again,S1,major,open,2024-01-16\n\
                B,third,S2,,,\n";
    let outcome = server
        .client
        .upload_csv("issues.csv", good.as_bytes().to_vec())
        .await
        .expect("upload");
    assert_eq!(outcome.created, 3);
    assert_eq!(outcome.message, "Successfully created 3 issues");
    assert_eq!(server.client.counts().await.expect("counts").total(), 3);
}

#[tokio::test]
async fn bulk_rows_and_duplicate_review() {
    let server = start_server().await;
    let outcome = server
        .client
        .bulk_create(&[
            issue("Missed visit", Some("S1"), None, None),
            issue("Missed visit", Some("S1"), None, None),
            issue("Missed visit", Some("S2"), None, None),
            issue("Late SAE report", Some("S1"), None, None),
            issue("Late SAE report", Some("S1"), None, None),
        ])
        .await
        .expect("bulk create");
    assert_eq!(outcome.created, 5);

    let report = server
        .client
        .duplicates(&IssueFilters::default())
        .await
        .expect("duplicates");
    assert_eq!(report.total_groups, 2);
    assert!(report.groups.iter().all(|g| g.issues.len() == 2));

    let client = Arc::new(server.client.clone());
    let mut browser = IssueBrowser::new(client);
    browser.apply(IssueFilters::default()).await.expect("apply");
    assert!(browser.start_review().is_some());
    assert_eq!(browser.review_position(), Some((1, 2)));
    browser.next_group();
    assert_eq!(browser.review_position(), Some((2, 2)));

    let err = server.client.bulk_create(&[]).await.unwrap_err();
    assert_eq!(err.to_string(), "No issues provided for bulk creation");
}

#[tokio::test]
async fn debounced_search_reports_only_the_latest_term() {
    let server = start_server().await;
    server
        .client
        .create(&issue("Temperature excursion", Some("S1"), None, None))
        .await
        .expect("create");
    server
        .client
        .create(&issue("Missed visit", Some("S1"), None, None))
        .await
        .expect("create");

    let client = Arc::new(server.client.clone());
    let (mut debouncer, mut outcomes) = SearchDebouncer::new(client, Duration::from_millis(50));
    debouncer.submit(IssueFilters {
        search: Some("Missed".to_string()),
        ..IssueFilters::default()
    });
    let latest = debouncer.submit(IssueFilters {
        search: Some("excursion".to_string()),
        ..IssueFilters::default()
    });

    let outcome = outcomes.recv().await.expect("outcome");
    assert_eq!(outcome.sequence, latest);
    let page = outcome.result.expect("search result");
    assert_eq!(page.total_items, 1);
    assert_eq!(page.issues[0].title, "Temperature excursion");
}
