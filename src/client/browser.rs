use crate::analysis::duplicates::DuplicateReview;
use crate::client::{ClientResult, IssueSource};
use crate::models::duplicate::DuplicateGroup;
use crate::models::query::{IssueFilters, IssuePage};
use std::sync::Arc;

/// View state for the issue list: the active filters, the current page and
/// the duplicate groups for those filters.
///
/// While a duplicate review is active, refetches keep the review's groups
/// frozen. Leaving the review refetches so the list reflects any edits made
/// during it.
pub struct IssueBrowser<S: IssueSource> {
    source: Arc<S>,
    filters: IssueFilters,
    page: Option<IssuePage>,
    duplicates: Vec<DuplicateGroup>,
    review: Option<DuplicateReview>,
}

impl<S: IssueSource> IssueBrowser<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            filters: IssueFilters::default(),
            page: None,
            duplicates: Vec::new(),
            review: None,
        }
    }

    pub fn filters(&self) -> &IssueFilters {
        &self.filters
    }

    pub fn page(&self) -> Option<&IssuePage> {
        self.page.as_ref()
    }

    pub fn duplicate_groups(&self) -> &[DuplicateGroup] {
        &self.duplicates
    }

    pub fn is_reviewing(&self) -> bool {
        self.review.is_some()
    }

    /// Fetches the page for `filters`. State is replaced only when every
    /// fetch succeeds.
    pub async fn apply(&mut self, filters: IssueFilters) -> ClientResult<&IssuePage> {
        let page = self.source.list_issues(filters.clone()).await?;
        if self.review.is_none() {
            let report = self.source.find_duplicates(filters.clone()).await?;
            self.duplicates = report.groups;
        }

        self.filters = filters;
        let page: &IssuePage = self.page.insert(page);
        Ok(page)
    }

    pub async fn refresh(&mut self) -> ClientResult<&IssuePage> {
        let filters = self.filters.clone();
        self.apply(filters).await
    }

    /// Moves to `page` keeping the other filters.
    pub async fn go_to_page(&mut self, page: i64) -> ClientResult<&IssuePage> {
        let filters = self.filters.with_page(page);
        self.apply(filters).await
    }

    /// Starts reviewing the current duplicate groups. Returns `None` when there
    /// is nothing to review.
    pub fn start_review(&mut self) -> Option<&DuplicateGroup> {
        if self.duplicates.is_empty() {
            return None;
        }
        self.review
            .insert(DuplicateReview::new(self.duplicates.clone()))
            .current()
    }

    pub fn current_group(&self) -> Option<&DuplicateGroup> {
        self.review.as_ref()?.current()
    }

    pub fn next_group(&mut self) -> Option<&DuplicateGroup> {
        self.review.as_mut()?.next()
    }

    pub fn review_position(&self) -> Option<(usize, usize)> {
        self.review.as_ref()?.position()
    }

    pub async fn exit_review(&mut self) -> ClientResult<&IssuePage> {
        self.review = None;
        self.refresh().await
    }
}
