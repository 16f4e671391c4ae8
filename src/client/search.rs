use crate::client::{ClientResult, IssueSource};
use crate::commands::settings::Settings;
use crate::models::query::{IssueFilters, IssuePage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SEARCH_DEBOUNCE: Duration = Duration::from_millis(2000);

/// Result of one search that survived debouncing.
#[derive(Debug)]
pub struct SearchOutcome {
    pub sequence: u64,
    pub filters: IssueFilters,
    pub result: ClientResult<IssuePage>,
}

/// Debounces free-text search input. Each submission cancels whatever is
/// pending or in flight, so only the most recent input produces an outcome.
pub struct SearchDebouncer<S: IssueSource> {
    source: Arc<S>,
    delay: Duration,
    sequence: u64,
    pending: Option<CancellationToken>,
    outcomes: mpsc::UnboundedSender<SearchOutcome>,
}

impl<S: IssueSource> SearchDebouncer<S> {
    pub fn new(source: Arc<S>, delay: Duration) -> (Self, mpsc::UnboundedReceiver<SearchOutcome>) {
        let (outcomes, receiver) = mpsc::unbounded_channel();
        let debouncer = Self {
            source,
            delay,
            sequence: 0,
            pending: None,
            outcomes,
        };
        (debouncer, receiver)
    }

    /// Uses the configured `searchDebounceMs` delay.
    pub fn from_settings(
        source: Arc<S>,
        settings: &Settings,
    ) -> (Self, mpsc::UnboundedReceiver<SearchOutcome>) {
        Self::new(source, Duration::from_millis(settings.search_debounce_ms))
    }

    /// Schedules a fetch after the debounce delay and returns its sequence
    /// number. Must be called from within a Tokio runtime.
    pub fn submit(&mut self, filters: IssueFilters) -> u64 {
        self.cancel();
        self.sequence += 1;

        let sequence = self.sequence;
        let token = CancellationToken::new();
        self.pending = Some(token.clone());

        let source = Arc::clone(&self.source);
        let delay = self.delay;
        let outcomes = self.outcomes.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    log::debug!("Search {sequence} superseded while in flight");
                    return;
                }
                result = source.list_issues(filters.clone()) => result,
            };

            if token.is_cancelled() {
                return;
            }
            let _ = outcomes.send(SearchOutcome {
                sequence,
                filters,
                result,
            });
        });

        sequence
    }

    /// Cancels the pending or in-flight search, if any.
    pub fn cancel(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
    }

    /// Sequence number of the most recent submission; outcomes carrying an
    /// older number are stale.
    pub fn latest_sequence(&self) -> u64 {
        self.sequence
    }
}

impl<S: IssueSource> Drop for SearchDebouncer<S> {
    fn drop(&mut self) {
        self.cancel();
    }
}
