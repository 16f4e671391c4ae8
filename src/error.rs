use thiserror::Error;

pub type IssueResult<T> = std::result::Result<T, IssueError>;

/// Errors surfaced by the issue service and its HTTP layer.
#[derive(Debug, Error)]
pub enum IssueError {
    /// Caller-supplied input was missing or malformed. Maps to HTTP 400.
    #[error("{0}")]
    Validation(String),

    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    Task(String),
}

impl IssueError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Store { .. } | Self::Io { .. } | Self::Task(_) => 500,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Attaches a human-readable context to rusqlite results.
pub trait StoreContext<T> {
    fn store_context(self, context: &'static str) -> IssueResult<T>;
}

impl<T> StoreContext<T> for rusqlite::Result<T> {
    fn store_context(self, context: &'static str) -> IssueResult<T> {
        self.map_err(|source| IssueError::Store { context, source })
    }
}
