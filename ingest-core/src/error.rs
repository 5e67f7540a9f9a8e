use thiserror::Error;

use crate::provider::ProviderId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the fetcher, the writer or the pipeline can surface.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid location query: {0}")]
    InvalidQuery(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error talking to {provider}{}: {message}", fmt_status(.status))]
    Transport {
        provider: ProviderId,
        status: Option<u16>,
        message: String,
    },

    #[error("{provider} returned an unusable response (status {status}): {message}")]
    Provider {
        provider: ProviderId,
        status: u16,
        message: String,
    },

    #[error("cannot reach the observation store: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("observation store rejected the row{}: {message}", fmt_field(.field))]
    Constraint {
        field: Option<String>,
        message: String,
    },
}

/// Fieldless mirror of [`Error`] for matching without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidQuery,
    Configuration,
    Transport,
    Provider,
    Connection,
    Constraint,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidQuery(_) => ErrorKind::InvalidQuery,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Provider { .. } => ErrorKind::Provider,
            Error::Connection(_) => ErrorKind::Connection,
            Error::Constraint { .. } => ErrorKind::Constraint,
        }
    }

    /// Whether a caller may reasonably try the same invocation again
    /// without operator intervention.
    ///
    /// Provider rejections are reported as not retryable: only the caller
    /// can tell whether the provider's message describes a transient cause.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Connection)
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

fn fmt_field(field: &Option<String>) -> String {
    field.as_deref().map(|f| format!(" (field `{f}`)")).unwrap_or_default()
}
