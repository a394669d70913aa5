use std::sync::Arc;

use crate::options::StartAt;

/// Errors returned by registries, publishers, subscribers and subscriptions.
///
/// `Error` is `Clone` so that a subscription or publisher can hand the same
/// captured result to every `close()` caller; non-clonable causes are kept
/// behind an `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unknown URL scheme {0:?}")]
    UnknownScheme(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("start position {0} is not supported by this implementation")]
    UnsupportedStart(StartAt),

    #[error("publish {index} of {total}: {source}")]
    Batch {
        index: usize,
        total: usize,
        source: Box<Error>,
    },

    #[error("io error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    #[error("codec error: {0}")]
    Codec(#[source] Arc<serde_json::Error>),

    #[error("handler error: {0}")]
    Handler(Arc<anyhow::Error>),

    #[error("{0} is closed")]
    Closed(String),

    #[error("subscription task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Wrap the failure of message `index` within a batch of `total`.
    pub fn batch(index: usize, total: usize, source: Error) -> Self {
        Error::Batch {
            index,
            total,
            source: Box::new(source),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Batch { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// The error a handler returned when it aborted consumption, if this error
    /// (or the batch failure it wraps) originated there.
    ///
    /// Callers recover their own error types with `downcast_ref`.
    pub fn handler_cause(&self) -> Option<&anyhow::Error> {
        match self {
            Error::Handler(cause) => Some(cause),
            Error::Batch { source, .. } => source.handler_cause(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(Arc::new(e))
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Handler(Arc::new(e))
    }
}
