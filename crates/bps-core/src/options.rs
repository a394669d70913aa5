use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Where a new subscription starts consuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartAt {
    /// Only messages published after subscribing.
    Newest,
    /// The oldest retained message.
    Oldest,
}

impl fmt::Display for StartAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartAt::Newest => f.write_str("newest"),
            StartAt::Oldest => f.write_str("oldest"),
        }
    }
}

impl FromStr for StartAt {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "newest" | "new_only" => Ok(StartAt::Newest),
            "oldest" | "first" => Ok(StartAt::Oldest),
            other => Err(Error::config(format!("unknown start position {other:?}"))),
        }
    }
}

/// Callback for transport-level errors that do not come from the handler.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

fn log_error() -> ErrorHandler {
    Arc::new(|err: &Error| tracing::error!(error = %err, "subscription transport error"))
}

/// Options for `SubTopic::subscribe`.
///
/// ```ignore
/// let opts = SubOptions::default()
///     .start_at(StartAt::Oldest)
///     .cancel_on(shutdown.clone());
/// ```
#[derive(Clone)]
pub struct SubOptions {
    /// Requested start position. `None` picks the backend default.
    pub start_at: Option<StartAt>,
    pub error_handler: ErrorHandler,
    /// Governing token: cancelling it stops the subscription with
    /// `Error::Cancelled`.
    pub cancel: Option<CancellationToken>,
}

impl Default for SubOptions {
    fn default() -> Self {
        Self {
            start_at: None,
            error_handler: log_error(),
            cancel: None,
        }
    }
}

impl fmt::Debug for SubOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubOptions")
            .field("start_at", &self.start_at)
            .field("cancel", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

impl SubOptions {
    pub fn start_at(mut self, start: StartAt) -> Self {
        self.start_at = Some(start);
        self
    }

    pub fn on_error(mut self, handler: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Resolve the start position against what a backend can honour.
    pub fn resolve_start(&self, default: StartAt, supported: &[StartAt]) -> Result<StartAt, Error> {
        let start = self.start_at.unwrap_or(default);
        if supported.contains(&start) {
            Ok(start)
        } else {
            Err(Error::UnsupportedStart(start))
        }
    }

    pub fn report(&self, err: &Error) {
        (self.error_handler)(err)
    }
}
