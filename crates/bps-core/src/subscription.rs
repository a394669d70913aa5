use std::future::Future;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::options::SubOptions;

/// One running consume loop bound to one handler and one topic.
///
/// The loop runs on its own tokio task and ends when the handler returns
/// `Done` or fails, when the backend runs out of messages, when the
/// governing token from [`SubOptions::cancel_on`] is cancelled, or when
/// [`close`](Self::close) is called. Dropping the handle cancels the loop.
pub struct Subscription {
    topic: String,
    token: CancellationToken,
    /// Filled exactly once by the supervising task.
    result: watch::Receiver<Option<Result<()>>>,
}

impl Subscription {
    /// Start `driver` as the consume loop of a new subscription.
    ///
    /// The driver receives the [`Dispatcher`] wrapping `handler`; it should
    /// return `Err(Error::Cancelled)` when it notices cancellation and `Ok(())`
    /// when the handler stopped it or the backend ran dry.
    pub fn spawn<F, Fut>(topic: &str, handler: Box<dyn Handler>, options: &SubOptions, driver: F) -> Self
    where
        F: FnOnce(Dispatcher) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let parent = options.cancel.clone();
        let token = parent
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let dispatcher = Dispatcher::new(handler, token.clone());
        let consume = driver(dispatcher.clone());
        let name = topic.to_string();
        let (tx, rx) = watch::channel(None);

        tokio::spawn(async move {
            tracing::debug!(topic = %name, "subscription started");
            let outcome = match tokio::spawn(consume).await {
                Ok(outcome) => finish(outcome, &dispatcher, parent.as_ref()),
                Err(e) => Err(Error::Task(e.to_string())),
            };
            match &outcome {
                Ok(()) => tracing::debug!(topic = %name, "subscription stopped"),
                Err(e) => tracing::debug!(topic = %name, error = %e, "subscription stopped"),
            }
            tx.send_replace(Some(outcome));
        });

        Self {
            topic: topic.to_string(),
            token,
            result: rx,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stop the consume loop and wait for it to terminate.
    ///
    /// Returns the handler's error if one stopped consumption. Safe to call
    /// repeatedly, and safe to abandon: a call dropped before it returns
    /// leaves the result for the next one.
    pub async fn close(&self) -> Result<()> {
        self.token.cancel();
        self.join().await
    }

    /// Wait for the consume loop to end on its own.
    pub async fn wait(&self) -> Result<()> {
        self.join().await
    }

    pub fn is_finished(&self) -> bool {
        self.result.borrow().is_some()
    }

    async fn join(&self) -> Result<()> {
        let mut rx = self.result.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(result) => result.as_ref().map_or(Ok(()), Clone::clone),
            // The supervising task was torn down with the runtime.
            Err(_) => Err(Error::Task("subscription task dropped".to_string())),
        };
        outcome
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Map the driver's outcome onto what `close()` reports.
///
/// A handler failure wins over everything else. Cancellation is an error
/// only when it came from the governing token; cancellation by `close()` or
/// by the handler's `Done` is a clean stop.
fn finish(outcome: Result<()>, dispatcher: &Dispatcher, parent: Option<&CancellationToken>) -> Result<()> {
    if let Some(err) = dispatcher.failure() {
        return Err(err);
    }
    match outcome {
        Err(Error::Cancelled) if !parent.is_some_and(CancellationToken::is_cancelled) => Ok(()),
        other => other,
    }
}
