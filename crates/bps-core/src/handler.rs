//! Message handlers and the stop protocol.
//!
//! A handler answers every delivered message with a [`Flow`]:
//!
//! - `Continue`: acknowledge and keep consuming.
//! - `Done`: acknowledge this message, then stop cleanly.
//! - `Abort(cause)`: stop without acknowledging; `cause` is returned from
//!   `Subscription::close()`.

use async_trait::async_trait;

use crate::message::Message;

/// Marker error for handlers written in `anyhow::Result` style.
///
/// A handler error whose cause chain contains `Done` (directly or wrapped with
/// `.context(..)`) stops consumption normally; see [`Flow::from_result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("done")]
pub struct Done;

/// What the consume loop does after a message was handled.
#[derive(Debug)]
pub enum Flow {
    Continue,
    Done,
    Abort(anyhow::Error),
}

impl Flow {
    pub fn abort(cause: impl Into<anyhow::Error>) -> Self {
        Flow::Abort(cause.into())
    }

    pub fn from_result(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => Flow::Continue,
            Err(err) if err.chain().any(|cause| cause.is::<Done>()) => Flow::Done,
            Err(err) => Flow::Abort(err),
        }
    }

    pub fn is_stop(&self) -> bool {
        !matches!(self, Flow::Continue)
    }
}

impl From<anyhow::Result<()>> for Flow {
    fn from(result: anyhow::Result<()>) -> Self {
        Flow::from_result(result)
    }
}

/// Processes delivered messages, one at a time, in delivery order.
///
/// Taking `&mut self` means a subscription owns its handler exclusively; the
/// [`Dispatcher`](crate::Dispatcher) keeps that true for transports that
/// deliver from several worker tasks.
#[async_trait]
pub trait Handler: Send + 'static {
    async fn handle(&mut self, msg: &Message) -> Flow;
}

/// Closure adapter returned by [`handler_fn`].
pub struct HandlerFn<F>(F);

/// Wrap a synchronous closure as a [`Handler`].
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: FnMut(&Message) -> Flow + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: FnMut(&Message) -> Flow + Send + 'static,
{
    async fn handle(&mut self, msg: &Message) -> Flow {
        (self.0)(msg)
    }
}

#[async_trait]
impl Handler for Box<dyn Handler> {
    async fn handle(&mut self, msg: &Message) -> Flow {
        (**self).handle(msg).await
    }
}
