use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::handler::{Flow, Handler};
use crate::message::Message;

/// Outcome of handing one message to a subscription's handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handled; acknowledge and keep going.
    Ack,
    /// Handler returned `Done`; acknowledge, then stop.
    AckAndStop,
    /// Handler failed; stop without acknowledging.
    Reject,
    /// The subscription was already stopping; the handler never saw it.
    Discarded,
}

impl Delivery {
    pub fn should_ack(self) -> bool {
        matches!(self, Delivery::Ack | Delivery::AckAndStop)
    }

    pub fn should_continue(self) -> bool {
        self == Delivery::Ack
    }
}

/// Serializes handler invocations for one subscription.
///
/// Backends whose client library delivers from several worker tasks clone
/// the dispatcher into each of them. The handler runs under an async mutex,
/// and a stop flag is checked before every dispatch, so once the handler has
/// returned `Done` or failed, messages already pulled off the wire are
/// discarded instead of reaching it.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    handler: tokio::sync::Mutex<Box<dyn Handler>>,
    stopped: AtomicBool,
    failure: Mutex<Option<Error>>,
    token: CancellationToken,
}

impl Dispatcher {
    pub fn new(handler: Box<dyn Handler>, token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                handler: tokio::sync::Mutex::new(handler),
                stopped: AtomicBool::new(false),
                failure: Mutex::new(None),
                token,
            }),
        }
    }

    pub async fn dispatch(&self, msg: &Message) -> Delivery {
        if self.is_stopped() {
            return Delivery::Discarded;
        }

        let mut handler = self.inner.handler.lock().await;
        // Another worker may have stopped the subscription while we queued.
        if self.is_stopped() {
            return Delivery::Discarded;
        }

        match handler.handle(msg).await {
            Flow::Continue => Delivery::Ack,
            Flow::Done => {
                self.stop(None);
                Delivery::AckAndStop
            }
            Flow::Abort(cause) => {
                self.stop(Some(Error::from(cause)));
                Delivery::Reject
            }
        }
    }

    /// True once the handler stopped consumption or the subscription was
    /// cancelled.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire) || self.inner.token.is_cancelled()
    }

    /// The subscription's cancellation token. Consume loops select on
    /// `token().cancelled()` while waiting for the transport.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Fail the subscription from transport code.
    pub fn fail(&self, err: Error) {
        self.stop(Some(err));
    }

    /// The last error that stopped consumption, if any.
    pub fn failure(&self) -> Option<Error> {
        lock(&self.inner.failure).clone()
    }

    fn stop(&self, failure: Option<Error>) {
        self.inner.stopped.store(true, Ordering::Release);
        if let Some(err) = failure {
            *lock(&self.inner.failure) = Some(err);
        }
        self.inner.token.cancel();
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Tracker {
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        handled: Arc<AtomicUsize>,
        done_after: usize,
    }

    #[async_trait]
    impl Handler for Tracker {
        async fn handle(&mut self, _msg: &Message) -> Flow {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.handled.fetch_add(1, Ordering::SeqCst) + 1 == self.done_after {
                Flow::Done
            } else {
                Flow::Continue
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_workers_are_serialized_and_discarded_after_done() {
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let handled = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(
            Box::new(Tracker {
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: max_in_flight.clone(),
                handled: handled.clone(),
                done_after: 5,
            }),
            CancellationToken::new(),
        );

        let mut workers = Vec::new();
        for _ in 0..8 {
            let dispatcher = dispatcher.clone();
            workers.push(tokio::spawn(async move {
                let mut deliveries = Vec::new();
                for _ in 0..10 {
                    deliveries.push(dispatcher.dispatch(&Message::from("x")).await);
                }
                deliveries
            }));
        }

        let mut all = Vec::new();
        for worker in workers {
            all.extend(worker.await.unwrap());
        }

        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(handled.load(Ordering::SeqCst), 5);
        assert_eq!(all.iter().filter(|d| **d == Delivery::AckAndStop).count(), 1);
        assert_eq!(all.iter().filter(|d| **d == Delivery::Ack).count(), 4);
        assert_eq!(all.iter().filter(|d| **d == Delivery::Discarded).count(), 75);
        assert!(dispatcher.failure().is_none());
        assert!(dispatcher.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_abort_records_failure_and_rejects() {
        let dispatcher = Dispatcher::new(
            Box::new(handler_fn(|_msg: &Message| Flow::abort(anyhow::anyhow!("foo")))),
            CancellationToken::new(),
        );

        let delivery = dispatcher.dispatch(&Message::from("a")).await;
        assert_eq!(delivery, Delivery::Reject);
        assert!(!delivery.should_ack());

        let failure = dispatcher.failure().expect("failure recorded");
        assert_eq!(failure.handler_cause().unwrap().to_string(), "foo");
        assert_eq!(dispatcher.dispatch(&Message::from("b")).await, Delivery::Discarded);
    }

    #[tokio::test]
    async fn test_cancelled_token_discards() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let dispatcher = Dispatcher::new(
            Box::new(handler_fn(move |_msg: &Message| {
                counter.fetch_add(1, Ordering::SeqCst);
                Flow::Continue
            })),
            token.clone(),
        );

        assert!(dispatcher.dispatch(&Message::from("a")).await.should_continue());
        token.cancel();
        assert_eq!(dispatcher.dispatch(&Message::from("b")).await, Delivery::Discarded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
