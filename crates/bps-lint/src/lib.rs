//! Contract checks shared by every backend's test suite.
//!
//! A backend plugs in through [`PublisherHarness`] / [`SubscriberHarness`]
//! and calls [`publisher`] / [`subscriber`] from a `#[tokio::test]`. Checks
//! panic with a descriptive message on the first violation, like `assert!`.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bps_core::{
    CancellationToken, Done, Flow, Handler, Message, Publisher, StartAt, SubOptions, Subscriber, Subscription,
};
use uuid::Uuid;

/// Upper bound for anything a check waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// A topic name no other test run uses.
pub fn unique_topic(label: &str) -> String {
    format!("bps-unittest-topic-{}-{label}", Uuid::new_v4().simple())
}

/// Access to a publisher under test and to what it stored.
#[async_trait]
pub trait PublisherHarness: Send + Sync {
    fn subject(&self) -> Arc<dyn Publisher>;

    /// Everything stored in `topic` so far, oldest first.
    async fn messages(&self, topic: &str) -> anyhow::Result<Vec<Message>>;
}

/// Builds subscribers under test.
#[async_trait]
pub trait SubscriberHarness: Send + Sync {
    /// A subscriber whose `topic` holds exactly `messages`, oldest first.
    async fn subject(&self, topic: &str, messages: &[Message]) -> anyhow::Result<Arc<dyn Subscriber>>;
}

/// Run every publisher check.
pub async fn publisher(harness: &impl PublisherHarness) {
    publishes(harness).await;
    publishes_batches(harness).await;
}

/// Run every subscriber check.
pub async fn subscriber(harness: &impl SubscriberHarness) {
    subscribes(harness).await;
    stops_on_wrapped_done(harness).await;
    returns_handler_error(harness).await;
    stops_when_cancelled(harness).await;
    closes_idempotently(harness).await;
}

pub async fn publishes(harness: &impl PublisherHarness) {
    let subject = harness.subject();
    let cancel = CancellationToken::new();
    let (a, b) = (unique_topic("a"), unique_topic("b"));

    for (topic, data) in [(&a, "v1"), (&b, "v2"), (&a, "v3")] {
        if let Err(e) = subject.topic(topic).publish(&cancel, &Message::new(data)).await {
            panic!("publish {data} to {topic}: {e}");
        }
    }

    assert_eq!(stored(harness, &a).await, ["v1", "v3"]);
    assert_eq!(stored(harness, &b).await, ["v2"]);
}

pub async fn publishes_batches(harness: &impl PublisherHarness) {
    let subject = harness.subject();
    let cancel = CancellationToken::new();
    let (a, b) = (unique_topic("a"), unique_topic("b"));

    let batch = |vals: &[&str]| vals.iter().map(|v| Message::new(*v)).collect::<Vec<_>>();
    if let Err(e) = subject.topic(&a).publish_batch(&cancel, &batch(&["v1", "v3", "v5", "v7"])).await {
        panic!("publish batch to {a}: {e}");
    }
    if let Err(e) = subject.topic(&b).publish_batch(&cancel, &batch(&["v2", "v4"])).await {
        panic!("publish batch to {b}: {e}");
    }

    assert_eq!(stored(harness, &a).await, ["v1", "v3", "v5", "v7"]);
    assert_eq!(stored(harness, &b).await, ["v2", "v4"]);
}

pub async fn subscribes(harness: &impl SubscriberHarness) {
    let (subject, topic) = seeded(harness).await;
    let handler = MockHandler::new(Reply::Continue);
    let sub = subscribe(&subject, &topic, &handler, SubOptions::default()).await;

    within("two messages handled", async {
        while handler.len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    match within("close", sub.close()).await {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => {}
        Err(e) => panic!("close after consuming everything: {e}"),
    }

    let mut data = handler.data();
    data.sort();
    assert_eq!(data, ["message-1", "message-2"]);
}

pub async fn stops_on_wrapped_done(harness: &impl SubscriberHarness) {
    let (subject, topic) = seeded(harness).await;
    let handler = MockHandler::new(Reply::WrappedDone);
    let sub = subscribe(&subject, &topic, &handler, SubOptions::default()).await;

    if let Err(e) = within("stop on done", sub.wait()).await {
        panic!("done must stop cleanly, got: {e}");
    }
    assert_eq!(handler.len(), 1, "only the first message is handled");
}

pub async fn returns_handler_error(harness: &impl SubscriberHarness) {
    let (subject, topic) = seeded(harness).await;
    let handler = MockHandler::new(Reply::Fail);
    let sub = subscribe(&subject, &topic, &handler, SubOptions::default()).await;

    let err = match within("stop on handler error", sub.wait()).await {
        Ok(()) => panic!("handler error was swallowed"),
        Err(e) => e,
    };
    let cause = err.handler_cause().map(ToString::to_string);
    assert_eq!(cause.as_deref(), Some("foo"), "unexpected error: {err}");
    assert_eq!(handler.len(), 1, "only the first message is handled");

    // the same error again on close
    let again = sub.close().await.err().map(|e| e.to_string());
    assert_eq!(again, Some(err.to_string()));
}

pub async fn stops_when_cancelled(harness: &impl SubscriberHarness) {
    let (subject, topic) = seeded(harness).await;
    let cancel = CancellationToken::new();
    let mut handler = MockHandler::new(Reply::Continue);
    handler.cancel_after_handling = Some(cancel.clone());
    let sub = subscribe(&subject, &topic, &handler, SubOptions::default().cancel_on(cancel)).await;

    match within("stop on cancel", sub.wait()).await {
        Err(e) if e.is_cancelled() => {}
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(handler.len(), 1, "nothing is handled after cancellation");

    // cancelled before the first message
    let (subject, topic) = seeded(harness).await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let handler = MockHandler::new(Reply::Continue);
    let sub = subscribe(&subject, &topic, &handler, SubOptions::default().cancel_on(cancel)).await;
    assert!(within("stop on cancel", sub.wait()).await.is_err_and(|e| e.is_cancelled()));
    assert_eq!(handler.len(), 0);
}

pub async fn closes_idempotently(harness: &impl SubscriberHarness) {
    let (subject, topic) = seeded(harness).await;
    let handler = MockHandler::new(Reply::WrappedDone);
    let sub = subscribe(&subject, &topic, &handler, SubOptions::default()).await;

    assert!(within("first close", sub.close()).await.is_ok());
    assert!(within("second close", sub.close()).await.is_ok());
    assert!(sub.is_finished());
    if let Err(e) = subject.close().await {
        panic!("subscriber close: {e}");
    }
}

async fn stored(harness: &impl PublisherHarness, topic: &str) -> Vec<String> {
    match harness.messages(topic).await {
        Ok(msgs) => msgs.iter().map(|m| String::from_utf8_lossy(m.data()).into_owned()).collect(),
        Err(e) => panic!("read back {topic}: {e:#}"),
    }
}

async fn seeded(harness: &impl SubscriberHarness) -> (Arc<dyn Subscriber>, String) {
    let topic = unique_topic("a");
    let messages = [Message::new("message-1"), Message::new("message-2")];
    match harness.subject(&topic, &messages).await {
        Ok(subject) => (subject, topic),
        Err(e) => panic!("seed {topic}: {e:#}"),
    }
}

async fn subscribe(
    subject: &Arc<dyn Subscriber>,
    topic: &str,
    handler: &MockHandler,
    options: SubOptions,
) -> Subscription {
    let options = options.start_at(StartAt::Oldest);
    match subject.topic(topic).subscribe(Box::new(handler.clone()), options).await {
        Ok(sub) => sub,
        Err(e) => panic!("subscribe to {topic}: {e}"),
    }
}

async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    match tokio::time::timeout(WAIT, fut).await {
        Ok(v) => v,
        Err(_) => panic!("{what}: timed out after {WAIT:?}"),
    }
}

#[derive(Debug, Clone, Copy)]
enum Reply {
    Continue,
    WrappedDone,
    Fail,
}

/// Records payloads and answers every message the same way.
#[derive(Clone)]
struct MockHandler {
    data: Arc<Mutex<Vec<String>>>,
    reply: Reply,
    /// Cancelled once the handler has recorded a message.
    cancel_after_handling: Option<CancellationToken>,
}

impl MockHandler {
    fn new(reply: Reply) -> Self {
        Self {
            data: Arc::default(),
            reply,
            cancel_after_handling: None,
        }
    }

    fn data(&self) -> Vec<String> {
        self.data.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn len(&self) -> usize {
        self.data.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[async_trait]
impl Handler for MockHandler {
    async fn handle(&mut self, msg: &Message) -> Flow {
        self.data
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(String::from_utf8_lossy(msg.data()).into_owned());
        if let Some(cancel) = &self.cancel_after_handling {
            cancel.cancel();
        }

        match self.reply {
            Reply::Continue => Flow::Continue,
            Reply::WrappedDone => Flow::from_result(Err(anyhow::Error::new(Done).context("wrapped"))),
            Reply::Fail => Flow::abort(anyhow::anyhow!("foo")),
        }
    }
}
