//! In-memory backend for testing; no broker or filesystem involved.
//!
//! `InMemPublisher` records every published message per topic so tests can
//! assert on them. `InMemSubscriber` is seeded up front and hands each seeded
//! message out exactly once: subscriptions shift messages off a shared FIFO,
//! so a second subscription continues where the first one stopped.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bps_core::{
    Delivery, Dispatcher, Error, Handler, Message, PubTopic, Publisher, Result, StartAt, SubOptions, SubTopic, Subscriber,
    Subscription, TopicCache,
};
use tokio_util::sync::CancellationToken;

/// Publisher that captures messages in process memory.
#[derive(Debug, Default)]
pub struct InMemPublisher {
    topics: TopicCache<InMemPubTopic>,
}

impl InMemPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages published to `name` so far, in publish order.
    pub fn messages(&self, name: &str) -> Vec<Message> {
        self.topics.get(name).map(|t| t.messages()).unwrap_or_default()
    }

    /// Typed handle to `name`, auto-provisioned on first use.
    pub fn mem_topic(&self, name: &str) -> Arc<InMemPubTopic> {
        self.topics.get_or_create(name, InMemPubTopic::new)
    }
}

#[async_trait]
impl Publisher for InMemPublisher {
    fn topic(&self, name: &str) -> Arc<dyn PubTopic> {
        self.mem_topic(name)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct InMemPubTopic {
    name: String,
    messages: Mutex<Vec<Message>>,
}

impl InMemPubTopic {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.messages).clone()
    }
}

#[async_trait]
impl PubTopic for InMemPubTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, cancel: &CancellationToken, msg: &Message) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        lock(&self.messages).push(msg.clone());
        Ok(())
    }
}

/// Seeded messages per topic, shared by every handle of one subscriber.
type Fifo = Arc<Mutex<HashMap<String, VecDeque<Message>>>>;

/// Subscriber that replays seeded messages, oldest first.
///
/// Clone to share the same pending messages between owners.
#[derive(Debug, Clone, Default)]
pub struct InMemSubscriber {
    pending: Fifo,
    topics: Arc<TopicCache<InMemSubTopic>>,
}

impl InMemSubscriber {
    pub fn new(messages_by_topic: HashMap<String, Vec<Message>>) -> Self {
        let pending = messages_by_topic
            .into_iter()
            .map(|(topic, msgs)| (topic, VecDeque::from(msgs)))
            .collect();
        Self {
            pending: Arc::new(Mutex::new(pending)),
            topics: Arc::default(),
        }
    }

    /// Number of messages not yet handed to a handler.
    pub fn pending(&self, topic: &str) -> usize {
        lock(&self.pending).get(topic).map_or(0, VecDeque::len)
    }

    fn mem_topic(&self, name: &str) -> Arc<InMemSubTopic> {
        self.topics.get_or_create(name, |name| InMemSubTopic {
            name: name.to_string(),
            pending: self.pending.clone(),
        })
    }
}

impl<T: Into<String>> FromIterator<(T, Vec<Message>)> for InMemSubscriber {
    fn from_iter<I: IntoIterator<Item = (T, Vec<Message>)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(t, m)| (t.into(), m)).collect())
    }
}

#[async_trait]
impl Subscriber for InMemSubscriber {
    fn topic(&self, name: &str) -> Arc<dyn SubTopic> {
        self.mem_topic(name)
    }

    /// Forget every pending message.
    async fn close(&self) -> Result<()> {
        lock(&self.pending).clear();
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct InMemSubTopic {
    name: String,
    pending: Fifo,
}

impl InMemSubTopic {
    fn shift(&self) -> Option<Message> {
        lock(&self.pending).get_mut(&self.name)?.pop_front()
    }

    fn unshift(&self, msg: Message) {
        lock(&self.pending).entry(self.name.clone()).or_default().push_front(msg);
    }

    /// Hand the head of the FIFO to the handler. `None` once the topic is
    /// empty. A message the dispatcher discards goes back to the front.
    async fn deliver_next(&self, dispatcher: &Dispatcher) -> Option<Delivery> {
        let msg = self.shift()?;
        let delivery = dispatcher.dispatch(&msg).await;
        if delivery == Delivery::Discarded {
            self.unshift(msg);
        }
        Some(delivery)
    }
}

#[async_trait]
impl SubTopic for InMemSubTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self, handler: Box<dyn Handler>, options: SubOptions) -> Result<Subscription> {
        options.resolve_start(StartAt::Oldest, &[StartAt::Oldest])?;

        let topic = self.clone();
        Ok(Subscription::spawn(&self.name, handler, &options, move |dispatcher| {
            drain(topic, dispatcher)
        }))
    }
}

async fn drain(topic: InMemSubTopic, dispatcher: Dispatcher) -> Result<()> {
    loop {
        // Checked before every shift so a cancelled loop never consumes.
        if dispatcher.token().is_cancelled() {
            return Err(Error::Cancelled);
        }
        match topic.deliver_next(&dispatcher).await {
            None => return Ok(()),
            Some(Delivery::Ack) => {}
            Some(Delivery::Discarded) => return Err(Error::Cancelled),
            Some(Delivery::AckAndStop | Delivery::Reject) => return Ok(()),
        }
        tokio::task::yield_now().await;
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
