use std::sync::Arc;

use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

pub mod cache;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod message;
pub mod options;
pub mod registry;
pub mod subscription;

pub use cache::TopicCache;
pub use dispatch::{Delivery, Dispatcher};
pub use endpoint::{gen_client_id, Endpoint, CLIENT_ID_PREFIX};
pub use error::{Error, Result};
pub use handler::{handler_fn, Done, Flow, Handler, HandlerFn};
pub use message::Message;
pub use options::{ErrorHandler, StartAt, SubOptions};
pub use registry::{BoxFuture, PublisherFactory, Registry, SubscriberFactory};
pub use subscription::Subscription;

/// Produces messages to named topics.
///
/// Implementations:
/// - `InMemPublisher`: captures messages in process memory (tests)
/// - `FilePublisher`: append-only JSON log, one file per topic
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// Topic handle by name. Repeated calls with the same name return the
    /// same handle.
    fn topic(&self, name: &str) -> Arc<dyn PubTopic>;

    /// Release every topic handle, waiting for outstanding writes.
    /// Returns the last error seen; calling it again returns the same result.
    async fn close(&self) -> Result<()>;
}

/// Publisher handle to one topic.
#[async_trait]
pub trait PubTopic: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Publish one message. Fails with `Error::Cancelled`, without doing any
    /// I/O, when `cancel` has already fired.
    async fn publish(&self, cancel: &CancellationToken, msg: &Message) -> Result<()>;

    /// Publish messages in order. The first failure is returned as
    /// `Error::Batch` carrying its index; messages before it may or may not
    /// have been stored.
    async fn publish_batch(&self, cancel: &CancellationToken, batch: &[Message]) -> Result<()> {
        for (index, msg) in batch.iter().enumerate() {
            self.publish(cancel, msg)
                .await
                .map_err(|e| Error::batch(index, batch.len(), e))?;
        }
        Ok(())
    }
}

/// Consumes messages from named topics.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    fn topic(&self, name: &str) -> Arc<dyn SubTopic>;

    async fn close(&self) -> Result<()>;
}

/// Subscriber handle to one topic.
#[async_trait]
pub trait SubTopic: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Start consuming into `handler` on a background task.
    ///
    /// Fails up front when the backend cannot honour `options.start_at`.
    async fn subscribe(&self, handler: Box<dyn Handler>, options: SubOptions) -> Result<Subscription>;
}
