use std::sync::Arc;

use once_cell::sync::Lazy;

pub use bps_core::*;
pub use bps_transport::file::{FilePublisher, FileSubscriber, FileTopic};
pub use bps_transport::memory::{InMemPubTopic, InMemPublisher, InMemSubscriber};
pub use bps_transport::register_builtin;

static DEFAULT_REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_builtin(&registry);
    registry
});

/// Process-wide registry with the built-in backends (`file`) registered.
/// Add third-party backends with `default_registry().register_publisher(..)`.
pub fn default_registry() -> &'static Registry {
    &DEFAULT_REGISTRY
}

/// Open a publisher for `url` through the default registry.
pub async fn new_publisher(cancel: &CancellationToken, url: &str) -> Result<Arc<dyn Publisher>> {
    default_registry().new_publisher(cancel, url).await
}

/// Open a subscriber for `url` through the default registry.
pub async fn new_subscriber(cancel: &CancellationToken, url: &str) -> Result<Arc<dyn Subscriber>> {
    default_registry().new_subscriber(cancel, url).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with_test_writer()
            .try_init();
    }

    #[tokio::test]
    async fn test_file_round_trip_by_url() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().join("logs").display());
        let cancel = CancellationToken::new();

        let publisher = new_publisher(&cancel, &url).await.unwrap();
        let topic = publisher.topic("orders");
        topic
            .publish_batch(&cancel, &[Message::new("a"), Message::new("b")])
            .await
            .unwrap();
        topic.publish(&cancel, &Message::new(vec![0u8, 1, 2])).await.unwrap();
        publisher.close().await.unwrap();

        let subscriber = new_subscriber(&cancel, &url).await.unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = subscriber
            .topic("orders")
            .subscribe(
                Box::new(handler_fn(move |msg: &Message| {
                    sink.lock().unwrap().push(msg.data().to_vec());
                    Flow::Continue
                })),
                SubOptions::default().start_at(StartAt::Oldest),
            )
            .await
            .unwrap();
        sub.wait().await.unwrap();
        subscriber.close().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![b"a".to_vec(), b"b".to_vec(), vec![0, 1, 2]]);
    }

    #[tokio::test]
    async fn test_default_registry_lists_builtin_schemes() {
        assert!(default_registry().publisher_schemes().contains(&"file".to_string()));
        assert!(default_registry().subscriber_schemes().contains(&"file".to_string()));

        let err = new_subscriber(&CancellationToken::new(), "bogus://x").await.err().unwrap();
        assert!(matches!(err, Error::UnknownScheme(_)));
        assert_eq!(err.to_string(), r#"unknown URL scheme "bogus""#);
    }

    #[tokio::test]
    async fn test_cancelled_open() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().display());
        assert!(new_publisher(&cancel, &url).await.err().unwrap().is_cancelled());
    }

    #[test]
    #[should_panic(expected = "protocol file already registered")]
    fn test_builtin_scheme_cannot_be_registered_twice() {
        register_builtin(default_registry());
    }
}
