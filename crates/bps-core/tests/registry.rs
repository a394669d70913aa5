//! Registry behaviour: scheme binding, resolution and misuse.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bps_core::{Error, Message, PubTopic, Publisher, Registry, Result, SubTopic, Subscriber};
use tokio_util::sync::CancellationToken;

struct NullPublisher;

struct NullTopic(String);

#[async_trait]
impl PubTopic for NullTopic {
    fn name(&self) -> &str {
        &self.0
    }

    async fn publish(&self, _cancel: &CancellationToken, _msg: &Message) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Publisher for NullPublisher {
    fn topic(&self, name: &str) -> Arc<dyn PubTopic> {
        Arc::new(NullTopic(name.to_string()))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct NullSubscriber;

#[async_trait]
impl Subscriber for NullSubscriber {
    fn topic(&self, _name: &str) -> Arc<dyn SubTopic> {
        unreachable!("not expected to be called")
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn registry() -> Registry {
    let registry = Registry::new();
    registry.register_publisher("mem", |_cancel, _endpoint| async move {
        Ok(Arc::new(NullPublisher) as Arc<dyn Publisher>)
    });
    registry.register_subscriber("mem", |_cancel, _endpoint| async move {
        Ok(Arc::new(NullSubscriber) as Arc<dyn Subscriber>)
    });
    registry
}

#[tokio::test]
async fn test_resolves_registered_schemes() {
    let registry = registry();
    let cancel = CancellationToken::new();

    let publisher = registry.new_publisher(&cancel, "mem://test.host/path").await.unwrap();
    assert_eq!(publisher.topic("a").name(), "a");
    assert!(publisher.close().await.is_ok());

    let subscriber = registry.new_subscriber(&cancel, "mem://test.host/path").await.unwrap();
    assert!(subscriber.close().await.is_ok());

    assert_eq!(registry.publisher_schemes(), vec!["mem"]);
    assert_eq!(registry.subscriber_schemes(), vec!["mem"]);
}

#[tokio::test]
async fn test_factory_receives_parsed_endpoint() {
    let registry = Registry::new();
    let seen = Arc::new(std::sync::Mutex::new(None));
    let sink = seen.clone();
    registry.register_publisher("capture", move |_cancel, endpoint| {
        let sink = sink.clone();
        async move {
            *sink.lock().unwrap() = Some(endpoint);
            Ok(Arc::new(NullPublisher) as Arc<dyn Publisher>)
        }
    });

    registry
        .new_publisher(&CancellationToken::new(), "capture://a:1,b:2/ns?client_id=me")
        .await
        .unwrap();

    let endpoint = seen.lock().unwrap().clone().unwrap();
    assert_eq!(endpoint.hosts(), ["a:1", "b:2"]);
    assert_eq!(endpoint.client_id(), "me");
}

#[tokio::test]
async fn test_unknown_scheme_names_the_scheme() {
    let registry = registry();
    let cancel = CancellationToken::new();

    let err = registry.new_publisher(&cancel, "bogus://x").await.err().unwrap();
    assert_eq!(err.to_string(), r#"unknown URL scheme "bogus""#);

    let err = registry.new_subscriber(&cancel, "bogus://x").await.err().unwrap();
    assert!(matches!(err, Error::UnknownScheme(ref s) if s == "bogus"));
}

#[tokio::test]
async fn test_malformed_url() {
    let err = registry()
        .new_publisher(&CancellationToken::new(), "no scheme here")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::InvalidUrl(_)));
}

#[tokio::test]
async fn test_cancelled_before_factory_runs() {
    let registry = Registry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    registry.register_publisher("slow", move |_cancel, _endpoint| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(Arc::new(NullPublisher) as Arc<dyn Publisher>) }
    });

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = registry.new_publisher(&cancel, "slow://x").await.err().unwrap();
    assert!(err.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
#[should_panic(expected = "protocol mem already registered")]
fn test_duplicate_publisher_registration_panics() {
    let registry = registry();
    registry.register_publisher("mem", |_cancel, _endpoint| async move {
        Ok(Arc::new(NullPublisher) as Arc<dyn Publisher>)
    });
}

#[test]
fn test_duplicate_subscriber_registration_panics_and_registry_survives() {
    let registry = registry();
    let result = catch_unwind(AssertUnwindSafe(|| {
        registry.register_subscriber("mem", |_cancel, _endpoint| async move {
            Ok(Arc::new(NullSubscriber) as Arc<dyn Subscriber>)
        });
    }));
    assert!(result.is_err());

    // still usable afterwards
    registry.register_subscriber("other", |_cancel, _endpoint| async move {
        Ok(Arc::new(NullSubscriber) as Arc<dyn Subscriber>)
    });
    assert_eq!(registry.subscriber_schemes(), vec!["mem", "other"]);
}

#[test]
fn test_registries_are_independent() {
    let a = registry();
    let b = Registry::new();
    assert!(b.publisher_schemes().is_empty());
    b.register_publisher("mem", |_cancel, _endpoint| async move {
        Ok(Arc::new(NullPublisher) as Arc<dyn Publisher>)
    });
    assert_eq!(a.publisher_schemes(), b.publisher_schemes());
}
