use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::{Publisher, Subscriber};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Constructs a publisher from a connection URL.
pub type PublisherFactory =
    Arc<dyn Fn(CancellationToken, Endpoint) -> BoxFuture<Result<Arc<dyn Publisher>>> + Send + Sync>;

/// Constructs a subscriber from a connection URL.
pub type SubscriberFactory =
    Arc<dyn Fn(CancellationToken, Endpoint) -> BoxFuture<Result<Arc<dyn Subscriber>>> + Send + Sync>;

/// Binds URL schemes to backend constructors.
///
/// Each scheme can be registered once per registry; a second registration is
/// a startup bug and panics. Factories run outside the lock, so a slow
/// connect never blocks other lookups.
#[derive(Default)]
pub struct Registry {
    publishers: Mutex<HashMap<String, PublisherFactory>>,
    subscribers: Mutex<HashMap<String, SubscriberFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publisher factory for `scheme`.
    ///
    /// # Panics
    ///
    /// If `scheme` already has a publisher factory.
    pub fn register_publisher<F, Fut>(&self, scheme: &str, factory: F)
    where
        F: Fn(CancellationToken, Endpoint) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Publisher>>> + Send + 'static,
    {
        let factory: PublisherFactory = Arc::new(move |cancel, endpoint| Box::pin(factory(cancel, endpoint)));
        insert_once(&self.publishers, scheme, factory);
    }

    /// Register a subscriber factory for `scheme`.
    ///
    /// # Panics
    ///
    /// If `scheme` already has a subscriber factory.
    pub fn register_subscriber<F, Fut>(&self, scheme: &str, factory: F)
    where
        F: Fn(CancellationToken, Endpoint) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Subscriber>>> + Send + 'static,
    {
        let factory: SubscriberFactory = Arc::new(move |cancel, endpoint| Box::pin(factory(cancel, endpoint)));
        insert_once(&self.subscribers, scheme, factory);
    }

    /// Open a publisher for `url`, e.g. `file:///var/lib/bps`.
    pub async fn new_publisher(&self, cancel: &CancellationToken, url: &str) -> Result<Arc<dyn Publisher>> {
        let endpoint = Endpoint::parse(url)?;
        let factory = lookup(&self.publishers, endpoint.scheme())?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tracing::debug!(scheme = endpoint.scheme(), "opening publisher");
        factory(cancel.clone(), endpoint).await
    }

    /// Open a subscriber for `url`.
    pub async fn new_subscriber(&self, cancel: &CancellationToken, url: &str) -> Result<Arc<dyn Subscriber>> {
        let endpoint = Endpoint::parse(url)?;
        let factory = lookup(&self.subscribers, endpoint.scheme())?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tracing::debug!(scheme = endpoint.scheme(), "opening subscriber");
        factory(cancel.clone(), endpoint).await
    }

    pub fn publisher_schemes(&self) -> Vec<String> {
        sorted_keys(&self.publishers)
    }

    pub fn subscriber_schemes(&self) -> Vec<String> {
        sorted_keys(&self.subscribers)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("publishers", &self.publisher_schemes())
            .field("subscribers", &self.subscriber_schemes())
            .finish()
    }
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("registry lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn insert_once<V>(map: &Mutex<HashMap<String, V>>, scheme: &str, factory: V) {
    let taken = {
        let mut map = guard(map);
        if map.contains_key(scheme) {
            true
        } else {
            map.insert(scheme.to_string(), factory);
            false
        }
    };
    // Panic with the lock released so the registry stays usable.
    if taken {
        panic!("protocol {scheme} already registered");
    }
}

fn lookup<V: Clone>(map: &Mutex<HashMap<String, V>>, scheme: &str) -> Result<V> {
    guard(map)
        .get(scheme)
        .cloned()
        .ok_or_else(|| Error::UnknownScheme(scheme.to_string()))
}

fn sorted_keys<V>(map: &Mutex<HashMap<String, V>>) -> Vec<String> {
    let mut keys: Vec<String> = guard(map).keys().cloned().collect();
    keys.sort();
    keys
}
