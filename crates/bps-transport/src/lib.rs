use std::sync::Arc;

use bps_core::{Publisher, Registry, Subscriber};

pub mod file;
pub mod memory;

pub use file::{FilePublisher, FileSubscriber, FileTopic};
pub use memory::{InMemPubTopic, InMemPublisher, InMemSubscriber};

/// Register the backends that need no external service.
///
/// Backends:
/// - `file://<root>`: append-only JSON log per topic (`FilePublisher` / `FileSubscriber`)
///
/// The in-memory backend is constructed directly from seeded data and has no
/// URL form.
pub fn register_builtin(registry: &Registry) {
    registry.register_publisher("file", |_cancel, endpoint| async move {
        let publisher = FilePublisher::open(endpoint.local_path()).await?;
        Ok(Arc::new(publisher) as Arc<dyn Publisher>)
    });
    registry.register_subscriber("file", |_cancel, endpoint| async move {
        Ok(Arc::new(FileSubscriber::new(endpoint.local_path())) as Arc<dyn Subscriber>)
    });
}
