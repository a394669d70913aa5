use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lazily populated, name-keyed cache of topic handles.
///
/// Lookups share a read lock; a miss takes the write lock and checks again
/// before creating, so concurrent callers asking for the same name always
/// end up with the same handle.
#[derive(Debug)]
pub struct TopicCache<T> {
    topics: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Default for TopicCache<T> {
    fn default() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> TopicCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, name: &str, create: impl FnOnce(&str) -> T) -> Arc<T> {
        if let Some(topic) = self.read().get(name) {
            return topic.clone();
        }

        let mut topics = self.write();
        topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(create(name)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove and return every cached handle.
    pub fn drain(&self) -> Vec<(String, Arc<T>)> {
        self.write().drain().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<T>>> {
        match self.topics.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("topic cache read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<T>>> {
        match self.topics.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("topic cache write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_same_name_same_handle() {
        let cache = TopicCache::new();
        let a1 = cache.get_or_create("a", |n| n.to_string());
        let a2 = cache.get_or_create("a", |_| unreachable!("already cached"));
        let b = cache.get_or_create("b", |n| n.to_string());
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(cache.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_concurrent_create_runs_once() {
        let cache = Arc::new(TopicCache::new());
        let created = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let created = created.clone();
                std::thread::spawn(move || {
                    cache.get_or_create("shared", |n| {
                        created.fetch_add(1, Ordering::SeqCst);
                        n.len()
                    })
                })
            })
            .collect();

        let topics: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(topics.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_drain_empties() {
        let cache = TopicCache::new();
        cache.get_or_create("a", |_| 1);
        assert_eq!(cache.drain().len(), 1);
        assert!(cache.get("a").is_none());
    }
}
