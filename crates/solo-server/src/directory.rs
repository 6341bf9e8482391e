use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use solo_core::{InstanceId, LogicalName};

use crate::handler::SessionHandler;

type ActorFactory = dyn Fn(&InstanceId) -> Arc<dyn SessionHandler> + Send + Sync;

/// Get-or-create registry of session instances, at most one per identity.
pub struct ActorDirectory {
    actors: DashMap<InstanceId, Arc<dyn SessionHandler>>,
    factory: Box<ActorFactory>,
    created: AtomicUsize,
}

impl ActorDirectory {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&InstanceId) -> Arc<dyn SessionHandler> + Send + Sync + 'static,
    {
        Self {
            actors: DashMap::new(),
            factory: Box::new(factory),
            created: AtomicUsize::new(0),
        }
    }

    /// Return the instance for `id`, creating it on first use.
    ///
    /// The entry's shard stays write-locked while the factory runs, so racing
    /// first resolutions converge on one instance.
    pub fn get(&self, id: &InstanceId) -> Arc<dyn SessionHandler> {
        if let Some(actor) = self.actors.get(id) {
            return Arc::clone(actor.value());
        }
        let entry = self.actors.entry(id.clone()).or_insert_with(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            (self.factory)(id)
        });
        Arc::clone(entry.value())
    }

    pub fn resolve(&self, name: &LogicalName) -> Arc<dyn SessionHandler> {
        self.get(&InstanceId::from_name(name))
    }

    /// Number of instances the factory has built.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorConfig, SessionActor};
    use crate::mock::MockDependency;
    use solo_telemetry::MetricsRecorder;

    fn directory() -> ActorDirectory {
        let metrics = Arc::new(MetricsRecorder::new());
        ActorDirectory::new(move |id| {
            let actor: Arc<dyn SessionHandler> = Arc::new(SessionActor::new(
                id.clone(),
                ActorConfig::default(),
                Arc::new(MockDependency::instant()),
                Arc::clone(&metrics),
            ));
            actor
        })
    }

    #[test]
    fn same_name_resolves_to_same_instance() {
        let dir = directory();
        let a = dir.resolve(&LogicalName::new("foo"));
        let b = dir.resolve(&LogicalName::new("foo"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.instance_id(), &InstanceId::from_name(&LogicalName::new("foo")));
        assert_eq!(dir.created_count(), 1);
    }

    #[test]
    fn different_names_get_different_instances() {
        let dir = directory();
        let a = dir.resolve(&LogicalName::new("foo"));
        let b = dir.resolve(&LogicalName::new("bar"));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn creation_is_lazy() {
        let dir = directory();
        assert!(dir.is_empty());
        assert_eq!(dir.created_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_resolution_creates_one_instance() {
        let dir = Arc::new(directory());
        let barrier = Arc::new(tokio::sync::Barrier::new(32));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let dir = Arc::clone(&dir);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    dir.resolve(&LogicalName::new("foo"))
                })
            })
            .collect();

        let mut resolved = Vec::new();
        for task in tasks {
            resolved.push(task.await.unwrap());
        }

        assert_eq!(dir.created_count(), 1);
        assert_eq!(dir.len(), 1);
        assert!(resolved.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
