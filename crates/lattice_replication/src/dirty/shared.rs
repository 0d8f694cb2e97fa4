//! Locked handle to a [`DirtyObjectRegistry`] for multithreaded hosts.

use std::sync::Arc;

use lattice_core::ObjectHandle;
use parking_lot::{Mutex, MutexGuard};

use super::{DirtyObjectRegistry, DirtyObjectSet, PollerHandle};

/// Cloneable, lock-protected registry handle.
///
/// The registry itself is unsynchronized. Hosts whose producers and
/// pollers live on different threads share one of these instead; every
/// call takes the lock for its own duration only.
#[derive(Clone, Debug, Default)]
pub struct SharedDirtyRegistry {
    inner: Arc<Mutex<DirtyObjectRegistry>>,
}

impl SharedDirtyRegistry {
    /// Wraps an existing registry.
    #[must_use]
    pub fn new(registry: DirtyObjectRegistry) -> Self {
        Self {
            inner: Arc::new(Mutex::new(registry)),
        }
    }

    /// Locks the registry for a batch of operations.
    pub fn lock(&self) -> MutexGuard<'_, DirtyObjectRegistry> {
        self.inner.lock()
    }

    /// See [`DirtyObjectRegistry::mark_dirty`].
    pub fn mark_dirty(&self, handle: ObjectHandle) {
        self.inner.lock().mark_dirty(handle);
    }

    /// See [`DirtyObjectRegistry::create_poller`].
    pub fn create_poller(&self) -> PollerHandle {
        self.inner.lock().create_poller()
    }

    /// See [`DirtyObjectRegistry::destroy_poller`].
    pub fn destroy_poller(&self, poller: PollerHandle) {
        self.inner.lock().destroy_poller(poller);
    }

    /// Reads the dirty set under the lock.
    ///
    /// The set is only borrowed for the duration of `read`; copy out what
    /// you need, then call [`reset_dirty_objects`](Self::reset_dirty_objects).
    pub fn with_dirty_objects<R>(
        &self,
        poller: PollerHandle,
        read: impl FnOnce(&DirtyObjectSet) -> R,
    ) -> R {
        let mut registry = self.inner.lock();
        read(registry.get_dirty_objects(poller))
    }

    /// See [`DirtyObjectRegistry::reset_dirty_objects`].
    pub fn reset_dirty_objects(&self, poller: PollerHandle) {
        self.inner.lock().reset_dirty_objects(poller);
    }

    /// See [`DirtyObjectRegistry::end_frame`].
    pub fn end_frame(&self) {
        self.inner.lock().end_frame();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_producers_on_other_threads() {
        let shared = SharedDirtyRegistry::default();
        shared.lock().init();
        let poller = shared.create_poller();

        let producers: Vec<_> = (0..4u32)
            .map(|t| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for i in 0..25u32 {
                        shared.mark_dirty(ObjectHandle::new(2 + 2 * (t * 25 + i), 1));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let count = shared.with_dirty_objects(poller, DirtyObjectSet::len);
        assert_eq!(count, 100);

        shared.reset_dirty_objects(poller);
        shared.end_frame();
        assert_eq!(shared.lock().dirty_count(), 0);
        shared.destroy_poller(poller);
    }
}
