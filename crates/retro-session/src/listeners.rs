use std::sync::Arc;

use parking_lot::RwLock;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Registered callbacks, invoked synchronously in registration order.
///
/// Dispatch runs on a snapshot taken outside the lock, so a callback may
/// register further listeners without deadlocking. Those take effect from
/// the next event.
pub struct Listeners<T> {
    inner: RwLock<Vec<Listener<T>>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
        }
    }
}

impl<T> Listeners<T> {
    pub fn add<F>(&self, listener: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.write().push(Arc::new(listener));
    }

    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self.inner.read().clone();
        for listener in snapshot {
            listener(value);
        }
    }
}
