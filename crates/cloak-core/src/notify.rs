use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, PoisonError},
};

use tracing::{trace, warn};

/// Receives "collection changed" notifications. Carries no detail about which items
/// changed; observers should re-list the store.
pub trait ContentObserver: Send + Sync {
    fn content_changed(&self) -> anyhow::Result<()>;
}

/// Registry of observers with synchronous fan-out.
///
/// Identity is the `Arc` allocation: registering the same `Arc` twice is a no-op. Each
/// notification pass works on a snapshot, so observers may register or unregister
/// (including themselves) from inside their callback.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    observers: Arc<Mutex<Vec<Arc<dyn ContentObserver>>>>,
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("observers", &self.len())
            .finish()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn ContentObserver>) {
        let mut observers = self.lock();
        if !observers.iter().any(|known| Arc::ptr_eq(known, &observer)) {
            observers.push(observer);
        }
    }

    /// Returns whether the observer was registered.
    pub fn unregister(&self, observer: &Arc<dyn ContentObserver>) -> bool {
        let mut observers = self.lock();
        let before = observers.len();
        observers.retain(|known| !Arc::ptr_eq(known, observer));
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every registered observer in registration order. A failing or panicking
    /// observer is logged and does not stop delivery to the rest.
    pub fn notify_all(&self) {
        let snapshot: Vec<_> = self.lock().clone();
        trace!(observers = snapshot.len(), "notifying content observers");
        for (index, observer) in snapshot.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.content_changed())) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(index, "content observer failed: {err:#}"),
                Err(_) => warn!(index, "content observer panicked"),
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn ContentObserver>>> {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
