use std::sync::atomic::{AtomicUsize, Ordering};

use cloak_core::ContentObserver;

/// Observer that counts notifications.
#[derive(Debug, Default)]
pub struct CountingObserver {
    hits: AtomicUsize,
}

impl CountingObserver {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl ContentObserver for CountingObserver {
    fn content_changed(&self) -> anyhow::Result<()> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
