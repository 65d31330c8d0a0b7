use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Messages handed to processing tasks and not yet resolved by a token.
#[derive(Debug, Clone, Default)]
pub(crate) struct ActiveProcessors(Arc<AtomicUsize>);

impl ActiveProcessors {
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn decrement(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| active.checked_sub(1));
    }
}
