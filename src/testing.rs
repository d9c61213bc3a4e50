//! Test helpers shared across modules.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Metadata, Subscriber};

/// A subscriber that only counts `ERROR` events.
#[derive(Clone, Default)]
pub(crate) struct ErrorCounter {
    errors: Arc<AtomicUsize>,
}

impl ErrorCounter {
    /// Runs `f` with this counter as the default subscriber and returns how
    /// many error events it recorded.
    pub(crate) fn count<T>(f: impl FnOnce() -> T) -> (T, usize) {
        let counter = ErrorCounter::default();
        let errors = Arc::clone(&counter.errors);
        let out = tracing::subscriber::with_default(counter, f);
        (out, errors.load(Ordering::SeqCst))
    }
}

impl Subscriber for ErrorCounter {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        if *event.metadata().level() == tracing::Level::ERROR {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}
