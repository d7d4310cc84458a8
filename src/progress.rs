//! The progress sink: a narrow interface between the download engine and
//! whatever is watching it. The engine only ever writes a percentage.
use std::sync::atomic::{AtomicU8, Ordering};

/// Receives a `[0, 100]` completion percentage, one or more times per
/// round, ending with exactly `100` once the download is saved.
///
/// No other demands are made on implementors — in particular nothing here
/// assumes a single thread, since a UI sink may live on its own event loop.
pub trait ProgressSink: Send + Sync {
    fn update(&self, value: u8);
}

/// A sink that does nothing; useful for tests and library callers that
/// don't care about progress.
#[derive(Debug, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn update(&self, _value: u8) {}
}

/// A sink safe for cross-thread writes of a single integer, per spec's
/// concurrency model — an `AtomicU8` satisfies that with no locking.
#[derive(Debug, Default)]
pub struct AtomicProgressSink {
    value: AtomicU8,
}

impl AtomicProgressSink {
    pub fn get(&self) -> u8 {
        self.value.load(Ordering::Relaxed)
    }
}

impl ProgressSink for AtomicProgressSink {
    fn update(&self, value: u8) {
        self.value.store(value, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_sink_reports_last_write() {
        let sink = AtomicProgressSink::default();
        sink.update(10);
        sink.update(57);
        assert_eq!(sink.get(), 57);
    }
}
