use analysis_core::MetricKind;
use dashmap::DashSet;
use std::sync::Arc;

type InFlightKey = (MetricKind, String);

/// Process-wide set of (kind, ticker) pairs with a computation running.
///
/// Lives for the lifetime of the process and is never persisted; after a
/// restart anything that was in flight is simply eligible again.
#[derive(Clone, Default)]
pub struct InFlightSet {
    entries: Arc<DashSet<InFlightKey>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically marks the pair as in flight. `None` if it already was.
    pub fn try_acquire(&self, ticker: &str, kind: MetricKind) -> Option<InFlightGuard> {
        let key = (kind, ticker.to_string());
        if self.entries.insert(key.clone()) {
            Some(InFlightGuard {
                entries: Arc::clone(&self.entries),
                key,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, ticker: &str, kind: MetricKind) -> bool {
        self.entries.contains(&(kind, ticker.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Removes its pair from the set when dropped, including on panic or abort.
pub struct InFlightGuard {
    entries: Arc<DashSet<InFlightKey>>,
    key: InFlightKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.entries.remove(&self.key);
    }
}
