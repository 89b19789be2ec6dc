//! Aggregate memory accounting for the catalog.
//!
//! Every bucket holds a [`MemoryTracker`] registered against the catalog's
//! shared [`MemoryRegistry`]. Trackers release their bytes on drop, so a
//! bucket leaving the catalog can never leak accounting.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub(crate) struct MemoryRegistry {
    bytes: AtomicUsize,
}

impl MemoryRegistry {
    /// Total tracked bytes across every live tracker.
    pub(crate) fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn register(self: &Arc<Self>) -> MemoryTracker {
        MemoryTracker {
            registry: Arc::clone(self),
            bytes: 0,
        }
    }
}

/// Per-bucket slice of the aggregate counter. Deliberately not `Clone`: one
/// tracker per bucket, accounting follows the bucket's ownership.
#[derive(Debug)]
pub(crate) struct MemoryTracker {
    registry: Arc<MemoryRegistry>,
    bytes: usize,
}

impl MemoryTracker {
    pub(crate) fn set_bytes(&mut self, new: usize) {
        if new > self.bytes {
            self.registry
                .bytes
                .fetch_add(new - self.bytes, Ordering::Relaxed);
        } else {
            self.registry
                .bytes
                .fetch_sub(self.bytes - new, Ordering::Relaxed);
        }
        self.bytes = new;
    }
}

impl Drop for MemoryTracker {
    fn drop(&mut self) {
        self.registry.bytes.fetch_sub(self.bytes, Ordering::Relaxed);
    }
}
