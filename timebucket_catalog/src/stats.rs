//! Execution counters for the bucket catalog.
//!
//! Counters are kept per collection and aggregated globally; the write path
//! bumps both through a [`StatsHandle`]. Everything is a relaxed atomic, so
//! readers may observe slightly stale values but never tear.

use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use timebucket_data::CollectionId;

/// A monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self, count: u64) {
        self.0.fetch_add(count, Ordering::Relaxed);
    }

    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters mirrored in the server status output that callers and tests
/// assert on.
#[derive(Debug, Default)]
pub struct ExecutionStats {
    pub num_bucket_inserts: Counter,
    pub num_bucket_updates: Counter,
    pub num_buckets_opened_due_to_metadata: Counter,
    pub num_buckets_reopened: Counter,
    pub num_buckets_closed_due_to_count: Counter,
    pub num_buckets_closed_due_to_size: Counter,
    pub num_buckets_closed_due_to_time_forward: Counter,
    pub num_buckets_closed_due_to_time_backward: Counter,
    pub num_buckets_closed_due_to_schema_change: Counter,
    pub num_buckets_closed_due_to_clear: Counter,
    pub num_bucket_documents_too_large_insert: Counter,
    pub num_bucket_documents_too_large_update: Counter,
    pub num_buckets_archived_due_to_memory_threshold: Counter,
    pub num_buckets_closed_due_to_memory_threshold: Counter,
}

impl ExecutionStats {
    /// Render the counters under their externally visible names.
    pub fn report(&self) -> serde_json::Value {
        json!({
            "numBucketInserts": self.num_bucket_inserts.fetch(),
            "numBucketUpdates": self.num_bucket_updates.fetch(),
            "numBucketsOpenedDueToMetadata": self.num_buckets_opened_due_to_metadata.fetch(),
            "numBucketsReopened": self.num_buckets_reopened.fetch(),
            "numBucketsClosedDueToCount": self.num_buckets_closed_due_to_count.fetch(),
            "numBucketsClosedDueToSize": self.num_buckets_closed_due_to_size.fetch(),
            "numBucketsClosedDueToTimeForward": self.num_buckets_closed_due_to_time_forward.fetch(),
            "numBucketsClosedDueToTimeBackward": self.num_buckets_closed_due_to_time_backward.fetch(),
            "numBucketsClosedDueToSchemaChange": self.num_buckets_closed_due_to_schema_change.fetch(),
            "numBucketsClosedDueToClear": self.num_buckets_closed_due_to_clear.fetch(),
            "numBucketDocumentsTooLargeInsert": self.num_bucket_documents_too_large_insert.fetch(),
            "numBucketDocumentsTooLargeUpdate": self.num_bucket_documents_too_large_update.fetch(),
            "numBucketsArchivedDueToMemoryThreshold": self.num_buckets_archived_due_to_memory_threshold.fetch(),
            "numBucketsClosedDueToMemoryThreshold": self.num_buckets_closed_due_to_memory_threshold.fetch(),
        })
    }
}

/// Bumps a counter on one collection's stats and the global aggregate.
#[derive(Debug, Clone)]
pub(crate) struct StatsHandle {
    collection: Arc<ExecutionStats>,
    global: Arc<ExecutionStats>,
}

impl StatsHandle {
    pub(crate) fn inc(&self, field: impl Fn(&ExecutionStats) -> &Counter) {
        field(&self.collection).inc(1);
        field(&self.global).inc(1);
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRegistry {
    global: Arc<ExecutionStats>,
    by_collection: RwLock<HashMap<CollectionId, Arc<ExecutionStats>>>,
}

impl StatsRegistry {
    pub(crate) fn handle(&self, collection: CollectionId) -> StatsHandle {
        StatsHandle {
            collection: self.collection(collection),
            global: Arc::clone(&self.global),
        }
    }

    pub(crate) fn collection(&self, collection: CollectionId) -> Arc<ExecutionStats> {
        if let Some(stats) = self.by_collection.read().get(&collection) {
            return Arc::clone(stats);
        }
        let mut map = self.by_collection.write();
        Arc::clone(map.entry(collection).or_default())
    }

    pub(crate) fn global(&self) -> Arc<ExecutionStats> {
        Arc::clone(&self.global)
    }
}
