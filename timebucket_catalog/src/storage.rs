//! The storage bridge: how committed write batches leave the catalog.
//!
//! The bridge owns durability, replication tagging and conflict detection;
//! the catalog only renders bucket documents and deltas and interprets the
//! returned error class. [`MemoryStorage`] is the in-process implementation
//! used by tests and by embedders that bring their own persistence later.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use timebucket_data::{BucketId, CollectionId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("write conflict on bucket {0}")]
    WriteConflict(BucketId),

    #[error("bucket {0} already exists")]
    BucketExists(BucketId),

    #[error("bucket {0} not found")]
    BucketNotFound(BucketId),
}

impl StorageError {
    /// Transient errors are recovered by re-running the batch's measurements
    /// through the insert path; everything else surfaces to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WriteConflict(_))
    }
}

/// Per-field minimum and maximum over every measurement in the bucket,
/// including the time field, plus the committed measurement count.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketControl {
    pub version: u32,
    pub min: BTreeMap<String, serde_json::Value>,
    pub max: BTreeMap<String, serde_json::Value>,
    pub count: u32,
}

/// Columnar data layout: field name to an ordinal-indexed map of values. The
/// ordinal is the measurement's position among the bucket's committed
/// measurements.
pub type BucketColumns = BTreeMap<String, BTreeMap<u32, serde_json::Value>>;

/// The full persisted form of a bucket, written once when the bucket's first
/// batch commits.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketDocument {
    pub id: BucketId,
    pub control: BucketControl,
    pub meta: Option<serde_json::Value>,
    pub data: BucketColumns,
}

/// An in-place extension of an existing bucket document: new column cells
/// starting at the previously committed ordinal, and the replacement control
/// block.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketDelta {
    pub control: BucketControl,
    pub columns: BucketColumns,
}

pub trait StorageBridge: Send + Sync + std::fmt::Debug {
    fn insert_bucket(&self, doc: BucketDocument) -> Result<(), StorageError>;
    fn update_bucket(&self, id: BucketId, delta: BucketDelta) -> Result<(), StorageError>;
    fn delete_bucket(&self, id: BucketId) -> Result<(), StorageError>;
}

/// In-memory document store. Updates merge columns and replace the control
/// block, mirroring what a real document store's update pipeline would do.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: Mutex<HashMap<BucketId, BucketDocument>>,
    fail_next: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next insert or update fail with a transient write conflict.
    pub fn fail_next_write(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn bucket(&self, id: BucketId) -> Option<BucketDocument> {
        self.buckets.lock().get(&id).cloned()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }

    pub fn bucket_count_for(&self, collection: CollectionId) -> usize {
        self.buckets
            .lock()
            .keys()
            .filter(|id| id.collection == collection)
            .count()
    }

    fn take_failure(&self) -> bool {
        self.fail_next.swap(false, Ordering::SeqCst)
    }
}

impl StorageBridge for MemoryStorage {
    fn insert_bucket(&self, doc: BucketDocument) -> Result<(), StorageError> {
        if self.take_failure() {
            return Err(StorageError::WriteConflict(doc.id));
        }
        let mut buckets = self.buckets.lock();
        if buckets.contains_key(&doc.id) {
            return Err(StorageError::BucketExists(doc.id));
        }
        buckets.insert(doc.id, doc);
        Ok(())
    }

    fn update_bucket(&self, id: BucketId, delta: BucketDelta) -> Result<(), StorageError> {
        if self.take_failure() {
            return Err(StorageError::WriteConflict(id));
        }
        let mut buckets = self.buckets.lock();
        let doc = buckets.get_mut(&id).ok_or(StorageError::BucketNotFound(id))?;
        for (field, cells) in delta.columns {
            doc.data.entry(field).or_default().extend(cells);
        }
        doc.control = delta.control;
        Ok(())
    }

    fn delete_bucket(&self, id: BucketId) -> Result<(), StorageError> {
        self.buckets
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::BucketNotFound(id))
    }
}
