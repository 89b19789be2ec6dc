//! In-memory bucket catalog for time-series collections.
//!
//! The catalog is the single source of truth for which buckets are open or
//! archived, and arbitrates concurrent measurement inserts. Measurements that
//! share a collection, metadata value and time window accumulate in a bucket;
//! committed write batches flow out through a [`storage::StorageBridge`] as
//! inserts or in-place updates of physical bucket documents.
//!
//! The key space is partitioned into stripes, each guarded by its own lock,
//! so inserts for unrelated series proceed in parallel. Aggregate memory is
//! tracked across all stripes; under pressure the catalog archives idle
//! buckets, and closes archived ones only if archiving alone is not enough.

use thiserror::Error;
use timebucket_data::{BucketId, FieldType};

pub mod batch;
pub(crate) mod bucket;
pub mod catalog;
pub(crate) mod memory;
pub mod stats;
pub mod storage;
pub(crate) mod stripe;
pub(crate) mod validator;

pub use batch::{BucketHandle, WriteBatch};
pub use catalog::{BucketCatalog, CatalogConfig, CommitResolution, InsertResult};
pub use stats::ExecutionStats;
pub use storage::{
    BucketControl, BucketDelta, BucketDocument, MemoryStorage, StorageBridge, StorageError,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "measurement of estimated size {size} bytes exceeds the maximum bucket document size of {limit} bytes"
    )]
    MeasurementTooLarge { size: usize, limit: usize },

    #[error("measurement is missing the time field {0:?}")]
    MissingTimeField(String),

    #[error("time field {field:?} has type {ty}, expected a timestamp")]
    InvalidTimeFieldType { field: String, ty: FieldType },

    #[error("bucket {0} not found in catalog")]
    BucketNotFound(BucketId),

    #[error("bucket {0} was cleared while a write was outstanding")]
    BucketCleared(BucketId),

    #[error("bucket {0} has no pending measurements to commit")]
    NothingToCommit(BucketId),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
