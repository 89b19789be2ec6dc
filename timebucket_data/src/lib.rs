//! Shared vocabulary types for the time-series bucket catalog: identifiers,
//! timestamps, bucket granularity, field values and per-collection
//! configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

pub mod field;
pub mod key;

pub use field::{FieldType, FieldValue, Measurement};
pub use key::BucketKey;

/// Default maximum number of measurements in a single bucket.
pub const DEFAULT_BUCKET_MAX_COUNT: u32 = 1000;

/// Default ceiling on the estimated serialized size of a bucket document.
pub const DEFAULT_BUCKET_MAX_SIZE_BYTES: usize = 128 * 1024;

/// Hard ceiling on any single bucket document. Bucket documents get a small
/// allowance past the user-visible document maximum to leave room for the
/// control block.
pub const MAX_BUCKET_DOCUMENT_SIZE_BYTES: usize = 16 * 1024 * 1024 + 16 * 1024;

static NEXT_COLLECTION_ID: AtomicU32 = AtomicU32::new(0);

/// Process-unique identifier for a time-series collection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CollectionId(u32);

impl CollectionId {
    pub fn new() -> Self {
        Self(NEXT_COLLECTION_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn from_raw(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl Default for CollectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a physical bucket document. Stable for the bucket's lifetime,
/// including across archiving and reopening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketId {
    pub collection: CollectionId,
    pub oid: Uuid,
}

impl BucketId {
    /// Mint a fresh bucket id. Time-ordered so that ids sort roughly by
    /// creation time, which keeps storage-level scans friendly.
    pub fn new(collection: CollectionId) -> Self {
        Self {
            collection,
            oid: Uuid::now_v7(),
        }
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.oid)
    }
}

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn new(millis: i64) -> Self {
        Self(millis)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Timestamp {
    fn from(t: chrono::DateTime<chrono::Utc>) -> Self {
        Self(t.timestamp_millis())
    }
}

impl Add<i64> for Timestamp {
    type Output = Self;

    fn add(self, other: i64) -> Self {
        Self(self.0 + other)
    }
}

impl Sub<i64> for Timestamp {
    type Output = Self;

    fn sub(self, other: i64) -> Self {
        Self(self.0 - other)
    }
}

impl Sub for Timestamp {
    type Output = i64;

    fn sub(self, other: Self) -> i64 {
        self.0 - other.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse hint for how wide a time window a single bucket may cover. The
/// bucket's minimum time is rounded down on creation so that buckets for the
/// same series line up on stable boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Granularity {
    /// One hour span, minute-aligned buckets.
    Seconds,
    /// One day span, hour-aligned buckets.
    Minutes,
    /// Thirty day span, day-aligned buckets.
    Hours,
    /// User-provided span and rounding, both in seconds.
    Custom {
        span_seconds: u32,
        rounding_seconds: u32,
    },
}

impl Granularity {
    /// Maximum `max_time - min_time` a bucket with this granularity may cover,
    /// exclusive of the upper bound.
    pub fn max_span_millis(&self) -> i64 {
        match self {
            Self::Seconds => 3_600 * 1000,
            Self::Minutes => 86_400 * 1000,
            Self::Hours => 2_592_000 * 1000,
            Self::Custom { span_seconds, .. } => i64::from(*span_seconds) * 1000,
        }
    }

    pub fn rounding_millis(&self) -> i64 {
        match self {
            Self::Seconds => 60 * 1000,
            Self::Minutes => 3_600 * 1000,
            Self::Hours => 86_400 * 1000,
            Self::Custom {
                rounding_seconds, ..
            } => i64::from(*rounding_seconds) * 1000,
        }
    }

    /// Round a measurement time down to the bucket boundary it belongs to.
    pub fn round_down(&self, t: Timestamp) -> Timestamp {
        let interval = self.rounding_millis();
        Timestamp::new(t.get() - t.get().rem_euclid(interval))
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Self::Seconds
    }
}

/// Per-collection bucketing options, fetched from the collection catalog by
/// the write path and handed to the bucket catalog on every operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub collection: CollectionId,
    /// Name of the field carrying the measurement time. Must be present, with
    /// a timestamp value, in every measurement.
    pub time_field: String,
    /// Optional name of the metadata field used to partition measurements
    /// into series.
    pub meta_field: Option<String>,
    pub granularity: Granularity,
    pub bucket_max_count: u32,
    pub bucket_max_size_bytes: usize,
    /// Whether a single bucket may hold the same field with conflicting types
    /// across measurements.
    pub allow_mixed_schema: bool,
}

impl CollectionConfig {
    pub fn new(collection: CollectionId, time_field: impl Into<String>) -> Self {
        Self {
            collection,
            time_field: time_field.into(),
            meta_field: None,
            granularity: Granularity::default(),
            bucket_max_count: DEFAULT_BUCKET_MAX_COUNT,
            bucket_max_size_bytes: DEFAULT_BUCKET_MAX_SIZE_BYTES,
            allow_mixed_schema: false,
        }
    }

    pub fn with_meta_field(mut self, meta_field: impl Into<String>) -> Self {
        self.meta_field = Some(meta_field.into());
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_bucket_max_count(mut self, count: u32) -> Self {
        self.bucket_max_count = count;
        self
    }

    pub fn with_bucket_max_size_bytes(mut self, bytes: usize) -> Self {
        self.bucket_max_size_bytes = bytes;
        self
    }

    pub fn with_mixed_schema_allowed(mut self, allow: bool) -> Self {
        self.allow_mixed_schema = allow;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn collection_ids_are_unique() {
        let a = CollectionId::new();
        let b = CollectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn bucket_ids_sort_by_creation() {
        let collection = CollectionId::new();
        let a = BucketId::new(collection);
        let b = BucketId::new(collection);
        assert!(a <= b);
    }

    #[test]
    fn granularity_spans() {
        assert_eq!(Granularity::Seconds.max_span_millis(), 3_600_000);
        assert_eq!(Granularity::Minutes.max_span_millis(), 86_400_000);
        assert_eq!(Granularity::Hours.max_span_millis(), 2_592_000_000);
        let custom = Granularity::Custom {
            span_seconds: 120,
            rounding_seconds: 60,
        };
        assert_eq!(custom.max_span_millis(), 120_000);
        assert_eq!(custom.rounding_millis(), 60_000);
    }

    #[test]
    fn round_down_aligns_to_granularity() {
        let t = Timestamp::from(Utc.with_ymd_and_hms(2023, 5, 4, 20, 0, 59).unwrap());
        let rounded = Granularity::Seconds.round_down(t);
        assert_eq!(
            rounded,
            Timestamp::from(Utc.with_ymd_and_hms(2023, 5, 4, 20, 0, 0).unwrap())
        );

        let rounded = Granularity::Minutes.round_down(t);
        assert_eq!(
            rounded,
            Timestamp::from(Utc.with_ymd_and_hms(2023, 5, 4, 20, 0, 0).unwrap())
        );

        let rounded = Granularity::Hours.round_down(t);
        assert_eq!(
            rounded,
            Timestamp::from(Utc.with_ymd_and_hms(2023, 5, 4, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn round_down_handles_pre_epoch_times() {
        let t = Timestamp::new(-61_000);
        let rounded = Granularity::Seconds.round_down(t);
        assert_eq!(rounded, Timestamp::new(-120_000));
    }
}
