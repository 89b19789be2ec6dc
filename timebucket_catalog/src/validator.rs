//! Fit checks for a candidate (bucket, measurement) pair.
//!
//! All checks are pure and run while the stripe lock for the bucket's key is
//! held, so they are atomic with respect to concurrent inserts into the same
//! bucket. Order: count, time window, size, large-measurement policy, schema.

use crate::bucket::{Bucket, RolloverReason};
use timebucket_data::{
    CollectionConfig, MAX_BUCKET_DOCUMENT_SIZE_BYTES, Measurement, Timestamp,
};

/// Fixed allowance for the parts of a bucket document that exist regardless
/// of measurement content: the id, the control block scaffolding and the
/// data map itself.
pub(crate) const BUCKET_BASE_OVERHEAD_BYTES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fit {
    Fits,
    Rollover(RolloverReason),
}

/// Estimated cost of the measurement inside a bucket document. Inflated by a
/// safety factor because representing the measurement as a column-oriented
/// update is costlier than its flat serialized form.
pub(crate) fn inflated_size(measurement: &Measurement, inflation_factor: usize) -> usize {
    measurement.size_estimate() * inflation_factor
}

/// Whether the measurement exceeds the hard document ceiling even for a
/// brand-new bucket.
pub(crate) fn exceeds_hard_limit(inflated_size: usize, base_size_bytes: usize) -> bool {
    base_size_bytes + inflated_size > MAX_BUCKET_DOCUMENT_SIZE_BYTES
}

/// A measurement whose inflated size alone exceeds the normal bucket size
/// ceiling gets a bucket of its own, capped at one measurement.
pub(crate) fn is_large_measurement(inflated_size: usize, config: &CollectionConfig) -> bool {
    inflated_size > config.bucket_max_size_bytes
}

pub(crate) fn check_fit(
    bucket: &Bucket,
    measurement: &Measurement,
    t: Timestamp,
    inflated_size: usize,
    config: &CollectionConfig,
) -> Fit {
    if bucket.total_count() + 1 > config.bucket_max_count {
        return Fit::Rollover(RolloverReason::Count);
    }

    if t < bucket.min_time {
        return Fit::Rollover(RolloverReason::TimeBackward);
    }
    if t - bucket.min_time >= config.granularity.max_span_millis() {
        return Fit::Rollover(RolloverReason::TimeForward);
    }

    // A bucket holding a large measurement takes nothing else; a large
    // measurement fits only an empty bucket.
    if bucket.contains_large_measurement {
        return Fit::Rollover(RolloverReason::Size);
    }
    if is_large_measurement(inflated_size, config) {
        if bucket.total_count() > 0 {
            return Fit::Rollover(RolloverReason::Size);
        }
    } else if bucket.size_bytes + inflated_size > config.bucket_max_size_bytes {
        return Fit::Rollover(RolloverReason::Size);
    }

    // New fields never force closure; only a type conflict on an existing
    // field does, and only when the collection disallows mixed schemas.
    if !config.allow_mixed_schema
        && bucket
            .schema
            .conflict(measurement, config.meta_field.as_deref())
            .is_some()
    {
        return Fit::Rollover(RolloverReason::SchemaChange);
    }

    Fit::Fits
}
