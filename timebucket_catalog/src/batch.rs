//! Write batches and their rendering into storage operations.
//!
//! A batch is the append-only list of measurements detached from a bucket at
//! prepare time, together with a snapshot of the control summary covering
//! everything committed so far plus the batch itself. At most one batch per
//! bucket is in flight at a time; batches for the same bucket commit in the
//! order they were prepared.

use crate::bucket::ControlSummary;
use crate::storage::{BucketColumns, BucketControl, BucketDelta, BucketDocument};
use std::collections::BTreeMap;
use timebucket_data::{BucketId, CollectionConfig, FieldValue, Measurement};

/// Current version of the persisted bucket document layout.
pub(crate) const BUCKET_DOCUMENT_VERSION: u32 = 1;

/// Identifies a bucket and the stripe that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketHandle {
    pub bucket_id: BucketId,
    pub(crate) stripe: usize,
}

/// A detached batch of measurements on its way to storage.
#[derive(Debug)]
pub struct WriteBatch {
    pub(crate) handle: BucketHandle,
    pub(crate) measurements: Vec<(u64, Measurement)>,
    /// Number of measurements committed to the bucket before this batch;
    /// also the ordinal of the batch's first measurement.
    pub(crate) starting_ordinal: u32,
    pub(crate) control: ControlSummary,
    pub(crate) meta: Option<FieldValue>,
}

impl WriteBatch {
    pub fn bucket_id(&self) -> BucketId {
        self.handle.bucket_id
    }

    pub fn handle(&self) -> BucketHandle {
        self.handle
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Measurements committed to the bucket before this batch was prepared.
    pub fn previously_committed(&self) -> u32 {
        self.starting_ordinal
    }

    fn render_control(&self) -> BucketControl {
        BucketControl {
            version: BUCKET_DOCUMENT_VERSION,
            min: self
                .control
                .min
                .iter()
                .map(|(name, v)| (name.clone(), v.to_json()))
                .collect(),
            max: self
                .control
                .max
                .iter()
                .map(|(name, v)| (name.clone(), v.to_json()))
                .collect(),
            count: self.starting_ordinal + self.measurements.len() as u32,
        }
    }

    fn render_columns(&self, config: &CollectionConfig) -> BucketColumns {
        let mut columns = BucketColumns::new();
        for (offset, (_, measurement)) in self.measurements.iter().enumerate() {
            let ordinal = self.starting_ordinal + offset as u32;
            for (name, value) in measurement.fields() {
                if Some(name) == config.meta_field.as_deref() {
                    continue;
                }
                columns
                    .entry(name.to_string())
                    .or_insert_with(BTreeMap::new)
                    .insert(ordinal, value.to_json());
            }
        }
        columns
    }

    /// The storage operation this batch turns into: a full document for the
    /// bucket's first batch, an in-place delta afterwards.
    pub(crate) fn render(&self, config: &CollectionConfig) -> RenderedWrite {
        let control = self.render_control();
        let columns = self.render_columns(config);
        if self.starting_ordinal == 0 {
            RenderedWrite::Insert(BucketDocument {
                id: self.handle.bucket_id,
                control,
                meta: self.meta.as_ref().map(FieldValue::to_json),
                data: columns,
            })
        } else {
            RenderedWrite::Update(
                self.handle.bucket_id,
                BucketDelta {
                    control,
                    columns,
                },
            )
        }
    }
}

#[derive(Debug)]
pub(crate) enum RenderedWrite {
    Insert(BucketDocument),
    Update(BucketId, BucketDelta),
}
