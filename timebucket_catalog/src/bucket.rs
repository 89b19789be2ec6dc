//! In-memory mutable state for a single bucket.

use crate::memory::MemoryTracker;
use hashbrown::HashMap;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use timebucket_data::{BucketId, BucketKey, FieldType, FieldValue, Measurement, Timestamp};

/// Lifecycle state. `Prepared` means exactly one write batch is in flight;
/// an archived bucket cannot be prepared, so the illegal combination is
/// unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BucketState {
    Open,
    Prepared,
    Archived,
    Closed,
}

/// Why an open bucket stopped accepting measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RolloverReason {
    Count,
    Size,
    TimeForward,
    TimeBackward,
    SchemaChange,
}

/// Per-field min/max over every measurement absorbed into the bucket,
/// including the time field. Metadata is excluded; it lives in the bucket
/// document's `meta` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ControlSummary {
    pub(crate) min: BTreeMap<String, FieldValue>,
    pub(crate) max: BTreeMap<String, FieldValue>,
}

impl ControlSummary {
    pub(crate) fn observe_measurement(&mut self, measurement: &Measurement, skip: Option<&str>) {
        for (name, value) in measurement.fields() {
            if Some(name) == skip {
                continue;
            }
            match self.min.get_mut(name) {
                Some(existing) => {
                    if value.compare(existing) == Ordering::Less {
                        *existing = value.clone();
                    }
                }
                None => {
                    self.min.insert(name.to_string(), value.clone());
                }
            }
            match self.max.get_mut(name) {
                Some(existing) => {
                    if value.compare(existing) == Ordering::Greater {
                        *existing = value.clone();
                    }
                }
                None => {
                    self.max.insert(name.to_string(), value.clone());
                }
            }
        }
    }

    pub(crate) fn size_estimate(&self) -> usize {
        self.min
            .iter()
            .chain(self.max.iter())
            .map(|(name, v)| name.len() + 16 + v.size_estimate())
            .sum()
    }
}

/// Field name to type map for the measurements in a bucket. A bucket whose
/// fields never conflict has `mixed == false`; observing a conflicting type
/// records the bucket as mixed-schema but keeps the first type on record.
#[derive(Debug, Clone, Default)]
pub(crate) struct BucketSchema {
    fields: HashMap<String, FieldType>,
    pub(crate) mixed: bool,
}

impl BucketSchema {
    /// First field whose recorded type conflicts with the measurement, if
    /// any. Pure; used by the fit check before any mutation.
    pub(crate) fn conflict(
        &self,
        measurement: &Measurement,
        skip: Option<&str>,
    ) -> Option<(String, FieldType, FieldType)> {
        for (name, value) in measurement.fields() {
            if Some(name) == skip {
                continue;
            }
            if let Some(&existing) = self.fields.get(name) {
                let attempted = value.field_type();
                if existing != attempted {
                    return Some((name.to_string(), existing, attempted));
                }
            }
        }
        None
    }

    pub(crate) fn observe(&mut self, measurement: &Measurement, skip: Option<&str>) {
        for (name, value) in measurement.fields() {
            if Some(name) == skip {
                continue;
            }
            let attempted = value.field_type();
            match self.fields.get(name) {
                Some(&existing) if existing != attempted => self.mixed = true,
                Some(_) => {}
                None => {
                    self.fields.insert(name.to_string(), attempted);
                }
            }
        }
    }

    /// Rebuild an approximate schema from a control summary when reopening
    /// an archived bucket. A field whose min and max carry different types
    /// must already be mixed.
    pub(crate) fn from_control(control: &ControlSummary) -> Self {
        let mut schema = Self::default();
        for (name, min_value) in &control.min {
            let ty = min_value.field_type();
            if let Some(max_value) = control.max.get(name) {
                if max_value.field_type() != ty {
                    schema.mixed = true;
                }
            }
            schema.fields.insert(name.clone(), ty);
        }
        schema
    }

    pub(crate) fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub(crate) fn size_estimate(&self) -> usize {
        self.fields.keys().map(|name| name.len() + 17).sum()
    }
}

#[derive(Debug)]
pub(crate) struct Bucket {
    pub(crate) id: BucketId,
    pub(crate) key: BucketKey,
    /// Lower time bound, rounded down to the granularity boundary at
    /// creation. Never moves.
    pub(crate) min_time: Timestamp,
    pub(crate) max_time: Timestamp,
    pub(crate) state: BucketState,
    pub(crate) committed_count: u32,
    /// Running estimate of the serialized bucket document size, inflated for
    /// update-in-place cost.
    pub(crate) size_bytes: usize,
    pub(crate) control: ControlSummary,
    pub(crate) schema: BucketSchema,
    /// Set when a single measurement alone exceeded the normal bucket size
    /// ceiling; such a bucket holds exactly that measurement.
    pub(crate) contains_large_measurement: bool,
    /// The bucket no longer accepts inserts and closes once its outstanding
    /// batches resolve.
    pub(crate) pending_close: bool,
    /// Invalidated by a clear while a batch was in flight; resolved at
    /// commit time.
    pub(crate) cleared: bool,
    pub(crate) last_used: u64,
    pub(crate) pending: Vec<(u64, Measurement)>,
    memory: MemoryTracker,
}

impl Bucket {
    pub(crate) fn new(
        id: BucketId,
        key: BucketKey,
        min_time: Timestamp,
        base_size_bytes: usize,
        last_used: u64,
        memory: MemoryTracker,
    ) -> Self {
        let mut bucket = Self {
            id,
            key,
            min_time,
            max_time: min_time,
            state: BucketState::Open,
            committed_count: 0,
            size_bytes: base_size_bytes,
            control: ControlSummary::default(),
            schema: BucketSchema::default(),
            contains_large_measurement: false,
            pending_close: false,
            cleared: false,
            last_used,
            pending: Vec::new(),
            memory,
        };
        bucket.update_memory();
        bucket
    }

    pub(crate) fn total_count(&self) -> u32 {
        self.committed_count + self.pending.len() as u32
    }

    /// Open, nothing pending, no batch in flight.
    pub(crate) fn is_idle(&self) -> bool {
        self.state == BucketState::Open && self.pending.is_empty()
    }

    /// Append to the current pending batch. Legal while a prior batch is in
    /// flight: inserts pipeline into the next batch rather than blocking on
    /// the commit.
    pub(crate) fn append(
        &mut self,
        sequence: u64,
        measurement: Measurement,
        t: Timestamp,
        inflated_size: usize,
        meta_field: Option<&str>,
    ) {
        assert!(
            matches!(self.state, BucketState::Open | BucketState::Prepared),
            "append on bucket {} in state {:?}",
            self.id,
            self.state
        );
        debug_assert!(t >= self.min_time, "time bounds never shrink");
        if t > self.max_time {
            self.max_time = t;
        }
        self.schema.observe(&measurement, meta_field);
        self.control.observe_measurement(&measurement, meta_field);
        self.size_bytes += inflated_size;
        self.last_used = sequence;
        self.pending.push((sequence, measurement));
        self.update_memory();
    }

    /// Open -> Prepared, detaching the pending batch. Concurrent inserts
    /// accumulate into a fresh pending list while the batch is in flight.
    pub(crate) fn begin_commit(&mut self) -> Vec<(u64, Measurement)> {
        assert!(
            self.state == BucketState::Open,
            "begin_commit on non-open bucket {}",
            self.id
        );
        assert!(!self.pending.is_empty(), "begin_commit with nothing pending");
        self.state = BucketState::Prepared;
        let batch = std::mem::take(&mut self.pending);
        self.update_memory();
        batch
    }

    /// Prepared -> Open after the batch was durably written.
    pub(crate) fn finish_commit(&mut self, committed: u32) {
        assert!(
            self.state == BucketState::Prepared,
            "finish_commit on unprepared bucket {}",
            self.id
        );
        self.committed_count += committed;
        self.state = BucketState::Open;
    }

    /// Open + idle -> Archived. Keeps the control summary resident so the
    /// bucket can be reopened cheaply; drops the schema's field map, which
    /// is reconstructed from the control summary on reopen. The mixed flag
    /// survives archiving: min/max alone cannot recover it when the
    /// conflicting type never reached an extremum.
    pub(crate) fn archive(&mut self) {
        assert!(
            self.is_idle(),
            "archive of non-idle bucket {} in state {:?}",
            self.id,
            self.state
        );
        let mixed = self.schema.mixed;
        self.schema = BucketSchema::default();
        self.schema.mixed = mixed;
        self.pending = Vec::new();
        self.state = BucketState::Archived;
        self.update_memory();
    }

    /// Archived -> Open.
    pub(crate) fn reopen(&mut self, last_used: u64) {
        assert!(
            self.state == BucketState::Archived,
            "reopen of non-archived bucket {}",
            self.id
        );
        let was_mixed = self.schema.mixed;
        self.schema = BucketSchema::from_control(&self.control);
        self.schema.mixed |= was_mixed;
        self.state = BucketState::Open;
        self.last_used = last_used;
        self.update_memory();
    }

    /// Terminal.
    pub(crate) fn close(&mut self) {
        self.state = BucketState::Closed;
    }

    fn memory_estimate(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.key.size_estimate()
            + self.control.size_estimate()
            + self.schema.size_estimate()
            + self
                .pending
                .iter()
                .map(|(_, m)| 16 + m.size_estimate())
                .sum::<usize>()
    }

    fn update_memory(&mut self) {
        let bytes = self.memory_estimate();
        self.memory.set_bytes(bytes);
    }
}
