//! The bucket catalog: insert routing, the commit protocol and memory
//! pressure handling.

use crate::batch::{BucketHandle, RenderedWrite, WriteBatch};
use crate::bucket::{Bucket, BucketSchema, BucketState, RolloverReason};
use crate::memory::MemoryRegistry;
use crate::stats::{ExecutionStats, StatsHandle, StatsRegistry};
use crate::storage::StorageBridge;
use crate::stripe::{Stripe, StripeData};
use crate::validator::{self, Fit};
use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use timebucket_data::{
    BucketId, BucketKey, CollectionConfig, CollectionId, FieldValue,
    MAX_BUCKET_DOCUMENT_SIZE_BYTES, Measurement, Timestamp,
};
use tracing::{debug, warn};

/// Catalog-wide tuning. Collection-level limits live in
/// [`CollectionConfig`]; these apply across all collections sharing the
/// catalog.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Number of lock stripes the key space is hashed over.
    pub stripe_count: usize,
    /// Multiplier applied to a measurement's flat size estimate to cover the
    /// cost of its column-oriented representation.
    pub size_inflation_factor: usize,
    /// Aggregate memory above which idle buckets are archived a few at a
    /// time on the insert path.
    pub idle_expiry_threshold_bytes: usize,
    /// Aggregate memory above which the catalog reclaims until it is back
    /// under, closing archived buckets if archiving alone is not enough.
    pub hard_memory_threshold_bytes: usize,
    /// Upper bound on reclamation actions per idle expiry pass, so a single
    /// insert never stalls on a long sweep.
    pub idle_expiry_max_per_pass: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            stripe_count: 32,
            size_inflation_factor: 3,
            idle_expiry_threshold_bytes: 100 * 1024 * 1024,
            hard_memory_threshold_bytes: 1024 * 1024 * 1024,
            idle_expiry_max_per_pass: 8,
        }
    }
}

/// Where an inserted measurement landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertResult {
    pub handle: BucketHandle,
    /// Monotonic insert sequence number, also the measurement's id within
    /// its pending batch.
    pub sequence: u64,
}

/// How a commit resolved.
#[derive(Debug, PartialEq, Eq)]
pub enum CommitResolution {
    /// The batch was durably written.
    Committed {
        /// The bucket was pending closure and this was its last outstanding
        /// batch.
        bucket_closed: bool,
    },
    /// The write failed transiently; the batch's measurements, and any that
    /// had piled up behind it, were re-inserted as fresh measurements.
    Retried(Vec<InsertResult>),
    /// The bucket was cleared while the batch was in flight; nothing was
    /// written.
    BucketCleared,
}

#[derive(Debug)]
pub struct BucketCatalog {
    config: CatalogConfig,
    stripes: Vec<Stripe>,
    memory: Arc<MemoryRegistry>,
    storage: Arc<dyn StorageBridge>,
    stats: StatsRegistry,
    sequence: AtomicU64,
}

impl BucketCatalog {
    pub fn new(config: CatalogConfig, storage: Arc<dyn StorageBridge>) -> Self {
        assert!(config.stripe_count > 0, "need at least one stripe");
        let stripes = (0..config.stripe_count).map(|_| Stripe::default()).collect();
        Self {
            config,
            stripes,
            memory: Arc::new(MemoryRegistry::default()),
            storage,
            stats: StatsRegistry::default(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Route a measurement into a bucket, opening, rolling over or reopening
    /// buckets as needed. The returned handle feeds [`Self::prepare_commit`].
    pub fn insert(
        &self,
        config: &CollectionConfig,
        measurement: Measurement,
    ) -> Result<InsertResult> {
        let t = extract_time(config, &measurement)?;
        let metadata = config
            .meta_field
            .as_deref()
            .and_then(|field| measurement.field(field).cloned());
        let key = BucketKey::new(config.collection, metadata);
        let stripe_index = key.stripe(self.stripes.len());
        let stats = self.stats.handle(config.collection);

        let result = {
            let mut data = self.stripes[stripe_index].data.lock();
            self.insert_locked(&mut data, stripe_index, config, &stats, key, measurement, t)?
        };

        // Memory maintenance runs with no stripe lock held.
        self.relieve_memory_pressure();
        self.expire_idle_buckets();
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_locked(
        &self,
        data: &mut StripeData,
        stripe_index: usize,
        config: &CollectionConfig,
        stats: &StatsHandle,
        key: BucketKey,
        measurement: Measurement,
        t: Timestamp,
    ) -> Result<InsertResult> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let inflated = validator::inflated_size(&measurement, self.config.size_inflation_factor);
        let meta_field = config.meta_field.as_deref();
        let base_size = validator::BUCKET_BASE_OVERHEAD_BYTES + key.size_estimate();

        let open_id = data.open.get(&key).copied();
        let had_bucket_for_key = open_id.is_some() || data.archived.contains_key(&key);

        if validator::exceeds_hard_limit(inflated, base_size) {
            if open_id.is_some() {
                stats.inc(|s| &s.num_bucket_documents_too_large_update);
            } else {
                stats.inc(|s| &s.num_bucket_documents_too_large_insert);
            }
            return Err(Error::MeasurementTooLarge {
                size: inflated,
                limit: MAX_BUCKET_DOCUMENT_SIZE_BYTES,
            });
        }

        // The key's open bucket, if it still fits.
        if let Some(bucket_id) = open_id {
            let bucket = data
                .buckets
                .get_mut(&bucket_id)
                .expect("open index entry must point at a resident bucket");
            match validator::check_fit(bucket, &measurement, t, inflated, config) {
                Fit::Fits => {
                    bucket.append(sequence, measurement, t, inflated, meta_field);
                    return Ok(InsertResult {
                        handle: BucketHandle {
                            bucket_id,
                            stripe: stripe_index,
                        },
                        sequence,
                    });
                }
                Fit::Rollover(reason) => {
                    debug!(bucket = %bucket_id, ?reason, "rolling over bucket");
                    self.start_rollover(data, bucket_id, reason, stats);
                }
            }
        }

        // An archived bucket for the key whose window and limits admit the
        // measurement.
        if let Some(bucket_id) = archived_candidate(data, &key, &measurement, t, inflated, config) {
            let bucket = data
                .buckets
                .get_mut(&bucket_id)
                .expect("archived index entry must point at a resident bucket");
            bucket.reopen(sequence);
            bucket.append(sequence, measurement, t, inflated, meta_field);
            data.mark_reopened(bucket_id, &key);
            stats.inc(|s| &s.num_buckets_reopened);
            debug!(bucket = %bucket_id, "reopened archived bucket");
            return Ok(InsertResult {
                handle: BucketHandle {
                    bucket_id,
                    stripe: stripe_index,
                },
                sequence,
            });
        }

        // A fresh bucket, with its lower time bound rounded down to the
        // granularity boundary.
        let bucket_id = BucketId::new(config.collection);
        let min_time = config.granularity.round_down(t);
        let mut bucket = Bucket::new(
            bucket_id,
            key.clone(),
            min_time,
            base_size,
            sequence,
            self.memory.register(),
        );
        bucket.contains_large_measurement = validator::is_large_measurement(inflated, config);
        bucket.append(sequence, measurement, t, inflated, meta_field);
        data.buckets.insert(bucket_id, bucket);
        data.open.insert(key, bucket_id);
        if !had_bucket_for_key {
            stats.inc(|s| &s.num_buckets_opened_due_to_metadata);
        }
        Ok(InsertResult {
            handle: BucketHandle {
                bucket_id,
                stripe: stripe_index,
            },
            sequence,
        })
    }

    /// Stop routing inserts to a bucket that no longer fits. If nothing is
    /// pending or in flight the bucket is dropped immediately; otherwise it
    /// lingers, reachable only by handle, until its batches resolve.
    fn start_rollover(
        &self,
        data: &mut StripeData,
        bucket_id: BucketId,
        reason: RolloverReason,
        stats: &StatsHandle,
    ) {
        match reason {
            RolloverReason::Count => stats.inc(|s| &s.num_buckets_closed_due_to_count),
            RolloverReason::Size => stats.inc(|s| &s.num_buckets_closed_due_to_size),
            RolloverReason::TimeForward => {
                stats.inc(|s| &s.num_buckets_closed_due_to_time_forward)
            }
            RolloverReason::TimeBackward => {
                stats.inc(|s| &s.num_buckets_closed_due_to_time_backward)
            }
            RolloverReason::SchemaChange => {
                stats.inc(|s| &s.num_buckets_closed_due_to_schema_change)
            }
        }

        let bucket = data
            .buckets
            .get_mut(&bucket_id)
            .expect("rollover target must be resident");
        if bucket.is_idle() {
            bucket.close();
            data.remove_bucket(bucket_id);
        } else {
            bucket.pending_close = true;
            let key = bucket.key.clone();
            if data.open.get(&key) == Some(&bucket_id) {
                data.open.remove(&key);
            }
        }
    }

    /// Detach the bucket's pending measurements as a write batch. Blocks
    /// while another batch for the same bucket is in flight; batches commit
    /// in preparation order.
    pub fn prepare_commit(&self, handle: BucketHandle) -> Result<WriteBatch> {
        let stripe = &self.stripes[handle.stripe];
        let mut data = stripe.data.lock();
        loop {
            let state = match data.buckets.get(&handle.bucket_id) {
                None => return Err(Error::BucketNotFound(handle.bucket_id)),
                Some(bucket) if bucket.cleared => {
                    return Err(Error::BucketCleared(handle.bucket_id));
                }
                Some(bucket) => bucket.state,
            };
            match state {
                BucketState::Prepared => {
                    stripe.batch_resolved.wait(&mut data);
                }
                BucketState::Open => {
                    let bucket = data
                        .buckets
                        .get_mut(&handle.bucket_id)
                        .expect("checked residency above");
                    if bucket.pending.is_empty() {
                        return Err(Error::NothingToCommit(handle.bucket_id));
                    }
                    let starting_ordinal = bucket.committed_count;
                    let measurements = bucket.begin_commit();
                    return Ok(WriteBatch {
                        handle,
                        measurements,
                        starting_ordinal,
                        control: bucket.control.clone(),
                        meta: bucket.key.metadata.clone(),
                    });
                }
                BucketState::Archived | BucketState::Closed => {
                    return Err(Error::NothingToCommit(handle.bucket_id));
                }
            }
        }
    }

    /// Write a prepared batch through the storage bridge and resolve the
    /// bucket's in-flight state.
    ///
    /// A transiently failed write abandons the bucket and replays the
    /// batch's measurements (and any accumulated behind it) through the
    /// insert path, so a storage hiccup costs a bucket, never data.
    pub fn commit(&self, config: &CollectionConfig, batch: WriteBatch) -> Result<CommitResolution> {
        let handle = batch.handle;
        let stats = self.stats.handle(config.collection);

        // A clear may have invalidated the bucket while the batch was
        // being prepared.
        {
            let stripe = &self.stripes[handle.stripe];
            let mut data = stripe.data.lock();
            match data.buckets.get(&handle.bucket_id).map(|b| b.cleared) {
                None => {
                    stripe.batch_resolved.notify_all();
                    return Err(Error::BucketNotFound(handle.bucket_id));
                }
                Some(true) => {
                    data.remove_bucket(handle.bucket_id);
                    stats.inc(|s| &s.num_buckets_closed_due_to_clear);
                    stripe.batch_resolved.notify_all();
                    return Ok(CommitResolution::BucketCleared);
                }
                Some(false) => {}
            }
        }

        let first_batch = batch.starting_ordinal == 0;
        let committed = batch.len() as u32;
        let outcome = match batch.render(config) {
            RenderedWrite::Insert(doc) => self.storage.insert_bucket(doc),
            RenderedWrite::Update(id, delta) => self.storage.update_bucket(id, delta),
        };

        match outcome {
            Ok(()) => {
                if first_batch {
                    stats.inc(|s| &s.num_bucket_inserts);
                } else {
                    stats.inc(|s| &s.num_bucket_updates);
                }
                let bucket_closed = self.finish_success(handle, committed, &stats);
                Ok(CommitResolution::Committed { bucket_closed })
            }
            Err(err) if err.is_transient() => {
                warn!(
                    bucket = %handle.bucket_id,
                    error = %err,
                    "transient storage failure, replaying batch as fresh inserts"
                );
                let replayed = self.replay_failed_batch(config, batch)?;
                Ok(CommitResolution::Retried(replayed))
            }
            Err(err) => {
                self.abandon_bucket(handle);
                Err(Error::Storage(err))
            }
        }
    }

    fn finish_success(&self, handle: BucketHandle, committed: u32, stats: &StatsHandle) -> bool {
        let stripe = &self.stripes[handle.stripe];
        let mut data = stripe.data.lock();
        let bucket = data
            .buckets
            .get_mut(&handle.bucket_id)
            .expect("prepared bucket stays resident until its batch resolves");
        bucket.finish_commit(committed);
        let was_cleared = bucket.cleared;
        let should_close = (was_cleared || bucket.pending_close) && bucket.pending.is_empty();
        if should_close {
            bucket.close();
            data.remove_bucket(handle.bucket_id);
            if was_cleared {
                stats.inc(|s| &s.num_buckets_closed_due_to_clear);
            }
        }
        stripe.batch_resolved.notify_all();
        should_close
    }

    fn replay_failed_batch(
        &self,
        config: &CollectionConfig,
        batch: WriteBatch,
    ) -> Result<Vec<InsertResult>> {
        let pending_behind = self.abandon_bucket(batch.handle);
        let mut results = Vec::with_capacity(batch.measurements.len() + pending_behind.len());
        for (_, measurement) in batch.measurements.into_iter().chain(pending_behind) {
            results.push(self.insert(config, measurement)?);
        }
        Ok(results)
    }

    /// Drop a bucket whose batch failed, returning the measurements that had
    /// accumulated behind the failed batch.
    fn abandon_bucket(&self, handle: BucketHandle) -> Vec<(u64, Measurement)> {
        let stripe = &self.stripes[handle.stripe];
        let mut data = stripe.data.lock();
        let pending = match data.remove_bucket(handle.bucket_id) {
            Some(mut bucket) => {
                bucket.close();
                std::mem::take(&mut bucket.pending)
            }
            None => Vec::new(),
        };
        stripe.batch_resolved.notify_all();
        pending
    }

    /// Invalidate every bucket of a collection, e.g. after the collection is
    /// dropped. Buckets with a batch in flight are flagged and resolve at
    /// commit time; the rest are dropped immediately. Returns the number
    /// dropped.
    pub fn clear_collection(&self, collection: CollectionId) -> usize {
        self.clear_matching(|bucket| bucket.id.collection == collection)
    }

    /// Invalidate every bucket for one key.
    pub fn clear_key(&self, key: &BucketKey) -> usize {
        self.clear_matching(|bucket| &bucket.key == key)
    }

    fn clear_matching(&self, predicate: impl Fn(&Bucket) -> bool) -> usize {
        let mut dropped = 0;
        for stripe in &self.stripes {
            let mut data = stripe.data.lock();
            let matching: Vec<BucketId> = data
                .buckets
                .values()
                .filter(|bucket| predicate(bucket))
                .map(|bucket| bucket.id)
                .collect();
            for bucket_id in matching {
                let bucket = data
                    .buckets
                    .get_mut(&bucket_id)
                    .expect("listed under this lock");
                if bucket.state == BucketState::Prepared {
                    bucket.cleared = true;
                } else {
                    let collection = bucket.id.collection;
                    bucket.close();
                    data.remove_bucket(bucket_id);
                    self.stats
                        .handle(collection)
                        .inc(|s| &s.num_buckets_closed_due_to_clear);
                    dropped += 1;
                }
            }
            stripe.batch_resolved.notify_all();
        }
        dropped
    }

    /// Archive a bounded number of the oldest idle buckets when aggregate
    /// memory sits above the idle expiry threshold. Runs on the insert path.
    pub fn expire_idle_buckets(&self) {
        let threshold = self.config.idle_expiry_threshold_bytes;
        if self.memory.bytes() > threshold {
            self.reclaim(threshold, self.config.idle_expiry_max_per_pass);
        }
    }

    /// Reclaim until aggregate memory is back under the hard threshold,
    /// archiving idle buckets first and closing archived ones only if that
    /// is not enough.
    fn relieve_memory_pressure(&self) {
        let threshold = self.config.hard_memory_threshold_bytes;
        if self.memory.bytes() <= threshold {
            return;
        }
        self.reclaim(threshold, usize::MAX);
        let usage = self.memory.bytes();
        if usage > threshold {
            warn!(
                usage,
                threshold, "catalog memory still over the hard threshold after reclamation"
            );
        }
    }

    fn reclaim(&self, target_bytes: usize, max_actions: usize) {
        let mut actions = 0;
        while self.memory.bytes() > target_bytes && actions < max_actions {
            if !self.archive_oldest_idle() {
                break;
            }
            actions += 1;
        }
        while self.memory.bytes() > target_bytes && actions < max_actions {
            if !self.close_oldest_archived() {
                break;
            }
            actions += 1;
        }
    }

    /// Returns false when no candidate exists. A candidate that changed
    /// state between selection and locking still counts as an attempt.
    fn archive_oldest_idle(&self) -> bool {
        let Some((stripe_index, bucket_id)) = self.oldest_bucket(Bucket::is_idle) else {
            return false;
        };
        let mut data = self.stripes[stripe_index].data.lock();
        if let Some(bucket) = data.buckets.get_mut(&bucket_id) {
            if bucket.is_idle() {
                let key = bucket.key.clone();
                let collection = bucket.id.collection;
                bucket.archive();
                data.mark_archived(bucket_id, &key);
                self.stats
                    .handle(collection)
                    .inc(|s| &s.num_buckets_archived_due_to_memory_threshold);
                debug!(bucket = %bucket_id, "archived idle bucket under memory pressure");
            }
        }
        true
    }

    fn close_oldest_archived(&self) -> bool {
        let Some((stripe_index, bucket_id)) =
            self.oldest_bucket(|bucket| bucket.state == BucketState::Archived)
        else {
            return false;
        };
        let mut data = self.stripes[stripe_index].data.lock();
        if let Some(bucket) = data.buckets.get_mut(&bucket_id) {
            if bucket.state == BucketState::Archived {
                let collection = bucket.id.collection;
                bucket.close();
                data.remove_bucket(bucket_id);
                self.stats
                    .handle(collection)
                    .inc(|s| &s.num_buckets_closed_due_to_memory_threshold);
                debug!(bucket = %bucket_id, "closed archived bucket under memory pressure");
            }
        }
        true
    }

    /// Least recently used bucket satisfying the predicate, taking one
    /// stripe lock at a time.
    fn oldest_bucket(&self, predicate: impl Fn(&Bucket) -> bool) -> Option<(usize, BucketId)> {
        let mut best: Option<(u64, usize, BucketId)> = None;
        for (stripe_index, stripe) in self.stripes.iter().enumerate() {
            let data = stripe.data.lock();
            for bucket in data.buckets.values() {
                if predicate(bucket)
                    && best.is_none_or(|(last_used, _, _)| bucket.last_used < last_used)
                {
                    best = Some((bucket.last_used, stripe_index, bucket.id));
                }
            }
        }
        best.map(|(_, stripe_index, bucket_id)| (stripe_index, bucket_id))
    }

    /// Estimated bytes held by all resident buckets.
    pub fn memory_usage(&self) -> usize {
        self.memory.bytes()
    }

    pub fn collection_stats(&self, collection: CollectionId) -> Arc<ExecutionStats> {
        self.stats.collection(collection)
    }

    pub fn global_stats(&self) -> Arc<ExecutionStats> {
        self.stats.global()
    }

    /// Resident buckets in any state.
    pub fn bucket_count(&self) -> usize {
        self.stripes
            .iter()
            .map(|stripe| stripe.data.lock().buckets.len())
            .sum()
    }

    pub fn open_bucket_count(&self) -> usize {
        self.stripes
            .iter()
            .map(|stripe| stripe.data.lock().open.len())
            .sum()
    }

    pub fn archived_bucket_count(&self) -> usize {
        self.stripes
            .iter()
            .map(|stripe| {
                stripe
                    .data
                    .lock()
                    .archived
                    .values()
                    .map(Vec::len)
                    .sum::<usize>()
            })
            .sum()
    }

    #[cfg(test)]
    fn bucket_is_mixed_schema(&self, handle: BucketHandle) -> Option<bool> {
        let data = self.stripes[handle.stripe].data.lock();
        data.buckets
            .get(&handle.bucket_id)
            .map(|bucket| bucket.schema.mixed)
    }
}

fn extract_time(config: &CollectionConfig, measurement: &Measurement) -> Result<Timestamp> {
    match measurement.field(&config.time_field) {
        None => Err(Error::MissingTimeField(config.time_field.clone())),
        Some(FieldValue::Timestamp(t)) => Ok(*t),
        Some(other) => Err(Error::InvalidTimeFieldType {
            field: config.time_field.clone(),
            ty: other.field_type(),
        }),
    }
}

/// Newest archived bucket for the key that can take the measurement: the
/// timestamp must land in the bucket's window and the count, size and
/// schema limits must hold. The schema of an archived bucket is not
/// resident, so the check runs against one rebuilt from the control summary.
fn archived_candidate(
    data: &StripeData,
    key: &BucketKey,
    measurement: &Measurement,
    t: Timestamp,
    inflated: usize,
    config: &CollectionConfig,
) -> Option<BucketId> {
    let candidates = data.archived.get(key)?;
    for &bucket_id in candidates.iter().rev() {
        let bucket = data
            .buckets
            .get(&bucket_id)
            .expect("archived index entry must point at a resident bucket");
        if t < bucket.min_time || t - bucket.min_time >= config.granularity.max_span_millis() {
            continue;
        }
        if bucket.total_count() + 1 > config.bucket_max_count {
            continue;
        }
        if bucket.contains_large_measurement
            || validator::is_large_measurement(inflated, config)
            || bucket.size_bytes + inflated > config.bucket_max_size_bytes
        {
            continue;
        }
        if !config.allow_mixed_schema
            && BucketSchema::from_control(&bucket.control)
                .conflict(measurement, config.meta_field.as_deref())
                .is_some()
        {
            continue;
        }
        return Some(bucket_id);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use timebucket_data::Granularity;

    fn fixture() -> (Arc<MemoryStorage>, BucketCatalog, CollectionConfig) {
        fixture_with(CatalogConfig::default())
    }

    fn fixture_with(
        catalog_config: CatalogConfig,
    ) -> (Arc<MemoryStorage>, BucketCatalog, CollectionConfig) {
        let storage = Arc::new(MemoryStorage::new());
        let catalog = BucketCatalog::new(catalog_config, Arc::clone(&storage) as Arc<dyn StorageBridge>);
        let config = CollectionConfig::new(CollectionId::new(), "time")
            .with_meta_field("tag")
            .with_granularity(Granularity::Seconds);
        (storage, catalog, config)
    }

    fn at(hour: u32, minute: u32, second: u32, millis: i64) -> Timestamp {
        let base = Utc.with_ymd_and_hms(2023, 3, 14, hour, minute, second).unwrap();
        Timestamp::from(base) + millis
    }

    fn reading(t: Timestamp, tag: &str, value: f64) -> Measurement {
        Measurement::new()
            .with_field("time", t)
            .with_field("tag", tag)
            .with_field("temp", value)
    }

    fn flush(
        catalog: &BucketCatalog,
        config: &CollectionConfig,
        handle: BucketHandle,
    ) -> CommitResolution {
        let batch = catalog.prepare_commit(handle).unwrap();
        catalog.commit(config, batch).unwrap()
    }

    #[test]
    fn measurements_with_shared_metadata_fill_one_bucket() {
        let (storage, catalog, config) = fixture();
        let t0 = at(12, 0, 0, 0);

        let r1 = catalog.insert(&config, reading(t0, "a", 1.0)).unwrap();
        let r2 = catalog.insert(&config, reading(t0 + 1_000, "a", 2.0)).unwrap();
        let r3 = catalog.insert(&config, reading(t0 + 2_000, "a", 3.0)).unwrap();
        assert_eq!(r1.handle, r2.handle);
        assert_eq!(r2.handle, r3.handle);

        assert_eq!(
            flush(&catalog, &config, r1.handle),
            CommitResolution::Committed {
                bucket_closed: false
            }
        );

        let doc = storage.bucket(r1.handle.bucket_id).unwrap();
        assert_eq!(doc.control.count, 3);
        assert_eq!(doc.meta, Some(json!("a")));

        let stats = catalog.collection_stats(config.collection);
        assert_eq!(stats.num_bucket_inserts.fetch(), 1);
        assert_eq!(stats.num_buckets_opened_due_to_metadata.fetch(), 1);
    }

    #[test]
    fn distinct_metadata_values_get_distinct_buckets() {
        let (_, catalog, config) = fixture();
        let t0 = at(12, 0, 0, 0);

        let tagged = catalog.insert(&config, reading(t0, "a", 1.0)).unwrap();
        let other = catalog.insert(&config, reading(t0, "b", 1.0)).unwrap();
        // A null metadata value and an absent metadata field are distinct
        // series.
        let null_meta = catalog
            .insert(
                &config,
                Measurement::new()
                    .with_field("time", t0)
                    .with_field("tag", FieldValue::Null)
                    .with_field("temp", 1.0),
            )
            .unwrap();
        let no_meta = catalog
            .insert(
                &config,
                Measurement::new().with_field("time", t0).with_field("temp", 1.0),
            )
            .unwrap();

        let ids = [
            tagged.handle.bucket_id,
            other.handle.bucket_id,
            null_meta.handle.bucket_id,
            no_meta.handle.bucket_id,
        ];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(catalog.open_bucket_count(), 4);
        assert_eq!(
            catalog
                .collection_stats(config.collection)
                .num_buckets_opened_due_to_metadata
                .fetch(),
            4
        );
    }

    #[test]
    fn bucket_time_window_follows_granularity() {
        let (_, catalog, config) = fixture();

        // Seconds granularity: spans are an hour, aligned to the minute.
        let r1 = catalog.insert(&config, reading(at(20, 0, 0, 0), "a", 1.0)).unwrap();
        let r2 = catalog
            .insert(&config, reading(at(20, 59, 59, 999), "a", 2.0))
            .unwrap();
        assert_eq!(r1.handle, r2.handle);

        let r3 = catalog.insert(&config, reading(at(21, 0, 0, 0), "a", 3.0)).unwrap();
        assert_ne!(r1.handle.bucket_id, r3.handle.bucket_id);
        assert_eq!(
            catalog
                .collection_stats(config.collection)
                .num_buckets_closed_due_to_time_forward
                .fetch(),
            1
        );
    }

    #[test]
    fn measurement_before_bucket_minimum_opens_a_new_bucket() {
        let (_, catalog, config) = fixture();

        let r1 = catalog
            .insert(&config, reading(at(20, 30, 15, 0), "a", 1.0))
            .unwrap();
        // Bucket minimum rounded down to 20:30:00; anything earlier cannot
        // join.
        let r2 = catalog
            .insert(&config, reading(at(20, 29, 59, 0), "a", 2.0))
            .unwrap();
        assert_ne!(r1.handle.bucket_id, r2.handle.bucket_id);
        assert_eq!(
            catalog
                .collection_stats(config.collection)
                .num_buckets_closed_due_to_time_backward
                .fetch(),
            1
        );
    }

    #[test]
    fn count_limit_rolls_the_bucket_over() {
        let (_, catalog, mut config) = fixture();
        config = config.with_bucket_max_count(3);
        let t0 = at(9, 0, 0, 0);

        let first = catalog.insert(&config, reading(t0, "a", 0.0)).unwrap();
        for i in 1..3_i64 {
            let r = catalog
                .insert(&config, reading(t0 + i * 1_000, "a", i as f64))
                .unwrap();
            assert_eq!(r.handle, first.handle);
        }
        let overflow = catalog.insert(&config, reading(t0 + 3_000, "a", 3.0)).unwrap();
        assert_ne!(overflow.handle.bucket_id, first.handle.bucket_id);
        assert_eq!(
            catalog
                .collection_stats(config.collection)
                .num_buckets_closed_due_to_count
                .fetch(),
            1
        );
    }

    #[test]
    fn size_limit_rolls_the_bucket_over() {
        let (_, catalog, mut config) = fixture();
        config = config.with_bucket_max_size_bytes(2_000);
        let t0 = at(9, 0, 0, 0);
        let payload = "x".repeat(400);

        let bulky = |t: Timestamp| {
            Measurement::new()
                .with_field("time", t)
                .with_field("tag", "a")
                .with_field("payload", payload.clone())
        };

        let r1 = catalog.insert(&config, bulky(t0)).unwrap();
        let r2 = catalog.insert(&config, bulky(t0 + 1_000)).unwrap();
        assert_ne!(r1.handle.bucket_id, r2.handle.bucket_id);
        assert_eq!(
            catalog
                .collection_stats(config.collection)
                .num_buckets_closed_due_to_size
                .fetch(),
            1
        );
    }

    #[test]
    fn oversized_measurement_is_rejected() {
        let (_, catalog, config) = fixture();
        let t0 = at(9, 0, 0, 0);
        let huge = "x".repeat(8 * 1024 * 1024);

        let err = catalog
            .insert(
                &config,
                Measurement::new()
                    .with_field("time", t0)
                    .with_field("tag", "fresh")
                    .with_field("blob", huge.clone()),
            )
            .unwrap_err();
        assert!(matches!(err, Error::MeasurementTooLarge { .. }));

        // Same rejection against a key with an open bucket counts as an
        // update-side failure.
        catalog.insert(&config, reading(t0, "a", 1.0)).unwrap();
        catalog
            .insert(
                &config,
                Measurement::new()
                    .with_field("time", t0 + 1_000)
                    .with_field("tag", "a")
                    .with_field("blob", huge),
            )
            .unwrap_err();

        let stats = catalog.collection_stats(config.collection);
        assert_eq!(stats.num_bucket_documents_too_large_insert.fetch(), 1);
        assert_eq!(stats.num_bucket_documents_too_large_update.fetch(), 1);
    }

    #[test]
    fn large_measurement_gets_a_bucket_of_its_own() {
        let (storage, catalog, mut config) = fixture();
        config = config.with_bucket_max_size_bytes(2_000);
        let t0 = at(9, 0, 0, 0);

        let large = Measurement::new()
            .with_field("time", t0)
            .with_field("tag", "a")
            .with_field("payload", "x".repeat(800));
        let r1 = catalog.insert(&config, large).unwrap();

        // The dedicated bucket takes nothing else, not even a tiny
        // measurement.
        let r2 = catalog.insert(&config, reading(t0 + 1_000, "a", 1.0)).unwrap();
        assert_ne!(r1.handle.bucket_id, r2.handle.bucket_id);

        flush(&catalog, &config, r1.handle);
        assert_eq!(storage.bucket(r1.handle.bucket_id).unwrap().control.count, 1);
    }

    #[test]
    fn schema_conflict_rolls_over_to_a_new_bucket() {
        let (_, catalog, config) = fixture();
        let t0 = at(9, 0, 0, 0);

        let r1 = catalog
            .insert(
                &config,
                Measurement::new()
                    .with_field("time", t0)
                    .with_field("tag", "a")
                    .with_field("v", 1_i64),
            )
            .unwrap();
        let r2 = catalog
            .insert(
                &config,
                Measurement::new()
                    .with_field("time", t0 + 1_000)
                    .with_field("tag", "a")
                    .with_field("v", "one"),
            )
            .unwrap();

        assert_ne!(r1.handle.bucket_id, r2.handle.bucket_id);
        assert_eq!(
            catalog
                .collection_stats(config.collection)
                .num_buckets_closed_due_to_schema_change
                .fetch(),
            1
        );
    }

    #[test]
    fn mixed_schema_collection_keeps_conflicting_types_together() {
        let (storage, catalog, mut config) = fixture();
        config = config.with_mixed_schema_allowed(true);
        let t0 = at(9, 0, 0, 0);

        let r1 = catalog
            .insert(
                &config,
                Measurement::new()
                    .with_field("time", t0)
                    .with_field("tag", "a")
                    .with_field("v", 1_i64),
            )
            .unwrap();
        let r2 = catalog
            .insert(
                &config,
                Measurement::new()
                    .with_field("time", t0 + 1_000)
                    .with_field("tag", "a")
                    .with_field("v", "one"),
            )
            .unwrap();
        assert_eq!(r1.handle, r2.handle);
        assert_eq!(catalog.bucket_is_mixed_schema(r1.handle), Some(true));

        flush(&catalog, &config, r1.handle);
        let doc = storage.bucket(r1.handle.bucket_id).unwrap();
        assert_eq!(doc.data["v"][&0], json!(1));
        assert_eq!(doc.data["v"][&1], json!("one"));
    }

    #[test]
    fn new_fields_extend_the_open_bucket_sparsely() {
        let (storage, catalog, config) = fixture();
        let t0 = at(9, 0, 0, 0);

        let r1 = catalog
            .insert(
                &config,
                Measurement::new()
                    .with_field("time", t0)
                    .with_field("tag", "a")
                    .with_field("temp", 20.5),
            )
            .unwrap();
        let r2 = catalog
            .insert(
                &config,
                Measurement::new()
                    .with_field("time", t0 + 1_000)
                    .with_field("tag", "a")
                    .with_field("humidity", 40_i64),
            )
            .unwrap();
        let r3 = catalog
            .insert(
                &config,
                Measurement::new()
                    .with_field("time", t0 + 2_000)
                    .with_field("tag", "a")
                    .with_field("temp", 21.0)
                    .with_field("wind", 3_i64),
            )
            .unwrap();
        assert_eq!(r1.handle, r2.handle);
        assert_eq!(r2.handle, r3.handle);

        flush(&catalog, &config, r1.handle);
        let doc = storage.bucket(r1.handle.bucket_id).unwrap();
        assert_eq!(
            doc.data["temp"].keys().copied().collect::<Vec<_>>(),
            vec![0, 2]
        );
        assert_eq!(
            doc.data["humidity"].keys().copied().collect::<Vec<_>>(),
            vec![1]
        );
        assert_eq!(doc.data["wind"].keys().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(doc.control.min["humidity"], json!(40));
        assert_eq!(doc.control.max["temp"], json!(21.0));
    }

    #[test]
    fn inserts_pipeline_while_a_batch_is_in_flight() {
        let (storage, catalog, config) = fixture();
        let t0 = at(9, 0, 0, 0);

        let r1 = catalog.insert(&config, reading(t0, "a", 1.0)).unwrap();
        let b1 = catalog.prepare_commit(r1.handle).unwrap();
        assert_eq!(b1.previously_committed(), 0);
        assert_eq!(b1.len(), 1);

        // Lands in the bucket's next batch, not behind a lock.
        let r2 = catalog.insert(&config, reading(t0 + 1_000, "a", 2.0)).unwrap();
        assert_eq!(r2.handle, r1.handle);

        assert_eq!(
            catalog.commit(&config, b1).unwrap(),
            CommitResolution::Committed {
                bucket_closed: false
            }
        );

        let b2 = catalog.prepare_commit(r1.handle).unwrap();
        assert_eq!(b2.previously_committed(), 1);
        catalog.commit(&config, b2).unwrap();

        let doc = storage.bucket(r1.handle.bucket_id).unwrap();
        assert_eq!(doc.control.count, 2);
        assert_eq!(
            doc.data["time"].keys().copied().collect::<Vec<_>>(),
            vec![0, 1]
        );

        let stats = catalog.collection_stats(config.collection);
        assert_eq!(stats.num_bucket_inserts.fetch(), 1);
        assert_eq!(stats.num_bucket_updates.fetch(), 1);
    }

    #[test]
    fn prepare_blocks_until_the_outstanding_batch_resolves() {
        let (storage, catalog, config) = fixture();
        let catalog = Arc::new(catalog);
        let t0 = at(9, 0, 0, 0);

        let r1 = catalog.insert(&config, reading(t0, "a", 1.0)).unwrap();
        let b1 = catalog.prepare_commit(r1.handle).unwrap();
        catalog.insert(&config, reading(t0 + 1_000, "a", 2.0)).unwrap();

        let waiter = {
            let catalog = Arc::clone(&catalog);
            let handle = r1.handle;
            std::thread::spawn(move || catalog.prepare_commit(handle).unwrap())
        };

        // Whether the thread reaches the wait before or after the commit,
        // it must come back with the second batch.
        std::thread::sleep(Duration::from_millis(20));
        catalog.commit(&config, b1).unwrap();

        let b2 = waiter.join().unwrap();
        assert_eq!(b2.previously_committed(), 1);
        assert_eq!(b2.len(), 1);
        catalog.commit(&config, b2).unwrap();
        assert_eq!(storage.bucket(r1.handle.bucket_id).unwrap().control.count, 2);
    }

    #[test]
    fn prepare_with_nothing_pending_is_an_error() {
        let (_, catalog, config) = fixture();
        let r = catalog.insert(&config, reading(at(9, 0, 0, 0), "a", 1.0)).unwrap();
        flush(&catalog, &config, r.handle);

        let err = catalog.prepare_commit(r.handle).unwrap_err();
        assert!(matches!(err, Error::NothingToCommit(id) if id == r.handle.bucket_id));

        let unknown = BucketHandle {
            bucket_id: BucketId::new(config.collection),
            stripe: 0,
        };
        assert!(matches!(
            catalog.prepare_commit(unknown).unwrap_err(),
            Error::BucketNotFound(_)
        ));
    }

    #[test]
    fn failed_commit_replays_measurements_as_fresh_inserts() {
        let (storage, catalog, config) = fixture();
        let t0 = at(9, 0, 0, 0);

        let r1 = catalog.insert(&config, reading(t0, "a", 1.0)).unwrap();
        let b1 = catalog.prepare_commit(r1.handle).unwrap();
        catalog.insert(&config, reading(t0 + 1_000, "a", 2.0)).unwrap();

        storage.fail_next_write();
        let resolution = catalog.commit(&config, b1).unwrap();
        let CommitResolution::Retried(replayed) = resolution else {
            panic!("expected a retried resolution");
        };

        // Both the failed batch and the measurement queued behind it moved
        // to one fresh bucket; the abandoned bucket is gone.
        assert_eq!(replayed.len(), 2);
        let fresh = replayed[0].handle;
        assert!(replayed.iter().all(|r| r.handle == fresh));
        assert_ne!(fresh.bucket_id, r1.handle.bucket_id);
        assert_eq!(catalog.bucket_count(), 1);

        flush(&catalog, &config, fresh);
        assert_eq!(storage.bucket(fresh.bucket_id).unwrap().control.count, 2);
        assert!(storage.bucket(r1.handle.bucket_id).is_none());

        let stats = catalog.collection_stats(config.collection);
        assert_eq!(stats.num_bucket_inserts.fetch(), 1);
        assert_eq!(stats.num_bucket_updates.fetch(), 0);
    }

    #[test]
    fn clear_collection_drops_its_buckets_only() {
        let (storage, catalog, config_a) = fixture();
        let config_b = CollectionConfig::new(CollectionId::new(), "time")
            .with_meta_field("tag")
            .with_granularity(Granularity::Seconds);
        let t0 = at(9, 0, 0, 0);

        let a1 = catalog.insert(&config_a, reading(t0, "a", 1.0)).unwrap();
        let a2 = catalog.insert(&config_a, reading(t0, "b", 1.0)).unwrap();
        let other = catalog.insert(&config_b, reading(t0, "a", 1.0)).unwrap();
        flush(&catalog, &config_a, a1.handle);
        flush(&catalog, &config_a, a2.handle);
        flush(&catalog, &config_b, other.handle);
        assert_eq!(storage.bucket_count_for(config_a.collection), 2);
        assert_eq!(storage.bucket_count_for(config_b.collection), 1);

        assert_eq!(catalog.clear_collection(config_a.collection), 2);
        assert_eq!(catalog.bucket_count(), 1);
        assert_eq!(
            catalog
                .collection_stats(config_a.collection)
                .num_buckets_closed_due_to_clear
                .fetch(),
            2
        );
        // Clearing evicts catalog state only; durable documents are the
        // embedder's to reap.
        assert_eq!(storage.bucket_count_for(config_a.collection), 2);

        // The untouched collection's bucket still takes inserts.
        let again = catalog.insert(&config_b, reading(t0 + 1_000, "a", 2.0)).unwrap();
        assert_eq!(again.handle, other.handle);
    }

    #[test]
    fn clear_key_drops_one_series() {
        let (_, catalog, config) = fixture();
        let t0 = at(9, 0, 0, 0);
        catalog.insert(&config, reading(t0, "a", 1.0)).unwrap();
        let kept = catalog.insert(&config, reading(t0, "b", 1.0)).unwrap();

        let key = BucketKey::new(config.collection, Some(FieldValue::from("a")));
        assert_eq!(catalog.clear_key(&key), 1);
        assert_eq!(catalog.bucket_count(), 1);

        let still_open = catalog.insert(&config, reading(t0 + 1_000, "b", 2.0)).unwrap();
        assert_eq!(still_open.handle, kept.handle);
    }

    #[test]
    fn clear_while_a_batch_is_in_flight_resolves_at_commit() {
        let (storage, catalog, config) = fixture();
        let r = catalog.insert(&config, reading(at(9, 0, 0, 0), "a", 1.0)).unwrap();
        let batch = catalog.prepare_commit(r.handle).unwrap();

        // The prepared bucket is only flagged; it resolves when the batch
        // does.
        assert_eq!(catalog.clear_collection(config.collection), 0);
        assert_eq!(catalog.bucket_count(), 1);

        assert_eq!(
            catalog.commit(&config, batch).unwrap(),
            CommitResolution::BucketCleared
        );
        assert_eq!(catalog.bucket_count(), 0);
        assert_eq!(storage.bucket_count(), 0);
        assert_eq!(
            catalog
                .collection_stats(config.collection)
                .num_buckets_closed_due_to_clear
                .fetch(),
            1
        );
    }

    #[test_log::test]
    fn memory_pressure_archives_before_closing() {
        let (_, catalog, config) = fixture_with(CatalogConfig {
            stripe_count: 4,
            hard_memory_threshold_bytes: 4_096,
            idle_expiry_threshold_bytes: usize::MAX,
            ..CatalogConfig::default()
        });
        let stats = catalog.global_stats();
        let t0 = at(9, 0, 0, 0);

        for i in 0..64 {
            let tag = format!("sensor-{i}");
            let r = catalog.insert(&config, reading(t0, &tag, i as f64)).unwrap();
            flush(&catalog, &config, r.handle);

            // Never close more than we have archived.
            assert!(
                stats.num_buckets_closed_due_to_memory_threshold.fetch()
                    <= stats.num_buckets_archived_due_to_memory_threshold.fetch()
            );
        }

        assert!(stats.num_buckets_archived_due_to_memory_threshold.fetch() > 0);
        assert!(stats.num_buckets_closed_due_to_memory_threshold.fetch() > 0);
    }

    #[test]
    fn idle_buckets_expire_past_the_idle_threshold() {
        let (_, catalog, config) = fixture_with(CatalogConfig {
            idle_expiry_threshold_bytes: 1,
            idle_expiry_max_per_pass: 1,
            hard_memory_threshold_bytes: usize::MAX,
            ..CatalogConfig::default()
        });
        let stats = catalog.global_stats();

        let r = catalog.insert(&config, reading(at(9, 0, 0, 0), "a", 1.0)).unwrap();
        flush(&catalog, &config, r.handle);

        // First pass archives the idle bucket, the next one closes it.
        catalog.expire_idle_buckets();
        assert_eq!(catalog.archived_bucket_count(), 1);
        assert_eq!(stats.num_buckets_archived_due_to_memory_threshold.fetch(), 1);

        catalog.expire_idle_buckets();
        assert_eq!(catalog.bucket_count(), 0);
        assert_eq!(stats.num_buckets_closed_due_to_memory_threshold.fetch(), 1);
    }

    #[test_log::test]
    fn reopened_bucket_is_indistinguishable_from_one_never_archived() {
        let archiving_config = CatalogConfig {
            idle_expiry_threshold_bytes: 1,
            idle_expiry_max_per_pass: 1,
            hard_memory_threshold_bytes: usize::MAX,
            ..CatalogConfig::default()
        };
        let t0 = at(9, 0, 0, 0);
        let first = reading(t0, "a", 1.0);
        let second = reading(t0 + 30_000, "a", 2.0);

        let (storage, catalog, config) = fixture_with(archiving_config);
        let r1 = catalog.insert(&config, first.clone()).unwrap();
        flush(&catalog, &config, r1.handle);
        catalog.expire_idle_buckets();
        assert_eq!(catalog.archived_bucket_count(), 1);

        let r2 = catalog.insert(&config, second.clone()).unwrap();
        assert_eq!(r2.handle.bucket_id, r1.handle.bucket_id);
        assert_eq!(catalog.archived_bucket_count(), 0);
        assert_eq!(
            catalog
                .collection_stats(config.collection)
                .num_buckets_reopened
                .fetch(),
            1
        );
        flush(&catalog, &config, r2.handle);
        let archived_doc = storage.bucket(r1.handle.bucket_id).unwrap();

        // The same inserts against a catalog that never archives produce an
        // identical document, id aside.
        let (plain_storage, plain_catalog, plain_config) = fixture();
        let p1 = plain_catalog.insert(&plain_config, first).unwrap();
        flush(&plain_catalog, &plain_config, p1.handle);
        let p2 = plain_catalog.insert(&plain_config, second).unwrap();
        assert_eq!(p2.handle, p1.handle);
        flush(&plain_catalog, &plain_config, p2.handle);
        let plain_doc = plain_storage.bucket(p1.handle.bucket_id).unwrap();

        assert_eq!(archived_doc.control, plain_doc.control);
        assert_eq!(archived_doc.data, plain_doc.data);
        assert_eq!(archived_doc.meta, plain_doc.meta);
    }

    #[test]
    fn memory_accounting_returns_to_zero_when_buckets_drop() {
        let (_, catalog, config) = fixture();
        let t0 = at(9, 0, 0, 0);

        catalog.insert(&config, reading(t0, "a", 1.0)).unwrap();
        catalog.insert(&config, reading(t0, "b", 2.0)).unwrap();
        assert!(catalog.memory_usage() > 0);

        catalog.clear_collection(config.collection);
        assert_eq!(catalog.memory_usage(), 0);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// A bucket takes exactly its maximum count in any insert order
            /// before splitting.
            #[test]
            fn exactly_max_count_measurements_never_split(
                offsets in Just((0..5i64).map(|i| i * 1_000).collect::<Vec<_>>()).prop_shuffle()
            ) {
                let (_, catalog, config) = fixture();
                let config = config.with_bucket_max_count(5);
                let t0 = at(9, 0, 30, 0);

                // Start mid-window so shuffled offsets never land before the
                // rounded bucket minimum.
                let handles: Vec<_> = offsets
                    .iter()
                    .map(|&offset| {
                        catalog
                            .insert(&config, reading(t0 + offset, "a", 1.0))
                            .unwrap()
                            .handle
                    })
                    .collect();
                prop_assert!(handles.iter().all(|h| *h == handles[0]));

                let overflow = catalog
                    .insert(&config, reading(t0 + 10_000, "a", 1.0))
                    .unwrap();
                prop_assert_ne!(overflow.handle.bucket_id, handles[0].bucket_id);
            }

            /// Committed columns are exactly the union of inserted fields,
            /// with one cell per measurement that set the field.
            #[test]
            fn committed_columns_are_the_sparse_union_of_fields(
                field_sets in proptest::collection::vec(
                    proptest::collection::btree_set("[a-d]", 1..4),
                    1..8,
                )
            ) {
                let (storage, catalog, config) = fixture();
                let t0 = at(9, 0, 0, 0);

                let mut handle = None;
                for (i, fields) in field_sets.iter().enumerate() {
                    let mut m = Measurement::new()
                        .with_field("time", t0 + i as i64)
                        .with_field("tag", "a");
                    for name in fields {
                        m = m.with_field(name.clone(), i as i64);
                    }
                    let r = catalog.insert(&config, m).unwrap();
                    handle.get_or_insert(r.handle);
                    prop_assert_eq!(r.handle, handle.unwrap());
                }

                let handle = handle.unwrap();
                flush(&catalog, &config, handle);
                let doc = storage.bucket(handle.bucket_id).unwrap();

                let mut expected: std::collections::BTreeMap<&str, usize> =
                    Default::default();
                for fields in &field_sets {
                    for name in fields {
                        *expected.entry(name.as_str()).or_default() += 1;
                    }
                }
                for (name, cells) in &expected {
                    prop_assert_eq!(doc.data[*name].len(), *cells);
                }
                prop_assert_eq!(doc.data.len(), expected.len() + 1); // + time
                prop_assert_eq!(doc.control.count as usize, field_sets.len());
            }
        }
    }
}
