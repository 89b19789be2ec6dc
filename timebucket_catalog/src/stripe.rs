//! Lock partitioning of the catalog's bucket index.

use crate::bucket::Bucket;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use timebucket_data::{BucketId, BucketKey};

/// One shard of the catalog. The mutex guards the index maps and every
/// bucket they hold; the condvar wakes writers waiting for a bucket's
/// in-flight batch to resolve.
#[derive(Debug, Default)]
pub(crate) struct Stripe {
    pub(crate) data: Mutex<StripeData>,
    pub(crate) batch_resolved: Condvar,
}

#[derive(Debug, Default)]
pub(crate) struct StripeData {
    /// Every bucket resident in this stripe, any state.
    pub(crate) buckets: HashMap<BucketId, Bucket>,
    /// At most one open bucket per key in steady state; rollover briefly
    /// leaves the outgoing bucket reachable only by id.
    pub(crate) open: HashMap<BucketKey, BucketId>,
    /// Archived buckets by key, oldest first.
    pub(crate) archived: HashMap<BucketKey, Vec<BucketId>>,
}

impl StripeData {
    /// Drop a bucket from every index. Memory accounting resolves when the
    /// returned bucket is dropped.
    pub(crate) fn remove_bucket(&mut self, id: BucketId) -> Option<Bucket> {
        let bucket = self.buckets.remove(&id)?;
        if self.open.get(&bucket.key) == Some(&id) {
            self.open.remove(&bucket.key);
        }
        if let Some(list) = self.archived.get_mut(&bucket.key) {
            list.retain(|&archived_id| archived_id != id);
            if list.is_empty() {
                self.archived.remove(&bucket.key);
            }
        }
        Some(bucket)
    }

    /// Move a bucket from the open index to the archived index.
    pub(crate) fn mark_archived(&mut self, id: BucketId, key: &BucketKey) {
        if self.open.get(key) == Some(&id) {
            self.open.remove(key);
        }
        self.archived.entry(key.clone()).or_default().push(id);
    }

    /// Move a bucket from the archived index back to the open index.
    pub(crate) fn mark_reopened(&mut self, id: BucketId, key: &BucketKey) {
        if let Some(list) = self.archived.get_mut(key) {
            list.retain(|&archived_id| archived_id != id);
            if list.is_empty() {
                self.archived.remove(key);
            }
        }
        self.open.insert(key.clone(), id);
    }
}
