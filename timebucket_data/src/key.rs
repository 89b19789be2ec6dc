//! Bucket keys and stripe routing.

use crate::{CollectionId, FieldValue};
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

/// Identity of a series within the catalog: a collection plus the canonical
/// form of the measurement's metadata value.
///
/// Not unique across buckets: multiple buckets share a key across time
/// (rollover) or in the archived set. Metadata documents with identical
/// fields in different order produce equal keys, since objects are held in
/// canonical order by [`FieldValue`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub collection: CollectionId,
    /// `None` when the collection has no metadata field configured, or the
    /// measurement omits it. Distinct from an explicit null metadata value.
    pub metadata: Option<FieldValue>,
}

impl BucketKey {
    pub fn new(collection: CollectionId, metadata: Option<FieldValue>) -> Self {
        Self {
            collection,
            metadata,
        }
    }

    /// Route this key to one of `stripe_count` stripes.
    pub fn stripe(&self, stripe_count: usize) -> usize {
        let mut hasher = XxHash64::with_seed(0);
        self.hash(&mut hasher);
        (hasher.finish() % stripe_count as u64) as usize
    }

    /// Bytes this key holds resident in the catalog.
    pub fn size_estimate(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .metadata
                .as_ref()
                .map(FieldValue::size_estimate)
                .unwrap_or(0)
    }
}
