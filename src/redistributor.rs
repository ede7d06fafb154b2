//! Bucket-array resizing policy for segments.
//!
//! Every insertion or removal in a segment asks its [`PairRedistributor`] three things, in order:
//! refresh the overweight threshold from the segment's current load, classify the bucket the
//! operation touched, and decide whether the segment's bucket array should be rebuilt. The
//! rebuild itself runs under the segment's write lock, so no reader ever sees a half-moved
//! bucket array.

use crate::node::Bucket;
use crate::{DEFAULT_BUCKET_LOAD_FACTOR, DEFAULT_BUCKET_MAX_SIZE, DEFAULT_BUCKET_NUMBER};
use log::{debug, trace};
use std::sync::atomic::{AtomicU64, Ordering};

/// Average pair count per bucket below which the threshold stops following the actual load.
const MIN_AVERAGE_LOAD: u64 = 100;

/// Bucket arrays smaller than this are never shrunk.
const MIN_SHRINK_BUCKET_NUMBER: u64 = 100;

/// A shrunk bucket array never has fewer buckets than this.
const MIN_BUCKET_NUMBER: u64 = 2;

/// Load classification of a single bucket.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BucketStatus {
    /// Nothing to do.
    Normal,
    /// The segment may have more buckets than it needs.
    Underweight,
    /// The bucket's chain is longer than the current threshold allows.
    Overweight,
}

/// Policy deciding when and how a segment's bucket array changes size.
///
/// One instance may be shared by every segment of a map, so implementations must be usable
/// through `&self` from many threads at once.
pub trait PairRedistributor: Send + Sync {
    /// Recomputes the overweight threshold from a segment holding `pair_total` pairs in
    /// `bucket_number` buckets.
    fn update_threshold(&self, pair_total: u64, bucket_number: usize);

    /// Classifies a bucket that now holds `bucket_size` pairs, in a segment holding `pair_total`.
    fn check_bucket_status(&self, pair_total: u64, bucket_size: u64) -> BucketStatus;

    /// Rebuilds `buckets` if `status` and the accumulated observations call for it.
    ///
    /// Returns `true` if the bucket array changed size. Every pair must end up in the bucket at
    /// `hash % buckets.len()`, exactly once.
    fn redistribute<K, V>(&self, status: BucketStatus, buckets: &mut Vec<Bucket<K, V>>) -> bool;
}

/// Moves every pair in `buckets` into a bucket array of `new_number` buckets.
///
/// Growing reuses the existing buckets and appends empty ones; shrinking allocates a fresh array.
/// Either way each pair is moved exactly once, into the bucket at `hash % new_number`.
pub fn rebucket<K, V>(buckets: &mut Vec<Bucket<K, V>>, new_number: usize) {
    assert_ne!(new_number, 0, "a bucket array needs at least one bucket");

    let total = buckets.iter().map(Bucket::size).sum();
    let mut pairs = Vec::with_capacity(total);
    for b in buckets.iter_mut() {
        let mut chain = b.clear();
        while let Some(mut p) = chain {
            chain = p.take_next();
            pairs.push(p);
        }
    }

    if new_number > buckets.len() {
        buckets.resize_with(new_number, Bucket::new);
    } else {
        *buckets = (0..new_number).map(|_| Bucket::new()).collect();
    }

    for p in pairs {
        let bini = (p.hash % new_number as u64) as usize;
        buckets[bini].push(p);
    }
}

/// The default policy: double a segment's buckets once enough of them have been seen overweight,
/// and halve them once enough of them have been seen empty.
///
/// A bucket is overweight when its chain is longer than [`DEFAULT_BUCKET_MAX_SIZE`], or longer
/// than the average load (at least 100) times the load factor. Growth needs a quarter of the
/// segment's buckets to have been flagged overweight since the last rebuild; shrinking needs a
/// quarter to have been seen empty, and only applies to segments with at least 100 buckets.
#[derive(Debug)]
pub struct DefaultPairRedistributor {
    load_factor: f64,
    upper_threshold: AtomicU64,
    overweight_bucket_count: AtomicU64,
    empty_bucket_count: AtomicU64,
}

impl Default for DefaultPairRedistributor {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_LOAD_FACTOR, DEFAULT_BUCKET_NUMBER)
    }
}

impl DefaultPairRedistributor {
    /// Creates a redistributor for segments that start out with `bucket_number` buckets.
    ///
    /// A `load_factor` that is not strictly positive is replaced by
    /// [`DEFAULT_BUCKET_LOAD_FACTOR`].
    pub fn new(load_factor: f64, bucket_number: usize) -> Self {
        let load_factor = if load_factor > 0.0 {
            load_factor
        } else {
            DEFAULT_BUCKET_LOAD_FACTOR
        };

        let r = Self {
            load_factor,
            upper_threshold: AtomicU64::new(0),
            overweight_bucket_count: AtomicU64::new(0),
            empty_bucket_count: AtomicU64::new(0),
        };
        r.update_threshold(0, bucket_number);
        r
    }

    /// The load factor in use.
    pub fn load_factor(&self) -> f64 {
        self.load_factor
    }

    /// The chain length above which a bucket is considered overweight.
    pub fn upper_threshold(&self) -> u64 {
        self.upper_threshold.load(Ordering::SeqCst)
    }

    fn reset_counts(&self) {
        self.overweight_bucket_count.store(0, Ordering::SeqCst);
        self.empty_bucket_count.store(0, Ordering::SeqCst);
    }
}

impl PairRedistributor for DefaultPairRedistributor {
    fn update_threshold(&self, pair_total: u64, bucket_number: usize) {
        let average = pair_total
            .checked_div(bucket_number as u64)
            .unwrap_or(0)
            .max(MIN_AVERAGE_LOAD);
        let threshold = (average as f64 * self.load_factor) as u64;
        self.upper_threshold.store(threshold, Ordering::SeqCst);
        trace!(
            "bucket count: pair_total={} bucket_number={} average={} upper_threshold={} empty_bucket_count={}",
            pair_total,
            bucket_number,
            average,
            threshold,
            self.empty_bucket_count.load(Ordering::SeqCst)
        );
    }

    fn check_bucket_status(&self, pair_total: u64, bucket_size: u64) -> BucketStatus {
        let status = if bucket_size > DEFAULT_BUCKET_MAX_SIZE
            || bucket_size > self.upper_threshold.load(Ordering::SeqCst)
        {
            self.overweight_bucket_count.fetch_add(1, Ordering::SeqCst);
            BucketStatus::Overweight
        } else {
            if bucket_size == 0 {
                self.empty_bucket_count.fetch_add(1, Ordering::SeqCst);
            }
            BucketStatus::Normal
        };

        trace!(
            "check bucket status: pair_total={} bucket_size={} upper_threshold={} overweight_bucket_count={} empty_bucket_count={} status={:?}",
            pair_total,
            bucket_size,
            self.upper_threshold.load(Ordering::SeqCst),
            self.overweight_bucket_count.load(Ordering::SeqCst),
            self.empty_bucket_count.load(Ordering::SeqCst),
            status
        );
        status
    }

    fn redistribute<K, V>(&self, status: BucketStatus, buckets: &mut Vec<Bucket<K, V>>) -> bool {
        let current = buckets.len() as u64;
        let new_number = match status {
            BucketStatus::Overweight => {
                if self.overweight_bucket_count.load(Ordering::SeqCst) * 4 < current {
                    return false;
                }
                current << 1
            }
            BucketStatus::Underweight => {
                if current < MIN_SHRINK_BUCKET_NUMBER
                    || self.empty_bucket_count.load(Ordering::SeqCst) * 4 < current
                {
                    return false;
                }
                (current >> 1).max(MIN_BUCKET_NUMBER)
            }
            BucketStatus::Normal => return false,
        };

        if new_number == current {
            self.reset_counts();
            return false;
        }

        debug!(
            "redistributing: status={:?} current_number={} new_number={}",
            status, current, new_number
        );
        rebucket(buckets, new_number as usize);
        self.reset_counts();
        true
    }
}

/// A policy that never resizes: every segment keeps the bucket count it was created with.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedPairRedistributor;

impl PairRedistributor for FixedPairRedistributor {
    fn update_threshold(&self, _pair_total: u64, _bucket_number: usize) {}

    fn check_bucket_status(&self, _pair_total: u64, _bucket_size: u64) -> BucketStatus {
        BucketStatus::Normal
    }

    fn redistribute<K, V>(&self, _status: BucketStatus, _buckets: &mut Vec<Bucket<K, V>>) -> bool {
        false
    }
}
