use crate::node::{Bucket, Pair, PutResult};
use crate::redistributor::{BucketStatus, PairRedistributor};
use parking_lot::RwLock;
use std::borrow::Borrow;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

/// Everything a segment's lock protects.
struct Table<K, V> {
    /// Current bucket array. Replaced wholesale, under the write lock, on redistribution.
    buckets: Vec<Bucket<K, V>>,

    /// Number of live pairs across all buckets.
    pair_total: u64,
}

impl<K, V> Table<K, V> {
    #[inline]
    fn bini(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }
}

/// One independently locked shard of a [`ConcurrentMap`](crate::ConcurrentMap).
///
/// Lookups take the read lock. Insertions and removals take the write lock and, while still
/// holding it, let the redistributor rebuild the bucket array if the touched bucket says so.
pub(crate) struct Segment<K, V, R> {
    table: RwLock<Table<K, V>>,
    redistributor: Arc<R>,
}

impl<K, V, R> Segment<K, V, R> {
    pub(crate) fn new(bucket_number: usize, redistributor: Arc<R>) -> Self {
        let bucket_number = bucket_number.max(1);
        Self {
            table: RwLock::new(Table {
                buckets: (0..bucket_number).map(|_| Bucket::new()).collect(),
                pair_total: 0,
            }),
            redistributor,
        }
    }

    /// Number of live pairs in this segment.
    pub(crate) fn len(&self) -> u64 {
        self.table.read().pair_total
    }

    /// Current size of this segment's bucket array.
    pub(crate) fn bucket_count(&self) -> usize {
        self.table.read().buckets.len()
    }
}

impl<K, V, R> Segment<K, V, R>
where
    K: Eq,
    R: PairRedistributor,
{
    /// Stores `pair`, replacing the value of an existing pair with the same key.
    pub(crate) fn put(&self, pair: Box<Pair<K, V>>) -> PutResult<V> {
        let mut table = self.table.write();
        let bini = table.bini(pair.hash);
        let result = table.buckets[bini].put(pair);
        if result.is_inserted() {
            table.pair_total += 1;
            let bucket_size = table.buckets[bini].size();
            self.redistribute(&mut table, bucket_size);
        }
        result
    }

    /// Runs `then` on the value for `key`, with the read lock held.
    pub(crate) fn get_and<Q, T, F>(&self, hash: u64, key: &Q, then: F) -> Option<T>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        F: FnOnce(&V) -> T,
    {
        let table = self.table.read();
        let bini = table.bini(hash);
        table.buckets[bini].get(hash, key).map(|p| then(p.value()))
    }

    /// Unlinks the pair for `key` and returns its value.
    pub(crate) fn delete<Q>(&self, hash: u64, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let mut table = self.table.write();
        let bini = table.bini(hash);
        let removed = table.buckets[bini].delete(hash, key)?;
        table.pair_total -= 1;
        let bucket_size = table.buckets[bini].size();
        self.redistribute(&mut table, bucket_size);
        Some(removed.into_value())
    }

    fn redistribute(&self, table: &mut Table<K, V>, bucket_size: usize) {
        let r = &*self.redistributor;
        r.update_threshold(table.pair_total, table.buckets.len());
        let status = match r.check_bucket_status(table.pair_total, bucket_size as u64) {
            // a bucket that is not overweight is a chance to shrink; whether that happens is up
            // to the empty buckets the redistributor has counted so far
            BucketStatus::Normal => BucketStatus::Underweight,
            status => status,
        };
        if r.redistribute(status, &mut table.buckets) {
            r.update_threshold(table.pair_total, table.buckets.len());
        }
    }
}

impl<K, V, R> Debug for Segment<K, V, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("pair_total", &self.len())
            .field("bucket_count", &self.bucket_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redistributor::{DefaultPairRedistributor, FixedPairRedistributor};
    use crate::DEFAULT_BUCKET_NUMBER;

    fn pair(key: u64, value: u64) -> Box<Pair<u64, u64>> {
        // the key doubles as its own hash so placement is easy to predict
        Box::new(Pair::new(key, value, key))
    }

    #[test]
    fn put_get_delete() {
        let s = Segment::new(DEFAULT_BUCKET_NUMBER, Arc::new(DefaultPairRedistributor::default()));
        assert!(s.put(pair(1, 10)).is_inserted());
        assert!(s.put(pair(17, 170)).is_inserted());
        assert_eq!(s.put(pair(1, 11)), PutResult::Replaced { old: 10 });
        assert_eq!(s.len(), 2);

        assert_eq!(s.get_and(1, &1, |v| *v), Some(11));
        assert_eq!(s.get_and(17, &17, |v| *v), Some(170));
        assert_eq!(s.get_and(2, &2, |v| *v), None);

        assert_eq!(s.delete(1, &1), Some(11));
        assert_eq!(s.delete(1, &1), None);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn zero_buckets_becomes_one() {
        let s: Segment<u64, u64, _> = Segment::new(0, Arc::new(FixedPairRedistributor));
        assert_eq!(s.bucket_count(), 1);
    }

    #[test]
    fn chain_past_max_size_doubles() {
        // a huge load factor leaves only the absolute chain ceiling to trigger growth
        let s = Segment::new(
            DEFAULT_BUCKET_NUMBER,
            Arc::new(DefaultPairRedistributor::new(100.0, DEFAULT_BUCKET_NUMBER)),
        );
        let n = DEFAULT_BUCKET_NUMBER as u64;

        // every key lands in bucket 0; the ceiling is passed at the 1001st pair and growth needs
        // a quarter of the 16 buckets flagged
        for i in 0..1_003 {
            assert!(s.put(pair(i * n, i)).is_inserted());
        }
        assert_eq!(s.bucket_count(), DEFAULT_BUCKET_NUMBER);

        assert!(s.put(pair(1_003 * n, 1_003)).is_inserted());
        assert_eq!(s.bucket_count(), 2 * DEFAULT_BUCKET_NUMBER);

        for i in 0..1_004 {
            assert_eq!(s.get_and(i * n, &(i * n), |v| *v), Some(i));
        }
        assert_eq!(s.len(), 1_004);
    }

    #[test]
    fn replacement_does_not_count_as_overweight() {
        let r = Arc::new(DefaultPairRedistributor::new(100.0, DEFAULT_BUCKET_NUMBER));
        let s = Segment::new(DEFAULT_BUCKET_NUMBER, r);
        let n = DEFAULT_BUCKET_NUMBER as u64;
        for i in 0..1_001 {
            s.put(pair(i * n, i));
        }
        for _ in 0..100 {
            assert!(!s.put(pair(0, 0)).is_inserted());
        }
        assert_eq!(s.bucket_count(), DEFAULT_BUCKET_NUMBER);
    }

    #[test]
    fn quarter_empty_halves_large_segment() {
        let s = Segment::new(128, Arc::new(DefaultPairRedistributor::default()));
        for i in 0..512 {
            s.put(pair(i, i));
        }
        assert_eq!(s.bucket_count(), 128);

        // bucket b holds b, b + 128, b + 256 and b + 384; empty buckets 0..32 one at a time
        for b in 0..31 {
            for k in [b, b + 128, b + 256, b + 384] {
                assert_eq!(s.delete(k, &k), Some(k));
            }
        }
        assert_eq!(s.bucket_count(), 128);
        for k in [31, 159, 287, 415] {
            s.delete(k, &k);
        }
        assert_eq!(s.bucket_count(), 64);

        for k in 32..128 {
            for k in [k, k + 128, k + 256, k + 384] {
                assert_eq!(s.get_and(k, &k, |v| *v), Some(k));
            }
        }
        assert_eq!(s.len(), 512 - 32 * 4);

        // 64 buckets is below the shrink floor
        for k in 32..512 {
            if k % 128 >= 32 {
                s.delete(k, &k);
            }
        }
        assert_eq!(s.len(), 0);
        assert_eq!(s.bucket_count(), 64);
    }

    #[test]
    fn fixed_policy_keeps_bucket_count() {
        let s = Segment::new(4, Arc::new(FixedPairRedistributor));
        for i in 0..10_000 {
            s.put(pair(i, i));
        }
        assert_eq!(s.bucket_count(), 4);
        assert_eq!(s.len(), 10_000);
    }
}
