use crate::error::{Error, Result};
use crate::node::{Pair, PutResult};
use crate::redistributor::{DefaultPairRedistributor, PairRedistributor};
use crate::segment::Segment;
use crate::{DefaultHashBuilder, Key, DEFAULT_BUCKET_NUMBER, MAX_CONCURRENCY};
use std::borrow::Borrow;
use std::fmt::{self, Debug, Formatter};
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A concurrent hash map split into independently locked segments.
///
/// Every key is routed to exactly one segment by its hash. Segments never move and their number
/// never changes; only the bucket array inside each segment is resized, by the map's
/// [`PairRedistributor`] `R`. See the [crate-level documentation](crate) for details.
pub struct ConcurrentMap<K, V, S = DefaultHashBuilder, R = DefaultPairRedistributor> {
    /// Number of segments. Fixed at construction.
    concurrency: usize,

    segments: Box<[Segment<K, V, R>]>,

    /// Approximate number of entries. Updated outside of any segment lock.
    total: AtomicU64,

    build_hasher: S,
}

/// Number of segments used when none is given.
#[cfg(not(miri))]
fn default_concurrency() -> usize {
    (num_cpus::get() * 4).clamp(1, MAX_CONCURRENCY)
}

#[cfg(miri)]
const fn default_concurrency() -> usize {
    4
}

fn check_concurrency(concurrency: usize) -> Result<()> {
    if concurrency == 0 {
        return Err(Error::illegal_parameter("concurrency is too small"));
    }
    if concurrency > MAX_CONCURRENCY {
        return Err(Error::illegal_parameter(format!(
            "concurrency is too large: {} > {}",
            concurrency, MAX_CONCURRENCY
        )));
    }
    Ok(())
}

impl<K, V> ConcurrentMap<K, V> {
    /// Creates an empty map with four segments per CPU.
    ///
    /// # Examples
    ///
    /// ```
    /// use segmap::ConcurrentMap;
    /// let map: ConcurrentMap<&str, i32> = ConcurrentMap::new();
    /// assert!(map.concurrency() >= 1);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty map with `concurrency` segments.
    ///
    /// Fails with [`Error::IllegalParameter`] unless `1 <= concurrency <= MAX_CONCURRENCY`.
    ///
    /// # Examples
    ///
    /// ```
    /// use segmap::{ConcurrentMap, Error, MAX_CONCURRENCY};
    ///
    /// let map: ConcurrentMap<String, i32> = ConcurrentMap::with_concurrency(16).unwrap();
    /// assert_eq!(map.concurrency(), 16);
    ///
    /// assert!(matches!(
    ///     ConcurrentMap::<String, i32>::with_concurrency(0),
    ///     Err(Error::IllegalParameter { .. })
    /// ));
    /// assert!(ConcurrentMap::<String, i32>::with_concurrency(MAX_CONCURRENCY + 1).is_err());
    /// ```
    pub fn with_concurrency(concurrency: usize) -> Result<Self> {
        Self::with_hasher(concurrency, DefaultHashBuilder::default())
    }
}

impl<K, V, R> ConcurrentMap<K, V, DefaultHashBuilder, R> {
    /// Creates an empty map with `concurrency` segments that all resize according to
    /// `redistributor`.
    ///
    /// # Examples
    ///
    /// ```
    /// use segmap::{ConcurrentMap, DefaultPairRedistributor, DEFAULT_BUCKET_NUMBER};
    ///
    /// let r = DefaultPairRedistributor::new(2.0, DEFAULT_BUCKET_NUMBER);
    /// let map = ConcurrentMap::with_redistributor(8, r).unwrap();
    /// map.put(1u64, "one").unwrap();
    /// ```
    pub fn with_redistributor(concurrency: usize, redistributor: R) -> Result<Self> {
        Self::with_redistributor_and_hasher(concurrency, redistributor, DefaultHashBuilder::default())
    }
}

impl<K, V, S> ConcurrentMap<K, V, S> {
    /// Creates an empty map with `concurrency` segments which will use `hash_builder` to hash
    /// keys.
    ///
    /// Warning: `hash_builder` is normally randomly generated, and is designed to allow the map
    /// to be resistant to attacks that cause many collisions and very poor performance.
    /// Setting it manually using this function can expose a DoS attack vector.
    pub fn with_hasher(concurrency: usize, hash_builder: S) -> Result<Self> {
        Self::with_redistributor_and_hasher(
            concurrency,
            DefaultPairRedistributor::default(),
            hash_builder,
        )
    }
}

impl<K, V, S, R> Default for ConcurrentMap<K, V, S, R>
where
    S: Default,
    R: Default,
{
    fn default() -> Self {
        Self::build(default_concurrency(), R::default(), S::default())
    }
}

impl<K, V, S, R> ConcurrentMap<K, V, S, R> {
    /// Creates an empty map with `concurrency` segments, resized by `redistributor`, hashing keys
    /// with `hash_builder`.
    pub fn with_redistributor_and_hasher(
        concurrency: usize,
        redistributor: R,
        hash_builder: S,
    ) -> Result<Self> {
        check_concurrency(concurrency)?;
        Ok(Self::build(concurrency, redistributor, hash_builder))
    }

    fn build(concurrency: usize, redistributor: R, hash_builder: S) -> Self {
        let redistributor = Arc::new(redistributor);
        Self {
            concurrency,
            segments: (0..concurrency)
                .map(|_| Segment::new(DEFAULT_BUCKET_NUMBER, Arc::clone(&redistributor)))
                .collect(),
            total: AtomicU64::new(0),
            build_hasher: hash_builder,
        }
    }

    /// Returns the number of segments.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the number of entries in the map.
    ///
    /// Insertions and removals that have not yet returned may or may not be counted.
    ///
    /// # Examples
    ///
    /// ```
    /// use segmap::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::new();
    ///
    /// map.put(1, "a").unwrap();
    /// map.put(2, "b").unwrap();
    /// assert_eq!(map.len(), 2);
    /// ```
    pub fn len(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Returns `true` if the map is empty. Otherwise returns `false`.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Picks the segment for a key hash.
    ///
    /// Hashes wider than 32 bits are folded to their upper half first; the upper 16 bits of the
    /// 32-bit result then select the segment.
    #[inline]
    fn segment_index(&self, hash: u64) -> usize {
        if self.concurrency == 1 {
            return 0;
        }
        let hash32 = if hash > u64::from(u32::MAX) {
            (hash >> 32) as u32
        } else {
            hash as u32
        };
        (hash32 >> 16) as usize % self.concurrency
    }

    #[cfg(test)]
    pub(crate) fn bucket_counts(&self) -> Vec<usize> {
        self.segments.iter().map(Segment::bucket_count).collect()
    }

    #[cfg(test)]
    pub(crate) fn segment_lens(&self) -> Vec<u64> {
        self.segments.iter().map(Segment::len).collect()
    }
}

impl<K, V, S, R> ConcurrentMap<K, V, S, R>
where
    S: BuildHasher,
{
    fn hash<Q: ?Sized + Hash>(&self, key: &Q) -> u64 {
        let mut h = self.build_hasher.build_hasher();
        key.hash(&mut h);
        h.finish()
    }
}

impl<K, V, S, R> ConcurrentMap<K, V, S, R>
where
    K: Key,
    S: BuildHasher,
    R: PairRedistributor,
{
    /// Tests if `key` is a key in this map.
    ///
    /// The key may be any borrowed form of the map's key type, but `Hash` and `Eq` on the
    /// borrowed form must match those for the key type.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get_and(key, |_| ()).is_some()
    }

    /// Returns a clone of the value to which `key` is mapped.
    ///
    /// Returns `None` if this map contains no mapping for the key.
    ///
    /// # Examples
    ///
    /// ```
    /// use segmap::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::new();
    /// map.put(String::from("k"), vec![1, 2]).unwrap();
    /// assert_eq!(map.get("k"), Some(vec![1, 2]));
    /// assert_eq!(map.get("missing"), None);
    /// ```
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        V: Clone,
    {
        self.get_and(key, V::clone)
    }

    /// Runs `then` on the value to which `key` is mapped, and returns its result.
    ///
    /// The segment holding `key` stays read-locked while `then` runs, so writers to that segment
    /// wait for it. Keep `then` short, and never touch the map from inside it.
    ///
    /// # Examples
    ///
    /// ```
    /// use segmap::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::new();
    /// map.put("k", String::from("hello")).unwrap();
    /// assert_eq!(map.get_and("k", |v| v.len()), Some(5));
    /// ```
    pub fn get_and<Q, T, F>(&self, key: &Q, then: F) -> Option<T>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        F: FnOnce(&V) -> T,
    {
        let h = self.hash(key);
        self.segments[self.segment_index(h)].get_and(h, key, then)
    }

    fn put_pair(&self, key: K, value: V) -> Result<PutResult<V>> {
        key.validate()?;
        let h = self.hash(&key);
        let result = self.segments[self.segment_index(h)].put(Box::new(Pair::new(key, value, h)));
        if result.is_inserted() {
            self.total.fetch_add(1, Ordering::SeqCst);
        }
        Ok(result)
    }

    /// Maps `key` to `value`.
    ///
    /// Returns `Ok(true)` if the key was not in the map before, and `Ok(false)` if an existing
    /// value was replaced. Fails with [`Error::InvalidKey`] if `key` does not pass
    /// [`Key::validate`].
    ///
    /// # Examples
    ///
    /// ```
    /// use segmap::{ConcurrentMap, Error};
    ///
    /// let map = ConcurrentMap::new();
    /// assert_eq!(map.put("a", 1), Ok(true));
    /// assert_eq!(map.put("a", 2), Ok(false));
    /// assert!(matches!(map.put("", 3), Err(Error::InvalidKey { .. })));
    /// assert_eq!(map.len(), 1);
    /// ```
    pub fn put(&self, key: K, value: V) -> Result<bool> {
        Ok(self.put_pair(key, value)?.is_inserted())
    }

    /// Maps `key` to `value`, returning the value that was replaced, if any.
    ///
    /// # Examples
    ///
    /// ```
    /// use segmap::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::new();
    /// assert_eq!(map.insert(37, "a"), Ok(None));
    /// assert_eq!(map.insert(37, "b"), Ok(Some("a")));
    /// assert_eq!(map.get(&37), Some("b"));
    /// ```
    pub fn insert(&self, key: K, value: V) -> Result<Option<V>> {
        Ok(self.put_pair(key, value)?.before())
    }

    /// Removes `key` from the map, returning the value it was mapped to.
    ///
    /// The key may be any borrowed form of the map's key type, but `Hash` and `Eq` on the
    /// borrowed form must match those for the key type.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let h = self.hash(key);
        let removed = self.segments[self.segment_index(h)].delete(h, key)?;
        self.total.fetch_sub(1, Ordering::SeqCst);
        Some(removed)
    }

    /// Removes `key` from the map. Returns `true` if it was there.
    ///
    /// # Examples
    ///
    /// ```
    /// use segmap::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::new();
    /// map.put(1, "a").unwrap();
    /// assert!(map.delete(&1));
    /// assert!(!map.delete(&1));
    /// ```
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.remove(key).is_some()
    }

    pub(crate) fn put_all<I: Iterator<Item = (K, V)>>(&self, iter: I) {
        for (key, value) in iter {
            // there is no way to report an invalid key from here
            let _ = self.put_pair(key, value);
        }
    }
}

impl<K, V, S, R> Debug for ConcurrentMap<K, V, S, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentMap")
            .field("concurrency", &self.concurrency)
            .field("len", &self.len())
            .field("segments", &self.segments)
            .finish()
    }
}

impl<K, V, S, R> Extend<(K, V)> for &ConcurrentMap<K, V, S, R>
where
    K: Key,
    S: BuildHasher,
    R: PairRedistributor,
{
    /// Keys that fail [`Key::validate`] are skipped.
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        (*self).put_all(iter.into_iter());
    }
}

impl<K, V, S, R> FromIterator<(K, V)> for ConcurrentMap<K, V, S, R>
where
    K: Key,
    S: BuildHasher + Default,
    R: PairRedistributor + Default,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let map = Self::default();
        map.put_all(iter.into_iter());
        map
    }
}
