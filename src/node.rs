use std::borrow::Borrow;
use std::fmt::{self, Debug, Formatter};

/// Key-value entry.
///
/// The hash of the key is computed once, when the pair is created, and is used both to route the
/// pair to a segment and to place it in one of that segment's buckets.
pub struct Pair<K, V> {
    pub(crate) hash: u64,
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) next: Option<Box<Pair<K, V>>>,
}

impl<K, V> Pair<K, V> {
    pub(crate) fn new(key: K, value: V, hash: u64) -> Self {
        Self {
            hash,
            key,
            value,
            next: None,
        }
    }

    /// The key of this pair.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The value currently stored in this pair.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// The precomputed hash of [`Pair::key`].
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// The next pair in the same bucket chain, if any.
    pub fn next(&self) -> Option<&Pair<K, V>> {
        self.next.as_deref()
    }

    /// Unlink and return the rest of the chain following this pair.
    pub fn take_next(&mut self) -> Option<Box<Pair<K, V>>> {
        self.next.take()
    }

    pub(crate) fn into_value(self) -> V {
        self.value
    }
}

impl<K, V> Debug for Pair<K, V>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pair")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("hash", &self.hash)
            .finish()
    }
}

/// The outcome of [`Bucket::put`].
#[derive(Eq, PartialEq, Clone, Debug)]
pub enum PutResult<V> {
    /// The key was not present, and a new pair was linked into the bucket.
    Inserted,
    /// The key was present; its value was swapped for the new one.
    Replaced {
        /// The value that was stored before.
        old: V,
    },
}

impl<V> PutResult<V> {
    /// Returns `true` if a new pair was linked into the bucket.
    pub fn is_inserted(&self) -> bool {
        matches!(self, PutResult::Inserted)
    }

    pub(crate) fn before(self) -> Option<V> {
        match self {
            PutResult::Inserted => None,
            PutResult::Replaced { old } => Some(old),
        }
    }
}

/// A singly-linked chain of pairs that share a bucket index.
///
/// The bucket owns the head of its chain and every pair owns the pair that follows it.
pub struct Bucket<K, V> {
    head: Option<Box<Pair<K, V>>>,
    size: usize,
}

impl<K, V> Default for Bucket<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Bucket<K, V> {
    /// Creates an empty bucket.
    pub fn new() -> Self {
        Self {
            head: None,
            size: 0,
        }
    }

    /// The number of pairs in the chain.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns `true` if the chain holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// The first pair in the chain. Follow [`Pair::next`] to walk the rest.
    pub fn first_pair(&self) -> Option<&Pair<K, V>> {
        self.head.as_deref()
    }

    /// An iterator over the pairs in chain order.
    pub fn iter(&self) -> Pairs<'_, K, V> {
        Pairs {
            next: self.first_pair(),
        }
    }

    /// Links `pair` in at the head of the chain without looking for an existing pair with the
    /// same key.
    ///
    /// The caller must know that the key is not already in this bucket, as is the case when
    /// moving pairs out of another bucket array.
    pub fn push(&mut self, mut pair: Box<Pair<K, V>>) {
        pair.next = self.head.take();
        self.head = Some(pair);
        self.size += 1;
    }

    /// Detaches the whole chain, leaving the bucket empty.
    ///
    /// The detached chain is handed back so the caller can relink its pairs elsewhere; dropping
    /// it releases them.
    pub fn clear(&mut self) -> Option<Box<Pair<K, V>>> {
        self.size = 0;
        self.head.take()
    }
}

impl<K, V> Bucket<K, V>
where
    K: Eq,
{
    /// Stores `pair` in this bucket.
    ///
    /// If a pair with the same key is already linked, only its value is replaced and the old
    /// value is returned. Otherwise `pair` is linked in at the head of the chain.
    pub fn put(&mut self, pair: Box<Pair<K, V>>) -> PutResult<V> {
        let mut p = self.head.as_deref_mut();
        while let Some(n) = p {
            if n.hash == pair.hash && n.key == pair.key {
                let Pair { value, .. } = *pair;
                let old = std::mem::replace(&mut n.value, value);
                return PutResult::Replaced { old };
            }
            p = n.next.as_deref_mut();
        }

        self.push(pair);
        PutResult::Inserted
    }

    /// Finds the pair for `key`, whose hash is `hash`.
    pub fn get<Q>(&self, hash: u64, key: &Q) -> Option<&Pair<K, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.iter()
            .find(|n| n.hash == hash && n.key.borrow() == key)
    }

    /// Unlinks the first pair for `key` and hands it back.
    pub fn delete<Q>(&mut self, hash: u64, key: &Q) -> Option<Box<Pair<K, V>>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let mut slot = &mut self.head;
        while slot
            .as_ref()
            .map_or(false, |n| n.hash != hash || n.key.borrow() != key)
        {
            slot = &mut slot.as_mut()?.next;
        }

        let mut removed = slot.take()?;
        *slot = removed.next.take();
        self.size -= 1;
        Some(removed)
    }
}

impl<K, V> Drop for Bucket<K, V> {
    fn drop(&mut self) {
        // unlink one pair at a time so long chains do not recurse through Box::drop
        let mut p = self.head.take();
        while let Some(mut n) = p {
            p = n.next.take();
        }
    }
}

impl<K, V> Debug for Bucket<K, V>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over the pairs of a [`Bucket`], created by [`Bucket::iter`].
#[derive(Debug)]
pub struct Pairs<'b, K, V> {
    next: Option<&'b Pair<K, V>>,
}

impl<'b, K, V> Iterator for Pairs<'b, K, V> {
    type Item = &'b Pair<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.next?;
        self.next = n.next();
        Some(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(key: &'static str, value: usize, hash: u64) -> Box<Pair<&'static str, usize>> {
        Box::new(Pair::new(key, value, hash))
    }

    #[test]
    fn put_into_empty() {
        let mut b = Bucket::new();
        assert!(b.is_empty());
        assert_eq!(b.put(pair("a", 1, 7)), PutResult::Inserted);
        assert_eq!(b.size(), 1);
        assert_eq!(b.get(7, "a").map(Pair::value), Some(&1));
    }

    #[test]
    fn put_replaces_value() {
        let mut b = Bucket::new();
        b.put(pair("a", 1, 7));
        b.put(pair("b", 2, 7));
        assert_eq!(b.put(pair("a", 3, 7)), PutResult::Replaced { old: 1 });
        assert_eq!(b.size(), 2);
        assert_eq!(b.get(7, "a").map(Pair::value), Some(&3));
    }

    #[test]
    fn same_key_different_hash_is_not_a_match() {
        let mut b = Bucket::new();
        b.put(pair("a", 1, 7));
        assert!(b.get(8, "a").is_none());
        assert!(b.delete(8, "a").is_none());
        assert_eq!(b.size(), 1);
    }

    #[test]
    fn delete_head_middle_tail() {
        let mut b = Bucket::new();
        // pushed at the head, so the chain reads tail, middle, head
        b.put(pair("head", 0, 1));
        b.put(pair("middle", 10, 1));
        b.put(pair("tail", 100, 1));
        let keys: Vec<_> = b.iter().map(|n| *n.key()).collect();
        assert_eq!(keys, ["tail", "middle", "head"]);

        assert_eq!(b.delete(1, "middle").map(|n| n.into_value()), Some(10));
        assert_eq!(b.delete(1, "head").map(|n| n.into_value()), Some(0));
        assert_eq!(b.delete(1, "tail").map(|n| n.into_value()), Some(100));
        assert!(b.delete(1, "tail").is_none());
        assert!(b.is_empty());
        assert_eq!(b.size(), 0);
    }

    #[test]
    fn traversal_and_clear() {
        let mut b = Bucket::new();
        for (i, k) in ["x", "y", "z"].into_iter().enumerate() {
            b.put(pair(k, i, 3));
        }

        let mut seen = 0;
        let mut p = b.first_pair();
        while let Some(n) = p {
            seen += 1;
            p = n.next();
        }
        assert_eq!(seen, 3);

        let mut chain = b.clear();
        assert!(b.is_empty());
        assert_eq!(b.size(), 0);

        let mut detached = 0;
        while let Some(mut n) = chain {
            chain = n.take_next();
            assert!(n.next().is_none());
            detached += 1;
        }
        assert_eq!(detached, 3);
    }

    #[test]
    fn drop_long_chain() {
        let mut b = Bucket::new();
        for i in 0..200_000usize {
            b.push(Box::new(Pair::new(i, i, 0)));
        }
        assert_eq!(b.size(), 200_000);
        drop(b);
    }
}
