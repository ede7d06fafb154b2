//! A segmented concurrent hash map whose segments resize themselves.
//!
//! The map is split into a fixed number of _segments_ (its "concurrency"), each guarded by its
//! own reader-writer lock. A key is hashed once, the hash picks the segment, and the segment
//! picks a bucket: a singly-linked chain of the pairs whose hashes share that bucket index.
//! Operations on different segments never contend with one another, so at most
//! `1/concurrency` of the keyspace is behind any one lock.
//!
//! ```
//! use segmap::ConcurrentMap;
//!
//! let map = ConcurrentMap::with_concurrency(4).unwrap();
//! assert_eq!(map.put("a", 1), Ok(true));
//! assert_eq!(map.put("a", 2), Ok(false));
//! assert_eq!(map.get("a"), Some(2));
//! assert!(map.delete("a"));
//! assert!(!map.delete("a"));
//! assert!(map.is_empty());
//! ```
//!
//! # Resizing behavior
//!
//! Each segment starts with [`DEFAULT_BUCKET_NUMBER`] buckets. After every insertion of a new key
//! and every removal, the segment asks its [`PairRedistributor`] whether its bucket array should
//! change size, and if so rebuilds it before releasing its write lock. Readers therefore never see
//! a bucket array in the middle of a rebuild, but the insertion or removal that triggers one takes
//! longer than usual.
//!
//! The [`DefaultPairRedistributor`] grows a segment when a quarter of its buckets have been seen
//! with overlong chains since the last rebuild, and shrinks it (never below 2 buckets, and only
//! from 100 buckets or more) when a quarter of them have been seen empty. Requiring a fraction of
//! the buckets to qualify keeps one unlucky chain from thrashing the segment. Use
//! [`FixedPairRedistributor`] to turn resizing off, or implement [`PairRedistributor`] for a
//! policy of your own. A single redistributor instance is shared by all segments of a map.
//!
//! # Length
//!
//! [`ConcurrentMap::len`] reads a counter that is updated _after_ the segment lock has been
//! released. It reflects every completed insertion and removal, but may miss ones that are still
//! in flight.
//!
//! # Keys
//!
//! Keys implement [`Key`], which adds a validity check to `Hash + Eq`. Empty strings and empty
//! byte strings are rejected with [`Error::InvalidKey`]; every value of the integer types is
//! accepted.
#![deny(
    missing_docs,
    missing_debug_implementations,
    unreachable_pub,
    rustdoc::broken_intra_doc_links
)]
#![warn(rust_2018_idioms)]

mod error;
mod map;
mod node;
mod redistributor;
mod segment;

#[cfg(feature = "rayon")]
mod rayon_impls;

pub use error::{Error, Result};
pub use map::ConcurrentMap;
pub use node::{Bucket, Pair, Pairs, PutResult};
pub use redistributor::{
    rebucket, BucketStatus, DefaultPairRedistributor, FixedPairRedistributor, PairRedistributor,
};

use std::hash::Hash;
use std::rc::Rc;
use std::sync::Arc;

/// Default hasher for [`ConcurrentMap`].
pub type DefaultHashBuilder = ahash::RandomState;

/// The largest number of segments a map may have.
pub const MAX_CONCURRENCY: usize = 65536;

/// The number of buckets each segment starts out with.
pub const DEFAULT_BUCKET_NUMBER: usize = 16;

/// The load factor used when none, or a non-positive one, is given.
pub const DEFAULT_BUCKET_LOAD_FACTOR: f64 = 0.75;

/// A chain longer than this is overweight no matter what the load factor says.
pub const DEFAULT_BUCKET_MAX_SIZE: u64 = 1000;

/// Types usable as [`ConcurrentMap`] keys.
pub trait Key: Hash + Eq {
    /// Checks that this key may be stored.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

const EMPTY_KEY: Error = Error::InvalidKey {
    reason: "empty key",
};

impl Key for str {
    fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(EMPTY_KEY);
        }
        Ok(())
    }
}

impl Key for [u8] {
    fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(EMPTY_KEY);
        }
        Ok(())
    }
}

impl Key for String {
    fn validate(&self) -> Result<()> {
        self.as_str().validate()
    }
}

impl Key for Vec<u8> {
    fn validate(&self) -> Result<()> {
        self.as_slice().validate()
    }
}

macro_rules! forward_key {
    ($($t:ty),*) => {
        $(
            impl<T: Key + ?Sized> Key for $t {
                fn validate(&self) -> Result<()> {
                    (**self).validate()
                }
            }
        )*
    };
}

forward_key!(&T, Box<T>, Rc<T>, Arc<T>);

macro_rules! always_valid_key {
    ($($t:ty),*) => {
        $(impl Key for $t {})*
    };
}

always_valid_key!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, char, bool);
