use crate::redistributor::PairRedistributor;
use crate::{ConcurrentMap, Key};
use rayon::iter::{FromParallelIterator, IntoParallelIterator, ParallelExtend, ParallelIterator};
use std::hash::BuildHasher;

impl<K, V, S, R> ParallelExtend<(K, V)> for ConcurrentMap<K, V, S, R>
where
    K: Key + Send + Sync,
    V: Send + Sync,
    S: BuildHasher + Sync,
    R: PairRedistributor,
{
    // This is of limited use due to the `&mut self` parameter. Extend `&ConcurrentMap` instead.
    fn par_extend<I>(&mut self, par_iter: I)
    where
        I: IntoParallelIterator<Item = (K, V)>,
    {
        (&*self).par_extend(par_iter);
    }
}

impl<K, V, S, R> ParallelExtend<(K, V)> for &ConcurrentMap<K, V, S, R>
where
    K: Key + Send + Sync,
    V: Send + Sync,
    S: BuildHasher + Sync,
    R: PairRedistributor,
{
    /// Keys that fail [`Key::validate`] are skipped.
    fn par_extend<I>(&mut self, par_iter: I)
    where
        I: IntoParallelIterator<Item = (K, V)>,
    {
        let map: &ConcurrentMap<K, V, S, R> = *self;
        par_iter.into_par_iter().for_each(|(k, v)| {
            let _ = map.put(k, v);
        });
    }
}

impl<K, V, S, R> FromParallelIterator<(K, V)> for ConcurrentMap<K, V, S, R>
where
    K: Key + Send + Sync,
    V: Send + Sync,
    S: BuildHasher + Default + Sync,
    R: PairRedistributor + Default,
{
    fn from_par_iter<I>(par_iter: I) -> Self
    where
        I: IntoParallelIterator<Item = (K, V)>,
    {
        let mut created_map = ConcurrentMap::default();
        created_map.par_extend(par_iter);
        created_map
    }
}
