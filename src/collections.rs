//! Hash collections used by the registries
//!
//! The `gxhash` feature (on by default) switches every map in the crate to the
//! gxhash hasher. Without it, std's `RandomState` is used so the crate builds on
//! CPUs lacking AES-NI/SSE2.

use dashmap::DashMap;

#[cfg(feature = "gxhash")]
pub use gxhash::{GxBuildHasher, HashSet, HashSetExt};

#[cfg(not(feature = "gxhash"))]
pub use std::collections::HashSet;

/// Hasher type that uses gxhash when available, std otherwise
#[cfg(not(feature = "gxhash"))]
pub type GxBuildHasher = std::hash::RandomState;

/// Extension trait for creating HashSet instances
#[cfg(not(feature = "gxhash"))]
pub trait HashSetExt {
    fn with_capacity(capacity: usize) -> Self;
}

#[cfg(not(feature = "gxhash"))]
impl<T> HashSetExt for HashSet<T> {
    fn with_capacity(capacity: usize) -> Self {
        HashSet::with_capacity_and_hasher(capacity, Default::default())
    }
}

/// Concurrent map with the crate-wide hasher
pub type ConcurrentMap<K, V> = DashMap<K, V, GxBuildHasher>;

/// Create an empty [`ConcurrentMap`]
pub fn concurrent_map<K, V>() -> ConcurrentMap<K, V>
where
    K: Eq + std::hash::Hash,
{
    DashMap::with_hasher(GxBuildHasher::default())
}
