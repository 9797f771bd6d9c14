//! Client-side read cache: query results keyed by [`QueryKey`], mutated in
//! place by sync events instead of being refetched.

mod collection;
mod key;
mod memory;

pub use collection::Collection;
pub use key::QueryKey;
pub use memory::MemoryCache;

/// Store consumed by the cache synchronizers.
///
/// Implementations never fetch: `set` only touches collections that were
/// populated earlier by the REST layer.
pub trait ReadCache: Send + Sync {
    fn get(&self, key: &QueryKey) -> Option<Collection>;

    /// Replace the collection at `key` with `updater(current)`.
    /// Returns `false` and does nothing when the key is not populated.
    fn set(&self, key: &QueryKey, updater: &mut dyn FnMut(Collection) -> Collection) -> bool;
}
