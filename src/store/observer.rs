//! Change notification SPI.
//!
//! Observers are invoked by the store's tailing thread, strictly after the
//! local map has been updated for the record, once per committed record and
//! in log order. They share that thread with replication for every key of
//! the topic, so a slow observer delays everything behind it.

use std::sync::Arc;

/// Receives local map transitions.
pub trait ChangeObserver<K, V>: Send + Sync {
    /// A key appeared (absent or tombstoned before).
    fn handle_new(&self, key: &K, value: &V);

    /// A present key received a new value.
    fn handle_update(&self, key: &K, old: &V, new: &V);

    /// A present key was tombstoned.
    fn handle_remove(&self, key: &K, old: &V);
}

/// Shared observer handle, as held by the store.
pub type SharedObserver<K, V> = Arc<dyn ChangeObserver<K, V>>;

impl<K, V, O> ChangeObserver<K, V> for Arc<O>
where
    O: ChangeObserver<K, V> + ?Sized,
{
    fn handle_new(&self, key: &K, value: &V) {
        (**self).handle_new(key, value);
    }

    fn handle_update(&self, key: &K, old: &V, new: &V) {
        (**self).handle_update(key, old, new);
    }

    fn handle_remove(&self, key: &K, old: &V) {
        (**self).handle_remove(key, old);
    }
}
