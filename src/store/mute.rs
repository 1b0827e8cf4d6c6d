//! Startup gate for observers.
//!
//! A process replaying the road topic from the beginning would otherwise
//! react to every historical document. The runtime wraps its reaction in a
//! muted [`MuteableObserver`], waits for the store to catch up, then unmutes
//! so that only changes committed after startup reach business logic.
//!
//! Toggling is a plain atomic flag. It does not synchronise with a dispatch
//! already in flight on the tailing thread.

use super::observer::ChangeObserver;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Observer decorator that drops notifications while muted.
pub struct MuteableObserver<O> {
    inner: O,
    muted: AtomicBool,
    suppressed: AtomicU64,
}

impl<O> MuteableObserver<O> {
    /// Wrap an observer, initially unmuted.
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            muted: AtomicBool::new(false),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Wrap an observer, initially muted.
    pub fn muted(inner: O) -> Self {
        let observer = Self::new(inner);
        observer.mute();
        observer
    }

    pub fn mute(&self) {
        self.muted.store(true, Ordering::Release);
    }

    pub fn unmute(&self) {
        self.muted.store(false, Ordering::Release);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Notifications dropped while muted.
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    /// The wrapped observer.
    pub fn inner(&self) -> &O {
        &self.inner
    }

    fn gate(&self) -> bool {
        if self.is_muted() {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            false
        } else {
            true
        }
    }
}

impl<K, V, O> ChangeObserver<K, V> for MuteableObserver<O>
where
    O: ChangeObserver<K, V>,
{
    fn handle_new(&self, key: &K, value: &V) {
        if self.gate() {
            self.inner.handle_new(key, value);
        }
    }

    fn handle_update(&self, key: &K, old: &V, new: &V) {
        if self.gate() {
            self.inner.handle_update(key, old, new);
        }
    }

    fn handle_remove(&self, key: &K, old: &V) {
        if self.gate() {
            self.inner.handle_remove(key, old);
        }
    }
}
