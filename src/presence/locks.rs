// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Keyed serialization for devices and device identities.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::device::DeviceId;

/// One lazily created async mutex per key.
///
/// Operations on different keys never contend. An entry only lives while
/// someone holds or waits for it: the last [`KeyGuard`] to drop removes it,
/// so lookups of unknown keys leave nothing behind.
#[derive(Debug)]
pub(crate) struct KeyedLocks<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

/// Per-device locks held across a device's read-modify-write.
pub(crate) type DeviceLocks = KeyedLocks<DeviceId>;

/// Locks on the serial numbers and MAC addresses a registration matches by.
pub(crate) type IdentityLocks = KeyedLocks<String>;

impl<K: Eq + Hash> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`.
    pub(crate) async fn lock(&self, key: K) -> KeyGuard<'_, K> {
        // Clone the Arc out so the shard lock is released before awaiting.
        let mutex = Arc::clone(self.locks.entry(key.clone()).or_default().value());
        // Built before waiting so a cancelled wait still releases the entry.
        let mut guard = KeyGuard {
            guard: None,
            key,
            locks: self,
        };
        guard.guard = Some(mutex.lock_owned().await);
        guard
    }

    /// Locks every key in `keys`, in sorted order so that two callers with
    /// overlapping sets cannot deadlock. Duplicates are locked once.
    pub(crate) async fn lock_all(&self, mut keys: Vec<K>) -> Vec<KeyGuard<'_, K>>
    where
        K: Ord,
    {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }

    fn release(&self, key: &K) {
        // The map holds one reference. Any other is a holder or a waiter.
        self.locks.remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Exclusive access to one key. Dropping it unlocks the key.
#[derive(Debug)]
pub(crate) struct KeyGuard<'a, K: Eq + Hash + Clone> {
    guard: Option<OwnedMutexGuard<()>>,
    key: K,
    locks: &'a KeyedLocks<K>,
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.key);
    }
}
