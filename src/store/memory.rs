// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory device store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CommitOutcome, DeviceFilter, DeviceStore, DeviceWrite};
use crate::device::{Device, DeviceId};
use crate::error::StoreError;
use crate::event::DeviceEvent;

#[derive(Debug, Default)]
struct Tables {
    devices: HashMap<DeviceId, Device>,
    /// Events per device in append order. Kept after the device is removed.
    events: HashMap<DeviceId, Vec<DeviceEvent>>,
}

/// A [`DeviceStore`] backed by process memory.
///
/// Both tables sit behind a single lock, so a commit is atomic with respect
/// to every reader. Failure switches let tests simulate an unreachable store
/// or a broken audit table.
///
/// # Examples
///
/// ```
/// use presence_lib::store::{DeviceFilter, DeviceStore, InMemoryStore};
///
/// # async fn example() {
/// let store = InMemoryStore::new();
/// let devices = store.list_devices(&DeviceFilter::all()).await.unwrap();
/// assert!(devices.is_empty());
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
    audit_broken: AtomicBool,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes every subsequent event append fail while device writes still
    /// succeed.
    pub fn set_audit_broken(&self, broken: bool) {
        self.audit_broken.store(broken, Ordering::SeqCst);
    }

    /// Returns the number of stored devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.tables.read().devices.len()
    }

    /// Returns the total number of stored events across all devices.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.tables.read().events.values().map(Vec::len).sum()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".to_string()));
        }
        Ok(())
    }

    fn check_audit(&self) -> Result<(), StoreError> {
        if self.audit_broken.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("event table rejected the append".to_string()));
        }
        Ok(())
    }

    fn check_version(
        tables: &Tables,
        device_id: DeviceId,
        expected: Option<u64>,
    ) -> Result<(), StoreError> {
        let Some(expected) = expected else {
            return Ok(());
        };
        let actual = tables.devices.get(&device_id).map_or(0, |d| d.version);
        if actual != expected {
            return Err(StoreError::Conflict {
                device_id,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceStore for InMemoryStore {
    async fn find_device_by_id(&self, device_id: DeviceId) -> Result<Option<Device>, StoreError> {
        self.check_available()?;
        Ok(self.tables.read().devices.get(&device_id).cloned())
    }

    async fn find_device_by_criteria(
        &self,
        serial: Option<&str>,
        mac: Option<&str>,
    ) -> Result<Option<Device>, StoreError> {
        self.check_available()?;
        if serial.is_none() && mac.is_none() {
            return Ok(None);
        }

        let tables = self.tables.read();
        let found = tables.devices.values().find(|device| {
            let serial_match = serial.is_some() && device.serial_number.as_deref() == serial;
            let mac_match = mac.is_some() && device.mac_address.as_deref() == mac;
            serial_match || mac_match
        });
        Ok(found.cloned())
    }

    async fn commit(
        &self,
        write: DeviceWrite,
        event: Option<DeviceEvent>,
    ) -> Result<CommitOutcome, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.write();

        let stored = match write {
            DeviceWrite::Upsert {
                mut device,
                expected_version,
            } => {
                Self::check_version(&tables, device.device_id, expected_version)?;
                let previous = tables.devices.get(&device.device_id).map_or(0, |d| d.version);
                device.version = previous + 1;
                tables.devices.insert(device.device_id, device.clone());
                Some(device)
            }
            DeviceWrite::Delete {
                device_id,
                expected_version,
            } => {
                Self::check_version(&tables, device_id, expected_version)?;
                tables.devices.remove(&device_id);
                None
            }
        };

        let audit = match event {
            Some(event) => self.check_audit().map(|()| {
                tables.events.entry(event.device_id).or_default().push(event);
            }),
            None => Ok(()),
        };

        Ok(CommitOutcome {
            device: stored,
            audit,
        })
    }

    async fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>, StoreError> {
        self.check_available()?;
        let mut devices: Vec<Device> = self
            .tables
            .read()
            .devices
            .values()
            .filter(|device| filter.matches(device))
            .cloned()
            .collect();
        // `None` sorts before `Some`, so reversing the comparison puts
        // never-seen devices last.
        devices.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(devices)
    }

    async fn append_event(&self, event: DeviceEvent) -> Result<(), StoreError> {
        self.check_available()?;
        self.check_audit()?;
        self.tables
            .write()
            .events
            .entry(event.device_id)
            .or_default()
            .push(event);
        Ok(())
    }

    async fn list_events(
        &self,
        device_id: DeviceId,
        limit: usize,
    ) -> Result<Vec<DeviceEvent>, StoreError> {
        self.check_available()?;
        let tables = self.tables.read();
        let Some(events) = tables.events.get(&device_id) else {
            return Ok(Vec::new());
        };

        let mut newest_first: Vec<DeviceEvent> = events.iter().rev().cloned().collect();
        // Stable sort keeps later appends first among equal timestamps.
        newest_first.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        newest_first.truncate(limit);
        Ok(newest_first)
    }
}
