// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistence interface for devices and their audit trail.
//!
//! The presence engine only talks to storage through [`DeviceStore`]. A
//! device write and the audit event documenting it travel together in one
//! [`DeviceStore::commit`] call:
//!
//! - if the device write fails, nothing is applied and the call returns `Err`
//! - if the device write succeeds but the event cannot be appended, the
//!   device write stands and [`CommitOutcome::audit`] carries the failure
//!
//! [`InMemoryStore`] is the bundled implementation.

mod memory;

use async_trait::async_trait;

use crate::device::{Device, DeviceId, DeviceStatus};
use crate::error::StoreError;
use crate::event::DeviceEvent;

pub use memory::InMemoryStore;

/// A single-device write.
#[derive(Debug, Clone)]
pub enum DeviceWrite {
    /// Insert or replace a device.
    Upsert {
        /// The new row contents. Its `version` field is ignored.
        device: Device,
        /// The version the writer read, or `None` for an unconditional write.
        expected_version: Option<u64>,
    },
    /// Remove a device.
    Delete {
        /// The device to remove.
        device_id: DeviceId,
        /// The version the writer read, or `None` for an unconditional delete.
        expected_version: Option<u64>,
    },
}

impl DeviceWrite {
    /// Returns the device this write targets.
    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        match self {
            Self::Upsert { device, .. } => device.device_id,
            Self::Delete { device_id, .. } => *device_id,
        }
    }
}

/// Result of a successful [`DeviceStore::commit`].
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// The row as stored after an upsert, with its new version. `None` after
    /// a delete.
    pub device: Option<Device>,
    /// Outcome of appending the accompanying audit event.
    pub audit: Result<(), StoreError>,
}

impl CommitOutcome {
    /// Returns `true` if the device write succeeded but its event was lost.
    #[must_use]
    pub fn audit_failed(&self) -> bool {
        self.audit.is_err()
    }
}

/// Predicate for [`DeviceStore::list_devices`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    /// Only devices with this stored status.
    pub status: Option<DeviceStatus>,
    /// Only devices whose active flag is set.
    pub active_only: bool,
}

impl DeviceFilter {
    /// Matches every device.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches active devices with the given status.
    #[must_use]
    pub fn active_with_status(status: DeviceStatus) -> Self {
        Self {
            status: Some(status),
            active_only: true,
        }
    }

    /// Restricts the filter to a stored status.
    #[must_use]
    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Returns `true` if the device passes the filter.
    #[must_use]
    pub fn matches(&self, device: &Device) -> bool {
        self.status.is_none_or(|status| device.status == status)
            && (!self.active_only || device.is_active)
    }
}

/// Durable storage for devices and device events.
///
/// Implementations must make each [`commit`](Self::commit) atomic with
/// respect to the device row, and must reject an upsert or delete whose
/// `expected_version` does not match the stored version with
/// [`StoreError::Conflict`].
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Looks up a device by id.
    async fn find_device_by_id(&self, device_id: DeviceId) -> Result<Option<Device>, StoreError>;

    /// Looks up a device whose serial number equals `serial` OR whose MAC
    /// address equals `mac`. `None` criteria never match.
    async fn find_device_by_criteria(
        &self,
        serial: Option<&str>,
        mac: Option<&str>,
    ) -> Result<Option<Device>, StoreError>;

    /// Applies a device write and appends its audit event.
    async fn commit(
        &self,
        write: DeviceWrite,
        event: Option<DeviceEvent>,
    ) -> Result<CommitOutcome, StoreError>;

    /// Lists devices matching `filter`, most recently seen first. Devices
    /// never seen sort last.
    async fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>, StoreError>;

    /// Appends an audit event on its own.
    async fn append_event(&self, event: DeviceEvent) -> Result<(), StoreError>;

    /// Lists at most `limit` events for a device, most recent first.
    async fn list_events(
        &self,
        device_id: DeviceId,
        limit: usize,
    ) -> Result<Vec<DeviceEvent>, StoreError>;

    /// Inserts or replaces a device without an audit event.
    async fn upsert_device(
        &self,
        device: Device,
        expected_version: Option<u64>,
    ) -> Result<Device, StoreError> {
        let device_id = device.device_id;
        let outcome = self
            .commit(
                DeviceWrite::Upsert {
                    device,
                    expected_version,
                },
                None,
            )
            .await?;
        outcome.device.ok_or_else(|| {
            StoreError::Rejected(format!("upsert of {device_id} returned no row"))
        })
    }

    /// Removes a device without an audit event.
    async fn delete_device(&self, device_id: DeviceId) -> Result<(), StoreError> {
        self.commit(
            DeviceWrite::Delete {
                device_id,
                expected_version: None,
            },
            None,
        )
        .await
        .map(|_| ())
    }
}
