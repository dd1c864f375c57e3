// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The persisted device record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{DeviceId, DeviceRegistrationRequest, DeviceStatus};

/// Heartbeat interval applied when a registration does not carry one.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u32 = 30;

/// Number of heartbeat intervals a device may stay silent before readers
/// stop considering it online.
pub const ONLINE_SLACK_FACTOR: u32 = 3;

/// A registered device as stored by a [`DeviceStore`](crate::store::DeviceStore).
///
/// Fields are public so stores can map them onto their own schema. Mutation
/// goes through the [`PresenceEngine`](crate::presence::PresenceEngine),
/// which keeps `updated_at` and `version` moving forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: DeviceId,
    pub device_name: String,
    pub description: Option<String>,
    pub device_type: String,
    pub status: DeviceStatus,
    pub location: Option<String>,
    pub firmware_version: Option<String>,
    pub hardware_version: Option<String>,
    #[serde(rename = "lastKnownIP")]
    pub last_known_ip: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Opaque JSON describing what the device can do.
    pub capabilities: Option<String>,
    /// Opaque JSON configuration pushed by the device.
    pub configuration: Option<String>,
    pub battery_level: Option<f64>,
    pub temperature: Option<f64>,
    pub signal_strength: Option<f64>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub mac_address: Option<String>,
    pub port: Option<u16>,
    pub is_active: bool,
    pub is_registered: bool,
    /// Expected seconds between heartbeats. Always greater than zero.
    pub heartbeat_interval: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
    pub error_count: u32,
    /// Row version, incremented by the store on every committed write.
    pub version: u64,
}

impl Device {
    /// Builds a freshly registered device.
    pub(crate) fn from_registration(
        device_id: DeviceId,
        request: &DeviceRegistrationRequest,
        heartbeat_interval: u32,
        source_address: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let mut device = Self {
            device_id,
            device_name: String::new(),
            description: None,
            device_type: String::new(),
            status: DeviceStatus::Online,
            location: None,
            firmware_version: None,
            hardware_version: None,
            last_known_ip: None,
            last_seen: None,
            created_at: now,
            updated_at: now,
            capabilities: None,
            configuration: None,
            battery_level: None,
            temperature: None,
            signal_strength: None,
            manufacturer: None,
            model: None,
            serial_number: None,
            mac_address: None,
            port: None,
            is_active: true,
            is_registered: true,
            heartbeat_interval,
            last_heartbeat: None,
            last_error: None,
            last_error_time: None,
            error_count: 0,
            version: 0,
        };
        device.apply_registration(request, heartbeat_interval, source_address, now);
        device
    }

    /// Overwrites descriptive fields from a (re-)registration and marks the
    /// device online.
    pub(crate) fn apply_registration(
        &mut self,
        request: &DeviceRegistrationRequest,
        heartbeat_interval: u32,
        source_address: &str,
        now: DateTime<Utc>,
    ) {
        self.device_name.clone_from(&request.device_name);
        self.description.clone_from(&request.description);
        self.device_type.clone_from(&request.device_type);
        self.location.clone_from(&request.location);
        self.firmware_version.clone_from(&request.firmware_version);
        self.hardware_version.clone_from(&request.hardware_version);
        self.capabilities.clone_from(&request.capabilities);
        self.configuration.clone_from(&request.configuration);
        self.manufacturer.clone_from(&request.manufacturer);
        self.model.clone_from(&request.model);
        self.serial_number.clone_from(&request.serial_number);
        self.mac_address.clone_from(&request.mac_address);
        self.heartbeat_interval = heartbeat_interval;
        self.status = DeviceStatus::Online;
        self.last_known_ip = Some(source_address.to_string());
        self.is_registered = true;
        self.mark_seen(now);
        self.touch(now);
    }

    /// Moves `last_seen` forward to `now`. Never moves it backwards.
    pub(crate) fn mark_seen(&mut self, now: DateTime<Utc>) {
        self.last_seen = Some(self.last_seen.map_or(now, |seen| seen.max(now)));
    }

    /// Bumps `updated_at`, keeping it monotonic.
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = self.updated_at.max(now);
    }

    /// Returns the silence window after which the device is considered
    /// stale by readers.
    #[must_use]
    pub fn online_window(&self, slack_factor: u32) -> Duration {
        Duration::seconds(i64::from(self.heartbeat_interval) * i64::from(slack_factor))
    }

    /// Derived liveness check.
    ///
    /// True iff the stored status is `Online`, `last_seen` is set, and less
    /// than `slack_factor` heartbeat intervals have elapsed since then.
    #[must_use]
    pub fn is_online_within(&self, now: DateTime<Utc>, slack_factor: u32) -> bool {
        let Some(last_seen) = self.last_seen else {
            return false;
        };
        self.status.is_online() && now - last_seen < self.online_window(slack_factor)
    }

    /// [`is_online_within`](Self::is_online_within) with the default slack
    /// factor of three intervals.
    #[must_use]
    pub fn is_online_at(&self, now: DateTime<Utc>) -> bool {
        self.is_online_within(now, ONLINE_SLACK_FACTOR)
    }

    /// Returns `true` if the device is stored as online but has not been
    /// seen since before `cutoff`.
    #[must_use]
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.status.is_online() && self.last_seen.is_some_and(|seen| seen < cutoff)
    }
}
