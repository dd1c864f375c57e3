// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inbound request payloads.
//!
//! These are the shapes a front end deserializes from device calls. Field
//! names follow the camelCase wire format.

use serde::{Deserialize, Serialize};

use super::{DeviceId, DeviceStatus};
use crate::error::ValidationError;

/// Announces a device, or re-announces one that was re-provisioned.
///
/// # Examples
///
/// ```
/// use presence_lib::device::DeviceRegistrationRequest;
///
/// let request = DeviceRegistrationRequest::new("Boiler sensor", "Sensor")
///     .with_serial_number("SN001")
///     .with_mac_address("AA:BB:CC:00:01")
///     .with_heartbeat_interval(30);
/// assert!(request.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceRegistrationRequest {
    pub device_name: String,
    pub description: Option<String>,
    pub device_type: String,
    pub location: Option<String>,
    pub firmware_version: Option<String>,
    pub hardware_version: Option<String>,
    pub capabilities: Option<String>,
    pub configuration: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub mac_address: Option<String>,
    /// Seconds between heartbeats. The engine default applies when absent.
    pub heartbeat_interval: Option<u32>,
}

impl DeviceRegistrationRequest {
    /// Creates a request with the required fields.
    #[must_use]
    pub fn new(device_name: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            device_type: device_type.into(),
            ..Self::default()
        }
    }

    /// Sets the serial number used for re-registration matching.
    #[must_use]
    pub fn with_serial_number(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    /// Sets the MAC address used for re-registration matching.
    #[must_use]
    pub fn with_mac_address(mut self, mac: impl Into<String>) -> Self {
        self.mac_address = Some(mac.into());
        self
    }

    /// Sets the heartbeat interval in seconds.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, seconds: u32) -> Self {
        self.heartbeat_interval = Some(seconds);
        self
    }

    /// Sets the location label.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the firmware version string.
    #[must_use]
    pub fn with_firmware_version(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = Some(version.into());
        self
    }

    /// Returns the serial number if it is present and non-blank.
    #[must_use]
    pub fn match_serial(&self) -> Option<&str> {
        non_blank(self.serial_number.as_deref())
    }

    /// Returns the MAC address if it is present and non-blank.
    #[must_use]
    pub fn match_mac(&self) -> Option<&str> {
        non_blank(self.mac_address.as_deref())
    }

    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingField`] when the device name is
    /// blank, or [`ValidationError::InvalidHeartbeatInterval`] for a zero
    /// interval.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.device_name.trim().is_empty() {
            return Err(ValidationError::MissingField("deviceName"));
        }
        if self.heartbeat_interval == Some(0) {
            return Err(ValidationError::InvalidHeartbeatInterval);
        }
        Ok(())
    }
}

/// Periodic liveness signal from a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceHeartbeatRequest {
    pub device_id: String,
    pub status: Option<String>,
    pub battery_level: Option<f64>,
    pub temperature: Option<f64>,
    pub signal_strength: Option<f64>,
    /// Address reported by the device itself. Used only when the transport
    /// could not determine a source address.
    #[serde(rename = "lastKnownIP")]
    pub last_known_ip: Option<String>,
    /// Opaque payload stored on the heartbeat event.
    pub data: Option<String>,
}

impl DeviceHeartbeatRequest {
    /// Creates a heartbeat for the given device.
    #[must_use]
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id: device_id.to_string(),
            ..Self::default()
        }
    }

    /// Sets an explicit status carried by the heartbeat.
    #[must_use]
    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = Some(status.to_string());
        self
    }

    /// Sets the battery level.
    #[must_use]
    pub fn with_battery_level(mut self, level: f64) -> Self {
        self.battery_level = Some(level);
        self
    }

    /// Sets the temperature reading.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the signal strength reading.
    #[must_use]
    pub fn with_signal_strength(mut self, strength: f64) -> Self {
        self.signal_strength = Some(strength);
        self
    }

    /// Sets the opaque data payload.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Parses the device id and optional status.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for a blank or malformed device id, or
    /// an unknown status string.
    pub fn validate(&self) -> Result<(DeviceId, Option<DeviceStatus>), ValidationError> {
        let device_id = self.device_id.parse()?;
        let status = non_blank(self.status.as_deref())
            .map(str::parse)
            .transpose()?;
        Ok((device_id, status))
    }
}

/// Manual status change issued by an operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateStatusRequest {
    pub status: String,
}

impl UpdateStatusRequest {
    /// Parses the requested status.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the status is blank or unknown.
    pub fn validate(&self) -> Result<DeviceStatus, ValidationError> {
        self.status.parse()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
