// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device lifecycle status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The stored lifecycle status of a device.
///
/// This is the engine's own flag. Whether a device is *currently* reachable
/// is answered by [`Device::is_online_at`](super::Device::is_online_at), which
/// also takes the last-seen time into account; the two can disagree until
/// the liveness sweeper runs.
///
/// # Examples
///
/// ```
/// use presence_lib::device::DeviceStatus;
///
/// let status: DeviceStatus = "maintenance".parse().unwrap();
/// assert_eq!(status, DeviceStatus::Maintenance);
/// assert_eq!(status.as_str(), "Maintenance");
/// assert!("Rebooting".parse::<DeviceStatus>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// The device is reporting heartbeats.
    Online,
    /// The device missed its heartbeat window.
    #[default]
    Offline,
    /// The device reported a fault.
    Error,
    /// The device was taken out of service by an operator.
    Maintenance,
}

impl DeviceStatus {
    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "Online",
            Self::Offline => "Offline",
            Self::Error => "Error",
            Self::Maintenance => "Maintenance",
        }
    }

    /// Returns `true` for [`DeviceStatus::Online`].
    #[must_use]
    pub const fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::MissingField("status"));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            "error" => Ok(Self::Error),
            "maintenance" => Ok(Self::Maintenance),
            _ => Err(ValidationError::UnknownStatus(trimmed.to_string())),
        }
    }
}
