// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process notifications of committed presence transitions.

use crate::device::{Device, DeviceId, DeviceStatus};

/// A transition committed by the presence engine.
///
/// Published on the [`EventBus`](super::EventBus) after the device write
/// succeeds. Each variant carries the device as it was stored, so
/// subscribers never need to read the store back.
#[derive(Debug, Clone)]
pub enum PresenceEvent {
    /// A new device was registered.
    Registered {
        /// The stored device.
        device: Device,
    },

    /// An existing device registered again and was updated in place.
    ReRegistered {
        /// The stored device.
        device: Device,
    },

    /// A heartbeat was accepted.
    Heartbeat {
        /// The stored device.
        device: Device,
        /// Opaque payload carried by the heartbeat.
        data: Option<String>,
        /// Set when the heartbeat changed the stored status.
        recovered_from: Option<DeviceStatus>,
    },

    /// The stored status changed through an explicit request.
    StatusChanged {
        /// The stored device.
        device: Device,
        /// Status before the change.
        old_status: DeviceStatus,
    },

    /// The device reported a fault.
    ErrorReported {
        /// The stored device.
        device: Device,
        /// Fault description.
        message: String,
    },

    /// The liveness sweeper demoted the device.
    WentOffline {
        /// The stored device.
        device: Device,
    },

    /// The device record was removed.
    Deleted {
        /// Id of the removed device.
        device_id: DeviceId,
        /// Name the device had when it was removed.
        device_name: String,
    },
}

impl PresenceEvent {
    /// Returns the device id associated with this event.
    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        match self {
            Self::Registered { device }
            | Self::ReRegistered { device }
            | Self::Heartbeat { device, .. }
            | Self::StatusChanged { device, .. }
            | Self::ErrorReported { device, .. }
            | Self::WentOffline { device } => device.device_id,
            Self::Deleted { device_id, .. } => *device_id,
        }
    }

    /// Returns the device name associated with this event.
    #[must_use]
    pub fn device_name(&self) -> &str {
        match self {
            Self::Registered { device }
            | Self::ReRegistered { device }
            | Self::Heartbeat { device, .. }
            | Self::StatusChanged { device, .. }
            | Self::ErrorReported { device, .. }
            | Self::WentOffline { device } => &device.device_name,
            Self::Deleted { device_name, .. } => device_name,
        }
    }

    /// Returns the stored device, unless it was deleted.
    #[must_use]
    pub fn device(&self) -> Option<&Device> {
        match self {
            Self::Registered { device }
            | Self::ReRegistered { device }
            | Self::Heartbeat { device, .. }
            | Self::StatusChanged { device, .. }
            | Self::ErrorReported { device, .. }
            | Self::WentOffline { device } => Some(device),
            Self::Deleted { .. } => None,
        }
    }

    /// Returns `true` for registration and deletion events.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::Registered { .. } | Self::ReRegistered { .. } | Self::Deleted { .. }
        )
    }

    /// Returns `true` if the stored status changed.
    #[must_use]
    pub fn is_status_change(&self) -> bool {
        match self {
            Self::StatusChanged { .. } | Self::ErrorReported { .. } | Self::WentOffline { .. } => {
                true
            }
            Self::Heartbeat { recovered_from, .. } => recovered_from.is_some(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::device::DeviceRegistrationRequest;

    fn device() -> Device {
        let request = DeviceRegistrationRequest::new("Pump", "Controller");
        Device::from_registration(DeviceId::new(), &request, 30, "10.0.0.9", Utc::now())
    }

    #[test]
    fn device_id_extraction() {
        let device = device();
        let id = device.device_id;

        assert_eq!(PresenceEvent::Registered { device: device.clone() }.device_id(), id);
        assert_eq!(PresenceEvent::WentOffline { device }.device_id(), id);

        let deleted = PresenceEvent::Deleted {
            device_id: id,
            device_name: "Pump".to_string(),
        };
        assert_eq!(deleted.device_id(), id);
        assert_eq!(deleted.device_name(), "Pump");
        assert!(deleted.device().is_none());
    }

    #[test]
    fn lifecycle_events() {
        let device = device();
        assert!(PresenceEvent::Registered { device: device.clone() }.is_lifecycle());
        assert!(PresenceEvent::ReRegistered { device: device.clone() }.is_lifecycle());
        assert!(!PresenceEvent::WentOffline { device }.is_lifecycle());
    }

    #[test]
    fn heartbeat_is_status_change_only_when_recovering() {
        let device = device();
        let plain = PresenceEvent::Heartbeat {
            device: device.clone(),
            data: None,
            recovered_from: None,
        };
        let recovering = PresenceEvent::Heartbeat {
            device,
            data: None,
            recovered_from: Some(DeviceStatus::Offline),
        };
        assert!(!plain.is_status_change());
        assert!(recovering.is_status_change());
    }
}
