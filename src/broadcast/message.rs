// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Messages delivered to observers.
//!
//! A [`Message`] serializes as `{"method": "...", "payload": {...}}`, where
//! `method` is the client-side handler name.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ConnectionId;
use crate::device::{DeviceId, DeviceStatus};
use crate::event::{EventType, Severity};

/// Origin label for notifications raised by the broadcast layer itself.
pub const SYSTEM_ORIGIN: &str = "System";

/// Origin label for notifications about devices.
pub const DEVICE_ORIGIN: &str = "Device System";

/// Greeting sent to a connection right after it attaches.
pub const WELCOME_TEXT: &str = "Welcome to the real-time notification system!";

/// Visual category of a notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationKind {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Kind used when announcing a device status.
    #[must_use]
    pub const fn for_status(status: DeviceStatus) -> Self {
        match status {
            DeviceStatus::Online => Self::Success,
            DeviceStatus::Offline => Self::Warning,
            DeviceStatus::Error | DeviceStatus::Maintenance => Self::Info,
        }
    }

    /// Kind used when announcing a device event.
    #[must_use]
    pub const fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Info => Self::Info,
            Severity::Warning => Self::Warning,
            Severity::Error | Severity::Critical => Self::Error,
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A titled notice shown to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub timestamp: DateTime<Utc>,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
}

impl Notification {
    /// Creates a system notification stamped now.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        kind: NotificationKind,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind,
            timestamp: Utc::now(),
            from: SYSTEM_ORIGIN.to_string(),
            group_name: None,
            device_id: None,
        }
    }

    /// Marks the notification as addressed to a group.
    #[must_use]
    pub fn for_group(mut self, group: impl Into<String>) -> Self {
        self.group_name = Some(group.into());
        self
    }

    /// Marks the notification as being about one device.
    #[must_use]
    pub fn for_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self.from = DEVICE_ORIGIN.to_string();
        self
    }

    /// Overrides the timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// One row of a connected-clients listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSummary {
    pub connection_id: ConnectionId,
    /// `"{address} - {descriptor}"`.
    pub info: String,
}

/// Every message observers can receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "payload", rename_all_fields = "camelCase")]
pub enum Message {
    #[serde(rename = "ReceiveNotification")]
    Notification(Notification),

    #[serde(rename = "WelcomeMessage")]
    Welcome {
        message: String,
        connection_id: ConnectionId,
        connected_at: DateTime<Utc>,
    },

    #[serde(rename = "ClientConnected")]
    ClientConnected {
        connection_id: ConnectionId,
        client_ip: String,
        user_agent: String,
        connected_at: DateTime<Utc>,
        total_connections: usize,
    },

    #[serde(rename = "ClientDisconnected")]
    ClientDisconnected {
        connection_id: ConnectionId,
        disconnected_at: DateTime<Utc>,
        total_connections: usize,
    },

    #[serde(rename = "UserJoinedGroup")]
    UserJoinedGroup {
        connection_id: ConnectionId,
        group_name: String,
        joined_at: DateTime<Utc>,
    },

    #[serde(rename = "UserLeftGroup")]
    UserLeftGroup {
        connection_id: ConnectionId,
        group_name: String,
        left_at: DateTime<Utc>,
    },

    #[serde(rename = "ReceiveMessage")]
    Chat {
        message: String,
        sender: ConnectionId,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "ConnectedClientsList")]
    ConnectedClients(Vec<ClientSummary>),

    #[serde(rename = "ReceiveDeviceStatusUpdate")]
    DeviceStatusUpdate {
        #[serde(flatten)]
        notification: Notification,
        device_name: String,
        status: DeviceStatus,
    },

    #[serde(rename = "ReceiveDeviceEvent")]
    DeviceEvent {
        #[serde(flatten)]
        notification: Notification,
        device_name: String,
        event_type: EventType,
        severity: Severity,
    },

    #[serde(rename = "ReceiveDeviceHeartbeat")]
    DeviceHeartbeat {
        device_id: DeviceId,
        device_name: String,
        timestamp: DateTime<Utc>,
        data: Option<String>,
    },
}

impl Message {
    /// Returns the client-side handler name.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Notification(_) => "ReceiveNotification",
            Self::Welcome { .. } => "WelcomeMessage",
            Self::ClientConnected { .. } => "ClientConnected",
            Self::ClientDisconnected { .. } => "ClientDisconnected",
            Self::UserJoinedGroup { .. } => "UserJoinedGroup",
            Self::UserLeftGroup { .. } => "UserLeftGroup",
            Self::Chat { .. } => "ReceiveMessage",
            Self::ConnectedClients(_) => "ConnectedClientsList",
            Self::DeviceStatusUpdate { .. } => "ReceiveDeviceStatusUpdate",
            Self::DeviceEvent { .. } => "ReceiveDeviceEvent",
            Self::DeviceHeartbeat { .. } => "ReceiveDeviceHeartbeat",
        }
    }

    /// Builds a device status update.
    #[must_use]
    pub fn device_status_update(
        device_id: DeviceId,
        device_name: impl Into<String>,
        status: DeviceStatus,
    ) -> Self {
        let device_name = device_name.into();
        let notification = Notification::new(
            "Device Status Update",
            format!("Device '{device_name}' status changed to: {status}"),
            NotificationKind::for_status(status),
        )
        .for_device(device_id);
        Self::DeviceStatusUpdate {
            notification,
            device_name,
            status,
        }
    }

    /// Builds a device event notice.
    #[must_use]
    pub fn device_event(
        device_id: DeviceId,
        device_name: impl Into<String>,
        event_type: EventType,
        message: &str,
        severity: Severity,
    ) -> Self {
        let device_name = device_name.into();
        let notification = Notification::new(
            format!("Device Event: {event_type}"),
            format!("[{device_name}] {message}"),
            NotificationKind::for_severity(severity),
        )
        .for_device(device_id);
        Self::DeviceEvent {
            notification,
            device_name,
            event_type,
            severity,
        }
    }
}

impl From<Notification> for Message {
    fn from(notification: Notification) -> Self {
        Self::Notification(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_status() {
        assert_eq!(NotificationKind::for_status(DeviceStatus::Online), NotificationKind::Success);
        assert_eq!(NotificationKind::for_status(DeviceStatus::Offline), NotificationKind::Warning);
        assert_eq!(NotificationKind::for_status(DeviceStatus::Maintenance), NotificationKind::Info);
        assert_eq!(NotificationKind::for_status(DeviceStatus::Error), NotificationKind::Info);
    }

    #[test]
    fn kind_follows_severity() {
        assert_eq!(NotificationKind::for_severity(Severity::Critical), NotificationKind::Error);
        assert_eq!(NotificationKind::for_severity(Severity::Warning), NotificationKind::Warning);
    }

    #[test]
    fn notification_wire_shape() {
        let message = Message::from(Notification::new("Hi", "there", NotificationKind::Success));
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["method"], "ReceiveNotification");
        assert_eq!(json["payload"]["title"], "Hi");
        assert_eq!(json["payload"]["type"], "success");
        assert_eq!(json["payload"]["from"], "System");
        assert!(json["payload"].get("groupName").is_none());
    }

    #[test]
    fn status_update_flattens_notification() {
        let id = DeviceId::new();
        let message = Message::device_status_update(id, "Pump", DeviceStatus::Offline);
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["method"], "ReceiveDeviceStatusUpdate");
        let payload = &json["payload"];
        assert_eq!(payload["message"], "Device 'Pump' status changed to: Offline");
        assert_eq!(payload["type"], "warning");
        assert_eq!(payload["from"], "Device System");
        assert_eq!(payload["deviceName"], "Pump");
        assert_eq!(payload["deviceId"], id.to_string());
    }

    #[test]
    fn camel_case_fields_on_struct_variants() {
        let message = Message::ClientDisconnected {
            connection_id: ConnectionId::from("c1"),
            disconnected_at: Utc::now(),
            total_connections: 2,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["payload"]["connectionId"], "c1");
        assert_eq!(json["payload"]["totalConnections"], 2);
        assert_eq!(message.method(), "ClientDisconnected");
    }

    #[test]
    fn device_event_title_and_message() {
        let message = Message::device_event(
            DeviceId::new(),
            "Pump",
            EventType::Error,
            "overheat",
            Severity::Error,
        );
        let Message::DeviceEvent { notification, .. } = message else {
            panic!("expected device event");
        };
        assert_eq!(notification.title, "Device Event: Error");
        assert_eq!(notification.message, "[Pump] overheat");
        assert_eq!(notification.kind, NotificationKind::Error);
    }
}
