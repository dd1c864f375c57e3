// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Audit records for device transitions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::DeviceId;

/// Unique identifier of an audit record.
///
/// Uses UUID v7 so ids sort in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new time-ordered event id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of transition an audit record documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// First registration of a device.
    Register,
    /// Registration matched an existing device by serial or MAC.
    ReRegister,
    /// Heartbeat received.
    Heartbeat,
    /// Manual status change.
    StatusChange,
    /// Sweeper demoted the device.
    Offline,
    /// The device reported a fault.
    Error,
    /// The device record was removed.
    Delete,
}

impl EventType {
    /// Returns the wire tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "Register",
            Self::ReRegister => "ReRegister",
            Self::Heartbeat => "Heartbeat",
            Self::StatusChange => "StatusChange",
            Self::Offline => "Offline",
            Self::Error => "Error",
            Self::Delete => "Delete",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity attached to an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Returns the wire tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable audit record.
///
/// Records are append-only. The `device_id` may no longer resolve once the
/// device has been deleted; the record stays queryable regardless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    pub event_id: EventId,
    pub device_id: DeviceId,
    pub event_type: EventType,
    pub message: Option<String>,
    /// Opaque payload, usually JSON sent by the device.
    pub data: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub is_processed: bool,
}

impl DeviceEvent {
    /// Creates a new unprocessed record.
    #[must_use]
    pub fn new(
        device_id: DeviceId,
        event_type: EventType,
        message: impl Into<String>,
        severity: Severity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            device_id,
            event_type,
            message: Some(message.into()),
            data: None,
            timestamp,
            severity,
            is_processed: false,
        }
    }

    /// Attaches an opaque data payload.
    #[must_use]
    pub fn with_data(mut self, data: Option<String>) -> Self {
        self.data = data;
        self
    }
}
