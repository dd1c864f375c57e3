// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Observer connection identity and metadata.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned to a connection by the transport.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Wraps a transport-assigned id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What the transport knows about an attached observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    /// Remote network address, `"Unknown"` when the transport has none.
    pub remote_address: String,
    /// Client descriptor, usually the user agent.
    pub descriptor: String,
    pub attached_at: DateTime<Utc>,
}

impl ConnectionInfo {
    /// Describes a connection attached now.
    #[must_use]
    pub fn new(
        id: impl Into<ConnectionId>,
        remote_address: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            remote_address: non_blank(remote_address.into()),
            descriptor: non_blank(descriptor.into()),
            attached_at: Utc::now(),
        }
    }

    /// Overrides the attach time.
    #[must_use]
    pub fn attached_at(mut self, at: DateTime<Utc>) -> Self {
        self.attached_at = at;
        self
    }

    /// `"{address} - {descriptor}"`, the form used in client listings.
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{} - {}", self.remote_address, self.descriptor)
    }
}

fn non_blank(value: String) -> String {
    if value.trim().is_empty() {
        "Unknown".to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_raw_id() {
        assert_eq!(ConnectionId::from("conn-1").to_string(), "conn-1");
        assert_eq!(format!("{:?}", ConnectionId::new("c")), "ConnectionId(c)");
    }

    #[test]
    fn blank_metadata_becomes_unknown() {
        let info = ConnectionInfo::new("c1", "", "  ");
        assert_eq!(info.remote_address, "Unknown");
        assert_eq!(info.summary(), "Unknown - Unknown");
    }

    #[test]
    fn summary_joins_address_and_descriptor() {
        let info = ConnectionInfo::new("c1", "10.0.0.5", "Mozilla/5.0");
        assert_eq!(info.summary(), "10.0.0.5 - Mozilla/5.0");
    }
}
