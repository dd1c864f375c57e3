// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the presence library.
//!
//! Unknown devices and connections are not errors: operations that reference
//! them return `Ok(false)` or `Ok(None)`. The variants here cover rejected
//! input, storage failures, and transport misuse.

use thiserror::Error;

use crate::broadcast::ConnectionId;
use crate::device::DeviceId;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// A request was rejected before touching the store.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The device store failed or rejected a write.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A connection with this id is already attached.
    #[error("connection {0} is already attached")]
    AlreadyAttached(ConnectionId),

    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Errors raised while validating inbound requests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The heartbeat interval must be strictly positive.
    #[error("heartbeat interval must be greater than zero")]
    InvalidHeartbeatInterval,

    /// The status string is not one of the known device states.
    #[error("unknown device status: {0}")]
    UnknownStatus(String),

    /// A device id could not be parsed.
    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),
}

/// Errors reported by a [`DeviceStore`](crate::store::DeviceStore).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The row changed since it was read.
    #[error("device {device_id} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        /// The device whose write was rejected.
        device_id: DeviceId,
        /// The version the writer read.
        expected: u64,
        /// The version currently stored.
        actual: u64,
    },

    /// The store refused the write.
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = ValidationError::MissingField("deviceName");
        assert_eq!(err.to_string(), "missing required field: deviceName");
    }

    #[test]
    fn error_from_validation_error() {
        let err: Error = ValidationError::InvalidHeartbeatInterval.into();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidHeartbeatInterval)
        ));
    }

    #[test]
    fn store_conflict_display() {
        let device_id = DeviceId::new();
        let err = StoreError::Conflict {
            device_id,
            expected: 3,
            actual: 4,
        };
        assert_eq!(
            err.to_string(),
            format!("device {device_id} was modified concurrently (expected version 3, found 4)")
        );
    }

    #[test]
    fn already_attached_display() {
        let err = Error::AlreadyAttached(ConnectionId::from("conn-1"));
        assert_eq!(err.to_string(), "connection conn-1 is already attached");
    }
}
