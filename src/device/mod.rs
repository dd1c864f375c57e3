// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device data model.
//!
//! - [`DeviceId`] - stable identifier minted at first registration
//! - [`DeviceStatus`] - stored lifecycle status
//! - [`Device`] - the persisted record
//! - Request payloads accepted from devices and operators

mod device_id;
mod record;
mod request;
mod status;

pub use device_id::DeviceId;
pub use record::{DEFAULT_HEARTBEAT_INTERVAL_SECS, Device, ONLINE_SLACK_FACTOR};
pub use request::{DeviceHeartbeatRequest, DeviceRegistrationRequest, UpdateStatusRequest};
pub use status::DeviceStatus;
