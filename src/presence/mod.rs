// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device presence tracking.
//!
//! [`PresenceEngine`] applies registrations, heartbeats and status changes
//! to a [`DeviceStore`](crate::store::DeviceStore). [`LivenessSweeper`]
//! periodically demotes devices that went silent.
//!
//! A device has two notions of being online. The stored status is what the
//! last transition wrote; [`PresenceEngine::is_online`] additionally
//! requires a recent heartbeat. The two disagree between a device going
//! silent and the next sweep.

mod engine;
mod locks;
mod sweeper;

pub use engine::PresenceEngine;
pub use sweeper::{LivenessSweeper, SweeperHandle};
