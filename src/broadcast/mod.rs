// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Real-time fan-out to attached observers.
//!
//! - [`ConnectionRegistry`] tracks attached connections and their groups
//! - [`BroadcastRouter`] addresses messages to all, one connection, one
//!   group, or everyone but one connection
//! - [`PresenceRelay`] turns presence transitions into router messages
//!
//! Delivery is best effort. Each connection has a bounded queue and a
//! message that does not fit is dropped for that connection only.

mod connection;
mod message;
mod registry;
mod relay;
mod router;

pub use connection::{ConnectionId, ConnectionInfo};
pub use message::{
    ClientSummary, DEVICE_ORIGIN, Message, Notification, NotificationKind, SYSTEM_ORIGIN,
    WELCOME_TEXT,
};
pub use registry::ConnectionRegistry;
pub use relay::{PresenceRelay, messages_for};
pub use router::{BroadcastRouter, Publisher, Scope};
