// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Audit records and in-process presence events.
//!
//! Two kinds of events leave the presence engine:
//!
//! - [`DeviceEvent`] - the durable, append-only audit record written to the
//!   store with every transition, built by the [`EventLogger`]
//! - [`PresenceEvent`] - an in-memory notification published on the
//!   [`EventBus`] once a transition has been committed
//!
//! # Examples
//!
//! ```
//! use presence_lib::event::EventBus;
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//! // rx.recv().await yields PresenceEvent values as devices change.
//! # drop(rx);
//! ```

mod device_event;
mod event_bus;
mod logger;
mod presence_event;

pub use device_event::{DeviceEvent, EventId, EventType, Severity};
pub use event_bus::{DEFAULT_CHANNEL_CAPACITY, EventBus};
pub use logger::EventLogger;
pub use presence_event::PresenceEvent;
