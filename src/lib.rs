// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `presence_lib` - device presence tracking with real-time fan-out.
//!
//! Remote devices register, send periodic heartbeats and report faults. The
//! library keeps their state in a pluggable [`DeviceStore`], writes an audit
//! event for every transition, demotes devices that go silent, and pushes
//! every change to attached observers.
//!
//! # Components
//!
//! - **Presence engine**: registration, heartbeats, status changes, error
//!   reports, deletion, derived liveness
//! - **Liveness sweeper**: background task marking silent devices offline
//! - **Broadcast router**: addressed delivery to connections and groups
//! - **Presence relay**: bridge from engine transitions to the router
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use presence_lib::broadcast::{BroadcastRouter, ConnectionInfo, ConnectionRegistry, PresenceRelay};
//! use presence_lib::device::{DeviceHeartbeatRequest, DeviceRegistrationRequest};
//! use presence_lib::presence::PresenceEngine;
//! use presence_lib::store::InMemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> presence_lib::Result<()> {
//!     let engine = Arc::new(PresenceEngine::new(Arc::new(InMemoryStore::new())));
//!     let router = Arc::new(BroadcastRouter::new(Arc::new(ConnectionRegistry::new())));
//!
//!     // Forward every transition to attached observers.
//!     let relay = Arc::new(PresenceRelay::new(router.clone()));
//!     let _relay_task = relay.spawn(engine.subscribe());
//!
//!     let _observer = router.attach(ConnectionInfo::new("dashboard-1", "10.0.0.2", "browser"))?;
//!
//!     let request = DeviceRegistrationRequest::new("Boiler", "Sensor")
//!         .with_serial_number("SN001")
//!         .with_heartbeat_interval(30);
//!     let device = engine.register(&request, "10.0.0.7").await?;
//!
//!     let heartbeat = DeviceHeartbeatRequest::new(device.device_id).with_battery_level(92.0);
//!     assert!(engine.heartbeat(&heartbeat, "10.0.0.7").await?);
//!     Ok(())
//! }
//! ```
//!
//! # Liveness
//!
//! ```no_run
//! use std::sync::Arc;
//! use presence_lib::config::SweeperConfig;
//! use presence_lib::presence::{LivenessSweeper, PresenceEngine};
//! use presence_lib::store::InMemoryStore;
//!
//! # async fn example() {
//! let engine = Arc::new(PresenceEngine::new(Arc::new(InMemoryStore::new())));
//! let sweeper = LivenessSweeper::new(engine, SweeperConfig::default()).spawn();
//! // ...
//! sweeper.shutdown().await;
//! # }
//! ```

pub mod broadcast;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod presence;
pub mod store;

pub use broadcast::{BroadcastRouter, ConnectionId, ConnectionRegistry, PresenceRelay};
pub use config::Config;
pub use device::{Device, DeviceId, DeviceStatus};
pub use error::{Error, Result, StoreError, ValidationError};
pub use event::{DeviceEvent, EventType, PresenceEvent, Severity};
pub use presence::{LivenessSweeper, PresenceEngine};
pub use store::{DeviceStore, InMemoryStore};
