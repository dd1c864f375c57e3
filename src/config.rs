// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime configuration.
//!
//! Every section has working defaults and can be built in code with the
//! `with_*` methods or loaded from JSON with [`Config::from_json`]. Missing
//! JSON keys fall back to their defaults, and so do zero heartbeat intervals
//! and slack factors.
//!
//! ```
//! use presence_lib::config::Config;
//!
//! let config = Config::from_json(r#"{ "sweeper": { "timeoutMinutes": 2 } }"#).unwrap();
//! assert_eq!(config.sweeper.timeout_minutes, 2);
//! assert_eq!(config.presence.default_heartbeat_interval, 30);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{DEFAULT_HEARTBEAT_INTERVAL_SECS, ONLINE_SLACK_FACTOR};
use crate::error::Result;
use crate::event::DEFAULT_CHANNEL_CAPACITY;

/// Default number of events returned by event listings.
pub const DEFAULT_EVENT_LIMIT: usize = 50;

/// Complete library configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub presence: PresenceConfig,
    pub sweeper: SweeperConfig,
    pub broadcast: BroadcastConfig,
}

impl Config {
    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the JSON is
    /// malformed or a value has the wrong type.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        config.presence = config.presence.normalized();
        Ok(config)
    }
}

/// Presence engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceConfig {
    /// Heartbeat interval in seconds for registrations that omit one.
    pub default_heartbeat_interval: u32,
    /// Heartbeat intervals of silence tolerated by `is_online`.
    pub online_slack_factor: u32,
    /// Number of events returned when a caller does not give a limit.
    pub default_event_limit: usize,
    /// Capacity of the presence event bus.
    pub event_bus_capacity: usize,
}

impl PresenceConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default heartbeat interval. Zero is ignored.
    #[must_use]
    pub fn with_default_heartbeat_interval(mut self, seconds: u32) -> Self {
        if seconds > 0 {
            self.default_heartbeat_interval = seconds;
        }
        self
    }

    /// Sets the online slack factor. Zero is ignored.
    #[must_use]
    pub fn with_online_slack_factor(mut self, factor: u32) -> Self {
        if factor > 0 {
            self.online_slack_factor = factor;
        }
        self
    }

    /// Sets the default event listing limit.
    #[must_use]
    pub fn with_default_event_limit(mut self, limit: usize) -> Self {
        self.default_event_limit = limit;
        self
    }

    /// Sets the event bus capacity.
    #[must_use]
    pub fn with_event_bus_capacity(mut self, capacity: usize) -> Self {
        self.event_bus_capacity = capacity;
        self
    }

    /// Replaces a zero heartbeat interval or slack factor with its default.
    ///
    /// A zero interval would be stored on devices and a zero factor would
    /// make every device permanently offline. The engine applies this to
    /// whatever configuration it is given.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.default_heartbeat_interval == 0 {
            self.default_heartbeat_interval = DEFAULT_HEARTBEAT_INTERVAL_SECS;
        }
        if self.online_slack_factor == 0 {
            self.online_slack_factor = ONLINE_SLACK_FACTOR;
        }
        self
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            default_heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            online_slack_factor: ONLINE_SLACK_FACTOR,
            default_event_limit: DEFAULT_EVENT_LIMIT,
            event_bus_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Liveness sweeper settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SweeperConfig {
    /// Seconds between sweeps.
    pub period_secs: u64,
    /// Minutes of silence after which an online device is demoted.
    pub timeout_minutes: u32,
    /// Whether a sweep that demoted devices announces it to observers.
    pub announce_cleanup: bool,
}

impl SweeperConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sweep period. Periods under one second are raised to one.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period_secs = period.as_secs().max(1);
        self
    }

    /// Sets the offline timeout in minutes.
    #[must_use]
    pub fn with_timeout_minutes(mut self, minutes: u32) -> Self {
        self.timeout_minutes = minutes;
        self
    }

    /// Enables or disables the cleanup announcement.
    #[must_use]
    pub fn with_announce_cleanup(mut self, announce: bool) -> Self {
        self.announce_cleanup = announce;
        self
    }

    /// Returns the sweep period.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs.max(1))
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            period_secs: 60,
            timeout_minutes: 5,
            announce_cleanup: true,
        }
    }
}

/// Broadcast layer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastConfig {
    /// Outbound queue length per connection. Messages beyond it are dropped.
    pub connection_queue_capacity: usize,
}

impl BroadcastConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-connection queue capacity. Zero is raised to one.
    #[must_use]
    pub fn with_connection_queue_capacity(mut self, capacity: usize) -> Self {
        self.connection_queue_capacity = capacity.max(1);
        self
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            connection_queue_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.presence.default_heartbeat_interval, 30);
        assert_eq!(config.presence.online_slack_factor, 3);
        assert_eq!(config.presence.default_event_limit, 50);
        assert_eq!(config.sweeper.timeout_minutes, 5);
        assert_eq!(config.sweeper.period(), Duration::from_secs(60));
        assert_eq!(config.broadcast.connection_queue_capacity, 64);
    }

    #[test]
    fn zero_values_are_ignored_by_builders() {
        let presence = PresenceConfig::new()
            .with_default_heartbeat_interval(0)
            .with_online_slack_factor(0);
        assert_eq!(presence.default_heartbeat_interval, 30);
        assert_eq!(presence.online_slack_factor, 3);

        let sweeper = SweeperConfig::new().with_period(Duration::from_millis(10));
        assert_eq!(sweeper.period(), Duration::from_secs(1));
    }

    #[test]
    fn zero_values_from_json_fall_back_to_defaults() {
        let json = r#"{ "presence": { "defaultHeartbeatInterval": 0, "onlineSlackFactor": 0 } }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.presence.default_heartbeat_interval, 30);
        assert_eq!(config.presence.online_slack_factor, 3);
    }

    #[test]
    fn normalized_keeps_explicit_values() {
        let presence = PresenceConfig {
            default_heartbeat_interval: 0,
            online_slack_factor: 5,
            ..PresenceConfig::default()
        }
        .normalized();
        assert_eq!(presence.default_heartbeat_interval, 30);
        assert_eq!(presence.online_slack_factor, 5);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{
            "presence": { "defaultHeartbeatInterval": 10 },
            "broadcast": { "connectionQueueCapacity": 8 }
        }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.presence.default_heartbeat_interval, 10);
        assert_eq!(config.presence.online_slack_factor, 3);
        assert_eq!(config.broadcast.connection_queue_capacity, 8);
        assert_eq!(config.sweeper, SweeperConfig::default());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = Config::from_json(r#"{ "sweeper": { "timeoutMinutes": "soon" } }"#).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
