// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device presence state machine.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;

use super::locks::{DeviceLocks, IdentityLocks};
use crate::clock::{Clock, SystemClock};
use crate::config::PresenceConfig;
use crate::device::{
    Device, DeviceHeartbeatRequest, DeviceId, DeviceRegistrationRequest, DeviceStatus,
    UpdateStatusRequest,
};
use crate::error::{Error, Result, StoreError, ValidationError};
use crate::event::{DeviceEvent, EventBus, EventLogger, EventType, PresenceEvent, Severity};
use crate::store::{DeviceFilter, DeviceStore, DeviceWrite};

/// Owns the device lifecycle.
///
/// ```text
/// Unregistered --register--> Online <--sweep / heartbeat--> Offline
///                              ^ |
///         set_status, error,   | v
///         heartbeat w/ status  Error / Maintenance
///
/// delete: any state -> removed
/// ```
///
/// Every transition is written to the [`DeviceStore`] together with its
/// audit event, then published on the engine's [`EventBus`].
///
/// Operations on different devices run in parallel. Operations on the same
/// device are serialized by a per-device lock, so concurrent heartbeats
/// cannot lose each other's updates.
/// Registrations wait only for others carrying the same serial number or
/// MAC address.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use presence_lib::device::{DeviceRegistrationRequest, DeviceStatus};
/// use presence_lib::presence::PresenceEngine;
/// use presence_lib::store::InMemoryStore;
///
/// # async fn example() -> presence_lib::Result<()> {
/// let engine = PresenceEngine::new(Arc::new(InMemoryStore::new()));
///
/// let request = DeviceRegistrationRequest::new("Boiler", "Sensor").with_serial_number("SN001");
/// let device = engine.register(&request, "10.0.0.7").await?;
/// assert_eq!(device.status, DeviceStatus::Online);
/// assert!(engine.is_online(device.device_id).await?);
/// # Ok(())
/// # }
/// ```
pub struct PresenceEngine {
    store: Arc<dyn DeviceStore>,
    clock: Arc<dyn Clock>,
    config: PresenceConfig,
    logger: EventLogger,
    event_bus: EventBus,
    locks: DeviceLocks,
    /// Held per serial number and MAC address while a registration matches,
    /// so one physical device is never minted twice.
    identities: IdentityLocks,
}

impl fmt::Debug for PresenceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceEngine")
            .field("clock", &self.clock)
            .field("config", &self.config)
            .field("audit_failures", &self.logger.failure_count())
            .field("tracked_devices", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl PresenceEngine {
    /// Creates an engine over `store` using the system clock and default
    /// configuration.
    #[must_use]
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        let config = PresenceConfig::default();
        Self {
            store,
            clock: Arc::new(SystemClock),
            event_bus: EventBus::with_capacity(config.event_bus_capacity),
            config,
            logger: EventLogger::new(),
            locks: DeviceLocks::new(),
            identities: IdentityLocks::new(),
        }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the configuration. Recreates the event bus, so call this
    /// before subscribing.
    ///
    /// A zero heartbeat interval or slack factor is replaced by its default
    /// (see [`PresenceConfig::normalized`]).
    #[must_use]
    pub fn with_config(mut self, config: PresenceConfig) -> Self {
        let config = config.normalized();
        self.event_bus = EventBus::with_capacity(config.event_bus_capacity);
        self.config = config;
        self
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Subscribes to committed transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.event_bus.subscribe()
    }

    /// Returns the engine's event bus.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Returns the audit logger, mostly to read its failure count.
    #[must_use]
    pub fn event_logger(&self) -> &EventLogger {
        &self.logger
    }

    /// Returns the clock the engine reads time from.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Registers a device, or updates it in place if one with the same serial
    /// number or MAC address already exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a blank name or zero heartbeat
    /// interval, and [`Error::Store`] if the store fails. Nothing is written
    /// in either case.
    pub async fn register(
        &self,
        request: &DeviceRegistrationRequest,
        source_address: &str,
    ) -> Result<Device> {
        let result = self.register_inner(request, source_address).await;
        report("register", None, &result);
        result
    }

    async fn register_inner(
        &self,
        request: &DeviceRegistrationRequest,
        source_address: &str,
    ) -> Result<Device> {
        request.validate()?;
        let interval = request
            .heartbeat_interval
            .unwrap_or(self.config.default_heartbeat_interval);

        let _identity = self.identities.lock_all(identity_keys(request)).await;

        let existing = self
            .store
            .find_device_by_criteria(request.match_serial(), request.match_mac())
            .await?;

        if let Some(existing) = existing {
            let _guard = self.locks.lock(existing.device_id).await;
            // Re-read under the device lock; the row may have moved on.
            if let Some(mut device) = self.store.find_device_by_id(existing.device_id).await? {
                let now = self.clock.now();
                let expected_version = device.version;
                device.apply_registration(request, interval, source_address, now);

                let event = self.logger.record(
                    device.device_id,
                    EventType::ReRegister,
                    format!("Device re-registered from IP: {source_address}"),
                    Severity::Info,
                    now,
                );
                let stored = self.commit_upsert(device, expected_version, event).await?;

                tracing::info!(
                    device_id = %stored.device_id,
                    device_name = %stored.device_name,
                    "Device re-registered"
                );
                self.event_bus.publish(PresenceEvent::ReRegistered {
                    device: stored.clone(),
                });
                return Ok(stored);
            }
        }

        let now = self.clock.now();
        let device =
            Device::from_registration(DeviceId::new(), request, interval, source_address, now);
        let event = self.logger.record(
            device.device_id,
            EventType::Register,
            format!("Device registered from IP: {source_address}"),
            Severity::Info,
            now,
        );
        let stored = self.commit_insert(device, event).await?;

        tracing::info!(
            device_id = %stored.device_id,
            device_name = %stored.device_name,
            "New device registered"
        );
        self.event_bus.publish(PresenceEvent::Registered {
            device: stored.clone(),
        });
        Ok(stored)
    }

    /// Records a heartbeat.
    ///
    /// Returns `Ok(false)` if the device is unknown. A heartbeat from an
    /// `Offline` device brings it back `Online`; an explicit status in the
    /// request is applied first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a blank or malformed device id or an
    /// unknown status, and [`Error::Store`] if the device write fails.
    pub async fn heartbeat(
        &self,
        request: &DeviceHeartbeatRequest,
        source_address: &str,
    ) -> Result<bool> {
        let result = self.heartbeat_inner(request, source_address).await;
        report("heartbeat", None, &result);
        result
    }

    async fn heartbeat_inner(
        &self,
        request: &DeviceHeartbeatRequest,
        source_address: &str,
    ) -> Result<bool> {
        let (device_id, status) = request.validate()?;

        let _guard = self.locks.lock(device_id).await;
        let Some(mut device) = self.store.find_device_by_id(device_id).await? else {
            tracing::warn!(%device_id, "Device not found for heartbeat");
            return Ok(false);
        };

        let now = self.clock.now();
        let expected_version = device.version;
        let previous_status = device.status;
        let address = resolve_address(source_address, request.last_known_ip.as_deref());

        device.mark_seen(now);
        let seen = device.last_seen.unwrap_or(now);
        device.last_heartbeat = Some(seen);
        device.last_known_ip = Some(address.to_string());
        device.touch(now);

        if let Some(status) = status {
            device.status = status;
        }
        if let Some(level) = request.battery_level {
            device.battery_level = Some(level);
        }
        if let Some(temperature) = request.temperature {
            device.temperature = Some(temperature);
        }
        if let Some(strength) = request.signal_strength {
            device.signal_strength = Some(strength);
        }
        if device.status == DeviceStatus::Offline {
            device.status = DeviceStatus::Online;
        }

        let event = self
            .logger
            .record(
                device_id,
                EventType::Heartbeat,
                format!("Heartbeat received from IP: {address}"),
                Severity::Info,
                seen,
            )
            .with_data(request.data.clone());
        let stored = self.commit_upsert(device, expected_version, event).await?;

        tracing::debug!(%device_id, status = %stored.status, "Heartbeat recorded");
        let recovered_from = (stored.status != previous_status).then_some(previous_status);
        self.event_bus.publish(PresenceEvent::Heartbeat {
            device: stored,
            data: request.data.clone(),
            recovered_from,
        });
        Ok(true)
    }

    /// Sets the stored status of a device.
    ///
    /// Returns `Ok(false)` if the device is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the device write fails.
    pub async fn set_status(&self, device_id: DeviceId, status: DeviceStatus) -> Result<bool> {
        let result = self.set_status_inner(device_id, status).await;
        report("set_status", Some(device_id), &result);
        result
    }

    /// Parses an [`UpdateStatusRequest`] and applies it with
    /// [`set_status`](Self::set_status).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a blank or unknown status and
    /// [`Error::Store`] if the device write fails.
    pub async fn update_status(
        &self,
        device_id: DeviceId,
        request: &UpdateStatusRequest,
    ) -> Result<bool> {
        let status = request.validate().map_err(Error::from);
        report("update_status", Some(device_id), &status);
        self.set_status(device_id, status?).await
    }

    async fn set_status_inner(&self, device_id: DeviceId, status: DeviceStatus) -> Result<bool> {
        let _guard = self.locks.lock(device_id).await;
        let Some(mut device) = self.store.find_device_by_id(device_id).await? else {
            return Ok(false);
        };

        let now = self.clock.now();
        let expected_version = device.version;
        let old_status = device.status;
        device.status = status;
        device.touch(now);

        let event = self.logger.record(
            device_id,
            EventType::StatusChange,
            format!("Status changed from {old_status} to {status}"),
            Severity::Info,
            now,
        );
        let stored = self.commit_upsert(device, expected_version, event).await?;

        tracing::info!(%device_id, from = %old_status, to = %status, "Device status changed");
        self.event_bus.publish(PresenceEvent::StatusChanged {
            device: stored,
            old_status,
        });
        Ok(true)
    }

    /// Records a fault reported by or about a device.
    ///
    /// Sets the status to `Error`, stores the message and time, increments
    /// the error count, and appends an `Error` event. Returns `Ok(false)` if
    /// the device is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a blank message and [`Error::Store`]
    /// if the device write fails.
    pub async fn report_error(&self, device_id: DeviceId, message: &str) -> Result<bool> {
        let result = self.report_error_inner(device_id, message).await;
        report("report_error", Some(device_id), &result);
        result
    }

    async fn report_error_inner(&self, device_id: DeviceId, message: &str) -> Result<bool> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ValidationError::MissingField("message").into());
        }

        let _guard = self.locks.lock(device_id).await;
        let Some(mut device) = self.store.find_device_by_id(device_id).await? else {
            return Ok(false);
        };

        let now = self.clock.now();
        let expected_version = device.version;
        device.status = DeviceStatus::Error;
        device.last_error = Some(message.to_string());
        device.last_error_time = Some(now);
        device.error_count = device.error_count.saturating_add(1);
        device.touch(now);

        let event =
            self.logger
                .record(device_id, EventType::Error, message, Severity::Error, now);
        let stored = self.commit_upsert(device, expected_version, event).await?;

        tracing::warn!(%device_id, error_count = stored.error_count, "Device reported an error");
        self.event_bus.publish(PresenceEvent::ErrorReported {
            device: stored,
            message: message.to_string(),
        });
        Ok(true)
    }

    /// Deletes a device.
    ///
    /// The `Delete` event is appended in the same commit that removes the
    /// record and stays queryable afterwards. Returns `Ok(false)` and writes
    /// nothing if the device is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the delete fails.
    pub async fn delete(&self, device_id: DeviceId) -> Result<bool> {
        let result = self.delete_inner(device_id).await;
        report("delete", Some(device_id), &result);
        result
    }

    async fn delete_inner(&self, device_id: DeviceId) -> Result<bool> {
        let guard = self.locks.lock(device_id).await;
        let Some(device) = self.store.find_device_by_id(device_id).await? else {
            return Ok(false);
        };

        let event = self.logger.record(
            device_id,
            EventType::Delete,
            format!("Device deleted: {}", device.device_name),
            Severity::Warning,
            self.clock.now(),
        );
        let outcome = self
            .store
            .commit(
                DeviceWrite::Delete {
                    device_id,
                    expected_version: Some(device.version),
                },
                Some(event),
            )
            .await?;
        self.logger.settle(device_id, EventType::Delete, &outcome);
        drop(guard);

        tracing::info!(%device_id, device_name = %device.device_name, "Device deleted");
        self.event_bus.publish(PresenceEvent::Deleted {
            device_id,
            device_name: device.device_name,
        });
        Ok(true)
    }

    /// Demotes every online device not seen for `timeout_minutes`.
    ///
    /// Each candidate is re-read under its own lock and re-checked against a
    /// fresh cutoff before it is written, so a heartbeat that lands during
    /// the sweep is never overwritten. Returns the devices that went offline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the candidate list cannot be read.
    /// Failures on individual devices are logged and skipped.
    pub async fn sweep(&self, timeout_minutes: u32) -> Result<Vec<Device>> {
        let result = self.sweep_inner(timeout_minutes).await;
        report("sweep", None, &result);
        result
    }

    async fn sweep_inner(&self, timeout_minutes: u32) -> Result<Vec<Device>> {
        let timeout = Duration::minutes(i64::from(timeout_minutes));
        let cutoff = self.clock.now() - timeout;

        let candidates: Vec<DeviceId> = self
            .store
            .list_devices(&DeviceFilter::all().with_status(DeviceStatus::Online))
            .await?
            .into_iter()
            .filter(|device| device.is_stale(cutoff))
            .map(|device| device.device_id)
            .collect();

        let mut demoted = Vec::with_capacity(candidates.len());
        for device_id in candidates {
            match self.demote(device_id, timeout).await {
                Ok(Some(device)) => demoted.push(device),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(%device_id, error = %e, "Skipping device during sweep");
                }
            }
        }

        if !demoted.is_empty() {
            tracing::info!(count = demoted.len(), "Marked devices as offline");
        }
        Ok(demoted)
    }

    async fn demote(&self, device_id: DeviceId, timeout: Duration) -> Result<Option<Device>> {
        let _guard = self.locks.lock(device_id).await;
        let Some(mut device) = self.store.find_device_by_id(device_id).await? else {
            return Ok(None);
        };

        let now = self.clock.now();
        if !device.is_stale(now - timeout) {
            tracing::debug!(%device_id, "Device recovered before demotion");
            return Ok(None);
        }

        let expected_version = device.version;
        device.status = DeviceStatus::Offline;
        device.touch(now);

        let event = self.logger.record(
            device_id,
            EventType::Offline,
            format!("Device went offline (last seen: {})", format_last_seen(device.last_seen)),
            Severity::Warning,
            now,
        );
        let stored = self.commit_upsert(device, expected_version, event).await?;

        self.event_bus.publish(PresenceEvent::WentOffline {
            device: stored.clone(),
        });
        Ok(Some(stored))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Derived liveness.
    ///
    /// True iff the device exists, its stored status is `Online`, and it was
    /// seen within `online_slack_factor` heartbeat intervals. This can be
    /// `false` while the stored status still says `Online`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the lookup fails.
    pub async fn is_online(&self, device_id: DeviceId) -> Result<bool> {
        let device = self.store.find_device_by_id(device_id).await?;
        let now = self.clock.now();
        Ok(device.is_some_and(|d| d.is_online_within(now, self.config.online_slack_factor)))
    }

    /// Looks up a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the lookup fails.
    pub async fn device(&self, device_id: DeviceId) -> Result<Option<Device>> {
        Ok(self.store.find_device_by_id(device_id).await?)
    }

    /// Lists every device, most recently seen first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the listing fails.
    pub async fn devices(&self) -> Result<Vec<Device>> {
        Ok(self.store.list_devices(&DeviceFilter::all()).await?)
    }

    /// Lists active devices stored as `Online`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the listing fails.
    pub async fn online_devices(&self) -> Result<Vec<Device>> {
        Ok(self
            .store
            .list_devices(&DeviceFilter::active_with_status(DeviceStatus::Online))
            .await?)
    }

    /// Lists active devices stored as `Offline`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the listing fails.
    pub async fn offline_devices(&self) -> Result<Vec<Device>> {
        Ok(self
            .store
            .list_devices(&DeviceFilter::active_with_status(DeviceStatus::Offline))
            .await?)
    }

    /// Lists a device's events, most recent first.
    ///
    /// `None` uses the configured default limit. Works for deleted devices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the listing fails.
    pub async fn device_events(
        &self,
        device_id: DeviceId,
        limit: Option<usize>,
    ) -> Result<Vec<DeviceEvent>> {
        let limit = limit.unwrap_or(self.config.default_event_limit);
        Ok(self.store.list_events(device_id, limit).await?)
    }

    // =========================================================================
    // Store helpers
    // =========================================================================

    async fn commit_insert(&self, device: Device, event: DeviceEvent) -> Result<Device> {
        self.commit(device, None, event).await
    }

    async fn commit_upsert(
        &self,
        device: Device,
        expected_version: u64,
        event: DeviceEvent,
    ) -> Result<Device> {
        self.commit(device, Some(expected_version), event).await
    }

    async fn commit(
        &self,
        device: Device,
        expected_version: Option<u64>,
        event: DeviceEvent,
    ) -> Result<Device> {
        let device_id = device.device_id;
        let event_type = event.event_type;
        let outcome = self
            .store
            .commit(
                DeviceWrite::Upsert {
                    device,
                    expected_version,
                },
                Some(event),
            )
            .await?;
        self.logger.settle(device_id, event_type, &outcome);

        outcome.device.ok_or_else(|| {
            StoreError::Rejected(format!("upsert of {device_id} returned no row")).into()
        })
    }
}

/// Logs a failed operation at a level matching its cause.
fn report<T>(operation: &'static str, device_id: Option<DeviceId>, result: &Result<T>) {
    let Err(e) = result else {
        return;
    };
    let device_id = device_id.map(|id| id.to_string()).unwrap_or_default();
    match e {
        Error::Validation(_) => {
            tracing::debug!(operation, device_id, error = %e, "Rejected presence request");
        }
        _ => {
            tracing::error!(operation, device_id, error = %e, "Presence operation failed");
        }
    }
}

/// Lock keys for the identifiers a registration is matched by.
fn identity_keys(request: &DeviceRegistrationRequest) -> Vec<String> {
    let serial = request.match_serial().map(|s| format!("serial:{s}"));
    let mac = request.match_mac().map(|m| format!("mac:{m}"));
    serial.into_iter().chain(mac).collect()
}

fn resolve_address<'a>(source_address: &'a str, reported: Option<&'a str>) -> &'a str {
    let source = source_address.trim();
    if !source.is_empty() {
        return source;
    }
    reported
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("Unknown")
}

fn format_last_seen(last_seen: Option<DateTime<Utc>>) -> String {
    last_seen.map_or_else(|| "never".to_string(), |t| t.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;

    fn engine() -> (PresenceEngine, Arc<InMemoryStore>, ManualClock) {
        let store = Arc::new(InMemoryStore::new());
        let clock = ManualClock::starting_now();
        let engine = PresenceEngine::new(store.clone()).with_clock(Arc::new(clock.clone()));
        (engine, store, clock)
    }

    fn request(serial: &str, mac: &str) -> DeviceRegistrationRequest {
        DeviceRegistrationRequest::new("Sensor", "Sensor")
            .with_serial_number(serial)
            .with_mac_address(mac)
            .with_heartbeat_interval(30)
    }

    #[tokio::test]
    async fn register_creates_online_device_with_event() {
        let (engine, _, _) = engine();
        let device = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();

        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.version, 1);
        let events = engine.device_events(device.device_id, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Register);
        assert_eq!(
            events[0].message.as_deref(),
            Some("Device registered from IP: 10.0.0.1")
        );
    }

    #[tokio::test]
    async fn register_matches_by_mac_alone() {
        let (engine, _, _) = engine();
        let first = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();
        let second = engine.register(&request("SN2", "M1"), "10.0.0.2").await.unwrap();

        assert_eq!(first.device_id, second.device_id);
        assert_eq!(second.serial_number.as_deref(), Some("SN2"));
        assert_eq!(second.last_known_ip.as_deref(), Some("10.0.0.2"));
    }

    #[tokio::test]
    async fn register_uses_default_interval() {
        let (engine, _, _) = engine();
        let request = DeviceRegistrationRequest::new("Sensor", "Sensor");
        let device = engine.register(&request, "10.0.0.1").await.unwrap();
        assert_eq!(device.heartbeat_interval, 30);
    }

    #[tokio::test]
    async fn zero_config_values_do_not_reach_devices() {
        let clock = ManualClock::starting_now();
        let engine = PresenceEngine::new(Arc::new(InMemoryStore::new()))
            .with_clock(Arc::new(clock.clone()))
            .with_config(PresenceConfig {
                default_heartbeat_interval: 0,
                online_slack_factor: 0,
                ..PresenceConfig::default()
            });

        let request = DeviceRegistrationRequest::new("Sensor", "Sensor");
        let device = engine.register(&request, "10.0.0.1").await.unwrap();
        assert_eq!(device.heartbeat_interval, 30);
        assert!(engine.is_online(device.device_id).await.unwrap());

        clock.advance(Duration::seconds(89));
        assert!(engine.is_online(device.device_id).await.unwrap());
    }

    #[tokio::test]
    async fn register_without_identifiers_always_creates() {
        let (engine, store, _) = engine();
        let request = DeviceRegistrationRequest::new("Sensor", "Sensor");
        let a = engine.register(&request, "10.0.0.1").await.unwrap();
        let b = engine.register(&request, "10.0.0.1").await.unwrap();
        assert_ne!(a.device_id, b.device_id);
        assert_eq!(store.device_count(), 2);
    }

    #[tokio::test]
    async fn register_rejects_blank_name_before_store() {
        let (engine, store, _) = engine();
        let request = DeviceRegistrationRequest::new("", "Sensor");
        let err = engine.register(&request, "10.0.0.1").await.unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::MissingField("deviceName"))));
        assert_eq!(store.device_count(), 0);
    }

    #[tokio::test]
    async fn register_reports_store_failure() {
        let (engine, store, _) = engine();
        store.set_unavailable(true);
        let err = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn heartbeat_applies_metrics_and_payload() {
        let (engine, _, clock) = engine();
        let device = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();
        clock.advance(Duration::seconds(10));

        let hb = DeviceHeartbeatRequest::new(device.device_id)
            .with_battery_level(87.5)
            .with_temperature(21.0)
            .with_signal_strength(-60.0)
            .with_data("{\"rpm\":900}");
        assert!(engine.heartbeat(&hb, "10.0.0.9").await.unwrap());

        let stored = engine.device(device.device_id).await.unwrap().unwrap();
        assert_eq!(stored.battery_level, Some(87.5));
        assert_eq!(stored.temperature, Some(21.0));
        assert_eq!(stored.signal_strength, Some(-60.0));
        assert_eq!(stored.last_known_ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(stored.last_seen, Some(clock.now()));
        assert_eq!(stored.last_heartbeat, Some(clock.now()));

        let events = engine.device_events(device.device_id, Some(1)).await.unwrap();
        assert_eq!(events[0].event_type, EventType::Heartbeat);
        assert_eq!(events[0].data.as_deref(), Some("{\"rpm\":900}"));
    }

    #[tokio::test]
    async fn heartbeat_for_unknown_device_is_false_without_event() {
        let (engine, store, _) = engine();
        let hb = DeviceHeartbeatRequest::new(DeviceId::new());
        assert!(!engine.heartbeat(&hb, "10.0.0.1").await.unwrap());
        assert_eq!(store.event_count(), 0);
    }

    #[tokio::test]
    async fn heartbeat_with_explicit_status_enters_maintenance() {
        let (engine, _, _) = engine();
        let device = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();

        let hb = DeviceHeartbeatRequest::new(device.device_id)
            .with_status(DeviceStatus::Maintenance);
        engine.heartbeat(&hb, "10.0.0.1").await.unwrap();

        let stored = engine.device(device.device_id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeviceStatus::Maintenance);
    }

    #[tokio::test]
    async fn heartbeat_does_not_leave_error_implicitly() {
        let (engine, _, _) = engine();
        let device = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();
        engine.report_error(device.device_id, "overheat").await.unwrap();

        engine
            .heartbeat(&DeviceHeartbeatRequest::new(device.device_id), "10.0.0.1")
            .await
            .unwrap();

        let stored = engine.device(device.device_id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeviceStatus::Error);
    }

    #[tokio::test]
    async fn heartbeat_falls_back_to_reported_address() {
        let (engine, _, _) = engine();
        let device = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();

        let mut hb = DeviceHeartbeatRequest::new(device.device_id);
        hb.last_known_ip = Some("172.16.0.4".to_string());
        engine.heartbeat(&hb, "").await.unwrap();

        let stored = engine.device(device.device_id).await.unwrap().unwrap();
        assert_eq!(stored.last_known_ip.as_deref(), Some("172.16.0.4"));
    }

    #[tokio::test]
    async fn audit_failure_does_not_undo_heartbeat() {
        let (engine, store, clock) = engine();
        let device = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();
        store.set_audit_broken(true);
        clock.advance(Duration::seconds(5));

        let ok = engine
            .heartbeat(&DeviceHeartbeatRequest::new(device.device_id), "10.0.0.1")
            .await
            .unwrap();

        assert!(ok);
        assert_eq!(engine.event_logger().failure_count(), 1);
        let stored = engine.device(device.device_id).await.unwrap().unwrap();
        assert_eq!(stored.last_seen, Some(clock.now()));
    }

    #[tokio::test]
    async fn set_status_records_transition() {
        let (engine, _, _) = engine();
        let device = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();

        assert!(engine.set_status(device.device_id, DeviceStatus::Maintenance).await.unwrap());

        let events = engine.device_events(device.device_id, Some(1)).await.unwrap();
        assert_eq!(events[0].event_type, EventType::StatusChange);
        assert_eq!(
            events[0].message.as_deref(),
            Some("Status changed from Online to Maintenance")
        );
    }

    #[tokio::test]
    async fn update_status_rejects_unknown_value() {
        let (engine, _, _) = engine();
        let device = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();
        let request = UpdateStatusRequest {
            status: "Hibernating".to_string(),
        };
        let err = engine.update_status(device.device_id, &request).await.unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::UnknownStatus(_))));
    }

    #[tokio::test]
    async fn set_status_unknown_device_is_false() {
        let (engine, _, _) = engine();
        assert!(!engine.set_status(DeviceId::new(), DeviceStatus::Online).await.unwrap());
    }

    #[tokio::test]
    async fn report_error_tracks_count_and_time() {
        let (engine, _, clock) = engine();
        let device = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();

        engine.report_error(device.device_id, "sensor stuck").await.unwrap();
        clock.advance(Duration::seconds(3));
        engine.report_error(device.device_id, "sensor stuck").await.unwrap();

        let stored = engine.device(device.device_id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeviceStatus::Error);
        assert_eq!(stored.error_count, 2);
        assert_eq!(stored.last_error.as_deref(), Some("sensor stuck"));
        assert_eq!(stored.last_error_time, Some(clock.now()));

        let events = engine.device_events(device.device_id, Some(1)).await.unwrap();
        assert_eq!(events[0].event_type, EventType::Error);
        assert_eq!(events[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn audit_events_are_stamped_by_the_engine_clock() {
        let (engine, _, clock) = engine();
        let start = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        clock.set(start);
        let device = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();
        clock.advance(Duration::seconds(7));
        engine.report_error(device.device_id, "stuck").await.unwrap();
        clock.advance(Duration::seconds(7));
        engine.delete(device.device_id).await.unwrap();

        let stamps: Vec<_> = engine
            .device_events(device.device_id, None)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.event_type, e.timestamp))
            .collect();
        assert_eq!(
            stamps,
            vec![
                (EventType::Delete, start + Duration::seconds(14)),
                (EventType::Error, start + Duration::seconds(7)),
                (EventType::Register, start),
            ]
        );
    }

    #[tokio::test]
    async fn delete_releases_its_locks() {
        let (engine, _, _) = engine();
        let device = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();
        assert!(engine.delete(device.device_id).await.unwrap());
        assert_eq!(engine.locks.len(), 0);
        assert_eq!(engine.identities.len(), 0);
    }

    #[tokio::test]
    async fn unknown_device_calls_leave_no_locks_behind() {
        let (engine, _, _) = engine();
        for _ in 0..250 {
            let id = DeviceId::new();
            let hb = DeviceHeartbeatRequest::new(id);
            assert!(!engine.heartbeat(&hb, "10.0.0.1").await.unwrap());
            assert!(!engine.set_status(id, DeviceStatus::Online).await.unwrap());
            assert!(!engine.report_error(id, "boom").await.unwrap());
            assert!(!engine.delete(id).await.unwrap());
        }
        assert_eq!(engine.locks.len(), 0);
    }

    #[tokio::test]
    async fn registration_only_waits_on_its_own_identifiers() {
        let (engine, _, _) = engine();
        let held = engine.identities.lock("serial:SN1".to_string()).await;
        let wait = std::time::Duration::from_millis(50);

        let other = tokio::time::timeout(wait, engine.register(&request("SN2", "M2"), "10.0.0.2"))
            .await;
        assert!(other.is_ok());
        let anonymous = DeviceRegistrationRequest::new("Sensor", "Sensor");
        let anonymous = tokio::time::timeout(wait, engine.register(&anonymous, "10.0.0.3")).await;
        assert!(anonymous.is_ok());

        let same = tokio::time::timeout(wait, engine.register(&request("SN1", "M9"), "10.0.0.1"))
            .await;
        assert!(same.is_err());

        drop(held);
        engine.register(&request("SN1", "M9"), "10.0.0.1").await.unwrap();
        assert_eq!(engine.identities.len(), 0);
    }

    #[test]
    fn identity_keys_skip_blank_identifiers() {
        let keys = identity_keys(&request("SN1", "AA:BB"));
        assert_eq!(keys, vec!["serial:SN1", "mac:AA:BB"]);

        let blank = DeviceRegistrationRequest::new("Sensor", "Sensor").with_serial_number("  ");
        assert!(identity_keys(&blank).is_empty());
    }

    #[tokio::test]
    async fn updated_at_never_decreases() {
        let (engine, _, clock) = engine();
        let device = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();

        clock.advance(Duration::minutes(-5));
        engine.set_status(device.device_id, DeviceStatus::Maintenance).await.unwrap();

        let stored = engine.device(device.device_id).await.unwrap().unwrap();
        assert_eq!(stored.updated_at, device.updated_at);
    }

    #[tokio::test]
    async fn sweep_demotes_only_stale_online_devices() {
        let (engine, _, clock) = engine();
        let stale = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();
        let maintenance = engine.register(&request("SN2", "M2"), "10.0.0.2").await.unwrap();
        engine.set_status(maintenance.device_id, DeviceStatus::Maintenance).await.unwrap();

        clock.advance(Duration::seconds(50));
        let fresh = engine.register(&request("SN3", "M3"), "10.0.0.3").await.unwrap();
        clock.advance(Duration::seconds(11));

        let demoted = engine.sweep(1).await.unwrap();
        let ids: Vec<DeviceId> = demoted.iter().map(|d| d.device_id).collect();
        assert_eq!(ids, vec![stale.device_id]);

        let still_fresh = engine.device(fresh.device_id).await.unwrap().unwrap();
        assert_eq!(still_fresh.status, DeviceStatus::Online);
        let kept = engine.device(maintenance.device_id).await.unwrap().unwrap();
        assert_eq!(kept.status, DeviceStatus::Maintenance);
    }

    #[tokio::test]
    async fn sweep_twice_demotes_once() {
        let (engine, store, clock) = engine();
        engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();
        clock.advance(Duration::minutes(2));

        assert_eq!(engine.sweep(1).await.unwrap().len(), 1);
        let events_after_first = store.event_count();
        assert!(engine.sweep(1).await.unwrap().is_empty());
        assert_eq!(store.event_count(), events_after_first);
    }

    #[tokio::test]
    async fn demote_skips_device_that_recovered() {
        let (engine, _, clock) = engine();
        let device = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();
        clock.advance(Duration::minutes(2));

        // A heartbeat lands between the sweep's read and its write.
        engine
            .heartbeat(&DeviceHeartbeatRequest::new(device.device_id), "10.0.0.1")
            .await
            .unwrap();
        let demoted = engine.demote(device.device_id, Duration::minutes(1)).await.unwrap();

        assert!(demoted.is_none());
        let stored = engine.device(device.device_id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeviceStatus::Online);
    }

    #[tokio::test]
    async fn lists_split_online_and_offline() {
        let (engine, _, clock) = engine();
        let a = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();
        clock.advance(Duration::minutes(10));
        let b = engine.register(&request("SN2", "M2"), "10.0.0.2").await.unwrap();
        engine.sweep(5).await.unwrap();

        let online: Vec<DeviceId> = engine
            .online_devices()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.device_id)
            .collect();
        let offline: Vec<DeviceId> = engine
            .offline_devices()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.device_id)
            .collect();

        assert_eq!(online, vec![b.device_id]);
        assert_eq!(offline, vec![a.device_id]);
        assert_eq!(engine.devices().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn transitions_are_published() {
        let (engine, _, _) = engine();
        let mut events = engine.subscribe();

        let device = engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();
        engine.register(&request("SN1", "M1"), "10.0.0.1").await.unwrap();
        engine.delete(device.device_id).await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), PresenceEvent::Registered { .. }));
        assert!(matches!(events.recv().await.unwrap(), PresenceEvent::ReRegistered { .. }));
        assert!(matches!(
            events.recv().await.unwrap(),
            PresenceEvent::Deleted { device_id, .. } if device_id == device.device_id
        ));
    }

    #[test]
    fn resolve_address_prefers_transport() {
        assert_eq!(resolve_address("1.2.3.4", Some("5.6.7.8")), "1.2.3.4");
        assert_eq!(resolve_address(" ", Some("5.6.7.8")), "5.6.7.8");
        assert_eq!(resolve_address("", None), "Unknown");
    }
}
