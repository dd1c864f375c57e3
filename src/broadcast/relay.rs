// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridge from presence transitions to observer messages.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use super::{Message, Notification, NotificationKind, Publisher, Scope};
use crate::device::Device;
use crate::event::{EventType, PresenceEvent, Severity};

/// Turns each [`PresenceEvent`] into broadcast messages.
///
/// Every transition produces a status update for all observers and a
/// device event for the device's own group. Registrations, explicit status
/// changes and deletions also raise a titled notification to everyone.
pub struct PresenceRelay {
    publisher: Arc<dyn Publisher>,
    lagged: AtomicU64,
}

impl fmt::Debug for PresenceRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceRelay")
            .field("lagged", &self.lagged_count())
            .finish_non_exhaustive()
    }
}

impl PresenceRelay {
    #[must_use]
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            lagged: AtomicU64::new(0),
        }
    }

    /// Publishes the messages for one event. Returns the number of queued
    /// deliveries.
    pub fn handle(&self, event: &PresenceEvent) -> usize {
        messages_for(event)
            .into_iter()
            .map(|(scope, message)| self.publisher.publish(scope, message))
            .sum()
    }

    /// Forwards events until the bus closes.
    ///
    /// A lagging relay skips the events it missed and keeps going.
    pub async fn run(&self, mut events: broadcast::Receiver<PresenceEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    self.handle(&event);
                }
                Err(RecvError::Lagged(missed)) => {
                    self.lagged.fetch_add(missed, Ordering::Relaxed);
                    tracing::warn!(missed, "Presence relay lagged, events skipped");
                }
                Err(RecvError::Closed) => {
                    tracing::debug!("Presence event bus closed, relay stopping");
                    break;
                }
            }
        }
    }

    /// Runs the relay on a background task.
    pub fn spawn(self: Arc<Self>, events: broadcast::Receiver<PresenceEvent>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(events).await })
    }

    /// Events skipped because the relay fell behind.
    #[must_use]
    pub fn lagged_count(&self) -> u64 {
        self.lagged.load(Ordering::Relaxed)
    }
}

/// Maps one transition to its addressed messages.
#[must_use]
pub fn messages_for(event: &PresenceEvent) -> Vec<(Scope, Message)> {
    match event {
        PresenceEvent::Registered { device } | PresenceEvent::ReRegistered { device } => {
            let (event_type, message) = if matches!(event, PresenceEvent::Registered { .. }) {
                (EventType::Register, "Device registered")
            } else {
                (EventType::ReRegister, "Device re-registered")
            };
            vec![
                (
                    Scope::All,
                    Notification::new(
                        "Device Registered",
                        format!(
                            "Device '{}' has been registered and is now online!",
                            device.device_name
                        ),
                        NotificationKind::Success,
                    )
                    .into(),
                ),
                status_update(device),
                device_event(device, event_type, message, Severity::Info),
            ]
        }
        PresenceEvent::Heartbeat {
            device,
            data,
            recovered_from,
        } => {
            let mut messages = vec![(
                Scope::All,
                Message::DeviceHeartbeat {
                    device_id: device.device_id,
                    device_name: device.device_name.clone(),
                    timestamp: device.last_seen.unwrap_or(device.updated_at),
                    data: data.clone(),
                },
            )];
            if let Some(previous) = recovered_from {
                messages.push(status_update(device));
                messages.push(device_event(
                    device,
                    EventType::StatusChange,
                    &format!("Status changed from {previous} to {}", device.status),
                    Severity::Info,
                ));
            }
            messages
        }
        PresenceEvent::StatusChanged { device, old_status } => vec![
            (
                Scope::All,
                Notification::new(
                    "Device Status Updated",
                    format!("Device status has been updated to: {}", device.status),
                    NotificationKind::Info,
                )
                .into(),
            ),
            status_update(device),
            device_event(
                device,
                EventType::StatusChange,
                &format!("Status changed from {old_status} to {}", device.status),
                Severity::Info,
            ),
        ],
        PresenceEvent::ErrorReported { device, message } => vec![
            status_update(device),
            device_event(device, EventType::Error, message, Severity::Error),
        ],
        PresenceEvent::WentOffline { device } => vec![
            status_update(device),
            device_event(device, EventType::Offline, "Device went offline", Severity::Warning),
        ],
        PresenceEvent::Deleted {
            device_id,
            device_name,
        } => {
            let notification = Notification::new(
                "Device Deleted",
                format!("Device '{device_name}' has been removed from the system"),
                NotificationKind::Warning,
            );
            vec![
                (Scope::All, notification.clone().into()),
                (
                    Scope::Group(device_id.group_name()),
                    notification.for_device(*device_id).into(),
                ),
            ]
        }
    }
}

fn status_update(device: &Device) -> (Scope, Message) {
    (
        Scope::All,
        Message::device_status_update(device.device_id, device.device_name.clone(), device.status),
    )
}

fn device_event(
    device: &Device,
    event_type: EventType,
    message: &str,
    severity: Severity,
) -> (Scope, Message) {
    (
        Scope::Group(device.device_id.group_name()),
        Message::device_event(
            device.device_id,
            device.device_name.clone(),
            event_type,
            message,
            severity,
        ),
    )
}
