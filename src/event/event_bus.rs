// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event bus for presence transitions.

use tokio::sync::broadcast;

use super::PresenceEvent;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast channel carrying [`PresenceEvent`]s to in-process subscribers.
///
/// Every subscriber gets its own copy of each event. A subscriber that falls
/// more than `capacity` events behind loses the oldest ones and sees
/// `RecvError::Lagged` on its next receive.
///
/// # Examples
///
/// ```
/// use presence_lib::event::EventBus;
///
/// let bus = EventBus::new();
/// let _rx = bus.subscribe();
/// assert_eq!(bus.subscriber_count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PresenceEvent>,
}

impl EventBus {
    /// Creates a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new event bus with the specified capacity.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes an event and returns how many subscribers received it.
    ///
    /// Events published without subscribers are discarded.
    pub fn publish(&self, event: PresenceEvent) -> usize {
        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                tracing::trace!("Presence event dropped, no subscribers");
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::device::{Device, DeviceId, DeviceRegistrationRequest};

    fn registered() -> PresenceEvent {
        let request = DeviceRegistrationRequest::new("Meter", "Sensor");
        let device =
            Device::from_registration(DeviceId::new(), &request, 30, "192.168.0.2", Utc::now());
        PresenceEvent::Registered { device }
    }

    #[test]
    fn subscriber_count_tracks_receivers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        let rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn publish_delivers_to_every_subscriber() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let event = registered();
        let id = event.device_id();
        assert_eq!(bus.publish(event), 2);

        assert_eq!(rx1.recv().await.unwrap().device_id(), id);
        assert_eq!(rx2.recv().await.unwrap().device_id(), id);
    }

    #[test]
    fn publish_without_subscribers_returns_zero() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(registered()), 0);
    }

    #[test]
    fn clones_share_the_channel() {
        let bus = EventBus::with_capacity(8);
        let clone = bus.clone();
        let _rx = bus.subscribe();
        assert_eq!(clone.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn slow_subscriber_lags() {
        let bus = EventBus::with_capacity(1);
        let mut rx = bus.subscribe();

        bus.publish(registered());
        bus.publish(registered());

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
    }
}
