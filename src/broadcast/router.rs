// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fire-and-forget fan-out to attached connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::message::WELCOME_TEXT;
use super::registry::Outbound;
use super::{
    ClientSummary, ConnectionId, ConnectionInfo, ConnectionRegistry, Message, Notification,
    NotificationKind,
};
use crate::device::DeviceId;
use crate::error::Result;

/// Who a message is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every attached connection.
    All,
    /// One connection. Unknown ids are ignored.
    Connection(ConnectionId),
    /// Current members of a group.
    Group(String),
}

/// Outbound side of the broadcast layer, as seen by producers.
pub trait Publisher: Send + Sync {
    /// Delivers `message` to every target in `scope`.
    ///
    /// Returns the number of connections the message was queued for.
    fn publish(&self, scope: Scope, message: Message) -> usize;
}

/// Delivers messages to connections held in a [`ConnectionRegistry`].
///
/// Delivery is at most once and never blocks: the target list is
/// snapshotted under the registry's read lock, then each message is queued
/// with `try_send` after the lock is released. A full or closed queue drops
/// that one delivery and the fan-out continues.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use presence_lib::broadcast::{BroadcastRouter, ConnectionInfo, ConnectionRegistry};
///
/// let router = BroadcastRouter::new(Arc::new(ConnectionRegistry::new()));
/// let mut rx = router.attach(ConnectionInfo::new("c1", "10.0.0.5", "browser")).unwrap();
///
/// let welcome = rx.try_recv().unwrap();
/// assert_eq!(welcome.method(), "WelcomeMessage");
/// ```
#[derive(Debug)]
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl BroadcastRouter {
    /// Creates a router over `registry`.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Returns the underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    // =========================================================================
    // Addressing
    // =========================================================================

    /// Queues `message` for every connection.
    pub fn to_all(&self, message: Message) -> usize {
        self.deliver(self.registry.snapshot_all(), &message)
    }

    /// Queues `message` for one connection. Returns `false` if it is not
    /// attached or its queue refused the message.
    pub fn to_connection(&self, id: &ConnectionId, message: Message) -> bool {
        match self.registry.snapshot_one(id) {
            Some(target) => self.deliver(vec![target], &message) == 1,
            None => false,
        }
    }

    /// Queues `message` for the current members of `group`.
    pub fn to_group(&self, group: &str, message: Message) -> usize {
        self.deliver(self.registry.snapshot_group(group), &message)
    }

    /// Queues `message` for everyone except `excluded`.
    pub fn to_others(&self, excluded: &ConnectionId, message: Message) -> usize {
        self.deliver(self.registry.snapshot_except(excluded), &message)
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Attaches a connection.
    ///
    /// The new connection receives its welcome before anything else; every
    /// other connection is then told about it. The new connection never
    /// sees its own announcement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyAttached`](crate::Error::AlreadyAttached) if
    /// the id is taken. Nothing is sent in that case.
    pub fn attach(&self, info: ConnectionInfo) -> Result<mpsc::Receiver<Message>> {
        let id = info.id.clone();
        let connected_at = info.attached_at;
        let client_ip = info.remote_address.clone();
        let user_agent = info.descriptor.clone();

        let welcome = Message::Welcome {
            message: WELCOME_TEXT.to_string(),
            connection_id: id.clone(),
            connected_at,
        };
        let receiver = self.registry.attach_greeted(info, welcome)?;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        tracing::info!(connection_id = %id, remote_address = %client_ip, "Client connected");

        self.to_others(
            &id,
            Message::ClientConnected {
                connection_id: id.clone(),
                client_ip,
                user_agent,
                connected_at,
                total_connections: self.registry.len(),
            },
        );
        Ok(receiver)
    }

    /// Detaches a connection and tells the remaining ones.
    ///
    /// Returns `false` if the connection was not attached.
    pub fn detach(&self, id: &ConnectionId) -> bool {
        if self.registry.detach(id).is_none() {
            return false;
        }
        tracing::info!(connection_id = %id, "Client disconnected");

        self.to_all(Message::ClientDisconnected {
            connection_id: id.clone(),
            disconnected_at: Utc::now(),
            total_connections: self.registry.len(),
        });
        true
    }

    /// Adds a connection to a group and announces it to the group,
    /// including the joiner.
    pub fn join_group(&self, id: &ConnectionId, group: &str) -> bool {
        if !self.registry.join_group(id, group) {
            return false;
        }
        tracing::info!(connection_id = %id, group, "Client joined group");

        self.to_group(
            group,
            Message::UserJoinedGroup {
                connection_id: id.clone(),
                group_name: group.to_string(),
                joined_at: Utc::now(),
            },
        );
        true
    }

    /// Removes a connection from a group and announces it to the members
    /// that remain.
    pub fn leave_group(&self, id: &ConnectionId, group: &str) -> bool {
        if !self.registry.leave_group(id, group) {
            return false;
        }
        tracing::info!(connection_id = %id, group, "Client left group");

        self.to_group(
            group,
            Message::UserLeftGroup {
                connection_id: id.clone(),
                group_name: group.to_string(),
                left_at: Utc::now(),
            },
        );
        true
    }

    /// Subscribes a connection to notices about one device.
    pub fn join_device_group(&self, id: &ConnectionId, device_id: DeviceId) -> bool {
        let joined = self.registry.join_group(id, &device_id.group_name());
        if joined {
            tracing::info!(connection_id = %id, %device_id, "Client joined device group");
        }
        joined
    }

    /// Unsubscribes a connection from one device's notices.
    pub fn leave_device_group(&self, id: &ConnectionId, device_id: DeviceId) -> bool {
        let left = self.registry.leave_group(id, &device_id.group_name());
        if left {
            tracing::info!(connection_id = %id, %device_id, "Client left device group");
        }
        left
    }

    // =========================================================================
    // Client requests
    // =========================================================================

    /// Relays a chat line from `sender` to every connection, sender
    /// included. Blank lines are ignored.
    pub fn chat(&self, sender: &ConnectionId, text: &str) -> usize {
        if text.trim().is_empty() {
            return 0;
        }
        tracing::info!(connection_id = %sender, "Chat message relayed");
        self.to_all(Message::Chat {
            message: text.to_string(),
            sender: sender.clone(),
            timestamp: Utc::now(),
        })
    }

    /// Sends the list of attached connections to `requester`.
    pub fn send_connected_clients(&self, requester: &ConnectionId) -> bool {
        let clients = self
            .registry
            .connections()
            .into_iter()
            .map(|info| ClientSummary {
                info: info.summary(),
                connection_id: info.id,
            })
            .collect();
        self.to_connection(requester, Message::ConnectedClients(clients))
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Sends a notification to everyone.
    pub fn notify_all(&self, notification: Notification) -> usize {
        tracing::debug!(title = %notification.title, "Notification sent to all clients");
        self.to_all(notification.into())
    }

    /// Sends a notification to one connection.
    pub fn notify_connection(&self, id: &ConnectionId, notification: Notification) -> bool {
        self.to_connection(id, notification.into())
    }

    /// Sends a notification to a group, tagged with the group name.
    pub fn notify_group(&self, group: &str, notification: Notification) -> usize {
        self.to_group(group, notification.for_group(group).into())
    }

    /// Sends a notification to the observers of one device.
    pub fn notify_device_group(&self, device_id: DeviceId, notification: Notification) -> usize {
        self.to_group(
            &device_id.group_name(),
            notification.for_device(device_id).into(),
        )
    }

    /// Announces a system-level event, such as a completed cleanup.
    pub fn notify_system_event(
        &self,
        title: &str,
        message: &str,
        kind: NotificationKind,
    ) -> usize {
        tracing::info!(title, "System event announced");
        self.to_all(Notification::new(title, message, kind).into())
    }

    // =========================================================================
    // Counters
    // =========================================================================

    /// Messages queued so far.
    #[must_use]
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Deliveries dropped because a queue was full or closed.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn deliver(&self, targets: Vec<Outbound>, message: &Message) -> usize {
        let mut delivered = 0;
        for (id, sender) in targets {
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(connection_id = %id, method = message.method(), "Outbound queue full, message dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(connection_id = %id, method = message.method(), "Connection closed, message dropped");
                }
            }
        }
        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }
}

impl Publisher for BroadcastRouter {
    fn publish(&self, scope: Scope, message: Message) -> usize {
        match scope {
            Scope::All => self.to_all(message),
            Scope::Connection(id) => usize::from(self.to_connection(&id, message)),
            Scope::Group(group) => self.to_group(&group, message),
        }
    }
}
