// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Attached observers and their group memberships.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::{ConnectionId, ConnectionInfo, Message};
use crate::config::BroadcastConfig;
use crate::error::{Error, Result};

/// Outbound half of a connection, copied out of the registry for a fan-out.
pub(crate) type Outbound = (ConnectionId, mpsc::Sender<Message>);

#[derive(Debug)]
struct Entry {
    info: ConnectionInfo,
    sender: mpsc::Sender<Message>,
    groups: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Table {
    connections: HashMap<ConnectionId, Entry>,
    groups: HashMap<String, BTreeSet<ConnectionId>>,
}

/// Table of attached connections.
///
/// Connections and group memberships share one lock, so a snapshot taken
/// for a fan-out never sees a connection that is half attached or half
/// detached. Each connection owns a bounded outbound queue; the registry
/// hands the receiving end to the transport on [`attach`](Self::attach).
#[derive(Debug)]
pub struct ConnectionRegistry {
    table: RwLock<Table>,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    /// Creates an empty registry with default queue capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&BroadcastConfig::default())
    }

    /// Creates an empty registry.
    #[must_use]
    pub fn with_config(config: &BroadcastConfig) -> Self {
        Self {
            table: RwLock::new(Table::default()),
            queue_capacity: config.connection_queue_capacity.max(1),
        }
    }

    /// Registers a connection and returns its outbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyAttached`] if the id is already registered.
    /// The existing connection is left untouched.
    pub fn attach(&self, info: ConnectionInfo) -> Result<mpsc::Receiver<Message>> {
        self.insert(info, None)
    }

    /// Registers a connection with `greeting` already at the head of its
    /// queue.
    ///
    /// The greeting is queued before the connection becomes visible to
    /// fan-out, so no broadcast can overtake it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyAttached`] if the id is already registered.
    /// Nothing is queued in that case.
    pub fn attach_greeted(
        &self,
        info: ConnectionInfo,
        greeting: Message,
    ) -> Result<mpsc::Receiver<Message>> {
        self.insert(info, Some(greeting))
    }

    fn insert(
        &self,
        info: ConnectionInfo,
        greeting: Option<Message>,
    ) -> Result<mpsc::Receiver<Message>> {
        let mut table = self.table.write();
        if table.connections.contains_key(&info.id) {
            return Err(Error::AlreadyAttached(info.id));
        }

        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        if let Some(greeting) = greeting {
            // The queue is fresh and its receiver alive, so this cannot fail.
            let _ = sender.try_send(greeting);
        }
        table.connections.insert(
            info.id.clone(),
            Entry {
                info,
                sender,
                groups: BTreeSet::new(),
            },
        );
        Ok(receiver)
    }

    /// Removes a connection and all of its group memberships.
    ///
    /// Returns the connection's metadata, or `None` if it was not attached.
    pub fn detach(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        let mut table = self.table.write();
        let entry = table.connections.remove(id)?;
        for group in &entry.groups {
            remove_member(&mut table.groups, group, id);
        }
        Some(entry.info)
    }

    /// Adds a connection to a group.
    ///
    /// Returns `false` if the connection is not attached or the group name is
    /// blank. Joining a group twice is a no-op.
    pub fn join_group(&self, id: &ConnectionId, group: &str) -> bool {
        if group.trim().is_empty() {
            return false;
        }
        let mut table = self.table.write();
        let Some(entry) = table.connections.get_mut(id) else {
            return false;
        };
        entry.groups.insert(group.to_string());
        table
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(id.clone());
        true
    }

    /// Removes a connection from a group.
    ///
    /// Returns `true` if it was a member.
    pub fn leave_group(&self, id: &ConnectionId, group: &str) -> bool {
        let mut table = self.table.write();
        let Some(entry) = table.connections.get_mut(id) else {
            return false;
        };
        if !entry.groups.remove(group) {
            return false;
        }
        remove_member(&mut table.groups, group, id);
        true
    }

    /// Lists attached connections, oldest first.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .table
            .read()
            .connections
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        infos.sort_by(|a, b| a.attached_at.cmp(&b.attached_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    /// Returns the metadata of one connection.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        self.table.read().connections.get(id).map(|e| e.info.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.table.read().connections.contains_key(id)
    }

    /// Groups a connection belongs to, sorted by name.
    #[must_use]
    pub fn groups_of(&self, id: &ConnectionId) -> Vec<String> {
        self.table
            .read()
            .connections
            .get(id)
            .map(|entry| entry.groups.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Members of a group, sorted by id.
    #[must_use]
    pub fn members_of(&self, group: &str) -> Vec<ConnectionId> {
        self.table
            .read()
            .groups
            .get(group)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub(crate) fn snapshot_all(&self) -> Vec<Outbound> {
        self.snapshot_where(|_| true)
    }

    pub(crate) fn snapshot_except(&self, excluded: &ConnectionId) -> Vec<Outbound> {
        self.snapshot_where(|id| id != excluded)
    }

    pub(crate) fn snapshot_one(&self, id: &ConnectionId) -> Option<Outbound> {
        self.table
            .read()
            .connections
            .get(id)
            .map(|entry| (id.clone(), entry.sender.clone()))
    }

    pub(crate) fn snapshot_group(&self, group: &str) -> Vec<Outbound> {
        let table = self.table.read();
        let Some(members) = table.groups.get(group) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|id| {
                table
                    .connections
                    .get(id)
                    .map(|entry| (id.clone(), entry.sender.clone()))
            })
            .collect()
    }

    fn snapshot_where(&self, keep: impl Fn(&ConnectionId) -> bool) -> Vec<Outbound> {
        self.table
            .read()
            .connections
            .iter()
            .filter(|(id, _)| keep(id))
            .map(|(id, entry)| (id.clone(), entry.sender.clone()))
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_member(
    groups: &mut HashMap<String, BTreeSet<ConnectionId>>,
    group: &str,
    id: &ConnectionId,
) {
    if let Some(members) = groups.get_mut(group) {
        members.remove(id);
        if members.is_empty() {
            groups.remove(group);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{Notification, NotificationKind};

    fn info(id: &str) -> ConnectionInfo {
        ConnectionInfo::new(id, "127.0.0.1", "test-agent")
    }

    fn note(title: &str) -> Message {
        Notification::new(title, "body", NotificationKind::Info).into()
    }

    #[test]
    fn attach_rejects_duplicate_id() {
        let registry = ConnectionRegistry::new();
        let _rx = registry.attach(info("c1")).unwrap();

        let err = registry.attach(info("c1")).unwrap_err();
        assert!(matches!(err, Error::AlreadyAttached(id) if id.as_str() == "c1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn greeting_is_queued_before_the_connection_is_visible() {
        let registry = ConnectionRegistry::new();
        let mut rx = registry.attach_greeted(info("c1"), note("hello")).unwrap();

        for (_, sender) in registry.snapshot_all() {
            sender.try_send(note("broadcast")).unwrap();
        }

        let titles: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|message| match message {
                Message::Notification(n) => n.title,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(titles, vec!["hello", "broadcast"]);
    }

    #[test]
    fn greeted_attach_rejects_duplicate_without_queueing() {
        let registry = ConnectionRegistry::new();
        let mut rx = registry.attach(info("c1")).unwrap();
        assert!(registry.attach_greeted(info("c1"), note("hello")).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn detach_clears_group_membership() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::from("c1");
        let _rx = registry.attach(info("c1")).unwrap();
        registry.join_group(&id, "ops");
        registry.join_group(&id, "device_x");

        let removed = registry.detach(&id).unwrap();
        assert_eq!(removed.id, id);
        assert!(registry.members_of("ops").is_empty());
        assert!(registry.members_of("device_x").is_empty());
        assert!(registry.detach(&id).is_none());
    }

    #[test]
    fn join_requires_attached_connection() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.join_group(&ConnectionId::from("ghost"), "ops"));
        assert!(registry.members_of("ops").is_empty());
    }

    #[test]
    fn join_rejects_blank_group() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::from("c1");
        let _rx = registry.attach(info("c1")).unwrap();
        assert!(!registry.join_group(&id, " "));
        assert!(registry.groups_of(&id).is_empty());
    }

    #[test]
    fn join_twice_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::from("c1");
        let _rx = registry.attach(info("c1")).unwrap();
        assert!(registry.join_group(&id, "ops"));
        assert!(registry.join_group(&id, "ops"));
        assert_eq!(registry.members_of("ops"), vec![id.clone()]);
        assert_eq!(registry.groups_of(&id), vec!["ops".to_string()]);
    }

    #[test]
    fn leave_reports_membership() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::from("c1");
        let _rx = registry.attach(info("c1")).unwrap();
        registry.join_group(&id, "ops");

        assert!(registry.leave_group(&id, "ops"));
        assert!(!registry.leave_group(&id, "ops"));
        assert!(registry.snapshot_group("ops").is_empty());
    }

    #[test]
    fn snapshots_select_targets() {
        let registry = ConnectionRegistry::new();
        let _a = registry.attach(info("a")).unwrap();
        let _b = registry.attach(info("b")).unwrap();
        let a = ConnectionId::from("a");
        registry.join_group(&a, "ops");

        assert_eq!(registry.snapshot_all().len(), 2);
        let others: Vec<ConnectionId> =
            registry.snapshot_except(&a).into_iter().map(|(id, _)| id).collect();
        assert_eq!(others, vec![ConnectionId::from("b")]);
        assert_eq!(registry.snapshot_group("ops").len(), 1);
        assert!(registry.snapshot_one(&ConnectionId::from("zz")).is_none());
    }

    #[test]
    fn connections_are_listed_oldest_first() {
        let registry = ConnectionRegistry::new();
        let now = chrono::Utc::now();
        let _b = registry
            .attach(info("b").attached_at(now + chrono::Duration::seconds(1)))
            .unwrap();
        let _a = registry.attach(info("a").attached_at(now)).unwrap();

        let ids: Vec<String> = registry
            .connections()
            .into_iter()
            .map(|c| c.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
