// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Best-effort audit trail writer.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use super::{DeviceEvent, EventType, Severity};
use crate::device::DeviceId;
use crate::store::CommitOutcome;

/// Builds audit records and absorbs audit failures.
///
/// A record is appended in the same [`DeviceStore::commit`] as the device
/// write it documents, stamped with the engine's clock. Device state changes
/// never wait on, or roll back because of, the audit trail. When the append
/// half of a commit fails the logger reports it through `tracing` and counts
/// it; the caller's mutation stands.
///
/// [`DeviceStore::commit`]: crate::store::DeviceStore::commit
#[derive(Debug, Default)]
pub struct EventLogger {
    failures: AtomicU64,
}

impl EventLogger {
    /// Creates a logger with a zero failure count.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the record for a transition.
    #[must_use]
    pub fn record(
        &self,
        device_id: DeviceId,
        event_type: EventType,
        message: impl Into<String>,
        severity: Severity,
        timestamp: DateTime<Utc>,
    ) -> DeviceEvent {
        DeviceEvent::new(device_id, event_type, message, severity, timestamp)
    }

    /// Inspects the audit half of a commit and reports a lost event.
    ///
    /// Returns `true` if the event was stored.
    pub fn settle(&self, device_id: DeviceId, event_type: EventType, outcome: &CommitOutcome) -> bool {
        match &outcome.audit {
            Ok(()) => true,
            Err(e) => {
                self.note_failure(device_id, event_type, e);
                false
            }
        }
    }

    /// Returns the number of audit records lost so far.
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn note_failure(&self, device_id: DeviceId, event_type: EventType, error: &dyn std::error::Error) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            %device_id,
            event_type = %event_type,
            error = %error,
            "Failed to append device event"
        );
    }
}
