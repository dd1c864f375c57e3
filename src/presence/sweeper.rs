// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Periodic offline detection.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::PresenceEngine;
use crate::broadcast::{Message, Notification, NotificationKind, Publisher, Scope};
use crate::config::SweeperConfig;
use crate::device::Device;
use crate::error::Result;

/// Recurring task that demotes devices which stopped sending heartbeats.
///
/// Each run calls [`PresenceEngine::sweep`] with the configured timeout.
/// When a run demotes at least one device and a publisher is attached, a
/// "System Maintenance" notice goes to every observer.
pub struct LivenessSweeper {
    engine: Arc<PresenceEngine>,
    config: SweeperConfig,
    publisher: Option<Arc<dyn Publisher>>,
}

impl fmt::Debug for LivenessSweeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LivenessSweeper")
            .field("config", &self.config)
            .field("announces", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}

impl LivenessSweeper {
    #[must_use]
    pub fn new(engine: Arc<PresenceEngine>, config: SweeperConfig) -> Self {
        Self {
            engine,
            config,
            publisher: None,
        }
    }

    /// Announces completed cleanups through `publisher`.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Runs one sweep now.
    ///
    /// # Errors
    ///
    /// Propagates the error of [`PresenceEngine::sweep`].
    pub async fn run_once(&self) -> Result<Vec<Device>> {
        let demoted = self.engine.sweep(self.config.timeout_minutes).await?;
        if !demoted.is_empty()
            && self.config.announce_cleanup
            && let Some(publisher) = &self.publisher
        {
            publisher.publish(
                Scope::All,
                Message::from(Notification::new(
                    "System Maintenance",
                    "Offline devices cleanup completed",
                    NotificationKind::Info,
                )),
            );
        }
        Ok(demoted)
    }

    /// Starts sweeping every period on a background task.
    ///
    /// The first sweep happens one period after the call. A slow run delays
    /// the next tick rather than triggering a burst.
    #[must_use]
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.config.period();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                period_secs = period.as_secs(),
                timeout_minutes = self.config.timeout_minutes,
                "Liveness sweeper started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::warn!(error = %e, "Liveness sweep failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Liveness sweeper stopped");
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Control handle of a spawned [`LivenessSweeper`].
///
/// Dropping the handle also stops the sweeper, at its next wake-up.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the sweeper and waits for the current run to finish.
    pub async fn shutdown(self) {
        // The receiver is gone only if the task already ended.
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Liveness sweeper task failed");
        }
    }

    /// Returns `true` once the background task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
