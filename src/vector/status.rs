//! Store statistics, indexing progress and the notification sink.

use crate::vector::engine::VectorEngine;
use crate::vector::models::{CollectionStats, SourceProgress, StoreState};
use crate::vector::state::WorkspaceState;

use serde::Serialize;
use std::path::Path;
use tokio::sync::broadcast;

/// Event carrying per-collection statistics.
pub const STATS_EVENT: &str = "vector-store:stats";

/// Event carrying aggregate indexing progress.
pub const PROGRESS_EVENT: &str = "vector-store:progress";

/// Fire-and-forget sink for store events. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, workspace: &str, event: &str, payload: serde_json::Value);
}

/// A published event.
#[derive(Debug, Clone, Serialize)]
pub struct StoreEvent {
    pub workspace: String,
    pub event: String,
    pub payload: serde_json::Value,
}

/// Fans events out to any number of in-process subscribers. Events sent
/// while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<StoreEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<StoreEvent>) {
        let (sender, receiver) = broadcast::channel(capacity);
        (Self { sender }, receiver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, workspace: &str, event: &str, payload: serde_json::Value) {
        let _ = self.sender.send(StoreEvent {
            workspace: workspace.to_string(),
            event: event.to_string(),
            payload,
        });
    }
}

/// Writes events to the log at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, workspace: &str, event: &str, payload: serde_json::Value) {
        tracing::debug!(workspace, event, %payload, "vector store event");
    }
}

impl VectorEngine {
    /// Recompute statistics for every configured collection and publish
    /// them. Failures are logged and reported as a missing collection.
    pub(crate) async fn publish_stats(&self, workspace: &WorkspaceState) -> StoreState {
        let mut tables = std::collections::BTreeMap::new();
        for kind in self.config.kinds() {
            let mut stats = CollectionStats::default();
            match self.existing_collection(workspace, kind).await {
                Ok(Some(table)) => {
                    stats.exists = true;
                    stats.last_indexed = Some(chrono::Utc::now());
                    match table.count_records().await {
                        Ok(count) => stats.count = count,
                        Err(error) => tracing::warn!(%error, %kind, "failed to count collection"),
                    }
                }
                Ok(None) => {}
                Err(error) => tracing::warn!(%error, %kind, "failed to open collection for stats"),
            }
            tables.insert(kind.to_string(), stats);
        }

        let state = workspace.update_status(|status| status.tables = tables);
        self.publish(workspace, STATS_EVENT, &state);
        state
    }

    /// Public form of [`publish_stats`](Self::publish_stats) keyed by root.
    pub async fn refresh_stats(&self, root: &Path) -> crate::Result<StoreState> {
        let workspace = self.workspace(root)?;
        Ok(self.publish_stats(&workspace).await)
    }

    /// Record progress for one indexing source and publish the aggregate.
    ///
    /// Aggregate progress is the ratio of indexed to total items over all
    /// sources; with nothing to index it reads as complete.
    pub fn update_progress(
        &self,
        root: &Path,
        source: &str,
        indexed: u64,
        total: u64,
    ) -> crate::Result<StoreState> {
        let workspace = self.workspace(root)?;
        let state = workspace.update_status(|status| {
            status
                .sources
                .insert(source.to_string(), SourceProgress { indexed, total });
            let (done, all) = status
                .sources
                .values()
                .fold((0u64, 0u64), |(done, all), progress| {
                    (
                        done.saturating_add(progress.indexed),
                        all.saturating_add(progress.total),
                    )
                });
            status.progress = aggregate_percent(done, all);
            status.indexing = status
                .sources
                .values()
                .any(|progress| progress.indexed < progress.total);
        });
        self.publish(&workspace, PROGRESS_EVENT, &state);
        Ok(state)
    }

    fn publish(&self, workspace: &WorkspaceState, event: &str, state: &StoreState) {
        match serde_json::to_value(state) {
            Ok(payload) => self.notifier.notify(workspace.key().id(), event, payload),
            Err(error) => tracing::warn!(%error, event, "failed to serialize store state"),
        }
    }
}

fn aggregate_percent(done: u64, all: u64) -> u8 {
    if all == 0 {
        return 100;
    }
    let percent = (done as f64 / all as f64 * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Records every event for later inspection.
    #[derive(Default)]
    pub struct CollectingNotifier {
        pub events: Mutex<Vec<StoreEvent>>,
    }

    impl CollectingNotifier {
        pub fn named(&self, event: &str) -> Vec<StoreEvent> {
            self.events
                .lock()
                .iter()
                .filter(|e| e.event == event)
                .cloned()
                .collect()
        }
    }

    impl Notifier for CollectingNotifier {
        fn notify(&self, workspace: &str, event: &str, payload: serde_json::Value) {
            self.events.lock().push(StoreEvent {
                workspace: workspace.to_string(),
                event: event.to_string(),
                payload,
            });
        }
    }
}
