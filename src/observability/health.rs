//! Health state shared with external probes

use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use futures::future;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

/// Serving status of one health key
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServingStatus {
    #[default]
    Unknown,
    Serving,
    NotServing,
}

/// Map of service name to serving status.
///
/// Each key owns a `watch` channel so callers can either poll with
/// [`HealthRegistry::get`] or follow changes with [`HealthRegistry::watch`].
/// After [`HealthRegistry::shutdown`] every key is `NotServing` and further
/// `set` calls are ignored.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    statuses: DashMap<String, watch::Sender<ServingStatus>>,
    shutting_down: AtomicBool,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the status for `key`, creating the key if absent
    pub fn set(&self, key: &str, status: ServingStatus) {
        if self.shutting_down.load(Ordering::SeqCst) {
            debug!("Ignoring health update for '{}' during shutdown", key);
            return;
        }
        self.store(key, status);
    }

    fn store(&self, key: &str, status: ServingStatus) {
        let sender = self
            .statuses
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(ServingStatus::Unknown).0);
        sender.send_replace(status);
        debug!("Health status for '{}' set to {:?}", key, status);
    }

    /// Current status for `key`; `Unknown` if it was never set
    pub fn get(&self, key: &str) -> ServingStatus {
        self.statuses
            .get(key)
            .map(|sender| *sender.borrow())
            .unwrap_or_default()
    }

    /// Live sequence of statuses for `key`, starting with the current one.
    ///
    /// The stream never ends on its own; call `watch` again to restart it.
    /// A key that was never set yields a single `Unknown` and ends, without
    /// being added to the registry.
    pub fn watch(&self, key: &str) -> BoxStream<'static, ServingStatus> {
        match self.statuses.get(key) {
            Some(sender) => WatchStream::new(sender.subscribe()).boxed(),
            None => {
                debug!("Watch on unregistered health key '{}'", key);
                stream::once(future::ready(ServingStatus::Unknown)).boxed()
            }
        }
    }

    /// Set every known key to `status`
    pub fn set_all(&self, status: ServingStatus) {
        if self.is_shutting_down() {
            return;
        }
        for entry in self.statuses.iter() {
            entry.value().send_replace(status);
        }
    }

    /// Mark every key `NotServing` and freeze the registry
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        for entry in self.statuses.iter() {
            entry.value().send_replace(ServingStatus::NotServing);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Snapshot of every key and its status
    pub fn snapshot(&self) -> Vec<(String, ServingStatus)> {
        let mut entries: Vec<_> = self
            .statuses
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value().borrow()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
