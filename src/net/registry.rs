//! Registry of in-flight connections.
//!
//! The registry is the only state shared between connection tasks and the
//! accept loop. A mutex guards the map and a `Notify` plays the role of the
//! condition variable: every removal wakes the accept loop, which re-checks
//! the size before accepting again.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::Notify;

use crate::net::connection::{Completion, Connection, ConnectionId};
use crate::observability::metrics;

#[derive(Debug)]
struct ActiveEntry {
    peer: SocketAddr,
    started: Instant,
}

/// Set of connections currently being served.
#[derive(Debug, Default)]
pub struct ActiveRegistry {
    active: Mutex<HashMap<ConnectionId, ActiveEntry>>,
    changed: Notify,
}

impl ActiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ActiveEntry>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current number of in-flight connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Register a freshly accepted connection.
    ///
    /// The returned entry removes it again, either through
    /// [`RegistryEntry::finish`] or, if the task dies first, on drop.
    pub fn insert(self: &Arc<Self>, connection: &Connection) -> RegistryEntry {
        let active = {
            let mut map = self.lock();
            map.insert(
                connection.id(),
                ActiveEntry {
                    peer: connection.peer(),
                    started: connection.started(),
                },
            );
            map.len()
        };
        metrics::record_connection_opened();
        tracing::debug!(
            connection_id = %connection.id(),
            peer = %connection.peer(),
            active,
            "Connection registered"
        );
        self.changed.notify_waiters();

        RegistryEntry {
            registry: Arc::clone(self),
            id: connection.id(),
            done: false,
        }
    }

    /// Wait until fewer than `max` connections are in flight.
    ///
    /// Re-checks the size after every wake-up.
    pub async fn wait_for_capacity(&self, max: usize) {
        let mut logged = false;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a removal in between is not missed.
            notified.as_mut().enable();

            let active = self.len();
            if active < max {
                return;
            }
            if !logged {
                tracing::info!(
                    active,
                    max_connections = max,
                    "Active connection limit reached, waiting for a connection to finish"
                );
                logged = true;
            }
            notified.await;
        }
    }

    fn remove(&self, id: ConnectionId) -> Option<(ActiveEntry, usize)> {
        let mut map = self.lock();
        let entry = map.remove(&id)?;
        Some((entry, map.len()))
    }
}

/// Registration of one connection. Removing it frees a slot.
#[derive(Debug)]
pub struct RegistryEntry {
    registry: Arc<ActiveRegistry>,
    id: ConnectionId,
    done: bool,
}

impl RegistryEntry {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remove the connection and log its outcome.
    pub fn finish(mut self, connection: &Connection, completion: &Completion) {
        self.done = true;
        let Some((entry, active)) = self.registry.remove(self.id) else {
            return;
        };
        let elapsed = entry.started.elapsed();
        metrics::record_connection_finished(completion.succeeded, elapsed);

        if completion.succeeded {
            tracing::info!(
                connection_id = %self.id,
                peer = %entry.peer,
                request = %connection.request_line(),
                upload_bytes = completion.upload_bytes,
                download_bytes = completion.download_bytes,
                elapsed_ms = elapsed.as_millis() as u64,
                active,
                "Connection finished"
            );
        } else {
            tracing::warn!(
                connection_id = %self.id,
                peer = %entry.peer,
                request = %connection.request_line(),
                upload_bytes = completion.upload_bytes,
                download_bytes = completion.download_bytes,
                elapsed_ms = elapsed.as_millis() as u64,
                active,
                error = completion.error.as_deref().unwrap_or("unknown"),
                "Connection failed"
            );
        }
        self.registry.changed.notify_waiters();
    }
}

impl Drop for RegistryEntry {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some((entry, active)) = self.registry.remove(self.id) {
            metrics::record_connection_finished(false, entry.started.elapsed());
            tracing::warn!(
                connection_id = %self.id,
                peer = %entry.peer,
                active,
                "Connection task ended without reporting"
            );
        }
        self.registry.changed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn connection() -> Connection {
        Connection::new("127.0.0.1:40000".parse().unwrap())
    }

    #[test]
    fn insert_and_finish_track_size() {
        let registry = Arc::new(ActiveRegistry::new());
        let c1 = connection();
        let c2 = connection();

        let e1 = registry.insert(&c1);
        let e2 = registry.insert(&c2);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(c1.id()));

        e1.finish(&c1, &Completion::success(10, 20));
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(c1.id()));

        e2.finish(&c2, &Completion::failure("boom", 0, 0));
        assert!(registry.is_empty());
    }

    #[test]
    fn dropped_entry_is_removed() {
        let registry = Arc::new(ActiveRegistry::new());
        let c = connection();
        let entry = registry.insert(&c);
        assert_eq!(entry.id(), c.id());
        drop(entry);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn capacity_available_returns_immediately() {
        let registry = Arc::new(ActiveRegistry::new());
        let c = connection();
        let _entry = registry.insert(&c);
        tokio::time::timeout(Duration::from_millis(100), registry.wait_for_capacity(2))
            .await
            .expect("slot is free");
    }

    #[tokio::test]
    async fn waiter_wakes_when_a_connection_finishes() {
        let registry = Arc::new(ActiveRegistry::new());
        let c1 = connection();
        let c2 = connection();
        let e1 = registry.insert(&c1);
        let _e2 = registry.insert(&c2);

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_for_capacity(2).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        e1.finish(&c1, &Completion::success(0, 0));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter released")
            .unwrap();
    }

    #[tokio::test]
    async fn waiter_keeps_waiting_while_still_full() {
        let registry = Arc::new(ActiveRegistry::new());
        let c1 = connection();
        let e1 = registry.insert(&c1);

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_for_capacity(1).await })
        };

        // A new registration wakes the waiter but the registry is still full.
        let c2 = connection();
        let e2 = registry.insert(&c2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        e2.finish(&c2, &Completion::success(0, 0));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(e1);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter released")
            .unwrap();
    }
}
