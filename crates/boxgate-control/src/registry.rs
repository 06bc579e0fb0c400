//! Connection registry: which box is reachable right now, and over which
//! channel
//!
//! The registry is the single source of truth for box reachability. A new
//! successful identification under an id that is already registered
//! replaces the entry atomically and forcibly closes the superseded
//! channel; teardown only removes an entry when it still belongs to the
//! connection tearing down, so a stale disconnect can never evict a newer
//! registration.

use boxgate_proto::{Frame, CLOSE_SUPERSEDED};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::status::{BoxStatus, BoxStatusStore};

/// Outbound command for a box's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum BoxCommand {
    /// Send a frame over the tunnel
    Frame(Frame),
    /// Close the underlying connection with the given code and reason
    Close { code: u16, reason: String },
}

/// The box's channel is gone; the frame was not delivered
#[derive(Debug, Error)]
#[error("Box channel closed")]
pub struct ChannelClosed;

/// Handle to one live box connection
///
/// `conn_id` distinguishes this physical channel from any later channel
/// registered under the same box id.
#[derive(Debug, Clone)]
pub struct BoxHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<BoxCommand>,
    connected_at: DateTime<Utc>,
}

impl BoxHandle {
    pub fn new(tx: mpsc::UnboundedSender<BoxCommand>) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            tx,
            connected_at: Utc::now(),
        }
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queue a frame for delivery over the tunnel
    pub fn send_frame(&self, frame: Frame) -> Result<(), ChannelClosed> {
        self.tx
            .send(BoxCommand::Frame(frame))
            .map_err(|_| ChannelClosed)
    }

    /// Ask the writer task to close the connection. Best-effort: a channel
    /// that is already gone needs no closing.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(BoxCommand::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Registry of live box connections
pub struct ConnectionRegistry {
    boxes: DashMap<String, BoxHandle>,
    status: Arc<dyn BoxStatusStore>,
}

impl ConnectionRegistry {
    pub fn new(status: Arc<dyn BoxStatusStore>) -> Self {
        Self {
            boxes: DashMap::new(),
            status,
        }
    }

    /// Register a box's channel, superseding any prior one under the same
    /// id. The evicted channel is told to close. The box is marked online
    /// in the status store, best-effort.
    pub async fn register(&self, box_id: &str, handle: BoxHandle) {
        let conn_id = handle.conn_id();
        let evicted = self.boxes.insert(box_id.to_string(), handle);

        if let Some(old) = evicted {
            info!(
                box_id = %box_id,
                old_conn_id = %old.conn_id(),
                new_conn_id = %conn_id,
                "Superseding existing box connection"
            );
            old.close(CLOSE_SUPERSEDED, "superseded");
        } else {
            info!(box_id = %box_id, conn_id = %conn_id, "Registered box connection");
        }

        if let Err(e) = self.status.set_box_status(box_id, BoxStatus::Online).await {
            warn!(box_id = %box_id, error = %e, "Failed to mark box online");
        }
    }

    /// Look up the live channel for a box id
    pub fn lookup(&self, box_id: &str) -> Option<BoxHandle> {
        self.boxes.get(box_id).map(|entry| entry.value().clone())
    }

    /// Remove a box's entry, but only if it still refers to the connection
    /// identified by `conn_id`. The box is marked offline in the status
    /// store, best-effort. Returns whether an entry was removed.
    pub async fn unregister(&self, box_id: &str, conn_id: Uuid) -> bool {
        let removed = self
            .boxes
            .remove_if(box_id, |_, handle| handle.conn_id() == conn_id)
            .is_some();

        if removed {
            info!(box_id = %box_id, conn_id = %conn_id, "Unregistered box connection");
            if let Err(e) = self.status.set_box_status(box_id, BoxStatus::Offline).await {
                warn!(box_id = %box_id, error = %e, "Failed to mark box offline");
            }
        } else {
            debug!(
                box_id = %box_id,
                conn_id = %conn_id,
                "Skipped unregister: entry absent or owned by a newer connection"
            );
        }

        removed
    }

    /// Number of live box connections
    pub fn count(&self) -> usize {
        self.boxes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::MemoryStatusStore;

    fn registry() -> (ConnectionRegistry, Arc<MemoryStatusStore>) {
        let store = Arc::new(MemoryStatusStore::new(true));
        (ConnectionRegistry::new(store.clone()), store)
    }

    fn handle() -> (BoxHandle, mpsc::UnboundedReceiver<BoxCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (BoxHandle::new(tx), rx)
    }

    #[tokio::test]
    async fn register_marks_online_and_lookup_finds_channel() {
        let (registry, store) = registry();
        let (h, _rx) = handle();

        registry.register("B1", h.clone()).await;

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.lookup("B1").unwrap().conn_id(), h.conn_id());
        assert_eq!(store.status("B1"), Some(BoxStatus::Online));
    }

    #[tokio::test]
    async fn superseding_registration_closes_old_channel() {
        let (registry, _store) = registry();
        let (h1, mut rx1) = handle();
        let (h2, _rx2) = handle();

        registry.register("B1", h1).await;
        registry.register("B1", h2.clone()).await;

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.lookup("B1").unwrap().conn_id(), h2.conn_id());

        match rx1.recv().await {
            Some(BoxCommand::Close { code, .. }) => assert_eq!(code, CLOSE_SUPERSEDED),
            other => panic!("expected close command, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unregister_marks_offline() {
        let (registry, store) = registry();
        let (h, _rx) = handle();
        let conn_id = h.conn_id();

        registry.register("B1", h).await;
        assert!(registry.unregister("B1", conn_id).await);

        assert!(registry.lookup("B1").is_none());
        assert_eq!(store.status("B1"), Some(BoxStatus::Offline));
    }

    #[tokio::test]
    async fn stale_unregister_leaves_newer_registration_intact() {
        let (registry, store) = registry();
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();
        let old_conn_id = h1.conn_id();

        registry.register("B1", h1).await;
        registry.register("B1", h2.clone()).await;

        // Teardown of the superseded connection must not evict its successor
        assert!(!registry.unregister("B1", old_conn_id).await);
        assert_eq!(registry.lookup("B1").unwrap().conn_id(), h2.conn_id());
        assert_eq!(store.status("B1"), Some(BoxStatus::Online));
    }

    #[tokio::test]
    async fn send_frame_fails_after_receiver_dropped() {
        let (h, rx) = handle();
        drop(rx);

        let result = h.send_frame(Frame::Provision {
            box_id: "B1".to_string(),
        });
        assert!(result.is_err());
    }
}
