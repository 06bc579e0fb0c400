//! Pending-request tracker
//!
//! Tracks proxied HTTP requests sent through tunnels and routes RESPONSE
//! frames back to the dispatch that is waiting for them.

use boxgate_proto::ResponsePayload;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Tracks in-flight proxied requests awaiting a RESPONSE frame
#[derive(Clone)]
pub struct PendingRequests {
    /// Maps correlation id -> oneshot sender for the response payload
    requests: Arc<DashMap<String, oneshot::Sender<ResponsePayload>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(DashMap::new()),
        }
    }

    /// Register a new pending request.
    /// Returns the receiver that will resolve with the response payload.
    pub fn register(&self, request_id: &str) -> oneshot::Receiver<ResponsePayload> {
        let (tx, rx) = oneshot::channel();
        self.requests.insert(request_id.to_string(), tx);
        debug!(request_id = %request_id, "Registered pending request");
        rx
    }

    /// Resolve a pending request with a response payload.
    ///
    /// Returns true if a waiting slot was resolved. A late, duplicate, or
    /// unknown correlation id is discarded: never an error to the box.
    pub fn respond(&self, request_id: &str, payload: ResponsePayload) -> bool {
        if let Some((_, tx)) = self.requests.remove(request_id) {
            debug!(request_id = %request_id, "Routing response to waiting dispatch");
            if tx.send(payload).is_err() {
                debug!(request_id = %request_id, "Dispatch gone before response arrived");
                return false;
            }
            return true;
        }
        debug!(request_id = %request_id, "Discarding response with no pending request");
        false
    }

    /// Remove a pending request without resolving it (timeout, send
    /// failure, caller cancellation). No-op if already resolved or removed.
    pub fn cancel(&self, request_id: &str) {
        if self.requests.remove(request_id).is_some() {
            debug!(request_id = %request_id, "Cancelled pending request");
        }
    }

    /// Whether a correlation id is currently outstanding
    pub fn contains(&self, request_id: &str) -> bool {
        self.requests.contains_key(request_id)
    }

    /// Count of outstanding requests
    pub fn count(&self) -> usize {
        self.requests.len()
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(status: u16) -> ResponsePayload {
        ResponsePayload {
            status,
            headers: vec![],
            body: None,
        }
    }

    #[tokio::test]
    async fn register_and_respond() {
        let tracker = PendingRequests::new();

        let rx = tracker.register("r-1");
        assert_eq!(tracker.count(), 1);

        assert!(tracker.respond("r-1", payload(200)));
        assert_eq!(tracker.count(), 0);

        assert_eq!(rx.await.unwrap().status, 200);
    }

    #[tokio::test]
    async fn respond_unknown_id_is_discarded() {
        let tracker = PendingRequests::new();
        assert!(!tracker.respond("r-unknown", payload(200)));
    }

    #[tokio::test]
    async fn double_respond_resolves_only_once() {
        let tracker = PendingRequests::new();
        let rx = tracker.register("r-1");

        assert!(tracker.respond("r-1", payload(200)));
        assert!(!tracker.respond("r-1", payload(500)));

        assert_eq!(rx.await.unwrap().status, 200);
    }

    #[tokio::test]
    async fn respond_with_dropped_receiver() {
        let tracker = PendingRequests::new();
        let rx = tracker.register("r-1");
        drop(rx);

        assert!(!tracker.respond("r-1", payload(200)));
        assert_eq!(tracker.count(), 0);
    }

    #[tokio::test]
    async fn cancel_removes_without_resolving() {
        let tracker = PendingRequests::new();
        let rx = tracker.register("r-1");

        tracker.cancel("r-1");
        assert_eq!(tracker.count(), 0);
        assert!(rx.await.is_err());

        // Cancelling again (or an unknown id) is a no-op
        tracker.cancel("r-1");
        tracker.cancel("r-never");
    }

    #[tokio::test]
    async fn ids_resolve_independently_of_arrival_order() {
        let tracker = PendingRequests::new();
        let rx_a = tracker.register("r-a");
        let rx_b = tracker.register("r-b");

        // The box answers out of submission order
        assert!(tracker.respond("r-b", payload(201)));
        assert!(tracker.respond("r-a", payload(200)));

        assert_eq!(rx_a.await.unwrap().status, 200);
        assert_eq!(rx_b.await.unwrap().status, 201);
        assert_eq!(tracker.count(), 0);
    }

    #[tokio::test]
    async fn concurrent_register_and_respond() {
        let tracker = Arc::new(PendingRequests::new());

        let mut handles = vec![];
        for i in 1..=20 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("r-{}", i);
                let rx = tracker.register(&id);

                tokio::time::sleep(std::time::Duration::from_millis(1)).await;

                tracker.respond(&id, payload(200));
                rx.await.unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().status, 200);
        }
        assert_eq!(tracker.count(), 0);
    }
}
