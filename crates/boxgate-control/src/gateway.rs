//! The gateway object and its request/response correlation engine
//!
//! One `Gateway` is constructed at startup and shared by every handler and
//! every box connection task. It owns the connection registry and the
//! pending-request table; nothing else in the process holds tunnel state.

use boxgate_proto::{Frame, ResponsePayload};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

use crate::pending::PendingRequests;
use crate::registry::{BoxHandle, ConnectionRegistry};
use crate::status::{BoxStatusStore, StatusStoreError};

/// Default deadline for a box to answer a proxied request
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long a dispatch waits for the matching RESPONSE frame
    pub response_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// An inbound HTTP request, flattened for the tunnel
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: String,
    /// Path without the query string
    pub path: String,
    /// Raw query string, empty when the caller sent none
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Failures a dispatch can surface to the HTTP facade
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No connected box for id '{0}'")]
    TargetUnavailable(String),

    #[error("Box '{0}' did not respond before the deadline")]
    GatewayTimeout(String),

    #[error("Protocol fault: {0}")]
    ProtocolFault(String),
}

/// Failures while identifying a newly connected box
#[derive(Debug, Error)]
pub enum IdentifyError {
    /// The status store does not know this identity; close with 4001.
    #[error("Box identity could not be resolved")]
    InvalidIdentity,

    #[error(transparent)]
    Store(#[from] StatusStoreError),
}

/// A successfully identified connection
#[derive(Debug)]
pub struct IdentifiedBox {
    /// Canonical box id the channel is registered under
    pub box_id: String,
    /// Whether a PROVISION frame was sent to correct the box's id
    pub provisioned: bool,
}

/// Removes the pending slot on every exit path of a dispatch, including the
/// dispatch future being dropped when the HTTP caller aborts. `respond`
/// already removes resolved slots, so the success path is a no-op here.
struct PendingSlotGuard<'a> {
    pending: &'a PendingRequests,
    request_id: &'a str,
}

impl Drop for PendingSlotGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.request_id);
    }
}

/// The gateway: connection registry + pending table + status capability
pub struct Gateway {
    connections: ConnectionRegistry,
    pending: PendingRequests,
    status: Arc<dyn BoxStatusStore>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(status: Arc<dyn BoxStatusStore>, config: GatewayConfig) -> Self {
        Self {
            connections: ConnectionRegistry::new(status.clone()),
            pending: PendingRequests::new(),
            status,
            config,
        }
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run the identification step for a newly connected channel.
    ///
    /// Resolves the claimed identity against the status store, sends a
    /// PROVISION frame when the canonical id differs from the provided one
    /// (informational: a send failure does not block registration), and
    /// registers the channel under the canonical id, superseding any prior
    /// registration.
    pub async fn identify_box(
        &self,
        provided: Option<&str>,
        handle: BoxHandle,
    ) -> Result<IdentifiedBox, IdentifyError> {
        let canonical = self
            .status
            .resolve_box_identity(provided)
            .await?
            .ok_or(IdentifyError::InvalidIdentity)?;

        let provisioned = provided != Some(canonical.as_str());
        if provisioned {
            let _ = handle.send_frame(Frame::Provision {
                box_id: canonical.clone(),
            });
        }

        self.connections.register(&canonical, handle).await;

        Ok(IdentifiedBox {
            box_id: canonical,
            provisioned,
        })
    }

    /// Tear down a connection's registration. Guarded by `conn_id` so a
    /// superseded connection cannot evict its successor.
    pub async fn disconnect_box(&self, box_id: &str, conn_id: Uuid) -> bool {
        self.connections.unregister(box_id, conn_id).await
    }

    /// Drive one proxied request through the tunnel: mint a correlation id,
    /// send the REQUEST frame, await the matching RESPONSE or the deadline.
    pub async fn dispatch(
        &self,
        box_id: &str,
        request: ProxyRequest,
    ) -> Result<ResponsePayload, DispatchError> {
        let handle = self
            .connections
            .lookup(box_id)
            .ok_or_else(|| DispatchError::TargetUnavailable(box_id.to_string()))?;

        let request_id = Uuid::new_v4().to_string();

        // The slot must exist before the frame is on the wire, so a box
        // answering immediately still finds it.
        let rx = self.pending.register(&request_id);
        let _slot = PendingSlotGuard {
            pending: &self.pending,
            request_id: &request_id,
        };

        let frame = Frame::Request {
            request_id: request_id.clone(),
            method: request.method,
            path: request.path,
            query: request.query,
            headers: request.headers,
            body: request.body,
        };

        if handle.send_frame(frame).is_err() {
            return Err(DispatchError::ProtocolFault(format!(
                "tunnel channel for '{}' is closed",
                box_id
            )));
        }
        // Holding the handle past the send would keep the box's command
        // channel open while we wait.
        drop(handle);

        match timeout(self.config.response_timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(DispatchError::ProtocolFault(
                "response slot dropped before resolution".to_string(),
            )),
            Err(_) => {
                debug!(box_id = %box_id, request_id = %request_id, "Dispatch deadline elapsed");
                Err(DispatchError::GatewayTimeout(box_id.to_string()))
            }
        }
    }

    /// Hand a RESPONSE frame's payload to whichever dispatch is waiting on
    /// its correlation id. Late, duplicate, and unknown ids are discarded.
    pub fn resolve_response(&self, request_id: &str, payload: ResponsePayload) -> bool {
        self.pending.respond(request_id, payload)
    }
}
