//! Control plane for the box gateway
//!
//! Owns the two shared structures every unit of concurrency coordinates
//! through: the connection registry (which box is reachable right now, and
//! over which channel) and the pending-request table (which proxied calls
//! are still waiting for a RESPONSE frame). The [`Gateway`] object ties
//! them together with the status-store capability and drives the
//! request/response round trip.

pub mod gateway;
pub mod pending;
pub mod registry;
pub mod status;

pub use gateway::{
    DispatchError, Gateway, GatewayConfig, IdentifiedBox, IdentifyError, ProxyRequest,
};
pub use pending::PendingRequests;
pub use registry::{BoxCommand, BoxHandle, ChannelClosed, ConnectionRegistry};
pub use status::{BoxStatus, BoxStatusStore, MemoryStatusStore, StatusStoreError};
