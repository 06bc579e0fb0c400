//! Status-store capability consumed by the gateway core
//!
//! Box metadata lives outside the gateway process; the core only needs two
//! operations from it: resolving a claimed identity to a canonical box id,
//! and recording whether a box is currently reachable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

/// Reachability of a box as recorded in the status store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxStatus {
    Online,
    Offline,
}

/// Status store errors
#[derive(Debug, Error)]
pub enum StatusStoreError {
    #[error("Status store unavailable: {0}")]
    Unavailable(String),
}

/// External store of box identities and reachability
#[async_trait]
pub trait BoxStatusStore: Send + Sync {
    /// Resolve a box's claimed identity to its canonical id.
    ///
    /// `Ok(None)` means the identity is unknown: the connection must be
    /// rejected with the invalid-identity close code.
    async fn resolve_box_identity(
        &self,
        provided: Option<&str>,
    ) -> Result<Option<String>, StatusStoreError>;

    /// Record a box as online or offline
    async fn set_box_status(&self, box_id: &str, status: BoxStatus)
        -> Result<(), StatusStoreError>;
}

/// In-memory status store
///
/// Keeps an alias map from provided ids to canonical ids. In
/// open-registration mode, unknown ids resolve to themselves and an absent
/// id is provisioned a fresh canonical one; in closed mode only seeded
/// aliases resolve.
pub struct MemoryStatusStore {
    open_registration: bool,
    aliases: RwLock<HashMap<String, String>>,
    statuses: RwLock<HashMap<String, BoxStatus>>,
}

impl MemoryStatusStore {
    pub fn new(open_registration: bool) -> Self {
        Self {
            open_registration,
            aliases: RwLock::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// Seed an alias so `provided` resolves to `canonical`
    pub fn seed_alias(&self, provided: &str, canonical: &str) {
        self.aliases
            .write()
            .unwrap()
            .insert(provided.to_string(), canonical.to_string());
    }

    /// Current recorded status for a box, if any
    pub fn status(&self, box_id: &str) -> Option<BoxStatus> {
        self.statuses.read().unwrap().get(box_id).copied()
    }
}

#[async_trait]
impl BoxStatusStore for MemoryStatusStore {
    async fn resolve_box_identity(
        &self,
        provided: Option<&str>,
    ) -> Result<Option<String>, StatusStoreError> {
        match provided {
            Some(id) => {
                if let Some(canonical) = self.aliases.read().unwrap().get(id) {
                    return Ok(Some(canonical.clone()));
                }
                if self.open_registration {
                    let canonical = id.to_string();
                    self.aliases
                        .write()
                        .unwrap()
                        .insert(id.to_string(), canonical.clone());
                    Ok(Some(canonical))
                } else {
                    Ok(None)
                }
            }
            None => {
                if self.open_registration {
                    let canonical = format!("box-{}", Uuid::new_v4());
                    self.aliases
                        .write()
                        .unwrap()
                        .insert(canonical.clone(), canonical.clone());
                    Ok(Some(canonical))
                } else {
                    Ok(None)
                }
            }
        }
    }

    async fn set_box_status(
        &self,
        box_id: &str,
        status: BoxStatus,
    ) -> Result<(), StatusStoreError> {
        self.statuses
            .write()
            .unwrap()
            .insert(box_id.to_string(), status);
        Ok(())
    }
}
