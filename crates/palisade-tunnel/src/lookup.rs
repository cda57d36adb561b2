//! Collaborator seam resolving a workload to its gateway address and state.
//!
//! The descriptor is fetched fresh on every tunnel attempt and never cached
//! here; address and state can change under us, and ownership of freshness
//! belongs to the lookup service.

use std::fmt;

use async_trait::async_trait;
use palisade_auth::WorkloadId;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a workload as reported by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadState {
    Queued,
    Locked,
    Running,
    Complete,
    Cancelled,
}

impl fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            WorkloadState::Queued => "queued",
            WorkloadState::Locked => "locked",
            WorkloadState::Running => "running",
            WorkloadState::Complete => "complete",
            WorkloadState::Cancelled => "cancelled",
        };
        f.write_str(state)
    }
}

/// Snapshot of one workload's placement, valid only for the current call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkloadDescriptor {
    /// Current lifecycle state.
    pub state: WorkloadState,
    /// `host:port` of the gateway, if one has been advertised.
    pub gateway_address: Option<String>,
}

impl WorkloadDescriptor {
    /// Address of a gateway that is actually reachable right now.
    ///
    /// Returns `None` unless the workload is running and has advertised a
    /// non-empty address.
    pub fn available_address(&self) -> Option<&str> {
        if self.state != WorkloadState::Running {
            return None;
        }
        self.gateway_address
            .as_deref()
            .filter(|address| !address.is_empty())
    }
}

/// Errors a lookup collaborator can report.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// No workload with this identifier exists.
    #[error("workload not found: {0}")]
    NotFound(String),

    /// Any other collaborator failure, surfaced unchanged.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Resolves a workload identifier to its current descriptor.
///
/// Implemented by the surrounding service against its scheduler or database.
/// Callers may race this with a deadline; it is the only stage of tunnel
/// establishment that is cancelled cleanly.
#[async_trait]
pub trait WorkloadLookup: Send + Sync {
    async fn lookup_workload(
        &self,
        workload: &WorkloadId,
    ) -> std::result::Result<WorkloadDescriptor, LookupError>;
}
