//! Control-plane client for authenticated tunnels into workload gateways.
//!
//! A workload runs on an untrusted worker node under a gateway process that
//! terminates TLS with an ephemeral self-signed certificate. This crate
//! establishes an interactive raw byte tunnel into that gateway: it resolves
//! the workload's current address, opens TLS with chain verification replaced
//! by a certificate-bound proof of a shared per-workload key, negotiates an
//! HTTP/1.1 upgrade, and hands back the open duplex stream.
//!
//! # Components
//!
//! - [`lookup`] - collaborator seam resolving a workload to address and state
//! - [`verifier`] - certificate verifier computing the handshake-bound proofs
//! - [`dial`] - TLS dialer with the verifier installed
//! - [`upgrade`] - the HTTP/1.1 upgrade exchange
//! - [`tunnel`] - the resulting duplex tunnel handle
//! - [`client`] - end-to-end orchestration
//!
//! # Example
//!
//! ```ignore
//! use palisade_tunnel::{RootSecret, TunnelClient, TunnelOptions, WorkloadId};
//!
//! let client = TunnelClient::new(RootSecret::new(cluster_secret), lookup);
//! let mut tunnel = client
//!     .establish_tunnel(&WorkloadId::new("wl-0001"), &TunnelOptions::default())
//!     .await?;
//! // tunnel implements AsyncRead + AsyncWrite; the caller owns it now.
//! ```

pub mod client;
pub mod dial;
pub mod lookup;
pub mod tunnel;
pub mod upgrade;
pub mod verifier;

pub use client::{TunnelClient, TunnelOptions};
pub use dial::{Dial, TlsDialer};
pub use lookup::{LookupError, WorkloadDescriptor, WorkloadLookup, WorkloadState};
pub use palisade_auth::{derive_key, DerivedKey, ProofPair, RootSecret, WorkloadId};
pub use tunnel::TunnelHandle;
pub use verifier::BindingVerifier;

/// Errors that can occur while establishing a tunnel.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The workload lookup collaborator failed; the cause is surfaced
    /// unchanged.
    #[error("workload lookup failed: {0}")]
    Lookup(#[from] LookupError),

    /// The workload is not running, or is running without a gateway address.
    /// Never retried here.
    #[error("gateway is not available, workload is {state}")]
    GatewayUnavailable {
        /// Lifecycle state reported by the lookup.
        state: WorkloadState,
    },

    /// DNS, connect or TLS handshake failure while reaching the gateway.
    #[error("cannot reach workload gateway: {0}")]
    GatewayUnreachable(#[source] std::io::Error),

    /// The gateway completed a TLS handshake without presenting any
    /// certificate, so no proof could be bound.
    #[error("gateway presented no certificate to bind the authorization proof to")]
    NoPeerCertificate,

    /// The response proof was absent or wrong: the peer does not know the
    /// per-workload key. Suspected man-in-the-middle.
    #[error("gateway returned a bad authorization response header")]
    ProofMismatch,

    /// The upgrade response was not the expected protocol switch.
    #[error("malformed upgrade response from gateway: {0}")]
    BadUpgrade(String),

    /// An invariant of this crate was violated; a bug here, not a caller or
    /// peer problem.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification callers use to choose a status category.
///
/// This crate never speaks HTTP status codes itself; it only classifies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// The workload does not exist.
    NotFound,
    /// The gateway is absent, unreachable or spoke the protocol wrong.
    BadGateway,
    /// The peer failed the proof exchange.
    Authentication,
    /// A bug in this crate or an unclassifiable collaborator failure.
    Internal,
}

impl Error {
    /// Classifies this error for callers mapping failures onto a status
    /// category.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Lookup(LookupError::NotFound(_)) => ErrorClass::NotFound,
            Error::Lookup(LookupError::Other(_)) => ErrorClass::Internal,
            Error::GatewayUnavailable { .. }
            | Error::GatewayUnreachable(_)
            | Error::BadUpgrade(_) => ErrorClass::BadGateway,
            Error::NoPeerCertificate | Error::ProofMismatch => ErrorClass::Authentication,
            Error::Internal(_) => ErrorClass::Internal,
        }
    }
}

/// Result type for tunnel operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let unavailable = Error::GatewayUnavailable {
            state: WorkloadState::Queued,
        };
        assert_eq!(unavailable.class(), ErrorClass::BadGateway);
        assert_eq!(Error::ProofMismatch.class(), ErrorClass::Authentication);
        assert_eq!(Error::NoPeerCertificate.class(), ErrorClass::Authentication);
        assert_eq!(
            Error::BadUpgrade("nonsense".into()).class(),
            ErrorClass::BadGateway
        );
        assert_eq!(
            Error::Lookup(LookupError::NotFound("wl-0001".into())).class(),
            ErrorClass::NotFound
        );
        assert_eq!(Error::Internal("bug".into()).class(), ErrorClass::Internal);
    }

    #[test]
    fn test_gateway_unavailable_names_the_state() {
        let err = Error::GatewayUnavailable {
            state: WorkloadState::Queued,
        };
        assert_eq!(
            err.to_string(),
            "gateway is not available, workload is queued"
        );
    }
}
