//! Shared authentication protocol for palisade gateway tunnels.
//!
//! A gateway terminates TLS with an ephemeral self-signed certificate, so
//! there is no chain to validate. Instead, both ends prove knowledge of a
//! per-workload key derived from the cluster root secret, and the proof is
//! bound to the exact certificate the TLS session was keyed to:
//!
//! 1. `key = hex(HMAC-SHA256(rootSecret, workloadId))`. The same key is
//!    injected into the gateway process when the workload is launched.
//! 2. `requestAuth = hex(HMAC-SHA256(key, serverCertDer))`, sent by the
//!    control plane. A relay cannot replay it to a real gateway, because the
//!    real gateway has a different certificate.
//! 3. `respondAuth = hex(HMAC-SHA256(key, requestAuth))`, returned by the
//!    gateway, proving it also knows the key.
//!
//! The hex *string* of the derived key is the MAC key for steps 2 and 3; that
//! is the form the scheduler hands to the gateway at launch.
//!
//! # Components
//!
//! - [`secret`] - root secret, workload identifiers, key derivation
//! - [`proof`] - the certificate-bound two-stage proof chain
//! - [`wire`] - tunnel path, header names and upgrade tokens

pub mod proof;
pub mod secret;
pub mod wire;

pub use proof::{compute_proofs, respond_auth_for, verify_request_auth, ProofPair};
pub use secret::{derive_key, DerivedKey, RootSecret, WorkloadId};

/// Errors that can occur while computing certificate-bound proofs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The peer presented no certificate, so there is nothing to bind a
    /// proof to.
    #[error("no certificate received, cannot compute authorization proof")]
    NoCertificate,
}

/// Result type for palisade-auth operations.
pub type Result<T> = std::result::Result<T, Error>;
