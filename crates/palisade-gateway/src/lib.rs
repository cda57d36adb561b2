//! Worker-node gateway answering authenticated tunnel upgrades.
//!
//! One gateway supervises one workload. It terminates TLS with an ephemeral
//! self-signed certificate generated at startup; the control plane trusts
//! that certificate not through a chain but by proving knowledge of the
//! per-workload key, bound to the certificate bytes, in the upgrade
//! exchange. The key is handed to the gateway by the scheduler at workload
//! launch; the gateway never sees the cluster root secret.
//!
//! # Components
//!
//! - [`identity`] - ephemeral self-signed TLS identity
//! - [`server`] - accept loop, upgrade verification, tunnel hand-off

pub mod identity;
pub mod server;

pub use identity::GatewayIdentity;
pub use server::{Gateway, GatewayStream, TunnelRequest, TunnelService};

/// Errors that can occur in gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Generating or loading the gateway's TLS identity failed.
    #[error("gateway identity error: {0}")]
    Identity(String),

    /// I/O failure on the listener or an accepted connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection did not carry a well-formed tunnel upgrade request.
    #[error("malformed tunnel request: {0}")]
    BadRequest(String),

    /// The request named a workload this gateway does not supervise.
    #[error("unknown tunnel target: {0}")]
    UnknownTarget(String),

    /// The request proof was absent or not bound to this gateway's
    /// certificate.
    #[error("request authorization proof did not match this gateway's certificate")]
    Unauthorized,
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;
