//! TLS dialer for gateway addresses.
//!
//! Chain verification is disabled at the library level (there is no chain)
//! and replaced by the [`BindingVerifier`]. Everything that goes wrong on
//! the way to a completed handshake is a gateway-unreachable condition;
//! authentication starts only after the upgrade exchange.

use std::sync::Arc;

use async_trait::async_trait;
use palisade_auth::{DerivedKey, ProofPair};
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::verifier::BindingVerifier;
use crate::{Error, Result};

/// Transport seam: opens a connection to a gateway address and returns it
/// together with the proofs captured during the handshake.
#[async_trait]
pub trait Dial: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin;

    async fn dial(&self, address: &str, key: &DerivedKey) -> Result<(Self::Stream, ProofPair)>;
}

/// Production dialer: TCP plus TLS with the binding verifier installed.
#[derive(Clone, Copy, Debug, Default)]
pub struct TlsDialer;

#[async_trait]
impl Dial for TlsDialer {
    type Stream = TlsStream<TcpStream>;

    async fn dial(&self, address: &str, key: &DerivedKey) -> Result<(Self::Stream, ProofPair)> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let verifier = Arc::new(BindingVerifier::new(key.clone()));
        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier.clone())
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));

        let server_name = server_name_for(address)?;
        let tcp = TcpStream::connect(address)
            .await
            .map_err(Error::GatewayUnreachable)?;
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(Error::GatewayUnreachable)?;
        debug!(address, "gateway TLS handshake complete");

        // The handshake resolving without the verifier running would be a
        // bug in the TLS wiring; an empty slot must never pass as success.
        let proofs = verifier.take_proofs().ok_or_else(|| {
            Error::Internal("handshake completed but no authorization proof was computed".into())
        })?;
        Ok((stream, proofs))
    }
}

/// Name for the TLS client hello. The certificate is never checked against
/// it; it only satisfies SNI plumbing.
fn server_name_for(address: &str) -> Result<ServerName<'static>> {
    let host = address
        .rsplit_once(':')
        .map(|(host, _port)| host)
        .unwrap_or(address);
    let host = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(host.to_string()).map_err(|err| {
        Error::GatewayUnreachable(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid gateway address {address:?}: {err}"),
        ))
    })
}
