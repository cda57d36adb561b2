//! Ephemeral self-signed TLS identity for a gateway.
//!
//! There is deliberately no certificate authority. The certificate exists so
//! TLS can key a session to this process; the control plane authenticates it
//! by binding the per-workload proof chain to these exact DER bytes.

use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use time::{Duration, OffsetDateTime};
use tokio_rustls::TlsAcceptor;

use crate::{Error, Result};

const CERT_VALIDITY_DAYS: i64 = 30;

/// The gateway's TLS certificate and private key, generated at startup.
pub struct GatewayIdentity {
    cert_der: CertificateDer<'static>,
    key_der: PrivateKeyDer<'static>,
}

impl GatewayIdentity {
    /// Generates a fresh self-signed certificate (ECDSA P-256).
    pub fn generate() -> Result<Self> {
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|err| Error::Identity(format!("key generation failed: {err}")))?;

        let mut params = CertificateParams::new(vec!["gateway.palisade.internal".to_string()])
            .map_err(|err| Error::Identity(format!("invalid certificate params: {err}")))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Palisade Gateway");
        params.distinguished_name = dn;
        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(CERT_VALIDITY_DAYS);

        let cert = params
            .self_signed(&key)
            .map_err(|err| Error::Identity(format!("certificate generation failed: {err}")))?;

        Ok(Self {
            cert_der: cert.der().clone(),
            key_der: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
        })
    }

    /// DER bytes of the certificate, the value the proof chain is bound to.
    pub fn certificate_der(&self) -> &[u8] {
        self.cert_der.as_ref()
    }

    /// Builds a TLS acceptor presenting this identity.
    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![self.cert_der.clone()], self.key_der.clone_key())
            .map_err(|err| Error::Identity(format!("failed to build server config: {err}")))?;
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_usable_identity() {
        let identity = GatewayIdentity::generate().unwrap();
        assert!(!identity.certificate_der().is_empty());
        assert!(identity.acceptor().is_ok());
    }

    #[test]
    fn test_each_identity_is_distinct() {
        let a = GatewayIdentity::generate().unwrap();
        let b = GatewayIdentity::generate().unwrap();
        assert_ne!(a.certificate_der(), b.certificate_der());
    }
}
