//! Certificate verifier that binds the proof chain to the handshake.
//!
//! Gateways present self-signed certificates with no chain to a trust
//! anchor, so standard verification is replaced entirely: during the
//! handshake this verifier computes the two-stage proof over the exact leaf
//! certificate the session is being keyed to, and parks the result for the
//! dialer to pick up afterwards. Accepting the handshake here only means a
//! certificate was presented; trust is established later, when the gateway
//! returns the matching response proof.
//!
//! Computing the proofs inside the verification callback closes the window
//! where a relay could swap certificates between verification and use: the
//! proof is bound to the same bytes the TLS layer bound the session to, and
//! the handshake signature checks below tie those bytes to the peer's key.

use std::sync::Mutex;

use palisade_auth::{compute_proofs, DerivedKey, ProofPair};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::ring::default_provider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};

/// Verifier installed into the TLS client for gateway connections.
///
/// One verifier serves one connection attempt; the captured proofs are
/// drained with [`BindingVerifier::take_proofs`] after the handshake.
#[derive(Debug)]
pub struct BindingVerifier {
    key: DerivedKey,
    proofs: Mutex<Option<ProofPair>>,
}

impl BindingVerifier {
    pub fn new(key: DerivedKey) -> Self {
        Self {
            key,
            proofs: Mutex::new(None),
        }
    }

    /// Computes and parks the proof chain for the presented certificates.
    ///
    /// An empty list fails the handshake and leaves the slot empty.
    pub fn bind(&self, raw_certs: &[&[u8]]) -> std::result::Result<(), rustls::Error> {
        let pair = compute_proofs(&self.key, raw_certs)
            .map_err(|err| rustls::Error::General(err.to_string()))?;
        *self.proofs.lock().expect("proof slot lock poisoned") = Some(pair);
        Ok(())
    }

    /// Takes the proofs captured during the handshake, leaving the slot
    /// empty.
    ///
    /// `None` after a completed handshake means the verifier was never
    /// invoked; callers must treat that as an internal error, never as
    /// success.
    pub fn take_proofs(&self) -> Option<ProofPair> {
        self.proofs.lock().expect("proof slot lock poisoned").take()
    }
}

impl ServerCertVerifier for BindingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let mut raw_certs: Vec<&[u8]> = Vec::with_capacity(intermediates.len() + 1);
        raw_certs.push(end_entity.as_ref());
        raw_certs.extend(intermediates.iter().map(|cert| cert.as_ref()));
        self.bind(&raw_certs)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_auth::{derive_key, RootSecret, WorkloadId};

    fn test_verifier() -> BindingVerifier {
        let key = derive_key(&RootSecret::new("s3cr3t"), &WorkloadId::new("wl-0001"));
        BindingVerifier::new(key)
    }

    #[test]
    fn test_bind_captures_proofs() {
        let verifier = test_verifier();
        verifier.bind(&[b"certificate der bytes".as_slice()]).unwrap();

        let proofs = verifier.take_proofs().expect("proofs captured");
        let key = derive_key(&RootSecret::new("s3cr3t"), &WorkloadId::new("wl-0001"));
        let expected = compute_proofs(&key, &[b"certificate der bytes".as_slice()]).unwrap();
        assert_eq!(proofs, expected);
    }

    #[test]
    fn test_take_proofs_drains_the_slot() {
        let verifier = test_verifier();
        verifier.bind(&[b"certificate der bytes".as_slice()]).unwrap();
        assert!(verifier.take_proofs().is_some());
        assert!(verifier.take_proofs().is_none());
    }

    #[test]
    fn test_empty_certificate_list_fails_and_produces_nothing() {
        let verifier = test_verifier();
        assert!(verifier.bind(&[]).is_err());
        assert!(verifier.take_proofs().is_none());
    }

    #[test]
    fn test_proofs_unset_before_any_handshake() {
        assert!(test_verifier().take_proofs().is_none());
    }
}
