//! The certificate-bound two-stage proof chain.
//!
//! Both proofs are keyed by the per-workload [`DerivedKey`] and rooted in the
//! DER bytes of the leaf certificate presented during the current TLS
//! handshake. They must be recomputed for every connection attempt: a
//! different peer presents different certificate bytes, and a proof bound to
//! one certificate is useless for any other.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::secret::DerivedKey;
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// The two proof values computed during one TLS handshake.
///
/// `request_auth` goes out with the upgrade request; `respond_auth` is what
/// the gateway must return to prove it knows the derived key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofPair {
    request_auth: String,
    respond_auth: String,
}

impl ProofPair {
    /// Hex proof sent with the upgrade request.
    pub fn request_auth(&self) -> &str {
        &self.request_auth
    }

    /// Hex proof the gateway must echo back in the response header.
    pub fn respond_auth(&self) -> &str {
        &self.respond_auth
    }
}

/// Computes the proof chain over the peer's presented certificate list.
///
/// `raw_certs` is the list of DER certificates in the order the peer sent
/// them; the first entry is the leaf and the only one that matters here. An
/// empty list is an error and produces no proofs.
pub fn compute_proofs(key: &DerivedKey, raw_certs: &[&[u8]]) -> Result<ProofPair> {
    let leaf = raw_certs.first().ok_or(Error::NoCertificate)?;
    let request_auth = hmac_hex(key.as_bytes(), leaf);
    let respond_auth = hmac_hex(key.as_bytes(), request_auth.as_bytes());
    Ok(ProofPair {
        request_auth,
        respond_auth,
    })
}

/// Gateway-side check of a received request proof.
///
/// The proof must have been computed over this gateway's own certificate; a
/// proof a relay obtained against a different certificate fails here. The
/// comparison is constant-time.
pub fn verify_request_auth(key: &DerivedKey, own_cert_der: &[u8], request_auth_hex: &str) -> bool {
    let Ok(signature) = hex::decode(request_auth_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("hmac key");
    mac.update(own_cert_der);
    mac.verify_slice(&signature).is_ok()
}

/// Gateway-side response proof for an accepted request proof.
pub fn respond_auth_for(key: &DerivedKey, request_auth_hex: &str) -> String {
    hmac_hex(key.as_bytes(), request_auth_hex.as_bytes())
}

fn hmac_hex(key: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac key");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}
