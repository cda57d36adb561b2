//! Root secret handling and per-workload key derivation.

use std::fmt;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The cluster-wide root secret.
///
/// Provisioned once from cluster configuration at process start and shared
/// read-only by every tunnel attempt. An empty root secret is a configuration
/// error; callers must refuse to derive keys from one. The value is never
/// logged and its `Debug` output is redacted.
#[derive(Clone)]
pub struct RootSecret(Vec<u8>);

impl RootSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RootSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootSecret(..)")
    }
}

/// Opaque identifier of one running workload.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadId(String);

impl WorkloadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkloadId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Per-workload key, stored in its hex transport form.
///
/// The hex string's bytes are the MAC key for the proof stages. The gateway
/// side receives exactly this string at workload launch; constructing it with
/// [`DerivedKey::from_hex`] and deriving it with [`derive_key`] from the same
/// root secret yield equal keys. `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedKey(String);

impl DerivedKey {
    /// Wraps a key already in hex form, as handed to a gateway at launch.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Derives the per-workload key from the root secret.
///
/// Deterministic: the same inputs always produce the same key.
pub fn derive_key(root_secret: &RootSecret, workload: &WorkloadId) -> DerivedKey {
    let mut mac = HmacSha256::new_from_slice(root_secret.as_bytes()).expect("hmac key");
    mac.update(workload.as_str().as_bytes());
    DerivedKey(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_is_deterministic() {
        let root = RootSecret::new("s3cr3t");
        let workload = WorkloadId::new("wl-0001");
        let first = derive_key(&root, &workload);
        let second = derive_key(&root, &workload);
        assert_eq!(first, second);
    }

    #[test]
    fn test_derive_key_is_hex_of_sha256_width() {
        let key = derive_key(&RootSecret::new("s3cr3t"), &WorkloadId::new("wl-0001"));
        assert_eq!(key.as_hex().len(), 64);
        assert!(key.as_hex().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key.as_hex(), key.as_hex().to_lowercase());
    }

    #[test]
    fn test_derive_key_depends_on_workload() {
        let root = RootSecret::new("s3cr3t");
        let a = derive_key(&root, &WorkloadId::new("wl-0001"));
        let b = derive_key(&root, &WorkloadId::new("wl-0002"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_key_depends_on_root_secret() {
        let workload = WorkloadId::new("wl-0001");
        let a = derive_key(&RootSecret::new("s3cr3t"), &workload);
        let b = derive_key(&RootSecret::new("other"), &workload);
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_hex_round_trips_derived_form() {
        let derived = derive_key(&RootSecret::new("s3cr3t"), &WorkloadId::new("wl-0001"));
        let injected = DerivedKey::from_hex(derived.as_hex());
        assert_eq!(derived, injected);
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let root = RootSecret::new("s3cr3t");
        let key = derive_key(&root, &WorkloadId::new("wl-0001"));
        assert_eq!(format!("{root:?}"), "RootSecret(..)");
        assert_eq!(format!("{key:?}"), "DerivedKey(..)");
    }
}
