//! End-to-end orchestration: workload id in, open tunnel out.

use palisade_auth::{derive_key, RootSecret, WorkloadId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dial::{Dial, TlsDialer};
use crate::lookup::WorkloadLookup;
use crate::tunnel::TunnelHandle;
use crate::upgrade;
use crate::{Error, Result};

/// Caller-supplied parameters forwarded verbatim as request headers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TunnelOptions {
    /// Login name for the shell service behind the gateway.
    pub login_username: String,
    /// Detach key sequence for the interactive session.
    pub detach_keys: String,
}

/// Control-plane client that turns a workload identifier into an
/// authenticated tunnel.
///
/// Holds the cluster root secret and the lookup collaborator; each
/// [`establish_tunnel`](TunnelClient::establish_tunnel) call is independent
/// of every other, and the root secret is the only state shared between
/// concurrent calls.
pub struct TunnelClient<L, D = TlsDialer> {
    root_secret: RootSecret,
    lookup: L,
    dialer: D,
}

impl<L: WorkloadLookup> TunnelClient<L> {
    pub fn new(root_secret: RootSecret, lookup: L) -> Self {
        Self {
            root_secret,
            lookup,
            dialer: TlsDialer,
        }
    }
}

impl<L: WorkloadLookup, D: Dial> TunnelClient<L, D> {
    /// Like [`TunnelClient::new`] with a caller-provided transport.
    pub fn with_dialer(root_secret: RootSecret, lookup: L, dialer: D) -> Self {
        Self {
            root_secret,
            lookup,
            dialer,
        }
    }

    /// Establishes an authenticated tunnel into the workload's gateway.
    ///
    /// Stages: resolve the workload, require it to be running with an
    /// advertised address, dial with the binding verifier installed,
    /// exchange the upgrade request, return the open handle. Every failure
    /// short-circuits the remaining stages and closes any opened
    /// connection; nothing is retried here.
    ///
    /// Only the lookup stage is cancelled cleanly; once the dial has
    /// started, dropping the future closes the connection but may not
    /// interrupt an in-flight handshake promptly.
    pub async fn establish_tunnel(
        &self,
        workload: &WorkloadId,
        options: &TunnelOptions,
    ) -> Result<TunnelHandle<D::Stream>> {
        if self.root_secret.is_empty() {
            return Err(Error::Internal(
                "root secret is empty, refusing to derive workload keys".into(),
            ));
        }

        let descriptor = self.lookup.lookup_workload(workload).await?;
        let Some(address) = descriptor.available_address().map(str::to_owned) else {
            debug!(workload = %workload, state = %descriptor.state, "gateway not available");
            return Err(Error::GatewayUnavailable {
                state: descriptor.state,
            });
        };

        let key = derive_key(&self.root_secret, workload);
        let (stream, proofs) = self.dialer.dial(&address, &key).await?;

        let handle = upgrade::negotiate(stream, &address, workload, &proofs, options).await?;
        debug!(workload = %workload, address = %address, "tunnel established");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{LookupError, WorkloadDescriptor, WorkloadState};
    use crate::{DerivedKey, ErrorClass, ProofPair};
    use async_trait::async_trait;
    use palisade_auth::{compute_proofs, wire};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};

    struct StaticLookup(WorkloadDescriptor);

    #[async_trait]
    impl WorkloadLookup for StaticLookup {
        async fn lookup_workload(
            &self,
            _workload: &WorkloadId,
        ) -> std::result::Result<WorkloadDescriptor, LookupError> {
            Ok(self.0.clone())
        }
    }

    struct MissingLookup;

    #[async_trait]
    impl WorkloadLookup for MissingLookup {
        async fn lookup_workload(
            &self,
            workload: &WorkloadId,
        ) -> std::result::Result<WorkloadDescriptor, LookupError> {
            Err(LookupError::NotFound(workload.to_string()))
        }
    }

    /// Dialer double that only counts invocations.
    #[derive(Default)]
    struct CountingDialer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Dial for CountingDialer {
        type Stream = DuplexStream;

        async fn dial(
            &self,
            _address: &str,
            _key: &DerivedKey,
        ) -> Result<(Self::Stream, ProofPair)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::GatewayUnreachable(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "no dialing expected in this test",
            )))
        }
    }

    /// Dialer double handing out a prepared in-memory stream, with proofs
    /// genuinely computed from the key it is given.
    struct ScriptedDialer {
        stream: Mutex<Option<DuplexStream>>,
    }

    #[async_trait]
    impl Dial for ScriptedDialer {
        type Stream = DuplexStream;

        async fn dial(&self, _address: &str, key: &DerivedKey) -> Result<(Self::Stream, ProofPair)> {
            let stream = self
                .stream
                .lock()
                .unwrap()
                .take()
                .expect("dialed more than once");
            let proofs = compute_proofs(key, &[b"scripted gateway certificate".as_slice()])
                .map_err(|err| Error::Internal(err.to_string()))?;
            Ok((stream, proofs))
        }
    }

    fn running_descriptor() -> WorkloadDescriptor {
        WorkloadDescriptor {
            state: WorkloadState::Running,
            gateway_address: Some("127.0.0.1:2222".into()),
        }
    }

    #[tokio::test]
    async fn test_not_running_short_circuits_before_any_dialing() {
        let dialer = CountingDialer::default();
        let client = TunnelClient::with_dialer(
            RootSecret::new("s3cr3t"),
            StaticLookup(WorkloadDescriptor {
                state: WorkloadState::Queued,
                gateway_address: Some("127.0.0.1:2222".into()),
            }),
            dialer,
        );

        let err = client
            .establish_tunnel(&WorkloadId::new("wl-0001"), &TunnelOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::GatewayUnavailable {
                state: WorkloadState::Queued
            }
        ));
        assert_eq!(client.dialer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_address_short_circuits_before_any_dialing() {
        let client = TunnelClient::with_dialer(
            RootSecret::new("s3cr3t"),
            StaticLookup(WorkloadDescriptor {
                state: WorkloadState::Running,
                gateway_address: None,
            }),
            CountingDialer::default(),
        );

        let err = client
            .establish_tunnel(&WorkloadId::new("wl-0001"), &TunnelOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::BadGateway);
        assert_eq!(client.dialer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_surfaced_unchanged() {
        let client = TunnelClient::with_dialer(
            RootSecret::new("s3cr3t"),
            MissingLookup,
            CountingDialer::default(),
        );

        let err = client
            .establish_tunnel(&WorkloadId::new("wl-0001"), &TunnelOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Lookup(LookupError::NotFound(_))));
        assert_eq!(err.class(), ErrorClass::NotFound);
        assert_eq!(client.dialer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_root_secret_is_refused_before_lookup_results_matter() {
        let client = TunnelClient::with_dialer(
            RootSecret::new(""),
            StaticLookup(running_descriptor()),
            CountingDialer::default(),
        );

        let err = client
            .establish_tunnel(&WorkloadId::new("wl-0001"), &TunnelOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Internal);
        assert_eq!(client.dialer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_orchestration_derives_key_and_completes_upgrade() {
        let root = RootSecret::new("s3cr3t");
        let workload = WorkloadId::new("wl-0001");

        // The scripted gateway knows the same derived key and certificate
        // bytes as the dialer double, like a real gateway would.
        let key = derive_key(&root, &workload);
        let proofs = compute_proofs(&key, &[b"scripted gateway certificate".as_slice()]).unwrap();
        let (client_end, server_end) = tokio::io::duplex(16 * 1024);

        let gateway = tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server_end);
            let mut reader = BufReader::new(read_half);
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                if line == "\r\n" {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 101 Switching Protocols\r\n\
                 Upgrade: ssh\r\n\
                 Connection: upgrade\r\n\
                 {}: {}\r\n\
                 \r\n",
                wire::HEADER_AUTHORIZATION_RESPONSE,
                proofs.respond_auth()
            );
            write_half.write_all(response.as_bytes()).await.unwrap();
            write_half.flush().await.unwrap();

            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf).await.unwrap();
            write_half.write_all(&buf).await.unwrap();
            write_half.flush().await.unwrap();
        });

        let client = TunnelClient::with_dialer(
            root,
            StaticLookup(running_descriptor()),
            ScriptedDialer {
                stream: Mutex::new(Some(client_end)),
            },
        );

        let mut handle = client
            .establish_tunnel(&workload, &TunnelOptions::default())
            .await
            .unwrap();
        assert_eq!(handle.workload(), &workload);

        handle.write_all(b"ping").await.unwrap();
        handle.flush().await.unwrap();
        let mut echoed = [0u8; 4];
        handle.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping");

        drop(handle);
        gateway.await.unwrap();
    }
}
