//! Accept loop and upgrade verification.
//!
//! A connection is not trusted for being able to complete the TLS handshake;
//! the certificate is self-signed and anyone can connect. Trust is earned by
//! the request proof: it must be the per-workload key's MAC over this
//! gateway's own certificate. A proof obtained by a relay is bound to the
//! relay's certificate and fails here, so the relay never gets a usable
//! response proof either.

use std::sync::Arc;

use async_trait::async_trait;
use palisade_auth::{proof, wire, DerivedKey, WorkloadId};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::server::TlsStream;
use tracing::{debug, info, warn};

use crate::identity::GatewayIdentity;
use crate::{Error, Result};

const MAX_REQUEST_HEADERS: usize = 64;
const MAX_LINE_BYTES: u64 = 8 * 1024;

/// The upgraded stream handed to a [`TunnelService`], positioned at the
/// first byte after the request head.
pub type GatewayStream = BufStream<TlsStream<TcpStream>>;

/// Parameters of an accepted tunnel, parsed from the upgrade request.
#[derive(Clone, Debug)]
pub struct TunnelRequest {
    /// Login name requested for the shell session.
    pub login_username: String,
    /// Detach key sequence, forwarded verbatim by the control plane.
    pub detach_keys: String,
}

/// What the gateway runs over an accepted tunnel.
///
/// In production this is the interactive shell service supervising the
/// workload; tests use an echo loop.
#[async_trait]
pub trait TunnelService: Send + Sync + 'static {
    async fn serve(&self, request: TunnelRequest, stream: GatewayStream) -> std::io::Result<()>;
}

/// Gateway for a single workload.
pub struct Gateway<T> {
    workload: WorkloadId,
    key: DerivedKey,
    identity: GatewayIdentity,
    service: T,
}

impl<T: TunnelService> Gateway<T> {
    /// Creates a gateway from the launch-time injected key and a fresh TLS
    /// identity.
    pub fn new(workload: WorkloadId, key: DerivedKey, identity: GatewayIdentity, service: T) -> Self {
        Self {
            workload,
            key,
            identity,
            service,
        }
    }

    /// DER bytes of the certificate this gateway presents.
    pub fn certificate_der(&self) -> &[u8] {
        self.identity.certificate_der()
    }

    /// Accepts tunnel connections until the listener fails or the task is
    /// dropped.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let acceptor = self.identity.acceptor()?;
        info!(workload = %self.workload, "gateway listening for tunnel upgrades");
        loop {
            let (tcp, peer) = listener.accept().await?;
            let gateway = Arc::clone(&self);
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Err(err) = gateway.handle_connection(acceptor, tcp).await {
                    debug!(%peer, error = %err, "tunnel connection failed");
                }
            });
        }
    }

    async fn handle_connection(
        &self,
        acceptor: tokio_rustls::TlsAcceptor,
        tcp: TcpStream,
    ) -> Result<()> {
        let tls = acceptor.accept(tcp).await?;
        let mut stream = BufStream::new(tls);
        let request = self.answer_upgrade(&mut stream).await?;
        self.service.serve(request, stream).await?;
        Ok(())
    }

    /// Parses and verifies the upgrade request, then writes the switch
    /// response. The stream is left at the first tunnel byte.
    async fn answer_upgrade<S>(&self, stream: &mut BufStream<S>) -> Result<TunnelRequest>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let head = match read_request_head(stream).await {
            Ok(head) => head,
            Err(err) => {
                reject(stream, "400 Bad Request").await;
                return Err(err);
            }
        };

        if head.method != "GET" || head.path != wire::TUNNEL_PATH {
            reject(stream, "404 Not Found").await;
            return Err(Error::BadRequest(format!(
                "{} {} is not the tunnel endpoint",
                head.method, head.path
            )));
        }
        if !head
            .header("Upgrade")
            .is_some_and(|value| value.eq_ignore_ascii_case(wire::UPGRADE_PROTOCOL))
        {
            reject(stream, "400 Bad Request").await;
            return Err(Error::BadRequest(
                "missing or unexpected Upgrade header".into(),
            ));
        }
        match head.header(wire::HEADER_TARGET) {
            Some(target) if target == self.workload.as_str() => {}
            other => {
                reject(stream, "404 Not Found").await;
                return Err(Error::UnknownTarget(
                    other.unwrap_or("<missing>").to_string(),
                ));
            }
        }

        let request_auth = match head.header(wire::HEADER_AUTHORIZATION) {
            Some(value)
                if proof::verify_request_auth(
                    &self.key,
                    self.identity.certificate_der(),
                    value,
                ) =>
            {
                value
            }
            _ => {
                warn!(workload = %self.workload, "rejected tunnel request with unbound authorization proof");
                reject(stream, "401 Unauthorized").await;
                return Err(Error::Unauthorized);
            }
        };
        let respond_auth = proof::respond_auth_for(&self.key, request_auth);

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: {protocol}\r\n\
             Connection: {connection}\r\n\
             {header}: {respond_auth}\r\n\
             \r\n",
            protocol = wire::UPGRADE_PROTOCOL,
            connection = wire::CONNECTION_TOKEN,
            header = wire::HEADER_AUTHORIZATION_RESPONSE,
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;
        debug!(workload = %self.workload, "tunnel upgrade accepted");

        Ok(TunnelRequest {
            login_username: head
                .header(wire::HEADER_LOGIN_USERNAME)
                .unwrap_or_default()
                .to_string(),
            detach_keys: head
                .header(wire::HEADER_DETACH_KEYS)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

/// Best-effort error reply; the connection is being dropped either way.
async fn reject<S>(stream: &mut BufStream<S>, status: &str)
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let response = format!("HTTP/1.1 {status}\r\nConnection: close\r\n\r\n");
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
}

#[derive(Debug)]
struct RequestHead {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

async fn read_request_head<S>(stream: &mut BufStream<S>) -> Result<RequestHead>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let request_line = read_line_bounded(stream).await?;
    let mut parts = request_line.split_whitespace();
    let (method, path, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(path), Some(version)) if version.starts_with("HTTP/1.") => {
            (method.to_string(), path.to_string(), version)
        }
        _ => {
            return Err(Error::BadRequest(format!(
                "malformed request line {request_line:?}"
            )))
        }
    };
    let _ = version;

    let mut headers = Vec::new();
    loop {
        if headers.len() >= MAX_REQUEST_HEADERS {
            return Err(Error::BadRequest("too many request headers".into()));
        }
        let line = read_line_bounded(stream).await?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::BadRequest(format!("malformed header line {line:?}")));
        };
        if name.is_empty() || name.starts_with([' ', '\t']) {
            return Err(Error::BadRequest(format!("malformed header line {line:?}")));
        }
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(RequestHead {
        method,
        path,
        headers,
    })
}

async fn read_line_bounded<S>(stream: &mut BufStream<S>) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let mut line = String::new();
    let read = (&mut *stream)
        .take(MAX_LINE_BYTES)
        .read_line(&mut line)
        .await
        .map_err(|err| Error::BadRequest(format!("error reading request: {err}")))?;
    if read == 0 {
        return Err(Error::BadRequest(
            "connection closed before the request was complete".into(),
        ));
    }
    if !line.ends_with('\n') {
        return Err(Error::BadRequest("request line too long".into()));
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}
