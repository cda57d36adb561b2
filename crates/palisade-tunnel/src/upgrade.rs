//! The HTTP/1.1 upgrade exchange over the verified TLS channel.
//!
//! The request is written literally and the response head is parsed from the
//! same buffered stream the tunnel keeps afterwards, so response parsing
//! never consumes bytes belonging to the tunnel payload. There is no partial
//! success: any validation failure drops the connection.

use palisade_auth::{wire, ProofPair, WorkloadId};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tracing::debug;

use crate::client::TunnelOptions;
use crate::tunnel::TunnelHandle;
use crate::{Error, Result};

const MAX_RESPONSE_HEADERS: usize = 64;
const MAX_LINE_BYTES: u64 = 8 * 1024;

/// Sends the upgrade request and validates the response.
///
/// Validation order: the response proof first (it is the sole trust gate),
/// then the `Upgrade` and `Connection` headers. On success the returned
/// handle wraps the exact buffered stream used here.
pub(crate) async fn negotiate<S>(
    stream: S,
    host: &str,
    workload: &WorkloadId,
    proofs: &ProofPair,
    options: &TunnelOptions,
) -> Result<TunnelHandle<S>>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let mut stream = BufStream::new(stream);

    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: {protocol}\r\n\
         {target}: {workload}\r\n\
         {authorization}: {request_auth}\r\n\
         {detach}: {detach_keys}\r\n\
         {login}: {login_username}\r\n\
         \r\n",
        path = wire::TUNNEL_PATH,
        protocol = wire::UPGRADE_PROTOCOL,
        target = wire::HEADER_TARGET,
        authorization = wire::HEADER_AUTHORIZATION,
        request_auth = proofs.request_auth(),
        detach = wire::HEADER_DETACH_KEYS,
        detach_keys = options.detach_keys,
        login = wire::HEADER_LOGIN_USERNAME,
        login_username = options.login_username,
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(Error::GatewayUnreachable)?;
    stream.flush().await.map_err(Error::GatewayUnreachable)?;

    let (status, head) = read_response_head(&mut stream).await?;
    debug!(status, workload = %workload, "gateway answered upgrade request");

    match head.header(wire::HEADER_AUTHORIZATION_RESPONSE) {
        Some(value) if value == proofs.respond_auth() => {}
        _ => return Err(Error::ProofMismatch),
    }
    if !head
        .header("Upgrade")
        .is_some_and(|value| value.eq_ignore_ascii_case(wire::UPGRADE_PROTOCOL))
    {
        return Err(Error::BadUpgrade(
            "missing or unexpected Upgrade header".into(),
        ));
    }
    if !head
        .header("Connection")
        .is_some_and(|value| value.eq_ignore_ascii_case(wire::CONNECTION_TOKEN))
    {
        return Err(Error::BadUpgrade(
            "missing or unexpected Connection header".into(),
        ));
    }

    Ok(TunnelHandle::new(stream, workload.clone()))
}

#[derive(Debug)]
struct ResponseHead {
    headers: Vec<(String, String)>,
}

impl ResponseHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

async fn read_response_head<S>(stream: &mut BufStream<S>) -> Result<(u16, ResponseHead)>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let status_line = read_line_bounded(stream).await?;
    let status = parse_status_line(&status_line)?;

    let mut headers = Vec::new();
    loop {
        if headers.len() >= MAX_RESPONSE_HEADERS {
            return Err(Error::BadUpgrade("too many response headers".into()));
        }
        let line = read_line_bounded(stream).await?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::BadUpgrade(format!("malformed header line {line:?}")));
        };
        // Leading whitespace would be an obsolete continuation line; those
        // never occur in a gateway response head.
        if name.is_empty() || name.starts_with([' ', '\t']) {
            return Err(Error::BadUpgrade(format!("malformed header line {line:?}")));
        }
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok((status, ResponseHead { headers }))
}

/// Reads one CRLF-terminated line, without ever consuming past it.
async fn read_line_bounded<S>(stream: &mut BufStream<S>) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let mut line = String::new();
    let read = (&mut *stream)
        .take(MAX_LINE_BYTES)
        .read_line(&mut line)
        .await
        .map_err(|err| Error::BadUpgrade(format!("error reading response from gateway: {err}")))?;
    if read == 0 {
        return Err(Error::BadUpgrade(
            "connection closed before the response was complete".into(),
        ));
    }
    if !line.ends_with('\n') {
        return Err(Error::BadUpgrade("response line too long".into()));
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

fn parse_status_line(line: &str) -> Result<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next().unwrap_or("");
    let status = parts.next().and_then(|code| code.parse::<u16>().ok());
    match status {
        Some(code) if version.starts_with("HTTP/1.") => Ok(code),
        _ => Err(Error::BadUpgrade(format!("malformed status line {line:?}"))),
    }
}
