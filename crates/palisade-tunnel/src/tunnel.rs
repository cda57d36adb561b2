//! The authenticated tunnel handle returned to the caller.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use palisade_auth::WorkloadId;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufStream, ReadBuf};

/// An open, authenticated duplex tunnel to a workload gateway.
///
/// The handle owns the connection exclusively from the moment the upgrade
/// succeeds; the caller is responsible for eventual shutdown. It wraps the
/// exact buffered stream the upgrade handshake used, so the first byte read
/// from it is the first byte the gateway sent after the HTTP response head;
/// nothing buffered ahead of the response is lost or replayed.
pub struct TunnelHandle<S> {
    stream: BufStream<S>,
    workload: WorkloadId,
}

impl<S> std::fmt::Debug for TunnelHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("workload", &self.workload)
            .finish_non_exhaustive()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> TunnelHandle<S> {
    pub(crate) fn new(stream: BufStream<S>, workload: WorkloadId) -> Self {
        Self { stream, workload }
    }

    /// Workload this tunnel is attached to, for diagnostic attribution.
    pub fn workload(&self) -> &WorkloadId {
        &self.workload
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for TunnelHandle<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncBufRead for TunnelHandle<S> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().stream).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.get_mut().stream).consume(amt)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for TunnelHandle<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
