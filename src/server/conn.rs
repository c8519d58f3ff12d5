//! Per-connection serving loop.
//!
//! One task owns the connection for its whole life. Requests are decoded
//! through a `FramedRead`, handled, and answered in order; any error closes
//! the connection without a reply.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error};

use crate::codec::{PayloadItem, RequestDecoder, ResponseEncoder};
use crate::pool;
use crate::protocol::BodyStream;
use crate::server::ctx::RequestCtx;
use crate::server::{ServeError, ServerInner};
use crate::status;

/// Read buffers above this capacity are dropped between requests when
/// `reduce_memory_usage` is on.
const RETAINED_BUFFER_LIMIT: usize = 16 * 1024;

pub(crate) async fn serve_connection<S>(
    inner: Arc<ServerInner>,
    stream: S,
    remote_addr: SocketAddr,
) -> Result<(), ServeError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let cfg = &inner.config;
    let (read_half, write_half) = tokio::io::split(stream);

    let decoder = RequestDecoder::with_limits(
        cfg.read_buffer_size,
        cfg.max_request_body_size,
        cfg.get_only,
    );
    let read_capacity = if cfg.read_buffer_size == 0 {
        crate::server::DEFAULT_BUFFER_SIZE
    } else {
        cfg.read_buffer_size
    };
    let mut framed_read = FramedRead::with_capacity(read_half, decoder, read_capacity);
    let mut framed_write = FramedWrite::new(
        write_half,
        ResponseEncoder::new(inner.server_name.clone(), crate::date::acquire()),
    );
    if cfg.write_buffer_size > 0 {
        framed_write.write_buffer_mut().reserve(cfg.write_buffer_size);
    }

    let conn_time = Instant::now();
    let mut ctx = pool::acquire_ctx();
    ctx.attach(remote_addr, conn_time);
    let mut request_num: u64 = 0;

    let result = loop {
        request_num += 1;

        let (read_timeout, keepalive_bound) = match read_deadline(cfg, conn_time) {
            Ok(found) => found,
            Err(e) => break Err(e),
        };
        let read_start = Instant::now();
        let next = match read_timeout {
            Some(d) => match tokio::time::timeout(d, framed_read.next()).await {
                Ok(item) => item,
                Err(_) if keepalive_bound => break Err(ServeError::KeepaliveTimeout),
                Err(_) => break Err(ServeError::ReadTimeout),
            },
            None => framed_read.next().await,
        };
        let request = match next {
            None => break Ok(()),
            Some(Err(e)) => break Err(e.into()),
            Some(Ok(request)) => request,
        };
        ctx.begin_request(request, request_num, read_start.elapsed());

        let handler = Arc::clone(&inner.handler);
        let handled = std::panic::AssertUnwindSafe(handler.handle(&mut ctx))
            .catch_unwind()
            .await;
        if handled.is_err() {
            error!(remote = %remote_addr, "handler panicked, closing connection");
            break Err(ServeError::HandlerPanic);
        }

        let hijack = ctx.take_hijack_handler();

        if let Some(msg) = ctx.take_timeout_err_msg() {
            // The handler task may still hold the detached exchange; this
            // ctx was never shared with it, so a fresh 408 is safe here.
            ctx.error(&msg, status::REQUEST_TIMEOUT);
            ctx.set_connection_close();
        }
        if cfg.max_requests_per_conn > 0 && request_num >= cfg.max_requests_per_conn {
            ctx.set_connection_close();
        }
        if ctx.request.header.is_head() {
            ctx.response.skip_body = true;
        }

        let (write_timeout, keepalive_expired) = write_deadline(cfg, conn_time);
        if keepalive_expired {
            ctx.set_connection_close();
        }

        if let Err(e) = write_response(&mut framed_write, &mut ctx, write_timeout).await {
            break Err(e);
        }

        let close =
            ctx.request.header.connection_close() || ctx.response.header.connection_close();
        if close {
            break Ok(());
        }

        if let Some(handler) = hijack {
            let prefix = framed_read.read_buffer_mut().split().freeze();
            let read_half = framed_read.into_inner();
            let write_half = framed_write.into_inner();
            let io = read_half.unsplit(write_half);
            spawn_hijack_task(handler, HijackedConn::new(prefix, io));
            pool::release_ctx(ctx);
            return Ok(());
        }

        let mut served = ctx.end_request();
        if cfg.reduce_memory_usage && ctx.last_read_duration() > Duration::from_secs(1) {
            served.trim_body_buffer(RETAINED_BUFFER_LIMIT);
            ctx.response.trim_body_buffer(RETAINED_BUFFER_LIMIT);
            let buf = framed_read.read_buffer_mut();
            if buf.is_empty() && buf.capacity() > RETAINED_BUFFER_LIMIT {
                *buf = BytesMut::new();
            }
        }
        framed_read.decoder_mut().recycle(served);
        ctx.response.clear();
    };

    if let Err(e) = &result {
        debug!(remote = %remote_addr, error = %e, "connection closed");
    }
    pool::release_ctx(ctx);
    result
}

/// Remaining read allowance: the smaller of `read_timeout` and what is left
/// of the keep-alive lifetime. The bool reports whether the keep-alive bound
/// is the tighter one.
fn read_deadline(
    cfg: &crate::server::ServerConfig,
    conn_time: Instant,
) -> Result<(Option<Duration>, bool), ServeError> {
    let mut deadline = cfg.read_timeout;
    let mut keepalive_bound = false;
    if let Some(max) = cfg.max_keepalive_duration {
        let remaining = max
            .checked_sub(conn_time.elapsed())
            .filter(|d| !d.is_zero())
            .ok_or(ServeError::KeepaliveTimeout)?;
        match deadline {
            Some(d) if d <= remaining => {}
            _ => {
                deadline = Some(remaining);
                keepalive_bound = true;
            }
        }
    }
    Ok((deadline, keepalive_bound))
}

/// Remaining write allowance. An exhausted keep-alive lifetime grants a
/// 100ms grace write with `Connection: close` forced.
fn write_deadline(
    cfg: &crate::server::ServerConfig,
    conn_time: Instant,
) -> (Option<Duration>, bool) {
    let mut deadline = cfg.write_timeout;
    let mut expired = false;
    if let Some(max) = cfg.max_keepalive_duration {
        match max.checked_sub(conn_time.elapsed()).filter(|d| !d.is_zero()) {
            Some(remaining) => {
                deadline = Some(deadline.map_or(remaining, |d| d.min(remaining)));
            }
            None => {
                expired = true;
                deadline = Some(Duration::from_millis(100));
            }
        }
    }
    (deadline, expired)
}

async fn write_response<S>(
    framed_write: &mut FramedWrite<WriteHalf<S>, ResponseEncoder>,
    ctx: &mut RequestCtx,
    deadline: Option<Duration>,
) -> Result<(), ServeError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let skip_body = ctx.response.skip_body;

    // the encoder frames the head from the still-attached stream size
    send_timed(framed_write.send(&ctx.response), deadline).await??;

    if let Some(stream) = ctx.response.take_body_stream() {
        if !skip_body {
            write_body_stream(framed_write, stream, deadline).await?;
        }
    }
    Ok(())
}

async fn write_body_stream<S>(
    framed_write: &mut FramedWrite<WriteHalf<S>, ResponseEncoder>,
    stream: BodyStream,
    deadline: Option<Duration>,
) -> Result<(), ServeError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let BodyStream { mut reader, size } = stream;
    let mut remaining = if size >= 0 { Some(size as u64) } else { None };
    let mut buf = vec![0u8; 8192];
    loop {
        if remaining == Some(0) {
            break;
        }
        let n = send_timed(reader.read(&mut buf), deadline).await??;
        if n == 0 {
            if matches!(remaining, Some(rem) if rem > 0) {
                return Err(ServeError::Io {
                    source: io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "body stream ended before its declared size",
                    ),
                });
            }
            break;
        }
        let take = match remaining {
            Some(rem) => n.min(rem as usize),
            None => n,
        };
        send_timed(
            framed_write.send(PayloadItem::Chunk(Bytes::copy_from_slice(&buf[..take]))),
            deadline,
        )
        .await??;
        if let Some(rem) = &mut remaining {
            *rem -= take as u64;
        }
    }
    send_timed(framed_write.send(PayloadItem::Eof), deadline).await??;
    Ok(())
}

/// Runs `fut` under the optional write deadline.
async fn send_timed<F>(fut: F, deadline: Option<Duration>) -> Result<F::Output, ServeError>
where
    F: std::future::Future,
{
    match deadline {
        Some(d) => tokio::time::timeout(d, fut)
            .await
            .map_err(|_| ServeError::WriteTimeout),
        None => Ok(fut.await),
    }
}

fn spawn_hijack_task(handler: crate::server::ctx::HijackHandlerFn, conn: HijackedConn) {
    tokio::spawn(async move {
        if std::panic::AssertUnwindSafe(handler(conn))
            .catch_unwind()
            .await
            .is_err()
        {
            error!("panic on hijacked connection");
        }
        // the connection is dropped (closed) when the handler returns
    });
}

trait HijackIo: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> HijackIo for T {}

/// Raw connection handed to a hijack handler. Bytes the server had already
/// buffered past the last request are replayed before the socket is read.
pub struct HijackedConn {
    prefix: Bytes,
    io: Box<dyn HijackIo>,
}

impl HijackedConn {
    fn new(prefix: Bytes, io: impl AsyncRead + AsyncWrite + Send + Unpin + 'static) -> Self {
        HijackedConn {
            prefix,
            io: Box::new(io),
        }
    }
}

impl AsyncRead for HijackedConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix.split_to(n));
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for HijackedConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write(cx, data)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hijacked_conn_replays_buffered_bytes() {
        let (client, server) = tokio::io::duplex(64);
        let mut conn = HijackedConn::new(Bytes::from_static(b"buffered"), server);

        let (mut client_read, mut client_write) = tokio::io::split(client);
        tokio::io::AsyncWriteExt::write_all(&mut client_write, b" fresh").await.unwrap();

        let mut out = vec![0u8; 8];
        conn.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"buffered");

        let mut out = vec![0u8; 6];
        conn.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b" fresh");

        tokio::io::AsyncWriteExt::write_all(&mut conn, b"reply").await.unwrap();
        let mut echoed = vec![0u8; 5];
        client_read.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"reply");
    }
}
