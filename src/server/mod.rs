//! HTTP/1.1 server: accept loop, worker pool, per-connection serving.

mod conn;
mod ctx;
mod per_ip;
mod worker_pool;

pub use conn::HijackedConn;
pub use ctx::RequestCtx;
pub use worker_pool::WorkerPool;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{error, warn};

use crate::codec::DecodeError;
use crate::server::per_ip::{ip4_of, PerIpCounter, PerIpGuard};

/// Default maximum number of concurrently served connections.
pub const DEFAULT_CONCURRENCY: usize = 256 * 1024;
pub(crate) const DEFAULT_BUFFER_SIZE: usize = 4096;
const DEFAULT_SERVER_NAME: &str = "blaze-http";

/// Errors surfaced by connection serving.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("too many connections from this ip")]
    PerIpConnLimit,

    #[error("concurrency limit exceeded")]
    ConcurrencyLimit,

    #[error("keep-alive lifetime exceeded")]
    KeepaliveTimeout,

    #[error("request read timed out")]
    ReadTimeout,

    #[error("response write timed out")]
    WriteTimeout,

    #[error("handler panicked")]
    HandlerPanic,

    #[error("{source}")]
    Decode {
        #[from]
        source: DecodeError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Processes one request per call. Handlers must not retain references to
/// the ctx past the call; a handler that needs to outlive its slot goes
/// through [`TimeoutHandler`].
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, ctx: &mut RequestCtx);
}

/// Adapter turning a plain closure into a [`Handler`].
pub struct HandlerFunc<F>(pub F);

#[async_trait]
impl<F> Handler for HandlerFunc<F>
where
    F: Fn(&mut RequestCtx) + Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut RequestCtx) {
        (self.0)(ctx)
    }
}

/// Runs the wrapped handler in its own task racing a timer. When the timer
/// wins, the serving loop discards whatever the handler wrote and answers
/// 408 with `msg`; the handler task keeps its detached ctx and finishes
/// harmlessly off-wire.
pub struct TimeoutHandler<H> {
    inner: Arc<H>,
    timeout: Duration,
    msg: String,
}

impl<H: Handler> TimeoutHandler<H> {
    pub fn new(inner: H, timeout: Duration, msg: impl Into<String>) -> Self {
        TimeoutHandler {
            inner: Arc::new(inner),
            timeout,
            msg: msg.into(),
        }
    }
}

#[async_trait]
impl<H: Handler> Handler for TimeoutHandler<H> {
    async fn handle(&self, ctx: &mut RequestCtx) {
        let mut task_ctx = ctx.detach_for_task();
        let inner = Arc::clone(&self.inner);
        let mut join = tokio::spawn(async move {
            inner.handle(&mut task_ctx).await;
            task_ctx
        });
        match tokio::time::timeout(self.timeout, &mut join).await {
            Ok(Ok(done)) => ctx.reattach(done),
            Ok(Err(join_err)) => {
                error!(error = %join_err, "timeout-wrapped handler task failed");
                ctx.timeout_error(&self.msg);
            }
            // handler task keeps running detached; it owns its ctx and has
            // no way to reach the wire
            Err(_) => ctx.timeout_error(&self.msg),
        }
    }
}

/// Server tunables. Zero or `None` means "no limit" unless noted.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Value of the `Server` response header.
    pub name: String,
    /// Maximum number of concurrently served connections.
    pub concurrency: usize,
    /// Read buffer size per connection; also caps the header block size.
    pub read_buffer_size: usize,
    /// Write buffer size per connection.
    pub write_buffer_size: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    /// Maximum concurrent connections per client IPv4 address.
    pub max_conns_per_ip: usize,
    /// Connection closes after this many requests.
    pub max_requests_per_conn: u64,
    /// Keep-alive connections are closed after this lifetime.
    pub max_keepalive_duration: Option<Duration>,
    /// Requests with a larger body are rejected and the connection closed.
    pub max_request_body_size: u64,
    /// Trades CPU for smaller per-connection buffers on mostly-idle
    /// keep-alive connections.
    pub reduce_memory_usage: bool,
    /// Rejects any non-GET request.
    pub get_only: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            name: String::new(),
            concurrency: DEFAULT_CONCURRENCY,
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            read_timeout: None,
            write_timeout: None,
            max_conns_per_ip: 0,
            max_requests_per_conn: 0,
            max_keepalive_duration: None,
            max_request_body_size: 0,
            reduce_memory_usage: false,
            get_only: false,
        }
    }
}

pub(crate) struct ServerInner {
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) config: ServerConfig,
    pub(crate) server_name: Bytes,
    concurrency: AtomicU32,
    per_ip: Arc<PerIpCounter>,
}

impl ServerInner {
    fn register_per_ip(&self, remote: &SocketAddr) -> Result<Option<PerIpGuard>, ServeError> {
        if self.config.max_conns_per_ip == 0 {
            return Ok(None);
        }
        let Some(ip) = ip4_of(remote) else {
            return Ok(None);
        };
        let n = self.per_ip.register(ip);
        if n as usize > self.config.max_conns_per_ip {
            self.per_ip.unregister(ip);
            return Err(ServeError::PerIpConnLimit);
        }
        Ok(Some(PerIpGuard::new(Arc::clone(&self.per_ip), ip)))
    }
}

struct ConcurrencyGuard(Arc<ServerInner>);

impl Drop for ConcurrencyGuard {
    fn drop(&mut self) {
        self.0.concurrency.fetch_sub(1, Ordering::AcqRel);
    }
}

fn try_acquire_concurrency(inner: &Arc<ServerInner>) -> Option<ConcurrencyGuard> {
    let n = inner.concurrency.fetch_add(1, Ordering::AcqRel) + 1;
    if n as usize > inner.config.concurrency {
        inner.concurrency.fetch_sub(1, Ordering::AcqRel);
        return None;
    }
    Some(ConcurrencyGuard(Arc::clone(inner)))
}

/// Connection handed to a pool worker; dropping it closes the socket and
/// releases both limit guards.
struct ConnJob {
    stream: TcpStream,
    remote: SocketAddr,
    _per_ip: Option<PerIpGuard>,
    _concurrency: ConcurrencyGuard,
}

/// HTTP server. Cheap to clone; all clones share limits and state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn new(config: ServerConfig, handler: impl Handler) -> Self {
        let server_name = if config.name.is_empty() {
            Bytes::from_static(DEFAULT_SERVER_NAME.as_bytes())
        } else {
            Bytes::from(config.name.clone())
        };
        Server {
            inner: Arc::new(ServerInner {
                handler: Arc::new(handler),
                config,
                server_name,
                concurrency: AtomicU32::new(0),
                per_ip: Arc::new(PerIpCounter::default()),
            }),
        }
    }

    /// Binds `addr` and serves until the listener fails permanently.
    pub async fn listen_and_serve(&self, addr: impl ToSocketAddrs) -> crate::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Accept loop: per-IP limit, concurrency limit, then hand-off to the
    /// worker pool. Transient accept errors are retried after one second.
    pub async fn serve(&self, listener: TcpListener) -> crate::Result<()> {
        let inner = Arc::clone(&self.inner);
        let pool = WorkerPool::new(self.inner.config.concurrency, move |job: ConnJob| {
            let inner = Arc::clone(&inner);
            async move {
                let ConnJob {
                    stream,
                    remote,
                    _per_ip,
                    _concurrency,
                } = job;
                let _ = conn::serve_connection(inner, stream, remote).await;
            }
        });

        let mut last_overflow_warn: Option<Instant> = None;
        let mut last_per_ip_warn: Option<Instant> = None;
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) if is_transient_accept_error(&e) => {
                    warn!(error = %e, "transient error accepting connection");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                Err(e) => {
                    pool.stop();
                    return Err(e.into());
                }
            };

            let per_ip = match self.inner.register_per_ip(&remote) {
                Ok(guard) => guard,
                Err(_) => {
                    warn_rate_limited(&mut last_per_ip_warn, || {
                        warn!(
                            remote = %remote,
                            limit = self.inner.config.max_conns_per_ip,
                            "per-ip connection limit reached"
                        );
                    });
                    continue;
                }
            };
            let Some(concurrency) = try_acquire_concurrency(&self.inner) else {
                continue;
            };
            let job = ConnJob {
                stream,
                remote,
                _per_ip: per_ip,
                _concurrency: concurrency,
            };
            if !pool.serve(job) {
                warn_rate_limited(&mut last_overflow_warn, || {
                    warn!(
                        concurrency = self.inner.config.concurrency,
                        "connection dropped: all workers are busy"
                    );
                });
            }
        }
    }

    /// Serves a single caller-provided connection, e.g. one already wrapped
    /// in TLS. Applies the per-IP and concurrency limits.
    pub async fn serve_connection<S>(
        &self,
        stream: S,
        remote_addr: SocketAddr,
    ) -> Result<(), ServeError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let per_ip = self.inner.register_per_ip(&remote_addr)?;
        let Some(concurrency) = try_acquire_concurrency(&self.inner) else {
            return Err(ServeError::ConcurrencyLimit);
        };
        let result = conn::serve_connection(Arc::clone(&self.inner), stream, remote_addr).await;
        drop(concurrency);
        drop(per_ip);
        result
    }
}

fn is_transient_accept_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
    )
}

/// Runs `log` at most once per minute.
fn warn_rate_limited(last: &mut Option<Instant>, log: impl FnOnce()) {
    let now = Instant::now();
    if last.map_or(true, |at| now.duration_since(at) > Duration::from_secs(60)) {
        *last = Some(now);
        log();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ResponseDecoder;
    use futures::StreamExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::codec::FramedRead;

    fn init_tracing() {
        static INIT: std::sync::Once = std::sync::Once::new();
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_max_level(tracing::Level::WARN)
                .try_init();
        });
    }

    async fn start(config: ServerConfig, handler: impl Handler) -> SocketAddr {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Server::new(config, handler);
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });
        addr
    }

    struct StolenCtxHandler;

    #[async_trait]
    impl Handler for StolenCtxHandler {
        async fn handle(&self, ctx: &mut RequestCtx) {
            ctx.success(b"text/plain", b"Stolen ctx");
        }
    }

    #[tokio::test]
    async fn minimal_request() {
        let addr = start(ServerConfig::default(), StolenCtxHandler).await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"GET /foo HTTP/1.1\r\nHost: google.com\r\n\r\n")
            .await
            .unwrap();

        let mut framed = FramedRead::new(conn, ResponseDecoder::new());
        let resp = framed.next().await.unwrap().unwrap();
        assert_eq!(resp.status_code(), 200);
        assert_eq!(resp.header.content_type(), b"text/plain");
        assert_eq!(resp.header.content_length(), 10);
        assert_eq!(resp.body(), b"Stolen ctx");

        // no further bytes arrive within the grace window
        let mut conn = framed.into_inner();
        let mut byte = [0u8; 1];
        let extra = tokio::time::timeout(Duration::from_millis(100), conn.read(&mut byte)).await;
        assert!(extra.is_err(), "unexpected bytes after response");
    }

    #[tokio::test]
    async fn keep_alive_pipelining() {
        let addr = start(
            ServerConfig::default(),
            HandlerFunc(|ctx: &mut RequestCtx| {
                let path = ctx.path().to_vec();
                ctx.set_body(&path);
            }),
        )
        .await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(
            b"GET /first HTTP/1.1\r\nHost: x\r\n\r\nGET /second HTTP/1.1\r\nHost: x\r\n\r\n",
        )
        .await
        .unwrap();

        let mut framed = FramedRead::new(conn, ResponseDecoder::new());
        let first = framed.next().await.unwrap().unwrap();
        assert_eq!(first.body(), b"/first");
        let second = framed.next().await.unwrap().unwrap();
        assert_eq!(second.body(), b"/second");
    }

    #[tokio::test]
    async fn chunked_request_body() {
        let addr = start(
            ServerConfig::default(),
            HandlerFunc(|ctx: &mut RequestCtx| {
                let body = ctx.post_body().to_vec();
                ctx.set_body(&body);
            }),
        )
        .await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(
            b"POST /foo HTTP/1.1\r\nHost: google.com\r\nTransfer-Encoding: chunked\r\nContent-Type: aa/bb\r\n\r\n3\r\nabc\r\n5\r\n12345\r\n0\r\n\r\n",
        )
        .await
        .unwrap();

        let mut framed = FramedRead::new(conn, ResponseDecoder::new());
        let resp = framed.next().await.unwrap().unwrap();
        assert_eq!(resp.body(), b"abc12345");
    }

    #[tokio::test]
    async fn keepalive_timeout_closes_silently() {
        let config = ServerConfig {
            max_keepalive_duration: Some(Duration::from_millis(10)),
            ..ServerConfig::default()
        };
        let addr = start(config, StolenCtxHandler).await;
        let mut conn = TcpStream::connect(addr).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut buf = [0u8; 64];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "server must close without sending anything");
    }

    #[tokio::test]
    async fn max_requests_per_conn_forces_close() {
        let config = ServerConfig {
            max_requests_per_conn: 1,
            ..ServerConfig::default()
        };
        let addr = start(config, StolenCtxHandler).await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();

        let mut framed = FramedRead::new(conn, ResponseDecoder::new());
        let resp = framed.next().await.unwrap().unwrap();
        assert!(resp.header.connection_close());
        assert!(framed.next().await.is_none(), "connection must be closed");
    }

    #[tokio::test]
    async fn head_response_has_no_body() {
        let addr = start(ServerConfig::default(), StolenCtxHandler).await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"HEAD / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut raw = Vec::new();
        conn.read_to_end(&mut raw).await.unwrap();
        let text = String::from_utf8(raw).unwrap();
        assert!(text.contains("Content-Length: 10\r\n"));
        assert!(text.ends_with("\r\n\r\n"), "no body after headers: {text:?}");
    }

    #[tokio::test]
    async fn malformed_request_gets_no_reply() {
        let addr = start(ServerConfig::default(), StolenCtxHandler).await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"GET / HTTP/1.1\r\nno colon here\r\n\r\n")
            .await
            .unwrap();

        let mut raw = Vec::new();
        conn.read_to_end(&mut raw).await.unwrap();
        assert!(raw.is_empty());
    }

    #[tokio::test]
    async fn handler_panic_closes_connection() {
        let addr = start(
            ServerConfig::default(),
            HandlerFunc(|_: &mut RequestCtx| panic!("boom")),
        )
        .await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();

        let mut raw = Vec::new();
        conn.read_to_end(&mut raw).await.unwrap();
        assert!(raw.is_empty());
    }

    #[tokio::test]
    async fn timeout_handler_substitutes_408() {
        struct Slow;
        #[async_trait]
        impl Handler for Slow {
            async fn handle(&self, ctx: &mut RequestCtx) {
                tokio::time::sleep(Duration::from_secs(5)).await;
                ctx.set_body(b"too late");
            }
        }
        let handler = TimeoutHandler::new(Slow, Duration::from_millis(20), "handler timed out");
        let addr = start(ServerConfig::default(), handler).await;

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();

        let mut framed = FramedRead::new(conn, ResponseDecoder::new());
        let resp = framed.next().await.unwrap().unwrap();
        assert_eq!(resp.status_code(), crate::status::REQUEST_TIMEOUT);
        assert_eq!(resp.body(), b"handler timed out");
        assert!(resp.header.connection_close());
        assert!(framed.next().await.is_none());
    }

    #[tokio::test]
    async fn hijack_hands_over_the_connection() {
        let addr = start(
            ServerConfig::default(),
            HandlerFunc(|ctx: &mut RequestCtx| {
                ctx.set_body(b"switching");
                ctx.hijack(|mut conn| async move {
                    let mut buf = [0u8; 4];
                    if conn.read_exact(&mut buf).await.is_ok() {
                        let _ = conn.write_all(b"echo:").await;
                        let _ = conn.write_all(&buf).await;
                    }
                });
            }),
        )
        .await;

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();

        let mut framed = FramedRead::new(conn, ResponseDecoder::new());
        let resp = framed.next().await.unwrap().unwrap();
        assert_eq!(resp.body(), b"switching");

        let mut conn = framed.into_inner();
        conn.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 9];
        conn.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"echo:ping");
    }

    #[tokio::test]
    async fn body_stream_responses() {
        let addr = start(
            ServerConfig::default(),
            HandlerFunc(|ctx: &mut RequestCtx| {
                if ctx.path() == b"/chunked" {
                    ctx.set_body_stream(std::io::Cursor::new(b"streamed body".to_vec()), -1);
                } else {
                    ctx.set_body_stream(std::io::Cursor::new(b"fixed".to_vec()), 5);
                }
            }),
        )
        .await;

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"GET /chunked HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let mut framed = FramedRead::new(conn, ResponseDecoder::new());
        let resp = framed.next().await.unwrap().unwrap();
        assert_eq!(resp.header.content_length(), crate::protocol::CONTENT_LENGTH_CHUNKED);
        assert_eq!(resp.body(), b"streamed body");

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"GET /fixed HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let mut framed = FramedRead::new(conn, ResponseDecoder::new());
        let resp = framed.next().await.unwrap().unwrap();
        assert_eq!(resp.header.content_length(), 5);
        assert_eq!(resp.body(), b"fixed");
    }

    #[tokio::test]
    async fn concurrency_limit_closes_excess_connections() {
        struct Slow;
        #[async_trait]
        impl Handler for Slow {
            async fn handle(&self, ctx: &mut RequestCtx) {
                tokio::time::sleep(Duration::from_millis(200)).await;
                ctx.set_body(b"ok");
            }
        }
        let config = ServerConfig {
            concurrency: 1,
            ..ServerConfig::default()
        };
        let addr = start(config, Slow).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        first
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // second connection is over the limit and closed unanswered
        let mut second = TcpStream::connect(addr).await.unwrap();
        second
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut raw = Vec::new();
        second.read_to_end(&mut raw).await.unwrap();
        assert!(raw.is_empty());

        // the first one still completes
        let mut framed = FramedRead::new(first, ResponseDecoder::new());
        let resp = framed.next().await.unwrap().unwrap();
        assert_eq!(resp.body(), b"ok");
    }

    #[tokio::test]
    async fn per_ip_limit_closes_excess_connections() {
        struct Hold;
        #[async_trait]
        impl Handler for Hold {
            async fn handle(&self, ctx: &mut RequestCtx) {
                tokio::time::sleep(Duration::from_millis(200)).await;
                ctx.set_body(b"held");
            }
        }
        let config = ServerConfig {
            max_conns_per_ip: 1,
            ..ServerConfig::default()
        };
        let addr = start(config, Hold).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        first
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        second
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut raw = Vec::new();
        second.read_to_end(&mut raw).await.unwrap();
        assert!(raw.is_empty());
    }

    #[tokio::test]
    async fn get_only_rejects_post_without_reply() {
        let config = ServerConfig {
            get_only: true,
            ..ServerConfig::default()
        };
        let addr = start(config, StolenCtxHandler).await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(
            b"POST / HTTP/1.1\r\nHost: x\r\nContent-Type: a/b\r\nContent-Length: 2\r\n\r\nhi",
        )
        .await
        .unwrap();
        let mut raw = Vec::new();
        conn.read_to_end(&mut raw).await.unwrap();
        assert!(raw.is_empty());
    }
}
