//! Single-origin client with a LIFO pool of persistent connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;
use tokio_util::codec::{Encoder as _, FramedRead};
use tracing::debug;

use crate::args::Args;
use crate::client::dialer::{default_dialer, TcpDialer};
use crate::client::{ClientConfig, ClientError};
use crate::codec::{RequestEncoder, ResponseDecoder};
use crate::pool::{acquire_request, acquire_response, release_request, release_response};
use crate::protocol::{Request, Response, CONTENT_LENGTH_IDENTITY};

/// Default cap on connections per origin.
pub const DEFAULT_MAX_CONNS_PER_HOST: usize = 10;
const DEFAULT_USER_AGENT: &[u8] = b"blaze-http client";
/// Idle connections older than this are retired by the sweeper.
const IDLE_CONN_LIFETIME: Duration = Duration::from_secs(10);

enum ClientStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl tokio::io::AsyncRead for ClientStream {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(s) => std::pin::Pin::new(s).poll_read(cx, buf),
            ClientStream::Tls(s) => std::pin::Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        data: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        match self.get_mut() {
            ClientStream::Plain(s) => std::pin::Pin::new(s).poll_write(cx, data),
            ClientStream::Tls(s) => std::pin::Pin::new(s).poll_write(cx, data),
        }
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(s) => std::pin::Pin::new(s).poll_flush(cx),
            ClientStream::Tls(s) => std::pin::Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(s) => std::pin::Pin::new(s).poll_shutdown(cx),
            ClientStream::Tls(s) => std::pin::Pin::new(s).poll_shutdown(cx),
        }
    }
}

struct ClientConn {
    framed: FramedRead<ClientStream, ResponseDecoder>,
    encoder: RequestEncoder,
    write_buf: BytesMut,
    returned_at: Instant,
}

impl ClientConn {
    async fn send_request(&mut self, req: &Request) -> Result<(), ClientError> {
        self.write_buf.clear();
        self.encoder.encode(req, &mut self.write_buf)?;
        let stream = self.framed.get_mut();
        stream.write_all(&self.write_buf).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_response(
        &mut self,
        resp: &mut Response,
        skip_body: bool,
    ) -> Result<(), ClientError> {
        self.framed.decoder_mut().skip_body = skip_body;
        match self.framed.next().await {
            Some(Ok(mut decoded)) => {
                std::mem::swap(resp, &mut decoded);
                self.framed.decoder_mut().recycle(decoded);
                Ok(())
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(ClientError::ConnectionClosed),
        }
    }
}

struct IdlePool {
    idle: Vec<ClientConn>,
    count: usize,
    sweeper_running: bool,
}

pub(crate) struct HostClientInner {
    addr: String,
    is_tls: bool,
    user_agent: Bytes,
    max_conns: usize,
    read_buffer_size: usize,
    write_buffer_size: usize,
    tls: Option<TlsConnector>,
    dialer: Arc<TcpDialer>,
    last_use: AtomicU64,
    pool: Mutex<IdlePool>,
}

/// Owns one slot of the connection count from acquisition (or dial start)
/// until release. Dropping it mid-request - a timeout, an error, even a
/// cancelled dial - closes the socket and frees the slot.
struct ConnGuard {
    inner: Arc<HostClientInner>,
    conn: Option<ClientConn>,
    slot: bool,
}

impl ConnGuard {
    async fn send_request(&mut self, req: &Request) -> Result<(), ClientError> {
        match &mut self.conn {
            Some(conn) => conn.send_request(req).await,
            None => Err(ClientError::ConnectionClosed),
        }
    }

    async fn read_response(
        &mut self,
        resp: &mut Response,
        skip_body: bool,
    ) -> Result<(), ClientError> {
        match &mut self.conn {
            Some(conn) => conn.read_response(resp, skip_body).await,
            None => Err(ClientError::ConnectionClosed),
        }
    }

    /// Puts the connection back on the idle stack; the slot stays occupied
    /// by the idle connection.
    fn release(mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.returned_at = Instant::now();
            self.slot = false;
            let start_sweeper = {
                let mut pool = self.inner.pool.lock().unwrap();
                pool.idle.push(conn);
                !std::mem::replace(&mut pool.sweeper_running, true)
            };
            if start_sweeper {
                spawn_idle_sweeper(Arc::clone(&self.inner));
            }
        }
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        if self.slot {
            self.inner.pool.lock().unwrap().count -= 1;
        }
    }
}

/// Retires connections that sat idle longer than [`IDLE_CONN_LIFETIME`];
/// exits once the idle stack drains.
fn spawn_idle_sweeper(inner: Arc<HostClientInner>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let mut pool = inner.pool.lock().unwrap();
            while !pool.idle.is_empty() && pool.idle[0].returned_at.elapsed() > IDLE_CONN_LIFETIME
            {
                pool.idle.remove(0);
                pool.count -= 1;
            }
            if pool.idle.is_empty() {
                pool.sweeper_running = false;
                break;
            }
        }
    });
}

fn default_tls_config() -> Arc<rustls::ClientConfig> {
    static CONFIG: OnceLock<Arc<rustls::ClientConfig>> = OnceLock::new();
    Arc::clone(CONFIG.get_or_init(|| {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    }))
}

fn split_host_port(addr: &str) -> (&str, Option<&str>) {
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let port = rest[end + 1..].strip_prefix(':');
            return (&rest[..end], port);
        }
    }
    if let Some((host, port)) = addr.rsplit_once(':') {
        if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
            return (host, Some(port));
        }
    }
    (addr, None)
}

/// Client scoped to one origin (scheme + host). Holds the connection pool
/// and, for the default dialer, the host's DNS cache.
#[derive(Clone)]
pub struct HostClient {
    inner: Arc<HostClientInner>,
}

impl HostClient {
    /// `addr` is `host` or `host:port`; the scheme's default port applies
    /// when none is given.
    pub fn new(addr: &str, is_tls: bool, config: &ClientConfig) -> HostClient {
        let user_agent = if config.name.is_empty() {
            Bytes::from_static(DEFAULT_USER_AGENT)
        } else {
            Bytes::from(config.name.clone())
        };
        let tls = is_tls.then(|| {
            TlsConnector::from(
                config
                    .tls_config
                    .clone()
                    .unwrap_or_else(default_tls_config),
            )
        });
        let max_conns = if config.max_conns_per_host == 0 {
            DEFAULT_MAX_CONNS_PER_HOST
        } else {
            config.max_conns_per_host
        };
        HostClient {
            inner: Arc::new(HostClientInner {
                addr: addr.to_string(),
                is_tls,
                user_agent,
                max_conns,
                read_buffer_size: config.read_buffer_size,
                write_buffer_size: config.write_buffer_size,
                tls,
                dialer: default_dialer(),
                last_use: AtomicU64::new(0),
                pool: Mutex::new(IdlePool {
                    idle: Vec::new(),
                    count: 0,
                    sweeper_running: false,
                }),
            }),
        }
    }

    /// Seconds-precision timestamp of the last request through this client.
    pub fn last_use_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.inner.last_use.load(Ordering::Relaxed))
    }

    /// Sends `req` and fills `resp`. The request's Host header and request
    /// target are populated from its URI when missing. Returns
    /// [`ClientError::NoFreeConns`] when all pooled connections are busy.
    pub async fn do_request(
        &self,
        req: &mut Request,
        resp: &mut Response,
    ) -> Result<(), ClientError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        self.inner.last_use.store(now, Ordering::Relaxed);

        {
            let uri = req.uri();
            let host = uri.host().to_vec();
            let mut target = BytesMut::new();
            uri.append_request_uri(&mut target);
            if req.header.host().is_empty() {
                req.header.set_host(&host);
            }
            req.header.set_request_uri(&target);
        }

        let mut guard = self.acquire_conn().await?;
        let skip_body = req.header.is_head();
        guard.send_request(req).await?;
        guard.read_response(resp, skip_body).await?;

        // an identity body ran to EOF, so that connection is spent
        if req.header.connection_close()
            || resp.header.connection_close()
            || resp.header.content_length() == CONTENT_LENGTH_IDENTITY
        {
            drop(guard);
        } else {
            guard.release();
        }
        Ok(())
    }

    /// Like [`do_request`](Self::do_request) with a deadline over the whole
    /// exchange. On expiry the in-flight connection is closed, not reused.
    pub async fn do_timeout(
        &self,
        req: &mut Request,
        resp: &mut Response,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        match tokio::time::timeout(timeout, self.do_request(req, resp)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Fetches `url` and returns `(status_code, body)`.
    pub async fn get(&self, url: &str) -> Result<(u16, Vec<u8>), ClientError> {
        let mut req = acquire_request();
        req.header.set_request_uri(url.as_bytes());
        let result = self.exchange(&mut req).await;
        release_request(req);
        result
    }

    /// POSTs `args` urlencoded to `url` and returns `(status_code, body)`.
    pub async fn post(&self, url: &str, args: &Args) -> Result<(u16, Vec<u8>), ClientError> {
        let mut req = acquire_request();
        req.header.set_method(b"POST");
        req.header
            .set_content_type(crate::protocol::headers::POST_ARGS_CONTENT_TYPE);
        req.header.set_request_uri(url.as_bytes());
        let mut body = BytesMut::new();
        args.append_to(&mut body);
        req.set_body(&body);
        let result = self.exchange(&mut req).await;
        release_request(req);
        result
    }

    async fn exchange(&self, req: &mut Request) -> Result<(u16, Vec<u8>), ClientError> {
        let mut resp = acquire_response();
        let result = self.do_request(req, &mut resp).await;
        let out = result.map(|()| (resp.status_code(), resp.body().to_vec()));
        release_response(resp);
        out
    }

    async fn acquire_conn(&self) -> Result<ConnGuard, ClientError> {
        {
            let mut pool = self.inner.pool.lock().unwrap();
            if let Some(conn) = pool.idle.pop() {
                return Ok(ConnGuard {
                    inner: Arc::clone(&self.inner),
                    conn: Some(conn),
                    slot: true,
                });
            }
            if pool.count >= self.inner.max_conns {
                return Err(ClientError::NoFreeConns);
            }
            pool.count += 1;
        }
        // the guard holds the freshly counted slot while dialing
        let mut guard = ConnGuard {
            inner: Arc::clone(&self.inner),
            conn: None,
            slot: true,
        };
        match self.dial_conn().await {
            Ok(conn) => {
                guard.conn = Some(conn);
                Ok(guard)
            }
            Err(e) => {
                debug!(addr = %self.inner.addr, error = %e, "dial failed");
                Err(e)
            }
        }
    }

    async fn dial_conn(&self) -> Result<ClientConn, ClientError> {
        let (host, port) = split_host_port(&self.inner.addr);
        let default_port = if self.inner.is_tls { "443" } else { "80" };
        let target = format!("{}:{}", host, port.unwrap_or(default_port));

        let tcp = self.inner.dialer.dial(&target).await?;
        let stream = match &self.inner.tls {
            Some(connector) => {
                let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
                    .map_err(|_| ClientError::InvalidServerName)?;
                let tls = connector.connect(server_name, tcp).await?;
                ClientStream::Tls(Box::new(tls))
            }
            None => ClientStream::Plain(tcp),
        };

        let decoder = ResponseDecoder::with_max_header_size(self.inner.read_buffer_size);
        let read_capacity = if self.inner.read_buffer_size == 0 {
            crate::server::DEFAULT_BUFFER_SIZE
        } else {
            self.inner.read_buffer_size
        };
        let write_capacity = if self.inner.write_buffer_size == 0 {
            crate::server::DEFAULT_BUFFER_SIZE
        } else {
            self.inner.write_buffer_size
        };
        Ok(ClientConn {
            framed: FramedRead::with_capacity(stream, decoder, read_capacity),
            encoder: RequestEncoder::new(self.inner.user_agent.clone()),
            write_buf: BytesMut::with_capacity(write_capacity),
            returned_at: Instant::now(),
        })
    }

    #[cfg(test)]
    pub(crate) fn pooled_conn_count(&self) -> usize {
        self.inner.pool.lock().unwrap().count
    }
}
