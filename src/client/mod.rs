//! HTTP/1.1 client multiplexing pooled [`HostClient`]s per origin.

mod dialer;
mod host_client;

pub use dialer::{TcpDialer, DEFAULT_DIAL_TIMEOUT};
pub use host_client::{HostClient, DEFAULT_MAX_CONNS_PER_HOST};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio_rustls::rustls;

use crate::args::Args;
use crate::codec::DecodeError;
use crate::protocol::{Request, Response, SendError};

/// Errors surfaced to client callers.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no free connections available to host")]
    NoFreeConns,

    #[error("dialing timed out")]
    DialTimeout,

    #[error("request timed out")]
    Timeout,

    #[error("unsupported protocol {scheme:?}, only http and https work")]
    UnsupportedProtocol { scheme: String },

    #[error("host is not a valid TLS server name")]
    InvalidServerName,

    #[error("connection closed before a full response arrived")]
    ConnectionClosed,

    #[error("{source}")]
    Decode {
        #[from]
        source: DecodeError,
    },

    #[error("{source}")]
    Send {
        #[from]
        source: SendError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Client tunables; zero means "use the default".
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Value of the `User-Agent` request header.
    pub name: String,
    /// Cap on pooled connections per origin
    /// ([`DEFAULT_MAX_CONNS_PER_HOST`] when zero).
    pub max_conns_per_host: usize,
    /// Per-connection read buffer; also caps response header size.
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    /// TLS configuration for https origins; a WebPKI default is used when
    /// absent.
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
}

struct ClientInner {
    config: ClientConfig,
    http: Mutex<HashMap<String, HostClient>>,
    https: Mutex<HashMap<String, HostClient>>,
    cleaner_running: AtomicBool,
}

/// HTTP client. Requests are routed to a per-origin [`HostClient`] created
/// on demand; origins idle for over a minute are dropped by a background
/// cleaner.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Default for Client {
    fn default() -> Self {
        Client::new(ClientConfig::default())
    }
}

const HOST_CLIENT_IDLE_LIFETIME: Duration = Duration::from_secs(60);

impl Client {
    pub fn new(config: ClientConfig) -> Client {
        Client {
            inner: Arc::new(ClientInner {
                config,
                http: Mutex::new(HashMap::new()),
                https: Mutex::new(HashMap::new()),
                cleaner_running: AtomicBool::new(false),
            }),
        }
    }

    /// Sends `req` and fills `resp`. The origin is taken from the request
    /// URI, which must be absolute or paired with a Host header.
    pub async fn do_request(
        &self,
        req: &mut Request,
        resp: &mut Response,
    ) -> Result<(), ClientError> {
        let host_client = self.host_client_for(req)?;
        host_client.do_request(req, resp).await
    }

    /// [`do_request`](Self::do_request) bounded by `timeout`; the in-flight
    /// connection is closed on expiry.
    pub async fn do_timeout(
        &self,
        req: &mut Request,
        resp: &mut Response,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let host_client = self.host_client_for(req)?;
        host_client.do_timeout(req, resp, timeout).await
    }

    /// Fetches `url` and returns `(status_code, body)`.
    pub async fn get(&self, url: &str) -> Result<(u16, Vec<u8>), ClientError> {
        let host_client = self.host_client_for_url(url)?;
        host_client.get(url).await
    }

    /// POSTs `args` urlencoded to `url` and returns `(status_code, body)`.
    pub async fn post(&self, url: &str, args: &Args) -> Result<(u16, Vec<u8>), ClientError> {
        let host_client = self.host_client_for_url(url)?;
        host_client.post(url, args).await
    }

    fn host_client_for(&self, req: &mut Request) -> Result<HostClient, ClientError> {
        let uri = req.uri();
        let scheme = uri.scheme().to_vec();
        let host = String::from_utf8_lossy(uri.host()).into_owned();
        self.lookup(&scheme, host)
    }

    fn host_client_for_url(&self, url: &str) -> Result<HostClient, ClientError> {
        let mut uri = crate::uri::Uri::default();
        uri.parse(b"", url.as_bytes());
        let scheme = uri.scheme().to_vec();
        let host = String::from_utf8_lossy(uri.host()).into_owned();
        self.lookup(&scheme, host)
    }

    fn lookup(&self, scheme: &[u8], host: String) -> Result<HostClient, ClientError> {
        let is_tls = match scheme {
            b"http" => false,
            b"https" => true,
            other => {
                return Err(ClientError::UnsupportedProtocol {
                    scheme: String::from_utf8_lossy(other).into_owned(),
                })
            }
        };
        let map = if is_tls {
            &self.inner.https
        } else {
            &self.inner.http
        };
        let host_client = {
            let mut map = map.lock().unwrap();
            map.entry(host)
                .or_insert_with_key(|host| HostClient::new(host, is_tls, &self.inner.config))
                .clone()
        };
        self.start_cleaner();
        Ok(host_client)
    }

    /// Drops origin clients unused for [`HOST_CLIENT_IDLE_LIFETIME`]; the
    /// task exits once both maps are empty.
    fn start_cleaner(&self) {
        if self.inner.cleaner_running.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(10)).await;
                let Some(inner) = weak.upgrade() else { break };
                let now = SystemTime::now();
                let mut live = 0;
                for map in [&inner.http, &inner.https] {
                    let mut map = map.lock().unwrap();
                    map.retain(|_, hc| {
                        now.duration_since(hc.last_use_time())
                            .map_or(true, |idle| idle <= HOST_CLIENT_IDLE_LIFETIME)
                    });
                    live += map.len();
                }
                if live == 0 {
                    inner.cleaner_running.store(false, Ordering::Release);
                    break;
                }
            }
        });
    }
}
