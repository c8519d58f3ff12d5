//! TCP dialer with cached DNS resolution and round-robin rotation.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use tokio::net::{lookup_host, TcpStream};
use tracing::trace;

use crate::client::ClientError;

/// Applied to every connection attempt.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const DNS_CACHE_TTL: Duration = Duration::from_secs(60);

/// Dials `host:port` targets. Resolved addresses are cached for one minute
/// and rotated round-robin; entries untouched for twice the TTL are swept
/// by a background task.
#[derive(Default)]
pub struct TcpDialer {
    cache: Mutex<HashMap<String, DnsEntry>>,
    sweeper_running: AtomicBool,
}

struct DnsEntry {
    addrs: Vec<SocketAddr>,
    resolve_time: Instant,
    next: usize,
    pending: bool,
}

impl DnsEntry {
    fn rotate(&mut self) -> SocketAddr {
        let addr = self.addrs[self.next % self.addrs.len()];
        self.next = self.next.wrapping_add(1);
        addr
    }
}

impl TcpDialer {
    /// Connects to `addr` (`host:port`), resolving through the cache.
    /// Returns [`ClientError::DialTimeout`] when the connection cannot be
    /// established within [`DEFAULT_DIAL_TIMEOUT`].
    pub async fn dial(self: &Arc<Self>, addr: &str) -> Result<TcpStream, ClientError> {
        let target = self.pick_addr(addr).await?;
        trace!(addr, target = %target, "dialing");
        match tokio::time::timeout(DEFAULT_DIAL_TIMEOUT, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ClientError::DialTimeout),
        }
    }

    async fn pick_addr(self: &Arc<Self>, addr: &str) -> Result<SocketAddr, ClientError> {
        self.start_sweeper();
        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get_mut(addr) {
                // serve stale entries while a re-resolve is in flight
                if entry.resolve_time.elapsed() <= DNS_CACHE_TTL || entry.pending {
                    return Ok(entry.rotate());
                }
                entry.pending = true;
            }
        }

        let resolved = match lookup_host(addr).await {
            Ok(addrs) => {
                let (mut v4, v6): (Vec<_>, Vec<_>) =
                    addrs.partition::<Vec<_>, _>(|a| a.is_ipv4());
                v4.extend(v6);
                v4
            }
            Err(e) => {
                let mut cache = self.cache.lock().unwrap();
                if let Some(entry) = cache.get_mut(addr) {
                    entry.pending = false;
                }
                return Err(e.into());
            }
        };
        if resolved.is_empty() {
            return Err(ClientError::Io {
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no addresses for {addr}"),
                ),
            });
        }

        let mut cache = self.cache.lock().unwrap();
        let entry = cache.entry(addr.to_string()).or_insert_with(|| DnsEntry {
            addrs: Vec::new(),
            resolve_time: Instant::now(),
            next: 0,
            pending: false,
        });
        entry.addrs = resolved;
        entry.resolve_time = Instant::now();
        entry.pending = false;
        Ok(entry.rotate())
    }

    fn start_sweeper(self: &Arc<Self>) {
        if self.sweeper_running.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let Some(dialer) = weak.upgrade() else { break };
                let mut cache = dialer.cache.lock().unwrap();
                cache.retain(|_, e| e.pending || e.resolve_time.elapsed() <= 2 * DNS_CACHE_TTL);
            }
        });
    }
}

/// Shared dialer used when a client has no custom one.
pub(crate) fn default_dialer() -> Arc<TcpDialer> {
    static DIALER: OnceLock<Arc<TcpDialer>> = OnceLock::new();
    Arc::clone(DIALER.get_or_init(|| Arc::new(TcpDialer::default())))
}
