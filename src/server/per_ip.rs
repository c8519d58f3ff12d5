//! Per-IP connection counting for `max_conns_per_ip`.
//!
//! Only IPv4 peers (including v4-mapped IPv6) are counted; other IPv6
//! addresses are not limited.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub(crate) struct PerIpCounter {
    map: Mutex<HashMap<Ipv4Addr, u32>>,
}

impl PerIpCounter {
    /// Increments the count for `ip` and returns the new value.
    pub(crate) fn register(&self, ip: Ipv4Addr) -> u32 {
        let mut map = self.map.lock().unwrap();
        let count = map.entry(ip).or_insert(0);
        *count += 1;
        *count
    }

    /// Decrements the count for `ip`, removing the entry at zero.
    pub(crate) fn unregister(&self, ip: Ipv4Addr) {
        let mut map = self.map.lock().unwrap();
        if let Some(count) = map.get_mut(&ip) {
            *count -= 1;
            if *count == 0 {
                map.remove(&ip);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn count(&self, ip: Ipv4Addr) -> Option<u32> {
        self.map.lock().unwrap().get(&ip).copied()
    }
}

pub(crate) fn ip4_of(addr: &SocketAddr) -> Option<Ipv4Addr> {
    match addr.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(ip) => ip.to_ipv4_mapped(),
    }
}

/// Unregisters its address exactly once, on drop.
#[derive(Debug)]
pub(crate) struct PerIpGuard {
    counter: Arc<PerIpCounter>,
    ip: Ipv4Addr,
}

impl PerIpGuard {
    pub(crate) fn new(counter: Arc<PerIpCounter>, ip: Ipv4Addr) -> Self {
        PerIpGuard { counter, ip }
    }
}

impl Drop for PerIpGuard {
    fn drop(&mut self) {
        self.counter.unregister(self.ip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_unregister_balance() {
        let counter = PerIpCounter::default();
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        for _ in 0..5 {
            counter.register(ip);
        }
        assert_eq!(counter.count(ip), Some(5));
        for _ in 0..5 {
            counter.unregister(ip);
        }
        assert_eq!(counter.count(ip), None);
    }

    #[test]
    fn guard_unregisters_once() {
        let counter = Arc::new(PerIpCounter::default());
        let ip = Ipv4Addr::new(192, 168, 0, 7);
        counter.register(ip);
        {
            let _guard = PerIpGuard::new(Arc::clone(&counter), ip);
            assert_eq!(counter.count(ip), Some(1));
        }
        assert_eq!(counter.count(ip), None);
    }

    #[test]
    fn only_ipv4_is_counted() {
        let v4: SocketAddr = "1.2.3.4:80".parse().unwrap();
        assert_eq!(ip4_of(&v4), Some(Ipv4Addr::new(1, 2, 3, 4)));

        let v6: SocketAddr = "[2001:db8::1]:80".parse().unwrap();
        assert_eq!(ip4_of(&v6), None);

        let mapped: SocketAddr = "[::ffff:1.2.3.4]:80".parse().unwrap();
        assert_eq!(ip4_of(&mapped), Some(Ipv4Addr::new(1, 2, 3, 4)));
    }
}
