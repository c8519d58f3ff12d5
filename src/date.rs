//! Shared `Date` header ticker.
//!
//! The formatted value is refreshed once per second by a background task and
//! swapped atomically; response serialization only loads it. The ticker is
//! reference counted: it starts with the first server and its task exits once
//! no server holds it.

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use bytes::Bytes;

pub(crate) struct DateTicker {
    value: ArcSwap<Bytes>,
}

impl DateTicker {
    fn now() -> Bytes {
        Bytes::from(httpdate::fmt_http_date(SystemTime::now()))
    }

    fn refresh(&self) {
        self.value.store(Arc::new(Self::now()));
    }

    /// Current RFC 1123 date value.
    pub(crate) fn current(&self) -> Arc<Bytes> {
        self.value.load_full()
    }

    /// Ticker pinned to a constant value, for deterministic serialization
    /// tests.
    #[cfg(test)]
    pub(crate) fn fixed(value: &[u8]) -> DateTicker {
        DateTicker {
            value: ArcSwap::from_pointee(Bytes::copy_from_slice(value)),
        }
    }
}

static CURRENT: Mutex<Weak<DateTicker>> = Mutex::new(Weak::new());

/// Returns the process-wide ticker, starting its refresh task if no live
/// reference exists. Must be called from within a tokio runtime.
pub(crate) fn acquire() -> Arc<DateTicker> {
    let mut current = CURRENT.lock().unwrap();
    if let Some(ticker) = current.upgrade() {
        return ticker;
    }
    let ticker = Arc::new(DateTicker {
        value: ArcSwap::from_pointee(DateTicker::now()),
    });
    *current = Arc::downgrade(&ticker);

    let weak = Arc::downgrade(&ticker);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            match weak.upgrade() {
                Some(ticker) => ticker.refresh(),
                None => break,
            }
        }
    });

    ticker
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn formatted_like_rfc1123() {
        let ticker = acquire();
        let value = ticker.current();
        // e.g. "Tue, 10 Nov 2009 23:00:00 GMT"
        assert_eq!(value.len(), 29);
        assert!(value.ends_with(b" GMT"));
    }

    #[tokio::test]
    async fn shared_between_holders() {
        let a = acquire();
        let b = acquire();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
