//! Status code constants and the cached status line table.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use bytes::Bytes;

pub const CONTINUE: u16 = 100;
pub const OK: u16 = 200;
pub const NO_CONTENT: u16 = 204;
pub const MOVED_PERMANENTLY: u16 = 301;
pub const FOUND: u16 = 302;
pub const SEE_OTHER: u16 = 303;
pub const NOT_MODIFIED: u16 = 304;
pub const BAD_REQUEST: u16 = 400;
pub const NOT_FOUND: u16 = 404;
pub const REQUEST_TIMEOUT: u16 = 408;
pub const PAYLOAD_TOO_LARGE: u16 = 413;
pub const INTERNAL_SERVER_ERROR: u16 = 500;

fn reason(code: u16) -> &'static str {
    match code {
        OK => "OK",
        INTERNAL_SERVER_ERROR => "Internal server error",
        _ => "Error",
    }
}

/// Responses with these codes carry no body.
pub(crate) fn skips_body(code: u16) -> bool {
    (100..200).contains(&code) || code == NO_CONTENT || code == NOT_MODIFIED
}

fn cache() -> &'static ArcSwap<HashMap<u16, Bytes>> {
    static CACHE: OnceLock<ArcSwap<HashMap<u16, Bytes>>> = OnceLock::new();
    CACHE.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert(OK, format_line(OK));
        ArcSwap::from_pointee(m)
    })
}

fn format_line(code: u16) -> Bytes {
    Bytes::from(format!("HTTP/1.1 {} {}\r\n", code, reason(code)))
}

/// Full status line for `code`, cached process-wide. Misses append to the
/// shared table with an atomic map swap.
pub(crate) fn status_line(code: u16) -> Bytes {
    let cache = cache();
    if let Some(line) = cache.load().get(&code) {
        return line.clone();
    }
    let line = format_line(code);
    cache.rcu(|m| {
        let mut m = (**m).clone();
        m.entry(code).or_insert_with(|| line.clone());
        m
    });
    line
}
