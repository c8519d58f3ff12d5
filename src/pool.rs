//! Object pools for steady-state allocation reuse.
//!
//! Pool misses fall back to fresh allocation; correctness never depends on a
//! hit. Released objects are reset before they are stored.

use std::sync::{Mutex, OnceLock};

use crate::protocol::{Request, Response};
use crate::server::RequestCtx;

const MAX_IDLE: usize = 256;

pub(crate) trait Reusable: Default + Send {
    fn reset(&mut self);
}

impl Reusable for Request {
    fn reset(&mut self) {
        self.clear();
    }
}

impl Reusable for Response {
    fn reset(&mut self) {
        self.clear();
    }
}

pub(crate) struct Pool<T> {
    items: Mutex<Vec<T>>,
    max_idle: usize,
}

impl<T: Reusable> Pool<T> {
    pub(crate) fn new(max_idle: usize) -> Self {
        Pool {
            items: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    pub(crate) fn acquire(&self) -> T {
        self.items.lock().unwrap().pop().unwrap_or_default()
    }

    pub(crate) fn release(&self, mut item: T) {
        item.reset();
        let mut items = self.items.lock().unwrap();
        if items.len() < self.max_idle {
            items.push(item);
        }
    }
}

fn request_pool() -> &'static Pool<Request> {
    static POOL: OnceLock<Pool<Request>> = OnceLock::new();
    POOL.get_or_init(|| Pool::new(MAX_IDLE))
}

fn response_pool() -> &'static Pool<Response> {
    static POOL: OnceLock<Pool<Response>> = OnceLock::new();
    POOL.get_or_init(|| Pool::new(MAX_IDLE))
}

fn ctx_pool() -> &'static Pool<RequestCtx> {
    static POOL: OnceLock<Pool<RequestCtx>> = OnceLock::new();
    POOL.get_or_init(|| Pool::new(MAX_IDLE))
}

/// Takes a cleared [`Request`] from the shared pool.
pub fn acquire_request() -> Request {
    request_pool().acquire()
}

/// Returns a request to the shared pool for reuse.
pub fn release_request(req: Request) {
    request_pool().release(req);
}

/// Takes a cleared [`Response`] from the shared pool.
pub fn acquire_response() -> Response {
    response_pool().acquire()
}

/// Returns a response to the shared pool for reuse.
pub fn release_response(resp: Response) {
    response_pool().release(resp);
}

pub(crate) fn acquire_ctx() -> RequestCtx {
    ctx_pool().acquire()
}

pub(crate) fn release_ctx(ctx: RequestCtx) {
    ctx_pool().release(ctx);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pooled_request_is_cleared() {
        let mut req = acquire_request();
        req.header.set_method(b"POST");
        req.set_body(b"data");
        release_request(req);

        let req = acquire_request();
        assert_eq!(req.header.method(), b"GET");
        assert!(req.body().is_empty());
        release_request(req);
    }

    #[test]
    fn idle_cap_is_enforced() {
        let pool: Pool<Request> = Pool::new(2);
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        pool.release(a);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.items.lock().unwrap().len(), 2);
    }
}
