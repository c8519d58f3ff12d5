//! Per-request context handed to handlers.

use std::any::Any;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::io::AsyncRead;

use crate::args::Args;
use crate::pool::Reusable;
use crate::protocol::{ParseError, Request, Response};
use crate::server::conn::HijackedConn;
use crate::status;
use crate::uri::Uri;

pub(crate) type HijackHandlerFn = Box<dyn FnOnce(HijackedConn) -> BoxFuture<'static, ()> + Send>;

static NEXT_CTX_ID: AtomicU64 = AtomicU64::new(0);

/// Container for one request/response exchange. Owned by the serving worker
/// for the duration of a handler invocation; holds no connection reference,
/// so a timed-out handler task can keep it alive safely.
pub struct RequestCtx {
    pub request: Request,
    pub response: Response,

    id: u64,
    conn_request_num: u64,
    conn_time: Instant,
    request_time: Instant,
    last_read_duration: Duration,
    remote_addr: SocketAddr,

    user_values: HashMap<String, Box<dyn Any + Send + Sync>>,
    hijack_handler: Option<HijackHandlerFn>,
    timeout_err_msg: Option<String>,
}

impl Default for RequestCtx {
    fn default() -> Self {
        let now = Instant::now();
        RequestCtx {
            request: Request::default(),
            response: Response::default(),
            id: NEXT_CTX_ID.fetch_add(1, Ordering::Relaxed) << 32,
            conn_request_num: 0,
            conn_time: now,
            request_time: now,
            last_read_duration: Duration::ZERO,
            remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            user_values: HashMap::new(),
            hijack_handler: None,
            timeout_err_msg: None,
        }
    }
}

impl Reusable for RequestCtx {
    fn reset(&mut self) {
        self.request.clear();
        self.response.clear();
        self.conn_request_num = 0;
        self.last_read_duration = Duration::ZERO;
        self.user_values.clear();
        self.hijack_handler = None;
        self.timeout_err_msg = None;
    }
}

impl RequestCtx {
    pub(crate) fn attach(&mut self, remote_addr: SocketAddr, conn_time: Instant) {
        self.remote_addr = remote_addr;
        self.conn_time = conn_time;
    }

    pub(crate) fn begin_request(
        &mut self,
        request: Request,
        conn_request_num: u64,
        last_read_duration: Duration,
    ) {
        self.request = request;
        self.response.clear();
        self.id = self.id.wrapping_add(1);
        self.conn_request_num = conn_request_num;
        self.request_time = Instant::now();
        self.last_read_duration = last_read_duration;
        self.user_values.clear();
    }

    /// Takes the served request back out for buffer reuse, leaving the ctx
    /// ready for the next exchange.
    pub(crate) fn end_request(&mut self) -> Request {
        std::mem::take(&mut self.request)
    }

    /// Unique id of the current request.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Request sequence number on this connection, starting at 1.
    pub fn conn_request_num(&self) -> u64 {
        self.conn_request_num
    }

    /// Time the connection was accepted.
    pub fn conn_time(&self) -> Instant {
        self.conn_time
    }

    /// Time the current request was read.
    pub fn request_time(&self) -> Instant {
        self.request_time
    }

    pub(crate) fn last_read_duration(&self) -> Duration {
        self.last_read_duration
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn remote_ip(&self) -> IpAddr {
        self.remote_addr.ip()
    }

    pub fn method(&self) -> &[u8] {
        self.request.header.method()
    }

    pub fn is_get(&self) -> bool {
        self.request.header.is_get()
    }

    pub fn is_post(&self) -> bool {
        self.request.header.is_post()
    }

    pub fn is_head(&self) -> bool {
        self.request.header.is_head()
    }

    pub fn uri(&mut self) -> &mut Uri {
        self.request.uri()
    }

    pub fn path(&mut self) -> &[u8] {
        self.request.uri().path()
    }

    pub fn host(&mut self) -> &[u8] {
        self.request.uri().host()
    }

    pub fn user_agent(&self) -> &[u8] {
        self.request.header.user_agent()
    }

    pub fn referer(&self) -> &[u8] {
        self.request.header.referer()
    }

    /// Query arguments from the request URI.
    pub fn query_args(&mut self) -> &mut Args {
        self.request.uri().query_args()
    }

    /// Arguments sent in an urlencoded POST body.
    pub fn post_args(&mut self) -> Result<&Args, ParseError> {
        self.request.post_args()
    }

    pub fn post_body(&self) -> &[u8] {
        self.request.body()
    }

    pub fn set_status_code(&mut self, code: u16) {
        self.response.set_status_code(code);
    }

    pub fn set_content_type(&mut self, content_type: &[u8]) {
        self.response.header.set_content_type(content_type);
    }

    pub fn set_body(&mut self, body: &[u8]) {
        self.response.set_body(body);
    }

    pub fn set_body_string(&mut self, body: &str) {
        self.response.set_body_string(body);
    }

    pub fn write(&mut self, chunk: &[u8]) {
        self.response.append_body(chunk);
    }

    pub fn set_body_stream(
        &mut self,
        reader: impl AsyncRead + Send + Sync + Unpin + 'static,
        size: i64,
    ) {
        self.response.set_body_stream(reader, size);
    }

    /// Sets response content type and body in one call.
    pub fn success(&mut self, content_type: &[u8], body: &[u8]) {
        self.set_content_type(content_type);
        self.set_body(body);
    }

    /// Replaces the response with a plain-text error.
    pub fn error(&mut self, msg: &str, status_code: u16) {
        self.response.clear();
        self.set_status_code(status_code);
        self.set_body_string(msg);
    }

    /// Sets `Location` from the current URI updated by `target` and the
    /// redirect status. Codes other than 301, 302 and 303 become 302.
    pub fn redirect(&mut self, target: &[u8], status_code: u16) {
        let mut uri = Uri::default();
        self.request.uri().copy_to(&mut uri);
        uri.update(target);
        let location = uri.full_uri().to_vec();
        self.response.header.set(b"Location", &location);
        let code = match status_code {
            status::MOVED_PERMANENTLY | status::FOUND | status::SEE_OTHER => status_code,
            _ => status::FOUND,
        };
        self.set_status_code(code);
    }

    /// Forces `Connection: close` after this response.
    pub fn set_connection_close(&mut self) {
        self.response.header.set_connection_close();
    }

    pub fn set_user_value(&mut self, key: &str, value: impl Any + Send + Sync) {
        self.user_values.insert(key.to_string(), Box::new(value));
    }

    pub fn user_value(&self, key: &str) -> Option<&(dyn Any + Send + Sync)> {
        self.user_values.get(key).map(|v| &**v)
    }

    /// Requests that the connection be handed to `handler` after the
    /// response is written. The server loop skips the hand-off when either
    /// side asked for `Connection: close`.
    pub fn hijack<F, Fut>(&mut self, handler: F)
    where
        F: FnOnce(HijackedConn) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.hijack_handler =
            Some(Box::new(move |conn| -> BoxFuture<'static, ()> {
                Box::pin(handler(conn))
            }));
    }

    pub(crate) fn take_hijack_handler(&mut self) -> Option<HijackHandlerFn> {
        self.hijack_handler.take()
    }

    /// Marks the exchange as timed out. The serving loop discards whatever
    /// the handler wrote and replies 408 with `msg`; all later response
    /// modifications are ignored.
    pub fn timeout_error(&mut self, msg: &str) {
        self.timeout_err_msg = Some(msg.to_string());
    }

    pub fn timeout_err_msg(&self) -> Option<&str> {
        self.timeout_err_msg.as_deref()
    }

    pub(crate) fn take_timeout_err_msg(&mut self) -> Option<String> {
        self.timeout_err_msg.take()
    }

    /// Splits off an owned ctx for a handler task racing a timer. The task
    /// ctx carries the request, response and user values but no connection
    /// state; the wire stays with the serving loop.
    pub(crate) fn detach_for_task(&mut self) -> RequestCtx {
        RequestCtx {
            request: std::mem::take(&mut self.request),
            response: std::mem::take(&mut self.response),
            id: self.id,
            conn_request_num: self.conn_request_num,
            conn_time: self.conn_time,
            request_time: self.request_time,
            last_read_duration: self.last_read_duration,
            remote_addr: self.remote_addr,
            user_values: std::mem::take(&mut self.user_values),
            hijack_handler: None,
            timeout_err_msg: None,
        }
    }

    /// Reabsorbs a task ctx that finished in time.
    pub(crate) fn reattach(&mut self, done: RequestCtx) {
        self.request = done.request;
        self.response = done.response;
        self.user_values = done.user_values;
        self.hijack_handler = done.hijack_handler;
        if done.timeout_err_msg.is_some() {
            self.timeout_err_msg = done.timeout_err_msg;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_replaces_response() {
        let mut ctx = RequestCtx::default();
        ctx.set_content_type(b"application/json");
        ctx.set_body(b"{}");
        ctx.error("request timed out", status::REQUEST_TIMEOUT);
        assert_eq!(ctx.response.status_code(), 408);
        assert_eq!(ctx.response.body(), b"request timed out");
    }

    #[test]
    fn user_values_roundtrip_and_clear() {
        let mut ctx = RequestCtx::default();
        ctx.set_user_value("n", 42u32);
        let v = ctx.user_value("n").unwrap().downcast_ref::<u32>();
        assert_eq!(v, Some(&42));

        ctx.reset();
        assert!(ctx.user_value("n").is_none());
    }

    #[test]
    fn redirect_statuses() {
        let mut ctx = RequestCtx::default();
        ctx.request.header.set_host(b"example.com");
        ctx.request.header.set_request_uri(b"/a/b");
        ctx.redirect(b"/target", 301);
        assert_eq!(ctx.response.status_code(), 301);

        ctx.redirect(b"/target", 418);
        assert_eq!(ctx.response.status_code(), 302);
    }

    #[test]
    fn detach_and_reattach_moves_exchange() {
        let mut ctx = RequestCtx::default();
        ctx.request.header.set_request_uri(b"/x");
        let id = ctx.id();

        let mut task_ctx = ctx.detach_for_task();
        assert_eq!(task_ctx.id(), id);
        assert_eq!(task_ctx.request.header.request_uri(), b"/x");
        assert!(ctx.request.header.request_uri().is_empty());

        task_ctx.set_body(b"done");
        ctx.reattach(task_ctx);
        assert_eq!(ctx.response.body(), b"done");
    }

    #[test]
    fn ids_are_distinct_across_contexts() {
        let a = RequestCtx::default();
        let b = RequestCtx::default();
        assert_ne!(a.id(), b.id());
    }
}
