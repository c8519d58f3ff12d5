//! Fast HTTP/1.1 server and client.
//!
//! The server reads each request through a buffer-reusing incremental
//! codec, dispatches it to a [`Handler`], and writes the response with
//! keep-alive, pipelining, chunked bodies, connection hijack and per-IP /
//! global concurrency limits. The client half pools persistent connections
//! per origin and resolves DNS through a caching round-robin dialer.
//!
//! ```no_run
//! use blaze_http::{HandlerFunc, RequestCtx, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> blaze_http::Result<()> {
//!     let server = Server::new(
//!         ServerConfig::default(),
//!         HandlerFunc(|ctx: &mut RequestCtx| {
//!             ctx.success(b"text/plain", b"hello");
//!         }),
//!     );
//!     server.listen_and_serve("127.0.0.1:8080").await
//! }
//! ```

pub mod args;
pub mod bytesutil;
pub mod client;
pub mod codec;
pub mod cookie;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod status;
pub mod uri;

mod date;
mod kv;

pub use args::Args;
pub use client::{Client, ClientConfig, ClientError, HostClient, TcpDialer};
pub use cookie::Cookie;
pub use pool::{acquire_request, acquire_response, release_request, release_response};
pub use protocol::{Request, RequestHeader, Response, ResponseHeader};
pub use server::{
    Handler, HandlerFunc, HijackedConn, RequestCtx, ServeError, Server, ServerConfig,
    TimeoutHandler, WorkerPool,
};
pub use uri::Uri;

pub type Error = anyhow::Error;
pub type Result<T> = anyhow::Result<T>;
