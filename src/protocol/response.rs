//! HTTP response message.

use bytes::BytesMut;
use tokio::io::AsyncRead;

use crate::protocol::headers::{ResponseHeader, CONTENT_LENGTH_CHUNKED};

/// A streamed response body. `size >= 0` is written with a fixed
/// `Content-Length`; a negative size is encoded chunked. The reader is
/// dropped (closed) right after the body is written.
pub struct BodyStream {
    pub(crate) reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
    pub(crate) size: i64,
}

impl std::fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyStream").field("size", &self.size).finish()
    }
}

/// An HTTP response: header plus either a buffered body or a body stream
/// (mutually exclusive). `skip_body` suppresses body bytes on the wire, for
/// responses to HEAD.
#[derive(Debug, Default)]
pub struct Response {
    pub header: ResponseHeader,
    body: BytesMut,
    body_stream: Option<BodyStream>,
    pub skip_body: bool,
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.header.status_code()
    }

    pub fn set_status_code(&mut self, code: u16) {
        self.header.set_status_code(code);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub(crate) fn body_mut(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    pub fn set_body(&mut self, body: &[u8]) {
        self.body_stream = None;
        self.body.clear();
        self.body.extend_from_slice(body);
    }

    pub fn set_body_string(&mut self, body: &str) {
        self.set_body(body.as_bytes());
    }

    pub fn append_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    /// Replaces the body with a stream. A non-negative `size` is emitted as
    /// `Content-Length`; a negative one selects chunked encoding.
    pub fn set_body_stream(
        &mut self,
        reader: impl AsyncRead + Send + Sync + Unpin + 'static,
        size: i64,
    ) {
        self.body.clear();
        self.body_stream = Some(BodyStream {
            reader: Box::new(reader),
            size: if size < 0 { CONTENT_LENGTH_CHUNKED } else { size },
        });
    }

    pub fn has_body_stream(&self) -> bool {
        self.body_stream.is_some()
    }

    pub(crate) fn body_stream_size(&self) -> Option<i64> {
        self.body_stream.as_ref().map(|s| s.size)
    }

    pub(crate) fn take_body_stream(&mut self) -> Option<BodyStream> {
        self.body_stream.take()
    }

    /// Resets the response for reuse. Buffer capacity is retained; any body
    /// stream is dropped.
    pub fn clear(&mut self) {
        self.header.clear();
        self.body.clear();
        self.body_stream = None;
        self.skip_body = false;
    }

    pub(crate) fn trim_body_buffer(&mut self, max_retained: usize) {
        if self.body.capacity() > max_retained {
            self.body = BytesMut::new();
        }
    }

    /// Deep copy excluding the body stream, which is a one-shot source.
    pub fn copy_to(&self, dst: &mut Response) {
        dst.clear();
        self.header.copy_to(&mut dst.header);
        dst.body.extend_from_slice(&self.body);
        dst.skip_body = self.skip_body;
    }
}
