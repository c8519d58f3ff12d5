//! HTTP request message.

use bytes::BytesMut;

use crate::args::Args;
use crate::protocol::error::{ParseError, SendError};
use crate::protocol::headers::{RequestHeader, POST_ARGS_CONTENT_TYPE};
use crate::uri::Uri;

/// An HTTP request: header plus fully-buffered body. The URI and POST args
/// are materialized lazily on first access.
#[derive(Debug, Default)]
pub struct Request {
    pub header: RequestHeader,
    body: BytesMut,

    uri: Uri,
    parsed_uri: bool,

    post_args: Args,
    parsed_post_args: bool,
}

impl Request {
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub(crate) fn body_mut(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    pub fn set_body(&mut self, body: &[u8]) {
        self.body.clear();
        self.body.extend_from_slice(body);
    }

    pub fn append_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    /// Parsed URI, materialized from the Host header and request URI on
    /// first call.
    pub fn uri(&mut self) -> &mut Uri {
        if !self.parsed_uri {
            self.uri.parse(self.header.host(), self.header.request_uri());
            self.parsed_uri = true;
        }
        &mut self.uri
    }

    /// POST arguments parsed from an urlencoded body on first call.
    pub fn post_args(&mut self) -> Result<&Args, ParseError> {
        if !self.parsed_post_args {
            if !self.header.is_post() {
                return Err(ParseError::PostArgs {
                    reason: "request method is not POST",
                });
            }
            if self.header.content_type() != POST_ARGS_CONTENT_TYPE {
                return Err(ParseError::PostArgs {
                    reason: "unexpected Content-Type",
                });
            }
            self.post_args.parse(&self.body);
            self.parsed_post_args = true;
        }
        Ok(&self.post_args)
    }

    /// Resets the request for reuse. Buffer capacity is retained.
    pub fn clear(&mut self) {
        self.header.clear();
        self.body.clear();
        self.uri.clear();
        self.parsed_uri = false;
        self.post_args.clear();
        self.parsed_post_args = false;
    }

    /// Drops oversized buffers instead of retaining them, for
    /// memory-conscious reuse.
    pub(crate) fn trim_body_buffer(&mut self, max_retained: usize) {
        if self.body.capacity() > max_retained {
            self.body = BytesMut::new();
        }
    }

    pub fn copy_to(&self, dst: &mut Request) {
        dst.clear();
        self.header.copy_to(&mut dst.header);
        dst.body.extend_from_slice(&self.body);
    }

    /// Serializes the request. POST bodies are written with their exact
    /// `Content-Length`; a non-empty body on any other method is an error.
    pub fn write_to(
        &self,
        dst: &mut BytesMut,
        default_user_agent: &[u8],
        scratch: &mut BytesMut,
    ) -> Result<(), SendError> {
        if !self.header.is_post() && !self.body.is_empty() {
            return Err(SendError::UnexpectedBody);
        }
        self.header
            .write_to(dst, self.body.len(), default_user_agent, scratch)?;
        if self.header.is_post() {
            dst.extend_from_slice(&self.body);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_uri() {
        let mut req = Request::default();
        req.header.set_host(b"example.com");
        req.header.set_request_uri(b"/path?a=1");
        assert_eq!(req.uri().host(), b"example.com");
        assert_eq!(req.uri().path(), b"/path");
        assert_eq!(req.uri().query_args().peek(b"a"), Some(&b"1"[..]));
    }

    #[test]
    fn post_args_happy_path() {
        let mut req = Request::default();
        req.header.set_method(b"POST");
        req.header.set_content_type(b"application/x-www-form-urlencoded");
        req.set_body(b"a=1&b=two");
        let args = req.post_args().unwrap();
        assert_eq!(args.peek(b"a"), Some(&b"1"[..]));
        assert_eq!(args.peek(b"b"), Some(&b"two"[..]));
    }

    #[test]
    fn post_args_rejects_wrong_method_and_type() {
        let mut req = Request::default();
        req.set_body(b"a=1");
        assert!(req.post_args().is_err());

        let mut req = Request::default();
        req.header.set_method(b"POST");
        req.header.set_content_type(b"application/json");
        req.set_body(b"{}");
        assert!(req.post_args().is_err());
    }

    #[test]
    fn write_rejects_body_on_get() {
        let mut req = Request::default();
        req.header.set_request_uri(b"/");
        req.header.set_host(b"h");
        req.set_body(b"oops");
        let mut dst = BytesMut::new();
        let mut scratch = BytesMut::new();
        assert!(matches!(
            req.write_to(&mut dst, b"ua", &mut scratch),
            Err(SendError::UnexpectedBody)
        ));
    }

    #[test]
    fn copy_to_clones_header_and_body() {
        let mut req = Request::default();
        req.header.set_method(b"POST");
        req.header.set_request_uri(b"/x");
        req.header.set_host(b"h");
        req.header.set_content_type(b"a/b");
        req.set_body(b"payload");

        let mut dst = Request::default();
        req.copy_to(&mut dst);
        assert_eq!(dst.header.method(), b"POST");
        assert_eq!(dst.body(), b"payload");
    }
}
