//! Encoder serializing client requests.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Encoder;

use crate::protocol::{Request, SendError};

pub struct RequestEncoder {
    default_user_agent: Bytes,
    scratch: BytesMut,
}

impl RequestEncoder {
    pub fn new(default_user_agent: Bytes) -> Self {
        RequestEncoder {
            default_user_agent,
            scratch: BytesMut::new(),
        }
    }
}

impl<'a> Encoder<&'a Request> for RequestEncoder {
    type Error = SendError;

    fn encode(&mut self, req: &'a Request, dst: &mut BytesMut) -> Result<(), SendError> {
        req.write_to(dst, &self.default_user_agent, &mut self.scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RequestDecoder;
    use tokio_util::codec::Decoder;

    #[test]
    fn write_then_read_preserves_the_request() {
        let mut req = Request::default();
        req.header.set_method(b"POST");
        req.header.set_request_uri(b"/submit?a=1");
        req.header.set_host(b"example.com");
        req.header.set_user_agent(b"custom-agent");
        req.header.set_content_type(b"application/x-www-form-urlencoded");
        req.set_body(b"a=1&b=2");

        let mut enc = RequestEncoder::new(Bytes::from_static(b"default"));
        let mut wire = BytesMut::new();
        enc.encode(&req, &mut wire).unwrap();

        let parsed = RequestDecoder::new().decode(&mut wire).unwrap().unwrap();
        assert_eq!(parsed.header.method(), req.header.method());
        assert_eq!(parsed.header.request_uri(), req.header.request_uri());
        assert_eq!(parsed.header.host(), req.header.host());
        assert_eq!(parsed.header.user_agent(), req.header.user_agent());
        assert_eq!(parsed.header.content_type(), req.header.content_type());
        assert_eq!(parsed.body(), req.body());
        assert!(wire.is_empty());
    }

    #[test]
    fn serializes_with_default_user_agent() {
        let mut req = Request::default();
        req.header.set_request_uri(b"/path");
        req.header.set_host(b"example.com");

        let mut enc = RequestEncoder::new(Bytes::from_static(b"agent/1"));
        let mut dst = BytesMut::new();
        enc.encode(&req, &mut dst).unwrap();
        assert_eq!(
            &dst[..],
            &b"GET /path HTTP/1.1\r\nUser-Agent: agent/1\r\nHost: example.com\r\n\r\n"[..]
        );
    }
}
