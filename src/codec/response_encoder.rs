//! Encoder serializing server responses.
//!
//! A buffered response is written in one piece. A streamed response is
//! written as a head followed by [`PayloadItem`] frames: raw copies when the
//! stream size is known, chunked frames otherwise.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Encoder;

use crate::codec::{ChunkedEncoder, PayloadItem};
use crate::date::DateTicker;
use crate::protocol::{Response, CONTENT_LENGTH_CHUNKED};

pub struct ResponseEncoder {
    server_name: Bytes,
    date: Arc<DateTicker>,
    /// Present while a chunked body stream is being written.
    chunked: Option<ChunkedEncoder>,
}

impl ResponseEncoder {
    pub(crate) fn new(server_name: Bytes, date: Arc<DateTicker>) -> Self {
        ResponseEncoder {
            server_name,
            date,
            chunked: None,
        }
    }
}

impl<'a> Encoder<&'a Response> for ResponseEncoder {
    type Error = std::io::Error;

    fn encode(&mut self, resp: &'a Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body_len = match resp.body_stream_size() {
            Some(n) if n >= 0 => n,
            Some(_) => CONTENT_LENGTH_CHUNKED,
            None => resp.body().len() as i64,
        };
        let date = self.date.current();
        resp.header.write_to(dst, body_len, &self.server_name, &date);

        if resp.skip_body {
            return Ok(());
        }
        if resp.has_body_stream() {
            if body_len == CONTENT_LENGTH_CHUNKED {
                self.chunked = Some(ChunkedEncoder::new());
            }
        } else {
            dst.extend_from_slice(resp.body());
        }
        Ok(())
    }
}

impl Encoder<PayloadItem> for ResponseEncoder {
    type Error = std::io::Error;

    fn encode(&mut self, item: PayloadItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match &mut self.chunked {
            Some(enc) => {
                let at_eof = item.is_eof();
                enc.encode(item, dst);
                if at_eof {
                    self.chunked = None;
                }
            }
            None => {
                if let PayloadItem::Chunk(bytes) = item {
                    dst.extend_from_slice(&bytes);
                }
            }
        }
        Ok(())
    }
}
