//! Decoder producing complete responses on the client side.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::codec::error::DecodeError;
use crate::codec::{PayloadDecoder, PayloadItem};
use crate::protocol::Response;
use crate::status;

pub struct ResponseDecoder {
    body: Option<(Response, PayloadDecoder)>,
    spare: Option<Response>,
    max_header_size: usize,
    /// Skip the body of the next response (HEAD request in flight). Reset
    /// after each decoded response.
    pub(crate) skip_body: bool,
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseDecoder {
    pub fn new() -> Self {
        ResponseDecoder {
            body: None,
            spare: None,
            max_header_size: super::request_decoder::DEFAULT_MAX_HEADER_SIZE,
            skip_body: false,
        }
    }

    pub(crate) fn with_max_header_size(max_header_size: usize) -> Self {
        ResponseDecoder {
            max_header_size: if max_header_size == 0 {
                super::request_decoder::DEFAULT_MAX_HEADER_SIZE
            } else {
                max_header_size
            },
            ..Self::new()
        }
    }

    pub fn recycle(&mut self, mut resp: Response) {
        resp.clear();
        self.spare = Some(resp);
    }

    fn decode_inner(
        &mut self,
        src: &mut BytesMut,
        at_eof: bool,
    ) -> Result<Option<Response>, DecodeError> {
        loop {
            match self.body.take() {
                Some((mut resp, mut payload)) => loop {
                    let item = if at_eof {
                        payload.decode_eof(src)?
                    } else {
                        payload.decode(src)?
                    };
                    match item {
                        None => {
                            self.body = Some((resp, payload));
                            return Ok(None);
                        }
                        Some(PayloadItem::Chunk(chunk)) => resp.append_body(&chunk),
                        Some(PayloadItem::Eof) => return Ok(Some(resp)),
                    }
                },
                None => {
                    let mut resp = self.spare.take().unwrap_or_default();
                    match resp.header.parse(&mut src[..])? {
                        None => {
                            if src.len() > self.max_header_size {
                                return Err(DecodeError::TooLargeHeader {
                                    current_size: src.len(),
                                    max_size: self.max_header_size,
                                });
                            }
                            self.spare = Some(resp);
                            return Ok(None);
                        }
                        Some(consumed) => {
                            src.advance(consumed);
                            if self.skip_body || status::skips_body(resp.header.status_code()) {
                                self.skip_body = false;
                                return Ok(Some(resp));
                            }
                            let payload =
                                PayloadDecoder::for_content_length(resp.header.content_length());
                            self.body = Some((resp, payload));
                        }
                    }
                }
            }
        }
    }
}

impl Decoder for ResponseDecoder {
    type Item = Response;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>, DecodeError> {
        self.decode_inner(src, false)
    }

    /// At EOF an identity body completes; a truncated header, fixed or
    /// chunked body is an error. EOF on an idle connection is clean.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Response>, DecodeError> {
        if src.is_empty() && self.body.is_none() {
            return Ok(None);
        }
        match self.decode_inner(src, true)? {
            Some(resp) => Ok(Some(resp)),
            None => {
                if src.is_empty() && self.body.is_none() {
                    Ok(None)
                } else {
                    Err(DecodeError::UnexpectedEof)
                }
            }
        }
    }
}
