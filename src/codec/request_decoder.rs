//! Decoder producing complete requests (header plus fully-buffered body).

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::error::DecodeError;
use crate::codec::{PayloadDecoder, PayloadItem};
use crate::protocol::{Request, CONTENT_LENGTH_CHUNKED};

pub(crate) const DEFAULT_MAX_HEADER_SIZE: usize = 8 * 1024;

pub struct RequestDecoder {
    body: Option<(Request, PayloadDecoder)>,
    spare: Option<Request>,
    max_header_size: usize,
    /// 0 means unlimited.
    max_body_size: u64,
    get_only: bool,
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestDecoder {
    pub fn new() -> Self {
        RequestDecoder {
            body: None,
            spare: None,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_body_size: 0,
            get_only: false,
        }
    }

    pub(crate) fn with_limits(max_header_size: usize, max_body_size: u64, get_only: bool) -> Self {
        RequestDecoder {
            max_header_size: if max_header_size == 0 {
                DEFAULT_MAX_HEADER_SIZE
            } else {
                max_header_size
            },
            max_body_size,
            get_only,
            ..Self::new()
        }
    }

    /// Hands a served request back for reuse by the next decode.
    pub fn recycle(&mut self, mut req: Request) {
        req.clear();
        self.spare = Some(req);
    }

    fn check_body_size(&self, current: u64) -> Result<(), DecodeError> {
        if self.max_body_size > 0 && current > self.max_body_size {
            return Err(DecodeError::TooLargeBody {
                current_size: current,
                max_size: self.max_body_size,
            });
        }
        Ok(())
    }
}

impl Decoder for RequestDecoder {
    type Item = Request;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Request>, DecodeError> {
        loop {
            match self.body.take() {
                Some((mut req, mut payload)) => loop {
                    match payload.decode(src)? {
                        None => {
                            self.body = Some((req, payload));
                            return Ok(None);
                        }
                        Some(PayloadItem::Chunk(chunk)) => {
                            req.append_body(&chunk);
                            self.check_body_size(req.body().len() as u64)?;
                        }
                        Some(PayloadItem::Eof) => return Ok(Some(req)),
                    }
                },
                None => {
                    let mut req = self.spare.take().unwrap_or_default();
                    match req.header.parse(&mut src[..])? {
                        None => {
                            if src.len() > self.max_header_size {
                                return Err(DecodeError::TooLargeHeader {
                                    current_size: src.len(),
                                    max_size: self.max_header_size,
                                });
                            }
                            self.spare = Some(req);
                            return Ok(None);
                        }
                        Some(consumed) => {
                            src.advance(consumed);
                            trace!(header_size = consumed, "parsed request header");
                            if self.get_only && !req.header.is_get() {
                                return Err(DecodeError::NonGetRequest);
                            }
                            match req.header.content_length() {
                                0 => return Ok(Some(req)),
                                CONTENT_LENGTH_CHUNKED => {
                                    self.body = Some((req, PayloadDecoder::chunked()));
                                }
                                n => {
                                    // identity never reaches requests: the
                                    // header parser forces 0 or errors
                                    self.check_body_size(n as u64)?;
                                    req.body_mut().reserve(n as usize);
                                    self.body = Some((req, PayloadDecoder::length(n as u64)));
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// EOF with an empty buffer between requests is a clean keep-alive
    /// close; EOF mid-header or mid-body is an error.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Request>, DecodeError> {
        match self.decode(src)? {
            Some(req) => Ok(Some(req)),
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
