//! Identity (read-until-close) body decoder. Only responses use it: a
//! response with neither `Content-Length` nor chunked encoding ends with the
//! connection.

use bytes::BytesMut;

use crate::codec::error::DecodeError;
use crate::codec::PayloadItem;

#[derive(Debug, Default)]
pub(crate) struct IdentityDecoder;

impl IdentityDecoder {
    pub(crate) fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<PayloadItem>, DecodeError> {
        if src.is_empty() {
            return Ok(None);
        }
        Ok(Some(PayloadItem::Chunk(src.split().freeze())))
    }

    pub(crate) fn decode_eof(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<PayloadItem>, DecodeError> {
        if src.is_empty() {
            return Ok(Some(PayloadItem::Eof));
        }
        self.decode(src)
    }
}
