//! Fixed-length body decoder.

use bytes::BytesMut;

use crate::codec::error::DecodeError;
use crate::codec::PayloadItem;

#[derive(Debug)]
pub(crate) struct LengthDecoder {
    remaining: u64,
}

impl LengthDecoder {
    pub(crate) fn new(length: u64) -> Self {
        LengthDecoder { remaining: length }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.remaining == 0
    }

    pub(crate) fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<PayloadItem>, DecodeError> {
        if self.remaining == 0 {
            return Ok(Some(PayloadItem::Eof));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let take = self.remaining.min(src.len() as u64) as usize;
        let chunk = src.split_to(take).freeze();
        self.remaining -= take as u64;
        Ok(Some(PayloadItem::Chunk(chunk)))
    }
}
