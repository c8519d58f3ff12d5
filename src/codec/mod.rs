mod chunked_decoder;
mod chunked_encoder;
mod error;
mod identity_decoder;
mod length_decoder;
mod payload_decoder;
mod request_decoder;
mod request_encoder;
mod response_decoder;
mod response_encoder;

pub use error::DecodeError;
pub use request_decoder::RequestDecoder;
pub use request_encoder::RequestEncoder;
pub use response_decoder::ResponseDecoder;
pub use response_encoder::ResponseEncoder;

pub(crate) use chunked_encoder::ChunkedEncoder;
pub(crate) use payload_decoder::PayloadDecoder;

use bytes::Bytes;

/// One fragment of a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    Chunk(Bytes),
    Eof,
}

impl PayloadItem {
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}
