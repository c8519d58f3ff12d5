//! Body decoder dispatch over the three framing modes.

use bytes::BytesMut;

use crate::codec::chunked_decoder::ChunkedDecoder;
use crate::codec::error::DecodeError;
use crate::codec::identity_decoder::IdentityDecoder;
use crate::codec::length_decoder::LengthDecoder;
use crate::codec::PayloadItem;
use crate::protocol::{CONTENT_LENGTH_CHUNKED, CONTENT_LENGTH_IDENTITY};

#[derive(Debug)]
enum Kind {
    Length(LengthDecoder),
    Chunked(ChunkedDecoder),
    Identity(IdentityDecoder),
}

#[derive(Debug)]
pub(crate) struct PayloadDecoder {
    kind: Kind,
}

impl PayloadDecoder {
    pub(crate) fn length(n: u64) -> Self {
        PayloadDecoder {
            kind: Kind::Length(LengthDecoder::new(n)),
        }
    }

    pub(crate) fn chunked() -> Self {
        PayloadDecoder {
            kind: Kind::Chunked(ChunkedDecoder::new()),
        }
    }

    pub(crate) fn identity() -> Self {
        PayloadDecoder {
            kind: Kind::Identity(IdentityDecoder),
        }
    }

    /// Selects the decoder for a parsed content length sentinel.
    pub(crate) fn for_content_length(content_length: i64) -> Self {
        match content_length {
            CONTENT_LENGTH_CHUNKED => Self::chunked(),
            CONTENT_LENGTH_IDENTITY => Self::identity(),
            n => Self::length(n.max(0) as u64),
        }
    }

    pub(crate) fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<PayloadItem>, DecodeError> {
        match &mut self.kind {
            Kind::Length(dec) => dec.decode(src),
            Kind::Chunked(dec) => dec.decode(src),
            Kind::Identity(dec) => dec.decode(src),
        }
    }

    /// Like `decode`, but the input has hit EOF: identity bodies finish,
    /// truncated fixed or chunked bodies are an error.
    pub(crate) fn decode_eof(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<PayloadItem>, DecodeError> {
        match &mut self.kind {
            Kind::Identity(dec) => dec.decode_eof(src),
            Kind::Length(dec) => match dec.decode(src)? {
                Some(item) => Ok(Some(item)),
                None => Err(DecodeError::UnexpectedEof),
            },
            Kind::Chunked(dec) => match dec.decode(src)? {
                Some(item) => Ok(Some(item)),
                None => Err(DecodeError::UnexpectedEof),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_selection() {
        assert!(matches!(
            PayloadDecoder::for_content_length(CONTENT_LENGTH_CHUNKED).kind,
            Kind::Chunked(_)
        ));
        assert!(matches!(
            PayloadDecoder::for_content_length(CONTENT_LENGTH_IDENTITY).kind,
            Kind::Identity(_)
        ));
        assert!(matches!(
            PayloadDecoder::for_content_length(42).kind,
            Kind::Length(_)
        ));
    }

    #[test]
    fn short_fixed_body_errors_at_eof() {
        let mut dec = PayloadDecoder::length(10);
        let mut src = BytesMut::from(&b"abc"[..]);
        dec.decode(&mut src).unwrap();
        assert!(matches!(
            dec.decode_eof(&mut src),
            Err(DecodeError::UnexpectedEof)
        ));
    }
}
