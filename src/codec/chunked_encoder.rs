//! Chunked transfer encoder: `hex-size CRLF data CRLF` per fragment,
//! `0 CRLF CRLF` terminator.

use bytes::BytesMut;

use crate::bytesutil::append_hex_uint;
use crate::codec::PayloadItem;

#[derive(Debug, Default)]
pub(crate) struct ChunkedEncoder {
    eof: bool,
}

impl ChunkedEncoder {
    pub(crate) fn new() -> Self {
        ChunkedEncoder::default()
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.eof
    }

    pub(crate) fn encode(&mut self, item: PayloadItem, dst: &mut BytesMut) {
        if self.eof {
            return;
        }
        match item {
            PayloadItem::Chunk(bytes) => {
                // an empty chunk would read as the terminator
                if bytes.is_empty() {
                    return;
                }
                append_hex_uint(dst, bytes.len() as u64);
                dst.extend_from_slice(b"\r\n");
                dst.extend_from_slice(&bytes);
                dst.extend_from_slice(b"\r\n");
            }
            PayloadItem::Eof => {
                self.eof = true;
                dst.extend_from_slice(b"0\r\n\r\n");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::chunked_decoder::ChunkedDecoder;
    use bytes::Bytes;

    #[test]
    fn frames_and_terminator() {
        let mut enc = ChunkedEncoder::new();
        let mut dst = BytesMut::new();
        enc.encode(PayloadItem::Chunk(Bytes::from_static(b"hello world!")), &mut dst);
        enc.encode(PayloadItem::Chunk(Bytes::new()), &mut dst);
        enc.encode(PayloadItem::Eof, &mut dst);
        assert_eq!(&dst[..], b"c\r\nhello world!\r\n0\r\n\r\n");
        assert!(enc.is_eof());

        // nothing after eof
        enc.encode(PayloadItem::Chunk(Bytes::from_static(b"late")), &mut dst);
        assert_eq!(&dst[..], b"c\r\nhello world!\r\n0\r\n\r\n");
    }

    #[test]
    fn decode_of_encode_is_identity() {
        let body: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let mut enc = ChunkedEncoder::new();
        let mut wire = BytesMut::new();
        for part in body.chunks(777) {
            enc.encode(PayloadItem::Chunk(Bytes::copy_from_slice(part)), &mut wire);
        }
        enc.encode(PayloadItem::Eof, &mut wire);

        let mut dec = ChunkedDecoder::new();
        let mut decoded = Vec::new();
        loop {
            match dec.decode(&mut wire).unwrap() {
                Some(PayloadItem::Chunk(b)) => decoded.extend_from_slice(&b),
                Some(PayloadItem::Eof) => break,
                None => panic!("incomplete"),
            }
        }
        assert_eq!(decoded, body);
    }
}
